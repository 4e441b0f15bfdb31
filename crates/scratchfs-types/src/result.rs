use crate::errno::errno_t;
use crate::status::Status;

/// The standard result type used throughout ScratchFS, with `Status` as the
/// error.
pub type Result<T> = std::result::Result<T, Status>;

/// Create an error result from an errno code.
pub fn make_error<T>(code: errno_t) -> Result<T> {
    Err(Status::new(code))
}

/// Create an error result from an errno code and message.
pub fn make_error_msg<T>(code: errno_t, msg: impl Into<String>) -> Result<T> {
    Err(Status::with_message(code, msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errno;

    #[test]
    fn test_make_error() {
        let r: Result<i32> = make_error(errno::ENOENT);
        assert!(r.is_err());
        assert_eq!(r.unwrap_err().code(), 2);
    }

    #[test]
    fn test_make_error_msg() {
        let r: Result<i32> = make_error_msg(errno::EINVAL, "bad param");
        let err = r.unwrap_err();
        assert_eq!(err.code(), 22);
        assert_eq!(err.message(), Some("bad param"));
    }
}
