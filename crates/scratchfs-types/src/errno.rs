//! POSIX errno values used as the RPC-level error space.
//!
//! The client surfaces these directly as `errno`; internally every RPC reply
//! carries one of them in its status field. `0` is success, `EBUSY` marks a
//! transport failure, `EIO` a bulk or reduction failure, and the remaining
//! codes pass through from the metadata back-end.

/// Error code type carried in every `Status` and RPC reply.
#[allow(non_camel_case_types)]
pub type errno_t = i32;

pub const OK: errno_t = 0;
pub const EPERM: errno_t = 1;
pub const ENOENT: errno_t = 2;
pub const EIO: errno_t = 5;
pub const EACCES: errno_t = 13;
pub const EBUSY: errno_t = 16;
pub const EEXIST: errno_t = 17;
pub const ENOTDIR: errno_t = 20;
pub const EISDIR: errno_t = 21;
pub const EINVAL: errno_t = 22;
pub const ENOTEMPTY: errno_t = 39;
pub const ENODATA: errno_t = 61;

/// Human-readable name for an errno value, for log lines and
/// `Status::describe`.
pub fn to_string(code: errno_t) -> &'static str {
    match code {
        OK => "OK",
        EPERM => "EPERM",
        ENOENT => "ENOENT",
        EIO => "EIO",
        EACCES => "EACCES",
        EBUSY => "EBUSY",
        EEXIST => "EEXIST",
        ENOTDIR => "ENOTDIR",
        EISDIR => "EISDIR",
        EINVAL => "EINVAL",
        ENOTEMPTY => "ENOTEMPTY",
        ENODATA => "ENODATA",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(to_string(OK), "OK");
        assert_eq!(to_string(ENOENT), "ENOENT");
        assert_eq!(to_string(EBUSY), "EBUSY");
        assert_eq!(to_string(12345), "Unknown");
    }

    #[test]
    fn test_values_match_linux() {
        // The wire protocol depends on these exact values.
        assert_eq!(ENOENT, 2);
        assert_eq!(EIO, 5);
        assert_eq!(EBUSY, 16);
        assert_eq!(EEXIST, 17);
        assert_eq!(ENOTEMPTY, 39);
    }
}
