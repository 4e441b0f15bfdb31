use std::fmt;

use crate::errno::{self, errno_t};

/// A status value carrying an errno code and an optional message.
///
/// The `#[must_use]` attribute ensures callers do not silently ignore error
/// statuses.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct Status {
    code: errno_t,
    message: Option<String>,
}

impl Status {
    /// Create a status with just a code.
    pub fn new(code: errno_t) -> Self {
        Self {
            code,
            message: None,
        }
    }

    /// Create a status with a code and a descriptive message.
    pub fn with_message(code: errno_t, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(msg.into()),
        }
    }

    /// Return the numeric errno code.
    pub fn code(&self) -> errno_t {
        self.code
    }

    /// Return the optional message.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Whether this status represents success (code == 0).
    pub fn is_ok(&self) -> bool {
        self.code == errno::OK
    }

    /// Produce a human-readable description like `"ENOENT(2) no such key"`.
    pub fn describe(&self) -> String {
        let name = errno::to_string(self.code);
        match &self.message {
            Some(msg) => format!("{}({}) {}", name, self.code, msg),
            None => format!("{}({})", name, self.code),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl std::error::Error for Status {}

impl From<errno_t> for Status {
    fn from(code: errno_t) -> Self {
        Self::new(code)
    }
}

impl From<std::io::Error> for Status {
    fn from(e: std::io::Error) -> Self {
        let code = e.raw_os_error().unwrap_or(errno::EIO);
        Status::with_message(code, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ok() {
        let s = Status::new(errno::OK);
        assert!(s.is_ok());
        assert_eq!(s.code(), 0);
        assert!(s.message().is_none());
        assert_eq!(s.describe(), "OK(0)");
    }

    #[test]
    fn test_status_with_message() {
        let s = Status::with_message(errno::ENOENT, "no such key");
        assert!(!s.is_ok());
        assert_eq!(s.code(), 2);
        assert_eq!(s.message(), Some("no such key"));
        assert_eq!(s.describe(), "ENOENT(2) no such key");
    }

    #[test]
    fn test_status_display() {
        let s = Status::new(errno::EBUSY);
        assert_eq!(format!("{}", s), "EBUSY(16)");
    }

    #[test]
    fn test_status_from_code() {
        let s: Status = errno::EEXIST.into();
        assert_eq!(s.code(), 17);
    }

    #[test]
    fn test_status_from_io_error() {
        let io = std::io::Error::from_raw_os_error(errno::ENOENT);
        let s: Status = io.into();
        assert_eq!(s.code(), errno::ENOENT);
    }

    #[test]
    fn test_status_is_error() {
        let s = Status::new(errno::EIO);
        let e: &dyn std::error::Error = &s;
        assert!(e.to_string().contains("EIO"));
    }
}
