use thiserror::Error;

/// Errors raised by the framing and transport layer. They surface to
/// callers as `EBUSY` (transport failure) through the client seam.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("invalid magic byte 0x{0:02x}")]
    InvalidMagic(u8),
    #[error("message of {size} bytes exceeds maximum {max}")]
    MessageTooLarge { size: usize, max: usize },
    #[error("checksum mismatch: expected 0x{expected:08x}, got 0x{actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("truncated request body")]
    TruncatedBody,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
