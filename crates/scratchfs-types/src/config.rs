//! Build-time constants.

/// Size of one data chunk in bytes. Must be a power of two; the chunk
/// arithmetic in [`crate::arithmetic`] relies on it.
pub const CHUNK_SIZE: u64 = 512 * 1024;

/// Size of the receive buffer a client allocates for one directory listing
/// fan-out, shared between all queried daemons.
pub const DIRENTS_BUF_SIZE: usize = 8 * 1024 * 1024;

/// When the daemon that owns a path's metadata also owns chunks of that
/// path, `remove_metadata` removes those local chunks in the same request
/// and the client skips the extra `remove_data` RPC to it.
pub const IMPLICIT_DATA_REMOVAL: bool = true;

/// Soft per-RPC timeout in milliseconds. A request that does not complete
/// within this window counts as a transport failure for the fan-out
/// reduction.
pub const RPC_TIMEOUT_MS: u64 = 30_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_size_is_power_of_two() {
        assert!(CHUNK_SIZE.is_power_of_two());
    }
}
