//! Chunk arithmetic over power-of-two chunk sizes.
//!
//! All functions take the chunk size explicitly so tests can exercise small
//! sizes; production callers pass [`crate::config::CHUNK_SIZE`].

/// Id of the chunk containing byte `offset`.
pub fn chunk_id_for_offset(offset: u64, chunk_size: u64) -> u64 {
    debug_assert!(chunk_size.is_power_of_two());
    offset >> chunk_size.trailing_zeros()
}

/// Number of chunks touched by the byte range `[offset, offset + count)`.
pub fn chunk_count_for_operation(offset: u64, count: u64, chunk_size: u64) -> u64 {
    if count == 0 {
        return 0;
    }
    chunk_id_for_offset(offset + count - 1, chunk_size) - chunk_id_for_offset(offset, chunk_size)
        + 1
}

/// Whether `offset` falls on a chunk boundary.
pub fn is_chunk_aligned(offset: u64, chunk_size: u64) -> bool {
    offset & (chunk_size - 1) == 0
}

/// Bytes between the start of the chunk containing `offset` and `offset`
/// itself. The owner of the first chunk of a request subtracts this from its
/// workload.
pub fn chunk_lpad(offset: u64, chunk_size: u64) -> u64 {
    offset & (chunk_size - 1)
}

/// Bytes between `offset` and the end of the chunk containing it, or zero if
/// `offset` is aligned. The owner of the last chunk of a request subtracts
/// this from its workload.
pub fn chunk_rpad(offset: u64, chunk_size: u64) -> u64 {
    if is_chunk_aligned(offset, chunk_size) {
        0
    } else {
        chunk_size - chunk_lpad(offset, chunk_size)
    }
}
