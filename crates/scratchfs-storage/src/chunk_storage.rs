use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use scratchfs_types::errno;
use scratchfs_types::{Result, make_error_msg};

/// Aggregate usage numbers for one daemon's chunk space, in units of chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkStat {
    pub chunk_size: u64,
    pub chunk_total: u64,
    pub chunk_free: u64,
}

/// Maps `(path, chunk_id)` to a file on local storage.
#[derive(Debug)]
pub struct ChunkStorage {
    root: PathBuf,
    chunk_size: u64,
}

impl ChunkStorage {
    /// Open the chunk space rooted at `root`, creating it if necessary.
    pub fn new(root: impl Into<PathBuf>, chunk_size: u64) -> Result<Self> {
        assert!(chunk_size.is_power_of_two());
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root, chunk_size })
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Directory holding all chunks of `file_path`. Separators in the
    /// absolute path are flattened to `:` so the whole namespace stays one
    /// level deep on disk.
    fn chunk_dir(&self, file_path: &str) -> PathBuf {
        self.root.join(file_path.trim_start_matches('/').replace('/', ":"))
    }

    fn chunk_file(&self, file_path: &str, chunk_id: u64) -> PathBuf {
        self.chunk_dir(file_path).join(chunk_id.to_string())
    }

    /// Write `data` into chunk `chunk_id` of `file_path` starting at
    /// `offset` within the chunk. Creates the chunk (and the path's chunk
    /// directory) as needed. Returns the number of bytes written.
    pub fn write_chunk(
        &self,
        file_path: &str,
        chunk_id: u64,
        data: &[u8],
        offset: u64,
    ) -> Result<u64> {
        if offset + data.len() as u64 > self.chunk_size {
            return make_error_msg(
                errno::EINVAL,
                format!(
                    "write of {} bytes at offset {} exceeds chunk size {}",
                    data.len(),
                    offset,
                    self.chunk_size
                ),
            );
        }
        fs::create_dir_all(self.chunk_dir(file_path))?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.chunk_file(file_path, chunk_id))?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(data.len() as u64)
    }

    /// Read up to `length` bytes from chunk `chunk_id` starting at `offset`
    /// within the chunk. Short reads at EOF are normal; a chunk that does
    /// not exist reads as zero bytes.
    pub fn read_chunk(
        &self,
        file_path: &str,
        chunk_id: u64,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>> {
        if offset + length > self.chunk_size {
            return make_error_msg(
                errno::EINVAL,
                format!(
                    "read of {} bytes at offset {} exceeds chunk size {}",
                    length, offset, self.chunk_size
                ),
            );
        }
        let mut file = match File::open(self.chunk_file(file_path, chunk_id)) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; length as usize];
        let mut filled = 0;
        loop {
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
            if filled == buf.len() {
                break;
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    /// Shrink chunk `chunk_id` to `length` bytes. Missing chunks are
    /// ignored.
    pub fn truncate_chunk_file(&self, file_path: &str, chunk_id: u64, length: u64) -> Result<()> {
        if length > self.chunk_size {
            return make_error_msg(
                errno::EINVAL,
                format!("truncate to {} exceeds chunk size {}", length, self.chunk_size),
            );
        }
        match OpenOptions::new()
            .write(true)
            .open(self.chunk_file(file_path, chunk_id))
        {
            Ok(file) => {
                file.set_len(length)?;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every chunk of `file_path` with id `>= chunk_start`.
    pub fn trim_chunk_space(&self, file_path: &str, chunk_start: u64) -> Result<()> {
        let dir = self.chunk_dir(file_path);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let Some(chunk_id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u64>().ok())
            else {
                continue;
            };
            if chunk_id >= chunk_start {
                debug!(path = file_path, chunk_id, "trimming chunk");
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    /// Remove all chunks of `file_path`. Safe to call when none exist.
    pub fn destroy_chunk_space(&self, file_path: &str) -> Result<()> {
        match fs::remove_dir_all(self.chunk_dir(file_path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Capacity of the filesystem backing the chunk root, in chunks.
    pub fn chunk_stat(&self) -> Result<ChunkStat> {
        let vfs = nix::sys::statvfs::statvfs(self.root.as_path())
            .map_err(|e| scratchfs_types::Status::with_message(errno::EIO, e.to_string()))?;
        let frsize = vfs.fragment_size() as u64;
        let bytes_total = vfs.blocks() as u64 * frsize;
        let bytes_free = vfs.blocks_available() as u64 * frsize;
        Ok(ChunkStat {
            chunk_size: self.chunk_size,
            chunk_total: bytes_total / self.chunk_size,
            chunk_free: bytes_free / self.chunk_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CS: u64 = 4096;

    fn storage() -> (TempDir, ChunkStorage) {
        let dir = TempDir::new().unwrap();
        let storage = ChunkStorage::new(dir.path().join("chunks"), CS).unwrap();
        (dir, storage)
    }

    #[test]
    fn test_write_then_read() {
        let (_dir, s) = storage();
        s.write_chunk("/data/file", 0, b"hello chunks", 0).unwrap();
        let out = s.read_chunk("/data/file", 0, 0, 12).unwrap();
        assert_eq!(out, b"hello chunks");
    }

    #[test]
    fn test_read_missing_chunk_is_empty() {
        let (_dir, s) = storage();
        assert!(s.read_chunk("/nope", 7, 0, 128).unwrap().is_empty());
    }

    #[test]
    fn test_short_read_at_eof() {
        let (_dir, s) = storage();
        s.write_chunk("/f", 0, b"abc", 0).unwrap();
        let out = s.read_chunk("/f", 0, 0, CS).unwrap();
        assert_eq!(out, b"abc");
        // Reading past the data start yields nothing.
        assert!(s.read_chunk("/f", 0, 100, 10).unwrap().is_empty());
    }

    #[test]
    fn test_write_at_offset_leaves_hole() {
        let (_dir, s) = storage();
        s.write_chunk("/f", 0, b"tail", 8).unwrap();
        let out = s.read_chunk("/f", 0, 0, 12).unwrap();
        assert_eq!(&out[..8], &[0u8; 8]);
        assert_eq!(&out[8..], b"tail");
    }

    #[test]
    fn test_write_beyond_chunk_size_rejected() {
        let (_dir, s) = storage();
        let err = s
            .write_chunk("/f", 0, &vec![0u8; CS as usize], 1)
            .unwrap_err();
        assert_eq!(err.code(), errno::EINVAL);
    }

    #[test]
    fn test_chunks_are_independent_files() {
        let (_dir, s) = storage();
        s.write_chunk("/f", 0, b"zero", 0).unwrap();
        s.write_chunk("/f", 3, b"three", 0).unwrap();
        assert_eq!(s.read_chunk("/f", 0, 0, 4).unwrap(), b"zero");
        assert_eq!(s.read_chunk("/f", 3, 0, 5).unwrap(), b"three");
        assert!(s.read_chunk("/f", 1, 0, CS).unwrap().is_empty());
    }

    #[test]
    fn test_truncate_chunk_file() {
        let (_dir, s) = storage();
        s.write_chunk("/f", 0, b"0123456789", 0).unwrap();
        s.truncate_chunk_file("/f", 0, 4).unwrap();
        assert_eq!(s.read_chunk("/f", 0, 0, CS).unwrap(), b"0123");
        // Truncating a missing chunk is fine.
        s.truncate_chunk_file("/f", 9, 0).unwrap();
    }

    #[test]
    fn test_trim_chunk_space() {
        let (_dir, s) = storage();
        for id in 0..4 {
            s.write_chunk("/f", id, b"x", 0).unwrap();
        }
        s.trim_chunk_space("/f", 2).unwrap();
        assert_eq!(s.read_chunk("/f", 0, 0, 1).unwrap(), b"x");
        assert_eq!(s.read_chunk("/f", 1, 0, 1).unwrap(), b"x");
        assert!(s.read_chunk("/f", 2, 0, 1).unwrap().is_empty());
        assert!(s.read_chunk("/f", 3, 0, 1).unwrap().is_empty());
    }

    #[test]
    fn test_destroy_chunk_space() {
        let (_dir, s) = storage();
        s.write_chunk("/a/b/c", 0, b"payload", 0).unwrap();
        s.destroy_chunk_space("/a/b/c").unwrap();
        assert!(s.read_chunk("/a/b/c", 0, 0, 7).unwrap().is_empty());
        // Idempotent.
        s.destroy_chunk_space("/a/b/c").unwrap();
    }

    #[test]
    fn test_nested_paths_flattened() {
        let (_dir, s) = storage();
        s.write_chunk("/deep/nested/file", 0, b"one", 0).unwrap();
        s.write_chunk("/deep", 0, b"two", 0).unwrap();
        assert_eq!(s.read_chunk("/deep/nested/file", 0, 0, 3).unwrap(), b"one");
        assert_eq!(s.read_chunk("/deep", 0, 0, 3).unwrap(), b"two");
    }

    #[test]
    fn test_chunk_stat_reports_capacity() {
        let (_dir, s) = storage();
        let stat = s.chunk_stat().unwrap();
        assert_eq!(stat.chunk_size, CS);
        assert!(stat.chunk_total > 0);
        assert!(stat.chunk_free <= stat.chunk_total);
    }
}
