//! The per-path metadata record and its textual serialization.
//!
//! A record is a sequence of decimal/byte tokens separated by `|`. The first
//! two tokens (mode, size) are mandatory and fixed; the time, link-count and
//! blocks tokens are compile-time optional via cargo features; the trailing
//! symlink-target and rename-target tokens may be empty. The field order is
//! mode, size, atime, mtime, ctime, link_count, blocks, target_path,
//! rename_path and must not change: both sides of every RPC parse by
//! position.

use thiserror::Error;

/// Metadata token separator.
const MSP: char = '|';

/// File-type bits of `mode` (the `S_IFMT` mask and friends).
pub const S_IFMT: u32 = 0o170000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFLNK: u32 = 0o120000;

/// Blocks value marking a rename tombstone. Tombstoned entries are excluded
/// from directory listings and resolve through `rename_path`.
pub const TOMBSTONE_BLOCKS: i64 = -1;

/// File type encoded in the mode bits. Exactly one of these is set for
/// every valid record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
}

impl FileType {
    /// Extract the file type from mode bits.
    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode & S_IFMT {
            S_IFREG => Some(FileType::Regular),
            S_IFDIR => Some(FileType::Directory),
            S_IFLNK => Some(FileType::Symlink),
            _ => None,
        }
    }
}

/// Errors produced when parsing a serialized record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataParseError {
    #[error("missing mandatory field `{0}`")]
    MissingField(&'static str),
    #[error("invalid number in field `{0}`")]
    InvalidNumber(&'static str),
}

/// Inode-like state stored under each absolute path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Metadata {
    mode: u32,
    size: u64,
    #[cfg(feature = "times")]
    atime: i64,
    #[cfg(feature = "times")]
    mtime: i64,
    #[cfg(feature = "times")]
    ctime: i64,
    #[cfg(feature = "link-count")]
    link_count: u64,
    #[cfg(feature = "blocks")]
    blocks: i64,
    target_path: String,
    rename_path: String,
}

impl Metadata {
    /// Create a fresh record for a regular file or directory.
    pub fn new(mode: u32) -> Self {
        debug_assert!(FileType::from_mode(mode).is_some());
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Create a fresh symlink record pointing at `target_path`.
    pub fn with_target_path(mode: u32, target_path: impl Into<String>) -> Self {
        let target_path = target_path.into();
        debug_assert!(target_path.is_empty() || mode & S_IFMT == S_IFLNK);
        Self {
            mode,
            target_path,
            ..Default::default()
        }
    }

    /// Parse a serialized record. Inverse of [`Metadata::serialize`].
    pub fn parse(s: &str) -> std::result::Result<Self, MetadataParseError> {
        let mut tokens = s.split(MSP);
        let mut next = |name: &'static str| {
            tokens
                .next()
                .ok_or(MetadataParseError::MissingField(name))
        };

        let mode = next("mode")?
            .parse::<u32>()
            .map_err(|_| MetadataParseError::InvalidNumber("mode"))?;
        let size = next("size")?
            .parse::<u64>()
            .map_err(|_| MetadataParseError::InvalidNumber("size"))?;

        let mut md = Metadata {
            mode,
            size,
            ..Default::default()
        };

        // The order is important. Don't change.
        #[cfg(feature = "times")]
        {
            md.atime = next("atime")?
                .parse::<i64>()
                .map_err(|_| MetadataParseError::InvalidNumber("atime"))?;
            md.mtime = next("mtime")?
                .parse::<i64>()
                .map_err(|_| MetadataParseError::InvalidNumber("mtime"))?;
            md.ctime = next("ctime")?
                .parse::<i64>()
                .map_err(|_| MetadataParseError::InvalidNumber("ctime"))?;
        }
        #[cfg(feature = "link-count")]
        {
            md.link_count = next("link_count")?
                .parse::<u64>()
                .map_err(|_| MetadataParseError::InvalidNumber("link_count"))?;
        }
        #[cfg(feature = "blocks")]
        {
            md.blocks = next("blocks")?
                .parse::<i64>()
                .map_err(|_| MetadataParseError::InvalidNumber("blocks"))?;
        }

        // Trailing tokens may be empty; their absence is implied by
        // end-of-string.
        md.target_path = tokens.next().unwrap_or_default().to_string();
        md.rename_path = tokens.next().unwrap_or_default().to_string();

        Ok(md)
    }

    /// Serialize into the `|`-separated token form.
    pub fn serialize(&self) -> String {
        let mut s = String::with_capacity(64);
        // The order is important. Don't change.
        s.push_str(&self.mode.to_string());
        s.push(MSP);
        s.push_str(&self.size.to_string());
        #[cfg(feature = "times")]
        {
            s.push(MSP);
            s.push_str(&self.atime.to_string());
            s.push(MSP);
            s.push_str(&self.mtime.to_string());
            s.push(MSP);
            s.push_str(&self.ctime.to_string());
        }
        #[cfg(feature = "link-count")]
        {
            s.push(MSP);
            s.push_str(&self.link_count.to_string());
        }
        #[cfg(feature = "blocks")]
        {
            s.push(MSP);
            s.push_str(&self.blocks.to_string());
        }
        s.push(MSP);
        s.push_str(&self.target_path);
        s.push(MSP);
        s.push_str(&self.rename_path);
        s
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn set_mode(&mut self, mode: u32) {
        self.mode = mode;
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    pub fn file_type(&self) -> Option<FileType> {
        FileType::from_mode(self.mode)
    }

    pub fn is_regular(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    pub fn is_directory(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    pub fn target_path(&self) -> &str {
        &self.target_path
    }

    pub fn set_target_path(&mut self, target_path: impl Into<String>) {
        self.target_path = target_path.into();
    }

    pub fn rename_path(&self) -> &str {
        &self.rename_path
    }

    pub fn set_rename_path(&mut self, rename_path: impl Into<String>) {
        self.rename_path = rename_path.into();
    }

    /// Whether this record is a rename tombstone.
    pub fn is_tombstone(&self) -> bool {
        #[cfg(feature = "blocks")]
        {
            self.blocks == TOMBSTONE_BLOCKS
        }
        #[cfg(not(feature = "blocks"))]
        {
            false
        }
    }

    // The time, link-count and blocks accessors exist for every feature
    // subset; with the field disabled they read zero and ignore writes, so
    // dependent crates compile under any feature combination.

    pub fn blocks(&self) -> i64 {
        #[cfg(feature = "blocks")]
        {
            self.blocks
        }
        #[cfg(not(feature = "blocks"))]
        {
            0
        }
    }

    #[allow(unused_variables)]
    pub fn set_blocks(&mut self, blocks: i64) {
        #[cfg(feature = "blocks")]
        {
            self.blocks = blocks;
        }
    }

    pub fn link_count(&self) -> u64 {
        #[cfg(feature = "link-count")]
        {
            self.link_count
        }
        #[cfg(not(feature = "link-count"))]
        {
            0
        }
    }

    #[allow(unused_variables)]
    pub fn set_link_count(&mut self, link_count: u64) {
        #[cfg(feature = "link-count")]
        {
            self.link_count = link_count;
        }
    }

    pub fn atime(&self) -> i64 {
        #[cfg(feature = "times")]
        {
            self.atime
        }
        #[cfg(not(feature = "times"))]
        {
            0
        }
    }

    #[allow(unused_variables)]
    pub fn set_atime(&mut self, atime: i64) {
        #[cfg(feature = "times")]
        {
            self.atime = atime;
        }
    }

    pub fn mtime(&self) -> i64 {
        #[cfg(feature = "times")]
        {
            self.mtime
        }
        #[cfg(not(feature = "times"))]
        {
            0
        }
    }

    #[allow(unused_variables)]
    pub fn set_mtime(&mut self, mtime: i64) {
        #[cfg(feature = "times")]
        {
            self.mtime = mtime;
        }
    }

    pub fn ctime(&self) -> i64 {
        #[cfg(feature = "times")]
        {
            self.ctime
        }
        #[cfg(not(feature = "times"))]
        {
            0
        }
    }

    #[allow(unused_variables)]
    pub fn set_ctime(&mut self, ctime: i64) {
        #[cfg(feature = "times")]
        {
            self.ctime = ctime;
        }
    }

    /// Set atime, mtime and ctime to the current wall-clock second.
    pub fn init_acm_time(&mut self) {
        #[cfg(feature = "times")]
        {
            let now = unix_now();
            self.atime = now;
            self.mtime = now;
            self.ctime = now;
        }
    }

    /// Selectively refresh access/change/modification times.
    #[allow(unused_variables)]
    pub fn update_acm_time(&mut self, a: bool, c: bool, m: bool) {
        #[cfg(feature = "times")]
        {
            let now = unix_now();
            if a {
                self.atime = now;
            }
            if c {
                self.ctime = now;
            }
            if m {
                self.mtime = now;
            }
        }
    }

    /// Refresh mtime. Size-changing merge operands call this on every fold.
    pub fn touch_mtime(&mut self) {
        self.update_acm_time(false, false, true);
    }
}

/// Current wall clock in unix seconds.
#[cfg(feature = "times")]
pub fn unix_now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_regular() {
        let mut md = Metadata::new(S_IFREG | 0o644);
        md.set_size(1234);
        #[cfg(feature = "times")]
        md.init_acm_time();
        #[cfg(feature = "link-count")]
        md.set_link_count(1);

        let parsed = Metadata::parse(&md.serialize()).unwrap();
        assert_eq!(parsed, md);
    }

    #[test]
    fn test_roundtrip_directory() {
        let md = Metadata::new(S_IFDIR | 0o755);
        let parsed = Metadata::parse(&md.serialize()).unwrap();
        assert_eq!(parsed, md);
        assert!(parsed.is_directory());
        assert_eq!(parsed.size(), 0);
    }

    #[test]
    fn test_roundtrip_symlink() {
        let md = Metadata::with_target_path(S_IFLNK | 0o777, "/target/elsewhere");
        let parsed = Metadata::parse(&md.serialize()).unwrap();
        assert_eq!(parsed, md);
        assert!(parsed.is_symlink());
        assert_eq!(parsed.target_path(), "/target/elsewhere");
    }

    #[test]
    fn test_roundtrip_tombstone() {
        #[cfg(feature = "blocks")]
        {
            let mut md = Metadata::new(S_IFREG | 0o600);
            md.set_blocks(TOMBSTONE_BLOCKS);
            md.set_rename_path("/renamed/to");
            let parsed = Metadata::parse(&md.serialize()).unwrap();
            assert_eq!(parsed, md);
            assert!(parsed.is_tombstone());
            assert_eq!(parsed.rename_path(), "/renamed/to");
        }
    }

    #[test]
    fn test_mandatory_fields_lead() {
        let md = Metadata::new(S_IFREG | 0o644);
        let s = md.serialize();
        let tokens: Vec<&str> = s.split('|').collect();
        assert_eq!(tokens[0], (S_IFREG | 0o644).to_string());
        assert_eq!(tokens[1], "0");
    }

    #[test]
    fn test_trailing_fields_absent() {
        // A record without the trailing target/rename tokens still parses;
        // their absence is implied by end-of-string.
        let md = Metadata::new(S_IFREG | 0o644);
        let s = md.serialize();
        let trimmed = s.trim_end_matches('|');
        let parsed = Metadata::parse(trimmed).unwrap();
        assert_eq!(parsed, md);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            Metadata::parse(""),
            Err(MetadataParseError::InvalidNumber("mode"))
        ));
        assert!(matches!(
            Metadata::parse("notanumber|0"),
            Err(MetadataParseError::InvalidNumber("mode"))
        ));
        assert!(matches!(
            Metadata::parse("33188"),
            Err(MetadataParseError::MissingField("size"))
        ));
    }

    #[test]
    fn test_file_type_exclusive() {
        assert_eq!(FileType::from_mode(S_IFREG | 0o644), Some(FileType::Regular));
        assert_eq!(FileType::from_mode(S_IFDIR | 0o755), Some(FileType::Directory));
        assert_eq!(FileType::from_mode(S_IFLNK | 0o777), Some(FileType::Symlink));
        assert_eq!(FileType::from_mode(0o644), None);
    }

    #[cfg(feature = "times")]
    #[test]
    fn test_update_acm_time() {
        let mut md = Metadata::new(S_IFREG | 0o644);
        md.update_acm_time(false, false, true);
        assert!(md.mtime() > 0);
        assert_eq!(md.atime(), 0);
        assert_eq!(md.ctime(), 0);
    }
}
