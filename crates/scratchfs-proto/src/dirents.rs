//! The packed directory-listing buffer layouts.
//!
//! Plain listing: `[is_dir: u8] * N || [cstring name] * N`.
//! Extended listing: `[is_dir: u8] * N || [size: u64] * N ||
//! [ctime: i64] * N || [cstring name] * N`.
//!
//! Fixed-width fields are little-endian; names are NUL-terminated raw
//! bytes.

use byteorder::{ByteOrder, LittleEndian};

use scratchfs_types::errno;
use scratchfs_types::{Result, Status, make_error_msg};

/// A decoded plain entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dirent {
    pub name: String,
    pub is_dir: bool,
}

/// A decoded extended entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirentExt {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub ctime: i64,
}

/// Pack plain entries into the bulk layout.
pub fn encode_dirents<'a, I>(entries: I) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a str, bool)>,
{
    let mut flags = Vec::new();
    let mut names = Vec::new();
    for (name, is_dir) in entries {
        flags.push(u8::from(is_dir));
        names.extend_from_slice(name.as_bytes());
        names.push(0);
    }
    flags.extend_from_slice(&names);
    flags
}

/// Unpack `count` plain entries.
pub fn decode_dirents(data: &[u8], count: u64) -> Result<Vec<Dirent>> {
    let count = count as usize;
    if data.len() < count {
        return make_error_msg(errno::EIO, "dirents buffer shorter than its flag array");
    }
    let (flags, mut names) = data.split_at(count);
    let mut entries = Vec::with_capacity(count);
    for &flag in flags {
        let name = take_cstring(&mut names)?;
        entries.push(Dirent {
            name,
            is_dir: flag != 0,
        });
    }
    Ok(entries)
}

/// Pack extended entries into the bulk layout.
pub fn encode_dirents_extended<'a, I>(entries: I) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a str, bool, u64, i64)>,
{
    let mut flags = Vec::new();
    let mut sizes = Vec::new();
    let mut ctimes = Vec::new();
    let mut names = Vec::new();
    for (name, is_dir, size, ctime) in entries {
        flags.push(u8::from(is_dir));
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, size);
        sizes.extend_from_slice(&buf);
        LittleEndian::write_i64(&mut buf, ctime);
        ctimes.extend_from_slice(&buf);
        names.extend_from_slice(name.as_bytes());
        names.push(0);
    }
    flags.extend_from_slice(&sizes);
    flags.extend_from_slice(&ctimes);
    flags.extend_from_slice(&names);
    flags
}

/// Unpack `count` extended entries.
pub fn decode_dirents_extended(data: &[u8], count: u64) -> Result<Vec<DirentExt>> {
    let count = count as usize;
    let fixed = count + 8 * count + 8 * count;
    if data.len() < fixed {
        return make_error_msg(errno::EIO, "dirents buffer shorter than its fixed arrays");
    }
    let (flags, rest) = data.split_at(count);
    let (sizes, rest) = rest.split_at(8 * count);
    let (ctimes, mut names) = rest.split_at(8 * count);

    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let name = take_cstring(&mut names)?;
        entries.push(DirentExt {
            name,
            is_dir: flags[i] != 0,
            size: LittleEndian::read_u64(&sizes[8 * i..]),
            ctime: LittleEndian::read_i64(&ctimes[8 * i..]),
        });
    }
    Ok(entries)
}

fn take_cstring(buf: &mut &[u8]) -> Result<String> {
    let nul = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Status::with_message(errno::EIO, "unterminated name in dirents buffer"))?;
    let name = String::from_utf8(buf[..nul].to_vec())
        .map_err(|_| Status::with_message(errno::EIO, "non-utf8 name in dirents buffer"))?;
    *buf = &buf[nul + 1..];
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_roundtrip() {
        let encoded = encode_dirents([("a", false), ("subdir", true), ("z", false)]);
        let decoded = decode_dirents(&encoded, 3).unwrap();
        assert_eq!(
            decoded,
            vec![
                Dirent {
                    name: "a".into(),
                    is_dir: false
                },
                Dirent {
                    name: "subdir".into(),
                    is_dir: true
                },
                Dirent {
                    name: "z".into(),
                    is_dir: false
                },
            ]
        );
    }

    #[test]
    fn test_plain_layout_flags_lead() {
        let encoded = encode_dirents([("ab", true)]);
        // One flag byte, then "ab\0".
        assert_eq!(encoded, vec![1, b'a', b'b', 0]);
    }

    #[test]
    fn test_extended_roundtrip() {
        let encoded = encode_dirents_extended([
            ("f", false, 4096u64, 1_700_000_000i64),
            ("d", true, 0u64, 0i64),
        ]);
        let decoded = decode_dirents_extended(&encoded, 2).unwrap();
        assert_eq!(decoded[0].name, "f");
        assert_eq!(decoded[0].size, 4096);
        assert_eq!(decoded[0].ctime, 1_700_000_000);
        assert!(decoded[1].is_dir);
    }

    #[test]
    fn test_empty_listing() {
        let encoded = encode_dirents(std::iter::empty::<(&str, bool)>());
        assert!(encoded.is_empty());
        assert!(decode_dirents(&encoded, 0).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_buffer_rejected() {
        let encoded = encode_dirents([("abc", false)]);
        assert!(decode_dirents(&encoded[..2], 1).is_err());
        assert!(decode_dirents(&[], 1).is_err());
    }
}
