//! Merge operands and the resolution engine.
//!
//! A merge operand is a one-byte tag, a `:` separator and a kind-specific
//! payload:
//!
//! - `c:<metadata>`          create; no-op if the key already exists
//! - `i:<size>,<merge_id>`   increase, append mode (reserves a range)
//! - `i:<size>,,<offset>`    increase, non-append, explicit offset
//! - `d:<new_size>`          decrease; sets size unconditionally
//!
//! Resolution folds a chronologically ordered operand sequence into the
//! stored record. It is deterministic given operand order, legal with a
//! single operand, and publishes append start offsets through the
//! [`OffsetReserveMap`] so the submitting caller can recover its reserved
//! range.

use scratchfs_types::errno;
use scratchfs_types::{Metadata, Result, Status, make_error_msg};

use crate::reserve::OffsetReserveMap;

const OPERAND_ID_SUFFIX: char = ':';
const PARAM_SEP: char = ',';

/// How an increase-size operand extends the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncreaseMode {
    /// Reserve `[prev_size, prev_size + size)`; the engine deposits
    /// `prev_size` under `merge_id`.
    Append { merge_id: u16 },
    /// Extend to `max(current, offset + size)`.
    Extend { offset: u64 },
}

/// A single mutation submitted against a metadata key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOperand {
    /// Initial write of a key. Idempotent for keys that already exist.
    Create { metadata: String },
    IncreaseSize { size: u64, mode: IncreaseMode },
    DecreaseSize { new_size: u64 },
}

impl MergeOperand {
    pub fn create(metadata: &Metadata) -> Self {
        MergeOperand::Create {
            metadata: metadata.serialize(),
        }
    }

    pub fn increase_append(size: u64, merge_id: u16) -> Self {
        MergeOperand::IncreaseSize {
            size,
            mode: IncreaseMode::Append { merge_id },
        }
    }

    pub fn increase_extend(size: u64, offset: u64) -> Self {
        MergeOperand::IncreaseSize {
            size,
            mode: IncreaseMode::Extend { offset },
        }
    }

    pub fn decrease(new_size: u64) -> Self {
        MergeOperand::DecreaseSize { new_size }
    }

    /// Serialize into the tagged textual form.
    pub fn serialize(&self) -> String {
        match self {
            MergeOperand::Create { metadata } => format!("c{}{}", OPERAND_ID_SUFFIX, metadata),
            MergeOperand::IncreaseSize { size, mode } => match mode {
                IncreaseMode::Append { merge_id } => {
                    format!("i{}{}{}{}", OPERAND_ID_SUFFIX, size, PARAM_SEP, merge_id)
                }
                IncreaseMode::Extend { offset } => format!(
                    "i{}{}{}{}{}",
                    OPERAND_ID_SUFFIX, size, PARAM_SEP, PARAM_SEP, offset
                ),
            },
            MergeOperand::DecreaseSize { new_size } => {
                format!("d{}{}", OPERAND_ID_SUFFIX, new_size)
            }
        }
    }

    /// Parse a serialized operand. A malformed operand is a corruption
    /// signal, not a recoverable condition.
    pub fn parse(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        if bytes.len() < 2 || bytes[1] != OPERAND_ID_SUFFIX as u8 {
            return make_error_msg(errno::EIO, format!("merge operand missing id suffix: {s:?}"));
        }
        let tag = bytes[0] as char;
        let params = &s[2..];

        match tag {
            'c' => Ok(MergeOperand::Create {
                metadata: params.to_string(),
            }),
            'i' => {
                let (size_str, rest) = params.split_once(PARAM_SEP).ok_or_else(|| {
                    Status::with_message(errno::EIO, format!("malformed increase operand: {s:?}"))
                })?;
                let size = size_str.parse::<u64>().map_err(|_| {
                    Status::with_message(errno::EIO, format!("bad size in operand: {s:?}"))
                })?;
                // A doubled separator marks the non-append form carrying an
                // explicit offset.
                if let Some(offset_str) = rest.strip_prefix(PARAM_SEP) {
                    let offset = offset_str.parse::<u64>().map_err(|_| {
                        Status::with_message(errno::EIO, format!("bad offset in operand: {s:?}"))
                    })?;
                    Ok(MergeOperand::increase_extend(size, offset))
                } else {
                    let merge_id = rest.parse::<u16>().map_err(|_| {
                        Status::with_message(errno::EIO, format!("bad merge id in operand: {s:?}"))
                    })?;
                    Ok(MergeOperand::increase_append(size, merge_id))
                }
            }
            'd' => {
                let new_size = params.parse::<u64>().map_err(|_| {
                    Status::with_message(errno::EIO, format!("bad size in operand: {s:?}"))
                })?;
                Ok(MergeOperand::DecreaseSize { new_size })
            }
            other => make_error_msg(
                errno::EIO,
                format!("unrecognized merge operand id: {other:?}"),
            ),
        }
    }
}

/// Fold `operands` (chronological order) into `existing`, returning the new
/// serialized record.
///
/// With no existing value the first operand must be a create; anything else
/// means the key history is corrupt. Append reservations are published to
/// `reserve` as a side effect.
pub fn resolve<'a, I>(
    existing: Option<&str>,
    operands: I,
    reserve: &OffsetReserveMap,
) -> Result<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut ops = operands.into_iter();

    let base = match existing {
        Some(value) => value.to_string(),
        None => {
            let first = ops.next().ok_or_else(|| {
                Status::with_message(errno::EIO, "merge with neither base value nor operands")
            })?;
            match MergeOperand::parse(first)? {
                MergeOperand::Create { metadata } => metadata,
                other => {
                    return make_error_msg(
                        errno::EIO,
                        format!("key does not exist and first operand is not a create: {other:?}"),
                    );
                }
            }
        }
    };

    let mut md = Metadata::parse(&base)
        .map_err(|e| Status::with_message(errno::EIO, format!("corrupt base record: {e}")))?;

    for op in ops {
        match MergeOperand::parse(op)? {
            // Idempotent for already-existing keys.
            MergeOperand::Create { .. } => continue,
            MergeOperand::IncreaseSize { size, mode } => {
                match mode {
                    IncreaseMode::Append { merge_id } => {
                        let curr_offset = md.size();
                        md.set_size(curr_offset + size);
                        // Save the offset where this append starts; the
                        // submitter retrieves it through the reserve map.
                        reserve.put(merge_id, curr_offset);
                    }
                    IncreaseMode::Extend { offset } => {
                        md.set_size(md.size().max(offset + size));
                    }
                }
                md.touch_mtime();
            }
            MergeOperand::DecreaseSize { new_size } => {
                md.set_size(new_size);
                md.touch_mtime();
            }
        }
    }

    Ok(md.serialize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scratchfs_types::metadata::S_IFREG;

    fn record(size: u64) -> Metadata {
        let mut md = Metadata::new(S_IFREG | 0o644);
        md.set_size(size);
        md
    }

    #[test]
    fn test_operand_roundtrip() {
        for op in [
            MergeOperand::create(&record(0)),
            MergeOperand::increase_append(4096, 17),
            MergeOperand::increase_extend(100, 2048),
            MergeOperand::decrease(512),
        ] {
            assert_eq!(MergeOperand::parse(&op.serialize()).unwrap(), op);
        }
    }

    #[test]
    fn test_operand_wire_form() {
        assert_eq!(
            MergeOperand::increase_append(4096, 3).serialize(),
            "i:4096,3"
        );
        assert_eq!(
            MergeOperand::increase_extend(100, 2048).serialize(),
            "i:100,,2048"
        );
        assert_eq!(MergeOperand::decrease(7).serialize(), "d:7");
        assert!(MergeOperand::create(&record(0)).serialize().starts_with("c:"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(MergeOperand::parse("").is_err());
        assert!(MergeOperand::parse("i4096").is_err());
        assert!(MergeOperand::parse("x:1").is_err());
        assert!(MergeOperand::parse("i:abc,1").is_err());
        assert!(MergeOperand::parse("d:nope").is_err());
    }

    #[test]
    fn test_resolve_single_create() {
        // Single-operand merges are legal.
        let reserve = OffsetReserveMap::new();
        let create = MergeOperand::create(&record(0)).serialize();
        let out = resolve(None, [create.as_str()], &reserve).unwrap();
        assert_eq!(Metadata::parse(&out).unwrap().size(), 0);
    }

    #[test]
    fn test_resolve_create_is_idempotent() {
        let reserve = OffsetReserveMap::new();
        let base = record(100).serialize();
        let late_create = MergeOperand::create(&record(0)).serialize();
        let out = resolve(Some(&base), [late_create.as_str()], &reserve).unwrap();
        assert_eq!(Metadata::parse(&out).unwrap().size(), 100);
    }

    #[test]
    fn test_resolve_missing_base_without_create_is_corruption() {
        let reserve = OffsetReserveMap::new();
        let inc = MergeOperand::increase_append(10, 1).serialize();
        let err = resolve(None, [inc.as_str()], &reserve).unwrap_err();
        assert_eq!(err.code(), errno::EIO);
    }

    #[test]
    fn test_resolve_append_chain_reserves_disjoint_ranges() {
        let reserve = OffsetReserveMap::new();
        let base = record(1000).serialize();
        let a = MergeOperand::increase_append(4096, 1).serialize();
        let b = MergeOperand::increase_append(8192, 2).serialize();

        let out = resolve(Some(&base), [a.as_str(), b.as_str()], &reserve).unwrap();
        assert_eq!(Metadata::parse(&out).unwrap().size(), 1000 + 4096 + 8192);
        assert_eq!(reserve.take(1), Some(1000));
        assert_eq!(reserve.take(2), Some(1000 + 4096));
        assert!(reserve.is_empty());
    }

    #[test]
    fn test_resolve_extend_takes_max() {
        let reserve = OffsetReserveMap::new();
        let base = record(10_000).serialize();

        // Write entirely below current size: size unchanged.
        let low = MergeOperand::increase_extend(100, 0).serialize();
        let out = resolve(Some(&base), [low.as_str()], &reserve).unwrap();
        assert_eq!(Metadata::parse(&out).unwrap().size(), 10_000);

        // Write past the end: size grows to offset + len.
        let high = MergeOperand::increase_extend(100, 20_000).serialize();
        let out = resolve(Some(&base), [high.as_str()], &reserve).unwrap();
        assert_eq!(Metadata::parse(&out).unwrap().size(), 20_100);
    }

    #[test]
    fn test_resolve_decrease_is_unconditional() {
        let reserve = OffsetReserveMap::new();
        let base = record(5000).serialize();
        let dec = MergeOperand::decrease(123).serialize();
        let out = resolve(Some(&base), [dec.as_str()], &reserve).unwrap();
        assert_eq!(Metadata::parse(&out).unwrap().size(), 123);
    }

    #[test]
    fn test_resolve_mixed_sequence_in_order() {
        // Arrival order decides: extend, append, decrease, append.
        let reserve = OffsetReserveMap::new();
        let create = MergeOperand::create(&record(0)).serialize();
        let ops = [
            create,
            MergeOperand::increase_extend(100, 0).serialize(),
            MergeOperand::increase_append(50, 9).serialize(),
            MergeOperand::decrease(10).serialize(),
            MergeOperand::increase_append(5, 10).serialize(),
        ];
        let out = resolve(None, ops.iter().map(String::as_str), &reserve).unwrap();
        assert_eq!(Metadata::parse(&out).unwrap().size(), 15);
        assert_eq!(reserve.take(9), Some(100));
        assert_eq!(reserve.take(10), Some(10));
    }

}
