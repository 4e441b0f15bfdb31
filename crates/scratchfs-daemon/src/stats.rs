//! Operation statistics.
//!
//! Cheap atomic counters, bumped by the RPC handlers and reported
//! periodically through the log. Only totals and since-start rates are
//! kept; nothing here touches the data path beyond one relaxed add.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counted operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IopsOp {
    Create,
    Stat,
    Remove,
    Write,
    Read,
    Dirent,
}

const IOPS_OPS: [IopsOp; 6] = [
    IopsOp::Create,
    IopsOp::Stat,
    IopsOp::Remove,
    IopsOp::Write,
    IopsOp::Read,
    IopsOp::Dirent,
];

impl IopsOp {
    fn name(&self) -> &'static str {
        match self {
            IopsOp::Create => "create",
            IopsOp::Stat => "stat",
            IopsOp::Remove => "remove",
            IopsOp::Write => "write",
            IopsOp::Read => "read",
            IopsOp::Dirent => "dirent",
        }
    }
}

/// Byte-moving operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeOp {
    ReadSize,
    WriteSize,
}

/// Per-daemon operation counters.
pub struct OpStats {
    started: Instant,
    iops: [AtomicU64; 6],
    read_bytes: AtomicU64,
    write_bytes: AtomicU64,
}

impl OpStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            iops: Default::default(),
            read_bytes: AtomicU64::new(0),
            write_bytes: AtomicU64::new(0),
        }
    }

    pub fn add_iops(&self, op: IopsOp) {
        self.iops[op as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Record moved bytes. Read and write sizes also count as one IOP of
    /// the matching kind.
    pub fn add_size(&self, op: SizeOp, bytes: u64) {
        match op {
            SizeOp::ReadSize => {
                self.read_bytes.fetch_add(bytes, Ordering::Relaxed);
                self.add_iops(IopsOp::Read);
            }
            SizeOp::WriteSize => {
                self.write_bytes.fetch_add(bytes, Ordering::Relaxed);
                self.add_iops(IopsOp::Write);
            }
        }
    }

    pub fn count(&self, op: IopsOp) -> u64 {
        self.iops[op as usize].load(Ordering::Relaxed)
    }

    pub fn bytes(&self, op: SizeOp) -> u64 {
        match op {
            SizeOp::ReadSize => self.read_bytes.load(Ordering::Relaxed),
            SizeOp::WriteSize => self.write_bytes.load(Ordering::Relaxed),
        }
    }

    /// Operations per second since startup.
    pub fn mean_rate(&self, op: IopsOp) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.count(op) as f64 / elapsed
    }
}

impl Default for OpStats {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OpStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for op in IOPS_OPS {
            write!(f, "{}={} ", op.name(), self.count(op))?;
        }
        write!(
            f,
            "read_bytes={} write_bytes={}",
            self.bytes(SizeOp::ReadSize),
            self.bytes(SizeOp::WriteSize)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = OpStats::new();
        stats.add_iops(IopsOp::Create);
        stats.add_iops(IopsOp::Create);
        stats.add_iops(IopsOp::Stat);
        assert_eq!(stats.count(IopsOp::Create), 2);
        assert_eq!(stats.count(IopsOp::Stat), 1);
        assert_eq!(stats.count(IopsOp::Remove), 0);
    }

    #[test]
    fn test_size_counts_as_iop() {
        let stats = OpStats::new();
        stats.add_size(SizeOp::WriteSize, 4096);
        stats.add_size(SizeOp::WriteSize, 4096);
        stats.add_size(SizeOp::ReadSize, 100);
        assert_eq!(stats.bytes(SizeOp::WriteSize), 8192);
        assert_eq!(stats.bytes(SizeOp::ReadSize), 100);
        assert_eq!(stats.count(IopsOp::Write), 2);
        assert_eq!(stats.count(IopsOp::Read), 1);
    }

    #[test]
    fn test_display_lists_every_op() {
        let stats = OpStats::new();
        stats.add_iops(IopsOp::Dirent);
        let line = stats.to_string();
        assert!(line.contains("dirent=1"));
        assert!(line.contains("write_bytes=0"));
    }

    #[test]
    fn test_mean_rate_nonnegative() {
        let stats = OpStats::new();
        stats.add_iops(IopsOp::Read);
        assert!(stats.mean_rate(IopsOp::Read) >= 0.0);
    }

    #[test]
    fn test_concurrent_bumps() {
        use std::sync::Arc;
        let stats = Arc::new(OpStats::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        s.add_iops(IopsOp::Write);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.count(IopsOp::Write), 4000);
    }
}
