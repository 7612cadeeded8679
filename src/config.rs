//! Engine configuration.
//!
//! Modeled on `nitrite-fjall-adapter::config::FjallConfig`: a cheaply
//! cloneable, thread-safe configuration holder using `Arc` + atomics so
//! tuning knobs can be read from any thread without taking a lock.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Region alignment mandated by the shard wire format (§6). Not tunable.
pub const SHARD_REGION_ALIGNMENT: usize = 64;

struct EngineConfigInner {
    dir: PathBuf,
    memtable_budget_bytes: AtomicUsize,
    blob_arena_budget_bytes: AtomicUsize,
    wal_fsync_every_block: AtomicBool,
    compaction_shard_count_threshold: AtomicUsize,
    read_only: AtomicBool,
    max_skiplist_height: AtomicUsize,
    next_lsn_hint: AtomicU64,
}

/// Cloneable engine configuration.
///
/// Cloning is cheap (`Arc` bump); all mutators affect every clone, matching
/// the teacher's PIMPL config pattern.
#[derive(Clone)]
pub struct EngineConfig {
    inner: Arc<EngineConfigInner>,
}

impl EngineConfig {
    /// Default budgets chosen for interactive/test workloads: a small
    /// MemTable so tests can exercise multi-shard flush paths without
    /// inserting millions of rows (see spec.md S2).
    pub fn new(dir: impl AsRef<Path>) -> Self {
        EngineConfig {
            inner: Arc::new(EngineConfigInner {
                dir: dir.as_ref().to_path_buf(),
                memtable_budget_bytes: AtomicUsize::new(4 * 1024 * 1024),
                blob_arena_budget_bytes: AtomicUsize::new(1024 * 1024),
                wal_fsync_every_block: AtomicBool::new(true),
                compaction_shard_count_threshold: AtomicUsize::new(4),
                read_only: AtomicBool::new(false),
                max_skiplist_height: AtomicUsize::new(16),
                next_lsn_hint: AtomicU64::new(0),
            }),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn memtable_budget_bytes(&self) -> usize {
        self.inner.memtable_budget_bytes.load(Ordering::Relaxed)
    }

    pub fn set_memtable_budget_bytes(&self, bytes: usize) -> &Self {
        self.inner.memtable_budget_bytes.store(bytes, Ordering::Relaxed);
        self
    }

    pub fn blob_arena_budget_bytes(&self) -> usize {
        self.inner.blob_arena_budget_bytes.load(Ordering::Relaxed)
    }

    pub fn set_blob_arena_budget_bytes(&self, bytes: usize) -> &Self {
        self.inner.blob_arena_budget_bytes.store(bytes, Ordering::Relaxed);
        self
    }

    pub fn wal_fsync_every_block(&self) -> bool {
        self.inner.wal_fsync_every_block.load(Ordering::Relaxed)
    }

    pub fn set_wal_fsync_every_block(&self, yes: bool) -> &Self {
        self.inner.wal_fsync_every_block.store(yes, Ordering::Relaxed);
        self
    }

    pub fn compaction_shard_count_threshold(&self) -> usize {
        self.inner
            .compaction_shard_count_threshold
            .load(Ordering::Relaxed)
    }

    pub fn set_compaction_shard_count_threshold(&self, n: usize) -> &Self {
        self.inner
            .compaction_shard_count_threshold
            .store(n, Ordering::Relaxed);
        self
    }

    pub fn read_only(&self) -> bool {
        self.inner.read_only.load(Ordering::Relaxed)
    }

    pub fn set_read_only(&self, yes: bool) -> &Self {
        self.inner.read_only.store(yes, Ordering::Relaxed);
        self
    }

    pub fn max_skiplist_height(&self) -> usize {
        self.inner.max_skiplist_height.load(Ordering::Relaxed)
    }

    pub fn shard_region_alignment(&self) -> usize {
        SHARD_REGION_ALIGNMENT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_mutations() {
        let cfg = EngineConfig::new("/tmp/gnitz-test");
        let clone = cfg.clone();
        cfg.set_memtable_budget_bytes(128);
        assert_eq!(clone.memtable_budget_bytes(), 128);
    }

    #[test]
    fn shard_alignment_is_fixed() {
        let cfg = EngineConfig::new("/tmp/gnitz-test");
        assert_eq!(cfg.shard_region_alignment(), 64);
    }
}
