//! Advisory-locked shard refcounting and deferred deletion (spec.md §4.9).
//!
//! Grounded on the teacher's `common::lock`/`store::event` lifecycle-
//! listener patterns, combined with `dashmap` — already a teacher
//! dependency — as the concurrent path-keyed counter map.

use crate::error::GnitzResult;
use dashmap::DashMap;
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

struct OpenShard {
    file: File,
    count: usize,
}

/// Tracks every shard file this process currently holds open (with a
/// shared advisory lock), and a queue of filenames some caller has asked to
/// delete once no reader still references them.
pub struct RefCounter {
    dir: PathBuf,
    open: DashMap<String, OpenShard>,
    pending: Mutex<Vec<String>>,
}

impl RefCounter {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        RefCounter {
            dir: dir.as_ref().to_path_buf(),
            open: DashMap::new(),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Opens `filename` O_RDONLY and takes a shared advisory lock the first
    /// time it's referenced; every subsequent `acquire` just bumps the
    /// counter. Fails if the file has already been unlinked out from under
    /// us (`st_nlink == 0` — a racing `try_cleanup` elsewhere).
    pub fn acquire(&self, filename: &str) -> GnitzResult<()> {
        if let Some(mut existing) = self.open.get_mut(filename) {
            existing.count += 1;
            return Ok(());
        }

        let path = self.dir.join(filename);
        let file = OpenOptions::new().read(true).open(&path)?;
        file.lock_shared()?;
        if !has_live_links(&file)? {
            return Err(crate::error::GnitzError::storage(format!(
                "shard '{filename}' was unlinked before it could be acquired"
            )));
        }

        self.open.insert(filename.to_string(), OpenShard { file, count: 1 });
        Ok(())
    }

    /// Decrements `filename`'s refcount; at zero the file descriptor (and
    /// its shared lock) is closed.
    pub fn release(&self, filename: &str) {
        let mut drop_it = false;
        if let Some(mut entry) = self.open.get_mut(filename) {
            entry.count = entry.count.saturating_sub(1);
            drop_it = entry.count == 0;
        }
        if drop_it {
            self.open.remove(filename);
        }
    }

    pub fn is_open(&self, filename: &str) -> bool {
        self.open.contains_key(filename)
    }

    /// Enqueues `filename` for deletion once it is no longer referenced.
    pub fn mark_for_deletion(&self, filename: &str) {
        let mut pending = self.pending.lock();
        if !pending.iter().any(|p| p == filename) {
            pending.push(filename.to_string());
        }
    }

    /// Attempts to delete every pending filename once: files still open
    /// (shared-locked by some reader) or still exclusively lockable-but-
    /// referenced stay queued; a missing file is treated as already
    /// cleaned and dropped from the queue without error.
    pub fn try_cleanup(&self) -> GnitzResult<()> {
        let mut pending = self.pending.lock();
        let mut still_pending = Vec::with_capacity(pending.len());

        for filename in pending.drain(..) {
            let path = self.dir.join(&filename);
            if !path.exists() {
                continue;
            }
            if self.is_open(&filename) {
                still_pending.push(filename);
                continue;
            }

            let file = OpenOptions::new().read(true).open(&path)?;
            match file.try_lock_exclusive() {
                Ok(()) => {
                    std::fs::remove_file(&path)?;
                }
                Err(_) => still_pending.push(filename),
            }
        }

        *pending = still_pending;
        Ok(())
    }
}

#[cfg(unix)]
fn has_live_links(file: &File) -> GnitzResult<bool> {
    use std::os::unix::fs::MetadataExt;
    Ok(file.metadata()?.nlink() > 0)
}

#[cfg(not(unix))]
fn has_live_links(_file: &File) -> GnitzResult<bool> {
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn acquire_then_release_closes_the_handle() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("shard-0.gz"), b"data").unwrap();
        let rc = RefCounter::new(dir.path());
        rc.acquire("shard-0.gz").unwrap();
        assert!(rc.is_open("shard-0.gz"));
        rc.release("shard-0.gz");
        assert!(!rc.is_open("shard-0.gz"));
    }

    #[test]
    fn referenced_shard_is_not_cleaned_up() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("shard-0.gz"), b"data").unwrap();
        let rc = RefCounter::new(dir.path());
        rc.acquire("shard-0.gz").unwrap();
        rc.mark_for_deletion("shard-0.gz");
        rc.try_cleanup().unwrap();
        assert!(dir.path().join("shard-0.gz").exists());
    }

    #[test]
    fn unreferenced_shard_is_deleted_on_cleanup() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("shard-0.gz"), b"data").unwrap();
        let rc = RefCounter::new(dir.path());
        rc.acquire("shard-0.gz").unwrap();
        rc.release("shard-0.gz");
        rc.mark_for_deletion("shard-0.gz");
        rc.try_cleanup().unwrap();
        assert!(!dir.path().join("shard-0.gz").exists());
    }

    #[test]
    fn missing_file_is_treated_as_already_cleaned() {
        let dir = tempdir().unwrap();
        let rc = RefCounter::new(dir.path());
        rc.mark_for_deletion("never-existed.gz");
        rc.try_cleanup().unwrap();
    }
}
