//! The spine: the engine's in-memory registry of open shard handles, one
//! list per table (spec.md §4.10: "Holds: ... `Spine` ... `Registry`
//! (shards-per-table)").
//!
//! Grounded on the teacher's `store::store_catalog`, which plays the same
//! role for open maps: a published, queryable index of the backing
//! structures currently live in the process.

use crate::error::GnitzResult;
use crate::refcount::RefCounter;
use crate::shard::ShardView;
use dashmap::DashMap;
use std::sync::Arc;

/// One shard currently held open by the engine: its filename (the spine's
/// key into the refcounter) and its mmapped, read-only view.
#[derive(Clone)]
pub struct ShardHandle {
    filename: String,
    view: Arc<ShardView>,
}

impl ShardHandle {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn view(&self) -> &ShardView {
        &self.view
    }

    pub fn min_key(&self) -> u128 {
        self.view.min_key()
    }

    pub fn max_key(&self) -> u128 {
        self.view.max_key()
    }

    pub fn min_lsn(&self) -> u64 {
        self.view.min_lsn()
    }

    pub fn max_lsn(&self) -> u64 {
        self.view.max_lsn()
    }

    /// Whether `pk` falls within this shard's `[min_key, max_key]` range —
    /// a necessary but not sufficient condition for the shard to actually
    /// contain `pk` (duplicates within range still need a scan).
    pub fn brackets(&self, pk: u128) -> bool {
        pk >= self.min_key() && pk <= self.max_key()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SpineStats {
    pub shard_count: usize,
    pub row_count: u64,
}

/// Per-table list of open shard handles, shared by every reader through
/// `&Spine`. Mutation (add/remove) is expected to be rare relative to reads
/// and is serialized per spec.md §5's single-writer-per-table model; the
/// `DashMap` gives each table's list its own lock so unrelated tables never
/// contend.
pub struct Spine {
    refcount: Arc<RefCounter>,
    tables: DashMap<u64, Vec<ShardHandle>>,
}

impl Spine {
    pub fn new(refcount: Arc<RefCounter>) -> Self {
        Spine { refcount, tables: DashMap::new() }
    }

    /// Registers a freshly opened shard for `table_id`, acquiring its
    /// refcount entry first so the file can never be cleaned out from
    /// under this handle.
    pub fn add_shard(&self, table_id: u64, filename: impl Into<String>, view: ShardView) -> GnitzResult<()> {
        let filename = filename.into();
        self.refcount.acquire(&filename)?;
        self.tables
            .entry(table_id)
            .or_default()
            .push(ShardHandle { filename, view: Arc::new(view) });
        Ok(())
    }

    /// Removes `filename` from `table_id`'s list, releases its refcount,
    /// and enqueues it for deletion — the caller (Engine/Compactor) still
    /// decides when to run `try_cleanup`.
    pub fn remove_shard(&self, table_id: u64, filename: &str) {
        if let Some(mut handles) = self.tables.get_mut(&table_id) {
            handles.retain(|h| h.filename() != filename);
        }
        self.refcount.release(filename);
        self.refcount.mark_for_deletion(filename);
    }

    /// Atomically swaps a compaction's inputs for its output: removes every
    /// filename in `remove` from `table_id`'s list (releasing + marking
    /// each for deletion) and adds `new_handle`, all under one lock on the
    /// table's entry so no reader observes a half-swapped list.
    pub fn swap_shards(&self, table_id: u64, remove: &[String], new_filename: impl Into<String>, new_view: ShardView) -> GnitzResult<()> {
        let new_filename = new_filename.into();
        self.refcount.acquire(&new_filename)?;
        let mut handles = self.tables.entry(table_id).or_default();
        handles.retain(|h| !remove.iter().any(|r| r == h.filename()));
        handles.push(ShardHandle { filename: new_filename, view: Arc::new(new_view) });
        drop(handles);
        for filename in remove {
            self.refcount.release(filename);
            self.refcount.mark_for_deletion(filename);
        }
        Ok(())
    }

    pub fn handles_for(&self, table_id: u64) -> Vec<ShardHandle> {
        self.tables.get(&table_id).map(|h| h.value().clone()).unwrap_or_default()
    }

    /// Every handle for `table_id` whose `[min_key, max_key]` brackets
    /// `pk` — the candidate set the Engine's read path must dry-run check.
    pub fn handles_bracketing(&self, table_id: u64, pk: u128) -> Vec<ShardHandle> {
        self.handles_for(table_id)
            .into_iter()
            .filter(|h| h.brackets(pk))
            .collect()
    }

    pub fn stats(&self, table_id: u64) -> SpineStats {
        let handles = self.handles_for(table_id);
        SpineStats {
            shard_count: handles.len(),
            row_count: handles.iter().map(|h| h.view().row_count()).sum(),
        }
    }

    pub fn shard_count(&self, table_id: u64) -> usize {
        self.tables.get(&table_id).map(|h| h.len()).unwrap_or(0)
    }

    /// Attempts to unlink every shard file queued for deletion by a prior
    /// `remove_shard`/`swap_shards` call that is no longer referenced.
    pub fn try_cleanup(&self) -> GnitzResult<()> {
        self.refcount.try_cleanup()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row_accessor::OwnedRowAccessor;
    use crate::schema::{ColumnType, Schema, SchemaBuilder};
    use crate::shard::ShardWriter;
    use crate::value::Value;
    use tempfile::tempdir;

    fn schema() -> Schema {
        SchemaBuilder::new().pk("id", ColumnType::U64).column("v", ColumnType::I64, false).build().unwrap()
    }

    fn write_shard(dir: &std::path::Path, name: &str, rows: &[(u128, i64, i64)]) -> Schema {
        let schema = schema();
        let mut w = ShardWriter::new(schema.clone());
        for &(pk, weight, v) in rows {
            let row = OwnedRowAccessor::new(schema.clone(), vec![Value::I64(v)]);
            w.append(pk, weight, &row).unwrap();
        }
        w.finalize(dir.join(name)).unwrap();
        schema
    }

    #[test]
    fn add_then_bracket_lookup_finds_containing_shard() {
        let dir = tempdir().unwrap();
        let schema = write_shard(dir.path(), "shard-0.gz", &[(1, 1, 10), (5, 1, 20)]);
        let refcount = Arc::new(RefCounter::new(dir.path()));
        let spine = Spine::new(refcount);
        let view = ShardView::open(dir.path().join("shard-0.gz"), schema).unwrap();
        spine.add_shard(1, "shard-0.gz", view).unwrap();

        assert_eq!(spine.handles_bracketing(1, 3).len(), 1);
        assert_eq!(spine.handles_bracketing(1, 10).len(), 0);
        assert_eq!(spine.stats(1).shard_count, 1);
        assert_eq!(spine.stats(1).row_count, 2);
    }

    #[test]
    fn swap_shards_replaces_inputs_with_output_atomically() {
        let dir = tempdir().unwrap();
        let schema = write_shard(dir.path(), "shard-0.gz", &[(1, 1, 10)]);
        write_shard(dir.path(), "shard-1.gz", &[(2, 1, 20)]);
        let refcount = Arc::new(RefCounter::new(dir.path()));
        let spine = Spine::new(refcount);
        let v0 = ShardView::open(dir.path().join("shard-0.gz"), schema.clone()).unwrap();
        let v1 = ShardView::open(dir.path().join("shard-1.gz"), schema.clone()).unwrap();
        spine.add_shard(1, "shard-0.gz", v0).unwrap();
        spine.add_shard(1, "shard-1.gz", v1).unwrap();

        write_shard(dir.path(), "shard-merged.gz", &[(1, 1, 10), (2, 1, 20)]);
        let merged = ShardView::open(dir.path().join("shard-merged.gz"), schema).unwrap();
        spine
            .swap_shards(1, &["shard-0.gz".to_string(), "shard-1.gz".to_string()], "shard-merged.gz", merged)
            .unwrap();

        let handles = spine.handles_for(1);
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].filename(), "shard-merged.gz");
    }
}
