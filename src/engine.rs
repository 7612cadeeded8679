//! The engine: orchestrates the WAL, MemTable, Spine and Manifest into the
//! open/write/read/flush/checkpoint/compaction lifecycle (spec.md §4.10).
//!
//! Grounded on the teacher's `nitrite.rs`'s PIMPL orchestration role
//! (`Nitrite` wrapping `Arc<NitriteInner>`, lifecycle `open`/`close`
//! methods delegating into the inner struct) — generalized from a
//! document-store facade to the WAL/MemTable/Spine/Manifest orchestration
//! spec.md describes.
//!
//! One `Engine` instance owns exactly one table and the single shared WAL
//! and manifest in its directory: `table_id` threads through every on-disk
//! format (WAL blocks, manifest entries) for wire fidelity and so a future
//! multi-table engine could demultiplex the same files, but this engine's
//! public surface only ever drives one table at a time, matching spec.md
//! §5's single-writer-per-table concurrency model.

use crate::compactor;
use crate::config::EngineConfig;
use crate::cursor::RowCursor;
use crate::error::{ErrorKind, GnitzError, GnitzResult};
use crate::event::{EngineEvent, EventBus, SharedEventBus};
use crate::manifest::{ManifestEntry, ManifestManager};
use crate::memtable::MemTable;
use crate::refcount::RefCounter;
use crate::row_accessor::{compare_rows, OwnedRowAccessor, RowAccessor};
use crate::schema::Schema;
use crate::shard::{ShardView, ShardWriter};
use crate::spine::Spine;
use crate::wal::{WalReader, WalWriter};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

const WAL_FILE_NAME: &str = "gnitzdb.wal";

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineStats {
    pub current_lsn: u64,
    pub memtable_rows: usize,
    pub shard_count: usize,
    pub shard_rows: u64,
}

/// Embeddable handle to a single table's storage engine. Cheap to clone —
/// every clone shares the same `Arc<EngineInner>`, the teacher's `Nitrite`
/// pattern.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    table_id: u64,
    schema: Schema,
    config: EngineConfig,
    manifest: ManifestManager,
    spine: Spine,
    wal: Mutex<Option<WalWriter>>,
    memtable: Mutex<MemTable>,
    lsn: AtomicU64,
    last_upserted_lsn: AtomicU64,
    generation_start_lsn: AtomicU64,
    global_max_lsn: AtomicU64,
    shard_seq: AtomicU64,
    events: SharedEventBus,
}

impl Engine {
    /// Opens (or creates) the engine for `table_id` in `config.dir()`:
    /// loads the current manifest's shards for this table into the Spine,
    /// replays WAL blocks newer than the manifest's watermark into a fresh
    /// MemTable, and opens a fresh WAL writer unless `config.read_only()`.
    pub fn open(config: EngineConfig, table_id: u64, schema: Schema) -> GnitzResult<Self> {
        if table_id > u32::MAX as u64 {
            return Err(GnitzError::layout(format!("table_id {table_id} does not fit in the WAL's u32 field")));
        }

        let manifest = ManifestManager::new(config.dir());
        let refcount = Arc::new(RefCounter::new(config.dir()));
        let spine = Spine::new(refcount);

        let mut global_max_lsn = 0u64;
        if manifest.exists() {
            let reader = manifest.load_current()?;
            let snapshot = reader.snapshot();
            global_max_lsn = snapshot.global_max_lsn;
            for entry in snapshot.entries_for_table(table_id) {
                let path = config.dir().join(&entry.shard_filename);
                let view = ShardView::open(&path, schema.clone())?;
                spine.add_shard(table_id, entry.shard_filename.clone(), view)?;
            }
        }

        let mut memtable = MemTable::new(schema.clone(), config.memtable_budget_bytes(), config.blob_arena_budget_bytes());
        let wal_path = config.dir().join(WAL_FILE_NAME);

        let mut replayed = 0u64;
        let mut max_seen_lsn = global_max_lsn;
        if wal_path.exists() {
            let mut reader = WalReader::open(&wal_path, schema.clone())?;
            while let Some(block) = reader.next_block()? {
                if block.table_id as u64 != table_id || block.lsn <= global_max_lsn {
                    continue;
                }
                for record in block.records {
                    let acc: &dyn RowAccessor = &record.row;
                    memtable.upsert(record.pk, record.weight, acc)?;
                    replayed += 1;
                }
                max_seen_lsn = max_seen_lsn.max(block.lsn);
            }
        }

        let wal = if config.read_only() {
            None
        } else {
            Some(WalWriter::open(&wal_path, schema.clone(), config.wal_fsync_every_block())?)
        };

        let shard_seq = spine.shard_count(table_id) as u64;
        let events: SharedEventBus = Arc::new(EventBus::new());
        events.publish(EngineEvent::Recovered { table_id, replayed });

        Ok(Engine {
            inner: Arc::new(EngineInner {
                table_id,
                schema,
                config,
                manifest,
                spine,
                wal: Mutex::new(wal),
                memtable: Mutex::new(memtable),
                lsn: AtomicU64::new(max_seen_lsn + 1),
                last_upserted_lsn: AtomicU64::new(max_seen_lsn),
                generation_start_lsn: AtomicU64::new(max_seen_lsn + 1),
                global_max_lsn: AtomicU64::new(global_max_lsn),
                shard_seq: AtomicU64::new(shard_seq),
                events,
            }),
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.inner.events
    }

    /// Inserts `payload` at `pk` with weight `+1`.
    pub fn insert(&self, pk: u128, payload: &dyn RowAccessor) -> GnitzResult<()> {
        self.put(pk, 1, payload)
    }

    /// Removes `payload` at `pk` with weight `-1`.
    pub fn remove(&self, pk: u128, payload: &dyn RowAccessor) -> GnitzResult<()> {
        self.put(pk, -1, payload)
    }

    /// Writes a raw `(pk, weight, payload)` contribution: assigns the next
    /// LSN, appends+fsyncs a WAL block, then upserts into the MemTable. On
    /// `MemTableFull` the generation is flushed and rotated and the upsert
    /// is retried against the fresh MemTable (spec.md §4.10: "the caller
    /// performs flush_and_rotate").
    pub fn put(&self, pk: u128, weight: i64, payload: &dyn RowAccessor) -> GnitzResult<()> {
        if self.inner.config.read_only() {
            return Err(GnitzError::new("engine is read-only", ErrorKind::Storage));
        }
        let lsn = self.inner.lsn.fetch_add(1, AtomicOrdering::SeqCst);

        {
            let mut wal_guard = self.inner.wal.lock();
            let wal = wal_guard.as_mut().expect("read_only was already checked above");
            wal.append_block(lsn, self.inner.table_id as u32, &[(pk, weight, payload)])?;
        }

        loop {
            let mut memtable = self.inner.memtable.lock();
            match memtable.upsert(pk, weight, payload) {
                Ok(()) => {
                    self.inner.last_upserted_lsn.fetch_max(lsn, AtomicOrdering::SeqCst);
                    return Ok(());
                }
                Err(e) if e.is_memtable_full() => {
                    drop(memtable);
                    self.flush_and_rotate()?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Every `(payload, weight)` pair currently recorded at `pk`, across
    /// the MemTable and every Spine shard whose key range brackets it
    /// (spec.md §4.10's read path). The building block behind both
    /// `get_weight` and the `dbsp::Trace` this engine implements.
    pub fn rows_at(&self, pk: u128) -> Vec<(OwnedRowAccessor, i64)> {
        let mut out = Vec::new();

        {
            let memtable = self.inner.memtable.lock();
            let mut cursor = memtable.cursor();
            cursor.seek(pk);
            while cursor.is_valid() && cursor.key() == pk {
                out.push((OwnedRowAccessor::from_accessor(self.inner.schema.clone(), cursor.accessor()), cursor.weight()));
                cursor.advance();
            }
        }

        for handle in self.inner.spine.handles_bracketing(self.inner.table_id, pk) {
            let view = handle.view();
            let mut row = view.find_row_index(pk);
            while row < view.row_count() && view.pk_at(row) == pk {
                let acc = view.accessor(row);
                out.push((OwnedRowAccessor::from_accessor(self.inner.schema.clone(), &acc), view.weight_at(row)));
                row += 1;
            }
        }

        out
    }

    /// Every `(pk, payload)` pair with strictly positive net weight across
    /// the whole table. Merges the MemTable cursor with every Spine shard's
    /// cursor via the same min-key tournament the compactor uses, summing
    /// weights per distinct `(pk, payload)` within each key's group (spec.md
    /// §8 S1).
    pub fn iter_positive(&self) -> GnitzResult<Vec<(u128, OwnedRowAccessor)>> {
        let memtable = self.inner.memtable.lock();
        let mut mem_cursor = memtable.cursor();
        let handles = self.inner.spine.handles_for(self.inner.table_id);
        let mut shard_cursors: Vec<_> = handles.iter().map(|h| h.view().cursor()).collect();

        let mut out = Vec::new();
        loop {
            let mut min_key = if mem_cursor.is_valid() { Some(mem_cursor.key()) } else { None };
            for c in &shard_cursors {
                if c.is_valid() {
                    min_key = Some(match min_key {
                        Some(k) => k.min(c.key()),
                        None => c.key(),
                    });
                }
            }
            let Some(min_key) = min_key else { break };

            let mut group: Vec<(OwnedRowAccessor, i64)> = Vec::new();
            while mem_cursor.is_valid() && mem_cursor.key() == min_key {
                group.push((OwnedRowAccessor::from_accessor(self.inner.schema.clone(), mem_cursor.accessor()), mem_cursor.weight()));
                mem_cursor.advance();
            }
            for c in &mut shard_cursors {
                while c.is_valid() && c.key() == min_key {
                    group.push((OwnedRowAccessor::from_accessor(self.inner.schema.clone(), c.accessor()), c.weight()));
                    c.advance();
                }
            }
            group.sort_by(|a, b| compare_rows(&a.0, &b.0));

            let mut idx = 0;
            while idx < group.len() {
                let mut end = idx + 1;
                let mut weight = group[idx].1;
                while end < group.len() && compare_rows(&group[idx].0, &group[end].0) == Ordering::Equal {
                    weight += group[end].1;
                    end += 1;
                }
                if weight > 0 {
                    out.push((min_key, group[idx].0.clone()));
                }
                idx = end;
            }
        }
        Ok(out)
    }

    /// Sums the net weight of `(pk, payload)`, dry-run comparing each
    /// candidate row's payload against `payload` before counting its
    /// weight (spec.md §4.10's read path).
    pub fn get_weight(&self, pk: u128, payload: &dyn RowAccessor) -> GnitzResult<i64> {
        let total = self
            .rows_at(pk)
            .into_iter()
            .filter(|(row, _)| compare_rows(payload, row) == Ordering::Equal)
            .map(|(_, weight)| weight)
            .sum();
        Ok(total)
    }

    /// Flushes the current MemTable generation to a new shard, registers it
    /// with the Spine, publishes an updated manifest, and rotates in a
    /// fresh MemTable. A no-op if the MemTable is currently empty.
    pub fn flush_and_rotate(&self) -> GnitzResult<()> {
        let mut memtable_guard = self.inner.memtable.lock();
        if memtable_guard.is_empty() {
            return Ok(());
        }

        let mut writer = ShardWriter::new(self.inner.schema.clone());
        memtable_guard.flush(&mut writer)?;

        let min_lsn = self.inner.generation_start_lsn.load(AtomicOrdering::SeqCst);
        // Not `lsn.load() - 1`: when this flush was driven by a `MemTableFull`
        // retry, the counter has already been advanced past the record that
        // failed to enter this memtable (it lands in the next generation
        // instead). `last_upserted_lsn` only ever reflects rows that actually
        // made it in.
        let max_lsn = self.inner.last_upserted_lsn.load(AtomicOrdering::SeqCst);
        writer.set_lsn_range(min_lsn, max_lsn);

        let seq = self.inner.shard_seq.fetch_add(1, AtomicOrdering::SeqCst);
        let filename = format!("table-{:020}-{:010}.gnz", self.inner.table_id, seq);
        let path = self.inner.config.dir().join(&filename);
        writer.finalize(&path)?;

        let view = ShardView::open(&path, self.inner.schema.clone())?;
        self.inner.spine.add_shard(self.inner.table_id, filename.clone(), view)?;

        let fresh = MemTable::new(
            self.inner.schema.clone(),
            self.inner.config.memtable_budget_bytes(),
            self.inner.config.blob_arena_budget_bytes(),
        );
        *memtable_guard = fresh;
        drop(memtable_guard);
        // The next generation starts one past the last record that actually
        // landed in the generation just flushed — not the raw LSN counter,
        // which during a `MemTableFull` retry already counts the in-flight
        // record that belongs to this new generation instead.
        self.inner.generation_start_lsn.store(max_lsn + 1, AtomicOrdering::SeqCst);

        self.publish_manifest()?;
        self.inner.events.publish(EngineEvent::Flushed { table_id: self.inner.table_id, shard_filename: filename });

        if self.inner.spine.shard_count(self.inner.table_id) >= self.inner.config.compaction_shard_count_threshold() {
            self.compact()?;
        }

        Ok(())
    }

    /// Rebuilds the manifest from this table's current Spine contents,
    /// preserving every other table's entries from the previously
    /// published version untouched, and publishes it atomically.
    fn publish_manifest(&self) -> GnitzResult<()> {
        let mut entries = Vec::new();
        if self.inner.manifest.exists() {
            let reader = self.inner.manifest.load_current()?;
            for entry in &reader.snapshot().entries {
                if entry.table_id != self.inner.table_id {
                    entries.push(entry.clone());
                }
            }
        }
        for handle in self.inner.spine.handles_for(self.inner.table_id) {
            entries.push(ManifestEntry {
                table_id: self.inner.table_id,
                min_key: handle.min_key(),
                max_key: handle.max_key(),
                min_lsn: handle.min_lsn(),
                max_lsn: handle.max_lsn(),
                shard_filename: handle.filename().to_string(),
            });
        }

        let current_global_max = self.inner.global_max_lsn.load(AtomicOrdering::SeqCst);
        let new_global_max = entries.iter().map(|e| e.max_lsn).max().unwrap_or(0).max(current_global_max);
        self.inner.manifest.publish_new_version(entries, new_global_max)?;
        self.inner.global_max_lsn.store(new_global_max, AtomicOrdering::SeqCst);
        self.inner.events.publish(EngineEvent::ManifestPublished { global_max_lsn: new_global_max });
        Ok(())
    }

    /// Truncates the WAL once every record still in it is superseded by the
    /// published manifest's watermark (spec.md §4.10's checkpoint step).
    pub fn checkpoint(&self) -> GnitzResult<()> {
        let mut wal_guard = self.inner.wal.lock();
        if let Some(wal) = wal_guard.as_mut() {
            let global_max = self.inner.global_max_lsn.load(AtomicOrdering::SeqCst);
            wal.truncate_before_lsn(global_max + 1)?;
        }
        Ok(())
    }

    /// Merges this table's shards via the Compactor and publishes the
    /// resulting manifest (spec.md §4.11).
    pub fn compact(&self) -> GnitzResult<()> {
        let outcome = compactor::compact_table(&self.inner.spine, self.inner.table_id, &self.inner.schema, self.inner.config.dir())?;
        let Some(outcome) = outcome else { return Ok(()) };

        self.publish_manifest()?;
        self.inner.spine.try_cleanup()?;
        self.inner.events.publish(EngineEvent::Compacted {
            table_id: self.inner.table_id,
            input: outcome.input_filenames,
            output: outcome.output_filename,
        });
        Ok(())
    }

    pub fn stats(&self) -> EngineStats {
        let spine_stats = self.inner.spine.stats(self.inner.table_id);
        EngineStats {
            current_lsn: self.inner.lsn.load(AtomicOrdering::SeqCst),
            memtable_rows: self.inner.memtable.lock().len(),
            shard_count: spine_stats.shard_count,
            shard_rows: spine_stats.row_count,
        }
    }
}

impl crate::dbsp::Trace for Engine {
    fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    fn rows_at(&self, pk: u128) -> Vec<(OwnedRowAccessor, i64)> {
        Engine::rows_at(self, pk)
    }
}

impl crate::dbsp::IngestSink for Engine {
    fn ingest_batch(&self, batch: &crate::zset::ArenaZSetBatch) -> GnitzResult<()> {
        for i in 0..batch.length() {
            self.put(batch.pk_at(i), batch.weight_at(i), &batch.get_accessor(i))?;
        }
        Ok(())
    }
}
