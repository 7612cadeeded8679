//! DBSP-style incremental streaming operators (spec.md §4.12).
//!
//! Every kernel here takes its input batch(es) — [`crate::zset::ArenaZSetBatch`],
//! spec.md §4.4's Z-Set batch — by reference and produces a fresh output
//! batch, grounded on the teacher's `common::stream` kernels:
//! `filtered_stream.rs` for the filter/map iterator-adapter shape,
//! `union_stream.rs` for union, `unique_stream.rs` for the seen-before check
//! `distinct` generalizes into weight-history tracking, and
//! `joined_cursor.rs` for the pairing shape behind both join kernels.
//! Generalized from lazy `Iterator<Item = Document>` streams to
//! batch-at-a-time Z-set operators over weighted packed rows. Every
//! operator runs synchronously to completion on the caller's thread, per
//! spec.md §5's scheduling model.

mod aggregate;
mod distinct;
mod join;
mod reduce;

pub use aggregate::{Aggregate, CountRows, MaxI64, SumI64};
pub use distinct::distinct;
pub use join::{join_delta_delta, join_delta_trace};
pub use reduce::reduce;

use crate::error::GnitzResult;
use crate::row_accessor::{compare_rows, MapOutputAccessor, OwnedRowAccessor, RowAccessor};
use crate::schema::Schema;
use crate::zset::ArenaZSetBatch;
use std::cmp::Ordering;

/// A queryable source of weights accumulated before the current Δ — the
/// interface `distinct`, `reduce` and `join_delta_trace` use to look past
/// the batch in front of them. [`crate::engine::Engine`] implements this
/// over its MemTable + Spine.
pub trait Trace {
    fn schema(&self) -> &Schema;
    /// Every `(payload, weight)` pair currently recorded at `pk`.
    fn rows_at(&self, pk: u128) -> Vec<(OwnedRowAccessor, i64)>;
    /// Net weight of `(pk, payload)` — the sum of `rows_at`'s matches.
    fn get_weight(&self, pk: u128, payload: &dyn RowAccessor) -> i64 {
        self.rows_at(pk)
            .into_iter()
            .filter(|(row, _)| compare_rows(row, payload) == Ordering::Equal)
            .map(|(_, w)| w)
            .sum()
    }
}

/// The sink a Δ is folded into: `integrate` and `distinct`'s post-emission
/// history update both go through this.
pub trait IngestSink {
    fn ingest_batch(&self, batch: &ArenaZSetBatch) -> GnitzResult<()>;
}

/// A history a kernel can both query and fold Δs into — what `distinct`
/// needs from its `history_table` argument.
pub trait TraceSink: Trace + IngestSink {}
impl<T: Trace + IngestSink> TraceSink for T {}

/// Builds a sorted, consolidated owned copy of `batch` without touching
/// the caller's reference — the "sort/consolidate Δ" step `distinct` and
/// `reduce` both need ahead of reasoning about a key or a group as a
/// whole.
fn sorted_consolidated_copy(batch: &ArenaZSetBatch) -> GnitzResult<ArenaZSetBatch> {
    let mut copy = copy_of(batch)?;
    copy.sort();
    copy.consolidate();
    Ok(copy)
}

/// A plain row-for-row copy of `batch` into a fresh arena, weights and all.
fn copy_of(batch: &ArenaZSetBatch) -> GnitzResult<ArenaZSetBatch> {
    let mut out = ArenaZSetBatch::new(batch.schema().clone());
    for i in 0..batch.length() {
        out.append(batch.pk_at(i), batch.weight_at(i), &batch.get_accessor(i))?;
    }
    Ok(out)
}

/// Keeps rows whose payload satisfies `predicate`, weight unchanged
/// (spec.md §4.12 `op_filter`). Grounded on `FilteredStream::next`'s
/// `match self.filter.apply(&doc)` loop.
pub fn filter(input: &ArenaZSetBatch, predicate: impl Fn(&dyn RowAccessor) -> bool) -> GnitzResult<ArenaZSetBatch> {
    let mut out = ArenaZSetBatch::new(input.schema().clone());
    for i in 0..input.length() {
        let acc = input.get_accessor(i);
        if predicate(&acc) {
            out.append(input.pk_at(i), input.weight_at(i), &acc)?;
        }
    }
    Ok(out)
}

/// Applies `project` to every row's payload, reusing one
/// [`MapOutputAccessor`] across the whole batch so the kernel allocates at
/// most once per output row (spec.md §4.12 `op_map`).
pub fn map(input: &ArenaZSetBatch, output_schema: Schema, mut project: impl FnMut(&dyn RowAccessor, &mut MapOutputAccessor)) -> GnitzResult<ArenaZSetBatch> {
    let mut out = ArenaZSetBatch::new(output_schema.clone());
    let mut scratch = MapOutputAccessor::new(output_schema);
    for i in 0..input.length() {
        scratch.reset();
        project(&input.get_accessor(i), &mut scratch);
        out.append(input.pk_at(i), input.weight_at(i), &scratch)?;
    }
    Ok(out)
}

/// Flips every row's weight sign (spec.md §4.12 `op_negate`).
pub fn negate(input: &ArenaZSetBatch) -> GnitzResult<ArenaZSetBatch> {
    let mut out = ArenaZSetBatch::new(input.schema().clone());
    for i in 0..input.length() {
        out.append(input.pk_at(i), -input.weight_at(i), &input.get_accessor(i))?;
    }
    Ok(out)
}

/// Appends both inputs' rows unchanged (spec.md §4.12 `op_union`). Grounded
/// on `UnionStream`, generalized from "exhaust one stream then move to the
/// next" to "concatenate both finite batches" since a Δ is never an
/// unbounded stream.
pub fn union(a: &ArenaZSetBatch, b: &ArenaZSetBatch) -> GnitzResult<ArenaZSetBatch> {
    let mut out = copy_of(a)?;
    for i in 0..b.length() {
        out.append(b.pk_at(i), b.weight_at(i), &b.get_accessor(i))?;
    }
    Ok(out)
}

/// The delay operator: hands back whatever was passed in on the *previous*
/// call (empty on the first), then stashes `current` for the next one
/// (spec.md §4.12 `op_delay` — "copies the current batch to the next
/// tick's input register").
#[derive(Default)]
pub struct Delay {
    held: Option<ArenaZSetBatch>,
}

impl Delay {
    pub fn new() -> Self {
        Delay { held: None }
    }

    pub fn step(&mut self, current: ArenaZSetBatch) -> ArenaZSetBatch {
        let empty = ArenaZSetBatch::new(current.schema().clone());
        self.held.replace(current).unwrap_or(empty)
    }
}

/// The integrate operator: a terminal sink that folds a Δ into durable
/// state (spec.md §4.12 `op_integrate`: `target_table.ingest_batch(in)`).
pub fn integrate(sink: &impl IngestSink, batch: &ArenaZSetBatch) -> GnitzResult<()> {
    sink.ingest_batch(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnType, SchemaBuilder};
    use crate::value::Value;

    fn schema() -> Schema {
        SchemaBuilder::new().pk("id", ColumnType::U64).column("v", ColumnType::I64, false).build().unwrap()
    }

    fn batch(rows: &[(u128, i64, i64)]) -> ArenaZSetBatch {
        let schema = schema();
        let mut b = ArenaZSetBatch::new(schema.clone());
        for &(pk, w, v) in rows {
            b.append(pk, w, &OwnedRowAccessor::new(schema.clone(), vec![Value::I64(v)])).unwrap();
        }
        b
    }

    #[test]
    fn filter_keeps_only_matching_rows() {
        let input = batch(&[(1, 1, 10), (2, 1, 20), (3, 1, 30)]);
        let out = filter(&input, |row| row.get_int_signed(0) >= 20).unwrap();
        assert_eq!((0..out.length()).map(|i| out.pk_at(i)).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn negate_flips_every_weight() {
        let input = batch(&[(1, 1, 10), (2, -3, 20)]);
        let out = negate(&input).unwrap();
        assert_eq!((0..out.length()).map(|i| out.weight_at(i)).collect::<Vec<_>>(), vec![-1, 3]);
    }

    #[test]
    fn union_concatenates_both_inputs() {
        let a = batch(&[(1, 1, 10)]);
        let b = batch(&[(2, 1, 20)]);
        let out = union(&a, &b).unwrap();
        assert_eq!(out.length(), 2);
    }

    #[test]
    fn sorted_consolidated_copy_sums_duplicate_pk_payload_and_drops_net_zero() {
        let b = batch(&[(1, 1, 10), (1, -1, 10), (1, 1, 10)]);
        let copy = sorted_consolidated_copy(&b).unwrap();
        assert_eq!(copy.length(), 1);
        assert_eq!(copy.weight_at(0), 1);
    }

    #[test]
    fn delay_holds_a_batch_for_exactly_one_tick() {
        let mut delay = Delay::new();
        let first = delay.step(batch(&[(1, 1, 10)]));
        assert!(first.is_empty());
        let second = delay.step(batch(&[(2, 1, 20)]));
        assert_eq!(second.pk_at(0), 1);
    }

    #[test]
    fn map_reprojects_every_row_through_a_reused_scratch_accessor() {
        let input = batch(&[(1, 1, 10), (2, 1, 20)]);
        let out_schema = SchemaBuilder::new().pk("id", ColumnType::U64).column("doubled", ColumnType::I64, false).build().unwrap();
        let out = map(&input, out_schema, |row, scratch| {
            scratch.set(0, Value::I64(row.get_int_signed(0) * 2));
        })
        .unwrap();
        assert_eq!(out.get_accessor(0).get_int_signed(0), 20);
        assert_eq!(out.get_accessor(1).get_int_signed(0), 40);
    }
}
