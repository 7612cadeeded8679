//! The distinct kernel (spec.md §4.12 `op_distinct`).
//!
//! Grounded on the teacher's `UniqueStream`, which wraps a raw iterator in
//! a `HashSet<NitriteId>` and yields a document only the first time its ID
//! is seen. That file grounds the iterator-adapter *shape* — "ask history
//! whether we've seen this before, emit only the transition" — but
//! `distinct` here tracks weight history rather than a one-shot seen-set,
//! since a Z-set row can appear, disappear, and reappear.

use super::{sorted_consolidated_copy, TraceSink};
use crate::error::GnitzResult;
use crate::zset::ArenaZSetBatch;

/// Clips a net weight to `{0, 1}`: present (`1`) if positive, absent (`0`)
/// otherwise. Deliberately not the textbook `{-1, 0, 1}` sign function —
/// base tables never drive a key negative, so the extra state would never
/// be reachable here.
fn sign_clip(x: i64) -> i64 {
    if x > 0 {
        1
    } else {
        0
    }
}

/// Sorts/consolidates `delta`, and for each resulting record computes
/// whether membership in `history` flips from absent to present or back
/// (spec.md §4.12 `op_distinct`). Emits only the transitions, then folds
/// the consolidated Δ into `history` so later calls see it.
pub fn distinct(delta: &ArenaZSetBatch, history: &dyn TraceSink) -> GnitzResult<ArenaZSetBatch> {
    let consolidated = sorted_consolidated_copy(delta)?;

    let mut out = ArenaZSetBatch::new(consolidated.schema().clone());
    for i in 0..consolidated.length() {
        let pk = consolidated.pk_at(i);
        let weight = consolidated.weight_at(i);
        let row = consolidated.get_accessor(i);
        let w_old = history.get_weight(pk, &row);
        let w_new = w_old + weight;
        let transition = sign_clip(w_new) - sign_clip(w_old);
        if transition != 0 {
            out.append(pk, transition, &row)?;
        }
    }

    history.ingest_batch(&consolidated)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbsp::{IngestSink, Trace};
    use crate::row_accessor::OwnedRowAccessor;
    use crate::schema::{ColumnType, Schema, SchemaBuilder};
    use crate::value::Value;
    use parking_lot::Mutex;

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

    /// An in-memory `TraceSink` for exercising `distinct` without an
    /// `Engine`: just the Δ rows it has ever ingested, unconsolidated.
    struct MemoryHistory {
        schema: Schema,
        rows: Mutex<Vec<(u128, i64, OwnedRowAccessor)>>,
    }

    impl MemoryHistory {
        fn new(schema: Schema) -> Self {
            MemoryHistory { schema, rows: Mutex::new(Vec::new()) }
        }
    }

    impl Trace for MemoryHistory {
        fn schema(&self) -> &Schema {
            &self.schema
        }

        fn rows_at(&self, pk: u128) -> Vec<(OwnedRowAccessor, i64)> {
            self.rows.lock().iter().filter(|(k, _, _)| *k == pk).map(|(_, w, row)| (row.clone(), *w)).collect()
        }
    }

    impl IngestSink for MemoryHistory {
        fn ingest_batch(&self, batch: &ArenaZSetBatch) -> GnitzResult<()> {
            let mut rows = self.rows.lock();
            for i in 0..batch.length() {
                let owned = OwnedRowAccessor::from_accessor(self.schema.clone(), &batch.get_accessor(i));
                rows.push((batch.pk_at(i), batch.weight_at(i), owned));
            }
            Ok(())
        }
    }

    #[test]
    fn first_insert_of_a_key_emits_a_positive_transition() {
        let history = MemoryHistory::new(schema());
        let out = distinct(&batch(&[(1, 1, 10)]), &history).unwrap();
        assert_eq!(out.length(), 1);
        assert_eq!(out.weight_at(0), 1);
    }

    #[test]
    fn duplicate_insert_of_an_already_present_key_emits_nothing() {
        let history = MemoryHistory::new(schema());
        distinct(&batch(&[(1, 1, 10)]), &history).unwrap();
        let out = distinct(&batch(&[(1, 1, 10)]), &history).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn removing_the_last_copy_emits_a_negative_transition() {
        let history = MemoryHistory::new(schema());
        distinct(&batch(&[(1, 1, 10), (1, 1, 10)]), &history).unwrap();
        let out = distinct(&batch(&[(1, -1, 10)]), &history).unwrap();
        assert!(out.is_empty(), "one copy still remains, membership unchanged");

        let out = distinct(&batch(&[(1, -1, 10)]), &history).unwrap();
        assert_eq!(out.length(), 1);
        assert_eq!(out.weight_at(0), -1);
    }
}
