//! The two join kernels (spec.md §4.12 `join_delta_trace`,
//! `join_delta_delta`).
//!
//! Grounded on the teacher's `JoinedDocumentCursor`, which pairs a local
//! cursor with a foreign one and builds an array of every foreign match per
//! local row — the same "pair up rows across two inputs" shape, generalized
//! from a nested-loop rescan over documents to a pk-keyed lookup (against a
//! trace) or a sorted merge-join (between two deltas) over weighted rows.

use super::Trace;
use crate::error::GnitzResult;
use crate::row_accessor::CompositeRowAccessor;
use crate::schema::Schema;
use crate::zset::ArenaZSetBatch;

fn sorted_copy(batch: &ArenaZSetBatch) -> GnitzResult<ArenaZSetBatch> {
    let mut copy = ArenaZSetBatch::new(batch.schema().clone());
    for i in 0..batch.length() {
        copy.append(batch.pk_at(i), batch.weight_at(i), &batch.get_accessor(i))?;
    }
    copy.sort();
    Ok(copy)
}

/// For each Δ row with non-zero weight, seeks `trace` to the row's pk and
/// emits the composite of every trace row sharing that pk, weight
/// multiplied; zero products are skipped. `out_schema` must be the
/// concatenation of `delta`'s schema and `trace.schema()`.
pub fn join_delta_trace(delta: &ArenaZSetBatch, trace: &dyn Trace, out_schema: Schema) -> GnitzResult<ArenaZSetBatch> {
    let mut out = ArenaZSetBatch::new(out_schema.clone());
    for i in 0..delta.length() {
        let weight = delta.weight_at(i);
        if weight == 0 {
            continue;
        }
        let row = delta.get_accessor(i);
        let pk = delta.pk_at(i);
        for (trace_row, trace_weight) in trace.rows_at(pk) {
            let product = weight * trace_weight;
            if product == 0 {
                continue;
            }
            let composite = CompositeRowAccessor::new(&out_schema, &row, &trace_row);
            out.append(pk, product, &composite)?;
        }
    }
    Ok(out)
}

/// Sorts both inputs by pk and merge-joins on pk; for each equal-key block
/// emits the N×M cross product of the two sides with multiplied weights,
/// skipping zero products. `out_schema` must be the concatenation of `a`'s
/// schema and `b`'s schema.
pub fn join_delta_delta(a: &ArenaZSetBatch, b: &ArenaZSetBatch, out_schema: Schema) -> GnitzResult<ArenaZSetBatch> {
    let a_sorted = sorted_copy(a)?;
    let b_sorted = sorted_copy(b)?;

    let mut out = ArenaZSetBatch::new(out_schema.clone());
    let (mut i, mut j) = (0usize, 0usize);
    while i < a_sorted.length() && j < b_sorted.length() {
        let (a_pk, b_pk) = (a_sorted.pk_at(i), b_sorted.pk_at(j));
        if a_pk < b_pk {
            i += 1;
            continue;
        }
        if a_pk > b_pk {
            j += 1;
            continue;
        }

        let a_start = i;
        while i < a_sorted.length() && a_sorted.pk_at(i) == a_pk {
            i += 1;
        }
        let b_start = j;
        while j < b_sorted.length() && b_sorted.pk_at(j) == a_pk {
            j += 1;
        }

        for ai in a_start..i {
            let a_row = a_sorted.get_accessor(ai);
            let a_weight = a_sorted.weight_at(ai);
            for bj in b_start..j {
                let b_row = b_sorted.get_accessor(bj);
                let b_weight = b_sorted.weight_at(bj);
                let product = a_weight * b_weight;
                if product == 0 {
                    continue;
                }
                let composite = CompositeRowAccessor::new(&out_schema, &a_row, &b_row);
                out.append(a_pk, product, &composite)?;
            }
        }
    }
    Ok(out)
}
