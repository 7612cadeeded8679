//! The reduce kernel (spec.md §4.12 `op_reduce`): incremental group-by
//! aggregation with a linear shortcut and a non-linear history-replay
//! fallback.
//!
//! Not directly grounded on any one teacher stream file — the teacher has
//! no incremental aggregation of its own — but built from the same
//! consolidate-then-scan shape as [`super::distinct`] (itself grounded on
//! `unique_stream.rs`), plus the Aggregate protocol spec.md §4.12 spells
//! out explicitly.

use super::{sorted_consolidated_copy, Aggregate, Trace};
use crate::error::GnitzResult;
use crate::row_accessor::{compare_rows, OwnedRowAccessor, RowAccessor};
use crate::schema::{ColumnType, Schema};
use crate::value::Value;
use crate::zset::ArenaZSetBatch;
use std::cmp::Ordering;
use std::collections::HashMap;
use xxhash_rust::xxh3::xxh3_128;

/// Computes a group key for `row` over `group_columns`: the column's own
/// integer value if there's exactly one integer group column ("single
/// integer column -> natural"), else an XXH3-128 hash folded from every
/// group column's value.
fn group_key(schema: &Schema, group_columns: &[usize], row: &dyn RowAccessor) -> u128 {
    if let [only] = group_columns {
        let ty = schema.column_type_of_payload(*only);
        if ty.is_integer() && !row.is_null(*only) {
            return if ty.is_signed() {
                row.get_int_signed(*only) as i128 as u128
            } else {
                row.get_int(*only) as u128
            };
        }
    }
    let mut bytes = Vec::new();
    for &col in group_columns {
        hash_value(&row.get_value(col), &mut bytes);
    }
    xxh3_128(&bytes)
}

fn hash_value(value: &Value, bytes: &mut Vec<u8>) {
    match value {
        Value::Null => bytes.push(0),
        Value::I8(v) => bytes.extend_from_slice(&v.to_le_bytes()),
        Value::I16(v) => bytes.extend_from_slice(&v.to_le_bytes()),
        Value::I32(v) => bytes.extend_from_slice(&v.to_le_bytes()),
        Value::I64(v) => bytes.extend_from_slice(&v.to_le_bytes()),
        Value::U8(v) => bytes.extend_from_slice(&v.to_le_bytes()),
        Value::U16(v) => bytes.extend_from_slice(&v.to_le_bytes()),
        Value::U32(v) => bytes.extend_from_slice(&v.to_le_bytes()),
        Value::U64(v) => bytes.extend_from_slice(&v.to_le_bytes()),
        Value::U128(v) => bytes.extend_from_slice(&v.to_le_bytes()),
        Value::F32(v) => bytes.extend_from_slice(&v.to_bits().to_le_bytes()),
        Value::F64(v) => bytes.extend_from_slice(&v.to_bits().to_le_bytes()),
        Value::Str(s) => bytes.extend_from_slice(s.as_bytes()),
    }
    bytes.push(0xff);
}

fn bits_to_value(ty: ColumnType, bits: u64) -> Value {
    match ty {
        ColumnType::I8 => Value::I8(bits as i64 as i8),
        ColumnType::I16 => Value::I16(bits as i64 as i16),
        ColumnType::I32 => Value::I32(bits as i64 as i32),
        ColumnType::I64 => Value::I64(bits as i64),
        ColumnType::U8 => Value::U8(bits as u8),
        ColumnType::U16 => Value::U16(bits as u16),
        ColumnType::U32 => Value::U32(bits as u32),
        ColumnType::U64 => Value::U64(bits),
        ColumnType::U128 => Value::U128(bits as u128),
        ColumnType::F32 => Value::F32(f32::from_bits(bits as u32)),
        ColumnType::F64 => Value::F64(f64::from_bits(bits)),
        ColumnType::String => panic!("an aggregate's output column cannot be a string"),
    }
}

fn value_to_bits(ty: ColumnType, row: &dyn RowAccessor, col: usize) -> u64 {
    match ty {
        ColumnType::F32 => (row.get_float(col) as f32).to_bits() as u64,
        ColumnType::F64 => row.get_float(col).to_bits(),
        ColumnType::U128 => row.get_u128(col) as u64,
        ty if ty.is_signed() => row.get_int_signed(col) as u64,
        _ => row.get_int(col),
    }
}

/// Builds the single-column output row `(key, ±1, row_with_val)` carries —
/// the output table is keyed by the group key itself, so its only payload
/// column is the aggregate's value.
fn build_output_row(out_schema: &Schema, agg_bits: u64, agg_type: ColumnType) -> OwnedRowAccessor {
    OwnedRowAccessor::new(out_schema.clone(), vec![bits_to_value(agg_type, agg_bits)])
}

/// The net-weight-1 value currently recorded for `key` in `trace_out`, if
/// any — summing every retraction/insertion `reduce` has ever emitted for
/// that key down to whichever value (if any) is still live.
fn current_output_value(trace_out: &dyn Trace, key: u128, agg_type: ColumnType) -> Option<u64> {
    let mut tally: Vec<(OwnedRowAccessor, i64)> = Vec::new();
    for (row, weight) in trace_out.rows_at(key) {
        match tally.iter_mut().find(|(r, _)| compare_rows(r, &row) == Ordering::Equal) {
            Some(entry) => entry.1 += weight,
            None => tally.push((row, weight)),
        }
    }
    let last_col = trace_out.schema().payload_count() - 1;
    tally.into_iter().find(|(_, w)| *w > 0).map(|(row, _)| value_to_bits(agg_type, &row, last_col))
}

/// Sorts/consolidates `delta` by its group columns and, per group: accumulates
/// `make_agg()`'s aggregate over the group's Δ rows; retracts the group's
/// previous value if `trace_out` has one; either folds that old value
/// straight in (the linear shortcut) or replays the group's full history
/// from `trace_in` (non-linear aggregates); emits the new value unless the
/// accumulator is zero; finally sorts/consolidates the output (spec.md
/// §4.12 `op_reduce`).
pub fn reduce(
    delta: &ArenaZSetBatch,
    group_columns: &[usize],
    out_schema: Schema,
    mut make_agg: impl FnMut() -> Box<dyn Aggregate>,
    trace_in: &dyn Trace,
    trace_out: &dyn Trace,
) -> GnitzResult<ArenaZSetBatch> {
    let consolidated = sorted_consolidated_copy(delta)?;

    let mut groups: HashMap<u128, Vec<usize>> = HashMap::new();
    for i in 0..consolidated.length() {
        let row = consolidated.get_accessor(i);
        let key = group_key(consolidated.schema(), group_columns, &row);
        groups.entry(key).or_default().push(i);
    }
    let mut keys: Vec<u128> = groups.keys().copied().collect();
    keys.sort_unstable();

    let agg_type = make_agg().output_column_type();
    let mut out = ArenaZSetBatch::new(out_schema.clone());

    for key in keys {
        let indices = &groups[&key];

        let mut agg = make_agg();
        agg.reset();
        for &i in indices {
            let row = consolidated.get_accessor(i);
            agg.step(&row, consolidated.weight_at(i));
        }

        let old_bits = current_output_value(trace_out, key, agg_type);
        if let Some(bits) = old_bits {
            out.append(key, -1, &build_output_row(&out_schema, bits, agg_type))?;
        }

        match old_bits {
            Some(bits) if agg.is_linear() => agg.merge_accumulated(bits, 1),
            Some(_) => {
                for (row, weight) in trace_in.rows_at(key) {
                    agg.step(&row, weight);
                }
            }
            None => {}
        }

        if !agg.is_accumulator_zero() {
            out.append(key, 1, &build_output_row(&out_schema, agg.get_value_bits(), agg_type))?;
        }
    }

    out.sort();
    out.consolidate();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbsp::SumI64;
    use crate::schema::{ColumnType as CT, SchemaBuilder};

    fn input_schema() -> Schema {
        SchemaBuilder::new()
            .pk("id", CT::U64)
            .column("group", CT::I64, false)
            .column("amount", CT::I64, false)
            .build()
            .unwrap()
    }

    fn out_schema() -> Schema {
        SchemaBuilder::new().pk("group", CT::U64).column("total", CT::I64, false).build().unwrap()
    }

    fn batch(rows: &[(u128, i64, i64, i64)]) -> ArenaZSetBatch {
        let schema = input_schema();
        let mut b = ArenaZSetBatch::new(schema.clone());
        for &(pk, w, group, amount) in rows {
            b.append(pk, w, &OwnedRowAccessor::new(schema.clone(), vec![Value::I64(group), Value::I64(amount)])).unwrap();
        }
        b
    }

    struct EmptyTrace(Schema);
    impl Trace for EmptyTrace {
        fn schema(&self) -> &Schema {
            &self.0
        }
        fn rows_at(&self, _pk: u128) -> Vec<(OwnedRowAccessor, i64)> {
            Vec::new()
        }
    }

    struct FixedTrace {
        schema: Schema,
        rows: Vec<(u128, OwnedRowAccessor, i64)>,
    }
    impl Trace for FixedTrace {
        fn schema(&self) -> &Schema {
            &self.schema
        }
        fn rows_at(&self, pk: u128) -> Vec<(OwnedRowAccessor, i64)> {
            self.rows.iter().filter(|(k, _, _)| *k == pk).map(|(_, row, w)| (row.clone(), *w)).collect()
        }
    }

    fn find_pk(out: &ArenaZSetBatch, pk: u128) -> Option<(i64, OwnedRowAccessor)> {
        (0..out.length())
            .find(|&i| out.pk_at(i) == pk)
            .map(|i| (out.weight_at(i), OwnedRowAccessor::from_accessor(out.schema().clone(), &out.get_accessor(i))))
    }

    #[test]
    fn first_batch_emits_only_an_insertion_per_group() {
        let delta = batch(&[(1, 1, 0, 10), (2, 1, 0, 5), (3, 1, 1, 100)]);
        let trace_out = EmptyTrace(out_schema());
        let trace_in = EmptyTrace(input_schema());
        let out = reduce(&delta, &[0], out_schema(), || Box::new(SumI64::new(1)), &trace_in, &trace_out).unwrap();

        assert_eq!(out.length(), 2);
        let (weight, row) = find_pk(&out, 0).unwrap();
        assert_eq!(weight, 1);
        assert_eq!(row.get_int_signed(0), 15);
    }

    #[test]
    fn update_retracts_the_old_value_before_inserting_the_new_one() {
        let trace_out_schema = out_schema();
        let old_row = OwnedRowAccessor::new(trace_out_schema.clone(), vec![Value::I64(15)]);
        let trace_out = FixedTrace { schema: trace_out_schema, rows: vec![(0, old_row, 1)] };
        let trace_in = EmptyTrace(input_schema());

        let delta = batch(&[(4, 1, 0, 7)]);
        let out = reduce(&delta, &[0], out_schema(), || Box::new(SumI64::new(1)), &trace_in, &trace_out).unwrap();

        assert_eq!(out.length(), 2);
        let retraction_idx = (0..out.length()).find(|&i| out.weight_at(i) == -1).unwrap();
        assert_eq!(out.get_accessor(retraction_idx).get_int_signed(0), 15);
        let insertion_idx = (0..out.length()).find(|&i| out.weight_at(i) == 1).unwrap();
        assert_eq!(out.get_accessor(insertion_idx).get_int_signed(0), 22);
    }

    #[test]
    fn group_emptying_out_emits_only_a_retraction() {
        let trace_out_schema = out_schema();
        let old_row = OwnedRowAccessor::new(trace_out_schema.clone(), vec![Value::I64(10)]);
        let trace_out = FixedTrace { schema: trace_out_schema, rows: vec![(0, old_row, 1)] };
        let trace_in = EmptyTrace(input_schema());

        let delta = batch(&[(5, -1, 0, 10)]);
        let out = reduce(&delta, &[0], out_schema(), || Box::new(SumI64::new(1)), &trace_in, &trace_out).unwrap();

        assert_eq!(out.length(), 1);
        assert_eq!(out.weight_at(0), -1);
    }
}
