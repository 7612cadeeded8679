//! The Aggregate protocol `reduce` accumulates groups through (spec.md
//! §4.12): `reset`, `step`, `merge_accumulated`, `get_value_bits`,
//! `is_linear`, `output_column_type`, `is_accumulator_zero`.

use crate::row_accessor::RowAccessor;
use crate::schema::ColumnType;

/// An incremental aggregate kernel. Implementations fold one group's rows
/// as a Δ streams through; linear aggregates (count, sum) additionally
/// support folding a prior accumulated value back in directly, which is
/// what lets `reduce` skip a full history replay on an update.
pub trait Aggregate {
    /// Clears accumulated state ahead of a fresh group.
    fn reset(&mut self);
    /// Folds one row into the accumulator with the given Z-set weight.
    fn step(&mut self, row: &dyn RowAccessor, weight: i64);
    /// Folds a previously accumulated value (as raw bits from
    /// `get_value_bits`) back into the accumulator, scaled by `weight`.
    /// Only called when `is_linear()` is true.
    fn merge_accumulated(&mut self, prior_bits: u64, weight: i64);
    /// The accumulator's current value, reinterpreted as `u64` bits — the
    /// representation `reduce`'s output trace stores.
    fn get_value_bits(&self) -> u64;
    /// Whether folding two partial accumulations together always equals
    /// folding their constituent rows directly. True for count/sum; false
    /// for min/max, where retracting the extreme value can only be
    /// resolved by rescanning the group's full history.
    fn is_linear(&self) -> bool;
    fn output_column_type(&self) -> ColumnType;
    fn is_accumulator_zero(&self) -> bool;
}

fn bits_to_i64(bits: u64) -> i64 {
    bits as i64
}

/// Sums a signed-integer payload column, weighted by each row's Z-set
/// weight — the canonical linear aggregate.
pub struct SumI64 {
    column: usize,
    total: i64,
}

impl SumI64 {
    pub fn new(column: usize) -> Self {
        SumI64 { column, total: 0 }
    }
}

impl Aggregate for SumI64 {
    fn reset(&mut self) {
        self.total = 0;
    }

    fn step(&mut self, row: &dyn RowAccessor, weight: i64) {
        if !row.is_null(self.column) {
            self.total += row.get_int_signed(self.column) * weight;
        }
    }

    fn merge_accumulated(&mut self, prior_bits: u64, weight: i64) {
        self.total += bits_to_i64(prior_bits) * weight;
    }

    fn get_value_bits(&self) -> u64 {
        self.total as u64
    }

    fn is_linear(&self) -> bool {
        true
    }

    fn output_column_type(&self) -> ColumnType {
        ColumnType::I64
    }

    fn is_accumulator_zero(&self) -> bool {
        self.total == 0
    }
}

/// Counts rows weighted by their Z-set weight, ignoring payload contents —
/// also linear.
#[derive(Default)]
pub struct CountRows {
    count: i64,
}

impl CountRows {
    pub fn new() -> Self {
        CountRows::default()
    }
}

impl Aggregate for CountRows {
    fn reset(&mut self) {
        self.count = 0;
    }

    fn step(&mut self, _row: &dyn RowAccessor, weight: i64) {
        self.count += weight;
    }

    fn merge_accumulated(&mut self, prior_bits: u64, weight: i64) {
        self.count += bits_to_i64(prior_bits) * weight;
    }

    fn get_value_bits(&self) -> u64 {
        self.count as u64
    }

    fn is_linear(&self) -> bool {
        true
    }

    fn output_column_type(&self) -> ColumnType {
        ColumnType::I64
    }

    fn is_accumulator_zero(&self) -> bool {
        self.count == 0
    }
}

/// Tracks the maximum of a signed-integer payload column among rows with
/// positive weight. Not linear: retracting the current maximum may expose
/// a smaller surviving value that only a full history replay can find.
pub struct MaxI64 {
    column: usize,
    current: Option<i64>,
}

impl MaxI64 {
    pub fn new(column: usize) -> Self {
        MaxI64 { column, current: None }
    }
}

impl Aggregate for MaxI64 {
    fn reset(&mut self) {
        self.current = None;
    }

    fn step(&mut self, row: &dyn RowAccessor, weight: i64) {
        if weight <= 0 || row.is_null(self.column) {
            return;
        }
        let v = row.get_int_signed(self.column);
        self.current = Some(self.current.map_or(v, |m| m.max(v)));
    }

    fn merge_accumulated(&mut self, _prior_bits: u64, _weight: i64) {
        unreachable!("MaxI64.is_linear() is false; reduce must replay history instead of merging");
    }

    fn get_value_bits(&self) -> u64 {
        self.current.unwrap_or(0) as u64
    }

    fn is_linear(&self) -> bool {
        false
    }

    fn output_column_type(&self) -> ColumnType {
        ColumnType::I64
    }

    fn is_accumulator_zero(&self) -> bool {
        self.current.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row_accessor::OwnedRowAccessor;
    use crate::schema::{ColumnType as CT, SchemaBuilder};
    use crate::value::Value;

    fn row(v: i64) -> OwnedRowAccessor {
        let schema = SchemaBuilder::new().pk("id", CT::U64).column("v", CT::I64, false).build().unwrap();
        OwnedRowAccessor::new(schema, vec![Value::I64(v)])
    }

    #[test]
    fn sum_accumulates_weighted_values() {
        let mut sum = SumI64::new(0);
        sum.step(&row(10), 1);
        sum.step(&row(5), -1);
        sum.step(&row(3), 2);
        assert_eq!(sum.get_value_bits() as i64, 11);
        assert!(!sum.is_accumulator_zero());
    }

    #[test]
    fn sum_merge_accumulated_matches_direct_accumulation() {
        let mut direct = SumI64::new(0);
        direct.step(&row(10), 1);
        direct.step(&row(7), 1);

        let mut merged = SumI64::new(0);
        merged.step(&row(10), 1);
        merged.merge_accumulated(7, 1);

        assert_eq!(direct.get_value_bits(), merged.get_value_bits());
    }

    #[test]
    fn count_rows_is_linear_and_tracks_net_weight() {
        let mut count = CountRows::new();
        count.step(&row(0), 1);
        count.step(&row(0), 1);
        count.step(&row(0), -1);
        assert_eq!(count.get_value_bits() as i64, 1);
        assert!(count.is_linear());
    }

    #[test]
    fn max_ignores_negatively_weighted_rows_and_is_non_linear() {
        let mut max = MaxI64::new(0);
        max.step(&row(5), 1);
        max.step(&row(9), 1);
        max.step(&row(100), -1);
        assert_eq!(max.get_value_bits() as i64, 9);
        assert!(!max.is_linear());
    }
}
