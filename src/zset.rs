//! The Z-Set batch: an arena-backed record batch with sort/consolidate
//! (spec.md §4.4).
//!
//! Grounded on the discipline of `nitrite-fjall-adapter::wrapper` (explicit,
//! length-prefixed byte encoding with no hidden allocation) but generalized
//! to the raw-arena-plus-parallel-arrays layout spec.md requires, since the
//! teacher stores one `Value` per cell rather than a packed columnar row.

use crate::arena::Arena;
use crate::row_accessor::{compare_rows, PackedRowAccessor, RowAccessor};
use crate::schema::Schema;
use std::cmp::Ordering;
use std::mem;

/// An arena-backed, append-only multiset batch: a packed-row arena, a
/// companion blob heap, and parallel `pk[]`/`weight[]`/`null_word[]`
/// vectors — one triple of scalars per record, indexing into the arena.
pub struct ArenaZSetBatch {
    schema: Schema,
    record_arena: Arena,
    blob_heap: Arena,
    pk: Vec<u128>,
    weight: Vec<i64>,
    null_word: Vec<u64>,
    row_offset: Vec<u32>,
    sorted: bool,
}

impl ArenaZSetBatch {
    pub fn new(schema: Schema) -> Self {
        Self::with_capacity(schema, 64 * 1024, 16 * 1024)
    }

    pub fn with_capacity(schema: Schema, arena_capacity: usize, blob_capacity: usize) -> Self {
        ArenaZSetBatch {
            schema,
            record_arena: Arena::with_capacity(arena_capacity),
            blob_heap: Arena::with_capacity(blob_capacity),
            pk: Vec::new(),
            weight: Vec::new(),
            null_word: Vec::new(),
            row_offset: Vec::new(),
            sorted: true,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Serializes `acc`'s payload and appends `(pk, weight)`. Marks the
    /// batch unsorted.
    pub fn append(&mut self, pk: u128, weight: i64, acc: &dyn RowAccessor) -> crate::error::GnitzResult<()> {
        let offset = self.record_arena.allocate(self.schema.stride())?;
        let null_word = crate::serialize::serialize(&self.schema, acc, &mut self.record_arena, offset, &mut self.blob_heap)?;
        self.pk.push(pk);
        self.weight.push(weight);
        self.null_word.push(null_word);
        self.row_offset.push(offset);
        self.sorted = false;
        Ok(())
    }

    pub fn length(&self) -> usize {
        self.pk.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pk.is_empty()
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn pk_at(&self, i: usize) -> u128 {
        self.pk[i]
    }

    pub fn weight_at(&self, i: usize) -> i64 {
        self.weight[i]
    }

    pub fn get_accessor(&self, i: usize) -> PackedRowAccessor<'_> {
        PackedRowAccessor::new(&self.schema, &self.record_arena, self.row_offset[i], self.null_word[i], &self.blob_heap)
    }

    /// Clears all records but keeps the underlying arenas allocated, for
    /// the common "reuse a scratch batch across ticks" pattern.
    pub fn clear(&mut self) {
        self.record_arena.clear();
        self.blob_heap.clear();
        self.pk.clear();
        self.weight.clear();
        self.null_word.clear();
        self.row_offset.clear();
        self.sorted = true;
    }

    /// Clears and drops the arenas' backing storage outright.
    pub fn free(&mut self) {
        self.clear();
        self.record_arena = Arena::with_capacity(0);
        self.blob_heap = Arena::with_capacity(0);
        self.pk.shrink_to_fit();
        self.weight.shrink_to_fit();
        self.null_word.shrink_to_fit();
        self.row_offset.shrink_to_fit();
    }

    /// Orders records by `(pk, payload-lex)`, stably. Does not touch the
    /// record arena's bytes — only the parallel index arrays are permuted.
    pub fn sort(&mut self) {
        let n = self.pk.len();
        let mut idx: Vec<usize> = (0..n).collect();
        {
            let schema = &self.schema;
            let record_arena = &self.record_arena;
            let blob_heap = &self.blob_heap;
            let row_offset = &self.row_offset;
            let null_word = &self.null_word;
            let pk = &self.pk;
            idx.sort_by(|&i, &j| {
                pk[i].cmp(&pk[j]).then_with(|| {
                    let a = PackedRowAccessor::new(schema, record_arena, row_offset[i], null_word[i], blob_heap);
                    let b = PackedRowAccessor::new(schema, record_arena, row_offset[j], null_word[j], blob_heap);
                    compare_rows(&a, &b)
                })
            });
        }
        self.apply_permutation(&idx);
        self.sorted = true;
    }

    fn apply_permutation(&mut self, idx: &[usize]) {
        let old_pk = mem::take(&mut self.pk);
        let old_weight = mem::take(&mut self.weight);
        let old_null = mem::take(&mut self.null_word);
        let old_offset = mem::take(&mut self.row_offset);
        self.pk = idx.iter().map(|&i| old_pk[i]).collect();
        self.weight = idx.iter().map(|&i| old_weight[i]).collect();
        self.null_word = idx.iter().map(|&i| old_null[i]).collect();
        self.row_offset = idx.iter().map(|&i| old_offset[i]).collect();
    }

    fn payload_eq(&self, i: usize, j: usize) -> bool {
        compare_rows(&self.get_accessor(i), &self.get_accessor(j)) == Ordering::Equal
    }

    /// Requires `is_sorted()`. Folds adjacent records sharing `(pk,
    /// payload)` by summing weights and drops any run whose net weight is
    /// 0 (ghost pruning). Preserves sortedness.
    pub fn consolidate(&mut self) {
        assert!(self.sorted, "consolidate requires a sorted batch");
        let n = self.pk.len();
        let mut new_pk = Vec::with_capacity(n);
        let mut new_weight = Vec::with_capacity(n);
        let mut new_null = Vec::with_capacity(n);
        let mut new_offset = Vec::with_capacity(n);

        let mut i = 0;
        while i < n {
            let mut j = i + 1;
            let mut total = self.weight[i];
            while j < n && self.pk[j] == self.pk[i] && self.payload_eq(i, j) {
                total += self.weight[j];
                j += 1;
            }
            if total != 0 {
                new_pk.push(self.pk[i]);
                new_weight.push(total);
                new_null.push(self.null_word[i]);
                new_offset.push(self.row_offset[i]);
            }
            i = j;
        }

        self.pk = new_pk;
        self.weight = new_weight;
        self.null_word = new_null;
        self.row_offset = new_offset;
        self.sorted = true;
    }

    /// Total algebraic weight in the batch — used by tests asserting the
    /// multiset-sum invariant is preserved across sort/consolidate.
    pub fn total_weight(&self) -> i64 {
        self.weight.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row_accessor::OwnedRowAccessor;
    use crate::schema::{ColumnType, SchemaBuilder};
    use crate::value::Value;

    fn schema() -> Schema {
        SchemaBuilder::new()
            .pk("id", ColumnType::U64)
            .column("label", ColumnType::String, false)
            .build()
            .unwrap()
    }

    fn row(schema: &Schema, label: &str) -> OwnedRowAccessor {
        OwnedRowAccessor::new(schema.clone(), vec![Value::Str(label.to_string())])
    }

    #[test]
    fn sort_then_consolidate_merges_equal_rows_and_drops_ghosts() {
        let schema = schema();
        let mut batch = ArenaZSetBatch::new(schema.clone());
        batch.append(1, 1, &row(&schema, "A")).unwrap();
        batch.append(1, 1, &row(&schema, "A")).unwrap();
        batch.append(1, 1, &row(&schema, "B")).unwrap();
        batch.append(1, -1, &row(&schema, "A")).unwrap();

        batch.sort();
        batch.consolidate();

        assert_eq!(batch.length(), 2);
        let mut seen = Vec::new();
        for i in 0..batch.length() {
            let acc = batch.get_accessor(i);
            seen.push((acc.get_str_struct(0).content_bytes().to_vec(), batch.weight_at(i)));
        }
        assert!(seen.contains(&(b"A".to_vec(), 1)));
        assert!(seen.contains(&(b"B".to_vec(), 1)));
    }

    #[test]
    fn consolidate_preserves_multiset_sum() {
        let schema = schema();
        let mut batch = ArenaZSetBatch::new(schema.clone());
        batch.append(1, 3, &row(&schema, "A")).unwrap();
        batch.append(1, -2, &row(&schema, "A")).unwrap();
        batch.append(2, 5, &row(&schema, "C")).unwrap();
        let sum_before = batch.total_weight();

        batch.sort();
        batch.consolidate();
        assert_eq!(batch.total_weight(), sum_before);
    }

    #[test]
    fn no_adjacent_record_shares_key_after_consolidate() {
        let schema = schema();
        let mut batch = ArenaZSetBatch::new(schema.clone());
        for _ in 0..5 {
            batch.append(7, 1, &row(&schema, "X")).unwrap();
        }
        batch.sort();
        batch.consolidate();
        assert_eq!(batch.length(), 1);
        assert_eq!(batch.weight_at(0), 5);
    }

    #[test]
    fn clear_resets_length_but_keeps_capacity() {
        let schema = schema();
        let mut batch = ArenaZSetBatch::new(schema.clone());
        batch.append(1, 1, &row(&schema, "A")).unwrap();
        batch.clear();
        assert_eq!(batch.length(), 0);
        assert!(batch.is_sorted());
    }
}
