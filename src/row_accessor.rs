//! Polymorphic row accessors (spec.md §4.1, §9).
//!
//! A row accessor is a small trait with five read methods; every "row
//! shape" in the engine — a row built field-by-field in memory, a row read
//! zero-copy out of a batch or shard, a composite formed by concatenating
//! two accessors for a join, and a reusable output sink for `op_map` — is
//! just a different implementation of it. Generalizes the teacher's
//! dynamic `Document`/`Value` accessor pattern to a fixed physical schema.

use crate::arena::{Arena, ByteSource};
use crate::schema::{ColumnType, Schema};
use crate::strcodec::{self, StrView};
use crate::value::Value;
use std::cmp::Ordering;

/// Read-only view over one row's payload columns.
///
/// All methods are indexed by *payload* column (spec.md §4.1: "the null
/// bitset... index i = payload-column index, not schema-column index").
/// Reading a column whose physical type does not match the accessor method
/// is a caller bug — schema is assumed validated ahead of time, so these
/// methods panic on mismatch rather than returning a `Result`.
pub trait RowAccessor {
    fn schema(&self) -> &Schema;
    fn is_null(&self, payload_col: usize) -> bool;
    fn get_int(&self, payload_col: usize) -> u64;
    fn get_int_signed(&self, payload_col: usize) -> i64;
    fn get_float(&self, payload_col: usize) -> f64;
    fn get_u128(&self, payload_col: usize) -> u128;
    fn get_str_struct(&self, payload_col: usize) -> StrView<'_>;

    /// Materializes one column as an owned [`Value`], honoring `is_null`.
    /// Not on the zero-copy hot path; used by recovery/debugging code and
    /// by [`OwnedRowAccessor::from_accessor`].
    fn get_value(&self, payload_col: usize) -> Value {
        if self.is_null(payload_col) {
            return Value::Null;
        }
        match self.schema().column_type_of_payload(payload_col) {
            ColumnType::I8 => Value::I8(self.get_int_signed(payload_col) as i8),
            ColumnType::I16 => Value::I16(self.get_int_signed(payload_col) as i16),
            ColumnType::I32 => Value::I32(self.get_int_signed(payload_col) as i32),
            ColumnType::I64 => Value::I64(self.get_int_signed(payload_col)),
            ColumnType::U8 => Value::U8(self.get_int(payload_col) as u8),
            ColumnType::U16 => Value::U16(self.get_int(payload_col) as u16),
            ColumnType::U32 => Value::U32(self.get_int(payload_col) as u32),
            ColumnType::U64 => Value::U64(self.get_int(payload_col)),
            ColumnType::U128 => Value::U128(self.get_u128(payload_col)),
            ColumnType::F32 => Value::F32(self.get_float(payload_col) as f32),
            ColumnType::F64 => Value::F64(self.get_float(payload_col)),
            ColumnType::String => {
                let view = self.get_str_struct(payload_col);
                Value::Str(String::from_utf8_lossy(view.content_bytes()).into_owned())
            }
        }
    }
}

/// Lexicographic comparison over payload columns, per spec.md §4.1: NULL
/// sorts strictly less than any value, two NULLs compare equal, floats use
/// the pinned total order from [`crate::value::total_cmp_f64`].
pub fn compare_rows(a: &dyn RowAccessor, b: &dyn RowAccessor) -> Ordering {
    debug_assert_eq!(a.schema().payload_count(), b.schema().payload_count());
    for col in 0..a.schema().payload_count() {
        let ord = compare_column(a, b, col);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_column(a: &dyn RowAccessor, b: &dyn RowAccessor, col: usize) -> Ordering {
    let a_null = a.is_null(col);
    let b_null = b.is_null(col);
    match (a_null, b_null) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        (false, false) => {}
    }
    match a.schema().column_type_of_payload(col) {
        ColumnType::String => {
            let av = a.get_str_struct(col);
            let bv = b.get_str_struct(col);
            strcodec::compare(&av, &bv)
        }
        ColumnType::U128 => a.get_u128(col).cmp(&b.get_u128(col)),
        ty if ty.is_signed() => a.get_int_signed(col).cmp(&b.get_int_signed(col)),
        ty if ty.is_float() => crate::value::total_cmp_f64(a.get_float(col), b.get_float(col)),
        _ => a.get_int(col).cmp(&b.get_int(col)),
    }
}

// ---------------------------------------------------------------------
// OwnedRowAccessor
// ---------------------------------------------------------------------

/// A payload row built column-by-column in memory, ahead of serialization.
#[derive(Clone)]
pub struct OwnedRowAccessor {
    schema: Schema,
    values: Vec<Value>,
}

impl OwnedRowAccessor {
    pub fn new(schema: Schema, values: Vec<Value>) -> Self {
        debug_assert_eq!(values.len(), schema.payload_count());
        OwnedRowAccessor { schema, values }
    }

    pub fn from_accessor(schema: Schema, acc: &dyn RowAccessor) -> Self {
        let values = (0..schema.payload_count()).map(|c| acc.get_value(c)).collect();
        OwnedRowAccessor { schema, values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl RowAccessor for OwnedRowAccessor {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn is_null(&self, payload_col: usize) -> bool {
        self.values[payload_col].is_null()
    }

    fn get_int(&self, payload_col: usize) -> u64 {
        self.values[payload_col].as_u128().unwrap_or(0) as u64
    }

    fn get_int_signed(&self, payload_col: usize) -> i64 {
        self.values[payload_col].as_i64().unwrap_or(0)
    }

    fn get_float(&self, payload_col: usize) -> f64 {
        self.values[payload_col].as_f64().unwrap_or(0.0)
    }

    fn get_u128(&self, payload_col: usize) -> u128 {
        self.values[payload_col].as_u128().unwrap_or(0)
    }

    fn get_str_struct(&self, payload_col: usize) -> StrView<'_> {
        StrView::from_owned(self.values[payload_col].as_str().unwrap_or(""))
    }
}

// ---------------------------------------------------------------------
// PackedRowAccessor
// ---------------------------------------------------------------------

/// Zero-copy read of a packed row directly out of a batch's record arena
/// or a shard's mmapped column regions.
pub struct PackedRowAccessor<'a> {
    schema: &'a Schema,
    payload: &'a dyn ByteSource,
    base_offset: u32,
    null_word: u64,
    heap: &'a dyn ByteSource,
}

impl<'a> PackedRowAccessor<'a> {
    pub fn new(
        schema: &'a Schema,
        payload: &'a dyn ByteSource,
        base_offset: u32,
        null_word: u64,
        heap: &'a dyn ByteSource,
    ) -> Self {
        PackedRowAccessor { schema, payload, base_offset, null_word, heap }
    }

    fn col_offset(&self, payload_col: usize) -> u32 {
        let schema_col = self.schema.schema_index_of_payload(payload_col);
        self.base_offset + self.schema.offset_of(schema_col) as u32
    }
}

impl<'a> RowAccessor for PackedRowAccessor<'a> {
    fn schema(&self) -> &Schema {
        self.schema
    }

    fn is_null(&self, payload_col: usize) -> bool {
        (self.null_word >> payload_col) & 1 == 1
    }

    fn get_int(&self, payload_col: usize) -> u64 {
        let off = self.col_offset(payload_col);
        match self.schema.column_type_of_payload(payload_col) {
            ColumnType::U8 => self.payload.read_u8(off) as u64,
            ColumnType::U16 => self.payload.read_u16_le(off) as u64,
            ColumnType::U32 => self.payload.read_u32_le(off) as u64,
            ColumnType::U64 => self.payload.read_u64_le(off),
            _ => panic!("get_int called on non-unsigned-integer column"),
        }
    }

    fn get_int_signed(&self, payload_col: usize) -> i64 {
        let off = self.col_offset(payload_col);
        match self.schema.column_type_of_payload(payload_col) {
            ColumnType::I8 => self.payload.read_i8(off) as i64,
            ColumnType::I16 => self.payload.read_i16_le(off) as i64,
            ColumnType::I32 => self.payload.read_i32_le(off) as i64,
            ColumnType::I64 => self.payload.read_i64_le(off),
            _ => panic!("get_int_signed called on non-signed-integer column"),
        }
    }

    fn get_float(&self, payload_col: usize) -> f64 {
        let off = self.col_offset(payload_col);
        match self.schema.column_type_of_payload(payload_col) {
            ColumnType::F32 => self.payload.read_f32_le(off) as f64,
            ColumnType::F64 => self.payload.read_f64_le(off),
            _ => panic!("get_float called on non-float column"),
        }
    }

    fn get_u128(&self, payload_col: usize) -> u128 {
        let off = self.col_offset(payload_col);
        self.payload.read_u128_le(off)
    }

    fn get_str_struct(&self, payload_col: usize) -> StrView<'_> {
        let off = self.col_offset(payload_col);
        let heap = self.heap;
        StrView::from_packed(self.payload, off, move |heap_off, len| {
            heap.read_bytes(heap_off as u32, len)
        })
    }
}

/// Reads the PK column directly, given the batch/shard's PK byte source
/// (the `pk[]` parallel array, not the payload row — PK is never part of
/// the payload stride, per spec.md §3).
pub fn read_pk_u128(schema: &Schema, pk_bytes: &dyn ByteSource, index: usize) -> u128 {
    let width: u32 = if schema.pk_is_u128() { 16 } else { 8 };
    let offset = index as u32 * width;
    if schema.pk_is_u128() {
        pk_bytes.read_u128_le(offset)
    } else {
        pk_bytes.read_u64_le(offset) as u128
    }
}

// ---------------------------------------------------------------------
// CompositeRowAccessor
// ---------------------------------------------------------------------

/// Concatenates two accessors under a merged schema, used by the join
/// kernels to present `(left columns, right columns)` as one row without
/// copying either side.
pub struct CompositeRowAccessor<'a> {
    schema: &'a Schema,
    left: &'a dyn RowAccessor,
    left_payload_count: usize,
    right: &'a dyn RowAccessor,
}

impl<'a> CompositeRowAccessor<'a> {
    pub fn new(schema: &'a Schema, left: &'a dyn RowAccessor, right: &'a dyn RowAccessor) -> Self {
        CompositeRowAccessor {
            schema,
            left_payload_count: left.schema().payload_count(),
            left,
            right,
        }
    }

    fn route(&self, payload_col: usize) -> (&dyn RowAccessor, usize) {
        if payload_col < self.left_payload_count {
            (self.left, payload_col)
        } else {
            (self.right, payload_col - self.left_payload_count)
        }
    }
}

impl<'a> RowAccessor for CompositeRowAccessor<'a> {
    fn schema(&self) -> &Schema {
        self.schema
    }

    fn is_null(&self, payload_col: usize) -> bool {
        let (acc, col) = self.route(payload_col);
        acc.is_null(col)
    }

    fn get_int(&self, payload_col: usize) -> u64 {
        let (acc, col) = self.route(payload_col);
        acc.get_int(col)
    }

    fn get_int_signed(&self, payload_col: usize) -> i64 {
        let (acc, col) = self.route(payload_col);
        acc.get_int_signed(col)
    }

    fn get_float(&self, payload_col: usize) -> f64 {
        let (acc, col) = self.route(payload_col);
        acc.get_float(col)
    }

    fn get_u128(&self, payload_col: usize) -> u128 {
        let (acc, col) = self.route(payload_col);
        acc.get_u128(col)
    }

    fn get_str_struct(&self, payload_col: usize) -> StrView<'_> {
        let (acc, col) = self.route(payload_col);
        acc.get_str_struct(col)
    }
}

// ---------------------------------------------------------------------
// MapOutputAccessor
// ---------------------------------------------------------------------

/// A reusable sink for `op_map`: written via an append-style API, then
/// read back through the normal [`RowAccessor`] interface, so the map
/// kernel can produce one row per input without allocating a fresh
/// accessor each time (spec.md §4.1).
pub struct MapOutputAccessor {
    schema: Schema,
    values: Vec<Value>,
}

impl MapOutputAccessor {
    pub fn new(schema: Schema) -> Self {
        let n = schema.payload_count();
        MapOutputAccessor { schema, values: vec![Value::Null; n] }
    }

    /// Clears the buffer ahead of writing the next row's columns.
    pub fn reset(&mut self) {
        for v in &mut self.values {
            *v = Value::Null;
        }
    }

    pub fn set(&mut self, payload_col: usize, value: Value) {
        self.values[payload_col] = value;
    }

    pub fn as_owned(&self) -> OwnedRowAccessor {
        OwnedRowAccessor::new(self.schema.clone(), self.values.clone())
    }
}

impl RowAccessor for MapOutputAccessor {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn is_null(&self, payload_col: usize) -> bool {
        self.values[payload_col].is_null()
    }

    fn get_int(&self, payload_col: usize) -> u64 {
        self.values[payload_col].as_u128().unwrap_or(0) as u64
    }

    fn get_int_signed(&self, payload_col: usize) -> i64 {
        self.values[payload_col].as_i64().unwrap_or(0)
    }

    fn get_float(&self, payload_col: usize) -> f64 {
        self.values[payload_col].as_f64().unwrap_or(0.0)
    }

    fn get_u128(&self, payload_col: usize) -> u128 {
        self.values[payload_col].as_u128().unwrap_or(0)
    }

    fn get_str_struct(&self, payload_col: usize) -> StrView<'_> {
        StrView::from_owned(self.values[payload_col].as_str().unwrap_or(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnType, SchemaBuilder};

    fn schema() -> Schema {
        SchemaBuilder::new()
            .pk("id", ColumnType::U64)
            .column("label", ColumnType::String, true)
            .column("score", ColumnType::I64, false)
            .build()
            .unwrap()
    }

    #[test]
    fn null_sorts_before_any_value() {
        let s = schema();
        let a = OwnedRowAccessor::new(s.clone(), vec![Value::Null, Value::I64(5)]);
        let b = OwnedRowAccessor::new(s, vec![Value::Str("x".into()), Value::I64(5)]);
        assert_eq!(compare_rows(&a, &b), Ordering::Less);
    }

    #[test]
    fn two_nulls_compare_equal_on_that_column() {
        let s = schema();
        let a = OwnedRowAccessor::new(s.clone(), vec![Value::Null, Value::I64(1)]);
        let b = OwnedRowAccessor::new(s, vec![Value::Null, Value::I64(2)]);
        assert_eq!(compare_rows(&a, &b), Ordering::Less);
    }

    #[test]
    fn composite_routes_to_correct_side() {
        let left = SchemaBuilder::new().pk("id", ColumnType::U64).column("a", ColumnType::I64, false).build().unwrap();
        let right = SchemaBuilder::new().pk("id", ColumnType::U64).column("b", ColumnType::I64, false).build().unwrap();
        let merged = SchemaBuilder::new()
            .pk("id", ColumnType::U64)
            .column("a", ColumnType::I64, false)
            .column("b", ColumnType::I64, false)
            .build()
            .unwrap();
        let l = OwnedRowAccessor::new(left, vec![Value::I64(10)]);
        let r = OwnedRowAccessor::new(right, vec![Value::I64(20)]);
        let composite = CompositeRowAccessor::new(&merged, &l, &r);
        assert_eq!(composite.get_int_signed(0), 10);
        assert_eq!(composite.get_int_signed(1), 20);
    }

    #[test]
    fn map_output_accessor_is_reusable() {
        let s = schema();
        let mut out = MapOutputAccessor::new(s);
        out.set(0, Value::Str("first".into()));
        out.set(1, Value::I64(1));
        assert_eq!(out.get_str_struct(0).content_bytes(), b"first");
        out.reset();
        out.set(0, Value::Str("second".into()));
        out.set(1, Value::I64(2));
        assert_eq!(out.get_str_struct(0).content_bytes(), b"second");
    }
}
