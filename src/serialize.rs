//! Row serialization and hashing (spec.md §4.3).

use crate::arena::{Arena, ByteSource};
use crate::row_accessor::{OwnedRowAccessor, PackedRowAccessor, RowAccessor};
use crate::schema::{ColumnType, Schema};
use crate::strcodec;
use xxhash_rust::xxh3::xxh3_64;

/// Total blob bytes `serialize` will need to allocate for long strings in
/// `acc`'s payload columns.
pub fn heap_size(schema: &Schema, acc: &dyn RowAccessor) -> usize {
    let mut total = 0usize;
    for (payload_col, col) in schema.payload_columns() {
        if col.ty != ColumnType::String || acc.is_null(payload_col) {
            continue;
        }
        let len = acc.get_str_struct(payload_col).length as usize;
        if len > 12 {
            total += len;
        }
    }
    total
}

/// Writes `acc`'s payload row into `dest` at `dest_offset` (a `schema.stride()`-
/// byte region), allocating long-string bytes from `blob` as needed. Returns
/// the null-word bitset (payload-column-indexed) to be stored alongside the
/// row in the parallel `null_word[]` array.
pub fn serialize(
    schema: &Schema,
    acc: &dyn RowAccessor,
    dest: &mut Arena,
    dest_offset: u32,
    blob: &mut Arena,
) -> crate::error::GnitzResult<u64> {
    let mut null_word: u64 = 0;
    for (payload_col, col) in schema.payload_columns() {
        let schema_col = schema.schema_index_of_payload(payload_col);
        let offset = dest_offset + schema.offset_of(schema_col) as u32;

        if acc.is_null(payload_col) {
            debug_assert!(col.nullable, "non-nullable column produced a null value");
            null_word |= 1 << payload_col;
            continue;
        }

        match col.ty {
            ColumnType::I8 => dest.write_i8(offset, acc.get_int_signed(payload_col) as i8),
            ColumnType::I16 => dest.write_i16_le(offset, acc.get_int_signed(payload_col) as i16),
            ColumnType::I32 => dest.write_i32_le(offset, acc.get_int_signed(payload_col) as i32),
            ColumnType::I64 => dest.write_i64_le(offset, acc.get_int_signed(payload_col)),
            ColumnType::U8 => dest.write_u8(offset, acc.get_int(payload_col) as u8),
            ColumnType::U16 => dest.write_u16_le(offset, acc.get_int(payload_col) as u16),
            ColumnType::U32 => dest.write_u32_le(offset, acc.get_int(payload_col) as u32),
            ColumnType::U64 => dest.write_u64_le(offset, acc.get_int(payload_col)),
            ColumnType::U128 => dest.write_u128_le(offset, acc.get_u128(payload_col)),
            ColumnType::F32 => dest.write_f32_le(offset, acc.get_float(payload_col) as f32),
            ColumnType::F64 => dest.write_f64_le(offset, acc.get_float(payload_col)),
            ColumnType::String => {
                let view = acc.get_str_struct(payload_col);
                let bytes = view.content_bytes();
                let heap_offset = if bytes.len() > 12 {
                    Some(blob.allocate_from_slice(bytes)? as u64)
                } else {
                    None
                };
                strcodec::pack(dest, offset, bytes, heap_offset);
            }
        }
    }
    Ok(null_word)
}

/// Inverse of [`serialize`]: reads a packed row back into an owned,
/// self-contained accessor.
pub fn deserialize(
    schema: &Schema,
    payload: &dyn ByteSource,
    base_offset: u32,
    heap: &dyn ByteSource,
    null_word: u64,
) -> OwnedRowAccessor {
    let packed = PackedRowAccessor::new(schema, payload, base_offset, null_word, heap);
    OwnedRowAccessor::from_accessor(schema.clone(), &packed)
}

/// Canonicalizes `acc`'s payload columns into `scratch` (cleared first) and
/// returns the XXH3-64 hash of the canonical bytes.
///
/// The canonical form is representation-independent: per column, a null
/// flag byte, then (if not null) the value padded to the column's natural
/// alignment — strings are always emitted as `length` followed by content
/// bytes, never as a prefix+offset header, so two accessors backed by
/// different physical representations of the same logical row hash
/// identically (spec.md §4.3, §8 "Hash stability").
pub fn stable_hash(schema: &Schema, acc: &dyn RowAccessor, scratch: &mut Vec<u8>) -> u64 {
    scratch.clear();
    for (payload_col, col) in schema.payload_columns() {
        let null = acc.is_null(payload_col);
        scratch.push(null as u8);
        if null {
            continue;
        }
        pad_to(scratch, col.ty.align());
        match col.ty {
            ColumnType::I8 => scratch.push(acc.get_int_signed(payload_col) as i8 as u8),
            ColumnType::I16 => scratch.extend_from_slice(&(acc.get_int_signed(payload_col) as i16).to_le_bytes()),
            ColumnType::I32 => scratch.extend_from_slice(&(acc.get_int_signed(payload_col) as i32).to_le_bytes()),
            ColumnType::I64 => scratch.extend_from_slice(&acc.get_int_signed(payload_col).to_le_bytes()),
            ColumnType::U8 => scratch.push(acc.get_int(payload_col) as u8),
            ColumnType::U16 => scratch.extend_from_slice(&(acc.get_int(payload_col) as u16).to_le_bytes()),
            ColumnType::U32 => scratch.extend_from_slice(&(acc.get_int(payload_col) as u32).to_le_bytes()),
            ColumnType::U64 => scratch.extend_from_slice(&acc.get_int(payload_col).to_le_bytes()),
            ColumnType::U128 => scratch.extend_from_slice(&acc.get_u128(payload_col).to_le_bytes()),
            ColumnType::F32 => scratch.extend_from_slice(&(acc.get_float(payload_col) as f32).to_le_bytes()),
            ColumnType::F64 => scratch.extend_from_slice(&acc.get_float(payload_col).to_le_bytes()),
            ColumnType::String => {
                let view = acc.get_str_struct(payload_col);
                scratch.extend_from_slice(&view.length.to_le_bytes());
                scratch.extend_from_slice(view.content_bytes());
            }
        }
    }
    xxh3_64(scratch)
}

fn pad_to(buf: &mut Vec<u8>, align: usize) {
    let rem = buf.len() % align;
    if rem != 0 {
        buf.resize(buf.len() + (align - rem), 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row_accessor::compare_rows;
    use crate::schema::SchemaBuilder;
    use crate::value::Value;

    fn schema() -> Schema {
        SchemaBuilder::new()
            .pk("id", ColumnType::U64)
            .column("label", ColumnType::String, true)
            .column("score", ColumnType::I64, false)
            .build()
            .unwrap()
    }

    #[test]
    fn round_trip_preserves_fields() {
        let schema = schema();
        let owned = OwnedRowAccessor::new(
            schema.clone(),
            vec![Value::Str("a rather long string value over twelve bytes".into()), Value::I64(-42)],
        );
        let mut dest = Arena::with_capacity(1024);
        let mut blob = Arena::with_capacity(1024);
        let offset = dest.allocate(schema.stride() as usize).unwrap();
        let null_word = serialize(&schema, &owned, &mut dest, offset, &mut blob).unwrap();

        let back = deserialize(&schema, &dest, offset, &blob, null_word);
        assert_eq!(compare_rows(&owned, &back), std::cmp::Ordering::Equal);
        assert_eq!(back.get_int_signed(1), -42);
    }

    #[test]
    fn null_round_trips() {
        let schema = schema();
        let owned = OwnedRowAccessor::new(schema.clone(), vec![Value::Null, Value::I64(7)]);
        let mut dest = Arena::with_capacity(256);
        let mut blob = Arena::with_capacity(256);
        let offset = dest.allocate(schema.stride() as usize).unwrap();
        let null_word = serialize(&schema, &owned, &mut dest, offset, &mut blob).unwrap();
        assert_eq!(null_word, 0b1);
        let back = deserialize(&schema, &dest, offset, &blob, null_word);
        assert!(back.is_null(0));
    }

    #[test]
    fn hash_is_stable_across_owned_and_packed_representations() {
        let schema = schema();
        let owned = OwnedRowAccessor::new(
            schema.clone(),
            vec![Value::Str("hello".into()), Value::I64(99)],
        );
        let mut dest = Arena::with_capacity(256);
        let mut blob = Arena::with_capacity(256);
        let offset = dest.allocate(schema.stride() as usize).unwrap();
        let null_word = serialize(&schema, &owned, &mut dest, offset, &mut blob).unwrap();
        let packed = PackedRowAccessor::new(&schema, &dest, offset, null_word, &blob);

        let mut scratch = Vec::new();
        let h1 = stable_hash(&schema, &owned, &mut scratch);
        let h2 = stable_hash(&schema, &packed, &mut scratch);
        assert_eq!(h1, h2);
    }

    #[test]
    fn mutating_a_column_changes_the_hash() {
        let schema = schema();
        let a = OwnedRowAccessor::new(schema.clone(), vec![Value::Str("x".into()), Value::I64(1)]);
        let b = OwnedRowAccessor::new(schema.clone(), vec![Value::Str("x".into()), Value::I64(2)]);
        let mut scratch = Vec::new();
        let h1 = stable_hash(&schema, &a, &mut scratch);
        let h2 = stable_hash(&schema, &b, &mut scratch);
        assert_ne!(h1, h2);
    }

    #[test]
    fn heap_size_counts_only_long_strings() {
        let schema = schema();
        let short = OwnedRowAccessor::new(schema.clone(), vec![Value::Str("hi".into()), Value::I64(1)]);
        let long = OwnedRowAccessor::new(
            schema.clone(),
            vec![Value::Str("this is definitely over twelve bytes long".into()), Value::I64(1)],
        );
        assert_eq!(heap_size(&schema, &short), 0);
        assert!(heap_size(&schema, &long) > 12);
    }
}
