//! Read-only, memory-mapped view over a finalized shard file.

use super::{RegionDesc, SHARD_FORMAT_VERSION, SHARD_MAGIC};
use crate::cursor::RowCursor;
use crate::error::{GnitzError, GnitzResult};
use crate::row_accessor::RowAccessor;
use crate::schema::{ColumnType, Schema};
use crate::strcodec::StrView;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

const HEADER_LEN: usize = 80;

/// A shard opened read-only and mmapped for zero-copy access.
///
/// Grounded on the wider pack's `memmap2`-backed read views: the whole file
/// is mapped once at `open` and every accessor/cursor borrows directly out
/// of that mapping, matching the teacher's zero-copy-read discipline from
/// `nitrite-fjall-adapter::store` applied to a columnar layout instead of
/// fjall's own LSM values.
pub struct ShardView {
    schema: Schema,
    mmap: Mmap,
    row_count: u64,
    min_key: u128,
    max_key: u128,
    min_lsn: u64,
    max_lsn: u64,
    pk_region: RegionDesc,
    weight_region: RegionDesc,
    null_region: RegionDesc,
    column_regions: Vec<RegionDesc>,
    blob_region: RegionDesc,
}

impl ShardView {
    /// Opens and validates `path` against `schema`. Fails with
    /// [`crate::error::ErrorKind::CorruptShard`] on a magic/version
    /// mismatch, a column-count mismatch against `schema`, or a region
    /// whose stored checksum doesn't match its bytes.
    pub fn open(path: impl AsRef<Path>, schema: Schema) -> GnitzResult<Self> {
        let file = File::open(path.as_ref())?;
        let mmap = unsafe { Mmap::map(&file)? };
        if mmap.len() < HEADER_LEN {
            return Err(GnitzError::corrupt_shard("shard file shorter than its header"));
        }

        let magic = u64::from_le_bytes(mmap[0..8].try_into().unwrap());
        if magic != SHARD_MAGIC {
            return Err(GnitzError::corrupt_shard("bad shard magic"));
        }
        let format_version = u32::from_le_bytes(mmap[8..12].try_into().unwrap());
        if format_version != SHARD_FORMAT_VERSION {
            return Err(GnitzError::corrupt_shard(format!(
                "unsupported shard format version {format_version}"
            )));
        }
        let pk_is_u128 = mmap[12] != 0;
        if pk_is_u128 != schema.pk_is_u128() {
            return Err(GnitzError::corrupt_shard("shard pk width does not match schema"));
        }
        let row_count = u64::from_le_bytes(mmap[16..24].try_into().unwrap());
        let min_key = u128::from_le_bytes(mmap[24..40].try_into().unwrap());
        let max_key = u128::from_le_bytes(mmap[40..56].try_into().unwrap());
        let min_lsn = u64::from_le_bytes(mmap[56..64].try_into().unwrap());
        let max_lsn = u64::from_le_bytes(mmap[64..72].try_into().unwrap());
        let column_count = u32::from_le_bytes(mmap[72..76].try_into().unwrap()) as usize;
        let region_count = u32::from_le_bytes(mmap[76..80].try_into().unwrap()) as usize;

        if column_count != schema.payload_count() {
            return Err(GnitzError::corrupt_shard(format!(
                "shard has {column_count} payload columns, schema has {}",
                schema.payload_count()
            )));
        }
        if region_count != 3 + column_count + 1 {
            return Err(GnitzError::corrupt_shard("shard region count inconsistent with column count"));
        }

        let mut descs = Vec::with_capacity(region_count);
        let mut off = HEADER_LEN;
        for _ in 0..region_count {
            let end = off + RegionDesc::ENCODED_LEN;
            if end > mmap.len() {
                return Err(GnitzError::corrupt_shard("truncated region descriptor table"));
            }
            descs.push(RegionDesc::read_from(&mmap[off..end])?);
            off = end;
        }

        for desc in &descs {
            let start = desc.offset as usize;
            let end = start + desc.len as usize;
            if end > mmap.len() {
                return Err(GnitzError::corrupt_shard("region extends past end of file"));
            }
            let checksum = xxhash_rust::xxh3::xxh3_64(&mmap[start..end]);
            if checksum != desc.checksum {
                return Err(GnitzError::corrupt_shard("region checksum mismatch"));
            }
        }

        let pk_region = descs[0];
        let weight_region = descs[1];
        let null_region = descs[2];
        let column_regions = descs[3..3 + column_count].to_vec();
        let blob_region = descs[3 + column_count];

        Ok(ShardView {
            schema,
            mmap,
            row_count,
            min_key,
            max_key,
            min_lsn,
            max_lsn,
            pk_region,
            weight_region,
            null_region,
            column_regions,
            blob_region,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn min_key(&self) -> u128 {
        self.min_key
    }

    pub fn max_key(&self) -> u128 {
        self.max_key
    }

    pub fn min_lsn(&self) -> u64 {
        self.min_lsn
    }

    pub fn max_lsn(&self) -> u64 {
        self.max_lsn
    }

    fn read_bytes(&self, offset: u32, len: usize) -> &[u8] {
        let start = offset as usize;
        &self.mmap[start..start + len]
    }

    pub fn pk_at(&self, row: u64) -> u128 {
        let width = if self.schema.pk_is_u128() { 16 } else { 8 };
        let off = self.pk_region.offset as u32 + (row as u32) * width;
        if self.schema.pk_is_u128() {
            u128::from_le_bytes(self.read_bytes(off, 16).try_into().unwrap())
        } else {
            u64::from_le_bytes(self.read_bytes(off, 8).try_into().unwrap()) as u128
        }
    }

    pub fn weight_at(&self, row: u64) -> i64 {
        let off = self.weight_region.offset as u32 + (row as u32) * 8;
        i64::from_le_bytes(self.read_bytes(off, 8).try_into().unwrap())
    }

    fn null_word_at(&self, row: u64) -> u64 {
        let off = self.null_region.offset as u32 + (row as u32) * 8;
        u64::from_le_bytes(self.read_bytes(off, 8).try_into().unwrap())
    }

    pub fn accessor(&self, row: u64) -> ShardRowAccessor<'_> {
        ShardRowAccessor {
            schema: &self.schema,
            view: self,
            row,
            null_word: self.null_word_at(row),
        }
    }

    /// Lower-bound binary search over the pk region: the index of the
    /// first row whose key is `>= target`, or `row_count` if none. Ties
    /// among equal keys resolve to the first matching index, per the
    /// batch's `(pk, payload-lex)` ordering (spec.md §4.6).
    pub fn find_row_index(&self, target: u128) -> u64 {
        let mut lo = 0u64;
        let mut hi = self.row_count;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.pk_at(mid) < target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    pub fn cursor(&self) -> ShardCursor<'_> {
        ShardCursor::new(self, 0)
    }
}

/// Zero-copy row accessor over one row of a memory-mapped shard. Distinct
/// from [`crate::row_accessor::PackedRowAccessor`] because shard storage is
/// columnar (SoA): each column's bytes live in their own region, addressed
/// as `region.offset + row * column_size`, rather than at a fixed offset
/// within one shared row stride.
pub struct ShardRowAccessor<'a> {
    schema: &'a Schema,
    view: &'a ShardView,
    row: u64,
    null_word: u64,
}

impl<'a> ShardRowAccessor<'a> {
    fn col_offset(&self, payload_col: usize) -> u32 {
        let region = &self.view.column_regions[payload_col];
        let size = self.schema.column_type_of_payload(payload_col).size() as u32;
        region.offset as u32 + (self.row as u32) * size
    }
}

impl<'a> RowAccessor for ShardRowAccessor<'a> {
    fn schema(&self) -> &Schema {
        self.schema
    }

    fn is_null(&self, payload_col: usize) -> bool {
        (self.null_word >> payload_col) & 1 == 1
    }

    fn get_int(&self, payload_col: usize) -> u64 {
        let off = self.col_offset(payload_col);
        match self.schema.column_type_of_payload(payload_col) {
            ColumnType::U8 => self.view.read_bytes(off, 1)[0] as u64,
            ColumnType::U16 => u16::from_le_bytes(self.view.read_bytes(off, 2).try_into().unwrap()) as u64,
            ColumnType::U32 => u32::from_le_bytes(self.view.read_bytes(off, 4).try_into().unwrap()) as u64,
            ColumnType::U64 => u64::from_le_bytes(self.view.read_bytes(off, 8).try_into().unwrap()),
            _ => panic!("get_int called on non-unsigned-integer column"),
        }
    }

    fn get_int_signed(&self, payload_col: usize) -> i64 {
        let off = self.col_offset(payload_col);
        match self.schema.column_type_of_payload(payload_col) {
            ColumnType::I8 => self.view.read_bytes(off, 1)[0] as i8 as i64,
            ColumnType::I16 => i16::from_le_bytes(self.view.read_bytes(off, 2).try_into().unwrap()) as i64,
            ColumnType::I32 => i32::from_le_bytes(self.view.read_bytes(off, 4).try_into().unwrap()) as i64,
            ColumnType::I64 => i64::from_le_bytes(self.view.read_bytes(off, 8).try_into().unwrap()),
            _ => panic!("get_int_signed called on non-signed-integer column"),
        }
    }

    fn get_float(&self, payload_col: usize) -> f64 {
        let off = self.col_offset(payload_col);
        match self.schema.column_type_of_payload(payload_col) {
            ColumnType::F32 => f32::from_le_bytes(self.view.read_bytes(off, 4).try_into().unwrap()) as f64,
            ColumnType::F64 => f64::from_le_bytes(self.view.read_bytes(off, 8).try_into().unwrap()),
            _ => panic!("get_float called on non-float column"),
        }
    }

    fn get_u128(&self, payload_col: usize) -> u128 {
        let off = self.col_offset(payload_col);
        u128::from_le_bytes(self.view.read_bytes(off, 16).try_into().unwrap())
    }

    fn get_str_struct(&self, payload_col: usize) -> StrView<'_> {
        let off = self.col_offset(payload_col);
        let blob_offset = self.view.blob_region.offset as u32;
        StrView::from_packed(self.view, off, move |heap_off, len| {
            self.view.read_bytes(blob_offset + heap_off as u32, len)
        })
    }
}

impl crate::arena::ByteSource for ShardView {
    fn read_bytes(&self, offset: u32, len: usize) -> &[u8] {
        ShardView::read_bytes(self, offset, len)
    }
}

/// Forward-only cursor over a shard's rows in stored (ascending `(pk,
/// payload-lex)`) order. Caches the current row's accessor, the same
/// pattern [`crate::memtable::MemTableCursor`] uses, so `accessor()` never
/// needs to manufacture a temporary to satisfy its borrow-shaped return.
pub struct ShardCursor<'a> {
    view: &'a ShardView,
    row: u64,
    current: Option<ShardRowAccessor<'a>>,
}

impl<'a> ShardCursor<'a> {
    fn new(view: &'a ShardView, row: u64) -> Self {
        let current = if row < view.row_count() { Some(view.accessor(row)) } else { None };
        ShardCursor { view, row, current }
    }

    fn refresh(&mut self) {
        self.current = if self.row < self.view.row_count() { Some(self.view.accessor(self.row)) } else { None };
    }
}

impl<'a> RowCursor for ShardCursor<'a> {
    fn is_valid(&self) -> bool {
        self.row < self.view.row_count()
    }

    fn key(&self) -> u128 {
        self.view.pk_at(self.row)
    }

    fn weight(&self) -> i64 {
        self.view.weight_at(self.row)
    }

    fn accessor(&self) -> &dyn RowAccessor {
        self.current.as_ref().expect("accessor() called on an invalid cursor")
    }

    fn advance(&mut self) {
        self.row += 1;
        self.refresh();
    }

    fn seek(&mut self, target: u128) {
        self.row = self.view.find_row_index(target);
        self.refresh();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row_accessor::OwnedRowAccessor;
    use crate::schema::SchemaBuilder;
    use crate::shard::ShardWriter;
    use crate::value::Value;
    use tempfile::tempdir;

    fn schema() -> Schema {
        SchemaBuilder::new()
            .pk("id", ColumnType::U64)
            .column("label", ColumnType::String, true)
            .column("score", ColumnType::I64, false)
            .build()
            .unwrap()
    }

    fn write_shard(dir: &Path, rows: &[(u128, i64, &str, i64)]) -> Schema {
        let schema = schema();
        let mut w = ShardWriter::new(schema.clone());
        for &(pk, weight, label, score) in rows {
            let row = OwnedRowAccessor::new(schema.clone(), vec![Value::Str(label.into()), Value::I64(score)]);
            w.append(pk, weight, &row).unwrap();
        }
        w.finalize(dir.join("shard-0.gz")).unwrap();
        schema
    }

    #[test]
    fn round_trips_rows_in_stored_order() {
        let dir = tempdir().unwrap();
        let schema = write_shard(dir.path(), &[(1, 1, "a", 10), (2, 1, "b", 20), (3, -1, "c", 30)]);
        let view = ShardView::open(dir.path().join("shard-0.gz"), schema).unwrap();
        assert_eq!(view.row_count(), 3);
        assert_eq!(view.min_key(), 1);
        assert_eq!(view.max_key(), 3);
        assert_eq!(view.weight_at(2), -1);
        assert_eq!(view.accessor(1).get_str_struct(0).content_bytes(), b"b");
        assert_eq!(view.accessor(1).get_int_signed(1), 20);
    }

    #[test]
    fn null_column_is_reported_as_null() {
        let dir = tempdir().unwrap();
        let schema = schema();
        let mut w = ShardWriter::new(schema.clone());
        let row = OwnedRowAccessor::new(schema.clone(), vec![Value::Null, Value::I64(1)]);
        w.append(1, 1, &row).unwrap();
        w.finalize(dir.path().join("shard-0.gz")).unwrap();
        let view = ShardView::open(dir.path().join("shard-0.gz"), schema).unwrap();
        assert!(view.accessor(0).is_null(0));
    }

    #[test]
    fn find_row_index_returns_lower_bound() {
        let dir = tempdir().unwrap();
        let schema = write_shard(dir.path(), &[(1, 1, "a", 1), (3, 1, "b", 2), (5, 1, "c", 3)]);
        let view = ShardView::open(dir.path().join("shard-0.gz"), schema).unwrap();
        assert_eq!(view.find_row_index(4), 2);
        assert_eq!(view.find_row_index(0), 0);
        assert_eq!(view.find_row_index(6), 3);
    }

    #[test]
    fn cursor_walks_all_rows_and_seeks() {
        let dir = tempdir().unwrap();
        let schema = write_shard(dir.path(), &[(1, 1, "a", 1), (2, 1, "b", 2), (3, 1, "c", 3)]);
        let view = ShardView::open(dir.path().join("shard-0.gz"), schema).unwrap();
        let mut cursor = view.cursor();
        let mut keys = Vec::new();
        while cursor.is_valid() {
            keys.push(cursor.key());
            cursor.advance();
        }
        assert_eq!(keys, vec![1, 2, 3]);

        let mut cursor = view.cursor();
        cursor.seek(2);
        assert_eq!(cursor.key(), 2);
    }

    #[test]
    fn open_rejects_wrong_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("not-a-shard.gz");
        std::fs::write(&path, b"definitely not a shard file, but long enough to pass length check....").unwrap();
        let err = ShardView::open(&path, schema()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CorruptShard);
    }
}
