//! Columnar shard writer: buffers one region per column (plus pk/weight/
//! null/blob) in memory and finalizes them into a single immutable file.
//!
//! Grounded on `nitrite-fjall-adapter::store::FjallStore`'s own
//! buffer-then-finalize-then-fsync discipline, generalized from one
//! length-prefixed value per key to one fixed-stride region per column.

use super::{align_region, RegionDesc, SHARD_FORMAT_VERSION, SHARD_MAGIC};
use crate::arena::Arena;
use crate::error::GnitzResult;
use crate::row_accessor::RowAccessor;
use crate::schema::{ColumnType, Schema};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Metadata about a shard once it has been written to disk — exactly what a
/// manifest entry needs.
#[derive(Debug, Clone)]
pub struct ShardMeta {
    pub path: PathBuf,
    pub row_count: u64,
    pub min_key: u128,
    pub max_key: u128,
    pub min_lsn: u64,
    pub max_lsn: u64,
}

/// Accumulates one column's worth of rows, SoA-style, across the lifetime of
/// a single shard write.
pub struct ShardWriter {
    schema: Schema,
    pk_arena: Arena,
    weight_arena: Arena,
    null_arena: Arena,
    column_arenas: Vec<Arena>,
    blob_arena: Arena,
    row_count: u64,
    min_key: Option<u128>,
    max_key: Option<u128>,
    min_lsn: u64,
    max_lsn: u64,
}

impl ShardWriter {
    pub fn new(schema: Schema) -> Self {
        let column_arenas = (0..schema.payload_count())
            .map(|_| Arena::with_capacity(4096))
            .collect();
        ShardWriter {
            schema,
            pk_arena: Arena::with_capacity(4096),
            weight_arena: Arena::with_capacity(4096),
            null_arena: Arena::with_capacity(4096),
            column_arenas,
            blob_arena: Arena::with_capacity(4096),
            row_count: 0,
            min_key: None,
            max_key: None,
            min_lsn: 0,
            max_lsn: 0,
        }
    }

    /// Records the LSN range this shard's rows were flushed from, for the
    /// manifest entry `finalize` will produce metadata for.
    pub fn set_lsn_range(&mut self, min_lsn: u64, max_lsn: u64) {
        self.min_lsn = min_lsn;
        self.max_lsn = max_lsn;
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Appends one `(pk, weight, payload)` row. Rows must arrive already in
    /// ascending `(pk, payload-lex)` order — `ShardWriter` does not sort;
    /// that is the caller's (MemTable flush or compactor merge) job.
    pub fn append(&mut self, pk: u128, weight: i64, acc: &dyn RowAccessor) -> GnitzResult<()> {
        if self.schema.pk_is_u128() {
            let off = self.pk_arena.allocate(16)?;
            self.pk_arena.write_u128_le(off, pk);
        } else {
            let off = self.pk_arena.allocate(8)?;
            self.pk_arena.write_u64_le(off, pk as u64);
        }

        let woff = self.weight_arena.allocate(8)?;
        self.weight_arena.write_i64_le(woff, weight);

        let mut null_word: u64 = 0;
        for (payload_col, col) in self.schema.payload_columns() {
            if acc.is_null(payload_col) {
                null_word |= 1 << payload_col;
            }
        }
        let noff = self.null_arena.allocate(8)?;
        self.null_arena.write_u64_le(noff, null_word);

        for (payload_col, col) in self.schema.payload_columns() {
            let arena = &mut self.column_arenas[payload_col];
            let off = arena.allocate(col.ty.size())?;
            if acc.is_null(payload_col) {
                continue;
            }
            write_column(arena, off, col.ty, acc, payload_col, &mut self.blob_arena)?;
        }

        self.min_key = Some(self.min_key.map_or(pk, |m| m.min(pk)));
        self.max_key = Some(self.max_key.map_or(pk, |m| m.max(pk)));
        self.row_count += 1;
        Ok(())
    }

    /// Writes the accumulated regions to `path` as one shard file and
    /// fsyncs it before returning.
    pub fn finalize(self, path: impl AsRef<Path>) -> GnitzResult<ShardMeta> {
        let path = path.as_ref().to_path_buf();
        let column_count = self.column_arenas.len();
        let region_count = 3 + column_count + 1;

        let header_len = 80usize;
        let descriptor_table_len = region_count * RegionDesc::ENCODED_LEN;
        let mut cursor = align_region(header_len + descriptor_table_len) as u64;

        let mut regions: Vec<(RegionDesc, &[u8])> = Vec::with_capacity(region_count);
        let mut place = |bytes: &[u8], cursor: &mut u64| -> RegionDesc {
            let checksum = xxhash_rust::xxh3::xxh3_64(bytes);
            let desc = RegionDesc { offset: *cursor, len: bytes.len() as u64, checksum };
            *cursor += align_region(bytes.len()) as u64;
            desc
        };

        let pk_desc = place(self.pk_arena.as_slice(), &mut cursor);
        regions.push((pk_desc, self.pk_arena.as_slice()));
        let weight_desc = place(self.weight_arena.as_slice(), &mut cursor);
        regions.push((weight_desc, self.weight_arena.as_slice()));
        let null_desc = place(self.null_arena.as_slice(), &mut cursor);
        regions.push((null_desc, self.null_arena.as_slice()));
        for arena in &self.column_arenas {
            let desc = place(arena.as_slice(), &mut cursor);
            regions.push((desc, arena.as_slice()));
        }
        let blob_desc = place(self.blob_arena.as_slice(), &mut cursor);
        regions.push((blob_desc, self.blob_arena.as_slice()));

        let min_key = self.min_key.unwrap_or(0);
        let max_key = self.max_key.unwrap_or(0);

        let mut out = Vec::with_capacity(cursor as usize);
        out.extend_from_slice(&SHARD_MAGIC.to_le_bytes());
        out.extend_from_slice(&SHARD_FORMAT_VERSION.to_le_bytes());
        out.push(self.schema.pk_is_u128() as u8);
        out.extend_from_slice(&[0u8; 3]);
        out.extend_from_slice(&self.row_count.to_le_bytes());
        out.extend_from_slice(&min_key.to_le_bytes());
        out.extend_from_slice(&max_key.to_le_bytes());
        out.extend_from_slice(&self.min_lsn.to_le_bytes());
        out.extend_from_slice(&self.max_lsn.to_le_bytes());
        out.extend_from_slice(&(column_count as u32).to_le_bytes());
        out.extend_from_slice(&(region_count as u32).to_le_bytes());
        debug_assert_eq!(out.len(), header_len);

        for (desc, _) in &regions {
            desc.write_to(&mut out);
        }
        out.resize(align_region(out.len()), 0);

        for (desc, bytes) in &regions {
            debug_assert_eq!(out.len() as u64, desc.offset);
            out.extend_from_slice(bytes);
            out.resize(align_region(out.len()), 0);
        }

        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&out)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        Ok(ShardMeta {
            path,
            row_count: self.row_count,
            min_key,
            max_key,
            min_lsn: self.min_lsn,
            max_lsn: self.max_lsn,
        })
    }
}

fn write_column(
    arena: &mut Arena,
    offset: u32,
    ty: ColumnType,
    acc: &dyn RowAccessor,
    payload_col: usize,
    blob: &mut Arena,
) -> GnitzResult<()> {
    match ty {
        ColumnType::I8 => arena.write_i8(offset, acc.get_int_signed(payload_col) as i8),
        ColumnType::I16 => arena.write_i16_le(offset, acc.get_int_signed(payload_col) as i16),
        ColumnType::I32 => arena.write_i32_le(offset, acc.get_int_signed(payload_col) as i32),
        ColumnType::I64 => arena.write_i64_le(offset, acc.get_int_signed(payload_col)),
        ColumnType::U8 => arena.write_u8(offset, acc.get_int(payload_col) as u8),
        ColumnType::U16 => arena.write_u16_le(offset, acc.get_int(payload_col) as u16),
        ColumnType::U32 => arena.write_u32_le(offset, acc.get_int(payload_col) as u32),
        ColumnType::U64 => arena.write_u64_le(offset, acc.get_int(payload_col)),
        ColumnType::U128 => arena.write_u128_le(offset, acc.get_u128(payload_col)),
        ColumnType::F32 => arena.write_f32_le(offset, acc.get_float(payload_col) as f32),
        ColumnType::F64 => arena.write_f64_le(offset, acc.get_float(payload_col)),
        ColumnType::String => {
            let view = acc.get_str_struct(payload_col);
            let bytes = view.content_bytes();
            let heap_offset = if bytes.len() > 12 {
                Some(blob.allocate_from_slice(bytes)? as u64)
            } else {
                None
            };
            crate::strcodec::pack(arena, offset, bytes, heap_offset);
        }
    }
    Ok(())
}
