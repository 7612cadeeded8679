//! Write-ahead log: durable, LSN-ordered record blocks (spec.md §4.7, §6
//! "WAL block format").
//!
//! Grounded on `nitrite-fjall-adapter::store`'s explicit-fsync durability
//! model and on the wider pack's `fs2`-based advisory locking for the
//! single-writer exclusive-open-append pattern.

mod reader;
mod writer;

pub use reader::{WalBlock, WalReader, WalRecord};
pub use writer::WalWriter;

use crate::arena::{Arena, ByteSource};
use crate::error::{GnitzError, GnitzResult};
use crate::row_accessor::RowAccessor;
use crate::schema::Schema;
use xxhash_rust::xxh3::xxh3_64;

pub(crate) const WAL_FORMAT_VERSION: u32 = 1;
pub(crate) const WAL_HEADER_LEN: usize = 32;

/// The fixed 32-byte block header from spec.md §6.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WalBlockHeader {
    pub lsn: u64,
    pub table_id: u32,
    pub entry_count: u32,
    pub total_size: u32,
    pub format_version: u32,
    pub checksum: u64,
}

impl WalBlockHeader {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.lsn.to_le_bytes());
        buf.extend_from_slice(&self.table_id.to_le_bytes());
        buf.extend_from_slice(&self.entry_count.to_le_bytes());
        buf.extend_from_slice(&self.total_size.to_le_bytes());
        buf.extend_from_slice(&self.format_version.to_le_bytes());
        buf.extend_from_slice(&self.checksum.to_le_bytes());
    }

    fn read_from(bytes: &[u8]) -> GnitzResult<Self> {
        if bytes.len() < WAL_HEADER_LEN {
            return Err(GnitzError::corrupt_shard("truncated WAL block header"));
        }
        Ok(WalBlockHeader {
            lsn: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            table_id: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            entry_count: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
            total_size: u32::from_le_bytes(bytes[16..20].try_into().unwrap()),
            format_version: u32::from_le_bytes(bytes[20..24].try_into().unwrap()),
            checksum: u64::from_le_bytes(bytes[24..32].try_into().unwrap()),
        })
    }
}

/// Encodes one record as `pk | weight | null_word | payload | blob_len |
/// blob_bytes` — the `blob_len` field is a necessary addition spec.md §6's
/// prose leaves implicit, since a record's trailing blob bytes are
/// variable-length and the reader has no other way to know where they end.
fn encode_entry(schema: &Schema, pk: u128, weight: i64, acc: &dyn RowAccessor, out: &mut Vec<u8>) -> GnitzResult<()> {
    if schema.pk_is_u128() {
        out.extend_from_slice(&pk.to_le_bytes());
    } else {
        out.extend_from_slice(&(pk as u64).to_le_bytes());
    }
    out.extend_from_slice(&weight.to_le_bytes());

    let mut payload = Arena::with_capacity(schema.stride());
    let mut blob = Arena::with_capacity(crate::serialize::heap_size(schema, acc).max(64));
    let offset = payload.allocate(schema.stride())?;
    let null_word = crate::serialize::serialize(schema, acc, &mut payload, offset, &mut blob)?;

    out.extend_from_slice(&null_word.to_le_bytes());
    out.extend_from_slice(payload.read_bytes(offset, schema.stride()));
    out.extend_from_slice(&(blob.len() as u64).to_le_bytes());
    out.extend_from_slice(blob.as_slice());
    Ok(())
}

/// Inverse of [`encode_entry`]: parses one record out of `body` at `cursor`,
/// advancing it past the record, and returns the decoded `(pk, weight,
/// owned row)`.
fn decode_entry(schema: &Schema, body: &[u8], cursor: &mut usize) -> GnitzResult<(u128, i64, crate::row_accessor::OwnedRowAccessor)> {
    let pk_width = if schema.pk_is_u128() { 16 } else { 8 };
    require(body, *cursor, pk_width)?;
    let pk = if schema.pk_is_u128() {
        u128::from_le_bytes(body[*cursor..*cursor + 16].try_into().unwrap())
    } else {
        u64::from_le_bytes(body[*cursor..*cursor + 8].try_into().unwrap()) as u128
    };
    *cursor += pk_width;

    require(body, *cursor, 8)?;
    let weight = i64::from_le_bytes(body[*cursor..*cursor + 8].try_into().unwrap());
    *cursor += 8;

    require(body, *cursor, 8)?;
    let null_word = u64::from_le_bytes(body[*cursor..*cursor + 8].try_into().unwrap());
    *cursor += 8;

    let stride = schema.stride();
    require(body, *cursor, stride)?;
    let payload = &body[*cursor..*cursor + stride];
    *cursor += stride;

    require(body, *cursor, 8)?;
    let blob_len = u64::from_le_bytes(body[*cursor..*cursor + 8].try_into().unwrap()) as usize;
    *cursor += 8;

    require(body, *cursor, blob_len)?;
    let blob = &body[*cursor..*cursor + blob_len];
    *cursor += blob_len;

    let row = crate::serialize::deserialize(schema, payload as &dyn ByteSource, 0, blob as &dyn ByteSource, null_word);
    Ok((pk, weight, row))
}

fn require(body: &[u8], cursor: usize, len: usize) -> GnitzResult<()> {
    if cursor + len > body.len() {
        Err(GnitzError::corrupt_shard("WAL record runs past end of block body"))
    } else {
        Ok(())
    }
}

fn encode_body(schema: &Schema, entries: &[(u128, i64, &dyn RowAccessor)]) -> GnitzResult<Vec<u8>> {
    let mut body = Vec::new();
    for &(pk, weight, acc) in entries {
        encode_entry(schema, pk, weight, acc, &mut body)?;
    }
    Ok(body)
}

fn checksum_body(body: &[u8]) -> u64 {
    xxh3_64(body)
}
