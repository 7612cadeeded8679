//! Columnar shard files: immutable, memory-mappable, per-column (SoA) on-disk
//! batches (spec.md §4.6).
//!
//! Grounded on `nitrite-fjall-adapter::store`'s finalize/flush lifecycle for
//! the writer half, and on the wider pack's `memmap2`-based read-only views
//! for the reader half.

mod view;
mod writer;

pub use view::{ShardCursor, ShardRowAccessor, ShardView};
pub use writer::{ShardMeta, ShardWriter};

use crate::error::{GnitzError, GnitzResult};

/// 8 ASCII bytes, "GNITZSHD", read as a little-endian u64.
pub(crate) const SHARD_MAGIC: u64 = 0x4448_535A_5449_4E47;
pub(crate) const SHARD_FORMAT_VERSION: u32 = 1;

/// Byte offset/length/checksum of one on-disk region, used for the PK array,
/// the weight array, the null-word array, each payload column, and the blob
/// heap.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RegionDesc {
    pub offset: u64,
    pub len: u64,
    pub checksum: u64,
}

impl RegionDesc {
    const ENCODED_LEN: usize = 24;

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.len.to_le_bytes());
        buf.extend_from_slice(&self.checksum.to_le_bytes());
    }

    fn read_from(bytes: &[u8]) -> GnitzResult<Self> {
        if bytes.len() < Self::ENCODED_LEN {
            return Err(GnitzError::corrupt_shard("truncated region descriptor"));
        }
        Ok(RegionDesc {
            offset: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            len: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            checksum: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
        })
    }
}

pub(crate) fn align_region(len: usize) -> usize {
    crate::util::align_up(len, crate::config::SHARD_REGION_ALIGNMENT)
}
