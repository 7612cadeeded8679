//! Raw-memory arenas.
//!
//! Per the redesign note in spec.md §9 ("Raw pointer arenas"), every arena
//! owns exactly one growable byte buffer and hands out *offsets*, never
//! pointers, into it. That is what lets the backing storage move (a
//! reallocating `Vec<u8>`) without invalidating anything a caller is
//! holding — callers only ever hold a `u32`/`u64` offset plus a borrow of
//! the arena itself.

use crate::error::{GnitzError, GnitzResult};

/// Common read interface shared by an in-memory [`Arena`] and a memory-mapped
/// [`crate::shard::ShardView`], so [`crate::row_accessor::PackedRowAccessor`]
/// can read a row identically whether it lives in the MemTable or in a
/// shard on disk.
pub trait ByteSource {
    fn read_bytes(&self, offset: u32, len: usize) -> &[u8];

    fn read_u8(&self, offset: u32) -> u8 {
        self.read_bytes(offset, 1)[0]
    }
    fn read_i8(&self, offset: u32) -> i8 {
        self.read_u8(offset) as i8
    }
    fn read_u16_le(&self, offset: u32) -> u16 {
        u16::from_le_bytes(self.read_bytes(offset, 2).try_into().unwrap())
    }
    fn read_i16_le(&self, offset: u32) -> i16 {
        self.read_u16_le(offset) as i16
    }
    fn read_u32_le(&self, offset: u32) -> u32 {
        u32::from_le_bytes(self.read_bytes(offset, 4).try_into().unwrap())
    }
    fn read_i32_le(&self, offset: u32) -> i32 {
        self.read_u32_le(offset) as i32
    }
    fn read_u64_le(&self, offset: u32) -> u64 {
        u64::from_le_bytes(self.read_bytes(offset, 8).try_into().unwrap())
    }
    fn read_i64_le(&self, offset: u32) -> i64 {
        self.read_u64_le(offset) as i64
    }
    fn read_u128_le(&self, offset: u32) -> u128 {
        u128::from_le_bytes(self.read_bytes(offset, 16).try_into().unwrap())
    }
    fn read_f32_le(&self, offset: u32) -> f32 {
        f32::from_le_bytes(self.read_bytes(offset, 4).try_into().unwrap())
    }
    fn read_f64_le(&self, offset: u32) -> f64 {
        f64::from_le_bytes(self.read_bytes(offset, 8).try_into().unwrap())
    }
}

/// A single growable byte arena with a hard capacity.
///
/// Used both as the record arena backing [`crate::zset::ArenaZSetBatch`]
/// and [`crate::memtable::MemTable`]'s node arena, and as the blob arena
/// backing long ("heap") strings in both. `allocate` exceeding `capacity`
/// signals [`crate::error::ErrorKind::MemTableFull`] — the MemTable's
/// back-pressure contract (spec.md §4.5) — rather than growing unbounded.
#[derive(Debug)]
pub struct Arena {
    buf: Vec<u8>,
    capacity: usize,
}

impl Arena {
    pub fn with_capacity(capacity: usize) -> Self {
        Arena { buf: Vec::with_capacity(capacity.min(1 << 20)), capacity }
    }

    /// Bytes currently in use; doubles as the next allocation's offset.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.buf.len())
    }

    /// Reserves `nbytes` zeroed bytes and returns the start offset.
    pub fn allocate(&mut self, nbytes: usize) -> GnitzResult<u32> {
        let new_len = self
            .buf
            .len()
            .checked_add(nbytes)
            .ok_or_else(|| GnitzError::memtable_full("arena offset overflow"))?;
        if new_len > self.capacity {
            return Err(GnitzError::memtable_full(format!(
                "arena out of space: need {nbytes} bytes, {} remaining",
                self.remaining()
            )));
        }
        let offset = self.buf.len() as u32;
        self.buf.resize(new_len, 0);
        Ok(offset)
    }

    /// Copies `bytes` into a freshly allocated region; the "allocate an
    /// owned string" entry point from spec.md §4.3.
    pub fn allocate_copy(&mut self, bytes: &[u8]) -> GnitzResult<u32> {
        let offset = self.allocate(bytes.len())?;
        self.buf[offset as usize..offset as usize + bytes.len()].copy_from_slice(bytes);
        Ok(offset)
    }

    /// Copies bytes read from another arena's already-resolved slice; the
    /// "allocate_from_ptr" entry point from spec.md §4.3 — named
    /// `allocate_from_slice` here since this crate indexes arenas by
    /// offset rather than dereferencing raw pointers directly.
    pub fn allocate_from_slice(&mut self, src: &[u8]) -> GnitzResult<u32> {
        self.allocate_copy(src)
    }

    pub fn read_bytes(&self, offset: u32, len: usize) -> &[u8] {
        &self.buf[offset as usize..offset as usize + len]
    }

    pub fn write_bytes(&mut self, offset: u32, data: &[u8]) {
        self.buf[offset as usize..offset as usize + data.len()].copy_from_slice(data);
    }

    pub fn read_u32_le(&self, offset: u32) -> u32 {
        u32::from_le_bytes(self.read_bytes(offset, 4).try_into().unwrap())
    }

    pub fn write_u32_le(&mut self, offset: u32, value: u32) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    pub fn read_u64_le(&self, offset: u32) -> u64 {
        u64::from_le_bytes(self.read_bytes(offset, 8).try_into().unwrap())
    }

    pub fn write_u64_le(&mut self, offset: u32, value: u64) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    pub fn read_i64_le(&self, offset: u32) -> i64 {
        i64::from_le_bytes(self.read_bytes(offset, 8).try_into().unwrap())
    }

    pub fn write_i64_le(&mut self, offset: u32, value: i64) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    pub fn read_u128_le(&self, offset: u32) -> u128 {
        u128::from_le_bytes(self.read_bytes(offset, 16).try_into().unwrap())
    }

    pub fn write_u128_le(&mut self, offset: u32, value: u128) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    pub fn read_f32_le(&self, offset: u32) -> f32 {
        f32::from_le_bytes(self.read_bytes(offset, 4).try_into().unwrap())
    }

    pub fn write_f32_le(&mut self, offset: u32, value: f32) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    pub fn read_f64_le(&self, offset: u32) -> f64 {
        f64::from_le_bytes(self.read_bytes(offset, 8).try_into().unwrap())
    }

    pub fn write_f64_le(&mut self, offset: u32, value: f64) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    pub fn read_i8(&self, offset: u32) -> i8 {
        self.buf[offset as usize] as i8
    }

    pub fn write_i8(&mut self, offset: u32, value: i8) {
        self.buf[offset as usize] = value as u8;
    }

    pub fn read_u8(&self, offset: u32) -> u8 {
        self.buf[offset as usize]
    }

    pub fn write_u8(&mut self, offset: u32, value: u8) {
        self.buf[offset as usize] = value;
    }

    pub fn read_i16_le(&self, offset: u32) -> i16 {
        i16::from_le_bytes(self.read_bytes(offset, 2).try_into().unwrap())
    }

    pub fn write_i16_le(&mut self, offset: u32, value: i16) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    pub fn read_u16_le(&self, offset: u32) -> u16 {
        u16::from_le_bytes(self.read_bytes(offset, 2).try_into().unwrap())
    }

    pub fn write_u16_le(&mut self, offset: u32, value: u16) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    pub fn read_i32_le(&self, offset: u32) -> i32 {
        i32::from_le_bytes(self.read_bytes(offset, 4).try_into().unwrap())
    }

    pub fn write_i32_le(&mut self, offset: u32, value: i32) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    pub fn read_u32(&self, offset: u32) -> u32 {
        self.read_u32_le(offset)
    }

    /// Raw view of the whole buffer, for bulk flush/serialize paths.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl ByteSource for Arena {
    fn read_bytes(&self, offset: u32, len: usize) -> &[u8] {
        Arena::read_bytes(self, offset, len)
    }
}

/// Lets a plain byte slice stand in for an arena — used by the WAL reader,
/// which parses rows out of an already-read block buffer rather than an
/// `Arena`.
impl ByteSource for [u8] {
    fn read_bytes(&self, offset: u32, len: usize) -> &[u8] {
        &self[offset as usize..offset as usize + len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_past_capacity_signals_memtable_full() {
        let mut arena = Arena::with_capacity(8);
        assert!(arena.allocate(4).is_ok());
        let err = arena.allocate(8).unwrap_err();
        assert!(err.is_memtable_full());
    }

    #[test]
    fn round_trip_u64() {
        let mut arena = Arena::with_capacity(64);
        let off = arena.allocate(8).unwrap();
        arena.write_u64_le(off, 0xdead_beef_cafe_babe);
        assert_eq!(arena.read_u64_le(off), 0xdead_beef_cafe_babe);
    }

    #[test]
    fn allocate_copy_preserves_bytes() {
        let mut arena = Arena::with_capacity(64);
        let off = arena.allocate_copy(b"hello world!").unwrap();
        assert_eq!(arena.read_bytes(off, 12), b"hello world!");
    }
}
