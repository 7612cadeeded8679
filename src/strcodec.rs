//! The "German string" codec (spec.md §4.2).
//!
//! A packed string header is always 16 bytes: a 4-byte length, a 4-byte
//! prefix (the string's first up to 4 bytes), then 8 more bytes that are
//! *either* the tail of an inline string (total length ≤ 12) *or* a
//! little-endian 64-bit offset into a companion blob heap (length > 12).
//!
//! No teacher module covers this — it is built from scratch in the manner
//! of the teacher's other small packed-struct types (see
//! `nitrite-fjall-adapter::wrapper::FjallValue`'s normalize-then-serialize
//! discipline), adapted to a fixed byte layout instead of a `Vec<u8>`.

use crate::arena::{Arena, ByteSource};
use std::cmp::Ordering;

pub const HEADER_LEN: u32 = 16;
const INLINE_THRESHOLD: usize = 12;

/// Writes a packed German-string header for `s` at `offset` within `arena`.
///
/// `heap_offset` must be `Some` whenever `s.len() > 12`; it is the offset
/// already reserved in a companion blob arena for the full string bytes
/// (callers — `serialize.rs` — are responsible for writing those bytes).
pub fn pack(arena: &mut Arena, offset: u32, s: &[u8], heap_offset: Option<u64>) {
    let len = s.len() as u32;
    arena.write_u32_le(offset, len);
    arena.write_bytes(offset + 4, &compute_prefix(s));

    if s.len() <= INLINE_THRESHOLD {
        let mut tail = [0u8; 8];
        if s.len() > 4 {
            tail[..s.len() - 4].copy_from_slice(&s[4..]);
        }
        arena.write_bytes(offset + 8, &tail);
    } else {
        let heap_offset =
            heap_offset.expect("pack: strings longer than 12 bytes require a heap offset");
        arena.write_u64_le(offset + 8, heap_offset);
    }
}

/// First `min(4, s.len())` bytes of `s`, zero-padded to 4 bytes.
pub fn compute_prefix(s: &[u8]) -> [u8; 4] {
    let mut prefix = [0u8; 4];
    let n = s.len().min(4);
    prefix[..n].copy_from_slice(&s[..n]);
    prefix
}

/// A resolved view over a packed string header: its length, prefix, and
/// where its full content bytes live. Mirrors the
/// `{length, prefix, struct_ptr_or_null, heap_ptr_or_null, owned_string_or_null}`
/// shape spec.md §4.1 asks `get_str_struct` to return, collapsed into one
/// small enum per content source.
#[derive(Debug, Clone, Copy)]
pub struct StrView<'a> {
    pub length: u32,
    pub prefix: [u8; 4],
    content: StrContent<'a>,
}

#[derive(Debug, Clone, Copy)]
enum StrContent<'a> {
    /// Bytes live contiguously inside the packed struct itself (length ≤ 12).
    Inline(&'a [u8]),
    /// Bytes live in a companion blob heap, already resolved to a slice.
    Heap(&'a [u8]),
    /// Bytes borrowed from an owned `String` (an `OwnedRowAccessor`).
    Owned(&'a str),
}

impl<'a> StrView<'a> {
    /// Reads the header at `offset` in `arena`. If the string is long
    /// (length > 12) the caller must resolve `heap` themselves and pass the
    /// already-sliced bytes in; `heap` is ignored for short strings.
    pub fn from_packed(arena: &'a dyn ByteSource, offset: u32, heap: impl FnOnce(u64, usize) -> &'a [u8]) -> Self {
        let length = arena.read_u32_le(offset);
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(arena.read_bytes(offset + 4, 4));
        let content = if (length as usize) <= INLINE_THRESHOLD {
            StrContent::Inline(arena.read_bytes(offset + 4, length as usize))
        } else {
            let heap_offset = arena.read_u64_le(offset + 8);
            StrContent::Heap(heap(heap_offset, length as usize))
        };
        StrView { length, prefix, content }
    }

    pub fn from_owned(s: &'a str) -> Self {
        StrView {
            length: s.len() as u32,
            prefix: compute_prefix(s.as_bytes()),
            content: StrContent::Owned(s),
        }
    }

    pub fn from_heap_slice(length: u32, prefix: [u8; 4], bytes: &'a [u8]) -> Self {
        StrView { length, prefix, content: StrContent::Heap(bytes) }
    }

    pub fn content_bytes(&self) -> &'a [u8] {
        match self.content {
            StrContent::Inline(b) => b,
            StrContent::Heap(b) => b,
            StrContent::Owned(s) => s.as_bytes(),
        }
    }

    pub fn is_heap_backed(&self) -> bool {
        matches!(self.content, StrContent::Heap(_))
    }
}

/// `equals(s1, s2)`: length, then prefix, then full content — O(1)
/// short-circuit on a length or prefix mismatch (spec.md §4.2).
pub fn equals(a: &StrView, b: &StrView) -> bool {
    a.length == b.length && a.prefix == b.prefix && a.content_bytes() == b.content_bytes()
}

/// `compare(s1, s2)`: prefix byte-compare first (short-circuits on
/// mismatch); ties fall through to a full content comparison, which is
/// always correct regardless of zero-padding ambiguity around embedded
/// NUL bytes in the source string.
pub fn compare(a: &StrView, b: &StrView) -> Ordering {
    match a.prefix.cmp(&b.prefix) {
        Ordering::Equal => a.content_bytes().cmp(b.content_bytes()),
        other => other,
    }
}
