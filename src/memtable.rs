//! The active write buffer: a skiplist over a raw node arena (spec.md §4.5).
//!
//! Grounded on the teacher's `common::util::navigable_map` skiplist (same
//! probabilistic-height design) but rebuilt over [`crate::arena::Arena`]
//! instead of boxed nodes, so a node is addressed by `u32` offset the same
//! way a row is addressed everywhere else in this crate.

use crate::arena::{Arena, ByteSource};
use crate::cursor::RowCursor;
use crate::error::GnitzResult;
use crate::row_accessor::{compare_rows, PackedRowAccessor, RowAccessor};
use crate::schema::Schema;
use rand::rngs::ThreadRng;
use rand::Rng;
use std::cmp::Ordering;

pub const MAX_HEIGHT: usize = 16;
const NIL: u32 = u32::MAX;

const WEIGHT_OFF: u32 = 0;
const HEIGHT_OFF: u32 = 8;

/// Byte offsets within one node record, derived from that node's own height
/// (and the table's PK width/stride, which are fixed for the table's
/// lifetime).
#[derive(Debug, Clone, Copy)]
struct NodeLayout {
    next_off: u32,
    key_off: u32,
    null_off: u32,
    payload_off: u32,
    total: usize,
}

fn compute_layout(height: usize, pk_is_u128: bool, stride: usize) -> NodeLayout {
    let next_off = crate::util::align_up(HEIGHT_OFF as usize + 1, 4) as u32;
    let next_bytes = (height * 4) as u32;
    let key_align: usize = if pk_is_u128 { 16 } else { 8 };
    let key_width: u32 = if pk_is_u128 { 16 } else { 8 };
    let key_off = crate::util::align_up((next_off + next_bytes) as usize, key_align) as u32;
    let null_off = crate::util::align_up((key_off + key_width) as usize, 8) as u32;
    let payload_off = crate::util::align_up(null_off as usize + 8, 16) as u32;
    let total = payload_off as usize + stride;
    NodeLayout { next_off, key_off, null_off, payload_off, total }
}

/// Draws a height in `1..=MAX_HEIGHT` with geometric (p=0.5) decay. Purely
/// internal to the skiplist's balancing — never observable in iteration
/// order (spec.md §4.5: "the skiplist's RNG must not affect externally
/// observable order").
fn random_height(rng: &mut impl Rng) -> usize {
    let mut h = 1;
    while h < MAX_HEIGHT && rng.gen_bool(0.5) {
        h += 1;
    }
    h
}

/// The engine's active, in-memory Z-Set: a skiplist keyed by `(pk,
/// payload-lex)` over a node arena, with a companion blob arena for long
/// strings. `upsert` is the only write path; matching `(pk, payload)` rows
/// have their weights summed, and a row whose weight nets to zero is
/// unlinked outright rather than kept as a tombstone.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemTableStats {
    pub row_count: usize,
    pub node_bytes_used: usize,
    pub blob_bytes_used: usize,
}

pub struct MemTable {
    schema: Schema,
    node_arena: Arena,
    blob_arena: Arena,
    head: [u32; MAX_HEIGHT],
    level: usize,
    len: usize,
    rng: ThreadRng,
}

impl MemTable {
    pub fn new(schema: Schema, node_capacity: usize, blob_capacity: usize) -> Self {
        MemTable {
            schema,
            node_arena: Arena::with_capacity(node_capacity),
            blob_arena: Arena::with_capacity(blob_capacity),
            head: [NIL; MAX_HEIGHT],
            level: 0,
            len: 0,
            rng: rand::thread_rng(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn stats(&self) -> MemTableStats {
        MemTableStats {
            row_count: self.len,
            node_bytes_used: self.node_arena.len(),
            blob_bytes_used: self.blob_arena.len(),
        }
    }

    fn node_height(&self, node: u32) -> usize {
        self.node_arena.read_u8(node + HEIGHT_OFF) as usize
    }

    fn layout_of(&self, node: u32) -> NodeLayout {
        compute_layout(self.node_height(node), self.schema.pk_is_u128(), self.schema.stride())
    }

    fn node_key(&self, node: u32) -> u128 {
        let layout = self.layout_of(node);
        if self.schema.pk_is_u128() {
            self.node_arena.read_u128_le(node + layout.key_off)
        } else {
            self.node_arena.read_u64_le(node + layout.key_off) as u128
        }
    }

    fn node_weight(&self, node: u32) -> i64 {
        self.node_arena.read_i64_le(node + WEIGHT_OFF)
    }

    fn node_set_weight(&mut self, node: u32, weight: i64) {
        self.node_arena.write_i64_le(node + WEIGHT_OFF, weight);
    }

    fn node_next(&self, node: u32, level: usize) -> u32 {
        let layout = self.layout_of(node);
        self.node_arena.read_u32_le(node + layout.next_off + (level as u32) * 4)
    }

    fn node_set_next(&mut self, node: u32, level: usize, value: u32) {
        let layout = self.layout_of(node);
        self.node_arena.write_u32_le(node + layout.next_off + (level as u32) * 4, value);
    }

    fn node_accessor(&self, node: u32) -> PackedRowAccessor<'_> {
        let layout = self.layout_of(node);
        let null_word = self.node_arena.read_u64_le(node + layout.null_off);
        PackedRowAccessor::new(&self.schema, &self.node_arena, node + layout.payload_off, null_word, &self.blob_arena)
    }

    /// `key.cmp(node.key)`, tiebroken by payload-lex against `acc` when keys
    /// are equal — the dry-run comparison spec.md §4.5 calls for when
    /// locating the insertion point among same-key nodes.
    fn cmp_to_node(&self, key: u128, acc: &dyn RowAccessor, node: u32) -> Ordering {
        match key.cmp(&self.node_key(node)) {
            Ordering::Equal => compare_rows(acc, &self.node_accessor(node)),
            other => other,
        }
    }

    /// Finds, at every level, the last node strictly less than `(key,
    /// acc)`. Returns the per-level predecessor array; `update[0]`'s
    /// successor (or `head[0]` if `update[0]` is NIL) is the insertion
    /// point.
    fn find_predecessors(&self, key: u128, acc: &dyn RowAccessor) -> [u32; MAX_HEIGHT] {
        let mut update = [NIL; MAX_HEIGHT];
        let mut x = NIL;
        for level in (0..self.level).rev() {
            let mut next = if x == NIL { self.head[level] } else { self.node_next(x, level) };
            while next != NIL && self.cmp_to_node(key, acc, next) == Ordering::Greater {
                x = next;
                next = self.node_next(x, level);
            }
            update[level] = x;
        }
        update
    }

    fn successor_at(&self, update: &[u32; MAX_HEIGHT], level: usize) -> u32 {
        if update[level] == NIL { self.head[level] } else { self.node_next(update[level], level) }
    }

    /// Adds `weight` to the row `(key, acc)`, inserting a fresh node if no
    /// matching `(key, payload)` row exists yet, or unlinking the node
    /// outright if the merge nets its weight to zero. Fails with
    /// [`crate::error::ErrorKind::MemTableFull`] if either arena cannot
    /// satisfy the allocation this upsert needs — the caller (the engine)
    /// must flush and retry.
    pub fn upsert(&mut self, key: u128, weight: i64, acc: &dyn RowAccessor) -> GnitzResult<()> {
        let update = self.find_predecessors(key, acc);
        let target = self.successor_at(&update, 0);

        if target != NIL && self.cmp_to_node(key, acc, target) == Ordering::Equal {
            let new_weight = self.node_weight(target) + weight;
            if new_weight == 0 {
                self.unlink(target, &update);
                self.len -= 1;
            } else {
                self.node_set_weight(target, new_weight);
            }
            return Ok(());
        }

        let height = random_height(&mut self.rng);
        let mut update = update;
        if height > self.level {
            for slot in update.iter_mut().take(height).skip(self.level) {
                *slot = NIL;
            }
            self.level = height;
        }

        let layout = compute_layout(height, self.schema.pk_is_u128(), self.schema.stride());
        let node_off = self.node_arena.allocate(layout.total)?;
        self.node_arena.write_i64_le(node_off + WEIGHT_OFF, weight);
        self.node_arena.write_u8(node_off + HEIGHT_OFF, height as u8);

        if self.schema.pk_is_u128() {
            self.node_arena.write_u128_le(node_off + layout.key_off, key);
        } else {
            self.node_arena.write_u64_le(node_off + layout.key_off, key as u64);
        }

        let null_word = crate::serialize::serialize(
            &self.schema,
            acc,
            &mut self.node_arena,
            node_off + layout.payload_off,
            &mut self.blob_arena,
        )?;
        self.node_arena.write_u64_le(node_off + layout.null_off, null_word);

        for level in 0..height {
            let succ = if update[level] == NIL { self.head[level] } else { self.node_next(update[level], level) };
            self.node_set_next(node_off, level, succ);
            if update[level] == NIL {
                self.head[level] = node_off;
            } else {
                self.node_set_next(update[level], level, node_off);
            }
        }
        self.len += 1;
        Ok(())
    }

    fn unlink(&mut self, node: u32, update: &[u32; MAX_HEIGHT]) {
        let height = self.node_height(node);
        for level in 0..height {
            let succ = self.node_next(node, level);
            if update[level] == NIL {
                self.head[level] = succ;
            } else {
                self.node_set_next(update[level], level, succ);
            }
        }
        while self.level > 0 && self.head[self.level - 1] == NIL {
            self.level -= 1;
        }
    }

    /// Streams the level-0 chain, in ascending `(pk, payload-lex)` order,
    /// into `sink` — skipping any weight-zero row as a defensive measure
    /// (`upsert` already unlinks net-zero rows, so none should remain, but
    /// a flush must never surface a ghost either way).
    pub fn flush(&self, sink: &mut crate::shard::ShardWriter) -> GnitzResult<()> {
        let mut node = self.head[0];
        while node != NIL {
            let weight = self.node_weight(node);
            if weight != 0 {
                let key = self.node_key(node);
                let acc = self.node_accessor(node);
                sink.append(key, weight, &acc)?;
            }
            node = self.node_next(node, 0);
        }
        Ok(())
    }

    /// A forward-only cursor over the level-0 chain, in ascending `(pk,
    /// payload-lex)` order.
    pub fn cursor(&self) -> MemTableCursor<'_> {
        MemTableCursor::new(self, self.head[0])
    }

    fn seek_from_head(&self, target: u128) -> u32 {
        let mut x = NIL;
        for level in (0..self.level).rev() {
            let mut next = if x == NIL { self.head[level] } else { self.node_next(x, level) };
            while next != NIL && self.node_key(next) < target {
                x = next;
                next = self.node_next(x, level);
            }
        }
        if x == NIL { self.head[0] } else { self.node_next(x, 0) }
    }
}

/// Cursor implementation over [`MemTable`]'s level-0 chain. Caches the
/// current node's accessor alongside the node offset so `accessor()` can
/// hand back a plain borrow instead of rebuilding one per call.
pub struct MemTableCursor<'a> {
    table: &'a MemTable,
    node: u32,
    current: Option<PackedRowAccessor<'a>>,
}

impl<'a> MemTableCursor<'a> {
    fn new(table: &'a MemTable, node: u32) -> Self {
        let current = if node != NIL { Some(table.node_accessor(node)) } else { None };
        MemTableCursor { table, node, current }
    }

    fn refresh(&mut self) {
        self.current = if self.node != NIL { Some(self.table.node_accessor(self.node)) } else { None };
    }
}

impl<'a> RowCursor for MemTableCursor<'a> {
    fn is_valid(&self) -> bool {
        self.node != NIL
    }

    fn key(&self) -> u128 {
        self.table.node_key(self.node)
    }

    fn weight(&self) -> i64 {
        self.table.node_weight(self.node)
    }

    fn accessor(&self) -> &dyn RowAccessor {
        self.current.as_ref().expect("accessor() called on an invalid cursor")
    }

    fn advance(&mut self) {
        self.node = self.table.node_next(self.node, 0);
        self.refresh();
    }

    fn seek(&mut self, target: u128) {
        self.node = self.table.seek_from_head(target);
        self.refresh();
    }
}
