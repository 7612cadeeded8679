//! Unified ordered cursor (spec.md §9: "No coroutines... lazy sequences are
//! modeled as `{is_valid, key, weight, accessor, advance, seek, close}`").
//!
//! [`crate::memtable::MemTable`], [`crate::shard::ShardView`] and the
//! compactor's merge all implement this so that readers can descend the
//! storage hierarchy through one interface, matching the teacher's
//! `common::util::navigable_map::NavigableMap` cursor shape generalized
//! from documents to weighted packed rows.

use crate::row_accessor::RowAccessor;

/// A positioned, forward-only view over `(key, weight, payload)` triples in
/// ascending `(pk, payload-lex)` order.
pub trait RowCursor {
    fn is_valid(&self) -> bool;
    fn key(&self) -> u128;
    fn weight(&self) -> i64;
    fn accessor(&self) -> &dyn RowAccessor;
    fn advance(&mut self);
    /// Advances to the first row with key >= `target`, or becomes invalid
    /// if none exists.
    fn seek(&mut self, target: u128);
}
