#![allow(dead_code)]
//! # GnitzDB - Embeddable Incremental Multiset Database
//!
//! GnitzDB is an embeddable Z-Set (multiset) storage engine with a
//! DBSP-style incremental streaming algebra layered on top. Every row
//! carries a signed `i64` weight alongside its payload; "deleting" a row
//! means writing its negation rather than removing bytes, which is what
//! lets the [`dbsp`] operators replay history incrementally instead of
//! rescanning base tables on every update.
//!
//! ## Module Organization
//!
//! - [`arena`] - the packed-byte allocator backing memtables and batches
//! - [`compactor`] - shard merge/compaction into the spine
//! - [`config`] - `EngineConfig`, PIMPL-style over atomics
//! - [`cursor`] - the `RowCursor` trait shared by memtable and shard reads
//! - [`dbsp`] - incremental streaming operators (filter/map/join/distinct/reduce/...)
//! - [`engine`] - `Engine`, the top-level handle applications open
//! - [`error`] - `GnitzError`/`GnitzResult`
//! - [`event`] - the event bus flush/compaction/recovery publish to
//! - [`manifest`] - the durable record of which shards make up a table
//! - [`memtable`] - the in-memory write buffer ahead of a flush
//! - [`plan`] - query planner/VM register-file contract (interface only)
//! - [`protocol`] - the request/response envelope an external RPC adapter would frame
//! - [`refcount`] - shard reference counting for safe concurrent compaction
//! - [`row_accessor`] - zero-copy and owned row access over a `Schema`
//! - [`schema`] - column layout and primary key typing
//! - [`serialize`] - on-disk record and shard header encoding
//! - [`shard`] - immutable on-disk shard reader/writer
//! - [`spine`] - the ordered set of shards backing a table
//! - [`strcodec`] - variable-length string payload encoding
//! - [`udf`] - scalar UDF catalog contract (interface only)
//! - [`util`] - small shared helpers
//! - [`value`] - the owned, dynamically-typed column value
//! - [`wal`] - write-ahead log reader/writer
//! - [`zset`] - `ArenaZSetBatch`, the packed-row Z-set batch type

pub mod arena;
pub mod compactor;
pub mod config;
pub mod cursor;
pub mod dbsp;
pub mod engine;
pub mod error;
pub mod event;
pub mod manifest;
pub mod memtable;
pub mod plan;
pub mod protocol;
pub mod refcount;
pub mod row_accessor;
pub mod schema;
pub mod serialize;
pub mod shard;
pub mod spine;
pub mod strcodec;
pub mod udf;
pub mod util;
pub mod value;
pub mod wal;
pub mod zset;

pub use config::EngineConfig;
pub use engine::{Engine, EngineStats};
pub use error::{ErrorKind, GnitzError, GnitzResult};
pub use schema::{ColumnType, Schema, SchemaBuilder};
pub use value::Value;
pub use zset::ArenaZSetBatch;
