use super::{checksum_body, encode_body, WalBlockHeader, WAL_FORMAT_VERSION, WAL_HEADER_LEN};
use crate::error::GnitzResult;
use crate::row_accessor::RowAccessor;
use crate::schema::Schema;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// The WAL's single writer: opens the file for append, takes an exclusive
/// advisory lock for the lifetime of the handle (spec.md §4.7: "single
/// writer, lock enforced"), and fsyncs after every block by default.
pub struct WalWriter {
    file: File,
    path: PathBuf,
    schema: Schema,
    fsync_every_block: bool,
}

impl WalWriter {
    pub fn open(path: impl AsRef<Path>, schema: Schema, fsync_every_block: bool) -> GnitzResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).read(true).open(&path)?;
        file.lock_exclusive()?;
        Ok(WalWriter { file, path, schema, fsync_every_block })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one block containing `entries`, fsyncing once the write
    /// completes (unless disabled for a test/benchmark run).
    pub fn append_block(&mut self, lsn: u64, table_id: u32, entries: &[(u128, i64, &dyn RowAccessor)]) -> GnitzResult<()> {
        let body = encode_body(&self.schema, entries)?;
        let header = WalBlockHeader {
            lsn,
            table_id,
            entry_count: entries.len() as u32,
            total_size: body.len() as u32,
            format_version: WAL_FORMAT_VERSION,
            checksum: checksum_body(&body),
        };

        let mut out = Vec::with_capacity(super::WAL_HEADER_LEN + body.len());
        header.write_to(&mut out);
        out.extend_from_slice(&body);

        self.file.write_all(&out)?;
        if self.fsync_every_block {
            self.file.sync_all()?;
        }
        Ok(())
    }

    /// Drops every block whose `lsn` is strictly less than `lsn`, keeping
    /// everything at or past it. The Engine calls this with `global_max + 1`
    /// once a manifest publication has proven those earlier blocks are
    /// fully superseded by on-disk shards — but blocks at or above that
    /// watermark are still the *only* durable copy of whatever sits in the
    /// current (unflushed) MemTable, so they must survive the truncation.
    pub fn truncate_before_lsn(&mut self, lsn: u64) -> GnitzResult<()> {
        self.file.sync_all()?;
        self.file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf)?;

        let mut kept = Vec::with_capacity(buf.len());
        let mut cursor = 0usize;
        while cursor + WAL_HEADER_LEN <= buf.len() {
            let header = WalBlockHeader::read_from(&buf[cursor..])?;
            let block_len = WAL_HEADER_LEN + header.total_size as usize;
            if cursor + block_len > buf.len() {
                break;
            }
            if header.lsn >= lsn {
                kept.extend_from_slice(&buf[cursor..cursor + block_len]);
            }
            cursor += block_len;
        }

        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&kept)?;
        self.file.sync_all()?;
        self.file.seek(SeekFrom::End(0))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::WalReader;
    use crate::row_accessor::OwnedRowAccessor;
    use crate::schema::{ColumnType, SchemaBuilder};
    use crate::value::Value;
    use tempfile::tempdir;

    fn schema() -> Schema {
        SchemaBuilder::new()
            .pk("id", ColumnType::U64)
            .column("label", ColumnType::String, false)
            .build()
            .unwrap()
    }

    #[test]
    fn truncate_past_every_block_empties_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.wal");
        let schema = schema();
        let mut wal = WalWriter::open(&path, schema.clone(), true).unwrap();
        let row = OwnedRowAccessor::new(schema, vec![Value::Str("a".into())]);
        let acc: &dyn RowAccessor = &row;
        wal.append_block(1, 0, &[(1u128, 1i64, acc)]).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
        wal.truncate_before_lsn(2).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn truncate_preserves_blocks_at_or_past_the_watermark() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.wal");
        let schema = schema();
        let mut wal = WalWriter::open(&path, schema.clone(), true).unwrap();
        let row = OwnedRowAccessor::new(schema.clone(), vec![Value::Str("a".into())]);
        let acc: &dyn RowAccessor = &row;
        wal.append_block(1, 0, &[(1u128, 1i64, acc)]).unwrap();
        wal.append_block(2, 0, &[(2u128, 1i64, acc)]).unwrap();
        wal.append_block(3, 0, &[(3u128, 1i64, acc)]).unwrap();

        // Superseded by a shard covering lsn 1..=2; only lsn 3 is still
        // live only in the WAL (e.g. an unflushed MemTable record).
        wal.truncate_before_lsn(3).unwrap();
        drop(wal);

        let mut reader = WalReader::open(&path, schema).unwrap();
        let first = reader.next_block().unwrap().expect("block lsn 3 must survive truncation");
        assert_eq!(first.lsn, 3);
        assert_eq!(first.records[0].pk, 3);
        assert!(reader.next_block().unwrap().is_none(), "no block before the watermark should remain");
    }
}
