use super::{checksum_body, decode_entry, WalBlockHeader, WAL_HEADER_LEN};
use crate::error::{GnitzError, GnitzResult};
use crate::row_accessor::OwnedRowAccessor;
use crate::schema::Schema;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// One decoded WAL record: the row that was inserted/removed, plus the
/// algebraic weight of that write (`+1` insert, `-1` remove, or any other
/// signed delta a batched write produced).
pub struct WalRecord {
    pub pk: u128,
    pub weight: i64,
    pub row: OwnedRowAccessor,
}

/// One decoded WAL block.
pub struct WalBlock {
    pub lsn: u64,
    pub table_id: u32,
    pub records: Vec<WalRecord>,
}

/// Forward-only WAL scanner. Reopens the file if its inode changes
/// underneath it (spec.md §4.7: "detects rotation by inode change").
pub struct WalReader {
    path: PathBuf,
    file: File,
    schema: Schema,
    inode: u64,
}

impl WalReader {
    pub fn open(path: impl AsRef<Path>, schema: Schema) -> GnitzResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let inode = file.metadata()?.ino();
        Ok(WalReader { path, file, schema, inode })
    }

    fn reopen_if_rotated(&mut self) -> GnitzResult<()> {
        let meta = std::fs::metadata(&self.path)?;
        if meta.ino() != self.inode {
            self.file = File::open(&self.path)?;
            self.inode = meta.ino();
        }
        Ok(())
    }

    /// Reads the next block. Returns `Ok(None)` on a clean EOF (no bytes
    /// read at a block boundary); returns a `CorruptShard` error on a short
    /// read, a checksum mismatch, or an inconsistent `total_size`.
    pub fn next_block(&mut self) -> GnitzResult<Option<WalBlock>> {
        self.reopen_if_rotated()?;

        let mut header_bytes = [0u8; WAL_HEADER_LEN];
        let n = read_fill(&mut self.file, &mut header_bytes)?;
        if n == 0 {
            return Ok(None);
        }
        if n < WAL_HEADER_LEN {
            return Err(GnitzError::corrupt_shard("short read on WAL block header"));
        }
        let header = WalBlockHeader::read_from(&header_bytes)?;

        let mut body = vec![0u8; header.total_size as usize];
        let n = read_fill(&mut self.file, &mut body)?;
        if n < body.len() {
            return Err(GnitzError::corrupt_shard("short read on WAL block body"));
        }
        if checksum_body(&body) != header.checksum {
            return Err(GnitzError::corrupt_shard("WAL block checksum mismatch"));
        }

        let mut cursor = 0usize;
        let mut records = Vec::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            let (pk, weight, row) = decode_entry(&self.schema, &body, &mut cursor)?;
            records.push(WalRecord { pk, weight, row });
        }
        if cursor != body.len() {
            return Err(GnitzError::corrupt_shard("WAL block body has trailing garbage"));
        }

        Ok(Some(WalBlock { lsn: header.lsn, table_id: header.table_id, records }))
    }

    /// Rewinds to the start of the file, for a fresh recovery pass.
    pub fn rewind(&mut self) -> GnitzResult<()> {
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }
}

/// Reads until `buf` is full or EOF, returning the number of bytes actually
/// read (a `read_exact` that tolerates EOF instead of erroring on it).
fn read_fill(file: &mut File, buf: &mut [u8]) -> GnitzResult<usize> {
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row_accessor::{OwnedRowAccessor as Owned, RowAccessor};
    use crate::schema::{ColumnType, SchemaBuilder};
    use crate::value::Value;
    use crate::wal::WalWriter;
    use tempfile::tempdir;

    fn schema() -> Schema {
        SchemaBuilder::new()
            .pk("id", ColumnType::U64)
            .column("label", ColumnType::String, false)
            .build()
            .unwrap()
    }

    #[test]
    fn reads_back_what_was_written() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.wal");
        let schema = schema();
        let mut writer = WalWriter::open(&path, schema.clone(), true).unwrap();
        let row_a = Owned::new(schema.clone(), vec![Value::Str("a".into())]);
        let row_b = Owned::new(schema.clone(), vec![Value::Str("bb".into())]);
        let a: &dyn RowAccessor = &row_a;
        let b: &dyn RowAccessor = &row_b;
        writer.append_block(1, 7, &[(1u128, 1i64, a)]).unwrap();
        writer.append_block(2, 7, &[(2u128, -1i64, b)]).unwrap();

        let mut reader = WalReader::open(&path, schema).unwrap();
        let block1 = reader.next_block().unwrap().unwrap();
        assert_eq!(block1.lsn, 1);
        assert_eq!(block1.table_id, 7);
        assert_eq!(block1.records[0].pk, 1);
        assert_eq!(block1.records[0].row.get_str_struct(0).content_bytes(), b"a");

        let block2 = reader.next_block().unwrap().unwrap();
        assert_eq!(block2.lsn, 2);
        assert_eq!(block2.records[0].weight, -1);

        assert!(reader.next_block().unwrap().is_none());
    }

    #[test]
    fn long_string_blob_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.wal");
        let schema = schema();
        let mut writer = WalWriter::open(&path, schema.clone(), true).unwrap();
        let long = "this value is definitely longer than the twelve byte inline threshold";
        let row = Owned::new(schema.clone(), vec![Value::Str(long.into())]);
        let acc: &dyn RowAccessor = &row;
        writer.append_block(1, 0, &[(1u128, 1i64, acc)]).unwrap();

        let mut reader = WalReader::open(&path, schema).unwrap();
        let block = reader.next_block().unwrap().unwrap();
        assert_eq!(block.records[0].row.get_str_struct(0).content_bytes(), long.as_bytes());
    }

    #[test]
    fn truncated_body_is_reported_as_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.wal");
        let schema = schema();
        {
            let mut writer = WalWriter::open(&path, schema.clone(), true).unwrap();
            let row = Owned::new(schema.clone(), vec![Value::Str("a".into())]);
            let acc: &dyn RowAccessor = &row;
            writer.append_block(1, 0, &[(1u128, 1i64, acc)]).unwrap();
        }
        let full_len = std::fs::metadata(&path).unwrap().len();
        std::fs::OpenOptions::new().write(true).open(&path).unwrap().set_len(full_len - 4).unwrap();

        let mut reader = WalReader::open(&path, schema).unwrap();
        let err = reader.next_block().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CorruptShard);
    }
}
