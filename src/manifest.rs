//! The manifest: the authoritative, versioned list of live shards for every
//! table (spec.md §4.8, §6 "Manifest file format").
//!
//! Grounded on the teacher's `store::store_catalog` — a published, versioned
//! index of open maps — generalized to file-backed atomic tmp+rename
//! publication instead of an in-memory catalog.

use crate::error::{GnitzError, GnitzResult};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const MAGIC: u64 = 0x4D41_4E49_464E_5447;
const VERSION: u64 = 2;
const HEADER_LEN: usize = 64;
const ENTRY_LEN: usize = 184;
const FILENAME_FIELD_LEN: usize = 128;

/// One table's live shard, as recorded in a published manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub table_id: u64,
    pub min_key: u128,
    pub max_key: u128,
    pub min_lsn: u64,
    pub max_lsn: u64,
    pub shard_filename: String,
}

impl ManifestEntry {
    fn write_to(&self, buf: &mut Vec<u8>) -> GnitzResult<()> {
        let name_bytes = self.shard_filename.as_bytes();
        if name_bytes.len() >= FILENAME_FIELD_LEN {
            return Err(GnitzError::layout(format!(
                "shard filename '{}' exceeds the manifest's {FILENAME_FIELD_LEN}-byte field",
                self.shard_filename
            )));
        }
        buf.extend_from_slice(&self.table_id.to_le_bytes());
        buf.extend_from_slice(&self.min_key.to_le_bytes());
        buf.extend_from_slice(&self.max_key.to_le_bytes());
        buf.extend_from_slice(&self.min_lsn.to_le_bytes());
        buf.extend_from_slice(&self.max_lsn.to_le_bytes());
        let mut name_field = [0u8; FILENAME_FIELD_LEN];
        name_field[..name_bytes.len()].copy_from_slice(name_bytes);
        buf.extend_from_slice(&name_field);
        Ok(())
    }

    fn read_from(bytes: &[u8]) -> GnitzResult<Self> {
        if bytes.len() < ENTRY_LEN {
            return Err(GnitzError::corrupt_shard("truncated manifest entry"));
        }
        let table_id = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let min_key = u128::from_le_bytes(bytes[8..24].try_into().unwrap());
        let max_key = u128::from_le_bytes(bytes[24..40].try_into().unwrap());
        let min_lsn = u64::from_le_bytes(bytes[40..48].try_into().unwrap());
        let max_lsn = u64::from_le_bytes(bytes[48..56].try_into().unwrap());
        let name_field = &bytes[56..56 + FILENAME_FIELD_LEN];
        let nul = name_field.iter().position(|&b| b == 0).unwrap_or(name_field.len());
        let shard_filename = std::str::from_utf8(&name_field[..nul])
            .map_err(|_| GnitzError::corrupt_shard("manifest entry filename is not valid UTF-8"))?
            .to_string();
        Ok(ManifestEntry { table_id, min_key, max_key, min_lsn, max_lsn, shard_filename })
    }
}

/// One published manifest: its entries plus the LSN watermark recovery uses
/// to decide which WAL blocks are already durable in a shard.
#[derive(Debug, Clone)]
pub struct ManifestSnapshot {
    pub global_max_lsn: u64,
    pub entries: Vec<ManifestEntry>,
}

impl ManifestSnapshot {
    pub fn entries_for_table(&self, table_id: u64) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(move |e| e.table_id == table_id)
    }

    fn encode(&self) -> GnitzResult<Vec<u8>> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.entries.len() * ENTRY_LEN);
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&(self.entries.len() as u64).to_le_bytes());
        out.extend_from_slice(&self.global_max_lsn.to_le_bytes());
        out.extend_from_slice(&[0u8; 32]);
        debug_assert_eq!(out.len(), HEADER_LEN);
        for entry in &self.entries {
            entry.write_to(&mut out)?;
        }
        Ok(out)
    }

    fn decode(bytes: &[u8]) -> GnitzResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(GnitzError::corrupt_shard("manifest shorter than its header"));
        }
        let magic = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        if magic != MAGIC {
            return Err(GnitzError::corrupt_shard("bad manifest magic"));
        }
        let version = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        if version != VERSION {
            return Err(GnitzError::corrupt_shard(format!("unsupported manifest version {version}")));
        }
        let entry_count = u64::from_le_bytes(bytes[16..24].try_into().unwrap()) as usize;
        let global_max_lsn = u64::from_le_bytes(bytes[24..32].try_into().unwrap());

        let mut entries = Vec::with_capacity(entry_count);
        let mut off = HEADER_LEN;
        for _ in 0..entry_count {
            let end = off + ENTRY_LEN;
            if end > bytes.len() {
                return Err(GnitzError::corrupt_shard("manifest truncated mid-entry"));
            }
            entries.push(ManifestEntry::read_from(&bytes[off..end])?);
            off = end;
        }
        Ok(ManifestSnapshot { global_max_lsn, entries })
    }
}

/// A loaded manifest plus the `(inode, mtime)` it was read at, so a long-
/// lived reader can cheaply notice a newer version was published.
pub struct ManifestReader {
    path: PathBuf,
    stamp: (u64, SystemTime),
    snapshot: ManifestSnapshot,
}

impl ManifestReader {
    fn open(path: &Path) -> GnitzResult<Self> {
        let bytes = fs::read(path)?;
        let snapshot = ManifestSnapshot::decode(&bytes)?;
        let stamp = stat(path)?;
        Ok(ManifestReader { path: path.to_path_buf(), stamp, snapshot })
    }

    pub fn snapshot(&self) -> &ManifestSnapshot {
        &self.snapshot
    }

    /// True if the on-disk manifest's inode or mtime differs from the
    /// stamp this reader was last loaded/reloaded at.
    pub fn has_changed(&self) -> GnitzResult<bool> {
        Ok(stat(&self.path)? != self.stamp)
    }

    pub fn reload(&mut self) -> GnitzResult<()> {
        let bytes = fs::read(&self.path)?;
        self.snapshot = ManifestSnapshot::decode(&bytes)?;
        self.stamp = stat(&self.path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn stat(path: &Path) -> GnitzResult<(u64, SystemTime)> {
    use std::os::unix::fs::MetadataExt;
    let meta = fs::metadata(path)?;
    Ok((meta.ino(), meta.modified()?))
}

#[cfg(not(unix))]
fn stat(path: &Path) -> GnitzResult<(u64, SystemTime)> {
    let meta = fs::metadata(path)?;
    Ok((0, meta.modified()?))
}

/// Owns the manifest file's path and publishes new versions atomically:
/// write `.tmp`, fsync the file, rename over the live path, fsync the
/// containing directory (spec.md §9: "write-to-.tmp + fsync-file + rename +
/// fsync-dir").
pub struct ManifestManager {
    dir: PathBuf,
    path: PathBuf,
}

impl ManifestManager {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let path = dir.join("MANIFEST");
        ManifestManager { dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load_current(&self) -> GnitzResult<ManifestReader> {
        ManifestReader::open(&self.path)
    }

    pub fn publish_new_version(&self, entries: Vec<ManifestEntry>, global_max_lsn: u64) -> GnitzResult<()> {
        let snapshot = ManifestSnapshot { global_max_lsn, entries };
        let bytes = snapshot.encode()?;

        let tmp_path = self.path.with_extension("tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&bytes)?;
            tmp.flush()?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        sync_dir(&self.dir)?;
        Ok(())
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> GnitzResult<()> {
    let f = OpenOptions::new().read(true).open(dir)?;
    f.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> GnitzResult<()> {
    Ok(())
}
