//! File persistence for the memory store and the reinforcement tracker.
//!
//! The store is written as a pair that must be read together:
//!
//! - the vector file (`memory_index.bin`): a bincode [`VectorSnapshot`]
//!   holding every embedding in id order;
//! - the metadata sidecar (`memory_metadata.json`): a JSON array of
//!   [`MemoryRecord`], array index = id.
//!
//! The vector file carries a CRC-32 of the sidecar bytes, so a pair from two
//! different writes is detected on load.
//!
//! Every write goes to a temp file in the target directory and is renamed
//! into place. Before the rename the previous file is copied to
//! `<file>.bak.1` (older copies shift up to `backup_count`). On load a
//! corrupt primary is renamed to `<file>.corrupt` and the newest usable
//! backup pair is tried; if none works the store starts empty. Loading
//! never fails.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::error::{MnemoError, Result};
use crate::types::MemoryRecord;

/// Current vector file format version.
pub const SNAPSHOT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// CRC-32 checksum helper
// ---------------------------------------------------------------------------

/// CRC-32 (ISO 3309 / ITU-T V.42) of `data`.
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            if crc & 1 == 1 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

// ---------------------------------------------------------------------------
// Formats
// ---------------------------------------------------------------------------

/// On-disk layout of the vector file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSnapshot {
    /// Format version.
    pub version: u32,
    /// Length of every vector.
    pub dimensions: usize,
    /// Number of vectors (and of metadata records).
    pub count: usize,
    /// CRC-32 of the metadata sidecar written alongside.
    pub checksum: u32,
    /// Vectors in id order.
    pub vectors: Vec<Vec<f32>>,
}

/// Borrowing twin of [`VectorSnapshot`]; serializes identically.
#[derive(Serialize)]
struct VectorSnapshotRef<'a> {
    version: u32,
    dimensions: usize,
    count: usize,
    checksum: u32,
    vectors: Vec<&'a [f32]>,
}

/// A decoded store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    /// Records in id order.
    pub records: Vec<MemoryRecord>,
    /// Vectors in id order.
    pub vectors: Vec<Vec<f32>>,
}

/// A store encoded and ready to be written.
#[derive(Debug, Clone)]
pub struct EncodedStore {
    metadata: Vec<u8>,
    vectors: Vec<u8>,
    count: usize,
}

impl EncodedStore {
    /// Number of memories in the encoding.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }
}

/// What loading found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A valid store (or tracker file) was read.
    Loaded {
        /// Records (or tracked candidates) restored.
        count: usize,
    },
    /// Nothing on disk; started fresh.
    Absent,
    /// Files existed but could not be used; they were renamed aside and the
    /// component started fresh.
    Corrupt {
        /// Why the files were rejected.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Store pair
// ---------------------------------------------------------------------------

/// Encode records and their vectors. Both must be in id order.
///
/// # Errors
///
/// [`MnemoError::Serialization`] if encoding fails, or if the record and
/// vector counts differ.
pub fn encode_store<'a>(
    records: &[MemoryRecord],
    vectors: impl Iterator<Item = &'a [f32]>,
    dimensions: usize,
) -> Result<EncodedStore> {
    let metadata =
        serde_json::to_vec_pretty(records).map_err(|e| MnemoError::Serialization(e.to_string()))?;
    let vectors: Vec<&[f32]> = vectors.collect();
    if vectors.len() != records.len() {
        return Err(MnemoError::Serialization(format!(
            "{} vectors for {} records",
            vectors.len(),
            records.len()
        )));
    }
    let snapshot = VectorSnapshotRef {
        version: SNAPSHOT_VERSION,
        dimensions,
        count: records.len(),
        checksum: crc32(&metadata),
        vectors,
    };
    let vectors =
        bincode::serialize(&snapshot).map_err(|e| MnemoError::Serialization(e.to_string()))?;
    Ok(EncodedStore {
        metadata,
        vectors,
        count: records.len(),
    })
}

/// Write an encoded store pair, rotating backups first.
///
/// # Errors
///
/// [`MnemoError::Persist`] naming the file that could not be written. The
/// previous pair (or its backup) stays loadable.
pub fn write_store(storage: &StorageConfig, encoded: &EncodedStore) -> Result<()> {
    let start = Instant::now();
    let index_path = storage.index_path();
    let metadata_path = storage.metadata_path();

    let metadata_tmp = stage(&metadata_path, &encoded.metadata)?;
    let index_tmp = stage(&index_path, &encoded.vectors)?;

    rotate_backups(&metadata_path, storage.backup_count)?;
    rotate_backups(&index_path, storage.backup_count)?;

    commit(metadata_tmp, &metadata_path)?;
    commit(index_tmp, &index_path)?;

    debug!(
        count = encoded.count,
        bytes = encoded.metadata.len() + encoded.vectors.len(),
        elapsed_us = start.elapsed().as_micros(),
        "Store persisted"
    );
    Ok(())
}

/// Load the store pair, falling back to backups and finally to an empty
/// store.
#[must_use]
pub fn load_store(storage: &StorageConfig, dimensions: usize) -> (StoreSnapshot, LoadOutcome) {
    let index_path = storage.index_path();
    let metadata_path = storage.metadata_path();

    let mut primary_failure = None;
    match read_pair(&index_path, &metadata_path, dimensions) {
        Ok(Some(snapshot)) => {
            let count = snapshot.records.len();
            info!(count, path = %metadata_path.display(), "Memory store loaded");
            return (snapshot, LoadOutcome::Loaded { count });
        }
        Ok(None) => {}
        Err(reason) => {
            warn!(path = %metadata_path.display(), %reason, "Memory store unreadable, setting it aside");
            quarantine(&index_path);
            quarantine(&metadata_path);
            primary_failure = Some(reason);
        }
    }

    for n in 1..=storage.backup_count {
        let index_bak = backup_path(&index_path, n);
        let metadata_bak = backup_path(&metadata_path, n);
        match read_pair(&index_bak, &metadata_bak, dimensions) {
            Ok(Some(snapshot)) => {
                let count = snapshot.records.len();
                warn!(count, backup = n, "Memory store recovered from backup");
                return (snapshot, LoadOutcome::Loaded { count });
            }
            Ok(None) => {}
            Err(reason) => warn!(backup = n, %reason, "Backup unusable"),
        }
    }

    match primary_failure {
        Some(reason) => (StoreSnapshot::default(), LoadOutcome::Corrupt { reason }),
        None => {
            info!(dir = %storage.data_dir.display(), "No memory store found, starting fresh");
            (StoreSnapshot::default(), LoadOutcome::Absent)
        }
    }
}

/// Read and cross-check one pair. `Ok(None)` means neither file exists.
fn read_pair(
    index_path: &Path,
    metadata_path: &Path,
    dimensions: usize,
) -> std::result::Result<Option<StoreSnapshot>, String> {
    let index_bytes = read_optional(index_path).map_err(|e| format!("reading index: {e}"))?;
    let metadata_bytes = read_optional(metadata_path).map_err(|e| format!("reading metadata: {e}"))?;

    let (index_bytes, metadata_bytes) = match (index_bytes, metadata_bytes) {
        (None, None) => return Ok(None),
        (Some(_), None) => return Err("metadata file missing".to_string()),
        (None, Some(_)) => return Err("index file missing".to_string()),
        (Some(i), Some(m)) => (i, m),
    };

    let records: Vec<MemoryRecord> =
        serde_json::from_slice(&metadata_bytes).map_err(|e| format!("metadata: {e}"))?;
    let snapshot: VectorSnapshot =
        bincode::deserialize(&index_bytes).map_err(|e| format!("index: {e}"))?;

    if snapshot.version != SNAPSHOT_VERSION {
        return Err(format!("unsupported index version {}", snapshot.version));
    }
    if snapshot.checksum != crc32(&metadata_bytes) {
        return Err("index and metadata are from different writes (checksum mismatch)".to_string());
    }
    if snapshot.dimensions != dimensions {
        return Err(format!(
            "stored vectors have {} dimensions, provider produces {dimensions}",
            snapshot.dimensions
        ));
    }
    if snapshot.count != records.len() || snapshot.vectors.len() != records.len() {
        return Err(format!(
            "{} vectors for {} records",
            snapshot.vectors.len(),
            records.len()
        ));
    }
    if let Some(bad) = snapshot.vectors.iter().find(|v| v.len() != dimensions) {
        return Err(format!("vector of length {} in a {dimensions}-d index", bad.len()));
    }
    if let Some((pos, rec)) = records
        .iter()
        .enumerate()
        .find(|(pos, rec)| rec.id.index() != *pos)
    {
        return Err(format!("record {} stored at position {pos}", rec.id));
    }

    Ok(Some(StoreSnapshot {
        records,
        vectors: snapshot.vectors,
    }))
}

// ---------------------------------------------------------------------------
// Single JSON documents
// ---------------------------------------------------------------------------

/// Atomically write `value` as pretty JSON, rotating backups first.
///
/// # Errors
///
/// [`MnemoError::Serialization`] or [`MnemoError::Persist`].
pub fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T, backup_count: u32) -> Result<()> {
    let bytes =
        serde_json::to_vec_pretty(value).map_err(|e| MnemoError::Serialization(e.to_string()))?;
    let tmp = stage(path, &bytes)?;
    rotate_backups(path, backup_count)?;
    commit(tmp, path)
}

/// Read a JSON document. `Ok(None)` if the file does not exist; on a parse
/// failure the file is renamed aside and the reason returned.
///
/// # Errors
///
/// A human-readable reason when the file exists but is unusable.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> std::result::Result<Option<T>, String> {
    let Some(bytes) = read_optional(path).map_err(|e| e.to_string())? else {
        return Ok(None);
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            quarantine(path);
            Err(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

/// `<path>.bak.<n>`
#[must_use]
pub fn backup_path(path: &Path, n: u32) -> PathBuf {
    suffixed(path, &format!(".bak.{n}"))
}

/// `<path>.corrupt`
#[must_use]
pub fn corrupt_path(path: &Path) -> PathBuf {
    suffixed(path, ".corrupt")
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn persist_error(path: &Path) -> impl FnOnce(io::Error) -> MnemoError + '_ {
    move |source| MnemoError::Persist {
        path: path.to_path_buf(),
        source,
    }
}

/// Write `bytes` to a synced temp file next to `path`.
fn stage(path: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(persist_error(path))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(persist_error(path))?;
    tmp.write_all(bytes).map_err(persist_error(path))?;
    tmp.as_file().sync_all().map_err(persist_error(path))?;
    Ok(tmp)
}

fn commit(tmp: NamedTempFile, path: &Path) -> Result<()> {
    tmp.persist(path).map_err(|e| MnemoError::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// Shift `path.bak.N` up by one and copy the current file to `.bak.1`.
fn rotate_backups(path: &Path, max: u32) -> Result<()> {
    if max == 0 || !path.exists() {
        return Ok(());
    }
    for i in (1..max).rev() {
        let src = backup_path(path, i);
        if src.exists() {
            let dst = backup_path(path, i + 1);
            fs::rename(&src, &dst).map_err(persist_error(&dst))?;
        }
    }
    let first = backup_path(path, 1);
    fs::copy(path, &first).map_err(persist_error(&first))?;
    Ok(())
}

/// Move an unusable file out of the way. Best effort.
fn quarantine(path: &Path) {
    if !path.exists() {
        return;
    }
    let dest = corrupt_path(path);
    if let Err(e) = fs::rename(path, &dest) {
        warn!(path = %path.display(), error = %e, "Could not set corrupt file aside");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryId;
    use chrono::Utc;

    fn storage(dir: &Path) -> StorageConfig {
        StorageConfig {
            data_dir: dir.to_path_buf(),
            ..StorageConfig::default()
        }
    }

    fn sample(n: u64) -> (Vec<MemoryRecord>, Vec<Vec<f32>>) {
        let now = Utc::now();
        let records = (0..n)
            .map(|i| {
                MemoryRecord::new(
                    MemoryId(i),
                    format!("memory number {i}"),
                    now,
                    1.0,
                    vec!["Ohio".to_string()],
                )
            })
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let vectors = (0..n).map(|i| vec![i as f32, 1.0, 0.0]).collect();
        (records, vectors)
    }

    fn write(storage: &StorageConfig, records: &[MemoryRecord], vectors: &[Vec<f32>]) {
        let encoded = encode_store(records, vectors.iter().map(Vec::as_slice), 3).expect("encode");
        write_store(storage, &encoded).expect("write");
    }

    #[test]
    fn crc32_known_vector() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = storage(dir.path());
        let (records, vectors) = sample(4);
        write(&storage, &records, &vectors);

        let (snapshot, outcome) = load_store(&storage, 3);
        assert_eq!(outcome, LoadOutcome::Loaded { count: 4 });
        assert_eq!(snapshot.records, records);
        assert_eq!(snapshot.vectors, vectors);
    }

    #[test]
    fn missing_files_are_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (snapshot, outcome) = load_store(&storage(dir.path()), 3);
        assert_eq!(outcome, LoadOutcome::Absent);
        assert!(snapshot.records.is_empty());
    }

    #[test]
    fn corrupt_metadata_is_set_aside() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = StorageConfig {
            backup_count: 0,
            ..storage(dir.path())
        };
        let (records, vectors) = sample(2);
        write(&storage, &records, &vectors);
        fs::write(storage.metadata_path(), b"{ not json").expect("clobber");

        let (snapshot, outcome) = load_store(&storage, 3);
        assert!(matches!(outcome, LoadOutcome::Corrupt { .. }));
        assert!(snapshot.records.is_empty());
        assert!(corrupt_path(&storage.metadata_path()).exists());
        assert!(!storage.metadata_path().exists());
    }

    #[test]
    fn half_written_pair_recovers_from_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = storage(dir.path());
        let (records, vectors) = sample(3);
        write(&storage, &records[..2], &vectors[..2]);
        write(&storage, &records, &vectors);

        // Simulate a crash after the metadata rename: new metadata, old index.
        fs::copy(backup_path(&storage.index_path(), 1), storage.index_path()).expect("copy");

        let (snapshot, outcome) = load_store(&storage, 3);
        assert_eq!(outcome, LoadOutcome::Loaded { count: 2 });
        assert_eq!(snapshot.records, records[..2].to_vec());
    }

    #[test]
    fn dimension_change_starts_fresh() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = StorageConfig {
            backup_count: 0,
            ..storage(dir.path())
        };
        let (records, vectors) = sample(1);
        write(&storage, &records, &vectors);
        let (_, outcome) = load_store(&storage, 384);
        match outcome {
            LoadOutcome::Corrupt { reason } => assert!(reason.contains("dimensions")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn backups_rotate_up_to_limit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = storage(dir.path());
        let (records, vectors) = sample(1);
        for _ in 0..4 {
            write(&storage, &records, &vectors);
        }
        assert!(backup_path(&storage.index_path(), 1).exists());
        assert!(backup_path(&storage.index_path(), 2).exists());
        assert!(!backup_path(&storage.index_path(), 3).exists());
    }

    #[test]
    fn json_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("doc.json");
        assert_eq!(load_json::<Vec<u32>>(&path), Ok(None));

        save_json(&path, &vec![1_u32, 2, 3], 1).expect("save");
        assert_eq!(load_json::<Vec<u32>>(&path), Ok(Some(vec![1, 2, 3])));

        fs::write(&path, b"[1, 2,").expect("clobber");
        assert!(load_json::<Vec<u32>>(&path).is_err());
        assert!(corrupt_path(&path).exists());
    }
}
