//! Record Store persistence.
//!
//! The whole database is one binary file (see [`codec`][crate::codec]). It
//! is read fully into memory on every command and, for mutating commands,
//! written back in full:
//!
//! 1. serialise to a uniquely named temporary file in the target directory,
//! 2. `fsync` the temporary file,
//! 3. rename it over the target,
//! 4. `fsync` the directory (Unix).
//!
//! The rename is the only step that touches the target path, so a crash at
//! any point leaves either the old file or the new one, never a mix.
//!
//! # Concurrent writers
//!
//! Two processes that load, modify and save the same file would silently
//! lose one update. [`load_snapshot`] returns a [`Snapshot`] (a BLAKE3 digest
//! of the bytes read) and [`save_if_unchanged`] refuses to write with
//! [`MemError::ConcurrentModification`] when the file no longer matches it.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use memstore_types::{MemError, Record, Store};
use tracing::{debug, warn};

use crate::codec;

/// What the store file looked like when it was loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot(Option<blake3::Hash>);

impl Snapshot {
    /// True when the file did not exist at load time.
    pub fn was_absent(&self) -> bool {
        self.0.is_none()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Load
// ─────────────────────────────────────────────────────────────────────────────

/// Load the store at `path`, expecting vectors of length `vector_dim`.
///
/// An absent file is an empty store. The file is never modified.
pub fn load(path: &Path, vector_dim: usize) -> Result<Store, MemError> {
    load_snapshot(path, vector_dim).map(|(store, _)| store)
}

/// Like [`load`], also returning a [`Snapshot`] for [`save_if_unchanged`].
pub fn load_snapshot(path: &Path, vector_dim: usize) -> Result<(Store, Snapshot), MemError> {
    let Some(bytes) = read_if_exists(path)? else {
        debug!(path = %path.display(), "store absent, starting empty");
        return Ok((Store::new(vector_dim), Snapshot(None)));
    };

    let store = codec::decode_binary(&bytes).map_err(|e| MemError::CorruptStore {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if store.vector_dim != vector_dim {
        return Err(MemError::DimensionMismatch {
            path: path.to_path_buf(),
            expected: vector_dim,
            found: store.vector_dim,
        });
    }
    debug!(
        path = %path.display(),
        records = store.len(),
        bytes = bytes.len(),
        "store loaded"
    );
    Ok((store, Snapshot(Some(blake3::hash(&bytes)))))
}

fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>, MemError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(MemError::io("read", path, e)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Save
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory insertion; call [`save`] afterwards to persist.
pub fn append(store: &mut Store, record: Record) -> Result<(), MemError> {
    store.append(record)
}

/// Atomically replace the file at `path` with `store`.
///
/// Missing parent directories are created. On failure the previous file is
/// left untouched.
pub fn save(store: &Store, path: &Path) -> Result<(), MemError> {
    let tmp = write_temp(store, path)?;
    commit(&tmp, path)?;
    debug!(path = %path.display(), records = store.len(), "store saved");
    Ok(())
}

/// [`save`], but only if the file still matches `snapshot`.
pub fn save_if_unchanged(store: &Store, path: &Path, snapshot: &Snapshot) -> Result<(), MemError> {
    let current = Snapshot(read_if_exists(path)?.map(|bytes| blake3::hash(&bytes)));
    if current != *snapshot {
        warn!(path = %path.display(), "store changed on disk since load, refusing to overwrite");
        return Err(MemError::ConcurrentModification {
            path: path.to_path_buf(),
        });
    }
    save(store, path)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    parent_dir(path).join(format!(".{name}.tmp.{}.{nanos}", std::process::id()))
}

/// Steps 1–2: write and flush the temporary file. Returns its path.
pub(crate) fn write_temp(store: &Store, path: &Path) -> Result<PathBuf, MemError> {
    let bytes = codec::encode_binary(store)
        .map_err(|e| MemError::io("encode", path, io::Error::other(e.to_string())))?;

    let dir = parent_dir(path);
    fs::create_dir_all(dir).map_err(|e| MemError::io("create directory", dir, e))?;

    let tmp = temp_path(path);
    let written = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp)
        .and_then(|mut file| {
            file.write_all(&bytes)?;
            file.sync_all()
        });
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(MemError::io("write", &tmp, e));
    }
    Ok(tmp)
}

/// Steps 3–4: rename the temporary file over the target and sync the directory.
pub(crate) fn commit(tmp: &Path, path: &Path) -> Result<(), MemError> {
    if let Err(e) = fs::rename(tmp, path) {
        let _ = fs::remove_file(tmp);
        return Err(MemError::io("rename", path, e));
    }
    #[cfg(unix)]
    {
        let dir = parent_dir(path);
        fs::File::open(dir)
            .and_then(|d| d.sync_all())
            .map_err(|e| MemError::io("sync directory", dir, e))?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u128, text: &str) -> Record {
        Record {
            id,
            ts: 1_718_000_000,
            kind: "state".to_string(),
            weight: 1.0,
            text: text.to_string(),
            vector: vec![0.6, 0.8],
        }
    }

    fn store_with(texts: &[&str]) -> Store {
        let mut store = Store::new(2);
        for (i, t) in texts.iter().enumerate() {
            append(&mut store, record(i as u128 + 1, t)).unwrap();
        }
        store
    }

    // ── load ─────────────────────────────────────────────────────────────────

    #[test]
    fn load_missing_file_is_empty_store() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("memories.hnsw");
        let store = load(&path, 256).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.vector_dim, 256);
        assert!(!path.exists(), "load must not create the file");
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("memories.hnsw");
        let store = store_with(&["first", "second\nwith | pipes"]);
        save(&store, &path).unwrap();
        assert_eq!(load(&path, 2).unwrap(), store);
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("memory").join("nested").join("memories.hnsw");
        save(&store_with(&["x"]), &path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn load_garbage_is_corrupt_store() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("memories.hnsw");
        fs::write(&path, b"not a store").unwrap();
        let err = load(&path, 2).unwrap_err();
        assert!(matches!(err, MemError::CorruptStore { .. }));
        assert!(err.to_string().contains("memories.hnsw"));
    }

    #[test]
    fn load_truncated_file_is_corrupt_store() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("memories.hnsw");
        save(&store_with(&["a", "b"]), &path).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        assert!(matches!(
            load(&path, 2).unwrap_err(),
            MemError::CorruptStore { .. }
        ));
    }

    #[test]
    fn load_with_other_dimension_is_mismatch() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("memories.hnsw");
        save(&store_with(&["a"]), &path).unwrap();
        match load(&path, 256).unwrap_err() {
            MemError::DimensionMismatch {
                expected, found, ..
            } => {
                assert_eq!(expected, 256);
                assert_eq!(found, 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    // ── crash safety ─────────────────────────────────────────────────────────

    #[test]
    fn crash_before_rename_keeps_previous_store() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("memories.hnsw");
        let before = store_with(&["kept"]);
        save(&before, &path).unwrap();

        // Temp file written and flushed, process dies before the rename.
        let tmp = write_temp(&store_with(&["kept", "lost"]), &path).unwrap();
        assert!(tmp.exists());

        assert_eq!(load(&path, 2).unwrap(), before);
    }

    #[test]
    fn save_leaves_no_temp_files() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("memories.hnsw");
        save(&store_with(&["a"]), &path).unwrap();
        save(&store_with(&["a", "b"]), &path).unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("memories.hnsw")]);
    }

    #[test]
    fn save_under_a_file_fails_with_io_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"plain file").unwrap();
        let err = save(&store_with(&["a"]), &blocker.join("memories.hnsw")).unwrap_err();
        assert!(matches!(err, MemError::Io { .. }));
        assert_eq!(fs::read(&blocker).unwrap(), b"plain file");
    }

    // ── concurrent modification ──────────────────────────────────────────────

    #[test]
    fn save_if_unchanged_succeeds_on_clean_base() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("memories.hnsw");
        save(&store_with(&["a"]), &path).unwrap();

        let (mut store, snap) = load_snapshot(&path, 2).unwrap();
        append(&mut store, record(10, "b")).unwrap();
        save_if_unchanged(&store, &path, &snap).unwrap();
        assert_eq!(load(&path, 2).unwrap().len(), 2);
    }

    #[test]
    fn save_if_unchanged_rejects_stale_base() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("memories.hnsw");
        save(&store_with(&["a"]), &path).unwrap();

        let (mut mine, snap) = load_snapshot(&path, 2).unwrap();
        // Another process adds a record in the meantime.
        let theirs = store_with(&["a", "theirs"]);
        save(&theirs, &path).unwrap();

        append(&mut mine, record(99, "mine")).unwrap();
        let err = save_if_unchanged(&mine, &path, &snap).unwrap_err();
        assert!(matches!(err, MemError::ConcurrentModification { .. }));
        assert_eq!(load(&path, 2).unwrap(), theirs);
    }

    #[test]
    fn save_if_unchanged_rejects_file_created_after_load() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("memories.hnsw");
        let (store, snap) = load_snapshot(&path, 2).unwrap();
        assert!(snap.was_absent());

        save(&store_with(&["early bird"]), &path).unwrap();
        assert!(save_if_unchanged(&store, &path, &snap).is_err());
    }
}
