use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// On-disk format version written into every store header.
pub const STORE_VERSION: u32 = 1;

/// Embedding dimension used when a store is created without an explicit one.
pub const DEFAULT_VECTOR_DIM: usize = 256;

/// Kind assigned to records added without an explicit `--kind`.
pub const DEFAULT_KIND: &str = "summary";

/// One stored memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Millisecond-derived identifier, unique and increasing within a store.
    pub id: u128,
    /// Creation time, Unix seconds.
    pub ts: i64,
    /// Free-form category label (e.g. "profile", "state", "summary").
    pub kind: String,
    /// Importance multiplier; higher values rank higher in search.
    pub weight: f32,
    /// Arbitrary UTF-8 content.
    pub text: String,
    /// Normalized embedding of `text`, `vector_dim` long.
    pub vector: Vec<f32>,
}

impl Record {
    /// Creation time as a UTC datetime, `None` if `ts` is out of chrono's range.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.ts, 0)
    }
}

/// The full persisted database.
///
/// Records are kept in creation order until a compaction reorders them by
/// recency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    pub version: u32,
    pub vector_dim: usize,
    pub records: Vec<Record>,
}

impl Store {
    /// An empty store at the current format version.
    pub fn new(vector_dim: usize) -> Self {
        Self {
            version: STORE_VERSION,
            vector_dim,
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Largest id currently stored.
    pub fn max_id(&self) -> Option<u128> {
        self.records.iter().map(|r| r.id).max()
    }

    pub fn contains_id(&self, id: u128) -> bool {
        self.records.iter().any(|r| r.id == id)
    }

    /// Id for a record created at `now_millis`.
    ///
    /// Falls back to `max_id + 1` when the clock has not moved past the
    /// newest stored id, so ids stay unique and ordered by insertion.
    pub fn next_id(&self, now_millis: u128) -> u128 {
        match self.max_id() {
            Some(max) if max >= now_millis => max + 1,
            _ => now_millis,
        }
    }

    /// In-memory insertion. Does not touch disk.
    pub fn append(&mut self, record: Record) -> Result<(), MemError> {
        if record.vector.len() != self.vector_dim {
            return Err(MemError::Validation(format!(
                "record vector has {} values, store dimension is {}",
                record.vector.len(),
                self.vector_dim
            )));
        }
        if self.contains_id(record.id) {
            return Err(MemError::Validation(format!(
                "record id {} already exists",
                record.id
            )));
        }
        self.records.push(record);
        Ok(())
    }

    /// Check the structural invariants a loaded store must satisfy.
    ///
    /// Returns a human-readable reason for the first violation found.
    pub fn check_integrity(&self) -> Result<(), String> {
        if self.version != STORE_VERSION {
            return Err(format!(
                "unsupported format version {} (expected {})",
                self.version, STORE_VERSION
            ));
        }
        let mut seen = HashSet::with_capacity(self.records.len());
        for (pos, rec) in self.records.iter().enumerate() {
            if rec.vector.len() != self.vector_dim {
                return Err(format!(
                    "record #{pos} (id {}) has {} vector values, header declares {}",
                    rec.id,
                    rec.vector.len(),
                    self.vector_dim
                ));
            }
            if !seen.insert(rec.id) {
                return Err(format!("duplicate record id {}", rec.id));
            }
        }
        Ok(())
    }
}

/// Errors surfaced by every memstore operation.
#[derive(Error, Debug)]
pub enum MemError {
    #[error("store {} is corrupt: {reason}", .path.display())]
    CorruptStore { path: PathBuf, reason: String },

    #[error(
        "store {} has vector dimension {found}, configured dimension is {expected}",
        .path.display()
    )]
    DimensionMismatch {
        path: PathBuf,
        expected: usize,
        found: usize,
    },

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("{op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store {} was modified by another writer since it was loaded", .path.display())]
    ConcurrentModification { path: PathBuf },
}

impl MemError {
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MemError::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u128, dim: usize) -> Record {
        Record {
            id,
            ts: 1_700_000_000,
            kind: "summary".to_string(),
            weight: 1.0,
            text: format!("memory {id}"),
            vector: vec![0.0; dim],
        }
    }

    #[test]
    fn record_serialization_roundtrip() {
        let rec = Record {
            text: "line one\nline | two \\ three".to_string(),
            ..record(7, 4)
        };
        let json = serde_json::to_string(&rec).unwrap();
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, back);
    }

    #[test]
    fn created_at_matches_ts() {
        let rec = record(1, 2);
        assert_eq!(rec.created_at().unwrap().timestamp(), rec.ts);
    }

    #[test]
    fn next_id_uses_clock_when_ahead() {
        let mut store = Store::new(2);
        store.append(record(100, 2)).unwrap();
        assert_eq!(store.next_id(500), 500);
    }

    #[test]
    fn next_id_stays_monotonic_when_clock_lags() {
        let mut store = Store::new(2);
        store.append(record(100, 2)).unwrap();
        assert_eq!(store.next_id(100), 101);
        assert_eq!(store.next_id(40), 101);
    }

    #[test]
    fn append_rejects_wrong_dimension() {
        let mut store = Store::new(3);
        let err = store.append(record(1, 2)).unwrap_err();
        assert!(matches!(err, MemError::Validation(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn append_rejects_duplicate_id() {
        let mut store = Store::new(2);
        store.append(record(1, 2)).unwrap();
        assert!(store.append(record(1, 2)).is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn integrity_flags_dimension_violation() {
        let mut store = Store::new(2);
        store.records.push(record(1, 3));
        let reason = store.check_integrity().unwrap_err();
        assert!(reason.contains("header declares 2"));
    }

    #[test]
    fn integrity_flags_duplicate_ids() {
        let mut store = Store::new(2);
        store.records.push(record(1, 2));
        store.records.push(record(1, 2));
        assert!(store.check_integrity().unwrap_err().contains("duplicate"));
    }

    #[test]
    fn integrity_flags_unknown_version() {
        let mut store = Store::new(2);
        store.version = 9;
        assert!(store.check_integrity().unwrap_err().contains("version 9"));
    }

    #[test]
    fn error_messages_name_the_path() {
        let err = MemError::DimensionMismatch {
            path: PathBuf::from("memory/memories.hnsw"),
            expected: 256,
            found: 128,
        };
        let msg = err.to_string();
        assert!(msg.contains("memory/memories.hnsw"));
        assert!(msg.contains("128"));
        assert!(msg.contains("256"));
    }
}
