//! Command-level operations over one store file.
//!
//! Every call is self-contained: load the store, do one thing, save it back
//! if something changed. Nothing is cached between calls, so two engines
//! pointed at different paths (or the same engine used twice) never share
//! state.
//!
//! # Example
//!
//! ```rust
//! use memstore_core::engine::{EngineConfig, MemoryEngine};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let engine = MemoryEngine::new(EngineConfig::new(dir.path().join("memories.hnsw")));
//!
//! engine.add("user prefers the dark theme", "profile", 3.0).unwrap();
//! engine.add("deploy to production tomorrow", "state", 2.5).unwrap();
//!
//! let hits = engine.search("dark theme", 1).unwrap();
//! assert_eq!(hits[0].record.kind, "profile");
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use memstore_index::Point;
use memstore_types::{DEFAULT_VECTOR_DIM, MemError, Record, Store};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::codec;
use crate::compactor::{self, CompactReport};
use crate::encoder::{Embedder, HashingEncoder};
use crate::scorer::{self, SearchHit};
use crate::store::{self, Snapshot};

/// Minimum number of ANN candidates fetched before re-ranking.
const MIN_CANDIDATES: usize = 10;
/// Candidates fetched per requested result.
const CANDIDATES_PER_RESULT: usize = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Clock
// ─────────────────────────────────────────────────────────────────────────────

/// Source of "now" for ids, timestamps and recency.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock stuck at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration and reports
// ─────────────────────────────────────────────────────────────────────────────

/// Everything an engine needs to know about the store it works on.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub store_path: PathBuf,
    /// Vector dimension the store must have. Fixed when the store is created.
    pub vector_dim: usize,
    /// Refuse to save over a file that changed since it was loaded.
    pub strict_writes: bool,
}

impl EngineConfig {
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
            vector_dim: DEFAULT_VECTOR_DIM,
            strict_writes: true,
        }
    }

    pub fn with_vector_dim(mut self, vector_dim: usize) -> Self {
        self.vector_dim = vector_dim;
        self
    }

    pub fn with_strict_writes(mut self, strict_writes: bool) -> Self {
        self.strict_writes = strict_writes;
        self
    }
}

/// Summary of a store's contents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStats {
    pub path: PathBuf,
    pub exists: bool,
    pub version: u32,
    pub vector_dim: usize,
    pub records: usize,
    pub oldest_ts: Option<i64>,
    pub newest_ts: Option<i64>,
    /// Record count per kind, sorted by kind.
    pub kinds: BTreeMap<String, usize>,
}

/// Outcome of a re-embed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReembedReport {
    pub checked: usize,
    /// Records whose stored vector differed from the encoder's output.
    pub updated: usize,
}

/// Outcome of an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    /// Records whose id was already present.
    pub skipped: usize,
    /// Imported records whose vectors were recomputed from their text.
    pub reembedded: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryEngine
// ─────────────────────────────────────────────────────────────────────────────

/// Runs add / search / recent / compact (and friends) against one store.
pub struct MemoryEngine {
    config: EngineConfig,
    embedder: Box<dyn Embedder>,
    clock: Box<dyn Clock>,
}

impl MemoryEngine {
    /// Engine with the hashing encoder and the system clock.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            embedder: Box::new(HashingEncoder::new(config.vector_dim)),
            clock: Box::new(SystemClock),
            config,
        }
    }

    /// Replace the embedder. Its dimension must match the configured one.
    pub fn with_embedder(mut self, embedder: Box<dyn Embedder>) -> Result<Self, MemError> {
        if embedder.dim() != self.config.vector_dim {
            return Err(MemError::Validation(format!(
                "embedder produces {} values, store dimension is {}",
                embedder.dim(),
                self.config.vector_dim
            )));
        }
        self.embedder = embedder;
        Ok(self)
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.config.store_path
    }

    fn load(&self) -> Result<(Store, Snapshot), MemError> {
        store::load_snapshot(&self.config.store_path, self.config.vector_dim)
    }

    fn persist(&self, store: &Store, snapshot: &Snapshot) -> Result<(), MemError> {
        if self.config.strict_writes {
            store::save_if_unchanged(store, &self.config.store_path, snapshot)
        } else {
            store::save(store, &self.config.store_path)
        }
    }

    // ── add ──────────────────────────────────────────────────────────────────

    /// Embed `text` and append it as a new record. Returns the stored record.
    #[instrument(skip(self, text), fields(path = %self.config.store_path.display()))]
    pub fn add(&self, text: &str, kind: &str, weight: f32) -> Result<Record, MemError> {
        validate_new_record(text, kind, weight)?;

        let (mut store, snapshot) = self.load()?;
        let now = self.clock.now();
        let record = Record {
            id: store.next_id(now.timestamp_millis().max(0) as u128),
            ts: now.timestamp(),
            kind: kind.to_string(),
            weight,
            text: text.to_string(),
            vector: self.embedder.embed(text),
        };
        store::append(&mut store, record.clone())?;
        self.persist(&store, &snapshot)?;
        info!(id = %record.id, records = store.len(), "memory added");
        Ok(record)
    }

    // ── search ───────────────────────────────────────────────────────────────

    /// Up to `limit` records ranked by the composite score.
    ///
    /// Candidates come from an index built over the store for this call only;
    /// `max(10, 10 × limit)` of them are re-ranked.
    #[instrument(skip(self, query), fields(path = %self.config.store_path.display()))]
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, MemError> {
        if query.trim().is_empty() {
            return Err(MemError::Validation("query must not be empty".into()));
        }
        validate_limit(limit)?;

        let (store, _) = self.load()?;
        if store.is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = self.embedder.embed(query);
        let now = self.clock.now().timestamp();
        let wanted = limit
            .saturating_mul(CANDIDATES_PER_RESULT)
            .max(MIN_CANDIDATES)
            .min(store.len());

        let points = store
            .records
            .iter()
            .map(|r| Point {
                id: r.id,
                ts: r.ts,
                vector: &r.vector,
            })
            .collect();
        let index = memstore_index::build(points);
        let neighbors = index.query(&query_vec, wanted);

        let by_id: HashMap<u128, &Record> = store.records.iter().map(|r| (r.id, r)).collect();
        let mut hits: Vec<SearchHit> = neighbors
            .iter()
            .filter_map(|n| {
                let rec = by_id.get(&n.id)?;
                Some(SearchHit::new((*rec).clone(), n.similarity, now))
            })
            .collect();
        scorer::rank(&mut hits);
        hits.truncate(limit);

        debug!(
            records = store.len(),
            candidates = neighbors.len(),
            approximate = index.is_approximate(),
            returned = hits.len(),
            "search complete"
        );
        Ok(hits)
    }

    // ── recent ───────────────────────────────────────────────────────────────

    /// Up to `limit` records, newest first. No scoring.
    pub fn recent(&self, limit: usize) -> Result<Vec<Record>, MemError> {
        validate_limit(limit)?;
        let (mut store, _) = self.load()?;
        store.records.sort_by(compactor::newest_first);
        store.records.truncate(limit);
        Ok(store.records)
    }

    // ── compact ──────────────────────────────────────────────────────────────

    /// Keep the `keep` newest records. The file is only rewritten when
    /// something was removed.
    #[instrument(skip(self), fields(path = %self.config.store_path.display()))]
    pub fn compact(&self, keep: usize) -> Result<CompactReport, MemError> {
        let (mut store, snapshot) = self.load()?;
        let report = compactor::compact(&mut store, keep);
        if report.removed > 0 {
            self.persist(&store, &snapshot)?;
            info!(kept = report.kept, removed = report.removed, "store compacted");
        } else {
            debug!(records = report.kept, "nothing to compact");
        }
        Ok(report)
    }

    // ── stats ────────────────────────────────────────────────────────────────

    pub fn stats(&self) -> Result<StoreStats, MemError> {
        let (store, snapshot) = self.load()?;
        let mut kinds = BTreeMap::new();
        for rec in &store.records {
            *kinds.entry(rec.kind.clone()).or_insert(0) += 1;
        }
        Ok(StoreStats {
            path: self.config.store_path.clone(),
            exists: !snapshot.was_absent(),
            version: store.version,
            vector_dim: store.vector_dim,
            records: store.len(),
            oldest_ts: store.records.iter().map(|r| r.ts).min(),
            newest_ts: store.records.iter().map(|r| r.ts).max(),
            kinds,
        })
    }

    // ── reembed ──────────────────────────────────────────────────────────────

    /// Recompute every record's vector with the current embedder.
    ///
    /// Stores written by an older encoder (for instance without CJK bigrams)
    /// otherwise compare stale record vectors against fresh query vectors.
    /// The file is only rewritten when at least one vector changed.
    #[instrument(skip(self), fields(path = %self.config.store_path.display()))]
    pub fn reembed(&self) -> Result<ReembedReport, MemError> {
        let (mut store, snapshot) = self.load()?;
        let mut report = ReembedReport {
            checked: store.len(),
            updated: 0,
        };
        for rec in &mut store.records {
            let fresh = self.embedder.embed(&rec.text);
            if fresh != rec.vector {
                rec.vector = fresh;
                report.updated += 1;
            }
        }
        if report.updated > 0 {
            self.persist(&store, &snapshot)?;
            info!(checked = report.checked, updated = report.updated, "vectors refreshed");
        }
        Ok(report)
    }

    // ── export / import ──────────────────────────────────────────────────────

    /// The whole store in the textual encoding.
    pub fn export_text(&self) -> Result<String, MemError> {
        let (store, _) = self.load()?;
        Ok(codec::encode_text(&store))
    }

    /// Merge records from a text dump or a legacy log into the store.
    ///
    /// Ids already present are skipped. Legacy log records, and dump records
    /// whose dimension differs from this store's, are re-embedded from their
    /// text.
    #[instrument(skip(self, input), fields(path = %self.config.store_path.display()))]
    pub fn import_text(&self, input: &str) -> Result<ImportReport, MemError> {
        let invalid = |e: codec::CodecError| MemError::Validation(format!("import: {e}"));
        let (incoming, reembed) = if codec::looks_like_text_dump(input) {
            let dump = codec::decode_text(input).map_err(invalid)?;
            let reembed = dump.vector_dim != self.config.vector_dim;
            (dump.records, reembed)
        } else {
            (codec::decode_legacy_log(input).map_err(invalid)?, true)
        };
        for rec in &incoming {
            validate_new_record(&rec.text, &rec.kind, rec.weight).map_err(|e| {
                MemError::Validation(format!("import: record {}: {}", rec.id, reason(e)))
            })?;
        }

        let (mut store, snapshot) = self.load()?;
        let mut report = ImportReport {
            imported: 0,
            skipped: 0,
            reembedded: 0,
        };
        for mut rec in incoming {
            if store.contains_id(rec.id) {
                report.skipped += 1;
                continue;
            }
            if reembed {
                rec.vector = self.embedder.embed(&rec.text);
                report.reembedded += 1;
            }
            store::append(&mut store, rec)?;
            report.imported += 1;
        }

        if report.imported > 0 {
            self.persist(&store, &snapshot)?;
        }
        info!(
            imported = report.imported,
            skipped = report.skipped,
            reembedded = report.reembedded,
            "import complete"
        );
        Ok(report)
    }
}

/// Checks every new record must pass, whether added or imported.
fn validate_new_record(text: &str, kind: &str, weight: f32) -> Result<(), MemError> {
    if text.trim().is_empty() {
        return Err(MemError::Validation("text must not be empty".into()));
    }
    if kind.trim().is_empty() {
        return Err(MemError::Validation("kind must not be empty".into()));
    }
    if !weight.is_finite() || weight <= 0.0 {
        return Err(MemError::Validation(format!(
            "weight must be a positive number, got {weight}"
        )));
    }
    Ok(())
}

fn reason(err: MemError) -> String {
    match err {
        MemError::Validation(msg) => msg,
        other => other.to_string(),
    }
}

fn validate_limit(limit: usize) -> Result<(), MemError> {
    if limit == 0 {
        return Err(MemError::Validation("limit must be at least 1".into()));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
