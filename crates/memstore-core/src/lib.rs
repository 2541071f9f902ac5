//! `memstore-core` – The memory engine.
//!
//! Owns the single store file and everything that happens to it: turning
//! text into vectors, reading and atomically rewriting the file, ranking
//! search results, and trimming old records.
//!
//! # Modules
//!
//! - [`encoder`] – [`HashingEncoder`][encoder::HashingEncoder]: deterministic
//!   feature-hashing embedder behind the [`Embedder`][encoder::Embedder] trait.
//! - [`codec`] – binary store encoding plus the line-oriented text dump and
//!   legacy log formats used by export and import.
//! - [`store`] – load, append, and crash-safe save of the store file, with an
//!   optional check that nobody else rewrote it in between.
//! - [`scorer`] – the composite score (similarity + weight + recency) and
//!   result ordering.
//! - [`compactor`] – keep-the-newest-N retention.
//! - [`engine`] – [`MemoryEngine`][engine::MemoryEngine]: the add / search /
//!   recent / compact commands (plus stats, export, import and reembed), one
//!   load-modify-save cycle per call.

pub mod codec;
pub mod compactor;
pub mod encoder;
pub mod engine;
pub mod scorer;
pub mod store;

pub use compactor::CompactReport;
pub use engine::{EngineConfig, ImportReport, MemoryEngine, ReembedReport, StoreStats};
pub use memstore_types::{MemError, Record, Store};
pub use scorer::SearchHit;
