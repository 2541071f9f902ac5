//! `memstore-index` – in-memory nearest-neighbour search.
//!
//! Builds a throwaway similarity index over the vectors of a loaded store so
//! a single query can be answered without scanning every record. Nothing in
//! this crate touches disk; an index lives only as long as the query that
//! built it.
//!
//! # Modules
//!
//! - [`exact`] – [`ExactIndex`][exact::ExactIndex]: brute-force cosine scan,
//!   the reference behaviour every other index approximates.
//! - [`hnsw`] – [`HnswIndex`][hnsw::HnswIndex]: `hnsw_rs` graph for
//!   approximate search over larger stores.
//!
//! [`build`] picks between the two based on the number of points.

pub mod exact;
pub mod hnsw;

use std::cmp::Ordering;

pub use exact::ExactIndex;
pub use hnsw::{HnswIndex, HnswParams};

/// Stores with at most this many points are searched exhaustively.
pub const BRUTE_FORCE_THRESHOLD: usize = 64;

/// A vector to index, tagged with the record it belongs to.
#[derive(Debug, Clone, Copy)]
pub struct Point<'a> {
    pub id: u128,
    /// Record creation time, used to break similarity ties.
    pub ts: i64,
    pub vector: &'a [f32],
}

/// One search hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: u128,
    pub ts: i64,
    /// Cosine similarity to the query, in `[-1.0, 1.0]`.
    pub similarity: f32,
}

/// Compute the cosine similarity between two equal-length vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` if either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

pub(crate) fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Best-first order: higher similarity, then newer `ts`, then larger `id`.
pub fn neighbor_order(a: &Neighbor, b: &Neighbor) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then_with(|| b.ts.cmp(&a.ts))
        .then_with(|| b.id.cmp(&a.id))
}

/// A query-time index over one snapshot of the store.
#[derive(Debug)]
pub enum AnnIndex<'a> {
    Exact(ExactIndex<'a>),
    Graph(HnswIndex<'a>),
}

/// Build an index with the default parameters.
///
/// Small point sets get an [`ExactIndex`]; larger ones an [`HnswIndex`].
pub fn build(points: Vec<Point<'_>>) -> AnnIndex<'_> {
    build_with(points, HnswParams::default(), BRUTE_FORCE_THRESHOLD)
}

/// Build an index, using the graph only above `exact_threshold` points.
pub fn build_with(
    points: Vec<Point<'_>>,
    params: HnswParams,
    exact_threshold: usize,
) -> AnnIndex<'_> {
    if points.len() <= exact_threshold {
        tracing::debug!(points = points.len(), "building exact index");
        AnnIndex::Exact(ExactIndex::new(points))
    } else {
        tracing::debug!(points = points.len(), m = params.m, "building hnsw index");
        AnnIndex::Graph(HnswIndex::build(points, params))
    }
}

impl<'a> AnnIndex<'a> {
    /// Up to `k` nearest points to `query` by cosine similarity, best first.
    ///
    /// If the graph search comes back short (a poorly connected region of the
    /// graph), the query is answered by an exhaustive scan instead, so the
    /// caller always gets `min(k, len)` results.
    pub fn query(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        match self {
            AnnIndex::Exact(index) => index.search(query, k),
            AnnIndex::Graph(index) => {
                let found = index.search(query, k);
                let wanted = k.min(index.len());
                if found.len() < wanted {
                    tracing::warn!(
                        found = found.len(),
                        wanted,
                        "graph search came back short, falling back to exact scan"
                    );
                    ExactIndex::new(index.points().to_vec()).search(query, k)
                } else {
                    found
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            AnnIndex::Exact(index) => index.len(),
            AnnIndex::Graph(index) => index.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when this index answers queries approximately.
    pub fn is_approximate(&self) -> bool {
        matches!(self, AnnIndex::Graph(_))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
