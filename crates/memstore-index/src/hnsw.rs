//! Approximate search through an `hnsw_rs` graph.
//!
//! The graph is built once per query from a snapshot of the store and
//! dropped afterwards. Each point is inserted under its position in the
//! snapshot, so a hit's `d_id` maps straight back to the [`Point`] it came
//! from. Similarities of the returned candidates are recomputed exactly, so
//! graph hits and exact-scan hits rank on the same numbers.

use std::fmt;

use hnsw_rs::anndists::dist::distances::DistCosine;
use hnsw_rs::prelude::{Hnsw, Neighbour};

use crate::{Neighbor, Point, cosine_similarity, neighbor_order};

/// Layer cap enforced by `hnsw_rs`.
pub const MAX_LAYERS: usize = 16;

// ────────────────────────────────────────────────────────────────────────────
// HnswParams
// ────────────────────────────────────────────────────────────────────────────

/// Graph construction and search parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HnswParams {
    /// Links kept per node (layer 0 keeps twice as many).
    pub m: usize,
    /// Beam width while inserting.
    pub ef_construction: usize,
    /// Minimum beam width while querying (raised to `k` when `k` is larger).
    pub ef_search: usize,
    /// Number of layers, at most [`MAX_LAYERS`].
    pub max_layers: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            max_layers: MAX_LAYERS,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// HnswIndex
// ────────────────────────────────────────────────────────────────────────────

/// An HNSW graph over borrowed vectors.
pub struct HnswIndex<'a> {
    points: Vec<Point<'a>>,
    graph: Hnsw<'a, f32, DistCosine>,
    params: HnswParams,
}

impl fmt::Debug for HnswIndex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HnswIndex")
            .field("points", &self.points.len())
            .field("params", &self.params)
            .finish()
    }
}

impl<'a> HnswIndex<'a> {
    /// Insert every point, in order, into a fresh graph.
    pub fn build(points: Vec<Point<'a>>, params: HnswParams) -> Self {
        let graph = Hnsw::new(
            params.m.max(2),
            points.len().max(1),
            params.max_layers.clamp(1, MAX_LAYERS),
            params.ef_construction,
            DistCosine::default(),
        );
        for (pos, p) in points.iter().enumerate() {
            graph.insert((p.vector, pos));
        }
        Self {
            points,
            graph,
            params,
        }
    }

    /// Approximate `k` nearest neighbours of `query`, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        if k == 0 || self.points.is_empty() {
            return Vec::new();
        }
        let ef = self.params.ef_search.max(k);
        let found: Vec<Neighbour> = self.graph.search(query, k, ef);

        let mut hits: Vec<Neighbor> = found
            .iter()
            .filter_map(|n| self.points.get(n.d_id))
            .map(|p| Neighbor {
                id: p.id,
                ts: p.ts,
                similarity: cosine_similarity(query, p.vector),
            })
            .collect();
        hits.sort_by(neighbor_order);
        hits.dedup_by_key(|n| n.id);
        hits.truncate(k);
        hits
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point<'a>] {
        &self.points
    }

    pub fn params(&self) -> HnswParams {
        self.params
    }
}

// ────────────────────────────────────────────────────────────────────────────
