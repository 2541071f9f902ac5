//! Exhaustive cosine scan.

use crate::{Neighbor, Point, cosine_similarity, neighbor_order};

/// Scores every point against the query. Exact, `O(n · dim)` per query.
#[derive(Debug, Clone)]
pub struct ExactIndex<'a> {
    points: Vec<Point<'a>>,
}

impl<'a> ExactIndex<'a> {
    pub fn new(points: Vec<Point<'a>>) -> Self {
        Self { points }
    }

    /// The `k` most similar points, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        if k == 0 {
            return Vec::new();
        }
        let mut hits: Vec<Neighbor> = self
            .points
            .iter()
            .map(|p| Neighbor {
                id: p.id,
                ts: p.ts,
                similarity: cosine_similarity(query, p.vector),
            })
            .collect();
        hits.sort_by(neighbor_order);
        hits.truncate(k);
        hits
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
