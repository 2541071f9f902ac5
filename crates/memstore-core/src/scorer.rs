//! Composite ranking score.
//!
//! ```text
//! score = similarity + weight × 0.5 + 1 / (1 + age_days)
//! ```
//!
//! * `similarity` – cosine similarity to the query, in `[-1, 1]`.
//! * `weight` – manual importance. Unbounded, so a large enough weight pins a
//!   record to the top of every search.
//! * recency – `1.0` for a record created now, decaying towards `0.0` (but
//!   never reaching it) as the record ages. `age_days` is fractional and
//!   clamped at zero for timestamps in the future.

use std::cmp::Ordering;

use memstore_types::Record;
use serde::Serialize;

pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Multiplier applied to a record's weight.
pub const WEIGHT_FACTOR: f32 = 0.5;

/// Age of a record created at `ts`, in fractional days as of `now`.
pub fn age_days(ts: i64, now: i64) -> f32 {
    (now.saturating_sub(ts).max(0) as f64 / SECONDS_PER_DAY) as f32
}

/// Recency component, in `(0, 1]`.
pub fn recency(ts: i64, now: i64) -> f32 {
    1.0 / (1.0 + age_days(ts, now))
}

pub fn score(similarity: f32, weight: f32, ts: i64, now: i64) -> f32 {
    similarity + weight * WEIGHT_FACTOR + recency(ts, now)
}

/// A record returned by search, with the numbers that ranked it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub record: Record,
    pub similarity: f32,
    pub score: f32,
    pub age_days: f32,
}

impl SearchHit {
    pub fn new(record: Record, similarity: f32, now: i64) -> Self {
        Self {
            score: score(similarity, record.weight, record.ts, now),
            age_days: age_days(record.ts, now),
            similarity,
            record,
        }
    }
}

/// Highest score first; ties go to the newer record, then the larger id.
pub fn hit_order(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.record.ts.cmp(&a.record.ts))
        .then_with(|| b.record.id.cmp(&a.record.id))
}

pub fn rank(hits: &mut [SearchHit]) {
    hits.sort_by(hit_order);
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_718_000_000;
    const DAY: i64 = 86_400;

    fn hit(id: u128, ts: i64, weight: f32, similarity: f32) -> SearchHit {
        let record = Record {
            id,
            ts,
            kind: "summary".to_string(),
            weight,
            text: String::new(),
            vector: Vec::new(),
        };
        SearchHit::new(record, similarity, NOW)
    }

    // ── components ───────────────────────────────────────────────────────────

    #[test]
    fn fresh_record_has_full_recency() {
        assert_eq!(age_days(NOW, NOW), 0.0);
        assert_eq!(recency(NOW, NOW), 1.0);
        assert!((score(0.5, 2.0, NOW, NOW) - 2.5).abs() < 1e-6);
    }

    #[test]
    fn age_is_fractional_days() {
        assert!((age_days(NOW - DAY / 2, NOW) - 0.5).abs() < 1e-6);
        assert!((recency(NOW - DAY, NOW) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn future_timestamps_clamp_to_zero_age() {
        assert_eq!(age_days(NOW + 10 * DAY, NOW), 0.0);
    }

    // ── properties ───────────────────────────────────────────────────────────

    #[test]
    fn higher_weight_scores_strictly_higher() {
        for (w1, w2) in [(0.1, 0.2), (1.0, 1.5), (2.5, 3.0), (3.0, 100.0)] {
            assert!(score(0.3, w2, NOW - DAY, NOW) > score(0.3, w1, NOW - DAY, NOW));
        }
    }

    #[test]
    fn newer_scores_strictly_higher() {
        assert!(score(0.3, 1.0, NOW - 60, NOW) > score(0.3, 1.0, NOW - 3600, NOW));
        assert!(score(0.3, 1.0, NOW - DAY, NOW) > score(0.3, 1.0, NOW - 30 * DAY, NOW));
    }

    #[test]
    fn score_decays_monotonically_towards_asymptote() {
        let floor = 0.3 + 1.0 * WEIGHT_FACTOR;
        let mut previous = f32::INFINITY;
        for days in [0, 1, 2, 7, 30, 365, 3650, 36500] {
            let s = score(0.3, 1.0, NOW - days * DAY, NOW);
            assert!(s <= previous);
            assert!(s > floor);
            previous = s;
        }
        assert!(previous - floor < 1e-3);
    }

    // ── rank ─────────────────────────────────────────────────────────────────

    #[test]
    fn rank_orders_by_score_then_ts_then_id() {
        let mut hits = vec![
            hit(1, NOW - DAY, 1.0, 0.0),
            hit(2, NOW, 1.0, 0.0),
            hit(3, NOW, 1.0, 0.0),
            hit(4, NOW - DAY, 5.0, 0.0),
        ];
        rank(&mut hits);
        let ids: Vec<u128> = hits.iter().map(|h| h.record.id).collect();
        assert_eq!(ids, vec![4, 3, 2, 1]);
    }

    #[test]
    fn large_weight_beats_perfect_similarity() {
        let pinned = hit(1, NOW, 10.0, -1.0);
        let relevant = hit(2, NOW, 1.0, 1.0);
        assert_eq!(hit_order(&pinned, &relevant), Ordering::Less);
    }
}
