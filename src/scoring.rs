//! Relevance scoring
//!
//! Ranks learned patterns against a query by spatial, temporal and contextual
//! similarity. The score is a product of independent factors:
//!
//! ```text
//! score = confidence × frequency
//!       × exp(-distance / 1000)
//!       × max(0.5, 1 - dayDiff / 7)
//!       × max(0.3, 1 - timeDiff / 720)
//!       × (1 + contextOverlap)
//!       × exp(-daysSinceLastUse / 30)
//! ```

use chrono::{DateTime, Utc};
use std::cmp::Ordering;

use crate::config::PredictionConfig;
use crate::geo;
use crate::types::{GeoPoint, LocationCluster, ParkingPattern};

/// Distance scale (meters) of the spatial factor
const DISTANCE_SCALE_METERS: f64 = 1000.0;

/// What a relevance lookup is asking about
#[derive(Debug, Clone)]
pub struct RelevanceQuery<'a> {
    /// Destination if known, otherwise the current location
    pub target: GeoPoint,
    pub day_of_week: u8,
    pub time_of_day_minutes: u16,
    pub context_tags: &'a [String],
    pub now: DateTime<Utc>,
}

/// A pattern that passed the filters, with its score
#[derive(Debug, Clone)]
pub struct ScoredPattern<'a> {
    pub pattern: &'a ParkingPattern,
    pub score: f64,
    pub distance_meters: f64,
}

/// A cluster inside the search radius
#[derive(Debug, Clone)]
pub struct NearbyCluster<'a> {
    pub cluster: &'a LocationCluster,
    pub distance_meters: f64,
}

/// exp(-days/horizon) freshness factor for something last used at `last_used`
pub fn recency_decay(last_used: DateTime<Utc>, now: DateTime<Utc>, horizon_days: f64) -> f64 {
    let days = ((now - last_used).num_seconds() as f64 / 86_400.0).max(0.0);
    (-days / horizon_days).exp()
}

/// Share of the query tags the pattern carries.
///
/// `None` when either side has no tags, meaning context does not apply.
pub fn context_overlap<'t, I>(pattern_tags: I, query_tags: &[String]) -> Option<f64>
where
    I: IntoIterator<Item = &'t String>,
{
    if query_tags.is_empty() {
        return None;
    }
    let pattern_tags: Vec<String> = pattern_tags
        .into_iter()
        .map(|t| t.trim().to_lowercase())
        .collect();
    if pattern_tags.is_empty() {
        return None;
    }

    let shared = query_tags
        .iter()
        .filter(|t| pattern_tags.contains(&t.trim().to_lowercase()))
        .count();
    Some(shared as f64 / query_tags.len() as f64)
}

/// Scores patterns and clusters for a query
pub struct RelevanceScorer<'c> {
    config: &'c PredictionConfig,
}

impl<'c> RelevanceScorer<'c> {
    pub fn new(config: &'c PredictionConfig) -> Self {
        Self { config }
    }

    /// Patterns near the target at a similar day and time, best first
    pub fn find_relevant_patterns<'p>(
        &self,
        patterns: &'p [ParkingPattern],
        query: &RelevanceQuery<'_>,
    ) -> Vec<ScoredPattern<'p>> {
        let mut scored: Vec<ScoredPattern<'p>> = patterns
            .iter()
            .filter_map(|pattern| self.score_pattern(pattern, query))
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    a.distance_meters
                        .partial_cmp(&b.distance_meters)
                        .unwrap_or(Ordering::Equal)
                })
        });
        scored.truncate(self.config.max_relevant_patterns);
        scored
    }

    fn score_pattern<'p>(
        &self,
        pattern: &'p ParkingPattern,
        query: &RelevanceQuery<'_>,
    ) -> Option<ScoredPattern<'p>> {
        let distance = pattern.location.distance_to(&query.target);
        if distance > self.config.search_radius_meters {
            return None;
        }

        let day_diff = geo::day_distance(pattern.day_of_week, query.day_of_week);
        if day_diff > self.config.max_day_distance {
            return None;
        }

        let time_diff = geo::minute_distance(pattern.time_of_day_minutes, query.time_of_day_minutes);
        if time_diff > self.config.max_time_distance_minutes {
            return None;
        }

        let overlap = context_overlap(&pattern.context_tags, query.context_tags);
        if overlap == Some(0.0) {
            return None;
        }

        let score = pattern.confidence
            * pattern.frequency as f64
            * (-distance / DISTANCE_SCALE_METERS).exp()
            * (1.0 - day_diff as f64 / 7.0).max(0.5)
            * (1.0 - time_diff as f64 / 720.0).max(0.3)
            * (1.0 + overlap.unwrap_or(0.0))
            * recency_decay(pattern.last_used_at, query.now, self.config.recency_horizon_days);

        Some(ScoredPattern {
            pattern,
            score,
            distance_meters: distance,
        })
    }

    /// All clusters whose centroid is within `radius_meters`, closest first
    pub fn find_nearby_clusters<'p>(
        &self,
        clusters: &'p [LocationCluster],
        target: &GeoPoint,
        radius_meters: f64,
    ) -> Vec<NearbyCluster<'p>> {
        let mut nearby: Vec<NearbyCluster<'p>> = clusters
            .iter()
            .map(|cluster| NearbyCluster {
                cluster,
                distance_meters: cluster.centroid.distance_to(target),
            })
            .filter(|n| n.distance_meters <= radius_meters)
            .collect();

        nearby.sort_by(|a, b| {
            a.distance_meters
                .partial_cmp(&b.distance_meters)
                .unwrap_or(Ordering::Equal)
        });
        nearby
    }
}
