//! Area recommendations
//!
//! Ranks the user's known parking areas around a location. Local ranking is
//! authoritative; assistant suggestions are only ever appended after it.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;

use crate::assistant::AssistantResponse;
use crate::config::{PredictionConfig, RecommendConfig};
use crate::geo;
use crate::scoring::{recency_decay, RelevanceScorer};
use crate::types::{GeoPoint, LocationCluster, ParkingPattern, Recommendation, RecommendationSource};

/// Score that maps to full confidence
const CONFIDENCE_SCORE_SCALE: f64 = 5.0;

/// Ranks clusters for a "where should I park near X" query
pub struct RecommendationEngine<'c> {
    config: &'c RecommendConfig,
    prediction: &'c PredictionConfig,
}

impl<'c> RecommendationEngine<'c> {
    pub fn new(config: &'c RecommendConfig, prediction: &'c PredictionConfig) -> Self {
        Self { config, prediction }
    }

    /// Clusters within `radius_meters` of `location`, best first
    pub fn rank(
        &self,
        patterns: &[ParkingPattern],
        clusters: &[LocationCluster],
        location: &GeoPoint,
        radius_meters: f64,
        now: DateTime<Utc>,
    ) -> Vec<Recommendation> {
        let scorer = RelevanceScorer::new(self.prediction);

        let mut ranked: Vec<Recommendation> = scorer
            .find_nearby_clusters(clusters, location, radius_meters)
            .into_iter()
            .map(|nearby| {
                let cluster = nearby.cluster;
                let members: Vec<&ParkingPattern> = patterns
                    .iter()
                    .filter(|p| p.location.distance_to(&cluster.centroid) <= cluster.radius_meters)
                    .collect();
                let pattern_score: f64 = members
                    .iter()
                    .map(|p| {
                        p.confidence
                            * recency_decay(p.last_used_at, now, self.prediction.recency_horizon_days)
                    })
                    .sum();
                let score = cluster.weight() + pattern_score;

                Recommendation {
                    location: cluster.centroid,
                    score,
                    reasons: cluster_reasons(cluster, members.len()),
                    walk_time_minutes: geo::walk_minutes(
                        nearby.distance_meters,
                        self.prediction.walking_speed_m_per_min,
                    ),
                    confidence: (score / CONFIDENCE_SCORE_SCALE).clamp(0.0, 1.0),
                    source: RecommendationSource::Local,
                    cluster_id: Some(cluster.id.clone()),
                }
            })
            .collect();

        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        ranked
    }

    /// Append assistant spots after the local results
    pub fn append_assistant(
        &self,
        mut local: Vec<Recommendation>,
        response: AssistantResponse,
        location: &GeoPoint,
    ) -> Vec<Recommendation> {
        let spots = response
            .alternative_spots
            .into_iter()
            .filter(|s| s.location.is_valid() && s.confidence.is_finite())
            .take(self.config.max_assistant_spots);

        for spot in spots {
            let confidence = spot.confidence.clamp(0.0, 1.0);
            local.push(Recommendation {
                location: spot.location,
                score: confidence,
                reasons: vec!["Suggested by parking assistant".to_string()],
                walk_time_minutes: geo::walk_minutes(
                    spot.location.distance_to(location),
                    self.prediction.walking_speed_m_per_min,
                ),
                confidence,
                source: RecommendationSource::Assistant,
                cluster_id: None,
            });
        }
        local
    }
}

fn cluster_reasons(cluster: &LocationCluster, pattern_count: usize) -> Vec<String> {
    let mut reasons = Vec::new();
    if cluster.session_count > 1 {
        reasons.push(format!("Parked here {} times", cluster.session_count));
    }
    if cluster.success_rate > 0.0 {
        reasons.push(format!(
            "Found parking {:.0}% of the time",
            cluster.success_rate * 100.0
        ));
    }
    if pattern_count > 0 {
        reasons.push(format!("Matches {pattern_count} of your regular spots"));
    }
    if let Some((hour, _)) = cluster
        .time_patterns
        .iter()
        .max_by_key(|(hour, count)| (**count, std::cmp::Reverse(**hour)))
    {
        reasons.push(format!("Usually visited around {hour:02}:00"));
    }
    reasons
}
