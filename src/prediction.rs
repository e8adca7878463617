//! Prediction synthesis
//!
//! Blends the best matching patterns and the strongest nearby clusters into a
//! single weighted-centroid guess of where the user will park. The generator
//! is pure: it reads a model snapshot and returns a value; caching and
//! locking live in the engine.

use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;

use crate::config::PredictionConfig;
use crate::geo;
use crate::scoring::{NearbyCluster, RelevanceQuery, RelevanceScorer, ScoredPattern};
use crate::types::{AlternativeSpot, GeoPoint, LocationCluster, ParkingPattern, Prediction};

/// Patterns unused for longer than this trigger a freshness hint
const STALE_PATTERN_DAYS: i64 = 14;

/// Predictions below this confidence carry a "check around" hint
const LOW_CONFIDENCE: f64 = 0.5;

/// Local hours treated as rush hour
const RUSH_HOURS: [std::ops::RangeInclusive<u8>; 2] = [7..=9, 16..=18];

/// A prediction request
#[derive(Debug, Clone)]
pub struct PredictionQuery<'a> {
    pub current: GeoPoint,
    pub destination: Option<GeoPoint>,
    pub context_tags: &'a [String],
}

impl PredictionQuery<'_> {
    /// Destination if known, otherwise the current location
    pub fn target(&self) -> GeoPoint {
        self.destination.unwrap_or(self.current)
    }
}

/// Turns scored candidates into a [`Prediction`]
pub struct PredictionGenerator<'c> {
    config: &'c PredictionConfig,
    utc_offset_minutes: i32,
}

impl<'c> PredictionGenerator<'c> {
    pub fn new(config: &'c PredictionConfig, utc_offset_minutes: i32) -> Self {
        Self {
            config,
            utc_offset_minutes,
        }
    }

    /// Predict a parking location from the learned model.
    ///
    /// Falls back to [`PredictionGenerator::fallback`] when nothing in the
    /// model is relevant to the query.
    pub fn generate(
        &self,
        patterns: &[ParkingPattern],
        clusters: &[LocationCluster],
        query: &PredictionQuery<'_>,
        now: DateTime<Utc>,
    ) -> Prediction {
        let target = query.target();
        let (day_of_week, time_of_day_minutes) = geo::local_slot(now, self.utc_offset_minutes);
        let scorer = RelevanceScorer::new(self.config);

        let mut relevant = scorer.find_relevant_patterns(
            patterns,
            &RelevanceQuery {
                target,
                day_of_week,
                time_of_day_minutes,
                context_tags: query.context_tags,
                now,
            },
        );
        relevant.truncate(self.config.patterns_per_prediction);

        let nearby = scorer.find_nearby_clusters(clusters, &target, self.config.search_radius_meters);
        let mut strongest: Vec<&NearbyCluster<'_>> = nearby.iter().collect();
        strongest.sort_by(|a, b| {
            b.cluster
                .weight()
                .partial_cmp(&a.cluster.weight())
                .unwrap_or(Ordering::Equal)
        });
        strongest.truncate(self.config.clusters_per_prediction);

        let weighted: Vec<(&GeoPoint, f64)> = relevant
            .iter()
            .map(|s| (&s.pattern.location, s.pattern.confidence * s.pattern.frequency as f64))
            .chain(strongest.iter().map(|n| (&n.cluster.centroid, n.cluster.weight())))
            .collect();
        let total_weight: f64 = weighted.iter().map(|(_, w)| w.max(0.0)).sum();

        let location = match geo::weighted_centroid(weighted.iter().copied()) {
            Some(location) => location,
            None => return self.fallback(target, now),
        };

        let confidence = (total_weight / self.config.confidence_weight_scale).clamp(0.0, 1.0);
        let radius_meters = self.radius(&relevant, &strongest);
        let reasons = reasons(&relevant, &strongest);
        let alternative_spots = self.alternatives(&nearby);
        let estimated_walk_minutes =
            geo::walk_minutes(location.distance_to(&target), self.config.walking_speed_m_per_min);
        let suggestions = self.suggestions(now, &relevant, confidence, query.context_tags);

        Prediction {
            location,
            radius_meters,
            confidence,
            reasons,
            alternative_spots,
            estimated_walk_minutes,
            suggestions,
            is_fallback: false,
            generated_at: now,
        }
    }

    /// Default prediction used when the model has nothing relevant
    pub fn fallback(&self, target: GeoPoint, now: DateTime<Utc>) -> Prediction {
        let mut suggestions = vec![
            "Look for public parking garages near your destination".to_string(),
            "Street parking is easier to find before peak hours".to_string(),
            "Predictions improve as you record more parking sessions".to_string(),
        ];
        suggestions.truncate(self.config.max_suggestions.max(1));

        Prediction {
            location: target,
            radius_meters: self
                .config
                .fallback_radius_meters
                .clamp(self.config.min_radius_meters, self.config.max_radius_meters),
            confidence: self.config.fallback_confidence,
            reasons: vec!["Not enough parking history for this area yet".to_string()],
            alternative_spots: Vec::new(),
            estimated_walk_minutes: 0,
            suggestions,
            is_fallback: true,
            generated_at: now,
        }
    }

    /// Half the spread of contributing points, or the mean cluster radius if larger
    fn radius(&self, relevant: &[ScoredPattern<'_>], clusters: &[&NearbyCluster<'_>]) -> f64 {
        let points: Vec<GeoPoint> = relevant
            .iter()
            .map(|s| s.pattern.location)
            .chain(clusters.iter().map(|n| n.cluster.centroid))
            .collect();
        let spread = geo::max_pairwise_distance(&points) / 2.0;

        let mean_cluster_radius = if clusters.is_empty() {
            0.0
        } else {
            clusters.iter().map(|n| n.cluster.radius_meters).sum::<f64>() / clusters.len() as f64
        };

        let radius = spread.max(mean_cluster_radius);
        if radius.is_finite() {
            radius.clamp(self.config.min_radius_meters, self.config.max_radius_meters)
        } else {
            self.config.max_radius_meters
        }
    }

    fn alternatives(&self, nearby: &[NearbyCluster<'_>]) -> Vec<AlternativeSpot> {
        let mut ranked: Vec<&NearbyCluster<'_>> = nearby.iter().collect();
        ranked.sort_by(|a, b| {
            b.cluster
                .success_rate
                .partial_cmp(&a.cluster.success_rate)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    a.distance_meters
                        .partial_cmp(&b.distance_meters)
                        .unwrap_or(Ordering::Equal)
                })
        });

        ranked
            .into_iter()
            .take(self.config.max_alternatives)
            .map(|n| AlternativeSpot {
                location: n.cluster.centroid,
                confidence: n.cluster.success_rate.clamp(0.0, 1.0),
                distance_meters: n.distance_meters,
            })
            .collect()
    }

    fn suggestions(
        &self,
        now: DateTime<Utc>,
        relevant: &[ScoredPattern<'_>],
        confidence: f64,
        context_tags: &[String],
    ) -> Vec<String> {
        let mut out = Vec::new();

        let hour = geo::local_hour(now, self.utc_offset_minutes);
        if RUSH_HOURS.iter().any(|r| r.contains(&hour)) {
            out.push("Rush hour: leave a few extra minutes to find a spot".to_string());
        }

        if let Some(top) = relevant.first() {
            if now - top.pattern.last_used_at > Duration::days(STALE_PATTERN_DAYS) {
                out.push(
                    "You have not parked here in a while; availability may have changed"
                        .to_string(),
                );
            }
        }

        if confidence < LOW_CONFIDENCE {
            out.push("Confidence is low; check the alternative spots as well".to_string());
        }

        for tag in context_tags {
            let hint = match tag.trim().to_lowercase().as_str() {
                "work" => "Arrive early to get a spot close to work",
                "shopping" => "Shopping areas fill up quickly; garages are a safer bet",
                "event" => "Expect heavy demand around the event; consider parking further out",
                _ => continue,
            };
            if !out.iter().any(|s| s == hint) {
                out.push(hint.to_string());
            }
        }

        out.truncate(self.config.max_suggestions);
        out
    }
}

fn reasons(relevant: &[ScoredPattern<'_>], clusters: &[&NearbyCluster<'_>]) -> Vec<String> {
    let mut out = Vec::new();

    if let Some(frequent) = relevant.iter().find(|s| s.pattern.frequency > 3) {
        out.push(format!(
            "Parked here {} times before",
            frequent.pattern.frequency
        ));
    }

    if let Some(venue) = relevant
        .iter()
        .filter_map(|s| s.pattern.venue.as_deref())
        .map(str::trim)
        .find(|v| !v.is_empty())
    {
        out.push(format!("Near {venue}"));
    }

    if clusters.iter().any(|n| n.cluster.session_count > 5) {
        out.push("High success rate area".to_string());
    }

    if out.is_empty() {
        out.push("Based on your parking history nearby".to_string());
    }
    out
}
