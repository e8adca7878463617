//! Behavioral metrics
//!
//! Running description of how the user parks in general: how long they search,
//! how far they are willing to walk, how often they succeed. Values are
//! smoothed with an exponential moving average; the first session seeds them
//! directly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::ParkingSession;

/// Default EMA smoothing factor
pub const DEFAULT_EMA_ALPHA: f64 = 0.1;

/// Aggregate behavior for one user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehavioralMetrics {
    pub avg_search_time_minutes: f64,
    /// `None` until a session reports a walk distance
    pub preferred_walk_distance_meters: Option<f64>,
    /// Hour of day (0-23) to session count
    pub time_preferences: BTreeMap<u8, u32>,
    /// Venue label to session count
    pub venue_types: BTreeMap<String, u32>,
    pub parking_success_rate: f64,
    /// How often the user parks somewhere new rather than at a known pattern
    pub adaptability_score: f64,
    pub sessions_observed: u32,
}

/// Tracker that folds sessions into [`BehavioralMetrics`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsTracker {
    metrics: BehavioralMetrics,
}

fn ema(previous: f64, sample: f64, alpha: f64) -> f64 {
    alpha * sample + (1.0 - alpha) * previous
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one learned session into the metrics.
    ///
    /// `hour` is the local hour of the session; `founded_pattern` is whether the
    /// session created a new pattern instead of reinforcing one.
    pub fn update(&mut self, session: &ParkingSession, hour: u8, founded_pattern: bool, alpha: f64) {
        let m = &mut self.metrics;
        let success = if session.was_successful { 1.0 } else { 0.0 };
        let novelty = if founded_pattern { 1.0 } else { 0.0 };

        if m.sessions_observed == 0 {
            m.avg_search_time_minutes = session.search_duration_minutes;
            m.parking_success_rate = success;
            m.adaptability_score = novelty;
        } else {
            m.avg_search_time_minutes =
                ema(m.avg_search_time_minutes, session.search_duration_minutes, alpha);
            m.parking_success_rate = ema(m.parking_success_rate, success, alpha).clamp(0.0, 1.0);
            m.adaptability_score = ema(m.adaptability_score, novelty, alpha).clamp(0.0, 1.0);
        }

        if let Some(walk) = session.walk_distance_meters {
            m.preferred_walk_distance_meters = Some(match m.preferred_walk_distance_meters {
                Some(previous) => ema(previous, walk, alpha),
                None => walk,
            });
        }

        *m.time_preferences.entry(hour).or_insert(0) += 1;
        if let Some(venue) = session.venue_label() {
            *m.venue_types.entry(venue.to_string()).or_insert(0) += 1;
        }

        m.sessions_observed = m.sessions_observed.saturating_add(1);
    }

    pub fn metrics(&self) -> &BehavioralMetrics {
        &self.metrics
    }

    /// Hour the user parks at most often
    pub fn peak_hour(&self) -> Option<u8> {
        self.metrics
            .time_preferences
            .iter()
            .max_by_key(|(hour, count)| (**count, std::cmp::Reverse(**hour)))
            .map(|(hour, _)| *hour)
    }

    /// Load the tracker from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
