//! Pattern store
//!
//! Holds discrete "I parked here at this time" observations. A new session
//! either reinforces the pattern it matches (same day of week, close in time of
//! day, close in space) or founds a new one.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::PatternConfig;
use crate::geo;
use crate::types::{ParkingPattern, ParkingSession};

/// Confidence every new pattern starts from
const BASE_CONFIDENCE: f64 = 0.5;

/// Searches shorter than this count as "found a spot quickly"
const QUICK_SEARCH_MINUTES: f64 = 5.0;

/// Result of feeding one session into the store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternUpdate {
    pub pattern_id: String,
    /// True when the session founded a new pattern
    pub created: bool,
    pub frequency: u32,
    pub confidence: f64,
}

/// Store of recurring parking patterns
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternStore {
    patterns: Vec<ParkingPattern>,
}

impl PatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Heuristic confidence for a pattern founded by this session
    pub fn initial_confidence(session: &ParkingSession) -> f64 {
        let mut confidence = BASE_CONFIDENCE;
        if session.was_successful {
            confidence += 0.3;
        }
        if session.user_satisfaction.is_some_and(|s| s >= 4) {
            confidence += 0.2;
        }
        if session.search_duration_minutes < QUICK_SEARCH_MINUTES {
            confidence += 0.2;
        }
        if session.venue_label().is_some() {
            confidence += 0.1;
        }
        confidence.clamp(0.0, 1.0)
    }

    /// Reinforce the matching pattern or append a new one.
    ///
    /// `day_of_week` and `time_of_day_minutes` are the local slot of `at`.
    pub fn observe(
        &mut self,
        session: &ParkingSession,
        day_of_week: u8,
        time_of_day_minutes: u16,
        at: DateTime<Utc>,
        config: &PatternConfig,
    ) -> PatternUpdate {
        let location = session.parking_location;

        let matched = self
            .patterns
            .iter()
            .enumerate()
            .filter(|(_, p)| p.day_of_week == day_of_week)
            .filter(|(_, p)| {
                geo::minute_distance(p.time_of_day_minutes, time_of_day_minutes)
                    <= config.match_window_minutes
            })
            .map(|(i, p)| (i, p.location.distance_to(&location)))
            .filter(|(_, d)| *d <= config.match_radius_meters)
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i);

        if let Some(index) = matched {
            let pattern = &mut self.patterns[index];
            pattern.frequency = pattern.frequency.saturating_add(1);
            pattern.confidence = (pattern.confidence + config.reinforcement_step).clamp(0.0, 1.0);
            pattern.last_used_at = pattern.last_used_at.max(at);
            pattern
                .context_tags
                .extend(session.context_tags.iter().cloned());
            if pattern.venue.is_none() {
                pattern.venue = session.venue_label().map(str::to_string);
            }

            return PatternUpdate {
                pattern_id: pattern.id.clone(),
                created: false,
                frequency: pattern.frequency,
                confidence: pattern.confidence,
            };
        }

        let pattern = ParkingPattern {
            id: Uuid::new_v4().to_string(),
            day_of_week,
            time_of_day_minutes,
            location,
            venue: session.venue_label().map(str::to_string),
            frequency: 1,
            confidence: Self::initial_confidence(session),
            last_used_at: at,
            context_tags: session.context_tags.iter().cloned().collect(),
        };

        let update = PatternUpdate {
            pattern_id: pattern.id.clone(),
            created: true,
            frequency: pattern.frequency,
            confidence: pattern.confidence,
        };
        self.patterns.push(pattern);
        update
    }

    /// Drop patterns unused for longer than the retention window, keeping
    /// well-established ones. Returns how many were removed.
    pub fn prune(&mut self, now: DateTime<Utc>, config: &PatternConfig) -> usize {
        // A window reaching past the representable range prunes nothing
        let Some(cutoff) = Duration::try_days(config.retention_days)
            .and_then(|window| now.checked_sub_signed(window))
        else {
            return 0;
        };
        let before = self.patterns.len();

        self.patterns.retain(|p| {
            let established = p.frequency >= config.keep_min_frequency
                && p.confidence > config.keep_min_confidence;
            p.last_used_at >= cutoff || established
        });

        before - self.patterns.len()
    }

    /// Distinct venues, most recently used first
    pub fn recent_venues(&self, limit: usize) -> Vec<String> {
        let mut by_recency: Vec<&ParkingPattern> = self.patterns.iter().collect();
        by_recency.sort_by(|a, b| b.last_used_at.cmp(&a.last_used_at));

        let mut venues: Vec<String> = Vec::new();
        for venue in by_recency.iter().filter_map(|p| p.venue.as_ref()) {
            if venues.len() >= limit {
                break;
            }
            if !venues.contains(venue) {
                venues.push(venue.clone());
            }
        }
        venues
    }

    /// Repair loaded data: drop unusable patterns and clamp the rest.
    /// Returns how many were dropped.
    pub fn sanitize(&mut self) -> usize {
        let before = self.patterns.len();
        self.patterns.retain(|p| {
            p.location.is_valid()
                && p.day_of_week < 7
                && p.time_of_day_minutes < geo::MINUTES_PER_DAY
        });
        for p in &mut self.patterns {
            p.frequency = p.frequency.max(1);
            p.confidence = if p.confidence.is_finite() {
                p.confidence.clamp(0.0, 1.0)
            } else {
                0.0
            };
        }
        before - self.patterns.len()
    }

    pub fn patterns(&self) -> &[ParkingPattern] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Load the store from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize the store to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoPoint;
    use chrono::TimeZone;

    fn monday_9am() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
    }

    fn session_at(lat: f64, lng: f64) -> ParkingSession {
        ParkingSession::new(
            GeoPoint::new(lat - 0.005, lng),
            GeoPoint::new(lat, lng),
            3.0,
            true,
        )
    }

    #[test]
    fn test_initial_confidence_heuristic() {
        let mut session = session_at(37.7749, -122.4194);
        session.was_successful = false;
        session.search_duration_minutes = 12.0;
        assert!((PatternStore::initial_confidence(&session) - 0.5).abs() < 1e-12);

        session.was_successful = true;
        assert!((PatternStore::initial_confidence(&session) - 0.8).abs() < 1e-12);

        session.venue = Some("Office".to_string());
        assert!((PatternStore::initial_confidence(&session) - 0.9).abs() < 1e-12);

        session.user_satisfaction = Some(5);
        session.search_duration_minutes = 1.0;
        assert_eq!(PatternStore::initial_confidence(&session), 1.0);
    }

    #[test]
    fn test_repeat_session_reinforces() {
        let config = PatternConfig::default();
        let mut store = PatternStore::new();
        let session = session_at(37.7749, -122.4194);

        let first = store.observe(&session, 1, 540, monday_9am(), &config);
        let second = store.observe(&session, 1, 560, monday_9am(), &config);

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.pattern_id, second.pattern_id);
        assert_eq!(store.len(), 1);
        assert_eq!(second.frequency, 2);
    }

    #[test]
    fn test_different_day_creates_new_pattern() {
        let config = PatternConfig::default();
        let mut store = PatternStore::new();
        let session = session_at(37.7749, -122.4194);

        store.observe(&session, 1, 540, monday_9am(), &config);
        let update = store.observe(&session, 2, 540, monday_9am(), &config);

        assert!(update.created);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_far_or_late_session_creates_new_pattern() {
        let config = PatternConfig::default();
        let mut store = PatternStore::new();

        store.observe(&session_at(37.7749, -122.4194), 1, 540, monday_9am(), &config);
        // ~220 m north
        store.observe(&session_at(37.7769, -122.4194), 1, 540, monday_9am(), &config);
        // Same spot, 90 minutes later
        store.observe(&session_at(37.7749, -122.4194), 1, 630, monday_9am(), &config);

        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_confidence_capped_and_tags_merged() {
        let config = PatternConfig::default();
        let mut store = PatternStore::new();
        let mut session = session_at(37.7749, -122.4194);
        session.context_tags = vec!["work".to_string()];

        let mut last = 0.0;
        for i in 0..10 {
            if i == 3 {
                session.context_tags = vec!["coffee".to_string()];
            }
            let update = store.observe(&session, 1, 540, monday_9am(), &config);
            assert!(update.confidence >= last);
            assert!(update.confidence <= 1.0);
            last = update.confidence;
        }

        let pattern = &store.patterns()[0];
        assert_eq!(pattern.frequency, 10);
        assert_eq!(pattern.confidence, 1.0);
        assert!(pattern.context_tags.contains("work"));
        assert!(pattern.context_tags.contains("coffee"));
    }

    #[test]
    fn test_prune_keeps_established_patterns() {
        let config = PatternConfig::default();
        let mut store = PatternStore::new();
        let old = monday_9am() - Duration::days(120);

        // Stale one-off pattern
        let mut weak = session_at(37.70, -122.40);
        weak.was_successful = false;
        weak.search_duration_minutes = 20.0;
        store.observe(&weak, 1, 540, old, &config);

        // Stale but established pattern
        let strong = session_at(37.7749, -122.4194);
        for _ in 0..5 {
            store.observe(&strong, 1, 540, old, &config);
        }

        // Fresh pattern
        store.observe(&session_at(37.80, -122.45), 1, 540, monday_9am(), &config);

        let removed = store.prune(monday_9am(), &config);
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 2);
        assert!(store.patterns().iter().all(|p| p.location.lat != 37.70));

        // Pruning again is a no-op
        assert_eq!(store.prune(monday_9am(), &config), 0);
    }

    #[test]
    fn test_backfilled_session_keeps_latest_use() {
        let config = PatternConfig::default();
        let mut store = PatternStore::new();
        let mut weak = session_at(37.7749, -122.4194);
        weak.was_successful = false;
        weak.search_duration_minutes = 20.0;

        store.observe(&weak, 1, 540, monday_9am(), &config);
        // An older session replayed after the fact
        store.observe(&weak, 1, 540, monday_9am() - Duration::days(120), &config);

        assert_eq!(store.patterns()[0].last_used_at, monday_9am());
        assert_eq!(store.prune(monday_9am(), &config), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_prune_with_unrepresentable_window_keeps_everything() {
        let config = PatternConfig {
            retention_days: i64::MAX,
            ..PatternConfig::default()
        };
        let mut store = PatternStore::new();
        store.observe(&session_at(37.7749, -122.4194), 1, 540, monday_9am(), &config);

        assert_eq!(store.prune(monday_9am(), &config), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_recent_venues_deduplicated() {
        let config = PatternConfig::default();
        let mut store = PatternStore::new();
        let start = monday_9am();

        for (i, venue) in ["Gym", "Office", "Gym"].iter().enumerate() {
            let mut session = session_at(37.70 + i as f64 * 0.01, -122.40);
            session.venue = Some(venue.to_string());
            store.observe(&session, 1, 540, start + Duration::hours(i as i64), &config);
        }

        assert_eq!(store.recent_venues(5), vec!["Gym".to_string(), "Office".to_string()]);
        assert_eq!(store.recent_venues(1), vec!["Gym".to_string()]);
    }

    #[test]
    fn test_serialization_is_a_plain_list() {
        let config = PatternConfig::default();
        let mut store = PatternStore::new();
        store.observe(&session_at(37.7749, -122.4194), 1, 540, monday_9am(), &config);

        let json = store.to_json().unwrap();
        assert!(json.starts_with('['));

        let loaded = PatternStore::from_json(&json).unwrap();
        assert_eq!(loaded.patterns(), store.patterns());
    }

    #[test]
    fn test_sanitize_repairs_loaded_patterns() {
        let json = r#"[
            {"id": "a", "day_of_week": 1, "time_of_day_minutes": 540,
             "location": {"lat": 37.77, "lng": -122.41}, "frequency": 0,
             "confidence": 3.5, "last_used_at": "2024-01-15T09:00:00Z"},
            {"id": "b", "day_of_week": 9, "time_of_day_minutes": 540,
             "location": {"lat": 37.77, "lng": -122.41}, "frequency": 2,
             "confidence": 0.5, "last_used_at": "2024-01-15T09:00:00Z"}
        ]"#;
        let mut store = PatternStore::from_json(json).unwrap();

        assert_eq!(store.sanitize(), 1);
        let kept = &store.patterns()[0];
        assert_eq!(kept.id, "a");
        assert_eq!(kept.frequency, 1);
        assert_eq!(kept.confidence, 1.0);
    }
}
