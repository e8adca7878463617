//! Property tests for bounds that must hold for any input

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use park_flux::clusters::{ClusterObservation, ClusterStore};
use park_flux::config::{ClusterConfig, PatternConfig, PredictionConfig};
use park_flux::patterns::PatternStore;
use park_flux::prediction::{PredictionGenerator, PredictionQuery};
use park_flux::{GeoPoint, ParkingSession};

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
}

// Points within a few hundred meters of a fixed origin so merges actually happen
fn nearby_point() -> impl Strategy<Value = GeoPoint> {
    (-0.004f64..0.004, -0.004f64..0.004).prop_map(|(dlat, dlng)| GeoPoint::new(37.77 + dlat, -122.42 + dlng))
}

fn session_strategy() -> impl Strategy<Value = (GeoPoint, f64, bool, Option<u8>, u16, u8)> {
    (
        nearby_point(),
        0.0f64..45.0,
        any::<bool>(),
        proptest::option::of(1u8..=5),
        0u16..1440,
        0u8..7,
    )
}

proptest! {
    #[test]
    fn cluster_radius_and_sessions_survive_optimize(
        points in prop::collection::vec((nearby_point(), any::<bool>()), 1..40),
    ) {
        let config = ClusterConfig::default();
        let mut store = ClusterStore::new();
        for (i, (location, success)) in points.iter().enumerate() {
            store.absorb(
                &ClusterObservation {
                    location: *location,
                    at: base_time() + Duration::minutes(i as i64),
                    hour: 9,
                    day_of_week: 1,
                    was_successful: *success,
                    parking_duration_minutes: None,
                },
                &config,
            );
        }
        prop_assert_eq!(store.total_sessions(), points.len() as u64);

        let before = store.total_sessions();
        let pruned_sessions: u64 = store
            .clusters()
            .iter()
            .filter(|c| {
                c.success_rate <= config.prune_max_success_rate
                    && c.session_count < config.prune_below_sessions
            })
            .map(|c| c.session_count as u64)
            .sum();
        store.optimize(&config);

        prop_assert_eq!(store.total_sessions(), before - pruned_sessions);
        for cluster in store.clusters() {
            prop_assert!(cluster.radius_meters >= config.min_radius_meters);
            prop_assert!(cluster.radius_meters <= config.max_radius_meters);
            prop_assert!((0.0..=1.0).contains(&cluster.success_rate));
        }
    }

    #[test]
    fn pattern_confidence_stays_in_unit_range(
        sessions in prop::collection::vec(session_strategy(), 1..60),
    ) {
        let config = PatternConfig::default();
        let mut store = PatternStore::new();
        for (i, (location, search, success, satisfaction, minute, day)) in sessions.iter().enumerate() {
            let mut session = ParkingSession::new(GeoPoint::new(37.76, -122.41), *location, *search, *success);
            session.user_satisfaction = *satisfaction;
            let update = store.observe(&session, *day, *minute, base_time() + Duration::hours(i as i64), &config);
            prop_assert!((0.0..=1.0).contains(&update.confidence));
        }

        let total: u32 = store.patterns().iter().map(|p| p.frequency).sum();
        prop_assert_eq!(total as usize, sessions.len());
        prop_assert!(store.patterns().iter().all(|p| p.frequency >= 1));
    }

    #[test]
    fn prediction_stays_within_bounds(
        sessions in prop::collection::vec(session_strategy(), 0..30),
        current in nearby_point(),
        minutes_later in 0i64..(60 * 24 * 60),
    ) {
        let config = PredictionConfig::default();
        let pattern_config = PatternConfig::default();
        let cluster_config = ClusterConfig::default();
        let mut patterns = PatternStore::new();
        let mut clusters = ClusterStore::new();

        for (location, search, success, satisfaction, minute, day) in &sessions {
            let mut session = ParkingSession::new(GeoPoint::new(37.76, -122.41), *location, *search, *success);
            session.user_satisfaction = *satisfaction;
            patterns.observe(&session, *day, *minute, base_time(), &pattern_config);
            clusters.absorb(
                &ClusterObservation {
                    location: *location,
                    at: base_time(),
                    hour: (*minute / 60) as u8,
                    day_of_week: *day,
                    was_successful: *success,
                    parking_duration_minutes: None,
                },
                &cluster_config,
            );
        }

        let prediction = PredictionGenerator::new(&config, 0).generate(
            patterns.patterns(),
            clusters.clusters(),
            &PredictionQuery { current, destination: None, context_tags: &[] },
            base_time() + Duration::minutes(minutes_later),
        );

        prop_assert!(prediction.location.is_valid());
        prop_assert!((0.0..=1.0).contains(&prediction.confidence));
        prop_assert!(prediction.radius_meters >= config.min_radius_meters);
        prop_assert!(prediction.radius_meters <= config.max_radius_meters);
        prop_assert!(prediction.alternative_spots.len() <= config.max_alternatives);
        prop_assert!(prediction.suggestions.len() <= config.max_suggestions);
    }
}
