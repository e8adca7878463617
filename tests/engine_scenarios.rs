//! End-to-end behavior of the parking engine through its public API.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use park_flux::analytics::{self, AnalyticsSink};
use park_flux::assistant::{AssistantRequest, AssistantResponse, ParkingAssistant};
use park_flux::clock::ManualClock;
use park_flux::storage::{FileStorage, MemoryStorage, PATTERNS_KEY};
use park_flux::{
    AlternativeSpot, EngineBuilder, EngineConfig, GeoPoint, ParkResult, ParkingEngine,
    ParkingSession, RecommendationSource,
};

// Monday 2024-01-15 09:00 UTC
fn monday_9am() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
}

fn spot() -> GeoPoint {
    GeoPoint::new(37.7749, -122.4194)
}

fn session_at(location: GeoPoint) -> ParkingSession {
    ParkingSession::new(GeoPoint::new(37.7700, -122.4100), location, 3.0, true)
}

struct Harness {
    engine: ParkingEngine,
    clock: Arc<ManualClock>,
    storage: Arc<MemoryStorage>,
}

async fn harness_with(config: EngineConfig, builder: impl FnOnce(EngineBuilder) -> EngineBuilder) -> Harness {
    let clock = Arc::new(ManualClock::new(monday_9am()));
    let storage = Arc::new(MemoryStorage::new());
    let engine = builder(
        EngineBuilder::new(config)
            .clock(clock.clone())
            .storage(storage.clone()),
    )
    .build()
    .await
    .unwrap();
    Harness {
        engine,
        clock,
        storage,
    }
}

async fn harness() -> Harness {
    harness_with(EngineConfig::default(), |b| b).await
}

#[tokio::test]
async fn repeated_session_reinforces_instead_of_duplicating() {
    let h = harness().await;

    let first = h.engine.learn(&session_at(spot())).unwrap();
    h.clock.advance(Duration::minutes(20));
    // ~30 m away, 20 minutes later, same weekday
    let second = h
        .engine
        .learn(&session_at(GeoPoint::new(37.77517, -122.4194)))
        .unwrap();

    assert!(first.pattern.created);
    assert!(!second.pattern.created);
    assert_eq!(first.pattern.pattern_id, second.pattern.pattern_id);

    let patterns = h.engine.patterns();
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].frequency, 2);
}

#[tokio::test]
async fn confidence_never_decreases_and_caps_at_one() {
    let h = harness().await;
    let mut session = session_at(spot());
    session.was_successful = false;
    session.search_duration_minutes = 12.0;

    let confidences: Vec<f64> = (0..12)
        .map(|_| h.engine.learn(&session).unwrap().pattern.confidence)
        .collect();

    assert_eq!(confidences[0], 0.5);
    assert!(confidences.windows(2).all(|w| w[1] >= w[0]));
    assert!(confidences.iter().all(|c| *c <= 1.0));
    assert_eq!(*confidences.last().unwrap(), 1.0);
}

#[tokio::test]
async fn five_weekly_sessions_predict_the_spot() {
    let h = harness().await;

    for week in 0..5 {
        h.clock.set(monday_9am() + Duration::weeks(week));
        h.engine.learn(&session_at(spot())).unwrap();
    }

    let patterns = h.engine.patterns();
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].frequency, 5);
    assert_eq!(patterns[0].confidence, 1.0);

    let prediction = h.engine.predict(spot(), None, &[]).unwrap();
    assert!(!prediction.is_fallback);
    assert!(prediction.confidence >= 0.5, "confidence {}", prediction.confidence);
    assert!(prediction.location.distance_to(&spot()) <= prediction.radius_meters);
    assert!(prediction.reasons.contains(&"Parked here 5 times before".to_string()));
}

#[tokio::test]
async fn empty_model_returns_fallback() {
    let h = harness().await;

    let prediction = h.engine.predict(spot(), None, &[]).unwrap();

    assert!(prediction.is_fallback);
    assert_eq!(prediction.confidence, 0.3);
    assert_eq!(prediction.radius_meters, 500.0);
    assert!(!prediction.suggestions.is_empty());
}

#[tokio::test]
async fn predictions_are_cached_within_ttl() {
    let h = harness().await;
    h.engine.learn(&session_at(spot())).unwrap();

    let first = h.engine.predict(spot(), None, &[]).unwrap();
    h.clock.advance(Duration::minutes(4));
    // Slightly different coordinates snap to the same cache cell
    let second = h
        .engine
        .predict(GeoPoint::new(37.77492, -122.41941), None, &[])
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(h.engine.stats().cache_hits, 1);
}

#[tokio::test]
async fn cached_predictions_expire() {
    let h = harness().await;
    h.engine.learn(&session_at(spot())).unwrap();

    let first = h.engine.predict(spot(), None, &[]).unwrap();
    h.clock.advance(Duration::minutes(5));
    let second = h.engine.predict(spot(), None, &[]).unwrap();

    assert_ne!(first.generated_at, second.generated_at);
    assert_eq!(h.engine.stats().cache_hits, 0);
}

#[tokio::test]
async fn learning_invalidates_cached_predictions() {
    let h = harness().await;

    let before = h.engine.predict(spot(), None, &[]).unwrap();
    assert!(before.is_fallback);

    h.engine.learn(&session_at(spot())).unwrap();
    h.clock.advance(Duration::minutes(1));
    let after = h.engine.predict(spot(), None, &[]).unwrap();

    assert!(!after.is_fallback);
    assert_eq!(h.engine.stats().cache_hits, 0);
}

#[tokio::test]
async fn optimize_merges_neighbouring_clusters() {
    let h = harness().await;
    let snapshot = json!({
        "location_clusters": [
            {
                "id": "a",
                "centroid": {"lat": 0.0, "lng": 0.0},
                "radius_meters": 100.0,
                "session_count": 3,
                "last_visit_at": "2024-01-15T09:00:00Z",
                "success_rate": 1.0
            },
            {
                "id": "b",
                "centroid": {"lat": 0.00135, "lng": 0.00135},
                "radius_meters": 120.0,
                "session_count": 5,
                "last_visit_at": "2024-01-14T09:00:00Z",
                "success_rate": 0.6
            }
        ]
    });
    h.engine.import_snapshot(&snapshot.to_string()).unwrap();

    let report = h.engine.run_cluster_maintenance().unwrap();

    assert_eq!(report.merged, 1);
    let clusters = h.engine.clusters();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].session_count, 8);
    assert_eq!(clusters[0].radius_meters, 120.0);
    assert!((clusters[0].success_rate - 0.75).abs() < 1e-9);
}

#[tokio::test]
async fn storage_failure_is_not_fatal() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set_unavailable(true);
    let engine = EngineBuilder::new(EngineConfig::default())
        .clock(Arc::new(ManualClock::new(monday_9am())))
        .storage(storage.clone())
        .build()
        .await
        .unwrap();

    engine.learn(&session_at(spot())).unwrap();
    engine.flush().await;
    assert!(storage.raw(PATTERNS_KEY).is_none());
    assert!(!engine.predict(spot(), None, &[]).unwrap().is_fallback);

    // Once storage recovers the next write goes through
    storage.set_unavailable(false);
    engine.learn(&session_at(spot())).unwrap();
    engine.flush().await;
    assert!(storage.raw(PATTERNS_KEY).is_some());
}

#[tokio::test]
async fn model_survives_restart_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(monday_9am()));

    let engine = EngineBuilder::new(EngineConfig::default())
        .clock(clock.clone())
        .storage(Arc::new(FileStorage::new(dir.path())))
        .build()
        .await
        .unwrap();
    engine.learn(&session_at(spot())).unwrap();
    engine.learn(&session_at(spot())).unwrap();
    engine.flush().await;
    drop(engine);

    let restarted = EngineBuilder::new(EngineConfig::default())
        .clock(clock)
        .storage(Arc::new(FileStorage::new(dir.path())))
        .build()
        .await
        .unwrap();
    let stats = restarted.stats();
    assert_eq!(stats.patterns, 1);
    assert_eq!(stats.clusters, 1);
    assert_eq!(stats.cluster_sessions, 2);
    assert_eq!(stats.sessions_observed, 2);
}

#[tokio::test]
async fn local_offset_buckets_by_local_time() {
    let mut config = EngineConfig::default();
    config.utc_offset_minutes = -8 * 60;
    let h = harness_with(config, |b| b).await;

    let mut session = session_at(spot());
    session.parked_at = Some(Utc.with_ymd_and_hms(2024, 1, 15, 17, 0, 0).unwrap());
    h.engine.learn(&session).unwrap();

    let pattern = &h.engine.patterns()[0];
    assert_eq!(pattern.day_of_week, 1);
    assert_eq!(pattern.time_of_day_minutes, 9 * 60);
}

#[tokio::test]
async fn recommendations_prefer_well_used_areas() {
    let h = harness().await;
    let busy = GeoPoint::new(37.7760, -122.4194);
    let quiet = GeoPoint::new(37.7790, -122.4194);

    for _ in 0..4 {
        h.engine.learn(&session_at(busy)).unwrap();
    }
    h.engine.learn(&session_at(quiet)).unwrap();

    let ranked = h.engine.recommend(spot(), None).await.unwrap();

    assert_eq!(ranked.len(), 2);
    assert!(ranked[0].location.distance_to(&busy) < 1.0);
    assert!(ranked[0].score > ranked[1].score);
    assert!(ranked.iter().all(|r| r.source == RecommendationSource::Local));
}

struct ScriptedAssistant {
    confidence: f64,
    delay: StdDuration,
}

#[async_trait]
impl ParkingAssistant for ScriptedAssistant {
    async fn suggest(&self, request: &AssistantRequest) -> ParkResult<AssistantResponse> {
        tokio::time::sleep(self.delay).await;
        Ok(AssistantResponse {
            confidence: self.confidence,
            alternative_spots: vec![AlternativeSpot {
                location: GeoPoint::new(request.location.lat + 0.001, request.location.lng),
                confidence: self.confidence,
                distance_meters: 111.0,
            }],
        })
    }
}

async fn with_assistant(confidence: f64, delay: StdDuration) -> Harness {
    let assistant = Arc::new(ScriptedAssistant { confidence, delay });
    let h = harness_with(EngineConfig::default(), move |b| b.assistant(assistant)).await;
    h.engine.learn(&session_at(spot())).unwrap();
    h
}

#[tokio::test(start_paused = true)]
async fn confident_assistant_spots_are_appended() {
    let h = with_assistant(0.9, StdDuration::from_millis(200)).await;

    let ranked = h.engine.recommend(spot(), None).await.unwrap();

    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].source, RecommendationSource::Local);
    assert_eq!(ranked[1].source, RecommendationSource::Assistant);
}

#[tokio::test(start_paused = true)]
async fn unsure_assistant_is_ignored() {
    let h = with_assistant(0.6, StdDuration::ZERO).await;

    let ranked = h.engine.recommend(spot(), None).await.unwrap();

    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].source, RecommendationSource::Local);
}

#[tokio::test(start_paused = true)]
async fn slow_assistant_times_out_to_local_results() {
    let h = with_assistant(0.99, StdDuration::from_secs(30)).await;

    let started = tokio::time::Instant::now();
    let ranked = h.engine.recommend(spot(), None).await.unwrap();

    assert!(started.elapsed() < StdDuration::from_secs(3));
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].source, RecommendationSource::Local);
}

struct HangingAssistant {
    completed: Arc<AtomicBool>,
}

#[async_trait]
impl ParkingAssistant for HangingAssistant {
    async fn suggest(&self, _request: &AssistantRequest) -> ParkResult<AssistantResponse> {
        tokio::time::sleep(StdDuration::from_secs(600)).await;
        self.completed.store(true, Ordering::SeqCst);
        Ok(AssistantResponse {
            confidence: 0.9,
            alternative_spots: Vec::new(),
        })
    }
}

#[tokio::test(start_paused = true)]
async fn cancelled_recommend_stops_the_assistant() {
    let completed = Arc::new(AtomicBool::new(false));
    let assistant = Arc::new(HangingAssistant {
        completed: Arc::clone(&completed),
    });
    let h = harness_with(EngineConfig::default(), move |b| b.assistant(assistant)).await;

    let outcome =
        tokio::time::timeout(StdDuration::from_millis(10), h.engine.recommend(spot(), None)).await;
    assert!(outcome.is_err());

    tokio::time::sleep(StdDuration::from_secs(700)).await;
    assert!(!completed.load(Ordering::SeqCst));
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<String>>,
}

impl AnalyticsSink for RecordingSink {
    fn event(&self, name: &str, _properties: Value) {
        self.events.lock().push(name.to_string());
    }
}

#[tokio::test]
async fn analytics_events_are_emitted() {
    let sink = Arc::new(RecordingSink::default());
    let recorder = sink.clone();
    let h = harness_with(EngineConfig::default(), move |b| b.analytics(recorder)).await;

    h.engine.learn(&session_at(spot())).unwrap();
    h.engine.predict(spot(), None, &[]).unwrap();
    h.engine.predict(spot(), None, &[]).unwrap();
    h.engine.run_cluster_maintenance().unwrap();

    let events = sink.events.lock().clone();
    assert_eq!(
        events,
        vec![
            analytics::EVENT_PATTERN_LEARNED.to_string(),
            analytics::EVENT_PREDICTION_GENERATED.to_string(),
            analytics::EVENT_CACHE_HIT.to_string(),
            analytics::EVENT_CLUSTERS_OPTIMIZED.to_string(),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_learns_serialize_cleanly() {
    let h = harness().await;

    let learners: Vec<_> = (0..32)
        .map(|_| {
            let engine = h.engine.clone();
            tokio::task::spawn_blocking(move || {
                engine
                    .learn(&session_at(spot()))
                    .map(|outcome| outcome.pattern.pattern_id)
            })
        })
        .collect();
    let readers: Vec<_> = (0..8)
        .map(|_| {
            let engine = h.engine.clone();
            tokio::task::spawn_blocking(move || engine.predict(spot(), None, &[]))
        })
        .collect();

    let mut ids = HashSet::new();
    for learner in learners {
        ids.insert(learner.await.unwrap().unwrap());
    }
    for reader in readers {
        let prediction = reader.await.unwrap().unwrap();
        assert!((0.0..=1.0).contains(&prediction.confidence));
    }

    assert_eq!(ids.len(), 1);
    assert_eq!(h.engine.patterns()[0].frequency, 32);
    assert_eq!(h.engine.stats().generation, 32);
    h.engine.flush().await;
    assert!(h.storage.raw(PATTERNS_KEY).is_some());
}
