//! Parking engine
//!
//! The engine owns the learned model and is the only way to change it.
//!
//! - Writes (`learn`, maintenance, import, reset) are serialized through one
//!   mutex. Each write bumps a generation counter and publishes an immutable
//!   snapshot.
//! - Reads (`predict`, `recommend`, listings) work on the latest published
//!   snapshot and never wait for a writer.
//! - Every published snapshot is handed to a single background persister,
//!   which always writes the newest one. Storage failures are logged and the
//!   engine keeps running from memory.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::analytics::{self, AnalyticsSink, NoopAnalytics};
use crate::assistant::{AssistantCall, AssistantRequest, ParkingAssistant};
use crate::cache::{cache_key, PredictionCache};
use crate::clock::{Clock, SystemClock};
use crate::clusters::{ClusterObservation, ClusterStore, ClusterUpdate};
use crate::config::EngineConfig;
use crate::error::{ParkError, ParkResult};
use crate::geo;
use crate::metrics::{BehavioralMetrics, MetricsTracker};
use crate::patterns::{PatternStore, PatternUpdate};
use crate::prediction::{PredictionGenerator, PredictionQuery};
use crate::recommend::RecommendationEngine;
use crate::scoring::RelevanceScorer;
use crate::storage::{MemoryStorage, StorageAdapter, CLUSTERS_KEY, METRICS_KEY, PATTERNS_KEY};
use crate::types::{
    GeoPoint, LocationCluster, ParkingPattern, ParkingSession, Prediction, Recommendation,
};

/// The three learned collections, serialized under their storage keys
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParkingModel {
    #[serde(rename = "parking_patterns")]
    pub patterns: PatternStore,
    #[serde(rename = "location_clusters")]
    pub clusters: ClusterStore,
    #[serde(rename = "behavioral_metrics")]
    pub metrics: MetricsTracker,
}

/// An immutable published view of the model
#[derive(Debug)]
struct Snapshot {
    generation: u64,
    model: ParkingModel,
}

struct WriterState {
    generation: u64,
    model: ParkingModel,
}

/// What `learn` did with a session
#[derive(Debug, Clone, Serialize)]
pub struct LearnOutcome {
    pub pattern: PatternUpdate,
    pub cluster: ClusterUpdate,
    /// Model generation after the session was applied
    pub generation: u64,
}

/// Which maintenance job ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceJob {
    PatternPrune,
    ClusterOptimize,
}

impl MaintenanceJob {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaintenanceJob::PatternPrune => "pattern_prune",
            MaintenanceJob::ClusterOptimize => "cluster_optimize",
        }
    }
}

/// Result of one maintenance run
#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceReport {
    pub job: MaintenanceJob,
    pub pruned: usize,
    pub merged: usize,
    pub remaining: usize,
    pub duration_ms: u64,
    pub generation: u64,
}

/// Point-in-time engine counters
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub generation: u64,
    pub patterns: usize,
    pub clusters: usize,
    pub cluster_sessions: u64,
    pub sessions_observed: u32,
    /// Local hour the user parks at most often
    pub peak_hour: Option<u8>,
    pub cache_entries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
}

/// Wires configuration and collaborators into a [`ParkingEngine`]
pub struct EngineBuilder {
    config: EngineConfig,
    storage: Option<Arc<dyn StorageAdapter>>,
    clock: Option<Arc<dyn Clock>>,
    assistant: Option<Arc<dyn ParkingAssistant>>,
    analytics: Option<Arc<dyn AnalyticsSink>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            storage: None,
            clock: None,
            assistant: None,
            analytics: None,
        }
    }

    pub fn storage(mut self, storage: Arc<dyn StorageAdapter>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn assistant(mut self, assistant: Arc<dyn ParkingAssistant>) -> Self {
        self.assistant = Some(assistant);
        self
    }

    pub fn analytics(mut self, analytics: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = Some(analytics);
        self
    }

    /// Load the persisted model and start the persister.
    ///
    /// Must be called inside a tokio runtime. Unreadable or corrupt stored
    /// collections are logged and start out empty.
    pub async fn build(self) -> ParkResult<ParkingEngine> {
        self.config.validate()?;

        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let analytics = self
            .analytics
            .unwrap_or_else(|| Arc::new(NoopAnalytics));

        let mut model = ParkingModel {
            patterns: load_collection(storage.as_ref(), PATTERNS_KEY).await,
            clusters: load_collection(storage.as_ref(), CLUSTERS_KEY).await,
            metrics: load_collection(storage.as_ref(), METRICS_KEY).await,
        };
        sanitize(&mut model, &self.config);
        info!(
            patterns = model.patterns.len(),
            clusters = model.clusters.len(),
            "parking model loaded"
        );

        let snapshot = Arc::new(Snapshot {
            generation: 0,
            model: model.clone(),
        });
        let (persist_tx, persist_rx) = watch::channel(Arc::clone(&snapshot));
        let (persisted_tx, persisted_rx) = watch::channel(0_u64);
        tokio::spawn(run_persister(storage, persist_rx, persisted_tx));

        Ok(ParkingEngine {
            inner: Arc::new(EngineInner {
                cache: PredictionCache::new(&self.config.cache),
                config: self.config,
                writer: Mutex::new(WriterState {
                    generation: 0,
                    model,
                }),
                published: RwLock::new(snapshot),
                clock,
                assistant: self.assistant,
                analytics,
                persist_tx,
                persisted_rx,
                pattern_job: AtomicBool::new(false),
                cluster_job: AtomicBool::new(false),
            }),
        })
    }
}

struct EngineInner {
    config: EngineConfig,
    writer: Mutex<WriterState>,
    published: RwLock<Arc<Snapshot>>,
    cache: PredictionCache,
    clock: Arc<dyn Clock>,
    assistant: Option<Arc<dyn ParkingAssistant>>,
    analytics: Arc<dyn AnalyticsSink>,
    persist_tx: watch::Sender<Arc<Snapshot>>,
    persisted_rx: watch::Receiver<u64>,
    pattern_job: AtomicBool,
    cluster_job: AtomicBool,
}

/// On-device parking behavior engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ParkingEngine {
    inner: Arc<EngineInner>,
}

/// Releases a single-execution guard on drop
struct JobGuard<'a>(&'a AtomicBool);

impl<'a> JobGuard<'a> {
    fn acquire(flag: &'a AtomicBool, job: MaintenanceJob) -> ParkResult<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ParkError::MaintenanceInProgress(job.as_str()))?;
        Ok(Self(flag))
    }
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ParkingEngine {
    /// Builder with default configuration
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new(EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Learn from a completed parking session.
    ///
    /// Fails only when the session is incomplete or invalid; storage problems
    /// are logged and do not affect the result.
    pub fn learn(&self, session: &ParkingSession) -> ParkResult<LearnOutcome> {
        session.validate()?;

        let config = &self.inner.config;
        let at = session.parked_at.unwrap_or_else(|| self.inner.clock.now());
        let (day_of_week, time_of_day_minutes) = geo::local_slot(at, config.utc_offset_minutes);
        let hour = (time_of_day_minutes / 60) as u8;

        let ((pattern, cluster), generation) = self.mutate(|model| {
            let pattern = model.patterns.observe(
                session,
                day_of_week,
                time_of_day_minutes,
                at,
                &config.patterns,
            );
            let cluster = model.clusters.absorb(
                &ClusterObservation {
                    location: session.parking_location,
                    at,
                    hour,
                    day_of_week,
                    was_successful: session.was_successful,
                    parking_duration_minutes: session.parking_duration_minutes,
                },
                &config.clusters,
            );
            model
                .metrics
                .update(session, hour, pattern.created, config.ema_alpha);
            (pattern, cluster)
        });

        debug!(
            pattern_id = %pattern.pattern_id,
            pattern_created = pattern.created,
            frequency = pattern.frequency,
            cluster_id = %cluster.cluster_id,
            generation,
            "session learned"
        );
        self.inner.analytics.event(
            analytics::EVENT_PATTERN_LEARNED,
            json!({
                "pattern_id": pattern.pattern_id,
                "created": pattern.created,
                "frequency": pattern.frequency,
                "confidence": pattern.confidence,
                "cluster_id": cluster.cluster_id,
            }),
        );

        Ok(LearnOutcome {
            pattern,
            cluster,
            generation,
        })
    }

    /// Predict where the user will park.
    ///
    /// Identical queries within the cache TTL and without an intervening
    /// write return the same prediction.
    pub fn predict(
        &self,
        current: GeoPoint,
        destination: Option<GeoPoint>,
        context_tags: &[String],
    ) -> ParkResult<Prediction> {
        check_point("current", &current)?;
        if let Some(destination) = &destination {
            check_point("destination", destination)?;
        }

        let config = &self.inner.config;
        let now = self.inner.clock.now();
        let key = cache_key(
            &current,
            destination.as_ref(),
            context_tags,
            config.cache.grid_decimals,
        );
        let snapshot = self.snapshot();

        if let Some(prediction) = self.inner.cache.get(&key, now, snapshot.generation) {
            debug!(%key, "prediction cache hit");
            self.inner
                .analytics
                .event(analytics::EVENT_CACHE_HIT, json!({ "key": key }));
            return Ok(prediction);
        }

        let prediction = PredictionGenerator::new(&config.prediction, config.utc_offset_minutes)
            .generate(
                snapshot.model.patterns.patterns(),
                snapshot.model.clusters.clusters(),
                &PredictionQuery {
                    current,
                    destination,
                    context_tags,
                },
                now,
            );
        self.inner
            .cache
            .insert(key, prediction.clone(), now, snapshot.generation);

        debug!(
            confidence = prediction.confidence,
            radius_meters = prediction.radius_meters,
            fallback = prediction.is_fallback,
            "prediction generated"
        );
        self.inner.analytics.event(
            analytics::EVENT_PREDICTION_GENERATED,
            json!({
                "confidence": prediction.confidence,
                "radius_meters": prediction.radius_meters,
                "fallback": prediction.is_fallback,
            }),
        );
        Ok(prediction)
    }

    /// Rank known parking areas around `location`.
    ///
    /// When an assistant is configured it runs concurrently with the local
    /// ranking; its confident suggestions are appended after local results.
    pub async fn recommend(
        &self,
        location: GeoPoint,
        radius_meters: Option<f64>,
    ) -> ParkResult<Vec<Recommendation>> {
        check_point("location", &location)?;
        let config = &self.inner.config;
        let radius = radius_meters.unwrap_or(config.recommend.default_radius_meters);
        if !radius.is_finite() || radius <= 0.0 {
            return Err(ParkError::Validation(format!(
                "radius must be a positive number, got {radius}"
            )));
        }

        let now = self.inner.clock.now();
        let snapshot = self.snapshot();

        let call = self.inner.assistant.as_ref().map(|assistant| {
            AssistantCall::start(
                Arc::clone(assistant),
                AssistantRequest {
                    location,
                    time: now,
                    recent_venues: snapshot
                        .model
                        .patterns
                        .recent_venues(config.recommend.recent_venue_count),
                },
                config.recommend.assistant_timeout(),
            )
        });

        let engine = RecommendationEngine::new(&config.recommend, &config.prediction);
        let local = engine.rank(
            snapshot.model.patterns.patterns(),
            snapshot.model.clusters.clusters(),
            &location,
            radius,
            now,
        );

        let Some(call) = call else {
            return Ok(local);
        };
        Ok(
            match call.finish(config.recommend.assistant_min_confidence).await {
                Some(response) => engine.append_assistant(local, response, &location),
                None => local,
            },
        )
    }

    /// Drop patterns unused beyond the retention window
    pub fn run_pattern_maintenance(&self) -> ParkResult<MaintenanceReport> {
        let job = MaintenanceJob::PatternPrune;
        let _guard = JobGuard::acquire(&self.inner.pattern_job, job)?;
        let started = Instant::now();
        let now = self.inner.clock.now();
        let config = &self.inner.config.patterns;

        let ((pruned, remaining), generation) = self.mutate_if(|model| {
            let pruned = model.patterns.prune(now, config);
            ((pruned, model.patterns.len()), pruned > 0)
        });

        let report = MaintenanceReport {
            job,
            pruned,
            merged: 0,
            remaining,
            duration_ms: started.elapsed().as_millis() as u64,
            generation,
        };
        info!(pruned, remaining, "pattern maintenance finished");
        Ok(report)
    }

    /// Prune weak clusters and merge close neighbours
    pub fn run_cluster_maintenance(&self) -> ParkResult<MaintenanceReport> {
        let job = MaintenanceJob::ClusterOptimize;
        let _guard = JobGuard::acquire(&self.inner.cluster_job, job)?;
        let started = Instant::now();
        let config = &self.inner.config.clusters;

        let (optimized, generation) = self.mutate_if(|model| {
            let report = model.clusters.optimize(config);
            let changed = report.pruned > 0 || report.merged > 0;
            (report, changed)
        });

        let report = MaintenanceReport {
            job,
            pruned: optimized.pruned,
            merged: optimized.merged,
            remaining: optimized.remaining,
            duration_ms: started.elapsed().as_millis() as u64,
            generation,
        };
        info!(
            pruned = report.pruned,
            merged = report.merged,
            remaining = report.remaining,
            "cluster maintenance finished"
        );
        self.inner.analytics.event(
            analytics::EVENT_CLUSTERS_OPTIMIZED,
            json!({
                "pruned": report.pruned,
                "merged": report.merged,
                "remaining": report.remaining,
            }),
        );
        Ok(report)
    }

    pub fn stats(&self) -> EngineStats {
        let snapshot = self.snapshot();
        let cache = &self.inner.cache;
        EngineStats {
            generation: snapshot.generation,
            patterns: snapshot.model.patterns.len(),
            clusters: snapshot.model.clusters.len(),
            cluster_sessions: snapshot.model.clusters.total_sessions(),
            sessions_observed: snapshot.model.metrics.metrics().sessions_observed,
            peak_hour: snapshot.model.metrics.peak_hour(),
            cache_entries: cache.entry_count(),
            cache_hits: cache.hits(),
            cache_misses: cache.misses(),
            cache_hit_rate: cache.hit_rate(),
        }
    }

    pub fn patterns(&self) -> Vec<ParkingPattern> {
        self.snapshot().model.patterns.patterns().to_vec()
    }

    pub fn clusters(&self) -> Vec<LocationCluster> {
        self.snapshot().model.clusters.clusters().to_vec()
    }

    /// Clusters within `radius_meters` of `target`, closest first
    pub fn clusters_near(&self, target: &GeoPoint, radius_meters: f64) -> Vec<LocationCluster> {
        let snapshot = self.snapshot();
        RelevanceScorer::new(&self.inner.config.prediction)
            .find_nearby_clusters(snapshot.model.clusters.clusters(), target, radius_meters)
            .into_iter()
            .map(|n| n.cluster.clone())
            .collect()
    }

    pub fn metrics(&self) -> BehavioralMetrics {
        self.snapshot().model.metrics.metrics().clone()
    }

    /// Serialize the whole model as one JSON document
    pub fn export_snapshot(&self) -> ParkResult<String> {
        Ok(serde_json::to_string_pretty(&self.snapshot().model)?)
    }

    /// Replace the model with an exported JSON document
    pub fn import_snapshot(&self, json: &str) -> ParkResult<u64> {
        let mut imported: ParkingModel = serde_json::from_str(json)?;
        sanitize(&mut imported, &self.inner.config);
        let ((), generation) = self.mutate(|model| *model = imported);
        info!(generation, "parking model imported");
        Ok(generation)
    }

    /// Forget everything learned
    pub fn reset(&self) -> u64 {
        let ((), generation) = self.mutate(|model| *model = ParkingModel::default());
        info!(generation, "parking model reset");
        generation
    }

    /// Wait until the current model generation has been handed to storage
    pub async fn flush(&self) {
        let target = self.snapshot().generation;
        let mut persisted = self.inner.persisted_rx.clone();
        if persisted.wait_for(|g| *g >= target).await.is_err() {
            warn!("persister stopped before flush completed");
        }
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&*self.inner.published.read())
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut ParkingModel) -> T) -> (T, u64) {
        self.mutate_if(|model| (f(model), true))
    }

    /// Apply a write; publish only when `f` reports a change.
    ///
    /// Publishing happens under the writer lock so snapshots are released
    /// in generation order.
    fn mutate_if<T>(&self, f: impl FnOnce(&mut ParkingModel) -> (T, bool)) -> (T, u64) {
        let mut writer = self.inner.writer.lock();
        let (value, changed) = f(&mut writer.model);
        if !changed {
            return (value, writer.generation);
        }

        writer.generation += 1;
        let snapshot = Arc::new(Snapshot {
            generation: writer.generation,
            model: writer.model.clone(),
        });
        *self.inner.published.write() = Arc::clone(&snapshot);
        self.inner.cache.invalidate_all();
        self.inner.persist_tx.send_replace(snapshot);
        (value, writer.generation)
    }
}

fn check_point(name: &str, point: &GeoPoint) -> ParkResult<()> {
    if point.is_valid() {
        Ok(())
    } else {
        Err(ParkError::Validation(format!(
            "{name} has out-of-range coordinates ({}, {})",
            point.lat, point.lng
        )))
    }
}

fn sanitize(model: &mut ParkingModel, config: &EngineConfig) {
    let patterns = model.patterns.sanitize();
    let clusters = model.clusters.sanitize(&config.clusters);
    if patterns > 0 || clusters > 0 {
        warn!(patterns, clusters, "dropped unusable stored records");
    }
}

async fn load_collection<T>(storage: &dyn StorageAdapter, key: &str) -> T
where
    T: DeserializeOwned + Default,
{
    match storage.get(key).await {
        Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "stored collection is corrupt, starting empty");
                T::default()
            }
        },
        Ok(None) => T::default(),
        Err(e) => {
            warn!(key, error = %e, "failed to read stored collection, starting empty");
            T::default()
        }
    }
}

async fn persist(storage: &dyn StorageAdapter, snapshot: &Snapshot) {
    let model = &snapshot.model;
    let collections = [
        (PATTERNS_KEY, serde_json::to_vec(&model.patterns)),
        (CLUSTERS_KEY, serde_json::to_vec(&model.clusters)),
        (METRICS_KEY, serde_json::to_vec(&model.metrics)),
    ];

    for (key, bytes) in collections {
        let result = match bytes {
            Ok(bytes) => storage.set(key, bytes).await.map_err(ParkError::from),
            Err(e) => Err(ParkError::from(e)),
        };
        if let Err(e) = result {
            warn!(
                key,
                generation = snapshot.generation,
                error = %e,
                "failed to persist collection"
            );
        }
    }
}

/// Writes the newest published snapshot until the engine is dropped
async fn run_persister(
    storage: Arc<dyn StorageAdapter>,
    mut snapshots: watch::Receiver<Arc<Snapshot>>,
    persisted: watch::Sender<u64>,
) {
    while snapshots.changed().await.is_ok() {
        let snapshot = Arc::clone(&*snapshots.borrow_and_update());
        persist(storage.as_ref(), &snapshot).await;
        debug!(generation = snapshot.generation, "model persisted");
        persisted.send_replace(snapshot.generation);
    }
}
