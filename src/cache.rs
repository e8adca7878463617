//! Prediction cache.
//!
//! Short-lived memo of predictions keyed by a quantized query. Entries expire
//! lazily: the TTL is checked against the engine clock when an entry is read.
//! Every entry also remembers the model generation it was computed from, so a
//! prediction raced against a concurrent learn can never be served afterwards.

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::CacheConfig;
use crate::geo;
use crate::types::{GeoPoint, Prediction};

#[derive(Debug, Clone)]
struct CachedPrediction {
    prediction: Prediction,
    created_at: DateTime<Utc>,
    generation: u64,
}

/// Build the cache key for a prediction query.
///
/// Coordinates are snapped to a grid and tags are normalized and sorted, so
/// nearby repeated queries share an entry.
pub fn cache_key(
    current: &GeoPoint,
    destination: Option<&GeoPoint>,
    context_tags: &[String],
    grid_decimals: u32,
) -> String {
    let cell = |p: &GeoPoint| {
        format!(
            "{},{}",
            geo::quantize(p.lat, grid_decimals),
            geo::quantize(p.lng, grid_decimals)
        )
    };

    let mut tags: Vec<String> = context_tags
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    tags.sort();
    tags.dedup();

    format!(
        "{}|{}|{}",
        cell(current),
        destination.map(cell).unwrap_or_else(|| "-".to_string()),
        tags.join(",")
    )
}

/// Prediction cache with lazy TTL and hit/miss tracking
pub struct PredictionCache {
    cache: Cache<String, CachedPrediction>,
    ttl: chrono::Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PredictionCache {
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl())
            .build();
        Self {
            cache,
            ttl: chrono::Duration::seconds(config.ttl_secs as i64),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a live prediction computed from model `generation`
    pub fn get(&self, key: &str, now: DateTime<Utc>, generation: u64) -> Option<Prediction> {
        match self.cache.get(key) {
            Some(entry) if entry.generation == generation && now - entry.created_at < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.prediction)
            }
            Some(_) => {
                self.cache.invalidate(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: String, prediction: Prediction, now: DateTime<Utc>, generation: u64) {
        self.cache.insert(
            key,
            CachedPrediction {
                prediction,
                created_at: now,
                generation,
            },
        );
    }

    /// Drop every entry
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Cache hit rate (0.0–1.0)
    pub fn hit_rate(&self) -> f64 {
        let h = self.hits() as f64;
        let total = h + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            h / total
        }
    }

    /// Number of entries currently held
    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }
}

impl Default for PredictionCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
