//! Engine configuration
//!
//! Every tunable of the engine lives here. Defaults match the behavior the
//! model was calibrated with; a partial TOML file only overrides the keys it names.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ParkError, ParkResult};

/// Upper bound for `patterns.retention_days` (about a century)
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// How a new point picks the cluster it joins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterAssignment {
    /// Closest centroid within the join radius
    Nearest,
    /// First centroid within the join radius, in storage order
    FirstMatch,
}

/// Pattern store tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Max distance for a session to reinforce an existing pattern
    pub match_radius_meters: f64,
    /// Max time-of-day difference for a session to reinforce an existing pattern
    pub match_window_minutes: u16,
    /// Confidence added on every reinforcement
    pub reinforcement_step: f64,
    /// Days without use before a pattern becomes eligible for pruning
    pub retention_days: i64,
    /// Patterns at or above this frequency (and confidence) survive pruning
    pub keep_min_frequency: u32,
    pub keep_min_confidence: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            match_radius_meters: 100.0,
            match_window_minutes: 60,
            reinforcement_step: 0.1,
            retention_days: 90,
            keep_min_frequency: 5,
            keep_min_confidence: 0.7,
        }
    }
}

/// Cluster store tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// A point joins a cluster whose centroid is within this distance
    pub join_radius_meters: f64,
    /// Clusters this close on both axes are merged by maintenance
    pub merge_distance_meters: f64,
    pub initial_radius_meters: f64,
    pub min_radius_meters: f64,
    pub max_radius_meters: f64,
    /// Clusters at or below this success rate are pruned while still small
    pub prune_max_success_rate: f64,
    pub prune_below_sessions: u32,
    pub assignment: ClusterAssignment,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            join_radius_meters: 200.0,
            merge_distance_meters: 150.0,
            initial_radius_meters: 100.0,
            min_radius_meters: 100.0,
            max_radius_meters: 800.0,
            prune_max_success_rate: 0.3,
            prune_below_sessions: 2,
            assignment: ClusterAssignment::Nearest,
        }
    }
}

/// Relevance scoring and prediction tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    pub search_radius_meters: f64,
    pub max_day_distance: u8,
    pub max_time_distance_minutes: u16,
    /// Decay horizon (days) for the recency factor exp(-days/horizon)
    pub recency_horizon_days: f64,
    pub max_relevant_patterns: usize,
    pub patterns_per_prediction: usize,
    pub clusters_per_prediction: usize,
    pub max_alternatives: usize,
    pub max_suggestions: usize,
    /// Total weight that maps to full confidence
    pub confidence_weight_scale: f64,
    pub min_radius_meters: f64,
    pub max_radius_meters: f64,
    pub walking_speed_m_per_min: f64,
    pub fallback_radius_meters: f64,
    pub fallback_confidence: f64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            search_radius_meters: 2000.0,
            max_day_distance: 1,
            max_time_distance_minutes: 120,
            recency_horizon_days: 30.0,
            max_relevant_patterns: 10,
            patterns_per_prediction: 5,
            clusters_per_prediction: 3,
            max_alternatives: 3,
            max_suggestions: 3,
            confidence_weight_scale: 10.0,
            min_radius_meters: 100.0,
            max_radius_meters: 800.0,
            walking_speed_m_per_min: 80.0,
            fallback_radius_meters: 500.0,
            fallback_confidence: 0.3,
        }
    }
}

/// Prediction cache tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub max_entries: u64,
    /// Decimal places kept when snapping query coordinates (3 is roughly 110 m)
    pub grid_decimals: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            max_entries: 1_000,
            grid_decimals: 3,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Recommendation tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendConfig {
    pub default_radius_meters: f64,
    /// Timeout for the external assistant call
    pub assistant_timeout_ms: u64,
    /// The assistant is only consulted for results above this confidence
    pub assistant_min_confidence: f64,
    pub max_assistant_spots: usize,
    /// How many recent venues are shared with the assistant
    pub recent_venue_count: usize,
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            default_radius_meters: 1000.0,
            assistant_timeout_ms: 2_500,
            assistant_min_confidence: 0.7,
            max_assistant_spots: 3,
            recent_venue_count: 5,
        }
    }
}

impl RecommendConfig {
    pub fn assistant_timeout(&self) -> Duration {
        Duration::from_millis(self.assistant_timeout_ms)
    }
}

/// Background maintenance cadences
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub pattern_prune_interval_secs: u64,
    pub cluster_optimize_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            pattern_prune_interval_secs: 60 * 60,
            cluster_optimize_interval_secs: 6 * 60 * 60,
        }
    }
}

/// Full engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub patterns: PatternConfig,
    pub clusters: ClusterConfig,
    pub prediction: PredictionConfig,
    pub cache: CacheConfig,
    pub recommend: RecommendConfig,
    pub maintenance: MaintenanceConfig,
    /// Smoothing factor for behavioral metrics
    pub ema_alpha: f64,
    /// Offset of the user's local time from UTC, used for day/time bucketing
    pub utc_offset_minutes: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            patterns: PatternConfig::default(),
            clusters: ClusterConfig::default(),
            prediction: PredictionConfig::default(),
            cache: CacheConfig::default(),
            recommend: RecommendConfig::default(),
            maintenance: MaintenanceConfig::default(),
            ema_alpha: crate::metrics::DEFAULT_EMA_ALPHA,
            utc_offset_minutes: 0,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from TOML and validate it
    pub fn from_toml_str(raw: &str) -> ParkResult<Self> {
        let config: EngineConfig =
            toml::from_str(raw).map_err(|e| ParkError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn from_toml_file(path: &Path) -> ParkResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ParkError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Reject values that would break the model's invariants
    pub fn validate(&self) -> ParkResult<()> {
        if !(0.0..=1.0).contains(&self.ema_alpha) || self.ema_alpha == 0.0 {
            return Err(ParkError::Config(format!(
                "ema_alpha must be in (0, 1], got {}",
                self.ema_alpha
            )));
        }
        if self.clusters.min_radius_meters > self.clusters.max_radius_meters {
            return Err(ParkError::Config(
                "clusters.min_radius_meters exceeds clusters.max_radius_meters".to_string(),
            ));
        }
        if self.prediction.min_radius_meters > self.prediction.max_radius_meters {
            return Err(ParkError::Config(
                "prediction.min_radius_meters exceeds prediction.max_radius_meters".to_string(),
            ));
        }
        if self.prediction.walking_speed_m_per_min <= 0.0 {
            return Err(ParkError::Config(
                "prediction.walking_speed_m_per_min must be positive".to_string(),
            ));
        }
        if self.prediction.confidence_weight_scale <= 0.0 {
            return Err(ParkError::Config(
                "prediction.confidence_weight_scale must be positive".to_string(),
            ));
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.patterns.retention_days) {
            return Err(ParkError::Config(format!(
                "patterns.retention_days must be between 1 and {MAX_RETENTION_DAYS}, got {}",
                self.patterns.retention_days
            )));
        }
        if !self.prediction.recency_horizon_days.is_finite()
            || self.prediction.recency_horizon_days <= 0.0
        {
            return Err(ParkError::Config(format!(
                "prediction.recency_horizon_days must be positive, got {}",
                self.prediction.recency_horizon_days
            )));
        }
        if self.maintenance.pattern_prune_interval_secs == 0
            || self.maintenance.cluster_optimize_interval_secs == 0
        {
            return Err(ParkError::Config(
                "maintenance intervals must be non-zero".to_string(),
            ));
        }
        if self.utc_offset_minutes.abs() > 14 * 60 {
            return Err(ParkError::Config(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            )));
        }
        Ok(())
    }
}
