//! Analytics events
//!
//! Fire-and-forget product analytics. The engine never reads anything back.

use serde_json::Value;
use tracing::debug;

pub const EVENT_PATTERN_LEARNED: &str = "pattern_learned";
pub const EVENT_PREDICTION_GENERATED: &str = "prediction_generated";
pub const EVENT_CACHE_HIT: &str = "prediction_cache_hit";
pub const EVENT_CLUSTERS_OPTIMIZED: &str = "cluster_optimization_run";

/// Receiver of analytics events
pub trait AnalyticsSink: Send + Sync {
    fn event(&self, name: &str, properties: Value);
}

/// Drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAnalytics;

impl AnalyticsSink for NoopAnalytics {
    fn event(&self, _name: &str, _properties: Value) {}
}

/// Emits events as `debug` tracing events under the `park_flux::analytics` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAnalytics;

impl AnalyticsSink for TracingAnalytics {
    fn event(&self, name: &str, properties: Value) {
        debug!(target: "park_flux::analytics", event = name, %properties, "analytics");
    }
}
