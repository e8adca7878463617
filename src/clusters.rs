//! Cluster store
//!
//! Builds coarse "parking areas" incrementally from every observed parking
//! point. Each point either joins a cluster whose centroid is close enough
//! (moving the centroid as a cumulative mean) or starts a new one.
//!
//! `optimize` is the periodic consolidation pass: it prunes clusters that
//! have only ever seen failure and merges neighbours in a single pairwise sweep.
//! A long chain of nearby clusters may need several passes to fully collapse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{ClusterAssignment, ClusterConfig};
use crate::geo;
use crate::types::{GeoPoint, LocationCluster};

/// A single parking point fed into the store
#[derive(Debug, Clone)]
pub struct ClusterObservation {
    pub location: GeoPoint,
    pub at: DateTime<Utc>,
    /// Local hour of day (0-23)
    pub hour: u8,
    /// Local day of week (0 = Sunday)
    pub day_of_week: u8,
    pub was_successful: bool,
    pub parking_duration_minutes: Option<f64>,
}

/// Result of absorbing one observation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterUpdate {
    pub cluster_id: String,
    pub created: bool,
    pub session_count: u32,
}

/// Outcome of one `optimize` pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OptimizeReport {
    pub pruned: usize,
    pub merged: usize,
    pub remaining: usize,
}

/// Store of location clusters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterStore {
    clusters: Vec<LocationCluster>,
}

impl ClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a point into the matching cluster or start a new one
    pub fn absorb(&mut self, obs: &ClusterObservation, config: &ClusterConfig) -> ClusterUpdate {
        let target = match config.assignment {
            ClusterAssignment::Nearest => self.nearest_within(&obs.location, config.join_radius_meters),
            ClusterAssignment::FirstMatch => self
                .clusters
                .iter()
                .position(|c| c.centroid.distance_to(&obs.location) <= config.join_radius_meters),
        };

        match target {
            Some(index) => {
                let cluster = &mut self.clusters[index];
                Self::fold(cluster, obs, config);
                ClusterUpdate {
                    cluster_id: cluster.id.clone(),
                    created: false,
                    session_count: cluster.session_count,
                }
            }
            None => {
                let cluster = Self::found(obs, config);
                let update = ClusterUpdate {
                    cluster_id: cluster.id.clone(),
                    created: true,
                    session_count: cluster.session_count,
                };
                self.clusters.push(cluster);
                update
            }
        }
    }

    fn nearest_within(&self, location: &GeoPoint, radius: f64) -> Option<usize> {
        self.clusters
            .iter()
            .enumerate()
            .map(|(i, c)| (i, c.centroid.distance_to(location)))
            .filter(|(_, d)| *d <= radius)
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
    }

    fn found(obs: &ClusterObservation, config: &ClusterConfig) -> LocationCluster {
        let mut cluster = LocationCluster {
            id: Uuid::new_v4().to_string(),
            centroid: GeoPoint::new(obs.location.lat, obs.location.lng),
            radius_meters: config.initial_radius_meters,
            session_count: 1,
            last_visit_at: obs.at,
            avg_parking_duration_minutes: 0.0,
            duration_samples: 0,
            success_rate: if obs.was_successful { 1.0 } else { 0.0 },
            time_patterns: Default::default(),
            day_patterns: Default::default(),
        };
        *cluster.time_patterns.entry(obs.hour).or_insert(0) += 1;
        *cluster.day_patterns.entry(obs.day_of_week).or_insert(0) += 1;
        if let Some(duration) = obs.parking_duration_minutes {
            cluster.avg_parking_duration_minutes = duration;
            cluster.duration_samples = 1;
        }
        cluster
    }

    fn fold(cluster: &mut LocationCluster, obs: &ClusterObservation, config: &ClusterConfig) {
        let previous = cluster.session_count as f64;
        cluster.session_count = cluster.session_count.saturating_add(1);
        let weight = 1.0 / cluster.session_count as f64;

        // Cumulative mean: later points move the centroid less and less
        cluster.centroid.lat += (obs.location.lat - cluster.centroid.lat) * weight;
        cluster.centroid.lng += (obs.location.lng - cluster.centroid.lng) * weight;

        let outcome = if obs.was_successful { 1.0 } else { 0.0 };
        cluster.success_rate =
            ((cluster.success_rate * previous + outcome) / cluster.session_count as f64)
                .clamp(0.0, 1.0);

        let reach = cluster.centroid.distance_to(&obs.location);
        cluster.radius_meters = cluster
            .radius_meters
            .max(reach)
            .clamp(config.min_radius_meters, config.max_radius_meters);

        if obs.at > cluster.last_visit_at {
            cluster.last_visit_at = obs.at;
        }
        *cluster.time_patterns.entry(obs.hour).or_insert(0) += 1;
        *cluster.day_patterns.entry(obs.day_of_week).or_insert(0) += 1;

        if let Some(duration) = obs.parking_duration_minutes {
            cluster.duration_samples += 1;
            cluster.avg_parking_duration_minutes +=
                (duration - cluster.avg_parking_duration_minutes) / cluster.duration_samples as f64;
        }
    }

    /// Prune low-quality clusters, then merge close neighbours in one pass
    pub fn optimize(&mut self, config: &ClusterConfig) -> OptimizeReport {
        let before = self.clusters.len();
        self.clusters.retain(|c| {
            !(c.success_rate <= config.prune_max_success_rate
                && c.session_count < config.prune_below_sessions)
        });
        let pruned = before - self.clusters.len();

        let mut absorbed = vec![false; self.clusters.len()];
        let mut merged = 0;
        for i in 0..self.clusters.len() {
            if absorbed[i] {
                continue;
            }
            for j in (i + 1)..self.clusters.len() {
                if absorbed[j] {
                    continue;
                }
                // Per-axis box on a flat grid, not haversine: two centroids
                // 150 m apart on both axes still count as neighbours
                let separation =
                    geo::grid_separation_meters(&self.clusters[i].centroid, &self.clusters[j].centroid);
                if separation <= config.merge_distance_meters {
                    let other = self.clusters[j].clone();
                    Self::merge_into(&mut self.clusters[i], &other, config);
                    absorbed[j] = true;
                    merged += 1;
                }
            }
        }

        let mut index = 0;
        self.clusters.retain(|_| {
            let keep = !absorbed[index];
            index += 1;
            keep
        });

        OptimizeReport {
            pruned,
            merged,
            remaining: self.clusters.len(),
        }
    }

    /// Merge `other` into `target`, weighting by session counts
    pub fn merge_into(target: &mut LocationCluster, other: &LocationCluster, config: &ClusterConfig) {
        let a = target.session_count as f64;
        let b = other.session_count as f64;
        let total = a + b;

        if total > 0.0 {
            target.centroid.lat = (target.centroid.lat * a + other.centroid.lat * b) / total;
            target.centroid.lng = (target.centroid.lng * a + other.centroid.lng * b) / total;
            target.success_rate =
                ((target.success_rate * a + other.success_rate * b) / total).clamp(0.0, 1.0);
        }
        target.session_count = target.session_count.saturating_add(other.session_count);
        target.radius_meters = target
            .radius_meters
            .max(other.radius_meters)
            .clamp(config.min_radius_meters, config.max_radius_meters);
        target.last_visit_at = target.last_visit_at.max(other.last_visit_at);

        let samples = target.duration_samples + other.duration_samples;
        if samples > 0 {
            target.avg_parking_duration_minutes = (target.avg_parking_duration_minutes
                * target.duration_samples as f64
                + other.avg_parking_duration_minutes * other.duration_samples as f64)
                / samples as f64;
        }
        target.duration_samples = samples;

        for (hour, count) in &other.time_patterns {
            *target.time_patterns.entry(*hour).or_insert(0) += count;
        }
        for (day, count) in &other.day_patterns {
            *target.day_patterns.entry(*day).or_insert(0) += count;
        }
    }

    /// Insert a fully-formed cluster, e.g. when importing a snapshot
    pub fn insert(&mut self, cluster: LocationCluster) {
        self.clusters.push(cluster);
    }

    /// Repair loaded data: drop clusters without a usable centroid and clamp
    /// rates and radii. Returns how many were dropped.
    pub fn sanitize(&mut self, config: &ClusterConfig) -> usize {
        let before = self.clusters.len();
        self.clusters.retain(|c| c.centroid.is_valid());
        for c in &mut self.clusters {
            c.success_rate = if c.success_rate.is_finite() {
                c.success_rate.clamp(0.0, 1.0)
            } else {
                0.0
            };
            c.radius_meters = if c.radius_meters.is_finite() {
                c.radius_meters
                    .clamp(config.min_radius_meters, config.max_radius_meters)
            } else {
                config.initial_radius_meters
            };
        }
        before - self.clusters.len()
    }

    pub fn clusters(&self) -> &[LocationCluster] {
        &self.clusters
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Total sessions across all clusters
    pub fn total_sessions(&self) -> u64 {
        self.clusters.iter().map(|c| c.session_count as u64).sum()
    }
}
