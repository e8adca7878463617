//! Core data types for Park Flux
//!
//! These types describe the learned parking model (patterns, clusters) and the
//! values that flow in and out of the engine (sessions, predictions,
//! recommendations). Every persisted type tolerates additive schema evolution:
//! unknown fields are ignored and missing optional fields default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ParkError, ParkResult};

/// A geographic point in WGS84 degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
    /// Horizontal accuracy in meters, when the fix reported one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            accuracy: None,
        }
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    /// Great-circle distance to another point in meters
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        crate::geo::haversine_meters(self, other)
    }

    /// Whether the coordinates are finite and inside valid lat/lng ranges
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// A location fix as delivered by the device location provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl From<LocationFix> for GeoPoint {
    fn from(fix: LocationFix) -> Self {
        GeoPoint {
            lat: fix.latitude,
            lng: fix.longitude,
            accuracy: fix.accuracy,
        }
    }
}

/// A completed parking session reported by the app
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParkingSession {
    /// Where the search for parking started
    pub start_location: GeoPoint,
    /// Where the vehicle was finally parked
    pub parking_location: GeoPoint,
    /// Minutes spent looking for a spot
    pub search_duration_minutes: f64,
    /// Distance walked from the spot to the destination
    #[serde(default)]
    pub walk_distance_meters: Option<f64>,
    #[serde(default)]
    pub venue: Option<String>,
    pub was_successful: bool,
    /// User rating, 1-5
    #[serde(default)]
    pub user_satisfaction: Option<u8>,
    #[serde(default)]
    pub context_tags: Vec<String>,
    /// When the car was parked; the engine clock is used when absent
    #[serde(default)]
    pub parked_at: Option<DateTime<Utc>>,
    /// How long the car stayed parked
    #[serde(default)]
    pub parking_duration_minutes: Option<f64>,
}

impl ParkingSession {
    /// Create a minimal session; optional fields can be set directly afterwards
    pub fn new(
        start_location: GeoPoint,
        parking_location: GeoPoint,
        search_duration_minutes: f64,
        was_successful: bool,
    ) -> Self {
        Self {
            start_location,
            parking_location,
            search_duration_minutes,
            walk_distance_meters: None,
            venue: None,
            was_successful,
            user_satisfaction: None,
            context_tags: Vec::new(),
            parked_at: None,
            parking_duration_minutes: None,
        }
    }

    /// Parse a session from JSON, reporting missing fields as validation errors
    pub fn from_json(json: &str) -> ParkResult<Self> {
        let session: ParkingSession = serde_json::from_str(json).map_err(|e| {
            let message = e.to_string();
            if message.starts_with("missing field") {
                ParkError::MissingField(message)
            } else {
                ParkError::Validation(message)
            }
        })?;
        session.validate()?;
        Ok(session)
    }

    /// Check that the session carries usable data
    pub fn validate(&self) -> ParkResult<()> {
        if !self.start_location.is_valid() {
            return Err(ParkError::Validation(
                "start_location has out-of-range coordinates".to_string(),
            ));
        }
        if !self.parking_location.is_valid() {
            return Err(ParkError::Validation(
                "parking_location has out-of-range coordinates".to_string(),
            ));
        }
        if !self.search_duration_minutes.is_finite() || self.search_duration_minutes < 0.0 {
            return Err(ParkError::Validation(
                "search_duration_minutes must be a non-negative number".to_string(),
            ));
        }
        if let Some(walk) = self.walk_distance_meters {
            if !walk.is_finite() || walk < 0.0 {
                return Err(ParkError::Validation(
                    "walk_distance_meters must be a non-negative number".to_string(),
                ));
            }
        }
        if let Some(satisfaction) = self.user_satisfaction {
            if !(1..=5).contains(&satisfaction) {
                return Err(ParkError::Validation(format!(
                    "user_satisfaction must be between 1 and 5, got {satisfaction}"
                )));
            }
        }
        if let Some(duration) = self.parking_duration_minutes {
            if !duration.is_finite() || duration < 0.0 {
                return Err(ParkError::Validation(
                    "parking_duration_minutes must be a non-negative number".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Venue label, ignoring blank strings
    pub fn venue_label(&self) -> Option<&str> {
        self.venue
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// A recurring "I parked here at this time" observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingPattern {
    pub id: String,
    /// 0 = Sunday .. 6 = Saturday
    pub day_of_week: u8,
    /// Minutes since local midnight, 0-1439
    pub time_of_day_minutes: u16,
    pub location: GeoPoint,
    #[serde(default)]
    pub venue: Option<String>,
    pub frequency: u32,
    pub confidence: f64,
    pub last_used_at: DateTime<Utc>,
    #[serde(default)]
    pub context_tags: BTreeSet<String>,
}

/// A coarse spatial aggregate approximating a parking area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationCluster {
    pub id: String,
    pub centroid: GeoPoint,
    pub radius_meters: f64,
    pub session_count: u32,
    pub last_visit_at: DateTime<Utc>,
    #[serde(default)]
    pub avg_parking_duration_minutes: f64,
    /// Sessions that reported a parking duration
    #[serde(default)]
    pub duration_samples: u32,
    pub success_rate: f64,
    /// Hour of day (0-23) to visit count
    #[serde(default)]
    pub time_patterns: BTreeMap<u8, u32>,
    /// Day of week (0-6) to visit count
    #[serde(default)]
    pub day_patterns: BTreeMap<u8, u32>,
}

impl LocationCluster {
    /// Quality weight used when blending clusters into predictions
    pub fn weight(&self) -> f64 {
        self.success_rate * (self.session_count as f64 + 1.0).ln()
    }
}

/// An alternative spot offered next to the main prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativeSpot {
    pub location: GeoPoint,
    pub confidence: f64,
    pub distance_meters: f64,
}

/// Best guess of where the user will park
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub location: GeoPoint,
    pub radius_meters: f64,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub alternative_spots: Vec<AlternativeSpot>,
    pub estimated_walk_minutes: u32,
    pub suggestions: Vec<String>,
    /// True when no learned data matched and the default was returned
    #[serde(default)]
    pub is_fallback: bool,
    pub generated_at: DateTime<Utc>,
}

/// Where a recommendation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    /// Ranked from the user's own clusters and patterns
    Local,
    /// Supplementary suggestion from the external assistant
    Assistant,
}

/// A ranked parking area for a "where should I park near X" query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub location: GeoPoint,
    pub score: f64,
    pub reasons: Vec<String>,
    pub walk_time_minutes: u32,
    pub confidence: f64,
    pub source: RecommendationSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
}
