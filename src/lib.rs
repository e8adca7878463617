//! Park Flux - On-device engine that learns where a user parks
//!
//! Park Flux turns completed parking sessions into a small personal model and
//! answers two questions from it: "where will I most likely park?" and "which
//! areas near here work for me?". Everything runs locally; the only network
//! collaborator is an optional, untrusted assistant bounded by a timeout.
//!
//! ## Modules
//!
//! - **Model**: [`patterns`], [`clusters`], [`metrics`] hold what was learned
//! - **Queries**: [`scoring`], [`prediction`], [`recommend`], [`cache`]
//! - **Runtime**: [`engine`] (single writer, snapshot readers, background
//!   persistence) and [`maintenance`] (periodic pruning and merging)
//! - **Collaborators**: [`storage`], [`clock`], [`assistant`], [`analytics`]
//!
//! ## Example
//!
//! ```ignore
//! let engine = ParkingEngine::builder().build().await?;
//! engine.learn(&session)?;
//! let prediction = engine.predict(current, None, &[])?;
//! ```

pub mod analytics;
pub mod assistant;
pub mod cache;
pub mod clock;
pub mod clusters;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod maintenance;
pub mod metrics;
pub mod patterns;
pub mod prediction;
pub mod recommend;
pub mod scoring;
pub mod storage;
pub mod types;

pub use config::EngineConfig;
pub use engine::{
    EngineBuilder, EngineStats, LearnOutcome, MaintenanceReport, ParkingEngine, ParkingModel,
};
pub use error::{ParkError, ParkResult, StorageError};
pub use maintenance::{MaintenanceHandle, MaintenanceScheduler};
pub use types::{
    AlternativeSpot, GeoPoint, LocationCluster, LocationFix, ParkingPattern, ParkingSession,
    Prediction, Recommendation, RecommendationSource,
};

/// Park Flux version reported by the CLI
pub const PARK_FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name used in diagnostics
pub const PRODUCER_NAME: &str = "park-flux";
