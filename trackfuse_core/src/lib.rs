//! TrackFuse Core - Track Correlation and Multi-Sensor Fusion
//!
//! Turns a stream of raw track reports from many sensors and platforms into
//! one consistent set of local tracks per platform:
//!
//! ```text
//!  TrackReport ──► CorrelationMap ──hit──► FusionEngine::fuse ──► LocalTrack
//!                       │ miss                                     ▲
//!                       ▼                                          │
//!             CorrelationStrategy ──none──► FusionEngine::initialize
//! ```
//!
//! 1. **Geodesy**: WGS84 ECEF <-> geodetic, per-site ENU frames
//! 2. **Fusion**: information-form state with independent horizontal and
//!    vertical substitution, error synthesis from report quality
//! 3. **Correlation**: pluggable gates over a raw -> local id cache

pub mod config;
pub mod correlation;
pub mod correlation_map;
pub mod covariance;
pub mod error;
pub mod fusion;
pub mod geodesy;
pub mod local_track;
pub mod report;
pub mod track_id;
pub mod track_manager;
pub mod track_status;

// Re-export key types for convenience
pub use config::{ErrorHeuristics, GateConfig, TrackManagerConfig};
pub use correlation::{
    create_strategy, CorrelationStrategy, NearestNeighbor, StatisticalGate, StrategyKind,
    TestCorrelation,
};
pub use correlation_map::CorrelationMap;
pub use error::{ErrorKind, TrackingError};
pub use fusion::{FusionEngine, LocalTrackState};
pub use geodesy::{Geodetic, LocalFrame};
pub use local_track::LocalTrack;
pub use report::{SourceKey, TrackReport, TrackType};
pub use track_id::{TrackId, TrackIdParseError};
pub use track_manager::{IngestOutcome, TrackEvent, TrackManager};
pub use track_status::{PlatformRegistry, TrackStatus};
