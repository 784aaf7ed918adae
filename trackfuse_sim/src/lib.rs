//! TrackFuse Deterministic Simulation Harness
//!
//! Drives a [`trackfuse_core::TrackManager`] with reports from simulated
//! sensors observing seeded ground truth, then scores the resulting local
//! tracks against that truth.
//!
//! All randomness derives from a single 64-bit seed: the same seed always
//! reproduces the same reports, correlations and errors.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  truth   ┌──────────────────┐  TrackReport  ┌──────────────┐
//! │    Oracle    │─────────►│  SensorPlatform  │──────────────►│ TrackManager │
//! │ (kinematics) │          │ radar/2-D/relay  │               │              │
//! └──────────────┘          └──────────────────┘               └──────┬───────┘
//!        ▲                                                            │
//!        └──────────────── ScenarioRunner (metrics) ◄─────────────────┘
//! ```

mod error;
mod exporter;
mod oracle;
mod runner;
pub mod scenarios;
mod sensors;

pub use error::SimError;
pub use exporter::{SimExport, SimFrame, TargetPosition, TrackPosition};
pub use oracle::{GroundTruthTarget, Oracle};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use sensors::{SensorKind, SensorNoise, SensorPlatform};
