//! Track manager configuration.
//!
//! Built by the input layer (or loaded from JSON by the sim harness) and
//! consumed once at construction time.

use crate::geodesy::Geodetic;
use serde::{Deserialize, Serialize};

// ============================================================================
// GATES
// ============================================================================

/// Correlation gate thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Euclidean gate used when report and track are both full 3-D (m)
    pub position_gate_m: f64,

    /// Gate on the sigma-normalized range/bearing/elevation residual
    pub normalized_gate: f64,

    /// False-reject probability α of the statistical gate; the critical
    /// value is `sqrt(-2 ln α)`
    pub false_reject_probability: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            position_gate_m: 500.0,
            normalized_gate: 4.0,
            false_reject_probability: 0.001,
        }
    }
}

impl GateConfig {
    /// Critical Mahalanobis distance for the statistical gate.
    pub fn statistical_threshold(&self) -> f64 {
        let alpha = self.false_reject_probability.clamp(f64::MIN_POSITIVE, 1.0);
        (-2.0 * alpha.ln()).sqrt()
    }
}

// ============================================================================
// ERROR SYNTHESIS
// ============================================================================

/// Heuristic one-sigma errors used when a report does not supply its own.
///
/// The synthesized sigma is `constant / max(quality, min_quality)`, so a
/// low-quality source is trusted proportionally less. None of these affect
/// correctness; they only shape the uncertainty of unspecified sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorHeuristics {
    /// Range error (m)
    pub range_error_m: f64,

    /// Bearing error (rad)
    pub bearing_error_rad: f64,

    /// Elevation error (rad)
    pub elevation_error_rad: f64,

    /// Isotropic location error for 3-D reports (m)
    pub location_error_m: f64,

    /// Isotropic velocity error (m/s)
    pub velocity_error_mps: f64,

    /// Derived range-rate sigma as a fraction of the rate when no velocity
    /// covariance is available
    pub range_rate_fraction: f64,

    /// Quality floor in the scale factor
    pub min_quality: f64,
}

impl Default for ErrorHeuristics {
    fn default() -> Self {
        Self {
            range_error_m: 50.0,
            bearing_error_rad: 0.5_f64.to_radians(),
            elevation_error_rad: 1.0_f64.to_radians(),
            location_error_m: 100.0,
            velocity_error_mps: 10.0,
            range_rate_fraction: 0.1,
            min_quality: 0.1,
        }
    }
}

impl ErrorHeuristics {
    /// `1 / max(quality, min_quality)`.
    pub fn scale_factor(&self, quality: f64) -> f64 {
        1.0 / quality.max(self.min_quality)
    }

    /// Returns `supplied` if the source gave one, else the scaled heuristic.
    pub fn sigma(&self, supplied: f64, constant: f64, quality: f64) -> f64 {
        if supplied > 0.0 {
            supplied
        } else {
            constant * self.scale_factor(quality)
        }
    }
}

// ============================================================================
// MANAGER
// ============================================================================

/// Configuration for the TrackManager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackManagerConfig {
    /// Correlation strategy name (see `StrategyKind`)
    pub strategy: String,

    pub gate: GateConfig,

    pub heuristics: ErrorHeuristics,

    /// Anchor of the ENU frame fused state is kept in
    pub reference_point: Geodetic,

    /// Drop a local track when its last contributing raw track is dropped
    pub drop_uncorrelated_tracks: bool,

    /// Re-gate cached correlations on every report and re-correlate on failure
    pub reverify_correlations: bool,

    /// Purge local tracks not updated for this long (s); `None` disables
    pub purge_interval: Option<f64>,
}

impl Default for TrackManagerConfig {
    fn default() -> Self {
        Self {
            strategy: "nearest_neighbor".to_string(),
            gate: GateConfig::default(),
            heuristics: ErrorHeuristics::default(),
            reference_point: Geodetic::default(),
            drop_uncorrelated_tracks: false,
            reverify_correlations: false,
            purge_interval: None,
        }
    }
}
