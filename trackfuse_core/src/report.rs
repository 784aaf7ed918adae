//! Normalized track reports handed over by the sensor/comm layer.

use crate::geodesy::{llh_to_ecef, Geodetic};
use crate::track_id::TrackId;
use nalgebra::{Matrix6, Vector3};
use serde::{Deserialize, Serialize};

/// Whether a report is a raw sensor measurement or an already-fused track
/// relayed from elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackType {
    #[default]
    Sensor,
    Processed,
}

/// Identity of the (originator, sensor) pair a report came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceKey {
    pub originator: String,
    pub sensor: String,
}

/// One measurement or track update at a single simulated time.
///
/// Every kinematic field is independently optional. Error fields hold one
/// sigma in the quantity's units; `0.0` means the source did not supply it.
/// Positions and velocities are ECEF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackReport {
    /// Raw track id assigned by the reporting source
    pub track_id: TrackId,
    pub update_time: f64,
    pub track_type: TrackType,

    // === Provenance ===
    pub originator: String,
    pub sensor: String,
    pub originator_location: Option<Vector3<f64>>,
    pub originator_velocity: Option<Vector3<f64>>,

    // === Kinematics ===
    pub location: Option<Vector3<f64>>,
    /// Slant range (m)
    pub range: Option<f64>,
    /// Clockwise from north at the originator (rad)
    pub bearing: Option<f64>,
    /// Above the originator's horizontal (rad)
    pub elevation: Option<f64>,
    /// Positive when opening (m/s)
    pub range_rate: Option<f64>,
    pub velocity: Option<Vector3<f64>>,
    /// Position+velocity covariance in ECEF
    pub state_covariance: Option<Matrix6<f64>>,

    // === Errors (0.0 = not supplied) ===
    pub range_error: f64,
    pub bearing_error: f64,
    pub elevation_error: f64,
    pub range_rate_error: f64,
    pub location_error: f64,
    pub velocity_error: f64,

    /// Source quality in (0, 1]
    pub quality: f64,

    // === Truth identity (best effort) ===
    pub target_name: Option<String>,
    pub target_index: Option<usize>,
}

impl TrackReport {
    /// An empty sensor report; populate it with the `with_*` builders.
    pub fn new(track_id: TrackId, update_time: f64) -> Self {
        Self {
            track_id,
            update_time,
            track_type: TrackType::Sensor,
            originator: String::new(),
            sensor: String::new(),
            originator_location: None,
            originator_velocity: None,
            location: None,
            range: None,
            bearing: None,
            elevation: None,
            range_rate: None,
            velocity: None,
            state_covariance: None,
            range_error: 0.0,
            bearing_error: 0.0,
            elevation_error: 0.0,
            range_rate_error: 0.0,
            location_error: 0.0,
            velocity_error: 0.0,
            quality: 1.0,
            target_name: None,
            target_index: None,
        }
    }

    pub fn with_track_type(mut self, track_type: TrackType) -> Self {
        self.track_type = track_type;
        self
    }

    pub fn with_source(mut self, originator: impl Into<String>, sensor: impl Into<String>) -> Self {
        self.originator = originator.into();
        self.sensor = sensor.into();
        self
    }

    pub fn with_originator_location(mut self, ecef: Vector3<f64>) -> Self {
        self.originator_location = Some(ecef);
        self
    }

    pub fn with_originator_llh(self, llh: Geodetic) -> Self {
        self.with_originator_location(llh_to_ecef(&llh))
    }

    pub fn with_originator_velocity(mut self, ecef: Vector3<f64>) -> Self {
        self.originator_velocity = Some(ecef);
        self
    }

    pub fn with_location(mut self, ecef: Vector3<f64>, error: f64) -> Self {
        self.location = Some(ecef);
        self.location_error = error;
        self
    }

    pub fn with_location_llh(self, llh: Geodetic, error: f64) -> Self {
        self.with_location(llh_to_ecef(&llh), error)
    }

    pub fn with_range(mut self, range: f64, error: f64) -> Self {
        self.range = Some(range);
        self.range_error = error;
        self
    }

    pub fn with_bearing(mut self, bearing: f64, error: f64) -> Self {
        self.bearing = Some(bearing);
        self.bearing_error = error;
        self
    }

    pub fn with_elevation(mut self, elevation: f64, error: f64) -> Self {
        self.elevation = Some(elevation);
        self.elevation_error = error;
        self
    }

    pub fn with_range_rate(mut self, range_rate: f64, error: f64) -> Self {
        self.range_rate = Some(range_rate);
        self.range_rate_error = error;
        self
    }

    pub fn with_velocity(mut self, ecef: Vector3<f64>, error: f64) -> Self {
        self.velocity = Some(ecef);
        self.velocity_error = error;
        self
    }

    pub fn with_state_covariance(mut self, covariance: Matrix6<f64>) -> Self {
        self.state_covariance = Some(covariance);
        self
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_target_name(mut self, name: impl Into<String>) -> Self {
        self.target_name = Some(name.into());
        self
    }

    pub fn with_target_index(mut self, index: usize) -> Self {
        self.target_index = Some(index);
        self
    }

    /// Minimum content required for correlation.
    pub fn has_range_or_location(&self) -> bool {
        self.range.is_some() || self.location.is_some()
    }

    pub fn is_processed(&self) -> bool {
        self.track_type == TrackType::Processed
    }

    pub fn source_key(&self) -> SourceKey {
        SourceKey {
            originator: self.originator.clone(),
            sensor: self.sensor.clone(),
        }
    }

    /// True when the report came from the given source.
    pub fn is_from(&self, source: &SourceKey) -> bool {
        self.originator == source.originator && self.sensor == source.sensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let report = TrackReport::new(TrackId::new("S1", 4), 1.5);
        assert_eq!(report.track_type, TrackType::Sensor);
        assert_eq!(report.quality, 1.0);
        assert_eq!(report.range_error, 0.0);
        assert!(!report.has_range_or_location());
    }

    #[test]
    fn test_range_or_location() {
        let base = TrackReport::new(TrackId::new("S1", 4), 0.0);
        assert!(base.clone().with_range(100.0, 0.0).has_range_or_location());
        assert!(base
            .clone()
            .with_location(Vector3::new(1.0, 2.0, 3.0), 0.0)
            .has_range_or_location());
        assert!(!base.with_bearing(0.2, 0.0).has_range_or_location());
    }

    #[test]
    fn test_source_key() {
        let report = TrackReport::new(TrackId::new("S1", 4), 0.0).with_source("awacs", "radar");
        let key = report.source_key();
        assert_eq!(key.originator, "awacs");
        assert_eq!(key.sensor, "radar");
        assert!(report.is_from(&key));
    }
}
