//! Simulated sensor platforms.
//!
//! Each platform observes ground truth and emits [`TrackReport`]s the way a
//! real source would: polar detections from radars, fused ECEF states with
//! covariance from a relay.

use crate::oracle::GroundTruthTarget;
use nalgebra::{Matrix3, Matrix6, Vector3};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use trackfuse_core::geodesy::{self, LocalFrame};
use trackfuse_core::{TrackId, TrackReport, TrackType};

/// What a platform measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    /// Range, bearing and elevation
    Radar3d,

    /// Range and bearing only
    Surveillance2d,

    /// Processed tracks with full state covariance
    Relay,
}

/// One-sigma measurement noise.
#[derive(Debug, Clone, Copy)]
pub struct SensorNoise {
    pub range_m: f64,
    pub bearing_rad: f64,
    pub elevation_rad: f64,
    pub range_rate_mps: f64,
    pub location_m: f64,
    pub velocity_mps: f64,
}

impl Default for SensorNoise {
    fn default() -> Self {
        Self {
            range_m: 10.0,
            bearing_rad: 0.1_f64.to_radians(),
            elevation_rad: 0.1_f64.to_radians(),
            range_rate_mps: 1.0,
            location_m: 25.0,
            velocity_mps: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SensorPlatform {
    /// Platform name; owner of the raw track ids it reports
    name: String,

    sensor_name: String,
    sensor_index: u32,
    kind: SensorKind,

    /// Site position [e, n, u] in the reference frame (m)
    site: Vector3<f64>,

    noise: SensorNoise,
    max_range_m: f64,
    enabled: bool,
}

impl SensorPlatform {
    pub fn new(name: impl Into<String>, sensor_index: u32, kind: SensorKind, site: Vector3<f64>) -> Self {
        let sensor_name = match kind {
            SensorKind::Radar3d => "radar-3d",
            SensorKind::Surveillance2d => "surveillance-2d",
            SensorKind::Relay => "relay",
        };
        Self {
            name: name.into(),
            sensor_name: sensor_name.to_string(),
            sensor_index,
            kind,
            site,
            noise: SensorNoise::default(),
            max_range_m: 50_000.0,
            enabled: true,
        }
    }

    pub fn with_noise(mut self, noise: SensorNoise) -> Self {
        self.noise = noise;
        self
    }

    pub fn with_max_range(mut self, range_m: f64) -> Self {
        self.max_range_m = range_m;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Raw track id this platform reports `target_id` under.
    pub fn raw_track_id(&self, target_id: u64) -> Option<TrackId> {
        let entity = u32::try_from(target_id).ok()?;
        let number = self.sensor_index.checked_mul(1000)?.checked_add(entity)?.checked_add(1)?;
        Some(TrackId::new(self.name.clone(), number))
    }

    /// Observes one target; `None` when disabled or out of range.
    pub fn observe(
        &self,
        frame: &LocalFrame,
        time: f64,
        target: &GroundTruthTarget,
        rng: &mut ChaCha8Rng,
    ) -> Option<TrackReport> {
        if !self.enabled || (target.position - self.site).norm() > self.max_range_m {
            return None;
        }

        let site_ecef = frame.to_ecef_position(&self.site);
        let target_ecef = frame.to_ecef_position(&target.position);
        let report = TrackReport::new(self.raw_track_id(target.id)?, time)
            .with_source(self.name.clone(), self.sensor_name.clone())
            .with_originator_location(site_ecef)
            .with_originator_velocity(Vector3::zeros());

        let report = match self.kind {
            SensorKind::Radar3d | SensorKind::Surveillance2d => {
                let site_frame = LocalFrame::at_ecef(&site_ecef);
                let offset = site_frame.to_local_position(&target_ecef);
                let (range, bearing, elevation) = geodesy::enu_to_rbe(&offset);

                let velocity = site_frame.to_local_vector(&frame.to_ecef_vector(&target.velocity));
                let range_rate = offset
                    .try_normalize(1.0e-9)
                    .map_or(0.0, |los| velocity.dot(&los));

                let n = &self.noise;
                let report = report
                    .with_range(range + gaussian(rng, n.range_m), n.range_m)
                    .with_bearing(
                        geodesy::normalize_angle(bearing + gaussian(rng, n.bearing_rad)),
                        n.bearing_rad,
                    )
                    .with_range_rate(range_rate + gaussian(rng, n.range_rate_mps), n.range_rate_mps);

                if self.kind == SensorKind::Radar3d {
                    report.with_elevation(elevation + gaussian(rng, n.elevation_rad), n.elevation_rad)
                } else {
                    report
                }
            }
            SensorKind::Relay => {
                let n = &self.noise;
                let position = target.position + noise_vector(rng, n.location_m);
                let velocity = target.velocity + noise_vector(rng, n.velocity_mps);

                report
                    .with_track_type(TrackType::Processed)
                    .with_location(frame.to_ecef_position(&position), n.location_m)
                    .with_velocity(frame.to_ecef_vector(&velocity), n.velocity_mps)
                    .with_state_covariance(ecef_state_covariance(frame, n.location_m, n.velocity_mps))
            }
        };

        Some(match self.kind {
            // A relay only knows the platform index
            SensorKind::Relay => match usize::try_from(target.id) {
                Ok(index) => report.with_target_index(index),
                Err(_) => report,
            },
            _ => report.with_target_name(target.name.clone()),
        })
    }
}

/// ENU position/velocity covariance expressed in ECEF; the vertical axis is
/// twice as uncertain as the horizontal ones.
fn ecef_state_covariance(frame: &LocalFrame, position_sigma: f64, velocity_sigma: f64) -> Matrix6<f64> {
    let r = frame.rotation();
    let block = |sigma: f64| -> Matrix3<f64> {
        let enu = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, 4.0)) * sigma.powi(2);
        r.transpose() * enu * r
    };

    let mut covariance = Matrix6::zeros();
    covariance
        .fixed_view_mut::<3, 3>(0, 0)
        .copy_from(&block(position_sigma));
    covariance
        .fixed_view_mut::<3, 3>(3, 3)
        .copy_from(&block(velocity_sigma));
    covariance
}

/// Zero-mean Gaussian sample; zero for a degenerate sigma.
fn gaussian(rng: &mut ChaCha8Rng, sigma: f64) -> f64 {
    match Normal::new(0.0, sigma) {
        Ok(normal) if sigma > 0.0 => normal.sample(rng),
        _ => 0.0,
    }
}

fn noise_vector(rng: &mut ChaCha8Rng, sigma: f64) -> Vector3<f64> {
    Vector3::new(gaussian(rng, sigma), gaussian(rng, sigma), gaussian(rng, sigma))
}
