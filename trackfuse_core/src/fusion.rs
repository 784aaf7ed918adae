//! The fusion (cluster) engine.
//!
//! Folds one heterogeneous report at a time into a local track's state:
//!
//! 1. Dimensionality resolution (3-D location, range+bearing(+elevation),
//!    range-only, bearing/elevation-only)
//! 2. Frame conversion into the reference ENU frame, anchored at the
//!    originator for polar data
//! 3. Error synthesis for sigmas the source did not supply
//! 4. Range-rate derivation from relative velocity
//! 5. Covariance assembly (full state covariance, oriented polar covariance,
//!    or isotropic location error)
//! 6. Information substitution, horizontal and vertical blocks independently
//! 7. Single-source streak tracking
//!
//! Both [`FusionEngine::initialize`] and [`FusionEngine::fuse`] are pure: they
//! never touch their inputs and keep no state between calls.

use crate::config::{ErrorHeuristics, TrackManagerConfig};
use crate::covariance::{self, PolarSigmas};
use crate::error::TrackingError;
use crate::geodesy::{self, Geodetic, LocalFrame};
use crate::report::{SourceKey, TrackReport};
use nalgebra::{Matrix2, Matrix3, Matrix4, Matrix6, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// State indices [e, n, ve, vn] substituted by a 2-D measurement.
const HORIZONTAL: [usize; 4] = [0, 1, 3, 4];

/// State indices [u, vu] preserved across 2-D measurements.
const VERTICAL: [usize; 2] = [2, 5];

// ============================================================================
// STATE
// ============================================================================

/// A range rate with its one-sigma error (m/s).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeRate {
    pub value: f64,
    pub sigma: f64,
}

/// The state a track held before its latest update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorState {
    pub position: Vector3<f64>,
    pub velocity: Option<Vector3<f64>>,
    pub information: Matrix6<f64>,
    pub update_time: f64,
}

/// Fused kinematic state of a local track, in the reference ENU frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalTrackState {
    /// Position [e, n, u] (m)
    pub position: Vector3<f64>,

    /// Velocity [ve, vn, vu] (m/s), if any report carried one
    pub velocity: Option<Vector3<f64>>,

    /// Inverse covariance over [e, n, u, ve, vn, vu]
    pub information: Matrix6<f64>,

    /// True once a report has determined altitude
    pub has_vertical_data: bool,

    pub update_time: f64,

    pub range_rate: Option<RangeRate>,

    pub previous: Option<PriorState>,

    /// The most recently fused report
    pub last_report: Option<TrackReport>,

    /// Consecutive sensor reports from the source of `last_report`
    pub consecutive_single_source_hits: u32,
}

impl LocalTrackState {
    pub fn last_source(&self) -> Option<SourceKey> {
        self.last_report.as_ref().map(TrackReport::source_key)
    }

    /// True when both horizontal velocity axes carry information.
    pub fn has_horizontal_velocity(&self) -> bool {
        self.velocity.is_some() && self.information[(3, 3)] > 0.0 && self.information[(4, 4)] > 0.0
    }

    pub fn previous_update_time(&self) -> Option<f64> {
        self.previous.as_ref().map(|p| p.update_time)
    }

    /// Position covariance, if the position information is full rank.
    pub fn position_covariance(&self) -> Option<Matrix3<f64>> {
        if let Some(cov) = self.information.try_inverse() {
            return Some(cov.fixed_view::<3, 3>(0, 0).into());
        }
        let block: Matrix3<f64> = self.information.fixed_view::<3, 3>(0, 0).into();
        block.try_inverse()
    }

    /// East/north covariance, available even without vertical data.
    pub fn horizontal_covariance(&self) -> Option<Matrix2<f64>> {
        if let Some(cov) = self.position_covariance() {
            return Some(cov.fixed_view::<2, 2>(0, 0).into());
        }
        let block: Matrix2<f64> = self.information.fixed_view::<2, 2>(0, 0).into();
        block.try_inverse()
    }

    /// RMS one-sigma position error over the determined axes.
    pub fn position_sigma(&self) -> Option<f64> {
        if let Some(cov) = self.position_covariance() {
            return Some((cov.trace() / 3.0).max(0.0).sqrt());
        }
        self.horizontal_covariance()
            .map(|cov| (cov.trace() / 2.0).max(0.0).sqrt())
    }
}

// ============================================================================
// MEASUREMENT
// ============================================================================

/// A report converted into the reference frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub position: Vector3<f64>,
    pub velocity: Option<Vector3<f64>>,

    /// Covariance over [e, n, u, ve, vn, vu]; the velocity block is zero
    /// when `velocity` is `None`
    pub covariance: Matrix6<f64>,

    /// False for range/bearing reports whose altitude was not measured
    pub has_vertical_data: bool,

    pub range_rate: Option<RangeRate>,
}

impl Measurement {
    pub fn position_covariance(&self) -> Matrix3<f64> {
        self.covariance.fixed_view::<3, 3>(0, 0).into()
    }

    /// Information over all six axes (velocity block zero without velocity).
    pub fn information(&self) -> Result<Matrix6<f64>, TrackingError> {
        if self.velocity.is_some() {
            return self
                .covariance
                .try_inverse()
                .ok_or(TrackingError::SingularCovariance);
        }
        let inverse = self
            .position_covariance()
            .try_inverse()
            .ok_or(TrackingError::SingularCovariance)?;
        let mut information = Matrix6::zeros();
        information.fixed_view_mut::<3, 3>(0, 0).copy_from(&inverse);
        Ok(information)
    }

    /// Information of the marginal horizontal block, scattered into [e, n, ve, vn].
    pub fn horizontal_information(&self) -> Result<Matrix6<f64>, TrackingError> {
        let mut information = Matrix6::zeros();
        if self.velocity.is_some() {
            let block = Matrix4::from_fn(|i, j| self.covariance[(HORIZONTAL[i], HORIZONTAL[j])]);
            let inverse = block.try_inverse().ok_or(TrackingError::SingularCovariance)?;
            for (a, &i) in HORIZONTAL.iter().enumerate() {
                for (b, &j) in HORIZONTAL.iter().enumerate() {
                    information[(i, j)] = inverse[(a, b)];
                }
            }
        } else {
            let block: Matrix2<f64> = self.covariance.fixed_view::<2, 2>(0, 0).into();
            let inverse = block.try_inverse().ok_or(TrackingError::SingularCovariance)?;
            information.fixed_view_mut::<2, 2>(0, 0).copy_from(&inverse);
        }
        Ok(information)
    }
}

/// A polar measurement resolved against an originator.
struct PolarFix {
    range: f64,
    bearing: f64,
    elevation: f64,
    vertical: bool,
    sigmas: PolarSigmas,
    origin: LocalFrame,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Converts reports into the reference frame and folds them into track state.
#[derive(Debug, Clone, Default)]
pub struct FusionEngine {
    frame: LocalFrame,
    heuristics: ErrorHeuristics,
}

impl FusionEngine {
    pub fn new(reference_point: Geodetic, heuristics: ErrorHeuristics) -> Self {
        Self {
            frame: LocalFrame::new(reference_point),
            heuristics,
        }
    }

    pub fn from_config(config: &TrackManagerConfig) -> Self {
        Self::new(config.reference_point, config.heuristics.clone())
    }

    /// The reference ENU frame fused state is expressed in.
    pub fn frame(&self) -> &LocalFrame {
        &self.frame
    }

    pub fn heuristics(&self) -> &ErrorHeuristics {
        &self.heuristics
    }

    /// Creates the first state of a local track.
    ///
    /// Range-only and bearing-only reports cannot start a track.
    pub fn initialize(&self, report: &TrackReport) -> Result<LocalTrackState, TrackingError> {
        let measurement = self.measure(report, None)?;
        let information = if measurement.has_vertical_data {
            measurement.information()?
        } else {
            measurement.horizontal_information()?
        };

        debug!(
            "Initialized state from {} (vertical={})",
            report.track_id, measurement.has_vertical_data
        );

        Ok(LocalTrackState {
            position: measurement.position,
            velocity: measurement.velocity,
            information,
            has_vertical_data: measurement.has_vertical_data,
            update_time: report.update_time,
            range_rate: measurement.range_rate,
            previous: None,
            last_report: Some(report.clone()),
            consecutive_single_source_hits: 0,
        })
    }

    /// Folds `report` into `current`, returning the next state.
    ///
    /// A repeat of the last fused report returns `current` unchanged. Distinct
    /// reports from one source at the same time are all fused.
    pub fn fuse(
        &self,
        current: &LocalTrackState,
        report: &TrackReport,
    ) -> Result<LocalTrackState, TrackingError> {
        if report.update_time < current.update_time {
            return Err(TrackingError::OutOfOrderReport {
                raw_id: report.track_id.clone(),
                report_time: report.update_time,
                track_time: current.update_time,
            });
        }

        if current.last_report.as_ref() == Some(report) {
            debug!("Ignoring repeated report {} at t={}", report.track_id, report.update_time);
            return Ok(current.clone());
        }

        let same_source = current
            .last_report
            .as_ref()
            .is_some_and(|last| report.is_from(&last.source_key()));

        let measurement = self.measure(report, Some(current))?;

        let mut next = current.clone();
        next.previous = Some(PriorState {
            position: current.position,
            velocity: current.velocity,
            information: current.information,
            update_time: current.update_time,
        });

        if measurement.has_vertical_data {
            next.position = measurement.position;
            next.velocity = measurement.velocity;
            next.information = measurement.information()?;
            next.has_vertical_data = true;
        } else {
            let mut information = measurement.horizontal_information()?;
            for &i in &VERTICAL {
                for &j in &VERTICAL {
                    information[(i, j)] = current.information[(i, j)];
                }
            }

            let keep_vertical = current.has_vertical_data;
            let up = if keep_vertical {
                current.position.z
            } else {
                measurement.position.z
            };
            next.position = Vector3::new(measurement.position.x, measurement.position.y, up);

            next.velocity = match measurement.velocity {
                Some(v) => {
                    let vu = current
                        .velocity
                        .filter(|_| keep_vertical)
                        .map_or(v.z, |prior| prior.z);
                    Some(Vector3::new(v.x, v.y, vu))
                }
                // Horizontal velocity becomes unknown; a known vertical rate survives
                None => match current.velocity.filter(|_| keep_vertical) {
                    Some(prior) => Some(Vector3::new(0.0, 0.0, prior.z)),
                    None => {
                        for k in 0..6 {
                            information[(5, k)] = 0.0;
                            information[(k, 5)] = 0.0;
                        }
                        None
                    }
                },
            };
            next.information = information;
        }

        next.update_time = report.update_time;
        next.range_rate = measurement.range_rate;
        next.consecutive_single_source_hits = if report.is_processed() || !same_source {
            0
        } else {
            current.consecutive_single_source_hits + 1
        };
        next.last_report = Some(report.clone());

        debug!(
            "Fused {} at t={} (vertical={}, hits={})",
            report.track_id,
            report.update_time,
            measurement.has_vertical_data,
            next.consecutive_single_source_hits
        );

        Ok(next)
    }

    /// Converts a report into the reference frame.
    ///
    /// `prior` completes range-only and bearing-only reports and supplies the
    /// altitude of 2-D ones; without it those fail as underdetermined.
    pub fn measure(
        &self,
        report: &TrackReport,
        prior: Option<&LocalTrackState>,
    ) -> Result<Measurement, TrackingError> {
        if report.is_processed() && report.state_covariance.is_none() {
            return Err(TrackingError::MissingCovarianceSource {
                raw_id: report.track_id.clone(),
            });
        }

        let h = &self.heuristics;
        let quality = report.quality;

        // Position, its covariance in the reference frame, and dimensionality
        let (position_ecef, position_cov, vertical) = match report.location {
            Some(location) => {
                let cov = match (report.range, report.bearing, report.originator_location) {
                    (Some(_), Some(_), Some(origin_ecef)) => {
                        // A located polar detection: orient the error ellipsoid
                        // along the line of sight.
                        let origin = LocalFrame::at_ecef(&origin_ecef);
                        let (range, bearing, elevation) =
                            geodesy::enu_to_rbe(&origin.to_local_position(&location));
                        let sigmas = self.polar_sigmas(report);
                        covariance::rotate_covariance(
                            &covariance::rbe_covariance(range, bearing, elevation, sigmas),
                            &self.frame.rotation_from(&origin),
                        )
                    }
                    _ => covariance::isotropic(h.sigma(
                        report.location_error,
                        h.location_error_m,
                        quality,
                    )),
                };
                (location, cov, true)
            }
            None => {
                let fix = self.resolve_polar(report, prior)?;
                let offset = geodesy::rbe_to_enu(fix.range, fix.bearing, fix.elevation);
                let position_ecef = fix.origin.to_ecef_position(&offset);
                let cov = covariance::rotate_covariance(
                    &covariance::rbe_covariance(fix.range, fix.bearing, fix.elevation, fix.sigmas),
                    &self.frame.rotation_from(&fix.origin),
                );
                (position_ecef, cov, fix.vertical)
            }
        };

        let position = self.frame.to_local_position(&position_ecef);
        let velocity = report.velocity.map(|v| self.frame.to_local_vector(&v));

        let covariance = match report.state_covariance {
            Some(state_cov) => {
                let mut rotated =
                    covariance::rotate_state_covariance(&state_cov, self.frame.rotation());
                if velocity.is_none() {
                    rotated.fixed_view_mut::<3, 3>(3, 3).fill(0.0);
                    rotated.fixed_view_mut::<3, 3>(0, 3).fill(0.0);
                    rotated.fixed_view_mut::<3, 3>(3, 0).fill(0.0);
                }
                rotated
            }
            None => {
                let mut cov = Matrix6::zeros();
                cov.fixed_view_mut::<3, 3>(0, 0).copy_from(&position_cov);
                if velocity.is_some() {
                    let sigma = h.sigma(report.velocity_error, h.velocity_error_mps, quality);
                    cov.fixed_view_mut::<3, 3>(3, 3)
                        .copy_from(&covariance::isotropic(sigma));
                }
                cov
            }
        };

        Ok(Measurement {
            position,
            velocity,
            covariance,
            has_vertical_data: vertical,
            range_rate: self.range_rate(report, &position_ecef),
        })
    }

    fn polar_sigmas(&self, report: &TrackReport) -> PolarSigmas {
        let h = &self.heuristics;
        PolarSigmas {
            range: h.sigma(report.range_error, h.range_error_m, report.quality),
            bearing: h.sigma(report.bearing_error, h.bearing_error_rad, report.quality),
            elevation: h.sigma(report.elevation_error, h.elevation_error_rad, report.quality),
        }
    }

    fn resolve_polar(
        &self,
        report: &TrackReport,
        prior: Option<&LocalTrackState>,
    ) -> Result<PolarFix, TrackingError> {
        let underdetermined = |detail| TrackingError::UnderdeterminedMeasurement {
            raw_id: report.track_id.clone(),
            detail,
        };

        match (report.range, report.bearing, prior) {
            (Some(_), Some(_), _) => {}
            (Some(_), None, None) => return Err(underdetermined("range-only report without a prior track")),
            (None, Some(_), None) => {
                return Err(underdetermined("bearing-only report without a prior track"))
            }
            (None, None, _) => return Err(underdetermined("no location, range or bearing")),
            _ => {}
        }

        let origin_ecef = report
            .originator_location
            .ok_or_else(|| TrackingError::IncompatibleFrame {
                raw_id: report.track_id.clone(),
            })?;
        let origin = LocalFrame::at_ecef(&origin_ecef);

        // Prior position as seen from the originator
        let prior_offset = prior.map(|p| {
            let offset = origin.to_local_position(&self.frame.to_ecef_position(&p.position));
            (offset, p.has_vertical_data)
        });
        let prior_range = |offset: &Vector3<f64>, vertical: bool| {
            if vertical {
                offset.norm()
            } else {
                offset.x.hypot(offset.y)
            }
        };

        let range = match (report.range, &prior_offset) {
            (Some(range), _) => range,
            // Slant range from the prior ground range along the measured elevation
            (None, Some((offset, false))) if report.elevation.is_some() => {
                let cos_e = report.elevation.map_or(1.0, f64::cos);
                if cos_e <= f64::EPSILON {
                    return Err(underdetermined("vertical bearing-only report on a 2-D track"));
                }
                prior_range(offset, false) / cos_e
            }
            (None, Some((offset, vertical))) => prior_range(offset, *vertical),
            (None, None) => return Err(underdetermined("bearing-only report without a prior track")),
        };

        let bearing = match (report.bearing, &prior_offset) {
            (Some(bearing), _) => bearing,
            (None, Some((offset, _))) => offset.x.atan2(offset.y),
            (None, None) => return Err(underdetermined("range-only report without a prior track")),
        };

        let (elevation, vertical) = match (report.elevation, &prior_offset) {
            (Some(elevation), _) => (elevation, true),
            // Range-only keeps the prior's full direction
            (None, Some((offset, true))) if report.bearing.is_none() => {
                (offset.z.atan2(offset.x.hypot(offset.y)), true)
            }
            // 2-D measurement: ground range follows from the known altitude
            (None, Some((offset, true))) if range > 0.0 => {
                ((offset.z / range).clamp(-1.0, 1.0).asin(), false)
            }
            _ => (0.0, false),
        };

        Ok(PolarFix {
            range,
            bearing,
            elevation,
            vertical,
            sigmas: self.polar_sigmas(report),
            origin,
        })
    }

    /// Supplied range rate, or the relative velocity projected on the line of
    /// sight when both velocities are known.
    fn range_rate(&self, report: &TrackReport, target_ecef: &Vector3<f64>) -> Option<RangeRate> {
        let h = &self.heuristics;

        if let Some(value) = report.range_rate {
            let sigma = h.sigma(
                report.range_rate_error,
                h.range_rate_fraction * value.abs(),
                report.quality,
            );
            return Some(RangeRate { value, sigma });
        }

        let velocity = report.velocity?;
        let origin_velocity = report.originator_velocity?;
        let origin = report.originator_location?;
        let los = (target_ecef - origin).try_normalize(1.0e-9)?;

        let value = (velocity - origin_velocity).dot(&los);
        let sigma = match report.state_covariance {
            Some(cov) => {
                let velocity_cov: Matrix3<f64> = cov.fixed_view::<3, 3>(3, 3).into();
                (los.transpose() * velocity_cov * los)[(0, 0)].max(0.0).sqrt()
            }
            None => h.range_rate_fraction * value.abs(),
        };

        Some(RangeRate { value, sigma })
    }
}

// ============================================================================
// TESTS
// ============================================================================
