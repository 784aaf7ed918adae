//! Measurement covariance construction and frame rotation.
//!
//! A polar measurement's covariance is built in the originator's ENU frame as
//! `J · diag(σr², σb², σe²) · Jᵀ`, where `J` is the Jacobian of
//! [`rbe_to_enu`](crate::geodesy::rbe_to_enu), then rotated into the
//! reference frame with `M C Mᵀ`.

use nalgebra::{Matrix3, Matrix6, Vector3};

/// Smallest range sigma accepted (m).
pub const RANGE_ERROR_FLOOR: f64 = 0.001;

/// Smallest angular sigma accepted (rad).
pub const ANGLE_ERROR_FLOOR: f64 = 1.0e-7;

/// One-sigma errors of a polar measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolarSigmas {
    pub range: f64,
    pub bearing: f64,
    pub elevation: f64,
}

impl PolarSigmas {
    /// Applies the numeric floors so the covariance stays invertible.
    pub fn floored(self) -> Self {
        Self {
            range: self.range.max(RANGE_ERROR_FLOOR),
            bearing: self.bearing.max(ANGLE_ERROR_FLOOR),
            elevation: self.elevation.max(ANGLE_ERROR_FLOOR),
        }
    }
}

/// Jacobian of the ENU offset with respect to (range, bearing, elevation).
pub fn rbe_jacobian(range: f64, bearing: f64, elevation: f64) -> Matrix3<f64> {
    let (sb, cb) = bearing.sin_cos();
    let (se, ce) = elevation.sin_cos();

    Matrix3::from_columns(&[
        Vector3::new(ce * sb, ce * cb, se),
        Vector3::new(range * ce * cb, -range * ce * sb, 0.0),
        Vector3::new(-range * se * sb, -range * se * cb, range * ce),
    ])
}

/// Covariance of a polar measurement in the originator's ENU frame.
pub fn rbe_covariance(range: f64, bearing: f64, elevation: f64, sigmas: PolarSigmas) -> Matrix3<f64> {
    let s = sigmas.floored();
    let j = rbe_jacobian(range, bearing, elevation);
    let d = Matrix3::from_diagonal(&Vector3::new(
        s.range * s.range,
        s.bearing * s.bearing,
        s.elevation * s.elevation,
    ));
    symmetrize(&(j * d * j.transpose()))
}

/// `M C Mᵀ`.
pub fn rotate_covariance(covariance: &Matrix3<f64>, rotation: &Matrix3<f64>) -> Matrix3<f64> {
    symmetrize(&(rotation * covariance * rotation.transpose()))
}

/// Rotates a position+velocity covariance with `blockdiag(R, R)`.
pub fn rotate_state_covariance(covariance: &Matrix6<f64>, rotation: &Matrix3<f64>) -> Matrix6<f64> {
    let mut block = Matrix6::zeros();
    block.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation);
    block.fixed_view_mut::<3, 3>(3, 3).copy_from(rotation);
    let rotated = block * covariance * block.transpose();
    (rotated + rotated.transpose()) * 0.5
}

pub fn isotropic(sigma: f64) -> Matrix3<f64> {
    Matrix3::identity() * (sigma * sigma)
}

pub fn symmetrize(m: &Matrix3<f64>) -> Matrix3<f64> {
    (m + m.transpose()) * 0.5
}
