//! WGS84 conversions and local east-north-up frames.
//!
//! Fused state lives in an ENU tangent frame anchored at a fixed reference
//! point. Polar measurements are expressed in the ENU frame of their
//! originator and must be rotated into the reference frame before use.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Degrees to radians conversion factor
const DTOR: f64 = PI / 180.0;

/// Radians to degrees conversion factor
const RTOD: f64 = 180.0 / PI;

/// WGS84 semi-major axis (m)
pub const WGS84_A: f64 = 6378137.0;

/// WGS84 flattening
pub const WGS84_F: f64 = 1.0 / 298.257223563;

/// WGS84 semi-minor axis (m)
pub const WGS84_B: f64 = WGS84_A * (1.0 - WGS84_F);

/// WGS84 first eccentricity squared
pub const WGS84_ECC_SQ: f64 = 1.0 - (WGS84_B * WGS84_B) / (WGS84_A * WGS84_A);

/// A geodetic position: latitude/longitude in degrees, altitude in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geodetic {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_m: f64,
}

impl Geodetic {
    pub fn new(lat_deg: f64, lon_deg: f64, alt_m: f64) -> Self {
        Self {
            lat_deg,
            lon_deg,
            alt_m,
        }
    }

    pub fn to_ecef(&self) -> Vector3<f64> {
        llh_to_ecef(self)
    }
}

impl Default for Geodetic {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

/// Converts WGS84 lat/lon/height to ECEF meters.
pub fn llh_to_ecef(llh: &Geodetic) -> Vector3<f64> {
    let lat = llh.lat_deg * DTOR;
    let lon = llh.lon_deg * DTOR;

    let (slat, clat) = lat.sin_cos();
    let (slon, clon) = lon.sin_cos();

    // Radius of curvature in prime vertical
    let rn = WGS84_A / (1.0 - slat * slat * WGS84_ECC_SQ).sqrt();

    Vector3::new(
        (rn + llh.alt_m) * clat * clon,
        (rn + llh.alt_m) * clat * slon,
        (rn * (1.0 - WGS84_ECC_SQ) + llh.alt_m) * slat,
    )
}

/// Converts ECEF meters to WGS84 lat/lon/height (Bowring's method).
pub fn ecef_to_llh(ecef: &Vector3<f64>) -> Geodetic {
    let (x, y, z) = (ecef.x, ecef.y, ecef.z);
    let lon = y.atan2(x);

    let p = (x * x + y * y).sqrt();
    let th = (WGS84_A * z).atan2(WGS84_B * p);
    let (sin_th, cos_th) = th.sin_cos();

    let ep_sq = (WGS84_A * WGS84_A - WGS84_B * WGS84_B) / (WGS84_B * WGS84_B);
    let lat = (z + ep_sq * WGS84_B * sin_th.powi(3))
        .atan2(p - WGS84_ECC_SQ * WGS84_A * cos_th.powi(3));

    let (sin_lat, cos_lat) = lat.sin_cos();
    let n = WGS84_A / (1.0 - WGS84_ECC_SQ * sin_lat * sin_lat).sqrt();

    // Near the poles p / cos(lat) is ill-conditioned; use the z form instead.
    let alt = if cos_lat.abs() > 1e-6 {
        p / cos_lat - n
    } else {
        z / sin_lat - n * (1.0 - WGS84_ECC_SQ)
    };

    Geodetic::new(lat * RTOD, lon * RTOD, alt)
}

/// Rotation taking ECEF vectors into the ENU frame at the given point.
///
/// Rows are the east, north and up unit vectors expressed in ECEF.
pub fn enu_rotation(llh: &Geodetic) -> Matrix3<f64> {
    let (slat, clat) = (llh.lat_deg * DTOR).sin_cos();
    let (slon, clon) = (llh.lon_deg * DTOR).sin_cos();

    Matrix3::new(
        -slon,
        clon,
        0.0,
        -slat * clon,
        -slat * slon,
        clat,
        clat * clon,
        clat * slon,
        slat,
    )
}

/// Converts a range/bearing/elevation triple into an ENU offset.
///
/// Bearing is measured clockwise from north, elevation up from the local
/// horizontal, both in radians.
pub fn rbe_to_enu(range: f64, bearing: f64, elevation: f64) -> Vector3<f64> {
    let (sb, cb) = bearing.sin_cos();
    let (se, ce) = elevation.sin_cos();
    Vector3::new(range * ce * sb, range * ce * cb, range * se)
}

/// Inverse of [`rbe_to_enu`]: returns `(range, bearing, elevation)`.
pub fn enu_to_rbe(offset: &Vector3<f64>) -> (f64, f64, f64) {
    let ground = offset.x.hypot(offset.y);
    let range = offset.norm();
    let bearing = offset.x.atan2(offset.y);
    let elevation = offset.z.atan2(ground);
    (range, bearing, elevation)
}

/// Wraps an angle difference into `[-pi, pi)`.
pub fn normalize_angle(angle: f64) -> f64 {
    (angle + PI).rem_euclid(2.0 * PI) - PI
}

/// A local east-north-up tangent frame anchored at a geodetic point.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalFrame {
    origin: Geodetic,
    origin_ecef: Vector3<f64>,
    rotation: Matrix3<f64>,
}

impl LocalFrame {
    pub fn new(origin: Geodetic) -> Self {
        Self {
            origin,
            origin_ecef: llh_to_ecef(&origin),
            rotation: enu_rotation(&origin),
        }
    }

    /// Frame anchored at an ECEF point.
    pub fn at_ecef(point: &Vector3<f64>) -> Self {
        Self::new(ecef_to_llh(point))
    }

    pub fn origin(&self) -> &Geodetic {
        &self.origin
    }

    pub fn origin_ecef(&self) -> &Vector3<f64> {
        &self.origin_ecef
    }

    /// ECEF -> ENU rotation of this frame.
    pub fn rotation(&self) -> &Matrix3<f64> {
        &self.rotation
    }

    pub fn to_local_position(&self, ecef: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * (ecef - self.origin_ecef)
    }

    pub fn to_local_vector(&self, ecef: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * ecef
    }

    pub fn to_ecef_position(&self, local: &Vector3<f64>) -> Vector3<f64> {
        self.origin_ecef + self.rotation.transpose() * local
    }

    pub fn to_ecef_vector(&self, local: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.transpose() * local
    }

    /// Rotation taking vectors from `other`'s ENU axes into this frame's.
    ///
    /// `M = R_self * R_otherᵀ`; a covariance `C` expressed in `other` becomes
    /// `M C Mᵀ` here.
    pub fn rotation_from(&self, other: &LocalFrame) -> Matrix3<f64> {
        self.rotation * other.rotation.transpose()
    }
}

impl Default for LocalFrame {
    fn default() -> Self {
        Self::new(Geodetic::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_llh_ecef_round_trip() {
        let llh = Geodetic::new(37.7749, -122.4194, 150.0);
        let back = ecef_to_llh(&llh_to_ecef(&llh));

        assert_relative_eq!(back.lat_deg, llh.lat_deg, epsilon = 1e-9);
        assert_relative_eq!(back.lon_deg, llh.lon_deg, epsilon = 1e-9);
        assert_relative_eq!(back.alt_m, llh.alt_m, epsilon = 1e-4);
    }

    #[test]
    fn test_equator_ecef() {
        let ecef = llh_to_ecef(&Geodetic::new(0.0, 0.0, 0.0));
        assert_relative_eq!(ecef.x, WGS84_A, epsilon = 1e-6);
        assert_relative_eq!(ecef.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(ecef.z, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_enu_rotation_is_orthonormal() {
        let r = enu_rotation(&Geodetic::new(51.5, -0.1, 0.0));
        assert_relative_eq!(r * r.transpose(), Matrix3::identity(), epsilon = 1e-12);
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_local_position_of_point_above_origin() {
        let origin = Geodetic::new(45.0, 10.0, 0.0);
        let frame = LocalFrame::new(origin);
        let above = llh_to_ecef(&Geodetic::new(45.0, 10.0, 1000.0));

        let local = frame.to_local_position(&above);
        assert_relative_eq!(local, Vector3::new(0.0, 0.0, 1000.0), epsilon = 1e-6);
        assert_relative_eq!(frame.to_ecef_position(&local), above, epsilon = 1e-6);
    }

    #[test]
    fn test_rbe_round_trip() {
        let offset = rbe_to_enu(12_000.0, 0.75, 0.1);
        let (r, b, e) = enu_to_rbe(&offset);
        assert_relative_eq!(r, 12_000.0, epsilon = 1e-8);
        assert_relative_eq!(b, 0.75, epsilon = 1e-12);
        assert_relative_eq!(e, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_bearing_convention() {
        // Due east at zero elevation
        let east = rbe_to_enu(100.0, std::f64::consts::FRAC_PI_2, 0.0);
        assert_relative_eq!(east, Vector3::new(100.0, 0.0, 0.0), epsilon = 1e-9);
    }

    #[test]
    fn test_normalize_angle() {
        assert_relative_eq!(normalize_angle(3.0 * PI / 2.0), -PI / 2.0, epsilon = 1e-12);
        assert_relative_eq!(normalize_angle(-0.25), -0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_rotation_from_self_is_identity() {
        let frame = LocalFrame::new(Geodetic::new(10.0, 20.0, 0.0));
        assert_relative_eq!(frame.rotation_from(&frame), Matrix3::identity(), epsilon = 1e-12);
    }
}
