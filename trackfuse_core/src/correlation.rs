//! Pluggable correlation strategies.
//!
//! A strategy decides whether an incoming report belongs to an existing local
//! track. Every strategy reduces to a gate function returning a normalized
//! distance (`<= 1.0` inside the gate); the shared [`CorrelationStrategy::correlate`]
//! picks the minimum, breaking ties toward the lowest [`TrackId`].
//!
//! Variants:
//! - [`NearestNeighbor`]: Euclidean gate for 3-D vs 3-D, sigma-normalized
//!   range/bearing/elevation residual otherwise (default)
//! - [`StatisticalGate`]: Mahalanobis distance against `sqrt(-2 ln α)`
//! - [`TestCorrelation`]: nearest neighbor exposing its gate for unit tests

use crate::config::{GateConfig, TrackManagerConfig};
use crate::correlation_map::CorrelationMap;
use crate::error::TrackingError;
use crate::fusion::FusionEngine;
use crate::geodesy::{self, LocalFrame};
use crate::local_track::LocalTrack;
use crate::report::TrackReport;
use crate::track_id::TrackId;
use nalgebra::{Matrix2, Vector2};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

// ============================================================================
// STRATEGY TRAIT
// ============================================================================

/// The contract every correlation algorithm satisfies.
pub trait CorrelationStrategy: fmt::Debug {
    fn name(&self) -> &'static str;

    /// Applies configuration; called once before the first report.
    fn initialize(&mut self, config: &TrackManagerConfig);

    /// Normalized distance between `report` and `track`, or `None` when the
    /// track falls outside the gate.
    fn gate_distance(
        &self,
        report: &TrackReport,
        track: &LocalTrack,
    ) -> Result<Option<f64>, TrackingError>;

    fn correlation_map(&self) -> &CorrelationMap;

    fn correlation_map_mut(&mut self) -> &mut CorrelationMap;

    /// Chooses the local track `report` belongs to, or `None` for a new one.
    ///
    /// Fails with `InsufficientReportData` when the report carries neither
    /// range nor location. Never mutates `tracks`.
    fn correlate(
        &self,
        _sim_time: f64,
        report: &TrackReport,
        tracks: &BTreeMap<TrackId, LocalTrack>,
    ) -> Result<Option<TrackId>, TrackingError> {
        if !report.has_range_or_location() {
            return Err(TrackingError::InsufficientReportData {
                raw_id: report.track_id.clone(),
            });
        }

        // BTreeMap order plus strict `<` keeps the lowest id on ties
        let mut best: Option<(&TrackId, f64)> = None;
        for (id, track) in tracks {
            if let Some(distance) = self.gate_distance(report, track)? {
                if best.map_or(true, |(_, d)| distance < d) {
                    best = Some((id, distance));
                }
            }
        }

        match best {
            Some((id, distance)) => {
                debug!("{} correlates {} -> {} (d={:.3})", self.name(), report.track_id, id, distance);
                Ok(Some(id.clone()))
            }
            None => Ok(None),
        }
    }

    /// Called once per accepted correlation, new or repeated.
    fn record_correlation(&mut self, _sim_time: f64, report: &TrackReport, local_id: &TrackId) {
        self.correlation_map_mut()
            .insert(report.track_id.clone(), local_id.clone());
    }

    /// Forgets `raw_id`; a no-op for unknown ids.
    fn decorrelate(&mut self, raw_id: &TrackId) -> Option<TrackId> {
        self.correlation_map_mut().remove(raw_id)
    }

    fn correlated_track_id(&self, raw_id: &TrackId) -> Option<&TrackId> {
        self.correlation_map().lookup(raw_id)
    }

    /// Drops every mapping onto a destroyed local track.
    fn forget_local_track(&mut self, local_id: &TrackId) -> Vec<TrackId> {
        self.correlation_map_mut().remove_all_for_local(local_id)
    }
}

// ============================================================================
// NEAREST NEIGHBOR
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct NearestNeighbor {
    gate: GateConfig,
    engine: FusionEngine,
    map: CorrelationMap,
}

impl NearestNeighbor {
    pub fn new(config: &TrackManagerConfig) -> Self {
        let mut strategy = Self::default();
        strategy.initialize(config);
        strategy
    }

    /// Sigma-normalized range/bearing/elevation residual seen from the
    /// report's originator.
    ///
    /// Each sigma combines the report's (supplied or synthesized) error with
    /// the track's position uncertainty at the track's range.
    pub fn polar_residual(
        &self,
        report: &TrackReport,
        track: &LocalTrack,
    ) -> Result<f64, TrackingError> {
        let origin_ecef = report
            .originator_location
            .ok_or_else(|| TrackingError::IncompatibleFrame {
                raw_id: report.track_id.clone(),
            })?;
        let origin = LocalFrame::at_ecef(&origin_ecef);

        let state = track.state();
        let offset = origin.to_local_position(&self.engine.frame().to_ecef_position(&state.position));
        let (track_range, track_bearing, track_elevation) = geodesy::enu_to_rbe(&offset);

        let h = self.engine.heuristics();
        let q = report.quality;
        let track_sigma = state.position_sigma().unwrap_or(0.0);
        let angular_track_sigma = track_sigma / track_range.max(1.0);

        let mut sum = 0.0;
        if let Some(range) = report.range {
            let sigma = h.sigma(report.range_error, h.range_error_m, q).hypot(track_sigma);
            sum += ((range - track_range) / sigma).powi(2);
        }
        if let Some(bearing) = report.bearing {
            let sigma = h
                .sigma(report.bearing_error, h.bearing_error_rad, q)
                .hypot(angular_track_sigma);
            sum += (geodesy::normalize_angle(bearing - track_bearing) / sigma).powi(2);
        }
        if let (Some(elevation), true) = (report.elevation, state.has_vertical_data) {
            let sigma = h
                .sigma(report.elevation_error, h.elevation_error_rad, q)
                .hypot(angular_track_sigma);
            sum += ((elevation - track_elevation) / sigma).powi(2);
        }

        Ok(sum.sqrt())
    }
}

impl CorrelationStrategy for NearestNeighbor {
    fn name(&self) -> &'static str {
        StrategyKind::NearestNeighbor.name()
    }

    fn initialize(&mut self, config: &TrackManagerConfig) {
        self.gate = config.gate.clone();
        self.engine = FusionEngine::from_config(config);
    }

    fn gate_distance(
        &self,
        report: &TrackReport,
        track: &LocalTrack,
    ) -> Result<Option<f64>, TrackingError> {
        let state = track.state();

        let (distance, gate) = match (report.location, report.range) {
            (Some(location), _) if state.has_vertical_data => {
                let measured = self.engine.frame().to_local_position(&location);
                ((measured - state.position).norm(), self.gate.position_gate_m)
            }
            (_, Some(_)) => (self.polar_residual(report, track)?, self.gate.normalized_gate),
            (Some(location), None) => {
                let measured = self.engine.frame().to_local_position(&location);
                let residual: Vector2<f64> = (measured - state.position).xy();
                (residual.norm(), self.gate.position_gate_m)
            }
            (None, None) => {
                return Err(TrackingError::InsufficientReportData {
                    raw_id: report.track_id.clone(),
                })
            }
        };

        Ok((distance <= gate).then(|| distance / gate))
    }

    fn correlation_map(&self) -> &CorrelationMap {
        &self.map
    }

    fn correlation_map_mut(&mut self) -> &mut CorrelationMap {
        &mut self.map
    }
}

// ============================================================================
// STATISTICAL GATE
// ============================================================================

/// Track-to-track statistical test: the report's position and the track's
/// position are compared under `S = R + P`, and the report passes when the
/// Mahalanobis distance is at most `sqrt(-2 ln α)`.
#[derive(Debug, Clone, Default)]
pub struct StatisticalGate {
    gate: GateConfig,
    engine: FusionEngine,
    map: CorrelationMap,
}

impl StatisticalGate {
    pub fn new(config: &TrackManagerConfig) -> Self {
        let mut strategy = Self::default();
        strategy.initialize(config);
        strategy
    }

    pub fn mahalanobis_distance(
        &self,
        report: &TrackReport,
        track: &LocalTrack,
    ) -> Result<f64, TrackingError> {
        let state = track.state();
        let measurement = self.engine.measure(report, Some(state))?;
        let residual = measurement.position - state.position;

        let full = if measurement.has_vertical_data && state.has_vertical_data {
            state.position_covariance()
        } else {
            None
        };

        let d_squared = match full {
            Some(track_cov) => {
                let s = measurement.position_covariance() + track_cov;
                let s_inv = s.try_inverse().ok_or(TrackingError::SingularCovariance)?;
                (residual.transpose() * s_inv * residual)[(0, 0)]
            }
            None => {
                let track_cov = state.horizontal_covariance().unwrap_or_else(Matrix2::zeros);
                let r: Matrix2<f64> = measurement.position_covariance().fixed_view::<2, 2>(0, 0).into();
                let s_inv = (r + track_cov)
                    .try_inverse()
                    .ok_or(TrackingError::SingularCovariance)?;
                let residual = residual.xy();
                (residual.transpose() * s_inv * residual)[(0, 0)]
            }
        };

        Ok(d_squared.max(0.0).sqrt())
    }
}

impl CorrelationStrategy for StatisticalGate {
    fn name(&self) -> &'static str {
        StrategyKind::StatisticalGate.name()
    }

    fn initialize(&mut self, config: &TrackManagerConfig) {
        self.gate = config.gate.clone();
        self.engine = FusionEngine::from_config(config);
    }

    fn gate_distance(
        &self,
        report: &TrackReport,
        track: &LocalTrack,
    ) -> Result<Option<f64>, TrackingError> {
        if !report.has_range_or_location() {
            return Err(TrackingError::InsufficientReportData {
                raw_id: report.track_id.clone(),
            });
        }
        let threshold = self.gate.statistical_threshold();
        let distance = self.mahalanobis_distance(report, track)?;
        Ok((distance <= threshold).then(|| distance / threshold))
    }

    fn correlation_map(&self) -> &CorrelationMap {
        &self.map
    }

    fn correlation_map_mut(&mut self) -> &mut CorrelationMap {
        &mut self.map
    }
}

// ============================================================================
// TEST CORRELATION
// ============================================================================

/// Nearest neighbor with its gate exposed directly.
#[derive(Debug, Clone, Default)]
pub struct TestCorrelation {
    inner: NearestNeighbor,
}

impl TestCorrelation {
    pub fn new(config: &TrackManagerConfig) -> Self {
        Self {
            inner: NearestNeighbor::new(config),
        }
    }

    /// True when two local tracks fall inside each other's position gate:
    /// 3-D when both have vertical data, horizontal otherwise.
    pub fn test_correlation(&self, track_a: &LocalTrack, track_b: &LocalTrack) -> bool {
        let (a, b) = (track_a.state(), track_b.state());
        let distance = if a.has_vertical_data && b.has_vertical_data {
            (a.position - b.position).norm()
        } else {
            (a.position - b.position).xy().norm()
        };
        distance <= self.inner.gate.position_gate_m
    }

    /// True when `report` falls inside the gate of `track`.
    pub fn test_report(&self, report: &TrackReport, track: &LocalTrack) -> bool {
        matches!(self.inner.gate_distance(report, track), Ok(Some(_)))
    }
}

impl CorrelationStrategy for TestCorrelation {
    fn name(&self) -> &'static str {
        StrategyKind::Test.name()
    }

    fn initialize(&mut self, config: &TrackManagerConfig) {
        self.inner.initialize(config);
    }

    fn gate_distance(
        &self,
        report: &TrackReport,
        track: &LocalTrack,
    ) -> Result<Option<f64>, TrackingError> {
        self.inner.gate_distance(report, track)
    }

    fn correlation_map(&self) -> &CorrelationMap {
        self.inner.correlation_map()
    }

    fn correlation_map_mut(&mut self) -> &mut CorrelationMap {
        self.inner.correlation_map_mut()
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Registered strategy names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    NearestNeighbor,
    StatisticalGate,
    Test,
}

impl StrategyKind {
    pub fn all() -> Vec<StrategyKind> {
        vec![
            StrategyKind::NearestNeighbor,
            StrategyKind::StatisticalGate,
            StrategyKind::Test,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::NearestNeighbor => "nearest_neighbor",
            StrategyKind::StatisticalGate => "statistical_gate",
            StrategyKind::Test => "test",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            StrategyKind::NearestNeighbor => "Minimum normalized residual inside a fixed gate",
            StrategyKind::StatisticalGate => "Mahalanobis distance against sqrt(-2 ln alpha)",
            StrategyKind::Test => "Nearest neighbor with the gate exposed for unit tests",
        }
    }

    /// Builds and initializes the strategy.
    pub fn create(&self, config: &TrackManagerConfig) -> Box<dyn CorrelationStrategy> {
        match self {
            StrategyKind::NearestNeighbor => Box::new(NearestNeighbor::new(config)),
            StrategyKind::StatisticalGate => Box::new(StatisticalGate::new(config)),
            StrategyKind::Test => Box::new(TestCorrelation::new(config)),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = TrackingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nearest_neighbor" | "nearest-neighbor" | "nearestneighbor" | "nn" | "default" => {
                Ok(StrategyKind::NearestNeighbor)
            }
            "statistical_gate" | "statistical-gate" | "statistical" | "mahalanobis" => {
                Ok(StrategyKind::StatisticalGate)
            }
            "test" | "test_correlation" | "test-correlation" => Ok(StrategyKind::Test),
            _ => Err(TrackingError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Builds the strategy named in `config`.
pub fn create_strategy(
    config: &TrackManagerConfig,
) -> Result<Box<dyn CorrelationStrategy>, TrackingError> {
    let kind: StrategyKind = config.strategy.parse()?;
    Ok(kind.create(config))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::Geodetic;
    use nalgebra::Vector3;

    fn config() -> TrackManagerConfig {
        TrackManagerConfig {
            reference_point: Geodetic::new(51.0, 4.0, 0.0),
            ..Default::default()
        }
    }

    fn engine() -> FusionEngine {
        FusionEngine::from_config(&config())
    }

    fn location_report(raw: u32, enu: Vector3<f64>, error: f64) -> TrackReport {
        TrackReport::new(TrackId::new("S1", raw), 1.0)
            .with_source("S1", "eo")
            .with_location(engine().frame().to_ecef_position(&enu), error)
    }

    fn track_at(number: u32, enu: Vector3<f64>) -> LocalTrack {
        let state = engine().initialize(&location_report(99, enu, 10.0)).unwrap();
        LocalTrack::new(TrackId::new("own", number), state, 0.0)
    }

    fn tracks(list: Vec<LocalTrack>) -> BTreeMap<TrackId, LocalTrack> {
        list.into_iter().map(|t| (t.id().clone(), t)).collect()
    }

    #[test]
    fn test_insufficient_report_data() {
        let nn = NearestNeighbor::new(&config());
        let report = TrackReport::new(TrackId::new("S1", 4), 0.0).with_bearing(0.1, 0.0);
        let err = nn.correlate(0.0, &report, &BTreeMap::new()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InsufficientReportData);
    }

    #[test]
    fn test_picks_nearest_inside_gate() {
        let nn = NearestNeighbor::new(&config());
        let set = tracks(vec![
            track_at(1, Vector3::new(0.0, 0.0, 100.0)),
            track_at(2, Vector3::new(300.0, 0.0, 100.0)),
            track_at(3, Vector3::new(5_000.0, 0.0, 100.0)),
        ]);

        let report = location_report(4, Vector3::new(250.0, 0.0, 100.0), 10.0);
        assert_eq!(nn.correlate(0.0, &report, &set).unwrap(), Some(TrackId::new("own", 2)));

        let far = location_report(4, Vector3::new(2_500.0, 0.0, 100.0), 10.0);
        assert_eq!(nn.correlate(0.0, &far, &set).unwrap(), None);
    }

    #[test]
    fn test_ties_go_to_lowest_track_id() {
        let nn = NearestNeighbor::new(&config());
        let template = track_at(0, Vector3::new(100.0, 100.0, 0.0));
        let set = tracks(vec![
            LocalTrack::new(TrackId::new("own", 7), template.state().clone(), 0.0),
            LocalTrack::new(TrackId::new("own", 3), template.state().clone(), 0.0),
            LocalTrack::new(TrackId::new("alpha", 9), template.state().clone(), 0.0),
        ]);

        let report = location_report(4, Vector3::new(120.0, 100.0, 0.0), 10.0);
        assert_eq!(
            nn.correlate(0.0, &report, &set).unwrap(),
            Some(TrackId::new("alpha", 9))
        );
    }

    #[test]
    fn test_gate_boundary_is_deterministic() {
        let track = track_at(1, Vector3::new(10.0, 20.0, 30.0));
        let report = location_report(4, Vector3::new(410.0, 20.0, 30.0), 10.0);

        let measured = engine()
            .frame()
            .to_local_position(&report.location.unwrap());
        let distance = (measured - track.position()).norm();

        let mut at_boundary = config();
        at_boundary.gate.position_gate_m = distance;
        let inside = TestCorrelation::new(&at_boundary);

        let mut below = config();
        below.gate.position_gate_m = distance * (1.0 - 1e-12);
        let outside = TestCorrelation::new(&below);

        for _ in 0..100 {
            assert!(inside.test_report(&report, &track));
            assert!(!outside.test_report(&report, &track));
        }
        assert_eq!(inside.gate_distance(&report, &track).unwrap(), Some(1.0));
    }

    #[test]
    fn test_track_pair_gate() {
        let test = TestCorrelation::new(&config());
        let a = track_at(1, Vector3::new(0.0, 0.0, 0.0));
        let near = track_at(2, Vector3::new(290.0, 400.0, 0.0));
        let far = track_at(3, Vector3::new(290.0, 400.0, 1_000.0));

        // 494 m apart, inside the default 500 m gate
        assert!(test.test_correlation(&a, &near));
        assert!(test.test_correlation(&near, &a));
        assert!(!test.test_correlation(&a, &far));

        // Without vertical data only the horizontal offset counts
        let mut flat = far.clone();
        let mut state = flat.state().clone();
        state.has_vertical_data = false;
        flat.set_state(state);
        assert!(test.test_correlation(&a, &flat));
    }

    #[test]
    fn test_polar_residual_gate() {
        let cfg = config();
        let nn = NearestNeighbor::new(&cfg);
        let engine = engine();
        let target = Vector3::new(3_000.0, 4_000.0, 0.0);
        let track = track_at(1, target);
        let origin = engine.frame().to_ecef_position(&Vector3::zeros());

        let (range, bearing, elevation) = geodesy::enu_to_rbe(&target);
        let consistent = TrackReport::new(TrackId::new("R1", 1), 2.0)
            .with_source("R1", "radar")
            .with_originator_location(origin)
            .with_range(range + 20.0, 25.0)
            .with_bearing(bearing + 0.001, 0.002)
            .with_elevation(elevation, 0.002);
        assert!(nn.polar_residual(&consistent, &track).unwrap() < cfg.gate.normalized_gate);
        assert!(nn.gate_distance(&consistent, &track).unwrap().is_some());

        let wrong_bearing = consistent.clone().with_bearing(bearing + 0.3, 0.002);
        assert!(nn.gate_distance(&wrong_bearing, &track).unwrap().is_none());

        let no_origin = TrackReport::new(TrackId::new("R1", 1), 2.0).with_range(range, 25.0);
        assert!(matches!(
            nn.gate_distance(&no_origin, &track),
            Err(TrackingError::IncompatibleFrame { .. })
        ));
    }

    #[test]
    fn test_statistical_gate() {
        let mut cfg = config();
        cfg.strategy = "statistical_gate".to_string();
        cfg.gate.false_reject_probability = 0.01;
        let gate = StatisticalGate::new(&cfg);

        // Track sigma 10 m, report sigma 10 m: S = 200 I
        let track = track_at(1, Vector3::new(0.0, 0.0, 0.0));
        let near = location_report(4, Vector3::new(30.0, 0.0, 0.0), 10.0);
        let far = location_report(4, Vector3::new(60.0, 0.0, 0.0), 10.0);

        let d_near = gate.mahalanobis_distance(&near, &track).unwrap();
        approx::assert_relative_eq!(d_near, 30.0 / 200.0_f64.sqrt(), max_relative = 1e-6);
        assert!(gate.gate_distance(&near, &track).unwrap().is_some());

        // 60 / sqrt(200) = 4.24 > sqrt(-2 ln 0.01) = 3.03
        assert!(gate.gate_distance(&far, &track).unwrap().is_none());
    }

    #[test]
    fn test_record_and_decorrelate() {
        let mut nn = NearestNeighbor::new(&config());
        let report = location_report(4, Vector3::zeros(), 10.0);
        let local = TrackId::new("own", 1);

        nn.record_correlation(0.0, &report, &local);
        assert_eq!(nn.correlated_track_id(&TrackId::new("S1", 4)), Some(&local));

        assert_eq!(nn.decorrelate(&TrackId::new("S1", 4)), Some(local));
        assert_eq!(nn.decorrelate(&TrackId::new("S1", 4)), None);
        assert!(nn.correlated_track_id(&TrackId::new("S1", 4)).is_none());
    }

    #[test]
    fn test_strategy_lookup() {
        assert_eq!("nn".parse::<StrategyKind>().unwrap(), StrategyKind::NearestNeighbor);
        assert_eq!("Statistical".parse::<StrategyKind>().unwrap(), StrategyKind::StatisticalGate);
        assert_eq!("test".parse::<StrategyKind>().unwrap(), StrategyKind::Test);
        assert_eq!(
            "kalman".parse::<StrategyKind>(),
            Err(TrackingError::UnknownStrategy("kalman".to_string()))
        );

        for kind in StrategyKind::all() {
            let cfg = TrackManagerConfig {
                strategy: kind.to_string(),
                ..Default::default()
            };
            assert_eq!(create_strategy(&cfg).unwrap().name(), kind.name());
        }
    }
}
