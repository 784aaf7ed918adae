//! Scenario runner - drives a track manager with simulated sensor reports.

use crate::error::SimError;
use crate::exporter::{SimExport, SimFrame, TargetPosition, TrackPosition};
use crate::oracle::Oracle;
use crate::scenarios::ScenarioId;
use crate::sensors::{SensorKind, SensorPlatform};

use nalgebra::Vector3;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};
use trackfuse_core::{SourceKey, TrackEvent, TrackManager, TrackManagerConfig};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    pub scenario: ScenarioId,
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    pub total_ticks: u64,
    pub final_time_secs: f64,
    pub final_target_count: usize,
    pub final_track_count: usize,

    pub failure_reason: Option<String>,

    pub metrics: ScenarioMetrics,
}

impl ScenarioResult {
    /// One-line outcome for the log.
    pub fn summary(&self) -> String {
        match &self.failure_reason {
            None => format!(
                "✓ {} complete: {} reports, {} tracks, RMS error: {:.2}m",
                self.scenario.name(),
                self.metrics.reports_ingested,
                self.final_track_count,
                self.metrics.rms_error_m
            ),
            Some(reason) => format!(
                "✗ {} failed after {} reports, {} tracks: {}",
                self.scenario.name(),
                self.metrics.reports_ingested,
                self.final_track_count,
                reason
            ),
        }
    }
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    pub reports_ingested: u64,
    pub reports_rejected: u64,
    pub tracks_initiated: u64,
    pub tracks_dropped: u64,
    pub correlations: u64,
    pub decorrelations: u64,

    /// Position error over every (track, tick) pair with a known truth
    pub rms_error_m: f64,
    pub max_error_m: f64,

    /// Tracks whose nearest target is not the one they claim at the end
    pub misassociated_tracks: u64,
}

impl ScenarioMetrics {
    fn record_events(&mut self, events: &[TrackEvent]) {
        for event in events {
            match event {
                TrackEvent::Initiated { .. } => self.tracks_initiated += 1,
                TrackEvent::Correlated { .. } => self.correlations += 1,
                TrackEvent::Decorrelated { .. } => self.decorrelations += 1,
                TrackEvent::Dropped { .. } => self.tracks_dropped += 1,
                TrackEvent::ReportRejected { .. } => self.reports_rejected += 1,
                TrackEvent::Updated { .. } => {}
            }
        }
    }
}

/// Something that happens to the world at a scripted time.
#[derive(Debug, Clone, Copy)]
enum ScriptedAction {
    /// Source stops reporting and announces its raw tracks dropped
    DropSensor(usize),

    /// Target leaves coverage silently
    RemoveTarget(u64),
}

/// Sources whose rejected reports were already logged this simulated second.
#[derive(Debug, Default)]
struct RejectionLog {
    second: Option<i64>,
    sources: HashSet<SourceKey>,
}

impl RejectionLog {
    /// True the first time `source` is seen in the second containing `now`.
    fn first_this_second(&mut self, source: SourceKey, now: f64) -> bool {
        let second = now.floor() as i64;
        if self.second != Some(second) {
            self.second = Some(second);
            self.sources.clear();
        }
        self.sources.insert(source)
    }
}

/// Everything a scenario needs before the first tick.
struct ScenarioSetup {
    oracle: Oracle,
    sensors: Vec<SensorPlatform>,
    config: TrackManagerConfig,
    script: Vec<(f64, ScriptedAction)>,
    max_rms_m: f64,
    min_dropped: u64,
    min_decorrelations: u64,
}

impl ScenarioSetup {
    fn new(oracle: Oracle, sensors: Vec<SensorPlatform>, config: TrackManagerConfig) -> Self {
        Self {
            oracle,
            sensors,
            config,
            script: Vec::new(),
            max_rms_m: 100.0,
            min_dropped: 0,
            min_decorrelations: 0,
        }
    }
}

/// Runs scenarios.
pub struct ScenarioRunner {
    seed: u64,

    /// Base track manager configuration; scenarios may adjust it
    config: TrackManagerConfig,

    tick_rate_hz: u32,
    duration_secs: f64,
}

impl ScenarioRunner {
    pub fn new(seed: u64, config: TrackManagerConfig) -> Self {
        Self {
            seed,
            config,
            tick_rate_hz: 2,
            duration_secs: 10.0,
        }
    }

    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz.max(1);
        self
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = secs;
        self
    }

    /// Runs a scenario and returns the result.
    ///
    /// Only configuration errors fail the run; rejected reports are counted.
    pub fn run(&self, scenario: ScenarioId) -> Result<ScenarioResult, SimError> {
        self.execute(scenario, None)
    }

    /// Runs a scenario, recording a frame every `export_interval` ticks.
    pub fn run_with_export(
        &self,
        scenario: ScenarioId,
        export_interval: u64,
    ) -> Result<(ScenarioResult, SimExport), SimError> {
        let mut export = SimExport::new(scenario.name(), self.seed);
        let result = self.execute(scenario, Some((&mut export, export_interval.max(1))))?;
        export.finalize(result.passed, Some(result.metrics.rms_error_m));
        Ok((result, export))
    }

    // ========================================================================
    // SCENARIO SETUP
    // ========================================================================

    fn setup(&self, scenario: ScenarioId) -> ScenarioSetup {
        let physics_seed = self.seed.wrapping_mul(0x9e3779b97f4a7c15);
        let mut oracle = Oracle::new(physics_seed);
        let config = self.config.clone();
        let radar = |name: &str, index, site| SensorPlatform::new(name, index, SensorKind::Radar3d, site);

        match scenario {
            ScenarioId::SingleTarget => {
                oracle.spawn_jittered(
                    Vector3::new(4_000.0, 8_000.0, 1_500.0),
                    Vector3::new(-120.0, 40.0, 0.0),
                    200.0,
                );
                ScenarioSetup::new(oracle, vec![radar("R1", 0, Vector3::zeros())], config)
            }
            ScenarioId::CrossingTargets => {
                // Paths cross halfway through the run, 200 m apart vertically
                let speed = 1_500.0 / (0.5 * self.duration_secs.max(1.0));
                oracle.spawn_target(Vector3::new(-1_500.0, 9_000.0, 2_000.0), Vector3::new(speed, 0.0, 0.0));
                oracle.spawn_target(Vector3::new(1_500.0, 9_000.0, 2_200.0), Vector3::new(-speed, 0.0, 0.0));
                ScenarioSetup::new(oracle, vec![radar("R1", 0, Vector3::zeros())], config)
            }
            ScenarioId::MultiSensor => {
                for i in 0..3 {
                    let offset = f64::from(i) * 4_000.0;
                    oracle.spawn_jittered(
                        Vector3::new(-4_000.0 + offset, 10_000.0, 1_000.0 + offset * 0.25),
                        Vector3::new(0.0, -80.0, 0.0),
                        100.0,
                    );
                }
                // 3-D radar first so tracks start with altitude
                let sensors = vec![
                    radar("R1", 0, Vector3::zeros()),
                    SensorPlatform::new("S2", 1, SensorKind::Surveillance2d, Vector3::new(8_000.0, -2_000.0, 0.0)),
                ];
                ScenarioSetup::new(oracle, sensors, config)
            }
            ScenarioId::RelayedTracks => {
                for i in 0..3 {
                    let offset = f64::from(i) * 3_000.0;
                    oracle.spawn_jittered(
                        Vector3::new(offset, 6_000.0 + offset, 2_500.0),
                        Vector3::new(60.0, 60.0, 0.0),
                        100.0,
                    );
                }
                let sensors = vec![
                    radar("R1", 0, Vector3::zeros()),
                    SensorPlatform::new("L1", 1, SensorKind::Relay, Vector3::new(-20_000.0, 0.0, 0.0)),
                ];
                ScenarioSetup::new(oracle, sensors, config)
            }
            ScenarioId::SensorDropout => {
                for i in 0..3 {
                    let offset = f64::from(i) * 3_000.0;
                    oracle.spawn_jittered(
                        Vector3::new(-3_000.0 + offset, 7_000.0, 1_500.0),
                        Vector3::new(30.0, 0.0, 0.0),
                        100.0,
                    );
                }
                let sensors = vec![
                    radar("R1", 0, Vector3::zeros()),
                    radar("R2", 1, Vector3::new(5_000.0, 0.0, 0.0)),
                ];
                let config = TrackManagerConfig {
                    drop_uncorrelated_tracks: true,
                    purge_interval: Some(0.2 * self.duration_secs),
                    ..config
                };

                let mut setup = ScenarioSetup::new(oracle, sensors, config);
                setup.script = vec![
                    (0.3 * self.duration_secs, ScriptedAction::RemoveTarget(2)),
                    (0.5 * self.duration_secs, ScriptedAction::DropSensor(0)),
                ];
                setup.min_dropped = 1;
                setup.min_decorrelations = 2;
                setup
            }
        }
    }

    // ========================================================================
    // EXECUTION
    // ========================================================================

    fn execute(
        &self,
        scenario: ScenarioId,
        mut export: Option<(&mut SimExport, u64)>,
    ) -> Result<ScenarioResult, SimError> {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let ScenarioSetup {
            mut oracle,
            mut sensors,
            config,
            mut script,
            max_rms_m,
            min_dropped,
            min_decorrelations,
        } = self.setup(scenario);

        // Configuration errors are fatal before the first tick
        let mut manager = TrackManager::new("own", config)?;
        manager.set_platform_registry(Box::new(oracle.platform_registry()));

        let frame = manager.engine().frame().clone();
        let mut sensor_rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut metrics = ScenarioMetrics::default();

        let dt = 1.0 / f64::from(self.tick_rate_hz);
        let total_ticks = (self.duration_secs * f64::from(self.tick_rate_hz)).max(0.0) as u64;
        let mut error_sq_sum = 0.0;
        let mut error_samples = 0u64;
        let mut rejection_log = RejectionLog::default();

        for tick in 0..total_ticks {
            let now = oracle.time();

            // Scripted world changes
            script.sort_by(|a, b| a.0.total_cmp(&b.0));
            while let Some(&(at, action)) = script.first() {
                if at > now {
                    break;
                }
                script.remove(0);
                self.apply(action, now, &mut oracle, &mut sensors, &mut manager);
            }

            // Sensor sweep, in platform order
            for sensor in &sensors {
                for target in oracle.active_targets() {
                    let Some(report) = sensor.observe(&frame, now, target, &mut sensor_rng) else {
                        continue;
                    };
                    match manager.ingest(now, &report) {
                        Ok(_) => metrics.reports_ingested += 1,
                        Err(err) => {
                            if rejection_log.first_this_second(report.source_key(), now) {
                                warn!("{} report {} dropped: {}", sensor.name(), report.track_id, err);
                            }
                        }
                    }
                }
            }

            let purged = manager.purge_inactive_tracks(now);
            if !purged.is_empty() {
                info!("  t={:.1}s purged {} silent track(s)", now, purged.len());
            }

            // Error against truth, by the name each track carries
            for track in manager.tracks() {
                let truth = track
                    .status()
                    .target_name()
                    .and_then(|name| oracle.target_by_name(name));
                if let Some(truth) = truth {
                    let error = (track.position() - truth.position).norm();
                    error_sq_sum += error * error;
                    error_samples += 1;
                    metrics.max_error_m = metrics.max_error_m.max(error);
                }
            }

            let events = manager.drain_events();
            metrics.record_events(&events);

            if let Some((export, interval)) = export.as_mut() {
                if tick % *interval == 0 {
                    export.add_frame(SimFrame {
                        time_sec: now,
                        ground_truth: oracle
                            .ground_truth_positions()
                            .into_iter()
                            .map(|(id, pos)| TargetPosition::new(id, pos))
                            .collect(),
                        tracks: manager.tracks().map(TrackPosition::from).collect(),
                        events,
                    });
                }
            }

            if tick % u64::from(self.tick_rate_hz) == 0 {
                debug!(
                    "  t={:.1}s | targets={} | tracks={}",
                    now,
                    oracle.active_count(),
                    manager.track_count()
                );
            }

            oracle.step(dt);
        }

        if error_samples > 0 {
            metrics.rms_error_m = (error_sq_sum / error_samples as f64).sqrt();
        }
        metrics.misassociated_tracks = misassociated_tracks(&manager, &oracle);

        // Assertions
        let final_target_count = oracle.active_count();
        let final_track_count = manager.track_count();
        let named: BTreeSet<&str> = manager.tracks().filter_map(|t| t.status().target_name()).collect();

        let failure_reason = if final_track_count != final_target_count {
            Some(format!(
                "{} tracks for {} targets",
                final_track_count, final_target_count
            ))
        } else if named.len() != final_target_count {
            Some(format!("{} of {} targets tracked by name", named.len(), final_target_count))
        } else if metrics.reports_rejected > 0 {
            Some(format!("{} reports rejected", metrics.reports_rejected))
        } else if metrics.misassociated_tracks > 0 {
            Some(format!("{} tracks follow the wrong target", metrics.misassociated_tracks))
        } else if metrics.rms_error_m > max_rms_m {
            Some(format!("RMS error {:.2}m exceeds {:.0}m", metrics.rms_error_m, max_rms_m))
        } else if metrics.tracks_dropped < min_dropped {
            Some(format!("{} tracks dropped, expected {}", metrics.tracks_dropped, min_dropped))
        } else if metrics.decorrelations < min_decorrelations {
            Some(format!(
                "{} decorrelations, expected {}",
                metrics.decorrelations, min_decorrelations
            ))
        } else {
            None
        };

        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed: failure_reason.is_none(),
            total_ticks,
            final_time_secs: oracle.time(),
            final_target_count,
            final_track_count,
            failure_reason,
            metrics,
        };
        if result.passed {
            info!("{}", result.summary());
        } else {
            warn!("{}", result.summary());
        }
        Ok(result)
    }

    fn apply(
        &self,
        action: ScriptedAction,
        now: f64,
        oracle: &mut Oracle,
        sensors: &mut [SensorPlatform],
        manager: &mut TrackManager,
    ) {
        match action {
            ScriptedAction::RemoveTarget(id) => {
                info!("  t={:.1}s target {} leaves coverage", now, id);
                oracle.remove_target(id);
            }
            ScriptedAction::DropSensor(index) => {
                let Some(sensor) = sensors.get_mut(index) else {
                    warn!("No sensor at index {}", index);
                    return;
                };
                info!("  t={:.1}s {} goes offline", now, sensor.name());
                sensor.set_enabled(false);

                let target_ids: Vec<u64> = oracle.ground_truth_positions().into_iter().map(|(id, _)| id).collect();
                for raw_id in target_ids.into_iter().filter_map(|id| sensor.raw_track_id(id)) {
                    if let Some(dropped) = manager.drop_raw_track(now, &raw_id) {
                        info!("  {} left {} without sources", raw_id, dropped);
                    }
                }
            }
        }
    }
}

/// Tracks whose nearest active target is not the one named in their status.
fn misassociated_tracks(manager: &TrackManager, oracle: &Oracle) -> u64 {
    let mut count = 0;
    for track in manager.tracks() {
        let Some(name) = track.status().target_name() else {
            continue;
        };
        let nearest = oracle.active_targets().min_by(|a, b| {
            let da = (a.position - track.position()).norm();
            let db = (b.position - track.position()).norm();
            da.total_cmp(&db)
        });
        if nearest.is_some_and(|t| t.name != name) {
            count += 1;
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(seed: u64) -> ScenarioRunner {
        ScenarioRunner::new(seed, TrackManagerConfig::default())
    }

    #[test]
    fn test_single_target() {
        let result = runner(42).run(ScenarioId::SingleTarget).unwrap();
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.final_track_count, 1);
        assert_eq!(result.metrics.tracks_initiated, 1);
        assert_eq!(result.total_ticks, 20);
    }

    #[test]
    fn test_multi_sensor_one_track_per_target() {
        let result = runner(7).run(ScenarioId::MultiSensor).unwrap();
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.tracks_initiated, 3);
        // One correlation per raw track: 3 targets x 2 sensors
        assert_eq!(result.metrics.correlations, 6);
    }

    #[test]
    fn test_relayed_tracks_fuse_with_radar() {
        let result = runner(3).run(ScenarioId::RelayedTracks).unwrap();
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.final_track_count, 3);
    }

    #[test]
    fn test_sensor_dropout() {
        let result = runner(11).run(ScenarioId::SensorDropout).unwrap();
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.final_target_count, 2);
        assert_eq!(result.metrics.tracks_dropped, 1);
    }

    #[test]
    fn test_determinism() {
        let a = runner(99).run(ScenarioId::CrossingTargets).unwrap();
        let b = runner(99).run(ScenarioId::CrossingTargets).unwrap();
        assert_eq!(a.metrics.rms_error_m.to_bits(), b.metrics.rms_error_m.to_bits());
        assert_eq!(a.metrics.reports_ingested, b.metrics.reports_ingested);
    }

    #[test]
    fn test_unknown_strategy_fails_before_first_tick() {
        let config = TrackManagerConfig {
            strategy: "ouija".to_string(),
            ..Default::default()
        };
        let err = ScenarioRunner::new(1, config).run(ScenarioId::SingleTarget).unwrap_err();
        assert!(matches!(err, SimError::Tracking(_)));
    }

    #[test]
    fn test_export_records_frames() {
        let (result, export) = runner(5)
            .with_duration(4.0)
            .run_with_export(ScenarioId::SingleTarget, 2)
            .unwrap();
        assert_eq!(export.frames.len(), 4);
        assert_eq!(export.passed, result.passed);
        assert!(export.frames[0].tracks[0].target_name.is_some());
    }

    #[test]
    fn test_rejections_logged_once_per_source_per_second() {
        let mut log = RejectionLog::default();
        let s1 = SourceKey { originator: "S1".into(), sensor: "radar".into() };
        let s2 = SourceKey { originator: "S2".into(), sensor: "radar".into() };

        assert!(log.first_this_second(s1.clone(), 3.0));
        assert!(!log.first_this_second(s1.clone(), 3.5));
        assert!(log.first_this_second(s2, 3.5));
        assert!(log.first_this_second(s1.clone(), 4.0));
        assert_eq!(log.sources.len(), 1);
        assert!(!log.first_this_second(s1, 4.5));
    }

    #[test]
    fn test_summary_reports_failure_reason() {
        let mut result = runner(42).with_duration(2.0).run(ScenarioId::SingleTarget).unwrap();
        result.failure_reason = None;
        assert!(result.summary().starts_with("✓ single_target complete"));

        result.failure_reason = Some("2 reports rejected".to_string());
        result.passed = false;
        let summary = result.summary();
        assert!(summary.starts_with("✗ single_target failed"), "{summary}");
        assert!(summary.ends_with("2 reports rejected"));
    }
}
