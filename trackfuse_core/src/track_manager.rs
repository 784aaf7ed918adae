//! The track manager: one platform's local world model.
//!
//! Maintains the local track set by:
//! 1. Looking up cached raw -> local correlations (fast path)
//! 2. Asking the correlation strategy otherwise (cold path)
//! 3. Fusing into the chosen track, or initiating a new one
//! 4. Keeping correlation map, contributor lists and status consistent

use crate::config::TrackManagerConfig;
use crate::correlation::{create_strategy, CorrelationStrategy};
use crate::error::{ErrorKind, TrackingError};
use crate::fusion::FusionEngine;
use crate::local_track::LocalTrack;
use crate::report::TrackReport;
use crate::track_id::TrackId;
use crate::track_status::{PlatformRegistry, TrackStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

// ============================================================================
// EVENTS
// ============================================================================

/// Notifications queued for observers and drained by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrackEvent {
    Initiated {
        local_id: TrackId,
        raw_id: TrackId,
        time: f64,
    },
    Updated {
        local_id: TrackId,
        raw_id: TrackId,
        time: f64,
    },
    Correlated {
        raw_id: TrackId,
        local_id: TrackId,
        time: f64,
    },
    Decorrelated {
        raw_id: TrackId,
        local_id: TrackId,
        time: f64,
    },
    Dropped {
        local_id: TrackId,
        time: f64,
    },
    ReportRejected {
        raw_id: TrackId,
        kind: ErrorKind,
        time: f64,
    },
}

/// Result of a successful ingest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub local_id: TrackId,

    /// True when the report started a new local track
    pub initiated: bool,
}

// ============================================================================
// TRACK MANAGER
// ============================================================================

pub struct TrackManager {
    /// Owner of local track ids
    owner: String,
    next_number: u32,

    /// All local tracks, ordered by id
    tracks: BTreeMap<TrackId, LocalTrack>,

    strategy: Box<dyn CorrelationStrategy>,
    engine: FusionEngine,
    config: TrackManagerConfig,

    registry: Option<Box<dyn PlatformRegistry>>,
    events: Vec<TrackEvent>,
}

impl TrackManager {
    /// Creates a manager using the strategy named in `config`.
    ///
    /// Fails with `UnknownStrategy` for an unregistered name.
    pub fn new(owner: impl Into<String>, config: TrackManagerConfig) -> Result<Self, TrackingError> {
        let strategy = create_strategy(&config)?;
        Ok(Self::with_strategy(owner, config, strategy))
    }

    /// Creates a manager with an explicit strategy instance.
    pub fn with_strategy(
        owner: impl Into<String>,
        config: TrackManagerConfig,
        mut strategy: Box<dyn CorrelationStrategy>,
    ) -> Self {
        strategy.initialize(&config);
        Self {
            owner: owner.into(),
            next_number: 1,
            tracks: BTreeMap::new(),
            strategy,
            engine: FusionEngine::from_config(&config),
            config,
            registry: None,
            events: Vec::new(),
        }
    }

    /// Registry used to resolve truth names from platform indices.
    pub fn set_platform_registry(&mut self, registry: Box<dyn PlatformRegistry>) {
        self.registry = Some(registry);
    }

    // ========================================================================
    // INGEST
    // ========================================================================

    /// Processes one report: correlate, then fuse or initiate.
    ///
    /// Fusion errors leave every local track untouched and are returned to
    /// the caller, who owns rate limiting of user-facing warnings. Each one
    /// also queues a `ReportRejected` event. Correlation errors are recovered
    /// by taking the new-track path.
    pub fn ingest(&mut self, sim_time: f64, report: &TrackReport) -> Result<IngestOutcome, TrackingError> {
        let result = self.ingest_inner(sim_time, report);
        if let Err(err) = &result {
            debug!(
                "Rejected report {} from {}/{}: {}",
                report.track_id, report.originator, report.sensor, err
            );
            self.events.push(TrackEvent::ReportRejected {
                raw_id: report.track_id.clone(),
                kind: err.kind(),
                time: sim_time,
            });
        }
        result
    }

    fn ingest_inner(&mut self, sim_time: f64, report: &TrackReport) -> Result<IngestOutcome, TrackingError> {
        let raw_id = &report.track_id;
        let previous = self
            .strategy
            .correlated_track_id(raw_id)
            .filter(|id| self.tracks.contains_key(*id))
            .cloned();

        let target = match previous.as_ref() {
            Some(local_id) if self.cached_correlation_holds(report, local_id) => Some(local_id.clone()),
            _ => match self.strategy.correlate(sim_time, report, &self.tracks) {
                Ok(found) => found,
                Err(err) => {
                    debug!("Correlation failed for {}: {}", raw_id, err);
                    None
                }
            },
        };

        let outcome = match target {
            Some(local_id) => self.update_track(sim_time, report, local_id)?,
            None => self.initiate_track(sim_time, report)?,
        };

        // Swap: the raw track moved to a different local track
        if let Some(old) = previous.filter(|old| *old != outcome.local_id) {
            if let Some(track) = self.tracks.get_mut(&old) {
                track.decorrelate(raw_id);
            }
            info!("Raw track {} swapped from {} to {}", raw_id, old, outcome.local_id);
            self.events.push(TrackEvent::Decorrelated {
                raw_id: raw_id.clone(),
                local_id: old,
                time: sim_time,
            });
        }

        self.strategy.record_correlation(sim_time, report, &outcome.local_id);
        if let Some(track) = self.tracks.get_mut(&outcome.local_id) {
            if track.correlate(raw_id.clone()) {
                self.events.push(TrackEvent::Correlated {
                    raw_id: raw_id.clone(),
                    local_id: outcome.local_id.clone(),
                    time: sim_time,
                });
            }
            let registry = self.registry.as_deref();
            track.status_mut().update_target_name(report, registry);
        }

        Ok(outcome)
    }

    /// Fast-path check; re-gates only when configured to.
    fn cached_correlation_holds(&self, report: &TrackReport, local_id: &TrackId) -> bool {
        if !self.config.reverify_correlations || !report.has_range_or_location() {
            return true;
        }
        match self.tracks.get(local_id) {
            Some(track) => !matches!(self.strategy.gate_distance(report, track), Ok(None)),
            None => false,
        }
    }

    fn update_track(
        &mut self,
        sim_time: f64,
        report: &TrackReport,
        local_id: TrackId,
    ) -> Result<IngestOutcome, TrackingError> {
        let track = self
            .tracks
            .get_mut(&local_id)
            .ok_or_else(|| TrackingError::TrackNotFound(local_id.clone()))?;

        let next = self.engine.fuse(track.state(), report)?;
        track.set_state(next);

        self.events.push(TrackEvent::Updated {
            local_id: local_id.clone(),
            raw_id: report.track_id.clone(),
            time: sim_time,
        });

        Ok(IngestOutcome {
            local_id,
            initiated: false,
        })
    }

    fn initiate_track(&mut self, sim_time: f64, report: &TrackReport) -> Result<IngestOutcome, TrackingError> {
        let state = self.engine.initialize(report)?;

        let local_id = TrackId::new(self.owner.clone(), self.next_number);
        self.next_number = self.next_number.wrapping_add(1);

        info!("Initiated track {} from {}", local_id, report.track_id);
        self.tracks
            .insert(local_id.clone(), LocalTrack::new(local_id.clone(), state, sim_time));
        self.events.push(TrackEvent::Initiated {
            local_id: local_id.clone(),
            raw_id: report.track_id.clone(),
            time: sim_time,
        });

        Ok(IngestOutcome {
            local_id,
            initiated: true,
        })
    }

    // ========================================================================
    // DECORRELATION & LIFECYCLE
    // ========================================================================

    /// Removes the correlation for `raw_id`; the local track survives.
    pub fn decorrelate(&mut self, sim_time: f64, raw_id: &TrackId) -> Option<TrackId> {
        let local_id = self.strategy.decorrelate(raw_id)?;
        if let Some(track) = self.tracks.get_mut(&local_id) {
            track.decorrelate(raw_id);
        }
        debug!("Decorrelated {} from {}", raw_id, local_id);
        self.events.push(TrackEvent::Decorrelated {
            raw_id: raw_id.clone(),
            local_id: local_id.clone(),
            time: sim_time,
        });
        Some(local_id)
    }

    /// Handles a raw track being dropped by its source.
    ///
    /// With `drop_uncorrelated_tracks`, a local track left without
    /// contributors is dropped as well. Returns the dropped local id, if any.
    pub fn drop_raw_track(&mut self, sim_time: f64, raw_id: &TrackId) -> Option<TrackId> {
        let local_id = self.decorrelate(sim_time, raw_id)?;
        let orphaned = self
            .tracks
            .get(&local_id)
            .is_some_and(|track| track.raw_track_ids().is_empty());

        if self.config.drop_uncorrelated_tracks && orphaned {
            self.purge_track(sim_time, &local_id)?;
            return Some(local_id);
        }
        None
    }

    /// Destroys a local track and every correlation onto it.
    pub fn purge_track(&mut self, sim_time: f64, local_id: &TrackId) -> Option<LocalTrack> {
        let track = self.tracks.remove(local_id)?;
        let raw_ids = self.strategy.forget_local_track(local_id);
        info!("Dropped track {} ({} correlations removed)", local_id, raw_ids.len());
        self.events.push(TrackEvent::Dropped {
            local_id: local_id.clone(),
            time: sim_time,
        });
        Some(track)
    }

    /// Purges tracks not updated within `purge_interval`.
    pub fn purge_inactive_tracks(&mut self, sim_time: f64) -> Vec<TrackId> {
        let Some(interval) = self.config.purge_interval else {
            return Vec::new();
        };

        let stale: Vec<TrackId> = self
            .tracks
            .iter()
            .filter(|(_, track)| sim_time - track.update_time() > interval)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            self.purge_track(sim_time, id);
        }
        stale
    }

    /// Drops every track and correlation.
    pub fn clear(&mut self, sim_time: f64) {
        let ids: Vec<TrackId> = self.tracks.keys().cloned().collect();
        for id in &ids {
            self.purge_track(sim_time, id);
        }
        self.strategy.correlation_map_mut().clear();
    }

    /// Takes the queued events.
    pub fn drain_events(&mut self) -> Vec<TrackEvent> {
        std::mem::take(&mut self.events)
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn config(&self) -> &TrackManagerConfig {
        &self.config
    }

    pub fn engine(&self) -> &FusionEngine {
        &self.engine
    }

    pub fn strategy(&self) -> &dyn CorrelationStrategy {
        self.strategy.as_ref()
    }

    /// Local tracks in id order.
    pub fn tracks(&self) -> impl Iterator<Item = &LocalTrack> {
        self.tracks.values()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn find_track(&self, id: &TrackId) -> Option<&LocalTrack> {
        self.tracks.get(id)
    }

    pub fn status(&self, id: &TrackId) -> Option<&TrackStatus> {
        self.tracks.get(id).map(LocalTrack::status)
    }

    pub fn status_mut(&mut self, id: &TrackId) -> Option<&mut TrackStatus> {
        self.tracks.get_mut(id).map(LocalTrack::status_mut)
    }

    /// Local track `raw_id` is currently correlated with.
    pub fn correlated_track(&self, raw_id: &TrackId) -> Option<&TrackId> {
        self.strategy.correlated_track_id(raw_id)
    }
}

impl std::fmt::Debug for TrackManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackManager")
            .field("owner", &self.owner)
            .field("tracks", &self.tracks.len())
            .field("strategy", &self.strategy.name())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::Geodetic;
    use nalgebra::Vector3;
    use std::collections::HashMap;

    fn config() -> TrackManagerConfig {
        TrackManagerConfig {
            reference_point: Geodetic::new(-33.9, 151.2, 0.0),
            ..Default::default()
        }
    }

    fn report_at(manager: &TrackManager, raw: TrackId, enu: Vector3<f64>, time: f64) -> TrackReport {
        TrackReport::new(raw, time)
            .with_source("S1", "eo")
            .with_location(manager.engine().frame().to_ecef_position(&enu), 15.0)
    }

    #[test]
    fn test_unknown_strategy_is_fatal() {
        let cfg = TrackManagerConfig {
            strategy: "ouija".to_string(),
            ..config()
        };
        let err = TrackManager::new("own", cfg).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownStrategy);
    }

    #[test]
    fn test_two_sources_fuse_into_one_track() {
        let mut manager = TrackManager::new("own", config()).unwrap();
        let a = report_at(&manager, TrackId::new("S1", 1), Vector3::new(100.0, 100.0, 50.0), 1.0);
        let b = report_at(&manager, TrackId::new("S2", 8), Vector3::new(120.0, 90.0, 50.0), 1.5)
            .with_source("S2", "radar");

        let first = manager.ingest(1.0, &a).unwrap();
        let second = manager.ingest(1.5, &b).unwrap();

        assert!(first.initiated);
        assert!(!second.initiated);
        assert_eq!(first.local_id, second.local_id);
        assert_eq!(manager.track_count(), 1);

        let track = manager.find_track(&first.local_id).unwrap();
        assert_eq!(track.raw_track_ids().len(), 2);
    }

    #[test]
    fn test_fast_path_skips_gating() {
        let mut manager = TrackManager::new("own", config()).unwrap();
        let raw = TrackId::new("S1", 1);
        let first = manager
            .ingest(1.0, &report_at(&manager, raw.clone(), Vector3::zeros(), 1.0))
            .unwrap();

        // Far outside the gate, but the raw id is already correlated
        let jump = report_at(&manager, raw, Vector3::new(5_000.0, 0.0, 0.0), 2.0);
        let second = manager.ingest(2.0, &jump).unwrap();
        assert_eq!(second.local_id, first.local_id);
        assert_eq!(manager.track_count(), 1);
    }

    #[test]
    fn test_reverify_swaps_correlation() {
        let cfg = TrackManagerConfig {
            reverify_correlations: true,
            ..config()
        };
        let mut manager = TrackManager::new("own", cfg).unwrap();
        let far = Vector3::new(5_000.0, 0.0, 0.0);

        let a = manager
            .ingest(1.0, &report_at(&manager, TrackId::new("S1", 1), Vector3::zeros(), 1.0))
            .unwrap();
        let b = manager
            .ingest(1.0, &report_at(&manager, TrackId::new("S1", 2), far, 1.0).with_source("S1", "ir"))
            .unwrap();
        assert_ne!(a.local_id, b.local_id);
        manager.drain_events();

        // Raw 1 now reports at track b's position
        let moved = report_at(&manager, TrackId::new("S1", 1), far, 2.0);
        let outcome = manager.ingest(2.0, &moved).unwrap();

        assert_eq!(outcome.local_id, b.local_id);
        assert_eq!(manager.correlated_track(&TrackId::new("S1", 1)), Some(&b.local_id));
        assert!(manager.find_track(&a.local_id).unwrap().raw_track_ids().is_empty());

        let events = manager.drain_events();
        assert!(events.contains(&TrackEvent::Decorrelated {
            raw_id: TrackId::new("S1", 1),
            local_id: a.local_id.clone(),
            time: 2.0,
        }));
    }

    #[test]
    fn test_fusion_error_leaves_track_unchanged() {
        let mut manager = TrackManager::new("own", config()).unwrap();
        let raw = TrackId::new("S1", 1);
        let outcome = manager
            .ingest(10.0, &report_at(&manager, raw.clone(), Vector3::zeros(), 10.0))
            .unwrap();
        let before = manager.find_track(&outcome.local_id).unwrap().clone();

        let stale = report_at(&manager, raw.clone(), Vector3::new(50.0, 0.0, 0.0), 9.0);
        let err = manager.ingest(10.5, &stale).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfOrderReport);
        assert_eq!(manager.find_track(&outcome.local_id).unwrap(), &before);

        let events = manager.drain_events();
        assert_eq!(
            events.last(),
            Some(&TrackEvent::ReportRejected {
                raw_id: raw,
                kind: ErrorKind::OutOfOrderReport,
                time: 10.5,
            })
        );
    }

    #[test]
    fn test_bearing_only_cannot_start_track() {
        let mut manager = TrackManager::new("own", config()).unwrap();
        let report = TrackReport::new(TrackId::new("E1", 1), 0.0)
            .with_source("E1", "esm")
            .with_originator_location(manager.engine().frame().to_ecef_position(&Vector3::zeros()))
            .with_bearing(0.3, 0.01);

        let err = manager.ingest(0.0, &report).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnderdeterminedMeasurement);
        assert_eq!(manager.track_count(), 0);
    }

    #[test]
    fn test_drop_raw_track_drops_orphaned_local() {
        let cfg = TrackManagerConfig {
            drop_uncorrelated_tracks: true,
            ..config()
        };
        let mut manager = TrackManager::new("own", cfg).unwrap();
        let a = report_at(&manager, TrackId::new("S1", 1), Vector3::zeros(), 1.0);
        let b = report_at(&manager, TrackId::new("S2", 1), Vector3::new(10.0, 0.0, 0.0), 2.0)
            .with_source("S2", "radar");
        let local = manager.ingest(1.0, &a).unwrap().local_id;
        manager.ingest(2.0, &b).unwrap();

        // One contributor left: track survives
        assert_eq!(manager.drop_raw_track(3.0, &TrackId::new("S1", 1)), None);
        assert!(manager.find_track(&local).is_some());

        // Last contributor gone: track dropped, map clean
        assert_eq!(manager.drop_raw_track(4.0, &TrackId::new("S2", 1)), Some(local.clone()));
        assert!(manager.find_track(&local).is_none());
        assert!(manager.strategy().correlation_map().is_empty());

        // Unknown raw ids are a no-op
        assert_eq!(manager.drop_raw_track(5.0, &TrackId::new("S9", 9)), None);
    }

    #[test]
    fn test_drop_raw_track_keeps_orphan_by_default() {
        let mut manager = TrackManager::new("own", config()).unwrap();
        let raw = TrackId::new("S1", 1);
        let local = manager
            .ingest(1.0, &report_at(&manager, raw.clone(), Vector3::zeros(), 1.0))
            .unwrap()
            .local_id;

        assert_eq!(manager.drop_raw_track(2.0, &raw), None);
        assert!(manager.find_track(&local).is_some());
        assert!(manager.correlated_track(&raw).is_none());
    }

    #[test]
    fn test_purge_inactive_tracks() {
        let cfg = TrackManagerConfig {
            purge_interval: Some(5.0),
            ..config()
        };
        let mut manager = TrackManager::new("own", cfg).unwrap();
        let old = manager
            .ingest(1.0, &report_at(&manager, TrackId::new("S1", 1), Vector3::zeros(), 1.0))
            .unwrap()
            .local_id;
        let fresh = manager
            .ingest(
                5.0,
                &report_at(&manager, TrackId::new("S1", 2), Vector3::new(9_000.0, 0.0, 0.0), 5.0),
            )
            .unwrap()
            .local_id;

        assert_eq!(manager.purge_inactive_tracks(7.0), vec![old.clone()]);
        assert!(manager.find_track(&old).is_none());
        assert!(manager.find_track(&fresh).is_some());
        assert!(manager.correlated_track(&TrackId::new("S1", 1)).is_none());
    }

    #[test]
    fn test_target_name_from_registry() {
        let mut manager = TrackManager::new("own", config()).unwrap();
        let mut registry = HashMap::new();
        registry.insert(3usize, "red-3".to_string());
        manager.set_platform_registry(Box::new(registry));

        let report = report_at(&manager, TrackId::new("S1", 1), Vector3::zeros(), 1.0).with_target_index(3);
        let local = manager.ingest(1.0, &report).unwrap().local_id;
        assert_eq!(manager.status(&local).unwrap().target_name(), Some("red-3"));
    }

    #[test]
    fn test_tracks_iterate_in_id_order() {
        let mut manager = TrackManager::new("own", config()).unwrap();
        for i in 0..12u32 {
            let enu = Vector3::new(f64::from(i) * 10_000.0, 0.0, 0.0);
            manager
                .ingest(1.0, &report_at(&manager, TrackId::new("S1", i), enu, 1.0))
                .unwrap();
        }
        let ids: Vec<u32> = manager.tracks().map(|t| t.id().number()).collect();
        assert_eq!(ids, (1..=12).collect::<Vec<_>>());
    }

    #[test]
    fn test_clear() {
        let mut manager = TrackManager::new("own", config()).unwrap();
        manager
            .ingest(1.0, &report_at(&manager, TrackId::new("S1", 1), Vector3::zeros(), 1.0))
            .unwrap();
        manager.clear(2.0);
        assert_eq!(manager.track_count(), 0);
        assert!(manager.strategy().correlation_map().is_empty());
    }
}
