//! The canonical per-target record owned by a track manager.

use crate::fusion::LocalTrackState;
use crate::track_id::TrackId;
use crate::track_status::TrackStatus;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One platform's fused estimate of one real-world target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalTrack {
    id: TrackId,
    state: LocalTrackState,
    status: TrackStatus,

    /// Raw tracks currently correlated with this one
    raw_track_ids: BTreeSet<TrackId>,

    creation_time: f64,
}

impl LocalTrack {
    pub fn new(id: TrackId, state: LocalTrackState, creation_time: f64) -> Self {
        Self {
            id,
            state,
            status: TrackStatus::new(),
            raw_track_ids: BTreeSet::new(),
            creation_time,
        }
    }

    pub fn id(&self) -> &TrackId {
        &self.id
    }

    pub fn state(&self) -> &LocalTrackState {
        &self.state
    }

    pub(crate) fn set_state(&mut self, state: LocalTrackState) {
        self.state = state;
    }

    pub fn status(&self) -> &TrackStatus {
        &self.status
    }

    pub fn status_mut(&mut self) -> &mut TrackStatus {
        &mut self.status
    }

    pub fn creation_time(&self) -> f64 {
        self.creation_time
    }

    pub fn update_time(&self) -> f64 {
        self.state.update_time
    }

    /// Position in the reference ENU frame.
    pub fn position(&self) -> Vector3<f64> {
        self.state.position
    }

    /// Reported velocity, or a finite difference against the previous state.
    ///
    /// A vertical-only velocity keeps its vertical rate over the difference.
    pub fn velocity_estimate(&self) -> Option<Vector3<f64>> {
        if self.state.has_horizontal_velocity() {
            return self.state.velocity;
        }
        let prior = self.state.previous.as_ref()?;
        let dt = self.state.update_time - prior.update_time;
        if dt <= 0.0 {
            return None;
        }
        let mut estimate = (self.state.position - prior.position) / dt;
        if let Some(velocity) = self.state.velocity {
            estimate.z = velocity.z;
        }
        Some(estimate)
    }

    pub fn raw_track_ids(&self) -> &BTreeSet<TrackId> {
        &self.raw_track_ids
    }

    pub fn is_correlated_with(&self, raw_id: &TrackId) -> bool {
        self.raw_track_ids.contains(raw_id)
    }

    /// Adds a contributor; returns false if it was already present.
    pub(crate) fn correlate(&mut self, raw_id: TrackId) -> bool {
        self.raw_track_ids.insert(raw_id)
    }

    /// Removes a contributor; returns false if it was absent.
    pub(crate) fn decorrelate(&mut self, raw_id: &TrackId) -> bool {
        self.raw_track_ids.remove(raw_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::PriorState;
    use approx::assert_relative_eq;
    use nalgebra::Matrix6;

    fn state(position: Vector3<f64>, time: f64) -> LocalTrackState {
        LocalTrackState {
            position,
            velocity: None,
            information: Matrix6::identity(),
            has_vertical_data: true,
            update_time: time,
            range_rate: None,
            previous: None,
            last_report: None,
            consecutive_single_source_hits: 0,
        }
    }

    #[test]
    fn test_velocity_by_finite_difference() {
        let mut current = state(Vector3::new(110.0, 40.0, 0.0), 12.0);
        current.previous = Some(PriorState {
            position: Vector3::new(100.0, 60.0, 0.0),
            velocity: None,
            information: Matrix6::identity(),
            update_time: 10.0,
        });
        let track = LocalTrack::new(TrackId::new("own", 1), current, 10.0);

        assert_relative_eq!(
            track.velocity_estimate().unwrap(),
            Vector3::new(5.0, -10.0, 0.0)
        );
    }

    #[test]
    fn test_vertical_rate_kept_over_finite_difference() {
        let mut current = state(Vector3::new(110.0, 40.0, 0.0), 12.0);
        current.velocity = Some(Vector3::new(0.0, 0.0, -3.0));
        current.information[(3, 3)] = 0.0;
        current.information[(4, 4)] = 0.0;
        current.previous = Some(PriorState {
            position: Vector3::new(100.0, 60.0, 0.0),
            velocity: None,
            information: Matrix6::identity(),
            update_time: 10.0,
        });
        let track = LocalTrack::new(TrackId::new("own", 1), current, 10.0);

        assert_relative_eq!(
            track.velocity_estimate().unwrap(),
            Vector3::new(5.0, -10.0, -3.0)
        );
    }

    #[test]
    fn test_no_velocity_without_history() {
        let track = LocalTrack::new(TrackId::new("own", 1), state(Vector3::zeros(), 1.0), 1.0);
        assert!(track.velocity_estimate().is_none());
    }

    #[test]
    fn test_contributors() {
        let mut track = LocalTrack::new(TrackId::new("own", 1), state(Vector3::zeros(), 0.0), 0.0);
        assert!(track.correlate(TrackId::new("S1", 4)));
        assert!(!track.correlate(TrackId::new("S1", 4)));
        assert!(track.is_correlated_with(&TrackId::new("S1", 4)));
        assert!(track.decorrelate(&TrackId::new("S1", 4)));
        assert!(track.raw_track_ids().is_empty());
    }
}
