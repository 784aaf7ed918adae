//! Lifecycle bookkeeping attached to each local track.
//!
//! The state machine itself belongs to an external decision process; this
//! only records where it is and when it last moved.

use crate::report::TrackReport;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Resolves truth platform names from a platform index.
pub trait PlatformRegistry {
    fn platform_name(&self, index: usize) -> Option<&str>;
}

impl PlatformRegistry for HashMap<usize, String> {
    fn platform_name(&self, index: usize) -> Option<&str> {
        self.get(&index).map(String::as_str)
    }
}

impl PlatformRegistry for BTreeMap<usize, String> {
    fn platform_name(&self, index: usize) -> Option<&str> {
        self.get(&index).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackStatus {
    state_index: i32,
    state_name: Option<String>,
    target_name: Option<String>,
    last_state_change_time: f64,
    transition_pending: bool,
    evaluation_epoch: u32,
}

impl Default for TrackStatus {
    fn default() -> Self {
        Self {
            state_index: 0,
            state_name: None,
            target_name: None,
            last_state_change_time: 0.0,
            transition_pending: false,
            evaluation_epoch: 1,
        }
    }
}

impl TrackStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_index(&self) -> i32 {
        self.state_index
    }

    pub fn state_name(&self) -> Option<&str> {
        self.state_name.as_deref()
    }

    pub fn target_name(&self) -> Option<&str> {
        self.target_name.as_deref()
    }

    pub fn last_state_change_time(&self) -> f64 {
        self.last_state_change_time
    }

    pub fn transition_pending(&self) -> bool {
        self.transition_pending
    }

    pub fn evaluation_epoch(&self) -> u32 {
        self.evaluation_epoch
    }

    /// Records the current decision state.
    ///
    /// Re-entering the current index is not a transition and leaves the
    /// change time alone.
    pub fn set_state(&mut self, sim_time: f64, index: i32, name: impl Into<String>) {
        if index != self.state_index {
            self.last_state_change_time = sim_time;
        }
        self.state_index = index;
        self.state_name = Some(name.into());
    }

    /// Exit from the prior state done, entry into the current one not yet.
    pub fn set_transition_pending(&mut self, pending: bool) {
        self.transition_pending = pending;
    }

    /// Bumps the epoch and returns the new value.
    pub fn advance_evaluation_epoch(&mut self) -> u32 {
        self.evaluation_epoch = self.evaluation_epoch.wrapping_add(1);
        self.evaluation_epoch
    }

    /// False for an evaluation scheduled under an older epoch.
    pub fn is_current_epoch(&self, epoch: u32) -> bool {
        epoch == self.evaluation_epoch
    }

    /// Refreshes the truth name from the report, or from the registry when
    /// the report only carries a platform index. Returns true on change.
    pub fn update_target_name(
        &mut self,
        report: &TrackReport,
        registry: Option<&dyn PlatformRegistry>,
    ) -> bool {
        let resolved = match (&report.target_name, report.target_index, registry) {
            (Some(name), _, _) => Some(name.as_str()),
            (None, Some(index), Some(registry)) => registry.platform_name(index),
            _ => None,
        };

        match resolved {
            Some(name) if self.target_name.as_deref() != Some(name) => {
                self.target_name = Some(name.to_string());
                true
            }
            _ => false,
        }
    }
}
