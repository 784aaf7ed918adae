//! Correlation and fusion scenarios.

use crate::error::SimError;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// TF-001: one radar, one target
    SingleTarget,

    /// TF-002: two targets flying through each other
    CrossingTargets,

    /// TF-003: 3-D radar and 2-D surveillance radar on the same targets
    MultiSensor,

    /// TF-004: radar plus processed tracks from a relay
    RelayedTracks,

    /// TF-005: sources and targets disappearing mid-run
    SensorDropout,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::SingleTarget,
            ScenarioId::CrossingTargets,
            ScenarioId::MultiSensor,
            ScenarioId::RelayedTracks,
            ScenarioId::SensorDropout,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::SingleTarget => "single_target",
            ScenarioId::CrossingTargets => "crossing_targets",
            ScenarioId::MultiSensor => "multi_sensor",
            ScenarioId::RelayedTracks => "relayed_tracks",
            ScenarioId::SensorDropout => "sensor_dropout",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::SingleTarget => "One 3-D radar, one target: one track, bounded error",
            ScenarioId::CrossingTargets => "Two targets crossing: correlations never swap",
            ScenarioId::MultiSensor => "3-D and 2-D radars on three targets: one track per target",
            ScenarioId::RelayedTracks => "Radar detections plus relayed processed tracks",
            ScenarioId::SensorDropout => "Dropped sources decorrelate, silent tracks are purged",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single_target" | "singletarget" | "tf-001" => Ok(ScenarioId::SingleTarget),
            "crossing_targets" | "crossingtargets" | "tf-002" => Ok(ScenarioId::CrossingTargets),
            "multi_sensor" | "multisensor" | "tf-003" => Ok(ScenarioId::MultiSensor),
            "relayed_tracks" | "relayedtracks" | "relay" | "tf-004" => Ok(ScenarioId::RelayedTracks),
            "sensor_dropout" | "sensordropout" | "dropout" | "tf-005" => Ok(ScenarioId::SensorDropout),
            _ => Err(SimError::UnknownScenario(s.to_string())),
        }
    }
}
