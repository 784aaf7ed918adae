//! JSON exporter for offline inspection of a run.

use crate::error::SimError;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use trackfuse_core::{LocalTrack, TrackEvent};

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    pub time_sec: f64,

    pub ground_truth: Vec<TargetPosition>,

    pub tracks: Vec<TrackPosition>,

    /// Track manager events raised since the previous frame
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub events: Vec<TrackEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetPosition {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl TargetPosition {
    pub fn new(id: u64, pos: Vector3<f64>) -> Self {
        Self {
            id,
            x: pos.x,
            y: pos.y,
            z: pos.z,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackPosition {
    pub track_id: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target_name: Option<String>,

    pub contributors: Vec<String>,
}

impl From<&LocalTrack> for TrackPosition {
    fn from(track: &LocalTrack) -> Self {
        let pos = track.position();
        Self {
            track_id: track.id().to_string(),
            x: pos.x,
            y: pos.y,
            z: pos.z,
            target_name: track.status().target_name().map(str::to_string),
            contributors: track.raw_track_ids().iter().map(ToString::to_string).collect(),
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    pub scenario: String,
    pub seed: u64,
    pub duration_sec: f64,
    pub frames: Vec<SimFrame>,
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub final_rms_error: Option<f64>,
}

impl SimExport {
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            final_rms_error: None,
        }
    }

    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    pub fn finalize(&mut self, passed: bool, rms_error: Option<f64>) {
        self.passed = passed;
        self.final_rms_error = rms_error;
    }

    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}
