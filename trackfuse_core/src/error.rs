//! Error types for correlation and fusion.

use crate::track_id::{TrackId, TrackIdParseError};
use serde::{Deserialize, Serialize};

/// Errors that can occur while correlating or fusing track reports.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackingError {
    #[error("report {raw_id} carries neither range nor location")]
    InsufficientReportData { raw_id: TrackId },

    #[error("report {raw_id} does not determine a position: {detail}")]
    UnderdeterminedMeasurement {
        raw_id: TrackId,
        detail: &'static str,
    },

    #[error("report {raw_id} needs an originator location for frame conversion")]
    IncompatibleFrame { raw_id: TrackId },

    #[error("processed track {raw_id} carries no state covariance")]
    MissingCovarianceSource { raw_id: TrackId },

    #[error("report {raw_id} at t={report_time} is older than its track (t={track_time})")]
    OutOfOrderReport {
        raw_id: TrackId,
        report_time: f64,
        track_time: f64,
    },

    #[error(transparent)]
    Parse(#[from] TrackIdParseError),

    #[error("unknown correlation strategy: {0}")]
    UnknownStrategy(String),

    #[error("Track not found: {0}")]
    TrackNotFound(TrackId),

    #[error("Covariance matrix is singular")]
    SingularCovariance,
}

impl TrackingError {
    /// Discriminant used by callers that rate-limit or count failures.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TrackingError::InsufficientReportData { .. } => ErrorKind::InsufficientReportData,
            TrackingError::UnderdeterminedMeasurement { .. } => {
                ErrorKind::UnderdeterminedMeasurement
            }
            TrackingError::IncompatibleFrame { .. } => ErrorKind::IncompatibleFrame,
            TrackingError::MissingCovarianceSource { .. } => ErrorKind::MissingCovarianceSource,
            TrackingError::OutOfOrderReport { .. } => ErrorKind::OutOfOrderReport,
            TrackingError::Parse(_) => ErrorKind::ParseError,
            TrackingError::UnknownStrategy(_) => ErrorKind::UnknownStrategy,
            TrackingError::TrackNotFound(_) => ErrorKind::TrackNotFound,
            TrackingError::SingularCovariance => ErrorKind::SingularCovariance,
        }
    }

    /// The raw track the failing report came from, if the error concerns one.
    pub fn raw_id(&self) -> Option<&TrackId> {
        match self {
            TrackingError::InsufficientReportData { raw_id }
            | TrackingError::UnderdeterminedMeasurement { raw_id, .. }
            | TrackingError::IncompatibleFrame { raw_id }
            | TrackingError::MissingCovarianceSource { raw_id }
            | TrackingError::OutOfOrderReport { raw_id, .. } => Some(raw_id),
            _ => None,
        }
    }
}

/// Copyable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InsufficientReportData,
    UnderdeterminedMeasurement,
    IncompatibleFrame,
    MissingCovarianceSource,
    OutOfOrderReport,
    ParseError,
    UnknownStrategy,
    TrackNotFound,
    SingularCovariance,
}
