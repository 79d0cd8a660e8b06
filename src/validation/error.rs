use serde::{Deserialize, Serialize};
use std::fmt;

/// Error classification for the positioning pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PositioningError {
    /// Decoded record lacked a required field; recovered at the decoder
    MalformedReading {
        source: String,
        reason: String,
    },
    /// Fewer range circles than a fix needs; a normal filter outcome
    InsufficientObservations {
        available: usize,
        required: usize,
    },
    /// Linear system is singular or otherwise unsolvable
    DegenerateGeometry {
        sniffer_count: usize,
        condition_number: f64,
        issue: GeometryIssue,
    },
    /// Input source could not be read at all; aborts the run
    SourceIoFailure {
        source: String,
        message: String,
    },
    /// Reading references a sniffer that is not configured
    UnknownSniffer {
        sniffer_id: String,
    },
    /// Result artifact could not be written
    OutputFailure {
        path: String,
        message: String,
    },
    ConfigurationError {
        parameter: String,
        reason: String,
    },
}

/// Why a sniffer layout has no unique least-squares solution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryIssue {
    Collinear,
    NonFinite,
}

impl PositioningError {
    /// Fatal errors abort the run; the others are per-record outcomes
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PositioningError::SourceIoFailure { .. }
                | PositioningError::OutputFailure { .. }
                | PositioningError::ConfigurationError { .. }
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            PositioningError::MalformedReading { .. } => "MalformedReading",
            PositioningError::InsufficientObservations { .. } => "InsufficientObservations",
            PositioningError::DegenerateGeometry { .. } => "DegenerateGeometry",
            PositioningError::SourceIoFailure { .. } => "SourceIoFailure",
            PositioningError::UnknownSniffer { .. } => "UnknownSniffer",
            PositioningError::OutputFailure { .. } => "OutputFailure",
            PositioningError::ConfigurationError { .. } => "ConfigurationError",
        }
    }
}

impl fmt::Display for GeometryIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryIssue::Collinear => write!(f, "collinear or coincident sniffers"),
            GeometryIssue::NonFinite => write!(f, "non-finite value in system"),
        }
    }
}

impl fmt::Display for PositioningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositioningError::MalformedReading { source, reason } => {
                write!(f, "Malformed reading in '{}': {}", source, reason)
            }
            PositioningError::InsufficientObservations { available, required } => {
                write!(f, "Insufficient observations: {} sniffers, {} required", available, required)
            }
            PositioningError::DegenerateGeometry { sniffer_count, condition_number, issue } => {
                write!(
                    f,
                    "Degenerate geometry ({}) with {} sniffers, condition number {:.3e}",
                    issue, sniffer_count, condition_number
                )
            }
            PositioningError::SourceIoFailure { source, message } => {
                write!(f, "Cannot read input source '{}': {}", source, message)
            }
            PositioningError::UnknownSniffer { sniffer_id } => {
                write!(f, "Reading from unconfigured sniffer '{}'", sniffer_id)
            }
            PositioningError::OutputFailure { path, message } => {
                write!(f, "Cannot write output '{}': {}", path, message)
            }
            PositioningError::ConfigurationError { parameter, reason } => {
                write!(f, "Invalid configuration '{}': {}", parameter, reason)
            }
        }
    }
}

impl std::error::Error for PositioningError {}
