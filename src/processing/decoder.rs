//! Input boundary: decoders turning capture sources into normalized readings

use crate::core::Reading;
use crate::validation::error::PositioningError;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// How many malformed-record reasons a batch keeps for diagnostics
const MAX_MALFORMED_SAMPLES: usize = 8;

/// One capture source and the sniffer that recorded it
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSpec {
    pub sniffer_id: String,
    pub path: PathBuf,
}

impl SourceSpec {
    pub fn new(sniffer_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            sniffer_id: sniffer_id.into(),
            path: path.into(),
        }
    }

    pub fn display_name(&self) -> String {
        self.path.display().to_string()
    }
}

/// Readings decoded from one source plus the records that had to be skipped
#[derive(Debug, Clone, Default)]
pub struct DecodedBatch {
    /// Display name of the decoded source
    pub source: String,
    pub readings: Vec<Reading>,
    pub malformed: usize,
    /// First few rejections, each a `PositioningError::MalformedReading`
    pub malformed_samples: Vec<PositioningError>,
}

impl DecodedBatch {
    pub fn for_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    pub fn push(&mut self, reading: Reading) {
        self.readings.push(reading);
    }

    /// Count a skipped record, keeping the first few reasons
    pub fn reject(&mut self, reason: impl Into<String>) {
        self.malformed += 1;
        if self.malformed_samples.len() < MAX_MALFORMED_SAMPLES {
            self.malformed_samples.push(PositioningError::MalformedReading {
                source: self.source.clone(),
                reason: reason.into(),
            });
        }
    }
}

/// Errors that make a whole source unusable
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Source file could not be read
    Io { source: String, message: String },
    /// Source content is not in the expected container format
    InvalidFormat { source: String, details: String },
    /// External decoder process failed or could not be started
    ProcessFailed { source: String, details: String },
    /// External decoder process exceeded its time budget
    Timeout { source: String, timeout_ms: u64 },
}

impl DecodeError {
    pub fn source_name(&self) -> &str {
        match self {
            DecodeError::Io { source, .. }
            | DecodeError::InvalidFormat { source, .. }
            | DecodeError::ProcessFailed { source, .. }
            | DecodeError::Timeout { source, .. } => source,
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Io { source, message } => write!(f, "I/O error reading '{}': {}", source, message),
            DecodeError::InvalidFormat { source, details } => {
                write!(f, "Invalid format in '{}': {}", source, details)
            }
            DecodeError::ProcessFailed { source, details } => {
                write!(f, "Decoder process failed for '{}': {}", source, details)
            }
            DecodeError::Timeout { source, timeout_ms } => {
                write!(f, "Decoder for '{}' timed out after {} ms", source, timeout_ms)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<DecodeError> for PositioningError {
    fn from(err: DecodeError) -> Self {
        PositioningError::SourceIoFailure {
            source: err.source_name().to_string(),
            message: err.to_string(),
        }
    }
}

/// Technology-specific adapter producing readings for one sniffer source
pub trait ReadingDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decode a complete source; malformed records are counted, not fatal
    fn decode(&self, source: &SourceSpec) -> Result<DecodedBatch, DecodeError>;
}

pub(crate) fn read_source(source: &SourceSpec) -> Result<String, DecodeError> {
    fs::read_to_string(&source.path).map_err(|e| DecodeError::Io {
        source: source.display_name(),
        message: e.to_string(),
    })
}

/// Normalized record as it appears on disk; every field is checked explicitly
#[derive(Debug, Deserialize)]
struct RawReading {
    transmitter_id: Option<String>,
    token: Option<i64>,
    sniffer_id: Option<String>,
    signal_strength: Option<i32>,
}

/// Decoder for files holding a JSON array of normalized readings
///
/// A record without `sniffer_id` is attributed to the source's sniffer.
#[derive(Debug, Clone, Default)]
pub struct NormalizedJsonDecoder;

impl NormalizedJsonDecoder {
    pub fn new() -> Self {
        Self
    }

    pub fn decode_str(&self, content: &str, source: &SourceSpec) -> Result<DecodedBatch, DecodeError> {
        let records: Vec<serde_json::Value> = serde_json::from_str(content).map_err(|e| DecodeError::InvalidFormat {
            source: source.display_name(),
            details: format!("expected a JSON array of readings: {}", e),
        })?;

        let mut batch = DecodedBatch::for_source(source.display_name());
        for (index, value) in records.into_iter().enumerate() {
            let raw: RawReading = match serde_json::from_value(value) {
                Ok(raw) => raw,
                Err(e) => {
                    batch.reject(format!("record {}: {}", index, e));
                    continue;
                }
            };

            let RawReading {
                transmitter_id: Some(transmitter_id),
                token: Some(token),
                sniffer_id,
                signal_strength: Some(signal_strength),
            } = raw
            else {
                batch.reject(format!("record {}: missing required field", index));
                continue;
            };

            if transmitter_id.is_empty() {
                batch.reject(format!("record {}: empty transmitter_id", index));
                continue;
            }

            let sniffer_id = sniffer_id.unwrap_or_else(|| source.sniffer_id.clone());
            batch.push(Reading::new(transmitter_id, token, sniffer_id, signal_strength));
        }

        debug!(
            source = %source.display_name(),
            readings = batch.readings.len(),
            malformed = batch.malformed,
            "decoded normalized readings"
        );
        Ok(batch)
    }
}

impl ReadingDecoder for NormalizedJsonDecoder {
    fn name(&self) -> &'static str {
        "normalized"
    }

    fn decode(&self, source: &SourceSpec) -> Result<DecodedBatch, DecodeError> {
        let content = read_source(source)?;
        self.decode_str(&content, source)
    }
}
