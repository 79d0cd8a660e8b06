//! Run accounting: what was decoded, skipped, solved and discarded

use crate::processing::decoder::DecodedBatch;
use crate::validation::error::PositioningError;
use crate::validation::filter::FilterOutcome;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decode statistics for one input source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub sniffer_id: String,
    pub source: String,
    pub decoder: String,
    pub readings: usize,
    pub malformed: usize,
    /// Rejection reasons of the first malformed records
    pub malformed_samples: Vec<String>,
}

impl SourceSummary {
    pub fn from_batch(sniffer_id: &str, source: &str, decoder: &str, batch: &DecodedBatch) -> Self {
        Self {
            sniffer_id: sniffer_id.to_string(),
            source: source.to_string(),
            decoder: decoder.to_string(),
            readings: batch.readings.len(),
            malformed: batch.malformed,
            malformed_samples: batch
                .malformed_samples
                .iter()
                .map(|e| match e {
                    PositioningError::MalformedReading { reason, .. } => reason.clone(),
                    other => other.to_string(),
                })
                .collect(),
        }
    }
}

/// Per-outcome counts for one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub sources: Vec<SourceSummary>,
    /// Readings dropped because their sniffer is not configured
    pub unknown_sniffer_readings: usize,
    pub observation_sets: usize,
    pub accepted: usize,
    pub clamped: usize,
    pub insufficient: usize,
    pub degenerate: usize,
    pub implausible: usize,
    pub failed: usize,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: &FilterOutcome) {
        self.observation_sets += 1;
        match outcome {
            FilterOutcome::Accepted { clamped, .. } => {
                self.accepted += 1;
                if *clamped {
                    self.clamped += 1;
                }
            }
            FilterOutcome::InsufficientObservations { .. } => self.insufficient += 1,
            FilterOutcome::DegenerateGeometry { .. } => self.degenerate += 1,
            FilterOutcome::Implausible { .. } => self.implausible += 1,
            FilterOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn total_readings(&self) -> usize {
        self.sources.iter().map(|s| s.readings).sum()
    }

    pub fn total_malformed(&self) -> usize {
        self.sources.iter().map(|s| s.malformed).sum()
    }

    pub fn discarded(&self) -> usize {
        self.observation_sets - self.accepted
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for source in &self.sources {
            writeln!(
                f,
                "sniffer {} ({}): {} readings, {} malformed",
                source.sniffer_id, source.source, source.readings, source.malformed
            )?;
        }
        write!(
            f,
            "{} observation sets: {} accepted ({} clamped), {} insufficient, {} degenerate, {} implausible, {} failed",
            self.observation_sets,
            self.accepted,
            self.clamped,
            self.insufficient,
            self.degenerate,
            self.implausible,
            self.failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Point2, ValidatedPosition};
    use crate::validation::error::GeometryIssue;

    #[test]
    fn test_record_outcomes() {
        let mut report = RunReport::new();
        report.record(&FilterOutcome::Accepted {
            position: ValidatedPosition { x: 1.0, y: 0.0 },
            clamped: true,
        });
        report.record(&FilterOutcome::InsufficientObservations { distinct_sniffers: 2 });
        report.record(&FilterOutcome::DegenerateGeometry {
            issue: GeometryIssue::Collinear,
            condition_number: f64::INFINITY,
        });
        report.record(&FilterOutcome::Implausible {
            estimate: Point2::new(-1.0, -1.0),
        });

        assert_eq!(report.observation_sets, 4);
        assert_eq!(report.accepted, 1);
        assert_eq!(report.clamped, 1);
        assert_eq!(report.discarded(), 3);
        assert!(report.to_string().contains("4 observation sets"));
    }

    #[test]
    fn test_source_totals() {
        let mut batch = DecodedBatch::for_source("s.json");
        batch.reject("missing rssi");
        let mut report = RunReport::new();
        report.sources.push(SourceSummary::from_batch("s1", "s1.json", "normalized", &batch));
        report.sources.push(SourceSummary::from_batch("s2", "s2.json", "normalized", &batch));
        assert_eq!(report.total_readings(), 0);
        assert_eq!(report.total_malformed(), 2);
        assert_eq!(report.sources[0].malformed_samples, vec!["missing rssi".to_string()]);
    }
}
