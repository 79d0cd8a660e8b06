//! Pipeline driver: decode, correlate, solve, filter

use crate::algorithms::distance::DistanceModel;
use crate::algorithms::multilateration::{MultilaterationSolver, SolverSolution};
use crate::core::{DistanceEstimate, Reading, Sniffer, ValidatedPosition};
use crate::processing::correlation::{CorrelationIndex, ObservationSet};
use crate::processing::decoder::{NormalizedJsonDecoder, ReadingDecoder, SourceSpec};
use crate::processing::tshark::{TsharkBleDecoder, TsharkInput, TsharkWlanDecoder};
use crate::utils::config::{ConfigurationManager, DuplicatePolicy, SourceConfig, SourceFormat, SystemConfig};
use crate::validation::error::PositioningError;
use crate::validation::filter::{FilterOutcome, ResultFilter};
use crate::validation::report::{RunReport, SourceSummary};
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Positions and accounting produced by one run
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    /// Survivors of the result filter, in unspecified order
    pub positions: Vec<ValidatedPosition>,
    pub report: RunReport,
}

/// Offline geolocation run over a fixed sniffer layout
pub struct GeolocationPipeline {
    sniffers: HashMap<String, Sniffer>,
    model: DistanceModel,
    solver: MultilaterationSolver,
    filter: ResultFilter,
    duplicate_policy: DuplicatePolicy,
    parallel: bool,
    token_quantum_secs: f64,
    decoder_timeout_ms: u64,
}

impl GeolocationPipeline {
    pub fn new(sniffers: &[Sniffer], system: &SystemConfig) -> Result<Self, PositioningError> {
        system.validate()?;
        let model = system.distance_model();

        let mut by_id = HashMap::with_capacity(sniffers.len());
        for sniffer in sniffers {
            if !sniffer.position.is_finite() {
                return Err(PositioningError::ConfigurationError {
                    parameter: format!("sniffers[{}].position", sniffer.id),
                    reason: "Coordinates must be finite".to_string(),
                });
            }
            if by_id.insert(sniffer.id.clone(), sniffer.clone()).is_some() {
                return Err(PositioningError::ConfigurationError {
                    parameter: "sniffers".to_string(),
                    reason: format!("Duplicate sniffer id {}", sniffer.id),
                });
            }
        }

        Ok(Self {
            sniffers: by_id,
            model,
            solver: MultilaterationSolver::with_rank_tolerance(system.rank_tolerance),
            filter: ResultFilter::new(),
            duplicate_policy: system.duplicate_policy,
            parallel: system.parallel,
            token_quantum_secs: system.token_quantum_secs,
            decoder_timeout_ms: system.decoder_timeout_ms,
        })
    }

    pub fn from_config(config: &ConfigurationManager) -> Result<Self, PositioningError> {
        Self::new(config.sniffers(), config.get_system_config())
    }

    pub fn sniffer(&self, sniffer_id: &str) -> Option<&Sniffer> {
        self.sniffers.get(sniffer_id)
    }

    pub fn distance_model(&self) -> &DistanceModel {
        &self.model
    }

    /// Decoder adapter for a source container format
    pub fn decoder_for(&self, format: SourceFormat) -> Box<dyn ReadingDecoder> {
        match format {
            SourceFormat::Normalized => Box::new(NormalizedJsonDecoder::new()),
            SourceFormat::TsharkJson => Box::new(
                TsharkBleDecoder::new(TsharkInput::ExportedJson).with_token_quantum(self.token_quantum_secs),
            ),
            SourceFormat::TsharkCapture => Box::new(
                TsharkBleDecoder::new(TsharkInput::Capture)
                    .with_token_quantum(self.token_quantum_secs)
                    .with_timeout_ms(self.decoder_timeout_ms),
            ),
            SourceFormat::TsharkWlanJson => Box::new(TsharkWlanDecoder::new(TsharkInput::ExportedJson)),
            SourceFormat::TsharkWlanCapture => Box::new(
                TsharkWlanDecoder::new(TsharkInput::Capture).with_timeout_ms(self.decoder_timeout_ms),
            ),
        }
    }

    /// Add readings to the index, dropping those from unconfigured sniffers
    pub fn ingest_readings<I>(&self, index: &mut CorrelationIndex, readings: I, report: &mut RunReport)
    where
        I: IntoIterator<Item = Reading>,
    {
        for reading in readings {
            if self.sniffers.contains_key(&reading.sniffer_id) {
                index.ingest(reading);
            } else {
                debug!(sniffer = %reading.sniffer_id, "dropping reading from unknown sniffer");
                report.unknown_sniffer_readings += 1;
            }
        }
    }

    /// Decode every source into the index; a source that cannot be read aborts the run
    pub fn ingest_sources(
        &self,
        sources: &[SourceConfig],
        index: &mut CorrelationIndex,
        report: &mut RunReport,
    ) -> Result<(), PositioningError> {
        for source in sources {
            if !self.sniffers.contains_key(&source.sniffer_id) {
                return Err(PositioningError::UnknownSniffer {
                    sniffer_id: source.sniffer_id.clone(),
                });
            }

            let spec = SourceSpec::new(source.sniffer_id.clone(), source.path.clone());
            let decoder = self.decoder_for(source.format);
            let batch = decoder.decode(&spec)?;

            info!(
                sniffer = %source.sniffer_id,
                source = %spec.display_name(),
                decoder = decoder.name(),
                readings = batch.readings.len(),
                malformed = batch.malformed,
                "source decoded"
            );
            if batch.malformed > 0 {
                warn!(
                    sniffer = %source.sniffer_id,
                    malformed = batch.malformed,
                    first = %batch.malformed_samples.first().map(ToString::to_string).unwrap_or_default(),
                    "skipped malformed records"
                );
            }

            report.sources.push(SourceSummary::from_batch(
                &source.sniffer_id,
                &spec.display_name(),
                decoder.name(),
                &batch,
            ));
            self.ingest_readings(index, batch.readings, report);
        }
        Ok(())
    }

    /// Range circles for a set under the configured duplicate policy
    pub fn distance_estimates(&self, set: &ObservationSet) -> Result<Vec<DistanceEstimate>, PositioningError> {
        match self.duplicate_policy {
            DuplicatePolicy::KeepAll => set
                .contributions()
                .iter()
                .map(|c| self.estimate_for(&c.sniffer_id, c.signal_strength as f64))
                .collect(),
            DuplicatePolicy::MeanSignal => set
                .mean_signal_by_sniffer()
                .iter()
                .map(|(id, signal)| self.estimate_for(id, *signal))
                .collect(),
        }
    }

    fn estimate_for(&self, sniffer_id: &str, signal_strength: f64) -> Result<DistanceEstimate, PositioningError> {
        let sniffer = self.sniffers.get(sniffer_id).ok_or_else(|| PositioningError::UnknownSniffer {
            sniffer_id: sniffer_id.to_string(),
        })?;
        Ok(DistanceEstimate::new(sniffer.position, self.model.distance(signal_strength)))
    }

    fn solve_set(&self, set: &ObservationSet) -> Result<SolverSolution, PositioningError> {
        let estimates = self.distance_estimates(set)?;
        self.solver.solve(&estimates)
    }

    /// Filter policy for one set; the solver only runs on admitted sets
    pub fn evaluate(&self, set: &ObservationSet) -> FilterOutcome {
        let outcome = self.filter.evaluate(set, |s| self.solve_set(s));
        match &outcome {
            FilterOutcome::Accepted { .. } => {}
            FilterOutcome::InsufficientObservations { distinct_sniffers } => {
                debug!(key = %set.key, distinct_sniffers, "not enough sniffers")
            }
            FilterOutcome::DegenerateGeometry { issue, .. } => {
                debug!(key = %set.key, %issue, "degenerate geometry")
            }
            FilterOutcome::Implausible { estimate } => {
                debug!(key = %set.key, x = estimate.x, y = estimate.y, "estimate outside deployment area")
            }
            FilterOutcome::Failed(err) => warn!(key = %set.key, error = %err, "solve failed"),
        }
        outcome
    }

    /// Solve and filter every set; sets are independent, so order is free
    pub fn solve_sets(&self, sets: &[ObservationSet], report: &mut RunReport) -> Vec<ValidatedPosition> {
        let outcomes: Vec<FilterOutcome> = if self.parallel {
            sets.par_iter().map(|set| self.evaluate(set)).collect()
        } else {
            sets.iter().map(|set| self.evaluate(set)).collect()
        };

        let mut positions = Vec::with_capacity(outcomes.len());
        for outcome in &outcomes {
            report.record(outcome);
            if let Some(position) = outcome.position() {
                positions.push(position);
            }
        }
        positions
    }

    /// Run over already-decoded readings
    pub fn run_readings<I>(&self, readings: I) -> RunOutput
    where
        I: IntoIterator<Item = Reading>,
    {
        let mut report = RunReport::new();
        let mut index = CorrelationIndex::new();
        self.ingest_readings(&mut index, readings, &mut report);
        self.finish(index, report)
    }

    /// Full run: decode every source, then solve and filter
    pub fn run(&self, sources: &[SourceConfig]) -> Result<RunOutput, PositioningError> {
        let mut report = RunReport::new();
        let mut index = CorrelationIndex::new();
        self.ingest_sources(sources, &mut index, &mut report)?;
        Ok(self.finish(index, report))
    }

    fn finish(&self, index: CorrelationIndex, mut report: RunReport) -> RunOutput {
        info!(
            readings = index.reading_count(),
            observation_sets = index.len(),
            parallel = self.parallel,
            "correlation complete"
        );
        let sets = index.finalize();
        let positions = self.solve_sets(&sets, &mut report);
        info!(accepted = report.accepted, discarded = report.discarded(), "solving complete");
        RunOutput { positions, report }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CorrelationKey;

    fn square_layout() -> Vec<Sniffer> {
        vec![
            Sniffer::new("a", 0.0, 0.0),
            Sniffer::new("b", 10.0, 0.0),
            Sniffer::new("c", 0.0, 10.0),
        ]
    }

    fn pipeline(policy: DuplicatePolicy, parallel: bool) -> GeolocationPipeline {
        let mut system = SystemConfig::default();
        system.duplicate_policy = policy;
        system.parallel = parallel;
        GeolocationPipeline::new(&square_layout(), &system).unwrap()
    }

    /// Readings a transmitter at `target` would produce under the pipeline's model
    fn readings_for(p: &GeolocationPipeline, transmitter: &str, token: i64, x: f64, y: f64) -> Vec<Reading> {
        ["a", "b", "c"]
            .iter()
            .map(|id| {
                let sniffer = p.sniffer(id).unwrap();
                let d = sniffer.position.distance_to(&crate::core::Point2::new(x, y));
                Reading::new(transmitter, token, *id, p.distance_model().signal_at(d).round() as i32)
            })
            .collect()
    }

    #[test]
    fn test_rejects_duplicate_sniffers() {
        let mut sniffers = square_layout();
        sniffers.push(Sniffer::new("a", 5.0, 5.0));
        assert!(GeolocationPipeline::new(&sniffers, &SystemConfig::default()).is_err());
    }

    #[test]
    fn test_run_locates_transmitter() {
        let p = pipeline(DuplicatePolicy::KeepAll, false);
        let output = p.run_readings(readings_for(&p, "mac", 1, 3.0, 4.0));
        assert_eq!(output.positions.len(), 1);
        let pos = output.positions[0];
        // Integer rounding of dBm keeps the fix within a meter
        assert!((pos.x - 3.0).abs() < 1.0, "x = {}", pos.x);
        assert!((pos.y - 4.0).abs() < 1.0, "y = {}", pos.y);
        assert_eq!(output.report.accepted, 1);
    }

    #[test]
    fn test_decoder_selection() {
        let p = pipeline(DuplicatePolicy::KeepAll, false);
        let names: Vec<&str> = [
            SourceFormat::Normalized,
            SourceFormat::TsharkJson,
            SourceFormat::TsharkCapture,
            SourceFormat::TsharkWlanJson,
            SourceFormat::TsharkWlanCapture,
        ]
        .into_iter()
        .map(|format| p.decoder_for(format).name())
        .collect();
        assert_eq!(
            names,
            vec!["normalized", "tshark-json", "tshark-capture", "tshark-wlan-json", "tshark-wlan-capture"]
        );
    }

    #[test]
    fn test_unknown_sniffers_are_dropped() {
        let p = pipeline(DuplicatePolicy::KeepAll, false);
        let mut readings = readings_for(&p, "mac", 1, 3.0, 4.0);
        readings.push(Reading::new("mac", 1, "ghost", -50));
        let output = p.run_readings(readings);
        assert_eq!(output.report.unknown_sniffer_readings, 1);
        assert_eq!(output.positions.len(), 1);
    }

    #[test]
    fn test_two_sniffer_sets_produce_nothing() {
        let p = pipeline(DuplicatePolicy::KeepAll, true);
        let output = p.run_readings(vec![
            Reading::new("mac", 1, "a", -60),
            Reading::new("mac", 1, "b", -60),
            Reading::new("mac", 1, "b", -61),
        ]);
        assert!(output.positions.is_empty());
        assert_eq!(output.report.insufficient, 1);
    }

    #[test]
    fn test_duplicate_policies() {
        let mut set = ObservationSet::new(CorrelationKey::new("mac", 1));
        set.push("a".to_string(), -60);
        set.push("a".to_string(), -64);
        set.push("b".to_string(), -70);
        set.push("c".to_string(), -70);

        assert_eq!(pipeline(DuplicatePolicy::KeepAll, false).distance_estimates(&set).unwrap().len(), 4);

        let p = pipeline(DuplicatePolicy::MeanSignal, false);
        let estimates = p.distance_estimates(&set).unwrap();
        assert_eq!(estimates.len(), 3);
        assert!((estimates[0].distance - p.distance_model().distance(-62.0)).abs() < 1e-12);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let sequential = pipeline(DuplicatePolicy::KeepAll, false);
        let parallel = pipeline(DuplicatePolicy::KeepAll, true);
        let mut readings = Vec::new();
        for token in 0..40 {
            let x = 1.0 + (token % 8) as f64;
            let y = 1.0 + (token / 8) as f64;
            readings.extend(readings_for(&sequential, "mac", token, x, y));
        }

        let sort = |mut v: Vec<ValidatedPosition>| {
            v.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
            v
        };
        let a = sequential.run_readings(readings.clone());
        let b = parallel.run_readings(readings);
        assert_eq!(a.report, b.report);
        assert_eq!(sort(a.positions), sort(b.positions));
    }

    #[test]
    fn test_set_with_unlisted_sniffer_fails() {
        let p = pipeline(DuplicatePolicy::KeepAll, false);
        let mut set = ObservationSet::new(CorrelationKey::new("mac", 1));
        set.push("a".to_string(), -60);
        set.push("b".to_string(), -60);
        set.push("ghost".to_string(), -60);

        let outcome = p.evaluate(&set);
        assert_eq!(
            outcome,
            FilterOutcome::Failed(PositioningError::UnknownSniffer {
                sniffer_id: "ghost".to_string()
            })
        );
        let mut report = RunReport::new();
        assert!(p.solve_sets(&[set], &mut report).is_empty());
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn test_invalid_system_config_is_rejected() {
        for tweak in [
            (|c: &mut SystemConfig| c.token_quantum_secs = 0.0) as fn(&mut SystemConfig),
            |c: &mut SystemConfig| c.token_quantum_secs = f64::NAN,
            |c: &mut SystemConfig| c.rank_tolerance = 0.0,
            |c: &mut SystemConfig| c.decoder_timeout_ms = 0,
            |c: &mut SystemConfig| c.path_loss_exponent = -2.0,
        ] {
            let mut system = SystemConfig::default();
            tweak(&mut system);
            match GeolocationPipeline::new(&square_layout(), &system) {
                Err(err @ PositioningError::ConfigurationError { .. }) => assert!(err.is_fatal()),
                Err(other) => panic!("unexpected error: {:?}", other),
                Ok(_) => panic!("accepted invalid config {:?}", system),
            }
        }
    }

    #[test]
    fn test_unknown_source_sniffer_aborts() {
        let p = pipeline(DuplicatePolicy::KeepAll, false);
        let err = p
            .run(&[SourceConfig {
                sniffer_id: "ghost".to_string(),
                path: std::path::PathBuf::from("ghost.json"),
                format: SourceFormat::Normalized,
            }])
            .unwrap_err();
        assert!(matches!(err, PositioningError::UnknownSniffer { .. }));
    }

    #[test]
    fn test_missing_source_file_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(DuplicatePolicy::KeepAll, false);
        let err = p
            .run(&[SourceConfig {
                sniffer_id: "a".to_string(),
                path: dir.path().join("no-such-source.json"),
                format: SourceFormat::Normalized,
            }])
            .unwrap_err();
        assert!(matches!(err, PositioningError::SourceIoFailure { .. }));
        assert!(err.is_fatal());
    }
}
