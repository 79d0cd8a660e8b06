//! Result artifacts: the position list and the run report

use crate::core::ValidatedPosition;
use crate::validation::error::PositioningError;
use crate::validation::report::RunReport;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::info;

/// JSON writer for pipeline results
#[derive(Debug, Clone, Default)]
pub struct JsonWriter {
    /// Pretty print JSON
    pub pretty: bool,
}

impl JsonWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    /// Positions as a JSON array of `[x, y]` pairs
    pub fn format_positions(&self, positions: &[ValidatedPosition]) -> Result<String, serde_json::Error> {
        let pairs: Vec<[f64; 2]> = positions.iter().map(ValidatedPosition::as_pair).collect();
        self.to_json(&pairs)
    }

    /// Write the position list in one go; an empty list still produces `[]`
    pub fn write_positions<P: AsRef<Path>>(
        &self,
        path: P,
        positions: &[ValidatedPosition],
    ) -> Result<(), PositioningError> {
        let content = self
            .format_positions(positions)
            .map_err(|e| output_failure(path.as_ref(), e.to_string()))?;
        fs::write(&path, content).map_err(|e| output_failure(path.as_ref(), e.to_string()))?;
        info!(path = %path.as_ref().display(), positions = positions.len(), "positions written");
        Ok(())
    }

    pub fn write_report<P: AsRef<Path>>(&self, path: P, report: &RunReport) -> Result<(), PositioningError> {
        let content = self
            .to_json(report)
            .map_err(|e| output_failure(path.as_ref(), e.to_string()))?;
        fs::write(&path, content).map_err(|e| output_failure(path.as_ref(), e.to_string()))
    }

    fn to_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, serde_json::Error> {
        if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
    }
}

fn output_failure(path: &Path, message: String) -> PositioningError {
    PositioningError::OutputFailure {
        path: path.display().to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_pairs() {
        let positions = vec![ValidatedPosition { x: 3.0, y: 4.0 }, ValidatedPosition { x: 0.0, y: 2.5 }];
        let json = JsonWriter::new().format_positions(&positions).unwrap();
        assert_eq!(json, "[[3.0,4.0],[0.0,2.5]]");

        let parsed: Vec<[f64; 2]> = serde_json::from_str(&JsonWriter::pretty().format_positions(&positions).unwrap()).unwrap();
        assert_eq!(parsed, vec![[3.0, 4.0], [0.0, 2.5]]);
    }

    #[test]
    fn test_empty_output_is_empty_array() {
        let file = tempfile::NamedTempFile::new().unwrap();
        JsonWriter::new().write_positions(file.path(), &[]).unwrap();
        assert_eq!(fs::read_to_string(file.path()).unwrap(), "[]");
    }

    #[test]
    fn test_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("out.json");
        let err = JsonWriter::new().write_positions(&path, &[]).unwrap_err();
        assert!(matches!(err, PositioningError::OutputFailure { .. }));
        assert!(err.is_fatal());
    }
}
