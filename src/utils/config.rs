use crate::algorithms::distance::{DistanceModel, Technology};
use crate::core::{
    Point2, Sniffer, DEFAULT_DECODER_TIMEOUT_MS, DEFAULT_PATH_LOSS_EXPONENT, DEFAULT_RANK_TOLERANCE,
    DEFAULT_TOKEN_QUANTUM_SECS, MIN_SNIFFERS,
};
use crate::validation::error::PositioningError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// How repeated reports from one sniffer for one transmission reach the solver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Every report becomes its own range circle
    KeepAll,
    /// Reports are averaged in dBm, one circle per sniffer
    MeanSignal,
}

/// Run-wide parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Selects the calibration preset
    pub technology: Technology,
    /// Path-loss exponent of the distance model
    pub path_loss_exponent: f64,
    /// Replaces the preset's one-meter reference (dBm) when set
    pub reference_rssi_override: Option<f64>,
    pub duplicate_policy: DuplicatePolicy,
    /// Correlation bucket width for decoders without sequence numbers (seconds)
    pub token_quantum_secs: f64,
    /// Time limit for external decoder processes (milliseconds)
    pub decoder_timeout_ms: u64,
    /// Relative singular value threshold for degenerate geometry
    pub rank_tolerance: f64,
    /// Solve observation sets on the thread pool
    pub parallel: bool,
    /// Enable debug logging
    pub verbose: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            technology: Technology::Bluetooth,
            path_loss_exponent: DEFAULT_PATH_LOSS_EXPONENT,
            reference_rssi_override: None,
            duplicate_policy: DuplicatePolicy::KeepAll,
            token_quantum_secs: DEFAULT_TOKEN_QUANTUM_SECS,
            decoder_timeout_ms: DEFAULT_DECODER_TIMEOUT_MS,
            rank_tolerance: DEFAULT_RANK_TOLERANCE,
            parallel: true,
            verbose: false,
        }
    }
}

impl SystemConfig {
    /// Reject parameter values no run can work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.parameter_errors().into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn parameter_errors(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if let Err(reason) = self.distance_model().validate() {
            errors.push(ConfigError::InvalidParameter {
                parameter: "path_loss_exponent".to_string(),
                value: self.path_loss_exponent.to_string(),
                reason,
            });
        }

        // A zero or non-finite quantum would map every timestamp to one token
        if !self.token_quantum_secs.is_finite() || self.token_quantum_secs <= 0.0 {
            errors.push(ConfigError::InvalidParameter {
                parameter: "token_quantum_secs".to_string(),
                value: self.token_quantum_secs.to_string(),
                reason: "Must be a positive number of seconds".to_string(),
            });
        }

        if self.decoder_timeout_ms == 0 {
            errors.push(ConfigError::InvalidParameter {
                parameter: "decoder_timeout_ms".to_string(),
                value: "0".to_string(),
                reason: "Must be greater than zero".to_string(),
            });
        }

        if !(self.rank_tolerance > 0.0 && self.rank_tolerance < 1.0) {
            errors.push(ConfigError::InvalidParameter {
                parameter: "rank_tolerance".to_string(),
                value: self.rank_tolerance.to_string(),
                reason: "Must lie strictly between 0 and 1".to_string(),
            });
        }

        errors
    }

    /// Distance model selected by technology and tuning parameters
    pub fn distance_model(&self) -> DistanceModel {
        let model = DistanceModel::for_technology(self.technology).with_path_loss_exponent(self.path_loss_exponent);
        match self.reference_rssi_override {
            Some(reference) => DistanceModel::new(reference, model.path_loss_exponent),
            None => model,
        }
    }
}

/// Capture container a source file is stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceFormat {
    /// JSON array of normalized readings
    Normalized,
    /// Saved output of `tshark -T json` for a Bluetooth HCI capture
    TsharkJson,
    /// Bluetooth HCI capture dissected by running tshark
    TsharkCapture,
    /// Saved output of `tshark -T json` for an 802.11 monitor-mode capture
    TsharkWlanJson,
    /// 802.11 monitor-mode capture; scan requests (management subtype 4) are dissected by running tshark
    TsharkWlanCapture,
}

/// One input file and the sniffer that recorded it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub sniffer_id: String,
    pub path: PathBuf,
    #[serde(default = "default_source_format")]
    pub format: SourceFormat,
}

fn default_source_format() -> SourceFormat {
    SourceFormat::Normalized
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Invalid parameter value
    InvalidParameter { parameter: String, value: String, reason: String },
    /// Missing required parameter
    MissingParameter { parameter: String },
    /// Configuration file I/O error
    IoError { message: String },
    /// JSON serialization/deserialization error
    SerializationError { message: String },
    /// Sniffer definition conflict
    SnifferConflict { sniffer_id: String, reason: String },
    /// Geometry validation failure
    GeometryValidation { reason: String },
}

/// Configuration validation result
#[derive(Debug)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ConfigError>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ValidationResult {
    fn from_parts(errors: Vec<ConfigError>, warnings: Vec<String>, suggestions: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            suggestions,
        }
    }

    /// First error, or `fallback` if the result is invalid without one
    fn into_error(self, fallback: ConfigError) -> ConfigError {
        self.errors.into_iter().next().unwrap_or(fallback)
    }
}

/// Configuration file data structure
#[derive(Debug, Serialize, Deserialize)]
struct ConfigFileData {
    #[serde(default)]
    system: SystemConfig,
    sniffers: Vec<Sniffer>,
    #[serde(default)]
    sources: Vec<SourceConfig>,
}

/// Sniffer layout, sources and run parameters
#[derive(Debug)]
pub struct ConfigurationManager {
    system_config: SystemConfig,
    /// Kept in configuration order
    sniffers: Vec<Sniffer>,
    sources: Vec<SourceConfig>,
    config_file_path: Option<String>,
    is_modified: bool,
}

impl Default for ConfigurationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationManager {
    /// Default run parameters and the reference three-sniffer deployment
    pub fn new() -> Self {
        Self {
            system_config: SystemConfig::default(),
            sniffers: default_sniffers(),
            sources: Vec::new(),
            config_file_path: None,
            is_modified: false,
        }
    }

    /// Create configuration manager and load from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut manager = Self::new();
        manager.load_from_file(path)?;
        Ok(manager)
    }

    pub fn get_system_config(&self) -> &SystemConfig {
        &self.system_config
    }

    /// Update system configuration with validation
    pub fn update_system_config(&mut self, config: SystemConfig) -> Result<(), ConfigError> {
        let validation = self.validate_system_config(&config);
        if !validation.is_valid {
            return Err(validation.into_error(ConfigError::InvalidParameter {
                parameter: "system".to_string(),
                value: "invalid".to_string(),
                reason: "Configuration validation failed".to_string(),
            }));
        }
        self.system_config = config;
        self.is_modified = true;
        Ok(())
    }

    pub fn sniffers(&self) -> &[Sniffer] {
        &self.sniffers
    }

    pub fn get_sniffer(&self, sniffer_id: &str) -> Option<&Sniffer> {
        self.sniffers.iter().find(|s| s.id == sniffer_id)
    }

    /// Add a sniffer or move an existing one
    pub fn set_sniffer(&mut self, sniffer: Sniffer) -> Result<(), ConfigError> {
        let validation = self.validate_sniffer(&sniffer);
        if !validation.is_valid {
            return Err(validation.into_error(ConfigError::SnifferConflict {
                sniffer_id: sniffer.id.clone(),
                reason: "Sniffer validation failed".to_string(),
            }));
        }
        match self.sniffers.iter_mut().find(|s| s.id == sniffer.id) {
            Some(existing) => *existing = sniffer,
            None => self.sniffers.push(sniffer),
        }
        self.is_modified = true;
        Ok(())
    }

    /// Remove a sniffer and every source attributed to it
    pub fn remove_sniffer(&mut self, sniffer_id: &str) -> Option<Sniffer> {
        let index = self.sniffers.iter().position(|s| s.id == sniffer_id)?;
        self.sources.retain(|s| s.sniffer_id != sniffer_id);
        self.is_modified = true;
        Some(self.sniffers.remove(index))
    }

    pub fn sources(&self) -> &[SourceConfig] {
        &self.sources
    }

    /// Register an input source for a configured sniffer
    pub fn add_source(&mut self, source: SourceConfig) -> Result<(), ConfigError> {
        if self.get_sniffer(&source.sniffer_id).is_none() {
            return Err(ConfigError::SnifferConflict {
                sniffer_id: source.sniffer_id,
                reason: "Source references an unconfigured sniffer".to_string(),
            });
        }
        self.sources.push(source);
        self.is_modified = true;
        Ok(())
    }

    pub fn clear_sources(&mut self) {
        self.sources.clear();
        self.is_modified = true;
    }

    pub fn set_technology(&mut self, technology: Technology) {
        self.system_config.technology = technology;
        self.is_modified = true;
    }

    pub fn set_path_loss_exponent(&mut self, exponent: f64) -> Result<f64, ConfigError> {
        if !exponent.is_finite() || exponent <= 0.0 {
            return Err(ConfigError::InvalidParameter {
                parameter: "path_loss_exponent".to_string(),
                value: exponent.to_string(),
                reason: "Must be a positive number".to_string(),
            });
        }
        let old = self.system_config.path_loss_exponent;
        self.system_config.path_loss_exponent = exponent;
        self.is_modified = true;
        Ok(old)
    }

    pub fn set_parallel(&mut self, parallel: bool) -> bool {
        let old = self.system_config.parallel;
        self.system_config.parallel = parallel;
        self.is_modified = true;
        old
    }

    /// Load configuration from JSON file
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
            message: format!("Failed to read config file '{}': {}", path_str, e),
        })?;

        let config_data: ConfigFileData = serde_json::from_str(&content).map_err(|e| ConfigError::SerializationError {
            message: format!("Failed to parse config file '{}': {}", path_str, e),
        })?;

        // Validate before applying
        let system_validation = self.validate_system_config(&config_data.system);
        if !system_validation.is_valid {
            return Err(system_validation.into_error(ConfigError::MissingParameter {
                parameter: "system".to_string(),
            }));
        }

        let sniffer_validation = self.validate_sniffer_set(&config_data.sniffers);
        if !sniffer_validation.is_valid {
            return Err(sniffer_validation.into_error(ConfigError::MissingParameter {
                parameter: "sniffers".to_string(),
            }));
        }
        for warning in &sniffer_validation.warnings {
            warn!(config = %path_str, "{}", warning);
        }

        let known: HashSet<&str> = config_data.sniffers.iter().map(|s| s.id.as_str()).collect();
        if let Some(orphan) = config_data.sources.iter().find(|s| !known.contains(s.sniffer_id.as_str())) {
            return Err(ConfigError::SnifferConflict {
                sniffer_id: orphan.sniffer_id.clone(),
                reason: format!("Source '{}' references an unconfigured sniffer", orphan.path.display()),
            });
        }

        // Relative source paths are resolved against the config file's directory
        let base_dir = path.as_ref().parent().map(Path::to_path_buf).unwrap_or_default();
        let sources = config_data
            .sources
            .into_iter()
            .map(|mut source| {
                if source.path.is_relative() {
                    source.path = base_dir.join(&source.path);
                }
                source
            })
            .collect();

        self.system_config = config_data.system;
        self.sniffers = config_data.sniffers;
        self.sources = sources;
        self.config_file_path = Some(path_str);
        self.is_modified = false;

        debug!(
            sniffers = self.sniffers.len(),
            sources = self.sources.len(),
            technology = %self.system_config.technology,
            "configuration loaded"
        );
        Ok(())
    }

    /// Save configuration to JSON file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let config_data = ConfigFileData {
            system: self.system_config.clone(),
            sniffers: self.sniffers.clone(),
            sources: self.sources.clone(),
        };

        let content = serde_json::to_string_pretty(&config_data).map_err(|e| ConfigError::SerializationError {
            message: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(&path, content).map_err(|e| ConfigError::IoError {
            message: format!("Failed to write config file '{}': {}", path_str, e),
        })?;

        self.config_file_path = Some(path_str);
        self.is_modified = false;
        Ok(())
    }

    pub fn config_file_path(&self) -> Option<&str> {
        self.config_file_path.as_deref()
    }

    /// Check if configuration has been modified since last save
    pub fn is_modified(&self) -> bool {
        self.is_modified
    }

    pub fn validate_system_config(&self, config: &SystemConfig) -> ValidationResult {
        let mut warnings = Vec::new();
        let mut suggestions = Vec::new();

        let errors = config.parameter_errors();
        if errors.is_empty() && (config.path_loss_exponent < 1.5 || config.path_loss_exponent > 6.0) {
            warnings.push(format!(
                "Path-loss exponent {} is outside the usual 1.5 to 6 range",
                config.path_loss_exponent
            ));
            suggestions.push("Recalibrate the exponent against measured distances".to_string());
        }

        ValidationResult::from_parts(errors, warnings, suggestions)
    }

    pub fn validate_sniffer(&self, sniffer: &Sniffer) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut suggestions = Vec::new();

        if sniffer.id.trim().is_empty() {
            errors.push(ConfigError::MissingParameter {
                parameter: "sniffer.id".to_string(),
            });
        }

        if !sniffer.position.is_finite() {
            errors.push(ConfigError::InvalidParameter {
                parameter: format!("sniffers[{}].position", sniffer.id),
                value: format!("({}, {})", sniffer.position.x, sniffer.position.y),
                reason: "Coordinates must be finite".to_string(),
            });
        } else if sniffer.position.x < 0.0 || sniffer.position.y < 0.0 {
            warnings.push(format!(
                "Sniffer {} lies outside the first quadrant; negative fixes are clamped or discarded",
                sniffer.id
            ));
            suggestions.push("Shift the site origin so every sniffer has non-negative coordinates".to_string());
        }

        ValidationResult::from_parts(errors, warnings, suggestions)
    }

    /// Validate a complete layout: ids, coordinates and geometry
    pub fn validate_sniffer_set(&self, sniffers: &[Sniffer]) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut suggestions = Vec::new();

        let mut seen = HashSet::new();
        for sniffer in sniffers {
            let result = self.validate_sniffer(sniffer);
            errors.extend(result.errors);
            warnings.extend(result.warnings);
            suggestions.extend(result.suggestions);

            if !seen.insert(sniffer.id.as_str()) {
                errors.push(ConfigError::SnifferConflict {
                    sniffer_id: sniffer.id.clone(),
                    reason: "Duplicate sniffer id".to_string(),
                });
            }
        }

        if sniffers.len() < MIN_SNIFFERS {
            errors.push(ConfigError::GeometryValidation {
                reason: format!("Only {} sniffers configured, but {} required", sniffers.len(), MIN_SNIFFERS),
            });
        } else {
            let positions: Vec<Point2> = sniffers.iter().map(|s| s.position).collect();
            if is_collinear(&positions) {
                warnings.push("Sniffers are collinear; every fix will be degenerate".to_string());
                suggestions.push("Move at least one sniffer off the common line".to_string());
            }
        }

        ValidationResult::from_parts(errors, warnings, suggestions)
    }

    /// Validate the currently applied layout
    pub fn validate_system_geometry(&self) -> ValidationResult {
        self.validate_sniffer_set(&self.sniffers)
    }
}

/// Reference deployment: three sniffers around the surveyed area
pub fn default_sniffers() -> Vec<Sniffer> {
    vec![
        Sniffer::new("sniffer-1", 47.66354934150967, 4.621676369539302),
        Sniffer::new("sniffer-2", 30.66381799963902, 8.439582935680464),
        Sniffer::new("sniffer-3", 29.940425176580693, 24.836486925002507),
    ]
}

/// True when all points lie on one line (or coincide)
fn is_collinear(positions: &[Point2]) -> bool {
    let Some(origin) = positions.first() else {
        return true;
    };
    let far = positions
        .iter()
        .max_by(|a, b| origin.distance_to(a).total_cmp(&origin.distance_to(b)))
        .copied()
        .unwrap_or(*origin);
    let span = origin.distance_to(&far);
    if span <= f64::EPSILON {
        return true;
    }

    let (ux, uy) = (far.x - origin.x, far.y - origin.y);
    positions.iter().all(|p| {
        let cross = ux * (p.y - origin.y) - uy * (p.x - origin.x);
        cross.abs() <= 1e-9 * span * span
    })
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidParameter { parameter, value, reason } => {
                write!(f, "Invalid parameter '{}' = '{}': {}", parameter, value, reason)
            }
            ConfigError::MissingParameter { parameter } => {
                write!(f, "Missing required parameter: {}", parameter)
            }
            ConfigError::IoError { message } => {
                write!(f, "I/O error: {}", message)
            }
            ConfigError::SerializationError { message } => {
                write!(f, "Serialization error: {}", message)
            }
            ConfigError::SnifferConflict { sniffer_id, reason } => {
                write!(f, "Sniffer {} conflict: {}", sniffer_id, reason)
            }
            ConfigError::GeometryValidation { reason } => {
                write!(f, "Geometry validation error: {}", reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    /// Name of the offending parameter, or the error category
    pub fn parameter(&self) -> &str {
        match self {
            ConfigError::InvalidParameter { parameter, .. } | ConfigError::MissingParameter { parameter } => parameter,
            ConfigError::IoError { .. } => "config_file",
            ConfigError::SerializationError { .. } => "config_file",
            ConfigError::SnifferConflict { .. } => "sniffers",
            ConfigError::GeometryValidation { .. } => "sniffers",
        }
    }
}

impl From<ConfigError> for PositioningError {
    fn from(err: ConfigError) -> Self {
        PositioningError::ConfigurationError {
            parameter: err.parameter().to_string(),
            reason: err.to_string(),
        }
    }
}
