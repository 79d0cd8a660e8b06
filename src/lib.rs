//! RSSI Multilateration
//!
//! Offline geolocation of radio transmitters from signal strength reports
//! captured by a fixed set of sniffers. Reports of the same transmission are
//! correlated, converted to range circles with a log-distance path-loss model,
//! intersected by linear least squares and filtered for plausibility.

pub mod core;
pub mod algorithms;
pub mod processing;
pub mod validation;
pub mod utils;
pub mod api;

// Re-export commonly used types
pub use core::{CorrelationKey, DistanceEstimate, Point2, PositionEstimate, Reading, Sniffer, ValidatedPosition};
pub use algorithms::{estimate_distance, DistanceModel, MultilaterationSolver, SolverSolution, Technology};
pub use processing::{CorrelationIndex, DecodedBatch, NormalizedJsonDecoder, ObservationSet, ReadingDecoder, SourceSpec, TsharkBleDecoder, TsharkWlanDecoder};
pub use validation::{FilterOutcome, GeometryIssue, PositioningError, ResultFilter, RunReport};
pub use utils::{ConfigError, ConfigurationManager, DuplicatePolicy, SourceConfig, SourceFormat, SystemConfig};
pub use api::{GeolocationPipeline, JsonWriter, RunOutput};
