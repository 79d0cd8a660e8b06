//! Result validation, error taxonomy and run accounting

pub mod error;
pub mod filter;
pub mod report;

pub use error::{GeometryIssue, PositioningError};
pub use filter::{FilterOutcome, ResultFilter};
pub use report::{RunReport, SourceSummary};
