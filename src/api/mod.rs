//! Batch positioning API
//!
//! [`GeolocationPipeline`] drives a complete offline run: sources are decoded
//! into the correlation index, every observation set is solved and filtered,
//! and [`JsonWriter`] persists the surviving positions.

pub mod output;
pub mod pipeline;

pub use output::JsonWriter;
pub use pipeline::{GeolocationPipeline, RunOutput};
