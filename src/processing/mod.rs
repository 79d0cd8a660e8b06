//! Reading ingestion: decoders and cross-sniffer correlation

pub mod correlation;
pub mod decoder;
pub mod tshark;

pub use correlation::{Contribution, CorrelationIndex, ObservationSet};
pub use decoder::{DecodeError, DecodedBatch, NormalizedJsonDecoder, ReadingDecoder, SourceSpec};
pub use tshark::{TsharkBleDecoder, TsharkInput, TsharkProcess, TsharkWlanDecoder};
