//! Core types and constants for the sniffer positioning pipeline

pub mod types;
pub mod constants;

pub use types::*;
pub use constants::*;
