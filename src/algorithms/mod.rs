//! Positioning algorithms

pub mod distance;
pub mod multilateration;

pub use distance::{estimate_distance, DistanceModel, Technology};
pub use multilateration::{MultilaterationSolver, SolverSolution};
