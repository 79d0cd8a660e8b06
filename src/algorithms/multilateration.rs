use nalgebra::{DMatrix, DVector};

use crate::core::{DistanceEstimate, Point2, PositionEstimate, DEFAULT_RANK_TOLERANCE, MIN_SNIFFERS};
use crate::validation::error::{GeometryIssue, PositioningError};

/// Linearized least-squares multilateration in the plane
///
/// Every range circle `(x - xi)^2 + (y - yi)^2 = di^2` is differenced against
/// the first one, which cancels the quadratic terms and leaves an
/// `(n - 1) x 2` linear system. The system is solved through an SVD so the
/// exactly determined (three sniffers) and overdetermined cases share one
/// path, and rank deficiency is detected from the singular values instead of
/// surfacing as NaN.
#[derive(Debug, Clone)]
pub struct MultilaterationSolver {
    /// Smallest-to-largest singular value ratio treated as rank deficient
    pub rank_tolerance: f64,
}

/// Solver output with fit diagnostics
#[derive(Debug, Clone, PartialEq)]
pub struct SolverSolution {
    pub position: PositionEstimate,
    /// Root mean square of `|p - si| - di` over all sniffers (meters)
    pub rms_residual: f64,
    /// Condition number of the linearized design matrix
    pub condition_number: f64,
}

impl Default for MultilaterationSolver {
    fn default() -> Self {
        Self {
            rank_tolerance: DEFAULT_RANK_TOLERANCE,
        }
    }
}

impl MultilaterationSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rank_tolerance(rank_tolerance: f64) -> Self {
        Self { rank_tolerance }
    }

    /// Best-fit position for a set of range circles
    pub fn solve(&self, estimates: &[DistanceEstimate]) -> Result<SolverSolution, PositioningError> {
        let n = estimates.len();
        if n < MIN_SNIFFERS {
            return Err(PositioningError::InsufficientObservations {
                available: n,
                required: MIN_SNIFFERS,
            });
        }

        let finite = estimates.iter().all(|e| {
            e.sniffer_position.is_finite() && e.distance.is_finite() && e.distance >= 0.0
        });
        if !finite {
            return Err(PositioningError::DegenerateGeometry {
                sniffer_count: n,
                condition_number: f64::NAN,
                issue: GeometryIssue::NonFinite,
            });
        }

        let (a_matrix, b_vector) = Self::linearize(estimates);

        let svd = a_matrix.svd(true, true);
        let largest = svd.singular_values.iter().cloned().fold(0.0_f64, f64::max);
        let smallest = svd.singular_values.iter().cloned().fold(f64::INFINITY, f64::min);
        let condition_number = if smallest > 0.0 { largest / smallest } else { f64::INFINITY };

        // Coincident or collinear sniffers leave fewer than two independent rows
        if largest <= 0.0 || smallest <= self.rank_tolerance * largest {
            return Err(PositioningError::DegenerateGeometry {
                sniffer_count: n,
                condition_number,
                issue: GeometryIssue::Collinear,
            });
        }

        let solution = svd
            .solve(&b_vector, self.rank_tolerance * largest)
            .map_err(|_| PositioningError::DegenerateGeometry {
                sniffer_count: n,
                condition_number,
                issue: GeometryIssue::Collinear,
            })?;

        let position = Point2::new(solution[0], solution[1]);
        if !position.is_finite() {
            return Err(PositioningError::DegenerateGeometry {
                sniffer_count: n,
                condition_number,
                issue: GeometryIssue::NonFinite,
            });
        }

        Ok(SolverSolution {
            position,
            rms_residual: Self::rms_residual(estimates, &position),
            condition_number,
        })
    }

    /// Build `A` and `b` by subtracting the first circle equation from the others
    fn linearize(estimates: &[DistanceEstimate]) -> (DMatrix<f64>, DVector<f64>) {
        let n = estimates.len();
        let p0 = estimates[0].sniffer_position;
        let d0 = estimates[0].distance;

        let mut a_matrix = DMatrix::zeros(n - 1, 2);
        let mut b_vector = DVector::zeros(n - 1);

        for (row, estimate) in estimates.iter().skip(1).enumerate() {
            let pi = estimate.sniffer_position;

            a_matrix[(row, 0)] = 2.0 * (pi.x - p0.x);
            a_matrix[(row, 1)] = 2.0 * (pi.y - p0.y);

            b_vector[row] = d0.powi(2) - estimate.distance.powi(2)
                + pi.x.powi(2) - p0.x.powi(2)
                + pi.y.powi(2) - p0.y.powi(2);
        }

        (a_matrix, b_vector)
    }

    fn rms_residual(estimates: &[DistanceEstimate], position: &Point2) -> f64 {
        let sum: f64 = estimates
            .iter()
            .map(|e| (position.distance_to(&e.sniffer_position) - e.distance).powi(2))
            .sum();
        (sum / estimates.len() as f64).sqrt()
    }
}
