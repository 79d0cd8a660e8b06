use crate::algorithms::multilateration::SolverSolution;
use crate::core::{PositionEstimate, ValidatedPosition, MIN_SNIFFERS};
use crate::processing::correlation::ObservationSet;
use crate::validation::error::{GeometryIssue, PositioningError};

/// What happened to one observation set
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    /// Position kept; `clamped` when one negative coordinate was moved to zero
    Accepted {
        position: ValidatedPosition,
        clamped: bool,
    },
    /// Too few distinct sniffers, the solver never ran
    InsufficientObservations { distinct_sniffers: usize },
    /// Solver could not produce a unique position
    DegenerateGeometry {
        issue: GeometryIssue,
        condition_number: f64,
    },
    /// Both coordinates negative, outside the first-quadrant deployment area
    Implausible { estimate: PositionEstimate },
    /// Set could not be turned into range circles, e.g. a contribution from a
    /// sniffer the layout does not know
    Failed(PositioningError),
}

impl FilterOutcome {
    pub fn position(&self) -> Option<ValidatedPosition> {
        match self {
            FilterOutcome::Accepted { position, .. } => Some(*position),
            _ => None,
        }
    }
}

/// Validation policy applied to every observation set in order:
/// minimum sniffers, solver degeneracy, double-negative discard,
/// single-negative clamp.
#[derive(Debug, Clone)]
pub struct ResultFilter {
    pub min_sniffers: usize,
}

impl Default for ResultFilter {
    fn default() -> Self {
        Self {
            min_sniffers: MIN_SNIFFERS,
        }
    }
}

impl ResultFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Step 1, checked before solving
    pub fn admit(&self, set: &ObservationSet) -> Result<(), FilterOutcome> {
        let distinct_sniffers = set.distinct_sniffers();
        if distinct_sniffers < self.min_sniffers {
            return Err(FilterOutcome::InsufficientObservations { distinct_sniffers });
        }
        Ok(())
    }

    /// Steps 2 to 4 on the solver result
    pub fn apply(&self, solved: Result<SolverSolution, PositioningError>) -> FilterOutcome {
        let solution = match solved {
            Ok(solution) => solution,
            Err(PositioningError::DegenerateGeometry {
                issue,
                condition_number,
                ..
            }) => {
                return FilterOutcome::DegenerateGeometry {
                    issue,
                    condition_number,
                }
            }
            Err(PositioningError::InsufficientObservations { available, .. }) => {
                return FilterOutcome::InsufficientObservations {
                    distinct_sniffers: available,
                }
            }
            Err(other) => return FilterOutcome::Failed(other),
        };

        let estimate = solution.position;
        if estimate.x < 0.0 && estimate.y < 0.0 {
            return FilterOutcome::Implausible { estimate };
        }

        let clamped = estimate.x < 0.0 || estimate.y < 0.0;
        FilterOutcome::Accepted {
            position: ValidatedPosition {
                x: estimate.x.max(0.0),
                y: estimate.y.max(0.0),
            },
            clamped,
        }
    }

    /// Run the whole policy for one set, invoking `solve` only when admitted
    pub fn evaluate<F>(&self, set: &ObservationSet, solve: F) -> FilterOutcome
    where
        F: FnOnce(&ObservationSet) -> Result<SolverSolution, PositioningError>,
    {
        if let Err(outcome) = self.admit(set) {
            return outcome;
        }
        self.apply(solve(set))
    }
}
