//! Error type shared by the symbolic, dynamics and power-flow layers.

use thiserror::Error;

/// Errors raised by the crate.
///
/// Numerical non-convergence of a single power-flow method is not an error:
/// it is recorded in the [`ConvergenceReport`](crate::powerflow::ConvergenceReport)
/// and the dispatcher moves on to the next candidate method.
#[derive(Error, Debug)]
pub enum GridError {
    /// An expression referenced a variable with no bound value.
    #[error("unbound variable `{0}`")]
    UnboundVariable(String),

    /// Equation and variable lists of a block differ in length.
    #[error("{kind} equations ({equations}) do not match {kind} variables ({variables})")]
    ShapeMismatch {
        kind: &'static str,
        equations: usize,
        variables: usize,
    },

    /// The same variable was registered twice while flattening a block tree.
    #[error("variable `{name}` registered as {first} and again as {second}")]
    DuplicateVariable {
        name: String,
        first: &'static str,
        second: &'static str,
    },

    /// An initial-value mapping lacks a flattened variable.
    #[error("no value given for variable `{0}`")]
    MissingVariable(String),

    /// The Newton corrector of a time step did not converge.
    #[error("step ending at t={time} diverged after {iterations} iterations (|r|={residual:e})")]
    StepDiverged {
        time: f64,
        iterations: usize,
        residual: f64,
    },

    /// A power-flow method name or kernel is not available.
    #[error("unsupported power flow solver `{0}`")]
    UnsupportedSolver(String),

    #[error("unknown integration method `{0}`")]
    UnknownIntegrationMethod(String),

    #[error("invalid time grid: {0}")]
    InvalidTimeGrid(String),

    /// Vector lengths handed to a solver do not fit the compiled system.
    #[error("dimension mismatch for {what}: expected {expected}, got {got}")]
    Dimension {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// A sparse factorisation failed.
    #[error("linear solve failed: {0}")]
    LinearSolve(&'static str),

    /// Every configured power-flow method failed to converge.
    #[error("power flow did not converge with any of the configured methods")]
    NoConvergence,

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used across the crate.
pub type GridResult<T> = Result<T, GridError>;

impl From<&'static str> for GridError {
    fn from(msg: &'static str) -> Self {
        GridError::LinearSolve(msg)
    }
}
