//! Error types

#[cfg(feature = "pymbar")]
use pyo3::prelude::PyErr;
use thiserror::Error;

/// Enum for errors in this crate
#[derive(Error, Debug)]
pub enum BarError {
    /// Error returned when a builder's `build()` was called improperly
    #[error("Could not build estimator: {0}")]
    BuilderError(String),

    /// Error returned when a state in the chain has no samples
    #[error("State {state} at chain position {position} has no samples")]
    InsufficientData {
        /// Label of the empty state
        state: String,
        /// Chain position (column index) of the empty state
        position: usize,
    },

    /// Error returned when the energy table's parts do not line up
    #[error("Misaligned energy table: {0}")]
    MisalignedInput(String),

    /// Error returned when the pairwise solver runs out of iterations
    #[error(
        "BAR did not converge{} after {iterations} iterations (last relative change {relative_change:e})",
        .position.map(|k| format!(" for chain position {}", k)).unwrap_or_default()
    )]
    SolverNonconvergence {
        /// Chain position `k` of the pair `(k, k+1)`; `None` outside of a chain
        position: Option<usize>,
        /// Number of iterations performed
        iterations: usize,
        /// Relative change of the estimate on the final iteration
        relative_change: f64,
    },

    /// Error returned when the BAR equation cannot be evaluated
    #[error("Numerical failure in BAR{}: {reason}", .position.map(|k| format!(" at chain position {}", k)).unwrap_or_default())]
    NumericalFailure {
        /// Chain position `k` of the pair `(k, k+1)`, if known
        position: Option<usize>,
        /// What went wrong
        reason: String,
    },

    /// Error returned when an array is the wrong length
    #[error("Array of length {0} is incorrect; length should be {1}")]
    ArrayLengthMismatch(usize, usize),

    /// Error returned by operations that exist for interface parity but are not implemented
    #[error("{0} is not supported by the BAR estimator")]
    Unsupported(&'static str),

    /// Error returned when a python exception is not handled
    #[cfg(feature = "pymbar")]
    #[error("Unexpected Python exception was not handled")]
    UnhandledPythonException {
        #[allow(missing_docs)]
        #[from]
        source: PyErr,
    },
}

impl BarError {
    /// Attach a chain position to errors raised by a solver that does not know where it sits
    pub(crate) fn at_position(self, k: usize) -> Self {
        match self {
            Self::SolverNonconvergence {
                position: None,
                iterations,
                relative_change,
            } => Self::SolverNonconvergence {
                position: Some(k),
                iterations,
                relative_change,
            },
            Self::NumericalFailure {
                position: None,
                reason,
            } => Self::NumericalFailure {
                position: Some(k),
                reason,
            },
            other => other,
        }
    }
}

impl From<String> for BarError {
    fn from(s: String) -> Self {
        Self::BuilderError(s)
    }
}

/// Result type for the bar-rs crate
pub type Result<T> = std::result::Result<T, BarError>;
