//! Pairwise solves delegated to pymbar

use crate::errors::*;
use crate::solver::{PairwiseEstimate, PairwiseSolver, SolverParams};
use ndarray::ArrayView1;
use numpy::PyArray;
use pyo3::prelude::*;
use pyo3::types::PyDict;

/// BAR as implemented by `pymbar.BAR`
///
/// Requires a Python interpreter with pymbar 3 importable. The solver parameters are passed as
/// pymbar's `DeltaF`, `maximum_iterations`, `relative_tolerance`, `method` and `verbose`
/// arguments; Python exceptions, including pymbar's convergence failures, are returned as
/// [`BarError::UnhandledPythonException`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PymbarBar;

impl PairwiseSolver for PymbarBar {
    fn solve(
        &self,
        w_f: ArrayView1<'_, f64>,
        w_r: ArrayView1<'_, f64>,
        params: &SolverParams,
    ) -> Result<PairwiseEstimate> {
        Python::with_gil(|py| {
            let bar = py.import("pymbar")?.get("BAR")?;
            let kwargs: &PyDict = PyDict::new(py);
            kwargs.set_item("DeltaF", params.initial_guess)?;
            kwargs.set_item("compute_uncertainty", true)?;
            kwargs.set_item("maximum_iterations", params.maximum_iterations)?;
            kwargs.set_item("relative_tolerance", params.relative_tolerance)?;
            kwargs.set_item("method", params.method.as_str())?;
            kwargs.set_item("verbose", params.verbose)?;

            let (df, ddf): (f64, f64) = PyAny::call(
                bar,
                (PyArray::from_array(py, &w_f), PyArray::from_array(py, &w_r)),
                Some(kwargs),
            )?
            .extract()?;

            Ok(PairwiseEstimate { df, ddf })
        })
    }
}
