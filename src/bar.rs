//! Fit-style estimator chaining adjacent BAR estimates across every state

use crate::chain::{self, ChainMatrices};
use crate::errors::*;
use crate::solver::{BarMethod, NativeBar, PairwiseEstimate, PairwiseSolver, SolverParams};
use crate::table::{EnergyTable, WorkPair};
use log::{info, warn};
use ndarray::Array2;
use std::fmt::Debug;

/// Bennett acceptance ratio (BAR) between adjacent states, chained into all-pairs differences
///
/// Each adjacent pair of states `(k, k + 1)` in an [`EnergyTable`] is analysed with BAR, using
/// the samples drawn from `k` for the forward work and the samples drawn from `k + 1` for the
/// reverse work. Differences between non-adjacent states are sums along the chain, and their
/// uncertainties assume the adjacent estimates are independent.
///
/// # Notes
///
/// Note that this method assumes the data are uncorrelated.
///
/// Correlated data must be subsampled to extract uncorrelated (effectively independent) samples.
///
/// # References
///
/// 1. Bennett CH. Efficient estimation of free energy differences from Monte Carlo data.
/// J. Comput. Phys. 22:245, 1976 <https://doi.org/10.1016/0021-9991(76)90078-4>
///
/// # Examples
///
/// ```
/// use bar_rs::{Bar, EnergyTable};
/// use ndarray::array;
///
/// // every sample's energy at state 1 is 0.5 above its energy at state 0
/// let table = EnergyTable::new(
///     array![[0.1, 0.6], [0.4, 0.9], [1.2, 1.7], [0.3, 0.8]],
///     vec![0.0, 1.0],
///     vec![0.0, 0.0, 1.0, 1.0],
/// )
/// .unwrap();
///
/// let fit = Bar::default().fit(&table).unwrap();
/// assert!((fit.delta_f[[0, 1]] - 0.5).abs() < 1e-6);
/// assert_eq!(fit.delta_f[[1, 0]], -fit.delta_f[[0, 1]]);
/// ```
#[derive(Builder, Debug, Clone)]
#[builder(build_fn(validate = "Self::validate", name = "build_inner", private))]
pub struct Bar {
    /// Set to limit the maximum number of iterations performed
    #[builder(default = "10000")]
    maximum_iterations: usize,

    /// Set to determine the relative tolerance convergence criteria
    #[builder(default = "1.0e-7")]
    relative_tolerance: f64,

    /// Set to the initial dimensionless free energies to use as a guess
    ///
    /// Checked against the number of states, but not used by the adjacent-pair solves, which
    /// always start from zero.
    #[builder(setter(strip_option), default)]
    initial_f_k: Option<Vec<f64>>,

    /// The root-finding routine used for each adjacent pair
    #[builder(default)]
    method: BarMethod,

    /// Set to True if verbose debug output is desired
    #[builder(default = "false")]
    verbose: bool,
}

impl BarBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.maximum_iterations == Some(0) {
            return Err("maximum_iterations must be at least 1".to_string());
        }

        if let Some(tol) = self.relative_tolerance {
            if !(tol.is_finite() && tol > 0.0) {
                return Err(format!(
                    "relative_tolerance must be positive and finite (not {})",
                    tol
                ));
            }
        }

        if let Some(Some(f_k)) = &self.initial_f_k {
            if f_k.iter().any(|f| !f.is_finite()) {
                return Err("initial_f_k must be finite".to_string());
            }
        }

        Ok(())
    }

    /// Build the estimator and log progress of every pairwise solve
    pub fn build_verbose(&self) -> Result<Bar> {
        let mut new = self.build_inner()?;
        new.verbose = true;
        Ok(new)
    }

    /// Build the estimator
    pub fn build(&self) -> Result<Bar> {
        Ok(self.build_inner()?)
    }
}

impl Default for Bar {
    fn default() -> Self {
        Self::builder()
            .build()
            .expect("Bar should not fail with default params")
    }
}

/// Free energy differences between every pair of states in a chain
#[derive(Debug, Clone, PartialEq)]
pub struct BarFit<S> {
    /// States for which free energy differences were obtained, in chain order
    pub states: Vec<S>,
    /// `delta_f[[i, j]]` is the dimensionless free energy difference $f_j - f_i$
    pub delta_f: Array2<f64>,
    /// `d_delta_f[[i, j]]` is the uncertainty (one standard deviation) in `delta_f[[i, j]]`
    pub d_delta_f: Array2<f64>,
    /// `estimates[k]` is the BAR estimate between states `k` and `k + 1`
    pub estimates: Vec<PairwiseEstimate>,
}

impl<S: PartialEq> BarFit<S> {
    fn position(&self, state: &S) -> Option<usize> {
        self.states.iter().position(|s| s == state)
    }

    /// $f_{to} - f_{from}$, or `None` if either state is unknown
    pub fn delta_f_between(&self, from: &S, to: &S) -> Option<f64> {
        Some(self.delta_f[[self.position(from)?, self.position(to)?]])
    }

    /// Uncertainty in $f_{to} - f_{from}$, or `None` if either state is unknown
    pub fn d_delta_f_between(&self, from: &S, to: &S) -> Option<f64> {
        Some(self.d_delta_f[[self.position(from)?, self.position(to)?]])
    }
}

impl Bar {
    /// Get a new builder for the `Bar` struct.
    pub fn builder() -> BarBuilder {
        BarBuilder::default()
    }

    /// The iteration limit handed to each pairwise solve
    pub fn maximum_iterations(&self) -> usize {
        self.maximum_iterations
    }

    /// The relative tolerance handed to each pairwise solve
    pub fn relative_tolerance(&self) -> f64 {
        self.relative_tolerance
    }

    /// The initial free energies, if any were given
    pub fn initial_f_k(&self) -> Option<&[f64]> {
        self.initial_f_k.as_deref()
    }

    /// The root-finding routine handed to each pairwise solve
    pub fn method(&self) -> BarMethod {
        self.method
    }

    /// Whether pairwise solves log their progress
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Parameters for the solve of a single adjacent pair
    pub fn solver_params(&self) -> SolverParams {
        SolverParams {
            maximum_iterations: self.maximum_iterations,
            relative_tolerance: self.relative_tolerance,
            initial_guess: 0.0,
            method: self.method,
            verbose: self.verbose,
        }
    }

    /// Estimate free energy differences between all states with the built-in BAR solver
    pub fn fit<S: Clone + Debug>(&self, u_nk: &EnergyTable<S>) -> Result<BarFit<S>> {
        self.fit_with(u_nk, &NativeBar)
    }

    /// Estimate free energy differences between all states with the given pairwise solver
    ///
    /// Fails without producing any differences if a state has no samples or if any pairwise
    /// solve fails.
    pub fn fit_with<S, P>(&self, u_nk: &EnergyTable<S>, solver: &P) -> Result<BarFit<S>>
    where
        S: Clone + Debug,
        P: PairwiseSolver + Sync + ?Sized,
    {
        if let Some(f_k) = &self.initial_f_k {
            if f_k.len() != u_nk.k() {
                return Err(BarError::ArrayLengthMismatch(f_k.len(), u_nk.k()));
            }
            warn!("initial_f_k is accepted but not used; each adjacent pair starts from zero");
        }

        let pairs = u_nk.work_pairs()?;
        let params = self.solver_params();
        let estimates = solve_pairs(&pairs, solver, &params)?;

        if self.verbose {
            for (pair, est) in pairs.iter().zip(&estimates) {
                let k = pair.position;
                info!(
                    "BAR {:?} -> {:?} ({} forward, {} reverse): df = {:.6} +- {:.6}",
                    u_nk.states()[k],
                    u_nk.states()[k + 1],
                    pair.w_f.len(),
                    pair.w_r.len(),
                    est.df,
                    est.ddf
                );
            }
        }

        let deltas: Vec<f64> = estimates.iter().map(|est| est.df).collect();
        let variances: Vec<f64> = estimates.iter().map(|est| est.ddf * est.ddf).collect();
        let ChainMatrices { delta_f, d_delta_f } = chain::assemble(&deltas, &variances)?;

        Ok(BarFit {
            states: u_nk.states().to_vec(),
            delta_f,
            d_delta_f,
            estimates,
        })
    }

    /// Reweighting to new states is not part of BAR; always fails with [`BarError::Unsupported`]
    pub fn predict<S>(&self, _u_ln: &EnergyTable<S>) -> Result<Array2<f64>> {
        Err(BarError::Unsupported("predict"))
    }
}

fn solve_pair<P>(pair: &WorkPair, solver: &P, params: &SolverParams) -> Result<PairwiseEstimate>
where
    P: PairwiseSolver + ?Sized,
{
    solver
        .solve(pair.w_f.view(), pair.w_r.view(), params)
        .map_err(|e| e.at_position(pair.position))
}

#[cfg(not(feature = "parallel"))]
fn solve_pairs<P>(
    pairs: &[WorkPair],
    solver: &P,
    params: &SolverParams,
) -> Result<Vec<PairwiseEstimate>>
where
    P: PairwiseSolver + Sync + ?Sized,
{
    pairs
        .iter()
        .map(|pair| solve_pair(pair, solver, params))
        .collect()
}

#[cfg(feature = "parallel")]
fn solve_pairs<P>(
    pairs: &[WorkPair],
    solver: &P,
    params: &SolverParams,
) -> Result<Vec<PairwiseEstimate>>
where
    P: PairwiseSolver + Sync + ?Sized,
{
    use rayon::prelude::*;

    // collect keeps chain order
    pairs
        .par_iter()
        .map(|pair| solve_pair(pair, solver, params))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsystems::HarmonicOscillator;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, ArrayView1};

    /// `df` is the mean forward work, `ddf` shrinks with the number of samples
    fn mean_work(
        w_f: ArrayView1<'_, f64>,
        w_r: ArrayView1<'_, f64>,
        _: &SolverParams,
    ) -> Result<PairwiseEstimate> {
        Ok(PairwiseEstimate {
            df: w_f.sum() / w_f.len() as f64,
            ddf: 1.0 / (w_f.len() + w_r.len()) as f64,
        })
    }

    fn never_called(
        _: ArrayView1<'_, f64>,
        _: ArrayView1<'_, f64>,
        _: &SolverParams,
    ) -> Result<PairwiseEstimate> {
        panic!("solver must not run")
    }

    fn fails_on_single_forward_sample(
        w_f: ArrayView1<'_, f64>,
        w_r: ArrayView1<'_, f64>,
        params: &SolverParams,
    ) -> Result<PairwiseEstimate> {
        if w_f.len() == 1 {
            Err(BarError::SolverNonconvergence {
                position: None,
                iterations: params.maximum_iterations,
                relative_change: 1.0,
            })
        } else {
            mean_work(w_f, w_r, params)
        }
    }

    fn four_state_table() -> EnergyTable<&'static str> {
        EnergyTable::new(
            array![
                [0.0, 1.0, 3.0, 6.0],
                [0.2, 1.4, 3.0, 7.0],
                [2.0, 0.0, 0.5, 2.0],
                [2.5, 0.1, 0.4, 1.0],
                [2.1, 0.2, 0.9, 3.0],
                [4.0, 1.0, 0.0, 2.5],
                [9.0, 4.0, 1.0, 0.0],
                [8.0, 5.0, 1.5, 0.5],
            ],
            vec!["a", "b", "c", "d"],
            vec!["a", "a", "b", "b", "b", "c", "d", "d"],
        )
        .unwrap()
    }

    #[test]
    fn build_bar() {
        let bar = Bar::builder().build().unwrap();

        assert_eq!(bar.maximum_iterations(), 10000);
        assert_eq!(bar.relative_tolerance(), 1.0e-7);
        assert_eq!(bar.initial_f_k(), None);
        assert_eq!(bar.method(), BarMethod::FalsePosition);
        assert!(!bar.verbose());

        let verbose = Bar::builder()
            .method(BarMethod::Bisection)
            .maximum_iterations(50)
            .build_verbose()
            .unwrap();
        assert!(verbose.verbose());
        assert_eq!(
            verbose.solver_params(),
            SolverParams {
                maximum_iterations: 50,
                relative_tolerance: 1.0e-7,
                initial_guess: 0.0,
                method: BarMethod::Bisection,
                verbose: true,
            }
        );
    }

    #[test]
    fn builder_rejects_bad_convergence_params() {
        assert!(matches!(
            Bar::builder().maximum_iterations(0).build(),
            Err(BarError::BuilderError(_))
        ));
        assert!(matches!(
            Bar::builder().relative_tolerance(-1.0).build(),
            Err(BarError::BuilderError(_))
        ));
        assert!(matches!(
            Bar::builder().relative_tolerance(f64::NAN).build(),
            Err(BarError::BuilderError(_))
        ));
        assert!(matches!(
            Bar::builder().initial_f_k(vec![0.0, f64::INFINITY]).build(),
            Err(BarError::BuilderError(_))
        ));
    }

    #[test]
    fn adjacent_entries_are_the_pairwise_estimates() {
        let fit = Bar::default()
            .fit_with(&four_state_table(), &mean_work)
            .unwrap();

        assert_eq!(fit.states, vec!["a", "b", "c", "d"]);
        // forward work from a: (1.0 + 1.2) / 2, from b: (0.5 + 0.3 + 0.7) / 3, from c: 2.5
        let expected = [1.1, 0.5, 2.5];
        let expected_ddf = [1.0 / 5.0, 1.0 / 4.0, 1.0 / 3.0];
        for k in 0..3 {
            assert_abs_diff_eq!(fit.delta_f[[k, k + 1]], expected[k], epsilon = 1e-12);
            assert_eq!(fit.delta_f[[k, k + 1]], fit.estimates[k].df);
            assert_abs_diff_eq!(fit.d_delta_f[[k, k + 1]], expected_ddf[k], epsilon = 1e-12);
        }

        assert_abs_diff_eq!(fit.delta_f[[0, 3]], 4.1, epsilon = 1e-12);
        assert_abs_diff_eq!(fit.delta_f[[3, 1]], -3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            fit.d_delta_f[[0, 2]],
            (0.04f64 + 0.0625).sqrt(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn matrices_are_antisymmetric_and_symmetric() {
        let fit = Bar::default()
            .fit_with(&four_state_table(), &mean_work)
            .unwrap();
        let k = fit.states.len();

        for i in 0..k {
            assert_eq!(fit.delta_f[[i, i]], 0.0);
            assert_eq!(fit.d_delta_f[[i, i]], 0.0);
            for j in 0..k {
                assert_eq!(fit.delta_f[[i, j]], -fit.delta_f[[j, i]]);
                assert_eq!(fit.d_delta_f[[i, j]], fit.d_delta_f[[j, i]]);
                assert!(fit.d_delta_f[[i, j]] >= 0.0);
            }
        }
    }

    #[test]
    fn two_state_scenario_matches_the_solver() {
        let table = EnergyTable::new(
            array![[0.0, 1.25], [0.5, 1.0], [0.25, 2.0], [1.5, 0.25], [0.75, 0.0]],
            vec!["0.0", "1.0"],
            vec!["0.0", "0.0", "0.0", "1.0", "1.0"],
        )
        .unwrap();

        let bar = Bar::default();
        let fit = bar.fit(&table).unwrap();
        let expected = NativeBar
            .solve(
                array![1.25, 0.5, 1.75].view(),
                array![1.25, 0.75].view(),
                &bar.solver_params(),
            )
            .unwrap();

        let (x, y) = (expected.df, expected.ddf);
        assert_eq!(fit.delta_f, array![[0.0, x], [-x, 0.0]]);
        assert_eq!(fit.d_delta_f.diag(), array![0.0, 0.0]);
        assert_abs_diff_eq!(fit.d_delta_f[[0, 1]], y, epsilon = 1e-15);
        assert_abs_diff_eq!(fit.d_delta_f[[1, 0]], y, epsilon = 1e-15);
    }

    #[test]
    fn three_state_scenario_chains_the_pairs() {
        let table = EnergyTable::new(
            array![
                [0.0, 0.8, 2.0],
                [0.3, 0.7, 2.2],
                [1.1, 0.2, 0.9],
                [0.9, 0.0, 1.4],
                [2.4, 0.6, 0.1],
                [2.0, 1.2, 0.0],
            ],
            vec![0, 1, 2],
            vec![0, 0, 1, 1, 2, 2],
        )
        .unwrap();

        let fit = Bar::default().fit(&table).unwrap();
        let (df0, ddf0) = (fit.estimates[0].df, fit.estimates[0].ddf);
        let (df1, ddf1) = (fit.estimates[1].df, fit.estimates[1].ddf);

        assert_eq!(fit.delta_f[[0, 1]], df0);
        assert_eq!(fit.delta_f[[1, 2]], df1);
        assert_eq!(fit.delta_f[[0, 2]], df0 + df1);
        assert_eq!(fit.d_delta_f[[0, 2]], (ddf0 * ddf0 + ddf1 * ddf1).sqrt());
    }

    #[test]
    fn empty_state_fails_before_solving() {
        let table = EnergyTable::new(
            array![[0.0, 1.0, 2.0], [1.0, 0.0, 1.0]],
            vec!["a", "b", "c"],
            vec!["a", "b"],
        )
        .unwrap();

        match Bar::default().fit_with(&table, &never_called) {
            Err(BarError::InsufficientData { position, .. }) => assert_eq!(position, 2),
            other => panic!("expected InsufficientData, got {:?}", other),
        }
    }

    #[test]
    fn solver_failure_aborts_with_its_position() {
        match Bar::default().fit_with(&four_state_table(), &fails_on_single_forward_sample) {
            Err(BarError::SolverNonconvergence {
                position,
                iterations,
                ..
            }) => {
                assert_eq!(position, Some(2));
                assert_eq!(iterations, 10000);
            }
            other => panic!("expected SolverNonconvergence, got {:?}", other),
        }
    }

    #[test]
    fn initial_f_k_must_match_the_states() {
        let bar = Bar::builder()
            .initial_f_k(vec![0.0, 1.0])
            .build()
            .unwrap();

        match bar.fit_with(&four_state_table(), &never_called) {
            Err(BarError::ArrayLengthMismatch(given, expected)) => {
                assert_eq!((given, expected), (2, 4));
            }
            other => panic!("expected ArrayLengthMismatch, got {:?}", other),
        }

        let bar = Bar::builder()
            .initial_f_k(vec![0.0, 100.0, -3.0, 7.0])
            .build()
            .unwrap();
        let with_guess = bar.fit_with(&four_state_table(), &mean_work).unwrap();
        let without = Bar::default()
            .fit_with(&four_state_table(), &mean_work)
            .unwrap();
        assert_eq!(with_guess, without);
    }

    #[test]
    fn repeated_fits_are_identical() {
        let sample = HarmonicOscillator::default()
            .sample_with_seed(array![40, 40, 40, 40, 40], 7)
            .unwrap();
        let table = sample.energy_table().unwrap();

        let bar = Bar::default();
        assert_eq!(bar.fit(&table).unwrap(), bar.fit(&table).unwrap());
    }

    #[test]
    fn agrees_with_analytical_harmonic_oscillators() {
        let testcase = HarmonicOscillator::default();
        let sample = testcase
            .sample_with_seed(array![2000, 2000, 2000, 2000, 2000], 1234)
            .unwrap();
        let fit = Bar::default().fit(&sample.energy_table().unwrap()).unwrap();

        let f_k = testcase.analytical_free_energies();
        for j in 1..f_k.len() {
            let error = (fit.delta_f[[0, j]] - (f_k[j] - f_k[0])).abs();
            assert!(
                error < 6.0 * fit.d_delta_f[[0, j]] + 0.01,
                "state {}: BAR {} +- {}, analytical {}",
                j,
                fit.delta_f[[0, j]],
                fit.d_delta_f[[0, j]],
                f_k[j] - f_k[0]
            );
        }
    }

    #[test]
    fn lookup_by_label() {
        let fit = Bar::default()
            .fit_with(&four_state_table(), &mean_work)
            .unwrap();

        assert_eq!(fit.delta_f_between(&"b", &"d"), Some(fit.delta_f[[1, 3]]));
        assert_eq!(fit.d_delta_f_between(&"d", &"b"), Some(fit.d_delta_f[[3, 1]]));
        assert_eq!(fit.delta_f_between(&"a", &"z"), None);
    }

    #[test]
    fn predict_is_unsupported() {
        assert!(matches!(
            Bar::default().predict(&four_state_table()),
            Err(BarError::Unsupported("predict"))
        ));
    }
}
