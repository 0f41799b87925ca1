//! Pairwise BAR solvers for two adjacent states

use crate::errors::*;
use log::{debug, warn};
use ndarray::{Array1, ArrayView1};
use std::fmt;
use std::str::FromStr;

/// Bracket widenings attempted before giving up on finding a sign change
const MAX_BRACKET_WIDENINGS: usize = 64;

/// Root-finding routine used to solve the BAR self-consistency equation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarMethod {
    /// Regula falsi between the one-sided exponential estimates
    FalsePosition,
    /// Bennett's fixed-point iteration, starting from the initial guess
    SelfConsistentIteration,
    /// Interval halving between the one-sided exponential estimates
    Bisection,
}

impl Default for BarMethod {
    fn default() -> Self {
        Self::FalsePosition
    }
}

impl BarMethod {
    /// The name pymbar uses for this method
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FalsePosition => "false-position",
            Self::SelfConsistentIteration => "self-consistent-iteration",
            Self::Bisection => "bisection",
        }
    }
}

impl fmt::Display for BarMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BarMethod {
    type Err = BarError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "false-position" => Ok(Self::FalsePosition),
            "self-consistent-iteration" => Ok(Self::SelfConsistentIteration),
            "bisection" => Ok(Self::Bisection),
            other => Err(BarError::BuilderError(format!(
                "unknown BAR method {:?}; expected false-position, \
                 self-consistent-iteration or bisection",
                other
            ))),
        }
    }
}

/// Convergence parameters handed to a [`PairwiseSolver`] for a single pair of states
#[derive(Debug, Clone, PartialEq)]
pub struct SolverParams {
    /// Limit on the number of iterations performed
    pub maximum_iterations: usize,
    /// Relative change in the estimate below which the solver has converged
    pub relative_tolerance: f64,
    /// Starting estimate of the dimensionless free energy difference
    pub initial_guess: f64,
    /// Root-finding routine
    pub method: BarMethod,
    /// Log per-iteration diagnostics
    pub verbose: bool,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            maximum_iterations: 500,
            relative_tolerance: 1.0e-12,
            initial_guess: 0.0,
            method: BarMethod::default(),
            verbose: false,
        }
    }
}

/// A free energy difference between two states and its standard error
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairwiseEstimate {
    /// Dimensionless free energy difference $f_1 - f_0$
    pub df: f64,
    /// Standard error (one standard deviation) of `df`
    pub ddf: f64,
}

/// Something that estimates the free energy difference between two states from work values
///
/// `w_f` are forward work values from samples of the first state and `w_r` reverse work values
/// from samples of the second. Implementations must be deterministic: the same work values and
/// parameters must always give the same estimate.
///
/// Closures with the same signature implement this trait, which is convenient for tests.
pub trait PairwiseSolver {
    /// Estimate $f_1 - f_0$ and its standard error
    fn solve(
        &self,
        w_f: ArrayView1<'_, f64>,
        w_r: ArrayView1<'_, f64>,
        params: &SolverParams,
    ) -> Result<PairwiseEstimate>;
}

impl<F> PairwiseSolver for F
where
    F: Fn(ArrayView1<'_, f64>, ArrayView1<'_, f64>, &SolverParams) -> Result<PairwiseEstimate>,
{
    fn solve(
        &self,
        w_f: ArrayView1<'_, f64>,
        w_r: ArrayView1<'_, f64>,
        params: &SolverParams,
    ) -> Result<PairwiseEstimate> {
        self(w_f, w_r, params)
    }
}

/// Bennett acceptance ratio implemented in Rust
///
/// Solves
///
/// $$
///     \sum_{n=1}^{N_F} f(M + w_{F,n} - \Delta f) = \sum_{n=1}^{N_R} f(-M + w_{R,n} + \Delta f)
/// $$
///
/// for $\Delta f$, where $f(x) = 1 / (1 + e^x)$ is the Fermi function and $M = \ln(N_F / N_R)$.
/// The asymptotic variance is Eq. 10a of Bennett (1976), with the second denominator corrected.
///
/// # References
///
/// 1. Bennett CH. Efficient estimation of free energy differences from Monte Carlo data.
/// J. Comput. Phys. 22:245, 1976 <https://doi.org/10.1016/0021-9991(76)90078-4>
/// 2. Shirts MR, Bair E, Hooker G, and Pande VS. Equilibrium free energies from nonequilibrium
/// measurements using maximum-likelihood methods. PRL 91:140601, 2003
/// <https://doi.org/10.1103/PhysRevLett.91.140601>
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeBar;

impl PairwiseSolver for NativeBar {
    fn solve(
        &self,
        w_f: ArrayView1<'_, f64>,
        w_r: ArrayView1<'_, f64>,
        params: &SolverParams,
    ) -> Result<PairwiseEstimate> {
        let equation = BarEquation::new(w_f.view(), w_r.view())?;

        let df = match params.method {
            BarMethod::FalsePosition | BarMethod::Bisection => equation.solve_bracketed(params)?,
            BarMethod::SelfConsistentIteration => equation.solve_self_consistent(params)?,
        };
        let ddf = equation.uncertainty(df)?;

        if params.verbose {
            debug!("BAR ({}) converged: df = {:.8}, ddf = {:.8}", params.method, df, ddf);
        }

        Ok(PairwiseEstimate { df, ddf })
    }
}

/// One-sided exponential (Zwanzig) estimate of the free energy difference from work values
///
/// $\Delta f = -\ln \langle e^{-w} \rangle$. Returns NaN if `w` is empty.
pub fn exp_estimate(w: ArrayView1<'_, f64>) -> f64 {
    -logsumexp(&w.mapv(|w| -w)) + (w.len() as f64).ln()
}

/// $\ln \sum_i e^{a_i}$, without overflow
fn logsumexp(a: &Array1<f64>) -> f64 {
    let max = a.fold(f64::NEG_INFINITY, |m, &x| m.max(x));
    if a.is_empty() {
        return f64::NAN;
    }
    if !max.is_finite() {
        return max;
    }
    max + a.fold(0.0, |acc, &x| acc + (x - max).exp()).ln()
}

/// $\ln f(x) = -\ln(1 + e^x)$
fn log_fermi(x: f64) -> f64 {
    if x > 0.0 {
        -(x + (-x).exp().ln_1p())
    } else {
        -x.exp().ln_1p()
    }
}

struct BarEquation<'a> {
    w_f: ArrayView1<'a, f64>,
    w_r: ArrayView1<'a, f64>,
    /// $M = \ln(N_F / N_R)$
    m: f64,
}

impl<'a> BarEquation<'a> {
    fn new(w_f: ArrayView1<'a, f64>, w_r: ArrayView1<'a, f64>) -> Result<Self> {
        if w_f.is_empty() || w_r.is_empty() {
            return Err(BarError::NumericalFailure {
                position: None,
                reason: format!(
                    "BAR needs forward and reverse work values, got {} and {}",
                    w_f.len(),
                    w_r.len()
                ),
            });
        }
        if w_f.iter().chain(w_r.iter()).any(|w| w.is_nan()) {
            return Err(BarError::NumericalFailure {
                position: None,
                reason: "work values contain NaN".to_string(),
            });
        }

        let m = (w_f.len() as f64 / w_r.len() as f64).ln();
        Ok(Self { w_f, w_r, m })
    }

    /// Difference of the two sides of the BAR equation, in log space
    ///
    /// Monotonically increasing in `df`, with a single root at the BAR estimate.
    fn fzero(&self, df: f64) -> f64 {
        let m = self.m;
        let log_numer = logsumexp(&self.w_f.mapv(|w| log_fermi(m + w - df)));
        let log_denom = logsumexp(&self.w_r.mapv(|w| log_fermi(-m + w + df)));
        log_numer - log_denom
    }

    fn nan_check(&self, df: f64, f: f64) -> Result<()> {
        if f.is_nan() || df.is_nan() {
            Err(BarError::NumericalFailure {
                position: None,
                reason: format!("BAR equation evaluated to NaN at df = {}", df),
            })
        } else {
            Ok(())
        }
    }

    /// Find `(lo, f(lo)), (hi, f(hi))` with `f(lo) <= 0 <= f(hi)`
    fn bracket(&self) -> Result<((f64, f64), (f64, f64))> {
        let upper = exp_estimate(self.w_f);
        let lower = -exp_estimate(self.w_r);
        if !upper.is_finite() || !lower.is_finite() {
            return Err(BarError::NumericalFailure {
                position: None,
                reason: format!(
                    "one-sided estimates {} and {} cannot bracket the BAR estimate",
                    upper, lower
                ),
            });
        }

        let (mut lo, mut hi) = if lower <= upper {
            (lower, upper)
        } else {
            (upper, lower)
        };
        let mut f_lo = self.fzero(lo);
        let mut f_hi = self.fzero(hi);
        self.nan_check(lo, f_lo)?;
        self.nan_check(hi, f_hi)?;

        let mut widenings = 0;
        while f_lo > 0.0 || f_hi < 0.0 {
            if widenings == MAX_BRACKET_WIDENINGS {
                return Err(BarError::NumericalFailure {
                    position: None,
                    reason: format!(
                        "no sign change of the BAR equation in [{}, {}]",
                        lo, hi
                    ),
                });
            }
            let width = (hi - lo).max(0.1);
            if f_lo > 0.0 {
                lo -= width;
                f_lo = self.fzero(lo);
                self.nan_check(lo, f_lo)?;
            }
            if f_hi < 0.0 {
                hi += width;
                f_hi = self.fzero(hi);
                self.nan_check(hi, f_hi)?;
            }
            widenings += 1;
        }

        if widenings > 0 {
            warn!(
                "One-sided estimates did not bracket the BAR estimate; widened {} times to [{}, {}]",
                widenings, lo, hi
            );
        }

        Ok(((lo, f_lo), (hi, f_hi)))
    }

    fn solve_bracketed(&self, params: &SolverParams) -> Result<f64> {
        let ((mut lo, mut f_lo), (mut hi, mut f_hi)) = self.bracket()?;
        if f_lo == 0.0 {
            return Ok(lo);
        }
        if f_hi == 0.0 {
            return Ok(hi);
        }

        let mut df = params.initial_guess;
        let mut relative_change = f64::INFINITY;
        for iteration in 1..=params.maximum_iterations {
            let df_old = df;
            df = match params.method {
                BarMethod::Bisection => 0.5 * (lo + hi),
                _ => hi - f_hi * (hi - lo) / (f_hi - f_lo),
            };
            let f = self.fzero(df);
            self.nan_check(df, f)?;

            if params.verbose {
                debug!(
                    "iteration {}: bracket [{:.8}, {:.8}], df = {:.12}, fzero = {:e}",
                    iteration, lo, hi, df, f
                );
            }

            if f == 0.0 {
                return Ok(df);
            }
            if f > 0.0 {
                hi = df;
                f_hi = f;
            } else {
                lo = df;
                f_lo = f;
            }

            // a bisection midpoint of exactly zero says nothing about convergence
            if df == 0.0 {
                if params.method == BarMethod::FalsePosition {
                    return Ok(df);
                }
                continue;
            }
            relative_change = ((df - df_old) / df).abs();
            if relative_change < params.relative_tolerance {
                return Ok(df);
            }
        }

        Err(BarError::SolverNonconvergence {
            position: None,
            iterations: params.maximum_iterations,
            relative_change,
        })
    }

    fn solve_self_consistent(&self, params: &SolverParams) -> Result<f64> {
        let m = self.m;
        let mut df = params.initial_guess;
        let mut relative_change = f64::INFINITY;
        for iteration in 1..=params.maximum_iterations {
            let df_old = df;
            let log_numer = logsumexp(&self.w_r.mapv(|w| log_fermi(m - w - df_old) + m - w));
            let log_denom = logsumexp(&self.w_f.mapv(|w| log_fermi(m + w - df_old)));
            df = log_numer - log_denom;
            self.nan_check(df, df)?;

            if params.verbose {
                debug!("iteration {}: df = {:.12}", iteration, df);
            }

            if df == 0.0 {
                return Ok(df);
            }
            relative_change = ((df - df_old) / df).abs();
            if relative_change < params.relative_tolerance {
                return Ok(df);
            }
        }

        Err(BarError::SolverNonconvergence {
            position: None,
            iterations: params.maximum_iterations,
            relative_change,
        })
    }

    /// Standard error of the estimate `df`
    fn uncertainty(&self, df: f64) -> Result<f64> {
        let m = self.m;
        let log_f_f = self.w_f.mapv(|w| log_fermi(w + m - df));
        let log_f_r = self.w_r.mapv(|w| log_fermi(w - m + df));

        // sum(f^2) / sum(f)^2 for each direction
        let ratio = |log_f: &Array1<f64>| {
            (logsumexp(&log_f.mapv(|x| 2.0 * x)) - 2.0 * logsumexp(log_f)).exp()
        };
        let n_f = self.w_f.len() as f64;
        let n_r = self.w_r.len() as f64;
        let variance = ratio(&log_f_f) + ratio(&log_f_r) - (n_f + n_r) / (n_f * n_r);

        if variance.is_nan() {
            return Err(BarError::NumericalFailure {
                position: None,
                reason: format!("variance of the BAR estimate df = {} is NaN", df),
            });
        }

        Ok(variance.max(0.0).sqrt())
    }
}
