//! Reduced potential tables and extraction of work values between adjacent states

use crate::errors::*;
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use std::fmt::Debug;

/// A table of reduced potential energies of samples drawn from a chain of states
///
/// `u_nk[n, k]` is the reduced potential energy of sample `n` evaluated at state `k`. Each sample
/// is tagged with the time it was recorded and the state it was drawn from (its origin). The
/// column order defines the chain: states `k` and `k + 1` are adjacent.
///
/// Samples are stored ordered by the chain position of their origin, then by time. Ties keep
/// the order they were supplied in, so the same input always yields the same work values.
///
/// # Examples
///
/// ```
/// use bar_rs::table::EnergyTable;
/// use ndarray::array;
///
/// let table = EnergyTable::new(
///     array![[0.0, 1.0], [0.5, 1.5], [2.0, 0.0]],
///     vec!["coul-0.0", "coul-1.0"],
///     vec!["coul-0.0", "coul-0.0", "coul-1.0"],
/// )
/// .unwrap();
///
/// assert_eq!(table.n_k(), vec![2, 1]);
/// ```
#[derive(Debug, Clone)]
pub struct EnergyTable<S> {
    /// Column labels, in chain order
    states: Vec<S>,
    /// `u_nk[n, k]`, rows in canonical order
    u_nk: Array2<f64>,
    /// `times[n]` is the time at which sample `n` was recorded
    times: Array1<f64>,
    /// `s_n[n]` is the chain position of the origin of sample `n`
    s_n: Vec<usize>,
    /// `offsets[k]..offsets[k + 1]` are the rows drawn from state `k`
    offsets: Vec<usize>,
}

/// Forward and reverse work values between chain positions `k` and `k + 1`
#[derive(Debug, Clone, PartialEq)]
pub struct WorkPair {
    /// Chain position `k` of the first state of the pair
    pub position: usize,
    /// `w_f[n] = u_{k+1}(x_n) - u_k(x_n)` for samples `x_n` drawn from state `k`
    pub w_f: Array1<f64>,
    /// `w_r[n] = u_k(x_n) - u_{k+1}(x_n)` for samples `x_n` drawn from state `k + 1`
    pub w_r: Array1<f64>,
}

impl<S: Clone + PartialEq + Debug> EnergyTable<S> {
    /// Build a table whose samples are timestamped by their position in the input
    pub fn new(u_nk: Array2<f64>, states: Vec<S>, origins: Vec<S>) -> Result<Self> {
        let times = (0..u_nk.len_of(Axis(0))).map(|n| n as f64).collect();
        Self::with_times(u_nk, states, times, origins)
    }

    /// Build a table from potentials, column labels, sample times and origin labels
    pub fn with_times(
        u_nk: Array2<f64>,
        states: Vec<S>,
        times: Array1<f64>,
        origins: Vec<S>,
    ) -> Result<Self> {
        if states.is_empty() {
            return Err(BarError::MisalignedInput(
                "the energy table has no state columns".to_string(),
            ));
        }

        let n_tot = u_nk.len_of(Axis(0));
        if u_nk.len_of(Axis(1)) != states.len() {
            return Err(BarError::MisalignedInput(format!(
                "u_nk has {} columns but {} states are labelled",
                u_nk.len_of(Axis(1)),
                states.len()
            )));
        }
        if origins.len() != n_tot {
            return Err(BarError::MisalignedInput(format!(
                "u_nk has {} rows but {} origin labels were given",
                n_tot,
                origins.len()
            )));
        }
        if times.len() != n_tot {
            return Err(BarError::MisalignedInput(format!(
                "u_nk has {} rows but {} sample times were given",
                n_tot,
                times.len()
            )));
        }

        for (k, state) in states.iter().enumerate() {
            if states[..k].contains(state) {
                return Err(BarError::MisalignedInput(format!(
                    "state {:?} labels more than one column",
                    state
                )));
            }
        }

        let s_n = origins
            .iter()
            .map(|origin| {
                states.iter().position(|s| s == origin).ok_or_else(|| {
                    BarError::MisalignedInput(format!(
                        "origin state {:?} is not one of the table's columns",
                        origin
                    ))
                })
            })
            .collect::<Result<Vec<usize>>>()?;

        // sort_by is stable, so samples with equal origin and time keep their input order
        let mut order: Vec<usize> = (0..n_tot).collect();
        order.sort_by(|&a, &b| s_n[a].cmp(&s_n[b]).then(times[a].total_cmp(&times[b])));

        let u_nk = u_nk.select(Axis(0), &order);
        let times = times.select(Axis(0), &order);
        let s_n: Vec<usize> = order.iter().map(|&n| s_n[n]).collect();

        let mut offsets = vec![0; states.len() + 1];
        for &k in &s_n {
            offsets[k + 1] += 1;
        }
        for k in 0..states.len() {
            offsets[k + 1] += offsets[k];
        }

        Ok(Self {
            states,
            u_nk,
            times,
            s_n,
            offsets,
        })
    }
}

impl EnergyTable<usize> {
    /// Build a table from a `u_kn` matrix and per-sample state indices
    ///
    /// This is the layout pymbar-style test systems produce: `u_kn[k, n]` is the reduced potential
    /// of sample `n` at state `k` and `s_n[n]` is the index of the state sample `n` came from.
    /// States are labelled by their index.
    pub fn from_u_kn(u_kn: ArrayView2<'_, f64>, s_n: &[usize]) -> Result<Self> {
        let states = (0..u_kn.len_of(Axis(0))).collect();
        Self::new(u_kn.t().to_owned(), states, s_n.to_vec())
    }
}

impl<S> EnergyTable<S> {
    /// $K$, the number of states in the chain
    pub fn k(&self) -> usize {
        self.states.len()
    }

    /// $N_{tot}$, the total number of samples from all states
    pub fn n_tot(&self) -> usize {
        self.u_nk.len_of(Axis(0))
    }

    /// State labels in chain order
    pub fn states(&self) -> &[S] {
        &self.states
    }

    /// `u_nk[n, k]`, with rows sorted by origin and then time
    pub fn u_nk(&self) -> &Array2<f64> {
        &self.u_nk
    }

    /// Sample times, in the same order as the rows of `u_nk()`
    pub fn times(&self) -> &Array1<f64> {
        &self.times
    }

    /// Chain position of each sample's origin, in the same order as the rows of `u_nk()`
    pub fn s_n(&self) -> &[usize] {
        &self.s_n
    }

    /// `n_k[k]` is the number of samples drawn from state `k`
    pub fn n_k(&self) -> Vec<usize> {
        self.offsets.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// The samples drawn from state `k`; empty if `k` was never sampled
    ///
    /// # Panics
    ///
    /// If `k` is not a chain position, i.e. `k >= self.k()`.
    pub fn group(&self, k: usize) -> ArrayView2<'_, f64> {
        self.u_nk.slice(s![self.offsets[k]..self.offsets[k + 1], ..])
    }
}

impl<S: Debug> EnergyTable<S> {
    /// Check that every state in the chain has at least one sample
    pub fn check_sampled(&self) -> Result<()> {
        match self.n_k().iter().position(|&n| n == 0) {
            Some(k) => Err(BarError::InsufficientData {
                state: format!("{:?}", self.states[k]),
                position: k,
            }),
            None => Ok(()),
        }
    }

    /// Extract the forward and reverse work values for every adjacent pair of states
    ///
    /// Returns `K - 1` pairs in chain order. Fails with [`BarError::InsufficientData`] if any
    /// state has no samples, before any work values are computed.
    pub fn work_pairs(&self) -> Result<Vec<WorkPair>> {
        self.check_sampled()?;

        Ok((0..self.k().saturating_sub(1))
            .map(|k| {
                let from_k = self.group(k);
                let from_k1 = self.group(k + 1);
                WorkPair {
                    position: k,
                    w_f: &from_k.column(k + 1) - &from_k.column(k),
                    w_r: &from_k1.column(k) - &from_k1.column(k + 1),
                }
            })
            .collect())
    }
}
