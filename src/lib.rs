#![warn(rust_2018_idioms, missing_docs, missing_debug_implementations)]

//! The Bennett acceptance ratio (BAR) method for free energy differences between a chain of
//! alchemical ("lambda") states.
//!
//! BAR is applied to each pair of adjacent states, using the reduced potentials of samples
//! from both states, and the pairwise results are chained into the free energy differences and
//! uncertainties between every pair of states.
//!
//! ```
//! use bar_rs::testsystems::HarmonicOscillator;
//! use bar_rs::Bar;
//! use ndarray::array;
//!
//! let sample = HarmonicOscillator::default()
//!     .sample_with_seed(array![200, 200, 200, 200, 200], 1)
//!     .unwrap();
//! let fit = Bar::default().fit(&sample.energy_table().unwrap()).unwrap();
//!
//! assert_eq!(fit.delta_f.dim(), (5, 5));
//! ```
//!
//! Please reference the following if you use this code in your research:
//!
//! [1] Bennett CH. Efficient estimation of free energy differences from Monte Carlo data.
//! J. Comput. Phys. 22:245, 1976. <https://doi.org/10.1016/0021-9991(76)90078-4>
//!
//! [2] Shirts MR, Bair E, Hooker G, and Pande VS. Equilibrium free energies from nonequilibrium
//! measurements using maximum-likelihood methods. PRL 91:140601, 2003.
//! <https://doi.org/10.1103/PhysRevLett.91.140601>

#[macro_use]
extern crate derive_builder;

pub mod bar;
pub mod chain;
pub mod errors;
#[cfg(feature = "pymbar")]
pub mod pymbar;
pub mod solver;
pub mod table;
pub mod testsystems;

pub use crate::bar::{Bar, BarBuilder, BarFit};
pub use crate::errors::{BarError, Result};
pub use crate::solver::{BarMethod, NativeBar, PairwiseEstimate, PairwiseSolver, SolverParams};
pub use crate::table::{EnergyTable, WorkPair};
