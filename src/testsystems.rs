//! Test systems with analytically known free energies

use crate::errors::*;
use crate::table::EnergyTable;
use ndarray::{array, Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;

/// Test cases using harmonic oscillators.
///
/// State `k` has the reduced potential $u_k(x) = \frac{\beta K_k}{2} (x - O_k)^2$, so samples
/// are normally distributed and the dimensionless free energies are known exactly.
///
/// # Examples
///
/// Generate energy samples with default parameters.
///
/// ```
/// use bar_rs::testsystems::*;
/// use ndarray::array;
///
/// let testcase = HarmonicOscillator::default();
/// let Sample { x_n, u_kn, n_k, s_n } = testcase.sample(array![10, 20, 30, 40, 50]).unwrap();
/// assert_eq!(u_kn.dim(), (5, 150));
/// ```
///
/// Generate reproducible samples with specified parameters.
///
/// ```
/// use bar_rs::testsystems::*;
/// use ndarray::array;
///
/// let testcase = HarmonicOscillator::builder()
///     .o_k(array![0.0, 0.5, 1.0])
///     .k_k(array![1.0, 1.0, 2.0])
///     .build()
///     .unwrap();
/// let first = testcase.sample_with_seed(array![5, 5, 5], 42).unwrap();
/// let again = testcase.sample_with_seed(array![5, 5, 5], 42).unwrap();
/// assert_eq!(first.x_n, again.x_n);
/// ```
#[derive(Builder, Debug, Clone)]
#[builder(build_fn(validate = "Self::validate", name = "build_inner", private))]
pub struct HarmonicOscillator {
    /// Offset parameters for each state.
    #[builder(default = "array![0.0, 1.0, 2.0, 3.0, 4.0]")]
    o_k: Array1<f64>,

    /// Force constants for each state.
    #[builder(default = "array![1.0, 2.0, 4.0, 8.0, 16.0]")]
    k_k: Array1<f64>,

    /// Inverse temperature
    #[builder(default = "1.0")]
    beta: f64,
}

impl HarmonicOscillatorBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        // unset fields take the five-state defaults
        let o_len = self.o_k.as_ref().map_or(5, |o_k| o_k.len());
        let k_len = self.k_k.as_ref().map_or(5, |k_k| k_k.len());
        if o_len != k_len {
            return Err(format!(
                "o_k and k_k must have equal lengths (not {} and {})",
                o_len, k_len
            ));
        }

        if let Some(k_k) = &self.k_k {
            if k_k.iter().any(|&k| !(k > 0.0)) {
                return Err("force constants must be positive".to_string());
            }
        }

        if let Some(beta) = self.beta {
            if !(beta > 0.0) {
                return Err(format!("beta must be positive (not {})", beta));
            }
        }

        Ok(())
    }

    /// Build the test system
    pub fn build(&self) -> Result<HarmonicOscillator> {
        Ok(self.build_inner()?)
    }
}

impl Default for HarmonicOscillator {
    fn default() -> Self {
        Self::builder()
            .build()
            .expect("HarmonicOscillator should not fail with default params")
    }
}

impl HarmonicOscillator {
    /// Get a new builder for the `HarmonicOscillator` struct.
    pub fn builder() -> HarmonicOscillatorBuilder {
        HarmonicOscillatorBuilder::default()
    }

    /// $K$, the number of states
    pub fn k(&self) -> usize {
        self.o_k.len()
    }

    /// Reduced potential of position `x` at state `k`
    pub fn reduced_potential(&self, k: usize, x: f64) -> f64 {
        0.5 * self.beta * self.k_k[k] * (x - self.o_k[k]).powi(2)
    }

    /// Mean position at each state
    pub fn analytical_means(&self) -> Array1<f64> {
        self.o_k.clone()
    }

    /// Variance of the position at each state
    pub fn analytical_variances(&self) -> Array1<f64> {
        self.k_k.mapv(|k| 1.0 / (self.beta * k))
    }

    /// Standard deviation of the position at each state
    pub fn analytical_standard_deviations(&self) -> Array1<f64> {
        self.analytical_variances().mapv(f64::sqrt)
    }

    /// Dimensionless free energy $f_k = -\ln \sqrt{2\pi / (\beta K_k)}$ of each state
    pub fn analytical_free_energies(&self) -> Array1<f64> {
        self.k_k.mapv(|k| -0.5 * (2.0 * PI / (self.beta * k)).ln())
    }

    /// Draw samples from the distribution with a random seed
    pub fn sample(&self, n_k: Array1<usize>) -> Result<Sample> {
        self.sample_inner(n_k, &mut ChaCha8Rng::from_entropy())
    }

    /// Draw samples from the distribution with a specified seed
    pub fn sample_with_seed(&self, n_k: Array1<usize>, seed: u64) -> Result<Sample> {
        self.sample_inner(n_k, &mut ChaCha8Rng::seed_from_u64(seed))
    }

    fn sample_inner<R: Rng>(&self, n_k: Array1<usize>, rng: &mut R) -> Result<Sample> {
        if n_k.len() != self.k() {
            return Err(BarError::ArrayLengthMismatch(n_k.len(), self.k()));
        }

        let sigma_k = self.analytical_standard_deviations();
        let mut x_n = Vec::with_capacity(n_k.sum());
        let mut s_n = Vec::with_capacity(n_k.sum());
        for (k, &n) in n_k.iter().enumerate() {
            let normal = Normal::new(self.o_k[k], sigma_k[k])
                .map_err(|e| BarError::BuilderError(e.to_string()))?;
            x_n.extend(normal.sample_iter(&mut *rng).take(n));
            s_n.extend(std::iter::repeat(k).take(n));
        }

        let x_n = Array1::from(x_n);
        let u_kn = Array2::from_shape_fn((self.k(), x_n.len()), |(k, n)| {
            self.reduced_potential(k, x_n[n])
        });

        Ok(Sample {
            x_n,
            u_kn,
            n_k,
            s_n: Array1::from(s_n),
        })
    }
}

/// A sample from a test case
#[derive(Debug, Clone)]
pub struct Sample {
    /// `x_n[n]` is sample n (in concatenated indexing)
    pub x_n: Array1<f64>,
    /// `u_kn[k,n]` is the reduced potential of sample n (in concatenated indexing) evaluated at state k.
    pub u_kn: Array2<f64>,
    /// `n_k[k]` is the number of samples generated from state k
    pub n_k: Array1<usize>,
    /// `s_n[n]` is the state of origin of `x_n[n]`
    pub s_n: Array1<usize>,
}

impl Sample {
    /// The samples as an energy table with states labelled by index
    pub fn energy_table(&self) -> Result<EnergyTable<usize>> {
        EnergyTable::from_u_kn(self.u_kn.view(), &self.s_n.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn build_harmonic_oscillator() {
        let testcase = HarmonicOscillator::builder().build().unwrap();
        assert_eq!(testcase.k(), 5);
        assert_eq!(testcase.beta, 1.0);

        let mismatched = HarmonicOscillator::builder()
            .o_k(array![0.0, 1.0])
            .k_k(array![1.0])
            .build();
        assert!(matches!(mismatched, Err(BarError::BuilderError(_))));

        let negative = HarmonicOscillator::builder()
            .k_k(array![1.0, 2.0, -4.0, 8.0, 16.0])
            .build();
        assert!(matches!(negative, Err(BarError::BuilderError(_))));
    }

    #[test]
    fn analytical_free_energies() {
        let testcase = HarmonicOscillator::default();
        let f_k = testcase.analytical_free_energies();

        assert_relative_eq!(f_k[0], -0.5 * (2.0 * PI).ln(), epsilon = 1e-12);
        // doubling the force constant raises f by ln(2) / 2
        for k in 1..f_k.len() {
            assert_relative_eq!(f_k[k] - f_k[k - 1], 0.5 * 2f64.ln(), epsilon = 1e-12);
        }
    }

    #[test]
    fn samples_are_labelled_by_origin() {
        let sample = HarmonicOscillator::default()
            .sample_with_seed(array![3, 0, 2, 1, 4], 3)
            .unwrap();

        assert_eq!(sample.x_n.len(), 10);
        assert_eq!(sample.s_n, array![0, 0, 0, 2, 2, 3, 4, 4, 4, 4]);
        assert_eq!(sample.u_kn.dim(), (5, 10));
        assert_eq!(sample.energy_table().unwrap().n_k(), vec![3, 0, 2, 1, 4]);

        let testcase = HarmonicOscillator::default();
        for n in 0..10 {
            for k in 0..5 {
                assert_eq!(
                    sample.u_kn[[k, n]],
                    testcase.reduced_potential(k, sample.x_n[n])
                );
            }
        }
    }

    #[test]
    fn sample_moments() {
        let testcase = HarmonicOscillator::default();
        let sample = testcase
            .sample_with_seed(array![5000, 5000, 5000, 5000, 5000], 11)
            .unwrap();

        let means = testcase.analytical_means();
        let sigmas = testcase.analytical_standard_deviations();
        for k in 0..5 {
            let x = sample.x_n.slice(ndarray::s![k * 5000..(k + 1) * 5000]);
            let mean = x.sum() / 5000.0;
            // 6 standard errors of the mean
            assert!((mean - means[k]).abs() < 6.0 * sigmas[k] / 5000f64.sqrt());
        }
    }

    #[test]
    fn wrong_number_of_states() {
        let result = HarmonicOscillator::default().sample_with_seed(array![1, 2], 0);
        assert!(matches!(result, Err(BarError::ArrayLengthMismatch(2, 5))));
    }
}
