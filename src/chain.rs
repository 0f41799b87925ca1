//! Assembly of all-pairs free energy differences from adjacent-pair estimates
//!
//! Given estimates $\Delta f_k$ of $f_{k+1} - f_k$ with variances $\sigma_k^2$ for
//! `k in 0..K-1`, the difference between any two states `i < j` is the sum along the chain,
//!
//! $$
//!     \Delta f_{ij} = \sum_{k=i}^{j-1} \Delta f_k, \qquad
//!     \delta\Delta f_{ij} = \sqrt{\sum_{k=i}^{j-1} \sigma_k^2}
//! $$
//!
//! assuming the adjacent estimates are statistically independent.

use crate::errors::*;
use ndarray::Array2;

/// $\Delta f_{ij}$ and its uncertainty for every pair of states in a chain
#[derive(Debug, Clone, PartialEq)]
pub struct ChainMatrices {
    /// `delta_f[[i, j]]` is $f_j - f_i$. Antisymmetric with a zero diagonal.
    pub delta_f: Array2<f64>,
    /// `d_delta_f[[i, j]]` is the standard error of `delta_f[[i, j]]`. Symmetric with a zero
    /// diagonal.
    pub d_delta_f: Array2<f64>,
}

/// Build the full difference and uncertainty matrices from adjacent-pair estimates
///
/// `deltas[k]` is the free energy difference between chain positions `k` and `k + 1` and
/// `variances[k]` its squared standard error. The result is `(K, K)` with `K = deltas.len() + 1`.
/// Fails with [`BarError::ArrayLengthMismatch`] if the two slices differ in length.
///
/// The `j`-th superdiagonal is filled with sums over `j` consecutive steps, each accumulated as
/// `deltas[i] + (deltas[i + 1] + ... + deltas[i + j - 1])`. The parenthesised tail is summed the
/// way numpy sums a contiguous array (see [`pairwise_sum`]), so results agree bitwise with
/// `deltas[i] + deltas[i+1:i+j].sum()`.
///
/// # Examples
///
/// ```
/// use bar_rs::chain::assemble;
/// use ndarray::array;
///
/// let m = assemble(&[1.0, 2.0], &[0.09, 0.16]).unwrap();
///
/// assert_eq!(m.delta_f, array![[0.0, 1.0, 3.0], [-1.0, 0.0, 2.0], [-3.0, -2.0, 0.0]]);
/// assert!((m.d_delta_f[[0, 2]] - 0.5).abs() < 1e-12);
/// ```
pub fn assemble(deltas: &[f64], variances: &[f64]) -> Result<ChainMatrices> {
    if deltas.len() != variances.len() {
        return Err(BarError::ArrayLengthMismatch(deltas.len(), variances.len()));
    }

    let k = deltas.len() + 1;
    let mut adelta = Array2::<f64>::zeros((k, k));
    let mut ad_delta = Array2::<f64>::zeros((k, k));

    for steps in 1..k {
        for i in 0..k - steps {
            adelta[[i, i + steps]] = span_sum(deltas, i, steps);
            ad_delta[[i, i + steps]] = span_sum(variances, i, steps);
        }
    }

    Ok(ChainMatrices {
        delta_f: &adelta - &adelta.t(),
        d_delta_f: (&ad_delta + &ad_delta.t()).mapv(f64::sqrt),
    })
}

/// `values[start] + sum(values[start + 1..start + steps])`
fn span_sum(values: &[f64], start: usize, steps: usize) -> f64 {
    values[start] + pairwise_sum(&values[start + 1..start + steps])
}

/// Elements summed per block before splitting in two
const PAIRWISE_BLOCK: usize = 128;

/// Sum in numpy's order
///
/// Fewer than 8 values are added left to right. Up to [`PAIRWISE_BLOCK`] values are spread over
/// eight interleaved accumulators that are combined as a balanced tree, with any remainder added
/// left to right at the end. Longer slices are split at a multiple of 8 near the middle and each
/// half summed recursively.
pub fn pairwise_sum(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 8 {
        values.iter().fold(0.0, |acc, &x| acc + x)
    } else if n <= PAIRWISE_BLOCK {
        let mut r = [0.0; 8];
        r.copy_from_slice(&values[..8]);
        let whole = n - n % 8;
        for block in values[8..whole].chunks_exact(8) {
            for (acc, &x) in r.iter_mut().zip(block) {
                *acc += x;
            }
        }
        let tree = ((r[0] + r[1]) + (r[2] + r[3])) + ((r[4] + r[5]) + (r[6] + r[7]));
        values[whole..].iter().fold(tree, |acc, &x| acc + x)
    } else {
        let half = n / 2;
        let half = half - half % 8;
        pairwise_sum(&values[..half]) + pairwise_sum(&values[half..])
    }
}
