use anyhow::Result;
use bar_rs::testsystems::*;
use bar_rs::{Bar, BarMethod};
use itertools::Itertools;
use ndarray::{array, Array2};

/// Format a matrix one row per line
fn rows(m: &Array2<f64>) -> String {
    m.outer_iter()
        .map(|row| row.iter().map(|x| format!("{:>9.4}", x)).join(" "))
        .join("\n")
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Generate some sample data
    let testcase = HarmonicOscillator::default();
    let sample = testcase.sample_with_seed(array![100, 200, 300, 400, 500], 2024)?;

    println!("{:?}", sample.n_k);

    // Build the estimator
    let bar = Bar::builder()
        .method(BarMethod::FalsePosition)
        .relative_tolerance(1.0e-10)
        .build_verbose()?;

    let fit = bar.fit(&sample.energy_table()?)?;

    println!("delta_f:\n{}", rows(&fit.delta_f));
    println!("d_delta_f:\n{}", rows(&fit.d_delta_f));

    // Compare each adjacent step with the exact result
    let f_k = testcase.analytical_free_energies();
    for ((k, est), (f0, f1)) in fit.estimates.iter().enumerate().zip(f_k.iter().tuple_windows()) {
        println!(
            "{} -> {}: BAR {:.4} +- {:.4}, analytical {:.4}",
            k,
            k + 1,
            est.df,
            est.ddf,
            f1 - f0
        );
    }

    Ok(())
}
