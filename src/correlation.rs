// correlation.rs

use ndarray::ArrayView1;
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::fmt;

/// Why a single regulator/target test produced no statistic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SkipReason {
    /// Fewer than two cells.
    TooFewCells,
    /// One of the vectors has zero variance.
    ConstantInput,
    /// NaN or infinity in either vector.
    NonFinite,
    /// The gene name maps to more than one column.
    AmbiguousName,
    LengthMismatch,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SkipReason::TooFewCells => "too_few_cells",
            SkipReason::ConstantInput => "constant_input",
            SkipReason::NonFinite => "non_finite",
            SkipReason::AmbiguousName => "ambiguous_name",
            SkipReason::LengthMismatch => "length_mismatch",
        };
        f.write_str(label)
    }
}

/// Result of one pairwise Pearson test.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PairOutcome {
    Tested { r: f64, pval: f64 },
    Skipped(SkipReason),
}

/// Pearson correlation of `x` and `y` with its two-sided p-value under the
/// null of zero correlation (Student t, n - 2 degrees of freedom).
pub fn pearson_test(x: ArrayView1<f64>, y: ArrayView1<f64>) -> PairOutcome {
    let n = x.len();
    if n != y.len() {
        return PairOutcome::Skipped(SkipReason::LengthMismatch);
    }
    if n < 2 {
        return PairOutcome::Skipped(SkipReason::TooFewCells);
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return PairOutcome::Skipped(SkipReason::NonFinite);
    }
    if is_constant(x) || is_constant(y) {
        return PairOutcome::Skipped(SkipReason::ConstantInput);
    }

    let n_f = n as f64;
    let mean_x = x.sum() / n_f;
    let mean_y = y.sum() / n_f;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (xi, yi) in x.iter().zip(y.iter()) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    let denom = (var_x * var_y).sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return PairOutcome::Skipped(SkipReason::ConstantInput);
    }
    let r = (cov / denom).clamp(-1.0, 1.0);

    match two_sided_pvalue(r, n) {
        Some(pval) => PairOutcome::Tested { r, pval },
        None => PairOutcome::Skipped(SkipReason::NonFinite),
    }
}

fn is_constant(v: ArrayView1<f64>) -> bool {
    match v.first() {
        Some(first) => v.iter().all(|value| value == first),
        None => true,
    }
}

fn two_sided_pvalue(r: f64, n: usize) -> Option<f64> {
    // Two points always lie on a line.
    if n == 2 {
        return Some(1.0);
    }
    if r.abs() >= 1.0 {
        return Some(0.0);
    }
    let df = (n - 2) as f64;
    let t = r * (df / ((1.0 - r) * (1.0 + r))).sqrt();
    let dist = StudentsT::new(0.0, 1.0, df).ok()?;
    let p = 2.0 * dist.sf(t.abs());
    p.is_finite().then(|| p.clamp(0.0, 1.0))
}
