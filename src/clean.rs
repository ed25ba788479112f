//! Table-relative cleaning: imputation and outlier clipping.
//!
//! Statistics are recomputed from whatever table is passed in, including a
//! batch of size one, where median, mode, and the IQR fences all collapse
//! to the single observed value and clipping becomes a no-op.

use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::error::{PipelineError, Result};
use crate::schema::{FeatureFrame, FieldKind, FIELDS};

/// A fully imputed and clipped table, column-major in canonical order.
#[derive(Debug)]
pub struct CleanTable {
    pub columns: Vec<Vec<f64>>,
    pub n_rows: usize,
}

impl CleanTable {
    /// Row-major matrix for the scaler and classifier.
    pub fn to_matrix(&self) -> DenseMatrix<f64> {
        let ncols = self.columns.len();
        let mut data = Vec::with_capacity(self.n_rows * ncols);
        for row in 0..self.n_rows {
            for col in &self.columns {
                data.push(col[row]);
            }
        }
        DenseMatrix::new(self.n_rows, ncols, data, false)
    }
}

/// Impute missing values and clip outliers, column by column.
///
/// Continuous columns get the column median and are clipped to
/// `[Q1 - 1.5*IQR, Q3 + 1.5*IQR]`; categorical columns get the column
/// mode and are never clipped. A column with no observed values at all
/// cannot be imputed and fails with its canonical name.
pub fn clean(frame: &FeatureFrame) -> Result<CleanTable> {
    let mut columns = Vec::with_capacity(frame.columns.len());
    let mut empty = Vec::new();

    for (field, raw) in FIELDS.iter().zip(&frame.columns) {
        let observed: Vec<f64> = raw.iter().flatten().copied().collect();
        if observed.is_empty() {
            empty.push(field.name.to_string());
            continue;
        }

        let filled: Vec<f64> = match field.kind {
            FieldKind::Continuous => {
                let med = median(&observed);
                let (q1, q3) = quartiles(&observed);
                let iqr = q3 - q1;
                let lo = q1 - 1.5 * iqr;
                let hi = q3 + 1.5 * iqr;
                raw.iter()
                    .map(|v| v.unwrap_or(med).clamp(lo, hi))
                    .collect()
            }
            FieldKind::Categorical => {
                let m = mode(&observed);
                raw.iter().map(|v| v.unwrap_or(m)).collect()
            }
        };
        columns.push(filled);
    }

    if !empty.is_empty() {
        return Err(PipelineError::Schema(empty));
    }
    Ok(CleanTable {
        columns,
        n_rows: frame.n_rows,
    })
}

/// Linear-interpolation percentile over observed values.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let pos = q * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    percentile(&sorted, 0.5)
}

fn quartiles(values: &[f64]) -> (f64, f64) {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    (percentile(&sorted, 0.25), percentile(&sorted, 0.75))
}

/// Most frequent value; ties resolve to the smallest.
fn mode(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mut best = sorted[0];
    let mut best_count = 0usize;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j < sorted.len() && sorted[j] == sorted[i] {
            j += 1;
        }
        if j - i > best_count {
            best_count = j - i;
            best = sorted[i];
        }
        i = j;
    }
    best
}
