//! Stateful z-score scaling.
//!
//! Fit once on training data, then frozen for all subsequent inference.
//! The stored state is plain per-column mean and population standard
//! deviation, persisted as JSON next to the classifier blob.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::arrays::Array;
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::error::{PipelineError, Result};

/// Columns whose standard deviation is at or below this bound are treated
/// as constant and transform to 0.0 instead of dividing by (near) zero.
pub const STD_EPS: f64 = 1e-12;

/// Per-column z-score transform with frozen mean/std state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardScaler {
    means: Option<Vec<f64>>,
    stds: Option<Vec<f64>>,
}

impl StandardScaler {
    /// An unfitted scaler. `transform` fails until `fit` or `load`.
    pub fn new() -> Self {
        StandardScaler::default()
    }

    pub fn is_fitted(&self) -> bool {
        self.means.is_some()
    }

    /// Compute column means and population standard deviations from `x`,
    /// store them, and return the transformed matrix.
    pub fn fit(&mut self, x: &DenseMatrix<f64>) -> Result<DenseMatrix<f64>> {
        let (nrows, ncols) = x.shape();
        if nrows == 0 {
            return Err(PipelineError::Train("cannot fit a scaler on zero rows".into()));
        }

        let mut means = vec![0.0; ncols];
        let mut stds = vec![0.0; ncols];
        for c in 0..ncols {
            let mut sum = 0.0;
            for r in 0..nrows {
                sum += *x.get((r, c));
            }
            let mean = sum / nrows as f64;

            let mut sq = 0.0;
            for r in 0..nrows {
                let d = *x.get((r, c)) - mean;
                sq += d * d;
            }
            means[c] = mean;
            stds[c] = (sq / nrows as f64).sqrt();
        }

        self.means = Some(means);
        self.stds = Some(stds);
        self.transform(x)
    }

    /// Apply the stored state to a new matrix of the same width.
    pub fn transform(&self, x: &DenseMatrix<f64>) -> Result<DenseMatrix<f64>> {
        let (means, stds) = match (&self.means, &self.stds) {
            (Some(m), Some(s)) => (m, s),
            _ => return Err(PipelineError::NotFitted),
        };
        let (nrows, ncols) = x.shape();
        if ncols != means.len() {
            return Err(PipelineError::Train(format!(
                "scaler was fitted on {} columns but got {ncols}",
                means.len()
            )));
        }

        let mut data = Vec::with_capacity(nrows * ncols);
        for r in 0..nrows {
            for c in 0..ncols {
                if stds[c] <= STD_EPS {
                    data.push(0.0);
                } else {
                    data.push((*x.get((r, c)) - means[c]) / stds[c]);
                }
            }
        }
        Ok(DenseMatrix::new(nrows, ncols, data, false))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if !self.is_fitted() {
            return Err(PipelineError::NotFitted);
        }
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let scaler: StandardScaler = serde_json::from_reader(BufReader::new(file))?;
        if !scaler.is_fitted() {
            return Err(PipelineError::NotFitted);
        }
        Ok(scaler)
    }
}
