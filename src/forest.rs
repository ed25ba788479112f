//! Bagged decision-tree ensemble.
//!
//! smartcore's bundled random forest exposes labels only, so the ensemble
//! is assembled here from individual decision trees on seeded bootstrap
//! resamples. The positive-class probability is the fraction of trees
//! voting 1, which keeps `predict` and `predict_proba` consistent by
//! construction.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::arrays::Array;
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::tree::decision_tree_classifier::{
    DecisionTreeClassifier, DecisionTreeClassifierParameters,
};

use crate::error::{PipelineError, Result};

/// Number of bagged trees, matching the production model this replaces.
pub const N_TREES: usize = 100;

/// Fixed bootstrap seed so retraining on identical data is reproducible.
pub const BOOTSTRAP_SEED: u64 = 42;

type Tree = DecisionTreeClassifier<f64, u32, DenseMatrix<f64>, Vec<u32>>;

#[derive(Debug, Serialize, Deserialize)]
pub struct ForestClassifier {
    trees: Vec<Tree>,
}

impl ForestClassifier {
    /// Fit the ensemble on a scaled feature matrix and binary labels.
    pub fn fit(x: &DenseMatrix<f64>, y: &[u32]) -> Result<Self> {
        let (nrows, ncols) = x.shape();
        if nrows == 0 || y.len() != nrows {
            return Err(PipelineError::Train(format!(
                "feature matrix has {nrows} rows but {} labels",
                y.len()
            )));
        }

        let mut rng = StdRng::seed_from_u64(BOOTSTRAP_SEED);
        let mut trees = Vec::with_capacity(N_TREES);
        for _ in 0..N_TREES {
            let mut data = Vec::with_capacity(nrows * ncols);
            let mut labels = Vec::with_capacity(nrows);
            for _ in 0..nrows {
                let i = rng.gen_range(0..nrows);
                for c in 0..ncols {
                    data.push(*x.get((i, c)));
                }
                labels.push(y[i]);
            }
            let sample = DenseMatrix::new(nrows, ncols, data, false);
            let tree = DecisionTreeClassifier::fit(
                &sample,
                &labels,
                DecisionTreeClassifierParameters::default(),
            )
            .map_err(|e| PipelineError::Train(e.to_string()))?;
            trees.push(tree);
        }
        Ok(ForestClassifier { trees })
    }

    /// Positive-class probability per row: the fraction of trees voting 1.
    pub fn predict_proba(&self, x: &DenseMatrix<f64>) -> Result<Vec<f64>> {
        let (nrows, _) = x.shape();
        let mut votes = vec![0usize; nrows];
        for tree in &self.trees {
            let labels = tree
                .predict(x)
                .map_err(|e| PipelineError::Train(e.to_string()))?;
            for (count, label) in votes.iter_mut().zip(labels) {
                *count += label as usize;
            }
        }
        Ok(votes
            .into_iter()
            .map(|v| v as f64 / self.trees.len() as f64)
            .collect())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}
