//! Classifier dispatch over the two backing implementations.
//!
//! Callers see one `fit`/`predict`/`predict_proba`/`save`/`load` surface;
//! only persistence differs per variant. On disk the variant is
//! distinguished by which file exists: `model.json` holds the
//! JSON-serialized tree ensemble, `model.nn` the network's binary weights.

use std::fs;
use std::io;
use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::error::{PipelineError, Result};
use crate::forest::ForestClassifier;
use crate::network::NetworkClassifier;

/// Tree-ensemble blob, generic object serialization.
pub const FOREST_FILE: &str = "model.json";

/// Network weights in their own binary format.
pub const NETWORK_FILE: &str = "model.nn";

/// Fixed decision threshold shared by both variants.
pub const POSITIVE_THRESHOLD: f64 = 0.5;

/// Label derived from a positive-class probability. Keeping this in one
/// place is what guarantees labels and probabilities never disagree.
pub fn label_from_probability(p: f64) -> u32 {
    u32::from(p >= POSITIVE_THRESHOLD)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    Forest,
    Network,
}

#[derive(Debug)]
pub enum Classifier {
    Forest(ForestClassifier),
    Network(NetworkClassifier),
}

impl Classifier {
    pub fn kind(&self) -> ClassifierKind {
        match self {
            Classifier::Forest(_) => ClassifierKind::Forest,
            Classifier::Network(_) => ClassifierKind::Network,
        }
    }

    /// Fit a fresh classifier of the requested kind on scaled features.
    pub fn fit(kind: ClassifierKind, x: &DenseMatrix<f64>, y: &[u32]) -> Result<Self> {
        match kind {
            ClassifierKind::Forest => Ok(Classifier::Forest(ForestClassifier::fit(x, y)?)),
            ClassifierKind::Network => Ok(Classifier::Network(NetworkClassifier::fit(x, y)?)),
        }
    }

    pub fn predict_proba(&self, x: &DenseMatrix<f64>) -> Result<Vec<f64>> {
        match self {
            Classifier::Forest(forest) => forest.predict_proba(x),
            Classifier::Network(net) => net.predict_proba(x),
        }
    }

    /// Labels thresholded from `predict_proba`.
    pub fn predict(&self, x: &DenseMatrix<f64>) -> Result<Vec<u32>> {
        Ok(self
            .predict_proba(x)?
            .into_iter()
            .map(label_from_probability)
            .collect())
    }

    /// File name this variant persists under.
    pub fn file_name(&self) -> &'static str {
        match self {
            Classifier::Forest(_) => FOREST_FILE,
            Classifier::Network(_) => NETWORK_FILE,
        }
    }

    /// File name of the other variant, removed on save to keep the
    /// on-disk layout naming exactly one active classifier.
    pub fn sibling_file_name(&self) -> &'static str {
        match self {
            Classifier::Forest(_) => NETWORK_FILE,
            Classifier::Network(_) => FOREST_FILE,
        }
    }

    /// Serialize this variant's blob to an explicit path.
    pub fn write(&self, path: &Path) -> Result<()> {
        match self {
            Classifier::Forest(forest) => forest.save(path),
            Classifier::Network(net) => net.save(path),
        }
    }

    /// Write this variant's blob into `dir` and drop the sibling
    /// variant's file.
    pub fn save(&self, dir: &Path) -> Result<()> {
        self.write(&dir.join(self.file_name()))?;
        match fs::remove_file(dir.join(self.sibling_file_name())) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Load whichever variant is persisted in `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let forest_path = dir.join(FOREST_FILE);
        let network_path = dir.join(NETWORK_FILE);
        if forest_path.exists() {
            Ok(Classifier::Forest(ForestClassifier::load(&forest_path)?))
        } else if network_path.exists() {
            Ok(Classifier::Network(NetworkClassifier::load(&network_path)?))
        } else {
            Err(PipelineError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no classifier found in {}", dir.display()),
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn training_data() -> (DenseMatrix<f64>, Vec<u32>) {
        let mut data = Vec::new();
        let mut labels = Vec::new();
        for i in 0..10 {
            let jitter = (i % 5) as f64 * 0.1;
            data.extend_from_slice(&[-2.0 - jitter, -1.0]);
            labels.push(0);
            data.extend_from_slice(&[2.0 + jitter, 1.0]);
            labels.push(1);
        }
        (DenseMatrix::new(20, 2, data, false), labels)
    }

    #[test]
    fn labels_follow_the_shared_threshold() {
        let (x, y) = training_data();
        let model = Classifier::fit(ClassifierKind::Forest, &x, &y).unwrap();
        let proba = model.predict_proba(&x).unwrap();
        let labels = model.predict(&x).unwrap();
        for (p, label) in proba.iter().zip(labels) {
            assert_eq!(label, u32::from(*p >= POSITIVE_THRESHOLD));
        }
    }

    #[test]
    fn save_dispatches_on_variant_and_load_dispatches_on_file() {
        let dir = tempfile::tempdir().unwrap();
        let (x, y) = training_data();

        let forest = Classifier::fit(ClassifierKind::Forest, &x, &y).unwrap();
        forest.save(dir.path()).unwrap();
        assert!(dir.path().join(FOREST_FILE).exists());
        assert_eq!(Classifier::load(dir.path()).unwrap().kind(), ClassifierKind::Forest);

        let net = Classifier::fit(ClassifierKind::Network, &x, &y).unwrap();
        net.save(dir.path()).unwrap();
        assert!(dir.path().join(NETWORK_FILE).exists());
        // the forest blob is gone, so load resolves to the network
        assert!(!dir.path().join(FOREST_FILE).exists());
        assert_eq!(Classifier::load(dir.path()).unwrap().kind(), ClassifierKind::Network);
    }

    #[test]
    fn loading_an_empty_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Classifier::load(dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
    }
}
