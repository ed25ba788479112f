//! Persisted model state and the in-memory active pair.
//!
//! The scaler and classifier are one unit: the classifier was trained on
//! the output distribution of that exact scaler, so they are loaded
//! together, replaced together, and swapped into memory together.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::model::Classifier;
use crate::scale::StandardScaler;

/// Scaler state blob, paired with the classifier blob in the same dir.
pub const SCALER_FILE: &str = "scaler.json";

/// The currently serving scaler/classifier combination.
pub struct ActivePair {
    pub scaler: StandardScaler,
    pub classifier: Classifier,
}

/// On-disk layout for the active pair.
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        ModelStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn scaler_path(&self) -> PathBuf {
        self.dir.join(SCALER_FILE)
    }

    /// Load both halves of the pair, failing if either is absent or
    /// unreadable. Called once at startup.
    pub fn load_pair(&self) -> Result<ActivePair> {
        let scaler = StandardScaler::load(&self.scaler_path())?;
        let classifier = Classifier::load(&self.dir)?;
        info!(dir = %self.dir.display(), kind = ?classifier.kind(), "loaded persisted model pair");
        Ok(ActivePair { scaler, classifier })
    }

    /// Replace the persisted pair with a freshly fitted one.
    ///
    /// Both blobs are written to temp files first and renamed into place
    /// only once both writes succeeded, so a failure mid-save leaves the
    /// previous pair on disk untouched.
    pub fn save_pair(&self, scaler: &StandardScaler, classifier: &Classifier) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let scaler_tmp = self.dir.join(format!("{SCALER_FILE}.tmp"));
        let model_file = classifier.file_name();
        let model_tmp = self.dir.join(format!("{model_file}.tmp"));

        scaler.save(&scaler_tmp)?;
        if let Err(e) = classifier.write(&model_tmp) {
            let _ = fs::remove_file(&scaler_tmp);
            return Err(e);
        }

        fs::rename(&scaler_tmp, self.scaler_path())?;
        fs::rename(&model_tmp, self.dir.join(model_file))?;
        match fs::remove_file(self.dir.join(classifier.sibling_file_name())) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(PipelineError::Io(e)),
        }
        info!(dir = %self.dir.display(), kind = ?classifier.kind(), "persisted new model pair");
        Ok(())
    }
}

/// Swappable handle to the active pair.
///
/// Readers take an `Arc` snapshot, so an in-flight retrain can never
/// expose a half-updated scaler/classifier combination to them; the
/// swap replaces the whole pair in one write.
pub struct ModelHandle {
    inner: RwLock<Arc<ActivePair>>,
}

impl ModelHandle {
    pub fn new(pair: ActivePair) -> Self {
        ModelHandle {
            inner: RwLock::new(Arc::new(pair)),
        }
    }

    pub async fn current(&self) -> Arc<ActivePair> {
        self.inner.read().await.clone()
    }

    pub async fn replace(&self, pair: ActivePair) {
        *self.inner.write().await = Arc::new(pair);
    }
}
