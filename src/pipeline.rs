//! End-to-end prediction and retraining flows.
//!
//! Inference: Validate → Clean → Scale(transform) → Classify, failing at
//! the first broken stage with no partial results. Retraining: Clean →
//! split → Scale(fit) → Classify(fit) → evaluate → persist → swap, with
//! the previous pair staying active (in memory and on disk) until the new
//! pair is fully ready.

use std::io::Cursor;

use polars::prelude::{CsvReader, DataFrame, SerReader};
use serde::Serialize;
use serde_json::Value;
use smartcore::model_selection::train_test_split;
use tokio::sync::Mutex;
use tracing::info;

use crate::clean::clean;
use crate::error::{PipelineError, Result};
use crate::metrics::{evaluate, ModelMetrics};
use crate::model::{label_from_probability, Classifier, ClassifierKind};
use crate::scale::StandardScaler;
use crate::schema::{self, FeatureFrame};
use crate::store::{ActivePair, ModelHandle, ModelStore};

/// Held-out share of a retraining table.
pub const TEST_FRACTION: f32 = 0.2;

/// Fixed shuffle seed for the train/test split.
pub const SPLIT_SEED: u64 = 42;

/// Retraining needs enough rows for a meaningful holdout.
const MIN_RETRAIN_ROWS: usize = 10;

/// Single-record inference result.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub prediction: u32,
    pub probability: f64,
}

/// Batch inference result: one entry per input row, in input order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchPrediction {
    pub names: Vec<String>,
    pub predictions: Vec<u32>,
    pub probabilities: Vec<f64>,
}

/// The serving pipeline: the active pair plus its persistence.
pub struct Pipeline {
    store: ModelStore,
    handle: ModelHandle,
    retrain_lock: Mutex<()>,
}

/// Parse an uploaded delimited-text table.
pub fn read_csv_bytes(bytes: Vec<u8>) -> Result<DataFrame> {
    if bytes.is_empty() {
        return Err(PipelineError::Parse("the uploaded CSV file is empty".into()));
    }
    Ok(CsvReader::new(Cursor::new(bytes))
        .has_header(true)
        .finish()?)
}

impl Pipeline {
    /// Load the persisted pair and start serving it. Startup fails here
    /// when no trained state exists.
    pub fn load(store: ModelStore) -> Result<Self> {
        let pair = store.load_pair()?;
        Ok(Pipeline {
            store,
            handle: ModelHandle::new(pair),
            retrain_lock: Mutex::new(()),
        })
    }

    /// Kind of the currently serving classifier.
    pub async fn active_kind(&self) -> ClassifierKind {
        self.handle.current().await.classifier.kind()
    }

    /// Strict single-record inference.
    pub async fn predict_record(
        &self,
        record: &serde_json::Map<String, Value>,
    ) -> Result<Prediction> {
        let values = schema::validate_record(record)?;
        let frame = FeatureFrame::from_record(&values);
        let table = clean(&frame)?;

        let pair = self.handle.current().await;
        let scaled = pair.scaler.transform(&table.to_matrix())?;
        let probability = pair.classifier.predict_proba(&scaled)?[0];
        Ok(Prediction {
            prediction: label_from_probability(probability),
            probability,
        })
    }

    /// Batch inference over a parsed tabular upload.
    pub async fn predict_table(&self, df: &DataFrame) -> Result<BatchPrediction> {
        let names = schema::row_names(df)?;
        let frame = schema::resolve_table(df)?;
        let table = clean(&frame)?;

        let pair = self.handle.current().await;
        let scaled = pair.scaler.transform(&table.to_matrix())?;
        let probabilities = pair.classifier.predict_proba(&scaled)?;
        let predictions = probabilities
            .iter()
            .copied()
            .map(label_from_probability)
            .collect();
        Ok(BatchPrediction {
            names,
            predictions,
            probabilities,
        })
    }

    /// Retrain on a labeled table and atomically swap the active pair.
    ///
    /// At most one retrain runs at a time; overlapping calls are rejected
    /// rather than queued. Fitting runs on a blocking worker so the
    /// request loop stays responsive, and the caller gets the held-out
    /// metrics once the new pair is live.
    pub async fn retrain(&self, df: DataFrame) -> Result<ModelMetrics> {
        let _guard = self
            .retrain_lock
            .try_lock()
            .map_err(|_| PipelineError::RetrainInFlight)?;

        // Resolve everything client-caused up front, before touching any
        // state or spending time on fitting.
        let labels = schema::target_labels(&df)?;
        let frame = schema::resolve_table(&df)?;
        let kind = self.active_kind().await;

        let (scaler, classifier, metrics) =
            tokio::task::spawn_blocking(move || train_pair(frame, labels, kind))
                .await
                .map_err(|e| PipelineError::Train(e.to_string()))??;

        // Persist first. Only a fully written pair becomes visible to
        // readers or to the next startup.
        self.store.save_pair(&scaler, &classifier)?;
        self.handle.replace(ActivePair { scaler, classifier }).await;
        info!(
            accuracy = metrics.accuracy,
            roc_auc = metrics.roc_auc,
            training_samples = metrics.training_samples,
            "activated retrained model pair"
        );
        Ok(metrics)
    }
}

/// Fit a new scaler/classifier pair and evaluate it on a held-out split.
pub fn train_pair(
    frame: FeatureFrame,
    labels: Vec<u32>,
    kind: ClassifierKind,
) -> Result<(StandardScaler, Classifier, ModelMetrics)> {
    if frame.n_rows < MIN_RETRAIN_ROWS {
        return Err(PipelineError::Train(format!(
            "retraining needs at least {MIN_RETRAIN_ROWS} rows, got {}",
            frame.n_rows
        )));
    }
    if frame.n_rows != labels.len() {
        return Err(PipelineError::Train(format!(
            "{} feature rows but {} labels",
            frame.n_rows,
            labels.len()
        )));
    }

    let table = clean(&frame)?;
    let x = table.to_matrix();
    let (x_train, x_test, y_train, y_test) =
        train_test_split(&x, &labels, TEST_FRACTION, true, Some(SPLIT_SEED));

    let mut scaler = StandardScaler::new();
    let train_scaled = scaler.fit(&x_train)?;
    let test_scaled = scaler.transform(&x_test)?;

    let classifier = Classifier::fit(kind, &train_scaled, &y_train)?;
    let probabilities = classifier.predict_proba(&test_scaled)?;
    let predictions: Vec<u32> = probabilities
        .iter()
        .copied()
        .map(label_from_probability)
        .collect();
    let metrics = evaluate(&y_test, &predictions, &probabilities, y_train.len());
    Ok((scaler, classifier, metrics))
}

/// Train and persist an initial pair so the server has state to load.
pub fn bootstrap(
    store: &ModelStore,
    df: &DataFrame,
    kind: ClassifierKind,
) -> Result<ModelMetrics> {
    let labels = schema::target_labels(df)?;
    let frame = schema::resolve_table(df)?;
    let (scaler, classifier, metrics) = train_pair(frame, labels, kind)?;
    store.save_pair(&scaler, &classifier)?;
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SCALER_FILE;
    use polars::prelude::{NamedFrom, Series};
    use serde_json::json;

    /// A labeled table where high oldpeak and low max heart rate mark the
    /// positive class, strongly enough for any variant to pick up.
    pub fn training_table(n_rows: usize) -> DataFrame {
        let mut cols: Vec<Vec<f64>> = vec![Vec::new(); 12];
        for i in 0..n_rows {
            let positive = i % 2 == 1;
            let jitter = (i % 7) as f64;
            cols[0].push(50.0 + jitter); // age
            cols[1].push((i % 2) as f64); // sex
            cols[2].push(1.0 + (i % 4) as f64); // chest pain type
            cols[3].push(120.0 + jitter); // resting bp s
            cols[4].push(200.0 + 3.0 * jitter); // cholesterol
            cols[5].push(0.0); // fasting blood sugar
            cols[6].push((i % 3) as f64); // resting ecg
            cols[7].push(if positive { 100.0 + jitter } else { 170.0 - jitter }); // max heart rate
            cols[8].push(if positive { 1.0 } else { 0.0 }); // exercise angina
            cols[9].push(if positive { 4.0 + 0.1 * jitter } else { 0.5 }); // oldpeak
            cols[10].push(if positive { 1.0 } else { 3.0 }); // ST slope
            cols[11].push(if positive { 1.0 } else { 0.0 }); // target
        }
        let names = [
            "age",
            "sex",
            "chest pain type",
            "resting bp s",
            "cholesterol",
            "fasting blood sugar",
            "resting ecg",
            "max heart rate",
            "exercise angina",
            "oldpeak",
            "ST slope",
            "target",
        ];
        DataFrame::new(
            names
                .iter()
                .zip(cols)
                .map(|(name, values)| Series::new(name, values))
                .collect(),
        )
        .unwrap()
    }

    fn loaded_pipeline(dir: &std::path::Path) -> Pipeline {
        let store = ModelStore::new(dir);
        bootstrap(&store, &training_table(40), ClassifierKind::Forest).unwrap();
        Pipeline::load(ModelStore::new(dir)).unwrap()
    }

    fn healthy_record() -> serde_json::Map<String, Value> {
        let mut m = serde_json::Map::new();
        m.insert("age".into(), json!(52));
        m.insert("sex".into(), json!(0));
        m.insert("chest_pain_type".into(), json!(2));
        m.insert("resting_bp_s".into(), json!(122));
        m.insert("cholesterol".into(), json!(205));
        m.insert("fasting_blood_sugar".into(), json!(0));
        m.insert("resting_ecg".into(), json!(0));
        m.insert("max_heart_rate".into(), json!(168));
        m.insert("exercise_angina".into(), json!(0));
        m.insert("oldpeak".into(), json!(0.5));
        m.insert("st_slope".into(), json!(3));
        m
    }

    #[tokio::test]
    async fn single_prediction_is_thresholded_consistently() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = loaded_pipeline(dir.path());
        let result = pipeline.predict_record(&healthy_record()).await.unwrap();
        assert!(result.prediction == 0 || result.prediction == 1);
        assert!((0.0..=1.0).contains(&result.probability));
        assert_eq!(result.prediction, u32::from(result.probability >= 0.5));
    }

    #[tokio::test]
    async fn batch_prediction_preserves_length_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = loaded_pipeline(dir.path());

        let mut df = training_table(8).drop("target").unwrap();
        let names: Vec<String> = (0..8).map(|i| format!("p{i}")).collect();
        df.with_column(Series::new("name", names.clone())).unwrap();

        let result = pipeline.predict_table(&df).await.unwrap();
        assert_eq!(result.names, names);
        assert_eq!(result.predictions.len(), 8);
        assert_eq!(result.probabilities.len(), 8);
        for (label, p) in result.predictions.iter().zip(&result.probabilities) {
            assert_eq!(*label, u32::from(*p >= 0.5));
        }
    }

    #[tokio::test]
    async fn batch_with_missing_column_names_it() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = loaded_pipeline(dir.path());
        let df = training_table(8).drop("target").unwrap().drop("oldpeak").unwrap();
        let err = pipeline.predict_table(&df).await.unwrap_err();
        match err {
            PipelineError::Schema(cols) => assert_eq!(cols, vec!["oldpeak".to_string()]),
            other => panic!("expected schema error, got {other}"),
        }
    }

    #[tokio::test]
    async fn retrain_reports_metrics_and_keeps_serving() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = loaded_pipeline(dir.path());

        let metrics = pipeline.retrain(training_table(50)).await.unwrap();
        assert_eq!(metrics.training_samples + metrics.test_samples, 50);
        assert!((0.0..=1.0).contains(&metrics.accuracy));
        assert!((0.0..=1.0).contains(&metrics.roc_auc));

        // the swapped-in pair serves immediately
        pipeline.predict_record(&healthy_record()).await.unwrap();
        // and survives a reload from disk
        Pipeline::load(ModelStore::new(dir.path())).unwrap();
    }

    #[tokio::test]
    async fn retrain_without_target_mutates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = loaded_pipeline(dir.path());
        let before = std::fs::read_to_string(dir.path().join(SCALER_FILE)).unwrap();

        let df = training_table(40).drop("target").unwrap();
        let err = pipeline.retrain(df).await.unwrap_err();
        match err {
            PipelineError::Schema(cols) => assert_eq!(cols, vec!["target".to_string()]),
            other => panic!("expected schema error, got {other}"),
        }

        let after = std::fs::read_to_string(dir.path().join(SCALER_FILE)).unwrap();
        assert_eq!(before, after);
        // the old pair still serves and still loads
        pipeline.predict_record(&healthy_record()).await.unwrap();
        Pipeline::load(ModelStore::new(dir.path())).unwrap();
    }

    #[tokio::test]
    async fn undersized_retrain_table_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = loaded_pipeline(dir.path());
        let err = pipeline.retrain(training_table(4)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Train(_)));
    }

    #[test]
    fn csv_bytes_round_trip_through_polars() {
        let csv = b"age,sex\n54,1\n61,0\n".to_vec();
        let df = read_csv_bytes(csv).unwrap();
        assert_eq!(df.height(), 2);
        assert!(read_csv_bytes(Vec::new()).is_err());
    }
}
