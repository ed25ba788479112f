//! Canonical feature schema, column-alias resolution, and input validation.
//!
//! The scaler and classifier are always fit on the 11 clinical features in
//! the fixed order below, so every input path funnels through this module
//! before any matrix is built. Alias resolution is first-match-wins over a
//! static priority list per field.

use std::collections::HashMap;

use lazy_static::lazy_static;
use polars::prelude::{DataFrame, DataType};
use serde_json::Value;

use crate::error::{PipelineError, Result};

/// Number of clinical features the classifier is trained on.
pub const FEATURE_COUNT: usize = 11;

/// Label column expected in retraining uploads.
pub const TARGET_COLUMN: &str = "target";

/// Optional per-row identifier column in batch uploads.
pub const NAME_COLUMN: &str = "name";

/// Whether a field holds a measurement or a coded category.
///
/// Continuous fields are median-imputed and IQR-clipped by the cleaner;
/// categorical fields are mode-imputed and must be integral in the
/// single-record path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Continuous,
    Categorical,
}

/// One canonical feature: its name, accepted column aliases in priority
/// order, inclusive bounds, and value class.
pub struct FieldSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub min: f64,
    pub max: f64,
    pub kind: FieldKind,
}

/// The canonical schema, in training order.
pub static FIELDS: [FieldSpec; FEATURE_COUNT] = [
    FieldSpec {
        name: "age",
        aliases: &["age", "Age", "AGE"],
        min: 0.0,
        max: 150.0,
        kind: FieldKind::Continuous,
    },
    FieldSpec {
        name: "sex",
        aliases: &["sex", "Sex", "SEX", "gender", "Gender"],
        min: 0.0,
        max: 1.0,
        kind: FieldKind::Categorical,
    },
    FieldSpec {
        name: "chest pain type",
        aliases: &["chest_pain_type", "chest pain type", "ChestPainType", "chest_pain"],
        min: 1.0,
        max: 4.0,
        kind: FieldKind::Categorical,
    },
    FieldSpec {
        name: "resting bp s",
        aliases: &["resting_bp_s", "resting bp s", "RestingBP", "resting_bp", "bp"],
        min: 80.0,
        max: 200.0,
        kind: FieldKind::Continuous,
    },
    FieldSpec {
        name: "cholesterol",
        aliases: &["cholesterol", "Cholesterol", "CHOL"],
        min: 100.0,
        max: 600.0,
        kind: FieldKind::Continuous,
    },
    FieldSpec {
        name: "fasting blood sugar",
        aliases: &["fasting_blood_sugar", "fasting blood sugar", "FastingBS"],
        min: 0.0,
        max: 1.0,
        kind: FieldKind::Categorical,
    },
    FieldSpec {
        name: "resting ecg",
        aliases: &["resting_ecg", "resting ecg", "RestingECG"],
        min: 0.0,
        max: 2.0,
        kind: FieldKind::Categorical,
    },
    FieldSpec {
        name: "max heart rate",
        aliases: &["max_heart_rate", "max heart rate", "MaxHR"],
        min: 60.0,
        max: 220.0,
        kind: FieldKind::Continuous,
    },
    FieldSpec {
        name: "exercise angina",
        aliases: &["exercise_angina", "exercise angina", "ExerciseAngina"],
        min: 0.0,
        max: 1.0,
        kind: FieldKind::Categorical,
    },
    FieldSpec {
        name: "oldpeak",
        aliases: &["oldpeak", "Oldpeak", "ST_Depression"],
        min: 0.0,
        max: 10.0,
        kind: FieldKind::Continuous,
    },
    FieldSpec {
        name: "ST slope",
        aliases: &["st_slope", "ST slope", "ST_Slope"],
        min: 1.0,
        max: 3.0,
        kind: FieldKind::Categorical,
    },
];

lazy_static! {
    /// Every accepted alias mapped back to its canonical field index.
    static ref ALIAS_INDEX: HashMap<&'static str, usize> = {
        let mut map = HashMap::new();
        for (i, field) in FIELDS.iter().enumerate() {
            map.insert(field.name, i);
            for alias in field.aliases {
                map.insert(*alias, i);
            }
        }
        map
    };
}

/// Feature values re-keyed to the canonical schema, column-major.
///
/// `columns[i]` holds field `i` for every row; `None` marks a value that
/// failed numeric coercion and is left for the cleaner to impute.
#[derive(Debug)]
pub struct FeatureFrame {
    pub columns: Vec<Vec<Option<f64>>>,
    pub n_rows: usize,
}

impl FeatureFrame {
    /// Wrap a single validated record as a one-row frame.
    pub fn from_record(values: &[f64; FEATURE_COUNT]) -> Self {
        FeatureFrame {
            columns: values.iter().map(|v| vec![Some(*v)]).collect(),
            n_rows: 1,
        }
    }
}

/// Validate a single JSON record against the canonical schema.
///
/// Strict path: every field must resolve, parse as a number, and sit
/// inside its bounds. Categorical fields must additionally be integral.
/// Returns the values in canonical order.
pub fn validate_record(record: &serde_json::Map<String, Value>) -> Result<[f64; FEATURE_COUNT]> {
    let mut resolved = Vec::with_capacity(FEATURE_COUNT);
    let mut missing = Vec::new();
    for field in FIELDS.iter() {
        match field.aliases.iter().find_map(|alias| record.get(*alias)) {
            Some(raw) => resolved.push(raw),
            None => missing.push(field.name.to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(PipelineError::Schema(missing));
    }

    let mut values = [0.0f64; FEATURE_COUNT];
    for (i, (field, raw)) in FIELDS.iter().zip(resolved).enumerate() {
        values[i] = coerce_strict(field, raw)?;
    }
    Ok(values)
}

/// Parse and bounds-check one strict-path value.
fn coerce_strict(field: &FieldSpec, raw: &Value) -> Result<f64> {
    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let out_of_range = |value: String| PipelineError::Range {
        field: field.name.to_string(),
        value,
        min: field.min,
        max: field.max,
    };

    let v = parsed.ok_or_else(|| out_of_range(display_value(raw)))?;
    if !v.is_finite() || v < field.min || v > field.max {
        return Err(out_of_range(display_value(raw)));
    }
    if field.kind == FieldKind::Categorical && v.fract() != 0.0 {
        return Err(out_of_range(display_value(raw)));
    }
    Ok(v)
}

fn display_value(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolve a parsed CSV table against the canonical schema.
///
/// Lenient path: cells that fail numeric coercion become missing values
/// for the cleaner; only wholly unresolvable columns are an error, and
/// the error names all of them at once.
pub fn resolve_table(df: &DataFrame) -> Result<FeatureFrame> {
    if df.height() == 0 {
        return Err(PipelineError::Parse("the uploaded CSV file is empty".into()));
    }

    let present = df.get_column_names();
    let mut columns = Vec::with_capacity(FEATURE_COUNT);
    let mut missing = Vec::new();

    for field in FIELDS.iter() {
        let matched = field
            .aliases
            .iter()
            .copied()
            .find(|alias| present.contains(alias));
        match matched {
            Some(alias) => {
                // Non-strict cast: unparseable cells become nulls, the
                // same coercion the training data went through.
                let series = df.column(alias)?.cast(&DataType::Float64)?;
                let values: Vec<Option<f64>> = series.f64()?.into_iter().collect();
                columns.push(values);
            }
            None => missing.push(field.name.to_string()),
        }
    }

    if !missing.is_empty() {
        return Err(PipelineError::Schema(missing));
    }
    Ok(FeatureFrame {
        columns,
        n_rows: df.height(),
    })
}

/// Per-row identifiers for a batch: the `name` column when present,
/// `Patient_{i}` otherwise.
pub fn row_names(df: &DataFrame) -> Result<Vec<String>> {
    let fallback = |i: usize| format!("Patient_{i}");
    if !df.get_column_names().contains(&NAME_COLUMN) {
        return Ok((0..df.height()).map(fallback).collect());
    }
    let series = df.column(NAME_COLUMN)?.cast(&DataType::Utf8)?;
    let names = series
        .utf8()?
        .into_iter()
        .enumerate()
        .map(|(i, v)| v.map(str::to_string).unwrap_or_else(|| fallback(i)))
        .collect();
    Ok(names)
}

/// Extract and check the binary label column for retraining.
pub fn target_labels(df: &DataFrame) -> Result<Vec<u32>> {
    if !df.get_column_names().contains(&TARGET_COLUMN) {
        return Err(PipelineError::Schema(vec![TARGET_COLUMN.to_string()]));
    }
    let series = df.column(TARGET_COLUMN)?.cast(&DataType::Float64)?;
    let mut labels = Vec::with_capacity(df.height());
    for value in series.f64()?.into_iter() {
        match value {
            Some(v) if v == 0.0 || v == 1.0 => labels.push(v as u32),
            Some(v) => {
                return Err(PipelineError::Parse(format!(
                    "target column must be binary (0 or 1), got {v}"
                )))
            }
            None => {
                return Err(PipelineError::Parse(
                    "target column contains missing or non-numeric values".into(),
                ))
            }
        }
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::{NamedFrom, Series};
    use serde_json::json;

    fn record(age: Value) -> serde_json::Map<String, Value> {
        let mut m = serde_json::Map::new();
        m.insert("age".into(), age);
        m.insert("sex".into(), json!(1));
        m.insert("chest_pain_type".into(), json!(3));
        m.insert("resting_bp_s".into(), json!(130));
        m.insert("cholesterol".into(), json!(230));
        m.insert("fasting_blood_sugar".into(), json!(0));
        m.insert("resting_ecg".into(), json!(1));
        m.insert("max_heart_rate".into(), json!(150));
        m.insert("exercise_angina".into(), json!(0));
        m.insert("oldpeak".into(), json!(1.5));
        m.insert("st_slope".into(), json!(2));
        m
    }

    #[test]
    fn valid_record_resolves_in_canonical_order() {
        let values = validate_record(&record(json!(54))).unwrap();
        assert_eq!(values[0], 54.0);
        assert_eq!(values[2], 3.0); // chest pain type
        assert_eq!(values[10], 2.0); // ST slope
    }

    #[test]
    fn age_out_of_range_is_a_range_error() {
        let err = validate_record(&record(json!(200))).unwrap_err();
        match err {
            PipelineError::Range { field, min, max, .. } => {
                assert_eq!(field, "age");
                assert_eq!(min, 0.0);
                assert_eq!(max, 150.0);
            }
            other => panic!("expected range error, got {other}"),
        }
    }

    #[test]
    fn non_numeric_value_is_a_range_error() {
        let err = validate_record(&record(json!("elderly"))).unwrap_err();
        assert!(matches!(err, PipelineError::Range { .. }));
    }

    #[test]
    fn fractional_categorical_is_rejected() {
        let mut rec = record(json!(54));
        rec.insert("sex".into(), json!(0.5));
        let err = validate_record(&rec).unwrap_err();
        match err {
            PipelineError::Range { field, .. } => assert_eq!(field, "sex"),
            other => panic!("expected range error, got {other}"),
        }
    }

    #[test]
    fn missing_fields_are_all_named() {
        let mut rec = record(json!(54));
        rec.remove("cholesterol");
        rec.remove("st_slope");
        let err = validate_record(&rec).unwrap_err();
        match err {
            PipelineError::Schema(cols) => {
                assert_eq!(cols, vec!["cholesterol".to_string(), "ST slope".to_string()]);
            }
            other => panic!("expected schema error, got {other}"),
        }
    }

    #[test]
    fn aliases_resolve_with_priority() {
        let mut rec = record(json!(54));
        rec.remove("sex");
        rec.insert("Gender".into(), json!(0));
        let values = validate_record(&rec).unwrap();
        assert_eq!(values[1], 0.0);
    }

    fn table(cols: Vec<Series>) -> DataFrame {
        DataFrame::new(cols).unwrap()
    }

    fn full_table() -> DataFrame {
        table(vec![
            Series::new("Age", &[54.0, 61.0]),
            Series::new("sex", &[1.0, 0.0]),
            Series::new("ChestPainType", &[3.0, 2.0]),
            Series::new("RestingBP", &[130.0, 140.0]),
            Series::new("CHOL", &[230.0, 289.0]),
            Series::new("FastingBS", &[0.0, 1.0]),
            Series::new("RestingECG", &[1.0, 0.0]),
            Series::new("MaxHR", &[150.0, 120.0]),
            Series::new("ExerciseAngina", &[0.0, 1.0]),
            Series::new("Oldpeak", &[1.5, 2.0]),
            Series::new("ST_Slope", &[2.0, 1.0]),
        ])
    }

    #[test]
    fn table_resolution_orders_columns_canonically() {
        let frame = resolve_table(&full_table()).unwrap();
        assert_eq!(frame.n_rows, 2);
        assert_eq!(frame.columns.len(), FEATURE_COUNT);
        assert_eq!(frame.columns[0], vec![Some(54.0), Some(61.0)]);
        assert_eq!(frame.columns[4], vec![Some(230.0), Some(289.0)]);
    }

    #[test]
    fn unresolvable_column_fails_with_its_canonical_name() {
        let df = full_table().drop("CHOL").unwrap();
        let err = resolve_table(&df).unwrap_err();
        match err {
            PipelineError::Schema(cols) => assert_eq!(cols, vec!["cholesterol".to_string()]),
            other => panic!("expected schema error, got {other}"),
        }
    }

    #[test]
    fn unparseable_cells_become_missing() {
        let mut df = full_table();
        df.with_column(Series::new("Age", &["54", "n/a"])).unwrap();
        let frame = resolve_table(&df).unwrap();
        assert_eq!(frame.columns[0], vec![Some(54.0), None]);
    }

    #[test]
    fn row_names_pass_through_and_backfill() {
        let mut df = full_table();
        df.with_column(Series::new("name", &[Some("Ana"), None])).unwrap();
        let names = row_names(&df).unwrap();
        assert_eq!(names, vec!["Ana".to_string(), "Patient_1".to_string()]);

        let names = row_names(&full_table()).unwrap();
        assert_eq!(names, vec!["Patient_0".to_string(), "Patient_1".to_string()]);
    }

    #[test]
    fn target_extraction_requires_binary_labels() {
        let mut df = full_table();
        df.with_column(Series::new("target", &[1.0, 0.0])).unwrap();
        assert_eq!(target_labels(&df).unwrap(), vec![1, 0]);

        df.with_column(Series::new("target", &[1.0, 2.0])).unwrap();
        assert!(matches!(target_labels(&df), Err(PipelineError::Parse(_))));

        let err = target_labels(&full_table()).unwrap_err();
        assert!(matches!(err, PipelineError::Schema(_)));
    }
}
