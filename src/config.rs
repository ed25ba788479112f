//! Command-line and environment configuration.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::model::ClassifierKind;

#[derive(Debug, Parser)]
#[command(name = "heart-risk-api", version, about = "Heart-disease risk prediction service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the prediction API over HTTP.
    Serve(ServeArgs),
    /// Train and persist an initial model pair from a labeled CSV.
    Train(TrainArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address to bind.
    #[arg(long, env = "HEART_RISK_ADDR", default_value = "0.0.0.0:8000")]
    pub addr: String,

    /// Directory holding the persisted scaler and classifier pair.
    #[arg(long, env = "HEART_RISK_MODEL_DIR", default_value = "models")]
    pub model_dir: PathBuf,
}

#[derive(Debug, Args)]
pub struct TrainArgs {
    /// Labeled CSV with the 11 feature columns plus a `target` column.
    #[arg(long)]
    pub data: PathBuf,

    /// Directory to persist the trained pair into.
    #[arg(long, env = "HEART_RISK_MODEL_DIR", default_value = "models")]
    pub model_dir: PathBuf,

    /// Classifier variant to train.
    #[arg(long, value_enum, default_value = "forest")]
    pub model_kind: ClassifierKind,
}
