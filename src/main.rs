use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use heart_risk_api::config::{Cli, Command, ServeArgs, TrainArgs};
use heart_risk_api::pipeline::{bootstrap, read_csv_bytes, Pipeline};
use heart_risk_api::server::{build_router, AppState};
use heart_risk_api::store::ModelStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("heart_risk_api=info".parse()?),
        )
        .init();

    match Cli::parse().command {
        Command::Serve(args) => serve(args).await,
        Command::Train(args) => train(args),
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let pipeline = Pipeline::load(ModelStore::new(&args.model_dir)).with_context(|| {
        format!(
            "no usable model pair in {}; run `heart-risk-api train` first",
            args.model_dir.display()
        )
    })?;
    info!(kind = ?pipeline.active_kind().await, "model pair ready");

    let app = build_router(Arc::new(AppState { pipeline }));
    let listener = tokio::net::TcpListener::bind(&args.addr)
        .await
        .with_context(|| format!("binding {}", args.addr))?;
    info!(addr = %args.addr, "prediction service listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn train(args: TrainArgs) -> anyhow::Result<()> {
    let bytes = std::fs::read(&args.data)
        .with_context(|| format!("reading training data from {}", args.data.display()))?;
    let df = read_csv_bytes(bytes)?;

    let store = ModelStore::new(&args.model_dir);
    let metrics = bootstrap(&store, &df, args.model_kind)?;
    info!(
        accuracy = metrics.accuracy,
        roc_auc = metrics.roc_auc,
        dir = %args.model_dir.display(),
        "trained and persisted initial model pair"
    );
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}
