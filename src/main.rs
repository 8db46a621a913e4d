//! The pipeline step chainer.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::prelude::*;

use dataflow_chainer::app::App;
use dataflow_chainer::config::{Config, StepConfig};
use dataflow_chainer::server::metrics_recorder;

#[tokio::main]
async fn main() -> Result<()> {
    // Setup tracing/logging system.
    tracing_subscriber::registry()
        // Filter spans based on the RUST_LOG env var.
        .with(tracing_subscriber::EnvFilter::from_default_env())
        // Send a copy of all spans to stdout in compact form.
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true)
        )
        // Install this registry as the global tracing registry.
        .try_init()
        .context("error initializing logging/tracing system")?;

    let cfg = Arc::new(Config::new()?);
    metrics::set_recorder(metrics_recorder(&cfg)).context("error setting prometheus metrics recorder")?;
    let spec = StepConfig::new()?.into_spec().context("invalid pipeline step")?;

    tracing::info!(
        client_id = %cfg.client_id,
        pipeline = spec.pipeline_name(),
        input_topic = spec.input_topic(),
        output_topic = spec.output_topic(),
        state_dir = %cfg.state_dir,
        broker_data_path = %cfg.broker_data_path,
        "starting chainer process",
    );
    let res = App::new(cfg, spec)
        .await?
        .spawn()
        .await
        .context("error joining app task")
        .and_then(|res| res);
    if let Err(err) = &res {
        tracing::error!(error = ?err, "chainer process failed");
    }

    // Ensure any pending output is flushed.
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    res
}
