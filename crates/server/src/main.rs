mod announcer;
mod bootstrap;
mod health;
mod providers;
mod scheduler;
mod slack_http;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use quizbot_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::slack_http::SlackHttpState;

fn init_logging(config: &AppConfig) {
    use quizbot_core::config::LogFormat::*;

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    match config.logging.format {
        Compact => builder.compact().init(),
        Pretty => builder.pretty().init(),
        Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging comes up before anything else can fail loudly.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let server = &app.config.server;

    health::spawn(&server.bind_address, server.health_check_port, app.store.clone()).await?;

    let (shutdown, shutdown_signal) = watch::channel(());
    let slack = slack_http::spawn(
        &server.bind_address,
        server.events_port,
        SlackHttpState::new(Arc::clone(&app.dispatcher), app.config.slack.signing_secret.clone()),
        shutdown_signal,
    )
    .await?;

    let announcer =
        announcer::spawn(&app.ledger, Arc::clone(&app.web), app.config.channels.sandbox.clone());
    let scheduler =
        scheduler::spawn_daily(Arc::clone(&app.slow_quiz), app.config.quiz.slow_quiz_hour);

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        channel_id = %app.config.channels.sandbox,
        "quizbot-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "quizbot-server stopping"
    );

    scheduler.abort();
    let _ = shutdown.send(());
    let grace = Duration::from_secs(server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, slack).await.is_err() {
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            grace_secs = server.graceful_shutdown_secs,
            "in-flight slack requests did not finish in time"
        );
    }
    announcer.abort();

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
