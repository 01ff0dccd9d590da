use anyhow::Result;
use chrono::Utc;
use dotenvy::dotenv;
use log::{error, info, warn};
use std::sync::Arc;

use reminder_engine::{
    Config, Database, MessageTemplates, NotificationDispatcher, RetryPolicy, SweepJob, Transports,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let config = Config::from_env()?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    let run_once = std::env::args().skip(1).any(|arg| arg == "--once");

    info!("Starting reminder daemon...");

    let database = Database::new(&config.database_path).await?;

    let templates = match &config.templates_path {
        Some(path) => {
            info!("Loading message templates from {path}");
            MessageTemplates::load(path)?
        }
        None => MessageTemplates::default(),
    };

    let transports = Transports::from_config(&config)?;
    if transports.is_empty() {
        warn!("No notification transports configured. Set NOTIFY_LOG_ONLY=true or a *_WEBHOOK_URL");
    }

    let dispatcher = NotificationDispatcher::new(
        database.clone(),
        transports,
        Arc::new(templates),
        RetryPolicy::from_config(&config),
    );
    let job = SweepJob::from_config(database, dispatcher, &config);

    if run_once {
        let report = job.run_sweep(Utc::now()).await?;
        info!("Single sweep done: {report}");
        return Ok(());
    }

    tokio::select! {
        _ = job.run(config.sweep_interval) => {}
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Failed to listen for shutdown signal: {e}");
            }
            info!("Shutdown signal received, stopping sweep loop");
        }
    }

    Ok(())
}
