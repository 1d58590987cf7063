//! Pipeline history migrator.
//!
//! One-shot maintenance binary run at upgrade time. It copies the most
//! recent builds kept as JSON snapshots in the deprecated
//! `pipeline_history_old` table into the normalized `pipeline_build` table.
//!
//! Every record is migrated in its own transaction and at most once, so the
//! binary can be re-run after a partial failure, or run on several hosts at
//! the same time.

mod config;
mod error;
mod metrics;
mod models;
mod schema;
mod services;
mod store;

use std::sync::Arc;

use clap::Parser;

use crate::config::MigrationConfig;
use crate::services::migration_service::MigrationDriver;
use crate::store::postgres::{build_pool, PgHistoryStore};

#[derive(Parser)]
#[command(name = "history-migrator", about = "Migrate legacy pipeline history")]
struct Cli {
    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Records migrated per application/pipeline/environment/branch
    /// [default: HISTORY_WINDOW or 10]
    #[arg(long)]
    window: Option<i64>,

    /// Groups migrated concurrently [default: HISTORY_WORKERS or 1]
    #[arg(long)]
    workers: Option<usize>,

    /// Connection pool size [default: HISTORY_POOL_SIZE or workers + 1]
    #[arg(long)]
    pool_size: Option<usize>,

    /// Install the Prometheus exporter
    #[arg(long)]
    metrics: bool,
}

impl Cli {
    fn into_config(self) -> MigrationConfig {
        let mut config = MigrationConfig::from_env();
        if let Some(url) = self.database_url {
            config.database_url = url;
        }
        if let Some(window) = self.window {
            config.window = window;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(pool_size) = self.pool_size {
            config.pool_size = pool_size;
        }
        config.metrics_enabled |= self.metrics;
        config.normalized()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let config = Cli::parse().into_config();

    if config.metrics_enabled {
        metrics::init_metrics();
    }

    tracing::info!(
        window = config.window,
        workers = config.workers,
        pool_size = config.pool_size,
        "Starting pipeline history migration..."
    );

    let pool = build_pool(&config.database_url, config.pool_size)?;
    let store = Arc::new(PgHistoryStore::new(pool));

    let summary = MigrationDriver::new(store)
        .with_window(config.window)
        .with_workers(config.workers)
        .run()
        .await?;

    if !summary.failed.is_empty() {
        tracing::warn!(
            failed = summary.failed.len(),
            "Some pipeline history needs manual follow-up"
        );
        for failed in &summary.failed {
            tracing::debug!(
                record_id = failed.record_id,
                kind = failed.kind,
                "Pipeline history left unmigrated"
            );
        }
    }

    tracing::info!(
        summary = %serde_json::to_string(&summary)?,
        "Pipeline history migration complete"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn numeric_settings_come_from_config_env_only() {
        let command = Cli::command();
        for id in ["window", "workers", "pool_size"] {
            let arg = command
                .get_arguments()
                .find(|arg| arg.get_id() == id)
                .unwrap();
            assert!(arg.get_env().is_none(), "{id} reads the environment twice");
        }
    }

    #[test]
    fn flags_override_environment_defaults() {
        let cli = Cli::try_parse_from(["history-migrator", "--window", "3", "--workers", "2"]).unwrap();
        let config = cli.into_config();
        assert_eq!(config.window, 3);
        assert_eq!(config.workers, 2);
    }
}
