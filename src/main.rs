// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::app::controller::{ActionController, ControllerTimeouts};

mod adapters;
mod app;
mod config;
mod logging;

fn log_config_report(report: &config::ConfigReport) {
    match (&report.config_path, report.config_path_source) {
        (Some(path), Some(source)) => {
            tracing::info!(
                "config path: {} (source={}, present={})",
                path.display(),
                source.as_str(),
                report.config_file_present
            );
        }
        (Some(path), None) => {
            tracing::info!(
                "config path: {} (present={})",
                path.display(),
                report.config_file_present
            );
        }
        (None, _) => {
            tracing::info!("config path: (none)");
        }
    }
    tracing::info!(
        "config database_path: {} (source={})",
        report.database_path.value.display(),
        report.database_path.source.as_str()
    );
    tracing::info!(
        "config submit_timeout_secs: {} (source={})",
        report.submit_timeout_secs.value,
        report.submit_timeout_secs.source.as_str()
    );
    tracing::info!(
        "config cancel_timeout_secs: {} (source={})",
        report.cancel_timeout_secs.value,
        report.cancel_timeout_secs.source.as_str()
    );
    tracing::info!(
        "config forced_stop_cancel_timeout_secs: {} (source={})",
        report.forced_stop_cancel_timeout_secs.value,
        report.forced_stop_cancel_timeout_secs.source.as_str()
    );
    tracing::info!(
        "config recovery_sweep_interval_secs: {} (source={})",
        report.recovery_sweep_interval_secs.value,
        report.recovery_sweep_interval_secs.source.as_str()
    );
    tracing::info!(
        "config recovery_staleness_secs: {} (source={})",
        report.recovery_staleness_secs.value,
        report.recovery_staleness_secs.source.as_str()
    );
    tracing::info!(
        "config submit_command: {} (source={})",
        report.submit_command.value.as_deref().unwrap_or("(unset)"),
        report.submit_command.source.as_str()
    );
    tracing::info!(
        "config cancel_command: {} (source={})",
        report.cancel_command.value.as_deref().unwrap_or("(unset)"),
        report.cancel_command.source.as_str()
    );
    tracing::info!(
        "config verbose: {} (source={})",
        report.verbose.value,
        report.verbose.source.as_str()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = adapters::cli::parse_opts();
    let opts = parsed.opts;
    let verbose_override = parsed.verbose_override;
    let config::LoadResult { config, report } = config::load_with_report(
        opts.config,
        config::Overrides {
            database_path: opts.database_path,
            submit_timeout_secs: opts.submit_timeout_secs,
            cancel_timeout_secs: opts.cancel_timeout_secs,
            recovery_sweep_interval_secs: opts.recovery_sweep_interval_secs,
            verbose: verbose_override,
        },
    )?;
    logging::init(config.verbose);
    log_config_report(&report);

    let submit_command = config
        .submit_command
        .clone()
        .context("submit_command must be set in the config file")?;
    let cancel_command = config
        .cancel_command
        .clone()
        .context("cancel_command must be set in the config file")?;

    config::ensure_database_dir(&config.database_path)?;
    let db = adapters::db::ApplicationStore::open(&config.database_path).await?;

    let store = Arc::new(adapters::db::SqliteRecordStore::new(db));
    let gateway = Arc::new(adapters::gateway::CommandGateway::new(
        submit_command,
        cancel_command,
    ));
    let events = Arc::new(adapters::telemetry::TracingEventSink::new());
    let clock = Arc::new(adapters::time::SystemClock::new());

    let controller = ActionController::new(
        store,
        gateway,
        events,
        clock,
        ControllerTimeouts {
            submit: Duration::from_secs(config.submit_timeout_secs),
            cancel: Duration::from_secs(config.cancel_timeout_secs),
            forced_stop_cancel: Duration::from_secs(config.forced_stop_cancel_timeout_secs),
        },
    );

    let staleness = Duration::from_secs(config.recovery_staleness_secs);
    let mut ticker =
        tokio::time::interval(Duration::from_secs(config.recovery_sweep_interval_secs));
    tracing::info!("recovery sweep running");
    loop {
        ticker.tick().await;
        match controller.recover_stale(staleness).await {
            Ok(0) => {}
            Ok(recovered) => {
                tracing::info!(recovered, "recovery sweep re-drove stale applications");
            }
            Err(err) => tracing::warn!("recovery sweep failed: {err}"),
        }
    }
}
