// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

const APP_DIR_NAME: &str = "lifecycled";
const CONFIG_FILE_NAME: &str = "lifecycled.toml";
const CONFIG_ENV_VAR: &str = "LIFECYCLED_CONFIG_PATH";
const DATABASE_FILE_NAME: &str = "lifecycled.sqlite";
const DEFAULT_SUBMIT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CANCEL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_FORCED_STOP_CANCEL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RECOVERY_SWEEP_INTERVAL_SECS: u64 = 30;
const DEFAULT_RECOVERY_STALENESS_SECS: u64 = 300;

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    database_path: Option<String>,
    submit_timeout_secs: Option<u64>,
    cancel_timeout_secs: Option<u64>,
    forced_stop_cancel_timeout_secs: Option<u64>,
    recovery_sweep_interval_secs: Option<u64>,
    recovery_staleness_secs: Option<u64>,
    submit_command: Option<String>,
    cancel_command: Option<String>,
    verbose: Option<bool>,
}

#[derive(Debug)]
pub struct Config {
    pub database_path: PathBuf,
    pub submit_timeout_secs: u64,
    pub cancel_timeout_secs: u64,
    pub forced_stop_cancel_timeout_secs: u64,
    pub recovery_sweep_interval_secs: u64,
    pub recovery_staleness_secs: u64,
    pub submit_command: Option<String>,
    pub cancel_command: Option<String>,
    pub verbose: bool,
    #[allow(dead_code)]
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Override,
    Env,
    ConfigFile,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Override => "override",
            ConfigSource::Env => "env",
            ConfigSource::ConfigFile => "config",
            ConfigSource::Default => "default",
        }
    }
}

#[derive(Debug)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

#[derive(Debug)]
pub struct ConfigReport {
    pub config_path: Option<PathBuf>,
    pub config_path_source: Option<ConfigSource>,
    pub config_file_present: bool,
    pub database_path: ConfigValue<PathBuf>,
    pub submit_timeout_secs: ConfigValue<u64>,
    pub cancel_timeout_secs: ConfigValue<u64>,
    pub forced_stop_cancel_timeout_secs: ConfigValue<u64>,
    pub recovery_sweep_interval_secs: ConfigValue<u64>,
    pub recovery_staleness_secs: ConfigValue<u64>,
    pub submit_command: ConfigValue<Option<String>>,
    pub cancel_command: ConfigValue<Option<String>>,
    pub verbose: ConfigValue<bool>,
}

#[derive(Debug)]
pub struct LoadResult {
    pub config: Config,
    pub report: ConfigReport,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub database_path: Option<PathBuf>,
    pub submit_timeout_secs: Option<u64>,
    pub cancel_timeout_secs: Option<u64>,
    pub recovery_sweep_interval_secs: Option<u64>,
    pub verbose: Option<bool>,
}

#[allow(dead_code)]
pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    Ok(load_with_report(config_path_override, overrides)?.config)
}

pub fn load_with_report(
    config_path_override: Option<PathBuf>,
    overrides: Overrides,
) -> Result<LoadResult> {
    let (config_path, config_path_source, required) = match config_path_override {
        Some(path) => (Some(expand_path(path)), Some(ConfigSource::Override), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), Some(ConfigSource::Env), true),
            None => match default_config_path().ok() {
                Some(path) => (Some(path), Some(ConfigSource::Default), false),
                None => (None, None, false),
            },
        },
    };
    let config_file_present = config_path
        .as_deref()
        .map(|path| path.exists())
        .unwrap_or(false);

    let file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };

    let (database_path, database_source) = match overrides.database_path {
        Some(path) => (expand_path(path), ConfigSource::Override),
        None => match file_config.database_path {
            Some(raw) => (
                resolve_path(
                    &raw,
                    config_path.as_deref().and_then(|path| path.parent()),
                ),
                ConfigSource::ConfigFile,
            ),
            None => (
                default_database_path().with_context(|| {
                    "failed to resolve default database path; specify --database-path or set database_path in the config file"
                })?,
                ConfigSource::Default,
            ),
        },
    };

    let (submit_timeout_secs, submit_timeout_source) = match overrides.submit_timeout_secs {
        Some(secs) => (secs, ConfigSource::Override),
        None => match file_config.submit_timeout_secs {
            Some(secs) => (secs, ConfigSource::ConfigFile),
            None => (DEFAULT_SUBMIT_TIMEOUT_SECS, ConfigSource::Default),
        },
    };
    if submit_timeout_secs == 0 {
        anyhow::bail!("submit_timeout_secs must be greater than zero");
    }

    let (cancel_timeout_secs, cancel_timeout_source) = match overrides.cancel_timeout_secs {
        Some(secs) => (secs, ConfigSource::Override),
        None => match file_config.cancel_timeout_secs {
            Some(secs) => (secs, ConfigSource::ConfigFile),
            None => (DEFAULT_CANCEL_TIMEOUT_SECS, ConfigSource::Default),
        },
    };
    if cancel_timeout_secs == 0 {
        anyhow::bail!("cancel_timeout_secs must be greater than zero");
    }

    let (forced_stop_cancel_timeout_secs, forced_stop_cancel_timeout_source) =
        match file_config.forced_stop_cancel_timeout_secs {
            Some(secs) => (secs, ConfigSource::ConfigFile),
            None => (
                DEFAULT_FORCED_STOP_CANCEL_TIMEOUT_SECS,
                ConfigSource::Default,
            ),
        };
    if forced_stop_cancel_timeout_secs == 0 {
        anyhow::bail!("forced_stop_cancel_timeout_secs must be greater than zero");
    }

    let (recovery_sweep_interval_secs, recovery_sweep_interval_source) =
        match overrides.recovery_sweep_interval_secs {
            Some(secs) => (secs, ConfigSource::Override),
            None => match file_config.recovery_sweep_interval_secs {
                Some(secs) => (secs, ConfigSource::ConfigFile),
                None => (DEFAULT_RECOVERY_SWEEP_INTERVAL_SECS, ConfigSource::Default),
            },
        };
    if recovery_sweep_interval_secs == 0 {
        anyhow::bail!("recovery_sweep_interval_secs must be greater than zero");
    }

    let (recovery_staleness_secs, recovery_staleness_source) =
        match file_config.recovery_staleness_secs {
            Some(secs) => (secs, ConfigSource::ConfigFile),
            None => (DEFAULT_RECOVERY_STALENESS_SECS, ConfigSource::Default),
        };
    if recovery_staleness_secs == 0 {
        anyhow::bail!("recovery_staleness_secs must be greater than zero");
    }

    let (submit_command, submit_command_source) = match file_config.submit_command {
        Some(command) => (Some(command), ConfigSource::ConfigFile),
        None => (None, ConfigSource::Default),
    };
    let (cancel_command, cancel_command_source) = match file_config.cancel_command {
        Some(command) => (Some(command), ConfigSource::ConfigFile),
        None => (None, ConfigSource::Default),
    };

    let (verbose, verbose_source) = match overrides.verbose {
        Some(verbose) => (verbose, ConfigSource::Override),
        None => match file_config.verbose {
            Some(verbose) => (verbose, ConfigSource::ConfigFile),
            None => (false, ConfigSource::Default),
        },
    };

    let config = Config {
        database_path,
        submit_timeout_secs,
        cancel_timeout_secs,
        forced_stop_cancel_timeout_secs,
        recovery_sweep_interval_secs,
        recovery_staleness_secs,
        submit_command,
        cancel_command,
        verbose,
        config_path: config_path.clone(),
    };

    let report = ConfigReport {
        config_path,
        config_path_source,
        config_file_present,
        database_path: ConfigValue {
            value: config.database_path.clone(),
            source: database_source,
        },
        submit_timeout_secs: ConfigValue {
            value: config.submit_timeout_secs,
            source: submit_timeout_source,
        },
        cancel_timeout_secs: ConfigValue {
            value: config.cancel_timeout_secs,
            source: cancel_timeout_source,
        },
        forced_stop_cancel_timeout_secs: ConfigValue {
            value: config.forced_stop_cancel_timeout_secs,
            source: forced_stop_cancel_timeout_source,
        },
        recovery_sweep_interval_secs: ConfigValue {
            value: config.recovery_sweep_interval_secs,
            source: recovery_sweep_interval_source,
        },
        recovery_staleness_secs: ConfigValue {
            value: config.recovery_staleness_secs,
            source: recovery_staleness_source,
        },
        submit_command: ConfigValue {
            value: config.submit_command.clone(),
            source: submit_command_source,
        },
        cancel_command: ConfigValue {
            value: config.cancel_command.clone(),
            source: cancel_command_source,
        },
        verbose: ConfigValue {
            value: config.verbose,
            source: verbose_source,
        },
    };

    Ok(LoadResult { config, report })
}

pub fn ensure_database_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }
    Ok(())
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    Ok(default_config_dir()?.join(CONFIG_FILE_NAME))
}

fn default_database_path() -> Result<PathBuf> {
    Ok(default_data_dir()?.join(DATABASE_FILE_NAME))
}

fn default_config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME))
}

fn default_data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("failed to resolve data directory")?;
    Ok(base.join(APP_DIR_NAME))
}
