//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` (or the path in `SETTLER_CONFIG`) and deserializes
//! into strongly-typed structs. The database URL may be given inline or
//! referenced by env-var name and resolved at runtime.

use anyhow::{Context, Result};
use chrono::Datelike;
use serde::Deserialize;
use std::fs;

use crate::engine::pipeline::PipelineConfig;
use crate::types::SeasonType;

/// Env var overriding the config file path.
pub const CONFIG_PATH_ENV: &str = "SETTLER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Inline URL, used when `url_env` is unset or the variable is missing.
    #[serde(default)]
    pub url: Option<String>,
    /// Name of the env var holding the URL.
    #[serde(default)]
    pub url_env: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SettlementConfig {
    /// Defaults to the current calendar year.
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub week: Option<i32>,
    #[serde(default)]
    pub seas_type: Option<SeasonType>,
    #[serde(default = "default_true")]
    pub missing_only: bool,
    #[serde(default)]
    pub current_week_only: bool,
    #[serde(default = "default_selection_batch_size")]
    pub selection_batch_size: usize,
    #[serde(default = "default_game_batch_size")]
    pub game_batch_size: usize,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_preview_limit")]
    pub preview_limit: usize,
    /// Log every calculator's health, not just failures.
    #[serde(default)]
    pub verbose_health: bool,
}

fn default_max_connections() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_selection_batch_size() -> usize {
    500
}

fn default_game_batch_size() -> usize {
    10
}

fn default_fetch_concurrency() -> usize {
    5
}

fn default_preview_limit() -> usize {
    20
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            year: None,
            week: None,
            seas_type: None,
            missing_only: true,
            current_week_only: false,
            selection_batch_size: default_selection_batch_size(),
            game_batch_size: default_game_batch_size(),
            fetch_concurrency: default_fetch_concurrency(),
            dry_run: false,
            preview_limit: default_preview_limit(),
            verbose_health: false,
        }
    }
}

impl SettlementConfig {
    /// Pipeline parameters, filling the year from the clock if unset.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            year: self.year.unwrap_or_else(|| chrono::Utc::now().year()),
            week: self.week,
            seas_type: self.seas_type,
            missing_only: self.missing_only,
            current_week_only: self.current_week_only,
            selection_batch_size: self.selection_batch_size,
            game_batch_size: self.game_batch_size,
            fetch_concurrency: self.fetch_concurrency,
            dry_run: self.dry_run,
            preview_limit: self.preview_limit,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// The config path: `SETTLER_CONFIG` if set, else `config.toml`.
    pub fn path_from_env() -> String {
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// The database URL: the `url_env` variable if set, else the inline url.
    pub fn database_url(&self) -> Result<String> {
        if let Some(env_name) = &self.database.url_env {
            match Self::resolve_env(env_name) {
                Ok(url) => return Ok(url),
                Err(e) if self.database.url.is_none() => return Err(e),
                Err(_) => {}
            }
        }
        self.database
            .url
            .clone()
            .context("No database url configured (set database.url or database.url_env)")
    }
}
