//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Marketplace secrets are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::{AggregationPolicy, EngineSettings};
use crate::marketplaces::MarketKind;
use crate::provider::{Credentials, ProviderSettings};
use crate::strategy::sensor::SensorConfig;
use crate::strategy::spot::SpotConfig;
use crate::types::{PoolSpec, RentalError, RentalRequest};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub engine: EngineConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub pool: Option<PoolSpec>,
    #[serde(default)]
    pub manual: Option<RentalRequest>,
    #[serde(default)]
    pub spot: SpotConfig,
    #[serde(default)]
    pub sensor: Option<SensorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    pub name: String,
    #[serde(default)]
    pub aggregation: AggregationPolicy,
    /// Per-provider bound on a rental pipeline run. Unset means no bound.
    #[serde(default)]
    pub rent_timeout_secs: Option<u64>,
    #[serde(default = "default_state_file")]
    pub state_file: String,
    /// Skip snapshot persistence entirely.
    #[serde(default)]
    pub memory_only: bool,
    /// Balance each paper marketplace starts with in dry runs.
    #[serde(default = "default_paper_balance")]
    pub paper_balance: Decimal,
}

fn default_state_file() -> String {
    crate::storage::DEFAULT_STATE_FILE.to_string()
}

fn default_paper_balance() -> Decimal {
    Decimal::ONE
}

impl EngineConfig {
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            aggregation: self.aggregation,
            rent_timeout: self.rent_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub kind: MarketKind,
    #[serde(default)]
    pub name: Option<String>,
    pub api_key_env: String,
    #[serde(default)]
    pub api_secret_env: Option<String>,
    #[serde(default)]
    pub api_id_env: Option<String>,
    #[serde(default)]
    pub active_pool: Option<String>,
    #[serde(default)]
    pub active_profile: Option<String>,
}

impl ProviderConfig {
    /// Resolve the referenced secrets and build validated provider settings.
    pub fn into_settings(self) -> Result<ProviderSettings, RentalError> {
        let api_key = AppConfig::resolve_env(&self.api_key_env)
            .map_err(|_| RentalError::Config("settings.api_key is required!".to_string()))?;
        let optional = |env: &Option<String>| {
            env.as_deref()
                .and_then(|name| AppConfig::resolve_env(name).ok())
                .filter(|v| !v.is_empty())
        };
        let credentials = Credentials::new(
            api_key,
            optional(&self.api_secret_env),
            optional(&self.api_id_env),
        );

        let settings = ProviderSettings {
            kind: self.kind,
            name: self.name,
            credentials,
            active_pool: self.active_pool,
            active_profile: self.active_profile,
        };
        settings.validate()?;
        Ok(settings)
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

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
