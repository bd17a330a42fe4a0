//! Configuration management for the admit service.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::error::{AdmitError, Result};
use crate::ratelimit::{LimitOverride, LimiterConfig, Preset};

/// Prefix of environment variables read by [`AdmitConfig::load`].
pub const ENV_PREFIX: &str = "ADMIT";

/// Main configuration for the admit service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdmitConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Named limiters; every preset is registered when empty
    #[serde(default)]
    pub limiters: BTreeMap<String, LimiterSpec>,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Seconds between sweeps of expired entries
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    60
}

/// One named limiter.
///
/// With neither `preset` nor `config`, the entry's name is read as a preset
/// name. `overrides` apply on top of whichever base is chosen.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimiterSpec {
    #[serde(default)]
    pub preset: Option<Preset>,
    #[serde(default)]
    pub config: Option<LimiterConfig>,
    #[serde(default)]
    pub overrides: LimitOverride,
}

impl LimiterSpec {
    /// Resolve to a validated configuration namespaced by `name`.
    pub fn resolve(&self, name: &str) -> Result<LimiterConfig> {
        let base = match (&self.config, self.preset) {
            (Some(_), Some(_)) => {
                return Err(AdmitError::Config(format!(
                    "limiter {}: set either preset or config, not both",
                    name
                )))
            }
            (Some(config), None) => config.clone(),
            (None, Some(preset)) => preset.config(),
            (None, None) => name.parse::<Preset>()?.config(),
        };

        self.overrides
            .apply(base.with_namespace(name))
            .map_err(|e| AdmitError::Config(format!("limiter {}: {}", name, e)))
    }
}

/// The sections environment variables may override.
#[derive(Debug, Serialize, Deserialize)]
struct RuntimeSettings {
    server: ServerConfig,
    store: StoreConfig,
}

fn config_error(e: config::ConfigError) -> AdmitError {
    AdmitError::Config(e.to_string())
}

impl AdmitConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| AdmitError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load an optional YAML file, then apply `ADMIT__*` environment
    /// variables to the `server` and `store` sections.
    ///
    /// `ADMIT__SERVER__LISTEN_ADDR=0.0.0.0:9000` overrides
    /// `server.listen_addr`. Limiters come from the file alone, so their
    /// names keep their case.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut admit = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        let base = RuntimeSettings {
            server: admit.server.clone(),
            store: admit.store.clone(),
        };
        let settings: RuntimeSettings = config::Config::builder()
            .add_source(config::Config::try_from(&base).map_err(config_error)?)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(config_error)?;

        admit.server = settings.server;
        admit.store = settings.store;
        Ok(admit)
    }

    /// Resolve every named limiter.
    pub fn limiter_configs(&self) -> Result<BTreeMap<String, LimiterConfig>> {
        if self.limiters.is_empty() {
            return Ok(Preset::ALL
                .into_iter()
                .map(|preset| (preset.name().to_string(), preset.config()))
                .collect());
        }

        self.limiters
            .iter()
            .map(|(name, spec)| spec.resolve(name).map(|config| (name.clone(), config)))
            .collect()
    }
}
