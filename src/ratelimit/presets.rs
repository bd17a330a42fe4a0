//! Named limiter configurations tuned for common call patterns.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::rules::{LimiterConfig, SlidingWindowConfig, TokenBucketConfig};
use crate::error::{AdmitError, Result};

const MINUTE_MS: u64 = 60 * 1000;

/// A pre-tuned limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// Login and credential checks: 5 per 15 minutes, no burst tolerance
    Auth,
    /// General API traffic: 100 per minute
    Api,
    /// Costly operations: 10 per hour
    Expensive,
    /// Interactive traffic: bursts of 20, 2 per second sustained
    Realtime,
    /// Uploads: bursts of 5, one every 10 seconds sustained
    Uploads,
    /// Search: bursts of 30, 1 per second sustained
    Search,
}

impl Preset {
    pub const ALL: [Preset; 6] = [
        Preset::Auth,
        Preset::Api,
        Preset::Expensive,
        Preset::Realtime,
        Preset::Uploads,
        Preset::Search,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Preset::Auth => "auth",
            Preset::Api => "api",
            Preset::Expensive => "expensive",
            Preset::Realtime => "realtime",
            Preset::Uploads => "uploads",
            Preset::Search => "search",
        }
    }

    /// The preset's configuration, namespaced by its name.
    pub fn config(&self) -> LimiterConfig {
        let config = match self {
            Preset::Auth => {
                LimiterConfig::SlidingWindow(SlidingWindowConfig::new(15 * MINUTE_MS, 5))
            }
            Preset::Api => LimiterConfig::SlidingWindow(SlidingWindowConfig::new(MINUTE_MS, 100)),
            Preset::Expensive => {
                LimiterConfig::SlidingWindow(SlidingWindowConfig::new(60 * MINUTE_MS, 10))
            }
            Preset::Realtime => LimiterConfig::TokenBucket(TokenBucketConfig::new(20, 2.0)),
            Preset::Uploads => LimiterConfig::TokenBucket(TokenBucketConfig::new(5, 0.1)),
            Preset::Search => LimiterConfig::TokenBucket(TokenBucketConfig::new(30, 1.0)),
        };
        config.with_namespace(self.name())
    }

    /// The preset's configuration with `overrides` applied.
    pub fn config_with(&self, overrides: &LimitOverride) -> Result<LimiterConfig> {
        overrides.apply(self.config())
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = AdmitError;

    fn from_str(s: &str) -> Result<Self> {
        Preset::ALL
            .into_iter()
            .find(|preset| preset.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| AdmitError::Config(format!("unknown preset: {}", s)))
    }
}

/// Field overrides applied on top of a preset.
///
/// Window fields only apply to sliding window presets and bucket fields only
/// to token bucket presets; a mismatch is a configuration error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitOverride {
    #[serde(default)]
    pub window_ms: Option<u64>,
    #[serde(default)]
    pub max_requests: Option<u32>,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub refill_rate: Option<f64>,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl LimitOverride {
    /// Apply these overrides to `config` and validate the result.
    pub fn apply(&self, config: LimiterConfig) -> Result<LimiterConfig> {
        let mut config = match config {
            LimiterConfig::SlidingWindow(mut window) => {
                if self.capacity.is_some() || self.refill_rate.is_some() {
                    return Err(AdmitError::Config(
                        "capacity/refill_rate do not apply to a sliding window".to_string(),
                    ));
                }
                if let Some(window_ms) = self.window_ms {
                    window.window_ms = window_ms;
                }
                if let Some(max_requests) = self.max_requests {
                    window.max_requests = max_requests;
                }
                LimiterConfig::SlidingWindow(window)
            }
            LimiterConfig::TokenBucket(mut bucket) => {
                if self.window_ms.is_some() || self.max_requests.is_some() {
                    return Err(AdmitError::Config(
                        "window_ms/max_requests do not apply to a token bucket".to_string(),
                    ));
                }
                if let Some(capacity) = self.capacity {
                    bucket.capacity = capacity;
                }
                if let Some(refill_rate) = self.refill_rate {
                    bucket.refill_rate = refill_rate;
                }
                LimiterConfig::TokenBucket(bucket)
            }
        };

        if let Some(namespace) = &self.namespace {
            config = config.with_namespace(namespace.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_presets_are_valid() {
        for preset in Preset::ALL {
            preset.config().validate().unwrap();
        }
    }

    #[test]
    fn test_preset_algorithms() {
        for preset in [Preset::Auth, Preset::Api, Preset::Expensive] {
            assert!(matches!(preset.config(), LimiterConfig::SlidingWindow(_)));
        }
        for preset in [Preset::Realtime, Preset::Uploads, Preset::Search] {
            assert!(matches!(preset.config(), LimiterConfig::TokenBucket(_)));
        }
    }

    #[test]
    fn test_auth_preset_values() {
        match Preset::Auth.config() {
            LimiterConfig::SlidingWindow(config) => {
                assert_eq!(config.window_ms, 900_000);
                assert_eq!(config.max_requests, 5);
                assert_eq!(config.namespace(), "auth");
            }
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[test]
    fn test_parse_preset_names() {
        assert_eq!("search".parse::<Preset>().unwrap(), Preset::Search);
        assert_eq!("API".parse::<Preset>().unwrap(), Preset::Api);
        assert!("bogus".parse::<Preset>().is_err());

        for preset in Preset::ALL {
            assert_eq!(preset.to_string().parse::<Preset>().unwrap(), preset);
        }
    }

    #[test]
    fn test_override_fields() {
        let overrides = LimitOverride {
            max_requests: Some(500),
            ..Default::default()
        };
        match Preset::Api.config_with(&overrides).unwrap() {
            LimiterConfig::SlidingWindow(config) => {
                assert_eq!(config.max_requests, 500);
                assert_eq!(config.window_ms, MINUTE_MS);
            }
            other => panic!("unexpected config: {:?}", other),
        }

        let overrides = LimitOverride {
            refill_rate: Some(5.0),
            namespace: Some("live".to_string()),
            ..Default::default()
        };
        match Preset::Realtime.config_with(&overrides).unwrap() {
            LimiterConfig::TokenBucket(config) => {
                assert_eq!(config.capacity, 20);
                assert_eq!(config.refill_rate, 5.0);
                assert_eq!(config.namespace(), "live");
            }
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[test]
    fn test_override_mismatch_and_invalid_values() {
        let bucket_fields = LimitOverride {
            capacity: Some(3),
            ..Default::default()
        };
        assert!(Preset::Auth.config_with(&bucket_fields).is_err());

        let window_fields = LimitOverride {
            window_ms: Some(1_000),
            ..Default::default()
        };
        assert!(Preset::Uploads.config_with(&window_fields).is_err());

        let zero = LimitOverride {
            max_requests: Some(0),
            ..Default::default()
        };
        assert!(Preset::Api.config_with(&zero).is_err());
    }
}
