//! Configuration management for genledger
//!
//! Settings are layered:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use genledger::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Any key can be overridden with `GENLEDGER__<section>__<key>`:
//! - `GENLEDGER__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `GENLEDGER__WORKERS__COUNT=8`
//! - `GENLEDGER__POLL__TIMEOUT=5m`
//!
//! The provider API key is a secret and is only read from
//! `GENLEDGER_PROVIDER_KEY` (or `FAL_KEY`).
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/genledger.toml`.
//! This can be overridden using the `GENLEDGER_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use models::{
    BillingConfig, CacheConfig, Config, KindPollBudget, ModelsConfig, NotifyConfig, PollConfig,
    ProviderConfig, RetryBudget, RetryConfig, ServerConfig, WorkersConfig,
};
pub use validation::ValidationError;

use crate::catalog::ConfiguredCatalog;
use crate::orchestrator::{PollBudget, PollSettings};
use crate::pricing::ConfiguredPricing;
use crate::provider::{HttpConfig, ProviderClientConfig};
use crate::retry::RetryPolicy;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("Provider API key is not set (GENLEDGER_PROVIDER_KEY or FAL_KEY)")]
    MissingApiKey,
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path, without secrets
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Settings for the provider client. Fails when no API key was loaded.
    pub fn provider_client_config(&self) -> Result<ProviderClientConfig, ConfigError> {
        let api_key = self
            .provider
            .api_key
            .clone()
            .ok_or(ConfigError::MissingApiKey)?;

        Ok(ProviderClientConfig {
            queue_base_url: self.provider.queue_base_url.clone(),
            api_key,
            internal_hosts: self.provider.internal_hosts.clone(),
            post_result_models: self.provider.post_result_models.clone(),
            full_path_models: self.provider.full_path_models.clone(),
            submit_retry: self.retry.submit.policy(),
            result_retry: self.retry.result.policy(),
            http: HttpConfig {
                connect_timeout: self.provider.connect_timeout.as_duration(),
                request_timeout: self.provider.request_timeout.as_duration(),
                user_agent: self.provider.user_agent.clone(),
            },
        })
    }

    pub fn pricing(&self) -> ConfiguredPricing {
        ConfiguredPricing::new(self.billing.default_price, self.billing.prices.clone())
    }

    pub fn catalog(&self) -> ConfiguredCatalog {
        ConfiguredCatalog::from_tables(&self.models.defaults, &self.models.aliases)
    }
}

impl RetryBudget {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            self.base_delay.as_duration(),
            self.max_delay.as_duration(),
        )
    }
}

impl PollConfig {
    pub fn settings(&self) -> PollSettings {
        PollSettings {
            initial_interval: self.initial_interval.as_duration(),
            max_interval: self.max_interval.as_duration(),
            backoff_multiplier: self.backoff_multiplier,
            max_attempts: self.max_attempts,
            timeout: self.timeout.as_duration(),
            per_kind: self
                .by_kind
                .iter()
                .filter_map(|(kind, budget)| {
                    let kind = kind.parse().ok()?;
                    Some((
                        kind,
                        PollBudget {
                            max_attempts: budget.max_attempts,
                            timeout: budget.timeout.as_duration(),
                        },
                    ))
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelCatalog;
    use crate::pricing::PricingPolicy;
    use crate::provider::JobKind;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[workers]\ncount = 2\n").unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.workers.count, 2);
        assert_eq!(config.workers.channel_size, 100);
    }

    #[test]
    fn test_validation_catches_missing_model() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[models.defaults]
generate = "fal-ai/nano-banana"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::MissingModel(_))
        ));
    }

    #[test]
    fn test_default_poll_budgets_per_kind() {
        let poll = Config::default().poll.settings();
        assert_eq!(poll.for_kind(JobKind::Generate).max_attempts, 120);
        assert_eq!(poll.for_kind(JobKind::Generate).timeout, Duration::from_secs(240));
        assert_eq!(poll.for_kind(JobKind::Edit).max_attempts, 180);
        assert_eq!(poll.for_kind(JobKind::Retouch).max_attempts, 180);
        assert_eq!(poll.for_kind(JobKind::FaceSwap).max_attempts, 150);
        assert_eq!(poll.for_kind(JobKind::Upscale).max_attempts, 90);
        assert_eq!(poll.for_kind(JobKind::Upscale).timeout, Duration::from_secs(180));
    }

    #[test]
    fn test_provider_config_requires_key() {
        let mut config = Config::default();
        assert!(matches!(
            config.provider_client_config(),
            Err(ConfigError::MissingApiKey)
        ));

        config.provider.api_key = Some("secret".to_string());
        config.retry.submit.max_attempts = 5;
        let client_config = config.provider_client_config().unwrap();
        assert_eq!(client_config.api_key, "secret");
        assert_eq!(client_config.submit_retry.max_attempts, 5);
        assert_eq!(client_config.result_retry.max_delay, Duration::from_secs(4));
        assert_eq!(client_config.http.request_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_full_config_example() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "127.0.0.1:8181"
ledger_path = "data/test-ledger"

[provider]
queue_base_url = "http://localhost:7000"
internal_hosts = ["localhost"]

[poll]
initial_interval = "250ms"
max_interval = "1s"
backoff_multiplier = 1.5
max_attempts = 10
timeout = "30s"

[poll.by_kind.upscale]
max_attempts = 4
timeout = "5s"

[billing]
default_price = 900

[billing.prices]
upscale = 400

[models.defaults]
generate = "fal-ai/nano-banana"
edit = "fal-ai/nano-banana/edit"
merge = "fal-ai/nano-banana/edit"
upscale = "fal-ai/recraft/upscale/crisp"
face-swap = "fal-ai/face-swap"
retouch = "fal-ai/retoucher"

[models.aliases]
flux-ultra = "fal-ai/flux-pro/v1.1-ultra"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();

        let poll = config.poll.settings();
        assert_eq!(poll.initial_interval, Duration::from_millis(250));
        assert_eq!(poll.max_attempts, 10);
        assert_eq!(poll.backoff_multiplier, 1.5);
        assert_eq!(poll.for_kind(JobKind::Generate).max_attempts, 10);
        assert_eq!(
            poll.for_kind(JobKind::Upscale),
            PollBudget {
                max_attempts: 4,
                timeout: Duration::from_secs(5),
            }
        );
        assert_eq!(poll.for_kind(JobKind::Edit).timeout, Duration::from_secs(30));

        let pricing = config.pricing();
        assert_eq!(pricing.base_price("upscale", None), 400);
        assert_eq!(pricing.base_price("generate", None), 900);

        let catalog = config.catalog();
        assert_eq!(
            catalog.resolve(JobKind::Retouch, None).unwrap(),
            "fal-ai/retoucher"
        );
        assert_eq!(
            catalog.resolve(JobKind::Generate, Some("flux-ultra")).unwrap(),
            "fal-ai/flux-pro/v1.1-ultra"
        );
    }
}
