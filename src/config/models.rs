use crate::humanize::HumanDuration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            ledger_path: default_ledger_path(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/ledger")
}

fn default_max_payload_bytes() -> usize {
    20 * 1024 * 1024 // inline images arrive as data URIs
}

/// Generation provider queue API
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    #[serde(default = "default_queue_base_url")]
    pub queue_base_url: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: HumanDuration,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: HumanDuration,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_internal_hosts")]
    pub internal_hosts: Vec<String>,
    #[serde(default = "default_post_result_models")]
    pub post_result_models: Vec<String>,
    #[serde(default = "default_full_path_models")]
    pub full_path_models: Vec<String>,
    /// API key (loaded from environment, not from config file)
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            queue_base_url: default_queue_base_url(),
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
            internal_hosts: default_internal_hosts(),
            post_result_models: default_post_result_models(),
            full_path_models: default_full_path_models(),
            api_key: None,
        }
    }
}

fn default_queue_base_url() -> String {
    "https://queue.fal.run".to_string()
}

fn default_connect_timeout() -> HumanDuration {
    HumanDuration::from_secs(10)
}

fn default_request_timeout() -> HumanDuration {
    HumanDuration::from_secs(60)
}

fn default_user_agent() -> String {
    concat!("genledger/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_internal_hosts() -> Vec<String> {
    vec!["queue.fal.run".to_string()]
}

fn default_post_result_models() -> Vec<String> {
    vec!["seedream".to_string()]
}

fn default_full_path_models() -> Vec<String> {
    vec![
        "fal-ai/recraft/upscale/crisp".to_string(),
        "fal-ai/recraft/upscale/creative".to_string(),
        "fal-ai/esrgan".to_string(),
    ]
}

/// Retry budgets per call kind
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_submit_budget")]
    pub submit: RetryBudget,
    #[serde(default = "default_result_budget")]
    pub result: RetryBudget,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            submit: default_submit_budget(),
            result: default_result_budget(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryBudget {
    pub max_attempts: u32,
    pub base_delay: HumanDuration,
    pub max_delay: HumanDuration,
}

fn default_submit_budget() -> RetryBudget {
    RetryBudget {
        max_attempts: 3,
        base_delay: HumanDuration::from_secs(2),
        max_delay: HumanDuration::from_secs(10),
    }
}

fn default_result_budget() -> RetryBudget {
    RetryBudget {
        max_attempts: 3,
        base_delay: HumanDuration::from_secs(1),
        max_delay: HumanDuration::from_secs(4),
    }
}

/// Status polling cadence
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_initial")]
    pub initial_interval: HumanDuration,
    #[serde(default = "default_poll_max")]
    pub max_interval: HumanDuration,
    #[serde(default = "default_poll_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_poll_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_poll_timeout")]
    pub timeout: HumanDuration,
    /// Job kind -> budget replacing `max_attempts` and `timeout`
    #[serde(default = "default_poll_by_kind")]
    pub by_kind: HashMap<String, KindPollBudget>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: default_poll_initial(),
            max_interval: default_poll_max(),
            backoff_multiplier: default_poll_multiplier(),
            max_attempts: default_poll_attempts(),
            timeout: default_poll_timeout(),
            by_kind: default_poll_by_kind(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct KindPollBudget {
    pub max_attempts: u32,
    pub timeout: HumanDuration,
}

fn default_poll_initial() -> HumanDuration {
    HumanDuration::from_secs(2)
}

fn default_poll_max() -> HumanDuration {
    HumanDuration::from_secs(10)
}

fn default_poll_multiplier() -> f64 {
    1.2
}

fn default_poll_attempts() -> u32 {
    120
}

fn default_poll_timeout() -> HumanDuration {
    HumanDuration::from_secs(240)
}

// Edits and retouching run longer than plain generation; upscales are quick
fn default_poll_by_kind() -> HashMap<String, KindPollBudget> {
    [
        ("edit", 180, 360),
        ("merge", 180, 360),
        ("retouch", 180, 360),
        ("face-swap", 150, 300),
        ("upscale", 90, 180),
    ]
    .into_iter()
    .map(|(kind, max_attempts, secs)| {
        (
            kind.to_string(),
            KindPollBudget {
                max_attempts,
                timeout: HumanDuration::from_secs(secs),
            },
        )
    })
    .collect()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl: HumanDuration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_cache_ttl(),
        }
    }
}

fn default_cache_ttl() -> HumanDuration {
    HumanDuration::from_secs(600)
}

/// Worker pool sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkersConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            channel_size: default_channel_size(),
        }
    }
}

fn default_worker_count() -> usize {
    4
}

fn default_channel_size() -> usize {
    100
}

/// Flat pricing in minor units
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BillingConfig {
    #[serde(default = "default_price")]
    pub default_price: i64,
    /// Per operation type overrides, keyed by job kind
    #[serde(default)]
    pub prices: HashMap<String, i64>,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            default_price: default_price(),
            prices: HashMap::new(),
        }
    }
}

fn default_price() -> i64 {
    900
}

/// Job kind -> provider model path
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelsConfig {
    #[serde(default = "default_model_defaults")]
    pub defaults: HashMap<String, String>,
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            defaults: default_model_defaults(),
            aliases: HashMap::new(),
        }
    }
}

fn default_model_defaults() -> HashMap<String, String> {
    [
        ("generate", "fal-ai/nano-banana"),
        ("edit", "fal-ai/nano-banana/edit"),
        ("merge", "fal-ai/nano-banana/edit"),
        ("upscale", "fal-ai/recraft/upscale/crisp"),
        ("face-swap", "fal-ai/face-swap"),
        ("retouch", "fal-ai/retoucher"),
    ]
    .into_iter()
    .map(|(kind, model)| (kind.to_string(), model.to_string()))
    .collect()
}

/// Result delivery
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifyConfig {
    /// Deliveries are only logged when unset
    pub webhook_url: Option<String>,
    #[serde(default = "default_notify_timeout")]
    pub timeout: HumanDuration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout: default_notify_timeout(),
        }
    }
}

fn default_notify_timeout() -> HumanDuration {
    HumanDuration::from_secs(30)
}
