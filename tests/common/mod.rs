//! Shared fixtures for integration tests: a scripted queue provider served by
//! axum on an ephemeral port, plus ledger and client builders.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use genledger::cache::TaskCache;
use genledger::ledger::BillingLedger;
use genledger::notify::{DeliveryTarget, NotifyError, Notifier};
use genledger::orchestrator::PollSettings;
use genledger::pricing::ConfiguredPricing;
use genledger::provider::{Asset, HttpConfig, ProviderClientConfig, ProviderJobClient};
use genledger::retry::RetryPolicy;

pub const TEST_API_KEY: &str = "test-key";

/// One canned reply
#[derive(Clone, Debug)]
pub struct MockResponse {
    pub status: u16,
    pub body: Value,
}

impl MockResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: json!({ "detail": format!("scripted {status}") }),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: Value,
    pub authorization: Option<String>,
}

type RouteKey = (String, String);

#[derive(Default)]
struct MockState {
    routes: Mutex<HashMap<RouteKey, VecDeque<MockResponse>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// Provider double. Each (method, path) has a queue of responses; the last
/// response repeats once the queue is drained. Unscripted routes answer 404.
pub struct MockProvider {
    pub base_url: String,
    state: Arc<MockState>,
}

impl MockProvider {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .fallback(handle)
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock provider");
        let addr = listener.local_addr().expect("mock provider address");

        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock provider");
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn script(&self, method: &str, path: &str, responses: Vec<MockResponse>) {
        self.state
            .routes
            .lock()
            .unwrap()
            .insert((method.to_string(), path.to_string()), responses.into());
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn hits(&self, method: &str, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    pub fn total_hits(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

async fn handle(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let path = uri.path().to_string();
    state.requests.lock().unwrap().push(RecordedRequest {
        method: method.to_string(),
        path: path.clone(),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    });

    let key = (method.to_string(), path);
    let response = {
        let mut routes = state.routes.lock().unwrap();
        routes.get_mut(&key).and_then(|queue| {
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        })
    };

    match response {
        Some(r) => (
            StatusCode::from_u16(r.status).unwrap(),
            Json(r.body),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": "not scripted" })),
        ),
    }
}

/// Fast retry budget for tests
pub fn quick_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(5))
}

pub fn quick_poll() -> PollSettings {
    PollSettings {
        initial_interval: Duration::from_millis(5),
        max_interval: Duration::from_millis(20),
        backoff_multiplier: 1.2,
        max_attempts: 20,
        timeout: Duration::from_secs(5),
        per_kind: HashMap::new(),
    }
}

pub fn client_config(base_url: &str) -> ProviderClientConfig {
    ProviderClientConfig {
        queue_base_url: base_url.to_string(),
        api_key: TEST_API_KEY.to_string(),
        internal_hosts: vec!["127.0.0.1".to_string()],
        submit_retry: quick_retry(3),
        result_retry: quick_retry(3),
        http: HttpConfig {
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            ..HttpConfig::default()
        },
        ..ProviderClientConfig::default()
    }
}

pub fn provider_client(mock: &MockProvider) -> (ProviderJobClient, Arc<TaskCache>) {
    provider_client_with_ttl(mock, genledger::cache::DEFAULT_TTL)
}

pub fn provider_client_with_ttl(
    mock: &MockProvider,
    ttl: Duration,
) -> (ProviderJobClient, Arc<TaskCache>) {
    let cache = Arc::new(TaskCache::new(ttl));
    let client = ProviderJobClient::new(client_config(&mock.base_url), cache.clone())
        .expect("provider client");
    (client, cache)
}

pub fn create_test_ledger(price: i64) -> (BillingLedger, TempDir) {
    let temp_dir = TempDir::new().expect("temp dir");
    let ledger = BillingLedger::open(
        temp_dir.path().join("ledger"),
        Arc::new(ConfiguredPricing::flat(price)),
    )
    .expect("open ledger");
    (ledger, temp_dir)
}

#[derive(Clone, Debug, PartialEq)]
pub enum Notice {
    Delivered { user_id: u64, asset: Asset },
    Failure { user_id: u64, text: String },
}

/// Notifier that records everything and answers `accept`
pub struct RecordingNotifier {
    pub notices: Mutex<Vec<Notice>>,
    accept: bool,
}

impl RecordingNotifier {
    pub fn new(accept: bool) -> Self {
        Self {
            notices: Mutex::new(Vec::new()),
            accept,
        }
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(
        &self,
        target: &DeliveryTarget,
        asset: &Asset,
        _caption: Option<&str>,
    ) -> Result<bool, NotifyError> {
        self.notices.lock().unwrap().push(Notice::Delivered {
            user_id: target.user_id,
            asset: asset.clone(),
        });
        Ok(self.accept)
    }

    async fn notify_failure(&self, target: &DeliveryTarget, text: &str) -> Result<bool, NotifyError> {
        self.notices.lock().unwrap().push(Notice::Failure {
            user_id: target.user_id,
            text: text.to_string(),
        });
        Ok(true)
    }
}
