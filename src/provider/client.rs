//! Provider queue client: submit, poll and resolve
//!
//! Status polling uses the cached `status_url` when there is one and otherwise
//! the generic `{model}/requests/{id}/status` endpoint, so a worker that never
//! saw the submission can still follow the task.
//!
//! Result resolution tries, in order: an inline `data:` reference, a direct
//! external URL, the cached status/submission payloads, the POST-result
//! endpoint for models that only serve results that way, and finally the
//! candidate GET endpoints on the base and full model paths. Unsupported-shape
//! responses (404/405/422) and payloads without an asset move on to the next
//! candidate; running out of candidates is [`ProviderError::NoResult`].

use super::error::{ProviderError, Result};
use super::extract::{Extractor, decode_data_uri};
use super::http::{HttpConfig, ProviderHttp};
use super::{Asset, GenerationProvider, JobKind, JobStatus, StatusReport};
use crate::cache::{TaskCache, TaskCacheEntry};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use reqwest::Url;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_QUEUE_BASE_URL: &str = "https://queue.fal.run";

/// Runtime settings for [`ProviderJobClient`]
#[derive(Debug, Clone)]
pub struct ProviderClientConfig {
    pub queue_base_url: String,
    pub api_key: String,
    /// Hosts whose URLs are queue API endpoints, never assets
    pub internal_hosts: Vec<String>,
    /// Model families whose result is fetched by `POST {model}` with the request id
    pub post_result_models: Vec<String>,
    /// Models whose queue path is the full model path
    pub full_path_models: Vec<String>,
    pub submit_retry: RetryPolicy,
    pub result_retry: RetryPolicy,
    pub http: HttpConfig,
}

impl Default for ProviderClientConfig {
    fn default() -> Self {
        Self {
            queue_base_url: DEFAULT_QUEUE_BASE_URL.to_string(),
            api_key: String::new(),
            internal_hosts: vec!["queue.fal.run".to_string()],
            post_result_models: vec!["seedream".to_string()],
            full_path_models: vec![
                "fal-ai/recraft/upscale/crisp".to_string(),
                "fal-ai/recraft/upscale/creative".to_string(),
                "fal-ai/esrgan".to_string(),
            ],
            submit_retry: RetryPolicy::submit(),
            result_retry: RetryPolicy::result(),
            http: HttpConfig::default(),
        }
    }
}

pub struct ProviderJobClient {
    http: ProviderHttp,
    cache: Arc<TaskCache>,
    config: ProviderClientConfig,
}

impl ProviderJobClient {
    pub fn new(mut config: ProviderClientConfig, cache: Arc<TaskCache>) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::Config("provider API key is empty".into()));
        }
        Url::parse(&config.queue_base_url).map_err(|e| {
            ProviderError::Config(format!("invalid queue base URL {}: {}", config.queue_base_url, e))
        })?;
        config.queue_base_url = config.queue_base_url.trim_end_matches('/').to_string();

        let http = ProviderHttp::new(&config.http, &config.api_key)?;
        Ok(Self {
            http,
            cache,
            config,
        })
    }

    pub fn cache(&self) -> &Arc<TaskCache> {
        &self.cache
    }

    /// `{base}/{model}[/{suffix}]`
    pub fn queue_url(&self, model: &str, suffix: Option<&str>) -> String {
        let model = model.trim_matches('/');
        match suffix {
            Some(suffix) => format!(
                "{}/{}/{}",
                self.config.queue_base_url,
                model,
                suffix.trim_matches('/')
            ),
            None => format!("{}/{}", self.config.queue_base_url, model),
        }
    }

    /// Queue path the provider uses for status and result URLs
    pub fn base_model_path(&self, model: &str) -> String {
        let normalized = model.trim_matches('/');
        if self
            .config
            .full_path_models
            .iter()
            .any(|m| m.trim_matches('/') == normalized)
        {
            return normalized.to_string();
        }

        let parts: Vec<&str> = normalized.split('/').collect();
        if parts.len() > 2 {
            parts[..parts.len() - 1].join("/")
        } else {
            normalized.to_string()
        }
    }

    pub fn is_internal_url(&self, url: &str) -> bool {
        if url.starts_with(&self.config.queue_base_url) {
            return true;
        }
        match Url::parse(url) {
            Ok(parsed) => parsed
                .host_str()
                .is_some_and(|host| self.config.internal_hosts.iter().any(|h| h == host)),
            Err(_) => false,
        }
    }

    fn uses_post_result(&self, model: &str) -> bool {
        let model = model.to_ascii_lowercase();
        self.config
            .post_result_models
            .iter()
            .any(|family| model.contains(&family.to_ascii_lowercase()))
    }

    fn extractor(&self) -> Extractor<impl Fn(&str) -> bool + '_> {
        Extractor::new(move |url: &str| self.is_internal_url(url))
    }

    async fn fetch_status(&self, entry: &TaskCacheEntry) -> Result<Value> {
        if let Some(url) = &entry.status_url {
            match self.http.get_json(url).await {
                Ok(payload) => return Ok(payload),
                Err(e) => {
                    warn!(task_id = %entry.task_id, error = %e, "Cached status URL failed, using generic endpoint");
                }
            }
        }

        let suffix = format!("requests/{}/status", entry.task_id);
        let base = self.base_model_path(&entry.model);
        let url = self.queue_url(&base, Some(&suffix));

        match self.http.get_json(&url).await {
            Err(e) if e.status_code() == Some(404) && base != entry.model.trim_matches('/') => {
                debug!(task_id = %entry.task_id, "Status 404 on base path, retrying with full model path");
                self.http
                    .get_json(&self.queue_url(&entry.model, Some(&suffix)))
                    .await
            }
            other => other,
        }
    }

    fn extract_and_cache(&self, request_id: &str, payload: &Value) -> Option<Asset> {
        self.cache.update(request_id, |entry| {
            entry.raw_result = Some(payload.clone());
        });
        self.extractor().extract(payload)
    }

    fn result_candidates(&self, model: &str, request_id: &str, result_ref: &str) -> Vec<String> {
        let mut paths = vec![self.base_model_path(model)];
        let full = model.trim_matches('/').to_string();
        if !paths.contains(&full) {
            paths.push(full);
        }

        let mut candidates = Vec::new();
        for path in &paths {
            for suffix in ["", "/response", "/result"] {
                candidates.push(self.queue_url(path, Some(&format!("requests/{}{}", request_id, suffix))));
            }
        }
        if !candidates.iter().any(|c| c == result_ref) {
            candidates.push(result_ref.to_string());
        }
        candidates
    }

    async fn resolve_via_post(&self, model: &str, request_id: &str) -> Result<Option<Asset>> {
        let url = self.queue_url(model, None);
        let body = json!({ "requestId": request_id });

        let fetched = self
            .config
            .result_retry
            .run("result-post", || self.http.post_json(&url, &body), ProviderError::classify)
            .await;

        match fetched {
            Ok(payload) => Ok(self.extract_and_cache(request_id, &payload)),
            Err(e) if e.is_unsupported_shape() => {
                debug!(request_id, error = %e, "POST result not supported, trying GET candidates");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl GenerationProvider for ProviderJobClient {
    async fn submit(&self, kind: JobKind, model: &str, payload: &Value) -> Result<String> {
        let url = self.queue_url(model, None);

        let response = self
            .config
            .submit_retry
            .run("submit", || self.http.post_json(&url, payload), ProviderError::classify)
            .await?;

        let task_id = response
            .get("request_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or(ProviderError::MissingTaskId)?
            .to_string();

        let mut entry = TaskCacheEntry::new(task_id.clone(), model.trim_matches('/'));
        entry.status_url = string_field(&response, "status_url");
        entry.response_url = string_field(&response, "response_url");
        entry.queue_response = Some(response);
        self.cache.put(task_id.clone(), entry);

        info!(task_id = %task_id, model, kind = %kind, "Job submitted to provider");
        Ok(task_id)
    }

    async fn poll_status(&self, task_id: &str, model: &str) -> Result<StatusReport> {
        let entry = self.cache.get(task_id).unwrap_or_else(|| {
            debug!(task_id, model, "Task not in cache, using generic status endpoint");
            let entry = TaskCacheEntry::new(task_id, model.trim_matches('/'));
            self.cache.put(task_id, entry.clone());
            entry
        });

        let payload = match self.fetch_status(&entry).await {
            Ok(payload) => payload,
            Err(e) if e.status_code() == Some(404) => {
                debug!(task_id, "Provider does not know the task");
                return Ok(StatusReport::not_found());
            }
            Err(e) => return Err(e),
        };

        let status = payload
            .get("status")
            .and_then(Value::as_str)
            .map(JobStatus::from_provider)
            .unwrap_or(JobStatus::Processing);
        let error = match status {
            JobStatus::Failed => {
                Some(error_text(&payload).unwrap_or_else(|| "provider reported failure".to_string()))
            }
            _ => None,
        };
        let response_url = string_field(&payload, "response_url");
        let status_url = string_field(&payload, "status_url");

        self.cache.update(task_id, |cached| {
            cached.status = status;
            cached.raw_result = Some(payload.clone());
            cached.error = error.clone();
            if let Some(url) = &response_url {
                cached.response_url = Some(url.clone());
            }
            if let Some(url) = &status_url {
                cached.status_url = Some(url.clone());
            }
        });

        let result_ref = response_url.or(entry.response_url).unwrap_or_else(|| {
            self.queue_url(
                &self.base_model_path(&entry.model),
                Some(&format!("requests/{}", task_id)),
            )
        });

        debug!(task_id, status = %status, "Polled provider status");
        Ok(StatusReport {
            status,
            result_ref: Some(result_ref),
            error,
            raw: Some(payload),
        })
    }

    async fn resolve_result(&self, result_ref: &str) -> Result<Asset> {
        if result_ref.starts_with("data:") {
            return decode_data_uri(result_ref, None)
                .ok_or_else(|| ProviderError::InvalidResponse("malformed data URI".into()));
        }

        let is_http = result_ref.starts_with("https://") || result_ref.starts_with("http://");
        if is_http && !self.is_internal_url(result_ref) {
            return Ok(Asset::Url {
                url: result_ref.to_string(),
                file_name: None,
            });
        }

        let Some((parsed_model, request_id)) = parse_request_path(result_ref) else {
            return Err(ProviderError::NoResult(result_ref.to_string()));
        };

        let entry = self.cache.get(&request_id);
        if let Some(entry) = &entry {
            let cached = [entry.raw_result.as_ref(), entry.queue_response.as_ref()];
            if let Some(asset) = cached.into_iter().flatten().find_map(|p| self.extractor().extract(p)) {
                debug!(request_id = %request_id, "Resolved result from cached payload");
                return Ok(asset);
            }
        }

        let model = entry.map(|e| e.model).unwrap_or(parsed_model);

        if self.uses_post_result(&model) {
            if let Some(asset) = self.resolve_via_post(&model, &request_id).await? {
                return Ok(asset);
            }
        }

        for url in self.result_candidates(&model, &request_id, result_ref) {
            let fetched = self
                .config
                .result_retry
                .run("result", || self.http.get_json(&url), ProviderError::classify)
                .await;

            match fetched {
                Ok(payload) => match self.extract_and_cache(&request_id, &payload) {
                    Some(asset) => {
                        info!(request_id = %request_id, url = %url, "Resolved provider result");
                        return Ok(asset);
                    }
                    None => debug!(url = %url, "Result payload had no asset, trying next candidate"),
                },
                Err(e) if e.is_unsupported_shape() => {
                    debug!(url = %url, error = %e, "Unsupported result endpoint, trying next candidate");
                }
                Err(e) => return Err(e),
            }
        }

        warn!(request_id = %request_id, "All result endpoints exhausted");
        Err(ProviderError::NoResult(request_id))
    }
}

fn string_field(payload: &Value, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Human-readable failure text from `error` or `detail`
fn error_text(payload: &Value) -> Option<String> {
    fn text_of(value: &Value) -> Option<String> {
        match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Object(obj) => ["msg", "message"]
                .iter()
                .find_map(|k| obj.get(*k).and_then(Value::as_str))
                .map(str::to_string),
            Value::Array(items) => items.iter().find_map(text_of),
            _ => None,
        }
    }

    ["error", "detail"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(text_of))
}

/// Split `.../{model}/requests/{id}[/...]` into `(model, id)`
pub fn parse_request_path(url: &str) -> Option<(String, String)> {
    let parsed = Url::parse(url).ok()?;
    let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();
    let idx = segments.iter().position(|s| *s == "requests")?;
    let request_id = segments.get(idx + 1)?;
    if idx == 0 {
        return None;
    }
    Some((segments[..idx].join("/"), request_id.to_string()))
}
