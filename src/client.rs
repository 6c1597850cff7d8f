//! Rate-limited client for the catalog API
//!
//! Every call goes through the same pipeline:
//! 1. wait for the [`RequestPacer`]
//! 2. send the request with the bearer credential
//! 3. map the status: 429 → cooldown, 401/403 → fatal, others → message from body
//! 4. validate the payload shape (`results` for pages, `id` for entities)
//! 5. let [`with_retry`] decide whether to go again
//!
//! The client never talks to the operator. When it gives up it returns a
//! [`FetchError`] and bumps its failed-request counter.

use reqwest::StatusCode;
use serde_json::{Map, Value};
use url::Url;

use crate::config::Config;
use crate::error::{Error, FetchError, Result};
use crate::pacing::RequestPacer;
use crate::retry::{RetryError, RetryPolicy, with_retry};
use crate::types::{DiscoverPage, MovieDetails, RecordId};

/// A payload that passed shape validation
#[derive(Clone, Debug)]
pub enum Payload {
    /// A paged list (`results`, `page`, `total_pages`)
    Page(DiscoverPage),
    /// A single entity (has an `id`)
    Entity(Map<String, Value>),
}

/// Client for the discover and detail endpoints
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    sort_by: String,
    pacer: RequestPacer,
    policy: RetryPolicy,
    failed_requests: u64,
}

impl ApiClient {
    /// Create a client from configuration
    ///
    /// # Errors
    /// Returns error if the base URL is invalid or the HTTP client cannot be created
    pub fn new(config: &Config) -> Result<Self> {
        // Url::join drops the last path segment unless the base ends in '/'
        let mut base = config.api.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| {
            Error::config(format!("invalid base URL '{}': {}", base, e), "api.base_url")
        })?;

        let http = reqwest::Client::builder()
            .timeout(config.api.timeout)
            .user_agent(config.api.user_agent.clone())
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            api_key: config.api.api_key.clone(),
            sort_by: config.api.sort_by.clone(),
            pacer: RequestPacer::new(config.pacing.request_interval),
            policy: RetryPolicy::new(&config.retry, &config.pacing),
            failed_requests: 0,
        })
    }

    /// Calls that failed terminally so far
    pub fn failed_requests(&self) -> u64 {
        self.failed_requests
    }

    /// Fetch `endpoint` with query `params`, retrying per policy
    ///
    /// `context` labels the request in logs and errors.
    pub async fn fetch(
        &mut self,
        endpoint: &str,
        params: &[(&str, String)],
        context: &str,
    ) -> std::result::Result<Payload, FetchError> {
        let url = match self.base_url.join(endpoint.trim_start_matches('/')) {
            Ok(url) => url,
            Err(e) => {
                self.failed_requests += 1;
                return Err(FetchError::Http {
                    context: context.to_string(),
                    status: 0,
                    message: format!("invalid endpoint '{}': {}", endpoint, e),
                });
            }
        };
        let params: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();

        let result = with_retry(&self.policy, context, || {
            let http = self.http.clone();
            let pacer = self.pacer.clone();
            let url = url.clone();
            let params = params.clone();
            let api_key = self.api_key.clone();
            let context = context.to_string();
            async move {
                pacer.wait().await;
                send_once(&http, url, &api_key, &params, &context).await
            }
        })
        .await;

        result.map_err(|e| {
            self.failed_requests += 1;
            match e {
                RetryError::Fatal(error) => error,
                RetryError::Exhausted { attempts, last } => FetchError::RetriesExhausted {
                    context: context.to_string(),
                    attempts,
                    last: Box::new(last),
                },
            }
        })
    }

    /// Fetch one page of the discover listing for a release year
    pub async fn discover(
        &mut self,
        partition: i32,
        page: u32,
    ) -> std::result::Result<DiscoverPage, FetchError> {
        let context = format!("year {}, page {}", partition, page);
        let params = [
            ("primary_release_year", partition.to_string()),
            ("page", page.to_string()),
            ("sort_by", self.sort_by.clone()),
        ];

        match self.fetch("discover/movie", &params, &context).await? {
            Payload::Page(listing) => Ok(listing),
            Payload::Entity(map) => {
                self.failed_requests += 1;
                Err(FetchError::MalformedResponse {
                    context,
                    observed: describe_keys(&map),
                })
            }
        }
    }

    /// Fetch details and credits for one entity
    pub async fn details(
        &mut self,
        id: RecordId,
        title: &str,
    ) -> std::result::Result<MovieDetails, FetchError> {
        let context = format!("details for '{}' (ID: {})", title, id);
        let params = [("append_to_response", "credits".to_string())];

        match self.fetch(&format!("movie/{}", id), &params, &context).await? {
            Payload::Entity(map) => {
                let observed = describe_keys(&map);
                serde_json::from_value(Value::Object(map)).map_err(|e| {
                    self.failed_requests += 1;
                    tracing::warn!(context = %context, error = %e, "Entity payload did not decode");
                    FetchError::MalformedResponse { context, observed }
                })
            }
            Payload::Page(_) => {
                self.failed_requests += 1;
                Err(FetchError::MalformedResponse {
                    context,
                    observed: "[page, results, total_pages]".to_string(),
                })
            }
        }
    }

    /// Check the credential by fetching one known entity
    pub async fn verify_credentials(
        &mut self,
        probe_id: RecordId,
    ) -> std::result::Result<(), FetchError> {
        self.fetch(&format!("movie/{}", probe_id), &[], "credential check")
            .await
            .map(|_| ())
    }
}

/// One attempt: send, map the status, validate the body
async fn send_once(
    http: &reqwest::Client,
    url: Url,
    api_key: &str,
    params: &[(String, String)],
    context: &str,
) -> std::result::Result<Payload, FetchError> {
    let response = http
        .get(url)
        .bearer_auth(api_key)
        .query(params)
        .send()
        .await
        .map_err(|e| transport_error(context, &e))?;

    let status = response.status();
    if status.is_success() {
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(context, &e))?;
        return validate_payload(&body, context);
    }

    // The body is only used for the message; a failed read falls back to the status
    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body, status);

    match status {
        StatusCode::TOO_MANY_REQUESTS => Err(FetchError::QuotaExceeded {
            context: context.to_string(),
            message,
        }),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(FetchError::Authentication {
            context: context.to_string(),
            status: status.as_u16(),
            message,
        }),
        _ => Err(FetchError::Http {
            context: context.to_string(),
            status: status.as_u16(),
            message,
        }),
    }
}

fn transport_error(context: &str, error: &reqwest::Error) -> FetchError {
    let message = if error.is_timeout() {
        format!("timed out: {}", error)
    } else if error.is_connect() {
        format!("connection failed: {}", error)
    } else {
        error.to_string()
    };
    FetchError::Transport {
        context: context.to_string(),
        message,
        timed_out: error.is_timeout(),
    }
}

/// Check that a success body is a paged list or a single entity
pub(crate) fn validate_payload(
    body: &str,
    context: &str,
) -> std::result::Result<Payload, FetchError> {
    let malformed = |observed: String| {
        tracing::warn!(context, observed = %observed, "Unexpected response structure");
        FetchError::MalformedResponse {
            context: context.to_string(),
            observed,
        }
    };

    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) => return Err(malformed("non-JSON body".to_string())),
    };
    let map = match value {
        Value::Object(map) => map,
        other => return Err(malformed(json_type(&other).to_string())),
    };

    if map.contains_key("results") {
        let observed = describe_keys(&map);
        return serde_json::from_value(Value::Object(map))
            .map(Payload::Page)
            .map_err(|_| malformed(observed));
    }
    if map.contains_key("id") {
        return Ok(Payload::Entity(map));
    }
    Err(malformed(describe_keys(&map)))
}

/// Human-readable message from an error body
///
/// Prefers `status_message`, then `message`, then `HTTP <code>`.
pub(crate) fn error_message(body: &str, status: StatusCode) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            ["status_message", "message"]
                .iter()
                .find_map(|key| value.get(key).and_then(Value::as_str).map(str::to_string))
        })
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

fn describe_keys(map: &Map<String, Value>) -> String {
    let keys: Vec<&str> = map.keys().map(String::as_str).collect();
    format!("[{}]", keys.join(", "))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
