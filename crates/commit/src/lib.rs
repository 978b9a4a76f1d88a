//! Resilient single-shot commit client for the external version-controlled
//! system: bounded-duration attempts, retry with exponential backoff, and
//! structured classification of every failure mode. Stateless across calls
//! apart from connection pooling.

use std::{sync::Arc, time::Duration};

use serde_json::{json, Value};
use shared::{
    error::ErrorClass,
    protocol::{
        CommitOutcome, CommitRequest, FORM_KEY_HEADER, REQUESTED_WITH_HEADER, REQUESTED_WITH_VALUE,
    },
};
use thiserror::Error;
use tracing::{debug, warn};

pub mod token;

pub use token::{EnvToken, StaticToken, TokenChain, TokenSource};

/// Fixed application-relative path of the commit endpoint.
pub const COMMIT_PATH: &str = "gitlab/commit-index-stanza";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const BODY_SNIPPET_LIMIT: usize = 300;

#[derive(Debug, Error)]
pub enum CommitError {
    /// Structural problem with the request itself. No I/O, no retry.
    #[error("invalid commit request: {0}")]
    Validation(String),
    /// No source in the token chain produced a form key. No attempt made.
    #[error("no security token available from any configured source")]
    MissingToken,
    #[error("request timed out after {timeout_ms}ms (attempt {attempt})")]
    Timeout { timeout_ms: u64, attempt: u32 },
    #[error("network failure on attempt {attempt}: {message}")]
    Transport { attempt: u32, message: String },
    /// Non-2xx answer from the endpoint. Retriable only for 429/5xx.
    #[error("commit failed ({status}) on attempt {attempt}: {reason}")]
    Server {
        status: u16,
        reason: String,
        body_snippet: String,
        attempt: u32,
    },
}

impl CommitError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_) => ErrorClass::Validation,
            Self::MissingToken => ErrorClass::Precondition,
            Self::Timeout { .. } => ErrorClass::Timeout,
            Self::Transport { .. } => ErrorClass::Transport,
            Self::Server { .. } => ErrorClass::Server,
        }
    }

    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::MissingToken => false,
            Self::Timeout { .. } | Self::Transport { .. } => true,
            Self::Server { status, .. } => matches!(*status, 429 | 500..=599),
        }
    }

    fn retry_reason(&self) -> Option<RetryReason> {
        match self {
            Self::Timeout { .. } => Some(RetryReason::Timeout),
            Self::Transport { .. } => Some(RetryReason::Network),
            Self::Server { status, .. } if self.is_retriable() => {
                Some(RetryReason::ServerError { status: *status })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    ServerError { status: u16 },
    Timeout,
    Network,
}

/// Diagnostic events reported through the optional observer callback. This
/// is the client's only side channel; it never mutates shared state.
#[derive(Debug, Clone)]
pub enum AttemptEvent {
    Request { attempt: u32, url: String },
    Retry {
        attempt: u32,
        reason: RetryReason,
        backoff: Duration,
    },
    Success { attempt: u32, status: u16 },
}

pub type CommitObserver = Box<dyn Fn(&AttemptEvent) + Send + Sync>;

pub struct CommitOptions {
    /// Hard wall-clock bound per attempt.
    pub timeout: Duration,
    /// Additional attempts after the first.
    pub max_retries: u32,
    /// Backoff before the first retry; doubles on each further retry.
    pub initial_backoff: Duration,
    pub observer: Option<CommitObserver>,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            observer: None,
        }
    }
}

impl CommitOptions {
    fn observe(&self, event: &AttemptEvent) {
        if let Some(observer) = &self.observer {
            observer(event);
        }
    }
}

pub struct CommitClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl CommitClient {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            tokens,
        }
    }

    /// Commits one request, retrying retriable failures up to the configured
    /// bound with exponential backoff. Fails only after exhausting retries
    /// or on a non-retriable error.
    pub async fn commit(
        &self,
        request: &CommitRequest,
        options: &CommitOptions,
    ) -> Result<CommitOutcome, CommitError> {
        if let Some(field) = request.missing_required_field() {
            return Err(CommitError::Validation(format!(
                "required field '{field}' is empty"
            )));
        }
        let form_key = self.tokens.form_key().ok_or(CommitError::MissingToken)?;

        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), COMMIT_PATH);
        let mut attempt: u32 = 0;
        let mut backoff = options.initial_backoff;

        loop {
            options.observe(&AttemptEvent::Request {
                attempt,
                url: url.clone(),
            });
            debug!(attempt, %url, "issuing commit attempt");

            match self.attempt(&url, &form_key, request, options.timeout, attempt).await {
                Ok((status, body)) => {
                    options.observe(&AttemptEvent::Success { attempt, status });
                    debug!(attempt, status, "commit succeeded");
                    return Ok(CommitOutcome::from_response(attempt + 1, body));
                }
                Err(err) => {
                    let reason = err.retry_reason();
                    if let Some(reason) = reason.filter(|_| attempt < options.max_retries) {
                        warn!(
                            attempt,
                            ?reason,
                            backoff_ms = backoff.as_millis() as u64,
                            "commit attempt failed; backing off before retry"
                        );
                        options.observe(&AttemptEvent::Retry {
                            attempt,
                            reason,
                            backoff,
                        });
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                        attempt += 1;
                        continue;
                    }
                    warn!(attempt, error = %err, "commit failed terminally");
                    return Err(err);
                }
            }
        }
    }

    async fn attempt(
        &self,
        url: &str,
        form_key: &str,
        request: &CommitRequest,
        timeout: Duration,
        attempt: u32,
    ) -> Result<(u16, Value), CommitError> {
        let response = self
            .http
            .post(url)
            .timeout(timeout)
            .header(FORM_KEY_HEADER, form_key)
            .header(REQUESTED_WITH_HEADER, REQUESTED_WITH_VALUE)
            .json(request)
            .send()
            .await
            .map_err(|err| classify_send_error(err, timeout, attempt))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|err| classify_send_error(err, timeout, attempt))?;
        let parsed = parse_body(&raw);

        if status.is_success() {
            return Ok((status.as_u16(), parsed));
        }

        let reason = parsed
            .get("error")
            .or_else(|| parsed.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                format!(
                    "commit failed ({} {})",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("unknown status")
                )
            });

        Err(CommitError::Server {
            status: status.as_u16(),
            reason,
            body_snippet: raw.chars().take(BODY_SNIPPET_LIMIT).collect(),
            attempt,
        })
    }
}

fn classify_send_error(err: reqwest::Error, timeout: Duration, attempt: u32) -> CommitError {
    if err.is_timeout() {
        CommitError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
            attempt,
        }
    } else {
        CommitError::Transport {
            attempt,
            message: err.to_string(),
        }
    }
}

/// Defensive body parse: fall back to a raw-text wrapper when the endpoint
/// answers with something that is not JSON.
fn parse_body(raw: &str) -> Value {
    if raw.is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| json!({ "_raw": raw }))
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
