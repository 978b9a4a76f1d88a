use async_trait::async_trait;
use serde_json::Value;
use shared::{
    domain::RecordKey,
    error::ErrorClass,
    protocol::{FORM_KEY_HEADER, REQUESTED_WITH_HEADER, REQUESTED_WITH_VALUE},
};
use thiserror::Error;
use tracing::debug;

const COLLECTION_PATH_PREFIX: &str = "storage/collections/data";
const REJECTION_SNIPPET_LIMIT: usize = 300;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store answered and refused the request. Distinguishable from
    /// a network failure so callers can tell "not saved" from "unknown".
    #[error("store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("store transport failure: {0}")]
    Transport(String),
}

impl StoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Rejected { .. } => ErrorClass::Store,
            Self::Transport(_) => ErrorClass::Transport,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Durable record store: keyed upsert plus full-collection reads.
/// Holds no cross-call state beyond connection pooling.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns the full unfiltered record set of a named collection.
    async fn fetch_collection(&self, collection: &str) -> Result<Vec<Value>, StoreError>;

    /// Idempotent write keyed by a caller-supplied identifier. Repeating
    /// an upsert with the same key overwrites the same record.
    async fn upsert(
        &self,
        collection: &str,
        key: &RecordKey,
        record: &Value,
    ) -> Result<(), StoreError>;
}

/// Null implementation for wiring paths where no store is configured.
pub struct MissingRecordStore;

#[async_trait]
impl RecordStore for MissingRecordStore {
    async fn fetch_collection(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        Err(StoreError::Transport(format!(
            "record store unavailable for collection '{collection}'"
        )))
    }

    async fn upsert(
        &self,
        collection: &str,
        _key: &RecordKey,
        _record: &Value,
    ) -> Result<(), StoreError> {
        Err(StoreError::Transport(format!(
            "record store unavailable for collection '{collection}'"
        )))
    }
}

/// HTTP client for the remote collection store.
#[derive(Clone)]
pub struct HttpRecordStore {
    http: reqwest::Client,
    base_url: String,
    app: String,
    form_key: Option<String>,
}

impl HttpRecordStore {
    pub fn new(base_url: impl Into<String>, app: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            app: app.into(),
            form_key: None,
        }
    }

    /// Attaches the security token sent with every write.
    pub fn with_form_key(mut self, form_key: impl Into<String>) -> Self {
        self.form_key = Some(form_key.into());
        self
    }

    fn collection_url(&self, collection: &str) -> String {
        format!(
            "{}/servicesNS/nobody/{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.app,
            COLLECTION_PATH_PREFIX,
            collection
        )
    }

    fn apply_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header(REQUESTED_WITH_HEADER, REQUESTED_WITH_VALUE);
        match &self.form_key {
            Some(form_key) => builder.header(FORM_KEY_HEADER, form_key),
            None => builder,
        }
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn fetch_collection(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        let url = self.collection_url(collection);
        debug!(collection, "fetching full collection");
        let response = self
            .apply_headers(self.http.get(&url).query(&[("output_mode", "json")]))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = rejection_message(response.text().await.unwrap_or_default());
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<Vec<Value>>().await?)
    }

    async fn upsert(
        &self,
        collection: &str,
        key: &RecordKey,
        record: &Value,
    ) -> Result<(), StoreError> {
        let url = self.collection_url(collection);

        // The collection endpoint upserts on `_key`; make sure the body
        // carries the caller-supplied key even if the record omitted it.
        let mut body = record.clone();
        if let Value::Object(fields) = &mut body {
            fields
                .entry("_key")
                .or_insert_with(|| Value::String(key.as_str().to_string()));
        }

        debug!(collection, key = %key, "upserting record");
        let response = self
            .apply_headers(self.http.post(&url).json(&body))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = rejection_message(response.text().await.unwrap_or_default());
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }
}

fn rejection_message(raw: String) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "store returned no error body".to_string();
    }
    // Prefer an embedded message field when the body is JSON.
    if let Ok(parsed) = serde_json::from_str::<Value>(trimmed) {
        for field in ["error", "message"] {
            if let Some(message) = parsed.get(field).and_then(Value::as_str) {
                return message.to_string();
            }
        }
    }
    trimmed.chars().take(REJECTION_SNIPPET_LIMIT).collect()
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
