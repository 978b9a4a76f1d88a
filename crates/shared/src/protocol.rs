use serde::{Deserialize, Serialize};

/// Security token header expected by the application-relative endpoints.
pub const FORM_KEY_HEADER: &str = "X-Catalog-Form-Key";
/// XHR marker header; the web tier rejects bodies without it.
pub const REQUESTED_WITH_HEADER: &str = "X-Requested-With";
pub const REQUESTED_WITH_VALUE: &str = "XMLHttpRequest";

/// Payload committed to the external version-controlled system.
/// Constructed once per submission attempt and never mutated mid-flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    /// Identifier of the record being committed.
    #[serde(alias = "recordId")]
    pub index_name: String,
    /// Serialized content blob (the generated stanza).
    #[serde(alias = "content")]
    pub stanza_content: String,
    pub author_name: String,
    pub author_email: String,
    pub branch: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl CommitRequest {
    /// Structural validation performed before any I/O. Returns the name
    /// of the first missing required field.
    pub fn missing_required_field(&self) -> Option<&'static str> {
        if self.index_name.trim().is_empty() {
            return Some("indexName");
        }
        if self.stanza_content.trim().is_empty() {
            return Some("stanzaContent");
        }
        if self.author_name.trim().is_empty() {
            return Some("authorName");
        }
        if self.branch.trim().is_empty() {
            return Some("branch");
        }
        None
    }
}

/// Stable reference to the externally created change, surfaced to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalRef {
    pub url: String,
    #[serde(default)]
    pub iid: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Nested merge-request object inside a successful commit response body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponsePayload {
    #[serde(default)]
    pub merge_request: Option<ExternalRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitResponseBody {
    #[serde(default)]
    pub payload: Option<CommitResponsePayload>,
}

/// Result of a terminal commit attempt (success path).
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// Total attempts spent, counting the successful one.
    pub attempts: u32,
    /// Parsed external reference, when the endpoint returned one.
    pub reference: Option<ExternalRef>,
    /// Full parsed response body for diagnostics.
    pub response: serde_json::Value,
}

impl CommitOutcome {
    /// Extracts the merge-request reference from an already-parsed body,
    /// tolerating bodies that carry no payload at all.
    pub fn from_response(attempts: u32, response: serde_json::Value) -> Self {
        let reference = serde_json::from_value::<CommitResponseBody>(response.clone())
            .ok()
            .and_then(|body| body.payload)
            .and_then(|payload| payload.merge_request);
        Self {
            attempts,
            reference,
            response,
        }
    }
}
