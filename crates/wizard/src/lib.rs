//! Multi-step wizard orchestrator for the "create a new catalog entry"
//! flow: per-step validation gates, then a two-phase terminal submission
//! (durable store write followed by an external commit) with documented
//! partial-failure semantics between the two phases.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use commit::{CommitClient, CommitError, CommitOptions};
use serde_json::{json, Value};
use shared::{
    domain::{RecordKey, SubmissionPhase, SubmissionStatus},
    protocol::{CommitOutcome, CommitRequest, ExternalRef},
};
use store::RecordStore;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

pub mod steps;

pub use steps::{catalog_steps, fields, ErrorMap, FieldValues, StepGate, NAME_STATUS_AVAILABLE};

/// Seam over the commit client so submission can be exercised without a
/// network endpoint.
#[async_trait]
pub trait CommitSink: Send + Sync {
    async fn commit(&self, request: &CommitRequest) -> Result<CommitOutcome, CommitError>;
}

/// Production sink: a resilient client plus the options every submission
/// commits with.
pub struct ClientCommitSink {
    client: CommitClient,
    options: CommitOptions,
}

impl ClientCommitSink {
    pub fn new(client: CommitClient, options: CommitOptions) -> Self {
        Self { client, options }
    }
}

#[async_trait]
impl CommitSink for ClientCommitSink {
    async fn commit(&self, request: &CommitRequest) -> Result<CommitOutcome, CommitError> {
        self.client.commit(request, &self.options).await
    }
}

/// Everything the view layer consumes about a submission.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub status: SubmissionStatus,
    pub message: String,
    pub reference: Option<ExternalRef>,
}

/// Result of a `next` click.
#[derive(Debug)]
pub enum NextOutcome {
    /// The current step's gate failed; field errors were populated.
    Blocked(ErrorMap),
    /// Advanced to the given step index.
    Advanced(usize),
    /// `next` on the final step ran the submission pipeline.
    Submitted(SubmitOutcome),
}

/// Cross-step form data and navigation cursor.
struct WizardState {
    active_step: usize,
    fields: FieldValues,
    errors: ErrorMap,
    phase: SubmissionPhase,
    /// Idempotency key for the store write. Generated on the first
    /// submission attempt and reused by every later one.
    request_key: Option<RecordKey>,
    reference: Option<ExternalRef>,
    message: String,
}

struct AttemptSuccess {
    message: String,
    reference: Option<ExternalRef>,
}

struct AttemptFailure {
    message: String,
}

pub struct WizardOrchestrator {
    gates: Vec<Box<dyn StepGate>>,
    store: Arc<dyn RecordStore>,
    sink: Arc<dyn CommitSink>,
    collection: String,
    state: Mutex<WizardState>,
}

impl WizardOrchestrator {
    pub fn new(
        gates: Vec<Box<dyn StepGate>>,
        store: Arc<dyn RecordStore>,
        sink: Arc<dyn CommitSink>,
        collection: impl Into<String>,
    ) -> Self {
        assert!(!gates.is_empty(), "a wizard needs at least one step");
        Self {
            gates,
            store,
            sink,
            collection: collection.into(),
            state: Mutex::new(WizardState {
                active_step: 0,
                fields: FieldValues::new(),
                errors: ErrorMap::new(),
                phase: SubmissionPhase::Idle,
                request_key: None,
                reference: None,
                message: String::new(),
            }),
        }
    }

    pub fn step_count(&self) -> usize {
        self.gates.len()
    }

    pub async fn active_step(&self) -> usize {
        self.state.lock().await.active_step
    }

    pub async fn step_name(&self) -> &'static str {
        let step = self.state.lock().await.active_step;
        self.gates[step].name()
    }

    pub async fn set_field(&self, key: &str, value: impl Into<String>) {
        let mut state = self.state.lock().await;
        state.fields.insert(key.to_string(), value.into());
    }

    pub async fn set_fields<I, K, V>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut state = self.state.lock().await;
        for (key, value) in entries {
            state.fields.insert(key.into(), value.into());
        }
    }

    pub async fn errors(&self) -> ErrorMap {
        self.state.lock().await.errors.clone()
    }

    pub async fn status(&self) -> SubmissionStatus {
        self.state.lock().await.phase.into()
    }

    pub async fn outcome(&self) -> SubmitOutcome {
        let state = self.state.lock().await;
        SubmitOutcome {
            status: state.phase.into(),
            message: state.message.clone(),
            reference: state.reference.clone(),
        }
    }

    /// Derived, side-effect-free flag: does the current step's gate pass
    /// right now? Used to disable navigation controls proactively.
    pub async fn can_advance(&self) -> bool {
        let state = self.state.lock().await;
        self.gates[state.active_step].validate(&state.fields).is_empty()
    }

    /// The navigation control's disabled state: submitting, or gate dirty.
    pub async fn next_disabled(&self) -> bool {
        let state = self.state.lock().await;
        state.phase.is_in_flight()
            || !self.gates[state.active_step].validate(&state.fields).is_empty()
    }

    /// Steps back one step, flooring at the first.
    pub async fn previous(&self) -> usize {
        let mut state = self.state.lock().await;
        state.active_step = state.active_step.saturating_sub(1);
        state.active_step
    }

    /// Runs the current step's gate authoritatively. A clean gate advances
    /// (or, on the final step, submits); a dirty one blocks and populates
    /// the field error map, the only state mutation gate evaluation has.
    pub async fn next(&self) -> NextOutcome {
        {
            let mut state = self.state.lock().await;
            let step = state.active_step;
            let errors = self.gates[step].validate(&state.fields);
            state.errors = errors.clone();
            if !errors.is_empty() {
                return NextOutcome::Blocked(errors);
            }
            if step + 1 < self.gates.len() {
                state.active_step = step + 1;
                return NextOutcome::Advanced(state.active_step);
            }
        }
        NextOutcome::Submitted(self.submit().await)
    }

    /// Two-phase submission: durable store write, then external commit.
    /// At most one attempt is outstanding; re-entrant calls while already
    /// submitting return the in-flight status unchanged. The phase always
    /// lands in `Success` or `Error` before this returns.
    pub async fn submit(&self) -> SubmitOutcome {
        let (key, payload) = {
            let mut state = self.state.lock().await;
            if state.phase.is_in_flight() {
                return SubmitOutcome {
                    status: state.phase.into(),
                    message: state.message.clone(),
                    reference: state.reference.clone(),
                };
            }

            let key = match &state.request_key {
                Some(existing) => existing.clone(),
                None => {
                    let key = generate_request_key(&state.fields);
                    state.request_key = Some(key.clone());
                    key
                }
            };

            state.phase = SubmissionPhase::WritingStore;
            state.message.clear();
            state.reference = None;
            let payload = build_payload(&state.fields, &key);
            (key, payload)
        };

        info!(key = %key, "starting two-phase submission");
        let result = self.run_attempt(&key, payload).await;

        // Single terminal exit: whatever happened above, the phase ends in
        // success or error, never an intermediate one.
        let mut state = self.state.lock().await;
        match result {
            Ok(success) => {
                state.phase = SubmissionPhase::Success;
                state.message = success.message;
                state.reference = success.reference;
            }
            Err(failure) => {
                state.phase = SubmissionPhase::Error;
                state.message = failure.message;
                state.reference = None;
            }
        }
        SubmitOutcome {
            status: state.phase.into(),
            message: state.message.clone(),
            reference: state.reference.clone(),
        }
    }

    async fn run_attempt(
        &self,
        key: &RecordKey,
        payload: Value,
    ) -> Result<AttemptSuccess, AttemptFailure> {
        // Phase one: durable store write. Terminal on failure; the
        // external commit is never attempted.
        if let Err(err) = self.store.upsert(&self.collection, key, &payload).await {
            warn!(key = %key, error = %err, "store write failed; commit skipped");
            return Err(AttemptFailure {
                message: format!("Failed to store the request: {err}"),
            });
        }

        {
            let mut state = self.state.lock().await;
            state.phase = SubmissionPhase::Committing;
        }

        // Phase two: external commit. The store record persists either way;
        // a failure here is reported as "saved, but not committed".
        let request = commit_request_from(&payload);
        if let Some(field) = request.missing_required_field() {
            return Err(AttemptFailure {
                message: format!(
                    "Request saved to the store, but the external commit was not attempted: \
                     required field '{field}' is empty."
                ),
            });
        }

        match self.sink.commit(&request).await {
            Ok(outcome) => {
                let message = match &outcome.reference {
                    Some(reference) => format!(
                        "Request saved to the store. Merge request created: {}",
                        reference.url
                    ),
                    None => "Request saved to the store. Commit accepted, but no merge \
                             request URL was returned."
                        .to_string(),
                };
                info!(attempts = outcome.attempts, "submission committed");
                Ok(AttemptSuccess {
                    message,
                    reference: outcome.reference,
                })
            }
            Err(err) => {
                warn!(error = %err, "external commit failed; store record persists");
                Err(AttemptFailure {
                    message: format!(
                        "Request saved to the store, but the external commit failed: {err}"
                    ),
                })
            }
        }
    }
}

/// Prefer the proposed record name as the store key; fall back to a fresh
/// uuid when no name has been generated yet.
fn generate_request_key(fields_map: &FieldValues) -> RecordKey {
    let proposed = fields_map
        .get(fields::INDEX_NAME_PROPOSED)
        .map(String::as_str)
        .unwrap_or_default()
        .trim();
    if proposed.is_empty() {
        RecordKey(Uuid::new_v4().to_string())
    } else {
        RecordKey(proposed.to_string())
    }
}

/// Accumulated field values plus the key and a submission stamp, mirrored
/// into the store record verbatim.
fn build_payload(fields_map: &FieldValues, key: &RecordKey) -> Value {
    let mut payload = serde_json::Map::new();
    for (field, value) in fields_map {
        payload.insert(field.clone(), Value::String(value.clone()));
    }
    payload.insert("_key".to_string(), json!(key.as_str()));
    payload.insert("submitted_at".to_string(), json!(Utc::now().to_rfc3339()));
    Value::Object(payload)
}

fn payload_str<'a>(payload: &'a Value, key: &str) -> &'a str {
    payload.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Projects the required commit subset out of the stored payload.
fn commit_request_from(payload: &Value) -> CommitRequest {
    let author = payload_str(payload, fields::CURRENT_USER);
    let email = payload_str(payload, fields::CURRENT_USER_EMAIL);
    CommitRequest {
        index_name: payload_str(payload, fields::INDEX_NAME_PROPOSED).to_string(),
        stanza_content: payload_str(payload, fields::INDEX_CONFIG_STANZA).to_string(),
        author_name: author.to_string(),
        author_email: if email.is_empty() {
            format!("{author}@users.noreply.invalid")
        } else {
            email.to_string()
        },
        branch: format!(
            "feature/add-index-{}",
            payload_str(payload, fields::ENGAGEMENT_REQUEST_NUMBER)
        ),
        labels: vec!["index".to_string(), "catalog".to_string()],
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
