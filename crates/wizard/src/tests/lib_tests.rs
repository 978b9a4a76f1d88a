use super::*;
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex as StdMutex,
};
use std::time::Duration;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::json;
use store::StoreError;
use tokio::net::TcpListener;

/// In-memory store that records upserts and can be scripted to fail.
struct TestStore {
    upserts: StdMutex<Vec<(String, Value)>>,
    fail_with: Option<StoreError>,
}

impl TestStore {
    fn ok() -> Self {
        Self {
            upserts: StdMutex::new(Vec::new()),
            fail_with: None,
        }
    }

    fn failing(err: StoreError) -> Self {
        Self {
            upserts: StdMutex::new(Vec::new()),
            fail_with: Some(err),
        }
    }

    fn upserts(&self) -> Vec<(String, Value)> {
        self.upserts.lock().expect("upserts lock").clone()
    }
}

#[async_trait]
impl RecordStore for TestStore {
    async fn fetch_collection(&self, _collection: &str) -> Result<Vec<Value>, StoreError> {
        Ok(Vec::new())
    }

    async fn upsert(
        &self,
        _collection: &str,
        key: &RecordKey,
        record: &Value,
    ) -> Result<(), StoreError> {
        if let Some(err) = &self.fail_with {
            return Err(clone_store_error(err));
        }
        self.upserts
            .lock()
            .expect("upserts lock")
            .push((key.as_str().to_string(), record.clone()));
        Ok(())
    }
}

fn clone_store_error(err: &StoreError) -> StoreError {
    match err {
        StoreError::Rejected { status, message } => StoreError::Rejected {
            status: *status,
            message: message.clone(),
        },
        StoreError::Transport(message) => StoreError::Transport(message.clone()),
    }
}

/// Commit sink double: counts calls, optionally delays, fails on demand.
struct TestSink {
    calls: AtomicU32,
    delay: Duration,
    fail_with: Option<String>,
    reference: Option<ExternalRef>,
}

impl TestSink {
    fn ok() -> Self {
        Self {
            calls: AtomicU32::new(0),
            delay: Duration::ZERO,
            fail_with: None,
            reference: Some(ExternalRef {
                url: "https://git.example.com/mr/12".into(),
                iid: Some(12),
                title: Some("Add index".into()),
            }),
        }
    }

    fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Self::ok()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::ok()
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommitSink for TestSink {
    async fn commit(&self, _request: &CommitRequest) -> Result<CommitOutcome, CommitError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(message) = &self.fail_with {
            return Err(CommitError::Server {
                status: 500,
                reason: message.clone(),
                body_snippet: String::new(),
                attempt: 2,
            });
        }
        Ok(CommitOutcome {
            attempts: 1,
            reference: self.reference.clone(),
            response: json!({}),
        })
    }
}

fn complete_fields() -> Vec<(&'static str, &'static str)> {
    vec![
        (fields::APP_ID, "APP-42"),
        (fields::CURRENT_USER, "jdoe"),
        (fields::CURRENT_USER_EMAIL, "jdoe@example.com"),
        (fields::APPLICATION_NAME, "Payments"),
        (fields::TARGET_CLUSTER, "cluster-east"),
        (fields::DATA_ORIGIN_DOMAIN, "finance"),
        (fields::ENGAGEMENT_REQUEST_NUMBER, "REQ123"),
        (fields::DATA_INGESTION_PER_DAY_MB, "250"),
        (fields::DATA_RETENTION_DAYS, "90"),
        (fields::GLOBAL_INDEX_FLAG, "false"),
        (fields::INDEX_NAME_PROPOSED, "app_payments_prod"),
        (fields::NAME_VALIDATION_STATUS, NAME_STATUS_AVAILABLE),
        (fields::INDEX_CONFIG_STANZA, "[app_payments_prod]\nhomePath = ..."),
        (fields::AUTHORIZE_CONFIG, "[role_payments]\nsrchIndexesAllowed = ..."),
    ]
}

fn wizard(store: Arc<TestStore>, sink: Arc<TestSink>) -> WizardOrchestrator {
    WizardOrchestrator::new(catalog_steps(), store, sink, "requests")
}

#[tokio::test]
async fn gate_blocks_and_populates_field_errors() {
    let orchestrator = wizard(Arc::new(TestStore::ok()), Arc::new(TestSink::ok()));

    assert!(!orchestrator.can_advance().await);
    assert!(orchestrator.next_disabled().await);

    let outcome = orchestrator.next().await;
    let NextOutcome::Blocked(errors) = outcome else {
        panic!("expected Blocked, got {outcome:?}");
    };
    assert!(errors.contains_key(fields::APP_ID));
    assert_eq!(orchestrator.active_step().await, 0);
    assert_eq!(orchestrator.errors().await, errors);
}

#[tokio::test]
async fn previous_floors_at_first_step() {
    let orchestrator = wizard(Arc::new(TestStore::ok()), Arc::new(TestSink::ok()));
    assert_eq!(orchestrator.previous().await, 0);
    assert_eq!(orchestrator.previous().await, 0);
}

#[tokio::test]
async fn complete_flow_walks_all_steps_and_submits() {
    let store = Arc::new(TestStore::ok());
    let sink = Arc::new(TestSink::ok());
    let orchestrator = wizard(Arc::clone(&store), Arc::clone(&sink));
    orchestrator.set_fields(complete_fields()).await;

    for expected in 1..orchestrator.step_count() {
        assert!(orchestrator.can_advance().await);
        let outcome = orchestrator.next().await;
        let NextOutcome::Advanced(step) = outcome else {
            panic!("expected Advanced, got {outcome:?}");
        };
        assert_eq!(step, expected);
    }
    assert_eq!(orchestrator.step_name().await, "review-and-submit");

    let outcome = orchestrator.next().await;
    let NextOutcome::Submitted(submitted) = outcome else {
        panic!("expected Submitted, got {outcome:?}");
    };
    assert_eq!(submitted.status, SubmissionStatus::Success);
    assert!(submitted.message.contains("https://git.example.com/mr/12"));
    assert_eq!(
        submitted.reference.expect("reference").iid,
        Some(12)
    );

    let upserts = store.upserts();
    assert_eq!(upserts.len(), 1);
    assert_eq!(upserts[0].0, "app_payments_prod");
    assert_eq!(upserts[0].1["_key"], "app_payments_prod");
    assert!(upserts[0].1["submitted_at"].is_string());
    assert_eq!(sink.calls(), 1);
}

#[tokio::test]
async fn store_failure_is_terminal_and_commit_is_never_attempted() {
    let store = Arc::new(TestStore::failing(StoreError::Rejected {
        status: 503,
        message: "kv store unavailable".into(),
    }));
    let sink = Arc::new(TestSink::ok());
    let orchestrator = wizard(Arc::clone(&store), Arc::clone(&sink));
    orchestrator.set_fields(complete_fields()).await;

    let outcome = orchestrator.submit().await;
    assert_eq!(outcome.status, SubmissionStatus::Error);
    assert!(outcome.message.contains("Failed to store the request"));
    assert!(outcome.reference.is_none());
    assert_eq!(sink.calls(), 0, "commit must never run after a store failure");
    assert_eq!(orchestrator.status().await, SubmissionStatus::Error);
}

#[tokio::test]
async fn commit_failure_reports_saved_but_not_committed() {
    let store = Arc::new(TestStore::ok());
    let sink = Arc::new(TestSink::failing("scripted failure 500"));
    let orchestrator = wizard(Arc::clone(&store), Arc::clone(&sink));
    orchestrator.set_fields(complete_fields()).await;

    let outcome = orchestrator.submit().await;
    assert_eq!(outcome.status, SubmissionStatus::Error);
    assert!(outcome.message.contains("saved to the store"));
    assert!(outcome.message.contains("external commit failed"));

    // The store record persists; no compensating delete.
    assert_eq!(store.upserts().len(), 1);
    assert_eq!(sink.calls(), 1);
}

#[tokio::test]
async fn missing_commit_fields_fail_fast_after_store_write() {
    let store = Arc::new(TestStore::ok());
    let sink = Arc::new(TestSink::ok());
    let orchestrator = wizard(Arc::clone(&store), Arc::clone(&sink));

    let mut fields_without_stanza = complete_fields();
    fields_without_stanza.retain(|(key, _)| *key != fields::INDEX_CONFIG_STANZA);
    orchestrator.set_fields(fields_without_stanza).await;

    let outcome = orchestrator.submit().await;
    assert_eq!(outcome.status, SubmissionStatus::Error);
    assert!(outcome.message.contains("was not attempted"));
    assert_eq!(store.upserts().len(), 1, "store write already happened");
    assert_eq!(sink.calls(), 0, "no network commit for an invalid request");
}

#[tokio::test]
async fn resubmission_reuses_the_request_key() {
    let store = Arc::new(TestStore::ok());
    let sink = Arc::new(TestSink::failing("transient"));
    let orchestrator = wizard(Arc::clone(&store), Arc::clone(&sink));

    // No proposed name: the key must be generated once and then pinned.
    let mut fields_without_name = complete_fields();
    fields_without_name.retain(|(key, _)| *key != fields::INDEX_NAME_PROPOSED);
    orchestrator.set_fields(fields_without_name).await;
    orchestrator
        .set_field(fields::INDEX_CONFIG_STANZA, "[generated]\n")
        .await;

    let first = orchestrator.submit().await;
    assert_eq!(first.status, SubmissionStatus::Error);
    let second = orchestrator.submit().await;
    assert_eq!(second.status, SubmissionStatus::Error);

    let upserts = store.upserts();
    assert_eq!(upserts.len(), 2);
    assert_eq!(upserts[0].0, upserts[1].0, "idempotent store key across attempts");
    // Each attempt is a fresh external side effect: no commit deduplication.
    assert_eq!(sink.calls(), 0);
}

#[tokio::test]
async fn reentrant_submit_is_ignored_while_in_flight() {
    let store = Arc::new(TestStore::ok());
    let sink = Arc::new(TestSink::slow(Duration::from_millis(60)));
    let orchestrator = Arc::new(wizard(Arc::clone(&store), Arc::clone(&sink)));
    orchestrator.set_fields(complete_fields()).await;

    let background = Arc::clone(&orchestrator);
    let in_flight = tokio::spawn(async move { background.submit().await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Second click while the first submission is still committing.
    let ignored = orchestrator.submit().await;
    assert_eq!(ignored.status, SubmissionStatus::Submitting);

    let settled = in_flight.await.expect("join");
    assert_eq!(settled.status, SubmissionStatus::Success);
    assert_eq!(sink.calls(), 1, "re-entrant submit must not double-commit");
    assert_eq!(store.upserts().len(), 1);
}

#[tokio::test]
async fn commit_request_is_projected_from_payload() {
    let store = Arc::new(TestStore::ok());
    let sink = Arc::new(TestSink::ok());
    let orchestrator = wizard(Arc::clone(&store), Arc::clone(&sink));
    orchestrator.set_fields(complete_fields()).await;
    orchestrator.submit().await;

    let payload = &store.upserts()[0].1;
    let request = commit_request_from(payload);
    assert_eq!(request.index_name, "app_payments_prod");
    assert_eq!(request.author_name, "jdoe");
    assert_eq!(request.author_email, "jdoe@example.com");
    assert_eq!(request.branch, "feature/add-index-REQ123");
    assert_eq!(request.missing_required_field(), None);
}

// Scripted commit endpoint for exercising the real resilient client inside
// the submission pipeline.
#[derive(Clone)]
struct FlakyEndpoint {
    statuses: Arc<StdMutex<Vec<u16>>>,
    hits: Arc<AtomicU32>,
}

async fn handle_flaky_commit(State(state): State<FlakyEndpoint>) -> (StatusCode, Json<Value>) {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let status = {
        let mut statuses = state.statuses.lock().expect("statuses lock");
        if statuses.len() > 1 {
            statuses.remove(0)
        } else {
            statuses.first().copied().unwrap_or(200)
        }
    };
    (
        StatusCode::from_u16(status).expect("status"),
        Json(json!({ "error": format!("upstream said {status}") })),
    )
}

async fn spawn_flaky_endpoint(statuses: &[u16]) -> (String, FlakyEndpoint) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = FlakyEndpoint {
        statuses: Arc::new(StdMutex::new(statuses.to_vec())),
        hits: Arc::new(AtomicU32::new(0)),
    };
    let app = Router::new()
        .route(&format!("/{}", commit::COMMIT_PATH), post(handle_flaky_commit))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state)
}

#[tokio::test]
async fn exhausted_retries_leave_saved_record_and_error_state() {
    // 503 twice, then 500: with max_retries = 2 the client gives up on the
    // third answer and the wizard lands in error with the record persisted.
    let (url, endpoint) = spawn_flaky_endpoint(&[503, 503, 500]).await;
    let client = CommitClient::new(
        &url,
        Arc::new(commit::StaticToken::new("form-key")),
    );
    let sink = ClientCommitSink::new(
        client,
        CommitOptions {
            timeout: Duration::from_secs(2),
            max_retries: 2,
            initial_backoff: Duration::from_millis(2),
            observer: None,
        },
    );

    let store = Arc::new(TestStore::ok());
    let orchestrator = WizardOrchestrator::new(
        catalog_steps(),
        Arc::clone(&store) as Arc<dyn RecordStore>,
        Arc::new(sink),
        "requests",
    );
    orchestrator.set_fields(complete_fields()).await;

    let outcome = orchestrator.submit().await;
    assert_eq!(outcome.status, SubmissionStatus::Error);
    assert!(outcome.message.contains("upstream said 500"));
    assert_eq!(endpoint.hits.load(Ordering::SeqCst), 3);
    assert_eq!(store.upserts().len(), 1, "record persists despite commit failure");
}
