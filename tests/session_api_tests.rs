// tests/session_api_tests.rs

use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use proctor::{
    config::{Config, SessionSettings},
    engine::SessionRegistry,
    error::AppError,
    models::{
        attempt::{AttemptStatus, SubmitAnswersRequest, SubmitReceipt, TimerStatus},
        question::Question,
    },
    remote::AttemptApi,
    routes,
    state::AppState,
    storage::SqliteJournal,
    utils::jwt::{CANDIDATE_ROLE, sign_jwt},
};
use serde_json::{Value, json};
use sqlx::sqlite::SqlitePoolOptions;

const SECRET: &str = "test_secret_for_integration_tests";

/// In-process stand-in for the remote attempt system.
struct FakeRemote {
    status: AttemptStatus,
    remaining_seconds: i64,
    fail_timer: bool,
    /// Attempt whose timer request never completes.
    hung_attempt: Option<String>,
    timer_calls: AtomicUsize,
    question_calls: AtomicUsize,
    submissions: Mutex<Vec<SubmitAnswersRequest>>,
}

impl FakeRemote {
    fn active() -> Self {
        Self {
            status: AttemptStatus::Active,
            remaining_seconds: 600,
            fail_timer: false,
            hung_attempt: None,
            timer_calls: AtomicUsize::new(0),
            question_calls: AtomicUsize::new(0),
            submissions: Mutex::new(Vec::new()),
        }
    }

    fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }
}

#[async_trait]
impl AttemptApi for FakeRemote {
    async fn fetch_timer(&self, _: &str, attempt_id: &str) -> Result<TimerStatus, AppError> {
        self.timer_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_timer {
            return Err(AppError::Upstream("Attempt service unavailable".to_string()));
        }
        if self.hung_attempt.as_deref() == Some(attempt_id) {
            std::future::pending::<()>().await;
        }
        // The remote marks the attempt submitted once answers arrive.
        let status = if self.submission_count() > 0 {
            AttemptStatus::Submitted
        } else {
            self.status
        };
        Ok(TimerStatus {
            status,
            remaining_seconds: self.remaining_seconds,
        })
    }

    async fn fetch_questions(&self, _: &str) -> Result<Vec<Question>, AppError> {
        self.question_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            Question {
                id: "q1".to_string(),
                prompt: "Which layer routes packets?".to_string(),
                options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            },
            Question {
                id: "q2".to_string(),
                prompt: "Which port does HTTPS use?".to_string(),
                options: vec!["80".into(), "443".into()],
            },
        ])
    }

    async fn submit(
        &self,
        _: &str,
        _: &str,
        request: &SubmitAnswersRequest,
    ) -> Result<SubmitReceipt, AppError> {
        // Keep the request in flight long enough for competing triggers to arrive.
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.submissions.lock().unwrap().push(request.clone());
        Ok(SubmitReceipt {
            message: "Assessment submitted successfully".to_string(),
        })
    }
}

/// Helper function to spawn the app on a random port for testing.
/// Returns the base URL (e.g., "http://127.0.0.1:12345").
async fn spawn_app(remote: Arc<FakeRemote>) -> String {
    // 1. A single connection keeps the in-memory journal alive
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory SQLite");

    // 2. Run migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    // 3. Create test configuration and state
    let config = Config {
        database_url: "sqlite::memory:".to_string(),
        jwt_secret: SECRET.to_string(),
        remote_base_url: "http://remote.invalid".parse().unwrap(),
        listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        rust_log: "error".to_string(),
        session: SessionSettings::default(),
    };

    let sessions = SessionRegistry::new(
        remote,
        Arc::new(SqliteJournal::new(pool)),
        config.session,
    );
    let state = AppState { sessions, config };

    // 4. Create the router with the app state
    let app = routes::create_router(state);

    // 5. Bind to port 0 to get a random available port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");

    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    // 6. Spawn the server in the background
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    address
}

fn token_for(candidate: &str) -> String {
    sign_jwt(candidate, CANDIDATE_ROLE, SECRET, 600).expect("Failed to sign token")
}

fn new_attempt_id() -> String {
    format!("att_{}", &uuid::Uuid::new_v4().to_string()[..8])
}

async fn start(client: &reqwest::Client, address: &str, attempt: &str, token: &str) -> reqwest::Response {
    client
        .post(format!("{}/api/sessions/{}", address, attempt))
        .bearer_auth(token)
        .header("User-Agent", "integration-test")
        .send()
        .await
        .expect("Failed to execute request")
}

async fn signal(client: &reqwest::Client, address: &str, attempt: &str, token: &str, kind: &str) -> Value {
    client
        .post(format!("{}/api/sessions/{}/signals", address, attempt))
        .bearer_auth(token)
        .json(&json!({ "kind": kind }))
        .send()
        .await
        .expect("Failed to send signal")
        .json()
        .await
        .expect("Failed to parse verdict")
}

/// Polls the session until it reports `phase`, or gives up.
async fn wait_for_phase(client: &reqwest::Client, address: &str, attempt: &str, token: &str, phase: &str) -> Value {
    for _ in 0..100 {
        let view: Value = client
            .get(format!("{}/api/sessions/{}", address, attempt))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if view["phase"] == phase {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("session {} never reached {}", attempt, phase);
}

#[tokio::test]
async fn missing_token_is_rejected() {
    // Arrange
    let address = spawn_app(Arc::new(FakeRemote::active())).await;
    let client = reqwest::Client::new();

    // Act
    let response = client
        .post(format!("{}/api/sessions/{}", address, new_attempt_id()))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn non_candidate_role_is_forbidden() {
    let address = spawn_app(Arc::new(FakeRemote::active())).await;
    let client = reqwest::Client::new();
    let admin = sign_jwt("admin-1", "admin", SECRET, 600).unwrap();

    let response = start(&client, &address, &new_attempt_id(), &admin).await;

    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn start_returns_questions_and_resumes_without_reloading() {
    let remote = Arc::new(FakeRemote::active());
    let address = spawn_app(remote.clone()).await;
    let client = reqwest::Client::new();
    let token = token_for("cand-1");
    let attempt = new_attempt_id();

    let first = start(&client, &address, &attempt, &token).await;
    assert_eq!(first.status().as_u16(), 201);
    let body: Value = first.json().await.unwrap();
    assert_eq!(body["entry"], "ACTIVE");
    assert_eq!(body["requestFullscreen"], true);
    assert_eq!(body["questions"].as_array().unwrap().len(), 2);
    assert_eq!(body["session"]["phase"], "ACTIVE");
    assert_eq!(body["session"]["submitLabel"], "Submit Assessment");

    let second = start(&client, &address, &attempt, &token).await;
    assert_eq!(second.status().as_u16(), 200);
    assert_eq!(remote.timer_calls.load(Ordering::SeqCst), 1);

    let audit: Vec<Value> = client
        .get(format!("{}/api/sessions/{}/audit", address, attempt))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0]["eventType"], "ASSESSMENT_STARTED");
    assert_eq!(audit[0]["metadata"]["userAgent"], "integration-test");
}

#[tokio::test]
async fn already_submitted_attempt_short_circuits() {
    let remote = Arc::new(FakeRemote {
        status: AttemptStatus::Submitted,
        ..FakeRemote::active()
    });
    let address = spawn_app(remote.clone()).await;
    let client = reqwest::Client::new();
    let token = token_for("cand-1");
    let attempt = new_attempt_id();

    let body: Value = start(&client, &address, &attempt, &token)
        .await
        .json()
        .await
        .unwrap();

    assert_eq!(body["entry"], "ALREADY_SUBMITTED");
    assert_eq!(body["destination"], "already_submitted");
    assert!(body["session"].is_null());
    assert_eq!(remote.question_calls.load(Ordering::SeqCst), 0);

    let view = client
        .get(format!("{}/api/sessions/{}", address, attempt))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(view.status().as_u16(), 404);
}

#[tokio::test]
async fn reload_after_successful_submit_does_not_reshow_questions() {
    let remote = Arc::new(FakeRemote::active());
    let address = spawn_app(remote.clone()).await;
    let client = reqwest::Client::new();
    let token = token_for("cand-1");
    let attempt = new_attempt_id();
    start(&client, &address, &attempt, &token).await;

    let submitted = client
        .post(format!("{}/api/sessions/{}/submit", address, attempt))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(submitted.status().as_u16(), 202);
    wait_for_phase(&client, &address, &attempt, &token, "SUBMITTED").await;

    let reload = start(&client, &address, &attempt, &token).await;
    assert_eq!(reload.status().as_u16(), 200);
    let body: Value = reload.json().await.unwrap();
    assert_eq!(body["entry"], "ALREADY_SUBMITTED");
    assert_eq!(body["destination"], "already_submitted");
    assert!(body["session"].is_null());
    assert!(body["questions"].as_array().unwrap().is_empty());
    assert_eq!(remote.timer_calls.load(Ordering::SeqCst), 2);
    assert_eq!(remote.question_calls.load(Ordering::SeqCst), 1);
    assert_eq!(remote.submission_count(), 1);
}

#[tokio::test]
async fn slow_start_does_not_stall_other_sessions() {
    let remote = Arc::new(FakeRemote {
        hung_attempt: Some("att_hung".to_string()),
        ..FakeRemote::active()
    });
    let address = spawn_app(remote.clone()).await;
    let client = reqwest::Client::new();
    let token = token_for("cand-1");
    let attempt = new_attempt_id();
    start(&client, &address, &attempt, &token).await;

    let hung = {
        let client = client.clone();
        let address = address.clone();
        let token = token_for("cand-2");
        tokio::spawn(async move { start(&client, &address, "att_hung", &token).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let verdict = tokio::time::timeout(
        Duration::from_secs(2),
        signal(&client, &address, &attempt, &token, "window_blur"),
    )
    .await
    .expect("signal waited on another attempt's start");
    assert_eq!(verdict["violations"], 1);

    let view = tokio::time::timeout(
        Duration::from_secs(2),
        wait_for_phase(&client, &address, &attempt, &token, "ACTIVE"),
    )
    .await
    .expect("view waited on another attempt's start");
    assert_eq!(view["violations"], 1);

    assert!(!hung.is_finished());
    hung.abort();
}

#[tokio::test]
async fn elapsed_timer_redirects_to_dashboard() {
    let remote = Arc::new(FakeRemote {
        remaining_seconds: 0,
        ..FakeRemote::active()
    });
    let address = spawn_app(remote.clone()).await;
    let client = reqwest::Client::new();

    let body: Value = start(&client, &address, &new_attempt_id(), &token_for("cand-1"))
        .await
        .json()
        .await
        .unwrap();

    assert_eq!(body["entry"], "TIME_ELAPSED");
    assert_eq!(body["destination"], "dashboard");
    assert_eq!(remote.question_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn load_failure_starts_nothing() {
    let remote = Arc::new(FakeRemote {
        fail_timer: true,
        ..FakeRemote::active()
    });
    let address = spawn_app(remote).await;
    let client = reqwest::Client::new();
    let token = token_for("cand-1");
    let attempt = new_attempt_id();

    let response = start(&client, &address, &attempt, &token).await;
    assert_eq!(response.status().as_u16(), 502);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Attempt service unavailable");

    let view = client
        .get(format!("{}/api/sessions/{}", address, attempt))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(view.status().as_u16(), 404);
}

#[tokio::test]
async fn competing_submits_reach_remote_once() {
    let remote = Arc::new(FakeRemote::active());
    let address = spawn_app(remote.clone()).await;
    let client = reqwest::Client::new();
    let token = token_for("cand-1");
    let attempt = new_attempt_id();
    start(&client, &address, &attempt, &token).await;

    for option in ["B", "C"] {
        let response = client
            .put(format!("{}/api/sessions/{}/answers", address, attempt))
            .bearer_auth(&token)
            .json(&json!({ "questionId": "q1", "option": option }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }

    let submit = || {
        client
            .post(format!("{}/api/sessions/{}/submit", address, attempt))
            .bearer_auth(&token)
            .send()
    };
    let (a, b) = tokio::join!(submit(), submit());
    let a: Value = a.unwrap().json().await.unwrap();
    let b: Value = b.unwrap().json().await.unwrap();
    let accepted = [&a, &b]
        .iter()
        .filter(|r| r["accepted"] == true)
        .count();
    assert_eq!(accepted, 1);

    // Exit confirmation arriving while the request is in flight is dropped too.
    let exit: Value = client
        .post(format!("{}/api/sessions/{}/exit", address, attempt))
        .bearer_auth(&token)
        .json(&json!({ "confirm": true }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(exit["accepted"], false);

    let view = wait_for_phase(&client, &address, &attempt, &token, "SUBMITTED").await;
    assert_eq!(view["destination"], "dashboard");
    assert_eq!(view["notice"]["message"], "Assessment submitted successfully");

    assert_eq!(remote.submission_count(), 1);
    let sent = remote.submissions.lock().unwrap()[0].clone();
    assert_eq!(sent.answers.len(), 1);
    assert_eq!(sent.answers[0].question_id, "q1");
    assert_eq!(sent.answers[0].selected_option, "C");

    let audit: Vec<Value> = client
        .get(format!("{}/api/sessions/{}/audit", address, attempt))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(audit.is_empty(), "journal is cleared after success");

    let late: Value = client
        .post(format!("{}/api/sessions/{}/submit", address, attempt))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(late["accepted"], false);
    assert_eq!(remote.submission_count(), 1);
}

#[tokio::test]
async fn violations_force_a_single_submission() {
    let remote = Arc::new(FakeRemote::active());
    let address = spawn_app(remote.clone()).await;
    let client = reqwest::Client::new();
    let token = token_for("cand-1");
    let attempt = new_attempt_id();
    start(&client, &address, &attempt, &token).await;

    for _ in 0..5 {
        let verdict = signal(&client, &address, &attempt, &token, "context_menu").await;
        assert_eq!(verdict["eventType"], "RIGHT_CLICK");
        assert_eq!(verdict["suppress"], true);
        assert_eq!(verdict["violations"], 0);
    }

    let back = signal(&client, &address, &attempt, &token, "history_back").await;
    assert_eq!(back["blockNavigation"], true);
    assert_eq!(back["counted"], false);

    let copy = signal(&client, &address, &attempt, &token, "copy").await;
    assert_eq!(copy["eventType"], "COPY_ATTEMPT");
    assert_eq!(copy["suppress"], true);
    signal(&client, &address, &attempt, &token, "visibility_hidden").await;
    let third = signal(&client, &address, &attempt, &token, "window_blur").await;
    assert_eq!(third["violations"], 3);
    signal(&client, &address, &attempt, &token, "paste").await;
    signal(&client, &address, &attempt, &token, "fullscreen_exit").await;

    wait_for_phase(&client, &address, &attempt, &token, "SUBMITTED").await;
    assert_eq!(remote.submission_count(), 1);
    assert!(remote.submissions.lock().unwrap()[0].answers.is_empty());
}

#[tokio::test]
async fn invalid_answers_are_rejected() {
    let address = spawn_app(Arc::new(FakeRemote::active())).await;
    let client = reqwest::Client::new();
    let token = token_for("cand-1");
    let attempt = new_attempt_id();
    start(&client, &address, &attempt, &token).await;

    for body in [
        json!({ "questionId": "q9", "option": "A" }),
        json!({ "questionId": "q2", "option": "8080" }),
        json!({ "questionId": "", "option": "A" }),
    ] {
        let response = client
            .put(format!("{}/api/sessions/{}/answers", address, attempt))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
    }
}

#[tokio::test]
async fn other_candidate_cannot_drive_session() {
    let address = spawn_app(Arc::new(FakeRemote::active())).await;
    let client = reqwest::Client::new();
    let attempt = new_attempt_id();
    start(&client, &address, &attempt, &token_for("cand-1")).await;

    let response = client
        .post(format!("{}/api/sessions/{}/submit", address, attempt))
        .bearer_auth(token_for("cand-2"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn close_tears_session_down() {
    let remote = Arc::new(FakeRemote::active());
    let address = spawn_app(remote.clone()).await;
    let client = reqwest::Client::new();
    let token = token_for("cand-1");
    let attempt = new_attempt_id();
    start(&client, &address, &attempt, &token).await;

    let closed: Value = client
        .delete(format!("{}/api/sessions/{}", address, attempt))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(closed["phase"], "REDIRECTED");

    let view = client
        .get(format!("{}/api/sessions/{}", address, attempt))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(view.status().as_u16(), 404);
    assert_eq!(remote.submission_count(), 0);
}
