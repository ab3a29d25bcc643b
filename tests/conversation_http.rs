//! Integration tests for the HTTP backend client and the REST surface.
//!
//! Each test spins up a fake survey service and the conversation server on
//! random ports and drives them over real HTTP with reqwest.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use rent_assist::config::{BackendConfig, FlowConfig};
use rent_assist::jobs::backend::INVITATION_HEADER;
use rent_assist::jobs::{AnalysisBackend, HttpBackend, JobManager};
use rent_assist::routes::{AppState, conversation_routes};
use rent_assist::survey::form::AnswerValue;
use rent_assist::survey::payload::SurveyPayload;
use rent_assist::survey::{ConversationController, FormData, QuestionGraph};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Scripted behaviour of the fake survey service.
#[derive(Default)]
struct FakeService {
    fail_submit: bool,
    /// Progress polls answered with "in progress" before reporting completion.
    polls_before_done: usize,
    progress_calls: usize,
    submissions: Vec<Value>,
    invitation: Option<String>,
}

type Shared = Arc<Mutex<FakeService>>;

async fn fake_submit(State(svc): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let mut svc = svc.lock().unwrap();
    if svc.fail_submit {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"ok": false, "error": "database unavailable"})),
        );
    }
    svc.invitation = headers
        .get(INVITATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    svc.submissions.push(body);
    (StatusCode::OK, Json(json!({"ok": true, "analysis_id": "A1"})))
}

async fn fake_progress(State(svc): State<Shared>, Path(_id): Path<String>) -> Json<Value> {
    let mut svc = svc.lock().unwrap();
    svc.progress_calls += 1;
    if svc.progress_calls <= svc.polls_before_done {
        Json(json!({"ok": true, "in_progress": true, "progress": 0.5, "message": "正在搜索房源", "details": []}))
    } else {
        Json(json!({"ok": true, "in_progress": false, "progress": 1.0, "message": "分析完成", "details": []}))
    }
}

async fn fake_result(Path(_id): Path<String>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "analysis": {
            "ok": true,
            "summary": "为您找到 3 套房源",
            "report_markdown": "# 房源报告",
            "tasks": [{"task_name": "search", "status": "done"}],
            "error": null
        }
    }))
}

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    format!("http://127.0.0.1:{port}")
}

/// Start the fake survey service; returns its base URL and shared state.
async fn start_fake_service(svc: FakeService) -> (String, Shared) {
    let shared: Shared = Arc::new(Mutex::new(svc));
    let app = Router::new()
        .route("/survey/", post(fake_submit))
        .route("/survey/progress/{id}/", get(fake_progress))
        .route("/survey/result/{id}/", get(fake_result))
        .with_state(shared.clone());
    (serve(app).await, shared)
}

fn fast_config() -> FlowConfig {
    FlowConfig {
        thinking_delay: Duration::from_millis(10),
        poll_interval: Duration::from_millis(50),
        job_timeout: Duration::from_secs(5),
        max_consecutive_poll_failures: 3,
    }
}

fn backend_for(base_url: &str) -> HttpBackend {
    HttpBackend::new(BackendConfig {
        base_url: base_url.to_string(),
        request_timeout: Duration::from_secs(2),
        invitation_code: Some(SecretString::from("RENT2025".to_string())),
    })
    .unwrap()
}

/// Start the conversation server against `backend_url`; returns its base URL.
async fn start_app(backend_url: &str, config: FlowConfig) -> String {
    let backend = Arc::new(backend_for(backend_url));
    let (jobs, rx) = JobManager::new(backend, config.clone());
    let graph = Arc::new(QuestionGraph::rental_survey().unwrap());
    let controller = ConversationController::new(graph, jobs.clone(), config);
    tokio::spawn(controller.clone().run_job_events(rx));
    controller.start().await;
    serve(conversation_routes(AppState { controller, jobs })).await
}

async fn conversation(client: &reqwest::Client, base: &str) -> Value {
    client
        .get(format!("{base}/api/conversation"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

/// Poll the conversation until its status is `status`.
async fn wait_for_status(client: &reqwest::Client, base: &str, status: &str) -> Value {
    timeout(TEST_TIMEOUT, async {
        loop {
            let view = conversation(client, base).await;
            if view["status"] == status {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("conversation never reached {status}"))
}

async fn post_json(client: &reqwest::Client, base: &str, path: &str, body: Value) -> reqwest::Response {
    client
        .post(format!("{base}{path}"))
        .json(&body)
        .send()
        .await
        .unwrap()
}

/// Answer every question on the two-bedroom path, ending with an empty
/// multi-select.
async fn complete_survey(client: &reqwest::Client, base: &str) {
    let steps: [(&str, Value); 8] = [
        ("/api/conversation/answer", json!({"value": "悉尼大学（USYD）"})),
        ("/api/conversation/budget", json!({"min": "300", "max": "500"})),
        ("/api/conversation/answer", json!({"value": "包含"})),
        ("/api/conversation/answer", json!({"value": "30 分钟"})),
        ("/api/conversation/answer", json!({"value": "两居室"})),
        ("/api/conversation/answer", json!({"value": "2025-02-01"})),
        ("/api/conversation/answer", json!({"value": "12 个月"})),
        ("/api/conversation/multi-select", json!({"selected": []})),
    ];
    let last = steps.len() - 1;
    for (i, (path, body)) in steps.into_iter().enumerate() {
        let resp = post_json(client, base, path, body).await;
        assert_eq!(resp.status(), reqwest::StatusCode::OK, "step {path} failed");
        if i < last {
            wait_for_status(client, base, "awaiting_answer").await;
        }
    }
}

fn last_content(view: &Value) -> String {
    view["transcript"]
        .as_array()
        .and_then(|t| t.last())
        .and_then(|t| t["content"].as_str())
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn http_backend_speaks_survey_protocol() {
    let (base, svc) = start_fake_service(FakeService {
        polls_before_done: 1,
        ..Default::default()
    })
    .await;
    let backend = backend_for(&base);

    let form: FormData = serde_json::from_value(json!({
        "minBudget": "300",
        "maxBudget": "500",
        "roomType": "Studio",
        "flexibility": []
    }))
    .unwrap();
    assert_eq!(form.get("flexibility"), Some(&AnswerValue::List(Vec::new())));

    let receipt = backend.submit(&SurveyPayload::from_form(&form)).await.unwrap();
    assert_eq!(receipt.job_id, "A1");

    let running = backend.get_progress("A1").await.unwrap();
    assert!(!running.completed);
    assert_eq!(running.stage, "正在搜索房源");
    assert!((running.percentage - 50.0).abs() < f64::EPSILON);
    assert!(backend.get_progress("A1").await.unwrap().completed);

    let result = backend.get_result("A1").await.unwrap();
    assert_eq!(result.summary.as_deref(), Some("为您找到 3 套房源"));
    assert_eq!(result.tasks.len(), 1);

    let svc = svc.lock().unwrap();
    assert_eq!(svc.invitation.as_deref(), Some("RENT2025"));
    let sent = &svc.submissions[0];
    assert_eq!(sent["survey"]["budget"]["weekly_total"], 400);
    assert_eq!(sent["survey"]["property"]["type"], "Studio");
    assert_eq!(sent["meta"]["raw"]["maxBudget"], "500");
}

#[tokio::test]
async fn http_backend_maps_server_errors() {
    let (base, _svc) = start_fake_service(FakeService {
        fail_submit: true,
        ..Default::default()
    })
    .await;
    let err = backend_for(&base)
        .submit(&SurveyPayload::from_form(&FormData::default()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("database unavailable"), "got {err}");
}

#[tokio::test]
async fn survey_runs_to_analysis_over_rest() {
    let (backend_url, svc) = start_fake_service(FakeService {
        polls_before_done: 2,
        ..Default::default()
    })
    .await;
    let base = start_app(&backend_url, fast_config()).await;
    let client = reqwest::Client::new();

    complete_survey(&client, &base).await;
    let view = wait_for_status(&client, &base, "done").await;

    assert_eq!(view["active_job"], "A1");
    assert!(last_content(&view).contains("为您找到 3 套房源"));
    assert_eq!(view["form"]["flexibility"], json!([]));
    assert_eq!(svc.lock().unwrap().submissions.len(), 1);

    // A duplicate pushed after the poll settled is acknowledged but ignored.
    let resp = post_json(
        &client,
        &base,
        "/api/jobs/A1/result",
        json!({"ok": true, "summary": "duplicate"}),
    )
    .await;
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["accepted"], false);
    assert_eq!(body["settled_by"], "poll");
    let after = conversation(&client, &base).await;
    assert_eq!(after["transcript"], view["transcript"]);
}

#[tokio::test]
async fn pushed_result_settles_before_polling_does() {
    let (backend_url, _svc) = start_fake_service(FakeService {
        polls_before_done: usize::MAX,
        ..Default::default()
    })
    .await;
    let base = start_app(&backend_url, fast_config()).await;
    let client = reqwest::Client::new();

    complete_survey(&client, &base).await;
    wait_for_status(&client, &base, "awaiting_job").await;

    let resp = post_json(
        &client,
        &base,
        "/api/jobs/A1/result",
        json!({"ok": true, "analysis": {"ok": true, "summary": "推送结果"}}),
    )
    .await;
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["accepted"], true);
    assert_eq!(body["settled_by"], "push");

    let view = wait_for_status(&client, &base, "done").await;
    assert!(last_content(&view).contains("推送结果"));
}

#[tokio::test]
async fn failed_submission_shows_error_and_retry_resubmits() {
    let (backend_url, svc) = start_fake_service(FakeService {
        fail_submit: true,
        ..Default::default()
    })
    .await;
    let base = start_app(&backend_url, fast_config()).await;
    let client = reqwest::Client::new();

    complete_survey(&client, &base).await;
    let view = wait_for_status(&client, &base, "error").await;
    assert!(last_content(&view).contains("提交分析请求失败"));
    assert!(view["active_job"].is_null());

    // The service recovers; a deliberate retry submits the same snapshot.
    svc.lock().unwrap().fail_submit = false;
    let resp = post_json(&client, &base, "/api/conversation/retry", json!({})).await;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let view = wait_for_status(&client, &base, "done").await;
    let svc = svc.lock().unwrap();
    assert_eq!(svc.submissions.len(), 1);
    assert_eq!(svc.submissions[0]["survey"]["budget"]["weekly_min"], 300);
    assert!(last_content(&view).contains("为您找到 3 套房源"));
}

#[tokio::test]
async fn timeout_is_reported_once() {
    let (backend_url, _svc) = start_fake_service(FakeService {
        polls_before_done: usize::MAX,
        ..Default::default()
    })
    .await;
    let config = FlowConfig {
        job_timeout: Duration::from_millis(300),
        ..fast_config()
    };
    let base = start_app(&backend_url, config).await;
    let client = reqwest::Client::new();

    complete_survey(&client, &base).await;
    let view = wait_for_status(&client, &base, "done").await;
    assert!(last_content(&view).contains("超时"));

    let timeouts = view["transcript"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|t| t["content"].as_str().is_some_and(|c| c.contains("超时")))
        .count();
    assert_eq!(timeouts, 1);
}
