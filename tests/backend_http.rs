use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use formulate::errors::ProviderError;
use formulate::health::{HealthSettings, HealthStatus, probe, spawn_health_monitor};
use formulate::providers::{
    BackendProvider, CompletionProvider, CompletionRequest, EmbeddedProvider, InvocationSelector,
    OllamaCapability,
};
use formulate::{ModelId, RetryController};

#[derive(Clone, Default)]
struct Recorded {
    bodies: Arc<Mutex<Vec<Value>>>,
    auth: Arc<Mutex<Vec<Option<String>>>>,
}

async fn complete(
    State(recorded): State<Recorded>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    recorded.bodies.lock().unwrap().push(body.clone());
    recorded.auth.lock().unwrap().push(
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    );

    match body["prompt"].as_str().unwrap_or_default() {
        p if p.starts_with("explode") => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "boom", "api_key": "sk-live-123"})),
        ),
        p if p.starts_with("silent") => (StatusCode::OK, Json(json!({"usage": {}}))),
        _ => (
            StatusCode::OK,
            Json(json!({"completion": "{\"ok\": true}"})),
        ),
    }
}

async fn spawn(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn completion_server() -> (String, Recorded) {
    let recorded = Recorded::default();
    let router = Router::new()
        .route("/api/ai/completion", post(complete))
        .route("/api/health", get(|| async { "ok" }))
        .route(
            "/api/down",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        )
        .with_state(recorded.clone());
    let addr = spawn(router).await;
    (format!("http://{addr}"), recorded)
}

fn backend(base: &str) -> BackendProvider {
    let headers = BTreeMap::from([("Authorization".to_string(), "Bearer test-key".to_string())]);
    BackendProvider::new(base, "/api/ai/completion", headers, 5).unwrap()
}

#[tokio::test]
async fn backend_posts_camel_case_body_with_headers() {
    let (base, recorded) = completion_server().await;

    let result = backend(&base)
        .complete(
            &CompletionRequest::new("scale it")
                .with_system("be exact")
                .with_max_tokens(256)
                .with_model(ModelId::new("gpt-4o-mini")),
        )
        .await
        .unwrap();

    assert_eq!(result.text(), "{\"ok\": true}");
    let body = recorded.bodies.lock().unwrap()[0].clone();
    assert_eq!(body["prompt"], "scale it");
    assert_eq!(body["systemPrompt"], "be exact");
    assert_eq!(body["maxTokens"], 256);
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(
        recorded.auth.lock().unwrap()[0].as_deref(),
        Some("Bearer test-key")
    );
}

#[tokio::test]
async fn missing_completion_field_is_empty_text() {
    let (base, _) = completion_server().await;
    let result = backend(&base)
        .complete(&CompletionRequest::new("silent please"))
        .await
        .unwrap();
    assert_eq!(result.text(), "");
}

#[tokio::test]
async fn non_success_is_a_redacted_backend_error() {
    let (base, _) = completion_server().await;
    let err = backend(&base)
        .complete(&CompletionRequest::new("explode"))
        .await
        .unwrap_err();

    match err {
        ProviderError::Backend { status, body } => {
            assert_eq!(status, 500);
            assert!(body.contains("boom"));
            assert!(!body.contains("sk-live-123"));
        }
        other => panic!("expected Backend error, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_embedded_falls_back_to_backend() {
    let (base, recorded) = completion_server().await;
    let ollama = OllamaCapability::new("http://127.0.0.1:9", Some(ModelId::llama2()), true, 2).unwrap();
    let selector = InvocationSelector::new(Arc::new(backend(&base)))
        .with_embedded(Arc::new(EmbeddedProvider::new(Arc::new(ollama))));

    let result = selector
        .invoke(&CompletionRequest::new("hello"))
        .await
        .unwrap();

    assert_eq!(result.provider, "backend");
    assert_eq!(recorded.bodies.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn retry_over_http_surfaces_last_backend_error() {
    let (base, recorded) = completion_server().await;
    let selector = InvocationSelector::new(Arc::new(backend(&base)));
    let retry = RetryController::new(Arc::new(selector));

    let err = retry
        .request_json(&CompletionRequest::new("explode"), 2)
        .await
        .unwrap_err();

    assert!(err.to_string().starts_with("Backend returned 500"));
    assert_eq!(recorded.bodies.lock().unwrap().len(), 2);
    let second = recorded.bodies.lock().unwrap()[1].clone();
    assert!(second["prompt"]
        .as_str()
        .unwrap()
        .contains("previous response was not valid JSON"));
    assert!(second["systemPrompt"]
        .as_str()
        .unwrap()
        .starts_with("You respond with valid JSON only."));
}

#[tokio::test]
async fn ollama_capability_reads_generate_endpoint() {
    let router = Router::new().route(
        "/api/generate",
        post(|Json(body): Json<Value>| async move {
            let model = body["model"].as_str().unwrap_or_default().to_string();
            if body["stream"] == json!(true) {
                format!(
                    "{{\"response\": \"{{\\\"model\\\": \", \"done\": false}}\n{{\"response\": \"\\\"{model}\\\"}}\", \"done\": true}}\n"
                )
            } else {
                json!({"response": format!("{{\"model\": \"{model}\"}}"), "done": true}).to_string()
            }
        }),
    );
    let addr = spawn(router).await;
    let ollama = OllamaCapability::new(&format!("http://{addr}"), None, true, 5).unwrap();
    let provider = EmbeddedProvider::new(Arc::new(ollama));

    let single = provider
        .complete(&CompletionRequest::new("hi").with_model(ModelId::new("llama3")))
        .await
        .unwrap();
    assert_eq!(single.text(), "{\"model\": \"llama3\"}");

    let streamed = provider
        .complete(
            &CompletionRequest::new("hi")
                .with_model(ModelId::new("llama3"))
                .with_streaming(true),
        )
        .await
        .unwrap();
    assert_eq!(streamed.text(), "{\"model\": \"llama3\"}");
}

#[tokio::test]
async fn health_probe_reports_connected_and_disconnected() {
    let (base, _) = completion_server().await;
    let client = reqwest::Client::new();

    let settings = HealthSettings::new(base.clone());
    assert_eq!(probe(&client, &settings).await, HealthStatus::Connected);

    let mut down = HealthSettings::new(base);
    down.path = "/api/down".to_string();
    assert_eq!(probe(&client, &down).await, HealthStatus::Disconnected);
}

#[tokio::test]
async fn health_probe_times_out_as_disconnected() {
    let router = Router::new().route(
        "/api/health",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "late"
        }),
    );
    let addr = spawn(router).await;
    let mut settings = HealthSettings::new(format!("http://{addr}"));
    settings.timeout = Duration::from_millis(100);

    let status = probe(&reqwest::Client::new(), &settings).await;
    assert_eq!(status, HealthStatus::Disconnected);
}

#[tokio::test]
async fn health_monitor_publishes_and_stops() {
    let (base, _) = completion_server().await;
    let mut settings = HealthSettings::new(base);
    settings.interval = Duration::from_millis(50);

    let mut handle = spawn_health_monitor(settings);
    tokio::time::timeout(Duration::from_secs(5), handle.updates.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(handle.current(), HealthStatus::Connected);

    handle.stop();
    tokio::time::timeout(Duration::from_secs(5), async {
        while handle.updates.changed().await.is_ok() {}
    })
    .await
    .unwrap();
}
