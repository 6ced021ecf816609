//! End-to-end tests of the HTTP API over a real socket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{broadcast, oneshot};

use codemend::analysis::Engine;
use codemend::converge::{Controller, LoopSettings};
use codemend::oracle::{FixOracle, FixRequest, OracleError};
use codemend::progress::ProgressEvent;
use codemend::server::Server;
use codemend::service::Service;

/// Rewrites `var` to `let`.
struct VarToLet;

#[async_trait]
impl FixOracle for VarToLet {
    async fn fix(&self, request: &FixRequest) -> Result<String, OracleError> {
        Ok(request.code.replace("var ", "let "))
    }
}

/// Hands back its input unchanged.
struct Stubborn;

#[async_trait]
impl FixOracle for Stubborn {
    async fn fix(&self, request: &FixRequest) -> Result<String, OracleError> {
        Ok(request.code.clone())
    }
}

struct Running {
    base: String,
    client: reqwest::Client,
    _shutdown: oneshot::Sender<()>,
}

impl Running {
    async fn start(oracle: Option<Arc<dyn FixOracle>>) -> Self {
        let engine = Arc::new(Engine::with_defaults().unwrap());
        let (events, _) = broadcast::channel::<ProgressEvent>(64);
        let controller = match oracle {
            Some(oracle) => Controller::new(engine, oracle),
            None => Controller::report_only(engine),
        }
        .with_settings(LoopSettings {
            max_iterations: 2,
            oracle_timeout: Duration::from_secs(5),
        })
        .with_observer(Arc::new(events.clone()));

        let listener = Server::bind("127.0.0.1", 0).await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let server = Server::new(Service::new(controller), events, 4096);
        let (shutdown, stopped) = oneshot::channel::<()>();
        tokio::spawn(server.serve(listener, async move {
            let _ = stopped.await;
        }));

        Self {
            base,
            client: reqwest::Client::new(),
            _shutdown: shutdown,
        }
    }

    async fn post(&self, path: &str, body: &str) -> (u16, Value) {
        let response = self
            .client
            .post(format!("{}{}", self.base, path))
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    async fn analyze(&self, body: Value) -> (u16, Value) {
        self.post("/api/analyze", &body.to_string()).await
    }
}

#[tokio::test]
async fn test_clean_code() {
    let server = Running::start(None).await;
    let (status, body) = server
        .analyze(json!({ "code": "x = 1", "language": "python" }))
        .await;

    assert_eq!(status, 200);
    assert_eq!(body["status"], "done");
    assert_eq!(body["message"], "Code looks clean!");
    assert_eq!(body["suggestions"], json!([]));
    assert!(body["analysisId"].is_string());
}

#[tokio::test]
async fn test_report_only_lists_suggestions() {
    let server = Running::start(None).await;
    let (status, body) = server
        .analyze(json!({ "code": "var x = 1;", "language": "javascript" }))
        .await;

    assert_eq!(status, 200);
    assert_eq!(body["status"], "issues_found");
    assert_eq!(
        body["suggestions"],
        json!(["⚠️ Use 'const' or 'let' instead of 'var' for 'x'"])
    );
}

#[tokio::test]
async fn test_fixed_code() {
    let server = Running::start(Some(Arc::new(VarToLet))).await;
    let (status, body) = server
        .analyze(json!({ "code": "var x = 1;", "language": "javascript" }))
        .await;

    assert_eq!(status, 200);
    assert_eq!(body["status"], "fixed");
    assert_eq!(body["fixedCode"], "let x = 1;");
    assert_eq!(body["iterations"], 1);
}

#[tokio::test]
async fn test_fix_false_only_reports() {
    let server = Running::start(Some(Arc::new(VarToLet))).await;
    let (_, body) = server
        .analyze(json!({ "code": "var x = 1;", "language": "javascript", "fix": false }))
        .await;

    assert_eq!(body["status"], "issues_found");
    assert!(body.get("fixedCode").is_none());
}

#[tokio::test]
async fn test_abandoned_session() {
    let server = Running::start(Some(Arc::new(Stubborn))).await;
    let (status, body) = server
        .analyze(json!({ "code": "var x = 1;", "language": "javascript" }))
        .await;

    assert_eq!(status, 200);
    assert_eq!(body["status"], "issues_found");
    assert_eq!(body["converged"], false);
    assert_eq!(body["fixedCode"], "var x = 1;");
    assert_eq!(body["iterations"], 2);
    assert!(body["reason"].is_string());
}

#[tokio::test]
async fn test_syntax_error() {
    let server = Running::start(Some(Arc::new(VarToLet))).await;
    let (status, body) = server
        .analyze(json!({ "code": "print('Hello'", "language": "python" }))
        .await;

    assert_eq!(status, 200);
    assert_eq!(body["status"], "syntax_error");
    let first = body["suggestions"][0].as_str().unwrap();
    assert!(first.starts_with('❌'));
    assert!(first.contains("Syntax Error"));
}

#[tokio::test]
async fn test_request_validation() {
    let server = Running::start(None).await;

    let cases = [
        (json!({ "language": "python" }), "Missing or invalid code field"),
        (json!({ "code": "x = 1" }), "Missing or invalid language field"),
        (
            json!({ "code": "x = 1", "language": 3 }),
            "Missing or invalid language field",
        ),
        (
            json!({ "code": "x = 1", "language": "cobol" }),
            "Unsupported language",
        ),
    ];
    for (request, error) in cases {
        let (status, body) = server.analyze(request).await;
        assert_eq!(status, 400);
        assert_eq!(body, json!({ "error": error }));
    }
}

#[tokio::test]
async fn test_oversized_body() {
    let server = Running::start(None).await;
    let code = "x".repeat(8192);
    let (status, body) = server
        .analyze(json!({ "code": code, "language": "python" }))
        .await;

    assert_eq!(status, 413);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_report_endpoint() {
    let server = Running::start(Some(Arc::new(VarToLet))).await;
    let (status, body) = server
        .post(
            "/api/report",
            &json!({ "code": "eval('1')", "language": "python" }).to_string(),
        )
        .await;

    assert_eq!(status, 200);
    assert_eq!(body["language"], "python");
    assert_eq!(body["code"], "eval('1')");
    assert!(body["suggestions"][0].as_str().unwrap().contains("eval"));
}

#[tokio::test]
async fn test_health_and_unknown_route() {
    let server = Running::start(None).await;

    let health: Value = server
        .client
        .get(format!("{}/health", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert!(health["uptime_secs"].is_u64());
    assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));

    let missing = server
        .client
        .get(format!("{}/api/nothing", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status().as_u16(), 404);
}

#[tokio::test]
async fn test_event_stream() {
    let server = Running::start(None).await;

    let mut stream = server
        .client
        .get(format!("{}/api/events", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(
        stream.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );

    let (_, body) = server
        .analyze(json!({ "code": "x = 1", "language": "python" }))
        .await;
    let id = body["analysisId"].as_str().unwrap().to_string();

    let mut text = String::new();
    while !text.contains("event: analysisCompleted") {
        let chunk = tokio::time::timeout(Duration::from_secs(5), stream.chunk())
            .await
            .expect("event within timeout")
            .unwrap()
            .expect("stream open");
        text.push_str(std::str::from_utf8(&chunk).unwrap());
    }

    assert!(text.starts_with("event: analysisStarted\ndata: "));
    assert!(text.contains(&id));
    assert!(text.contains(r#""progress":100"#));
}
