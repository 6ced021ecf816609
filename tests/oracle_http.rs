//! HTTP fix oracle against a local hyper server.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use codemend::analysis::{Language, SourceUnit};
use codemend::cli::{build_engine, build_oracle};
use codemend::config::Config;
use codemend::converge::{CancelToken, Controller, Outcome};
use codemend::oracle::{FixOracle, FixRequest, HttpFixOracle, OracleError, RetryPolicy};

/// What the stub endpoint saw.
#[derive(Debug, Clone)]
struct Seen {
    body: serde_json::Value,
    authorization: Option<String>,
}

type Reply = (Duration, u16, String);

/// Replays `(status, body)` pairs; the last one repeats.
struct StubOracle {
    url: String,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl StubOracle {
    async fn start(responses: Vec<(u16, &str)>) -> Self {
        Self::start_delayed(
            responses
                .into_iter()
                .map(|(status, body)| (Duration::ZERO, status, body))
                .collect(),
        )
        .await
    }

    /// Like `start`, waiting the given delay before each reply.
    async fn start_delayed(responses: Vec<(Duration, u16, &str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/fix", listener.local_addr().unwrap());
        let responses: Arc<Mutex<VecDeque<Reply>>> = Arc::new(Mutex::new(
            responses
                .into_iter()
                .map(|(d, s, b)| (d, s, b.to_string()))
                .collect(),
        ));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_by_server = Arc::clone(&seen);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let responses = Arc::clone(&responses);
                let seen = Arc::clone(&seen_by_server);
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let responses = Arc::clone(&responses);
                        let seen = Arc::clone(&seen);
                        async move {
                            let authorization = req
                                .headers()
                                .get("authorization")
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_string);
                            let bytes = req.into_body().collect().await.unwrap().to_bytes();
                            seen.lock().unwrap().push(Seen {
                                body: serde_json::from_slice(&bytes).unwrap_or_default(),
                                authorization,
                            });

                            let (delay, status, body) = {
                                let mut responses = responses.lock().unwrap();
                                if responses.len() > 1 {
                                    responses.pop_front().unwrap()
                                } else {
                                    responses.front().cloned().unwrap()
                                }
                            };
                            tokio::time::sleep(delay).await;
                            let mut response = Response::new(Full::new(Bytes::from(body)));
                            *response.status_mut() = StatusCode::from_u16(status).unwrap();
                            Ok::<_, Infallible>(response)
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self { url, seen }
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

fn request() -> FixRequest {
    FixRequest {
        code: "var x = 1;".to_string(),
        language: Language::JavaScript,
        suggestions: vec!["⚠️ Use 'const' or 'let' instead of 'var' for 'x'".to_string()],
    }
}

fn oracle(url: &str) -> HttpFixOracle {
    HttpFixOracle::new(url, Duration::from_secs(5)).unwrap()
}

fn quick_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

#[tokio::test]
async fn test_returns_fixed_code() {
    let stub = StubOracle::start(vec![(200, r#"{"fixedCode":"const x = 1;"}"#)]).await;

    let fixed = oracle(&stub.url).fix(&request()).await.unwrap();
    assert_eq!(fixed, "const x = 1;");

    let seen = stub.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].body["code"], "var x = 1;");
    assert_eq!(seen[0].body["language"], "javascript");
    assert_eq!(seen[0].body["suggestions"].as_array().unwrap().len(), 1);
    assert!(seen[0].authorization.is_none());
}

#[tokio::test]
async fn test_strips_markdown_fence() {
    let stub = StubOracle::start(vec![(
        200,
        r#"{"fixedCode":"```javascript\nconst x = 1;\n```"}"#,
    )])
    .await;

    let fixed = oracle(&stub.url).fix(&request()).await.unwrap();
    assert_eq!(fixed, "const x = 1;");
}

#[tokio::test]
async fn test_sends_bearer_token() {
    let stub = StubOracle::start(vec![(200, r#"{"fixedCode":"const x = 1;"}"#)]).await;

    oracle(&stub.url)
        .with_bearer_token("secret")
        .fix(&request())
        .await
        .unwrap();
    assert_eq!(
        stub.seen()[0].authorization.as_deref(),
        Some("Bearer secret")
    );
}

#[tokio::test]
async fn test_server_error_is_status() {
    let stub = StubOracle::start(vec![(500, "boom")]).await;

    let err = oracle(&stub.url).fix(&request()).await.unwrap_err();
    assert_eq!(
        err,
        OracleError::Status {
            status: 500,
            body: "boom".to_string()
        }
    );
    assert_eq!(stub.seen().len(), 1);
}

#[tokio::test]
async fn test_missing_fixed_code_is_malformed() {
    let stub = StubOracle::start(vec![(200, r#"{"answer":"const x = 1;"}"#)]).await;

    let err = oracle(&stub.url).fix(&request()).await.unwrap_err();
    assert!(matches!(err, OracleError::MalformedResponse(_)), "{:?}", err);
}

#[tokio::test]
async fn test_non_json_is_malformed() {
    let stub = StubOracle::start(vec![(200, "const x = 1;")]).await;

    let err = oracle(&stub.url).fix(&request()).await.unwrap_err();
    assert!(matches!(err, OracleError::MalformedResponse(_)), "{:?}", err);
}

#[tokio::test]
async fn test_retries_transient_failures() {
    let stub = StubOracle::start(vec![
        (503, "busy"),
        (429, "slow down"),
        (200, r#"{"fixedCode":"const x = 1;"}"#),
    ])
    .await;

    let fixed = oracle(&stub.url)
        .with_retry(quick_retries(3))
        .fix(&request())
        .await
        .unwrap();
    assert_eq!(fixed, "const x = 1;");
    assert_eq!(stub.seen().len(), 3);
}

#[tokio::test]
async fn test_does_not_retry_client_errors() {
    let stub = StubOracle::start(vec![(400, "bad request")]).await;

    let err = oracle(&stub.url)
        .with_retry(quick_retries(3))
        .fix(&request())
        .await
        .unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(stub.seen().len(), 1);
}

#[tokio::test]
async fn test_unreachable_endpoint_is_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/fix", listener.local_addr().unwrap());
    drop(listener);

    let err = oracle(&url).fix(&request()).await.unwrap_err();
    assert!(
        matches!(err, OracleError::Network(_) | OracleError::Timeout(_)),
        "{:?}",
        err
    );
}

#[tokio::test]
async fn test_session_retries_after_request_timeout() {
    let stub = StubOracle::start_delayed(vec![
        (Duration::from_secs(5), 200, r#"{"fixedCode":"let x = 1;"}"#),
        (Duration::ZERO, 200, r#"{"fixedCode":"let x = 1;"}"#),
    ])
    .await;

    let mut config = Config::default();
    config.oracle.endpoint = Some(stub.url.clone());
    config.oracle.timeout_ms = 300;
    config.oracle.max_retries = 2;
    config.oracle.initial_backoff_ms = 10;
    config.oracle.max_backoff_ms = 20;

    let engine = Arc::new(build_engine(&config).unwrap());
    let oracle = build_oracle(&config).unwrap().expect("endpoint configured");
    let controller = Controller::new(engine, oracle).with_settings(config.loop_settings());

    let result = controller
        .run(
            SourceUnit::new("var x = 1;", Language::JavaScript),
            &CancelToken::new(),
        )
        .await;

    assert!(
        matches!(result.outcome, Outcome::Done { .. }),
        "{:?}",
        result.outcome
    );
    assert_eq!(result.outcome.code(), Some("let x = 1;"));
    assert_eq!(stub.seen().len(), 2);
}
