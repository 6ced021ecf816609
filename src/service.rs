//! Request handling independent of the transport.
//!
//! Every entry point takes a raw JSON body and returns a status code plus a
//! JSON body, so the HTTP server only has to move bytes.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::analysis::{EngineError, Language, SourceUnit};
use crate::converge::{CancelToken, Controller, Failure, Outcome, SessionResult};
use crate::report::{session_response, ErrorResponse, ReportResponse};

/// Why a request body was rejected before analysis.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Invalid JSON body")]
    InvalidJson,
    #[error("Missing or invalid code field")]
    InvalidCode,
    #[error("Missing or invalid language field")]
    InvalidLanguage,
    #[error("Unsupported language")]
    UnsupportedLanguage,
    #[error("Code exceeds maximum length of {max} characters")]
    TooLarge { max: usize },
}

/// A validated `/api/analyze` or `/api/report` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzeRequest {
    pub code: String,
    pub language: Language,
    /// Ask the oracle for fixes. Defaults to true.
    pub fix: bool,
}

impl AnalyzeRequest {
    pub fn from_slice(body: &[u8]) -> Result<Self, RequestError> {
        let value: Value = serde_json::from_slice(body).map_err(|_| RequestError::InvalidJson)?;
        Self::from_json(&value)
    }

    /// Field checks run in a fixed order: code, language, then support.
    pub fn from_json(value: &Value) -> Result<Self, RequestError> {
        let code = value
            .get("code")
            .and_then(Value::as_str)
            .ok_or(RequestError::InvalidCode)?;
        let language = value
            .get("language")
            .and_then(Value::as_str)
            .ok_or(RequestError::InvalidLanguage)?;
        let language =
            Language::from_str(language).map_err(|_| RequestError::UnsupportedLanguage)?;
        let fix = value.get("fix").and_then(Value::as_bool).unwrap_or(true);
        Ok(Self {
            code: code.to_string(),
            language,
            fix,
        })
    }
}

/// Status code and JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceResponse {
    pub status: u16,
    pub body: Value,
}

impl ServiceResponse {
    fn ok(body: impl serde::Serialize) -> Self {
        Self::with_status(200, body)
    }

    fn with_status(status: u16, body: impl serde::Serialize) -> Self {
        let body = serde_json::to_value(body)
            .unwrap_or_else(|e| json!({ "error": "Analysis failed", "details": e.to_string() }));
        Self { status, body }
    }

    fn error(status: u16, error: impl Into<String>) -> Self {
        Self::with_status(status, ErrorResponse::new(error))
    }

    fn rejected(error: &RequestError) -> Self {
        Self::error(400, error.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct Service {
    controller: Arc<Controller>,
    started: Instant,
}

impl Service {
    pub fn new(controller: Controller) -> Self {
        Self {
            controller: Arc::new(controller),
            started: Instant::now(),
        }
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    fn unit(&self, request: AnalyzeRequest) -> Result<SourceUnit, RequestError> {
        let unit = SourceUnit::new(request.code, request.language);
        match self.controller.engine().check_length(&unit) {
            Ok(()) => Ok(unit),
            Err(EngineError::InputTooLarge { max, .. }) => Err(RequestError::TooLarge { max }),
            Err(EngineError::UnsupportedLanguage(_)) => Err(RequestError::UnsupportedLanguage),
            Err(EngineError::Analyzer(_)) => Ok(unit),
        }
    }

    /// `POST /api/analyze`: analyze and, when requested and possible, fix.
    pub async fn analyze(&self, body: &[u8], cancel: &CancelToken) -> ServiceResponse {
        let request = match AnalyzeRequest::from_slice(body) {
            Ok(request) => request,
            Err(e) => return ServiceResponse::rejected(&e),
        };
        let fix = request.fix;
        let unit = match self.unit(request) {
            Ok(unit) => unit,
            Err(e) => return ServiceResponse::rejected(&e),
        };

        let result = self
            .controller
            .run_session(Uuid::new_v4(), unit, fix, cancel)
            .await;
        session_to_response(&result)
    }

    /// `POST /api/report`: analysis only, echoing the submitted code.
    pub async fn report(&self, body: &[u8]) -> ServiceResponse {
        let request = match AnalyzeRequest::from_slice(body) {
            Ok(request) => request,
            Err(e) => return ServiceResponse::rejected(&e),
        };
        let language = request.language;
        let unit = match self.unit(request) {
            Ok(unit) => unit,
            Err(e) => return ServiceResponse::rejected(&e),
        };
        let code = unit.code().to_string();

        let result = self.controller.analyze(unit).await;
        match result.outcome.report() {
            Some(report) => ServiceResponse::ok(ReportResponse {
                language,
                code,
                suggestions: report.suggestions(),
            }),
            None => session_to_response(&result),
        }
    }

    /// `GET /health`: liveness plus process and host facts.
    pub fn health(&self) -> ServiceResponse {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64);
        let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
        ServiceResponse::ok(json!({
            "status": "ok",
            "uptime_secs": self.started.elapsed().as_secs(),
            "timestamp": timestamp,
            "version": env!("CARGO_PKG_VERSION"),
            "system": {
                "cpus": cpus,
                "platform": std::env::consts::OS,
                "arch": std::env::consts::ARCH,
            },
        }))
    }

    pub fn not_found(&self, path: &str) -> ServiceResponse {
        ServiceResponse::error(404, format!("Not found: {}", path))
    }

    pub fn payload_too_large(&self, max: usize) -> ServiceResponse {
        ServiceResponse::error(413, format!("Request body exceeds {} bytes", max))
    }
}

fn session_to_response(result: &SessionResult) -> ServiceResponse {
    if let Some(body) = session_response(result) {
        return ServiceResponse::ok(body);
    }
    match &result.outcome {
        Outcome::Failed {
            failure: Failure::InputTooLarge { max, .. },
            ..
        } => ServiceResponse::rejected(&RequestError::TooLarge { max: *max }),
        Outcome::Failed {
            failure: Failure::UnsupportedLanguage(_),
            ..
        } => ServiceResponse::rejected(&RequestError::UnsupportedLanguage),
        Outcome::Failed {
            failure: Failure::Analyzer(details),
            ..
        } => ServiceResponse::with_status(
            500,
            ErrorResponse::with_details("Analysis failed", details.clone()),
        ),
        Outcome::Cancelled { .. } => ServiceResponse::error(503, "Analysis cancelled"),
        _ => ServiceResponse::error(500, "Analysis failed"),
    }
}
