//! Fix oracle boundary.
//!
//! The oracle is an external service that, given code and the suggestions
//! produced for it, returns replacement code. It is treated as opaque: any
//! transport failure or unexpected body is an [`OracleError`].

mod http;
mod retry;

pub use http::HttpFixOracle;
pub use retry::RetryPolicy;

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::Language;

/// Errors that can occur while asking the oracle for a fix.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("fix oracle timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("fix oracle returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed fix oracle response: {0}")]
    MalformedResponse(String),
    #[error("no fix oracle configured")]
    NotConfigured,
}

impl OracleError {
    /// Whether a fresh attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            OracleError::Timeout(_) | OracleError::Network(_) => true,
            OracleError::Status { status, .. } => *status == 429 || *status >= 500,
            OracleError::MalformedResponse(_) | OracleError::NotConfigured => false,
        }
    }
}

/// Body sent to the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixRequest {
    pub code: String,
    pub language: Language,
    /// Marker-prefixed suggestion strings for the current code.
    pub suggestions: Vec<String>,
}

/// Body expected back from the oracle.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixResponse {
    pub fixed_code: Option<String>,
}

/// Something that can propose replacement code.
#[async_trait]
pub trait FixOracle: Send + Sync {
    async fn fix(&self, request: &FixRequest) -> Result<String, OracleError>;
}

/// A single fenced block spanning the whole answer, with an optional info string.
static CODE_FENCE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z0-9_+.-]*[ \t]*\r?\n(.*?)\r?\n?```\s*$").ok()
});

/// Remove a markdown code fence wrapping the whole answer, if any.
pub fn strip_code_fences(text: &str) -> String {
    let captured = CODE_FENCE
        .as_ref()
        .and_then(|fence| fence.captures(text))
        .and_then(|c| c.get(1));
    match captured {
        Some(body) => body.as_str().to_string(),
        None => text.to_string(),
    }
}
