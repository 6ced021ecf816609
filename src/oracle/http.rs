//! Fix oracle reached over HTTP.
//!
//! POSTs `{ code, language, suggestions }` to the configured endpoint and
//! expects `{ fixedCode }` back.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{strip_code_fences, FixOracle, FixRequest, FixResponse, OracleError, RetryPolicy};

/// Longest error body kept in an [`OracleError::Status`].
const MAX_ERROR_BODY: usize = 512;

pub struct HttpFixOracle {
    http: Client,
    endpoint: String,
    timeout: Duration,
    retry: RetryPolicy,
    bearer_token: Option<String>,
}

impl HttpFixOracle {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, OracleError> {
        let http = Client::builder()
            .user_agent(concat!("codemend/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OracleError::Network(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
            timeout,
            retry: RetryPolicy::default(),
            bearer_token: None,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn fix_once(&self, request: &FixRequest) -> Result<String, OracleError> {
        let mut builder = self
            .http
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(request);
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(OracleError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: FixResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                OracleError::Timeout(self.timeout)
            } else {
                OracleError::MalformedResponse(e.to_string())
            }
        })?;

        match body.fixed_code {
            Some(code) if !code.trim().is_empty() => Ok(strip_code_fences(&code)),
            Some(_) => Err(OracleError::MalformedResponse(
                "empty fixedCode".to_string(),
            )),
            None => Err(OracleError::MalformedResponse(
                "missing fixedCode".to_string(),
            )),
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> OracleError {
        if e.is_timeout() {
            OracleError::Timeout(self.timeout)
        } else {
            OracleError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl FixOracle for HttpFixOracle {
    async fn fix(&self, request: &FixRequest) -> Result<String, OracleError> {
        tracing::debug!(
            endpoint = %self.endpoint,
            language = %request.language,
            suggestions = request.suggestions.len(),
            "requesting fix"
        );
        self.retry.run(|| self.fix_once(request)).await
    }
}
