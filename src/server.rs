//! HTTP/1 front end for [`Service`].
//!
//! Routes:
//! - `POST /api/analyze`
//! - `POST /api/report`
//! - `GET /api/events` (server-sent progress events for every session)
//! - `GET /health`

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::{future, StreamExt};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited, StreamBody};
use hyper::body::{Body, Frame, Incoming};
use hyper::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

use crate::converge::CancelToken;
use crate::progress::ProgressEvent;
use crate::service::{Service, ServiceResponse};

pub type ResponseBody = UnsyncBoxBody<Bytes, Infallible>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid bind address `{0}`")]
    InvalidAddress(String),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cancels the session when the request future is dropped.
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

pub struct Server {
    service: Service,
    events: broadcast::Sender<ProgressEvent>,
    max_body_bytes: usize,
}

impl Server {
    /// `events` must be the sender the service's controller reports to.
    pub fn new(
        service: Service,
        events: broadcast::Sender<ProgressEvent>,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            service,
            events,
            max_body_bytes,
        }
    }

    pub async fn bind(host: &str, port: u16) -> Result<TcpListener, ServerError> {
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .map_err(|_| ServerError::InvalidAddress(format!("{}:{}", host, port)))?;
        TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: std::future::Future<Output = ()>,
    {
        let server = Arc::new(self);
        info!("codemend listening on http://{}", listener.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            let (stream, remote_addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!("shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let io = TokioIo::new(stream);
            let server = Arc::clone(&server);

            tokio::task::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let server = Arc::clone(&server);
                    async move { Ok::<_, Infallible>(server.handle(req).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Error serving connection from {}: {}", remote_addr, err);
                }
            });
        }
    }

    /// Route one request.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<ResponseBody>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        debug!(%method, %path, "request");

        let response = match (&method, path.as_str()) {
            (&Method::GET, "/health") => self.service.health(),
            (&Method::GET, "/api/events") => return self.event_stream(),
            (&Method::POST, "/api/analyze") => match self.read_body(req).await {
                Ok(body) => self.analyze(body).await,
                Err(response) => response,
            },
            (&Method::POST, "/api/report") => match self.read_body(req).await {
                Ok(body) => self.service.report(&body).await,
                Err(response) => response,
            },
            _ => self.service.not_found(&path),
        };

        if !response.is_success() {
            debug!(%method, %path, status = response.status, "request rejected");
        }
        json_response(response)
    }

    async fn read_body<B>(&self, req: Request<B>) -> Result<Bytes, ServiceResponse>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        match Limited::new(req.into_body(), self.max_body_bytes)
            .collect()
            .await
        {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                Err(self.service.payload_too_large(self.max_body_bytes))
            }
            Err(e) => {
                warn!("failed to read request body: {}", e);
                Err(ServiceResponse {
                    status: 400,
                    body: serde_json::json!({ "error": "Invalid JSON body" }),
                })
            }
        }
    }

    /// Run the session on its own task so a client disconnect only cancels it.
    async fn analyze(&self, body: Bytes) -> ServiceResponse {
        let guard = CancelOnDrop(CancelToken::new());
        let cancel = guard.0.clone();
        let service = self.service.clone();

        let handle = tokio::spawn(async move { service.analyze(&body, &cancel).await });
        let result = handle.await;
        drop(guard);

        match result {
            Ok(response) => response,
            Err(e) => {
                error!("analysis task failed: {}", e);
                ServiceResponse {
                    status: 500,
                    body: serde_json::json!({
                        "error": "Analysis failed",
                        "details": e.to_string(),
                    }),
                }
            }
        }
    }

    fn event_stream(&self) -> Response<ResponseBody> {
        let events = BroadcastStream::new(self.events.subscribe()).filter_map(|item| {
            future::ready(match item {
                Ok(event) => sse_frame(&event).map(|frame| Ok::<_, Infallible>(Frame::data(frame))),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "event stream subscriber lagged");
                    None
                }
            })
        });

        let mut response = Response::new(StreamBody::new(events).boxed_unsync());
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        response
    }
}

/// One server-sent event: `event: <name>` then `data: <json>`.
pub fn sse_frame(event: &ProgressEvent) -> Option<Bytes> {
    let data = serde_json::to_string(event).ok()?;
    Some(Bytes::from(format!("event: {}\ndata: {}\n\n", event.name(), data)))
}

fn json_response(response: ServiceResponse) -> Response<ResponseBody> {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = Bytes::from(response.body.to_string());
    let mut out = Response::new(Full::new(body).boxed_unsync());
    *out.status_mut() = status;
    out.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    out
}
