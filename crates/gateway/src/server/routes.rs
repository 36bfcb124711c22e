//! Request routing
//!
//! `POST /get-cert-from-csr` (and anything below it) goes to the CSR
//! orchestrator; every other path gets an informational page chosen by the
//! `Host` header.

use std::time::Instant;

use bytes::Bytes;
use http::header::{HeaderValue, ALLOW, CONTENT_TYPE, HOST};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use certomat_config::ISSUANCE_PATH;

use super::pages;
use crate::issuance::{CsrOrchestrator, IssuanceError, IssuanceRequest};

/// Response header carrying the request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const DEFAULT_BODY_LIMIT: usize = 64 * 1024;

/// Routes requests to the orchestrator or the static pages
#[derive(Debug, Clone)]
pub struct FrontController {
    orchestrator: CsrOrchestrator,
    canonical_host: String,
    body_limit: usize,
}

/// Whether `path` is the issuance endpoint or below it
pub fn is_issuance_path(path: &str) -> bool {
    match path.strip_prefix(ISSUANCE_PATH) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn response(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn error_response(err: &IssuanceError) -> Response<Full<Bytes>> {
    let status = err.status_code();
    if status.is_server_error() {
        error!(status = status.as_u16(), error = %err, "Issuance request failed");
    } else {
        warn!(status = status.as_u16(), error = %err, "Issuance request rejected");
    }

    let mut response = response(status, "text/plain; charset=utf-8", err.to_string());
    if matches!(err, IssuanceError::MethodNotAllowed) {
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("POST"));
    }
    response
}

impl FrontController {
    pub fn new(orchestrator: CsrOrchestrator, canonical_host: impl Into<String>) -> Self {
        Self {
            orchestrator,
            canonical_host: canonical_host.into(),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    /// Largest accepted CSR body in bytes
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn orchestrator(&self) -> &CsrOrchestrator {
        &self.orchestrator
    }

    /// Handle one request; never fails, errors become responses
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let request_id = Uuid::new_v4();
        let span = info_span!(
            "request",
            id = %request_id,
            method = %req.method(),
            path = %req.uri().path(),
        );

        let mut response = self.route(req).instrument(span).await;
        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }

    async fn route<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if is_issuance_path(req.uri().path()) {
            return match self.issue(req).await {
                Ok(response) => response,
                Err(e) => error_response(&e),
            };
        }

        let host = req
            .headers()
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .or_else(|| req.uri().host());
        let page = pages::page_for(host, &self.canonical_host);
        response(StatusCode::OK, "text/html; charset=utf-8", page)
    }

    async fn issue<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>, IssuanceError>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if req.method() != Method::POST {
            return Err(IssuanceError::MethodNotAllowed);
        }

        let started = Instant::now();
        let body = Limited::new(req.into_body(), self.body_limit)
            .collect()
            .await
            .map_err(|e| {
                if e.downcast_ref::<LengthLimitError>().is_some() {
                    IssuanceError::BodyTooLarge {
                        limit: self.body_limit,
                    }
                } else {
                    IssuanceError::BodyRead(e.to_string())
                }
            })?
            .to_bytes();

        let request = IssuanceRequest::from_csr(body);
        let issued = self.orchestrator.issue(request).await?;

        info!(
            host = ?issued.host,
            bytes = issued.pem.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Certificate issued"
        );
        Ok(response(StatusCode::OK, issued.content_type(), issued.pem))
    }
}
