//! HTTP implementation of the remote client.
//!
//! Request and response bodies are CBOR. The HTTP library itself sits
//! behind [`HttpClient`] so the status classification can be tested without
//! a network.

use crate::client::RemoteClient;
use crate::error::{FatalKind, RemoteError, RemoteResult};
use stash_protocol::{
    ConflictBody, FetchPage, FetchRequest, MutationAccepted, MutationRequest, SyncCursor, Version,
};
use thiserror::Error;

/// Path of the change feed endpoint.
pub const CHANGES_PATH: &str = "/sync/changes";

/// Path of the mutation endpoint.
pub const MUTATIONS_PATH: &str = "/sync/mutations";

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }
}

/// A request that never produced a response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HttpError {
    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),
    /// No response within the timeout.
    #[error("request timed out")]
    Timeout,
    /// Any other transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// HTTP client abstraction.
///
/// Implement this trait to plug in an HTTP library.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request with a CBOR body.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, HttpError>;
}

/// Connection parameters for the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteParams {
    /// Base URL of the service (e.g. `http://localhost:8080`).
    pub host: String,
    /// Log request and response details.
    pub debug: bool,
}

impl RemoteParams {
    /// Creates parameters for `host` with debug logging off.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            debug: false,
        }
    }

    /// Enables or disables debug logging.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// A remote client speaking CBOR over HTTP.
#[derive(Debug)]
pub struct HttpRemote<C: HttpClient> {
    params: RemoteParams,
    client: C,
}

impl<C: HttpClient> HttpRemote<C> {
    /// Creates a remote client.
    pub fn new(params: RemoteParams, client: C) -> Self {
        Self { params, client }
    }

    /// Returns the connection parameters.
    pub fn params(&self) -> &RemoteParams {
        &self.params
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.params.host.trim_end_matches('/'), path)
    }

    fn post(&self, path: &str, body: Vec<u8>) -> RemoteResult<HttpResponse> {
        let url = self.url(path);
        let sent = body.len();

        let response = self
            .client
            .post(&url, body)
            .map_err(|e| match e {
                HttpError::Connect(_) => RemoteError::unreachable(e.to_string()),
                HttpError::Timeout | HttpError::Transport(_) => RemoteError::retryable(e.to_string()),
            })?;

        if self.params.debug {
            tracing::debug!(
                url = %url,
                sent,
                status = response.status,
                received = response.body.len(),
                "remote call"
            );
        }
        Ok(response)
    }
}

/// Maps a non-success status to an error.
///
/// `409` is not handled here because only the mutation endpoint gives it
/// meaning.
pub fn classify_status(status: u16, body: &[u8]) -> RemoteError {
    let detail = String::from_utf8_lossy(body);
    let message = if detail.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {detail}")
    };

    match status {
        408 | 425 | 429 | 500..=599 => RemoteError::retryable(message),
        401 | 403 => RemoteError::fatal(FatalKind::Auth, message),
        404 => RemoteError::fatal(FatalKind::NotFound, message),
        _ => RemoteError::malformed(message),
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

impl<C: HttpClient> RemoteClient for HttpRemote<C> {
    fn fetch_from_cursor(&self, cursor: SyncCursor, limit: u32) -> RemoteResult<FetchPage> {
        let body = FetchRequest::new(cursor, limit)
            .encode()
            .map_err(|e| RemoteError::malformed(format!("failed to encode request: {e}")))?;

        let response = self.post(CHANGES_PATH, body)?;
        if !is_success(response.status) {
            return Err(classify_status(response.status, &response.body));
        }

        FetchPage::decode(&response.body)
            .map_err(|e| RemoteError::malformed(format!("failed to decode page: {e}")))
    }

    fn submit_mutation(&self, request: &MutationRequest) -> RemoteResult<Version> {
        let body = request
            .encode()
            .map_err(|e| RemoteError::malformed(format!("failed to encode request: {e}")))?;

        let response = self.post(MUTATIONS_PATH, body)?;

        if response.status == 409 {
            let conflict = ConflictBody::decode(&response.body)
                .map_err(|e| RemoteError::malformed(format!("failed to decode conflict: {e}")))?;
            return Err(RemoteError::Conflict {
                entity_id: request.entity_id,
                current_version: conflict.current_version,
            });
        }
        if !is_success(response.status) {
            return Err(classify_status(response.status, &response.body));
        }

        MutationAccepted::decode(&response.body)
            .map(|accepted| accepted.version)
            .map_err(|e| RemoteError::malformed(format!("failed to decode acceptance: {e}")))
    }
}
