//! Blocking `reqwest` implementation of [`HttpClient`].

use crate::http::{HttpClient, HttpError, HttpResponse};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::time::Duration;

const CBOR: &str = "application/cbor";

/// Production HTTP client.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Creates a client with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("stash/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

fn transport_error(err: reqwest::Error) -> HttpError {
    if err.is_timeout() {
        HttpError::Timeout
    } else if err.is_connect() {
        HttpError::Connect(err.to_string())
    } else {
        HttpError::Transport(err.to_string())
    }
}

impl HttpClient for ReqwestClient {
    fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, HttpError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, CBOR)
            .header(ACCEPT, CBOR)
            .body(body)
            .send()
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        let body = response.bytes().map_err(transport_error)?.to_vec();
        Ok(HttpResponse::new(status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_host_is_a_transport_error() {
        let client = ReqwestClient::new(Duration::from_millis(500)).unwrap();
        // Port 9 (discard) on loopback is closed in test environments.
        let result = client.post("http://127.0.0.1:9/sync/changes", Vec::new());
        assert!(result.is_err());
    }
}
