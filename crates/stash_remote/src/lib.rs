//! # Stash Remote
//!
//! Adapter between the sync engine and the remote account service.
//!
//! This crate provides:
//! - The [`RemoteClient`] contract (fetch a page from a cursor, submit a
//!   mutation)
//! - [`RemoteError`] classification into retryable, conflict and fatal
//! - [`RetryPolicy`] and [`RetryingClient`] for bounded exponential backoff
//! - [`HttpRemote`], a CBOR-over-HTTP client, with [`ReqwestClient`] as the
//!   production transport
//! - [`MockRemote`], an in-memory service for tests

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod client;
mod error;
mod http;
mod mock;
mod reqwest_client;
mod retry;

pub use adapter::RetryingClient;
pub use client::RemoteClient;
pub use error::{FatalKind, RemoteError, RemoteResult};
pub use http::{
    classify_status, HttpClient, HttpError, HttpRemote, HttpResponse, RemoteParams, CHANGES_PATH,
    MUTATIONS_PATH,
};
pub use mock::MockRemote;
pub use reqwest_client::ReqwestClient;
pub use retry::RetryPolicy;
