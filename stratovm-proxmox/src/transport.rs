//! Transport abstraction between the typed client and the wire.
//!
//! The client layer decides *what* to call and how to react to an
//! unauthenticated rejection; the transport decides *how* the call reaches a
//! cluster node. Splitting the two keeps the single re-authentication retry
//! testable without a live endpoint.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::types::SessionCredentials;

/// HTTP method of a control-plane call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    /// Mutating calls require the anti-forgery token.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Method::Get)
    }
}

/// A single control-plane API request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path below the API root, e.g. `/nodes/pve1/qemu`.
    pub path: String,
    /// Form parameters (mutations) or query parameters (reads).
    pub params: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Attach a parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }
}

/// Failures at the transport layer.
///
/// `Unauthenticated` is separated out so the client can invalidate the
/// session and retry exactly once; everything else is final for the call.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The control plane rejected the request as unauthenticated.
    #[error("request rejected as unauthenticated")]
    Unauthenticated,

    /// The bounded call timeout elapsed.
    #[error("request timed out")]
    Timeout,

    /// Any other transport or protocol failure.
    #[error("{0}")]
    Failed(String),
}

/// Executes control-plane API requests against one cluster endpoint.
#[async_trait]
pub trait ControlPlaneTransport: Send + Sync {
    /// Execute a request, attaching session credentials when provided, and
    /// return the decoded `data` payload of the response envelope.
    async fn execute(
        &self,
        request: &ApiRequest,
        session: Option<&SessionCredentials>,
    ) -> std::result::Result<Value, TransportError>;
}
