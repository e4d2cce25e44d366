//! Error types for the control-plane client.

use thiserror::Error;

/// Errors surfaced by the control-plane client.
///
/// Raw transport errors never cross this boundary: every failure is tagged
/// with the remote operation that produced it.
#[derive(Error, Debug)]
pub enum ControlPlaneError {
    /// Credential issuance failed or was rejected.
    #[error("control plane authentication failed: {0}")]
    Authentication(String),

    /// A specific remote call failed.
    #[error("remote operation '{op}' failed{}: {reason}", fmt_vmid(.vmid))]
    Operation {
        /// Name of the remote operation (e.g. "create", "start").
        op: &'static str,
        /// Remote VM identifier, when the operation targets one.
        vmid: Option<u32>,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The client could not be constructed from the given configuration.
    #[error("invalid control plane configuration: {0}")]
    Configuration(String),
}

fn fmt_vmid(vmid: &Option<u32>) -> String {
    match vmid {
        Some(id) => format!(" for vmid {}", id),
        None => String::new(),
    }
}

impl ControlPlaneError {
    /// Build an operation error from a failure reason.
    pub fn operation(op: &'static str, vmid: Option<u32>, reason: impl Into<String>) -> Self {
        Self::Operation {
            op,
            vmid,
            reason: reason.into(),
        }
    }
}

/// Result type alias for control-plane operations.
pub type Result<T> = std::result::Result<T, ControlPlaneError>;
