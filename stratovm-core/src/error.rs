//! Error taxonomy for the orchestration layer.

use thiserror::Error;

pub use stratovm_proxmox::ControlPlaneError;

/// Errors surfaced by the orchestration layer.
///
/// Best-effort sub-steps (remote delete during a local delete, live-stat
/// polling during a query) are never errors: they log a warning and the
/// operation succeeds with degraded data.
#[derive(Error, Debug)]
pub enum Error {
    /// Authentication or remote-operation failure from the control plane.
    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),

    /// Local policy rejection; never reaches the remote plane.
    #[error("VM quota exceeded: owner already holds {count} of {limit} machines")]
    QuotaExceeded { count: usize, limit: usize },

    /// A local record is absent.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The request is malformed or the record is not in a usable state.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The persistence collaborator failed.
    #[error("store error: {0}")]
    Store(String),
}

impl Error {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether this is an authentication failure from the control plane.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            Error::ControlPlane(ControlPlaneError::Authentication(_))
        )
    }
}

/// Result type alias for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;
