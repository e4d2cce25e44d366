//! Control-plane session management.
//!
//! The control plane issues a ticket + anti-forgery token pair on login.
//! [`SessionManager`] owns that pair as process-wide mutable state behind a
//! single-flight critical section: concurrent callers that observe no session
//! trigger exactly one issuance call and all wait for its result.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::Result;
use crate::types::SessionCredentials;

/// Issues fresh session credentials against the control plane.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Perform the credential-issuance call with the configured username and
    /// password, returning a new ticket + anti-forgery token pair.
    async fn issue_credentials(&self) -> Result<SessionCredentials>;
}

/// Owns the current session credential pair.
///
/// The pair is held or absent atomically and is never persisted. Issuance
/// failures propagate to the caller; the manager performs no retries itself.
pub struct SessionManager {
    issuer: Arc<dyn CredentialIssuer>,
    // Held across the issuance await: this is what makes ensure_authenticated
    // single-flight.
    current: Mutex<Option<SessionCredentials>>,
}

impl SessionManager {
    pub fn new(issuer: Arc<dyn CredentialIssuer>) -> Self {
        Self {
            issuer,
            current: Mutex::new(None),
        }
    }

    /// Guarantee a valid credential pair exists and return a copy of it.
    ///
    /// Idempotent: an existing session is returned as-is. When no session
    /// exists, exactly one issuance call is made no matter how many callers
    /// race here.
    pub async fn ensure_authenticated(&self) -> Result<SessionCredentials> {
        let mut slot = self.current.lock().await;

        if let Some(creds) = slot.as_ref() {
            return Ok(creds.clone());
        }

        debug!("no active session, issuing credentials");
        let creds = self.issuer.issue_credentials().await?;
        info!(issued_at = %creds.issued_at, "control plane session established");

        *slot = Some(creds.clone());
        Ok(creds)
    }

    /// Clear the session so the next `ensure_authenticated` re-authenticates.
    pub async fn invalidate(&self) {
        let mut slot = self.current.lock().await;
        if slot.take().is_some() {
            info!("control plane session invalidated");
        }
    }
}
