//! # StratoVM Proxmox Client
//!
//! Typed, authenticated client for a Proxmox-style hypervisor control plane.
//!
//! The control plane issues a short-lived session credential pair on login: a
//! *ticket* (attached to every request as a cookie) and an *anti-forgery token*
//! (required as a header on every mutating request). [`session::SessionManager`]
//! owns that pair and re-issues it transparently; [`client::ProxmoxClient`]
//! wraps the remote API behind the [`traits::ControlPlane`] trait with the
//! cluster node as an explicit parameter on every call.
//!
//! [`mock::MockControlPlane`] provides an in-memory control plane for tests
//! and development without a reachable cluster.

pub mod client;
pub mod error;
pub mod mock;
pub mod session;
pub mod traits;
pub mod transport;
pub mod types;

pub use client::{HttpTransport, ProxmoxClient, ProxmoxEndpoint};
pub use error::{ControlPlaneError, Result};
pub use mock::MockControlPlane;
pub use session::{CredentialIssuer, SessionManager};
pub use traits::ControlPlane;
pub use types::{RawVmStatus, SessionCredentials, SnapshotHandle, VmCreateRequest, VmStats};
