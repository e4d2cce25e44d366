//! Core control-plane abstraction trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{RawVmStatus, SnapshotHandle, VmCreateRequest, VmStats};

/// Typed interface to the hypervisor cluster's management API.
///
/// One method per remote operation, with the target cluster node as an
/// explicit parameter: placement is a call-time decision, not a property of
/// the client instance. Every implementation authenticates transparently
/// before issuing the underlying call.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    // =========================================================================
    // Identity Allocation
    // =========================================================================

    /// Allocate the next free cluster-wide VM identifier.
    async fn allocate_vm_id(&self) -> Result<u32>;

    // =========================================================================
    // VM Lifecycle
    // =========================================================================

    /// Create a VM on the given node (does not start it).
    async fn create_vm(&self, node: &str, request: &VmCreateRequest) -> Result<()>;

    /// Start a VM.
    async fn start_vm(&self, node: &str, vmid: u32) -> Result<()>;

    /// Stop a VM.
    async fn stop_vm(&self, node: &str, vmid: u32) -> Result<()>;

    /// Delete a VM and its remote configuration.
    async fn delete_vm(&self, node: &str, vmid: u32) -> Result<()>;

    // =========================================================================
    // Status & Stats
    // =========================================================================

    /// Query the raw VM status (used/maximum pairs, cumulative counters).
    async fn query_status(&self, node: &str, vmid: u32) -> Result<RawVmStatus>;

    /// Query normalized resource usage (percentages + raw network counters).
    async fn query_stats(&self, node: &str, vmid: u32) -> Result<VmStats>;

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Cap the VM's network interface at the given rate in Mbps.
    async fn set_bandwidth_limit(&self, node: &str, vmid: u32, mbps: u32) -> Result<()>;

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Create a snapshot under the given label.
    ///
    /// The returned handle's location is what a later rollback must reference.
    async fn create_snapshot(&self, node: &str, vmid: u32, label: &str) -> Result<SnapshotHandle>;

    /// Roll the VM back to the snapshot at the given location.
    async fn rollback_snapshot(&self, node: &str, vmid: u32, location: &str) -> Result<()>;
}
