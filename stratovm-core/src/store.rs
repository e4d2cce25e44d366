//! Durable domain records and persistence trait boundaries.
//!
//! The orchestration layer owns all writes to VM records; metrics and billing
//! collaborators only read them. Persistence technology is a collaborator
//! choice hidden behind these traits; [`crate::memory`] provides in-memory
//! implementations for tests and development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

// =============================================================================
// VM RECORDS
// =============================================================================

/// Lifecycle state of a provisioned machine.
///
/// `PENDING → PROVISIONING → RUNNING ⇄ STOPPED → TERMINATED`, with `FAILED`
/// reachable from `PENDING`/`PROVISIONING` and `SUSPENDED` from `RUNNING`.
/// `TERMINATED` is terminal; `FAILED` is terminal unless a later control
/// action explicitly retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VmStatus {
    Pending,
    Provisioning,
    Running,
    Stopped,
    Suspended,
    Failed,
    Terminated,
}

/// Resource allocation of a machine, copied from its plan at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSpecs {
    pub cpu_cores: u32,
    pub ram_gib: u64,
    pub storage_gib: u64,
    pub bandwidth_mbps: u32,
}

/// Durable record of a provisioned machine.
///
/// This is the system's authoritative local view, distinct from the remote
/// plane's own state; divergence is resolved by re-query, not transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmRecord {
    /// Local identity.
    pub id: Uuid,
    /// Hypervisor-assigned identity; assigned exactly once, immutable after.
    pub remote_id: Option<u32>,
    pub name: String,
    pub owner_id: Uuid,
    pub plan_id: String,
    /// Placement target on the cluster.
    pub node: String,
    pub status: VmStatus,
    pub specs: VmSpecs,
    pub created_at: DateTime<Utc>,
}

/// Partial update to a VM record.
///
/// Deliberately has no `remote_id` field: the remote identity is assigned at
/// record creation and can never be rewritten through the store.
#[derive(Debug, Clone, Default)]
pub struct VmUpdate {
    pub name: Option<String>,
    pub status: Option<VmStatus>,
}

impl VmUpdate {
    pub fn status(status: VmStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// Listing filter.
#[derive(Debug, Clone, Default)]
pub struct VmFilter {
    pub status: Option<VmStatus>,
}

/// Page selector, 1-based.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 10,
        }
    }
}

// =============================================================================
// PLANS
// =============================================================================

/// Resource plan, owned by an external collaborator and read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub cpu_cores: u32,
    pub ram_gib: u64,
    pub storage_gib: u64,
    pub bandwidth_mbps: u32,
}

impl Plan {
    /// Specs a machine on this plan is provisioned with.
    pub fn specs(&self) -> VmSpecs {
        VmSpecs {
            cpu_cores: self.cpu_cores,
            ram_gib: self.ram_gib,
            storage_gib: self.storage_gib,
            bandwidth_mbps: self.bandwidth_mbps,
        }
    }
}

// =============================================================================
// METRICS
// =============================================================================

/// One immutable usage sample. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub vm_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub cpu_usage_pct: f64,
    pub ram_usage_pct: f64,
    pub storage_usage_pct: f64,
    pub network_in_bytes: u64,
    pub network_out_bytes: u64,
}

// =============================================================================
// BACKUPS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupStatus {
    Pending,
    Completed,
    Failed,
}

/// Durable record of a snapshot-backed backup.
///
/// `size_bytes` stays 0 until an external collector reports it; `COMPLETED`
/// means the snapshot exists remotely, not that the size is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: Uuid,
    pub vm_id: Uuid,
    pub label: String,
    pub status: BackupStatus,
    pub size_bytes: u64,
    /// Remote snapshot location; what a restore must reference.
    pub remote_location: String,
    pub created_at: DateTime<Utc>,
}

/// Partial update to a backup record.
#[derive(Debug, Clone, Default)]
pub struct BackupUpdate {
    pub status: Option<BackupStatus>,
    pub size_bytes: Option<u64>,
    pub remote_location: Option<String>,
}

// =============================================================================
// STORE TRAITS
// =============================================================================

/// Persistence boundary for VM records.
#[async_trait]
pub trait VmStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<VmRecord>>;

    /// Records for one owner, newest first, with the total count before
    /// pagination.
    async fn list_for_owner(
        &self,
        owner_id: Uuid,
        filter: &VmFilter,
        page: &Pagination,
    ) -> Result<(Vec<VmRecord>, usize)>;

    async fn insert(&self, record: VmRecord) -> Result<()>;

    /// Apply a partial update and return the updated record.
    async fn update(&self, id: Uuid, update: VmUpdate) -> Result<VmRecord>;

    async fn remove(&self, id: Uuid) -> Result<()>;

    async fn count_for_owner(&self, owner_id: Uuid) -> Result<usize>;
}

/// Read-only boundary to the plan collaborator.
#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Plan>>;
}

/// Persistence boundary for the metric time series.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    async fn append(&self, sample: MetricSample) -> Result<()>;

    /// Most recent samples for a VM, newest first, bounded by `limit`.
    async fn query_recent(&self, vm_id: Uuid, limit: usize) -> Result<Vec<MetricSample>>;
}

/// Persistence boundary for backup records.
#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn insert(&self, record: BackupRecord) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<BackupRecord>>;

    /// Apply a partial update and return the updated record.
    async fn update(&self, id: Uuid, update: BackupUpdate) -> Result<BackupRecord>;

    async fn list_for_vm(&self, vm_id: Uuid) -> Result<Vec<BackupRecord>>;
}
