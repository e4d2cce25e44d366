//! VM lifecycle orchestration.
//!
//! Drives the state machine for each machine's life: quota and plan checks,
//! remote identifier allocation, remote provisioning, local record
//! synchronization, control actions and failure recovery. The local record is
//! always the durable source of truth: a remote failure after the record
//! exists leaves it in an inspectable non-running state instead of deleting
//! it, and divergence from the remote plane is resolved by re-query.

use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::{
    Pagination, PlanStore, VmFilter, VmRecord, VmStatus, VmStore, VmUpdate,
};
use stratovm_proxmox::{ControlPlane, VmCreateRequest, VmStats};

/// Control action on an existing machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
}

impl FromStr for ControlAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            other => Err(Error::InvalidRequest(format!(
                "action must be start, stop or restart, got '{}'",
                other
            ))),
        }
    }
}

/// Creation request.
#[derive(Debug, Clone)]
pub struct CreateVmRequest {
    pub name: String,
    pub plan_id: String,
    pub owner_id: Uuid,
}

/// Query result: the persisted record, optionally enriched with live stats.
///
/// An explicit sum type rather than a record with stats spread onto it; the
/// caller always knows whether the stats half is present.
#[derive(Debug, Clone)]
pub enum VmQuery {
    /// Only the persisted record (machine not running, no remote identity,
    /// or live polling degraded).
    Persisted(VmRecord),
    /// Persisted record plus a live stats sample polled just now.
    WithLiveStats { record: VmRecord, stats: VmStats },
}

impl VmQuery {
    /// The persisted record, regardless of enrichment.
    pub fn record(&self) -> &VmRecord {
        match self {
            VmQuery::Persisted(record) => record,
            VmQuery::WithLiveStats { record, .. } => record,
        }
    }

    /// Live stats, when present.
    pub fn live_stats(&self) -> Option<&VmStats> {
        match self {
            VmQuery::Persisted(_) => None,
            VmQuery::WithLiveStats { stats, .. } => Some(stats),
        }
    }
}

/// Orchestrates the lifecycle of virtual machines.
pub struct VmOrchestrator {
    control: Arc<dyn ControlPlane>,
    vms: Arc<dyn VmStore>,
    plans: Arc<dyn PlanStore>,
    default_node: String,
    vm_quota: usize,
    // One mutex per VM id: state transitions on the same machine are
    // serialized, operations on different machines proceed independently.
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl VmOrchestrator {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        vms: Arc<dyn VmStore>,
        plans: Arc<dyn PlanStore>,
        default_node: impl Into<String>,
        vm_quota: usize,
    ) -> Self {
        Self {
            control,
            vms,
            plans,
            default_node: default_node.into(),
            vm_quota,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, id: Uuid) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| Error::Store("lock registry poisoned".to_string()))?;
        Ok(locks
            .entry(id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }

    fn release_lock(&self, id: Uuid) {
        if let Ok(mut locks) = self.locks.lock() {
            locks.remove(&id);
        }
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Provision a new machine: validate, allocate a remote identifier,
    /// persist the record, create and start remotely.
    ///
    /// Quota and plan checks run before any remote call. Once the record
    /// exists, a remote failure marks it `FAILED` and surfaces the error; the
    /// record is never deleted on a failed create.
    #[instrument(skip(self, request), fields(name = %request.name, plan = %request.plan_id))]
    pub async fn create(&self, request: CreateVmRequest) -> Result<VmRecord> {
        validate_name(&request.name)?;

        let plan = self
            .plans
            .get(&request.plan_id)
            .await?
            .ok_or_else(|| Error::not_found("plan", &request.plan_id))?;

        let count = self.vms.count_for_owner(request.owner_id).await?;
        if count >= self.vm_quota {
            return Err(Error::QuotaExceeded {
                count,
                limit: self.vm_quota,
            });
        }

        let remote_id = self.control.allocate_vm_id().await?;
        let record = VmRecord {
            id: Uuid::new_v4(),
            remote_id: Some(remote_id),
            name: request.name.clone(),
            owner_id: request.owner_id,
            plan_id: plan.id.clone(),
            node: self.default_node.clone(),
            status: VmStatus::Pending,
            specs: plan.specs(),
            created_at: Utc::now(),
        };
        self.vms.insert(record.clone()).await?;
        info!(vm_id = %record.id, remote_id, "VM record created");

        let lock = self.lock_for(record.id)?;
        let _guard = lock.lock().await;

        self.vms
            .update(record.id, VmUpdate::status(VmStatus::Provisioning))
            .await?;

        let create_request = VmCreateRequest {
            vmid: remote_id,
            name: record.name.clone(),
            cores: record.specs.cpu_cores,
            // The remote plane takes memory in MiB.
            memory_mib: record.specs.ram_gib * 1024,
            storage_gib: record.specs.storage_gib,
        };

        if let Err(e) = self.control.create_vm(&record.node, &create_request).await {
            self.mark_failed(record.id).await;
            return Err(e.into());
        }

        if let Err(e) = self
            .control
            .set_bandwidth_limit(&record.node, remote_id, record.specs.bandwidth_mbps)
            .await
        {
            self.mark_failed(record.id).await;
            return Err(e.into());
        }

        if let Err(e) = self.control.start_vm(&record.node, remote_id).await {
            self.mark_failed(record.id).await;
            return Err(e.into());
        }

        let record = self
            .vms
            .update(record.id, VmUpdate::status(VmStatus::Running))
            .await?;
        info!(vm_id = %record.id, "VM provisioned and running");
        Ok(record)
    }

    async fn mark_failed(&self, id: Uuid) {
        // Best effort: the error being reported is the remote failure, not
        // a failure to persist the status.
        if let Err(e) = self.vms.update(id, VmUpdate::status(VmStatus::Failed)).await {
            warn!(vm_id = %id, error = %e, "failed to persist FAILED status");
        }
    }

    // =========================================================================
    // Control
    // =========================================================================

    /// Apply a control action. Requires the record to hold a remote identifier.
    ///
    /// Restart commits only the final state: when the stop succeeds but the
    /// start fails, the record reflects `STOPPED` and the failure surfaces.
    #[instrument(skip(self))]
    pub async fn control(&self, vm_id: Uuid, action: ControlAction) -> Result<VmRecord> {
        let lock = self.lock_for(vm_id)?;
        let _guard = lock.lock().await;

        let record = self
            .vms
            .get(vm_id)
            .await?
            .ok_or_else(|| Error::not_found("VM", vm_id))?;
        let remote_id = record
            .remote_id
            .ok_or_else(|| Error::InvalidRequest("VM has no remote identifier".to_string()))?;

        match action {
            ControlAction::Start => {
                self.control.start_vm(&record.node, remote_id).await?;
                self.vms.update(vm_id, VmUpdate::status(VmStatus::Running)).await
            }
            ControlAction::Stop => {
                self.control.stop_vm(&record.node, remote_id).await?;
                self.vms.update(vm_id, VmUpdate::status(VmStatus::Stopped)).await
            }
            ControlAction::Restart => {
                self.control.stop_vm(&record.node, remote_id).await?;
                if let Err(e) = self.control.start_vm(&record.node, remote_id).await {
                    // The machine is down; the record must not claim otherwise.
                    self.vms.update(vm_id, VmUpdate::status(VmStatus::Stopped)).await?;
                    return Err(e.into());
                }
                self.vms.update(vm_id, VmUpdate::status(VmStatus::Running)).await
            }
        }
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete a machine: best-effort remote delete, unconditional local
    /// removal.
    ///
    /// A record must never stay orphaned because the remote side is
    /// unreachable; the remote failure is logged, not surfaced.
    #[instrument(skip(self))]
    pub async fn delete(&self, vm_id: Uuid) -> Result<()> {
        let lock = self.lock_for(vm_id)?;
        {
            let _guard = lock.lock().await;

            let record = self
                .vms
                .get(vm_id)
                .await?
                .ok_or_else(|| Error::not_found("VM", vm_id))?;

            if let Some(remote_id) = record.remote_id {
                if let Err(e) = self.control.delete_vm(&record.node, remote_id).await {
                    warn!(vm_id = %vm_id, remote_id, error = %e, "remote delete failed, removing local record anyway");
                }
            }

            self.vms.remove(vm_id).await?;
            info!(vm_id = %vm_id, "VM record removed");
        }
        self.release_lock(vm_id);
        Ok(())
    }

    // =========================================================================
    // Query
    // =========================================================================

    /// Return the persisted record, enriched with a live stats poll when the
    /// machine is running. A failed poll degrades to the record alone.
    pub async fn query(&self, vm_id: Uuid) -> Result<VmQuery> {
        let record = self
            .vms
            .get(vm_id)
            .await?
            .ok_or_else(|| Error::not_found("VM", vm_id))?;

        Ok(self.enrich(record).await)
    }

    /// One owner's machines, newest first, each enriched like [`query`].
    ///
    /// [`query`]: VmOrchestrator::query
    pub async fn list(
        &self,
        owner_id: Uuid,
        filter: &VmFilter,
        page: &Pagination,
    ) -> Result<(Vec<VmQuery>, usize)> {
        let (records, total) = self.vms.list_for_owner(owner_id, filter, page).await?;

        let enriched = join_all(records.into_iter().map(|r| self.enrich(r))).await;
        Ok((enriched, total))
    }

    async fn enrich(&self, record: VmRecord) -> VmQuery {
        let remote_id = match (record.status, record.remote_id) {
            (VmStatus::Running, Some(remote_id)) => remote_id,
            _ => return VmQuery::Persisted(record),
        };

        match self.control.query_stats(&record.node, remote_id).await {
            Ok(stats) => VmQuery::WithLiveStats { record, stats },
            Err(e) => {
                warn!(vm_id = %record.id, error = %e, "live stats poll failed, returning record alone");
                VmQuery::Persisted(record)
            }
        }
    }

    // =========================================================================
    // Rename
    // =========================================================================

    /// Rename the local record. Purely local; the remote plane keeps the
    /// name it was created with until the next re-provision.
    pub async fn rename(&self, vm_id: Uuid, name: &str) -> Result<VmRecord> {
        validate_name(name)?;

        let lock = self.lock_for(vm_id)?;
        let _guard = lock.lock().await;

        if self.vms.get(vm_id).await?.is_none() {
            return Err(Error::not_found("VM", vm_id));
        }
        self.vms.update(vm_id, VmUpdate::name(name)).await
    }
}

/// Names are 3-50 characters, alphanumeric plus hyphens.
fn validate_name(name: &str) -> Result<()> {
    if name.len() < 3 || name.len() > 50 {
        return Err(Error::InvalidRequest(
            "name must be between 3 and 50 characters".to_string(),
        ));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(Error::InvalidRequest(
            "name may only contain alphanumeric characters and hyphens".to_string(),
        ));
    }
    Ok(())
}
