//! Mock control plane for testing and development.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

use crate::error::{ControlPlaneError, Result};
use crate::traits::ControlPlane;
use crate::types::{RawVmStatus, SnapshotHandle, VmCreateRequest, VmStats};

/// In-memory control plane.
///
/// Simulates the remote cluster without any network I/O. Useful for:
/// - Unit and integration testing of the orchestration layer
/// - Development without a reachable hypervisor cluster
///
/// Records every remote operation and supports per-operation failure
/// injection so tests can exercise partial-failure paths.
pub struct MockControlPlane {
    vms: RwLock<HashMap<u32, MockVm>>,
    next_id: AtomicU32,
    operations: RwLock<Vec<String>>,
    failing_ops: RwLock<HashSet<&'static str>>,
}

struct MockVm {
    name: String,
    memory_mib: u64,
    storage_gib: u64,
    running: bool,
    bandwidth_mbps: Option<u32>,
    snapshots: Vec<SnapshotHandle>,
}

impl MockControlPlane {
    pub fn new() -> Self {
        info!("creating mock control plane");
        Self {
            vms: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(100),
            operations: RwLock::new(Vec::new()),
            failing_ops: RwLock::new(HashSet::new()),
        }
    }

    // Inspection and injection helpers recover the inner value from a
    // poisoned lock instead of panicking; the trait methods surface poisoning
    // as backend errors.

    /// Make every subsequent call of the named operation fail until cleared.
    pub fn fail_operation(&self, op: &'static str) {
        self.failing_ops
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(op);
    }

    /// Stop failing the named operation.
    pub fn clear_failure(&self, op: &'static str) {
        self.failing_ops
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(op);
    }

    /// All remote operations issued so far, in order.
    pub fn recorded_operations(&self) -> Vec<String> {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a VM exists remotely.
    pub fn has_vm(&self, vmid: u32) -> bool {
        self.vms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&vmid)
    }

    /// Whether a VM is currently running remotely.
    pub fn is_running(&self, vmid: u32) -> bool {
        self.vms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&vmid)
            .map(|vm| vm.running)
            .unwrap_or(false)
    }

    /// Remote name of a VM.
    pub fn vm_name(&self, vmid: u32) -> Option<String> {
        self.vms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&vmid)
            .map(|vm| vm.name.clone())
    }

    /// Bandwidth cap applied to a VM, if any.
    pub fn bandwidth_limit(&self, vmid: u32) -> Option<u32> {
        self.vms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&vmid)
            .and_then(|vm| vm.bandwidth_mbps)
    }

    fn record(&self, op: &'static str, vmid: Option<u32>) -> Result<()> {
        let entry = match vmid {
            Some(id) => format!("{}:{}", op, id),
            None => op.to_string(),
        };
        debug!(operation = %entry, "mock control plane call");
        self.operations
            .write()
            .map_err(|_| ControlPlaneError::operation(op, vmid, "lock poisoned"))?
            .push(entry);

        let failing = self
            .failing_ops
            .read()
            .map_err(|_| ControlPlaneError::operation(op, vmid, "lock poisoned"))?;
        if failing.contains(op) {
            return Err(ControlPlaneError::operation(op, vmid, "injected failure"));
        }
        Ok(())
    }

    fn with_vm<T>(
        &self,
        op: &'static str,
        vmid: u32,
        f: impl FnOnce(&mut MockVm) -> T,
    ) -> Result<T> {
        let mut vms = self
            .vms
            .write()
            .map_err(|_| ControlPlaneError::operation(op, Some(vmid), "lock poisoned"))?;
        let vm = vms
            .get_mut(&vmid)
            .ok_or_else(|| ControlPlaneError::operation(op, Some(vmid), "no such VM"))?;
        Ok(f(vm))
    }
}

impl Default for MockControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    async fn allocate_vm_id(&self) -> Result<u32> {
        self.record("allocate-id", None)?;
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn create_vm(&self, _node: &str, request: &VmCreateRequest) -> Result<()> {
        self.record("create", Some(request.vmid))?;

        let mut vms = self.vms.write().map_err(|_| {
            ControlPlaneError::operation("create", Some(request.vmid), "lock poisoned")
        })?;
        if vms.contains_key(&request.vmid) {
            return Err(ControlPlaneError::operation(
                "create",
                Some(request.vmid),
                "VM already exists",
            ));
        }

        vms.insert(
            request.vmid,
            MockVm {
                name: request.name.clone(),
                memory_mib: request.memory_mib,
                storage_gib: request.storage_gib,
                running: false,
                bandwidth_mbps: None,
                snapshots: Vec::new(),
            },
        );
        Ok(())
    }

    async fn start_vm(&self, _node: &str, vmid: u32) -> Result<()> {
        self.record("start", Some(vmid))?;
        self.with_vm("start", vmid, |vm| vm.running = true)
    }

    async fn stop_vm(&self, _node: &str, vmid: u32) -> Result<()> {
        self.record("stop", Some(vmid))?;
        self.with_vm("stop", vmid, |vm| vm.running = false)
    }

    async fn delete_vm(&self, _node: &str, vmid: u32) -> Result<()> {
        self.record("delete", Some(vmid))?;
        let mut vms = self
            .vms
            .write()
            .map_err(|_| ControlPlaneError::operation("delete", Some(vmid), "lock poisoned"))?;
        vms.remove(&vmid)
            .map(|_| ())
            .ok_or_else(|| ControlPlaneError::operation("delete", Some(vmid), "no such VM"))
    }

    async fn query_status(&self, _node: &str, vmid: u32) -> Result<RawVmStatus> {
        self.record("query-status", Some(vmid))?;
        self.with_vm("query-status", vmid, |vm| {
            let maxmem = vm.memory_mib * 1024 * 1024;
            RawVmStatus {
                cpu: if vm.running { 0.25 } else { 0.0 },
                mem: if vm.running { maxmem / 2 } else { 0 },
                maxmem,
                disk: vm.storage_gib * 1024 * 1024 * 512,
                maxdisk: vm.storage_gib * 1024 * 1024 * 1024,
                netin: 1024 * 1024,
                netout: 512 * 1024,
            }
        })
    }

    async fn query_stats(&self, node: &str, vmid: u32) -> Result<VmStats> {
        let raw = self.query_status(node, vmid).await?;
        Ok(VmStats::from_raw(&raw))
    }

    async fn set_bandwidth_limit(&self, _node: &str, vmid: u32, mbps: u32) -> Result<()> {
        self.record("set-bandwidth", Some(vmid))?;
        self.with_vm("set-bandwidth", vmid, |vm| {
            vm.bandwidth_mbps = Some(mbps);
        })
    }

    async fn create_snapshot(&self, node: &str, vmid: u32, label: &str) -> Result<SnapshotHandle> {
        self.record("snapshot", Some(vmid))?;
        let handle = SnapshotHandle {
            location: format!("{}:snapshots/{}/{}", node, vmid, label),
        };
        self.with_vm("snapshot", vmid, |vm| {
            vm.snapshots.push(handle.clone());
        })?;
        Ok(handle)
    }

    async fn rollback_snapshot(&self, _node: &str, vmid: u32, location: &str) -> Result<()> {
        self.record("rollback", Some(vmid))?;
        let known = self.with_vm("rollback", vmid, |vm| {
            vm.snapshots.iter().any(|s| s.location == location)
        })?;

        if !known {
            return Err(ControlPlaneError::operation(
                "rollback",
                Some(vmid),
                format!("unknown snapshot location '{}'", location),
            ));
        }
        Ok(())
    }
}
