//! Service wiring: assemble the orchestration components from configuration.

use std::sync::Arc;

use crate::backup::BackupOrchestrator;
use crate::config::Config;
use crate::error::Result;
use crate::metrics::MetricsAggregator;
use crate::orchestrator::VmOrchestrator;
use crate::store::{BackupStore, MetricsStore, PlanStore, VmStore};
use stratovm_proxmox::{ControlPlane, ProxmoxClient};

/// Persistence collaborators, bundled for wiring.
#[derive(Clone)]
pub struct Stores {
    pub vms: Arc<dyn VmStore>,
    pub plans: Arc<dyn PlanStore>,
    pub metrics: Arc<dyn MetricsStore>,
    pub backups: Arc<dyn BackupStore>,
}

/// The assembled hypervisor-facing core.
pub struct StratoVm {
    pub vms: VmOrchestrator,
    pub metrics: MetricsAggregator,
    pub backups: BackupOrchestrator,
}

impl StratoVm {
    /// Assemble the core around an existing control-plane instance.
    pub fn new(config: &Config, control: Arc<dyn ControlPlane>, stores: Stores) -> Self {
        Self {
            vms: VmOrchestrator::new(
                control.clone(),
                stores.vms.clone(),
                stores.plans,
                config.control_plane.default_node.clone(),
                config.limits.vm_quota,
            ),
            metrics: MetricsAggregator::new(
                control.clone(),
                stores.vms.clone(),
                stores.metrics,
                config.metrics.clone(),
            ),
            backups: BackupOrchestrator::new(control, stores.vms, stores.backups),
        }
    }

    /// Assemble the core with an HTTPS client against the configured
    /// control-plane endpoint.
    pub fn connect(config: &Config, stores: Stores) -> Result<Self> {
        let client = ProxmoxClient::connect(&config.control_plane.endpoint())?;
        Ok(Self::new(config, Arc::new(client), stores))
    }
}
