//! Backup orchestration over remote snapshots.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::{BackupRecord, BackupStatus, BackupStore, BackupUpdate, VmStore};
use stratovm_proxmox::ControlPlane;

/// Orchestrates snapshot-backed backups.
///
/// A backup record is created `PENDING` before the remote snapshot call and
/// settles to `COMPLETED` or `FAILED` once it returns; the record always
/// exists for inspection even when the snapshot failed. `size_bytes` is
/// populated asynchronously by an external collector through
/// [`BackupStore::update`]; `COMPLETED` does not imply the size is known.
pub struct BackupOrchestrator {
    control: Arc<dyn ControlPlane>,
    vms: Arc<dyn VmStore>,
    backups: Arc<dyn BackupStore>,
}

impl BackupOrchestrator {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        vms: Arc<dyn VmStore>,
        backups: Arc<dyn BackupStore>,
    ) -> Self {
        Self {
            control,
            vms,
            backups,
        }
    }

    /// Snapshot a machine and record the backup.
    ///
    /// Requires the record to hold a remote identifier. On snapshot failure
    /// the record is marked `FAILED` and the error surfaces to the caller.
    #[instrument(skip(self))]
    pub async fn create_backup(&self, vm_id: Uuid) -> Result<BackupRecord> {
        let vm = self
            .vms
            .get(vm_id)
            .await?
            .ok_or_else(|| Error::not_found("VM", vm_id))?;
        let remote_id = vm
            .remote_id
            .ok_or_else(|| Error::InvalidRequest("VM has no remote identifier".to_string()))?;

        let created_at = Utc::now();
        let label = format!("backup-{}", created_at.timestamp_millis());
        let record = BackupRecord {
            id: Uuid::new_v4(),
            vm_id,
            label: label.clone(),
            status: BackupStatus::Pending,
            size_bytes: 0,
            remote_location: String::new(),
            created_at,
        };
        self.backups.insert(record.clone()).await?;

        match self.control.create_snapshot(&vm.node, remote_id, &label).await {
            Ok(handle) => {
                let updated = self
                    .backups
                    .update(
                        record.id,
                        BackupUpdate {
                            status: Some(BackupStatus::Completed),
                            remote_location: Some(handle.location),
                            ..Default::default()
                        },
                    )
                    .await?;
                info!(backup_id = %updated.id, location = %updated.remote_location, "backup completed");
                Ok(updated)
            }
            Err(e) => {
                if let Err(update_err) = self
                    .backups
                    .update(record.id, BackupUpdate {
                        status: Some(BackupStatus::Failed),
                        ..Default::default()
                    })
                    .await
                {
                    warn!(backup_id = %record.id, error = %update_err, "failed to persist FAILED backup status");
                }
                Err(e.into())
            }
        }
    }

    /// Roll a machine back to a completed backup.
    ///
    /// Does not mutate VM lifecycle state; the caller must re-query the
    /// machine's status afterward.
    #[instrument(skip(self))]
    pub async fn restore_backup(&self, vm_id: Uuid, backup_id: Uuid) -> Result<()> {
        let vm = self
            .vms
            .get(vm_id)
            .await?
            .ok_or_else(|| Error::not_found("VM", vm_id))?;
        let remote_id = vm
            .remote_id
            .ok_or_else(|| Error::InvalidRequest("VM has no remote identifier".to_string()))?;

        let backup = self
            .backups
            .get(backup_id)
            .await?
            .filter(|b| b.vm_id == vm_id)
            .ok_or_else(|| Error::not_found("backup", backup_id))?;

        if backup.status != BackupStatus::Completed {
            return Err(Error::InvalidRequest(format!(
                "backup {} is not restorable (status {:?})",
                backup.id, backup.status
            )));
        }

        self.control
            .rollback_snapshot(&vm.node, remote_id, &backup.remote_location)
            .await?;
        info!(backup_id = %backup.id, "restored backup");
        Ok(())
    }

    /// All backups recorded for a machine, newest first.
    pub async fn list_backups(&self, vm_id: Uuid) -> Result<Vec<BackupRecord>> {
        if self.vms.get(vm_id).await?.is_none() {
            return Err(Error::not_found("VM", vm_id));
        }
        self.backups.list_for_vm(vm_id).await
    }
}
