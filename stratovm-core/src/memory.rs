//! In-memory store implementations for tests and development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::{
    BackupRecord, BackupStore, BackupUpdate, MetricSample, MetricsStore, Pagination, Plan,
    PlanStore, VmFilter, VmRecord, VmStore, VmUpdate,
};

fn poisoned() -> Error {
    Error::Store("lock poisoned".to_string())
}

// =============================================================================
// VM STORE
// =============================================================================

#[derive(Default)]
pub struct InMemoryVmStore {
    records: RwLock<HashMap<Uuid, VmRecord>>,
}

impl InMemoryVmStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VmStore for InMemoryVmStore {
    async fn get(&self, id: Uuid) -> Result<Option<VmRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(&id).cloned())
    }

    async fn list_for_owner(
        &self,
        owner_id: Uuid,
        filter: &VmFilter,
        page: &Pagination,
    ) -> Result<(Vec<VmRecord>, usize)> {
        let records = self.records.read().map_err(|_| poisoned())?;

        let mut matching: Vec<VmRecord> = records
            .values()
            .filter(|r| r.owner_id == owner_id)
            .filter(|r| filter.status.map(|s| r.status == s).unwrap_or(true))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len();
        let offset = (page.page.saturating_sub(1) as usize) * page.per_page as usize;
        let page_items = matching
            .into_iter()
            .skip(offset)
            .take(page.per_page as usize)
            .collect();

        Ok((page_items, total))
    }

    async fn insert(&self, record: VmRecord) -> Result<()> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.insert(record.id, record);
        Ok(())
    }

    async fn update(&self, id: Uuid, update: VmUpdate) -> Result<VmRecord> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("VM", id))?;

        if let Some(name) = update.name {
            record.name = name;
        }
        if let Some(status) = update.status {
            record.status = status;
        }

        Ok(record.clone())
    }

    async fn remove(&self, id: Uuid) -> Result<()> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("VM", id))
    }

    async fn count_for_owner(&self, owner_id: Uuid) -> Result<usize> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.values().filter(|r| r.owner_id == owner_id).count())
    }
}

// =============================================================================
// PLAN STORE
// =============================================================================

#[derive(Default)]
pub struct InMemoryPlanStore {
    plans: RwLock<HashMap<String, Plan>>,
}

impl InMemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with a set of plans.
    pub fn with_plans(plans: impl IntoIterator<Item = Plan>) -> Self {
        let map = plans
            .into_iter()
            .map(|plan| (plan.id.clone(), plan))
            .collect();
        Self {
            plans: RwLock::new(map),
        }
    }
}

#[async_trait]
impl PlanStore for InMemoryPlanStore {
    async fn get(&self, id: &str) -> Result<Option<Plan>> {
        let plans = self.plans.read().map_err(|_| poisoned())?;
        Ok(plans.get(id).cloned())
    }
}

// =============================================================================
// METRICS STORE
// =============================================================================

#[derive(Default)]
pub struct InMemoryMetricsStore {
    samples: RwLock<HashMap<Uuid, Vec<MetricSample>>>,
}

impl InMemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricsStore for InMemoryMetricsStore {
    async fn append(&self, sample: MetricSample) -> Result<()> {
        let mut samples = self.samples.write().map_err(|_| poisoned())?;
        samples.entry(sample.vm_id).or_default().push(sample);
        Ok(())
    }

    async fn query_recent(&self, vm_id: Uuid, limit: usize) -> Result<Vec<MetricSample>> {
        let samples = self.samples.read().map_err(|_| poisoned())?;

        let mut series = samples.get(&vm_id).cloned().unwrap_or_default();
        series.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        series.truncate(limit);
        Ok(series)
    }
}

// =============================================================================
// BACKUP STORE
// =============================================================================

#[derive(Default)]
pub struct InMemoryBackupStore {
    backups: RwLock<HashMap<Uuid, BackupRecord>>,
}

impl InMemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BackupStore for InMemoryBackupStore {
    async fn insert(&self, record: BackupRecord) -> Result<()> {
        let mut backups = self.backups.write().map_err(|_| poisoned())?;
        backups.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<BackupRecord>> {
        let backups = self.backups.read().map_err(|_| poisoned())?;
        Ok(backups.get(&id).cloned())
    }

    async fn update(&self, id: Uuid, update: BackupUpdate) -> Result<BackupRecord> {
        let mut backups = self.backups.write().map_err(|_| poisoned())?;
        let record = backups
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("backup", id))?;

        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(size) = update.size_bytes {
            record.size_bytes = size;
        }
        if let Some(location) = update.remote_location {
            record.remote_location = location;
        }

        Ok(record.clone())
    }

    async fn list_for_vm(&self, vm_id: Uuid) -> Result<Vec<BackupRecord>> {
        let backups = self.backups.read().map_err(|_| poisoned())?;

        let mut matching: Vec<BackupRecord> = backups
            .values()
            .filter(|b| b.vm_id == vm_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }
}
