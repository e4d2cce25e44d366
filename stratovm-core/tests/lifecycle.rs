//! End-to-end orchestration tests against the mock control plane and
//! in-memory stores.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use stratovm_core::config::Config;
use stratovm_core::error::Error;
use stratovm_core::memory::{
    InMemoryBackupStore, InMemoryMetricsStore, InMemoryPlanStore, InMemoryVmStore,
};
use stratovm_core::orchestrator::{ControlAction, CreateVmRequest, VmQuery};
use stratovm_core::store::{
    BackupStatus, MetricSample, MetricsStore, Plan, VmRecord, VmSpecs, VmStatus, VmStore,
};
use stratovm_core::{MetricsWindow, Stores, StratoVm};
use stratovm_proxmox::MockControlPlane;

struct Fixture {
    service: StratoVm,
    plane: Arc<MockControlPlane>,
    vm_store: Arc<InMemoryVmStore>,
    metrics_store: Arc<InMemoryMetricsStore>,
    owner: Uuid,
}

fn starter_plan() -> Plan {
    Plan {
        id: "starter".to_string(),
        name: "Starter".to_string(),
        cpu_cores: 1,
        ram_gib: 2,
        storage_gib: 20,
        bandwidth_mbps: 1000,
    }
}

fn fixture() -> Fixture {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = stratovm_common::init_logging("warn");
    });

    let plane = Arc::new(MockControlPlane::new());
    let vm_store = Arc::new(InMemoryVmStore::new());
    let metrics_store = Arc::new(InMemoryMetricsStore::new());
    let stores = Stores {
        vms: vm_store.clone(),
        plans: Arc::new(InMemoryPlanStore::with_plans([starter_plan()])),
        metrics: metrics_store.clone(),
        backups: Arc::new(InMemoryBackupStore::new()),
    };

    let config = Config::default();
    let service = StratoVm::new(&config, plane.clone(), stores);

    Fixture {
        service,
        plane,
        vm_store,
        metrics_store,
        owner: Uuid::new_v4(),
    }
}

fn create_request(owner: Uuid) -> CreateVmRequest {
    CreateVmRequest {
        name: "web-01".to_string(),
        plan_id: "starter".to_string(),
        owner_id: owner,
    }
}

async fn seed_record(store: &InMemoryVmStore, owner: Uuid) -> VmRecord {
    let record = VmRecord {
        id: Uuid::new_v4(),
        remote_id: Some(900),
        name: "seeded".to_string(),
        owner_id: owner,
        plan_id: "starter".to_string(),
        node: "pve".to_string(),
        status: VmStatus::Running,
        specs: VmSpecs {
            cpu_cores: 1,
            ram_gib: 2,
            storage_gib: 20,
            bandwidth_mbps: 1000,
        },
        created_at: Utc::now(),
    };
    store.insert(record.clone()).await.unwrap();
    record
}

// =============================================================================
// Create
// =============================================================================

#[tokio::test]
async fn create_provisions_and_starts() {
    let fx = fixture();

    let record = fx.service.vms.create(create_request(fx.owner)).await.unwrap();

    assert_eq!(record.status, VmStatus::Running);
    let remote_id = record.remote_id.expect("remote id assigned");
    assert!(fx.plane.has_vm(remote_id));
    assert!(fx.plane.is_running(remote_id));
    assert_eq!(fx.plane.vm_name(remote_id).as_deref(), Some("web-01"));
    // The plan's bandwidth cap is applied as a follow-up call.
    assert_eq!(fx.plane.bandwidth_limit(remote_id), Some(1000));
    let ops = fx.plane.recorded_operations();
    assert_eq!(ops[0], "allocate-id");
    assert!(ops.contains(&format!("set-bandwidth:{}", remote_id)));
}

#[tokio::test]
async fn create_failure_marks_record_failed_without_deleting_it() {
    let fx = fixture();
    fx.plane.fail_operation("create");

    let err = fx.service.vms.create(create_request(fx.owner)).await.unwrap_err();
    assert!(matches!(err, Error::ControlPlane(_)));

    // The record survives in an inspectable state, remote id retained.
    let (records, total) = fx
        .vm_store
        .list_for_owner(fx.owner, &Default::default(), &Default::default())
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(records[0].status, VmStatus::Failed);
    assert!(records[0].remote_id.is_some());
}

#[tokio::test]
async fn start_failure_during_create_surfaces_and_marks_failed() {
    let fx = fixture();
    fx.plane.fail_operation("start");

    assert!(fx.service.vms.create(create_request(fx.owner)).await.is_err());

    let (records, _) = fx
        .vm_store
        .list_for_owner(fx.owner, &Default::default(), &Default::default())
        .await
        .unwrap();
    assert_eq!(records[0].status, VmStatus::Failed);
    // The remote machine was created; reconciliation happens on re-query,
    // not by rollback.
    assert!(fx.plane.has_vm(records[0].remote_id.unwrap()));
}

#[tokio::test]
async fn sixth_create_is_rejected_with_no_remote_calls() {
    let fx = fixture();
    for _ in 0..5 {
        seed_record(&fx.vm_store, fx.owner).await;
    }

    let err = fx.service.vms.create(create_request(fx.owner)).await.unwrap_err();
    assert!(matches!(err, Error::QuotaExceeded { count: 5, limit: 5 }));
    assert!(fx.plane.recorded_operations().is_empty());
}

#[tokio::test]
async fn unknown_plan_is_rejected_before_any_remote_call() {
    let fx = fixture();
    let request = CreateVmRequest {
        plan_id: "no-such-plan".to_string(),
        ..create_request(fx.owner)
    };

    let err = fx.service.vms.create(request).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: "plan", .. }));
    assert!(fx.plane.recorded_operations().is_empty());
}

// =============================================================================
// Control
// =============================================================================

#[tokio::test]
async fn remote_id_never_changes_after_assignment() {
    let fx = fixture();
    let record = fx.service.vms.create(create_request(fx.owner)).await.unwrap();
    let assigned = record.remote_id;

    let stopped = fx
        .service
        .vms
        .control(record.id, ControlAction::Stop)
        .await
        .unwrap();
    assert_eq!(stopped.remote_id, assigned);

    let renamed = fx.service.vms.rename(record.id, "web-02").await.unwrap();
    assert_eq!(renamed.remote_id, assigned);
    assert_eq!(renamed.name, "web-02");
}

#[tokio::test]
async fn start_and_stop_commit_matching_status() {
    let fx = fixture();
    let record = fx.service.vms.create(create_request(fx.owner)).await.unwrap();

    let stopped = fx
        .service
        .vms
        .control(record.id, ControlAction::Stop)
        .await
        .unwrap();
    assert_eq!(stopped.status, VmStatus::Stopped);
    assert!(!fx.plane.is_running(record.remote_id.unwrap()));

    let started = fx
        .service
        .vms
        .control(record.id, ControlAction::Start)
        .await
        .unwrap();
    assert_eq!(started.status, VmStatus::Running);
}

#[tokio::test]
async fn restart_with_failing_start_persists_stopped_and_errors() {
    let fx = fixture();
    let record = fx.service.vms.create(create_request(fx.owner)).await.unwrap();

    fx.plane.fail_operation("start");
    let err = fx
        .service
        .vms
        .control(record.id, ControlAction::Restart)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ControlPlane(_)));

    let persisted = fx.vm_store.get(record.id).await.unwrap().unwrap();
    assert_eq!(persisted.status, VmStatus::Stopped);
}

#[tokio::test]
async fn restart_commits_only_the_final_state() {
    let fx = fixture();
    let record = fx.service.vms.create(create_request(fx.owner)).await.unwrap();

    let restarted = fx
        .service
        .vms
        .control(record.id, ControlAction::Restart)
        .await
        .unwrap();
    assert_eq!(restarted.status, VmStatus::Running);

    let ops = fx.plane.recorded_operations();
    let remote_id = record.remote_id.unwrap();
    let stop_idx = ops.iter().rposition(|o| *o == format!("stop:{}", remote_id));
    let start_idx = ops.iter().rposition(|o| *o == format!("start:{}", remote_id));
    assert!(stop_idx.unwrap() < start_idx.unwrap());
}

#[tokio::test]
async fn control_requires_a_remote_identifier() {
    let fx = fixture();
    let mut record = seed_record(&fx.vm_store, fx.owner).await;
    record.remote_id = None;
    record.id = Uuid::new_v4();
    fx.vm_store.insert(record.clone()).await.unwrap();

    let err = fx
        .service
        .vms
        .control(record.id, ControlAction::Start)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
}

// =============================================================================
// Delete
// =============================================================================

#[tokio::test]
async fn delete_removes_local_record_even_when_remote_delete_fails() {
    let fx = fixture();
    let record = fx.service.vms.create(create_request(fx.owner)).await.unwrap();

    fx.plane.fail_operation("delete");
    fx.service.vms.delete(record.id).await.unwrap();

    assert!(fx.vm_store.get(record.id).await.unwrap().is_none());
    // The remote machine may linger; that is reconciled later, not fatal.
    assert!(fx.plane.has_vm(record.remote_id.unwrap()));
}

#[tokio::test]
async fn delete_of_unknown_vm_is_not_found() {
    let fx = fixture();
    let err = fx.service.vms.delete(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: "VM", .. }));
}

// =============================================================================
// Query
// =============================================================================

#[tokio::test]
async fn query_attaches_live_stats_for_running_machines() {
    let fx = fixture();
    let record = fx.service.vms.create(create_request(fx.owner)).await.unwrap();

    match fx.service.vms.query(record.id).await.unwrap() {
        VmQuery::WithLiveStats { record: r, stats } => {
            assert_eq!(r.id, record.id);
            assert!(stats.cpu_usage_pct > 0.0);
        }
        VmQuery::Persisted(_) => panic!("expected live stats for a running VM"),
    }
}

#[tokio::test]
async fn query_degrades_when_live_poll_fails() {
    let fx = fixture();
    let record = fx.service.vms.create(create_request(fx.owner)).await.unwrap();

    fx.plane.fail_operation("query-status");
    let query = fx.service.vms.query(record.id).await.unwrap();
    assert!(query.live_stats().is_none());
    assert_eq!(query.record().status, VmStatus::Running);
}

#[tokio::test]
async fn query_skips_live_stats_for_stopped_machines() {
    let fx = fixture();
    let record = fx.service.vms.create(create_request(fx.owner)).await.unwrap();
    fx.service
        .vms
        .control(record.id, ControlAction::Stop)
        .await
        .unwrap();
    let polls_before = fx
        .plane
        .recorded_operations()
        .iter()
        .filter(|o| o.starts_with("query-status"))
        .count();

    let query = fx.service.vms.query(record.id).await.unwrap();
    assert!(query.live_stats().is_none());

    let polls_after = fx
        .plane
        .recorded_operations()
        .iter()
        .filter(|o| o.starts_with("query-status"))
        .count();
    assert_eq!(polls_before, polls_after);
}

// =============================================================================
// Metrics
// =============================================================================

async fn seed_samples(store: &InMemoryMetricsStore, vm_id: Uuid, count: usize) {
    for i in 0..count {
        store
            .append(MetricSample {
                vm_id,
                timestamp: Utc::now() - chrono::Duration::minutes(i as i64 + 1),
                cpu_usage_pct: 10.0,
                ram_usage_pct: 20.0,
                storage_usage_pct: 30.0,
                network_in_bytes: 1,
                network_out_bytes: 2,
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn one_hour_window_is_bounded_with_live_sample_prepended() {
    let fx = fixture();
    let record = fx.service.vms.create(create_request(fx.owner)).await.unwrap();
    seed_samples(&fx.metrics_store, record.id, 70).await;

    let report = fx
        .service
        .metrics
        .get_metrics(record.id, MetricsWindow::OneHour)
        .await
        .unwrap();

    assert_eq!(report.history.len(), 60);
    let live = report.live.as_ref().expect("live sample for running VM");
    // The live sample sits ahead of the whole historical series.
    assert!(live.timestamp > report.history[0].timestamp);
    assert_eq!(report.samples().count(), 61);
}

#[tokio::test]
async fn failed_live_poll_degrades_to_history_alone() {
    let fx = fixture();
    let record = fx.service.vms.create(create_request(fx.owner)).await.unwrap();
    seed_samples(&fx.metrics_store, record.id, 5).await;

    fx.plane.fail_operation("query-status");
    let report = fx
        .service
        .metrics
        .get_metrics(record.id, MetricsWindow::OneHour)
        .await
        .unwrap();

    assert!(report.live.is_none());
    assert_eq!(report.history.len(), 5);
}

#[tokio::test]
async fn stopped_machines_report_history_only() {
    let fx = fixture();
    let record = fx.service.vms.create(create_request(fx.owner)).await.unwrap();
    fx.service
        .vms
        .control(record.id, ControlAction::Stop)
        .await
        .unwrap();
    seed_samples(&fx.metrics_store, record.id, 3).await;

    let report = fx
        .service
        .metrics
        .get_metrics(record.id, MetricsWindow::OneDay)
        .await
        .unwrap();
    assert!(report.live.is_none());
    assert_eq!(report.history.len(), 3);
}

// =============================================================================
// Backups
// =============================================================================

#[tokio::test]
async fn backup_then_restore_round_trips_the_location() {
    let fx = fixture();
    let record = fx.service.vms.create(create_request(fx.owner)).await.unwrap();

    let backup = fx.service.backups.create_backup(record.id).await.unwrap();
    assert_eq!(backup.status, BackupStatus::Completed);
    assert!(!backup.remote_location.is_empty());
    assert_eq!(backup.size_bytes, 0);

    fx.service
        .backups
        .restore_backup(record.id, backup.id)
        .await
        .unwrap();
}

#[tokio::test]
async fn failed_snapshot_marks_backup_failed_and_surfaces() {
    let fx = fixture();
    let record = fx.service.vms.create(create_request(fx.owner)).await.unwrap();

    fx.plane.fail_operation("snapshot");
    assert!(fx.service.backups.create_backup(record.id).await.is_err());

    let backups = fx.service.backups.list_backups(record.id).await.unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].status, BackupStatus::Failed);

    // A failed backup is not restorable.
    let err = fx
        .service
        .backups
        .restore_backup(record.id, backups[0].id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn operations_on_different_machines_proceed_independently() {
    let fx = fixture();
    let a = fx.service.vms.create(create_request(fx.owner)).await.unwrap();
    let b = fx.service.vms.create(create_request(fx.owner)).await.unwrap();

    let service = &fx.service;
    let (ra, rb) = tokio::join!(
        service.vms.control(a.id, ControlAction::Stop),
        service.vms.control(b.id, ControlAction::Restart),
    );

    assert_eq!(ra.unwrap().status, VmStatus::Stopped);
    assert_eq!(rb.unwrap().status, VmStatus::Running);
}
