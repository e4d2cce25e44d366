//! # StratoVM Core
//!
//! VM lifecycle orchestration against a remote hypervisor control plane.
//!
//! The three components share one dependency shape: they call the remote
//! plane through [`stratovm_proxmox::ControlPlane`] (which authenticates
//! transparently) and persist through store traits owned by collaborators:
//!
//! - [`orchestrator::VmOrchestrator`] — create / control / delete / query,
//!   with the local [`store::VmRecord`] as the durable source of truth and
//!   per-VM serialization of state transitions.
//! - [`metrics::MetricsAggregator`] — persisted time series blended with a
//!   live poll, degrading gracefully when the poll fails.
//! - [`backup::BackupOrchestrator`] — remote snapshots tracked by local
//!   backup records.
//!
//! [`service::StratoVm`] wires the three together from a [`config::Config`].

pub mod backup;
pub mod config;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod orchestrator;
pub mod service;
pub mod store;

pub use backup::BackupOrchestrator;
pub use config::Config;
pub use error::{Error, Result};
pub use metrics::{MetricsAggregator, MetricsReport, MetricsWindow};
pub use orchestrator::{ControlAction, CreateVmRequest, VmOrchestrator, VmQuery};
pub use service::{Stores, StratoVm};
pub use store::{BackupRecord, BackupStatus, MetricSample, Plan, VmRecord, VmSpecs, VmStatus};
