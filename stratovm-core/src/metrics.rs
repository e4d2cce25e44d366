//! Metrics aggregation: persisted time series blended with a live poll.

use chrono::Utc;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::config::MetricsConfig;
use crate::error::{Error, Result};
use crate::store::{MetricSample, MetricsStore, VmStatus, VmStore};
use stratovm_proxmox::{ControlPlane, VmStats};

/// Time window of a metrics query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum MetricsWindow {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "24h")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
}

impl MetricsWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneHour => "1h",
            Self::SixHours => "6h",
            Self::OneDay => "24h",
            Self::SevenDays => "7d",
            Self::ThirtyDays => "30d",
        }
    }
}

impl FromStr for MetricsWindow {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1h" => Ok(Self::OneHour),
            "6h" => Ok(Self::SixHours),
            "24h" => Ok(Self::OneDay),
            "7d" => Ok(Self::SevenDays),
            "30d" => Ok(Self::ThirtyDays),
            other => Err(Error::InvalidRequest(format!(
                "window must be one of 1h, 6h, 24h, 7d, 30d, got '{}'",
                other
            ))),
        }
    }
}

/// Aggregated metrics for one machine.
///
/// `history` is the persisted series, newest first, bounded by the window's
/// sample count. `live` is a sample polled at query time, present only when
/// the machine is running and the poll succeeded; it is logically *ahead of*
/// the history.
#[derive(Debug, Clone)]
pub struct MetricsReport {
    pub live: Option<MetricSample>,
    pub history: Vec<MetricSample>,
}

impl MetricsReport {
    /// Live sample followed by history, newest first.
    pub fn samples(&self) -> impl Iterator<Item = &MetricSample> {
        self.live.iter().chain(self.history.iter())
    }
}

/// Merges the persisted time series with live polled stats.
pub struct MetricsAggregator {
    control: Arc<dyn ControlPlane>,
    vms: Arc<dyn VmStore>,
    metrics: Arc<dyn MetricsStore>,
    windows: MetricsConfig,
}

impl MetricsAggregator {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        vms: Arc<dyn VmStore>,
        metrics: Arc<dyn MetricsStore>,
        windows: MetricsConfig,
    ) -> Self {
        Self {
            control,
            vms,
            metrics,
            windows,
        }
    }

    /// Metrics for a machine over a window.
    ///
    /// A failure to poll the live sample degrades to the historical series
    /// alone, never an error.
    pub async fn get_metrics(&self, vm_id: Uuid, window: MetricsWindow) -> Result<MetricsReport> {
        let vm = self
            .vms
            .get(vm_id)
            .await?
            .ok_or_else(|| Error::not_found("VM", vm_id))?;

        let limit = self.windows.samples_for(window);
        let history = self.metrics.query_recent(vm_id, limit).await?;

        let live = match (vm.status, vm.remote_id) {
            (VmStatus::Running, Some(remote_id)) => {
                match self.control.query_stats(&vm.node, remote_id).await {
                    Ok(stats) => Some(live_sample(vm_id, stats)),
                    Err(e) => {
                        warn!(vm_id = %vm_id, error = %e, "live metrics poll failed, serving history only");
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(MetricsReport { live, history })
    }
}

fn live_sample(vm_id: Uuid, stats: VmStats) -> MetricSample {
    MetricSample {
        vm_id,
        timestamp: Utc::now(),
        cpu_usage_pct: stats.cpu_usage_pct,
        ram_usage_pct: stats.ram_usage_pct,
        storage_usage_pct: stats.storage_usage_pct,
        network_in_bytes: stats.network_in_bytes,
        network_out_bytes: stats.network_out_bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_round_trips_through_strings() {
        for s in ["1h", "6h", "24h", "7d", "30d"] {
            let window: MetricsWindow = s.parse().unwrap();
            assert_eq!(window.as_str(), s);
        }
        assert!("2h".parse::<MetricsWindow>().is_err());
    }
}
