//! Wire and session types for the control-plane client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// SESSION
// =============================================================================

/// Short-lived credential pair issued by the control plane.
///
/// The ticket authenticates every request (as a cookie); the anti-forgery
/// token authorizes mutations (as a header). The two are an atomic pair:
/// either both are held or neither is. Never persisted to durable storage.
#[derive(Debug, Clone)]
pub struct SessionCredentials {
    /// Session ticket, attached as `PVEAuthCookie`.
    pub ticket: String,
    /// Anti-forgery token, attached as `CSRFPreventionToken` on mutations.
    pub csrf_token: String,
    /// When the pair was issued.
    pub issued_at: DateTime<Utc>,
}

/// Payload of a successful credential-issuance call.
#[derive(Debug, Deserialize)]
pub struct TicketData {
    pub ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    pub csrf_token: String,
}

// =============================================================================
// VM OPERATIONS
// =============================================================================

/// Parameters for a remote VM creation call.
///
/// Units follow the remote plane: memory in MiB, storage in GiB.
#[derive(Debug, Clone, Serialize)]
pub struct VmCreateRequest {
    /// Remote VM identifier, allocated beforehand.
    pub vmid: u32,
    /// Human-readable name.
    pub name: String,
    /// Number of CPU cores.
    pub cores: u32,
    /// Memory size in MiB.
    pub memory_mib: u64,
    /// Root disk size in GiB.
    pub storage_gib: u64,
}

/// Raw VM status as reported by the control plane.
///
/// CPU is a fraction of allocated cores (0.0-1.0); memory and disk are
/// used/maximum byte pairs; network counters are cumulative bytes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawVmStatus {
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub mem: u64,
    #[serde(default)]
    pub maxmem: u64,
    #[serde(default)]
    pub disk: u64,
    #[serde(default)]
    pub maxdisk: u64,
    #[serde(default)]
    pub netin: u64,
    #[serde(default)]
    pub netout: u64,
}

/// Normalized VM resource usage.
///
/// CPU, memory and storage are percentages (0-100); network counters stay
/// raw cumulative bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmStats {
    pub cpu_usage_pct: f64,
    pub ram_usage_pct: f64,
    pub storage_usage_pct: f64,
    pub network_in_bytes: u64,
    pub network_out_bytes: u64,
}

impl VmStats {
    /// Normalize heterogeneous remote units into percentages.
    ///
    /// Used/maximum pairs with an unreported maximum normalize to 0 rather
    /// than dividing by zero.
    pub fn from_raw(raw: &RawVmStatus) -> Self {
        Self {
            cpu_usage_pct: (raw.cpu * 100.0).clamp(0.0, 100.0),
            ram_usage_pct: percentage(raw.mem, raw.maxmem),
            storage_usage_pct: percentage(raw.disk, raw.maxdisk),
            network_in_bytes: raw.netin,
            network_out_bytes: raw.netout,
        }
    }
}

fn percentage(used: u64, max: u64) -> f64 {
    if max == 0 {
        return 0.0;
    }
    ((used as f64 / max as f64) * 100.0).clamp(0.0, 100.0)
}

/// Handle returned by a snapshot creation call.
///
/// The location identifies the snapshot on the remote side and is the value
/// a later rollback call must reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHandle {
    pub location: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_used_max_pairs() {
        let raw = RawVmStatus {
            cpu: 0.42,
            mem: 1024,
            maxmem: 4096,
            disk: 10,
            maxdisk: 100,
            netin: 123,
            netout: 456,
        };

        let stats = VmStats::from_raw(&raw);
        assert!((stats.cpu_usage_pct - 42.0).abs() < f64::EPSILON);
        assert!((stats.ram_usage_pct - 25.0).abs() < f64::EPSILON);
        assert!((stats.storage_usage_pct - 10.0).abs() < f64::EPSILON);
        assert_eq!(stats.network_in_bytes, 123);
        assert_eq!(stats.network_out_bytes, 456);
    }

    #[test]
    fn zero_maximum_normalizes_to_zero() {
        let raw = RawVmStatus {
            mem: 1024,
            maxmem: 0,
            ..Default::default()
        };

        let stats = VmStats::from_raw(&raw);
        assert_eq!(stats.ram_usage_pct, 0.0);
        assert_eq!(stats.storage_usage_pct, 0.0);
    }

    #[test]
    fn cpu_fraction_is_clamped() {
        let raw = RawVmStatus {
            cpu: 1.2,
            ..Default::default()
        };

        assert_eq!(VmStats::from_raw(&raw).cpu_usage_pct, 100.0);
    }
}
