//! Configuration for the orchestration core.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::metrics::MetricsWindow;
use stratovm_proxmox::client::ProxmoxEndpoint;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote control-plane connection
    pub control_plane: ControlPlaneConfig,
    /// Local policy limits
    pub limits: LimitsConfig,
    /// Metrics window-to-sample-count mapping
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config =
            serde_yaml::from_str(&content).with_context(|| "Failed to parse config file")?;

        Ok(config)
    }

    /// Apply environment overrides for control-plane connection settings.
    ///
    /// Recognized: `STRATOVM_CP_HOST`, `STRATOVM_CP_USERNAME`,
    /// `STRATOVM_CP_PASSWORD`, `STRATOVM_CP_NODE`. Credentials in particular
    /// belong in the environment, not in config files.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(host) = std::env::var("STRATOVM_CP_HOST") {
            self.control_plane.host = host;
        }
        if let Ok(username) = std::env::var("STRATOVM_CP_USERNAME") {
            self.control_plane.username = username;
        }
        if let Ok(password) = std::env::var("STRATOVM_CP_PASSWORD") {
            self.control_plane.password = password;
        }
        if let Ok(node) = std::env::var("STRATOVM_CP_NODE") {
            self.control_plane.default_node = node;
        }
        self
    }
}

/// Remote control-plane connection configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Default placement node for new machines.
    pub default_node: String,
    /// Accept TLS certificates that fail validation. Off unless the operator
    /// explicitly trusts self-managed hosts with self-signed certificates.
    pub insecure_tls: bool,
    /// Bound on every remote call, in seconds.
    pub timeout_secs: u64,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8006,
            username: "root@pam".to_string(),
            password: String::new(),
            default_node: "pve".to_string(),
            insecure_tls: false,
            timeout_secs: 30,
        }
    }
}

impl ControlPlaneConfig {
    /// Endpoint parameters for the HTTP client.
    pub fn endpoint(&self) -> ProxmoxEndpoint {
        ProxmoxEndpoint {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            insecure_tls: self.insecure_tls,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// Local policy limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum VM records per owner.
    pub vm_quota: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self { vm_quota: 5 }
    }
}

/// Bounded sample counts per metrics window.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    #[serde(rename = "1h")]
    pub one_hour: usize,
    #[serde(rename = "6h")]
    pub six_hours: usize,
    #[serde(rename = "24h")]
    pub one_day: usize,
    #[serde(rename = "7d")]
    pub seven_days: usize,
    #[serde(rename = "30d")]
    pub thirty_days: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            one_hour: 60,
            six_hours: 72,
            one_day: 288,
            seven_days: 336,
            thirty_days: 720,
        }
    }
}

impl MetricsConfig {
    /// Sample bound for a window.
    pub fn samples_for(&self, window: MetricsWindow) -> usize {
        match window {
            MetricsWindow::OneHour => self.one_hour,
            MetricsWindow::SixHours => self.six_hours,
            MetricsWindow::OneDay => self.one_day,
            MetricsWindow::SevenDays => self.seven_days,
            MetricsWindow::ThirtyDays => self.thirty_days,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let config = Config::default();
        assert_eq!(config.limits.vm_quota, 5);
        assert_eq!(config.control_plane.port, 8006);
        assert!(!config.control_plane.insecure_tls);
        assert_eq!(config.metrics.samples_for(MetricsWindow::OneHour), 60);
        assert_eq!(config.metrics.samples_for(MetricsWindow::OneDay), 288);
    }

    #[test]
    fn parses_yaml_with_partial_sections() {
        let yaml = r#"
control_plane:
  host: pve.example.com
  insecure_tls: true
limits:
  vm_quota: 10
metrics:
  1h: 120
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.control_plane.host, "pve.example.com");
        assert!(config.control_plane.insecure_tls);
        // Unset fields fall back to defaults.
        assert_eq!(config.control_plane.port, 8006);
        assert_eq!(config.limits.vm_quota, 10);
        assert_eq!(config.metrics.samples_for(MetricsWindow::OneHour), 120);
        assert_eq!(config.metrics.samples_for(MetricsWindow::OneDay), 288);
    }
}
