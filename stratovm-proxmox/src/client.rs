//! HTTP control-plane client.
//!
//! [`HttpTransport`] speaks the wire protocol against one cluster endpoint;
//! [`ProxmoxClient`] layers session handling on top and implements the
//! [`ControlPlane`] trait. Any response rejected as unauthenticated triggers
//! one session invalidation, one re-authentication and one retry of the
//! original call; a second rejection is final.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::{ControlPlaneError, Result};
use crate::session::{CredentialIssuer, SessionManager};
use crate::traits::ControlPlane;
use crate::transport::{ApiRequest, ControlPlaneTransport, Method, TransportError};
use crate::types::{
    RawVmStatus, SessionCredentials, SnapshotHandle, TicketData, VmCreateRequest, VmStats,
};

/// Connection parameters for one control-plane endpoint.
#[derive(Debug, Clone)]
pub struct ProxmoxEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Accept TLS certificates that fail validation.
    ///
    /// Self-managed hypervisor hosts commonly run with self-signed
    /// certificates; enabling this is an explicit operator trust decision.
    pub insecure_tls: bool,
    /// Bound on every remote call.
    pub timeout: Duration,
}

// =============================================================================
// HTTP TRANSPORT
// =============================================================================

/// Reqwest-backed transport against `https://{host}:{port}/api2/json`.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl HttpTransport {
    pub fn new(endpoint: &ProxmoxEndpoint) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(endpoint.insecure_tls)
            .timeout(endpoint.timeout)
            .build()
            .map_err(|e| ControlPlaneError::Configuration(e.to_string()))?;

        Ok(Self {
            http,
            base_url: format!("https://{}:{}/api2/json", endpoint.host, endpoint.port),
            username: endpoint.username.clone(),
            password: endpoint.password.clone(),
        })
    }
}

#[async_trait]
impl ControlPlaneTransport for HttpTransport {
    async fn execute(
        &self,
        request: &ApiRequest,
        session: Option<&SessionCredentials>,
    ) -> std::result::Result<Value, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);

        let mut builder = match request.method {
            Method::Get => self.http.get(&url).query(&request.params),
            Method::Post => self.http.post(&url).form(&request.params),
            Method::Put => self.http.put(&url).form(&request.params),
            Method::Delete => self.http.delete(&url).form(&request.params),
        };

        if let Some(creds) = session {
            builder = builder.header("Cookie", format!("PVEAuthCookie={}", creds.ticket));
            if request.method.is_mutation() {
                builder = builder.header("CSRFPreventionToken", &creds.csrf_token);
            }
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Failed(e.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(TransportError::Unauthenticated);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Failed(format!(
                "{} {} returned {}: {}",
                method_name(request.method),
                request.path,
                status,
                body.trim()
            )));
        }

        let mut envelope: Value = response
            .json()
            .await
            .map_err(|e| TransportError::Failed(format!("invalid response body: {}", e)))?;

        Ok(envelope
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }
}

#[async_trait]
impl CredentialIssuer for HttpTransport {
    async fn issue_credentials(&self) -> Result<SessionCredentials> {
        let request = ApiRequest::post("/access/ticket")
            .param("username", &self.username)
            .param("password", &self.password);

        let data = self
            .execute(&request, None)
            .await
            .map_err(|e| ControlPlaneError::Authentication(e.to_string()))?;

        let ticket: TicketData = serde_json::from_value(data)
            .map_err(|e| ControlPlaneError::Authentication(format!("malformed ticket: {}", e)))?;

        Ok(SessionCredentials {
            ticket: ticket.ticket,
            csrf_token: ticket.csrf_token,
            issued_at: chrono::Utc::now(),
        })
    }
}

fn method_name(method: Method) -> &'static str {
    match method {
        Method::Get => "GET",
        Method::Post => "POST",
        Method::Put => "PUT",
        Method::Delete => "DELETE",
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// Authenticated control-plane client.
pub struct ProxmoxClient {
    transport: Arc<dyn ControlPlaneTransport>,
    session: SessionManager,
}

impl ProxmoxClient {
    /// Connect to a control-plane endpoint over HTTPS.
    pub fn connect(endpoint: &ProxmoxEndpoint) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(endpoint)?);
        Ok(Self::with_parts(transport.clone(), transport))
    }

    /// Assemble a client from an explicit transport and credential issuer.
    pub fn with_parts(
        transport: Arc<dyn ControlPlaneTransport>,
        issuer: Arc<dyn CredentialIssuer>,
    ) -> Self {
        Self {
            transport,
            session: SessionManager::new(issuer),
        }
    }

    /// Issue an authenticated call, retrying once after an unauthenticated
    /// rejection.
    async fn call(&self, op: &'static str, vmid: Option<u32>, request: ApiRequest) -> Result<Value> {
        let creds = self.session.ensure_authenticated().await?;

        match self.transport.execute(&request, Some(&creds)).await {
            Ok(data) => Ok(data),
            Err(TransportError::Unauthenticated) => {
                warn!(op, "session rejected, re-authenticating once");
                self.session.invalidate().await;
                let creds = self.session.ensure_authenticated().await?;
                self.transport
                    .execute(&request, Some(&creds))
                    .await
                    .map_err(|e| ControlPlaneError::operation(op, vmid, e.to_string()))
            }
            Err(e) => Err(ControlPlaneError::operation(op, vmid, e.to_string())),
        }
    }
}

#[async_trait]
impl ControlPlane for ProxmoxClient {
    #[instrument(skip(self))]
    async fn allocate_vm_id(&self) -> Result<u32> {
        let data = self
            .call("allocate-id", None, ApiRequest::get("/cluster/nextid"))
            .await?;

        parse_vmid(&data)
            .ok_or_else(|| ControlPlaneError::operation("allocate-id", None, "non-numeric identifier"))
    }

    #[instrument(skip(self, request), fields(vmid = request.vmid, name = %request.name))]
    async fn create_vm(&self, node: &str, request: &VmCreateRequest) -> Result<()> {
        debug!("creating remote VM");
        let api = ApiRequest::post(format!("/nodes/{}/qemu", node))
            .param("vmid", request.vmid)
            .param("name", &request.name)
            .param("cores", request.cores)
            .param("memory", request.memory_mib)
            .param("storage", format!("local-lvm:{}", request.storage_gib))
            .param("net0", "virtio,bridge=vmbr0")
            .param("ostype", "l26");

        self.call("create", Some(request.vmid), api).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn start_vm(&self, node: &str, vmid: u32) -> Result<()> {
        let api = ApiRequest::post(format!("/nodes/{}/qemu/{}/status/start", node, vmid));
        self.call("start", Some(vmid), api).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop_vm(&self, node: &str, vmid: u32) -> Result<()> {
        let api = ApiRequest::post(format!("/nodes/{}/qemu/{}/status/stop", node, vmid));
        self.call("stop", Some(vmid), api).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_vm(&self, node: &str, vmid: u32) -> Result<()> {
        let api = ApiRequest::delete(format!("/nodes/{}/qemu/{}", node, vmid));
        self.call("delete", Some(vmid), api).await?;
        Ok(())
    }

    async fn query_status(&self, node: &str, vmid: u32) -> Result<RawVmStatus> {
        let api = ApiRequest::get(format!("/nodes/{}/qemu/{}/status/current", node, vmid));
        let data = self.call("query-status", Some(vmid), api).await?;

        serde_json::from_value(data).map_err(|e| {
            ControlPlaneError::operation("query-status", Some(vmid), format!("malformed status: {}", e))
        })
    }

    async fn query_stats(&self, node: &str, vmid: u32) -> Result<VmStats> {
        let raw = self.query_status(node, vmid).await?;
        Ok(VmStats::from_raw(&raw))
    }

    #[instrument(skip(self))]
    async fn set_bandwidth_limit(&self, node: &str, vmid: u32, mbps: u32) -> Result<()> {
        let api = ApiRequest::put(format!("/nodes/{}/qemu/{}/config", node, vmid))
            .param("net0", format!("virtio,bridge=vmbr0,rate={}", mbps));
        self.call("set-bandwidth", Some(vmid), api).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn create_snapshot(&self, node: &str, vmid: u32, label: &str) -> Result<SnapshotHandle> {
        let api = ApiRequest::post(format!("/nodes/{}/qemu/{}/snapshot", node, vmid))
            .param("snapname", label);
        self.call("snapshot", Some(vmid), api).await?;

        // Snapshots are addressed by label on the remote side.
        Ok(SnapshotHandle {
            location: label.to_string(),
        })
    }

    #[instrument(skip(self))]
    async fn rollback_snapshot(&self, node: &str, vmid: u32, location: &str) -> Result<()> {
        let api = ApiRequest::post(format!(
            "/nodes/{}/qemu/{}/snapshot/{}/rollback",
            node, vmid, location
        ));
        self.call("rollback", Some(vmid), api).await?;
        Ok(())
    }
}

/// The identifier endpoint reports either a number or a numeric string.
fn parse_vmid(data: &Value) -> Option<u32> {
    match data {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
