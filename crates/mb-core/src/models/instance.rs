use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::health::{HealthStatus, OverallHealth};
use super::service::ServiceStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum InstanceStatus {
    Running,
    Stopped,
    Degraded,
    Unhealthy,
}

impl From<OverallHealth> for InstanceStatus {
    fn from(health: OverallHealth) -> Self {
        match health {
            OverallHealth::Healthy => InstanceStatus::Running,
            OverallHealth::Degraded => InstanceStatus::Degraded,
            OverallHealth::Unhealthy => InstanceStatus::Unhealthy,
            OverallHealth::Stopped => InstanceStatus::Stopped,
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InstanceStatus::Running => "running",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Degraded => "degraded",
            InstanceStatus::Unhealthy => "unhealthy",
        };
        f.write_str(label)
    }
}

/// The six host ports bound to one instance's services.
///
/// Fixed for the lifetime of the instance: the runtime's port bindings
/// cannot change without recreating the stack.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PortSet {
    pub gateway_http: u16,
    pub gateway_https: u16,
    pub admin_ui: u16,
    pub database: u16,
    pub pool_proxy: u16,
    pub telemetry: u16,
}

impl PortSet {
    pub fn entries(&self) -> [(&'static str, u16); 6] {
        [
            ("gateway-http", self.gateway_http),
            ("gateway-https", self.gateway_https),
            ("admin-ui", self.admin_ui),
            ("database", self.database),
            ("pool-proxy", self.pool_proxy),
            ("telemetry", self.telemetry),
        ]
    }

    pub fn contains(&self, port: u16) -> bool {
        self.entries().iter().any(|(_, p)| *p == port)
    }

    pub fn is_pairwise_distinct(&self) -> bool {
        let entries = self.entries();
        entries
            .iter()
            .enumerate()
            .all(|(i, (_, a))| entries[i + 1..].iter().all(|(_, b)| a != b))
    }
}

/// Secrets generated for one instance. `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub jwt_secret: String,
    pub anon_key: String,
    pub service_role_key: String,
    pub postgres_password: String,
    pub dashboard_username: String,
    pub dashboard_password: String,
    pub secret_key_base: String,
    pub vault_enc_key: String,
    pub logflare_api_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("dashboard_username", &self.dashboard_username)
            .finish_non_exhaustive()
    }
}

/// Persisted per-instance bookkeeping (`instance.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceMetadata {
    pub name: String,
    pub config_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstanceMetadata {
    pub fn new(name: String) -> Self {
        let now = Utc::now();
        Self {
            name,
            config_version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub name: String,
    pub directory: PathBuf,
    pub ports: PortSet,
    #[serde(skip)]
    pub credentials: Credentials,
    pub status: InstanceStatus,
    pub services: Vec<ServiceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthStatus>,
    pub config_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instance {
    pub fn api_url(&self) -> String {
        format!("http://localhost:{}", self.ports.gateway_http)
    }

    pub fn studio_url(&self) -> String {
        format!("http://localhost:{}", self.ports.admin_ui)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateInstanceRequest {
    pub name: String,
    pub base_port: Option<u16>,
}

impl CreateInstanceRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_port: None,
        }
    }

    pub fn with_base_port(mut self, base_port: u16) -> Self {
        self.base_port = Some(base_port);
        self
    }
}

/// What `update_credentials` should change.
#[derive(Debug, Clone, Default)]
pub struct CredentialUpdate {
    /// Rotate the JWT secret, both API keys and the database password.
    pub regenerate_keys: bool,
    pub dashboard_username: Option<String>,
    pub dashboard_password: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports() -> PortSet {
        PortSet {
            gateway_http: 8000,
            gateway_https: 8443,
            admin_ui: 10000,
            database: 9000,
            pool_proxy: 9001,
            telemetry: 11000,
        }
    }

    #[test]
    fn distinct_ports_detected() {
        assert!(ports().is_pairwise_distinct());
        let mut clash = ports();
        clash.telemetry = clash.database;
        assert!(!clash.is_pairwise_distinct());
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = Credentials {
            jwt_secret: "topsecretjwt".into(),
            anon_key: "anon".into(),
            service_role_key: "service".into(),
            postgres_password: "pgpass".into(),
            dashboard_username: "supabase".into(),
            dashboard_password: "dashpass".into(),
            secret_key_base: "base".into(),
            vault_enc_key: "vault".into(),
            logflare_api_key: "logflare".into(),
        };
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("supabase"));
        assert!(!rendered.contains("topsecretjwt"));
        assert!(!rendered.contains("pgpass"));
    }

    #[test]
    fn status_follows_health() {
        assert_eq!(
            InstanceStatus::from(OverallHealth::Healthy),
            InstanceStatus::Running
        );
        assert_eq!(
            InstanceStatus::from(OverallHealth::Stopped),
            InstanceStatus::Stopped
        );
    }
}
