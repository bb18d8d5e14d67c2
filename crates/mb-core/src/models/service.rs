use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ServiceState {
    Running,
    Stopped,
    Starting,
}

/// Result of the container's own health check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ProbeResult {
    Healthy,
    Unhealthy,
    /// No health check defined, or no result yet.
    Unknown,
}

/// Live view of one container in an instance. Recomputed on every poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub name: String,
    pub container_name: String,
    pub state: ServiceState,
    pub health: ProbeResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<String>,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub memory_percent: f64,
}

impl ServiceStatus {
    pub fn is_running(&self) -> bool {
        self.state == ServiceState::Running
    }

    /// Running, and not failing its health check. Containers without a
    /// health check count as healthy while running.
    pub fn is_healthy(&self) -> bool {
        self.is_running() && self.health != ProbeResult::Unhealthy
    }
}

/// One row of the runtime's container listing for a stack.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub service: String,
    /// Raw runtime state: running, exited, created, restarting, paused, dead.
    #[serde(default)]
    pub state: String,
    /// Raw health: healthy, unhealthy, starting, or empty.
    #[serde(default)]
    pub health: String,
    /// Human status text, e.g. "Up 5 minutes (healthy)".
    #[serde(default)]
    pub status: String,
}

/// Point-in-time resource usage of one container.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStats {
    pub name: String,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub memory_percent: f64,
}
