use std::time::Duration;

use serde::Deserialize;

/// Fleet-wide settings read from `multibase.yaml`. Every field is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub runtime_binary: String,
    pub command_timeout_secs: u64,
    pub health_cache_ttl_secs: u64,
    pub concurrency: usize,
    pub monitor_interval_secs: u64,
    pub max_sample_gap_secs: Option<u64>,
    pub response_probe_timeout_ms: u64,
    pub port_scan_limit: u32,
    pub cors_origins: Vec<String>,
    pub jwt_expiry_years: i64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            runtime_binary: "docker".into(),
            command_timeout_secs: 120,
            health_cache_ttl_secs: 10,
            concurrency: 8,
            monitor_interval_secs: 30,
            max_sample_gap_secs: None,
            response_probe_timeout_ms: 2000,
            port_scan_limit: 1000,
            cors_origins: Vec::new(),
            jwt_expiry_years: 10,
        }
    }
}

impl FleetConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn health_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.health_cache_ttl_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }

    /// Largest tolerated gap between two samples of the same instance before
    /// a breach episode is considered interrupted.
    pub fn max_sample_gap(&self) -> Duration {
        self.max_sample_gap_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.monitor_interval() * 2)
    }

    pub fn response_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.response_probe_timeout_ms)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency.max(1)
    }
}
