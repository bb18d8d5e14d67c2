use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::RwLock;

use crate::models::{HealthStatus, OverallHealth, ServiceStatus};

/// Overall verdict from service counts.
///
/// Nothing running is `Stopped`, an expected state. Anything running but
/// failing is reported as worse: `Unhealthy` when no service is healthy,
/// `Degraded` when some are.
pub fn derive(running: usize, healthy: usize, total: usize) -> OverallHealth {
    if running == 0 {
        OverallHealth::Stopped
    } else if healthy >= total {
        OverallHealth::Healthy
    } else if healthy == 0 {
        OverallHealth::Unhealthy
    } else {
        OverallHealth::Degraded
    }
}

pub fn summarize(services: &[ServiceStatus]) -> HealthStatus {
    let running = services.iter().filter(|s| s.is_running()).count();
    let healthy = services.iter().filter(|s| s.is_healthy()).count();
    let total = services.len();
    HealthStatus {
        overall: derive(running, healthy, total),
        healthy_services: healthy,
        running_services: running,
        total_services: total,
        last_checked: Utc::now(),
    }
}

/// Short-lived cache of health verdicts keyed by instance name.
pub struct HealthCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, HealthStatus)>>,
}

impl HealthCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The cached verdict, if younger than the TTL.
    pub async fn get(&self, name: &str) -> Option<HealthStatus> {
        let entries = self.entries.read().await;
        entries
            .get(name)
            .filter(|(stored, _)| stored.elapsed() < self.ttl)
            .map(|(_, status)| status.clone())
    }

    pub async fn put(&self, name: &str, status: HealthStatus) {
        let mut entries = self.entries.write().await;
        entries.insert(name.to_string(), (Instant::now(), status));
    }

    pub async fn invalidate(&self, name: &str) {
        let mut entries = self.entries.write().await;
        if entries.remove(name).is_some() {
            tracing::trace!(instance = name, "health cache invalidated");
        }
    }
}
