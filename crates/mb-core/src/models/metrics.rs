use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::alert::RuleKind;
use super::service::ServiceStatus;

/// Telemetry for one instance at one point in time. A `None` metric means
/// it could not be measured this cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    pub instance_id: String,
    pub taken_at: DateTime<Utc>,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub disk_percent: Option<f64>,
    pub services_down: Option<f64>,
    pub response_time_ms: Option<f64>,
}

impl MetricSample {
    pub fn empty(instance_id: &str, taken_at: DateTime<Utc>) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            taken_at,
            cpu_percent: None,
            memory_percent: None,
            disk_percent: None,
            services_down: None,
            response_time_ms: None,
        }
    }

    /// Fill CPU, memory and service-down figures from a live service listing.
    pub fn with_services(mut self, services: &[ServiceStatus]) -> Self {
        self.cpu_percent = Some(services.iter().map(|s| s.cpu_percent).sum());
        self.memory_percent = Some(services.iter().map(|s| s.memory_percent).sum());
        self.services_down = Some(services.iter().filter(|s| !s.is_healthy()).count() as f64);
        self
    }

    pub fn value_for(&self, kind: RuleKind) -> Option<f64> {
        match kind {
            RuleKind::HighCpu => self.cpu_percent,
            RuleKind::HighMemory => self.memory_percent,
            RuleKind::HighDisk => self.disk_percent,
            RuleKind::ServiceDown => self.services_down,
            RuleKind::SlowResponse => self.response_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProbeResult, ServiceState};

    fn service(name: &str, state: ServiceState, health: ProbeResult, cpu: f64) -> ServiceStatus {
        ServiceStatus {
            name: name.into(),
            container_name: format!("demo-{name}"),
            state,
            health,
            uptime: None,
            cpu_percent: cpu,
            memory_bytes: 0,
            memory_percent: 1.5,
        }
    }

    #[test]
    fn services_fill_aggregate_metrics() {
        let services = vec![
            service("db", ServiceState::Running, ProbeResult::Healthy, 10.0),
            service("kong", ServiceState::Running, ProbeResult::Unknown, 2.5),
            service("auth", ServiceState::Stopped, ProbeResult::Unknown, 0.0),
            service("rest", ServiceState::Running, ProbeResult::Unhealthy, 1.0),
        ];
        let sample = MetricSample::empty("demo", Utc::now()).with_services(&services);
        assert_eq!(sample.value_for(RuleKind::HighCpu), Some(13.5));
        assert_eq!(sample.value_for(RuleKind::HighMemory), Some(6.0));
        assert_eq!(sample.value_for(RuleKind::ServiceDown), Some(2.0));
        assert_eq!(sample.value_for(RuleKind::HighDisk), None);
    }
}
