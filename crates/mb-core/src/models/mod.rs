pub mod alert;
pub mod config;
pub mod health;
pub mod instance;
pub mod metrics;
pub mod security;
pub mod service;

pub use alert::{
    Alert, AlertFilter, AlertRule, AlertRuleUpdate, AlertStats, AlertStatus, Condition,
    NewAlertRule, RuleKind,
};
pub use config::FleetConfig;
pub use health::{HealthStatus, OverallHealth};
pub use instance::{
    CreateInstanceRequest, CredentialUpdate, Credentials, Instance, InstanceMetadata,
    InstanceStatus, PortSet,
};
pub use metrics::MetricSample;
pub use security::{AuditArea, HardeningReport, SecurityFinding, SecurityReport, Severity};
pub use service::{ContainerInfo, ContainerStats, ProbeResult, ServiceState, ServiceStatus};
