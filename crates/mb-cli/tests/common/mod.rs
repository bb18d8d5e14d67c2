// Each test binary compiles this module independently and uses a different
// subset of helpers, so unused-function warnings are expected.
#![allow(dead_code)]

use chrono::{DateTime, TimeDelta, Utc};

use mb_core::models::{
    Alert, AlertRule, AlertStatus, Condition, Credentials, HealthStatus, Instance, InstanceStatus,
    OverallHealth, PortSet, RuleKind,
};

/// Fixed clock for deterministic relative timestamps.
pub fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-05-04T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    now() - TimeDelta::minutes(minutes)
}

pub fn ports(base: u16) -> PortSet {
    PortSet {
        gateway_http: base,
        gateway_https: base + 443,
        admin_ui: base + 2000,
        database: base + 1000,
        pool_proxy: base + 1001,
        telemetry: base + 3000,
    }
}

fn credentials() -> Credentials {
    Credentials {
        jwt_secret: "jwt".into(),
        anon_key: "anon.jwt.token".into(),
        service_role_key: "service.jwt.token".into(),
        postgres_password: "pg".into(),
        dashboard_username: "supabase".into(),
        dashboard_password: "dashboard".into(),
        secret_key_base: "base".into(),
        vault_enc_key: "vault".into(),
        logflare_api_key: "logflare".into(),
    }
}

/// Build an instance with the given name, status and gateway port.
pub fn make_instance(name: &str, status: InstanceStatus, base: u16) -> Instance {
    let health = (status != InstanceStatus::Stopped).then(|| HealthStatus {
        overall: OverallHealth::Healthy,
        healthy_services: 13,
        running_services: 13,
        total_services: 13,
        last_checked: now(),
    });
    Instance {
        name: name.to_string(),
        directory: format!("/srv/fleet/instances/{name}").into(),
        ports: ports(base),
        credentials: credentials(),
        status,
        services: Vec::new(),
        health,
        config_version: 1,
        created_at: minutes_ago(60),
        updated_at: minutes_ago(60),
    }
}

pub fn make_rule(id: &str, instance: &str, name: &str, kind: RuleKind, threshold: f64) -> AlertRule {
    AlertRule {
        id: id.to_string(),
        instance_id: instance.to_string(),
        name: name.to_string(),
        kind,
        condition: Condition::GreaterThan,
        threshold,
        duration_secs: 0,
        enabled: true,
        notification_targets: Vec::new(),
        created_at: now(),
        updated_at: now(),
    }
}

pub fn make_alert(id: &str, status: AlertStatus, message: &str, triggered_minutes_ago: i64) -> Alert {
    Alert {
        id: id.to_string(),
        rule_id: "r-1".into(),
        instance_id: "alpha".into(),
        rule_name: "cpu high".into(),
        kind: RuleKind::HighCpu,
        condition: Condition::GreaterThan,
        threshold: 80.0,
        value: 85.0,
        status,
        message: message.to_string(),
        triggered_at: minutes_ago(triggered_minutes_ago),
        acknowledged_at: None,
        resolved_at: None,
    }
}
