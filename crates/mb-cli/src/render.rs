//! Plain-text rendering of engine results. Every function returns a string
//! so output can be snapshot-tested; `now` pins relative timestamps.

use chrono::{DateTime, Utc};

use mb_core::models::{
    Alert, AlertRule, AlertStats, Credentials, HardeningReport, HealthStatus, Instance,
    ProbeResult, SecurityReport, ServiceState, ServiceStatus, Severity,
};

/// Left-aligned columns separated by two spaces. The last column is not
/// padded.
pub fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let header: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    let mut out = String::new();
    for row in std::iter::once(&header).chain(rows.iter()) {
        let last = row.len().saturating_sub(1);
        let line: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                if i == last {
                    cell.clone()
                } else {
                    format!("{cell:<width$}", width = widths[i])
                }
            })
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    }
    out
}

pub fn format_duration(d: chrono::Duration) -> String {
    let total_secs = d.num_seconds().max(0);
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if days > 0 {
        format!("{days}d {hours:02}h")
    } else if hours > 0 {
        format!("{hours}h {mins:02}m")
    } else if mins > 0 {
        format!("{mins}m {secs:02}s")
    } else {
        format!("{secs}s")
    }
}

fn ago(now: DateTime<Utc>, then: DateTime<Utc>) -> String {
    format!("{} ago", format_duration(now.signed_duration_since(then)))
}

pub fn instances(list: &[Instance]) -> String {
    if list.is_empty() {
        return "no instances\n".to_string();
    }
    let rows: Vec<Vec<String>> = list
        .iter()
        .map(|i| {
            let services = i
                .health
                .as_ref()
                .map(|h| format!("{}/{}", h.healthy_services, h.total_services))
                .unwrap_or_else(|| "-".to_string());
            vec![
                i.name.clone(),
                i.status.to_string(),
                services,
                i.api_url(),
                i.studio_url(),
            ]
        })
        .collect();
    table(&["NAME", "STATUS", "HEALTHY", "API", "STUDIO"], &rows)
}

pub fn instance_detail(instance: &Instance, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let field = |label: &str, value: &str| format!("  {label:<10} {value}\n");
    out.push_str(&format!("{}\n", instance.name));
    out.push_str(&field("Status", &instance.status.to_string()));
    out.push_str(&field("API", &instance.api_url()));
    out.push_str(&field("Studio", &instance.studio_url()));
    out.push_str(&field("Directory", &instance.directory.display().to_string()));
    out.push_str(&field("Config", &format!("v{}", instance.config_version)));
    out.push_str(&field("Created", &ago(now, instance.created_at)));
    out.push_str(&field("Updated", &ago(now, instance.updated_at)));
    let ports: Vec<String> = instance
        .ports
        .entries()
        .iter()
        .map(|(name, port)| format!("{name}={port}"))
        .collect();
    out.push_str(&field("Ports", &ports.join(", ")));
    if !instance.services.is_empty() {
        out.push('\n');
        out.push_str(&services(&instance.services));
    }
    out
}

pub fn services(list: &[ServiceStatus]) -> String {
    let rows: Vec<Vec<String>> = list
        .iter()
        .map(|s| {
            vec![
                s.name.clone(),
                state_label(s.state).to_string(),
                probe_label(s.health).to_string(),
                format!("{:.1}%", s.cpu_percent),
                format!("{:.1}%", s.memory_percent),
                s.uptime.clone().unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();
    table(&["SERVICE", "STATE", "HEALTH", "CPU", "MEM", "UPTIME"], &rows)
}

fn state_label(state: ServiceState) -> &'static str {
    match state {
        ServiceState::Running => "running",
        ServiceState::Stopped => "stopped",
        ServiceState::Starting => "starting",
    }
}

fn probe_label(probe: ProbeResult) -> &'static str {
    match probe {
        ProbeResult::Healthy => "healthy",
        ProbeResult::Unhealthy => "unhealthy",
        ProbeResult::Unknown => "-",
    }
}

pub fn health(name: &str, status: &HealthStatus) -> String {
    format!(
        "{name}: {} ({} healthy, {} running, {} total)\n",
        status.overall, status.healthy_services, status.running_services, status.total_services
    )
}

/// The keys a client needs after rotation. Printed once, never logged.
pub fn api_keys(name: &str, credentials: &Credentials) -> String {
    format!(
        "{name}: keys rotated, restart the instance to apply\n  anon key          {}\n  service role key  {}\n",
        credentials.anon_key, credentials.service_role_key
    )
}

pub fn rules(list: &[AlertRule]) -> String {
    if list.is_empty() {
        return "no alert rules\n".to_string();
    }
    let rows: Vec<Vec<String>> = list
        .iter()
        .map(|r| {
            vec![
                r.id.clone(),
                r.instance_id.clone(),
                r.name.clone(),
                r.kind.to_string(),
                format!("{} {}", r.condition, r.threshold),
                format!("{}s", r.duration_secs),
                if r.enabled { "yes" } else { "no" }.to_string(),
            ]
        })
        .collect();
    table(
        &["ID", "INSTANCE", "NAME", "KIND", "WHEN", "FOR", "ENABLED"],
        &rows,
    )
}

pub fn alerts(list: &[Alert], now: DateTime<Utc>) -> String {
    if list.is_empty() {
        return "no alerts\n".to_string();
    }
    let rows: Vec<Vec<String>> = list
        .iter()
        .map(|a| {
            vec![
                a.id.clone(),
                a.instance_id.clone(),
                a.status.to_string(),
                ago(now, a.triggered_at),
                a.message.clone(),
            ]
        })
        .collect();
    table(&["ID", "INSTANCE", "STATUS", "TRIGGERED", "MESSAGE"], &rows)
}

pub fn alert_stats(scope: Option<&str>, stats: &AlertStats) -> String {
    format!(
        "{}: {} total, {} active, {} acknowledged, {} resolved\n",
        scope.unwrap_or("all instances"),
        stats.total,
        stats.active,
        stats.acknowledged,
        stats.resolved
    )
}

pub fn security_report(report: &SecurityReport) -> String {
    if report.is_clean() {
        return format!("{}: no security issues found
", report.instance);
    }
    let rows: Vec<Vec<String>> = report
        .findings
        .iter()
        .map(|f| vec![f.severity.to_string(), f.area.to_string(), f.message.clone()])
        .collect();
    let mut out = table(&["SEVERITY", "AREA", "FINDING"], &rows);
    out.push_str(&format!(
        "
{}: {} critical, {} warning, run `multibase harden {}` to fix
",
        report.instance,
        report.count(Severity::Critical),
        report.count(Severity::Warning),
        report.instance
    ));
    out
}

pub fn hardening(name: &str, report: &HardeningReport) -> String {
    if !report.changed() {
        return format!("{name}: already hardened, nothing changed
");
    }
    let mut out = format!("{name}: hardened, restart the instance to apply
");
    for change in &report.changes {
        out.push_str(&format!("  - {change}
"));
    }
    for backup in &report.backups {
        out.push_str(&format!("  backup {}
", backup.display()));
    }
    out
}
