use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::{FleetError, Result};
use crate::models::{ContainerInfo, ContainerStats, ProbeResult, ServiceState, ServiceStatus};

static SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([0-9]+(?:\.[0-9]+)?)\s*([KkMGT]i?B|B)\s*$").unwrap());

static UPTIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Up\s+(.+?)(?:\s+\((?:healthy|unhealthy|health: starting|Paused)\))?\s*$").unwrap()
});

/// `compose ps --format json` output. Older runtimes print one JSON array,
/// newer ones one object per line.
pub fn parse_ps(output: &str) -> Result<Vec<ContainerInfo>> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    trimmed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(FleetError::from))
        .collect()
}

#[derive(Debug, Deserialize)]
struct RawStats {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "CPUPerc", default)]
    cpu_perc: String,
    #[serde(rename = "MemUsage", default)]
    mem_usage: String,
    #[serde(rename = "MemPerc", default)]
    mem_perc: String,
}

/// `stats --no-stream --format '{{json .}}'` output, one object per line.
/// Figures that cannot be parsed (e.g. `--` for a stopping container) read
/// as zero.
pub fn parse_stats(output: &str) -> Result<Vec<ContainerStats>> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let raw: RawStats = serde_json::from_str(line)?;
            let used = raw.mem_usage.split('/').next().unwrap_or_default();
            Ok(ContainerStats {
                name: raw.name,
                cpu_percent: parse_percent(&raw.cpu_perc).unwrap_or(0.0),
                memory_bytes: parse_size(used).unwrap_or(0),
                memory_percent: parse_percent(&raw.mem_perc).unwrap_or(0.0),
            })
        })
        .collect()
}

pub fn parse_percent(raw: &str) -> Option<f64> {
    raw.trim().trim_end_matches('%').trim().parse().ok()
}

pub fn parse_size(raw: &str) -> Option<u64> {
    let caps = SIZE_RE.captures(raw)?;
    let value: f64 = caps[1].parse().ok()?;
    let multiplier: f64 = match &caps[2] {
        "B" => 1.0,
        "kB" | "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        "KiB" | "kiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some((value * multiplier).round() as u64)
}

/// Duration part of an `Up 5 minutes (healthy)` status line.
pub fn parse_uptime(status: &str) -> Option<String> {
    UPTIME_RE
        .captures(status.trim())
        .map(|caps| caps[1].to_string())
}

pub fn service_state(info: &ContainerInfo) -> ServiceState {
    match info.state.to_ascii_lowercase().as_str() {
        "running" if info.health.eq_ignore_ascii_case("starting") => ServiceState::Starting,
        "running" => ServiceState::Running,
        "restarting" | "created" => ServiceState::Starting,
        _ => ServiceState::Stopped,
    }
}

pub fn probe_result(info: &ContainerInfo) -> ProbeResult {
    match info.health.to_ascii_lowercase().as_str() {
        "healthy" => ProbeResult::Healthy,
        "unhealthy" => ProbeResult::Unhealthy,
        _ => ProbeResult::Unknown,
    }
}

/// Joins one container row with its resource usage, if the runtime
/// reported any.
pub fn to_service_status(info: &ContainerInfo, stats: Option<&ContainerStats>) -> ServiceStatus {
    let state = service_state(info);
    ServiceStatus {
        name: info.service.clone(),
        container_name: info.name.clone(),
        state,
        health: probe_result(info),
        uptime: (state != ServiceState::Stopped)
            .then(|| parse_uptime(&info.status))
            .flatten(),
        cpu_percent: stats.map(|s| s.cpu_percent).unwrap_or(0.0),
        memory_bytes: stats.map(|s| s.memory_bytes).unwrap_or(0),
        memory_percent: stats.map(|s| s.memory_percent).unwrap_or(0.0),
    }
}
