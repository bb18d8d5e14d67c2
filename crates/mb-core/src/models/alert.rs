use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FleetError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RuleKind {
    HighCpu,
    HighMemory,
    HighDisk,
    ServiceDown,
    SlowResponse,
}

impl RuleKind {
    /// Name of the metric this kind of rule watches.
    pub fn metric_name(&self) -> &'static str {
        match self {
            RuleKind::HighCpu => "cpu %",
            RuleKind::HighMemory => "memory %",
            RuleKind::HighDisk => "disk %",
            RuleKind::ServiceDown => "services down",
            RuleKind::SlowResponse => "response ms",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RuleKind::HighCpu => "high-cpu",
            RuleKind::HighMemory => "high-memory",
            RuleKind::HighDisk => "high-disk",
            RuleKind::ServiceDown => "service-down",
            RuleKind::SlowResponse => "slow-response",
        };
        f.write_str(label)
    }
}

impl FromStr for RuleKind {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high-cpu" => Ok(RuleKind::HighCpu),
            "high-memory" => Ok(RuleKind::HighMemory),
            "high-disk" => Ok(RuleKind::HighDisk),
            "service-down" => Ok(RuleKind::ServiceDown),
            "slow-response" => Ok(RuleKind::SlowResponse),
            other => Err(FleetError::Validation(format!(
                "unknown rule kind '{other}'"
            ))),
        }
    }
}

/// Comparison applied as `value <condition> threshold`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Condition {
    #[default]
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "==")]
    Equal,
}

impl Condition {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Condition::GreaterThan => value > threshold,
            Condition::GreaterOrEqual => value >= threshold,
            Condition::LessThan => value < threshold,
            Condition::LessOrEqual => value <= threshold,
            Condition::Equal => (value - threshold).abs() < f64::EPSILON,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Condition::GreaterThan => ">",
            Condition::GreaterOrEqual => ">=",
            Condition::LessThan => "<",
            Condition::LessOrEqual => "<=",
            Condition::Equal => "==",
        };
        f.write_str(op)
    }
}

impl FromStr for Condition {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">" | "gt" => Ok(Condition::GreaterThan),
            ">=" | "gte" => Ok(Condition::GreaterOrEqual),
            "<" | "lt" => Ok(Condition::LessThan),
            "<=" | "lte" => Ok(Condition::LessOrEqual),
            "==" | "eq" => Ok(Condition::Equal),
            other => Err(FleetError::Validation(format!(
                "unknown condition '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    pub id: String,
    pub instance_id: String,
    pub name: String,
    pub kind: RuleKind,
    pub condition: Condition,
    pub threshold: f64,
    /// How long the condition must hold before an alert fires.
    pub duration_secs: u64,
    pub enabled: bool,
    #[serde(default)]
    pub notification_targets: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAlertRule {
    pub instance_id: String,
    pub name: String,
    pub kind: RuleKind,
    pub condition: Condition,
    pub threshold: f64,
    pub duration_secs: u64,
    pub enabled: bool,
    pub notification_targets: Vec<String>,
}

impl NewAlertRule {
    pub fn new(instance_id: &str, name: &str, kind: RuleKind, threshold: f64) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            name: name.to_string(),
            kind,
            condition: Condition::default(),
            threshold,
            duration_secs: 0,
            enabled: true,
            notification_targets: Vec::new(),
        }
    }

    pub fn with_duration(mut self, duration_secs: u64) -> Self {
        self.duration_secs = duration_secs;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct AlertRuleUpdate {
    pub name: Option<String>,
    pub condition: Option<Condition>,
    pub threshold: Option<f64>,
    pub duration_secs: Option<u64>,
    pub enabled: Option<bool>,
    pub notification_targets: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    /// Active or acknowledged: the episode has not been closed yet.
    pub fn is_open(&self) -> bool {
        !matches!(self, AlertStatus::Resolved)
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
        };
        f.write_str(label)
    }
}

/// One trigger episode of a rule. The rule fields are a snapshot taken when
/// the alert fired, so later rule edits do not rewrite history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub instance_id: String,
    pub rule_name: String,
    pub kind: RuleKind,
    pub condition: Condition,
    pub threshold: f64,
    pub value: f64,
    pub status: AlertStatus,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub instance_id: Option<String>,
    pub rule_id: Option<String>,
    pub status: Option<AlertStatus>,
}

impl AlertFilter {
    pub fn for_instance(instance_id: &str) -> Self {
        Self {
            instance_id: Some(instance_id.to_string()),
            ..Default::default()
        }
    }

    pub fn matches(&self, alert: &Alert) -> bool {
        self.instance_id
            .as_deref()
            .map_or(true, |id| alert.instance_id == id)
            && self.rule_id.as_deref().map_or(true, |id| alert.rule_id == id)
            && self.status.map_or(true, |s| alert.status == s)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AlertStats {
    pub total: usize,
    pub active: usize,
    pub acknowledged: usize,
    pub resolved: usize,
}

impl AlertStats {
    pub fn record(&mut self, status: AlertStatus) {
        self.total += 1;
        match status {
            AlertStatus::Active => self.active += 1,
            AlertStatus::Acknowledged => self.acknowledged += 1,
            AlertStatus::Resolved => self.resolved += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_kind_round_trips_through_str() {
        for kind in [
            RuleKind::HighCpu,
            RuleKind::HighMemory,
            RuleKind::HighDisk,
            RuleKind::ServiceDown,
            RuleKind::SlowResponse,
        ] {
            assert_eq!(kind.to_string().parse::<RuleKind>().unwrap(), kind);
        }
        assert!("cpu".parse::<RuleKind>().is_err());
    }

    #[test]
    fn rule_kind_uses_kebab_case_in_json() {
        let json = serde_json::to_string(&RuleKind::SlowResponse).unwrap();
        assert_eq!(json, "\"slow-response\"");
    }

    #[test]
    fn condition_semantics() {
        assert!(Condition::GreaterThan.holds(85.0, 80.0));
        assert!(!Condition::GreaterThan.holds(80.0, 80.0));
        assert!(Condition::GreaterOrEqual.holds(80.0, 80.0));
        assert!(Condition::LessThan.holds(1.0, 2.0));
        assert!(Condition::Equal.holds(0.0, 0.0));
        assert_eq!(">=".parse::<Condition>().unwrap(), Condition::GreaterOrEqual);
    }

    #[test]
    fn stats_count_each_status() {
        let mut stats = AlertStats::default();
        stats.record(AlertStatus::Active);
        stats.record(AlertStatus::Resolved);
        stats.record(AlertStatus::Resolved);
        assert_eq!(
            stats,
            AlertStats {
                total: 3,
                active: 1,
                acknowledged: 0,
                resolved: 2
            }
        );
    }
}
