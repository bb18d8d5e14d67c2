use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        })
    }
}

/// Which part of the instance a finding is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditArea {
    Environment,
    Gateway,
}

impl fmt::Display for AuditArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuditArea::Environment => "env",
            AuditArea::Gateway => "gateway",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityFinding {
    pub severity: Severity,
    pub area: AuditArea,
    pub message: String,
}

impl SecurityFinding {
    pub fn warning(area: AuditArea, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            area,
            message: message.into(),
        }
    }

    pub fn critical(area: AuditArea, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Critical,
            area,
            message: message.into(),
        }
    }
}

/// Result of a static audit of one instance's configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityReport {
    pub instance: String,
    pub findings: Vec<SecurityFinding>,
}

impl SecurityReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }
}

/// What hardening changed. Empty when the instance already complied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardeningReport {
    pub changes: Vec<String>,
    pub backups: Vec<PathBuf>,
    pub config_version: u32,
}

impl HardeningReport {
    pub fn changed(&self) -> bool {
        !self.changes.is_empty()
    }
}
