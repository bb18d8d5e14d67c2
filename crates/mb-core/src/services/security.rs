//! Static security checks of an instance's `.env` and gateway config, and
//! the in-place fixes applied to instances generated before hardening.

use serde_yaml::Value;

use crate::error::Result;
use crate::models::{AuditArea, SecurityFinding};
use crate::services::env_file::{
    ANON_KEY, DASHBOARD_PASSWORD, DASHBOARD_USERNAME, EnvConfig, JWT_SECRET, POSTGRES_PASSWORD,
    SERVICE_ROLE_KEY,
};
use crate::services::secrets::{token_claims, token_signed_with};
use crate::services::templates::{RATE_LIMIT_PLUGIN, rate_limit_plugin};

pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Values shipped by the upstream self-hosting example. Anyone can forge
/// tokens for an instance still using them.
const UPSTREAM_JWT_SECRET: &str = "your-super-secret-jwt-token-with-at-least-32-characters-long";
const UPSTREAM_POSTGRES_PASSWORD: &str = "your-super-secret-and-long-postgres-password";
const UPSTREAM_TOKEN_ISSUER: &str = "supabase-demo";
const UPSTREAM_DASHBOARD: (&str, &str) = ("supabase", "this_password_is_insecure_and_should_be_updated");

/// Auth flags that must be off unless an SMS provider is configured.
const PHONE_FLAGS: &[&str] = &["ENABLE_PHONE_SIGNUP", "ENABLE_PHONE_AUTOCONFIRM"];

const KONG_PLUGINS_KEY: &str = "KONG_PLUGINS:";

pub fn audit_env(name: &str, env: &EnvConfig) -> Vec<SecurityFinding> {
    let area = AuditArea::Environment;
    let mut findings = Vec::new();

    match env.get(JWT_SECRET).filter(|s| !s.is_empty()) {
        None => findings.push(SecurityFinding::critical(area, "JWT_SECRET is not set")),
        Some(UPSTREAM_JWT_SECRET) => findings.push(SecurityFinding::critical(
            area,
            "JWT_SECRET is the public example secret",
        )),
        Some(secret) if secret.chars().count() < MIN_JWT_SECRET_LEN => {
            findings.push(SecurityFinding::critical(
                area,
                format!(
                    "JWT_SECRET is {} characters, at least {MIN_JWT_SECRET_LEN} are needed",
                    secret.chars().count()
                ),
            ))
        }
        Some(secret) => {
            for key in [ANON_KEY, SERVICE_ROLE_KEY] {
                match env.get(key).filter(|t| !t.is_empty()) {
                    None => findings.push(SecurityFinding::critical(area, format!("{key} is not set"))),
                    Some(token) if !token_signed_with(secret, token) => {
                        findings.push(SecurityFinding::critical(
                            area,
                            format!("{key} is not signed with JWT_SECRET"),
                        ))
                    }
                    Some(_) => {}
                }
            }
        }
    }

    for key in [ANON_KEY, SERVICE_ROLE_KEY] {
        let issuer = env
            .get(key)
            .and_then(token_claims)
            .and_then(|claims| claims["iss"].as_str().map(str::to_string));
        if issuer.as_deref() == Some(UPSTREAM_TOKEN_ISSUER) {
            findings.push(SecurityFinding::critical(
                area,
                format!("{key} is the public example key"),
            ));
        }
    }

    if env.get(POSTGRES_PASSWORD) == Some(UPSTREAM_POSTGRES_PASSWORD) {
        findings.push(SecurityFinding::critical(
            area,
            "POSTGRES_PASSWORD is the public example password",
        ));
    }

    let username = env.get(DASHBOARD_USERNAME).unwrap_or_default();
    let password = env.get(DASHBOARD_PASSWORD).unwrap_or_default();
    if (username, password) == UPSTREAM_DASHBOARD || (username, password) == ("supabase", "supabase") {
        findings.push(SecurityFinding::critical(
            area,
            "dashboard still uses the default credentials",
        ));
    } else if password == name {
        findings.push(SecurityFinding::warning(
            area,
            "dashboard password is the instance name",
        ));
    }

    for flag in PHONE_FLAGS {
        if env.get(flag) == Some("true") {
            findings.push(SecurityFinding::warning(
                area,
                format!("{flag} is enabled without an SMS provider"),
            ));
        }
    }

    findings
}

/// Unix mode bits of `.env` that let anyone but the owner read it.
pub fn audit_env_mode(mode: u32) -> Option<SecurityFinding> {
    (mode & 0o077 != 0).then(|| {
        SecurityFinding::warning(
            AuditArea::Environment,
            format!(".env is readable by other users (mode {:o})", mode & 0o777),
        )
    })
}

pub fn audit_gateway(kong_yaml: &str) -> Vec<SecurityFinding> {
    let area = AuditArea::Gateway;
    let doc: Value = match serde_yaml::from_str(kong_yaml) {
        Ok(doc) => doc,
        Err(e) => {
            return vec![SecurityFinding::critical(
                area,
                format!("gateway config is not valid YAML: {e}"),
            )];
        }
    };
    let Some(services) = doc["services"].as_sequence() else {
        return vec![SecurityFinding::critical(area, "gateway config defines no services")];
    };

    let mut findings = Vec::new();
    for service in services {
        let name = service["name"].as_str().unwrap_or("<unnamed>");
        let plugins = service["plugins"].as_sequence().map(Vec::as_slice).unwrap_or_default();
        let plugin = |wanted: &str| plugins.iter().find(|p| p["name"].as_str() == Some(wanted));

        match plugin("cors") {
            None => findings.push(SecurityFinding::warning(area, format!("{name}: CORS is not configured"))),
            Some(cors) => {
                let origins: Vec<&str> = cors["config"]["origins"]
                    .as_sequence()
                    .map(|o| o.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                if origins.is_empty() {
                    findings.push(SecurityFinding::warning(
                        area,
                        format!("{name}: CORS allows any origin"),
                    ));
                } else if origins.contains(&"*") {
                    findings.push(SecurityFinding::warning(
                        area,
                        format!("{name}: CORS origins include '*'"),
                    ));
                }
            }
        }

        if is_auth_service(name) && plugin(RATE_LIMIT_PLUGIN).is_none() {
            findings.push(SecurityFinding::warning(
                area,
                format!("{name}: rate limiting is not configured"),
            ));
        }
    }
    findings
}

fn is_auth_service(name: &str) -> bool {
    name.starts_with("auth-v1")
}

/// Turn the phone auth flags off. Returns a description of each change.
pub fn harden_env(env: &mut EnvConfig) -> Vec<String> {
    let mut changes = Vec::new();
    for flag in PHONE_FLAGS {
        if env.get(flag) != Some("false") {
            env.set(flag, "false");
            changes.push(format!("set {flag}=false"));
        }
    }
    changes
}

/// Add rate limiting to every auth service that lacks it. `None` when the
/// config already complies.
pub fn harden_gateway(kong_yaml: &str) -> Result<Option<String>> {
    let mut doc: Value = serde_yaml::from_str(kong_yaml)?;
    let plugin = serde_yaml::to_value(rate_limit_plugin())?;
    let mut changed = false;
    if let Some(services) = doc.get_mut("services").and_then(Value::as_sequence_mut) {
        for service in services.iter_mut() {
            let auth = service["name"].as_str().is_some_and(is_auth_service);
            if !auth {
                continue;
            }
            let Some(mapping) = service.as_mapping_mut() else {
                continue;
            };
            if !mapping.contains_key("plugins") {
                mapping.insert(Value::from("plugins"), Value::Sequence(Vec::new()));
            }
            let Some(plugins) = mapping.get_mut("plugins").and_then(Value::as_sequence_mut) else {
                continue;
            };
            if !plugins.iter().any(|p| p["name"].as_str() == Some(RATE_LIMIT_PLUGIN)) {
                plugins.push(plugin.clone());
                changed = true;
            }
        }
    }
    if !changed {
        return Ok(None);
    }
    Ok(Some(serde_yaml::to_string(&doc)?))
}

/// Enable the rate limiting plugin in the gateway container. `None` when
/// already enabled or when the compose file sets no plugin list.
pub fn harden_compose(compose: &str) -> Option<String> {
    let mut changed = false;
    let lines: Vec<String> = compose
        .lines()
        .map(|line| {
            if line.trim_start().starts_with(KONG_PLUGINS_KEY) && !line.contains(RATE_LIMIT_PLUGIN) {
                changed = true;
                format!("{},{RATE_LIMIT_PLUGIN}", line.trim_end())
            } else {
                line.to_string()
            }
        })
        .collect();
    changed.then(|| {
        let mut out = lines.join("\n");
        if compose.ends_with('\n') {
            out.push('\n');
        }
        out
    })
}
