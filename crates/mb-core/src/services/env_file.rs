use crate::error::{FleetError, Result};
use crate::models::{Credentials, PortSet};

const VERSION_HEADER: &str = "# multibase-env v";

pub const POSTGRES_PASSWORD: &str = "POSTGRES_PASSWORD";
pub const JWT_SECRET: &str = "JWT_SECRET";
pub const ANON_KEY: &str = "ANON_KEY";
pub const SERVICE_ROLE_KEY: &str = "SERVICE_ROLE_KEY";
pub const DASHBOARD_USERNAME: &str = "DASHBOARD_USERNAME";
pub const DASHBOARD_PASSWORD: &str = "DASHBOARD_PASSWORD";
pub const SECRET_KEY_BASE: &str = "SECRET_KEY_BASE";
pub const VAULT_ENC_KEY: &str = "VAULT_ENC_KEY";
pub const LOGFLARE_API_KEY: &str = "LOGFLARE_API_KEY";
pub const LOGFLARE_LOGGER_BACKEND_API_KEY: &str = "LOGFLARE_LOGGER_BACKEND_API_KEY";

pub const KONG_HTTP_PORT: &str = "KONG_HTTP_PORT";
pub const KONG_HTTPS_PORT: &str = "KONG_HTTPS_PORT";
pub const STUDIO_PORT: &str = "STUDIO_PORT";
pub const POSTGRES_PORT: &str = "POSTGRES_PORT";
pub const POOLER_PROXY_PORT_TRANSACTION: &str = "POOLER_PROXY_PORT_TRANSACTION";
pub const ANALYTICS_PORT: &str = "ANALYTICS_PORT";

/// Characters an operator-supplied value must not contain. Values are
/// written unquoted, one per line, and the gateway entrypoint expands its
/// config inside a double-quoted shell string.
const UNSAFE_VALUE_CHARS: &[char] = &['#', '"', '\'', '`', '$', '\\'];

/// Reject a value that would not survive a round trip through `.env`
/// unchanged, or that could smuggle in another key.
pub fn check_value(key: &str, value: &str) -> Result<()> {
    if let Some(c) = value
        .chars()
        .find(|c| c.is_control() || c.is_whitespace() || UNSAFE_VALUE_CHARS.contains(c))
    {
        let shown = if c.is_control() || c.is_whitespace() {
            format!("{:?}", c)
        } else {
            format!("'{c}'")
        };
        return Err(FleetError::Validation(format!(
            "{key} must not contain whitespace, control characters or {shown}"
        )));
    }
    Ok(())
}

/// The instance's `.env` as an explicit, ordered key-value record.
///
/// The first line of the rendered file carries the config version, bumped on
/// every credential change. Key order is preserved across parse and render
/// so diffs between backups stay readable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    version: u32,
    entries: Vec<(String, String)>,
}

impl EnvConfig {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            entries: Vec::new(),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn bump_version(&mut self) -> u32 {
        self.version += 1;
        self.version
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replaces the value in place, or appends a new entry.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| FleetError::State(format!("missing {key} in instance environment")))
    }

    fn require_port(&self, key: &str) -> Result<u16> {
        let raw = self.require(key)?;
        raw.parse()
            .map_err(|_| FleetError::State(format!("{key} is not a port: '{raw}'")))
    }

    pub fn render(&self) -> String {
        let mut out = format!("{VERSION_HEADER}{}\n", self.version);
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut version = None;
        let mut entries = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if let Some(v) = line.strip_prefix(VERSION_HEADER) {
                version = Some(v.trim().parse().map_err(|_| {
                    FleetError::State(format!("bad env version header '{line}'"))
                })?);
                continue;
            }
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(FleetError::State(format!(
                    "malformed env line {}: '{line}'",
                    lineno + 1
                )));
            };
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            entries.push((key.trim().to_string(), value.to_string()));
        }
        Ok(Self {
            // Files written before versioning count as the first version.
            version: version.unwrap_or(1),
            entries,
        })
    }

    pub fn ports(&self) -> Result<PortSet> {
        Ok(PortSet {
            gateway_http: self.require_port(KONG_HTTP_PORT)?,
            gateway_https: self.require_port(KONG_HTTPS_PORT)?,
            admin_ui: self.require_port(STUDIO_PORT)?,
            database: self.require_port(POSTGRES_PORT)?,
            pool_proxy: self.require_port(POOLER_PROXY_PORT_TRANSACTION)?,
            telemetry: self.require_port(ANALYTICS_PORT)?,
        })
    }

    pub fn set_ports(&mut self, ports: &PortSet) {
        self.set(KONG_HTTP_PORT, ports.gateway_http.to_string());
        self.set(KONG_HTTPS_PORT, ports.gateway_https.to_string());
        self.set(STUDIO_PORT, ports.admin_ui.to_string());
        self.set(POSTGRES_PORT, ports.database.to_string());
        self.set(POOLER_PROXY_PORT_TRANSACTION, ports.pool_proxy.to_string());
        self.set(ANALYTICS_PORT, ports.telemetry.to_string());
    }

    pub fn credentials(&self) -> Result<Credentials> {
        Ok(Credentials {
            jwt_secret: self.require(JWT_SECRET)?.to_string(),
            anon_key: self.require(ANON_KEY)?.to_string(),
            service_role_key: self.require(SERVICE_ROLE_KEY)?.to_string(),
            postgres_password: self.require(POSTGRES_PASSWORD)?.to_string(),
            dashboard_username: self.require(DASHBOARD_USERNAME)?.to_string(),
            dashboard_password: self.require(DASHBOARD_PASSWORD)?.to_string(),
            secret_key_base: self.require(SECRET_KEY_BASE)?.to_string(),
            vault_enc_key: self.require(VAULT_ENC_KEY)?.to_string(),
            logflare_api_key: self.require(LOGFLARE_API_KEY)?.to_string(),
        })
    }

    pub fn set_credentials(&mut self, creds: &Credentials) {
        self.set(POSTGRES_PASSWORD, creds.postgres_password.as_str());
        self.set(JWT_SECRET, creds.jwt_secret.as_str());
        self.set(ANON_KEY, creds.anon_key.as_str());
        self.set(SERVICE_ROLE_KEY, creds.service_role_key.as_str());
        self.set(DASHBOARD_USERNAME, creds.dashboard_username.as_str());
        self.set(DASHBOARD_PASSWORD, creds.dashboard_password.as_str());
        self.set(SECRET_KEY_BASE, creds.secret_key_base.as_str());
        self.set(VAULT_ENC_KEY, creds.vault_enc_key.as_str());
        self.set(LOGFLARE_LOGGER_BACKEND_API_KEY, creds.logflare_api_key.as_str());
        self.set(LOGFLARE_API_KEY, creds.logflare_api_key.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_in_place() {
        let mut env = EnvConfig::new(1);
        env.set("A", "1");
        env.set("B", "2");
        env.set("A", "3");
        let keys: Vec<_> = env.entries().collect();
        assert_eq!(keys, vec![("A", "3"), ("B", "2")]);
    }

    #[test]
    fn render_then_parse_keeps_version_and_order() {
        let mut env = EnvConfig::new(4);
        env.set("POSTGRES_HOST", "db");
        env.set("SITE_URL", "http://localhost:3000");
        let text = env.render();
        assert!(text.starts_with("# multibase-env v4\n"));
        assert_eq!(EnvConfig::parse(&text).unwrap(), env);
    }

    #[test]
    fn parse_strips_quotes_and_skips_comments() {
        let text = "############\n# Secrets\n\nSTUDIO_DEFAULT_PROJECT=\"demo\"\nEMPTY=\n";
        let env = EnvConfig::parse(text).unwrap();
        assert_eq!(env.version(), 1);
        assert_eq!(env.get("STUDIO_DEFAULT_PROJECT"), Some("demo"));
        assert_eq!(env.get("EMPTY"), Some(""));
        assert!(env.require("EMPTY").is_err());
    }

    #[test]
    fn check_value_rejects_line_breaks_and_shell_characters() {
        assert!(check_value(DASHBOARD_PASSWORD, "correct-horse_42").is_ok());
        assert!(check_value(DASHBOARD_PASSWORD, "with=equals").is_ok());
        for bad in [
            "longenough\nKONG_HTTP_PORT=1",
            "carriage\rreturn",
            " padded-pass",
            "inner space",
            "pa$$word99",
            "quote\"d-pass",
            "back`tick`99",
            "hash#comment",
        ] {
            assert!(
                matches!(check_value(DASHBOARD_PASSWORD, bad), Err(FleetError::Validation(_))),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn malformed_line_is_rejected() {
        let err = EnvConfig::parse("JWT_SECRET=x\nnot a pair\n").unwrap_err();
        assert!(matches!(err, FleetError::State(_)));
    }

    #[test]
    fn ports_must_be_numeric() {
        let mut env = EnvConfig::new(1);
        env.set_ports(&PortSet {
            gateway_http: 8000,
            gateway_https: 8443,
            admin_ui: 10000,
            database: 9000,
            pool_proxy: 9001,
            telemetry: 11000,
        });
        assert_eq!(env.ports().unwrap().pool_proxy, 9001);
        env.set(POSTGRES_PORT, "abc");
        assert!(env.ports().is_err());
    }
}
