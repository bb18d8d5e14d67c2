use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{FleetError, Result};
use crate::models::{Credentials, PortSet};
use crate::services::env_file::EnvConfig;
use crate::services::templates;

pub const COMPOSE_FILE: &str = "docker-compose.yml";
pub const ENV_FILE: &str = ".env";
pub const DB_DATA_DIR: &str = "volumes/db/data";
pub const KONG_FILE: &str = "volumes/api/kong.yml";
const STORAGE_DIR: &str = "volumes/storage";

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9](?:[a-z0-9-]{0,38}[a-z0-9])?$").unwrap());

/// Instance names double as directory names, compose project names and
/// container name prefixes.
pub fn validate_name(name: &str) -> Result<()> {
    if NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(FleetError::Validation(format!(
            "invalid instance name '{name}': use 1-40 lowercase letters, digits or hyphens, \
             not starting or ending with a hyphen"
        )))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MaterializeOptions {
    /// Extra origins allowed by the gateway on top of the instance's own.
    pub cors_origins: Vec<String>,
    pub config_version: u32,
}

/// Everything written into an instance directory. Paths are relative to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSet {
    pub env: EnvConfig,
    pub files: BTreeMap<PathBuf, String>,
}

impl FileSet {
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(Path::new(ENV_FILE)).chain(self.files.keys().map(PathBuf::as_path))
    }

    pub async fn write_to(&self, dir: &Path) -> Result<()> {
        for (relative, content) in &self.files {
            let path = dir.join(relative);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, content).await?;
        }
        write_env(dir, &self.env).await?;
        for empty in [DB_DATA_DIR, STORAGE_DIR] {
            tokio::fs::create_dir_all(dir.join(empty)).await?;
        }
        Ok(())
    }
}

/// Writes `.env` readable by the owner only.
pub async fn write_env(dir: &Path, env: &EnvConfig) -> Result<()> {
    let path = dir.join(ENV_FILE);
    tokio::fs::write(&path, env.render()).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}

pub fn build_env(name: &str, ports: &PortSet, creds: &Credentials, version: u32) -> EnvConfig {
    let mut env = EnvConfig::new(version.max(1));
    env.set_credentials(creds);
    env.set("POSTGRES_HOST", "db");
    env.set("POSTGRES_DB", "postgres");
    env.set_ports(ports);
    env.set("POOLER_DEFAULT_POOL_SIZE", "20");
    env.set("POOLER_MAX_CLIENT_CONN", "100");
    env.set("POOLER_TENANT_ID", name);
    env.set("PGRST_DB_SCHEMAS", "public,storage,graphql_public");
    env.set("SITE_URL", format!("http://localhost:{}", ports.admin_ui));
    env.set("ADDITIONAL_REDIRECT_URLS", "");
    env.set("JWT_EXPIRY", "3600");
    env.set("DISABLE_SIGNUP", "false");
    env.set("API_EXTERNAL_URL", format!("http://localhost:{}", ports.gateway_http));
    for key in [
        "MAILER_URLPATHS_CONFIRMATION",
        "MAILER_URLPATHS_INVITE",
        "MAILER_URLPATHS_RECOVERY",
        "MAILER_URLPATHS_EMAIL_CHANGE",
    ] {
        env.set(key, "/auth/v1/verify");
    }
    env.set("ENABLE_EMAIL_SIGNUP", "true");
    env.set("ENABLE_EMAIL_AUTOCONFIRM", "true");
    env.set("SMTP_ADMIN_EMAIL", "admin@example.com");
    env.set("SMTP_HOST", "supabase-mail");
    env.set("SMTP_PORT", "2500");
    env.set("SMTP_USER", "fake_mail_user");
    env.set("SMTP_PASS", "fake_mail_password");
    env.set("SMTP_SENDER_NAME", "fake_sender");
    env.set("ENABLE_ANONYMOUS_USERS", "false");
    env.set("ENABLE_PHONE_SIGNUP", "false");
    env.set("ENABLE_PHONE_AUTOCONFIRM", "false");
    env.set("STUDIO_DEFAULT_ORGANIZATION", name);
    env.set("STUDIO_DEFAULT_PROJECT", name);
    env.set("SUPABASE_PUBLIC_URL", format!("http://localhost:{}", ports.gateway_http));
    env.set("IMGPROXY_ENABLE_WEBP_DETECTION", "true");
    env.set("FUNCTIONS_VERIFY_JWT", "false");
    env.set("DOCKER_SOCKET_LOCATION", "/var/run/docker.sock");
    env
}

/// Renders the full file set for one instance. Pure: identical inputs give
/// an identical file set, and nothing touches the filesystem.
pub fn materialize(
    name: &str,
    ports: &PortSet,
    creds: &Credentials,
    options: &MaterializeOptions,
) -> Result<FileSet> {
    validate_name(name)?;
    if !ports.is_pairwise_distinct() {
        return Err(FleetError::Validation(format!(
            "port set for '{name}' reuses a port"
        )));
    }

    let origins = templates::cors_origins(ports, &options.cors_origins);
    let mut files = BTreeMap::new();
    files.insert(
        PathBuf::from(COMPOSE_FILE),
        templates::render_compose(name, ports),
    );
    files.insert(
        PathBuf::from(KONG_FILE),
        templates::render_kong(&origins)?,
    );
    files.insert(
        PathBuf::from("volumes/logs/vector.yml"),
        templates::render_vector(name)?,
    );
    files.insert(
        PathBuf::from("volumes/pooler/pooler.exs"),
        templates::POOLER_EXS.to_string(),
    );
    files.insert(
        PathBuf::from("volumes/db/realtime.sql"),
        templates::REALTIME_SQL.to_string(),
    );
    files.insert(
        PathBuf::from("volumes/db/jwt.sql"),
        templates::JWT_SQL.to_string(),
    );
    files.insert(
        PathBuf::from("volumes/db/_supabase.sql"),
        templates::SUPABASE_SQL.to_string(),
    );
    files.insert(
        PathBuf::from("volumes/db/logs.sql"),
        templates::LOGS_SQL.to_string(),
    );
    files.insert(
        PathBuf::from("volumes/functions/main/index.ts"),
        templates::FUNCTION_MAIN.to_string(),
    );

    Ok(FileSet {
        env: build_env(name, ports, creds, options.config_version),
        files,
    })
}
