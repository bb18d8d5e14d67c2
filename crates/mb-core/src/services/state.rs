use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::io::AsyncWriteExt;

use crate::error::{FleetError, Result};
use crate::models::InstanceMetadata;
use crate::services::env_file::EnvConfig;
use crate::services::materializer::{ENV_FILE, write_env};

pub const INSTANCES_DIR: &str = "instances";
pub const METADATA_FILE: &str = "instance.json";
const MAX_BACKUPS_PER_SECOND: usize = 1000;

/// Filesystem layout of the fleet: one directory per instance under
/// `<root>/instances`. A directory existing is what makes an instance exist.
#[derive(Debug, Clone)]
pub struct InstanceStore {
    instances_dir: PathBuf,
}

impl InstanceStore {
    pub fn new(fleet_root: &Path) -> Self {
        Self {
            instances_dir: fleet_root.join(INSTANCES_DIR),
        }
    }

    pub fn instances_dir(&self) -> &Path {
        &self.instances_dir
    }

    pub fn instance_dir(&self, name: &str) -> PathBuf {
        self.instances_dir.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.instance_dir(name).is_dir()
    }

    /// Names of all instance directories, sorted.
    pub async fn list_names(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.instances_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Claim the directory for a new instance. `create_dir` is atomic, so of
    /// two racing creators exactly one wins; the other gets `AlreadyExists`.
    pub async fn claim_directory(&self, name: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.instances_dir).await?;
        let dir = self.instance_dir(name);
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => Ok(dir),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(FleetError::AlreadyExists(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn load_metadata(&self, name: &str) -> Result<InstanceMetadata> {
        let path = self.instance_dir(name).join(METADATA_FILE);
        let json = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| FleetError::State(format!("failed to read {}: {e}", path.display())))?;
        let meta: InstanceMetadata = serde_json::from_str(&json)
            .map_err(|e| FleetError::State(format!("corrupt {}: {e}", path.display())))?;
        if meta.name != name {
            return Err(FleetError::State(format!(
                "{} names instance '{}'",
                path.display(),
                meta.name
            )));
        }
        Ok(meta)
    }

    pub async fn save_metadata(&self, meta: &InstanceMetadata) -> Result<()> {
        let path = self.instance_dir(&meta.name).join(METADATA_FILE);
        let json = serde_json::to_string_pretty(meta)?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| FleetError::State(format!("failed to write {}: {e}", path.display())))?;
        Ok(())
    }

    pub async fn load_env(&self, name: &str) -> Result<EnvConfig> {
        let path = self.instance_dir(name).join(ENV_FILE);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| FleetError::State(format!("failed to read {}: {e}", path.display())))?;
        EnvConfig::parse(&content)
    }

    pub async fn save_env(&self, name: &str, env: &EnvConfig) -> Result<()> {
        write_env(&self.instance_dir(name), env).await
    }

    /// Copy `.env` to `.env.bak.<YYYYmmddHHMMSS>` and return the backup path.
    pub async fn backup_env(&self, name: &str) -> Result<PathBuf> {
        self.backup_file(name, Path::new(ENV_FILE)).await
    }

    /// Copy a file of the instance beside itself as
    /// `<file>.bak.<YYYYmmddHHMMSS>`. An existing backup is never
    /// overwritten: later backups in the same second get a `.1`, `.2`, ...
    /// suffix.
    pub async fn backup_file(&self, name: &str, relative: &Path) -> Result<PathBuf> {
        let source = self.instance_dir(name).join(relative);
        let content = tokio::fs::read(&source)
            .await
            .map_err(|e| FleetError::State(format!("failed to read {}: {e}", source.display())))?;
        let file_name = relative
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FleetError::Validation(format!("cannot back up {}", relative.display())))?;
        let stamp = Utc::now().format("%Y%m%d%H%M%S");

        for attempt in 0..MAX_BACKUPS_PER_SECOND {
            let backup_name = match attempt {
                0 => format!("{file_name}.bak.{stamp}"),
                n => format!("{file_name}.bak.{stamp}.{n}"),
            };
            let backup = source.with_file_name(backup_name);
            let mut file = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&backup)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            };
            file.write_all(&content).await?;
            file.flush().await?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                tokio::fs::set_permissions(&backup, std::fs::Permissions::from_mode(0o600)).await?;
            }
            return Ok(backup);
        }
        Err(FleetError::State(format!(
            "too many backups of {} within one second",
            source.display()
        )))
    }
}
