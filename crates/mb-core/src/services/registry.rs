use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{FleetError, Result};
use crate::models::{
    AuditArea, CreateInstanceRequest, CredentialUpdate, Credentials, FleetConfig,
    HardeningReport, HealthStatus, Instance, InstanceMetadata, InstanceStatus, PortSet,
    SecurityFinding, SecurityReport, ServiceStatus,
};
use crate::services::env_file::{self, DASHBOARD_PASSWORD, DASHBOARD_USERNAME};
use crate::services::file_lock::FileLock;
use crate::services::health::{self, HealthCache};
use crate::services::materializer::{
    self, COMPOSE_FILE, DB_DATA_DIR, KONG_FILE, MaterializeOptions,
};
use crate::services::ports::PortAllocator;
use crate::services::runtime::{ContainerRuntime, RuntimeDriver, StackRef, remove_dir_if_exists};
use crate::services::secrets::{RandomSecrets, SecretsGenerator};
use crate::services::security;
use crate::services::state::InstanceStore;

const MIN_DASHBOARD_USERNAME: usize = 4;
const MIN_DASHBOARD_PASSWORD: usize = 8;

/// Lock files live here, outside the instance directories so they outlive
/// a delete.
pub const LOCKS_DIR: &str = "locks";
/// Serializes instance creation across processes.
pub const FLEET_LOCK: &str = "fleet.lock";

/// Entry point for instance lifecycle. Holds no instance state of its own:
/// every record is rebuilt from the instance directory and a live runtime
/// query.
pub struct InstanceRegistry {
    fleet_lock: PathBuf,
    store: InstanceStore,
    driver: RuntimeDriver,
    ports: PortAllocator,
    secrets: Arc<dyn SecretsGenerator>,
    health: HealthCache,
    config: FleetConfig,
}

impl InstanceRegistry {
    pub fn new(fleet_root: &Path, config: FleetConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            fleet_lock: fleet_root.join(FLEET_LOCK),
            store: InstanceStore::new(fleet_root),
            driver: RuntimeDriver::new(runtime, fleet_root.join(LOCKS_DIR)),
            ports: PortAllocator::new(config.port_scan_limit),
            secrets: Arc::new(RandomSecrets::new(config.jwt_expiry_years)),
            health: HealthCache::new(config.health_cache_ttl()),
            config,
        }
    }

    pub fn with_secrets(mut self, secrets: Arc<dyn SecretsGenerator>) -> Self {
        self.secrets = secrets;
        self
    }

    /// Build a registry and seed the port allocator from existing instances.
    pub async fn open(
        fleet_root: &Path,
        config: FleetConfig,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self> {
        let registry = Self::new(fleet_root, config, runtime);
        registry.load().await?;
        Ok(registry)
    }

    /// Reserve the ports of every instance on disk, running or not. Returns
    /// how many instances were seen.
    pub async fn load(&self) -> Result<usize> {
        let count = self.reserve_existing(None).await?;
        tracing::debug!(count, "loaded instances");
        Ok(count)
    }

    /// Reserve the ports recorded on disk, which includes instances other
    /// processes created since this registry was opened.
    async fn reserve_existing(&self, skip: Option<&str>) -> Result<usize> {
        let names = self.store.list_names().await?;
        for name in names.iter().filter(|n| Some(n.as_str()) != skip) {
            match self.store.load_env(name).await.and_then(|env| env.ports()) {
                Ok(ports) => self.ports.reserve(&ports),
                Err(e) => tracing::warn!(instance = %name, error = %e, "cannot read ports"),
            }
        }
        Ok(names.len())
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn instance_dir(&self, name: &str) -> PathBuf {
        self.store.instance_dir(name)
    }

    /// Names of all instances on disk, sorted.
    pub async fn names(&self) -> Result<Vec<String>> {
        self.store.list_names().await
    }

    /// Every instance that can be reconstructed. One broken instance is
    /// logged and left out; it never fails the listing.
    pub async fn list(self: &Arc<Self>) -> Result<Vec<Instance>> {
        let names = self.store.list_names().await?;
        let limit = Arc::new(Semaphore::new(self.config.concurrency()));
        let mut tasks = JoinSet::new();
        for name in names {
            let registry = Arc::clone(self);
            let limit = Arc::clone(&limit);
            tasks.spawn(async move {
                let _permit = limit.acquire_owned().await;
                let result = registry.reconstruct(&name).await;
                (name, result)
            });
        }

        let mut instances = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(instance))) => instances.push(instance),
                Ok((name, Err(e))) => {
                    tracing::warn!(instance = %name, error = %e, "omitting instance from listing")
                }
                Err(e) => tracing::error!(error = %e, "instance listing task failed"),
            }
        }
        instances.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(instances)
    }

    pub async fn get(&self, name: &str) -> Result<Option<Instance>> {
        materializer::validate_name(name)?;
        if !self.store.exists(name) {
            return Ok(None);
        }
        self.reconstruct(name).await.map(Some)
    }

    pub async fn require(&self, name: &str) -> Result<Instance> {
        self.get(name)
            .await?
            .ok_or_else(|| FleetError::InstanceNotFound(name.to_string()))
    }

    async fn reconstruct(&self, name: &str) -> Result<Instance> {
        let meta = self.store.load_metadata(name).await?;
        let env = self.store.load_env(name).await?;
        let ports = env.ports()?;
        let credentials = env.credentials()?;
        let stack = StackRef::new(name, self.store.instance_dir(name));
        let services = self.driver.list_services(&stack).await?;
        let status = health::summarize(&services);
        self.health.put(name, status.clone()).await;
        Ok(Instance {
            name: name.to_string(),
            directory: stack.directory,
            ports,
            credentials,
            status: InstanceStatus::from(status.overall),
            services,
            health: Some(status),
            config_version: meta.config_version,
            created_at: meta.created_at,
            updated_at: meta.updated_at,
        })
    }

    /// Create an instance: claim the directory, allocate ports, generate
    /// secrets, write the file set and register the stack. Any failure
    /// removes the directory and releases the ports before returning.
    /// The new instance is `Stopped`.
    ///
    /// Creation holds the fleet lock from claiming the directory until the
    /// `.env` is written, so a concurrent create in another process sees
    /// these ports before allocating its own.
    pub async fn create(&self, request: CreateInstanceRequest) -> Result<Instance> {
        let name = request.name.as_str();
        materializer::validate_name(name)?;
        let _fleet = FileLock::acquire(&self.fleet_lock).await?;
        let dir = self.store.claim_directory(name).await?;
        if let Err(e) = self.reserve_existing(Some(name)).await {
            self.discard(name, &dir).await;
            return Err(e);
        }

        let ports = match self.ports.allocate(request.base_port) {
            Ok(ports) => ports,
            Err(e) => {
                self.discard(name, &dir).await;
                return Err(e);
            }
        };

        match self.provision(name, &dir, &ports).await {
            Ok(instance) => {
                tracing::info!(instance = %name, api = %instance.api_url(), "instance created");
                Ok(instance)
            }
            Err(e) => {
                self.ports.release(&ports);
                self.discard(name, &dir).await;
                Err(e)
            }
        }
    }

    async fn provision(&self, name: &str, dir: &Path, ports: &PortSet) -> Result<Instance> {
        let credentials = self.secrets.generate()?;
        let options = MaterializeOptions {
            cors_origins: self.config.cors_origins.clone(),
            config_version: 1,
        };
        let files = materializer::materialize(name, ports, &credentials, &options)?;
        files.write_to(dir).await?;

        let meta = InstanceMetadata::new(name.to_string());
        self.store.save_metadata(&meta).await?;

        let stack = StackRef::new(name, dir);
        self.driver.register(&stack).await?;

        Ok(Instance {
            name: name.to_string(),
            directory: dir.to_path_buf(),
            ports: *ports,
            credentials,
            status: InstanceStatus::Stopped,
            services: Vec::new(),
            health: None,
            config_version: meta.config_version,
            created_at: meta.created_at,
            updated_at: meta.updated_at,
        })
    }

    async fn discard(&self, name: &str, dir: &Path) {
        if let Err(e) = remove_dir_if_exists(dir).await {
            tracing::error!(instance = %name, error = %e, "rollback could not remove instance directory");
        } else {
            tracing::warn!(instance = %name, "instance creation rolled back");
        }
    }

    fn stack(&self, name: &str) -> Result<StackRef> {
        materializer::validate_name(name)?;
        if !self.store.exists(name) {
            return Err(FleetError::InstanceNotFound(name.to_string()));
        }
        Ok(StackRef::new(name, self.store.instance_dir(name)))
    }

    /// Tear down and remove the instance. Teardown is best effort; the
    /// directory is always removed.
    pub async fn delete(&self, name: &str, remove_volumes: bool) -> Result<()> {
        let stack = self.stack(name)?;
        let ports = self.store.load_env(name).await.and_then(|env| env.ports());
        self.driver.remove(&stack, remove_volumes).await?;
        if let Ok(ports) = ports {
            self.ports.release(&ports);
        }
        self.health.invalidate(name).await;
        tracing::info!(instance = %name, remove_volumes, "instance deleted");
        Ok(())
    }

    pub async fn start(&self, name: &str) -> Result<()> {
        let stack = self.stack(name)?;
        let result = self.driver.start(&stack).await;
        self.health.invalidate(name).await;
        result
    }

    pub async fn stop(&self, name: &str, keep_volumes: bool) -> Result<()> {
        let stack = self.stack(name)?;
        let result = self.driver.stop(&stack, keep_volumes).await;
        self.health.invalidate(name).await;
        result
    }

    pub async fn restart(&self, name: &str) -> Result<()> {
        let stack = self.stack(name)?;
        let result = self.driver.restart(&stack).await;
        self.health.invalidate(name).await;
        result
    }

    pub async fn restart_service(&self, name: &str, service: &str) -> Result<()> {
        let stack = self.stack(name)?;
        let result = self.driver.restart_service(&stack, service).await;
        self.health.invalidate(name).await;
        result
    }

    pub async fn list_services(&self, name: &str) -> Result<Vec<ServiceStatus>> {
        let stack = self.stack(name)?;
        self.driver.list_services(&stack).await
    }

    /// Health verdict, served from cache unless stale or `refresh` is set.
    pub async fn health(&self, name: &str, refresh: bool) -> Result<HealthStatus> {
        let stack = self.stack(name)?;
        if !refresh {
            if let Some(cached) = self.health.get(name).await {
                return Ok(cached);
            }
        }
        let services = self.driver.list_services(&stack).await?;
        let status = health::summarize(&services);
        self.health.put(name, status.clone()).await;
        Ok(status)
    }

    /// Store a verdict computed elsewhere from a fresh service query.
    pub async fn record_health(&self, name: &str, status: HealthStatus) {
        self.health.put(name, status).await;
    }

    /// Rotate keys and/or replace dashboard credentials. The previous `.env`
    /// is kept as a timestamped backup; ports and name never change.
    /// Running services keep the old keys until restarted.
    pub async fn update_credentials(
        &self,
        name: &str,
        update: CredentialUpdate,
    ) -> Result<Credentials> {
        let stack = self.stack(name)?;
        validate_update(&update)?;

        let _guard = self.driver.lock_instance(&stack.name).await?;
        let mut env = self.store.load_env(name).await?;
        let mut credentials = env.credentials()?;
        if update.regenerate_keys {
            self.secrets.rotate_keys(&mut credentials)?;
        }
        if let Some(username) = update.dashboard_username {
            credentials.dashboard_username = username;
        }
        if let Some(password) = update.dashboard_password {
            credentials.dashboard_password = password;
        }

        let backup = self.store.backup_env(name).await?;
        env.set_credentials(&credentials);
        let version = env.bump_version();
        self.store.save_env(name, &env).await?;

        let mut meta = self.store.load_metadata(name).await?;
        meta.config_version = version;
        meta.updated_at = Utc::now();
        self.store.save_metadata(&meta).await?;
        self.health.invalidate(name).await;

        tracing::info!(
            instance = %name,
            version,
            backup = %backup.display(),
            keys_rotated = update.regenerate_keys,
            "credentials updated, restart the instance to apply them"
        );
        Ok(credentials)
    }

    /// Remove all data: tear down with volumes, then recreate an empty
    /// database directory.
    pub async fn reset(&self, name: &str) -> Result<()> {
        let stack = self.stack(name)?;
        tracing::warn!(instance = %name, "resetting instance, all data will be lost");
        let result = self.driver.teardown_with_volumes(&stack).await;
        self.health.invalidate(name).await;
        result?;
        let data_dir = stack.directory.join(DB_DATA_DIR);
        remove_dir_if_exists(&data_dir).await?;
        tokio::fs::create_dir_all(&data_dir).await?;
        Ok(())
    }

    /// Static audit of the instance's `.env` and gateway config. Needs no
    /// running containers.
    pub async fn security_audit(&self, name: &str) -> Result<SecurityReport> {
        let stack = self.stack(name)?;
        let env = self.store.load_env(name).await?;
        let mut findings = security::audit_env(name, &env);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = tokio::fs::metadata(stack.env_file()).await?;
            findings.extend(security::audit_env_mode(meta.permissions().mode()));
        }

        match tokio::fs::read_to_string(stack.directory.join(KONG_FILE)).await {
            Ok(kong) => findings.extend(security::audit_gateway(&kong)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => findings.push(
                SecurityFinding::critical(AuditArea::Gateway, format!("{KONG_FILE} is missing")),
            ),
            Err(e) => return Err(e.into()),
        }

        findings.sort_by(|a, b| b.severity.cmp(&a.severity));
        tracing::info!(instance = %name, findings = findings.len(), "security audit complete");
        Ok(SecurityReport {
            instance: name.to_string(),
            findings,
        })
    }

    /// Bring an instance generated before hardening up to the current
    /// defaults: phone auth off and rate limiting on the auth routes. Each
    /// file is backed up before it is rewritten; files that already comply
    /// are left alone. Running services pick the changes up on restart.
    pub async fn harden(&self, name: &str) -> Result<HardeningReport> {
        let stack = self.stack(name)?;
        let _guard = self.driver.lock_instance(&stack.name).await?;
        let mut report = HardeningReport::default();

        let mut env = self.store.load_env(name).await?;
        let env_changes = security::harden_env(&mut env);
        if !env_changes.is_empty() {
            report.backups.push(self.store.backup_env(name).await?);
            env.bump_version();
            self.store.save_env(name, &env).await?;
            report.changes.extend(env_changes);
        }
        report.config_version = env.version();

        let kong_path = stack.directory.join(KONG_FILE);
        let kong = tokio::fs::read_to_string(&kong_path).await?;
        if let Some(hardened) = security::harden_gateway(&kong)? {
            report.backups.push(self.store.backup_file(name, Path::new(KONG_FILE)).await?);
            tokio::fs::write(&kong_path, hardened).await?;
            report.changes.push("added rate limiting to the auth routes".to_string());
        }

        let compose_path = stack.compose_file();
        let compose = tokio::fs::read_to_string(&compose_path).await?;
        if let Some(hardened) = security::harden_compose(&compose) {
            report.backups.push(self.store.backup_file(name, Path::new(COMPOSE_FILE)).await?);
            tokio::fs::write(&compose_path, hardened).await?;
            report.changes.push("enabled the rate limiting plugin in the gateway".to_string());
        }

        if report.changed() {
            let mut meta = self.store.load_metadata(name).await?;
            meta.config_version = report.config_version;
            meta.updated_at = Utc::now();
            self.store.save_metadata(&meta).await?;
            self.health.invalidate(name).await;
            tracing::info!(
                instance = %name,
                changes = report.changes.len(),
                "instance hardened, restart it to apply"
            );
        }
        Ok(report)
    }
}

fn validate_update(update: &CredentialUpdate) -> Result<()> {
    if !update.regenerate_keys
        && update.dashboard_username.is_none()
        && update.dashboard_password.is_none()
    {
        return Err(FleetError::Validation("nothing to update".into()));
    }
    if let Some(username) = &update.dashboard_username {
        env_file::check_value(DASHBOARD_USERNAME, username)?;
        if username.chars().count() < MIN_DASHBOARD_USERNAME {
            return Err(FleetError::Validation(format!(
                "dashboard username must be at least {MIN_DASHBOARD_USERNAME} characters"
            )));
        }
    }
    if let Some(password) = &update.dashboard_password {
        env_file::check_value(DASHBOARD_PASSWORD, password)?;
        if password.chars().count() < MIN_DASHBOARD_PASSWORD {
            return Err(FleetError::Validation(format!(
                "dashboard password must be at least {MIN_DASHBOARD_PASSWORD} characters"
            )));
        }
    }
    Ok(())
}
