use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

use crate::error::{FleetError, Result};
use crate::models::{ContainerInfo, ContainerStats, ServiceStatus};
use crate::services::compose_output::to_service_status;
use crate::services::file_lock::FileLock;
use crate::services::materializer::{COMPOSE_FILE, ENV_FILE};
use crate::services::templates::STACK_SERVICES;

/// Addresses one instance's stack on the container runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackRef {
    pub name: String,
    pub directory: PathBuf,
}

impl StackRef {
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
        }
    }

    pub fn compose_file(&self) -> PathBuf {
        self.directory.join(COMPOSE_FILE)
    }

    pub fn env_file(&self) -> PathBuf {
        self.directory.join(ENV_FILE)
    }
}

/// Narrow command/query surface of the external container runtime.
///
/// Implementations never retry; a non-zero exit or API error surfaces as
/// [`FleetError::RuntimeOperation`].
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check the stack definition without creating anything.
    async fn validate(&self, stack: &StackRef) -> Result<()>;

    /// Create missing containers and start the whole stack, detached.
    async fn up(&self, stack: &StackRef) -> Result<()>;

    /// Stop containers, keeping them and their volumes.
    async fn stop(&self, stack: &StackRef) -> Result<()>;

    /// Remove containers and networks, and volumes when asked.
    async fn down(&self, stack: &StackRef, remove_volumes: bool) -> Result<()>;

    async fn restart_service(&self, stack: &StackRef, service: &str) -> Result<()>;

    /// Every container of the stack, running or not.
    async fn list_containers(&self, stack: &StackRef) -> Result<Vec<ContainerInfo>>;

    /// Resource usage of the named containers.
    async fn container_stats(&self, containers: &[String]) -> Result<Vec<ContainerStats>>;
}

/// Per-instance serialization: an async mutex for tasks of this process and
/// a lock file in `dir` for other processes. Held across a whole runtime
/// command so the runtime never sees two mutating commands for one stack
/// at once.
///
/// Entries are kept for the life of the process. Dropping one while a task
/// still waits on it would let a later caller lock a fresh mutex and run
/// alongside that task.
pub struct InstanceLocks {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Proof that one instance is locked, in this process and across processes.
pub struct InstanceGuard {
    _file: FileLock,
    _local: OwnedMutexGuard<()>,
}

impl InstanceLocks {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Mutex::default(),
        }
    }

    pub fn lock_file(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.lock"))
    }

    pub async fn acquire(&self, name: &str) -> Result<InstanceGuard> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(name.to_string()).or_default().clone()
        };
        let local = lock.lock_owned().await;
        let file = FileLock::acquire(self.lock_file(name)).await?;
        Ok(InstanceGuard {
            _file: file,
            _local: local,
        })
    }
}

/// Lifecycle operations on top of a [`ContainerRuntime`], serialized per
/// instance. Operations on different instances run concurrently.
pub struct RuntimeDriver {
    runtime: Arc<dyn ContainerRuntime>,
    locks: InstanceLocks,
}

impl RuntimeDriver {
    /// `lock_dir` holds one lock file per instance and must be shared by
    /// every process managing the same fleet.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            locks: InstanceLocks::new(lock_dir),
        }
    }

    /// Hold the instance's lock for work outside the runtime, such as
    /// rewriting its `.env`. Must not be held across driver calls.
    pub async fn lock_instance(&self, name: &str) -> Result<InstanceGuard> {
        self.locks.acquire(name).await
    }

    /// Make the stack known to the runtime without starting it.
    pub async fn register(&self, stack: &StackRef) -> Result<()> {
        let _guard = self.locks.acquire(&stack.name).await?;
        self.runtime.validate(stack).await
    }

    pub async fn start(&self, stack: &StackRef) -> Result<()> {
        let _guard = self.locks.acquire(&stack.name).await?;
        tracing::info!(instance = %stack.name, "starting stack");
        self.runtime.up(stack).await
    }

    /// `keep_volumes = false` tears the stack down and deletes its volumes.
    pub async fn stop(&self, stack: &StackRef, keep_volumes: bool) -> Result<()> {
        let _guard = self.locks.acquire(&stack.name).await?;
        self.stop_locked(stack, keep_volumes).await
    }

    async fn stop_locked(&self, stack: &StackRef, keep_volumes: bool) -> Result<()> {
        if keep_volumes {
            tracing::info!(instance = %stack.name, "stopping stack");
            self.runtime.stop(stack).await
        } else {
            tracing::warn!(instance = %stack.name, "tearing down stack and removing volumes");
            self.runtime.down(stack, true).await
        }
    }

    /// Stop then start. Start is attempted even when stop failed.
    pub async fn restart(&self, stack: &StackRef) -> Result<()> {
        let _guard = self.locks.acquire(&stack.name).await?;
        let stopped = self.runtime.stop(stack).await;
        if let Err(e) = &stopped {
            tracing::warn!(instance = %stack.name, error = %e, "stop failed during restart, starting anyway");
        }
        let started = self.runtime.up(stack).await;
        match (stopped, started) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(stop), Ok(())) => Err(FleetError::RuntimeOperation(format!(
                "restart of '{}': stop failed: {stop}",
                stack.name
            ))),
            (Ok(()), Err(start)) => Err(start),
            (Err(stop), Err(start)) => Err(FleetError::RuntimeOperation(format!(
                "restart of '{}': stop failed: {stop}; start failed: {start}",
                stack.name
            ))),
        }
    }

    /// Tear the stack down, then delete the instance directory.
    ///
    /// Teardown failures are logged and ignored: a leftover directory would
    /// keep the instance listed, while orphaned containers only need manual
    /// cleanup. Only a failed directory removal is an error.
    pub async fn remove(&self, stack: &StackRef, remove_volumes: bool) -> Result<()> {
        let _guard = self.locks.acquire(&stack.name).await?;
        if let Err(e) = self.runtime.down(stack, remove_volumes).await {
            tracing::warn!(
                instance = %stack.name,
                error = %e,
                "teardown failed, containers may need manual cleanup"
            );
        }
        remove_dir_if_exists(&stack.directory).await
    }

    /// Live per-service view. Missing resource figures do not fail the query.
    pub async fn list_services(&self, stack: &StackRef) -> Result<Vec<ServiceStatus>> {
        let containers = self.runtime.list_containers(stack).await?;
        let running: Vec<String> = containers
            .iter()
            .filter(|c| c.state.eq_ignore_ascii_case("running"))
            .map(|c| c.name.clone())
            .collect();
        let stats = if running.is_empty() {
            Vec::new()
        } else {
            match self.runtime.container_stats(&running).await {
                Ok(stats) => stats,
                Err(e) => {
                    tracing::debug!(instance = %stack.name, error = %e, "container stats unavailable");
                    Vec::new()
                }
            }
        };
        let by_name: HashMap<&str, &ContainerStats> =
            stats.iter().map(|s| (s.name.as_str(), s)).collect();
        let mut services: Vec<ServiceStatus> = containers
            .iter()
            .map(|c| to_service_status(c, by_name.get(c.name.as_str()).copied()))
            .collect();
        services.sort_by_key(|s| stack_order(&s.name));
        Ok(services)
    }

    pub async fn restart_service(&self, stack: &StackRef, service: &str) -> Result<()> {
        if !STACK_SERVICES.contains(&service) {
            return Err(FleetError::Validation(format!(
                "unknown service '{service}', expected one of: {}",
                STACK_SERVICES.join(", ")
            )));
        }
        let _guard = self.locks.acquire(&stack.name).await?;
        tracing::info!(instance = %stack.name, service, "restarting service");
        self.runtime.restart_service(stack, service).await
    }

    /// Full teardown with volume removal, used by reset.
    pub async fn teardown_with_volumes(&self, stack: &StackRef) -> Result<()> {
        let _guard = self.locks.acquire(&stack.name).await?;
        self.stop_locked(stack, false).await
    }
}

fn stack_order(service: &str) -> usize {
    STACK_SERVICES
        .iter()
        .position(|s| *s == service)
        .unwrap_or(STACK_SERVICES.len())
}

pub async fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
