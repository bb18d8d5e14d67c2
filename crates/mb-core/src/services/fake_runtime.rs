use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{FleetError, Result};
use crate::models::{ContainerInfo, ContainerStats, ProbeResult};
use crate::services::runtime::{ContainerRuntime, StackRef};
use crate::services::templates::{STACK_SERVICES, container_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    Validate,
    Up,
    Stop,
    Down,
    RestartService,
    List,
    Stats,
}

#[derive(Debug, Default)]
struct FakeStack {
    created: bool,
    running: bool,
    stopped_services: HashSet<String>,
    health: HashMap<String, ProbeResult>,
    cpu: HashMap<String, f64>,
    memory_percent: HashMap<String, f64>,
    in_flight: usize,
    max_in_flight: usize,
}

#[derive(Debug, Default)]
struct FakeState {
    stacks: HashMap<String, FakeStack>,
    failures: HashSet<(FakeOp, String)>,
    calls: Vec<String>,
    op_delay: Duration,
}

/// In-memory container runtime for tests. Tracks stack state, records every
/// call, and fails on demand per operation and instance.
pub struct FakeRuntime {
    services: Vec<String>,
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::with_services(STACK_SERVICES)
    }

    pub fn with_services(services: &[&str]) -> Self {
        Self {
            services: services.iter().map(|s| s.to_string()).collect(),
            state: Mutex::new(FakeState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `op` fail for `instance` until [`FakeRuntime::clear_failures`].
    pub fn fail(&self, op: FakeOp, instance: &str) {
        self.lock().failures.insert((op, instance.to_string()));
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Delay applied inside every mutating call, to widen race windows.
    pub fn set_op_delay(&self, delay: Duration) {
        self.lock().op_delay = delay;
    }

    pub fn set_health(&self, instance: &str, service: &str, health: ProbeResult) {
        let mut state = self.lock();
        let stack = state.stacks.entry(instance.to_string()).or_default();
        stack.health.insert(service.to_string(), health);
    }

    /// Simulate one container exiting on its own.
    pub fn kill_service(&self, instance: &str, service: &str) {
        let mut state = self.lock();
        let stack = state.stacks.entry(instance.to_string()).or_default();
        stack.stopped_services.insert(service.to_string());
    }

    pub fn set_cpu(&self, instance: &str, service: &str, percent: f64) {
        let mut state = self.lock();
        let stack = state.stacks.entry(instance.to_string()).or_default();
        stack.cpu.insert(service.to_string(), percent);
    }

    pub fn set_memory_percent(&self, instance: &str, service: &str, percent: f64) {
        let mut state = self.lock();
        let stack = state.stacks.entry(instance.to_string()).or_default();
        stack.memory_percent.insert(service.to_string(), percent);
    }

    pub fn is_running(&self, instance: &str) -> bool {
        self.lock()
            .stacks
            .get(instance)
            .is_some_and(|s| s.running)
    }

    /// True while the runtime still holds containers for the instance.
    pub fn has_containers(&self, instance: &str) -> bool {
        self.lock()
            .stacks
            .get(instance)
            .is_some_and(|s| s.created)
    }

    /// Calls so far, as `"<op> <instance>"`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn max_in_flight(&self, instance: &str) -> usize {
        self.lock()
            .stacks
            .get(instance)
            .map_or(0, |s| s.max_in_flight)
    }

    fn check(&self, op: FakeOp, label: &str, instance: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(format!("{label} {instance}"));
        if state.failures.contains(&(op, instance.to_string())) {
            return Err(FleetError::RuntimeOperation(format!(
                "{label} {instance}: injected failure"
            )));
        }
        Ok(())
    }

    /// Runs a state change with in-flight accounting around the delay.
    async fn mutate(
        &self,
        op: FakeOp,
        label: &str,
        instance: &str,
        apply: impl FnOnce(&mut FakeStack),
    ) -> Result<()> {
        let delay = {
            let mut state = self.lock();
            let delay = state.op_delay;
            let stack = state.stacks.entry(instance.to_string()).or_default();
            stack.in_flight += 1;
            stack.max_in_flight = stack.max_in_flight.max(stack.in_flight);
            delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let result = self.check(op, label, instance);
        let mut state = self.lock();
        let stack = state.stacks.entry(instance.to_string()).or_default();
        stack.in_flight -= 1;
        if result.is_ok() {
            apply(stack);
        }
        result
    }
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn validate(&self, stack: &StackRef) -> Result<()> {
        self.mutate(FakeOp::Validate, "validate", &stack.name, |_| {})
            .await
    }

    async fn up(&self, stack: &StackRef) -> Result<()> {
        self.mutate(FakeOp::Up, "up", &stack.name, |s| {
            s.created = true;
            s.running = true;
            s.stopped_services.clear();
        })
        .await
    }

    async fn stop(&self, stack: &StackRef) -> Result<()> {
        self.mutate(FakeOp::Stop, "stop", &stack.name, |s| s.running = false)
            .await
    }

    async fn down(&self, stack: &StackRef, remove_volumes: bool) -> Result<()> {
        let label = if remove_volumes { "down -v" } else { "down" };
        self.mutate(FakeOp::Down, label, &stack.name, |s| {
            s.created = false;
            s.running = false;
        })
        .await
    }

    async fn restart_service(&self, stack: &StackRef, service: &str) -> Result<()> {
        let service = service.to_string();
        self.mutate(FakeOp::RestartService, "restart", &stack.name, move |s| {
            s.stopped_services.remove(&service);
        })
        .await
    }

    async fn list_containers(&self, stack: &StackRef) -> Result<Vec<ContainerInfo>> {
        self.check(FakeOp::List, "ps", &stack.name)?;
        let state = self.lock();
        let Some(fake) = state.stacks.get(&stack.name).filter(|s| s.created) else {
            return Ok(Vec::new());
        };
        Ok(self
            .services
            .iter()
            .map(|service| {
                let running = fake.running && !fake.stopped_services.contains(service);
                let health = match fake.health.get(service) {
                    Some(ProbeResult::Healthy) => "healthy",
                    Some(ProbeResult::Unhealthy) => "unhealthy",
                    _ => "",
                };
                ContainerInfo {
                    name: container_name(&stack.name, service),
                    service: service.clone(),
                    state: if running { "running" } else { "exited" }.to_string(),
                    health: health.to_string(),
                    status: if running {
                        "Up 1 minute".to_string()
                    } else {
                        "Exited (0) 1 minute ago".to_string()
                    },
                }
            })
            .collect())
    }

    async fn container_stats(&self, containers: &[String]) -> Result<Vec<ContainerStats>> {
        let state = self.lock();
        let mut out = Vec::new();
        for (instance, fake) in &state.stacks {
            for service in &self.services {
                let name = container_name(instance, service);
                if containers.contains(&name) {
                    if state.failures.contains(&(FakeOp::Stats, instance.clone())) {
                        return Err(FleetError::RuntimeOperation(format!(
                            "stats {instance}: injected failure"
                        )));
                    }
                    out.push(ContainerStats {
                        name,
                        cpu_percent: fake.cpu.get(service).copied().unwrap_or(0.0),
                        memory_bytes: 64 * 1024 * 1024,
                        memory_percent: fake.memory_percent.get(service).copied().unwrap_or(1.0),
                    });
                }
            }
        }
        Ok(out)
    }
}
