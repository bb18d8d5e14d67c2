use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::{InstanceStatus, MetricSample};
use crate::services::alerts::{AlertEvaluator, AlertEvent};
use crate::services::registry::InstanceRegistry;

/// Outcome of one monitoring pass.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub sampled: usize,
    pub failed: usize,
    pub events: Vec<AlertEvent>,
}

impl CycleReport {
    pub fn transitions(&self) -> usize {
        self.events.len()
    }
}

/// Periodic sampler feeding the alert evaluator.
pub struct Monitor {
    registry: Arc<InstanceRegistry>,
    evaluator: Arc<AlertEvaluator>,
    interval: Duration,
    probe_timeout: Duration,
    concurrency: usize,
}

impl Monitor {
    pub fn new(registry: Arc<InstanceRegistry>, evaluator: Arc<AlertEvaluator>) -> Self {
        let config = registry.config();
        let interval = config.monitor_interval();
        let probe_timeout = config.response_probe_timeout();
        let concurrency = config.concurrency();
        Self {
            registry,
            evaluator,
            interval,
            probe_timeout,
            concurrency,
        }
    }

    /// Sample every instance, refresh the health cache, and run the rules.
    /// A failure to sample one instance is logged and counted, and its
    /// rules see no sample this cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let names = self.registry.names().await?;
        let limit = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for name in names {
            let registry = Arc::clone(&self.registry);
            let limit = Arc::clone(&limit);
            let probe_timeout = self.probe_timeout;
            tasks.spawn(async move {
                let _permit = limit.acquire_owned().await;
                let sample = sample_instance(&registry, &name, probe_timeout).await;
                (name, sample)
            });
        }

        let mut report = CycleReport::default();
        let mut samples = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(sample))) => samples.push(sample),
                Ok((name, Err(e))) => {
                    report.failed += 1;
                    tracing::warn!(instance = %name, error = %e, "sampling failed");
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(error = %e, "sampling task failed");
                }
            }
        }
        report.sampled = samples.len();
        report.events = self.evaluator.evaluate(&samples).await?;
        tracing::debug!(
            sampled = report.sampled,
            failed = report.failed,
            transitions = report.transitions(),
            "monitor cycle complete"
        );
        Ok(report)
    }

    /// Run cycles until `cancel` fires. Cancellation is only observed
    /// between cycles.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = self.interval.as_secs(), "monitor started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.run_cycle().await {
                tracing::error!(error = %e, "monitor cycle failed");
            }
        }
        tracing::info!("monitor stopped");
    }
}

/// One telemetry sample. A stopped instance reports no services down and
/// no response time: stopping is intentional.
async fn sample_instance(
    registry: &InstanceRegistry,
    name: &str,
    probe_timeout: Duration,
) -> Result<MetricSample> {
    let instance = registry.require(name).await?;
    let mut sample = MetricSample::empty(name, Utc::now()).with_services(&instance.services);
    sample.disk_percent = disk_used_percent(&instance.directory);
    if instance.status == InstanceStatus::Stopped {
        sample.services_down = Some(0.0);
    } else {
        sample.response_time_ms = probe_response(instance.ports.gateway_http, probe_timeout).await;
    }
    Ok(sample)
}

/// TCP connect latency to a local port in milliseconds, `None` when the
/// port does not accept within `timeout`.
pub async fn probe_response(port: u16, timeout: Duration) -> Option<f64> {
    let started = Instant::now();
    match tokio::time::timeout(timeout, TcpStream::connect(("127.0.0.1", port))).await {
        Ok(Ok(_)) => Some(started.elapsed().as_secs_f64() * 1000.0),
        Ok(Err(e)) => {
            tracing::trace!(port, error = %e, "response probe refused");
            None
        }
        Err(_) => None,
    }
}

/// Used percentage of the filesystem holding `path`.
#[cfg(unix)]
pub fn disk_used_percent(path: &Path) -> Option<f64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut stat = std::mem::MaybeUninit::<libc::statvfs>::uninit();
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if ret != 0 {
        return None;
    }
    let stat = unsafe { stat.assume_init() };
    let block = stat.f_frsize as f64;
    let total = stat.f_blocks as f64 * block;
    if total <= 0.0 {
        return None;
    }
    let free = stat.f_bfree as f64 * block;
    Some((total - free) / total * 100.0)
}

#[cfg(not(unix))]
pub fn disk_used_percent(_path: &Path) -> Option<f64> {
    None
}
