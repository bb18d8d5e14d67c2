// Each test binary compiles this module independently and uses a different
// subset of helpers, so unused-function warnings are expected.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use mb_core::models::{FleetConfig, MetricSample};
use mb_core::services::fake_runtime::FakeRuntime;
use mb_core::services::registry::InstanceRegistry;

pub struct Fleet {
    pub runtime: Arc<FakeRuntime>,
    pub registry: Arc<InstanceRegistry>,
    pub root: tempfile::TempDir,
}

/// A registry over a temporary fleet root and a fake runtime with a
/// three-service stack.
pub fn fleet() -> Fleet {
    let runtime = Arc::new(FakeRuntime::with_services(&["db", "kong", "auth"]));
    let root = tempfile::tempdir().unwrap();
    let registry = InstanceRegistry::new(root.path(), FleetConfig::default(), runtime.clone());
    Fleet {
        runtime,
        registry: Arc::new(registry),
        root,
    }
}

/// Fixed origin for sample timestamps.
pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
        + TimeDelta::seconds(secs)
}

pub fn cpu_sample(instance: &str, secs: i64, cpu: f64) -> MetricSample {
    let mut sample = MetricSample::empty(instance, at(secs));
    sample.cpu_percent = Some(cpu);
    sample
}
