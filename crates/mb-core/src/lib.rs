//! Orchestration engine for a fleet of self-hosted Supabase stacks on one host.
//!
//! The engine allocates ports, materializes per-instance configuration,
//! drives the container runtime, aggregates health, and evaluates alert
//! rules against sampled telemetry.

pub mod error;
pub mod models;
pub mod services;

pub use error::{FleetError, Result};
