pub mod alert_store;
pub mod alerts;
pub mod compose;
pub mod compose_output;
pub mod config_loader;
pub mod env_file;
pub mod fake_runtime;
pub mod file_lock;
pub mod health;
pub mod materializer;
pub mod monitor;
pub mod ports;
pub mod registry;
pub mod runtime;
pub mod secrets;
pub mod security;
pub mod state;
pub mod templates;
