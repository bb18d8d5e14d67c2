use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use mb_cli::cli::{Cli, Command};
use mb_cli::render;
use mb_core::models::{
    AlertFilter, CreateInstanceRequest, CredentialUpdate, FleetConfig, NewAlertRule,
};
use mb_core::services::alert_store::JsonAlertStore;
use mb_core::services::alerts::AlertEvaluator;
use mb_core::services::compose::ComposeRuntime;
use mb_core::services::config_loader;
use mb_core::services::monitor::Monitor;
use mb_core::services::registry::InstanceRegistry;

const FLEET_DIR: &str = ".multibase";
const HOME_VAR: &str = "MULTIBASE_HOME";

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let _guard = if cli.debug {
        Some(setup_debug_logging())
    } else {
        setup_stderr_logging(cli.command.is_long_running());
        None
    };

    let fleet_root = find_fleet_root();
    std::fs::create_dir_all(&fleet_root)?;
    let config = config_loader::load_or_default(&fleet_root)?;
    tracing::debug!(root = %fleet_root.display(), runtime = %config.runtime_binary, "fleet opened");

    run(cli.command, &fleet_root, config).await
}

/// Configure file-based tracing to `.multibase-debug.log` in CWD.
/// Returns the guard that must be held alive for the duration of the program.
fn setup_debug_logging() -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::never(".", ".multibase-debug.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_ansi(false)
        .init();

    guard
}

fn setup_stderr_logging(long_running: bool) {
    let default = if long_running { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_target(false)
        .init();
}

async fn open_registry(
    fleet_root: &Path,
    config: FleetConfig,
) -> color_eyre::Result<Arc<InstanceRegistry>> {
    let runtime = Arc::new(ComposeRuntime::new(
        config.runtime_binary.clone(),
        config.command_timeout(),
    ));
    Ok(Arc::new(
        InstanceRegistry::open(fleet_root, config, runtime).await?,
    ))
}

async fn open_evaluator(
    fleet_root: &Path,
    config: &FleetConfig,
) -> color_eyre::Result<Arc<AlertEvaluator>> {
    let store = Arc::new(JsonAlertStore::new(fleet_root));
    Ok(Arc::new(
        AlertEvaluator::open(store, config.max_sample_gap()).await?,
    ))
}

async fn run(command: Command, fleet_root: &Path, config: FleetConfig) -> color_eyre::Result<()> {
    let now = Utc::now();
    match command {
        // --- alert commands need no runtime ---
        Command::Rules { instance } => {
            let evaluator = open_evaluator(fleet_root, &config).await?;
            print!("{}", render::rules(&evaluator.list_rules(instance.as_deref()).await));
        }
        Command::AddRule {
            instance,
            kind,
            threshold,
            duration_secs,
            name,
            condition,
        } => {
            let evaluator = open_evaluator(fleet_root, &config).await?;
            let name = name.unwrap_or_else(|| format!("{kind} on {instance}"));
            let rule = NewAlertRule::new(&instance, &name, kind, threshold)
                .with_duration(duration_secs)
                .with_condition(condition);
            let rule = evaluator.create_rule(rule).await?;
            println!("created rule {}", rule.id);
        }
        Command::EnableRule { id } => {
            let evaluator = open_evaluator(fleet_root, &config).await?;
            evaluator.set_rule_enabled(&id, true).await?;
            println!("enabled rule {id}");
        }
        Command::DisableRule { id } => {
            let evaluator = open_evaluator(fleet_root, &config).await?;
            evaluator.set_rule_enabled(&id, false).await?;
            println!("disabled rule {id}");
        }
        Command::DeleteRule { id } => {
            let evaluator = open_evaluator(fleet_root, &config).await?;
            evaluator.delete_rule(&id).await?;
            println!("deleted rule {id}");
        }
        Command::Alerts { instance } => {
            let evaluator = open_evaluator(fleet_root, &config).await?;
            let filter = AlertFilter {
                instance_id: instance,
                ..Default::default()
            };
            print!("{}", render::alerts(&evaluator.list_alerts(&filter).await, now));
        }
        Command::Ack { id } => {
            let evaluator = open_evaluator(fleet_root, &config).await?;
            let alert = evaluator.acknowledge(&id).await?;
            println!("acknowledged {}: {}", alert.id, alert.message);
        }
        Command::Resolve { id } => {
            let evaluator = open_evaluator(fleet_root, &config).await?;
            let alert = evaluator.resolve(&id).await?;
            println!("resolved {}: {}", alert.id, alert.message);
        }
        Command::AlertStats { instance } => {
            let evaluator = open_evaluator(fleet_root, &config).await?;
            let stats = evaluator.stats(instance.as_deref()).await;
            print!("{}", render::alert_stats(instance.as_deref(), &stats));
        }

        // --- instance commands ---
        Command::List { json } => {
            let registry = open_registry(fleet_root, config).await?;
            let instances = registry.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&instances)?);
            } else {
                print!("{}", render::instances(&instances));
            }
        }
        Command::Create { name, base_port } => {
            let registry = open_registry(fleet_root, config).await?;
            let mut request = CreateInstanceRequest::new(name);
            request.base_port = base_port;
            let instance = registry.create(request).await?;
            print!("{}", render::instance_detail(&instance, now));
            println!("\nstart it with: multibase start {}", instance.name);
        }
        Command::Start { name } => {
            let registry = open_registry(fleet_root, config).await?;
            registry.start(&name).await?;
            let instance = registry.require(&name).await?;
            println!("started {} at {}", name, instance.api_url());
        }
        Command::Stop {
            name,
            remove_volumes,
        } => {
            let registry = open_registry(fleet_root, config).await?;
            registry.stop(&name, !remove_volumes).await?;
            println!("stopped {name}");
        }
        Command::Restart { name } => {
            let registry = open_registry(fleet_root, config).await?;
            registry.restart(&name).await?;
            println!("restarted {name}");
        }
        Command::RestartService { name, service } => {
            let registry = open_registry(fleet_root, config).await?;
            registry.restart_service(&name, &service).await?;
            println!("restarted {service} in {name}");
        }
        Command::Delete {
            name,
            remove_volumes,
        } => {
            let registry = open_registry(fleet_root, config).await?;
            registry.delete(&name, remove_volumes).await?;
            println!("deleted {name}");
        }
        Command::Reset { name } => {
            let registry = open_registry(fleet_root, config).await?;
            registry.reset(&name).await?;
            println!("reset {name}, start it to initialize a fresh database");
        }
        Command::Status { name, json } => {
            let registry = open_registry(fleet_root, config).await?;
            let instance = registry.require(&name).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&instance)?);
            } else {
                print!("{}", render::instance_detail(&instance, now));
            }
        }
        Command::Health { name, refresh } => {
            let registry = open_registry(fleet_root, config).await?;
            let status = registry.health(&name, refresh).await?;
            print!("{}", render::health(&name, &status));
        }
        Command::RotateKeys { name } => {
            let registry = open_registry(fleet_root, config).await?;
            let update = CredentialUpdate {
                regenerate_keys: true,
                ..Default::default()
            };
            let credentials = registry.update_credentials(&name, update).await?;
            print!("{}", render::api_keys(&name, &credentials));
        }
        Command::SetDashboard {
            name,
            username,
            password,
        } => {
            let registry = open_registry(fleet_root, config).await?;
            let update = CredentialUpdate {
                regenerate_keys: false,
                dashboard_username: username,
                dashboard_password: password,
            };
            let credentials = registry.update_credentials(&name, update).await?;
            println!(
                "dashboard user for {name} is now '{}', restart the instance to apply",
                credentials.dashboard_username
            );
        }
        Command::SecurityAudit { name, json } => {
            let registry = open_registry(fleet_root, config).await?;
            let report = registry.security_audit(&name).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", render::security_report(&report));
            }
        }
        Command::Harden { name } => {
            let registry = open_registry(fleet_root, config).await?;
            let report = registry.harden(&name).await?;
            print!("{}", render::hardening(&name, &report));
        }
        Command::Monitor => {
            let evaluator = open_evaluator(fleet_root, &config).await?;
            let registry = open_registry(fleet_root, config).await?;
            run_monitor(registry, evaluator).await;
        }
    }
    Ok(())
}

async fn run_monitor(registry: Arc<InstanceRegistry>, evaluator: Arc<AlertEvaluator>) {
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping after the current cycle");
        }
        ctrl_c.cancel();
    });

    let mut events = evaluator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let alert = event.alert();
            println!("[{}] {} {}", alert.status, alert.id, alert.message);
        }
    });

    Monitor::new(registry, evaluator).run(cancel).await;
}

/// `MULTIBASE_HOME`, else the nearest `.multibase` walking up from CWD,
/// else `./.multibase`.
fn find_fleet_root() -> PathBuf {
    if let Some(home) = std::env::var_os(HOME_VAR).filter(|v| !v.is_empty()) {
        return PathBuf::from(home);
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let mut dir = cwd.as_path();
    loop {
        let candidate = dir.join(FLEET_DIR);
        if candidate.is_dir() {
            return candidate;
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => break,
        }
    }

    cwd.join(FLEET_DIR)
}
