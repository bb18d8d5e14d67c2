mod common;

use std::time::Duration;

use mb_core::error::FleetError;
use mb_core::models::{
    CreateInstanceRequest, CredentialUpdate, FleetConfig, InstanceStatus, OverallHealth,
};
use mb_core::services::fake_runtime::FakeOp;
use mb_core::services::registry::InstanceRegistry;

use common::fleet;

#[tokio::test]
async fn create_then_delete_leaves_nothing_behind() {
    let fleet = fleet();
    let instance = fleet
        .registry
        .create(CreateInstanceRequest::new("demo"))
        .await
        .unwrap();
    fleet.registry.start("demo").await.unwrap();
    assert!(fleet.runtime.has_containers("demo"));

    fleet.registry.delete("demo", true).await.unwrap();
    assert!(!instance.directory.exists());
    assert!(!fleet.runtime.has_containers("demo"));
    assert!(fleet.registry.names().await.unwrap().is_empty());
    assert!(fleet.registry.get("demo").await.unwrap().is_none());
}

#[tokio::test]
async fn delete_completes_when_teardown_fails() {
    let fleet = fleet();
    let instance = fleet
        .registry
        .create(CreateInstanceRequest::new("demo"))
        .await
        .unwrap();
    fleet.runtime.fail(FakeOp::Down, "demo");

    fleet.registry.delete("demo", false).await.unwrap();
    assert!(!instance.directory.exists());
}

#[tokio::test]
async fn concurrent_create_with_same_name_has_one_winner() {
    let fleet = fleet();
    fleet.runtime.set_op_delay(Duration::from_millis(50));

    let (a, b) = tokio::join!(
        fleet.registry.create(CreateInstanceRequest::new("demo")),
        fleet.registry.create(CreateInstanceRequest::new("demo")),
    );
    let (ok, err) = match (a, b) {
        (Ok(ok), Err(err)) | (Err(err), Ok(ok)) => (ok, err),
        (a, b) => panic!("expected one winner, got {:?} and {:?}", a.is_ok(), b.is_ok()),
    };
    assert!(matches!(err, FleetError::AlreadyExists(ref name) if name == "demo"));
    assert!(ok.directory.join(".env").is_file());
    assert_eq!(fleet.registry.names().await.unwrap(), vec!["demo"]);
}

#[tokio::test]
async fn concurrent_creates_get_disjoint_ports() {
    let fleet = fleet();
    let (a, b) = tokio::join!(
        fleet.registry.create(CreateInstanceRequest::new("alpha")),
        fleet.registry.create(CreateInstanceRequest::new("beta")),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    for (_, port) in a.ports.entries() {
        assert!(!b.ports.contains(port), "port {port} handed out twice");
    }
}

#[tokio::test]
async fn registries_sharing_a_root_never_hand_out_the_same_ports() {
    let fleet = fleet();
    let other = InstanceRegistry::new(fleet.root.path(), FleetConfig::default(), fleet.runtime.clone());
    fleet.runtime.set_op_delay(Duration::from_millis(20));

    let (a, b) = tokio::join!(
        fleet
            .registry
            .create(CreateInstanceRequest::new("alpha").with_base_port(5400)),
        other.create(CreateInstanceRequest::new("beta").with_base_port(5400)),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    for (_, port) in a.ports.entries() {
        assert!(!b.ports.contains(port), "port {port} handed out twice");
    }
}

#[tokio::test]
async fn corrupted_instance_is_omitted_from_listing() {
    let fleet = fleet();
    for name in ["alpha", "beta", "gamma"] {
        fleet
            .registry
            .create(CreateInstanceRequest::new(name))
            .await
            .unwrap();
    }
    std::fs::write(
        fleet.registry.instance_dir("beta").join("instance.json"),
        "{ truncated",
    )
    .unwrap();

    let names: Vec<String> = fleet
        .registry
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.name)
        .collect();
    assert_eq!(names, vec!["alpha", "gamma"]);
}

#[tokio::test]
async fn runtime_listing_failure_is_isolated() {
    let fleet = fleet();
    for name in ["alpha", "beta"] {
        fleet
            .registry
            .create(CreateInstanceRequest::new(name))
            .await
            .unwrap();
    }
    fleet.runtime.fail(FakeOp::List, "alpha");

    let listed = fleet.registry.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "beta");
}

#[tokio::test]
async fn rotating_keys_changes_secrets_only() {
    let fleet = fleet();
    fleet
        .registry
        .create(CreateInstanceRequest::new("demo"))
        .await
        .unwrap();
    let before = fleet.registry.require("demo").await.unwrap();

    fleet
        .registry
        .update_credentials(
            "demo",
            CredentialUpdate {
                regenerate_keys: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let after = fleet.registry.require("demo").await.unwrap();

    assert_ne!(after.credentials.jwt_secret, before.credentials.jwt_secret);
    assert_ne!(after.credentials.anon_key, before.credentials.anon_key);
    assert_ne!(
        after.credentials.service_role_key,
        before.credentials.service_role_key
    );
    assert_ne!(
        after.credentials.postgres_password,
        before.credentials.postgres_password
    );

    assert_eq!(after.name, before.name);
    assert_eq!(after.ports, before.ports);
    assert_eq!(after.directory, before.directory);
    assert_eq!(after.created_at, before.created_at);
    assert_eq!(
        after.credentials.dashboard_username,
        before.credentials.dashboard_username
    );
    assert_eq!(
        after.credentials.dashboard_password,
        before.credentials.dashboard_password
    );
    assert_eq!(after.config_version, before.config_version + 1);

    let backups = std::fs::read_dir(&after.directory)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(".env.bak."))
        .count();
    assert_eq!(backups, 1);
}

#[tokio::test]
async fn lifecycle_status_follows_runtime() {
    let fleet = fleet();
    let created = fleet
        .registry
        .create(CreateInstanceRequest::new("demo"))
        .await
        .unwrap();
    assert_eq!(created.status, InstanceStatus::Stopped);

    fleet.registry.start("demo").await.unwrap();
    assert_eq!(
        fleet.registry.require("demo").await.unwrap().status,
        InstanceStatus::Running
    );

    fleet.runtime.kill_service("demo", "kong");
    let degraded = fleet.registry.require("demo").await.unwrap();
    assert_eq!(degraded.status, InstanceStatus::Degraded);
    assert_eq!(degraded.services.len(), 3);

    fleet.registry.restart_service("demo", "kong").await.unwrap();
    assert_eq!(
        fleet.registry.health("demo", false).await.unwrap().overall,
        OverallHealth::Healthy
    );

    fleet.registry.stop("demo", true).await.unwrap();
    assert_eq!(
        fleet.registry.require("demo").await.unwrap().status,
        InstanceStatus::Stopped
    );
    assert!(fleet.runtime.has_containers("demo"));
}

#[tokio::test]
async fn failed_start_is_reported_without_retry() {
    let fleet = fleet();
    fleet
        .registry
        .create(CreateInstanceRequest::new("demo"))
        .await
        .unwrap();
    fleet.runtime.fail(FakeOp::Up, "demo");

    let err = fleet.registry.start("demo").await.unwrap_err();
    assert!(matches!(err, FleetError::RuntimeOperation(_)));
    let ups = fleet
        .runtime
        .calls()
        .iter()
        .filter(|c| c.as_str() == "up demo")
        .count();
    assert_eq!(ups, 1);
}

#[tokio::test]
async fn restart_starts_even_when_stop_fails() {
    let fleet = fleet();
    fleet
        .registry
        .create(CreateInstanceRequest::new("demo"))
        .await
        .unwrap();
    fleet.runtime.fail(FakeOp::Stop, "demo");

    assert!(fleet.registry.restart("demo").await.is_err());
    assert!(fleet.runtime.is_running("demo"));
}

#[tokio::test]
async fn unknown_service_restart_is_rejected() {
    let fleet = fleet();
    fleet
        .registry
        .create(CreateInstanceRequest::new("demo"))
        .await
        .unwrap();
    let err = fleet
        .registry
        .restart_service("demo", "mysql")
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::Validation(_)));
}
