mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mb_core::models::{AlertFilter, AlertStatus, NewAlertRule, RuleKind};
use mb_core::services::alert_store::JsonAlertStore;
use mb_core::services::alerts::{AlertEvaluator, AlertEvent};

use common::cpu_sample;

fn evaluator() -> AlertEvaluator {
    AlertEvaluator::in_memory(Duration::from_secs(60))
}

#[tokio::test]
async fn sustained_breach_fires_exactly_once_then_resolves() {
    let evaluator = evaluator();
    let rule = evaluator
        .create_rule(NewAlertRule::new("demo", "cpu high", RuleKind::HighCpu, 80.0).with_duration(300))
        .await
        .unwrap();

    let mut events = Vec::new();
    for secs in (0..=420).step_by(30) {
        events.extend(evaluator.evaluate(&[cpu_sample("demo", secs, 85.0)]).await.unwrap());
    }
    assert_eq!(events.len(), 1);
    let AlertEvent::Triggered(alert) = &events[0] else {
        panic!("expected a trigger, got {:?}", events[0]);
    };
    assert_eq!(alert.rule_id, rule.id);
    assert_eq!(alert.status, AlertStatus::Active);
    insta::assert_snapshot!(alert.message, @"cpu high: cpu % is 85 (> 80) for 300s on demo");

    let events = evaluator
        .evaluate(&[cpu_sample("demo", 450, 60.0)])
        .await
        .unwrap();
    assert!(matches!(events.as_slice(), [AlertEvent::Resolved(a)] if a.id == alert.id));

    let alerts = evaluator.list_alerts(&AlertFilter::for_instance("demo")).await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].status, AlertStatus::Resolved);
    assert!(alerts[0].resolved_at.is_some());
}

#[tokio::test]
async fn breach_shorter_than_duration_never_fires() {
    let evaluator = evaluator();
    evaluator
        .create_rule(NewAlertRule::new("demo", "cpu high", RuleKind::HighCpu, 80.0).with_duration(300))
        .await
        .unwrap();
    let mut fired = 0;
    for (secs, cpu) in [(0, 90.0), (30, 90.0), (60, 70.0), (90, 90.0), (120, 90.0)] {
        fired += evaluator
            .evaluate(&[cpu_sample("demo", secs, cpu)])
            .await
            .unwrap()
            .len();
    }
    assert_eq!(fired, 0);
}

#[tokio::test]
async fn rules_only_see_their_own_instance() {
    let evaluator = evaluator();
    evaluator
        .create_rule(NewAlertRule::new("alpha", "cpu", RuleKind::HighCpu, 80.0))
        .await
        .unwrap();
    evaluator
        .create_rule(NewAlertRule::new("beta", "cpu", RuleKind::HighCpu, 80.0))
        .await
        .unwrap();

    let events = evaluator
        .evaluate(&[cpu_sample("alpha", 0, 99.0), cpu_sample("beta", 0, 10.0)])
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].alert().instance_id, "alpha");

    let stats = evaluator.stats(None).await;
    assert_eq!((stats.total, stats.active), (1, 1));
    assert_eq!(evaluator.stats(Some("beta")).await.total, 0);
}

#[tokio::test]
async fn latest_sample_per_instance_wins() {
    let evaluator = evaluator();
    evaluator
        .create_rule(NewAlertRule::new("demo", "cpu", RuleKind::HighCpu, 80.0))
        .await
        .unwrap();
    let events = evaluator
        .evaluate(&[cpu_sample("demo", 30, 10.0), cpu_sample("demo", 0, 99.0)])
        .await
        .unwrap();
    assert!(events.is_empty());
}

#[tokio::test]
async fn rules_and_alerts_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonAlertStore::new(dir.path()));
    let evaluator = AlertEvaluator::open(store, Duration::from_secs(60))
        .await
        .unwrap();
    let rule = evaluator
        .create_rule(NewAlertRule::new("demo", "cpu", RuleKind::HighCpu, 80.0))
        .await
        .unwrap();
    let events = evaluator
        .evaluate(&[cpu_sample("demo", 0, 99.0)])
        .await
        .unwrap();
    let alert_id = events[0].alert().id.clone();
    evaluator.acknowledge(&alert_id).await.unwrap();

    let reopened = AlertEvaluator::open(
        Arc::new(JsonAlertStore::new(dir.path())),
        Duration::from_secs(60),
    )
    .await
    .unwrap();
    assert_eq!(reopened.get_rule(&rule.id).await.unwrap(), rule);
    let alert = reopened.get_alert(&alert_id).await.unwrap();
    assert_eq!(alert.status, AlertStatus::Acknowledged);

    // An open alert still suppresses duplicates after a restart.
    let events = reopened
        .evaluate(&[cpu_sample("demo", 30, 99.0)])
        .await
        .unwrap();
    assert!(events.is_empty());
}

async fn json_evaluator(dir: &Path) -> AlertEvaluator {
    AlertEvaluator::open(Arc::new(JsonAlertStore::new(dir)), Duration::from_secs(60))
        .await
        .unwrap()
}

#[tokio::test]
async fn operator_changes_from_another_process_are_kept() {
    let dir = tempfile::tempdir().unwrap();
    let monitor = json_evaluator(dir.path()).await;
    let cli = json_evaluator(dir.path()).await;

    let rule = cli
        .create_rule(NewAlertRule::new("demo", "cpu", RuleKind::HighCpu, 80.0))
        .await
        .unwrap();
    let events = monitor
        .evaluate(&[cpu_sample("demo", 0, 99.0)])
        .await
        .unwrap();
    let alert_id = events[0].alert().id.clone();

    cli.acknowledge(&alert_id).await.unwrap();
    let second = cli
        .create_rule(NewAlertRule::new("demo", "memory", RuleKind::HighMemory, 90.0))
        .await
        .unwrap();

    let events = monitor
        .evaluate(&[cpu_sample("demo", 30, 10.0)])
        .await
        .unwrap();
    assert!(matches!(events.as_slice(), [AlertEvent::Resolved(a)] if a.id == alert_id));

    let reopened = json_evaluator(dir.path()).await;
    let ids: Vec<String> = reopened.list_rules(None).await.into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![rule.id, second.id]);
    let alert = reopened.get_alert(&alert_id).await.unwrap();
    assert_eq!(alert.status, AlertStatus::Resolved);
    assert!(alert.acknowledged_at.is_some());
}

#[tokio::test]
async fn concurrent_writers_lose_no_rules() {
    let dir = tempfile::tempdir().unwrap();
    let first = Arc::new(json_evaluator(dir.path()).await);
    let second = Arc::new(json_evaluator(dir.path()).await);

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..10 {
        for evaluator in [first.clone(), second.clone()] {
            tasks.spawn(async move {
                evaluator
                    .create_rule(NewAlertRule::new("demo", &format!("rule {i}"), RuleKind::HighCpu, 80.0))
                    .await
                    .unwrap();
            });
        }
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    let reopened = json_evaluator(dir.path()).await;
    assert_eq!(reopened.list_rules(Some("demo")).await.len(), 20);
}
