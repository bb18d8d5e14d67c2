use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

use crate::error::{FleetError, Result};
use crate::models::{
    Alert, AlertFilter, AlertRule, AlertRuleUpdate, AlertStats, AlertStatus, Condition,
    MetricSample, NewAlertRule,
};
use crate::services::alert_store::{AlertDocument, AlertStore, MemoryAlertStore};
use crate::services::materializer;

const EVENT_CAPACITY: usize = 64;

/// Alert lifecycle transitions, published to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertEvent {
    Triggered(Alert),
    Acknowledged(Alert),
    Resolved(Alert),
}

impl AlertEvent {
    pub fn alert(&self) -> &Alert {
        match self {
            AlertEvent::Triggered(a) | AlertEvent::Acknowledged(a) | AlertEvent::Resolved(a) => a,
        }
    }
}

/// An ongoing breach of one rule, in sample time.
#[derive(Debug, Clone)]
struct Breach {
    started_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    condition: Condition,
    threshold: f64,
    /// The alert this episode raised, once it fired.
    alert_id: Option<String>,
}

impl Breach {
    fn start(rule: &AlertRule, taken_at: DateTime<Utc>) -> Self {
        Self {
            started_at: taken_at,
            last_seen: taken_at,
            condition: rule.condition,
            threshold: rule.threshold,
            alert_id: None,
        }
    }

    fn matches(&self, rule: &AlertRule) -> bool {
        self.condition == rule.condition && self.threshold == rule.threshold
    }
}

#[derive(Default)]
struct EvaluatorState {
    /// Last document loaded or saved by this evaluator.
    document: AlertDocument,
    breaches: HashMap<String, Breach>,
}

/// Alert rules, alert history and the evaluation state machine.
///
/// The store is the source of truth. Every mutation and every evaluation
/// pass reloads it under the store lock, so operator actions taken by other
/// processes are never overwritten. Breach tracking lives in memory only.
pub struct AlertEvaluator {
    store: Arc<dyn AlertStore>,
    state: Mutex<EvaluatorState>,
    events: broadcast::Sender<AlertEvent>,
    max_sample_gap: Duration,
}

impl AlertEvaluator {
    pub async fn open(store: Arc<dyn AlertStore>, max_sample_gap: Duration) -> Result<Self> {
        let document = store.load().await?;
        tracing::debug!(
            rules = document.rules.len(),
            alerts = document.alerts.len(),
            "loaded alert store"
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            store,
            state: Mutex::new(EvaluatorState {
                document,
                breaches: HashMap::new(),
            }),
            events,
            max_sample_gap,
        })
    }

    pub fn in_memory(max_sample_gap: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store: Arc::new(MemoryAlertStore::new()),
            state: Mutex::new(EvaluatorState::default()),
            events,
            max_sample_gap,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: AlertEvent, targets: &[String]) {
        let alert = event.alert();
        let kind = match &event {
            AlertEvent::Triggered(_) => "triggered",
            AlertEvent::Acknowledged(_) => "acknowledged",
            AlertEvent::Resolved(_) => "resolved",
        };
        tracing::info!(
            alert_id = %alert.id,
            rule_id = %alert.rule_id,
            instance = %alert.instance_id,
            targets = ?targets,
            "alert {kind}: {}",
            alert.message
        );
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Apply `change` to the latest stored document and save it. The
    /// in-memory copy is replaced only once the save succeeded, so a failed
    /// save leaves no trace.
    async fn transact<T>(
        &self,
        state: &mut EvaluatorState,
        change: impl FnOnce(&mut AlertDocument) -> Result<T>,
    ) -> Result<T> {
        let _lock = self.store.lock().await?;
        let mut document = self.store.load().await?;
        let out = change(&mut document)?;
        self.store.save(&document).await?;
        state.document = document;
        Ok(out)
    }

    // --- rules ---

    pub async fn create_rule(&self, rule: NewAlertRule) -> Result<AlertRule> {
        validate_rule(&rule)?;
        let now = Utc::now();
        let rule = AlertRule {
            id: Uuid::new_v4().to_string(),
            instance_id: rule.instance_id,
            name: rule.name.trim().to_string(),
            kind: rule.kind,
            condition: rule.condition,
            threshold: rule.threshold,
            duration_secs: rule.duration_secs,
            enabled: rule.enabled,
            notification_targets: rule.notification_targets,
            created_at: now,
            updated_at: now,
        };
        let mut state = self.state.lock().await;
        self.transact(&mut state, |doc| {
            doc.rules.push(rule.clone());
            Ok(())
        })
        .await?;
        tracing::info!(rule_id = %rule.id, instance = %rule.instance_id, kind = %rule.kind, "alert rule created");
        Ok(rule)
    }

    /// Apply the given changes. A changed condition or threshold restarts
    /// any breach in progress.
    pub async fn update_rule(&self, id: &str, update: AlertRuleUpdate) -> Result<AlertRule> {
        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                return Err(FleetError::Validation("rule name must not be empty".into()));
            }
        }
        if let Some(threshold) = update.threshold {
            validate_threshold(threshold)?;
        }

        let mut state = self.state.lock().await;
        let (updated, resets_breach) = self
            .transact(&mut state, |doc| {
                let rule = doc.rule_mut(id)?;
                let mut resets_breach = false;
                if let Some(name) = update.name {
                    rule.name = name.trim().to_string();
                }
                if let Some(condition) = update.condition {
                    resets_breach |= rule.condition != condition;
                    rule.condition = condition;
                }
                if let Some(threshold) = update.threshold {
                    resets_breach |= rule.threshold != threshold;
                    rule.threshold = threshold;
                }
                if let Some(duration_secs) = update.duration_secs {
                    rule.duration_secs = duration_secs;
                }
                if let Some(enabled) = update.enabled {
                    resets_breach |= !enabled;
                    rule.enabled = enabled;
                }
                if let Some(targets) = update.notification_targets {
                    rule.notification_targets = targets;
                }
                rule.updated_at = Utc::now();
                Ok((rule.clone(), resets_breach))
            })
            .await?;
        if resets_breach {
            state.breaches.remove(id);
        }
        Ok(updated)
    }

    /// Disabling stops evaluation but leaves the rule's open alerts alone.
    pub async fn set_rule_enabled(&self, id: &str, enabled: bool) -> Result<AlertRule> {
        self.update_rule(
            id,
            AlertRuleUpdate {
                enabled: Some(enabled),
                ..Default::default()
            },
        )
        .await
    }

    /// Remove the rule. Its alerts stay in history.
    pub async fn delete_rule(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.transact(&mut state, |doc| {
            let before = doc.rules.len();
            doc.rules.retain(|r| r.id != id);
            if doc.rules.len() == before {
                return Err(FleetError::RuleNotFound(id.to_string()));
            }
            Ok(())
        })
        .await?;
        state.breaches.remove(id);
        tracing::info!(rule_id = %id, "alert rule deleted");
        Ok(())
    }

    pub async fn get_rule(&self, id: &str) -> Result<AlertRule> {
        self.state.lock().await.document.rule(id).cloned()
    }

    pub async fn list_rules(&self, instance_id: Option<&str>) -> Vec<AlertRule> {
        let state = self.state.lock().await;
        state
            .document
            .rules
            .iter()
            .filter(|r| instance_id.map_or(true, |id| r.instance_id == id))
            .cloned()
            .collect()
    }

    // --- alerts ---

    /// Matching alerts, newest first.
    pub async fn list_alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        let state = self.state.lock().await;
        let mut alerts: Vec<Alert> = state
            .document
            .alerts
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        alerts
    }

    pub async fn get_alert(&self, id: &str) -> Result<Alert> {
        self.state.lock().await.document.alert(id).cloned()
    }

    /// Operator acknowledgement, only valid while the alert is active.
    pub async fn acknowledge(&self, id: &str) -> Result<Alert> {
        let mut state = self.state.lock().await;
        let (alert, targets) = self
            .transact(&mut state, |doc| {
                let alert = doc.alert_mut(id)?;
                if alert.status != AlertStatus::Active {
                    return Err(FleetError::Validation(format!(
                        "alert '{id}' is {}, only active alerts can be acknowledged",
                        alert.status
                    )));
                }
                alert.status = AlertStatus::Acknowledged;
                alert.acknowledged_at = Some(Utc::now());
                let alert = alert.clone();
                let targets = doc.targets_of(&alert.rule_id);
                Ok((alert, targets))
            })
            .await?;
        self.publish(AlertEvent::Acknowledged(alert.clone()), &targets);
        Ok(alert)
    }

    /// Operator resolution of an open alert. A breach still in progress
    /// starts a new episode from the next breached sample.
    pub async fn resolve(&self, id: &str) -> Result<Alert> {
        let mut state = self.state.lock().await;
        let (alert, targets) = self
            .transact(&mut state, |doc| {
                let alert = doc.alert_mut(id)?;
                if !alert.status.is_open() {
                    return Err(FleetError::Validation(format!("alert '{id}' is already resolved")));
                }
                alert.status = AlertStatus::Resolved;
                alert.resolved_at = Some(Utc::now());
                let alert = alert.clone();
                let targets = doc.targets_of(&alert.rule_id);
                Ok((alert, targets))
            })
            .await?;
        state.breaches.remove(&alert.rule_id);
        self.publish(AlertEvent::Resolved(alert.clone()), &targets);
        Ok(alert)
    }

    pub async fn stats(&self, instance_id: Option<&str>) -> AlertStats {
        let state = self.state.lock().await;
        let mut stats = AlertStats::default();
        for alert in state
            .document
            .alerts
            .iter()
            .filter(|a| instance_id.map_or(true, |id| a.instance_id == id))
        {
            stats.record(alert.status);
        }
        stats
    }

    // --- evaluation ---

    /// Run every enabled rule against the latest sample of its instance.
    ///
    /// A rule fires once its condition has held for `duration_secs` of
    /// sample time without interruption. A missing sample, a missing metric,
    /// a non-breaching sample, or a gap longer than the configured maximum
    /// between samples all interrupt the breach. Rules whose metric is
    /// missing are skipped for this pass.
    ///
    /// When the save fails no event is published and the stored alerts stay
    /// as they were. Breach continuity is kept, so the next pass makes the
    /// same transitions again and publishes them then.
    pub async fn evaluate(&self, samples: &[MetricSample]) -> Result<Vec<AlertEvent>> {
        let mut latest: HashMap<&str, &MetricSample> = HashMap::new();
        for sample in samples {
            latest
                .entry(sample.instance_id.as_str())
                .and_modify(|s| {
                    if sample.taken_at > s.taken_at {
                        *s = sample;
                    }
                })
                .or_insert(sample);
        }

        let mut state = self.state.lock().await;
        let lock = self.store.lock().await?;
        let mut document = self.store.load().await?;
        let breaches = &mut state.breaches;
        breaches.retain(|id, _| document.rules.iter().any(|r| r.id == *id));

        let mut events = Vec::new();
        let rules: Vec<AlertRule> = document.rules.clone();
        for rule in rules.iter() {
            if !rule.enabled {
                breaches.remove(&rule.id);
                continue;
            }
            let Some(sample) = latest.get(rule.instance_id.as_str()) else {
                tracing::debug!(rule_id = %rule.id, instance = %rule.instance_id, "no sample, skipping rule");
                breaches.remove(&rule.id);
                continue;
            };
            let Some(value) = sample.value_for(rule.kind) else {
                tracing::warn!(
                    rule_id = %rule.id,
                    instance = %rule.instance_id,
                    metric = rule.kind.metric_name(),
                    "metric unavailable, skipping rule"
                );
                breaches.remove(&rule.id);
                continue;
            };

            if let Some(event) = self.step(&mut document, breaches, rule, sample.taken_at, value) {
                events.push(event);
            }
        }

        if !events.is_empty() {
            if let Err(e) = self.store.save(&document).await {
                for event in &events {
                    if let AlertEvent::Triggered(alert) = event {
                        if let Some(breach) = state.breaches.get_mut(&alert.rule_id) {
                            breach.alert_id = None;
                        }
                    }
                }
                tracing::warn!(error = %e, events = events.len(), "failed to save alert transitions");
                return Err(e);
            }
        }
        drop(lock);
        for event in &events {
            self.publish(event.clone(), &document.targets_of(&event.alert().rule_id));
        }
        state.document = document;
        Ok(events)
    }

    fn step(
        &self,
        document: &mut AlertDocument,
        breaches: &mut HashMap<String, Breach>,
        rule: &AlertRule,
        taken_at: DateTime<Utc>,
        value: f64,
    ) -> Option<AlertEvent> {
        let open = document.open_alert_index(&rule.id);

        if !rule.condition.holds(value, rule.threshold) {
            breaches.remove(&rule.id);
            let index = open?;
            let alert = &mut document.alerts[index];
            alert.status = AlertStatus::Resolved;
            alert.resolved_at = Some(Utc::now());
            alert.value = value;
            return Some(AlertEvent::Resolved(alert.clone()));
        }

        let breach = self.track_breach(breaches, rule, taken_at);
        if open.is_some() {
            return None;
        }
        if let Some(raised) = breach.alert_id.as_deref() {
            // Resolved by an operator elsewhere: this sample opens a new
            // episode.
            tracing::debug!(rule_id = %rule.id, alert_id = raised, "alert resolved elsewhere, restarting breach");
            breaches.insert(rule.id.clone(), Breach::start(rule, taken_at));
        }
        let started_at = breaches.get(&rule.id).map_or(taken_at, |b| b.started_at);
        let held = (taken_at - started_at).num_seconds();
        if held < i64::try_from(rule.duration_secs).unwrap_or(i64::MAX) {
            return None;
        }

        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            instance_id: rule.instance_id.clone(),
            rule_name: rule.name.clone(),
            kind: rule.kind,
            condition: rule.condition,
            threshold: rule.threshold,
            value,
            status: AlertStatus::Active,
            message: alert_message(rule, value, held),
            triggered_at: Utc::now(),
            acknowledged_at: None,
            resolved_at: None,
        };
        if let Some(breach) = breaches.get_mut(&rule.id) {
            breach.alert_id = Some(alert.id.clone());
        }
        document.alerts.push(alert.clone());
        Some(AlertEvent::Triggered(alert))
    }

    /// Extend or start the breach for a breaching sample.
    fn track_breach(
        &self,
        breaches: &mut HashMap<String, Breach>,
        rule: &AlertRule,
        taken_at: DateTime<Utc>,
    ) -> Breach {
        let breach = breaches
            .entry(rule.id.clone())
            .or_insert_with(|| Breach::start(rule, taken_at));
        if !breach.matches(rule) {
            tracing::debug!(rule_id = %rule.id, "rule changed, restarting breach");
            *breach = Breach::start(rule, taken_at);
        }
        match (taken_at - breach.last_seen).to_std() {
            Ok(gap) if gap > self.max_sample_gap => {
                tracing::debug!(rule_id = %rule.id, gap_secs = gap.as_secs(), "sample gap interrupted breach");
                *breach = Breach::start(rule, taken_at);
            }
            Ok(_) => breach.last_seen = taken_at,
            // Older than what was already seen: nothing to extend.
            Err(_) => {}
        }
        breach.clone()
    }
}

fn alert_message(rule: &AlertRule, value: f64, held_secs: i64) -> String {
    format!(
        "{}: {} is {} ({} {}) for {}s on {}",
        rule.name,
        rule.kind.metric_name(),
        format_value(value),
        rule.condition,
        format_value(rule.threshold),
        held_secs,
        rule.instance_id
    )
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.1}")
    }
}

fn validate_threshold(threshold: f64) -> Result<()> {
    if !threshold.is_finite() {
        return Err(FleetError::Validation("threshold must be a finite number".into()));
    }
    Ok(())
}

fn validate_rule(rule: &NewAlertRule) -> Result<()> {
    if rule.name.trim().is_empty() {
        return Err(FleetError::Validation("rule name must not be empty".into()));
    }
    materializer::validate_name(&rule.instance_id)?;
    validate_threshold(rule.threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use crate::models::{Condition, RuleKind};

    fn evaluator() -> AlertEvaluator {
        AlertEvaluator::in_memory(Duration::from_secs(60))
    }

    fn cpu(at: DateTime<Utc>, value: f64) -> MetricSample {
        let mut sample = MetricSample::empty("demo", at);
        sample.cpu_percent = Some(value);
        sample
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + TimeDelta::seconds(secs)
    }

    #[tokio::test]
    async fn zero_duration_rule_fires_on_first_breach() {
        let evaluator = evaluator();
        evaluator
            .create_rule(NewAlertRule::new("demo", "cpu", RuleKind::HighCpu, 80.0))
            .await
            .unwrap();
        let events = evaluator.evaluate(&[cpu(at(0), 95.0)]).await.unwrap();
        assert_eq!(events.len(), 1);
        insta::assert_snapshot!(events[0].alert().message, @"cpu: cpu % is 95 (> 80) for 0s on demo");
    }

    #[tokio::test]
    async fn gap_resets_continuity() {
        let evaluator = evaluator();
        evaluator
            .create_rule(NewAlertRule::new("demo", "cpu", RuleKind::HighCpu, 80.0).with_duration(120))
            .await
            .unwrap();
        for secs in [0, 30, 60] {
            assert!(evaluator.evaluate(&[cpu(at(secs), 90.0)]).await.unwrap().is_empty());
        }
        // 90s of silence exceeds the 60s gap: the episode starts over at 150.
        for secs in [150, 180, 210, 240] {
            assert!(evaluator.evaluate(&[cpu(at(secs), 90.0)]).await.unwrap().is_empty());
        }
        let events = evaluator.evaluate(&[cpu(at(270), 90.0)]).await.unwrap();
        assert!(matches!(events.as_slice(), [AlertEvent::Triggered(_)]));
    }

    #[tokio::test]
    async fn missing_metric_skips_and_resets() {
        let evaluator = evaluator();
        evaluator
            .create_rule(NewAlertRule::new("demo", "cpu", RuleKind::HighCpu, 80.0).with_duration(60))
            .await
            .unwrap();
        evaluator.evaluate(&[cpu(at(0), 90.0)]).await.unwrap();
        evaluator.evaluate(&[cpu(at(30), 90.0)]).await.unwrap();
        evaluator
            .evaluate(&[MetricSample::empty("demo", at(45))])
            .await
            .unwrap();
        assert!(evaluator.evaluate(&[cpu(at(60), 90.0)]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn acknowledge_only_from_active() {
        let evaluator = evaluator();
        evaluator
            .create_rule(NewAlertRule::new("demo", "cpu", RuleKind::HighCpu, 80.0))
            .await
            .unwrap();
        let events = evaluator.evaluate(&[cpu(at(0), 95.0)]).await.unwrap();
        let id = events[0].alert().id.clone();

        let acked = evaluator.acknowledge(&id).await.unwrap();
        assert_eq!(acked.status, AlertStatus::Acknowledged);
        assert!(acked.acknowledged_at.is_some());
        assert!(matches!(evaluator.acknowledge(&id).await, Err(FleetError::Validation(_))));

        // Still breaching: no duplicate while acknowledged.
        assert!(evaluator.evaluate(&[cpu(at(30), 95.0)]).await.unwrap().is_empty());

        let events = evaluator.evaluate(&[cpu(at(60), 10.0)]).await.unwrap();
        assert!(matches!(events.as_slice(), [AlertEvent::Resolved(a)] if a.id == id));
        assert!(matches!(evaluator.acknowledge(&id).await, Err(FleetError::Validation(_))));
    }

    #[tokio::test]
    async fn operator_resolve_restarts_episode() {
        let evaluator = evaluator();
        evaluator
            .create_rule(NewAlertRule::new("demo", "cpu", RuleKind::HighCpu, 80.0).with_duration(30))
            .await
            .unwrap();
        evaluator.evaluate(&[cpu(at(0), 95.0)]).await.unwrap();
        let events = evaluator.evaluate(&[cpu(at(30), 95.0)]).await.unwrap();
        let id = events[0].alert().id.clone();
        evaluator.resolve(&id).await.unwrap();
        assert!(matches!(evaluator.resolve(&id).await, Err(FleetError::Validation(_))));

        assert!(evaluator.evaluate(&[cpu(at(60), 95.0)]).await.unwrap().is_empty());
        let events = evaluator.evaluate(&[cpu(at(90), 95.0)]).await.unwrap();
        assert!(matches!(events.as_slice(), [AlertEvent::Triggered(a)] if a.id != id));
    }

    #[tokio::test]
    async fn disabling_rule_keeps_alerts_open() {
        let evaluator = evaluator();
        let rule = evaluator
            .create_rule(NewAlertRule::new("demo", "cpu", RuleKind::HighCpu, 80.0))
            .await
            .unwrap();
        evaluator.evaluate(&[cpu(at(0), 95.0)]).await.unwrap();
        evaluator.set_rule_enabled(&rule.id, false).await.unwrap();

        assert!(evaluator.evaluate(&[cpu(at(30), 10.0)]).await.unwrap().is_empty());
        assert_eq!(evaluator.stats(Some("demo")).await.active, 1);
    }

    #[tokio::test]
    async fn deleted_rule_leaves_history() {
        let evaluator = evaluator();
        let rule = evaluator
            .create_rule(NewAlertRule::new("demo", "cpu", RuleKind::HighCpu, 80.0))
            .await
            .unwrap();
        evaluator.evaluate(&[cpu(at(0), 95.0)]).await.unwrap();
        evaluator.delete_rule(&rule.id).await.unwrap();

        assert!(evaluator.get_rule(&rule.id).await.unwrap_err().is_not_found());
        assert!(evaluator.delete_rule(&rule.id).await.unwrap_err().is_not_found());
        let alerts = evaluator.list_alerts(&AlertFilter::for_instance("demo")).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule_id, rule.id);
    }

    #[tokio::test]
    async fn rule_validation() {
        let evaluator = evaluator();
        let blank = NewAlertRule::new("demo", "  ", RuleKind::HighCpu, 80.0);
        assert!(matches!(evaluator.create_rule(blank).await, Err(FleetError::Validation(_))));
        let nan = NewAlertRule::new("demo", "cpu", RuleKind::HighCpu, f64::NAN);
        assert!(matches!(evaluator.create_rule(nan).await, Err(FleetError::Validation(_))));
        let bad_instance = NewAlertRule::new("Not Valid", "cpu", RuleKind::HighCpu, 80.0);
        assert!(matches!(
            evaluator.create_rule(bad_instance).await,
            Err(FleetError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn less_than_rule_and_update() {
        let evaluator = evaluator();
        let rule = evaluator
            .create_rule(
                NewAlertRule::new("demo", "idle", RuleKind::HighCpu, 5.0)
                    .with_condition(Condition::LessThan),
            )
            .await
            .unwrap();
        let events = evaluator.evaluate(&[cpu(at(0), 1.0)]).await.unwrap();
        assert_eq!(events.len(), 1);

        let updated = evaluator
            .update_rule(
                &rule.id,
                AlertRuleUpdate {
                    threshold: Some(0.5),
                    name: Some("very idle".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "very idle");
        assert_eq!(updated.threshold, 0.5);
        assert!(updated.updated_at >= rule.updated_at);

        // 1.0 < 0.5 no longer holds: the open alert resolves.
        let events = evaluator.evaluate(&[cpu(at(30), 1.0)]).await.unwrap();
        assert!(matches!(events.as_slice(), [AlertEvent::Resolved(_)]));
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let evaluator = evaluator();
        let mut rx = evaluator.subscribe();
        evaluator
            .create_rule(NewAlertRule::new("demo", "cpu", RuleKind::HighCpu, 80.0))
            .await
            .unwrap();
        evaluator.evaluate(&[cpu(at(0), 95.0)]).await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), AlertEvent::Triggered(_)));
    }

    /// Memory store whose saves can be switched off.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryAlertStore,
        failing: std::sync::atomic::AtomicBool,
    }

    impl FlakyStore {
        fn fail_saves(&self, failing: bool) {
            self.failing.store(failing, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl AlertStore for FlakyStore {
        async fn load(&self) -> Result<AlertDocument> {
            self.inner.load().await
        }

        async fn save(&self, document: &AlertDocument) -> Result<()> {
            if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(FleetError::State("disk full".into()));
            }
            self.inner.save(document).await
        }
    }

    #[tokio::test]
    async fn failed_save_changes_nothing() {
        let store = Arc::new(FlakyStore::default());
        let evaluator = AlertEvaluator::open(store.clone(), Duration::from_secs(60))
            .await
            .unwrap();
        let mut rx = evaluator.subscribe();

        store.fail_saves(true);
        let err = evaluator
            .create_rule(NewAlertRule::new("demo", "cpu", RuleKind::HighCpu, 80.0))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::State(_)));
        assert!(evaluator.list_rules(None).await.is_empty());

        store.fail_saves(false);
        let rule = evaluator
            .create_rule(NewAlertRule::new("demo", "cpu", RuleKind::HighCpu, 80.0).with_duration(30))
            .await
            .unwrap();
        assert!(evaluator.evaluate(&[cpu(at(0), 95.0)]).await.unwrap().is_empty());

        store.fail_saves(true);
        assert!(evaluator.evaluate(&[cpu(at(30), 95.0)]).await.is_err());
        assert!(evaluator.list_alerts(&AlertFilter::default()).await.is_empty());
        assert!(rx.try_recv().is_err());
        assert!(evaluator.set_rule_enabled(&rule.id, false).await.is_err());
        assert!(evaluator.get_rule(&rule.id).await.unwrap().enabled);

        store.fail_saves(false);
        let events = evaluator.evaluate(&[cpu(at(60), 95.0)]).await.unwrap();
        assert!(matches!(events.as_slice(), [AlertEvent::Triggered(a)] if a.rule_id == rule.id));
        assert!(matches!(rx.try_recv(), Ok(AlertEvent::Triggered(_))));
        assert_eq!(evaluator.stats(None).await.active, 1);
    }

    #[tokio::test]
    async fn resolve_from_another_evaluator_is_seen() {
        let store: Arc<dyn AlertStore> = Arc::new(MemoryAlertStore::new());
        let monitor = AlertEvaluator::open(store.clone(), Duration::from_secs(60))
            .await
            .unwrap();
        let operator = AlertEvaluator::open(store, Duration::from_secs(60)).await.unwrap();

        operator
            .create_rule(NewAlertRule::new("demo", "cpu", RuleKind::HighCpu, 80.0).with_duration(30))
            .await
            .unwrap();
        assert!(monitor.evaluate(&[cpu(at(0), 95.0)]).await.unwrap().is_empty());
        let events = monitor.evaluate(&[cpu(at(30), 95.0)]).await.unwrap();
        let id = events[0].alert().id.clone();

        operator.resolve(&id).await.unwrap();

        // The monitor picks up the resolution and starts a new episode.
        assert!(monitor.evaluate(&[cpu(at(60), 95.0)]).await.unwrap().is_empty());
        assert_eq!(monitor.get_alert(&id).await.unwrap().status, AlertStatus::Resolved);
        let events = monitor.evaluate(&[cpu(at(90), 95.0)]).await.unwrap();
        assert!(matches!(events.as_slice(), [AlertEvent::Triggered(a)] if a.id != id));
        assert_eq!(operator.stats(None).await.active, 0);
    }
}
