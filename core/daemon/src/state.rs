//! State owned by the daemon.
//!
//! One `Mutex` guards the result store together with the queue of
//! undelivered notifications. Socket handlers and the watchdog thread all go
//! through it, so transitions apply one at a time in arrival order.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use cometa_results_protocol::{BrowserStatusQuery, Ingress, LastRunQuery};
use results_core::{
    selectors, BrowserKey, Effect, FeatureId, FeatureNotification, FeatureResultEntry,
    NotificationBridge, ResultStore, ResultsConfig, RunId, StepStatus,
};

// Oldest undelivered notifications are dropped beyond this.
const MAX_PENDING_NOTIFICATIONS: usize = 256;

pub struct SharedState {
    inner: Mutex<Inner>,
}

struct Inner {
    store: ResultStore,
    pending: VecDeque<FeatureNotification>,
    counters: Counters,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Counters {
    pub events_applied: u64,
    pub events_passed_through: u64,
    pub events_rejected: u64,
    pub timeouts_fired: u64,
    pub info_updates: u64,
    pub notifications_emitted: u64,
    pub notifications_dropped: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    Applied,
    PassedThrough,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureStatusView {
    pub feature_id: FeatureId,
    /// `false` when no event for the feature has arrived yet.
    pub status: Value,
    pub running: bool,
    pub last_run_id: Option<RunId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrowserStatusView {
    pub feature_id: FeatureId,
    pub run_id: RunId,
    pub browser_key: BrowserKey,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastRunView {
    pub feature_id: FeatureId,
    pub run_id: Option<RunId>,
    pub browser_key: BrowserKey,
    pub steps: Vec<Option<StepStatus>>,
    pub details: BTreeMap<usize, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub features_tracked: usize,
    pub armed_timers: usize,
    pub pending_notifications: usize,
    pub subscriptions: usize,
    pub counters: Counters,
}

impl SharedState {
    pub fn new(config: &ResultsConfig, notifications: NotificationBridge) -> Self {
        Self {
            inner: Mutex::new(Inner {
                store: ResultStore::new(config, notifications),
                pending: VecDeque::new(),
                counters: Counters::default(),
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, String> {
        self.inner
            .lock()
            .map_err(|_| "Result store lock poisoned".to_string())
    }

    pub fn apply_ingress(&self, ingress: &Ingress, now: DateTime<Utc>) -> Result<IngestOutcome, String> {
        let mut inner = self.lock()?;
        if let Ingress::Passthrough { event_type, .. } = ingress {
            tracing::debug!(event_type = %event_type, "Passing through event");
            inner.counters.events_passed_through += 1;
            return Ok(IngestOutcome::PassedThrough);
        }

        match inner.store.dispatch_ingress(ingress, now) {
            Ok(effects) => {
                inner.counters.events_applied += 1;
                inner.handle_effects(effects);
                Ok(IngestOutcome::Applied)
            }
            Err(err) => {
                inner.counters.events_rejected += 1;
                Err(err.to_string())
            }
        }
    }

    /// Fires expired watchdogs. Returns how many fired.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<usize, String> {
        let mut inner = self.lock()?;
        let effects = inner.store.tick(now);
        let fired = effects.len();
        inner.handle_effects(effects);
        Ok(fired)
    }

    pub fn feature_status(&self, feature_id: FeatureId) -> Result<FeatureStatusView, String> {
        let inner = self.lock()?;
        let tree = inner.store.tree();
        Ok(FeatureStatusView {
            feature_id,
            status: selectors::feature_status(tree, feature_id)
                .map(|status| Value::String(status.to_string()))
                .unwrap_or(Value::Bool(false)),
            running: selectors::feature_running_status(tree, feature_id),
            last_run_id: selectors::last_feature_run_id(tree, feature_id),
        })
    }

    pub fn feature_results(&self, feature_id: FeatureId) -> Result<Option<FeatureResultEntry>, String> {
        let inner = self.lock()?;
        Ok(selectors::feature_results(inner.store.tree(), feature_id).cloned())
    }

    pub fn browser_status(&self, query: &BrowserStatusQuery) -> Result<BrowserStatusView, String> {
        let inner = self.lock()?;
        let browser_key = BrowserKey::from(query.browser_key.as_str());
        let status = selectors::feature_browser_status(
            inner.store.tree(),
            query.feature_id,
            query.run_id,
            &browser_key,
        )
        .map(str::to_string);
        Ok(BrowserStatusView {
            feature_id: query.feature_id,
            run_id: query.run_id,
            browser_key,
            status,
        })
    }

    pub fn last_run(&self, query: &LastRunQuery) -> Result<LastRunView, String> {
        let inner = self.lock()?;
        let tree = inner.store.tree();
        let browser_key = BrowserKey::from(query.browser_key.as_str());
        let run_id = selectors::last_feature_run_id(tree, query.feature_id);
        let entry = run_id.and_then(|run_id| {
            selectors::browser_result(tree, query.feature_id, run_id, &browser_key)
        });

        Ok(LastRunView {
            feature_id: query.feature_id,
            run_id,
            steps: entry.map(|entry| entry.steps.clone()).unwrap_or_default(),
            details: entry.map(|entry| entry.details.clone()).unwrap_or_default(),
            browser_key,
        })
    }

    pub fn cleanup(&self, feature_id: FeatureId) -> Result<Vec<RunId>, String> {
        let mut inner = self.lock()?;
        let removed = inner.store.cleanup_feature_results(feature_id);
        tracing::info!(feature_id, removed = ?removed, "Cleanup requested");
        Ok(removed)
    }

    pub fn subscribe(&self, feature_id: FeatureId) -> Result<bool, String> {
        let mut inner = self.lock()?;
        inner
            .store
            .notifications_mut()
            .add(feature_id)
            .map_err(|err| err.to_string())
    }

    pub fn unsubscribe(&self, feature_id: FeatureId) -> Result<bool, String> {
        let mut inner = self.lock()?;
        inner
            .store
            .notifications_mut()
            .remove(feature_id)
            .map_err(|err| err.to_string())
    }

    pub fn subscriptions(&self) -> Result<Vec<FeatureId>, String> {
        let inner = self.lock()?;
        Ok(inner.store.notifications().ids())
    }

    /// Drains undelivered notifications; each is handed out once.
    pub fn take_notifications(&self) -> Result<Vec<FeatureNotification>, String> {
        let mut inner = self.lock()?;
        Ok(inner.pending.drain(..).collect())
    }

    pub fn health_snapshot(&self) -> Result<HealthSnapshot, String> {
        let inner = self.lock()?;
        Ok(HealthSnapshot {
            features_tracked: inner.store.tree().len(),
            armed_timers: inner.store.watchdog().armed_count(),
            pending_notifications: inner.pending.len(),
            subscriptions: inner.store.notifications().ids().len(),
            counters: inner.counters.clone(),
        })
    }
}

impl Inner {
    fn handle_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::FeatureInfoUpdated {
                    feature_id,
                    feature_result_id,
                } => {
                    self.counters.info_updates += 1;
                    tracing::info!(feature_id, feature_result_id = ?feature_result_id, "Feature info updated");
                }
                Effect::Notify(notice) => {
                    self.counters.notifications_emitted += 1;
                    tracing::info!(
                        feature_id = notice.feature_id,
                        run_id = notice.run_id,
                        message = %notice.message,
                        "Queued completion notification"
                    );
                    if self.pending.len() >= MAX_PENDING_NOTIFICATIONS {
                        self.pending.pop_front();
                        self.counters.notifications_dropped += 1;
                    }
                    self.pending.push_back(notice);
                }
                Effect::TimedOut(key) => {
                    self.counters.timeouts_fired += 1;
                    tracing::warn!(
                        feature_id = key.feature_id,
                        run_id = key.run_id,
                        browser_key = %key.browser_key,
                        "Run stalled; marked as timed out"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use cometa_results_protocol::{parse_ingress, BrowserInfo, ExecutionEvent, StepStart};
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap()
    }

    fn ingress(value: Value) -> Ingress {
        parse_ingress(value).expect("ingress")
    }

    fn finished(feature_id: i64) -> Ingress {
        ingress(json!({
            "type": "[WebSockets] Feature Finished",
            "feature_id": feature_id,
            "run_id": 1,
            "feature_result_id": 5,
            "browser_info": {"browser": "chrome", "os": "linux"}
        }))
    }

    fn state() -> SharedState {
        SharedState::new(&ResultsConfig::default(), NotificationBridge::new_in_memory())
    }

    #[test]
    fn unknown_feature_status_is_false() {
        let state = state();
        let view = state.feature_status(42).expect("status");
        assert_eq!(view.status, Value::Bool(false));
        assert!(!view.running);
        assert_eq!(view.last_run_id, None);
    }

    #[test]
    fn notifications_are_delivered_once() {
        let state = state();
        state.subscribe(3).expect("subscribe");
        state.apply_ingress(&finished(3), t0()).expect("apply");

        let first = state.take_notifications().expect("take");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].feature_id, 3);
        assert!(state.take_notifications().expect("take again").is_empty());
    }

    #[test]
    fn passthrough_and_rejections_are_counted() {
        let state = state();
        let outcome = state
            .apply_ingress(&ingress(json!({"type": "[Other] Thing"})), t0())
            .expect("passthrough");
        assert_eq!(outcome, IngestOutcome::PassedThrough);

        let malformed = ingress(json!({
            "type": "[WebSockets] Feature Queued",
            "feature_id": 1,
            "run_id": 1,
            "browser_info": {"os": "linux"}
        }));
        assert!(state.apply_ingress(&malformed, t0()).is_err());

        let health = state.health_snapshot().expect("health");
        assert_eq!(health.counters.events_passed_through, 1);
        assert_eq!(health.counters.events_rejected, 1);
        assert_eq!(health.features_tracked, 0);
    }

    #[test]
    fn huge_step_index_is_rejected_and_store_stays_usable() {
        let state = state();
        let payload = json!({
            "type": "[WebSockets] Step Started",
            "feature_id": 1,
            "run_id": 1,
            "browser_info": {"browser": "chrome"},
            "step_name": "Open page",
            "step_index": u64::MAX
        });
        assert_eq!(
            parse_ingress(payload).expect_err("rejected at parse").code,
            "invalid_event"
        );

        let unchecked = Ingress::Execution(ExecutionEvent::StepStarted(StepStart {
            feature_id: 1,
            run_id: 1,
            browser_info: BrowserInfo {
                browser: Some("chrome".to_string()),
                ..BrowserInfo::default()
            },
            step_name: "Open page".to_string(),
            step_index: usize::MAX,
            datetime: String::new(),
        }));
        assert!(state.apply_ingress(&unchecked, t0()).is_err());

        let view = state.feature_status(1).expect("lock still healthy");
        assert_eq!(view.status, Value::Bool(false));
        state.apply_ingress(&finished(1), t0()).expect("later events apply");
        assert_eq!(state.tick(t0()).expect("tick"), 0);
    }

    #[test]
    fn tick_fires_watchdog() {
        let state = state();
        state
            .apply_ingress(
                &ingress(json!({
                    "type": "[WebSockets] Feature Queued",
                    "feature_id": 1,
                    "run_id": 1,
                    "browser_info": {"browser": "chrome"}
                })),
                t0(),
            )
            .expect("apply");
        assert_eq!(state.tick(t0()).expect("tick"), 0);
        assert_eq!(state.tick(t0() + Duration::hours(1)).expect("tick"), 1);

        let view = state
            .browser_status(&BrowserStatusQuery {
                feature_id: 1,
                run_id: 1,
                browser_key: "||chrome|||false".to_string(),
            })
            .expect("status");
        assert_eq!(view.status.as_deref(), Some("Timeout"));
    }

    #[test]
    fn last_run_view_for_unknown_feature_is_empty() {
        let state = state();
        let view = state
            .last_run(&LastRunQuery {
                feature_id: 9,
                browser_key: "||chrome|||false".to_string(),
            })
            .expect("last run");
        assert_eq!(view.run_id, None);
        assert!(view.steps.is_empty());
    }
}
