//! Result store: folds execution events into the result tree.
//!
//! # Transitions
//!
//! ```text
//! event                  feature status / running        browser            watchdog
//! ─────────────────────  ──────────────────────────────  ─────────────────  ────────
//! FeatureQueued          "Feature Queued" / true         "Queued"           reset
//! FeatureInitializing    "Initializing feature" / true   "Initializing"     reset
//! FeatureStarted         "Starting feature" / true       start_at           reset
//! StepStarted            step name / true                step running       clear
//! StepDetailedInfo       -                               details[i]         clear
//! StepFinished           - / true                        step merged        clear
//! FeatureFinished        -                               "Completed"        clear
//! FeatureRunCompleted    "Feature completed" / false     -                  -
//! StoppedFeature         - / false                       run → "Completed"  -
//! FeatureError           - / false                       error (best effort) clear
//! RunTimeout             -                               "Timeout"          -
//! CleanupFeatureResults  fully completed runs dropped
//! ```
//!
//! Any event naming a browser creates the missing feature, run and browser
//! levels first, so arrival order never matters for existence. The most
//! recent event always wins the `running` flag.

use chrono::{DateTime, Utc};

use cometa_results_protocol::{
    BrowserInfo, ExecutionEvent, FeatureFailure, FeatureFinish, FeatureProgress, Ingress,
    StepResult,
};

use crate::browser::browser_key;
use crate::config::ResultsConfig;
use crate::error::Result;
use crate::notifications::{FeatureNotification, NotificationBridge};
use crate::types::{
    check_step_index, BrowserKey, BrowserResultEntry, FeatureId, ResultTree, RunId,
    BROWSER_COMPLETED, BROWSER_INITIALIZING, BROWSER_QUEUED, BROWSER_TIMEOUT,
    STATUS_FEATURE_COMPLETED, STATUS_FEATURE_QUEUED, STATUS_INITIALIZING_FEATURE,
    STATUS_STARTING_FEATURE,
};
use crate::watchdog::{TimeoutSupervisor, TimerKey};

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Event(ExecutionEvent),
    /// Raised by the watchdog; never arrives over the wire.
    RunTimeout(TimerKey),
}

impl From<ExecutionEvent> for Action {
    fn from(event: ExecutionEvent) -> Self {
        Action::Event(event)
    }
}

/// Follow-up work a transition asks the host to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// The feature's stored metadata (last result, timings) should be refetched.
    FeatureInfoUpdated {
        feature_id: FeatureId,
        feature_result_id: Option<i64>,
    },
    Notify(FeatureNotification),
    TimedOut(TimerKey),
}

pub struct ResultStore {
    tree: ResultTree,
    watchdog: TimeoutSupervisor,
    notifications: NotificationBridge,
}

impl ResultStore {
    pub fn new(config: &ResultsConfig, notifications: NotificationBridge) -> Self {
        Self {
            tree: ResultTree::new(),
            watchdog: TimeoutSupervisor::new(config.watchdog.run_timeout()),
            notifications: notifications.with_enabled(config.notifications.enabled),
        }
    }

    pub fn tree(&self) -> &ResultTree {
        &self.tree
    }

    /// Shallow copy of the tree; later transitions never show through it.
    pub fn snapshot(&self) -> ResultTree {
        self.tree.clone()
    }

    pub fn watchdog(&self) -> &TimeoutSupervisor {
        &self.watchdog
    }

    pub fn notifications(&self) -> &NotificationBridge {
        &self.notifications
    }

    pub fn notifications_mut(&mut self) -> &mut NotificationBridge {
        &mut self.notifications
    }

    /// Disarms every watchdog and forgets all results.
    pub fn teardown(&mut self) {
        self.watchdog.clear_all();
        self.tree.clear();
    }

    /// Applies an ingress message. Messages for other consumers are a no-op.
    pub fn dispatch_ingress(&mut self, ingress: &Ingress, now: DateTime<Utc>) -> Result<Vec<Effect>> {
        match ingress {
            Ingress::Execution(event) => self.apply_event(event, now),
            Ingress::Passthrough { event_type, .. } => {
                tracing::trace!(event_type = %event_type, "Ignoring passthrough event");
                Ok(Vec::new())
            }
        }
    }

    pub fn apply(&mut self, action: Action, now: DateTime<Utc>) -> Result<Vec<Effect>> {
        match action {
            Action::Event(event) => self.apply_event(&event, now),
            Action::RunTimeout(key) => {
                self.apply_timeout(&key);
                Ok(vec![Effect::TimedOut(key)])
            }
        }
    }

    /// Fires every expired watchdog.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        self.watchdog
            .expire(now)
            .into_iter()
            .map(|key| {
                self.apply_timeout(&key);
                Effect::TimedOut(key)
            })
            .collect()
    }

    pub fn apply_event(&mut self, event: &ExecutionEvent, now: DateTime<Utc>) -> Result<Vec<Effect>> {
        match event {
            ExecutionEvent::FeatureQueued(progress) => {
                self.on_progress(progress, STATUS_FEATURE_QUEUED, Some(BROWSER_QUEUED), now)?;
            }
            ExecutionEvent::FeatureInitializing(progress) => {
                self.on_progress(
                    progress,
                    STATUS_INITIALIZING_FEATURE,
                    Some(BROWSER_INITIALIZING),
                    now,
                )?;
            }
            ExecutionEvent::FeatureStarted(progress) => {
                self.on_progress(progress, STATUS_STARTING_FEATURE, None, now)?;
                let key = browser_key(&progress.browser_info)?;
                let browser = verify_and_fix(
                    &mut self.tree,
                    progress.feature_id,
                    progress.run_id,
                    &key,
                    &progress.browser_info,
                );
                browser.start_at = Some(
                    progress
                        .datetime
                        .as_deref()
                        .and_then(parse_rfc3339)
                        .unwrap_or(now),
                );
            }
            ExecutionEvent::StepStarted(step) => {
                check_step_index(step.step_index)?;
                let key = browser_key(&step.browser_info)?;
                let feature = self.tree.feature_entry(step.feature_id);
                feature.status = step.step_name.clone();
                feature.running = true;

                let browser = verify_and_fix(
                    &mut self.tree,
                    step.feature_id,
                    step.run_id,
                    &key,
                    &step.browser_info,
                );
                let slot = browser.step_mut(step.step_index)?;
                slot.name = step.step_name.clone();
                slot.datetime = step.datetime.clone();
                slot.running = true;

                self.watchdog
                    .clear(&TimerKey::new(step.feature_id, step.run_id, key));
            }
            ExecutionEvent::StepDetailedInfo(detail) => {
                let key = browser_key(&detail.browser_info)?;
                let browser = verify_and_fix(
                    &mut self.tree,
                    detail.feature_id,
                    detail.run_id,
                    &key,
                    &detail.browser_info,
                );
                browser.details.insert(detail.step_index, detail.info.clone());

                self.watchdog
                    .clear(&TimerKey::new(detail.feature_id, detail.run_id, key));
            }
            ExecutionEvent::StepFinished(step) => self.on_step_finished(step)?,
            ExecutionEvent::FeatureFinished(finish) => {
                return self.on_feature_finished(finish, now);
            }
            ExecutionEvent::FeatureRunCompleted(completion) => {
                let feature = self.tree.feature_entry(completion.feature_id);
                feature.status = STATUS_FEATURE_COMPLETED.to_string();
                feature.running = false;
            }
            ExecutionEvent::StoppedFeature(stop) => {
                let feature = self.tree.feature_entry(stop.feature_id);
                feature.running = false;
                if let Some(run) = feature.results.get_mut(&stop.run_id) {
                    for browser in run.browsers.values_mut() {
                        browser.status = BROWSER_COMPLETED.to_string();
                    }
                }
            }
            ExecutionEvent::FeatureError(failure) => self.on_feature_error(failure),
            ExecutionEvent::CleanupFeatureResults(cleanup) => {
                let removed = self.cleanup_feature_results(cleanup.feature_id);
                tracing::debug!(
                    feature_id = cleanup.feature_id,
                    removed = removed.len(),
                    "Cleaned up completed runs"
                );
            }
        }

        Ok(Vec::new())
    }

    /// Drops every run of `feature_id` whose browsers all report completion.
    /// Returns the removed run ids.
    pub fn cleanup_feature_results(&mut self, feature_id: FeatureId) -> Vec<RunId> {
        let Some(feature) = self.tree.feature_mut(feature_id) else {
            return Vec::new();
        };

        let mut removed = Vec::new();
        feature.results.retain(|run_id, run| {
            let done = run.all_completed();
            if done {
                removed.push(*run_id);
            }
            !done
        });
        removed
    }

    fn on_progress(
        &mut self,
        progress: &FeatureProgress,
        feature_status: &str,
        browser_status: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let key = browser_key(&progress.browser_info)?;

        let feature = self.tree.feature_entry(progress.feature_id);
        feature.status = feature_status.to_string();
        feature.running = true;

        let browser = verify_and_fix(
            &mut self.tree,
            progress.feature_id,
            progress.run_id,
            &key,
            &progress.browser_info,
        );
        if let Some(status) = browser_status {
            browser.status = status.to_string();
        }
        if progress.feature_result_id.is_some() {
            browser.feature_result_id = progress.feature_result_id;
        }

        self.watchdog
            .reset(TimerKey::new(progress.feature_id, progress.run_id, key), now);
        Ok(())
    }

    fn on_step_finished(&mut self, step: &StepResult) -> Result<()> {
        check_step_index(step.step_index)?;
        let key = browser_key(&step.browser_info)?;
        self.tree.feature_entry(step.feature_id).running = true;

        let browser = verify_and_fix(
            &mut self.tree,
            step.feature_id,
            step.run_id,
            &key,
            &step.browser_info,
        );
        let slot = browser.step_mut(step.step_index)?;
        if !step.step_name.is_empty() {
            slot.name = step.step_name.clone();
        }
        if !step.datetime.is_empty() {
            slot.datetime = step.datetime.clone();
        }
        slot.running = false;
        slot.success = step
            .step_result_info
            .as_ref()
            .and_then(|info| info.get("success"))
            .and_then(|value| value.as_bool())
            .unwrap_or(false);
        slot.info = step.step_result_info.clone();
        slot.error = step.error.clone();
        slot.step_time = step.step_time;
        slot.screenshots = step.screenshots.clone();
        slot.vulnerable_headers_count = step.vulnerable_headers_count;

        self.watchdog
            .clear(&TimerKey::new(step.feature_id, step.run_id, key));
        Ok(())
    }

    fn on_feature_finished(
        &mut self,
        finish: &FeatureFinish,
        now: DateTime<Utc>,
    ) -> Result<Vec<Effect>> {
        let key = browser_key(&finish.browser_info)?;
        let browser = verify_and_fix(
            &mut self.tree,
            finish.feature_id,
            finish.run_id,
            &key,
            &finish.browser_info,
        );
        browser.status = BROWSER_COMPLETED.to_string();
        browser.end_at = Some(now);
        if finish.feature_result_id.is_some() {
            browser.feature_result_id = finish.feature_result_id;
        }
        let feature_result_id = browser.feature_result_id;

        self.watchdog
            .clear(&TimerKey::new(finish.feature_id, finish.run_id, key.clone()));

        let mut effects = vec![Effect::FeatureInfoUpdated {
            feature_id: finish.feature_id,
            feature_result_id,
        }];
        if let Some(notice) = self.notifications.notification_for(
            finish.feature_id,
            finish.run_id,
            &key,
            finish.feature_name.as_deref(),
            feature_result_id,
            now,
        ) {
            effects.push(Effect::Notify(notice));
        }
        Ok(effects)
    }

    fn on_feature_error(&mut self, failure: &FeatureFailure) {
        self.tree.feature_entry(failure.feature_id).running = false;

        let key = match browser_key(&failure.browser_info) {
            Ok(key) => key,
            Err(err) => {
                tracing::debug!(
                    feature_id = failure.feature_id,
                    error = %err,
                    "Feature error without usable browser; keeping feature-level update only"
                );
                return;
            }
        };
        let Some(run_id) = failure.run_id else {
            tracing::debug!(
                feature_id = failure.feature_id,
                "Feature error without run id; keeping feature-level update only"
            );
            return;
        };

        let browser = verify_and_fix(
            &mut self.tree,
            failure.feature_id,
            run_id,
            &key,
            &failure.browser_info,
        );
        browser.error = failure.error.clone();
        self.watchdog
            .clear(&TimerKey::new(failure.feature_id, run_id, key));
    }

    fn apply_timeout(&mut self, key: &TimerKey) {
        let browser = self
            .tree
            .feature_mut(key.feature_id)
            .and_then(|feature| feature.results.get_mut(&key.run_id))
            .and_then(|run| run.browsers.get_mut(&key.browser_key));

        match browser {
            Some(browser) => {
                browser.status = BROWSER_TIMEOUT.to_string();
                tracing::info!(
                    feature_id = key.feature_id,
                    run_id = key.run_id,
                    browser_key = %key.browser_key,
                    "Run timed out waiting for events"
                );
            }
            None => {
                tracing::debug!(
                    feature_id = key.feature_id,
                    run_id = key.run_id,
                    browser_key = %key.browser_key,
                    "Watchdog fired for a pruned browser entry"
                );
            }
        }
    }
}

/// Returns the browser entry for the key, creating any missing level.
fn verify_and_fix<'a>(
    tree: &'a mut ResultTree,
    feature_id: FeatureId,
    run_id: RunId,
    key: &BrowserKey,
    browser_info: &BrowserInfo,
) -> &'a mut BrowserResultEntry {
    tree.feature_entry(feature_id)
        .results
        .entry(run_id)
        .or_default()
        .browsers
        .entry(key.clone())
        .or_insert_with(|| BrowserResultEntry::new(browser_info.clone()))
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selectors;
    use chrono::{Duration, TimeZone};
    use cometa_results_protocol::{
        FeatureCleanup, FeatureStop, RunCompletion, StepDetail, StepStart,
    };
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 30, 12, 0, 0).unwrap()
    }

    fn browser(name: &str) -> BrowserInfo {
        serde_json::from_value(json!({
            "os": "linux",
            "os_version": "22.04",
            "browser": name,
            "browser_version": "120",
            "real_mobile": false
        }))
        .expect("browser")
    }

    fn store() -> ResultStore {
        ResultStore::new(&ResultsConfig::default(), NotificationBridge::new_in_memory())
    }

    fn progress(feature_id: FeatureId, run_id: RunId, name: &str) -> FeatureProgress {
        FeatureProgress {
            feature_id,
            run_id,
            browser_info: browser(name),
            feature_result_id: None,
            datetime: None,
        }
    }

    fn finish(feature_id: FeatureId, run_id: RunId, name: &str) -> ExecutionEvent {
        ExecutionEvent::FeatureFinished(FeatureFinish {
            feature_id,
            run_id,
            browser_info: browser(name),
            feature_result_id: Some(900),
            feature_name: Some("Checkout".to_string()),
            datetime: None,
        })
    }

    fn key(name: &str) -> BrowserKey {
        browser_key(&browser(name)).expect("key")
    }

    #[test]
    fn started_uses_event_datetime_when_parseable() {
        let mut store = store();
        let mut started = progress(1, 1, "chrome");
        started.datetime = Some("2026-01-30T11:59:00Z".to_string());
        store
            .apply_event(&ExecutionEvent::FeatureStarted(started), t0())
            .expect("apply");

        let entry = selectors::browser_result(store.tree(), 1, 1, &key("chrome")).expect("entry");
        assert_eq!(entry.start_at, Some(t0() - Duration::seconds(60)));
        assert_eq!(selectors::feature_status(store.tree(), 1), Some("Starting feature"));

        let mut fallback = progress(1, 2, "chrome");
        fallback.datetime = Some("yesterday".to_string());
        store
            .apply_event(&ExecutionEvent::FeatureStarted(fallback), t0())
            .expect("apply");
        let entry = selectors::browser_result(store.tree(), 1, 2, &key("chrome")).expect("entry");
        assert_eq!(entry.start_at, Some(t0()));
    }

    #[test]
    fn malformed_browser_rejected_without_mutation() {
        let mut store = store();
        let mut queued = progress(1, 1, "chrome");
        queued.browser_info = BrowserInfo::default();

        let result = store.apply_event(&ExecutionEvent::FeatureQueued(queued), t0());
        assert!(result.is_err());
        assert!(store.tree().is_empty());
        assert_eq!(store.watchdog().armed_count(), 0);
    }

    #[test]
    fn out_of_range_step_rejected_without_mutation() {
        let mut store = store();
        let started = ExecutionEvent::StepStarted(StepStart {
            feature_id: 1,
            run_id: 1,
            browser_info: browser("chrome"),
            step_name: "Open page".to_string(),
            step_index: usize::MAX,
            datetime: String::new(),
        });

        let result = store.apply_event(&started, t0());
        assert!(matches!(result, Err(crate::ResultsError::StepIndexOutOfRange(_))));
        assert!(store.tree().is_empty());
    }

    #[test]
    fn feature_error_swallows_missing_browser() {
        let mut store = store();
        store
            .apply_event(&ExecutionEvent::FeatureQueued(progress(4, 1, "chrome")), t0())
            .expect("queued");

        let failure = ExecutionEvent::FeatureError(FeatureFailure {
            feature_id: 4,
            run_id: Some(1),
            browser_info: BrowserInfo::default(),
            error: Some("driver crashed".to_string()),
        });
        let effects = store.apply_event(&failure, t0()).expect("swallowed");
        assert!(effects.is_empty());
        assert!(!store.tree().feature(4).expect("feature").running);
        // The armed watchdog is untouched because no browser could be resolved.
        assert_eq!(store.watchdog().armed_count(), 1);
    }

    #[test]
    fn feature_error_records_browser_error() {
        let mut store = store();
        let failure = ExecutionEvent::FeatureError(FeatureFailure {
            feature_id: 4,
            run_id: Some(2),
            browser_info: browser("firefox"),
            error: Some("driver crashed".to_string()),
        });
        store.apply_event(&failure, t0()).expect("apply");

        let entry = selectors::browser_result(store.tree(), 4, 2, &key("firefox")).expect("entry");
        assert_eq!(entry.error.as_deref(), Some("driver crashed"));
        assert!(!selectors::feature_running_status(store.tree(), 4));
    }

    #[test]
    fn stopped_feature_completes_every_browser_in_run() {
        let mut store = store();
        for name in ["chrome", "firefox"] {
            store
                .apply_event(&ExecutionEvent::FeatureStarted(progress(5, 3, name)), t0())
                .expect("started");
        }
        store
            .apply_event(
                &ExecutionEvent::StoppedFeature(FeatureStop {
                    feature_id: 5,
                    run_id: 3,
                }),
                t0(),
            )
            .expect("stopped");

        for name in ["chrome", "firefox"] {
            assert_eq!(
                selectors::feature_browser_status(store.tree(), 5, 3, &key(name)),
                Some("Completed")
            );
        }
        assert!(!store.tree().feature(5).expect("feature").running);
    }

    #[test]
    fn stopped_feature_for_unknown_run_only_clears_running() {
        let mut store = store();
        store
            .apply_event(
                &ExecutionEvent::StoppedFeature(FeatureStop {
                    feature_id: 5,
                    run_id: 9,
                }),
                t0(),
            )
            .expect("stopped");
        let feature = store.tree().feature(5).expect("feature");
        assert!(!feature.running);
        assert!(feature.results.is_empty());
    }

    #[test]
    fn run_completed_clears_running() {
        let mut store = store();
        store
            .apply_event(&ExecutionEvent::FeatureQueued(progress(6, 1, "chrome")), t0())
            .expect("queued");
        store
            .apply_event(
                &ExecutionEvent::FeatureRunCompleted(RunCompletion {
                    feature_id: 6,
                    run_id: Some(1),
                    feature_result_id: None,
                }),
                t0(),
            )
            .expect("completed");

        assert_eq!(selectors::feature_status(store.tree(), 6), Some("Feature completed"));
        assert!(!selectors::feature_running_status(store.tree(), 6));

        // A later event flips it back; most recent event wins.
        store
            .apply_event(&ExecutionEvent::FeatureInitializing(progress(6, 2, "chrome")), t0())
            .expect("initializing");
        assert!(selectors::feature_running_status(store.tree(), 6));
    }

    #[test]
    fn timeout_marks_browser_and_ignores_pruned_entries() {
        let mut store = store();
        store
            .apply_event(&ExecutionEvent::FeatureQueued(progress(7, 1, "chrome")), t0())
            .expect("queued");

        let timeout = store.watchdog().timeout();
        assert!(store.tick(t0() + timeout - Duration::seconds(1)).is_empty());
        let effects = store.tick(t0() + timeout);
        assert_eq!(
            effects,
            vec![Effect::TimedOut(TimerKey::new(7, 1, key("chrome")))]
        );
        assert_eq!(
            selectors::feature_browser_status(store.tree(), 7, 1, &key("chrome")),
            Some("Timeout")
        );

        store
            .apply(Action::RunTimeout(TimerKey::new(7, 42, key("chrome"))), t0())
            .expect("timeout");
        assert!(store.tree().feature(7).expect("feature").results.get(&42).is_none());
    }

    #[test]
    fn step_events_clear_without_rearming() {
        let mut store = store();
        store
            .apply_event(&ExecutionEvent::FeatureStarted(progress(8, 1, "chrome")), t0())
            .expect("started");
        let timer = TimerKey::new(8, 1, key("chrome"));
        assert!(store.watchdog().is_armed(&timer));

        store
            .apply_event(
                &ExecutionEvent::StepStarted(StepStart {
                    feature_id: 8,
                    run_id: 1,
                    browser_info: browser("chrome"),
                    step_name: "Open page".to_string(),
                    step_index: 0,
                    datetime: "t1".to_string(),
                }),
                t0(),
            )
            .expect("step");
        assert!(!store.watchdog().is_armed(&timer));
        assert!(store.tick(t0() + Duration::days(1)).is_empty());
    }

    #[test]
    fn step_detail_materializes_entry_and_stores_blob() {
        let mut store = store();
        store
            .apply_event(
                &ExecutionEvent::StepDetailedInfo(StepDetail {
                    feature_id: 9,
                    run_id: 1,
                    browser_info: browser("chrome"),
                    step_index: 2,
                    info: json!({"line": "Click on 'Save'"}),
                }),
                t0(),
            )
            .expect("detail");

        let entry = selectors::browser_result(store.tree(), 9, 1, &key("chrome")).expect("entry");
        assert_eq!(entry.details.get(&2), Some(&json!({"line": "Click on 'Save'"})));
        assert!(entry.steps.is_empty());
    }

    #[test]
    fn feature_finished_emits_info_update_and_notice() {
        let mut store = store();
        let effects = store.apply_event(&finish(11, 1, "chrome"), t0()).expect("finish");
        assert_eq!(
            effects,
            vec![Effect::FeatureInfoUpdated {
                feature_id: 11,
                feature_result_id: Some(900)
            }]
        );

        store.notifications_mut().add(11).expect("subscribe");
        let effects = store.apply_event(&finish(11, 2, "chrome"), t0()).expect("finish");
        assert_eq!(effects.len(), 2);
        let Effect::Notify(notice) = &effects[1] else {
            panic!("expected notification");
        };
        assert_eq!(notice.message, "Checkout has finished");
        assert_eq!(notice.run_id, 2);

        let entry = selectors::browser_result(store.tree(), 11, 2, &key("chrome")).expect("entry");
        assert_eq!(entry.status, "Completed");
        assert_eq!(entry.end_at, Some(t0()));
    }

    #[test]
    fn passthrough_is_a_no_op() {
        let mut store = store();
        let ingress = Ingress::Passthrough {
            event_type: "[Features] Update feature".to_string(),
            payload: json!({"type": "[Features] Update feature"}),
        };
        assert!(store.dispatch_ingress(&ingress, t0()).expect("dispatch").is_empty());
        assert!(store.tree().is_empty());
    }

    #[test]
    fn cleanup_via_event_and_teardown() {
        let mut store = store();
        store.apply_event(&finish(12, 1, "chrome"), t0()).expect("finish");
        store
            .apply_event(&ExecutionEvent::FeatureQueued(progress(12, 2, "chrome")), t0())
            .expect("queued");
        store
            .apply_event(
                &ExecutionEvent::CleanupFeatureResults(FeatureCleanup { feature_id: 12 }),
                t0(),
            )
            .expect("cleanup");

        let feature = store.tree().feature(12).expect("feature");
        assert_eq!(feature.results.keys().copied().collect::<Vec<_>>(), vec![2]);

        store.teardown();
        assert!(store.tree().is_empty());
        assert_eq!(store.watchdog().armed_count(), 0);
    }

    #[test]
    fn snapshot_is_isolated_from_later_events() {
        let mut store = store();
        store
            .apply_event(&ExecutionEvent::FeatureQueued(progress(13, 1, "chrome")), t0())
            .expect("queued");
        let before = store.snapshot();
        store.apply_event(&finish(13, 1, "chrome"), t0()).expect("finish");

        assert_eq!(
            selectors::feature_browser_status(&before, 13, 1, &key("chrome")),
            Some("Queued")
        );
        assert_eq!(
            selectors::feature_browser_status(store.tree(), 13, 1, &key("chrome")),
            Some("Completed")
        );
    }
}
