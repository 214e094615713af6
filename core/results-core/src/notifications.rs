//! Completion notifications for subscribed features.
//!
//! The subscription set is a JSON array of feature ids persisted to
//! `~/.cometa/notification_ids.json`:
//!
//! ```json
//! [12, 40, 41]
//! ```
//!
//! A missing, empty or corrupt file loads as an empty set. Writes go through
//! a temp file in the same directory and an atomic rename.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::{ResultsError, Result};
use crate::types::{BrowserKey, FeatureId, RunId};

/// Where a notification's action button leads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationAction {
    ViewStepDetail {
        feature_id: FeatureId,
        feature_result_id: Option<i64>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureNotification {
    pub feature_id: FeatureId,
    pub feature_name: Option<String>,
    pub feature_result_id: Option<i64>,
    pub run_id: RunId,
    pub browser_key: BrowserKey,
    pub message: String,
    pub action_label: String,
    pub action: NotificationAction,
    pub emitted_at: DateTime<Utc>,
}

pub struct NotificationBridge {
    ids: BTreeSet<FeatureId>,
    file_path: Option<PathBuf>,
    enabled: bool,
}

impl NotificationBridge {
    pub fn new_in_memory() -> Self {
        Self {
            ids: BTreeSet::new(),
            file_path: None,
            enabled: true,
        }
    }

    pub fn load(file_path: &Path) -> Self {
        let ids = match fs_err::read_to_string(file_path) {
            Ok(content) if content.trim().is_empty() => BTreeSet::new(),
            Ok(content) => match serde_json::from_str::<Vec<FeatureId>>(&content) {
                Ok(ids) => ids.into_iter().collect(),
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        path = %file_path.display(),
                        "Notification ids unreadable; starting empty"
                    );
                    BTreeSet::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(err) => {
                tracing::warn!(error = %err, "Failed to read notification ids; starting empty");
                BTreeSet::new()
            }
        };

        Self {
            ids,
            file_path: Some(file_path.to_path_buf()),
            enabled: true,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn contains(&self, feature_id: FeatureId) -> bool {
        self.ids.contains(&feature_id)
    }

    pub fn ids(&self) -> Vec<FeatureId> {
        self.ids.iter().copied().collect()
    }

    /// Subscribes `feature_id`. Returns whether the set changed.
    pub fn add(&mut self, feature_id: FeatureId) -> Result<bool> {
        if self.ids.contains(&feature_id) {
            return Ok(false);
        }
        let mut next = self.ids.clone();
        next.insert(feature_id);
        self.commit(next)?;
        Ok(true)
    }

    /// Unsubscribes `feature_id`. Returns whether the set changed.
    pub fn remove(&mut self, feature_id: FeatureId) -> Result<bool> {
        if !self.ids.contains(&feature_id) {
            return Ok(false);
        }
        let mut next = self.ids.clone();
        next.remove(&feature_id);
        self.commit(next)?;
        Ok(true)
    }

    /// Persists `next` and only then makes it the live set, so a failed
    /// write leaves memory and disk in agreement.
    fn commit(&mut self, next: BTreeSet<FeatureId>) -> Result<()> {
        save_ids(self.file_path.as_deref(), &next)?;
        self.ids = next;
        Ok(())
    }

    /// Builds the completion notice for a finished browser run, if the user
    /// subscribed to this feature.
    pub fn notification_for(
        &self,
        feature_id: FeatureId,
        run_id: RunId,
        browser_key: &BrowserKey,
        feature_name: Option<&str>,
        feature_result_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Option<FeatureNotification> {
        if !self.enabled || !self.contains(feature_id) {
            return None;
        }

        let label = match feature_name {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => format!("Feature {}", feature_id),
        };

        Some(FeatureNotification {
            feature_id,
            feature_name: feature_name.map(str::to_string),
            feature_result_id,
            run_id,
            browser_key: browser_key.clone(),
            message: format!("{} has finished", label),
            action_label: "View".to_string(),
            action: NotificationAction::ViewStepDetail {
                feature_id,
                feature_result_id,
            },
            emitted_at: now,
        })
    }
}

fn save_ids(file_path: Option<&Path>, ids: &BTreeSet<FeatureId>) -> Result<()> {
    let Some(file_path) = file_path else {
        return Ok(());
    };

    let content = serde_json::to_string(ids).map_err(|source| ResultsError::Json {
        context: "serializing notification ids".to_string(),
        source,
    })?;

    let parent_dir = file_path.parent().unwrap_or_else(|| Path::new("."));
    fs_err::create_dir_all(parent_dir).map_err(|source| ResultsError::Io {
        context: format!("creating {}", parent_dir.display()),
        source,
    })?;

    let io_err = |context: &str| {
        let context = format!("{} {}", context, file_path.display());
        move |source: std::io::Error| ResultsError::Io { context, source }
    };
    let mut temp_file = NamedTempFile::new_in(parent_dir).map_err(io_err("staging"))?;
    temp_file
        .write_all(content.as_bytes())
        .map_err(io_err("writing"))?;
    temp_file.flush().map_err(io_err("flushing"))?;
    temp_file
        .persist(file_path)
        .map_err(|err| io_err("committing")(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key() -> BrowserKey {
        BrowserKey::from("linux|22.04|chrome|120||false")
    }

    #[test]
    fn subscriptions_survive_reload() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("notification_ids.json");

        let mut bridge = NotificationBridge::load(&path);
        assert!(bridge.add(12).expect("add"));
        assert!(!bridge.add(12).expect("add twice"));
        assert!(bridge.add(3).expect("add"));
        assert!(bridge.remove(12).expect("remove"));
        assert!(!bridge.remove(99).expect("remove missing"));

        let content = fs_err::read_to_string(&path).expect("read");
        assert_eq!(content, "[3]");

        let reloaded = NotificationBridge::load(&path);
        assert_eq!(reloaded.ids(), vec![3]);
    }

    #[test]
    fn failed_write_leaves_set_unchanged() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let blocker = temp_dir.path().join("not-a-dir");
        fs_err::write(&blocker, "").expect("write blocker");
        let path = blocker.join("notification_ids.json");

        let mut bridge = NotificationBridge::load(&path);
        assert!(bridge.add(5).is_err());
        assert!(!bridge.contains(5));
        assert!(bridge.add(5).is_err(), "retry must attempt the write again");

        let mut bridge = NotificationBridge {
            ids: [8].into_iter().collect(),
            file_path: Some(path),
            enabled: true,
        };
        assert!(bridge.remove(8).is_err());
        assert!(bridge.contains(8));
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("notification_ids.json");
        fs_err::write(&path, "{not json").expect("write");

        let bridge = NotificationBridge::load(&path);
        assert!(bridge.ids().is_empty());
    }

    #[test]
    fn notification_only_for_subscribed_features() {
        let now = Utc.with_ymd_and_hms(2026, 1, 30, 12, 0, 0).unwrap();
        let mut bridge = NotificationBridge::new_in_memory();
        assert!(bridge
            .notification_for(7, 1, &key(), Some("Login"), Some(55), now)
            .is_none());

        bridge.add(7).expect("add");
        let notice = bridge
            .notification_for(7, 1, &key(), Some("Login"), Some(55), now)
            .expect("notice");
        assert_eq!(notice.message, "Login has finished");
        assert_eq!(
            notice.action,
            NotificationAction::ViewStepDetail {
                feature_id: 7,
                feature_result_id: Some(55)
            }
        );

        let unnamed = bridge
            .notification_for(7, 1, &key(), None, None, now)
            .expect("notice");
        assert_eq!(unnamed.message, "Feature 7 has finished");
    }

    #[test]
    fn disabled_bridge_stays_silent() {
        let now = Utc.with_ymd_and_hms(2026, 1, 30, 12, 0, 0).unwrap();
        let mut bridge = NotificationBridge::new_in_memory().with_enabled(false);
        bridge.add(7).expect("add");
        assert!(bridge
            .notification_for(7, 1, &key(), None, None, now)
            .is_none());
    }
}
