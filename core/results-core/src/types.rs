//! Result tree data model.
//!
//! ```text
//! ResultTree
//! └── feature_id → FeatureResultEntry { status, running }
//!     └── run_id → RunEntry
//!         └── browser_key → BrowserResultEntry { steps, details, status, ... }
//! ```
//!
//! Feature branches are held behind `Arc` and mutated through
//! `Arc::make_mut`: cloning the tree is shallow, and a write copies only the
//! feature branch it touches. Readers holding an older snapshot are never
//! affected by later transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use cometa_results_protocol::{BrowserInfo, MAX_STEP_INDEX};

use crate::error::{ResultsError, Result};

pub type FeatureId = i64;
pub type RunId = i64;
pub type StepIndex = usize;

pub const STATUS_FEATURE_QUEUED: &str = "Feature Queued";
pub const STATUS_INITIALIZING_FEATURE: &str = "Initializing feature";
pub const STATUS_STARTING_FEATURE: &str = "Starting feature";
pub const STATUS_FEATURE_COMPLETED: &str = "Feature completed";

pub const BROWSER_QUEUED: &str = "Queued";
pub const BROWSER_INITIALIZING: &str = "Initializing";
pub const BROWSER_COMPLETED: &str = "Completed";
pub const BROWSER_TIMEOUT: &str = "Timeout";

/// Stable identifier of a browser/OS/device combination within a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrowserKey(String);

impl BrowserKey {
    pub(crate) fn from_raw(value: String) -> Self {
        BrowserKey(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BrowserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BrowserKey {
    fn from(value: &str) -> Self {
        BrowserKey(value.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepStatus {
    pub index: StepIndex,
    pub name: String,
    pub datetime: String,
    pub running: bool,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshots: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vulnerable_headers_count: Option<u32>,
}

impl StepStatus {
    pub fn placeholder(index: StepIndex) -> Self {
        StepStatus {
            index,
            ..StepStatus::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserResultEntry {
    pub browser_info: BrowserInfo,
    /// Indexed by step index. Slots between the previous length and a newly
    /// referenced index stay `None`; only the referenced slot is materialized.
    pub steps: Vec<Option<StepStatus>>,
    pub details: BTreeMap<StepIndex, Value>,
    pub status: String,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub feature_result_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BrowserResultEntry {
    pub fn new(browser_info: BrowserInfo) -> Self {
        BrowserResultEntry {
            browser_info,
            steps: Vec::new(),
            details: BTreeMap::new(),
            status: String::new(),
            start_at: None,
            end_at: None,
            feature_result_id: None,
            error: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == BROWSER_COMPLETED
    }

    /// Returns the step slot at `index`, materializing it when absent.
    pub(crate) fn step_mut(&mut self, index: StepIndex) -> Result<&mut StepStatus> {
        check_step_index(index)?;
        let len = index
            .checked_add(1)
            .ok_or(ResultsError::StepIndexOutOfRange(index))?;
        if self.steps.len() < len {
            self.steps.resize(len, None);
        }
        Ok(self.steps[index].get_or_insert_with(|| StepStatus::placeholder(index)))
    }
}

/// Rejects step indices the step list must never be grown to.
pub(crate) fn check_step_index(index: StepIndex) -> Result<()> {
    if index > MAX_STEP_INDEX {
        return Err(ResultsError::StepIndexOutOfRange(index));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunEntry {
    pub browsers: HashMap<BrowserKey, BrowserResultEntry>,
}

impl RunEntry {
    pub fn all_completed(&self) -> bool {
        self.browsers.values().all(BrowserResultEntry::is_completed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureResultEntry {
    pub status: String,
    pub running: bool,
    pub results: BTreeMap<RunId, RunEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultTree {
    features: HashMap<FeatureId, Arc<FeatureResultEntry>>,
}

impl ResultTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feature(&self, feature_id: FeatureId) -> Option<&FeatureResultEntry> {
        self.features.get(&feature_id).map(Arc::as_ref)
    }

    pub fn feature_ids(&self) -> impl Iterator<Item = FeatureId> + '_ {
        self.features.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub(crate) fn feature_mut(&mut self, feature_id: FeatureId) -> Option<&mut FeatureResultEntry> {
        self.features.get_mut(&feature_id).map(Arc::make_mut)
    }

    pub(crate) fn feature_entry(&mut self, feature_id: FeatureId) -> &mut FeatureResultEntry {
        Arc::make_mut(self.features.entry(feature_id).or_default())
    }

    /// True when both trees share the same allocation for `feature_id`.
    pub fn shares_branch(&self, other: &ResultTree, feature_id: FeatureId) -> bool {
        match (self.features.get(&feature_id), other.features.get(&feature_id)) {
            (Some(left), Some(right)) => Arc::ptr_eq(left, right),
            _ => false,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.features.clear();
    }
}
