//! Read-only projections over the result tree.
//!
//! Display clients may ask about a feature before any event for it has
//! arrived, so every selector answers `None`/`false` for missing keys instead
//! of failing.

use serde_json::Value;

use crate::types::{
    BrowserKey, BrowserResultEntry, FeatureId, FeatureResultEntry, ResultTree, RunId,
    StepIndex, StepStatus, BROWSER_QUEUED,
};

pub fn feature_results(tree: &ResultTree, feature_id: FeatureId) -> Option<&FeatureResultEntry> {
    tree.feature(feature_id)
}

pub fn feature_status(tree: &ResultTree, feature_id: FeatureId) -> Option<&str> {
    tree.feature(feature_id).map(|feature| feature.status.as_str())
}

/// True while the feature is running. A bare `"Queued"` status also counts.
pub fn feature_running_status(tree: &ResultTree, feature_id: FeatureId) -> bool {
    tree.feature(feature_id)
        .map(|feature| feature.running || feature.status == BROWSER_QUEUED)
        .unwrap_or(false)
}

pub fn browser_result<'a>(
    tree: &'a ResultTree,
    feature_id: FeatureId,
    run_id: RunId,
    browser_key: &BrowserKey,
) -> Option<&'a BrowserResultEntry> {
    tree.feature(feature_id)?
        .results
        .get(&run_id)?
        .browsers
        .get(browser_key)
}

pub fn feature_browser_status<'a>(
    tree: &'a ResultTree,
    feature_id: FeatureId,
    run_id: RunId,
    browser_key: &BrowserKey,
) -> Option<&'a str> {
    browser_result(tree, feature_id, run_id, browser_key).map(|entry| entry.status.as_str())
}

pub fn last_feature_run_id(tree: &ResultTree, feature_id: FeatureId) -> Option<RunId> {
    tree.feature(feature_id)?.results.keys().next_back().copied()
}

pub fn last_feature_run_steps<'a>(
    tree: &'a ResultTree,
    feature_id: FeatureId,
    browser_key: &BrowserKey,
) -> Option<&'a [Option<StepStatus>]> {
    let run_id = last_feature_run_id(tree, feature_id)?;
    browser_result(tree, feature_id, run_id, browser_key).map(|entry| entry.steps.as_slice())
}

pub fn last_feature_run_details<'a>(
    tree: &'a ResultTree,
    feature_id: FeatureId,
    browser_key: &BrowserKey,
    step_index: StepIndex,
) -> Option<&'a Value> {
    let run_id = last_feature_run_id(tree, feature_id)?;
    browser_result(tree, feature_id, run_id, browser_key)?
        .details
        .get(&step_index)
}
