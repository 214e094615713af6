//! Wire types for the Co.Meta results daemon.
//!
//! Two contracts live here:
//!
//! - execution events as the backend pushes them over the socket (a JSON object
//!   discriminated by `type`), and
//! - the newline-delimited request/response envelope spoken between the daemon
//!   and its clients.
//!
//! Both the daemon and the CLI depend on this crate so the schema cannot drift.
//! The daemon remains the authority on validation.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const ERROR_TOO_MANY_CONNECTIONS: &str = "too_many_connections";
/// Highest step index an event may carry. Step lists are indexed directly.
pub const MAX_STEP_INDEX: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    Event,
    GetFeatureStatus,
    GetFeatureResults,
    GetBrowserStatus,
    GetLastRun,
    CleanupFeatureResults,
    SubscribeNotifications,
    UnsubscribeNotifications,
    ListSubscriptions,
    TakeNotifications,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Execution events
// ─────────────────────────────────────────────────────────────────────────────

/// Browser descriptor as sent by the backend.
///
/// Only the six identifying fields are typed; everything else the backend
/// attaches (cloud provider, mobile capabilities, ...) is kept verbatim in
/// `extra` so it can be echoed back to display clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrowserInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_mobile: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Queued / initializing / started notifications for one browser of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureProgress {
    pub feature_id: i64,
    pub run_id: i64,
    pub browser_info: BrowserInfo,
    #[serde(default)]
    pub feature_result_id: Option<i64>,
    #[serde(default)]
    pub datetime: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepStart {
    pub feature_id: i64,
    pub run_id: i64,
    pub browser_info: BrowserInfo,
    pub step_name: String,
    pub step_index: usize,
    #[serde(default)]
    pub datetime: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDetail {
    pub feature_id: i64,
    pub run_id: i64,
    pub browser_info: BrowserInfo,
    pub step_index: usize,
    #[serde(default)]
    pub info: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub feature_id: i64,
    pub run_id: i64,
    pub browser_info: BrowserInfo,
    pub step_index: usize,
    #[serde(default)]
    pub step_name: String,
    #[serde(default)]
    pub datetime: String,
    #[serde(default)]
    pub step_result_info: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub step_time: Option<f64>,
    #[serde(default)]
    pub screenshots: Option<Value>,
    #[serde(default)]
    pub vulnerable_headers_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFinish {
    pub feature_id: i64,
    pub run_id: i64,
    pub browser_info: BrowserInfo,
    #[serde(default)]
    pub feature_result_id: Option<i64>,
    #[serde(default)]
    pub feature_name: Option<String>,
    #[serde(default)]
    pub datetime: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCompletion {
    pub feature_id: i64,
    #[serde(default)]
    pub run_id: Option<i64>,
    #[serde(default)]
    pub feature_result_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureStop {
    pub feature_id: i64,
    pub run_id: i64,
}

/// Error report for one browser. The descriptor is optional on the wire;
/// an absent or unusable descriptor still clears the feature's running flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFailure {
    pub feature_id: i64,
    #[serde(default)]
    pub run_id: Option<i64>,
    #[serde(default)]
    pub browser_info: BrowserInfo,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCleanup {
    pub feature_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    #[serde(rename = "[WebSockets] Feature Queued")]
    FeatureQueued(FeatureProgress),
    #[serde(rename = "[WebSockets] Feature Initializing")]
    FeatureInitializing(FeatureProgress),
    #[serde(rename = "[WebSockets] Feature Started")]
    FeatureStarted(FeatureProgress),
    #[serde(rename = "[WebSockets] Step Started")]
    StepStarted(StepStart),
    #[serde(rename = "[WebSockets] Step Detailed Info")]
    StepDetailedInfo(StepDetail),
    #[serde(rename = "[WebSockets] Step Finished")]
    StepFinished(StepResult),
    #[serde(rename = "[WebSockets] Feature Finished")]
    FeatureFinished(FeatureFinish),
    #[serde(rename = "[WebSockets] Feature Run Completed")]
    FeatureRunCompleted(RunCompletion),
    #[serde(rename = "[WebSockets] Stopped Feature")]
    StoppedFeature(FeatureStop),
    #[serde(rename = "[WebSockets] Feature Error")]
    FeatureError(FeatureFailure),
    #[serde(rename = "[WebSockets] Cleanup Feature Results")]
    CleanupFeatureResults(FeatureCleanup),
}

pub const KNOWN_EVENT_TYPES: [&str; 11] = [
    "[WebSockets] Feature Queued",
    "[WebSockets] Feature Initializing",
    "[WebSockets] Feature Started",
    "[WebSockets] Step Started",
    "[WebSockets] Step Detailed Info",
    "[WebSockets] Step Finished",
    "[WebSockets] Feature Finished",
    "[WebSockets] Feature Run Completed",
    "[WebSockets] Stopped Feature",
    "[WebSockets] Feature Error",
    "[WebSockets] Cleanup Feature Results",
];

impl ExecutionEvent {
    pub fn is_known_type(event_type: &str) -> bool {
        KNOWN_EVENT_TYPES.contains(&event_type)
    }

    pub fn feature_id(&self) -> i64 {
        match self {
            ExecutionEvent::FeatureQueued(event)
            | ExecutionEvent::FeatureInitializing(event)
            | ExecutionEvent::FeatureStarted(event) => event.feature_id,
            ExecutionEvent::StepStarted(event) => event.feature_id,
            ExecutionEvent::StepDetailedInfo(event) => event.feature_id,
            ExecutionEvent::StepFinished(event) => event.feature_id,
            ExecutionEvent::FeatureFinished(event) => event.feature_id,
            ExecutionEvent::FeatureRunCompleted(event) => event.feature_id,
            ExecutionEvent::StoppedFeature(event) => event.feature_id,
            ExecutionEvent::FeatureError(event) => event.feature_id,
            ExecutionEvent::CleanupFeatureResults(event) => event.feature_id,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ExecutionEvent::FeatureQueued(_) => KNOWN_EVENT_TYPES[0],
            ExecutionEvent::FeatureInitializing(_) => KNOWN_EVENT_TYPES[1],
            ExecutionEvent::FeatureStarted(_) => KNOWN_EVENT_TYPES[2],
            ExecutionEvent::StepStarted(_) => KNOWN_EVENT_TYPES[3],
            ExecutionEvent::StepDetailedInfo(_) => KNOWN_EVENT_TYPES[4],
            ExecutionEvent::StepFinished(_) => KNOWN_EVENT_TYPES[5],
            ExecutionEvent::FeatureFinished(_) => KNOWN_EVENT_TYPES[6],
            ExecutionEvent::FeatureRunCompleted(_) => KNOWN_EVENT_TYPES[7],
            ExecutionEvent::StoppedFeature(_) => KNOWN_EVENT_TYPES[8],
            ExecutionEvent::FeatureError(_) => KNOWN_EVENT_TYPES[9],
            ExecutionEvent::CleanupFeatureResults(_) => KNOWN_EVENT_TYPES[10],
        }
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(self.feature_id(), "feature_id")?;
        match self {
            ExecutionEvent::FeatureQueued(event)
            | ExecutionEvent::FeatureInitializing(event)
            | ExecutionEvent::FeatureStarted(event) => require_id(event.run_id, "run_id"),
            ExecutionEvent::StepStarted(event) => {
                require_id(event.run_id, "run_id")?;
                require_step_index(event.step_index)
            }
            ExecutionEvent::StepDetailedInfo(event) => {
                require_id(event.run_id, "run_id")?;
                require_step_index(event.step_index)
            }
            ExecutionEvent::StepFinished(event) => {
                require_id(event.run_id, "run_id")?;
                require_step_index(event.step_index)
            }
            ExecutionEvent::FeatureFinished(event) => require_id(event.run_id, "run_id"),
            ExecutionEvent::StoppedFeature(event) => require_id(event.run_id, "run_id"),
            ExecutionEvent::FeatureRunCompleted(_)
            | ExecutionEvent::FeatureError(_)
            | ExecutionEvent::CleanupFeatureResults(_) => Ok(()),
        }
    }
}

/// What the socket delivered: either an event the results store understands,
/// or something addressed to another consumer, passed through untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum Ingress {
    Execution(ExecutionEvent),
    Passthrough { event_type: String, payload: Value },
}

pub fn parse_ingress(payload: Value) -> Result<Ingress, ErrorInfo> {
    let event_type = match payload.get("type").and_then(|value| value.as_str()) {
        Some(value) => value.to_string(),
        None => {
            return Err(ErrorInfo::new(
                "invalid_event",
                "event payload must carry a string `type`",
            ))
        }
    };

    if !ExecutionEvent::is_known_type(&event_type) {
        return Ok(Ingress::Passthrough {
            event_type,
            payload,
        });
    }

    let event: ExecutionEvent = serde_json::from_value(payload).map_err(|err| {
        ErrorInfo::new(
            "invalid_event",
            format!("{} payload is invalid: {}", event_type, err),
        )
    })?;
    event.validate()?;
    Ok(Ingress::Execution(event))
}

fn require_step_index(step_index: usize) -> Result<(), ErrorInfo> {
    if step_index <= MAX_STEP_INDEX {
        Ok(())
    } else {
        Err(ErrorInfo::new(
            "invalid_event",
            format!("step_index must be at most {}", MAX_STEP_INDEX),
        ))
    }
}

fn require_id(value: i64, field: &str) -> Result<(), ErrorInfo> {
    if value > 0 {
        Ok(())
    } else {
        Err(ErrorInfo::new(
            "invalid_id",
            format!("{} must be a positive integer", field),
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Query parameters
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureQuery {
    pub feature_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrowserStatusQuery {
    pub feature_id: i64,
    pub run_id: i64,
    pub browser_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LastRunQuery {
    pub feature_id: i64,
    pub browser_key: String,
}

pub fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, ErrorInfo> {
    let params = params.ok_or_else(|| ErrorInfo::new("invalid_params", "params are required"))?;
    if !params.is_object() {
        return Err(ErrorInfo::new("invalid_params", "params must be an object"));
    }
    serde_json::from_value(params)
        .map_err(|err| ErrorInfo::new("invalid_params", format!("params are invalid: {}", err)))
}
