//! # results-core
//!
//! Live execution result reconciliation for Co.Meta. Execution events pushed
//! by the backend (feature queued, step finished, feature finished, ...) are
//! folded into a `feature_id → run_id → browser_key` result tree that display
//! clients read through selectors.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. Time is always passed in as
//!   `now`; the host decides how often to tick the watchdog.
//! - **Not thread-safe**: Hosts provide their own synchronization. Holding the
//!   store behind one `Mutex` gives every transition the atomic,
//!   arrival-ordered semantics the event stream assumes.
//! - **Lenient**: Events for unseen features, runs or browsers create the
//!   missing levels instead of being rejected. Selectors answer `None` for
//!   anything unknown.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use results_core::{selectors, NotificationBridge, ResultStore, ResultsConfig};
//!
//! let mut store = ResultStore::new(&ResultsConfig::default(), NotificationBridge::new_in_memory());
//! let effects = store.dispatch_ingress(&ingress, chrono::Utc::now())?;
//! let running = selectors::feature_running_status(store.tree(), 10);
//! ```

pub mod browser;
pub mod config;
pub mod datasheet;
pub mod error;
pub mod notifications;
pub mod selectors;
pub mod store;
pub mod types;
pub mod watchdog;

pub use browser::browser_key;
pub use config::{load_config, ResultsConfig};
pub use datasheet::{DataSheet, SavePayload};
pub use error::{ResultsError, Result};
pub use notifications::{FeatureNotification, NotificationAction, NotificationBridge};
pub use store::{Action, Effect, ResultStore};
pub use types::*;
pub use watchdog::{TimeoutSupervisor, TimerKey};
