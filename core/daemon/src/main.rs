//! Co.Meta results daemon entrypoint.
//!
//! Single-writer service that owns the live execution result tree. The
//! backend forwards execution events over a Unix socket; display clients
//! query selectors and drain completion notifications over the same socket.
//! A background thread ticks the run watchdog.

use chrono::Utc;
use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cometa_results_protocol::{
    parse_ingress, parse_params, BrowserStatusQuery, ErrorInfo, FeatureQuery, LastRunQuery,
    Method, Request, Response, ERROR_TOO_MANY_CONNECTIONS, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use results_core::{config, load_config, NotificationBridge, ResultsConfig};
use serde::Serialize;
use serde_json::Value;

mod state;

use state::{IngestOutcome, SharedState};

const SOCKET_ENV: &str = "COMETA_RESULTS_SOCKET";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;
const MAX_ACTIVE_CONNECTIONS: usize = 64;

fn main() {
    init_logging();

    let socket_path = match daemon_socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "Co.Meta results daemon started");

    let config = match load_config(None) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load results config; using defaults");
            ResultsConfig::default()
        }
    };
    let notifications = match config::notification_ids_path() {
        Ok(path) => NotificationBridge::load(&path),
        Err(err) => {
            warn!(error = %err, "Failed to resolve notification ids path; subscriptions will not persist");
            NotificationBridge::new_in_memory()
        }
    }
    .with_enabled(config.notifications.enabled);

    info!(
        run_timeout_secs = config.watchdog.run_timeout_secs,
        tick_interval_ms = config.watchdog.tick_interval_ms,
        notifications_enabled = config.notifications.enabled,
        subscriptions = notifications.ids().len(),
        "Results config loaded"
    );

    let shared_state = Arc::new(SharedState::new(&config, notifications));
    spawn_watchdog_ticker(Arc::clone(&shared_state), config.watchdog.tick_interval());

    let active_connections = Arc::new(AtomicUsize::new(0));
    for stream in listener.incoming() {
        match stream {
            Ok(mut stream) => {
                let active = active_connections.fetch_add(1, Ordering::SeqCst);
                if active >= MAX_ACTIVE_CONNECTIONS {
                    active_connections.fetch_sub(1, Ordering::SeqCst);
                    warn!(active, "Rejecting connection; too many active connections");
                    let response = Response::error(
                        None,
                        ERROR_TOO_MANY_CONNECTIONS,
                        "daemon is handling too many connections",
                    );
                    let _ = write_response(&mut stream, response);
                    continue;
                }

                let state = Arc::clone(&shared_state);
                let counter = Arc::clone(&active_connections);
                thread::spawn(move || {
                    handle_connection(stream, state);
                    counter.fetch_sub(1, Ordering::SeqCst);
                });
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn spawn_watchdog_ticker(state: Arc<SharedState>, interval: Duration) {
    thread::spawn(move || loop {
        thread::sleep(interval);
        match state.tick(Utc::now()) {
            Ok(0) => {}
            Ok(fired) => tracing::debug!(fired, "Watchdog tick"),
            Err(err) => warn!(error = %err, "Watchdog tick failed"),
        }
    });
}

fn init_logging() {
    let debug_enabled = env::var("COMETA_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn daemon_socket_path() -> Result<PathBuf, String> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    config::socket_path().map_err(String::from)
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, state: Arc<SharedState>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, &state);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => {
            if buffer[index + 1..].iter().any(|b| !b.is_ascii_whitespace()) {
                warn!("Extra bytes detected after newline; ignoring trailing data");
            }
            &buffer[..index]
        }
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, state: &SharedState) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    let id = request.id;
    let params = request.params;

    match request.method {
        Method::GetHealth => {
            let mut data = serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
            });
            if let Ok(snapshot) = state.health_snapshot() {
                if let Ok(value) = serde_json::to_value(snapshot) {
                    data["store"] = value;
                }
            }
            Response::ok(id, data)
        }
        Method::Event => handle_event(id, params, state),
        Method::GetFeatureStatus => match parse_params::<FeatureQuery>(params) {
            Ok(query) => respond(id, "status_error", state.feature_status(query.feature_id)),
            Err(err) => Response::error_with_info(id, err),
        },
        Method::GetFeatureResults => match parse_params::<FeatureQuery>(params) {
            Ok(query) => respond(id, "results_error", state.feature_results(query.feature_id)),
            Err(err) => Response::error_with_info(id, err),
        },
        Method::GetBrowserStatus => match parse_params::<BrowserStatusQuery>(params) {
            Ok(query) => respond(id, "status_error", state.browser_status(&query)),
            Err(err) => Response::error_with_info(id, err),
        },
        Method::GetLastRun => match parse_params::<LastRunQuery>(params) {
            Ok(query) => respond(id, "results_error", state.last_run(&query)),
            Err(err) => Response::error_with_info(id, err),
        },
        Method::CleanupFeatureResults => match parse_params::<FeatureQuery>(params) {
            Ok(query) => respond(
                id,
                "cleanup_error",
                state
                    .cleanup(query.feature_id)
                    .map(|removed| serde_json::json!({ "removed_run_ids": removed })),
            ),
            Err(err) => Response::error_with_info(id, err),
        },
        Method::SubscribeNotifications => match parse_params::<FeatureQuery>(params) {
            Ok(query) => respond(
                id,
                "subscription_error",
                state
                    .subscribe(query.feature_id)
                    .map(|changed| subscription_ack(query.feature_id, changed, true)),
            ),
            Err(err) => Response::error_with_info(id, err),
        },
        Method::UnsubscribeNotifications => match parse_params::<FeatureQuery>(params) {
            Ok(query) => respond(
                id,
                "subscription_error",
                state
                    .unsubscribe(query.feature_id)
                    .map(|changed| subscription_ack(query.feature_id, changed, false)),
            ),
            Err(err) => Response::error_with_info(id, err),
        },
        Method::ListSubscriptions => respond(id, "subscription_error", state.subscriptions()),
        Method::TakeNotifications => {
            respond(id, "notification_error", state.take_notifications())
        }
    }
}

fn handle_event(id: Option<String>, params: Option<Value>, state: &SharedState) -> Response {
    let params = match params {
        Some(params) => params,
        None => return Response::error(id, "invalid_params", "event payload is required"),
    };

    let ingress = match parse_ingress(params) {
        Ok(ingress) => ingress,
        Err(err) => return Response::error_with_info(id, err),
    };

    match state.apply_ingress(&ingress, Utc::now()) {
        Ok(IngestOutcome::Applied) => Response::ok(id, serde_json::json!({"accepted": true})),
        Ok(IngestOutcome::PassedThrough) => Response::ok(
            id,
            serde_json::json!({"accepted": true, "passthrough": true}),
        ),
        Err(err) => {
            warn!(error = %err, "Rejected execution event");
            Response::error(id, "event_rejected", err)
        }
    }
}

fn subscription_ack(feature_id: i64, changed: bool, subscribed: bool) -> Value {
    serde_json::json!({
        "feature_id": feature_id,
        "subscribed": subscribed,
        "changed": changed,
    })
}

fn respond<T: Serialize>(id: Option<String>, code: &str, result: Result<T, String>) -> Response {
    match result {
        Ok(data) => match serde_json::to_value(data) {
            Ok(value) => Response::ok(id, value),
            Err(err) => Response::error(
                id,
                "serialization_error",
                format!("Failed to serialize response: {}", err),
            ),
        },
        Err(err) => Response::error(id, code, err),
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
