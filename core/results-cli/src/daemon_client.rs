//! Client helper for talking to the results daemon.
//!
//! One request per connection, newline terminated, mirroring the daemon's
//! framing. Only a failed connect is retried; once the request is written the
//! daemon may already have applied it.

use cometa_results_protocol::{Method, Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION};
use serde_json::Value;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{CliError, Result};

const SOCKET_ENV: &str = "COMETA_RESULTS_SOCKET";
const READ_TIMEOUT_MS: u64 = 2000;
const WRITE_TIMEOUT_MS: u64 = 600;
const RETRY_DELAY_MS: u64 = 50;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Sends `method` and returns the response data, turning daemon-side errors
/// into `CliError::Daemon`.
pub fn call(method: Method, params: Option<Value>) -> Result<Value> {
    let response = send_with_retry(method, params)?;
    into_data(response)
}

/// Like [`call`] but hands back the raw envelope.
pub fn send_with_retry(method: Method, params: Option<Value>) -> Result<Response> {
    let socket = socket_path()?;
    send_with_retry_to(&socket, method, params)
}

fn send_with_retry_to(socket: &Path, method: Method, params: Option<Value>) -> Result<Response> {
    match send_request(socket, build_request(method, params.clone())) {
        Ok(response) => Ok(response),
        Err(CliError::Connect(err)) => {
            tracing::warn!(error = %err, method = ?method, "Daemon connect failed; retrying");
            std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
            send_request(socket, build_request(method, params))
        }
        Err(err) => Err(err),
    }
}

pub fn into_data(response: Response) -> Result<Value> {
    if response.ok {
        return response.data.ok_or(CliError::EmptyResponse);
    }
    let (code, message) = response
        .error
        .map(|err| (err.code, err.message))
        .unwrap_or_else(|| ("unknown".to_string(), "Unknown daemon error".to_string()));
    Err(CliError::Daemon { code, message })
}

fn build_request(method: Method, params: Option<Value>) -> Request {
    let sequence = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
    Request {
        protocol_version: PROTOCOL_VERSION,
        method,
        id: Some(format!("cli-{}-{}", std::process::id(), sequence)),
        params,
    }
}

fn socket_path() -> Result<PathBuf> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    results_core::config::socket_path().map_err(|err| CliError::Connect(err.to_string()))
}

fn send_request(socket: &Path, request: Request) -> Result<Response> {
    let mut stream = UnixStream::connect(socket).map_err(|err| {
        CliError::Connect(format!(
            "Failed to connect to {}: {}",
            socket.display(),
            err
        ))
    })?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    serde_json::to_writer(&mut stream, &request)?;
    stream.write_all(b"\n")?;
    stream.flush().ok();

    read_response(&mut stream)
}

fn read_response<R: Read>(stream: &mut R) -> Result<Response> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(CliError::Unavailable(
                        "Response exceeded maximum size".to_string(),
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
                return Err(CliError::Unavailable(
                    "Timed out waiting for daemon response".to_string(),
                ));
            }
            Err(err) => return Err(CliError::Io(err)),
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err(CliError::Unavailable("Daemon response was empty".to_string()));
    }

    Ok(serde_json::from_slice(response_bytes)?)
}
