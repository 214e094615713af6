//! `feed`: forwards execution events (one JSON object per line) to the daemon.
//!
//! Bad lines and rejected events are counted and logged, never fatal, so one
//! malformed frame cannot stall a long-running pipe.

use cometa_results_protocol::{Method, Response};
use serde::Serialize;
use serde_json::Value;
use std::io::BufRead;

use crate::daemon_client;
use crate::error::{CliError, Result};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct FeedSummary {
    pub accepted: usize,
    pub passthrough: usize,
    pub failed: usize,
}

pub fn run<R: BufRead>(input: R) -> Result<FeedSummary> {
    feed_lines(input, |event| {
        daemon_client::send_with_retry(Method::Event, Some(event))
    })
}

pub fn feed_lines<R, F>(input: R, mut send: F) -> Result<FeedSummary>
where
    R: BufRead,
    F: FnMut(Value) -> Result<Response>,
{
    let mut summary = FeedSummary::default();

    for (index, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let event: Value = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(source) => {
                let err = CliError::InvalidLine {
                    line: index + 1,
                    source,
                };
                tracing::warn!(error = %err, "Skipping unparseable event line");
                summary.failed += 1;
                continue;
            }
        };

        // An unreachable daemon is fatal; the rest of the stream would fail too.
        let response = send(event)?;
        match daemon_client::into_data(response) {
            Ok(data) => {
                if data.get("passthrough").and_then(Value::as_bool) == Some(true) {
                    summary.passthrough += 1;
                } else {
                    summary.accepted += 1;
                }
            }
            Err(err) => {
                tracing::warn!(line = index + 1, error = %err, "Daemon rejected event");
                summary.failed += 1;
            }
        }
    }

    tracing::info!(
        accepted = summary.accepted,
        passthrough = summary.passthrough,
        failed = summary.failed,
        "Feed finished"
    );
    Ok(summary)
}
