//! cometa-results: command-line client for the Co.Meta results daemon.
//!
//! ## Subcommands
//!
//! - `feed`: Forward execution events from stdin (one JSON object per line)
//! - `status`, `steps`: Query the live result tree
//! - `cleanup`: Drop fully completed runs of a feature
//! - `subscribe`, `unsubscribe`, `subscriptions`, `notifications`: Completion
//!   notifications
//! - `health`: Daemon liveness and store counters
//!
//! Every subcommand prints JSON on stdout. Logs go to `~/.cometa/logs`.

mod daemon_client;
mod error;
mod feed;
mod logging;

use clap::{Parser, Subcommand};
use cometa_results_protocol::Method;
use serde_json::{json, Value};
use std::io;

use error::Result;

#[derive(Parser)]
#[command(name = "cometa-results")]
#[command(about = "Co.Meta live execution results client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forward execution events from stdin to the daemon
    Feed,

    /// Show a feature's status, running flag and last run
    Status {
        #[arg(value_name = "FEATURE_ID")]
        feature_id: i64,
    },

    /// Show step results of a feature's last run for one browser
    Steps {
        #[arg(value_name = "FEATURE_ID")]
        feature_id: i64,

        /// Browser key as reported in notifications and results
        #[arg(long)]
        browser_key: String,
    },

    /// Remove fully completed runs of a feature
    Cleanup {
        #[arg(value_name = "FEATURE_ID")]
        feature_id: i64,
    },

    /// Notify when runs of this feature finish
    Subscribe {
        #[arg(value_name = "FEATURE_ID")]
        feature_id: i64,
    },

    /// Stop notifying for this feature
    Unsubscribe {
        #[arg(value_name = "FEATURE_ID")]
        feature_id: i64,
    },

    /// List subscribed feature ids
    Subscriptions,

    /// Print and clear pending completion notifications
    Notifications,

    /// Check daemon health
    Health,
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    match run(cli.command) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            tracing::error!(error = %e, "cometa-results failed");
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}

fn run(command: Commands) -> Result<Value> {
    match command {
        Commands::Feed => {
            let stdin = io::stdin();
            let summary = feed::run(stdin.lock())?;
            Ok(serde_json::to_value(summary)?)
        }
        Commands::Status { feature_id } => daemon_client::call(
            Method::GetFeatureStatus,
            Some(json!({ "feature_id": feature_id })),
        ),
        Commands::Steps {
            feature_id,
            browser_key,
        } => daemon_client::call(
            Method::GetLastRun,
            Some(json!({ "feature_id": feature_id, "browser_key": browser_key })),
        ),
        Commands::Cleanup { feature_id } => daemon_client::call(
            Method::CleanupFeatureResults,
            Some(json!({ "feature_id": feature_id })),
        ),
        Commands::Subscribe { feature_id } => daemon_client::call(
            Method::SubscribeNotifications,
            Some(json!({ "feature_id": feature_id })),
        ),
        Commands::Unsubscribe { feature_id } => daemon_client::call(
            Method::UnsubscribeNotifications,
            Some(json!({ "feature_id": feature_id })),
        ),
        Commands::Subscriptions => daemon_client::call(Method::ListSubscriptions, None),
        Commands::Notifications => daemon_client::call(Method::TakeNotifications, None),
        Commands::Health => daemon_client::call(Method::GetHealth, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn steps_requires_browser_key() {
        assert!(Cli::try_parse_from(["cometa-results", "steps", "10"]).is_err());
        let cli = Cli::try_parse_from([
            "cometa-results",
            "steps",
            "10",
            "--browser-key",
            "linux|22.04|chrome|120||false",
        ])
        .expect("parse");
        assert!(matches!(
            cli.command,
            Commands::Steps { feature_id: 10, .. }
        ));
    }
}
