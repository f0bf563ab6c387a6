//! Bootstrap utilities for pointledger binaries.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LOG_ENV_VAR;

/// Filter used when POINTLEDGER_LOG is unset or unparseable. sqlx logs
/// every statement at info, which drowns out the ledger's own events.
pub const DEFAULT_LOG_FILTER: &str = "info,sqlx=warn";

/// Build the log filter from a POINTLEDGER_LOG value.
///
/// Returns the filter and, when the value was rejected, the parse error.
fn log_filter(directives: Option<&str>) -> (EnvFilter, Option<String>) {
    match directives.map(str::trim).filter(|d| !d.is_empty()) {
        None => (EnvFilter::new(DEFAULT_LOG_FILTER), None),
        Some(directives) => match EnvFilter::try_new(directives) {
            Ok(filter) => (filter, None),
            Err(e) => (EnvFilter::new(DEFAULT_LOG_FILTER), Some(e.to_string())),
        },
    }
}

/// Install the global subscriber, filtered by POINTLEDGER_LOG.
///
/// Safe to call more than once: later calls leave the installed
/// subscriber in place and return false.
pub fn init_tracing() -> bool {
    let directives = std::env::var(LOG_ENV_VAR).ok();
    let (filter, rejected) = log_filter(directives.as_deref());

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok();

    if let Some(error) = rejected {
        tracing::warn!(
            env = LOG_ENV_VAR,
            error = %error,
            fallback = DEFAULT_LOG_FILTER,
            "Ignoring invalid log filter"
        );
    }
    if !installed {
        tracing::debug!("Tracing subscriber already installed");
    }
    installed
}

/// Value of `--config <path>` (or `--config=<path>`) on the command line.
pub fn parse_config_path() -> Option<String> {
    config_path_from(std::env::args().skip(1))
}

fn config_path_from(args: impl IntoIterator<Item = String>) -> Option<String> {
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}
