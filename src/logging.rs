//! Tracing subscriber setup for the configured log targets.

use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LogTarget;

/// Log file written into the run directory when the `file` target is enabled.
pub const LOG_FILE: &str = "run.log";

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Install the global subscriber for `targets`.
///
/// Honours `RUST_LOG` when set; otherwise logs at `info`, or `debug` when
/// `debug` is true. The `file` target appends to `<run_directory>/run.log`
/// through a non-blocking writer, so call this once the run directory has
/// been prepared and keep the returned guard alive until the run is over:
/// dropping it flushes the file. Only the first call installs anything.
pub fn init(
    targets: &[LogTarget],
    debug: bool,
    run_directory: Option<&Path>,
) -> Option<WorkerGuard> {
    if TRACING_INIT.get().is_some() {
        return None;
    }

    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let stdout = targets
        .contains(&LogTarget::Stdout)
        .then(|| fmt::layer().with_target(false));

    let mut guard = None;
    let file = match run_directory {
        Some(dir) if targets.contains(&LogTarget::File) => {
            let appender = tracing_appender::rolling::never(dir, LOG_FILE);
            let (writer, worker) = tracing_appender::non_blocking(appender);
            guard = Some(worker);
            Some(fmt::layer().with_ansi(false).with_writer(writer))
        }
        _ => None,
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file)
        .try_init();

    let _ = TRACING_INIT.set(());
    guard
}
