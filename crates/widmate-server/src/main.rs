use std::time::Duration;

use widmate_core::logging;

mod api;
mod cli;
mod error;
mod rate_limit;
mod state;
mod stats;

use crate::cli::CliCommand;

/// Blocking work still running at exit (an abandoned extraction or update) is
/// detached after this long.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn main() {
    // Fall back to stderr when the state directory is not writable.
    if let Err(err) = logging::init_logging() {
        logging::init_logging_stderr();
        tracing::warn!("file logging unavailable: {:#}", err);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("widmate error: start runtime: {err}");
            std::process::exit(1);
        }
    };
    let result = runtime.block_on(CliCommand::run_from_args());
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);

    if let Err(err) = result {
        eprintln!("widmate error: {:#}", err);
        std::process::exit(1);
    }
}
