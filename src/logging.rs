//! Log output for the command-line tools.
//!
//! Standard output may carry the manifest itself, so every log line goes to standard error.

use anyhow::Context;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Level selected by the `--verbose` and `--quiet` flags. Verbose wins when both are set.
pub fn level(verbose: bool, quiet: bool) -> Level {
  if verbose {
    Level::DEBUG
  } else if quiet {
    Level::ERROR
  } else {
    Level::INFO
  }
}

/// Install the global subscriber writing plain lines to standard error.
pub fn init(verbose: bool, quiet: bool) -> anyhow::Result<()> {
  let subscriber = FmtSubscriber::builder()
    .with_max_level(level(verbose, quiet))
    .with_writer(std::io::stderr)
    .with_target(false)
    .without_time()
    .finish();

  tracing::subscriber::set_global_default(subscriber)
    .context("failed to install the log subscriber")
}
