use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, bail};
use appcache_manifest::generate::{GenerateError, GenerateOptions};
use appcache_manifest::regenerate::{GenerationJob, WatchSession};
use appcache_manifest::{ManifestConfig, logging};
use clap::Parser;
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};

/// Generate an offline-cache manifest from file globs.
#[derive(Parser, Debug)]
#[command(name = "appcache-manifest", author, version, about, long_about = None)]
struct Args {
  /// File globs included in the manifest
  #[arg(value_name = "GLOBS", required = true)]
  globs: Vec<String>,

  /// Output file; standard output when omitted
  #[arg(short, long, value_name = "FILE_PATH")]
  output: Option<PathBuf>,

  /// Prefix of every path in the cache section; must start with '/'
  #[arg(short, long, value_name = "PATH")]
  prefix: Option<String>,

  /// File appended after the generated contents (repeatable)
  #[arg(short = 'P', long, value_name = "FILE_PATH")]
  postfile: Vec<PathBuf>,

  /// Stamp the manifest with the creation time instead of an md5 digest
  #[arg(short, long)]
  stamp: bool,

  /// Append "NETWORK:\n*" after the generated contents
  #[arg(long)]
  network_star: bool,

  /// Print progress details; requires --output
  #[arg(short, long)]
  verbose: bool,

  /// Only print errors
  #[arg(short, long, conflicts_with = "verbose")]
  quiet: bool,

  /// Regenerate the manifest whenever matched files are added, removed or changed;
  /// requires --output
  #[arg(short, long)]
  watch: bool,

  /// Configuration file; appcache.config.json in the working directory by default
  #[arg(long, value_name = "FILE_PATH")]
  config: Option<PathBuf>,
}

struct Settings {
  options: GenerateOptions,
  output: Option<PathBuf>,
  watch_delay: Duration,
}

fn main() -> ExitCode {
  let args = Args::parse();
  if let Err(err) = logging::init(args.verbose, args.quiet) {
    eprintln!("ERROR: {err:#}");
    return ExitCode::FAILURE;
  }

  match run(args) {
    Ok(code) => code,
    Err(err) => {
      error!("ERROR: {err:#}");
      ExitCode::FAILURE
    }
  }
}

fn run(args: Args) -> anyhow::Result<ExitCode> {
  let cwd = std::env::current_dir().context("failed to read the working directory")?;
  let settings = settings(&args, &cwd)?;

  let mut job = GenerationJob::new(&cwd, &args.globs, settings.options);
  if let Some(output) = &settings.output {
    job = job.with_output(output);
  }

  let runtime = tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .context("failed to start the async runtime")?;

  let code = runtime.block_on(async {
    if args.watch {
      watch(job, settings.watch_delay).await
    } else {
      // Failures are logged by the job itself.
      match job.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
      }
    }
  });

  // Standard input may still be held by a blocking read.
  runtime.shutdown_background();
  Ok(code)
}

fn settings(args: &Args, cwd: &Path) -> anyhow::Result<Settings> {
  let config = match &args.config {
    Some(path) => ManifestConfig::from_path(&cwd.join(path))?,
    None => ManifestConfig::discover(cwd),
  };

  let mut options = config.to_options();
  if let Some(prefix) = &args.prefix {
    options.prefix = prefix.clone();
  }
  if !args.postfile.is_empty() {
    options.postfiles = args.postfile.clone();
  }
  options.stamp |= args.stamp;
  options.network_star |= args.network_star;

  let output = args.output.clone().or_else(|| config.output.clone());
  if args.verbose && output.is_none() {
    bail!("--verbose option should be used together with --output option.");
  }
  if args.watch && output.is_none() {
    bail!("--watch option should be used together with --output option.");
  }

  Ok(Settings {
    options,
    output,
    watch_delay: config.watch_delay(),
  })
}

async fn watch(job: GenerationJob, delay: Duration) -> ExitCode {
  let session = match WatchSession::start(job, delay).await {
    Ok(session) => session,
    Err(err @ (GenerateError::Watch(_) | GenerateError::NoCommonBase { .. })) => {
      error!("ERROR: {err}");
      return ExitCode::FAILURE;
    }
    // Generation failures are logged by the job itself.
    Err(_) => return ExitCode::FAILURE,
  };

  tokio::select! {
    () = kill_requested() => info!("closing on KILL"),
    () = interrupted() => info!("closing on interrupt"),
  }

  session.close().await;
  ExitCode::SUCCESS
}

/// Resolve once a `KILL` line shows up on standard input. Never resolves after end of input.
async fn kill_requested() {
  let mut stdin = tokio::io::stdin();
  let mut received = String::new();
  let mut buffer = [0u8; 256];
  loop {
    match stdin.read(&mut buffer).await {
      Ok(0) => std::future::pending::<()>().await,
      Ok(read) => {
        received.push_str(&String::from_utf8_lossy(&buffer[..read]));
        if received.lines().any(|line| line.trim() == "KILL") {
          return;
        }
      }
      Err(err) => {
        warn!("stopped reading standard input: {err}");
        std::future::pending::<()>().await;
      }
    }
  }
}

async fn interrupted() {
  if let Err(err) = tokio::signal::ctrl_c().await {
    warn!("cannot listen for interrupts: {err}");
    std::future::pending::<()>().await;
  }
}
