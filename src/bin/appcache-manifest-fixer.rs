use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, bail};
use appcache_manifest::fixer::{DEFAULT_MANIFEST, fix_stream};
use appcache_manifest::logging;
use clap::Parser;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::error;

/// Add a "manifest" attribute to the <html> tag of a document.
#[derive(Parser, Debug)]
#[command(name = "appcache-manifest-fixer", author, version, about, long_about = None)]
struct Args {
  /// HTML file to patch; standard input when omitted
  #[arg(value_name = "FILE_PATH")]
  input: Option<PathBuf>,

  /// Output file; standard output when omitted
  #[arg(short, long, value_name = "FILE_PATH")]
  output: Option<PathBuf>,

  /// Value of the inserted "manifest" attribute
  #[arg(short, long, value_name = "PATH", default_value = DEFAULT_MANIFEST)]
  manifest: String,
}

fn main() -> ExitCode {
  let args = Args::parse();
  if let Err(err) = logging::init(false, false) {
    eprintln!("ERROR: {err:#}");
    return ExitCode::FAILURE;
  }

  match run(&args) {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      error!("ERROR: {err:#}");
      ExitCode::FAILURE
    }
  }
}

fn run(args: &Args) -> anyhow::Result<()> {
  if let (Some(input), Some(output)) = (&args.input, &args.output) {
    check_distinct(input, output)?;
  }

  let runtime = tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .context("failed to start the async runtime")?;
  runtime.block_on(patch(args))
}

async fn patch(args: &Args) -> anyhow::Result<()> {
  let mut reader: Box<dyn AsyncRead + Unpin> = match &args.input {
    Some(path) => Box::new(
      File::open(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?,
    ),
    None => Box::new(tokio::io::stdin()),
  };

  let mut writer: Box<dyn AsyncWrite + Unpin> = match &args.output {
    Some(path) => Box::new(create_output(path).await?),
    None => Box::new(tokio::io::stdout()),
  };

  fix_stream(&mut reader, &mut writer, &args.manifest)
    .await
    .context("failed to patch the document")
}

fn check_distinct(input: &Path, output: &Path) -> anyhow::Result<()> {
  if !input.exists() {
    bail!("{} does not exist", input.display());
  }
  if output.exists()
    && same_file::is_same_file(input, output)
      .with_context(|| format!("failed to compare {} with {}", input.display(), output.display()))?
  {
    bail!(
      "the input and the output are the same file: {}",
      input.display()
    );
  }
  Ok(())
}

async fn create_output(path: &Path) -> anyhow::Result<File> {
  if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
    fs::create_dir_all(parent)
      .await
      .with_context(|| format!("failed to create {}", parent.display()))?;
  }
  File::create(path)
    .await
    .with_context(|| format!("failed to write {}", path.display()))
}
