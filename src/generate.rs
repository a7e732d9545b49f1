//! Generation orchestrator: globs in, complete manifest document out.
//!
//! The manifest is assembled from, in order, the generated body, each postfile followed by a
//! newline, and the optional `NETWORK:` wildcard section, all joined by a single
//! [`concat`](crate::concat::concat).

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::common_part::common_part_in;
use crate::concat::concat;
use crate::constant::constant;
use crate::content::{ContentOptions, ContentStream, Notice, generate_content};
use crate::resolve::resolve_globs;
use crate::source::{Collected, Source, SourceError};

/// Trailing section allowing every non-cached request through.
pub const NETWORK_STAR: &str = "NETWORK:\n*\n";

/// Options recognised by [`generate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateOptions {
  /// Prefix of every path in the cache section. Must start with `/`.
  pub prefix: String,
  /// Files whose contents are appended, each followed by a newline.
  pub postfiles: Vec<PathBuf>,
  /// Write a creation timestamp instead of the content digest.
  pub stamp: bool,
  /// Append a `NETWORK:` section with a `*` wildcard after the postfiles.
  pub network_star: bool,
}

impl Default for GenerateOptions {
  fn default() -> Self {
    Self {
      prefix: "/".into(),
      postfiles: Vec::new(),
      stamp: false,
      network_star: false,
    }
  }
}

/// Errors reported by manifest generation.
#[derive(Debug)]
pub enum GenerateError {
  /// No glob pattern was given.
  NoPatterns,
  /// The prefix does not start with `/`.
  InvalidPrefix {
    /// Offending prefix.
    prefix: String,
  },
  /// The patterns share no common parent directory.
  NoCommonBase {
    /// Patterns that were given.
    patterns: Vec<String>,
  },
  /// The working directory could not be determined.
  CurrentDir(io::Error),
  /// Writing the manifest failed.
  Output {
    /// Output file, `None` for standard output.
    path: Option<PathBuf>,
    /// Source I/O error.
    source: io::Error,
  },
  /// A file, glob, or postfile failed while the manifest was produced.
  Source(SourceError),
  /// The filesystem watcher could not be started.
  Watch(notify::Error),
  /// The generation task ended without reporting a result.
  Interrupted,
}

impl fmt::Display for GenerateError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::NoPatterns => f.write_str("requires file globs"),
      Self::InvalidPrefix { prefix } => {
        write!(f, "prefix {prefix:?} should be started with '/'")
      }
      Self::NoCommonBase { patterns } => write!(
        f,
        "the common parent directory of globs is not found: {}",
        patterns.join(", ")
      ),
      Self::CurrentDir(source) => write!(f, "failed to read the working directory: {source}"),
      Self::Output {
        path: Some(path),
        source,
      } => write!(f, "failed to write {}: {}", path.display(), source),
      Self::Output { path: None, source } => write!(f, "failed to write output: {source}"),
      Self::Source(source) => fmt::Display::fmt(source, f),
      Self::Watch(source) => write!(f, "failed to watch files: {source}"),
      Self::Interrupted => f.write_str("generation ended before reporting a result"),
    }
  }
}

impl std::error::Error for GenerateError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Self::CurrentDir(source) => Some(source),
      Self::Output { source, .. } => Some(source),
      Self::Source(source) => Some(source),
      Self::Watch(source) => Some(source),
      _ => None,
    }
  }
}

/// Complete manifest document plus the body's progress notifications.
#[derive(Debug)]
pub struct ManifestStream {
  content: Source,
  notices: mpsc::UnboundedReceiver<Notice>,
}

impl ManifestStream {
  /// Split into the document source and its notifications.
  pub fn into_parts(self) -> (Source, mpsc::UnboundedReceiver<Notice>) {
    (self.content, self.notices)
  }

  /// Gather the whole document and every error, ignoring notifications.
  pub async fn collect(self) -> Collected {
    self.content.collect().await
  }

  /// Write the document into `writer`, logging notifications at debug level.
  ///
  /// The whole document is always written; the first source error is returned afterwards and
  /// any further ones are logged.
  pub async fn write_to<W>(self, writer: &mut W) -> Result<(), GenerateError>
  where
    W: AsyncWrite + Unpin,
  {
    self.write_inner(writer, None).await
  }

  /// Write the document into `path`, creating missing parent directories.
  pub async fn write_to_path(self, path: &Path) -> Result<(), GenerateError> {
    let output_error = |source| GenerateError::Output {
      path: Some(path.to_path_buf()),
      source,
    };

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
      fs::create_dir_all(parent).await.map_err(output_error)?;
    }
    let mut file = File::create(path).await.map_err(output_error)?;
    self.write_inner(&mut file, Some(path)).await
  }

  async fn write_inner<W>(self, writer: &mut W, path: Option<&Path>) -> Result<(), GenerateError>
  where
    W: AsyncWrite + Unpin,
  {
    let (content, notices) = self.into_parts();
    let reporter = tokio::spawn(report_notices(notices));

    let errors = content
      .pipe(writer)
      .await
      .map_err(|source| GenerateError::Output {
        path: path.map(Path::to_path_buf),
        source,
      })?;
    let _ = reporter.await;

    let mut errors = errors.into_iter();
    match errors.next() {
      Some(first) => {
        for other in errors {
          warn!("{other}");
        }
        Err(GenerateError::Source(first))
      }
      None => Ok(()),
    }
  }
}

async fn report_notices(mut notices: mpsc::UnboundedReceiver<Notice>) {
  while let Some(notice) = notices.recv().await {
    match notice {
      Notice::PathAdded { path } => debug!("  Add: {path}"),
      Notice::FingerprintAdded { digest } => debug!("  Add fingerprint: {digest}"),
    }
  }
}

/// Start generating a manifest for `patterns`, resolved against the working directory.
///
/// Configuration problems are reported here and nothing is started. Problems met while reading
/// files arrive later as error events on the returned stream.
///
/// # Panics
///
/// Must be called from within a Tokio runtime.
pub fn generate<S: AsRef<str>>(
  patterns: &[S],
  options: &GenerateOptions,
) -> Result<ManifestStream, GenerateError> {
  let cwd = std::env::current_dir().map_err(GenerateError::CurrentDir)?;
  generate_in(&cwd, patterns, options)
}

/// Like [`generate`], resolving relative patterns and postfiles against `cwd`.
pub fn generate_in<S: AsRef<str>>(
  cwd: &Path,
  patterns: &[S],
  options: &GenerateOptions,
) -> Result<ManifestStream, GenerateError> {
  if patterns.is_empty() {
    return Err(GenerateError::NoPatterns);
  }
  if !options.prefix.starts_with('/') {
    return Err(GenerateError::InvalidPrefix {
      prefix: options.prefix.clone(),
    });
  }

  let base = common_part_in(cwd, patterns).ok_or_else(|| GenerateError::NoCommonBase {
    patterns: patterns
      .iter()
      .map(|pattern| pattern.as_ref().to_string())
      .collect(),
  })?;
  debug!(base = %base, "resolved common base");

  let files = resolve_globs(patterns, cwd);
  let ContentStream { source, notices } = generate_content(files, &base, &ContentOptions {
    prefix: options.prefix.clone(),
    stamp: options.stamp,
  });

  let mut sources = vec![source];
  for postfile in &options.postfiles {
    sources.push(Source::from_file(cwd.join(postfile)));
    sources.push(constant("\n"));
  }
  if options.network_star {
    sources.push(constant(NETWORK_STAR));
  }

  Ok(ManifestStream {
    content: concat(sources),
    notices,
  })
}
