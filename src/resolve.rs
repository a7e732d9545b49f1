//! Glob expansion into a stream of matched files.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use tokio::sync::mpsc;
use tracing::debug;

use crate::common_part::{is_glob, resolve_lexically};
use crate::source::{CHUNK_CAPACITY, SourceError};

/// Matching rules shared by expansion and the watcher: case-sensitive, `*` never crosses a
/// separator, and dot files are only matched by patterns spelling the dot out.
pub(crate) const MATCH_OPTIONS: MatchOptions = MatchOptions {
  case_sensitive: true,
  require_literal_separator: true,
  require_literal_leading_dot: true,
};

/// Stream of resolved file paths, in no particular order.
#[derive(Debug)]
pub struct FileList {
  rx: mpsc::Receiver<Result<PathBuf, SourceError>>,
}

impl FileList {
  /// Build a list from paths resolved elsewhere.
  pub fn from_paths(paths: impl IntoIterator<Item = PathBuf>) -> Self {
    let paths: Vec<PathBuf> = paths.into_iter().collect();
    let (tx, rx) = mpsc::channel(paths.len().max(1));
    for path in paths {
      let _ = tx.try_send(Ok(path));
    }
    Self { rx }
  }

  /// Next resolved file, or `None` once resolution is complete.
  pub async fn next(&mut self) -> Option<Result<PathBuf, SourceError>> {
    self.rx.recv().await
  }
}

/// Expand `patterns` on a blocking worker, resolving relative patterns against `cwd`.
///
/// Only regular files are listed and a file matched by several patterns is listed once. A
/// pattern with invalid syntax, or a literal pattern naming a missing file, produces an error
/// item; a glob that simply matches nothing produces nothing.
///
/// # Panics
///
/// Must be called from within a Tokio runtime.
pub fn resolve_globs<S: AsRef<str>>(patterns: &[S], cwd: &Path) -> FileList {
  let patterns: Vec<String> = patterns
    .iter()
    .map(|pattern| pattern.as_ref().to_string())
    .collect();
  let cwd = cwd.to_path_buf();
  let (tx, rx) = mpsc::channel(CHUNK_CAPACITY);

  tokio::task::spawn_blocking(move || expand(&patterns, &cwd, &tx));

  FileList { rx }
}

/// Absolute form of a pattern.
///
/// The literal segments before the first glob are resolved against `cwd` with `.` and `..`
/// collapsed, then escaped so they are matched literally.
pub(crate) fn absolute_pattern(cwd: &Path, pattern: &str) -> String {
  let segments: Vec<&str> = pattern.split('/').collect();
  let literal = segments
    .iter()
    .take_while(|segment| !is_glob(segment))
    .count();

  let prefix = segments[..literal].join("/");
  let prefix = if prefix.is_empty() && pattern.starts_with('/') {
    "/".to_string()
  } else {
    prefix
  };
  let base = Pattern::escape(&resolve_lexically(cwd, prefix).to_string_lossy());

  let rest = &segments[literal..];
  if rest.is_empty() {
    return base;
  }
  format!("{}/{}", base.trim_end_matches('/'), rest.join("/"))
}

fn expand(patterns: &[String], cwd: &Path, tx: &mpsc::Sender<Result<PathBuf, SourceError>>) {
  let mut seen = HashSet::new();

  for pattern in patterns {
    let absolute = absolute_pattern(cwd, pattern);
    let entries = match glob::glob_with(&absolute, MATCH_OPTIONS) {
      Ok(entries) => entries,
      Err(err) => {
        let message = format!("invalid glob {pattern:?}: {err}");
        if tx
          .blocking_send(Err(SourceError::new(io::ErrorKind::InvalidInput, message)))
          .is_err()
        {
          return;
        }
        continue;
      }
    };

    let mut matched = false;
    for entry in entries {
      let item = match entry {
        Ok(path) => {
          if !path.is_file() {
            continue;
          }
          matched = true;
          let path = resolve_lexically(cwd, path);
          if !seen.insert(path.clone()) {
            continue;
          }
          Ok(path)
        }
        Err(err) => Err(SourceError::from_io(err.path(), err.error())),
      };

      if tx.blocking_send(item).is_err() {
        return;
      }
    }

    if !matched && !is_glob(pattern) {
      let err = SourceError::new(io::ErrorKind::NotFound, "File not found with singular glob")
        .with_path(resolve_lexically(cwd, pattern));
      if tx.blocking_send(Err(err)).is_err() {
        return;
      }
    }
    debug!(pattern = %pattern, "expanded glob");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::tempdir;

  async fn drain(mut list: FileList) -> (Vec<PathBuf>, Vec<SourceError>) {
    let mut files = Vec::new();
    let mut errors = Vec::new();
    while let Some(item) = list.next().await {
      match item {
        Ok(path) => files.push(path),
        Err(err) => errors.push(err),
      }
    }
    files.sort();
    (files, errors)
  }

  fn workspace() -> tempfile::TempDir {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("d")).unwrap();
    fs::write(root.join("a.txt"), "AAA").unwrap();
    fs::write(root.join("b.txt"), "BBB").unwrap();
    fs::write(root.join("c.dat"), "Not includes").unwrap();
    fs::write(root.join("d/d.txt"), "DDD").unwrap();
    fs::write(root.join(".hidden.txt"), "HIDDEN").unwrap();
    dir
  }

  #[tokio::test]
  async fn expands_recursive_globs_to_files() {
    let dir = workspace();
    let root = dir.path();

    let (files, errors) = drain(resolve_globs(&["**/*.txt"], root)).await;
    assert!(errors.is_empty());
    assert_eq!(files, vec![
      root.join("a.txt"),
      root.join("b.txt"),
      root.join("d/d.txt"),
    ]);
  }

  #[tokio::test]
  async fn lists_files_matched_twice_once() {
    let dir = workspace();
    let root = dir.path();

    let (files, errors) = drain(resolve_globs(&["*.txt", "a.*", "**/*.txt"], root)).await;
    assert!(errors.is_empty());
    assert_eq!(files.len(), 3);
  }

  #[tokio::test]
  async fn skips_directories() {
    let dir = workspace();
    let root = dir.path();

    let (files, _) = drain(resolve_globs(&["*"], root)).await;
    assert!(!files.contains(&root.join("d")));
    assert!(files.contains(&root.join("c.dat")));
  }

  #[tokio::test]
  async fn missing_literal_pattern_is_an_error() {
    let dir = workspace();
    let root = dir.path();

    let (files, errors) = drain(resolve_globs(&["missing.txt", "*.nothing"], root)).await;
    assert!(files.is_empty());
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind(), io::ErrorKind::NotFound);
    assert_eq!(errors[0].path(), Some(root.join("missing.txt").as_path()));
  }

  #[tokio::test]
  async fn invalid_pattern_is_an_error() {
    let dir = workspace();
    let (_, errors) = drain(resolve_globs(&["[*.txt"], dir.path())).await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind(), io::ErrorKind::InvalidInput);
  }

  #[test]
  fn absolute_patterns_are_kept() {
    let cwd = Path::new("/work");
    assert_eq!(absolute_pattern(cwd, "/site/**/*.html"), "/site/**/*.html");
    assert_eq!(absolute_pattern(cwd, "site/*.css"), "/work/site/*.css");
  }

  #[cfg(unix)]
  #[test]
  fn dot_segments_are_collapsed() {
    let cwd = Path::new("/work");
    assert_eq!(absolute_pattern(cwd, "./site/*.txt"), "/work/site/*.txt");
    assert_eq!(absolute_pattern(cwd, "../shared/*.css"), "/shared/*.css");
    assert_eq!(absolute_pattern(cwd, "site/./d/../**/*.txt"), "/work/site/**/*.txt");
    assert_eq!(absolute_pattern(cwd, "./index.html"), "/work/index.html");
    assert_eq!(absolute_pattern(Path::new("/"), "**/*.txt"), "/**/*.txt");
  }

  #[tokio::test]
  async fn dot_prefixed_patterns_list_clean_paths() {
    let dir = workspace();
    let root = dir.path().join("d");

    let (files, errors) = drain(resolve_globs(&["./*.txt", "../*.txt"], &root)).await;
    assert!(errors.is_empty());
    assert_eq!(files, vec![
      dir.path().join("a.txt"),
      dir.path().join("b.txt"),
      root.join("d.txt"),
    ]);
  }

  #[test]
  fn working_directory_is_escaped() {
    let cwd = Path::new("/work/out[1]");
    assert_eq!(absolute_pattern(cwd, "*.css"), "/work/out[[]1[]]/*.css");
  }
}
