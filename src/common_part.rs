//! Shared ancestor directory of a set of glob patterns.
//!
//! The manifest's URL paths are computed relative to this directory, so every pattern must
//! resolve beneath it. Paths are compared as `/`-separated segment lists so that the result is
//! the same whether the patterns were written with forward or back slashes.

use std::path::{Component, Path, PathBuf};

const GLOB_CHARS: &[char] = &['*', '?', '['];

/// Returns `true` when the pattern contains glob metacharacters.
pub fn is_glob(pattern: &str) -> bool {
  pattern.contains(GLOB_CHARS)
}

/// Non-glob parent directory of a pattern.
///
/// The leading segments without any metacharacter are kept. For a literal pattern the
/// containing directory is returned. An empty result becomes `.` (or `/` for absolute input).
pub fn glob_parent(pattern: &str) -> String {
  let segments: Vec<&str> = pattern.split('/').collect();
  let literal = segments
    .iter()
    .take_while(|segment| !is_glob(segment))
    .count();
  let keep = if literal == segments.len() {
    literal.saturating_sub(1)
  } else {
    literal
  };

  let parent = segments[..keep].join("/");
  if !parent.is_empty() {
    parent
  } else if pattern.starts_with('/') {
    "/".to_string()
  } else {
    ".".to_string()
  }
}

/// Resolve `path` against `cwd`, collapsing `.` and `..` without touching the filesystem.
pub fn resolve_lexically(cwd: &Path, path: impl AsRef<Path>) -> PathBuf {
  let joined = cwd.join(path);
  let mut resolved = PathBuf::new();
  for component in joined.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        resolved.pop();
      }
      other => resolved.push(other.as_os_str()),
    }
  }
  resolved
}

/// Common base directory of `globs`, resolving relative patterns against `cwd`.
///
/// Returns an absolute directory with a trailing `/`, or `None` when the patterns share no
/// ancestor.
pub fn common_part_in<S: AsRef<str>>(cwd: &Path, globs: &[S]) -> Option<String> {
  let dirs: Vec<String> = globs
    .iter()
    .map(|glob| {
      resolve_lexically(cwd, glob_parent(glob.as_ref()))
        .to_string_lossy()
        .into_owned()
    })
    .collect();
  common_dir(&dirs)
}

/// Deepest directory shared by already-absolute directory paths.
///
/// Segments are matched from the root forward and the shared prefix is truncated at the first
/// mismatch. Two directories diverging right below the root have no common directory. A single
/// root directory is its own base, except for a bare drive letter.
pub fn common_dir<S: AsRef<str>>(dirs: &[S]) -> Option<String> {
  let (first, rest) = dirs.split_first()?;
  let mut common = path_segments(first.as_ref());

  for dir in rest {
    let segments = path_segments(dir.as_ref());
    let shared = common
      .iter()
      .zip(&segments)
      .take_while(|(left, right)| left == right)
      .count();
    if shared == 0 {
      return None;
    }
    common.truncate(shared);
  }

  match common.first() {
    None => Some("/".to_string()),
    Some(segment) if is_drive_letter(segment) => {
      (common.len() > 1).then(|| format!("{}/", common.join("/")))
    }
    Some(_) => Some(format!("/{}/", common.join("/"))),
  }
}

fn path_segments(path: &str) -> Vec<String> {
  path
    .replace('\\', "/")
    .split('/')
    .filter(|segment| !segment.is_empty())
    .map(str::to_string)
    .collect()
}

fn is_drive_letter(segment: &str) -> bool {
  segment
    .strip_suffix(':')
    .is_some_and(|letters| !letters.is_empty() && letters.chars().all(|c| c.is_ascii_alphabetic()))
}
