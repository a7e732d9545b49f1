//! Source that yields a fixed string once and then ends.

use crate::source::{self, Source};

/// Create a source producing exactly `value`.
///
/// Used to splice literal sections between other sources without touching the disk.
pub fn constant(value: impl Into<String>) -> Source {
  let value: String = value.into();
  let (feed, source) = source::channel();
  // A fresh channel always has room for one chunk.
  feed.try_send(value);
  source
}
