//! Sequential concatenation of several sources into one.
//!
//! Sources are drained strictly in the order they were added, one at a time, through a
//! [`Queue`]. Only the terminal source closes the combined output; earlier ones hand over to the
//! next source when they end. The first error of each source is forwarded to the output in
//! place; later errors from the same source are only logged. Errors never stop the
//! concatenation, and the data a source produces after an error is still copied.

use tracing::warn;

use crate::queue::Queue;
use crate::source::{self, Feed, Source};

/// Builder feeding added sources into a single combined [`Source`].
pub struct ConcatStream {
  queue: Option<Queue>,
  output: Option<Feed>,
}

impl ConcatStream {
  /// Create an empty concatenation and the combined source it feeds.
  ///
  /// The combined source ends once the terminal source has ended, or immediately when the
  /// builder is dropped without ever receiving a terminal source.
  pub fn new() -> (Self, Source) {
    let (output, combined) = source::channel();
    let stream = Self {
      queue: Some(Queue::new()),
      output: Some(output),
    };
    (stream, combined)
  }

  /// Append `source`. Pass `end = true` for the last source.
  ///
  /// # Panics
  ///
  /// Panics when called after the terminal source has been added, and when called outside a
  /// Tokio runtime.
  pub fn add_source(&mut self, mut source: Source, end: bool) {
    let (Some(queue), Some(output)) = (self.queue.as_ref(), self.output.as_ref()) else {
      panic!("source added after the terminal source of a concatenation");
    };

    let output = output.clone();
    queue.push_task(move || async move { forward(&mut source, &output).await });

    if end {
      self.queue = None;
      self.output = None;
    }
  }
}

async fn forward(source: &mut Source, output: &Feed) {
  let mut failed = false;
  while let Some(chunk) = source.next_chunk().await {
    let delivered = match chunk {
      Ok(data) => output.send(data).await,
      Err(err) if failed => {
        warn!("{err}");
        true
      }
      Err(err) => {
        failed = true;
        output.send_error(err).await
      }
    };
    if !delivered {
      return;
    }
  }
}

/// Concatenate `sources` in order into a single source.
pub fn concat(sources: Vec<Source>) -> Source {
  let (mut stream, combined) = ConcatStream::new();
  let last = sources.len().saturating_sub(1);
  for (index, source) in sources.into_iter().enumerate() {
    stream.add_source(source, index == last);
  }
  combined
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::constant::constant;
  use crate::source::SourceError;
  use std::io;
  use std::time::Duration;

  #[tokio::test]
  async fn joins_sources_in_order() {
    let combined = concat(vec![constant("A"), constant("B"), constant("C")]);
    assert_eq!(combined.collect().await.text(), "ABC");
  }

  #[tokio::test]
  async fn ends_only_after_the_last_source() {
    let (last_feed, last) = source::channel();
    let mut combined = concat(vec![constant("A"), constant("B"), last]);

    assert_eq!(combined.next_chunk().await.unwrap().unwrap(), b"A");
    assert_eq!(combined.next_chunk().await.unwrap().unwrap(), b"B");
    let waiting = tokio::time::timeout(Duration::from_millis(50), combined.next_chunk()).await;
    assert!(waiting.is_err());

    last_feed.send("C").await;
    drop(last_feed);
    assert_eq!(combined.next_chunk().await.unwrap().unwrap(), b"C");
    assert!(combined.next_chunk().await.is_none());
  }

  #[tokio::test]
  async fn slow_sources_keep_their_position() {
    let (slow_feed, slow) = source::channel();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(20)).await;
      slow_feed.send("first ").await;
    });

    let combined = concat(vec![slow, constant("second")]);
    assert_eq!(combined.collect().await.text(), "first second");
  }

  #[tokio::test]
  async fn errors_are_forwarded_without_stopping() {
    let (failing_feed, failing) = source::channel();
    failing_feed
      .send_error(SourceError::new(io::ErrorKind::NotFound, "post3 missing"))
      .await;
    drop(failing_feed);

    let collected = concat(vec![constant("A"), failing, constant("C")])
      .collect()
      .await;
    assert_eq!(collected.text(), "AC");
    assert_eq!(collected.errors.len(), 1);
    assert_eq!(collected.errors[0].message(), "post3 missing");
  }

  #[tokio::test]
  async fn data_after_an_error_is_kept_and_reported_once() {
    let (feed, partial) = source::channel();
    tokio::spawn(async move {
      feed.send("one ").await;
      feed
        .send_error(SourceError::new(io::ErrorKind::NotFound, "gone.txt missing"))
        .await;
      feed.send("two").await;
      feed
        .send_error(SourceError::new(io::ErrorKind::NotFound, "lost.txt missing"))
        .await;
    });

    let collected = concat(vec![partial, constant(" three")]).collect().await;
    assert_eq!(collected.text(), "one two three");
    assert_eq!(collected.errors.len(), 1);
    assert_eq!(collected.errors[0].message(), "gone.txt missing");
  }

  #[tokio::test]
  async fn each_failing_source_reports_once() {
    let collected = concat(vec![
      Source::from_file("/definitely/missing/one"),
      constant("ok"),
      Source::from_file("/definitely/missing/two"),
    ])
    .collect()
    .await;

    assert_eq!(collected.text(), "ok");
    assert_eq!(collected.errors.len(), 2);
  }

  #[tokio::test]
  async fn empty_concatenation_ends_immediately() {
    let mut combined = concat(Vec::new());
    assert!(combined.next_chunk().await.is_none());
  }

  #[tokio::test]
  #[should_panic(expected = "terminal source")]
  async fn rejects_sources_after_the_terminal_one() {
    let (mut stream, _combined) = ConcatStream::new();
    stream.add_source(constant("A"), true);
    stream.add_source(constant("B"), false);
  }
}
