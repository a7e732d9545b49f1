//! Producer/consumer primitives shared by every stage of manifest generation.
//!
//! A [`Source`] is the reading half of a bounded channel of byte chunks and a [`Feed`] is the
//! writing half. The source ends once every feed attached to it has been dropped, so a stage
//! signals completion simply by letting its feed go out of scope. Errors travel in-band with the
//! data, which keeps them ordered relative to the bytes around them.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Number of chunks a feed may run ahead of its consumer before `send` waits.
pub(crate) const CHUNK_CAPACITY: usize = 16;
pub(crate) const READ_BUFFER_SIZE: usize = 64 * 1024;

/// One item travelling through a [`Source`].
pub type Chunk = Result<Vec<u8>, SourceError>;

/// Error raised by a single source while it is producing data.
///
/// The error is cheap to clone so that it can be forwarded between stages and still be reported
/// by the consumer at the end of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
  path: Option<PathBuf>,
  kind: io::ErrorKind,
  message: String,
}

impl SourceError {
  /// Create an error that is not tied to a particular file.
  pub fn new(kind: io::ErrorKind, message: impl Into<String>) -> Self {
    Self {
      path: None,
      kind,
      message: message.into(),
    }
  }

  /// Capture an I/O failure observed while reading `path`.
  pub fn from_io(path: &Path, err: &io::Error) -> Self {
    Self {
      path: Some(path.to_path_buf()),
      kind: err.kind(),
      message: err.to_string(),
    }
  }

  /// Attach the file the error refers to.
  pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.path = Some(path.into());
    self
  }

  /// File the error refers to, when known.
  pub fn path(&self) -> Option<&Path> {
    self.path.as_deref()
  }

  /// Underlying I/O error category.
  pub fn kind(&self) -> io::ErrorKind {
    self.kind
  }

  /// Human readable description without the path.
  pub fn message(&self) -> &str {
    &self.message
  }
}

impl fmt::Display for SourceError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.path {
      Some(path) => write!(f, "{}: {}", path.display(), self.message),
      None => f.write_str(&self.message),
    }
  }
}

impl std::error::Error for SourceError {}

/// Writing half of a source channel.
#[derive(Debug, Clone)]
pub struct Feed {
  tx: mpsc::Sender<Chunk>,
}

/// Reading half of a source channel.
#[derive(Debug)]
pub struct Source {
  rx: mpsc::Receiver<Chunk>,
}

/// Create a connected feed/source pair.
pub fn channel() -> (Feed, Source) {
  let (tx, rx) = mpsc::channel(CHUNK_CAPACITY);
  (Feed { tx }, Source { rx })
}

impl Feed {
  /// Send a data chunk, waiting while the consumer is behind.
  ///
  /// Returns `false` once the consumer has gone away.
  pub async fn send(&self, data: impl Into<Vec<u8>>) -> bool {
    self.tx.send(Ok(data.into())).await.is_ok()
  }

  /// Send an error event. Returns `false` once the consumer has gone away.
  pub async fn send_error(&self, err: SourceError) -> bool {
    self.tx.send(Err(err)).await.is_ok()
  }

  /// Send a chunk without waiting. Fails when the channel is full or closed.
  pub fn try_send(&self, data: impl Into<Vec<u8>>) -> bool {
    self.tx.try_send(Ok(data.into())).is_ok()
  }
}

impl Source {
  /// Receive the next chunk, or `None` once the source has ended.
  pub async fn next_chunk(&mut self) -> Option<Chunk> {
    self.rx.recv().await
  }

  /// Stream the raw bytes of a file.
  ///
  /// Opening or reading failures surface as a single error event, after which the source ends.
  ///
  /// # Panics
  ///
  /// Must be called from within a Tokio runtime.
  pub fn from_file(path: impl Into<PathBuf>) -> Self {
    let path = path.into();
    let (feed, source) = channel();
    tokio::spawn(async move {
      match File::open(&path).await {
        Ok(file) => pump(file, &feed, &path).await,
        Err(err) => {
          feed.send_error(SourceError::from_io(&path, &err)).await;
        }
      }
    });
    source
  }

  /// Drain the source, keeping every byte and every error in arrival order.
  pub async fn collect(mut self) -> Collected {
    let mut collected = Collected::default();
    while let Some(chunk) = self.next_chunk().await {
      match chunk {
        Ok(data) => collected.data.extend_from_slice(&data),
        Err(err) => collected.errors.push(err),
      }
    }
    collected
  }

  /// Write every data chunk into `writer` and return the errors seen along the way.
  ///
  /// Only failures of the writer itself abort the copy.
  pub async fn pipe<W>(mut self, writer: &mut W) -> io::Result<Vec<SourceError>>
  where
    W: AsyncWrite + Unpin,
  {
    let mut errors = Vec::new();
    while let Some(chunk) = self.next_chunk().await {
      match chunk {
        Ok(data) => writer.write_all(&data).await?,
        Err(err) => errors.push(err),
      }
    }
    writer.flush().await?;
    Ok(errors)
  }
}

async fn pump<R>(mut reader: R, feed: &Feed, path: &Path)
where
  R: AsyncRead + Unpin,
{
  let mut buffer = vec![0u8; READ_BUFFER_SIZE];
  loop {
    match reader.read(&mut buffer).await {
      Ok(0) => return,
      Ok(read) => {
        if !feed.send(&buffer[..read]).await {
          return;
        }
      }
      Err(err) => {
        feed.send_error(SourceError::from_io(path, &err)).await;
        return;
      }
    }
  }
}

/// Everything a source produced, gathered by [`Source::collect`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Collected {
  /// Concatenated data chunks.
  pub data: Vec<u8>,
  /// Error events in the order they arrived.
  pub errors: Vec<SourceError>,
}

impl Collected {
  /// Data decoded as UTF-8, replacing invalid sequences.
  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.data).into_owned()
  }
}
