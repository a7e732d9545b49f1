//! Manifest body generation.
//!
//! A generation pass collects every resolved file as a [`FileEntry`], sorts the entries by URL
//! path once the file list ends, and then hashes the files one after another through a
//! [`Queue`]. Sorting before hashing makes the fingerprint independent of the order in which the
//! filesystem happened to enumerate the files.
//!
//! Read failures are forwarded as error events and the pass carries on; the manifest is still
//! finalized with whatever could be hashed.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{SecondsFormat, Utc};
use md5::{Digest, Md5};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::queue::Queue;
use crate::resolve::FileList;
use crate::source::{self, Feed, READ_BUFFER_SIZE, Source, SourceError};

/// First line of every manifest.
pub const HEADER: &str = "CACHE MANIFEST\n";

/// One matched file and the URL path it is listed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
  /// Location of the file on disk.
  pub absolute_path: PathBuf,
  /// Prefix-joined path relative to the common base, always using `/`.
  pub url_path: String,
}

/// Progress notification raised while a manifest is generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
  /// A path line was written.
  PathAdded {
    /// URL path of the file.
    path: String,
  },
  /// The fingerprint line was written.
  FingerprintAdded {
    /// Hex MD5 digest over every file, also reported in stamp mode.
    digest: String,
  },
}

/// Options controlling the manifest body.
#[derive(Debug, Clone)]
pub struct ContentOptions {
  /// Prefix joined in front of every relative path. Must start with `/`.
  pub prefix: String,
  /// Write a creation timestamp instead of the digest.
  pub stamp: bool,
}

impl Default for ContentOptions {
  fn default() -> Self {
    Self {
      prefix: "/".into(),
      stamp: false,
    }
  }
}

/// Manifest body together with its progress notifications.
#[derive(Debug)]
pub struct ContentStream {
  /// Manifest text.
  pub source: Source,
  /// Notifications, in the order the corresponding lines were written.
  pub notices: mpsc::UnboundedReceiver<Notice>,
}

/// URL path of `file` relative to `base`, joined onto `prefix`.
pub fn url_path(prefix: &str, base: &Path, file: &Path) -> String {
  let relative = file.strip_prefix(base).unwrap_or(file);
  let relative = relative.to_string_lossy().replace('\\', "/");
  format!(
    "{}/{}",
    prefix.trim_end_matches('/'),
    relative.trim_start_matches('/')
  )
}

/// Start a generation pass over `files`, computing URL paths relative to `base`.
///
/// The header line is available on the returned source immediately.
///
/// # Panics
///
/// Must be called from within a Tokio runtime.
pub fn generate_content(
  files: FileList,
  base: impl Into<PathBuf>,
  options: &ContentOptions,
) -> ContentStream {
  let (feed, source) = source::channel();
  let (notices_tx, notices) = mpsc::unbounded_channel();
  feed.try_send(HEADER);

  let generator = ManifestGenerator {
    base: base.into(),
    prefix: options.prefix.clone(),
    stamp: options.stamp,
    entries: Vec::new(),
    feed,
    notices: notices_tx,
  };
  tokio::spawn(generator.run(files));

  ContentStream { source, notices }
}

struct ManifestGenerator {
  base: PathBuf,
  prefix: String,
  stamp: bool,
  entries: Vec<FileEntry>,
  feed: Feed,
  notices: mpsc::UnboundedSender<Notice>,
}

impl ManifestGenerator {
  async fn run(mut self, mut files: FileList) {
    while let Some(file) = files.next().await {
      match file {
        Ok(path) => self.collect(path),
        Err(err) => {
          self.feed.send_error(err).await;
        }
      }
    }
    self.finalize();
  }

  fn collect(&mut self, path: PathBuf) {
    let url_path = url_path(&self.prefix, &self.base, &path);
    self.entries.push(FileEntry {
      absolute_path: path,
      url_path,
    });
  }

  fn finalize(self) {
    let Self {
      mut entries,
      stamp,
      feed,
      notices,
      ..
    } = self;
    entries.sort_by(|a, b| a.url_path.cmp(&b.url_path));

    let queue = Queue::new();
    let hasher = Arc::new(Mutex::new(Md5::new()));

    for entry in entries {
      let feed = feed.clone();
      let notices = notices.clone();
      let hasher = Arc::clone(&hasher);
      queue.push_task(move || async move {
        feed.send(format!("{}\n", entry.url_path)).await;
        let _ = notices.send(Notice::PathAdded {
          path: entry.url_path,
        });
        if let Err(err) = hash_file(&entry.absolute_path, &hasher).await {
          feed.send_error(err).await;
        }
      });
    }

    queue.push_task(move || async move {
      let digest = format!("{:x}", lock(&hasher).finalize_reset());
      let line = if stamp {
        format!("# Created at {}\n", timestamp())
      } else {
        format!("#{digest}\n")
      };
      feed.send(line).await;
      let _ = notices.send(Notice::FingerprintAdded { digest });
    });
  }
}

async fn hash_file(path: &Path, hasher: &Mutex<Md5>) -> Result<(), SourceError> {
  let mut file = File::open(path)
    .await
    .map_err(|err| SourceError::from_io(path, &err))?;
  let mut buffer = vec![0u8; READ_BUFFER_SIZE];
  loop {
    let read = file
      .read(&mut buffer)
      .await
      .map_err(|err| SourceError::from_io(path, &err))?;
    if read == 0 {
      return Ok(());
    }
    lock(hasher).update(&buffer[..read]);
  }
}

fn lock(hasher: &Mutex<Md5>) -> MutexGuard<'_, Md5> {
  hasher.lock().unwrap_or_else(PoisonError::into_inner)
}

fn timestamp() -> String {
  Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
