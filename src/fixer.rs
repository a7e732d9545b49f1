//! Insertion of a `manifest` attribute into the first `<html>` tag of a document.
//!
//! Input is buffered until the opening tag shows up; from then on bytes pass straight through.
//! Matching is a plain text scan, so an `<html` inside a comment or attribute value that comes
//! before the real tag is patched instead. That imprecision is accepted.

use std::sync::OnceLock;

use regex::bytes::Regex;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Manifest path used when none is configured.
pub const DEFAULT_MANIFEST: &str = "index.appcache";

const READ_BUFFER_SIZE: usize = 8 * 1024;
const TAG_OPEN: &[u8] = b"<html";

fn html_tag_pattern() -> &'static Regex {
  static PATTERN: OnceLock<Regex> = OnceLock::new();
  PATTERN.get_or_init(|| Regex::new(r"(?i)<html(\s|>)").expect("invalid html tag regex"))
}

/// Streaming transform adding ` manifest="..."` right after the first `<html`.
#[derive(Debug, Clone)]
pub struct ManifestFixer {
  attribute: Vec<u8>,
  buffer: Option<Vec<u8>>,
}

impl Default for ManifestFixer {
  fn default() -> Self {
    Self::new(DEFAULT_MANIFEST)
  }
}

impl ManifestFixer {
  /// Create a fixer pointing documents at `manifest`.
  pub fn new(manifest: &str) -> Self {
    Self {
      attribute: format!(" manifest=\"{manifest}\"").into_bytes(),
      buffer: Some(Vec::new()),
    }
  }

  /// Feed the next chunk and return the bytes that are ready to be written.
  pub fn push(&mut self, chunk: &[u8]) -> Vec<u8> {
    let Some(buffer) = self.buffer.as_mut() else {
      return chunk.to_vec();
    };

    // Earlier bytes were already scanned; a tag can only start this far back.
    let scan_from = buffer.len().saturating_sub(TAG_OPEN.len());
    buffer.extend_from_slice(chunk);
    let Some(found) = html_tag_pattern().find_at(buffer, scan_from) else {
      return Vec::new();
    };

    let insert_at = found.start() + TAG_OPEN.len();
    let mut output = self.buffer.take().unwrap_or_default();
    output.splice(insert_at..insert_at, self.attribute.iter().copied());
    output
  }

  /// End of input: release whatever is still buffered, unmodified.
  pub fn finish(self) -> Vec<u8> {
    self.buffer.unwrap_or_default()
  }

  /// Whether the attribute has been inserted.
  pub fn is_patched(&self) -> bool {
    self.buffer.is_none()
  }
}

/// Patch a whole document held in memory.
pub fn fix_html(html: &str, manifest: &str) -> String {
  let mut fixer = ManifestFixer::new(manifest);
  let mut output = fixer.push(html.as_bytes());
  output.extend(fixer.finish());
  String::from_utf8(output)
    .unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned())
}

/// Copy `reader` into `writer`, patching the first `<html>` tag on the way.
pub async fn fix_stream<R, W>(reader: &mut R, writer: &mut W, manifest: &str) -> io::Result<()>
where
  R: AsyncRead + Unpin,
  W: AsyncWrite + Unpin,
{
  let mut fixer = ManifestFixer::new(manifest);
  let mut buffer = vec![0u8; READ_BUFFER_SIZE];
  loop {
    let read = reader.read(&mut buffer).await?;
    if read == 0 {
      break;
    }
    let ready = fixer.push(&buffer[..read]);
    if !ready.is_empty() {
      writer.write_all(&ready).await?;
    }
  }
  writer.write_all(&fixer.finish()).await?;
  writer.flush().await
}
