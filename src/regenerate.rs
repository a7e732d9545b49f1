//! Repeated generation: coalesced regeneration requests and watch mode.
//!
//! Every generation runs through one [`Queue`], so two passes never write the output at the same
//! time. A request made while another one is still waiting to start is dropped; the waiting pass
//! will see the latest state of the files anyway.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use glob::Pattern;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::common_part::{common_part_in, resolve_lexically};
use crate::generate::{GenerateError, GenerateOptions, generate_in};
use crate::queue::Queue;
use crate::resolve::{MATCH_OPTIONS, absolute_pattern};

/// Outcome of one generation pass.
pub type GenerationResult = Result<(), GenerateError>;

/// Everything needed to produce the manifest again.
#[derive(Debug, Clone)]
pub struct GenerationJob {
  cwd: PathBuf,
  patterns: Vec<String>,
  options: GenerateOptions,
  output: Option<PathBuf>,
}

impl GenerationJob {
  /// Job writing to standard output.
  pub fn new<S: AsRef<str>>(
    cwd: impl Into<PathBuf>,
    patterns: &[S],
    options: GenerateOptions,
  ) -> Self {
    Self {
      cwd: cwd.into(),
      patterns: patterns
        .iter()
        .map(|pattern| pattern.as_ref().to_string())
        .collect(),
      options,
      output: None,
    }
  }

  /// Write into `path` instead of standard output. Relative paths resolve against the job's
  /// working directory.
  pub fn with_output(mut self, path: impl AsRef<Path>) -> Self {
    self.output = Some(resolve_lexically(&self.cwd, path));
    self
  }

  /// Output file, `None` for standard output.
  pub fn output(&self) -> Option<&Path> {
    self.output.as_deref()
  }

  /// Run one generation pass and log its outcome.
  pub async fn run(&self) -> GenerationResult {
    let target = match &self.output {
      Some(path) => path.display().to_string(),
      None => "stdout".to_string(),
    };
    debug!("Generate: {target}");

    let result = self.write().await;
    match &result {
      Ok(()) => debug!("  Done."),
      Err(err) => error!("  ERROR: {err}"),
    }
    result
  }

  async fn write(&self) -> GenerationResult {
    let stream = generate_in(&self.cwd, &self.patterns, &self.options)?;
    match &self.output {
      Some(path) => stream.write_to_path(path).await,
      None => stream.write_to(&mut tokio::io::stdout()).await,
    }
  }
}

/// Schedules generation passes, coalescing requests that pile up.
#[derive(Clone)]
pub struct Regenerator {
  queue: Queue,
  job: Arc<GenerationJob>,
  delay: Option<Duration>,
}

impl Regenerator {
  /// Create a regenerator; `delay` is waited before every triggered pass.
  pub fn new(job: GenerationJob, delay: Option<Duration>) -> Self {
    Self {
      queue: Queue::new(),
      job: Arc::new(job),
      delay: delay.filter(|delay| !delay.is_zero()),
    }
  }

  /// Job run by every pass.
  pub fn job(&self) -> &GenerationJob {
    &self.job
  }

  /// Request a delayed pass.
  ///
  /// Returns `None` when a pass is already waiting to start; that pending pass covers this
  /// request. Otherwise the receiver resolves with the outcome of the new pass.
  pub fn trigger(&self) -> Option<oneshot::Receiver<GenerationResult>> {
    self.schedule(self.delay)
  }

  /// Run a pass without delay and wait for it.
  ///
  /// If a pass is already pending, waits for the queue to drain instead; that pass logs its own
  /// outcome and `Ok(())` is returned.
  pub async fn generate_now(&self) -> GenerationResult {
    match self.schedule(None) {
      Some(result) => result.await.unwrap_or(Err(GenerateError::Interrupted)),
      None => {
        self.queue.idle().await;
        Ok(())
      }
    }
  }

  /// Resolve once every scheduled pass has finished.
  pub async fn idle(&self) {
    self.queue.idle().await;
  }

  fn schedule(&self, delay: Option<Duration>) -> Option<oneshot::Receiver<GenerationResult>> {
    if self.queue.pending() > 0 {
      debug!("regeneration already pending");
      return None;
    }

    if let Some(delay) = delay {
      self.queue.push_task(move || tokio::time::sleep(delay));
    }

    let (tx, rx) = oneshot::channel();
    let job = Arc::clone(&self.job);
    self.queue.push_task(move || async move {
      let _ = tx.send(job.run().await);
    });
    Some(rx)
  }
}

/// Watch mode: an initial pass, then a delayed pass after every relevant change.
pub struct WatchSession {
  regenerator: Regenerator,
  watcher: Option<RecommendedWatcher>,
  events: Option<JoinHandle<()>>,
}

impl WatchSession {
  /// Generate once, then start watching the common base of the job's patterns.
  ///
  /// A failing initial pass is returned and no watcher is started.
  pub async fn start(job: GenerationJob, delay: Duration) -> Result<Self, GenerateError> {
    let base = common_part_in(&job.cwd, &job.patterns).ok_or_else(|| {
      GenerateError::NoCommonBase {
        patterns: job.patterns.clone(),
      }
    })?;
    let matchers = matchers(&job.cwd, &job.patterns);
    let ignored = job.output.clone();
    let regenerator = Regenerator::new(job, Some(delay));

    regenerator.generate_now().await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
      let _ = tx.send(event);
    })
    .map_err(GenerateError::Watch)?;
    watcher
      .watch(Path::new(&base), RecursiveMode::Recursive)
      .map_err(GenerateError::Watch)?;
    debug!("Be watching {}", regenerator.job().patterns.join(", "));

    let events = {
      let regenerator = regenerator.clone();
      tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
          match event {
            Ok(event) if is_relevant(&event, &matchers, ignored.as_deref()) => {
              debug!(paths = ?event.paths, "change detected");
              let _ = regenerator.trigger();
            }
            Ok(_) => {}
            Err(err) => warn!("watch error: {err}"),
          }
        }
      })
    };

    Ok(Self {
      regenerator,
      watcher: Some(watcher),
      events: Some(events),
    })
  }

  /// Handle to the underlying regenerator.
  pub fn regenerator(&self) -> &Regenerator {
    &self.regenerator
  }

  /// Stop watching and wait for every scheduled pass to finish.
  pub async fn close(mut self) {
    drop(self.watcher.take());
    if let Some(events) = self.events.take() {
      events.abort();
      let _ = events.await;
    }
    self.regenerator.idle().await;
  }
}

fn matchers(cwd: &Path, patterns: &[String]) -> Vec<Pattern> {
  patterns
    .iter()
    .filter_map(|pattern| match Pattern::new(&absolute_pattern(cwd, pattern)) {
      Ok(matcher) => Some(matcher),
      Err(err) => {
        warn!("not watching {pattern:?}: {err}");
        None
      }
    })
    .collect()
}

/// Whether `event` touches a file matched by `matchers`, other than `ignored`.
fn is_relevant(event: &Event, matchers: &[Pattern], ignored: Option<&Path>) -> bool {
  let interesting = match event.kind {
    EventKind::Create(_) | EventKind::Remove(_) => true,
    EventKind::Modify(ModifyKind::Metadata(_)) => false,
    EventKind::Modify(_) => true,
    _ => false,
  };

  interesting
    && event.paths.iter().any(|path| {
      ignored != Some(path.as_path())
        && matchers
          .iter()
          .any(|matcher| matcher.matches_path_with(path, MATCH_OPTIONS))
    })
}
