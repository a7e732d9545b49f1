//! Minimal ordered task runner.
//!
//! Actions run one at a time, in push order. Each action receives a [`Next`] continuation and
//! must call it once its work is done; further calls are ignored. An action that never calls it
//! stalls the queue for good, there is no timeout or recovery.
//!
//! Starting the first action and advancing to the following one both happen on a freshly
//! spawned Tokio task, never inside the `push` or [`Next::call`] that made the action runnable.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

type Action = Box<dyn FnOnce(Next) + Send + 'static>;

#[derive(Default)]
struct QueueState {
  items: VecDeque<Action>,
  // A dequeue is scheduled or an action is running.
  active: bool,
  in_flight: bool,
}

impl QueueState {
  fn size(&self) -> usize {
    self.items.len() + usize::from(self.in_flight)
  }
}

struct Shared {
  state: Mutex<QueueState>,
  size: watch::Sender<usize>,
}

impl Shared {
  fn lock(&self) -> MutexGuard<'_, QueueState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn publish(&self, state: &QueueState) {
    self.size.send_replace(state.size());
  }
}

/// Sequential task queue. Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct Queue {
  shared: Arc<Shared>,
}

impl Default for Queue {
  fn default() -> Self {
    Self::new()
  }
}

impl Queue {
  /// Create an empty queue.
  pub fn new() -> Self {
    let (size, _) = watch::channel(0);
    Self {
      shared: Arc::new(Shared {
        state: Mutex::new(QueueState::default()),
        size,
      }),
    }
  }

  /// Number of actions that have not completed yet, including the one in flight.
  pub fn size(&self) -> usize {
    self.shared.lock().size()
  }

  /// Number of actions that have not started yet.
  pub fn pending(&self) -> usize {
    self.shared.lock().items.len()
  }

  /// Enqueue an action. It runs after every previously pushed action has called its [`Next`].
  ///
  /// # Panics
  ///
  /// Must be called from within a Tokio runtime.
  pub fn push<F>(&self, action: F)
  where
    F: FnOnce(Next) + Send + 'static,
  {
    let start = {
      let mut state = self.shared.lock();
      state.items.push_back(Box::new(action));
      let start = !state.active;
      state.active = true;
      self.shared.publish(&state);
      start
    };

    if start {
      schedule(Arc::clone(&self.shared));
    }
  }

  /// Enqueue an async task; the queue advances when the returned future resolves.
  pub fn push_task<F, Fut>(&self, task: F)
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    self.push(move |next| {
      tokio::spawn(async move {
        task().await;
        next.call();
      });
    });
  }

  /// Resolve once every pushed action has completed. Resolves immediately on an empty queue.
  pub async fn idle(&self) {
    let mut size = self.shared.size.subscribe();
    let _ = size.wait_for(|size| *size == 0).await;
  }
}

/// Completion continuation handed to every queued action.
#[derive(Clone)]
pub struct Next {
  shared: Arc<Shared>,
  done: Arc<AtomicBool>,
}

impl Next {
  /// Mark the action as finished. Only the first call has any effect.
  pub fn call(&self) {
    if self.done.swap(true, Ordering::AcqRel) {
      return;
    }

    let more = {
      let mut state = self.shared.lock();
      state.in_flight = false;
      let more = !state.items.is_empty();
      if !more {
        state.active = false;
      }
      self.shared.publish(&state);
      more
    };

    if more {
      schedule(Arc::clone(&self.shared));
    }
  }
}

fn schedule(shared: Arc<Shared>) {
  tokio::spawn(async move { dequeue(shared) });
}

fn dequeue(shared: Arc<Shared>) {
  let action = {
    let mut state = shared.lock();
    let Some(action) = state.items.pop_front() else {
      state.active = false;
      shared.publish(&state);
      return;
    };
    state.in_flight = true;
    shared.publish(&state);
    action
  };

  action(Next {
    shared,
    done: Arc::new(AtomicBool::new(false)),
  });
}
