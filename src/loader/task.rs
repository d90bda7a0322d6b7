//! Cancellable handles for in-flight loads.

use color_eyre::Result;
use futures::future::{AbortHandle, Abortable};
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::trace;

const ACTIVE: u8 = 0;
const COMPLETED: u8 = 1;
const CANCELLED: u8 = 2;

/// Lifecycle of a [`LoadTask`]. Moves out of `Active` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
  Active,
  Completed,
  Cancelled,
}

struct TaskState {
  status: AtomicU8,
  abort: AbortHandle,
}

impl TaskState {
  fn transition(&self, to: u8) -> bool {
    self
      .status
      .compare_exchange(ACTIVE, to, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }
}

/// Handle to one in-flight load.
///
/// Owned by whoever started the load. [`cancel`](LoadTask::cancel) stops the
/// underlying future wherever it currently is and suppresses the completion,
/// including one that was already produced but not yet delivered. Dropping
/// the handle does not cancel.
pub struct LoadTask {
  state: Arc<TaskState>,
}

impl LoadTask {
  /// Run `future` and hand its result to `on_complete` on whichever thread
  /// finishes it.
  pub fn spawn<T, F, C>(future: F, on_complete: C) -> Self
  where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
    C: FnOnce(Result<T>) + Send + 'static,
  {
    Self::spawn_with(future, on_complete, |completion, result| {
      completion.complete(result)
    })
  }

  /// Run `future` and pass its result to `deliver` together with the guarded
  /// completion, so delivery can be moved elsewhere (see `MainDispatcher`).
  ///
  /// A future that is ready on its first poll is resolved on the calling
  /// thread before this returns; anything else continues on the runtime.
  pub fn spawn_with<T, F, C, D>(future: F, on_complete: C, deliver: D) -> Self
  where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
    C: FnOnce(Result<T>) + Send + 'static,
    D: FnOnce(Completion<T>, Result<T>) + Send + 'static,
  {
    let (abort, registration) = AbortHandle::new_pair();
    let state = Arc::new(TaskState {
      status: AtomicU8::new(ACTIVE),
      abort,
    });
    let completion = Completion {
      state: Arc::clone(&state),
      callback: Box::new(on_complete),
    };

    let mut future = Box::pin(Abortable::new(future, registration));
    match (&mut future).now_or_never() {
      Some(Ok(result)) => deliver(completion, result),
      Some(Err(_aborted)) => {}
      None => {
        tokio::spawn(async move {
          if let Ok(result) = future.await {
            deliver(completion, result);
          }
        });
      }
    }

    Self { state }
  }

  /// Stop the load. Calling this more than once, or after completion, has no
  /// further effect.
  pub fn cancel(&self) {
    if self.state.transition(CANCELLED) {
      self.state.abort.abort();
      trace!("load task cancelled");
    }
  }

  pub fn status(&self) -> TaskStatus {
    match self.state.status.load(Ordering::Acquire) {
      ACTIVE => TaskStatus::Active,
      COMPLETED => TaskStatus::Completed,
      _ => TaskStatus::Cancelled,
    }
  }

  pub fn is_cancelled(&self) -> bool {
    self.status() == TaskStatus::Cancelled
  }
}

impl fmt::Debug for LoadTask {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoadTask")
      .field("status", &self.status())
      .finish()
  }
}

/// Consume-once completion callback of a [`LoadTask`].
///
/// The callback runs only if the task is still active at the moment of
/// delivery.
pub struct Completion<T> {
  state: Arc<TaskState>,
  callback: Box<dyn FnOnce(Result<T>) + Send>,
}

impl<T> Completion<T> {
  pub fn complete(self, result: Result<T>) {
    if self.state.transition(COMPLETED) {
      (self.callback)(result);
    } else {
      trace!("dropping completion of cancelled load");
    }
  }
}
