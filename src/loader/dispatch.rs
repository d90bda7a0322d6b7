//! Delivery of load completions on a single designated context.
//!
//! A [`MainQueue`] is owned by the thread that plays the role of the UI
//! thread. Jobs dispatched from that thread (while it has entered the queue)
//! run inline; jobs from any other thread are sent through a channel and run
//! when the owner drains the queue.

use color_eyre::Result;
use std::cell::Cell;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

use super::{LoadTask, ResourceLoader};

type Job = Box<dyn FnOnce() + Send>;

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
  static CURRENT_QUEUE: Cell<Option<u64>> = const { Cell::new(None) };
}

/// The designated execution context for completions.
pub struct MainQueue {
  id: u64,
  tx: mpsc::UnboundedSender<Job>,
  rx: mpsc::UnboundedReceiver<Job>,
}

impl MainQueue {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self {
      id: NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed),
      tx,
      rx,
    }
  }

  pub fn dispatcher(&self) -> MainDispatcher {
    MainDispatcher {
      id: self.id,
      tx: self.tx.clone(),
    }
  }

  /// Mark the current thread as this queue's context until the guard drops.
  pub fn enter(&self) -> MainGuard {
    MainGuard::enter(self.id)
  }

  /// Run every job that is already queued. Returns how many ran.
  pub fn run_pending(&mut self) -> usize {
    let _guard = self.enter();
    let mut ran = 0;
    while let Ok(job) = self.rx.try_recv() {
      job();
      ran += 1;
    }
    ran
  }

  /// Wait for the next job and run it.
  pub async fn run_next(&mut self) {
    if let Some(job) = self.rx.recv().await {
      let _guard = self.enter();
      job();
    }
  }
}

impl Default for MainQueue {
  fn default() -> Self {
    Self::new()
  }
}

/// Keeps the current thread marked as a queue's context.
pub struct MainGuard {
  previous: Option<u64>,
  _not_send: PhantomData<*const ()>,
}

impl MainGuard {
  fn enter(id: u64) -> Self {
    let previous = CURRENT_QUEUE.with(|current| current.replace(Some(id)));
    Self {
      previous,
      _not_send: PhantomData,
    }
  }
}

impl Drop for MainGuard {
  fn drop(&mut self) {
    CURRENT_QUEUE.with(|current| current.set(self.previous));
  }
}

/// Sending side of a [`MainQueue`].
#[derive(Clone)]
pub struct MainDispatcher {
  id: u64,
  tx: mpsc::UnboundedSender<Job>,
}

impl MainDispatcher {
  /// Whether the calling thread is currently inside this queue's context.
  pub fn is_current(&self) -> bool {
    CURRENT_QUEUE.with(|current| current.get() == Some(self.id))
  }

  /// Run `job` on the queue's context: inline if already there, queued
  /// otherwise.
  pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
    if self.is_current() {
      job();
    } else if self.tx.send(Box::new(job)).is_err() {
      debug!("main queue is gone, dropping dispatched job");
    }
  }

  /// Start `future` and deliver its completion on this queue's context.
  pub fn spawn_load<T, F, C>(&self, future: F, on_complete: C) -> LoadTask
  where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
    C: FnOnce(Result<T>) + Send + 'static,
  {
    let dispatcher = self.clone();
    LoadTask::spawn_with(future, on_complete, move |completion, result| {
      dispatcher.dispatch(move || completion.complete(result))
    })
  }
}

/// Decorator that delivers the completions of a loader on the main context.
///
/// Results are untouched; only the thread they arrive on changes.
pub struct MainThreadDispatch<L> {
  inner: L,
  dispatcher: MainDispatcher,
}

impl<L: ResourceLoader> MainThreadDispatch<L> {
  pub fn new(inner: L, dispatcher: MainDispatcher) -> Self {
    Self { inner, dispatcher }
  }

  pub fn load<C>(&self, key: L::Key, on_complete: C) -> LoadTask
  where
    C: FnOnce(Result<L::Resource>) + Send + 'static,
  {
    self.dispatcher.spawn_load(self.inner.load(key), on_complete)
  }

  pub fn dispatcher(&self) -> &MainDispatcher {
    &self.dispatcher
  }
}
