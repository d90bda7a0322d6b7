//! Resource loading ports and the combinators that compose them.
//!
//! A [`ResourceLoader`] fetches a resource for a key and hands back a future.
//! Loaders compose through [`LoaderExt`]:
//!
//! ```ignore
//! let feed = remote
//!   .caching_to(local.clone())
//!   .fallback(local);
//! ```
//!
//! Cancellation and delivery on the main context are layered on at the edge,
//! through [`LoadTask`] and [`MainThreadDispatch`].

mod caching;
mod dispatch;
mod fallback;
mod task;

use color_eyre::Result;
use futures::future::BoxFuture;
use futures::TryFutureExt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

pub use caching::{cache_on_success, cache_on_success_with, CachingLoader};
pub use dispatch::{MainDispatcher, MainGuard, MainQueue, MainThreadDispatch};
pub use fallback::FallbackLoader;
pub use task::{Completion, LoadTask, TaskStatus};

/// A boxed future resolving to the outcome of one load.
pub type LoadFuture<T> = BoxFuture<'static, Result<T>>;

/// Port for anything that can fetch a resource asynchronously.
///
/// The returned future owns everything it needs, so it can outlive the
/// loader call and be spawned or aborted freely. Loaders never write to a
/// cache themselves; see [`LoaderExt::caching_to`].
pub trait ResourceLoader: Send + Sync + 'static {
  /// Identity of the requested resource (a URL, or `()` for singleton slots)
  type Key: Clone + Send + Sync + 'static;
  /// The loaded payload
  type Resource: Send + 'static;

  fn load(&self, key: Self::Key) -> LoadFuture<Self::Resource>;
}

/// Port for best-effort persistence of a loaded resource.
pub trait ResourceCache: Send + Sync + 'static {
  type Key: Send + 'static;
  type Resource: Send + 'static;

  /// Persist `resource` under `key`. Errors only surface through the future.
  fn save(&self, resource: Self::Resource, key: Self::Key) -> LoadFuture<()>;
}

impl<L: ResourceLoader + ?Sized> ResourceLoader for Arc<L> {
  type Key = L::Key;
  type Resource = L::Resource;

  fn load(&self, key: Self::Key) -> LoadFuture<Self::Resource> {
    (**self).load(key)
  }
}

impl<C: ResourceCache + ?Sized> ResourceCache for Arc<C> {
  type Key = C::Key;
  type Resource = C::Resource;

  fn save(&self, resource: Self::Resource, key: Self::Key) -> LoadFuture<()> {
    (**self).save(resource, key)
  }
}

/// Shared, type-erased loader.
pub type SharedLoader<K, T> = Arc<dyn ResourceLoader<Key = K, Resource = T>>;

/// Loader backed by a closure. Built with [`loader_fn`].
pub struct FnLoader<K, F> {
  f: F,
  _key: PhantomData<fn(K)>,
}

/// Lift a closure returning a future into a [`ResourceLoader`].
pub fn loader_fn<K, T, F, Fut>(f: F) -> FnLoader<K, F>
where
  K: Clone + Send + Sync + 'static,
  T: Send + 'static,
  F: Fn(K) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T>> + Send + 'static,
{
  FnLoader {
    f,
    _key: PhantomData,
  }
}

impl<K, T, F, Fut> ResourceLoader for FnLoader<K, F>
where
  K: Clone + Send + Sync + 'static,
  T: Send + 'static,
  F: Fn(K) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T>> + Send + 'static,
{
  type Key = K;
  type Resource = T;

  fn load(&self, key: K) -> LoadFuture<T> {
    Box::pin((self.f)(key))
  }
}

/// Loader that transforms the successful output of another loader.
pub struct MapLoader<L, M> {
  inner: L,
  f: Arc<M>,
}

impl<L, M, U> ResourceLoader for MapLoader<L, M>
where
  L: ResourceLoader,
  M: Fn(L::Resource) -> U + Send + Sync + 'static,
  U: Send + 'static,
{
  type Key = L::Key;
  type Resource = U;

  fn load(&self, key: Self::Key) -> LoadFuture<U> {
    let f = Arc::clone(&self.f);
    Box::pin(self.inner.load(key).map_ok(move |resource| f(resource)))
  }
}

/// Combinators available on every [`ResourceLoader`].
pub trait LoaderExt: ResourceLoader + Sized {
  /// Try `self` first and `fallback` only once `self` has failed.
  fn fallback<F>(self, fallback: F) -> FallbackLoader<Self, F>
  where
    F: ResourceLoader<Key = Self::Key, Resource = Self::Resource>,
  {
    FallbackLoader::new(self, fallback)
  }

  /// Write every successful result to `cache` without waiting on it.
  fn caching_to<C>(self, cache: C) -> CachingLoader<Self, C>
  where
    C: ResourceCache<Key = Self::Key, Resource = Self::Resource>,
    Self::Resource: Clone,
  {
    CachingLoader::new(self, cache)
  }

  fn map<M, U>(self, f: M) -> MapLoader<Self, M>
  where
    M: Fn(Self::Resource) -> U + Send + Sync + 'static,
    U: Send + 'static,
  {
    MapLoader {
      inner: self,
      f: Arc::new(f),
    }
  }

  /// Deliver completions of this loader on `dispatcher`'s context.
  fn on_main(self, dispatcher: MainDispatcher) -> MainThreadDispatch<Self> {
    MainThreadDispatch::new(self, dispatcher)
  }

  /// Erase the concrete loader type.
  fn shared(self) -> SharedLoader<Self::Key, Self::Resource> {
    Arc::new(self)
  }
}

impl<L: ResourceLoader> LoaderExt for L {}

#[cfg(test)]
pub(crate) mod testing {
  //! Controllable fakes for loader and cache ports.

  use super::*;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;
  use std::time::Duration;
  use tokio::sync::oneshot;

  /// Loader whose calls stay pending until the test completes them.
  pub struct ControlledLoader<T> {
    pending: Mutex<Vec<Option<oneshot::Sender<Result<T>>>>>,
    cancelled: Arc<AtomicUsize>,
  }

  impl<T: Send + 'static> ControlledLoader<T> {
    pub fn new() -> Arc<Self> {
      Arc::new(Self {
        pending: Mutex::new(Vec::new()),
        cancelled: Arc::new(AtomicUsize::new(0)),
      })
    }

    pub fn call_count(&self) -> usize {
      self.pending.lock().unwrap().len()
    }

    /// Number of calls whose future was dropped before it resolved.
    pub fn cancelled_count(&self) -> usize {
      self.cancelled.load(Ordering::SeqCst)
    }

    pub fn complete(&self, index: usize, result: Result<T>) {
      let sender = self.pending.lock().unwrap()[index]
        .take()
        .expect("call already completed");
      let _ = sender.send(result);
    }
  }

  struct CancelWatch {
    cancelled: Arc<AtomicUsize>,
    armed: bool,
  }

  impl Drop for CancelWatch {
    fn drop(&mut self) {
      if self.armed {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
      }
    }
  }

  impl<T: Send + 'static> ResourceLoader for ControlledLoader<T> {
    type Key = ();
    type Resource = T;

    fn load(&self, _key: ()) -> LoadFuture<T> {
      let (tx, rx) = oneshot::channel();
      self.pending.lock().unwrap().push(Some(tx));
      let watch = CancelWatch {
        cancelled: Arc::clone(&self.cancelled),
        armed: true,
      };
      Box::pin(async move {
        let mut watch = watch;
        let result = rx.await.unwrap_or_else(|_| Err(eyre!("test dropped the call")));
        watch.armed = false;
        result
      })
    }
  }

  /// Cache that records saves and answers with a fixed outcome.
  pub struct CacheSpy<T> {
    saved: Mutex<Vec<T>>,
    fail: bool,
  }

  impl<T: Clone + Send + 'static> CacheSpy<T> {
    pub fn succeeding() -> Arc<Self> {
      Arc::new(Self {
        saved: Mutex::new(Vec::new()),
        fail: false,
      })
    }

    pub fn failing() -> Arc<Self> {
      Arc::new(Self {
        saved: Mutex::new(Vec::new()),
        fail: true,
      })
    }

    pub fn saved(&self) -> Vec<T> {
      self.saved.lock().unwrap().clone()
    }
  }

  impl<T: Clone + Send + 'static> ResourceCache for CacheSpy<T> {
    type Key = ();
    type Resource = T;

    fn save(&self, resource: T, _key: ()) -> LoadFuture<()> {
      self.saved.lock().unwrap().push(resource);
      let fail = self.fail;
      Box::pin(async move {
        if fail {
          Err(eyre!("disk full"))
        } else {
          Ok(())
        }
      })
    }
  }

  /// Poll `condition` until it holds, giving spawned tasks time to run.
  pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
      if condition() {
        return true;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
  }

  pub fn failure(message: &str) -> color_eyre::Report {
    eyre!("{}", message)
  }
}
