//! Write-behind caching of successful loads.

use std::sync::Arc;
use tracing::warn;

use super::{LoadFuture, ResourceCache, ResourceLoader};

/// Loader that saves every successful result of `inner` to a cache.
///
/// The save is spawned and never awaited: it cannot delay or fail the load,
/// is never retried, and keeps running if the load is cancelled afterwards.
/// Failed loads are passed through without touching the cache.
pub struct CachingLoader<L, C> {
  inner: L,
  cache: Arc<C>,
}

impl<L, C> CachingLoader<L, C> {
  pub fn new(inner: L, cache: C) -> Self {
    Self {
      inner,
      cache: Arc::new(cache),
    }
  }
}

impl<L, C> ResourceLoader for CachingLoader<L, C>
where
  L: ResourceLoader,
  L::Resource: Clone,
  C: ResourceCache<Key = L::Key, Resource = L::Resource>,
{
  type Key = L::Key;
  type Resource = L::Resource;

  fn load(&self, key: Self::Key) -> LoadFuture<Self::Resource> {
    cache_on_success(
      self.inner.load(key.clone()),
      Arc::clone(&self.cache),
      key,
    )
  }
}

/// Attach a fire-and-forget cache write to the success path of `load`.
pub fn cache_on_success<T, C>(load: LoadFuture<T>, cache: Arc<C>, key: C::Key) -> LoadFuture<T>
where
  T: Clone + Send + 'static,
  C: ResourceCache<Resource = T>,
{
  cache_on_success_with(load, cache, key, T::clone)
}

/// Like [`cache_on_success`], caching the part of the result selected by
/// `project` (for instance the items of a page).
pub fn cache_on_success_with<T, C, P>(
  load: LoadFuture<T>,
  cache: Arc<C>,
  key: C::Key,
  project: P,
) -> LoadFuture<T>
where
  T: Send + 'static,
  C: ResourceCache,
  P: FnOnce(&T) -> C::Resource + Send + 'static,
{
  Box::pin(async move {
    let resource = load.await?;

    let save = cache.save(project(&resource), key);
    tokio::spawn(async move {
      if let Err(error) = save.await {
        warn!(error = %error, "cache write failed, keeping loaded resource");
      }
    });

    Ok(resource)
  })
}
