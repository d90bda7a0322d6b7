//! Loaders that read and write the local cache.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::policy::CachePolicy;
use super::traits::{FeedStore, ImageDataStore};
use crate::feed::FeedImage;
use crate::loader::{LoadFuture, ResourceCache, ResourceLoader};

/// Source of "now" for cache timestamps and validation.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Run a blocking store call off the async runtime.
async fn with_store<S, T, F>(store: &Arc<S>, f: F) -> Result<T>
where
  S: Send + Sync + 'static + ?Sized,
  T: Send + 'static,
  F: FnOnce(&S) -> Result<T> + Send + 'static,
{
  let store = Arc::clone(store);
  tokio::task::spawn_blocking(move || f(&store))
    .await
    .map_err(|e| eyre!("Cache task failed: {}", e))?
}

/// Reads, validates and saves the single cached feed.
///
/// Reads are lenient: a missing or expired cache loads as an empty feed.
/// Expired data is only removed by [`validate_cache`](Self::validate_cache).
pub struct LocalFeedLoader<S> {
  store: Arc<S>,
  policy: CachePolicy,
  clock: Clock,
}

impl<S: FeedStore> LocalFeedLoader<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self {
      store,
      policy: CachePolicy::default(),
      clock: Arc::new(Utc::now),
    }
  }

  pub fn with_policy(mut self, policy: CachePolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
    self.clock = Arc::new(clock);
    self
  }

  /// Cached feed if present and still valid, empty otherwise.
  /// Store errors are returned.
  pub async fn load_feed(&self) -> Result<Vec<FeedImage>> {
    let now = (self.clock)();
    let policy = self.policy;

    let cached = with_store(&self.store, |store| store.retrieve()).await?;

    match cached {
      Some(cache) if policy.validate(cache.timestamp, now) => Ok(cache.feed),
      Some(cache) => {
        debug!(cached_at = %cache.timestamp, "feed cache expired, loading empty feed");
        Ok(Vec::new())
      }
      None => Ok(Vec::new()),
    }
  }

  /// Delete the cache if it is expired or cannot be read.
  pub async fn validate_cache(&self) -> Result<()> {
    let now = (self.clock)();
    let policy = self.policy;

    with_store(&self.store, move |store| match store.retrieve() {
      Err(error) => {
        warn!(error = %error, "failed to read feed cache, deleting it");
        store.delete_cached_feed()
      }
      Ok(Some(cache)) if !policy.validate(cache.timestamp, now) => {
        info!(cached_at = %cache.timestamp, "deleting expired feed cache");
        store.delete_cached_feed()
      }
      Ok(_) => Ok(()),
    })
    .await
  }

  /// Replace the cached feed, stamped with the current time.
  ///
  /// If the old cache is deleted but the insert fails, the error is returned
  /// and the cache stays empty.
  pub async fn save_feed(&self, feed: Vec<FeedImage>) -> Result<()> {
    let timestamp = (self.clock)();

    with_store(&self.store, move |store| {
      store.delete_cached_feed()?;
      store.insert(&feed, timestamp)
    })
    .await
  }
}

impl<S> Clone for LocalFeedLoader<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      policy: self.policy,
      clock: Arc::clone(&self.clock),
    }
  }
}

impl<S: FeedStore> ResourceLoader for LocalFeedLoader<S> {
  type Key = ();
  type Resource = Vec<FeedImage>;

  fn load(&self, _key: ()) -> LoadFuture<Vec<FeedImage>> {
    let this = self.clone();
    Box::pin(async move { this.load_feed().await })
  }
}

impl<S: FeedStore> ResourceCache for LocalFeedLoader<S> {
  type Key = ();
  type Resource = Vec<FeedImage>;

  fn save(&self, feed: Vec<FeedImage>, _key: ()) -> LoadFuture<()> {
    let this = self.clone();
    Box::pin(async move { this.save_feed(feed).await })
  }
}

/// Failures of the local image cache.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocalImageError {
  /// Nothing cached for this URL
  #[error("no cached image data for {0}")]
  NotFound(Url),
  #[error("failed to read cached image data: {0}")]
  Failed(String),
}

/// Reads and writes cached image bytes by URL.
///
/// Unlike the feed, a miss is an error, so a local-first pipeline can fall
/// back to the network.
pub struct LocalImageDataLoader<S> {
  store: Arc<S>,
}

impl<S: ImageDataStore> LocalImageDataLoader<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self { store }
  }

  pub async fn load_image_data(&self, url: Url) -> Result<Vec<u8>> {
    let key = url.clone();
    let data = with_store(&self.store, move |store| store.retrieve_image_data(&key))
      .await
      .map_err(|e| LocalImageError::Failed(e.to_string()))?;

    data.ok_or_else(|| LocalImageError::NotFound(url).into())
  }

  pub async fn save_image_data(&self, data: Vec<u8>, url: Url) -> Result<()> {
    with_store(&self.store, move |store| store.insert_image_data(&data, &url)).await
  }
}

impl<S> Clone for LocalImageDataLoader<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
    }
  }
}

impl<S: ImageDataStore> ResourceLoader for LocalImageDataLoader<S> {
  type Key = Url;
  type Resource = Vec<u8>;

  fn load(&self, url: Url) -> LoadFuture<Vec<u8>> {
    let this = self.clone();
    Box::pin(async move { this.load_image_data(url).await })
  }
}

impl<S: ImageDataStore> ResourceCache for LocalImageDataLoader<S> {
  type Key = Url;
  type Resource = Vec<u8>;

  fn save(&self, data: Vec<u8>, url: Url) -> LoadFuture<()> {
    let this = self.clone();
    Box::pin(async move { this.save_image_data(data, url).await })
  }
}
