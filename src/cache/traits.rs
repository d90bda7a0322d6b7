//! Persistence ports behind the local loaders.
//!
//! Stores are synchronous and may block; the local loaders move every call
//! off the async runtime.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use url::Url;

use crate::feed::FeedImage;

/// The single persisted feed slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFeed {
  /// The cached feed in order
  pub feed: Vec<FeedImage>,
  /// When the feed was cached
  pub timestamp: DateTime<Utc>,
}

/// Storage for the feed cache. Holds at most one [`CachedFeed`].
pub trait FeedStore: Send + Sync + 'static {
  /// Remove the cached feed, if any.
  fn delete_cached_feed(&self) -> Result<()>;

  /// Replace the cached feed.
  fn insert(&self, feed: &[FeedImage], timestamp: DateTime<Utc>) -> Result<()>;

  /// Get the cached feed, `None` if nothing is cached.
  fn retrieve(&self) -> Result<Option<CachedFeed>>;
}

/// Storage for image bytes keyed by image URL.
pub trait ImageDataStore: Send + Sync + 'static {
  fn insert_image_data(&self, data: &[u8], url: &Url) -> Result<()>;

  fn retrieve_image_data(&self, url: &Url) -> Result<Option<Vec<u8>>>;
}
