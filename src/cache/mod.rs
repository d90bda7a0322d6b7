//! Local cache for feed and image data.
//!
//! This module provides:
//! - Storage ports ([`FeedStore`], [`ImageDataStore`]) with SQLite and
//!   in-memory implementations
//! - An age-based [`CachePolicy`]
//! - Local loaders that read, validate and save through those ports

mod local;
mod policy;
mod storage;
mod traits;

pub use local::{Clock, LocalFeedLoader, LocalImageDataLoader, LocalImageError};
pub use policy::CachePolicy;
pub use storage::{InMemoryStore, SqliteStore};
pub use traits::{CachedFeed, FeedStore, ImageDataStore};
