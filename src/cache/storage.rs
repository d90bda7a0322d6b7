//! SQLite and in-memory store implementations.

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use url::Url;
use uuid::Uuid;

use super::traits::{CachedFeed, FeedStore, ImageDataStore};
use crate::feed::FeedImage;

/// SQLite-based store for the feed and image caches.
///
/// The connection sits behind a mutex, so every read and write is serialized
/// through a single writer.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway store that lives in memory.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("feedloader").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- The single feed cache slot
CREATE TABLE IF NOT EXISTS feed_cache (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    timestamp TEXT NOT NULL
);

-- Feed entries of the cached feed (preserves order)
CREATE TABLE IF NOT EXISTS feed_images (
    position INTEGER PRIMARY KEY,
    id TEXT NOT NULL,
    description TEXT,
    location TEXT,
    url TEXT NOT NULL
);

-- Image bytes keyed by a hash of the image URL
CREATE TABLE IF NOT EXISTS image_data (
    url_hash TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL
);
"#;

impl FeedStore for SqliteStore {
  fn delete_cached_feed(&self) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM feed_images", [])
      .map_err(|e| eyre!("Failed to delete cached feed images: {}", e))?;
    tx.execute("DELETE FROM feed_cache", [])
      .map_err(|e| eyre!("Failed to delete feed cache: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }

  fn insert(&self, feed: &[FeedImage], timestamp: DateTime<Utc>) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM feed_images", [])
      .map_err(|e| eyre!("Failed to clear feed images: {}", e))?;
    tx.execute(
      "INSERT OR REPLACE INTO feed_cache (id, timestamp) VALUES (1, ?)",
      params![format_datetime(timestamp)],
    )
    .map_err(|e| eyre!("Failed to store feed cache: {}", e))?;

    {
      let mut stmt = tx
        .prepare(
          "INSERT INTO feed_images (position, id, description, location, url)
           VALUES (?, ?, ?, ?, ?)",
        )
        .map_err(|e| eyre!("Failed to prepare feed insert: {}", e))?;

      for (position, image) in feed.iter().enumerate() {
        stmt
          .execute(params![
            position as i64,
            image.id.to_string(),
            image.description,
            image.location,
            image.url.as_str(),
          ])
          .map_err(|e| eyre!("Failed to store feed image: {}", e))?;
      }
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }

  fn retrieve(&self) -> Result<Option<CachedFeed>> {
    let conn = self.lock()?;

    let timestamp: Option<String> = conn
      .query_row("SELECT timestamp FROM feed_cache WHERE id = 1", [], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| eyre!("Failed to read feed cache: {}", e))?;

    let timestamp = match timestamp {
      Some(ts) => parse_datetime(&ts)?,
      None => return Ok(None),
    };

    let mut stmt = conn
      .prepare(
        "SELECT id, description, location, url FROM feed_images
         ORDER BY position",
      )
      .map_err(|e| eyre!("Failed to prepare feed query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, Option<String>>(1)?,
          row.get::<_, Option<String>>(2)?,
          row.get::<_, String>(3)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query feed images: {}", e))?;

    let mut feed = Vec::new();
    for row in rows {
      let (id, description, location, url) =
        row.map_err(|e| eyre!("Failed to read feed image: {}", e))?;
      feed.push(FeedImage {
        id: Uuid::parse_str(&id).map_err(|e| eyre!("Corrupt feed image id '{}': {}", id, e))?,
        description,
        location,
        url: Url::parse(&url).map_err(|e| eyre!("Corrupt feed image url '{}': {}", url, e))?,
      });
    }

    Ok(Some(CachedFeed { feed, timestamp }))
  }
}

impl ImageDataStore for SqliteStore {
  fn insert_image_data(&self, data: &[u8], url: &Url) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO image_data (url_hash, url, data, cached_at)
         VALUES (?, ?, ?, ?)",
        params![
          url_hash(url),
          url.as_str(),
          data,
          format_datetime(Utc::now())
        ],
      )
      .map_err(|e| eyre!("Failed to store image data: {}", e))?;

    Ok(())
  }

  fn retrieve_image_data(&self, url: &Url) -> Result<Option<Vec<u8>>> {
    let conn = self.lock()?;

    conn
      .query_row(
        "SELECT data FROM image_data WHERE url_hash = ?",
        params![url_hash(url)],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read image data: {}", e))
  }
}

/// SHA256 of the URL for stable, fixed-length keys.
fn url_hash(url: &Url) -> String {
  let mut hasher = Sha256::new();
  hasher.update(url.as_str().as_bytes());
  hex::encode(hasher.finalize())
}

fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse a datetime string written by [`format_datetime`].
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

/// Store that keeps everything in process memory.
#[derive(Default)]
pub struct InMemoryStore {
  feed: Mutex<Option<CachedFeed>>,
  images: Mutex<HashMap<Url, Vec<u8>>>,
  #[cfg(test)]
  fail_next_insert: std::sync::atomic::AtomicBool,
}

impl InMemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  #[cfg(test)]
  pub(crate) fn fail_next_insert(&self) {
    self
      .fail_next_insert
      .store(true, std::sync::atomic::Ordering::SeqCst);
  }

  #[cfg(test)]
  fn take_injected_failure(&self) -> bool {
    self
      .fail_next_insert
      .swap(false, std::sync::atomic::Ordering::SeqCst)
  }

  #[cfg(not(test))]
  fn take_injected_failure(&self) -> bool {
    false
  }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
  mutex.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
}

impl FeedStore for InMemoryStore {
  fn delete_cached_feed(&self) -> Result<()> {
    *lock(&self.feed)? = None;
    Ok(())
  }

  fn insert(&self, feed: &[FeedImage], timestamp: DateTime<Utc>) -> Result<()> {
    if self.take_injected_failure() {
      return Err(eyre!("insert failed"));
    }

    *lock(&self.feed)? = Some(CachedFeed {
      feed: feed.to_vec(),
      timestamp,
    });
    Ok(())
  }

  fn retrieve(&self) -> Result<Option<CachedFeed>> {
    Ok(lock(&self.feed)?.clone())
  }
}

impl ImageDataStore for InMemoryStore {
  fn insert_image_data(&self, data: &[u8], url: &Url) -> Result<()> {
    lock(&self.images)?.insert(url.clone(), data.to_vec());
    Ok(())
  }

  fn retrieve_image_data(&self, url: &Url) -> Result<Option<Vec<u8>>> {
    Ok(lock(&self.images)?.get(url).cloned())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{Duration, TimeZone};

  fn image(n: u32) -> FeedImage {
    FeedImage::new(
      Uuid::new_v4(),
      (n % 2 == 0).then(|| format!("description {}", n)),
      Some(format!("location {}", n)),
      Url::parse(&format!("https://a-url.com/{}.png", n)).unwrap(),
    )
  }

  fn timestamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap() + Duration::nanoseconds(123_456_789)
  }

  #[test]
  fn test_retrieve_on_empty_cache_is_none() {
    let store = SqliteStore::open_in_memory().unwrap();

    assert_eq!(store.retrieve().unwrap(), None);
  }

  #[test]
  fn test_insert_then_retrieve_preserves_order_and_timestamp() {
    let store = SqliteStore::open_in_memory().unwrap();
    let feed = vec![image(1), image(2), image(3)];

    store.insert(&feed, timestamp()).unwrap();

    let cached = store.retrieve().unwrap().unwrap();
    assert_eq!(cached.feed, feed);
    assert_eq!(cached.timestamp, timestamp());
  }

  #[test]
  fn test_insert_overrides_previous_cache() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.insert(&[image(1), image(2)], timestamp()).unwrap();

    let latest = vec![image(3)];
    let later = timestamp() + Duration::hours(1);
    store.insert(&latest, later).unwrap();

    let cached = store.retrieve().unwrap().unwrap();
    assert_eq!(cached.feed, latest);
    assert_eq!(cached.timestamp, later);
  }

  #[test]
  fn test_empty_feed_is_still_a_cache() {
    let store = SqliteStore::open_in_memory().unwrap();

    store.insert(&[], timestamp()).unwrap();

    let cached = store.retrieve().unwrap().unwrap();
    assert!(cached.feed.is_empty());
  }

  #[test]
  fn test_delete_empties_cache() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.insert(&[image(1)], timestamp()).unwrap();

    store.delete_cached_feed().unwrap();
    store.delete_cached_feed().unwrap();

    assert_eq!(store.retrieve().unwrap(), None);
  }

  #[test]
  fn test_corrupt_row_fails_retrieval() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.insert(&[image(1)], timestamp()).unwrap();
    store
      .lock()
      .unwrap()
      .execute("UPDATE feed_images SET id = 'not-a-uuid'", [])
      .unwrap();

    assert!(store.retrieve().is_err());
  }

  #[test]
  fn test_image_data_by_url() {
    let store = SqliteStore::open_in_memory().unwrap();
    let url = Url::parse("https://a-url.com/1.png").unwrap();
    let other = Url::parse("https://a-url.com/2.png").unwrap();

    store.insert_image_data(b"first", &url).unwrap();
    store.insert_image_data(b"second", &url).unwrap();

    assert_eq!(store.retrieve_image_data(&url).unwrap(), Some(b"second".to_vec()));
    assert_eq!(store.retrieve_image_data(&other).unwrap(), None);
  }

  #[test]
  fn test_image_data_survives_feed_deletion() {
    let store = SqliteStore::open_in_memory().unwrap();
    let url = Url::parse("https://a-url.com/1.png").unwrap();
    store.insert(&[image(1)], timestamp()).unwrap();
    store.insert_image_data(b"bytes", &url).unwrap();

    store.delete_cached_feed().unwrap();

    assert_eq!(store.retrieve_image_data(&url).unwrap(), Some(b"bytes".to_vec()));
  }

  #[test]
  fn test_in_memory_store_behaves_like_sqlite() {
    let store = InMemoryStore::new();
    let feed = vec![image(1), image(2)];

    assert_eq!(store.retrieve().unwrap(), None);
    store.insert(&feed, timestamp()).unwrap();
    assert_eq!(store.retrieve().unwrap().unwrap().feed, feed);
    store.delete_cached_feed().unwrap();
    assert_eq!(store.retrieve().unwrap(), None);
  }
}
