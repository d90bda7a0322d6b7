use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{FeedStore, LocalFeedLoader};

/// Application lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
  /// The app is leaving the foreground
  WillResignActive,
}

/// Sending side of the lifecycle channel, held by whatever observes the host
/// application.
#[derive(Debug, Clone)]
pub struct LifecycleSignal {
  tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl LifecycleSignal {
  /// Emit `event`. Returns false once nobody is listening anymore.
  pub fn send(&self, event: LifecycleEvent) -> bool {
    self.tx.send(event).is_ok()
  }
}

pub fn lifecycle_channel() -> (LifecycleSignal, mpsc::UnboundedReceiver<LifecycleEvent>) {
  let (tx, rx) = mpsc::unbounded_channel();
  (LifecycleSignal { tx }, rx)
}

/// Validate the feed cache every time the app resigns active.
///
/// Runs until every [`LifecycleSignal`] is dropped. Validation failures are
/// logged and do not stop the listener.
pub fn spawn_cache_validation<S: FeedStore>(
  cache: LocalFeedLoader<S>,
  mut events: mpsc::UnboundedReceiver<LifecycleEvent>,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    while let Some(event) = events.recv().await {
      match event {
        LifecycleEvent::WillResignActive => {
          debug!("app resigning active, validating feed cache");
          if let Err(error) = cache.validate_cache().await {
            warn!(error = %error, "feed cache validation failed");
          }
        }
      }
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStore;
  use crate::feed::FeedImage;
  use chrono::{DateTime, Duration, TimeZone, Utc};
  use std::sync::Arc;
  use url::Url;
  use uuid::Uuid;

  fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
  }

  fn feed() -> Vec<FeedImage> {
    vec![FeedImage::new(
      Uuid::new_v4(),
      None,
      Some("a location".to_string()),
      Url::parse("https://a-url.com/1.png").unwrap(),
    )]
  }

  #[tokio::test]
  async fn test_resigning_active_deletes_expired_cache() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    store.insert(&feed(), now() - Duration::days(8)).unwrap();
    let cache = LocalFeedLoader::new(Arc::clone(&store)).with_clock(now);
    let (signal, events) = lifecycle_channel();
    let listener = spawn_cache_validation(cache.clone(), events);

    assert!(signal.send(LifecycleEvent::WillResignActive));
    drop(signal);
    listener.await.unwrap();

    assert_eq!(store.retrieve().unwrap(), None);
    assert!(cache.load_feed().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_resigning_active_keeps_valid_cache() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let feed = feed();
    store.insert(&feed, now() - Duration::days(6)).unwrap();
    let (signal, events) = lifecycle_channel();
    let listener = spawn_cache_validation(
      LocalFeedLoader::new(Arc::clone(&store)).with_clock(now),
      events,
    );

    signal.send(LifecycleEvent::WillResignActive);
    drop(signal);
    listener.await.unwrap();

    assert_eq!(store.retrieve().unwrap().map(|cache| cache.feed), Some(feed));
  }

  #[tokio::test]
  async fn test_signal_reports_closed_listener() {
    let (signal, events) = lifecycle_channel();
    drop(events);

    assert!(!signal.send(LifecycleEvent::WillResignActive));
  }
}
