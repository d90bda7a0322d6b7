//! Feed service that composes the remote API with the local cache.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use super::client::{FeedEndpoint, FeedItemsMapper, HttpClient, ImageDataMapper, RemoteLoader};
use super::paginated::{LoadMore, Paginated};
use super::types::FeedImage;
use crate::cache::{CachePolicy, FeedStore, ImageDataStore, LocalFeedLoader, LocalImageDataLoader};
use crate::loader::{cache_on_success_with, loader_fn, LoadFuture, LoaderExt, ResourceLoader};

/// Feed and image loading with transparent caching and offline support.
///
/// - The first feed page comes from the network, is cached on success and
///   falls back to the cache when the network fails.
/// - Each further page appends the next remote batch to the items loaded so
///   far and caches the merged feed.
/// - Image data is served from the cache first and fetched (then cached)
///   on a miss.
pub struct FeedService<C, S> {
  client: Arc<C>,
  endpoint: FeedEndpoint,
  feed_cache: LocalFeedLoader<S>,
  image_cache: LocalImageDataLoader<S>,
}

impl<C, S> FeedService<C, S>
where
  C: HttpClient,
  S: FeedStore + ImageDataStore,
{
  pub fn new(client: Arc<C>, store: Arc<S>, endpoint: FeedEndpoint) -> Self {
    Self {
      client,
      endpoint,
      feed_cache: LocalFeedLoader::new(Arc::clone(&store)),
      image_cache: LocalImageDataLoader::new(store),
    }
  }

  pub fn with_policy(mut self, policy: CachePolicy) -> Self {
    self.feed_cache = self.feed_cache.with_policy(policy);
    self
  }

  pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
    self.feed_cache = self.feed_cache.with_clock(clock);
    self
  }

  pub fn feed_cache(&self) -> &LocalFeedLoader<S> {
    &self.feed_cache
  }

  /// Loader for the first feed page.
  pub fn feed_loader(&self) -> impl ResourceLoader<Key = (), Resource = Paginated<FeedImage>> {
    let remote = {
      let service = self.clone();
      loader_fn(move |_: ()| service.remote_feed(None))
    };
    let service = self.clone();

    remote
      .caching_to(self.feed_cache.clone())
      .fallback(self.feed_cache.clone())
      .map(move |feed| service.make_page(feed))
  }

  pub fn load_feed(&self) -> LoadFuture<Paginated<FeedImage>> {
    self.feed_loader().load(())
  }

  /// Loader for image bytes: cache first, network (cached on success) second.
  pub fn image_data_loader(&self) -> impl ResourceLoader<Key = Url, Resource = Vec<u8>> {
    let remote = RemoteLoader::new(Arc::clone(&self.client), ImageDataMapper);

    self
      .image_cache
      .clone()
      .fallback(remote.caching_to(self.image_cache.clone()))
  }

  /// Drop the cached feed if it has expired or is unreadable.
  pub async fn validate_cache(&self) -> Result<()> {
    self.feed_cache.validate_cache().await
  }

  fn remote_feed(&self, after: Option<&FeedImage>) -> LoadFuture<Vec<FeedImage>> {
    let url = self.endpoint.feed_url(after.map(|image| image.id));
    RemoteLoader::new(Arc::clone(&self.client), FeedItemsMapper).load(url)
  }

  fn make_page(&self, feed: Vec<FeedImage>) -> Paginated<FeedImage> {
    let last = feed.last().cloned();
    self.make_page_after(feed, last)
  }

  fn make_page_after(
    &self,
    items: Vec<FeedImage>,
    last: Option<FeedImage>,
  ) -> Paginated<FeedImage> {
    let load_more = last.map(|last| {
      let service = self.clone();
      let loaded = Arc::new(items.clone());
      let load_more: LoadMore<FeedImage> =
        Arc::new(move || service.load_more_after(Arc::clone(&loaded), last.clone()));
      load_more
    });

    Paginated::new(items, load_more)
  }

  /// Next page after `last`: the items already loaded followed by the next
  /// remote batch. The merged feed replaces the cache.
  fn load_more_after(
    &self,
    loaded: Arc<Vec<FeedImage>>,
    last: FeedImage,
  ) -> LoadFuture<Paginated<FeedImage>> {
    let remote = self.remote_feed(Some(&last));
    let service = self.clone();

    let page: LoadFuture<Paginated<FeedImage>> = Box::pin(async move {
      let batch = remote.await?;
      debug!(
        loaded = loaded.len(),
        fetched = batch.len(),
        "loaded next feed page"
      );

      let last = batch.last().cloned();
      let items = loaded.iter().cloned().chain(batch).collect();
      Ok(service.make_page_after(items, last))
    });

    cache_on_success_with(
      page,
      Arc::new(self.feed_cache.clone()),
      (),
      |page: &Paginated<FeedImage>| page.items.clone(),
    )
  }
}

impl<C, S> Clone for FeedService<C, S> {
  fn clone(&self) -> Self {
    Self {
      client: Arc::clone(&self.client),
      endpoint: self.endpoint.clone(),
      feed_cache: self.feed_cache.clone(),
      image_cache: self.image_cache.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{InMemoryStore, SqliteStore};
  use crate::feed::HttpResponse;
  use crate::loader::testing::eventually;
  use chrono::{Duration, TimeZone};
  use color_eyre::eyre::eyre;
  use serde_json::json;
  use std::sync::Mutex;
  use uuid::Uuid;

  type Handler = Box<dyn Fn(&Url) -> Result<HttpResponse> + Send + Sync>;

  /// Answers requests through a closure and records every requested URL.
  struct HttpClientStub {
    handler: Handler,
    requests: Mutex<Vec<Url>>,
  }

  impl HttpClientStub {
    fn new(handler: impl Fn(&Url) -> Result<HttpResponse> + Send + Sync + 'static) -> Arc<Self> {
      Arc::new(Self {
        handler: Box::new(handler),
        requests: Mutex::new(Vec::new()),
      })
    }

    fn offline() -> Arc<Self> {
      Self::new(|_| Err(eyre!("The Internet connection appears to be offline")))
    }

    fn requests(&self) -> Vec<Url> {
      self.requests.lock().unwrap().clone()
    }
  }

  impl HttpClient for HttpClientStub {
    fn get(&self, url: Url) -> LoadFuture<HttpResponse> {
      self.requests.lock().unwrap().push(url.clone());
      let response = (self.handler)(&url);
      Box::pin(async move { response })
    }
  }

  fn image(n: u32) -> FeedImage {
    FeedImage::new(
      Uuid::new_v4(),
      Some(format!("description {}", n)),
      None,
      Url::parse(&format!("https://image-url.com/{}.png", n)).unwrap(),
    )
  }

  fn feed_response(feed: &[FeedImage]) -> HttpResponse {
    let items: Vec<_> = feed
      .iter()
      .map(|image| {
        json!({
          "id": image.id,
          "description": image.description,
          "location": image.location,
          "image": image.url,
        })
      })
      .collect();

    HttpResponse {
      status: 200,
      body: json!({ "items": items }).to_string().into_bytes(),
    }
  }

  fn after_id(url: &Url) -> Option<Uuid> {
    url
      .query_pairs()
      .find(|(key, _)| key == "after_id")
      .and_then(|(_, value)| Uuid::parse_str(&value).ok())
  }

  fn endpoint() -> FeedEndpoint {
    FeedEndpoint::new(Url::parse("https://base-url.com").unwrap(), 10).unwrap()
  }

  fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
  }

  fn make_service<S: FeedStore + ImageDataStore>(
    client: Arc<HttpClientStub>,
    store: Arc<S>,
  ) -> FeedService<HttpClientStub, S> {
    FeedService::new(client, store, endpoint()).with_clock(now)
  }

  #[tokio::test]
  async fn test_online_load_delivers_and_caches_remote_feed() {
    let feed = vec![image(1), image(2)];
    let response = feed_response(&feed);
    let client = HttpClientStub::new(move |_| Ok(response.clone()));
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let service = make_service(client.clone(), store.clone());

    let page = service.load_feed().await.unwrap();

    assert_eq!(page.items, feed);
    assert!(page.has_more());
    assert_eq!(
      client.requests(),
      vec![Url::parse("https://base-url.com/v1/feed?limit=10").unwrap()]
    );
    assert!(
      eventually(|| {
        store
          .retrieve()
          .unwrap()
          .map(|cache| cache.feed == feed && cache.timestamp == now())
          .unwrap_or(false)
      })
      .await
    );
  }

  #[tokio::test]
  async fn test_offline_load_delivers_valid_cached_feed() {
    let feed = vec![image(1), image(2)];
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    store.insert(&feed, now() - Duration::days(1)).unwrap();
    let service = make_service(HttpClientStub::offline(), store);

    let page = service.load_feed().await.unwrap();

    assert_eq!(page.items, feed);
  }

  #[tokio::test]
  async fn test_offline_load_with_empty_cache_delivers_empty_feed() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let service = make_service(HttpClientStub::offline(), store);

    let page = service.load_feed().await.unwrap();

    assert!(page.items.is_empty());
    assert!(!page.has_more());
  }

  #[tokio::test]
  async fn test_offline_load_ignores_expired_cache() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    store.insert(&[image(1)], now() - Duration::days(7)).unwrap();
    let service = make_service(HttpClientStub::offline(), store);

    let page = service.load_feed().await.unwrap();

    assert!(page.items.is_empty());
  }

  #[tokio::test]
  async fn test_invalid_remote_data_falls_back_to_cache() {
    let feed = vec![image(1)];
    let store = Arc::new(InMemoryStore::new());
    store.insert(&feed, now()).unwrap();
    let client = HttpClientStub::new(|_| {
      Ok(HttpResponse {
        status: 500,
        body: Vec::new(),
      })
    });
    let service = make_service(client, store);

    assert_eq!(service.load_feed().await.unwrap().items, feed);
  }

  #[tokio::test]
  async fn test_load_more_accumulates_pages_until_empty_batch() {
    let first = vec![image(1), image(2)];
    let second = vec![image(3), image(4)];
    let (first_last, second_last) = (first[1].id, second[1].id);
    let (first_response, second_response) = (feed_response(&first), feed_response(&second));
    let client = HttpClientStub::new(move |url| match after_id(url) {
      None => Ok(first_response.clone()),
      Some(id) if id == first_last => Ok(second_response.clone()),
      Some(id) if id == second_last => Ok(feed_response(&[])),
      Some(id) => Err(eyre!("unexpected after_id {}", id)),
    });
    let store = Arc::new(InMemoryStore::new());
    let service = make_service(client, store.clone());
    let cached_feed = |expected: Vec<FeedImage>| {
      let store = store.clone();
      move || {
        store
          .retrieve()
          .unwrap()
          .map(|cache| cache.feed == expected)
          .unwrap_or(false)
      }
    };

    let page = service.load_feed().await.unwrap();
    assert_eq!(page.items, first);
    assert!(eventually(cached_feed(first.clone())).await);

    let page = page.load_more().unwrap().await.unwrap();
    let merged: Vec<_> = first.iter().chain(&second).cloned().collect();
    assert_eq!(page.items, merged);
    assert!(page.has_more());
    assert!(eventually(cached_feed(merged.clone())).await);

    let page = page.load_more().unwrap().await.unwrap();
    assert_eq!(page.items, merged);
    assert!(!page.has_more());
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_load_more_right_after_first_page_keeps_its_items() {
    let first = vec![image(1), image(2)];
    let second = vec![image(3), image(4)];
    let first_last = first[1].id;
    let (first_response, second_response) = (feed_response(&first), feed_response(&second));
    let client = HttpClientStub::new(move |url| match after_id(url) {
      None => Ok(first_response.clone()),
      Some(id) if id == first_last => Ok(second_response.clone()),
      Some(id) => Err(eyre!("unexpected after_id {}", id)),
    });
    let merged: Vec<_> = first.iter().chain(&second).cloned().collect();

    for _ in 0..20 {
      let store = Arc::new(SqliteStore::open_in_memory().unwrap());
      store.insert(&[image(9)], now() - Duration::hours(1)).unwrap();
      let service = make_service(client.clone(), store);

      let page = service.load_feed().await.unwrap();
      let page = page.load_more().unwrap().await.unwrap();

      assert_eq!(page.items, merged);
      assert!(page.has_more());
    }
  }

  #[tokio::test]
  async fn test_load_more_failure_is_surfaced() {
    let first = vec![image(1)];
    let response = feed_response(&first);
    let client = HttpClientStub::new(move |url| match after_id(url) {
      None => Ok(response.clone()),
      Some(_) => Err(eyre!("offline")),
    });
    let service = make_service(client, Arc::new(InMemoryStore::new()));

    let page = service.load_feed().await.unwrap();

    assert!(page.load_more().unwrap().await.is_err());
  }

  #[tokio::test]
  async fn test_image_data_is_fetched_once_then_served_from_cache() {
    let client = HttpClientStub::new(|_| {
      Ok(HttpResponse {
        status: 200,
        body: b"image bytes".to_vec(),
      })
    });
    let store = Arc::new(InMemoryStore::new());
    let service = make_service(client.clone(), store.clone());
    let loader = service.image_data_loader();
    let url = Url::parse("https://image-url.com/1.png").unwrap();

    assert_eq!(loader.load(url.clone()).await.unwrap(), b"image bytes".to_vec());
    let cached_url = url.clone();
    assert!(eventually(|| store.retrieve_image_data(&cached_url).unwrap().is_some()).await);

    assert_eq!(loader.load(url.clone()).await.unwrap(), b"image bytes".to_vec());
    assert_eq!(client.requests(), vec![url]);
  }

  #[tokio::test]
  async fn test_image_data_fails_when_cache_misses_and_remote_fails() {
    let service = make_service(HttpClientStub::offline(), Arc::new(InMemoryStore::new()));
    let url = Url::parse("https://image-url.com/1.png").unwrap();

    assert!(service.image_data_loader().load(url).await.is_err());
  }
}
