//! Remote side of the feed: HTTP transport, endpoints and response mappers.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use super::api_types::ApiFeedResponse;
use super::types::FeedImage;
use crate::loader::{LoadFuture, ResourceLoader};

const OK_STATUS: u16 = 200;

/// Raw outcome of an HTTP GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
  pub status: u16,
  pub body: Vec<u8>,
}

/// Port for the HTTP transport. Any transport error is an opaque failure.
pub trait HttpClient: Send + Sync + 'static {
  fn get(&self, url: Url) -> LoadFuture<HttpResponse>;
}

/// [`HttpClient`] backed by reqwest.
#[derive(Clone)]
pub struct ReqwestHttpClient {
  client: reqwest::Client,
}

impl ReqwestHttpClient {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("feedloader/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl HttpClient for ReqwestHttpClient {
  fn get(&self, url: Url) -> LoadFuture<HttpResponse> {
    let client = self.client.clone();
    Box::pin(async move {
      let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;

      let status = response.status().as_u16();
      let body = response
        .bytes()
        .await
        .map_err(|e| eyre!("Failed to read response body from {}: {}", url, e))?;

      Ok(HttpResponse {
        status,
        body: body.to_vec(),
      })
    })
  }
}

/// A response the mappers refuse to turn into a resource.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidData {
  #[error("unexpected status code {0}")]
  Status(u16),
  #[error("malformed payload: {0}")]
  Payload(String),
  #[error("empty image data")]
  Empty,
}

/// Decodes a raw response into a resource.
pub trait Mapper: Send + Sync + 'static {
  type Output: Send + 'static;

  fn map(&self, response: &HttpResponse) -> Result<Self::Output, InvalidData>;
}

/// Maps `{"items": [...]}` feed responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedItemsMapper;

impl Mapper for FeedItemsMapper {
  type Output = Vec<FeedImage>;

  fn map(&self, response: &HttpResponse) -> Result<Vec<FeedImage>, InvalidData> {
    if response.status != OK_STATUS {
      return Err(InvalidData::Status(response.status));
    }

    let root: ApiFeedResponse =
      serde_json::from_slice(&response.body).map_err(|e| InvalidData::Payload(e.to_string()))?;

    Ok(root.items.into_iter().map(FeedImage::from).collect())
  }
}

/// Accepts any non-empty 200 body as image bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDataMapper;

impl Mapper for ImageDataMapper {
  type Output = Vec<u8>;

  fn map(&self, response: &HttpResponse) -> Result<Vec<u8>, InvalidData> {
    if response.status != OK_STATUS {
      return Err(InvalidData::Status(response.status));
    }
    if response.body.is_empty() {
      return Err(InvalidData::Empty);
    }
    Ok(response.body.clone())
  }
}

/// Fetches a URL and decodes the response with a [`Mapper`].
pub struct RemoteLoader<C, M> {
  client: Arc<C>,
  mapper: Arc<M>,
}

impl<C, M> RemoteLoader<C, M> {
  pub fn new(client: Arc<C>, mapper: M) -> Self {
    Self {
      client,
      mapper: Arc::new(mapper),
    }
  }
}

impl<C: HttpClient, M: Mapper> ResourceLoader for RemoteLoader<C, M> {
  type Key = Url;
  type Resource = M::Output;

  fn load(&self, url: Url) -> LoadFuture<M::Output> {
    let response = self.client.get(url);
    let mapper = Arc::clone(&self.mapper);
    Box::pin(async move {
      let response = response.await?;
      Ok(mapper.map(&response)?)
    })
  }
}

/// Feed API endpoints relative to a base URL.
#[derive(Debug, Clone)]
pub struct FeedEndpoint {
  base_url: Url,
  page_size: usize,
}

impl FeedEndpoint {
  pub const DEFAULT_PAGE_SIZE: usize = 10;

  pub fn new(base_url: Url, page_size: usize) -> Result<Self> {
    if base_url.cannot_be_a_base() {
      return Err(eyre!("Feed API URL {} cannot be used as a base", base_url));
    }
    Ok(Self {
      base_url,
      page_size,
    })
  }

  /// `<base>/v1/feed?limit=N`, continuing after `after` when given.
  pub fn feed_url(&self, after: Option<Uuid>) -> Url {
    let mut url = self.base_url.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
      segments.pop_if_empty().extend(["v1", "feed"]);
    }
    {
      let mut query = url.query_pairs_mut();
      query.append_pair("limit", &self.page_size.to_string());
      if let Some(after) = after {
        query.append_pair("after_id", &after.to_string());
      }
    }
    url
  }
}
