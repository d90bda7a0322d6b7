//! Serde-deserializable types matching the feed API responses.
//!
//! These are kept apart from the domain types so the wire shape can change
//! without touching the rest of the crate.

use serde::Deserialize;
use url::Url;
use uuid::Uuid;

use super::types::FeedImage;

#[derive(Debug, Deserialize)]
pub struct ApiFeedResponse {
  pub items: Vec<ApiFeedItem>,
}

#[derive(Debug, Deserialize)]
pub struct ApiFeedItem {
  pub id: Uuid,
  pub description: Option<String>,
  pub location: Option<String>,
  pub image: Url,
}

impl From<ApiFeedItem> for FeedImage {
  fn from(item: ApiFeedItem) -> Self {
    FeedImage {
      id: item.id,
      description: item.description,
      location: item.location,
      url: item.image,
    }
  }
}
