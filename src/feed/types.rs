use url::Url;
use uuid::Uuid;

/// One entry of the image feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedImage {
  pub id: Uuid,
  pub description: Option<String>,
  pub location: Option<String>,
  pub url: Url,
}

impl FeedImage {
  pub fn new(id: Uuid, description: Option<String>, location: Option<String>, url: Url) -> Self {
    Self {
      id,
      description,
      location,
      url,
    }
  }
}
