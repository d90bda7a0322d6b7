//! Primary/fallback composition.

use std::sync::Arc;
use tracing::debug;

use super::{LoadFuture, ResourceLoader};

/// Loader that tries `primary` and, only if it fails, `fallback`.
///
/// The two run strictly one after the other. The fallback's outcome is
/// returned as-is; there is no further level. Dropping or aborting the
/// returned future stops whichever branch is being polled, and a future
/// aborted before the primary resolved never starts the fallback.
pub struct FallbackLoader<P, F> {
  primary: P,
  fallback: Arc<F>,
}

impl<P, F> FallbackLoader<P, F> {
  pub fn new(primary: P, fallback: F) -> Self {
    Self {
      primary,
      fallback: Arc::new(fallback),
    }
  }
}

impl<P, F> ResourceLoader for FallbackLoader<P, F>
where
  P: ResourceLoader,
  F: ResourceLoader<Key = P::Key, Resource = P::Resource>,
{
  type Key = P::Key;
  type Resource = P::Resource;

  fn load(&self, key: Self::Key) -> LoadFuture<Self::Resource> {
    let primary = self.primary.load(key.clone());
    let fallback = Arc::clone(&self.fallback);

    Box::pin(async move {
      match primary.await {
        Ok(resource) => Ok(resource),
        Err(error) => {
          debug!(error = %error, "primary load failed, trying fallback");
          fallback.load(key).await
        }
      }
    })
  }
}
