//! Age-based cache validity.

use chrono::{DateTime, Duration, Utc};

/// Decides whether a cache timestamp is still usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
  max_age: Duration,
}

impl CachePolicy {
  pub const DEFAULT_MAX_AGE_DAYS: i64 = 7;

  pub fn new(max_age: Duration) -> Self {
    Self { max_age }
  }

  pub fn max_age(&self) -> Duration {
    self.max_age
  }

  /// True iff `now - timestamp` is strictly below the maximum age.
  pub fn validate(&self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - timestamp < self.max_age
  }
}

impl Default for CachePolicy {
  fn default() -> Self {
    Self::new(Duration::days(Self::DEFAULT_MAX_AGE_DAYS))
  }
}
