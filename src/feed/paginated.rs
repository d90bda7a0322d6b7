//! Pages of items that know how to fetch their successor.

use std::fmt;
use std::sync::Arc;

use crate::loader::LoadFuture;

/// Produces the next page. Each call starts an independent load.
pub type LoadMore<Item> = Arc<dyn Fn() -> LoadFuture<Paginated<Item>> + Send + Sync>;

/// A page of items plus an optional continuation.
///
/// `load_more` is present iff there is more to fetch; a page without it
/// ends the chain. Pages are self-contained: the page produced by
/// `load_more` carries every item accumulated so far, so callers should
/// drop older pages once a newer one arrives.
pub struct Paginated<Item> {
  pub items: Vec<Item>,
  pub load_more: Option<LoadMore<Item>>,
}

impl<Item> Paginated<Item> {
  pub fn new(items: Vec<Item>, load_more: Option<LoadMore<Item>>) -> Self {
    Self { items, load_more }
  }

  /// A terminal page.
  pub fn last(items: Vec<Item>) -> Self {
    Self {
      items,
      load_more: None,
    }
  }

  pub fn has_more(&self) -> bool {
    self.load_more.is_some()
  }

  /// Start loading the next page, if there is one.
  pub fn load_more(&self) -> Option<LoadFuture<Paginated<Item>>> {
    self.load_more.as_ref().map(|load_more| load_more())
  }
}

impl<Item: Clone> Clone for Paginated<Item> {
  fn clone(&self) -> Self {
    Self {
      items: self.items.clone(),
      load_more: self.load_more.clone(),
    }
  }
}

impl<Item: fmt::Debug> fmt::Debug for Paginated<Item> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Paginated")
      .field("items", &self.items)
      .field("has_more", &self.has_more())
      .finish()
  }
}
