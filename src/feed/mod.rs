//! The image feed: domain types, remote API and the composed loading service.

mod api_types;
mod client;
mod paginated;
mod service;
mod types;

pub use client::{
  FeedEndpoint, FeedItemsMapper, HttpClient, HttpResponse, ImageDataMapper, InvalidData, Mapper,
  RemoteLoader, ReqwestHttpClient,
};
pub use paginated::{LoadMore, Paginated};
pub use service::FeedService;
pub use types::FeedImage;
