//! Composable resource loading: remote-first feeds with a local fallback,
//! write-behind caching, pagination and cancellable loads delivered on a
//! designated main context.

pub mod cache;
pub mod config;
pub mod event;
pub mod feed;
pub mod loader;
pub mod presenter;
