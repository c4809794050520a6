#[macro_use]
pub mod metrics;

pub mod caching;
pub mod codec;
pub mod config;
pub mod download;
pub mod fetcher;
pub mod transform;
pub mod utils;

pub use caching::{FetchError, FetchResult, ResourceKey, SharedImage};
pub use fetcher::{CancelHandle, ImageFetcher};
