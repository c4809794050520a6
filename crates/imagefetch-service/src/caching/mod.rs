//! # Image caching
//!
//! Fetched images go through two layers of caching before anything hits the network:
//!
//! - An in-memory layer holding decoded thumbnails, see [`MemoryCache`].
//! - A file-system layer persisting both the full image and its thumbnail, see [`DiskCache`].
//!
//! A lookup goes through the following steps:
//! - First, it goes through the in-memory layer.
//! - On miss, it will try to load the thumbnail from the file-system, if enabled.
//!   A hit there is promoted into the in-memory layer before being returned.
//! - On miss, nothing is modified and the caller has to fetch the image.
//!
//! Once a fetch completes, [`ImageCaches::store`] writes both variants to the file-system and
//! the thumbnail to memory.
//!
//! ### Metrics
//!
//! - `caches.memory.hit`: Lookups served by the in-memory layer.
//! - `caches.file.hit`: Lookups served by the file-system layer.
//! - `caches.file.write`: The number of images being written to disk, tagged by `variant`.
//! - `caches.file.size`: A histogram for the size (in bytes) of written cache files.
//!
//! ### Configuration
//!
//! The file-system layer is gated by the [`Config::cache_dir`] option. Without a `cache_dir`,
//! images are only ever cached in memory. The in-memory capacity is configured via
//! [`Config::caches`].

use std::io;
use std::sync::Arc;

use image::DynamicImage;

use crate::config::Config;

mod cache_error;
mod cache_key;
mod fs;
mod memory;


pub use cache_error::{FetchError, FetchResult, SharedImage};
pub use cache_key::{CacheVariant, ResourceKey};
pub use fs::DiskCache;
pub use memory::MemoryCache;

/// The two tiers of caching, shared by the fetcher and its workers.
#[derive(Debug, Clone)]
pub struct ImageCaches {
    memory: MemoryCache,
    disk: Option<DiskCache>,
}

impl ImageCaches {
    pub fn from_config(config: &Config) -> io::Result<Self> {
        let memory = MemoryCache::new(config.caches.in_memory.thumbnail_capacity);
        let disk = DiskCache::from_config(config)?;
        Ok(Self::new(memory, disk))
    }

    pub fn new(memory: MemoryCache, disk: Option<DiskCache>) -> Self {
        Self { memory, disk }
    }

    pub fn memory(&self) -> &MemoryCache {
        &self.memory
    }

    pub fn disk(&self) -> Option<&DiskCache> {
        self.disk.as_ref()
    }

    /// Looks up the thumbnail for `key`, first in memory, then on disk.
    ///
    /// This never touches the network, but may block on file-system access.
    pub fn lookup(&self, key: &ResourceKey) -> Option<SharedImage> {
        if let Some(image) = self.memory.get(key) {
            tracing::trace!("Memory cache hit for `{}`", key);
            metric!(counter("caches.memory.hit") += 1);
            return Some(image);
        }

        let disk = self.disk.as_ref()?;
        let image = Arc::new(disk.load(key, CacheVariant::Thumbnail)?);

        tracing::trace!("File cache hit for `{}`", key);
        metric!(counter("caches.file.hit") += 1);
        self.memory.insert(key.clone(), Arc::clone(&image));

        Some(image)
    }

    /// Loads the full resolution image from disk, bypassing memory.
    pub fn load_original(&self, key: &ResourceKey) -> Option<SharedImage> {
        let disk = self.disk.as_ref()?;
        disk.load(key, CacheVariant::Full).map(Arc::new)
    }

    /// Persists a freshly fetched image.
    ///
    /// Failing to write to disk is logged, but does not prevent the thumbnail from being
    /// cached in memory.
    pub fn store(&self, key: &ResourceKey, original: &DynamicImage, thumbnail: &SharedImage) {
        if let Some(disk) = &self.disk {
            for (variant, image) in [
                (CacheVariant::Full, original),
                (CacheVariant::Thumbnail, thumbnail.as_ref()),
            ] {
                match disk.store(key, variant, image) {
                    Ok(_) => {
                        let variant = match variant {
                            CacheVariant::Full => "full",
                            CacheVariant::Thumbnail => "thumbnail",
                        };
                        metric!(counter("caches.file.write") += 1, "variant" => variant);
                    }
                    Err(err) => {
                        tracing::error!(
                            error = &err as &dyn std::error::Error,
                            "Failed to write `{}` to the file cache",
                            key
                        );
                    }
                }
            }
        }

        self.memory.insert(key.clone(), Arc::clone(thumbnail));
    }
}
