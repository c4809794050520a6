//! Support to download from the local filesystem.
//!
//! Mostly useful for testing, and for pointing the fetcher at images that are already on disk.

use std::io;

use bytes::Bytes;

use crate::caching::{FetchError, ResourceKey};

/// Downloader implementation for `file` keys.
#[derive(Debug, Default)]
pub struct FilesystemDownloader {}

impl FilesystemDownloader {
    pub fn new() -> Self {
        Self {}
    }

    /// Reads the file the key points to.
    pub async fn download_source(&self, key: &ResourceKey) -> Result<Bytes, FetchError> {
        let path = key
            .url()
            .to_file_path()
            .map_err(|_| FetchError::InvalidKey(format!("`{key}`: not a local file path")))?;
        tracing::debug!("Fetching image from {:?}", path);

        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data.into()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(FetchError::TransportFailure(
                format!("file not found: {}", path.display()),
            )),
            Err(e) => Err(FetchError::transport(&e)),
        }
    }
}
