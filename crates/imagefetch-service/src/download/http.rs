//! Support to download from HTTP servers.

use bytes::Bytes;
use reqwest::{Client, StatusCode};

use crate::caching::{FetchError, ResourceKey};

/// Downloader implementation for `http` and `https` keys.
#[derive(Debug)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Downloads an image hosted on an HTTP server.
    pub async fn download_source(&self, key: &ResourceKey) -> Result<Bytes, FetchError> {
        tracing::debug!("Fetching image from `{}`", key);

        let response = self.client.get(key.url().clone()).send().await?;
        let status = response.status();

        if status.is_success() {
            tracing::trace!("Success hitting `{}`", key);
            return Ok(response.bytes().await?);
        }

        let err = if matches!(status, StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED) {
            tracing::debug!("Insufficient permissions to download `{}`: {}", key, status);
            FetchError::TransportFailure(format!("permission denied: {status}"))
        } else if status == StatusCode::FOUND {
            tracing::debug!("Potential login page detected when downloading from `{key}`: {status}");
            FetchError::TransportFailure("potential login page detected".into())
        } else {
            tracing::debug!("Unexpected status code from `{}`: {}", key, status);
            FetchError::TransportFailure(format!("unexpected status code: {status}"))
        };

        Err(err)
    }
}
