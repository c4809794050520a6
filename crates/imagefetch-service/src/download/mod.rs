//! Transfers of raw image payloads.
//!
//! The [`Transport`] trait is what the fetcher uses to retrieve the bytes behind a
//! [`ResourceKey`]. [`DownloadService`] is the production implementation, dispatching to a
//! downloader based on the URL scheme of the key.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::caching::{FetchError, ResourceKey};
use crate::config::{Config, DownloadTimeouts};
use crate::utils::http::create_client;

mod filesystem;
mod http;

pub use filesystem::FilesystemDownloader;
pub use http::HttpDownloader;

/// Retrieves the raw payload of a resource.
pub trait Transport: Send + Sync + 'static {
    /// Starts a transfer of the resource at `key`, resolving to its raw bytes.
    ///
    /// Dropping the returned future cancels the transfer.
    fn transfer<'a>(&'a self, key: &'a ResourceKey) -> BoxFuture<'a, Result<Bytes, FetchError>>;
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::TransportFailure("request timed out".into());
        }
        Self::transport(&err)
    }
}

/// A service which can download images from http(s) and local file URLs.
#[derive(Debug)]
pub struct DownloadService {
    timeouts: DownloadTimeouts,
    http: HttpDownloader,
    fs: FilesystemDownloader,
}

impl DownloadService {
    /// Creates the service along with its HTTP client.
    pub fn new(config: &Config) -> Result<Arc<Self>, FetchError> {
        let timeouts = config.timeouts;
        let client = create_client(&timeouts)?;

        Ok(Arc::new(Self {
            timeouts,
            http: HttpDownloader::new(client),
            fs: FilesystemDownloader::new(),
        }))
    }

    async fn dispatch_download(&self, key: &ResourceKey) -> Result<Bytes, FetchError> {
        let result = match key.url().scheme() {
            "http" | "https" => self.http.download_source(key).await,
            "file" => self.fs.download_source(key).await,
            scheme => Err(FetchError::InvalidKey(format!(
                "`{key}`: unsupported scheme `{scheme}`"
            ))),
        };

        match &result {
            Ok(data) => tracing::debug!("Image `{}` fetched successfully ({} bytes)", key, data.len()),
            Err(err) => tracing::debug!("Image `{}` fetching failed: {}", key, err),
        }

        result
    }

    /// Downloads the payload of `key`, giving up after the configured `max_download` timeout.
    ///
    /// This does not do any deduplication of requests, every call is a fresh download.
    pub async fn download(&self, key: &ResourceKey) -> Result<Bytes, FetchError> {
        let timeout = self.timeouts.max_download;
        let start = Instant::now();

        let result = match tokio::time::timeout(timeout, self.dispatch_download(key)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::TransportFailure(format!(
                "download was cancelled after {}",
                humantime::format_duration(timeout)
            ))),
        };

        let status = match &result {
            Ok(_) => "ok",
            Err(err) => err.kind(),
        };
        metric!(timer("service.download") = start.elapsed(), "scheme" => key.url().scheme(), "status" => status);

        result
    }
}

impl Transport for DownloadService {
    fn transfer<'a>(&'a self, key: &'a ResourceKey) -> BoxFuture<'a, Result<Bytes, FetchError>> {
        Box::pin(self.download(key))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_download_local_file() {
        imagefetch_test::setup();

        let dir = imagefetch_test::tempdir();
        let path = dir.path().join("cat.png");
        std::fs::write(&path, imagefetch_test::png_bytes(8, 4)).unwrap();

        let config = Config {
            cache_dir: None,
            ..Default::default()
        };
        let service = DownloadService::new(&config).unwrap();

        let key = ResourceKey::parse(&format!("file://{}", path.display())).unwrap();
        let data = service.download(&key).await.unwrap();
        assert_eq!(data, imagefetch_test::png_bytes(8, 4));

        let key = ResourceKey::parse("file:///i/do/not/exist.png").unwrap();
        let err = service.download(&key).await.unwrap_err();
        insta::assert_snapshot!(err, @"transfer failed: file not found: /i/do/not/exist.png");
    }

    #[tokio::test]
    async fn test_download_timeout() {
        imagefetch_test::setup();
        let server = imagefetch_test::Server::new();

        let config = Config {
            cache_dir: None,
            timeouts: DownloadTimeouts {
                max_download: Duration::from_millis(100),
                ..Default::default()
            },
            ..Default::default()
        };
        let service = DownloadService::new(&config).unwrap();

        let key = ResourceKey::parse(server.url("/delay/1s/image/8/8").as_str()).unwrap();
        let err = service.download(&key).await.unwrap_err();
        insta::assert_snapshot!(err, @"transfer failed: download was cancelled after 100ms");
    }
}
