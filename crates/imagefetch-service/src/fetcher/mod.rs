//! # Fetching images
//!
//! [`ImageFetcher`] is the entry point for loading images. Every request first goes through
//! the [`ImageCaches`], and on a miss is handed to a registry that makes sure there is at most
//! one transfer in flight for any [`ResourceKey`]. Concurrent requests for the same key are
//! coalesced onto that transfer and all receive the same result.
//!
//! Results are delivered through callbacks, which all run on a single dedicated thread, one
//! after the other. Callbacks waiting for the same fetch are invoked in the order they were
//! registered.
//!
//! Any caller can withdraw its interest via its [`CancelHandle`], without affecting other
//! callers. Once the last caller of a fetch withdraws, the transfer is aborted.

use std::io;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::caching::{FetchError, FetchResult, ImageCaches, ResourceKey, SharedImage};
use crate::config::{Config, ThumbnailConfig};
use crate::download::Transport;
use crate::utils::defer::defer;

mod callbacks;
mod handle;
mod registry;
mod state;
mod worker;


pub use callbacks::ResultCallback;
pub use handle::CancelHandle;
pub use state::FetchStatus;

use callbacks::CallbackQueue;
use registry::{Registry, RegistryMessage};
use state::Waiter;
use worker::FetchWorker;

/// Fetches images as thumbnails, deduplicating concurrent requests.
///
/// Every instance is fully independent, with its own registry and callback thread. Two
/// instances sharing a cache directory will however see each others files.
#[derive(Debug)]
pub struct ImageFetcher {
    caches: ImageCaches,
    registry: mpsc::UnboundedSender<RegistryMessage>,
    callbacks: CallbackQueue,
    runtime: Handle,
}

impl ImageFetcher {
    /// Creates a fetcher from the given config.
    ///
    /// Transfers, and the processing of their results, are spawned on `runtime`.
    pub fn new(config: &Config, transport: Arc<dyn Transport>, runtime: Handle) -> io::Result<Self> {
        let caches = ImageCaches::from_config(config)?;
        Self::with_caches(
            caches,
            transport,
            config.thumbnail,
            config.max_concurrent_transfers,
            runtime,
        )
    }

    pub fn with_caches(
        caches: ImageCaches,
        transport: Arc<dyn Transport>,
        thumbnail: ThumbnailConfig,
        max_concurrent_transfers: Option<usize>,
        runtime: Handle,
    ) -> io::Result<Self> {
        let callbacks = CallbackQueue::spawn()?;
        let worker = Arc::new(FetchWorker::new(
            transport,
            caches.clone(),
            thumbnail,
            max_concurrent_transfers,
            runtime.clone(),
        ));
        let registry = Registry::spawn(caches.clone(), worker, callbacks.clone(), &runtime);

        Ok(Self {
            caches,
            registry,
            callbacks,
            runtime,
        })
    }

    pub fn caches(&self) -> &ImageCaches {
        &self.caches
    }

    /// Requests the thumbnail of the image at `key`.
    ///
    /// This never blocks on the network, but does check the caches on the calling thread.
    /// `on_result` is eventually invoked exactly once with either the thumbnail or an error,
    /// unless the request is cancelled before the fetch finishes.
    pub fn fetch<F>(&self, key: &str, on_result: F) -> CancelHandle
    where
        F: FnOnce(FetchResult) + Send + 'static,
    {
        metric!(counter("fetch.access") += 1);
        let callback: ResultCallback = Box::new(on_result);

        let key = match parse_key(key) {
            Ok(key) => key,
            Err(err) => {
                self.callbacks.deliver(callback, Err(err));
                return CancelHandle::resolved();
            }
        };

        if let Some(image) = self.caches.lookup(&key) {
            self.callbacks.deliver(callback, Ok(image));
            return CancelHandle::resolved();
        }

        self.attach(key, callback)
    }

    /// Fetches the thumbnail of the image at `key`.
    ///
    /// Unlike [`fetch`](Self::fetch), the disk tier is probed on a blocking thread.
    /// Dropping the returned future cancels the request.
    pub async fn fetch_image(&self, key: &str) -> FetchResult {
        metric!(counter("fetch.access") += 1);
        let key = parse_key(key)?;

        let caches = self.caches.clone();
        let lookup_key = key.clone();
        let cached = self
            .runtime
            .spawn_blocking(move || caches.lookup(&lookup_key))
            .await;
        if let Ok(Some(image)) = cached {
            return Ok(image);
        }

        let (tx, rx) = oneshot::channel();
        let handle = self.attach(
            key,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );

        let guard = defer(move || handle.cancel());
        let result = rx.await;
        guard.disarm();

        result.unwrap_or_else(|_| Err(FetchError::TransportFailure("fetcher was shut down".into())))
    }

    /// Hands a cache miss to the registry.
    fn attach(&self, key: ResourceKey, callback: ResultCallback) -> CancelHandle {
        let id = Uuid::new_v4();
        let message = RegistryMessage::Attach {
            key: key.clone(),
            waiter: Waiter { id, callback },
        };
        if let Err(mpsc::error::SendError(message)) = self.registry.send(message) {
            if let RegistryMessage::Attach { waiter, .. } = message {
                let err = FetchError::TransportFailure("fetcher was shut down".into());
                self.callbacks.deliver(waiter.callback, Err(err));
            }
            return CancelHandle::resolved();
        }

        CancelHandle::pending(id, key, self.registry.clone())
    }

    /// Loads the full resolution image of `key` from the disk cache.
    ///
    /// This only returns images that were previously fetched, and never starts a transfer.
    pub fn cached_original(&self, key: &str) -> Option<SharedImage> {
        let key = ResourceKey::parse(key).ok()?;
        self.caches.load_original(&key)
    }

    /// Lists the keys of all fetches currently in flight.
    pub async fn in_flight(&self) -> Vec<ResourceKey> {
        let (reply, rx) = oneshot::channel();
        if self.registry.send(RegistryMessage::Inspect { reply }).is_err() {
            return vec![];
        }
        rx.await.unwrap_or_default()
    }
}

fn parse_key(key: &str) -> Result<ResourceKey, FetchError> {
    ResourceKey::parse(key).inspect_err(|err| {
        tracing::debug!("Rejecting request: {}", err);
        metric!(counter("fetch.failure") += 1, "kind" => err.kind());
    })
}
