use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use crate::caching::{FetchError, FetchResult, ImageCaches, ResourceKey};
use crate::config::ThumbnailConfig;
use crate::download::Transport;
use crate::{codec, transform};

use super::registry::RegistryMessage;
use super::state::TransferHandle;

/// Runs transfers, and turns their payloads into cached thumbnails.
pub(super) struct FetchWorker {
    transport: Arc<dyn Transport>,
    caches: ImageCaches,
    thumbnail: ThumbnailConfig,
    /// Bounds the number of concurrently running transfers.
    limit: Option<Arc<Semaphore>>,
    runtime: Handle,
}

impl FetchWorker {
    pub fn new(
        transport: Arc<dyn Transport>,
        caches: ImageCaches,
        thumbnail: ThumbnailConfig,
        max_concurrent_transfers: Option<usize>,
        runtime: Handle,
    ) -> Self {
        Self {
            transport,
            caches,
            thumbnail,
            limit: max_concurrent_transfers.map(|permits| Arc::new(Semaphore::new(permits))),
            runtime,
        }
    }

    /// Spawns the fetch of `key` and reports its outcome back to the registry.
    ///
    /// Dropping the returned handle cancels the transfer. Once the payload was transferred,
    /// decoding and writing to the caches run to completion regardless.
    pub fn spawn(
        self: &Arc<Self>,
        key: ResourceKey,
        fetch_id: u64,
        registry: mpsc::UnboundedSender<RegistryMessage>,
    ) -> TransferHandle {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let worker = Arc::clone(self);

        self.runtime.spawn(async move {
            let result = tokio::select! {
                biased;
                _ = cancelled.cancelled() => {
                    tracing::debug!("Transfer of `{}` was cancelled", key);
                    metric!(counter("fetch.cancelled") += 1);
                    return;
                }
                result = worker.run(&key) => result,
            };

            let _ = registry.send(RegistryMessage::Finished {
                key,
                fetch_id,
                result,
            });
        });

        TransferHandle::new(token)
    }

    async fn run(&self, key: &ResourceKey) -> FetchResult {
        let _permit = match &self.limit {
            Some(limit) => Some(
                Arc::clone(limit)
                    .acquire_owned()
                    .await
                    .map_err(|_| FetchError::TransportFailure("transfer pool is closed".into()))?,
            ),
            None => None,
        };

        metric!(counter("fetch.transfer") += 1);
        let data = self.transport.transfer(key).await?;

        let caches = self.caches.clone();
        let key = key.clone();
        let thumbnail = self.thumbnail;
        tokio::task::spawn_blocking(move || -> FetchResult {
            let original = codec::decode(&data)?;
            let image = transform::make_thumbnail(&original, thumbnail.width, thumbnail.height);
            let image = Arc::new(image);
            caches.store(&key, &original, &image);
            Ok(image)
        })
        .await
        .map_err(|err| FetchError::DecodeFailure(format!("processing aborted: {err}")))?
    }
}
