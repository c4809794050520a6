use std::collections::HashMap;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::caching::{FetchError, FetchResult, ImageCaches, ResourceKey};

use super::callbacks::CallbackQueue;
use super::state::{FetchState, FetchStatus, Waiter};
use super::worker::FetchWorker;

/// Everything that reads or mutates the registry goes through one of these.
pub(super) enum RegistryMessage {
    /// A cache miss, waiting for `key`.
    Attach { key: ResourceKey, waiter: Waiter },
    /// A caller withdrawing its interest in `key`.
    Cancel { key: ResourceKey, id: Uuid },
    /// A worker reporting the outcome of a transfer.
    Finished {
        key: ResourceKey,
        fetch_id: u64,
        result: FetchResult,
    },
    /// Lists the keys of all fetches in flight.
    Inspect { reply: oneshot::Sender<Vec<ResourceKey>> },
}

/// The dedup registry, guaranteeing at most one fetch per key.
///
/// This runs as a single task owning all [`FetchState`]s, so the registry never needs a lock.
/// Requests and cancellations are only ever sent to it and never wait for it.
pub(super) struct Registry {
    fetches: HashMap<ResourceKey, FetchState>,
    next_fetch_id: u64,
    caches: ImageCaches,
    worker: Arc<FetchWorker>,
    callbacks: CallbackQueue,
    /// Handed to spawned transfers so they can report back.
    ///
    /// This is weak so that the registry shuts down once all of its users are gone.
    sender: mpsc::WeakUnboundedSender<RegistryMessage>,
}

impl Registry {
    /// Spawns the registry on `runtime`, returning the channel to talk to it.
    pub fn spawn(
        caches: ImageCaches,
        worker: Arc<FetchWorker>,
        callbacks: CallbackQueue,
        runtime: &Handle,
    ) -> mpsc::UnboundedSender<RegistryMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Self::new(caches, worker, callbacks, tx.downgrade());
        runtime.spawn(registry.run(rx));
        tx
    }

    fn new(
        caches: ImageCaches,
        worker: Arc<FetchWorker>,
        callbacks: CallbackQueue,
        sender: mpsc::WeakUnboundedSender<RegistryMessage>,
    ) -> Self {
        Self {
            fetches: HashMap::new(),
            next_fetch_id: 0,
            caches,
            worker,
            callbacks,
            sender,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RegistryMessage>) {
        while let Some(message) = rx.recv().await {
            self.handle(message);
        }

        for (key, state) in self.fetches.drain() {
            tracing::debug!("Registry shutting down, failing fetch of `{}`", key);
            let err = FetchError::TransportFailure("fetcher was shut down".into());
            state.complete(Err(err), &self.callbacks);
        }
    }

    fn handle(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::Attach { key, waiter } => self.attach(key, waiter),
            RegistryMessage::Cancel { key, id } => self.cancel(&key, id),
            RegistryMessage::Finished {
                key,
                fetch_id,
                result,
            } => self.finish(&key, fetch_id, result),
            RegistryMessage::Inspect { reply } => {
                let _ = reply.send(self.fetches.keys().cloned().collect());
            }
        }
    }

    fn attach(&mut self, key: ResourceKey, waiter: Waiter) {
        if let Some(state) = self.fetches.get_mut(&key) {
            state.attach(waiter);
            tracing::debug!(
                "Coalescing request for `{}`, {} waiters",
                key,
                state.waiter_count()
            );
            metric!(counter("fetch.coalesced") += 1);
            return;
        }

        // A fetch of this key may have completed after the caller missed the cache.
        if let Some(image) = self.caches.memory().get(&key) {
            tracing::trace!("Memory cache hit for `{}` after registry miss", key);
            metric!(counter("caches.memory.hit") += 1);
            self.callbacks.deliver(waiter.callback, Ok(image));
            return;
        }

        let Some(sender) = self.sender.upgrade() else {
            let err = FetchError::TransportFailure("fetcher was shut down".into());
            self.callbacks.deliver(waiter.callback, Err(err));
            return;
        };

        self.next_fetch_id += 1;
        let fetch_id = self.next_fetch_id;

        let mut state = FetchState::new(key.clone(), fetch_id, waiter);
        state.start(self.worker.spawn(key.clone(), fetch_id, sender));
        tracing::debug!("Started fetch #{} of `{}`", fetch_id, key);

        self.fetches.insert(key, state);
    }

    fn cancel(&mut self, key: &ResourceKey, id: Uuid) {
        let Some(state) = self.fetches.get_mut(key) else {
            tracing::trace!("Nothing to cancel for `{}`", key);
            return;
        };
        if !state.detach(id) {
            return;
        }
        if state.has_waiters() {
            tracing::debug!(
                "Waiter withdrew from `{}`, {} remaining",
                key,
                state.waiter_count()
            );
            return;
        }

        if let Some(state) = self.fetches.remove(key) {
            state.cancel();
        }
    }

    fn finish(&mut self, key: &ResourceKey, fetch_id: u64, result: FetchResult) {
        let Some(state) = self.fetches.get(key) else {
            tracing::trace!("Fetch of `{}` finished after it was cancelled", key);
            return;
        };
        if state.fetch_id() != fetch_id {
            tracing::trace!("Ignoring stale completion #{} of `{}`", fetch_id, key);
            return;
        }

        if let Err(err) = &result {
            tracing::debug!("Fetch of `{}` failed: {}", key, err);
            metric!(counter("fetch.failure") += 1, "kind" => err.kind());
        }

        if let Some(state) = self.fetches.remove(key) {
            debug_assert_eq!(state.status(), FetchStatus::Running);
            state.complete(result, &self.callbacks);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use futures::future::BoxFuture;

    use crate::caching::{MemoryCache, SharedImage};
    use crate::config::ThumbnailConfig;
    use crate::download::Transport;

    use super::*;

    const KEY: &str = "https://x/a.png";

    /// Transfers that never finish, so only the test sends `Finished`.
    struct Stalled;

    impl Transport for Stalled {
        fn transfer<'a>(
            &'a self,
            _key: &'a ResourceKey,
        ) -> BoxFuture<'a, Result<Bytes, FetchError>> {
            Box::pin(futures::future::pending())
        }
    }

    type Results = mpsc::UnboundedReceiver<(&'static str, FetchResult)>;

    fn waiter(
        tx: &mpsc::UnboundedSender<(&'static str, FetchResult)>,
        label: &'static str,
    ) -> Waiter {
        let tx = tx.clone();
        Waiter {
            id: Uuid::new_v4(),
            callback: Box::new(move |result| {
                let _ = tx.send((label, result));
            }),
        }
    }

    fn registry(sender: &mpsc::UnboundedSender<RegistryMessage>) -> Registry {
        let caches = ImageCaches::new(MemoryCache::new(1024 * 1024), None);
        let worker = Arc::new(FetchWorker::new(
            Arc::new(Stalled),
            caches.clone(),
            ThumbnailConfig::default(),
            None,
            Handle::current(),
        ));
        let callbacks = CallbackQueue::spawn().unwrap();
        Registry::new(caches, worker, callbacks, sender.downgrade())
    }

    fn image() -> SharedImage {
        Arc::new(imagefetch_test::image(50, 25))
    }

    async fn next_result(rx: &mut Results) -> (&'static str, FetchResult) {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a result")
            .expect("result channel closed")
    }

    async fn assert_no_result(rx: &mut Results) {
        let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_err(), "unexpected result: {result:?}");
    }

    #[tokio::test]
    async fn test_stale_completion_is_ignored() {
        imagefetch_test::setup();
        let (sender, _rx) = mpsc::unbounded_channel();
        let mut registry = registry(&sender);
        let (tx, mut results) = mpsc::unbounded_channel();
        let key = ResourceKey::parse(KEY).unwrap();

        let first = waiter(&tx, "first");
        let first_id = first.id;
        registry.handle(RegistryMessage::Attach {
            key: key.clone(),
            waiter: first,
        });
        registry.handle(RegistryMessage::Cancel {
            key: key.clone(),
            id: first_id,
        });
        assert!(registry.fetches.is_empty());

        registry.handle(RegistryMessage::Attach {
            key: key.clone(),
            waiter: waiter(&tx, "second"),
        });
        assert_eq!(registry.fetches[&key].fetch_id(), 2);

        // the cancelled fetch #1 reports back late
        registry.handle(RegistryMessage::Finished {
            key: key.clone(),
            fetch_id: 1,
            result: Ok(image()),
        });

        let state = &registry.fetches[&key];
        assert_eq!(state.fetch_id(), 2);
        assert_eq!(state.status(), FetchStatus::Running);
        assert_eq!(state.waiter_count(), 1);
        assert_no_result(&mut results).await;

        registry.handle(RegistryMessage::Finished {
            key: key.clone(),
            fetch_id: 2,
            result: Ok(image()),
        });
        assert!(registry.fetches.is_empty());

        let (label, result) = next_result(&mut results).await;
        assert_eq!(label, "second");
        assert!(result.is_ok());
        assert_no_result(&mut results).await;
    }

    #[tokio::test]
    async fn test_attach_after_completion_hits_memory() {
        imagefetch_test::setup();
        let (sender, _rx) = mpsc::unbounded_channel();
        let mut registry = registry(&sender);
        let (tx, mut results) = mpsc::unbounded_channel();
        let key = ResourceKey::parse(KEY).unwrap();

        // the caller missed the cache right before another fetch stored this
        let cached = image();
        registry.caches.memory().insert(key.clone(), cached.clone());

        registry.handle(RegistryMessage::Attach {
            key: key.clone(),
            waiter: waiter(&tx, "late"),
        });
        assert!(registry.fetches.is_empty());
        assert_eq!(registry.next_fetch_id, 0);

        let (label, result) = next_result(&mut results).await;
        assert_eq!(label, "late");
        assert!(Arc::ptr_eq(&result.unwrap(), &cached));
    }
}
