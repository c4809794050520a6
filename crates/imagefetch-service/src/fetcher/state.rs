use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::caching::{FetchResult, ResourceKey};

use super::callbacks::{CallbackQueue, ResultCallback};

/// The lifecycle of a single fetch.
///
/// ```text
/// Pending ──> Running ──> Completed
///    │           ├──────> Failed
///    └───────────┴──────> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// Registered, but the transfer has not been dispatched yet.
    Pending,
    /// The transfer is running on a worker.
    Running,
    /// The thumbnail was delivered to all waiters.
    Completed,
    /// The failure was delivered to all waiters.
    Failed,
    /// All waiters withdrew before the transfer finished.
    Cancelled,
}

/// One caller's interest in a fetch.
pub(super) struct Waiter {
    pub id: Uuid,
    pub callback: ResultCallback,
}

/// Cancels the transfer it belongs to when dropped.
#[derive(Debug)]
pub(super) struct TransferHandle {
    token: CancellationToken,
}

impl TransferHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

impl Drop for TransferHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// The in-flight fetch of one [`ResourceKey`] along with everybody waiting for it.
///
/// Owned exclusively by the registry.
pub(super) struct FetchState {
    key: ResourceKey,
    /// Tells completions of this fetch apart from an older fetch of the same key.
    fetch_id: u64,
    status: FetchStatus,
    /// Ordered by registration.
    waiters: Vec<Waiter>,
    transfer: Option<TransferHandle>,
}

impl FetchState {
    pub fn new(key: ResourceKey, fetch_id: u64, waiter: Waiter) -> Self {
        Self {
            key,
            fetch_id,
            status: FetchStatus::Pending,
            waiters: vec![waiter],
            transfer: None,
        }
    }

    pub fn fetch_id(&self) -> u64 {
        self.fetch_id
    }

    pub fn status(&self) -> FetchStatus {
        self.status
    }

    pub fn start(&mut self, transfer: TransferHandle) {
        debug_assert_eq!(self.status, FetchStatus::Pending);
        self.transfer = Some(transfer);
        self.status = FetchStatus::Running;
    }

    pub fn attach(&mut self, waiter: Waiter) {
        debug_assert!(self.waiters.iter().all(|w| w.id != waiter.id));
        self.waiters.push(waiter);
    }

    /// Removes the waiter with the given `id`, returning whether it was found.
    pub fn detach(&mut self, id: Uuid) -> bool {
        match self.waiters.iter().position(|w| w.id == id) {
            Some(idx) => {
                self.waiters.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn has_waiters(&self) -> bool {
        !self.waiters.is_empty()
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// Aborts the transfer, if it is still running.
    pub fn cancel(mut self) -> FetchStatus {
        self.transfer.take();
        self.status = FetchStatus::Cancelled;
        tracing::debug!("Cancelled fetch of `{}`", self.key);
        self.status
    }

    /// Fans `result` out to all waiters, in registration order.
    pub fn complete(mut self, result: FetchResult, callbacks: &CallbackQueue) -> FetchStatus {
        self.status = match result {
            Ok(_) => FetchStatus::Completed,
            Err(_) => FetchStatus::Failed,
        };

        tracing::debug!(
            "Fetch of `{}` {:?}, notifying {} waiters",
            self.key,
            self.status,
            self.waiters.len()
        );
        for waiter in self.waiters.drain(..) {
            callbacks.deliver(waiter.callback, result.clone());
        }

        self.status
    }
}

impl std::fmt::Debug for FetchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchState")
            .field("key", &self.key)
            .field("fetch_id", &self.fetch_id)
            .field("status", &self.status)
            .field("waiters", &self.waiters.len())
            .finish()
    }
}
