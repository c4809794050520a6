use tokio::sync::mpsc;
use uuid::Uuid;

use crate::caching::ResourceKey;

use super::registry::RegistryMessage;

/// A caller's handle on one outstanding [`fetch`](super::ImageFetcher::fetch).
///
/// Cancelling withdraws only this caller's interest, other callers waiting for the same image
/// are unaffected. The transfer itself is only aborted once nobody is waiting for it anymore.
#[derive(Clone)]
pub struct CancelHandle {
    id: Uuid,
    target: Option<CancelTarget>,
}

#[derive(Clone)]
struct CancelTarget {
    key: ResourceKey,
    registry: mpsc::UnboundedSender<RegistryMessage>,
}

impl CancelHandle {
    /// A handle for a request that was resolved right away, cancelling it does nothing.
    pub(super) fn resolved() -> Self {
        Self {
            id: Uuid::new_v4(),
            target: None,
        }
    }

    pub(super) fn pending(
        id: Uuid,
        key: ResourceKey,
        registry: mpsc::UnboundedSender<RegistryMessage>,
    ) -> Self {
        Self {
            id,
            target: Some(CancelTarget { key, registry }),
        }
    }

    /// The unique id of this request.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The key this request is waiting for, or `None` if it was resolved right away.
    pub fn key(&self) -> Option<&ResourceKey> {
        self.target.as_ref().map(|target| &target.key)
    }

    /// Withdraws interest in the result.
    ///
    /// The callback will not be invoked if the cancellation reaches the registry before the
    /// fetch finishes. Otherwise, and when cancelling more than once, this does nothing.
    pub fn cancel(&self) {
        let Some(target) = &self.target else {
            return;
        };
        let _ = target.registry.send(RegistryMessage::Cancel {
            key: target.key.clone(),
            id: self.id,
        });
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("id", &self.id)
            .field("key", &self.key())
            .finish()
    }
}
