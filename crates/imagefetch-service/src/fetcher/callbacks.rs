use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};

use tokio::sync::mpsc;

use crate::caching::FetchResult;

/// The callback a caller hands to [`ImageFetcher::fetch`](super::ImageFetcher::fetch).
pub type ResultCallback = Box<dyn FnOnce(FetchResult) + Send + 'static>;

struct Delivery {
    callback: ResultCallback,
    result: FetchResult,
}

impl Delivery {
    fn run(self) {
        let Delivery { callback, result } = self;
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || callback(result))) {
            tracing::error!("Result callback panicked: {}", panic_message(&*payload));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "<non-string panic payload>"
    }
}

/// The single context all result callbacks run on.
///
/// Callbacks are invoked one at a time on a dedicated thread, strictly in the order they were
/// queued. The thread exits once every [`CallbackQueue`] handle is dropped and the queue is
/// drained.
#[derive(Debug, Clone)]
pub(super) struct CallbackQueue {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl CallbackQueue {
    pub fn spawn() -> io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();

        std::thread::Builder::new()
            .name("imagefetch-callbacks".into())
            .spawn(move || {
                while let Some(delivery) = rx.blocking_recv() {
                    delivery.run();
                }
                tracing::trace!("Callback queue shut down");
            })?;

        Ok(Self { tx })
    }

    /// Queues `callback` to be invoked with `result`.
    pub fn deliver(&self, callback: ResultCallback, result: FetchResult) {
        if self.tx.send(Delivery { callback, result }).is_err() {
            tracing::warn!("Callback queue is gone, dropping result");
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}
