// Cancellation / Shutdown Token

use std::sync::Arc;
use tokio::sync::watch;

/// Why a run (or the daemon) was asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// Operator request or daemon shutdown
    Requested,
    /// The job lease could no longer be renewed
    LeaseLost,
}

/// Cooperative cancellation signal (run cancellation and daemon shutdown)
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<Option<CancelCause>>,
}

impl CancelToken {
    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// The first cause signalled, if any
    pub fn cause(&self) -> Option<CancelCause> {
        *self.rx.borrow()
    }

    /// Wait until cancellation is requested.
    ///
    /// If the sender is dropped without cancelling, this never resolves.
    pub async fn cancelled(&mut self) {
        loop {
            if self.rx.borrow_and_update().is_some() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Sending half of a `CancelToken`
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<Option<CancelCause>>>,
}

impl CancelHandle {
    /// Signal cancellation to every token clone
    pub fn cancel(&self) {
        self.cancel_with(CancelCause::Requested);
    }

    /// Signal cancellation with `cause`; the first cause sticks
    pub fn cancel_with(&self, cause: CancelCause) {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(cause);
            true
        });
    }
}

/// Create a cancellation channel
pub fn cancel_channel() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(None);
    (CancelHandle { tx: Arc::new(tx) }, CancelToken { rx })
}
