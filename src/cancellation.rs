//! Cooperative cancellation token.
//!
//! Hand-rolled rather than pulled from `tokio_util`, to avoid adding a
//! dependency with only one caller. Built the same way as every other
//! notification channel in this crate: a [`Broadcast`] plus a one-shot latch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::broadcast::{Broadcast, ListenerGuard};

#[derive(Clone)]
pub struct CancellationSignal(Arc<Inner>);

struct Inner {
    aborted: AtomicBool,
    broadcast: Broadcast,
}

impl Default for CancellationSignal {
    fn default() -> Self { Self::new() }
}

impl CancellationSignal {
    pub fn new() -> Self { Self(Arc::new(Inner { aborted: AtomicBool::new(false), broadcast: Broadcast::new() })) }

    /// True once [`fire`](Self::fire) has been called.
    pub fn aborted(&self) -> bool { self.0.aborted.load(Ordering::Acquire) }

    /// Fires exactly once (subsequent calls are no-ops): superseded by a
    /// newer epoch, the owning flow was disposed, or the record was skipped.
    pub fn fire(&self) {
        if !self.0.aborted.swap(true, Ordering::AcqRel) {
            self.0.broadcast.send();
        }
    }

    pub fn on_fire<L: Fn() + Send + Sync + 'static>(&self, listener: L) -> ListenerGuard {
        self.0.broadcast.reference().listen(listener)
    }

    /// Resolves once [`fire`](Self::fire) has been (or already was) called.
    /// Used by the `debounce`/`throttle` utilities to race a sleep against
    /// being superseded.
    pub async fn cancelled(&self) {
        if self.aborted() {
            return;
        }
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        let _guard = self.on_fire(move || {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(());
            }
        });
        if self.aborted() {
            return;
        }
        let _ = rx.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool as Flag;

    #[test]
    fn fires_once_and_notifies() {
        let sig = CancellationSignal::new();
        assert!(!sig.aborted());

        let fired = Arc::new(Flag::new(false));
        let fired2 = fired.clone();
        let _guard = sig.on_fire(move || fired2.store(true, Ordering::SeqCst));

        sig.fire();
        assert!(sig.aborted());
        assert!(fired.load(Ordering::SeqCst));

        fired.store(false, Ordering::SeqCst);
        sig.fire(); // idempotent: no second notification
        assert!(!fired.load(Ordering::SeqCst));
    }
}
