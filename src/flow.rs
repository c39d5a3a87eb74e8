//! The flow contract — the interface every observable value,
//! source or computed, satisfies.

use std::sync::Arc;

use crate::broadcast::{BroadcastId, ListenerGuard, Listener};
use crate::error::FlowError;

/// Dyn-safe observation capability, independent of the value type.
///
/// Every flow — mutable source, synchronous computed, or asynchronous
/// computed — implements this so dependency capture can hold a homogeneous
/// collection of "things I've subscribed to" regardless of their value type.
pub trait Signal: Send + Sync {
    /// Subscribe to change notifications. Multiple flows may share a
    /// `broadcast_id` (e.g. a `Read` cloned from the same `Mut`); subscribers
    /// use that id to avoid double-subscribing.
    fn listen(&self, listener: Listener) -> ListenerGuard;

    /// Stable identity for deduplication; see [`Signal::listen`].
    fn broadcast_id(&self) -> BroadcastId;

    /// Monotonic counter bumped each time this flow's value changes. Used by
    /// computed flows to cheaply detect staleness without re-running
    /// equality on the value itself.
    fn version(&self) -> u64;
}

impl<T: Signal + ?Sized> Signal for Arc<T> {
    fn listen(&self, listener: Listener) -> ListenerGuard { (**self).listen(listener) }
    fn broadcast_id(&self) -> BroadcastId { (**self).broadcast_id() }
    fn version(&self) -> u64 { (**self).version() }
}

/// Type-erased handle onto any flow, used by computation records to remember
/// *which* flows they read without naming their value types.
pub(crate) type DynSignal = dyn Signal + Send + Sync;

/// A flow that can be read synchronously.
///
/// `get_snapshot` returns `Result` uniformly (rather than panicking) because
/// computed flows can be in an error state and sources that read *other* computed flows need to propagate
/// that without resorting to unwinding.
pub trait FlowRead<T>: Signal {
    fn get_snapshot(&self) -> Result<T, FlowError>;
}

impl<T, F: FlowRead<T> + ?Sized> FlowRead<T> for Arc<F> {
    fn get_snapshot(&self) -> Result<T, FlowError> { (**self).get_snapshot() }
}

/// RAII subscription handle returned by [`subscribe`]; dropping it unsubscribes.
pub struct Subscription(#[allow(dead_code)] ListenerGuard);

impl Subscription {
    pub(crate) fn new(guard: ListenerGuard) -> Self { Self(guard) }
}

/// Subscribe to a flow's change notifications, re-reading its snapshot on
/// every fire and handing the new value to `listener`.
///
/// Errors from `get_snapshot` are dropped rather than delivered to `listener`
/// — callers that care about the error state should call `get_snapshot`
/// themselves instead of (or alongside) subscribing.
pub fn subscribe<T, F>(flow: &F, listener: impl Fn(T) + Send + Sync + 'static) -> Subscription
where
    T: Clone + Send + Sync + 'static,
    F: FlowRead<T> + Clone + Send + Sync + 'static,
{
    let inner = flow.clone();
    let guard = flow.listen(Arc::new(move || {
        if let Ok(value) = inner.get_snapshot() {
            listener(value);
        }
    }));
    Subscription::new(guard)
}
