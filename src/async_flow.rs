//! The observable state of an asynchronous flow.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::broadcast::ListenerGuard;
use crate::error::FlowError;
use crate::flow::Signal;

/// Tagged union mirroring a promise's three observable phases, plus the
/// `data` carried over from the previous settlement while a new computation
/// is in flight.
#[derive(Debug, Clone)]
pub enum AsyncFlowState<T> {
    Pending { data: Option<T> },
    Success { data: T },
    Error { error: FlowError, data: Option<T> },
}

impl<T> AsyncFlowState<T> {
    pub fn data(&self) -> Option<&T> {
        match self {
            AsyncFlowState::Pending { data } => data.as_ref(),
            AsyncFlowState::Success { data } => Some(data),
            AsyncFlowState::Error { data, .. } => data.as_ref(),
        }
    }

    pub fn is_pending(&self) -> bool { matches!(self, AsyncFlowState::Pending { .. }) }
    pub fn is_success(&self) -> bool { matches!(self, AsyncFlowState::Success { .. }) }
    pub fn is_error(&self) -> bool { matches!(self, AsyncFlowState::Error { .. }) }

    pub(crate) fn map<U>(self, f: impl Fn(T) -> U) -> AsyncFlowState<U> {
        match self {
            AsyncFlowState::Pending { data } => AsyncFlowState::Pending { data: data.map(&f) },
            AsyncFlowState::Success { data } => AsyncFlowState::Success { data: f(data) },
            AsyncFlowState::Error { error, data } => AsyncFlowState::Error { error, data: data.map(&f) },
        }
    }
}

/// Read contract for asynchronous flows.
///
/// `D` is the data type exposed to readers — for [`AsyncComputed<T>`](crate::async_computed::AsyncComputed)
/// this is `Arc<T>`, the same reference-identity-preserving wrapper
/// [`Computed<T>`](crate::computed::Computed) uses for its synchronous
/// counterpart.
pub trait AsyncFlowRead<D: Clone + Send + Sync + 'static>: Signal {
    /// Current state without forcing a new computation.
    fn state(&self) -> AsyncFlowState<D>;

    /// A cached, shareable future that resolves once the *current*
    /// authoritative value settles. Concurrent
    /// callers observing the same pending period get the same future.
    fn as_promise(&self) -> BoxFuture<'static, Result<D, FlowError>>;
}

/// RAII subscription handle returned by [`subscribe_async`]; dropping it
/// unsubscribes.
pub struct AsyncSubscription(#[allow(dead_code)] ListenerGuard);

/// The asynchronous analogue of [`subscribe`](crate::flow::subscribe):
/// subscribes to an asynchronous flow's change notifications, re-reading its
/// `state()` on every fire and handing the new state to `listener`.
///
/// Unlike the synchronous `subscribe`, the listener always receives a value
/// (there is no error to drop) — failure is represented as `AsyncFlowState::Error`.
pub fn subscribe_async<D, F>(flow: &F, listener: impl Fn(AsyncFlowState<D>) + Send + Sync + 'static) -> AsyncSubscription
where
    D: Clone + Send + Sync + 'static,
    F: AsyncFlowRead<D> + Signal + Clone + Send + Sync + 'static,
{
    let inner = flow.clone();
    let guard = flow.listen(Arc::new(move || listener(inner.state())));
    AsyncSubscription(guard)
}
