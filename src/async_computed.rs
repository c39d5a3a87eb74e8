//! Asynchronous computed flow.
//!
//! Reuses the same mark-and-sweep subscription bookkeeping as
//! [`Computed<T>`](crate::computed::Computed) to decide which upstream flows
//! re-trigger a recomputation. On top of that, an epoch counter reconciles
//! concurrently in-flight computations: only the latest-started epoch (or,
//! failing that, whichever unsuperseded epoch settles) becomes authoritative.
//! `as_promise`'s cached `Shared` future means concurrent callers observing
//! the same pending period await the same future rather than each starting
//! their own.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::async_ctx::AsyncCtx;
use crate::async_flow::{AsyncFlowRead, AsyncFlowState};
use crate::broadcast::{Broadcast, BroadcastId, Listener, ListenerGuard};
use crate::cancellation::CancellationSignal;
use crate::context::Tracker;
use crate::error::FlowError;
use crate::flow::Signal;
use crate::async_record::EpochCounter;
use crate::record::SourceSet;

pub struct AsyncComputedOptions<T> {
    pub equals: Option<Arc<dyn Fn(&T, &T) -> bool + Send + Sync>>,
    pub initial_value: Option<AsyncFlowState<T>>,
}

impl<T> Default for AsyncComputedOptions<T> {
    fn default() -> Self { Self { equals: None, initial_value: None } }
}

struct SubscriptionEntry {
    _guard: ListenerGuard,
    marked_for_removal: bool,
}

struct CachedPromise<T> {
    /// The `authoritative_epoch` this promise was created for (terminal
    /// case), or [`PENDING_EPOCH_FLOOR`] while the pending period that
    /// produced it is still ongoing — reused verbatim until either a new
    /// terminal settlement lands or a fresh pending period begins after one.
    epoch_floor: u64,
    future: Shared<BoxFuture<'static, Result<Arc<T>, FlowError>>>,
}

struct Inner<T> {
    getter: Box<dyn Fn(AsyncCtx) -> BoxFuture<'static, Result<T, FlowError>> + Send + Sync>,
    equals: Option<Arc<dyn Fn(&T, &T) -> bool + Send + Sync>>,
    state: RwLock<AsyncFlowState<Arc<T>>>,
    epochs: EpochCounter,
    /// Epoch of the record currently installed as the authoritative
    /// success/error (0 = none has settled yet).
    authoritative_epoch: AtomicU64,
    inflight_signal: StdMutex<Option<CancellationSignal>>,
    entries: RwLock<HashMap<BroadcastId, SubscriptionEntry>>,
    broadcast: Broadcast,
    subscriber_count: AtomicUsize,
    cached_promise: RwLock<Option<CachedPromise<T>>>,
    started: AtomicBool,
}

pub struct AsyncComputed<T>(Arc<Inner<T>>);

impl<T> Clone for AsyncComputed<T> {
    fn clone(&self) -> Self { Self(Arc::clone(&self.0)) }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> AsyncComputed<T> {
    pub fn new<F, Fut>(getter: F) -> Self
    where
        F: Fn(AsyncCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FlowError>> + Send + 'static,
    {
        Self::with_options(getter, AsyncComputedOptions::default())
    }

    /// Identical driver to [`new`](Self::new) — the "stepped"/generator
    /// shape and the single-promise shape collapse onto the same
    /// per-poll dependency tracking.
    pub fn new_stepped<F, Fut>(getter: F) -> Self
    where
        F: Fn(AsyncCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FlowError>> + Send + 'static,
    {
        Self::new(getter)
    }

    pub fn with_options<F, Fut>(getter: F, options: AsyncComputedOptions<T>) -> Self
    where
        F: Fn(AsyncCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FlowError>> + Send + 'static,
    {
        let initial_state = options
            .initial_value
            .map(|s| s.map(Arc::new))
            .unwrap_or(AsyncFlowState::Pending { data: None });
        Self(Arc::new(Inner {
            getter: Box::new(move |ctx| Box::pin(getter(ctx)) as BoxFuture<'static, Result<T, FlowError>>),
            equals: options.equals,
            state: RwLock::new(initial_state),
            epochs: EpochCounter::new(),
            authoritative_epoch: AtomicU64::new(0),
            inflight_signal: StdMutex::new(None),
            entries: RwLock::new(HashMap::new()),
            broadcast: Broadcast::new(),
            subscriber_count: AtomicUsize::new(0),
            cached_promise: RwLock::new(None),
            started: AtomicBool::new(false),
        }))
    }

    fn ensure_started(&self) {
        if !self.0.started.swap(true, Ordering::AcqRel) {
            trigger_new_epoch(&self.0);
        }
    }

    /// Current state, starting the first computation on first access (spec
    /// §4.3, "construction is inert").
    pub fn snapshot(&self) -> AsyncFlowState<Arc<T>> {
        self.ensure_started();
        self.0.state.read().unwrap().clone()
    }

    /// A future resolving with the current authoritative value, or the next
    /// one if a computation is in flight.
    pub fn promise(&self) -> BoxFuture<'static, Result<Arc<T>, FlowError>> {
        self.ensure_started();
        promise_impl(&self.0)
    }
}

fn promise_impl<T: Clone + PartialEq + Send + Sync + 'static>(inner: &Arc<Inner<T>>) -> BoxFuture<'static, Result<Arc<T>, FlowError>> {
    {
        let state = inner.state.read().unwrap();
        match &*state {
            AsyncFlowState::Success { data } => {
                let epoch = inner.authoritative_epoch.load(Ordering::Acquire);
                let value = data.clone();
                return reuse_or_create_promise(inner, epoch, move || async move { Ok(value) }.boxed());
            }
            AsyncFlowState::Error { error, .. } => {
                let epoch = inner.authoritative_epoch.load(Ordering::Acquire);
                let err = error.clone();
                return reuse_or_create_promise(inner, epoch, move || async move { Err(err) }.boxed());
            }
            AsyncFlowState::Pending { .. } => {}
        }
    }
    // One shared pending-period promise, not one per epoch: a new epoch
    // starting while we're still pending must not allocate a fresh promise
    // (spec §4.3's `asPromise` contract) — only a terminal settlement does.
    let inner2 = Arc::clone(inner);
    reuse_or_create_promise(inner, PENDING_EPOCH_FLOOR, move || await_terminal(inner2).boxed())
}

/// Sentinel `epoch_floor` for the "still pending" cached promise, distinct
/// from any real epoch number (which start at 1) so it never collides with a
/// terminal promise's floor.
const PENDING_EPOCH_FLOOR: u64 = u64::MAX;

fn reuse_or_create_promise<T: Send + Sync + 'static>(
    inner: &Arc<Inner<T>>,
    epoch_floor: u64,
    make: impl FnOnce() -> BoxFuture<'static, Result<Arc<T>, FlowError>>,
) -> BoxFuture<'static, Result<Arc<T>, FlowError>> {
    let mut cached = inner.cached_promise.write().unwrap();
    if let Some(existing) = cached.as_ref() {
        if existing.epoch_floor == epoch_floor {
            return Box::pin(existing.future.clone());
        }
    }
    let shared = make().shared();
    *cached = Some(CachedPromise { epoch_floor, future: shared.clone() });
    Box::pin(shared)
}

async fn await_terminal<T: Clone + PartialEq + Send + Sync + 'static>(inner: Arc<Inner<T>>) -> Result<Arc<T>, FlowError> {
    loop {
        {
            let state = inner.state.read().unwrap();
            match &*state {
                AsyncFlowState::Success { data } => return Ok(data.clone()),
                AsyncFlowState::Error { error, .. } => return Err(error.clone()),
                AsyncFlowState::Pending { .. } => {}
            }
        }
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = StdMutex::new(Some(tx));
        let _guard = inner.broadcast.reference().listen(move || {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(());
            }
        });
        let _ = rx.await;
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> AsyncFlowRead<Arc<T>> for AsyncComputed<T> {
    fn state(&self) -> AsyncFlowState<Arc<T>> { self.snapshot() }
    fn as_promise(&self) -> BoxFuture<'static, Result<Arc<T>, FlowError>> { self.promise() }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Signal for AsyncComputed<T> {
    fn listen(&self, listener: Listener) -> ListenerGuard {
        // First subscriber always triggers a fresh epoch to capture live
        // dependencies. Starting it here too (rather than also calling
        // `ensure_started`) avoids firing two epochs back-to-back when
        // subscribing is the very first access.
        let was_zero = self.0.subscriber_count.fetch_add(1, Ordering::AcqRel) == 0;
        if was_zero {
            self.0.started.store(true, Ordering::Release);
            trigger_new_epoch(&self.0);
        } else {
            self.ensure_started();
        }
        let guard = self.0.broadcast.reference().listen(listener);
        let weak = Arc::downgrade(&self.0);
        guard.with_extra_drop(move || {
            if let Some(inner) = weak.upgrade() {
                if inner.subscriber_count.fetch_sub(1, Ordering::AcqRel) == 1 {
                    inner.entries.write().unwrap().clear();
                    if let Some(sig) = inner.inflight_signal.lock().unwrap().take() {
                        sig.fire();
                    }
                }
            }
        })
    }

    fn broadcast_id(&self) -> BroadcastId { self.0.broadcast.id() }

    /// Epoch of the current authoritative result — a coarser staleness
    /// signal than `Computed::version`'s value-identity counter, since
    /// async recomputation isn't forced synchronously from a read.
    fn version(&self) -> u64 { self.0.authoritative_epoch.load(Ordering::Acquire) }
}

/// Wraps the getter's future so the dependency tracker is active for the
/// duration of every individual `poll()` call, not just the first — a
/// getter that calls `ctx.watch` again after resuming from an `.await` still
/// has that read recorded.
///
/// No unsafe `Pin` projection is needed: `BoxFuture` is a `Pin<Box<dyn
/// Future + Send>>`, already pinned and always `Unpin` regardless of what
/// the boxed future itself requires.
struct TrackedPoll<T> {
    id: usize,
    inner: BoxFuture<'static, Result<T, FlowError>>,
}

impl<T> Future for TrackedPoll<T> {
    type Output = Result<T, FlowError>;
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.as_mut().get_mut();
        let _guard = Tracker::enter(this.id);
        this.inner.as_mut().poll(cx)
    }
}

fn trigger_new_epoch<T: Clone + PartialEq + Send + Sync + 'static>(inner: &Arc<Inner<T>>) {
    if let Some(prev) = inner.inflight_signal.lock().unwrap().take() {
        tracing::debug!(flow = inner.broadcast.id().as_usize(), "async computed: cancelling superseded epoch");
        prev.fire();
    }
    let epoch = inner.epochs.next();
    tracing::trace!(flow = inner.broadcast.id().as_usize(), epoch, "async computed: starting epoch");

    {
        let mut state = inner.state.write().unwrap();
        let data = state.data().cloned();
        *state = AsyncFlowState::Pending { data };
    }
    inner.broadcast.send();

    let my_signal = CancellationSignal::new();
    *inner.inflight_signal.lock().unwrap() = Some(my_signal.clone());

    let (ctx, sources_handle) = AsyncCtx::new(my_signal);
    let self_id = inner.broadcast.id().as_usize();
    // The getter's synchronous prefix (everything up to its first `.await`,
    // e.g. `lib.rs`'s `let current = ctx.watch(&price);` before the returned
    // `async move` block) runs right here, not inside `TrackedPoll::poll` —
    // it has to be tracked too, so a `Mut::set`/cyclic read during that
    // prefix still raises `SideEffect`/`Cycle` instead of silently slipping
    // past both detectors.
    let fut = {
        let _guard = Tracker::enter(self_id);
        (inner.getter)(ctx)
    };
    let tracked = TrackedPoll { id: self_id, inner: fut };

    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        let outcome = tracked.await;
        if let Some(inner) = weak.upgrade() {
            let sources = std::mem::take(&mut *sources_handle.lock().unwrap());
            settle(&inner, epoch, sources, outcome);
        }
    });
}

fn on_upstream_fire<T: Clone + PartialEq + Send + Sync + 'static>(inner: &Arc<Inner<T>>) {
    trigger_new_epoch(inner);
}

fn install_subscriptions<T: Clone + PartialEq + Send + Sync + 'static>(inner: &Arc<Inner<T>>, sources: SourceSet) {
    if inner.subscriber_count.load(Ordering::Acquire) == 0 {
        return;
    }
    {
        let mut entries = inner.entries.write().unwrap();
        for entry in entries.values_mut() {
            entry.marked_for_removal = true;
        }
    }
    for (id, entry) in sources.iter() {
        {
            let mut entries = inner.entries.write().unwrap();
            if let Some(existing) = entries.get_mut(id) {
                existing.marked_for_removal = false;
                continue;
            }
        }
        let weak = Arc::downgrade(inner);
        let signal = entry.signal.clone();
        let guard = signal.listen(Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                on_upstream_fire(&inner);
            }
        }));
        inner.entries.write().unwrap().insert(*id, SubscriptionEntry { _guard: guard, marked_for_removal: false });
    }
    inner.entries.write().unwrap().retain(|_, entry| !entry.marked_for_removal);
}

/// Reconciles one settled computation record against whatever is currently
/// authoritative.
///
/// `record_epoch > authoritative_epoch` is the single test covering both
/// reconciliation rules for non-abort outcomes: if `record_epoch` is the
/// latest-started epoch it's trivially greater than what's already
/// installed; if it's an *older*, still-in-flight-at-the-time record, the
/// condition only holds while nothing newer has settled yet — exactly the
/// "unless a later record already produced a result" carve-out.
fn settle<T: Clone + PartialEq + Send + Sync + 'static>(
    inner: &Arc<Inner<T>>,
    record_epoch: u64,
    sources: SourceSet,
    outcome: Result<T, FlowError>,
) {
    let latest_epoch = inner.epochs.current();
    let is_latest = record_epoch == latest_epoch;

    match outcome {
        Ok(value) => {
            let authoritative_epoch = inner.authoritative_epoch.load(Ordering::Acquire);
            if is_latest {
                let value_arc = {
                    let state = inner.state.read().unwrap();
                    match &*state {
                        AsyncFlowState::Success { data } => {
                            let same = match &inner.equals {
                                Some(eq) => eq(data, &value),
                                None => data.as_ref() == &value,
                            };
                            if same { data.clone() } else { Arc::new(value) }
                        }
                        _ => Arc::new(value),
                    }
                };
                *inner.state.write().unwrap() = AsyncFlowState::Success { data: value_arc };
                inner.authoritative_epoch.store(record_epoch, Ordering::Release);
                install_subscriptions(inner, sources);
                inner.broadcast.send();
            } else if record_epoch > authoritative_epoch {
                // An older record is still ahead of whatever last settled:
                // surface its progress as the pending snapshot, but leave it
                // to the still-outstanding latest record to become
                // authoritative.
                *inner.state.write().unwrap() = AsyncFlowState::Pending { data: Some(Arc::new(value)) };
                inner.broadcast.send();
            }
        }
        Err(err) if err.is_abort() => {
            // Aborted completions never change observable state, and per the
            // notification-economy rule a transition that leaves state
            // unchanged must not fire listeners.
            tracing::trace!(flow = inner.broadcast.id().as_usize(), epoch = record_epoch, "async computed: epoch aborted");
        }
        Err(err) => {
            let authoritative_epoch = inner.authoritative_epoch.load(Ordering::Acquire);
            if record_epoch > authoritative_epoch {
                tracing::warn!(flow = inner.broadcast.id().as_usize(), epoch = record_epoch, error = %err, "async computed: epoch settled with an error");
                let prev_data = inner.state.read().unwrap().data().cloned();
                *inner.state.write().unwrap() = AsyncFlowState::Error { error: err, data: prev_data };
                inner.authoritative_epoch.store(record_epoch, Ordering::Release);
                if is_latest {
                    install_subscriptions(inner, sources);
                }
                inner.broadcast.send();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutable::Mut;
    use std::sync::atomic::AtomicUsize as Counter;
    use std::time::Duration;

    #[tokio::test]
    async fn resolves_success_after_first_epoch() {
        let flow = AsyncComputed::new(|_ctx| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(42)
        });
        let value = flow.promise().await.unwrap();
        assert_eq!(*value, 42);
        assert!(flow.snapshot().is_success());
    }

    #[tokio::test]
    async fn dependency_change_starts_a_new_epoch() {
        let x = Mut::new(1);
        let reads = Arc::new(Counter::new(0));
        let reads2 = reads.clone();
        let xr = x.read();
        let flow = AsyncComputed::new(move |ctx| {
            let xr = xr.clone();
            let reads2 = reads2.clone();
            async move {
                reads2.fetch_add(1, Ordering::SeqCst);
                let v = ctx.watch(&xr)?;
                Ok(v * 10)
            }
        });

        assert_eq!(*flow.promise().await.unwrap(), 10);
        let _sub = crate::flow::subscribe(&flow, |_s: AsyncFlowState<Arc<i32>>| {});
        x.set(2).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*flow.promise().await.unwrap(), 20);
        assert!(reads.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn failing_getter_surfaces_as_error() {
        let flow: AsyncComputed<i32> =
            AsyncComputed::new(|_ctx| async move { Err(FlowError::computation_failure(std::io::Error::other("boom"))) });
        assert!(flow.promise().await.is_err());
        assert!(flow.snapshot().is_error());
    }

    #[tokio::test]
    async fn promise_cache_floor_is_stable_across_a_supersession_while_pending() {
        // A new epoch starting mid-pending must not allocate a fresh cached
        // promise (spec §4.3 `asPromise`): the floor stays the pending
        // sentinel, not the newly-started epoch's number.
        let x = Mut::new(0i32);
        let xr = x.read();
        let flow = AsyncComputed::new(move |ctx| {
            let xr = xr.clone();
            async move {
                let v = ctx.watch(&xr)?;
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(v)
            }
        });
        let _p1 = flow.promise();
        assert_eq!(flow.0.cached_promise.read().unwrap().as_ref().unwrap().epoch_floor, PENDING_EPOCH_FLOOR);

        x.set(1).unwrap(); // supersedes the in-flight epoch, still pending
        let _p2 = flow.promise();
        assert_eq!(flow.0.cached_promise.read().unwrap().as_ref().unwrap().epoch_floor, PENDING_EPOCH_FLOOR);

        assert_eq!(*flow.promise().await.unwrap(), 1);
        // Now that the pending period has ended, the next `promise()` call
        // sees a terminal state and refreshes the cached floor accordingly.
        let _p4 = flow.promise();
        let epoch = flow.0.cached_promise.read().unwrap().as_ref().unwrap().epoch_floor;
        assert_ne!(epoch, PENDING_EPOCH_FLOOR);
    }
}
