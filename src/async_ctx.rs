//! The getter-facing context for asynchronous computed flows.
//!
//! Unlike [`SyncCtx`](crate::ctx::SyncCtx), this context is moved *into* the
//! future it drives rather than borrowed for the duration of one call — the
//! getter's body keeps calling `watch`/`watch_async` across `.await` points,
//! so the source set it builds up has to be owned by (shared with) that
//! future, not borrowed from the caller's stack frame.

use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt};

use crate::async_flow::AsyncFlowRead;
use crate::cancellation::CancellationSignal;
use crate::context::Tracker;
use crate::error::FlowError;
use crate::flow::{DynSignal, FlowRead, Signal};
use crate::record::SourceSet;

pub struct AsyncCtx {
    sources: Arc<Mutex<SourceSet>>,
    /// Fires when this computation is superseded by a newer epoch, or its
    /// owning flow loses its last subscriber.
    pub signal: CancellationSignal,
}

impl AsyncCtx {
    /// Builds a context and hands back the (shared) source set it will
    /// populate, so the driver can read it once the future completes.
    pub(crate) fn new(signal: CancellationSignal) -> (Self, Arc<Mutex<SourceSet>>) {
        let sources = Arc::new(Mutex::new(SourceSet::default()));
        (Self { sources: sources.clone(), signal }, sources)
    }

    /// Synchronous read of any flow; same contract as [`SyncCtx::get`](crate::ctx::SyncCtx::get).
    pub fn watch<T, F>(&self, flow: &F) -> Result<T, FlowError>
    where
        T: Send + Sync + 'static,
        F: FlowRead<T> + Signal + Clone + Send + Sync + 'static,
    {
        let id = flow.broadcast_id();
        if Tracker::contains(id.as_usize()) {
            return Err(FlowError::Cycle { flow: id });
        }
        let result = flow.get_snapshot();
        self.sources.lock().unwrap().record(Arc::new(flow.clone()) as Arc<DynSignal>);
        result
    }

    /// Reads an async flow's current `data`: resolves immediately if
    /// `success`, awaits settlement if `pending`, rejects if `error` (spec
    /// §4.3). The source is tracked as a dependency immediately, regardless
    /// of how long the returned future takes to settle.
    pub fn watch_async<D, F>(&self, flow: &F) -> BoxFuture<'static, Result<D, FlowError>>
    where
        D: Clone + Send + Sync + 'static,
        F: AsyncFlowRead<D> + Signal + Clone + Send + Sync + 'static,
    {
        self.sources.lock().unwrap().record(Arc::new(flow.clone()) as Arc<DynSignal>);
        let flow = flow.clone();
        async move { flow.as_promise().await }.boxed()
    }

    /// Waits for all of `flows`, failing fast on the first error.
    pub fn watch_async_all<D, F>(&self, flows: &[F]) -> BoxFuture<'static, Result<Vec<D>, FlowError>>
    where
        D: Clone + Send + Sync + 'static,
        F: AsyncFlowRead<D> + Signal + Clone + Send + Sync + 'static,
    {
        let futs: Vec<_> = flows.iter().map(|f| self.watch_async(f)).collect();
        futures::future::try_join_all(futs).boxed()
    }

    /// Waits for all of `flows` regardless of outcome.
    pub fn watch_async_all_settled<D, F>(&self, flows: &[F]) -> BoxFuture<'static, Vec<Result<D, FlowError>>>
    where
        D: Clone + Send + Sync + 'static,
        F: AsyncFlowRead<D> + Signal + Clone + Send + Sync + 'static,
    {
        let futs: Vec<_> = flows.iter().map(|f| self.watch_async(f)).collect();
        futures::future::join_all(futs).boxed()
    }

    /// Resolves with whichever of `flows` settles first, successfully or not.
    pub fn watch_async_race<D, F>(&self, flows: &[F]) -> BoxFuture<'static, Result<D, FlowError>>
    where
        D: Clone + Send + Sync + 'static,
        F: AsyncFlowRead<D> + Signal + Clone + Send + Sync + 'static,
    {
        let futs: Vec<_> = flows.iter().map(|f| self.watch_async(f)).collect();
        async move {
            let (result, _index, _rest) = futures::future::select_all(futs).await;
            result
        }
        .boxed()
    }

    /// Resolves with the first *success* among `flows`, or the last error if
    /// they all fail.
    pub fn watch_async_any<D, F>(&self, flows: &[F]) -> BoxFuture<'static, Result<D, FlowError>>
    where
        D: Clone + Send + Sync + 'static,
        F: AsyncFlowRead<D> + Signal + Clone + Send + Sync + 'static,
    {
        let futs: Vec<_> = flows.iter().map(|f| self.watch_async(f)).collect();
        async move {
            match futures::future::select_ok(futs).await {
                Ok((value, _rest)) => Ok(value),
                Err(err) => Err(err),
            }
        }
        .boxed()
    }

    /// Abort this run; same contract as [`SyncCtx::skip`](crate::ctx::SyncCtx::skip).
    pub fn skip<R>(&self) -> Result<R, FlowError> { Err(FlowError::Abort { reason: Some("skip() called".to_string()) }) }
}
