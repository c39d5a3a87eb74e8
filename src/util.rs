//! Small utility constructors.
//!
//! `debounce`/`throttle` are grounded in the edge-triggered timer shape used
//! by `revue`'s `Debouncer`/`Throttle` (other_examples:
//! `hawk90-revue/src/utils/debounce.rs`), adapted from a poll-driven API to
//! one built on `tokio::time` + a background task, since here the timer has
//! to drive a flow's subscribers rather than return a bool to a caller.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::async_computed::AsyncComputed;
use crate::async_ctx::AsyncCtx;
use crate::async_flow::AsyncFlowRead;
use crate::computed::Computed;
use crate::ctx::SyncCtx;
use crate::error::FlowError;
use crate::flow::{subscribe, FlowRead, Signal};
use crate::mutable::{Mut, Read};

/// Derive a new flow by applying `f` to every value read from `source`.
/// A thin wrapper over [`computed_flow`](crate::computed_flow):
/// `map_flow(source, f)` is exactly `computed_flow(move |ctx| Ok(f(ctx.get(&source)?)))`.
pub fn map_flow<F, T, U>(source: F, f: impl Fn(T) -> U + Send + Sync + 'static) -> Computed<U>
where
    F: FlowRead<T> + Signal + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
    U: Clone + PartialEq + Send + Sync + 'static,
{
    Computed::new(move |ctx| Ok(f(ctx.get(&source)?)))
}

/// Derive an asynchronous flow that only publishes values from `source`
/// satisfying `predicate`, skipping (and so preserving the previous value)
/// otherwise.
pub fn filter_async_flow<F, T>(source: F, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> AsyncComputed<T>
where
    F: AsyncFlowRead<Arc<T>> + Signal + Clone + Send + Sync + 'static,
    T: Clone + PartialEq + Send + Sync + 'static,
{
    let predicate: Arc<dyn Fn(&T) -> bool + Send + Sync> = Arc::new(predicate);
    AsyncComputed::new(move |ctx| {
        let source = source.clone();
        let predicate = predicate.clone();
        async move {
            let data = ctx.watch_async(&source).await?;
            if predicate(&data) { Ok((*data).clone()) } else { ctx.skip() }
        }
    })
}

/// An asynchronous computed flow that always reflects the most recently
/// *started* computation. This is the engine's
/// default behaviour — epoch reconciliation already discards a
/// superseded computation's authority — so this is a literal alias, kept
/// for symmetry with [`take_leading`] at call sites.
pub fn take_latest<T, F, Fut>(getter: F) -> AsyncComputed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(AsyncCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FlowError>> + Send + 'static,
{
    AsyncComputed::new(getter)
}

/// An asynchronous computed flow that ignores any trigger that arrives while
/// a previous computation is still running, rather than superseding it.
/// The in-flight run still completes normally and
/// becomes authoritative; runs that arrive during it are aborted before
/// their getter body executes and so never touch `data`.
pub fn take_leading<T, F, Fut>(getter: F) -> AsyncComputed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(AsyncCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FlowError>> + Send + 'static,
{
    let busy = Arc::new(AtomicBool::new(false));
    AsyncComputed::new(move |ctx| {
        let busy = busy.clone();
        let inner = getter(ctx);
        async move {
            if busy.swap(true, Ordering::AcqRel) {
                return Err(FlowError::Abort { reason: Some("take_leading: previous computation still in flight".to_string()) });
            }
            let result = inner.await;
            busy.store(false, Ordering::Release);
            result
        }
    })
}

/// A derived read-only flow that mirrors `source`, publishing a new value
/// only after `delay` has passed with no further change. Trailing-edge only, matching `Debouncer`'s default `Edge`.
pub fn debounce<T>(source: Read<T>, delay: Duration) -> Read<T>
where T: Clone + Send + Sync + 'static {
    let initial = source.get_snapshot().expect("Mut-backed Read never errors");
    let output = Mut::new(initial);
    let out_read = output.read();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    let watched = source.clone();
    let _subscription = subscribe(&source, move |_: T| {
        let _ = tx.send(());
    });

    tokio::spawn(async move {
        let _subscription = _subscription;
        while rx.recv().await.is_some() {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => break,
                    next = rx.recv() => if next.is_none() { return },
                }
            }
            if let Ok(value) = watched.get_snapshot() {
                let _ = output.set(value);
            }
        }
    });
    out_read
}

/// A derived read-only flow that mirrors `source` but publishes at most once
/// per `interval`. Leading-edge: the first change in a
/// burst publishes immediately; later changes within the same interval
/// collapse into a single trailing publish once the interval elapses.
pub fn throttle<T>(source: Read<T>, interval: Duration) -> Read<T>
where T: Clone + Send + Sync + 'static {
    let initial = source.get_snapshot().expect("Mut-backed Read never errors");
    let output = Mut::new(initial);
    let out_read = output.read();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    let watched = source.clone();
    let _subscription = subscribe(&source, move |_: T| {
        let _ = tx.send(());
    });

    tokio::spawn(async move {
        let _subscription = _subscription;
        while rx.recv().await.is_some() {
            if let Ok(value) = watched.get_snapshot() {
                let _ = output.set(value);
            }
            let deadline = tokio::time::sleep(interval);
            tokio::pin!(deadline);
            let mut changed_during = false;
            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    next = rx.recv() => {
                        match next {
                            Some(()) => changed_during = true,
                            None => return,
                        }
                    }
                }
            }
            if changed_during {
                if let Ok(value) = watched.get_snapshot() {
                    let _ = output.set(value);
                }
            }
        }
    });
    out_read
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering as AtomicOrdering;

    #[test]
    fn map_flow_transforms_source() {
        let x = Mut::new(3i32);
        let r = x.read();
        let doubled = map_flow(r, |v: i32| v * 2);
        assert_eq!(*doubled.snapshot().unwrap(), 6);
        x.set(4).unwrap();
        assert_eq!(*doubled.snapshot().unwrap(), 8);
    }

    #[tokio::test]
    async fn take_leading_ignores_retriggers_while_busy() {
        let starts = Arc::new(AtomicUsize::new(0));
        let starts2 = starts.clone();
        let x = Mut::new(0i32);
        let xr = x.read();
        let flow = take_leading(move |ctx| {
            let starts2 = starts2.clone();
            let xr = xr.clone();
            async move {
                let v = ctx.watch(&xr)?;
                starts2.fetch_add(1, AtomicOrdering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(v)
            }
        });

        let _sub = crate::async_flow::subscribe_async(&flow, |_s| {});
        tokio::time::sleep(Duration::from_millis(5)).await;
        x.set(1).unwrap();
        x.set(2).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(flow.snapshot().is_pending() || flow.snapshot().is_success());
    }

    #[tokio::test]
    async fn filter_async_flow_skips_values_failing_predicate() {
        let flow = AsyncComputed::new(|_ctx| async move { Ok(4i32) });
        let evens_only = filter_async_flow(flow, |v: &i32| v % 2 == 0);
        assert_eq!(*evens_only.promise().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn debounce_collapses_a_burst_into_one_update() {
        let x = Mut::new(0i32);
        let debounced = debounce(x.read(), Duration::from_millis(20));
        x.set(1).unwrap();
        x.set(2).unwrap();
        x.set(3).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(debounced.get_snapshot().unwrap(), 3);
    }

    #[tokio::test]
    async fn throttle_publishes_leading_and_trailing_values() {
        let x = Mut::new(0i32);
        let throttled = throttle(x.read(), Duration::from_millis(20));
        x.set(1).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(throttled.get_snapshot().unwrap(), 1);
        x.set(2).unwrap();
        x.set(3).unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(throttled.get_snapshot().unwrap(), 3);
    }
}
