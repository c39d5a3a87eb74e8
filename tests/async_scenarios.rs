//! End-to-end scenarios for the asynchronous engine: concurrent-computation
//! reconciliation (first-starts-first-ends, first-starts-last-ends),
//! promise stability across supersession, pending-data preservation, and
//! error-state retention.

use std::sync::Arc;
use std::time::Duration;

use flowgraph::*;
use tokio::sync::oneshot;
use tokio::time::sleep;

#[tokio::test]
async fn s3_first_starts_first_ends_reports_intermediate_pending_data() {
    // x=0; getter reads x then awaits an externally controlled promise.
    let x = Mut::new(0i32);
    let xr = x.read();

    let gates: Arc<std::sync::Mutex<Vec<oneshot::Sender<()>>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let gates2 = gates.clone();

    let flow = async_computed_flow(move |ctx| {
        let xr = xr.clone();
        let gates = gates2.clone();
        async move {
            let v = ctx.watch(&xr)?;
            let (tx, rx) = oneshot::channel();
            gates.lock().unwrap().push(tx);
            let _ = rx.await;
            Ok(v)
        }
    });

    let _sub = subscribe_async(&flow, |_s: AsyncFlowState<Arc<i32>>| {});
    sleep(Duration::from_millis(5)).await; // epoch 1 (x=0) is now awaiting its gate

    x.set(1).unwrap();
    sleep(Duration::from_millis(5)).await; // epoch 2 (x=1) is now awaiting its gate
    x.set(2).unwrap();
    sleep(Duration::from_millis(5)).await; // epoch 3 (x=2) is now awaiting its gate

    // Resolve epoch 1 first: it's outdated, so it only updates pending.data.
    let first_gate = gates.lock().unwrap().remove(0);
    let _ = first_gate.send(());
    sleep(Duration::from_millis(10)).await;
    let state = flow.snapshot();
    assert!(state.is_pending());
    assert_eq!(state.data().map(|d| **d), Some(0));

    // Resolve epoch 3 (the latest): it becomes authoritative.
    let third_gate = gates.lock().unwrap().remove(1);
    let _ = third_gate.send(());
    sleep(Duration::from_millis(10)).await;
    assert_eq!(**flow.snapshot().data().unwrap(), 2);
    assert!(flow.snapshot().is_success());
}

#[tokio::test]
async fn s4_first_starts_last_ends_result_unchanged_by_late_settlement() {
    let x = Mut::new(0i32);
    let xr = x.read();

    let gates: Arc<std::sync::Mutex<Vec<oneshot::Sender<()>>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let gates2 = gates.clone();

    let flow = async_computed_flow(move |ctx| {
        let xr = xr.clone();
        let gates = gates2.clone();
        async move {
            let v = ctx.watch(&xr)?;
            let (tx, rx) = oneshot::channel();
            gates.lock().unwrap().push(tx);
            let _ = rx.await;
            Ok(v)
        }
    });

    let _sub = subscribe_async(&flow, |_s: AsyncFlowState<Arc<i32>>| {});
    sleep(Duration::from_millis(5)).await;
    x.set(1).unwrap();
    sleep(Duration::from_millis(5)).await;
    x.set(2).unwrap();
    sleep(Duration::from_millis(5)).await;

    // Resolve the latest (epoch for x=2) first: authoritative success.
    let last_gate = gates.lock().unwrap().remove(2);
    let _ = last_gate.send(());
    sleep(Duration::from_millis(10)).await;
    let snapshot_after_latest = flow.snapshot();
    assert_eq!(**snapshot_after_latest.data().unwrap(), 2);

    // Resolve the first (epoch for x=0) afterwards: outdated and already
    // superseded by an authoritative success, so it is ignored.
    let first_gate = gates.lock().unwrap().remove(0);
    let _ = first_gate.send(());
    sleep(Duration::from_millis(10)).await;
    let final_state = flow.snapshot();
    assert_eq!(**final_state.data().unwrap(), 2);
    assert!(final_state.is_success());
}

#[tokio::test]
async fn s6_as_promise_is_stable_across_supersession() {
    let x = Mut::new(0i32);
    let xr = x.read();

    let gates: Arc<std::sync::Mutex<Vec<oneshot::Sender<()>>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let gates2 = gates.clone();

    let flow = async_computed_flow(move |ctx| {
        let xr = xr.clone();
        let gates = gates2.clone();
        async move {
            let v = ctx.watch(&xr)?;
            let (tx, rx) = oneshot::channel();
            gates.lock().unwrap().push(tx);
            let _ = rx.await;
            Ok(v)
        }
    });
    let _sub = subscribe_async(&flow, |_s: AsyncFlowState<Arc<i32>>| {});
    sleep(Duration::from_millis(5)).await;

    let p1 = flow.promise();
    x.set(1).unwrap();
    sleep(Duration::from_millis(5)).await;
    let p2 = flow.promise();
    x.set(2).unwrap();
    sleep(Duration::from_millis(5)).await;
    let p3 = flow.promise();

    // p1/p2/p3 were all requested while the flow stayed continuously
    // pending, so internally they share one cached promise (a fresh epoch
    // starting mid-pending must not allocate a new one, per spec). Resolve
    // every outstanding gate and confirm all three handles agree on the
    // final authoritative value.
    for gate in gates.lock().unwrap().drain(..) {
        let _ = gate.send(());
    }

    let (v1, v2, v3) = tokio::join!(p1, p2, p3);
    assert_eq!(*v1.unwrap(), 2);
    assert_eq!(*v2.unwrap(), 2);
    assert_eq!(*v3.unwrap(), 2);
}

#[tokio::test]
async fn s2_pending_data_preserved_across_recomputation() {
    // s starts at 1; f awaits s and returns 2*data.
    let s = Mut::new(1i32);
    let sr = s.read();

    let f = async_computed_flow(move |ctx| {
        let sr = sr.clone();
        async move {
            let data = ctx.watch(&sr)?;
            Ok(data * 2)
        }
    });

    let _sub = subscribe_async(&f, |_s: AsyncFlowState<Arc<i32>>| {});
    assert_eq!(*f.promise().await.unwrap(), 2);

    s.set(5).unwrap();
    // Immediately after the source changes, the flow carries its previous
    // data while the new computation runs.
    let just_after = f.snapshot();
    assert!(just_after.is_pending());
    assert_eq!(just_after.data().map(|d| **d), Some(2));

    sleep(Duration::from_millis(20)).await;
    assert_eq!(*f.promise().await.unwrap(), 10);
}

#[tokio::test]
async fn watch_async_all_tracks_every_source_and_fails_fast() {
    let a = async_computed_flow(|_ctx| async move { Ok(1i32) });
    let b = async_computed_flow(|_ctx| async move { Ok(2i32) });
    let sources = [a.clone(), b.clone()];

    let combined = async_computed_flow(move |ctx| {
        let sources = sources.clone();
        async move {
            let values = ctx.watch_async_all(&sources).await?;
            Ok(values.iter().map(|v| **v).sum::<i32>())
        }
    });
    assert_eq!(*combined.promise().await.unwrap(), 3);

    let failing = async_computed_flow(|_ctx| async move {
        Err::<i32, _>(FlowError::computation_failure(std::io::Error::other("boom")))
    });
    let mixed = [a.clone(), failing.clone()];
    let combined_with_failure = async_computed_flow(move |ctx| {
        let mixed = mixed.clone();
        async move {
            let values = ctx.watch_async_all(&mixed).await?;
            Ok(values.iter().map(|v| **v).sum::<i32>())
        }
    });
    assert!(combined_with_failure.promise().await.is_err());
}

#[tokio::test]
async fn watch_async_any_resolves_with_first_success() {
    let slow = async_computed_flow(|_ctx| async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(1i32)
    });
    let fast = async_computed_flow(|_ctx| async move { Ok(2i32) });
    let sources = [slow, fast];

    let first = async_computed_flow(move |ctx| {
        let sources = sources.clone();
        async move { Ok(*ctx.watch_async_any(&sources).await?) }
    });
    assert_eq!(*first.promise().await.unwrap(), 2);
}

#[tokio::test]
async fn error_state_retains_last_known_data() {
    let fail = Mut::new(false);
    let fail_read = fail.read();
    let counter = Mut::new(1i32);
    let counter_read = counter.read();

    let flow = async_computed_flow(move |ctx| {
        let fail_read = fail_read.clone();
        let counter_read = counter_read.clone();
        async move {
            let should_fail = ctx.watch(&fail_read)?;
            let v = ctx.watch(&counter_read)?;
            if should_fail {
                Err(FlowError::computation_failure(std::io::Error::other("boom")))
            } else {
                Ok(v)
            }
        }
    });

    assert_eq!(*flow.promise().await.unwrap(), 1);
    fail.set(true).unwrap();
    sleep(Duration::from_millis(20)).await;
    let state = flow.snapshot();
    assert!(state.is_error());
    assert_eq!(state.data().map(|d| **d), Some(1));
}
