//! End-to-end scenarios for the synchronous engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use flowgraph::*;

#[test]
fn s1_diamond_coalesces_to_two_invocations() {
    // x=2; a=x-1; b=x+a; c="c: "+b.
    let x = Mut::new(2i64);
    let a = {
        let x = x.read();
        computed_flow(move |ctx| Ok(ctx.get(&x)? - 1))
    };
    let b = {
        let x = x.read();
        let a = a.clone();
        computed_flow(move |ctx| Ok(ctx.get(&x)? + *ctx.get(&a)?))
    };
    let calls = Arc::new(AtomicUsize::new(0));
    let c = {
        let b = b.clone();
        let calls = calls.clone();
        computed_flow(move |ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("c: {}", ctx.get(&b)?))
        })
    };

    assert_eq!(*c.snapshot().unwrap(), "c: 3");
    x.set(4).unwrap();
    assert_eq!(*c.snapshot().unwrap(), "c: 7");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn s5_skip_with_initial_value() {
    // n=0; skip when even else n; initialValue=-1. 0,1,2,3 -> -1,1,1,3
    let n = Mut::new(0i32);
    let r = n.read();
    let f = computed_flow_with_options(
        move |ctx| if ctx.get(&r)? % 2 == 0 { ctx.skip() } else { Ok(ctx.get(&r)?) },
        ComputedOptions { equals: None, initial_value: Some(-1) },
    );

    assert_eq!(*f.snapshot().unwrap(), -1);
    n.set(1).unwrap();
    assert_eq!(*f.snapshot().unwrap(), 1);
    n.set(2).unwrap();
    assert_eq!(*f.snapshot().unwrap(), 1);
    n.set(3).unwrap();
    assert_eq!(*f.snapshot().unwrap(), 3);
}

#[test]
fn skip_with_no_initial_value_surfaces_abort_only_on_first_run() {
    let n = Mut::new(0i32);
    let r = n.read();
    let f: Computed<i32> = computed_flow(move |ctx| if ctx.get(&r)? == 0 { ctx.skip() } else { Ok(ctx.get(&r)?) });

    let first = f.snapshot();
    assert!(matches!(first, Err(FlowError::Abort { .. })));

    n.set(5).unwrap();
    assert_eq!(*f.snapshot().unwrap(), 5);

    // Once a cache exists, a later skip falls back to the cached value
    // instead of surfacing abort again.
    n.set(0).unwrap();
    assert_eq!(*f.snapshot().unwrap(), 5);
}

#[test]
fn subscribing_n_times_then_reading_runs_getter_once() {
    let x = Mut::new(1i32);
    let r = x.read();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();
    let f = computed_flow(move |ctx| {
        calls2.fetch_add(1, Ordering::SeqCst);
        Ok(ctx.get(&r)? + 1)
    });

    let _s1 = subscribe(&f, |_: Arc<i32>| {});
    let _s2 = subscribe(&f, |_: Arc<i32>| {});
    let _s3 = subscribe(&f, |_: Arc<i32>| {});
    let _ = f.snapshot().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn a_source_that_throws_is_retained_for_later_reads() {
    let n = Mut::new(0i32);
    let r = n.read();
    let f: Computed<i32> = computed_flow(move |ctx| {
        let v = ctx.get(&r)?;
        if v == 0 {
            Err(FlowError::computation_failure(std::io::Error::other("boom")))
        } else {
            Ok(v)
        }
    });

    assert!(f.snapshot().is_err());
    n.set(7).unwrap();
    assert_eq!(*f.snapshot().unwrap(), 7);
}

#[test]
fn equals_preserves_value_identity_across_recompute() {
    let x = Mut::new(1i32);
    let r = x.read();
    let parity = computed_flow(move |ctx| Ok(ctx.get(&r)? % 2));

    let first = parity.snapshot().unwrap();
    x.set(3).unwrap(); // still odd: equals(prev, next) holds
    let second = parity.snapshot().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}
