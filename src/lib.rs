/*!
A reactive computation engine that keeps derived values consistent with a
graph of observable *flows*. A flow is a value cell that can be read
synchronously and subscribed to; a *computed flow* is a flow whose value
comes from a getter that reads other flows.

The engine offers:
- lazy evaluation with memoisation ([`Computed`]/[`computed_flow`]),
- glitch-free propagation through diamond-shaped dependency graphs,
- fine-grained dependency tracking, including conditional branches,
- asynchronous getters with concurrent-computation reconciliation,
  cancellation, pending-data preservation, and in-order settlement
  ([`AsyncComputed`]/[`async_computed_flow`]).

The mutable-flow primitive ([`Mut`]/[`Read`]), small utilities
([`map_flow`], [`debounce`], [`throttle`], [`take_latest`],
[`take_leading`], [`filter_async_flow`]) and the keyed factories
([`computed_flow_keyed`], [`async_computed_flow_keyed`]) are built on top of
the same machinery.

# Synchronous computed flows

```
use flowgraph::*;

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

assert_eq!(*b.snapshot().unwrap(), 3);
x.set(4).unwrap();
assert_eq!(*b.snapshot().unwrap(), 7);
```

# Asynchronous computed flows

```
# #[tokio::main(flavor = "current_thread")]
# async fn main() {
use flowgraph::*;

let price = Mut::new(100i64);
let total = {
    let price = price.read();
    async_computed_flow(move |ctx| {
        let current = ctx.watch(&price);
        async move { Ok(current? * 2) }
    })
};
assert_eq!(*total.promise().await.unwrap(), 200);
# }
```
*/

mod async_computed;
mod async_ctx;
mod async_flow;
mod async_record;
mod broadcast;
mod cancellation;
mod computed;
mod context;
mod ctx;
mod error;
mod facade;
mod flow;
mod mutable;
mod param_cache;
mod record;
mod util;
mod value;

pub use async_computed::{AsyncComputed, AsyncComputedOptions};
pub use async_ctx::AsyncCtx;
pub use async_flow::{subscribe_async, AsyncFlowRead, AsyncFlowState, AsyncSubscription};
pub use broadcast::{BroadcastId, IntoListener, ListenerGuard};
pub use cancellation::CancellationSignal;
pub use computed::{Computed, ComputedOptions};
pub use ctx::SyncCtx;
pub use error::FlowError;
pub use facade::{
    async_computed_flow, async_computed_flow_keyed, async_computed_flow_with_options, computed_flow, computed_flow_keyed,
    computed_flow_with_options,
};
pub use flow::{subscribe, FlowRead, Signal, Subscription};
pub use mutable::{Mut, Read};
pub use param_cache::ParamCache;
pub use util::{debounce, filter_async_flow, map_flow, take_latest, take_leading, throttle};
