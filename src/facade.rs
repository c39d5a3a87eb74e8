//! The public factory facade: free functions that build flows without
//! exposing their constructors directly.
//!
//! A single `computed_flow(getter)` that switches to a keyed
//! `(param) -> Flow<T>` shape by introspecting the getter's arity has no
//! Rust equivalent (no runtime arity introspection), so the keyed variant is
//! a separately named function that takes the key explicitly.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use crate::async_computed::{AsyncComputed, AsyncComputedOptions};
use crate::computed::{Computed, ComputedOptions};
use crate::ctx::SyncCtx;
use crate::async_ctx::AsyncCtx;
use crate::error::FlowError;
use crate::param_cache::ParamCache;

/// Build a lazily-evaluated, memoised derived flow.
pub fn computed_flow<T, F>(getter: F) -> Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(&mut SyncCtx) -> Result<T, FlowError> + Send + Sync + 'static,
{
    Computed::new(getter)
}

/// As [`computed_flow`], with an explicit `equals`/`initial_value`.
pub fn computed_flow_with_options<T, F>(getter: F, options: ComputedOptions<T>) -> Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(&mut SyncCtx) -> Result<T, FlowError> + Send + Sync + 'static,
{
    Computed::with_options(getter, options)
}

/// A parameterised computed flow: one [`Computed`] instance per distinct
/// `key`, memoised through a [`ParamCache`] and collectable once every
/// caller has dropped their handle. `key` must be cloneable since it's both the cache lookup key
/// and, for convenience, handed to the getter on every run.
pub fn computed_flow_keyed<K, T, F>(getter: F) -> impl Fn(K) -> Arc<Computed<T>>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(&K, &mut SyncCtx) -> Result<T, FlowError> + Send + Sync + Clone + 'static,
{
    let cache: Arc<ParamCache<K, Computed<T>>> = Arc::new(ParamCache::new());
    move |key: K| {
        let getter = getter.clone();
        let key_for_getter = key.clone();
        cache.get_or_create(key, move || Arc::new(Computed::new(move |ctx| getter(&key_for_getter, ctx))))
    }
}

/// Build an asynchronous computed flow. `getter` receives an
/// [`AsyncCtx`] and returns a future of the computed value; dependency
/// capture is only valid in the synchronous prefix before the future's
/// first suspension.
pub fn async_computed_flow<T, F, Fut>(getter: F) -> AsyncComputed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(AsyncCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FlowError>> + Send + 'static,
{
    AsyncComputed::new(getter)
}

/// As [`async_computed_flow`], with an explicit `equals`/`initial_value`.
pub fn async_computed_flow_with_options<T, F, Fut>(getter: F, options: AsyncComputedOptions<T>) -> AsyncComputed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(AsyncCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FlowError>> + Send + 'static,
{
    AsyncComputed::with_options(getter, options)
}

/// The async analogue of [`computed_flow_keyed`].
pub fn async_computed_flow_keyed<K, T, F, Fut>(getter: F) -> impl Fn(K) -> Arc<AsyncComputed<T>>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(K, AsyncCtx) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Result<T, FlowError>> + Send + 'static,
{
    let cache: Arc<ParamCache<K, AsyncComputed<T>>> = Arc::new(ParamCache::new());
    move |key: K| {
        let getter = getter.clone();
        let key_for_getter = key.clone();
        cache.get_or_create(key, move || Arc::new(AsyncComputed::new(move |ctx| getter(key_for_getter.clone(), ctx))))
    }
}
