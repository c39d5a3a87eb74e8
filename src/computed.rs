//! Synchronous computed flow: a lazily evaluated, memoised derived value.
//!
//! Mark-and-sweep subscription bookkeeping (`entries: HashMap<BroadcastId,
//! SubscriptionEntry>`), with new sources subscribed before old ones are
//! swept, and a `Broadcast`-per-instance notification channel. Construction
//! is inert; an upstream fire only sets a dirty bit, and the getter reruns
//! lazily on the next `get_snapshot`/subscribe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::broadcast::{Broadcast, BroadcastId, Listener, ListenerGuard};
use crate::context::Tracker;
use crate::ctx::SyncCtx;
use crate::error::FlowError;
use crate::flow::{FlowRead, Signal};
use crate::record::SourceSet;

/// Configuration accepted by [`Computed::with_options`].
pub struct ComputedOptions<T> {
    /// Output equality used to preserve value identity across recomputation.
    /// Defaults to `T::eq` when `None` (spec's "default reference/SameValue").
    pub equals: Option<Arc<dyn Fn(&T, &T) -> bool + Send + Sync>>,
    /// Published only when the very first run is skipped and no cache exists.
    pub initial_value: Option<T>,
}

impl<T> Default for ComputedOptions<T> {
    fn default() -> Self { Self { equals: None, initial_value: None } }
}

struct SubscriptionEntry {
    _guard: ListenerGuard,
    marked_for_removal: bool,
}

struct CachedRecord<T> {
    sources: SourceSet,
    outcome: Result<Arc<T>, FlowError>,
}

struct Inner<T> {
    getter: Box<dyn Fn(&mut SyncCtx) -> Result<T, FlowError> + Send + Sync>,
    equals: Option<Arc<dyn Fn(&T, &T) -> bool + Send + Sync>>,
    initial_value: Option<T>,
    cache: RwLock<Option<CachedRecord<T>>>,
    entries: RwLock<HashMap<BroadcastId, SubscriptionEntry>>,
    broadcast: Broadcast,
    /// Bumped whenever a recompute actually changes the published outcome's
    /// identity (not on every recompute — an `equals`-preserved value must
    /// *not* look stale to downstream pull checks). This is what
    /// [`Signal::version`] reports, decoupled from `broadcast`'s own counter
    /// (which instead tracks live-listener notifications).
    value_version: AtomicU64,
    dirty: AtomicBool,
    subscriber_count: AtomicUsize,
}

/// A lazily-evaluated, memoised derived flow. Cloning shares the same
/// underlying cache and subscriptions.
pub struct Computed<T>(Arc<Inner<T>>);

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self { Self(Arc::clone(&self.0)) }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Computed<T> {
    pub fn new<F>(getter: F) -> Self
    where F: Fn(&mut SyncCtx) -> Result<T, FlowError> + Send + Sync + 'static {
        Self::with_options(getter, ComputedOptions::default())
    }

    pub fn with_options<F>(getter: F, options: ComputedOptions<T>) -> Self
    where F: Fn(&mut SyncCtx) -> Result<T, FlowError> + Send + Sync + 'static {
        Self(Arc::new(Inner {
            getter: Box::new(getter),
            equals: options.equals,
            initial_value: options.initial_value,
            cache: RwLock::new(None),
            entries: RwLock::new(HashMap::new()),
            broadcast: Broadcast::new(),
            value_version: AtomicU64::new(0),
            dirty: AtomicBool::new(false),
            subscriber_count: AtomicUsize::new(0),
        }))
    }

    /// Read the current value, recomputing only if necessary.
    pub fn snapshot(&self) -> Result<Arc<T>, FlowError> {
        let under_subscription = self.0.subscriber_count.load(Ordering::Acquire) > 0;
        let needs_recompute = if under_subscription {
            self.0.dirty.load(Ordering::Acquire) || self.0.cache.read().unwrap().is_none()
        } else {
            match self.0.cache.read().unwrap().as_ref() {
                None => true,
                Some(cached) => cached.sources.any_stale(),
            }
        };
        if needs_recompute {
            tracing::trace!(flow = self.0.broadcast.id().as_usize(), "computed: cache miss, recomputing");
            return recompute(&self.0, under_subscription);
        }
        tracing::trace!(flow = self.0.broadcast.id().as_usize(), "computed: cache hit");
        let cache = self.0.cache.read().unwrap();
        cache.as_ref().expect("recompute populates the cache unconditionally").outcome.clone()
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> FlowRead<Arc<T>> for Computed<T> {
    fn get_snapshot(&self) -> Result<Arc<T>, FlowError> { self.snapshot() }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Signal for Computed<T> {
    fn listen(&self, listener: Listener) -> ListenerGuard {
        let was_zero = self.0.subscriber_count.fetch_add(1, Ordering::AcqRel) == 0;
        if was_zero {
            // First subscriber: establish live subscriptions on our sources
            // now rather than waiting for the next read.
            let _ = recompute(&self.0, true);
        }
        let guard = self.0.broadcast.reference().listen(listener);
        let weak = Arc::downgrade(&self.0);
        guard.with_extra_drop(move || {
            if let Some(inner) = weak.upgrade() {
                if inner.subscriber_count.fetch_sub(1, Ordering::AcqRel) == 1 {
                    // Last subscriber gone: release upstream subscriptions.
                    // A later read revalidates by re-reading sources (spec
                    // §4.3's disposal rule, generalized to the sync case).
                    inner.entries.write().unwrap().clear();
                }
            }
        })
    }

    fn broadcast_id(&self) -> BroadcastId { self.0.broadcast.id() }

    /// Forces a pull-revalidation before reporting the version so a
    /// transitively-stale grand-dependency is noticed even though nothing
    /// ever subscribed to it.
    fn version(&self) -> u64 {
        let _ = self.snapshot();
        self.0.value_version.load(Ordering::Acquire)
    }
}

fn recompute<T: Clone + PartialEq + Send + Sync + 'static>(inner: &Arc<Inner<T>>, create_subscriptions: bool) -> Result<Arc<T>, FlowError> {
    if create_subscriptions {
        let mut entries = inner.entries.write().unwrap();
        for entry in entries.values_mut() {
            entry.marked_for_removal = true;
        }
    }

    let self_id = inner.broadcast.id();
    let mut sources = SourceSet::default();
    let raw_outcome = {
        let _guard = Tracker::enter(self_id.as_usize());
        let mut ctx = SyncCtx::new(&mut sources);
        (inner.getter)(&mut ctx)
    };

    if create_subscriptions {
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

    let prev = inner.cache.read().unwrap().as_ref().map(|c| c.outcome.clone());
    let resolved = resolve_outcome(&inner.equals, &inner.initial_value, raw_outcome, prev.as_ref());

    let identity_preserved = matches!(
        (prev.as_ref(), &resolved),
        (Some(Ok(p)), Ok(r)) if Arc::ptr_eq(p, r)
    );
    if !identity_preserved {
        inner.value_version.fetch_add(1, Ordering::AcqRel);
    }

    *inner.cache.write().unwrap() = Some(CachedRecord { sources, outcome: resolved.clone() });
    inner.dirty.store(false, Ordering::Release);
    resolved
}

fn on_upstream_fire<T: Clone + PartialEq + Send + Sync + 'static>(inner: &Arc<Inner<T>>) {
    // Coalesce: only the transition into "dirty" fires a notification: a
    // burst of upstream changes between two reads notifies subscribers once.
    if !inner.dirty.swap(true, Ordering::AcqRel) {
        inner.broadcast.send();
    }
}

fn resolve_outcome<T: Clone + PartialEq>(
    equals: &Option<Arc<dyn Fn(&T, &T) -> bool + Send + Sync>>,
    initial_value: &Option<T>,
    raw: Result<T, FlowError>,
    prev: Option<&Result<Arc<T>, FlowError>>,
) -> Result<Arc<T>, FlowError> {
    match raw {
        Ok(value) => {
            if let Some(Ok(prev_value)) = prev {
                let same = match equals {
                    Some(eq) => eq(prev_value, &value),
                    None => prev_value.as_ref() == &value,
                };
                if same {
                    return Ok(prev_value.clone());
                }
            }
            Ok(Arc::new(value))
        }
        Err(err) if err.is_abort() => match prev {
            Some(prev) => prev.clone(),
            None => match initial_value {
                Some(iv) => Ok(Arc::new(iv.clone())),
                None => Err(err),
            },
        },
        // Non-abort error (including Cycle/SideEffect bubbling out of a
        // source read): the record enters error state; sources captured so
        // far are retained so a later change can clear it.
        Err(err) => Err(err),
    }
}
