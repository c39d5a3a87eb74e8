use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Stable identity for a broadcast, used by observers (computations, callers of
/// `subscribe`) to deduplicate subscriptions across multiple reads of the same
/// source within a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BroadcastId(usize);

impl BroadcastId {
    /// Raw identity, shared with the dependency-tracker stack (`context.rs`)
    /// so a computation's own broadcast id can be recognised on re-entry.
    pub(crate) fn as_usize(self) -> usize { self.0 }
}

/// A listener that can be called when broadcast notifications are sent.
pub type Listener = Arc<dyn Fn() + Send + Sync + 'static>;

/// Trait for types that can be converted into broadcast listeners.
pub trait IntoListener {
    /// Convert this type into a listener function that can be called on notifications.
    fn into_listener(self) -> Listener;
}

/// A broadcast sender that notifies multiple subscribers without payload data.
/// Uses synchronous function callbacks for immediate notification.
#[derive(Clone)]
pub struct Broadcast(Arc<Inner>);
struct Inner {
    listeners: std::sync::RwLock<HashMap<usize, Listener>>,
    next_id: AtomicUsize,
    version: AtomicU64,
}

/// A listen-only reference to a broadcast
#[derive(Clone, Copy)]
pub struct Ref<'a>(&'a Broadcast);

/// A subscription handle that can be used to unsubscribe from notifications.
pub struct ListenerGuard {
    inner: Weak<Inner>,
    broadcast_id: BroadcastId,
    id: usize,
    /// Extra teardown logic layered on by the flow that handed out this
    /// guard (e.g. a computed flow decrementing its own subscriber count and
    /// disposing its upstream subscriptions when the last one drops).
    on_drop: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerGuard {
    pub fn broadcast_id(&self) -> BroadcastId { self.broadcast_id }

    /// Attach additional teardown logic to run when this guard drops, after
    /// the underlying broadcast subscription has been removed.
    pub(crate) fn with_extra_drop(mut self, f: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_drop = Some(Box::new(f));
        self
    }
}

impl Default for Broadcast {
    fn default() -> Self { Self::new() }
}

impl Broadcast {
    /// Creates a new Broadcast struct
    pub fn new() -> Self {
        Self(Arc::new(Inner { listeners: std::sync::RwLock::new(HashMap::new()), next_id: AtomicUsize::new(0), version: AtomicU64::new(0) }))
    }

    /// Stable identity of this broadcast, usable as a dependency-set dedup key.
    pub fn id(&self) -> BroadcastId { BroadcastId(Arc::as_ptr(&self.0) as usize) }

    /// A counter bumped every time `send` fires. Cheap "did this change" check
    /// for pull-mode dirty detection — reference-identity in spirit, without
    /// requiring `T: PartialEq`.
    pub fn version(&self) -> u64 { self.0.version.load(Ordering::Acquire) }

    /// Sends a notification to all active listeners
    pub fn send(&self) {
        self.0.version.fetch_add(1, Ordering::AcqRel);
        // Clone the listeners to avoid holding the lock during callback execution
        let subscribers = {
            // maybe someday we can avoid the alloc here using a thread-local buffer?
            let listeners = self.0.listeners.read().unwrap();
            listeners.values().cloned().collect::<Vec<_>>()
        };

        // Call all listeners without holding any locks. A panicking listener
        // must not take the rest of the subscriber list down with it (spec
        // §7: listener errors are caught individually and logged).
        for callback in subscribers {
            if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback())) {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "<non-string panic payload>".to_string());
                tracing::warn!(panic = %message, "listener panicked during broadcast");
            }
        }
    }

    /// Get a read-only reference to this sender that can only subscribe to notifications.
    /// This avoids cloning the sender while still forbidding the user from sending notifications.
    pub fn reference(&self) -> Ref<'_> { Ref(self) }
}

impl<'a> Ref<'a> {
    /// Subscribe to notifications from the associated sender.
    pub fn listen<L>(&self, listener: L) -> ListenerGuard
    where L: IntoListener {
        let id = self.0.0.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.0.0.listeners.write().unwrap().insert(id, listener.into_listener());
        ListenerGuard { inner: Arc::downgrade(&self.0.0), broadcast_id: self.0.id(), id, on_drop: None }
    }
}

impl Drop for ListenerGuard {
    /// Automatically unsubscribes when the subscription handle is dropped.
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.listeners.write().unwrap().remove(&self.id);
        }
        if let Some(f) = self.on_drop.take() {
            f();
        }
    }
}

// IntoListener implementations for various types

// Implementation for function types - multi-threaded
impl<F> IntoListener for F
where F: Fn() + Send + Sync + 'static
{
    fn into_listener(self) -> Listener { Arc::new(self) }
}

#[cfg(feature = "tokio")]
impl IntoListener for tokio::sync::mpsc::UnboundedSender<()> {
    fn into_listener(self) -> Listener {
        Arc::new(move || {
            let _ = self.send(()); // Ignore send errors
        })
    }
}

impl IntoListener for std::sync::mpsc::Sender<()> {
    fn into_listener(self) -> Listener {
        Arc::new(move || {
            let _ = self.send(()); // Ignore send errors
        })
    }
}
