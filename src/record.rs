//! Per-run source bookkeeping shared by synchronous and asynchronous
//! computed flows.

use std::sync::Arc;

use crate::broadcast::BroadcastId;
use crate::flow::DynSignal;

/// One source read during a getter invocation: enough to re-subscribe to it
/// later and to detect staleness without re-reading (and without requiring
/// its value type) on the next pull.
pub(crate) struct SourceEntry {
    pub(crate) signal: Arc<DynSignal>,
    pub(crate) version: u64,
}

/// Sources captured during a single getter invocation, in first-read order,
/// deduplicated by broadcast identity.
#[derive(Default)]
pub(crate) struct SourceSet {
    entries: Vec<(BroadcastId, SourceEntry)>,
}

impl SourceSet {
    /// Record a read of `signal`, or refresh its observed version if it was
    /// already read earlier in this same run (reading a source twice must
    /// not duplicate the subscription).
    pub(crate) fn record(&mut self, signal: Arc<DynSignal>) {
        let id = signal.broadcast_id();
        let version = signal.version();
        if let Some((_, entry)) = self.entries.iter_mut().find(|(existing, _)| *existing == id) {
            entry.version = version;
            return;
        }
        self.entries.push((id, SourceEntry { signal, version }));
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &(BroadcastId, SourceEntry)> { self.entries.iter() }

    /// True if any recorded source's current `version()` differs from the
    /// one observed when this set was built — "pull" correctness without a
    /// live subscription.
    pub(crate) fn any_stale(&self) -> bool { self.entries.iter().any(|(_, e)| e.signal.version() != e.version) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{Broadcast, Listener};
    use crate::flow::Signal;

    #[test]
    fn dedups_repeated_reads_and_tracks_staleness() {
        let b = Broadcast::new();
        let mut set = SourceSet::default();
        set.record(Arc::new(b.clone()) as Arc<DynSignal>);
        set.record(Arc::new(b.clone()) as Arc<DynSignal>);
        assert_eq!(set.entries.len(), 1);
        assert!(!set.any_stale());
        b.send();
        assert!(set.any_stale());
    }

    impl Signal for Broadcast {
        fn listen(&self, listener: Listener) -> crate::broadcast::ListenerGuard { self.reference().listen(listener) }
        fn broadcast_id(&self) -> BroadcastId { Broadcast::id(self) }
        fn version(&self) -> u64 { Broadcast::version(self) }
    }
}
