//! The process-wide dependency tracker.
//!
//! A cooperative, thread-local stack of the computations currently running.
//! Its job is side-effect detection: if a source flow's `emit` happens while
//! any computation is on the stack, that's the getter mutating its own
//! dependency universe, and the engine reports `FlowError::SideEffect`. The
//! same stack is also how nested computations compose — a computed flow
//! reading another computed flow simply pushes a second frame while the first
//! is still active.
//!
//! Reset on every push/pop via an RAII guard so a panicking getter can't leave
//! a stale frame behind.

use std::cell::RefCell;

thread_local! {
    static STACK: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// RAII guard returned by [`Tracker::enter`]: pops its frame on drop, even if
/// the getter panics or returns early.
pub(crate) struct TrackerGuard(());

impl Drop for TrackerGuard {
    fn drop(&mut self) {
        STACK.with(|stack| {
            let id = stack.borrow_mut().pop();
            tracing::trace!(flow = id, "tracker: exit");
        });
    }
}

pub(crate) struct Tracker;

impl Tracker {
    /// Push a frame identifying the computation that's about to run its
    /// getter; the returned guard pops it again when the run ends.
    pub fn enter(id: usize) -> TrackerGuard {
        STACK.with(|stack| stack.borrow_mut().push(id));
        tracing::trace!(flow = id, "tracker: enter");
        TrackerGuard(())
    }

    /// True if any computation is presently running on this thread.
    ///
    /// Used by `Mut::emit` to raise `FlowError::SideEffect`.
    pub fn any_active() -> bool { STACK.with(|stack| !stack.borrow().is_empty()) }

    /// The id of the innermost (currently running) computation, if any.
    pub fn current_id() -> Option<usize> { STACK.with(|stack| stack.borrow().last().copied()) }

    /// True if `id` already appears somewhere on the stack — a computation
    /// that is, transitively, reading itself.
    pub fn contains(id: usize) -> bool { STACK.with(|stack| stack.borrow().contains(&id)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_nesting_and_pops_on_drop() {
        assert!(!Tracker::any_active());
        {
            let _g1 = Tracker::enter(1);
            assert!(Tracker::any_active());
            assert_eq!(Tracker::current_id(), Some(1));
            {
                let _g2 = Tracker::enter(2);
                assert_eq!(Tracker::current_id(), Some(2));
                assert!(Tracker::contains(1));
            }
            assert_eq!(Tracker::current_id(), Some(1));
        }
        assert!(!Tracker::any_active());
    }

    #[test]
    fn pops_even_on_panic() {
        let result = std::panic::catch_unwind(|| {
            let _g = Tracker::enter(42);
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(!Tracker::any_active());
    }
}
