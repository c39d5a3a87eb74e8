//! Error kinds for the engine.

use std::sync::Arc;

use crate::broadcast::BroadcastId;

/// An error produced by a computation, a source read, or the engine itself.
///
/// Cloneable so it can be stashed in `AsyncFlowState::Error` and handed to
/// every late subscriber without re-running the getter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FlowError {
    /// A source flow was mutated while a computation was running.
    #[error("source flow mutated during computation ({during})")]
    SideEffect {
        /// What was happening when the mutation was observed, for diagnostics.
        during: &'static str,
    },

    /// The getter called `skip()`, or the computation was cancelled because a
    /// newer epoch superseded it, or its owning flow lost its last subscriber.
    #[error("computation aborted{}", reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    Abort {
        /// Optional human-readable reason (e.g. `"skip() called"`).
        reason: Option<String>,
    },

    /// A computed flow's getter read itself, transitively, during its own run.
    #[error("cyclic dependency detected at flow {flow:?}")]
    Cycle {
        /// The broadcast identity of the flow whose getter closed the cycle.
        flow: BroadcastId,
    },

    /// Any other failure from the getter or from reading a source.
    #[error("computation failed: {source}")]
    ComputationFailure {
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },
}

impl FlowError {
    /// Wrap an arbitrary error as a `ComputationFailure`.
    pub fn computation_failure<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        FlowError::ComputationFailure { source: Arc::new(err) }
    }

    /// True for aborts (`skip()`, cancellation) — the cases §7 says must never
    /// surface from the very first successful run onward.
    pub fn is_abort(&self) -> bool { matches!(self, FlowError::Abort { .. }) }
}
