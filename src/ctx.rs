//! The getter-facing context for synchronous computed flows.

use std::sync::Arc;

use crate::context::Tracker;
use crate::error::FlowError;
use crate::flow::{DynSignal, FlowRead, Signal};
use crate::record::SourceSet;

/// Passed to a synchronous computed flow's getter. Every `get` call records
/// the flow read as a dependency of the run currently building this context.
pub struct SyncCtx<'r> {
    sources: &'r mut SourceSet,
}

impl<'r> SyncCtx<'r> {
    pub(crate) fn new(sources: &'r mut SourceSet) -> Self { Self { sources } }

    /// Record `flow` as a source, read its current value, and return it.
    ///
    /// Fails with [`FlowError::Cycle`] if `flow` is already running somewhere
    /// on the dependency-tracker stack — this getter, directly or
    /// transitively, depends on its own output.
    pub fn get<T, F>(&mut self, flow: &F) -> Result<T, FlowError>
    where
        T: Send + Sync + 'static,
        F: FlowRead<T> + Signal + Clone + Send + Sync + 'static,
    {
        let id = flow.broadcast_id();
        if Tracker::contains(id.as_usize()) {
            return Err(FlowError::Cycle { flow: id });
        }
        // Read first, record second: for a computed source, `get_snapshot`
        // may itself trigger a pull-revalidation that bumps its `version()`
        // — the version we store as "observed" must be the one
        // *after* that settles, or a transitively stale grand-dependency
        // would never be noticed.
        let result = flow.get_snapshot();
        self.sources.record(Arc::new(flow.clone()) as Arc<DynSignal>);
        result
    }

    /// Abort this run: do not publish a new value.
    /// Intended for use with `?`: `return ctx.skip();`.
    pub fn skip<R>(&self) -> Result<R, FlowError> { Err(FlowError::Abort { reason: Some("skip() called".to_string()) }) }
}
