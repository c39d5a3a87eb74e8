//! The mutable flow primitive: a writable leaf flow other flows can depend
//! on (`get_snapshot`/`subscribe`/`set`).
//!
//! Writers and readers are different types (`Mut`/`Read`), and only the
//! reader side offers `subscribe`.

use std::sync::Arc;

use crate::broadcast::{Broadcast, BroadcastId, Listener, ListenerGuard};
use crate::context::Tracker;
use crate::error::FlowError;
use crate::flow::{FlowRead, Signal};
use crate::value::ValueCell;

/// A mutable source flow. Call [`Mut::read`] to obtain a [`Read`] handle that
/// other code (including getters) can subscribe to and read from.
pub struct Mut<T> {
    value: ValueCell<T>,
    broadcast: Broadcast,
}

impl<T> Mut<T> {
    pub fn new(value: T) -> Self { Self { value: ValueCell::new(value), broadcast: Broadcast::new() } }

    /// Mutate the value and notify subscribers.
    ///
    /// Fails with [`FlowError::SideEffect`] if called while any computation is
    /// currently running its getter — a getter must not
    /// mutate a flow it (or an enclosing computation) might also read.
    pub fn set(&self, value: T) -> Result<(), FlowError> {
        if Tracker::any_active() {
            return Err(FlowError::SideEffect { during: "Mut::set" });
        }
        self.value.set(value);
        self.broadcast.send();
        Ok(())
    }

    /// A read-only view sharing this flow's storage and broadcast.
    pub fn read(&self) -> Read<T> { Read { value: self.value.clone(), broadcast: self.broadcast.clone() } }
}

impl<T: Clone> Mut<T> {
    /// The current value, read without going through dependency tracking.
    pub fn peek(&self) -> T { self.value.value() }
}

/// A read-only handle onto a [`Mut`]'s value. Implements [`FlowRead`] so it
/// can be used as a getter dependency.
#[derive(Clone)]
pub struct Read<T> {
    pub(crate) value: ValueCell<T>,
    pub(crate) broadcast: Broadcast,
}

impl<T: Clone + Send + Sync + 'static> FlowRead<T> for Read<T> {
    fn get_snapshot(&self) -> Result<T, FlowError> { Ok(self.value.value()) }
}

impl<T: Send + Sync> Signal for Read<T> {
    fn listen(&self, listener: Listener) -> ListenerGuard { self.broadcast.reference().listen(listener) }
    fn broadcast_id(&self) -> BroadcastId { self.broadcast.id() }
    fn version(&self) -> u64 { self.broadcast.version() }
}
