use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::audio_buffer::AudioBuffer;
use crate::graph::{GraphError, NodeHandle};
use crate::node::BlockContext;
use crate::parameter::ControlValue;

/// A hot-swappable input slot shared by a node and the control thread.
///
/// The control side replaces the source with [`set`](Self::set) and
/// friends; the render side reads it once per block with
/// [`tick_into`](Self::tick_into). The lock is held only for the swap and
/// for the read-and-tick of the source, never across a node's per-sample
/// loop, so the render thread never sees a half-updated source.
#[derive(Debug, Clone)]
pub struct ModulationInput {
    source: Arc<Mutex<ControlValue>>,
}

impl ModulationInput {
    pub fn new(source: ControlValue) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
        }
    }

    /// Replace the source.
    pub fn set(&self, source: ControlValue) {
        let old = std::mem::replace(&mut *self.lock(), source);
        // Dropped outside the lock.
        drop(old);
    }

    /// Drive the input from a generator.
    pub fn set_node(&self, handle: NodeHandle) {
        self.set(ControlValue::Generated(handle));
    }

    /// Drive the input from a fixed value.
    pub fn set_value(&self, value: f32) {
        self.set(ControlValue::constant(value));
    }

    /// Current source.
    pub fn get(&self) -> ControlValue {
        self.lock().clone()
    }

    pub fn node(&self) -> Option<NodeHandle> {
        self.lock().node()
    }

    /// Fill `out` with this block's values of the source.
    ///
    /// A fixed source fills every sample; a generated source is ticked
    /// under the same context and copied.
    pub fn tick_into(&self, ctx: &BlockContext<'_>, out: &mut AudioBuffer) -> Result<(), GraphError> {
        let source = self.lock();
        match &*source {
            ControlValue::Fixed(cell) => {
                out.fill(cell.get());
                Ok(())
            }
            ControlValue::Generated(handle) => ctx.tick_into(*handle, out),
        }
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, ControlValue> {
        self.source.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ModulationInput {
    fn default() -> Self {
        Self::new(ControlValue::constant(0.0))
    }
}
