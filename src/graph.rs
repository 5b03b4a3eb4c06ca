//! Generator graph: a fixed-capacity arena of nodes with memoized, pull-based
//! block evaluation.
//!
//! Nodes are addressed by [`NodeHandle`] (slot index plus generation), so
//! handles are `Copy` and any number of parents may alias one node. Each
//! slot carries its own lock; there is no graph-wide lock on the render
//! path, and unrelated nodes never contend.
//!
//! Evaluation is lazy. The host ticks a root handle with a
//! [`SynthesisContext`]; every node pulls its inputs through the same
//! context, and a node whose last computed id equals the context id hands
//! back its cached block instead of recomputing. Fan-out therefore costs
//! one computation per node per render call, and all parents read the
//! same samples.

use std::any::{Any, type_name};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, trace};
use thiserror::Error;

use crate::audio_buffer::AudioBuffer;
use crate::config::{ConfigError, EngineConfig};
use crate::node::{BlockContext, Generator, SynthesisContext};
use crate::nodes::{FixedValue, Product, Sum};
use crate::parameter::ControlValue;

/// Shared, copyable reference to one node in a [`Graph`].
///
/// The generation guards against stale references: once the node in a
/// slot is replaced or removed, older handles to that slot stop resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    index: u32,
    generation: u32,
}

impl NodeHandle {
    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    #[error("node handle {0} does not refer to a live node")]
    StaleHandle(NodeHandle),

    #[error("node {0} was pulled while computing its own block (cycle)")]
    Cycle(NodeHandle),

    #[error("graph is full ({capacity} node slots)")]
    Full { capacity: usize },

    #[error("{node} has no input port")]
    NoInputPort { node: &'static str },

    #[error("node is a {found}, not a {expected}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

struct Slot {
    generation: u32,
    node: Option<Box<dyn Generator>>,
    output: AudioBuffer,
    last_tick: Option<u64>,
    stereo: bool,
}

impl Slot {
    fn set_stereo(&mut self, stereo: bool, block_frames: usize) {
        self.stereo = stereo;
        self.output.resize(block_frames, if stereo { 2 } else { 1 });
        self.last_tick = None;
        if let Some(node) = self.node.as_mut() {
            node.set_is_stereo(stereo);
        }
    }
}

struct SlotCell {
    /// Set while the render thread is inside this node's `compute_block`.
    computing: AtomicBool,
    slot: Mutex<Slot>,
}

/// Clears the computing flag even if a node panics mid-block.
struct ComputingFlag<'a>(&'a AtomicBool);

impl Drop for ComputingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A node's output for the current block.
///
/// Holds the node's slot lock; drop it before pulling the same node
/// mutably again.
pub struct BlockGuard<'g> {
    slot: MutexGuard<'g, Slot>,
}

impl Deref for BlockGuard<'_> {
    type Target = AudioBuffer;

    #[inline]
    fn deref(&self) -> &AudioBuffer {
        &self.slot.output
    }
}

/// The generator graph.
pub struct Graph {
    config: EngineConfig,
    slots: Box<[SlotCell]>,
    /// Vacant slot indices. Touched only by the control role.
    free: Mutex<Vec<u32>>,
    live: AtomicUsize,
}

impl Graph {
    /// Allocate every slot and its output buffer up front.
    ///
    /// Output storage is sized for stereo so that a later mode switch
    /// never allocates on the render path.
    pub fn new(config: EngineConfig) -> Result<Self, GraphError> {
        config.validate()?;
        let block = config.block_frames();

        let slots = (0..config.max_nodes)
            .map(|_| {
                let mut output = AudioBuffer::new(block, 2);
                output.resize(block, 1);
                output.set_data_rate(config.sample_rate);
                SlotCell {
                    computing: AtomicBool::new(false),
                    slot: Mutex::new(Slot {
                        generation: 0,
                        node: None,
                        output,
                        last_tick: None,
                        stereo: false,
                    }),
                }
            })
            .collect();

        let free = (0..config.max_nodes as u32).rev().collect();

        Ok(Self {
            config,
            slots,
            free: Mutex::new(free),
            live: AtomicUsize::new(0),
        })
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of live nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Building (control role)
    // ═══════════════════════════════════════════════════════════════════

    /// Add a node. Returns its handle.
    pub fn insert<G: Generator>(&self, node: G) -> Result<NodeHandle, GraphError> {
        self.insert_boxed(Box::new(node))
    }

    pub fn insert_boxed(&self, mut node: Box<dyn Generator>) -> Result<NodeHandle, GraphError> {
        node.prepare(&self.config);

        let index = lock_ignoring_poison(&self.free)
            .pop()
            .ok_or(GraphError::Full {
                capacity: self.capacity(),
            })?;

        let mut slot = self.lock_slot(index as usize);
        debug!("insert {} at slot {}", node.name(), index);
        slot.node = Some(node);
        slot.last_tick = None;
        slot.stereo = false;
        slot.output.resize(self.config.block_frames(), 1);
        slot.output.clear();
        self.live.fetch_add(1, Ordering::Relaxed);

        Ok(NodeHandle {
            index,
            generation: slot.generation,
        })
    }

    /// Constant generator.
    pub fn constant(&self, value: f32) -> Result<NodeHandle, GraphError> {
        self.insert(FixedValue::new(ControlValue::constant(value)))
    }

    /// Generator that outputs a control value (e.g. a registered parameter).
    pub fn control(&self, value: ControlValue) -> Result<NodeHandle, GraphError> {
        self.insert(FixedValue::new(value))
    }

    /// Generator that adds its inputs sample by sample.
    pub fn sum(&self, inputs: &[NodeHandle]) -> Result<NodeHandle, GraphError> {
        self.check_live(inputs)?;
        self.insert(Sum::with_inputs(inputs.to_vec()))
    }

    /// Generator that multiplies its inputs sample by sample.
    pub fn product(&self, inputs: &[NodeHandle]) -> Result<NodeHandle, GraphError> {
        self.check_live(inputs)?;
        self.insert(Product::with_inputs(inputs.to_vec()))
    }

    /// Wire `source` into `destination`'s input port.
    ///
    /// Rejected if `destination` is already upstream of `source`.
    pub fn connect(&self, source: NodeHandle, destination: NodeHandle) -> Result<(), GraphError> {
        self.check_live(&[source])?;
        if self.depends_on(source, destination) {
            return Err(GraphError::Cycle(destination));
        }

        let mut slot = self.lock_live(destination)?;
        if let Some(node) = slot.node.as_mut() {
            node.connect(source)?;
            debug!("connect {} -> {} ({})", source, destination, node.name());
        }
        Ok(())
    }

    /// Swap in a new node at `handle`'s slot.
    ///
    /// Returns the new handle; `handle` and its copies become stale. The
    /// old node is dropped on the calling thread.
    pub fn replace<G: Generator>(&self, handle: NodeHandle, mut node: G) -> Result<NodeHandle, GraphError> {
        node.prepare(&self.config);
        let block = self.config.block_frames();

        let old = {
            let mut slot = self.lock_live(handle)?;
            let stereo = slot.stereo;
            let old = slot.node.replace(Box::new(node));
            slot.generation = slot.generation.wrapping_add(1);
            slot.set_stereo(stereo, block);
            slot.output.clear();
            debug!("replace slot {} (now generation {})", handle.index, slot.generation);
            old
        };
        drop(old);

        Ok(NodeHandle {
            index: handle.index,
            generation: handle.generation.wrapping_add(1),
        })
    }

    /// Take a node out of the graph.
    ///
    /// The node is handed back so its storage is freed by the caller,
    /// not by whoever happens to be rendering.
    pub fn remove(&self, handle: NodeHandle) -> Result<Box<dyn Generator>, GraphError> {
        let node = {
            let mut slot = self.lock_live(handle)?;
            slot.generation = slot.generation.wrapping_add(1);
            slot.last_tick = None;
            slot.node.take().ok_or(GraphError::StaleHandle(handle))?
        };
        lock_ignoring_poison(&self.free).push(handle.index);
        self.live.fetch_sub(1, Ordering::Relaxed);
        debug!("remove {} from slot {}", node.name(), handle.index);
        Ok(node)
    }

    #[inline]
    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.lock_live(handle).is_ok()
    }

    /// Run `f` on the concrete node behind `handle`.
    ///
    /// Holds the node's slot lock for the duration of `f`, so the render
    /// thread waits at most that long for this node.
    pub fn with_node_mut<T: Generator, R>(
        &self,
        handle: NodeHandle,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, GraphError> {
        let mut slot = self.lock_live(handle)?;
        let node = slot.node.as_deref_mut().ok_or(GraphError::StaleHandle(handle))?;
        let found = node.name();
        let any: &mut dyn Any = node;
        let node = any.downcast_mut::<T>().ok_or(GraphError::TypeMismatch {
            expected: type_name::<T>(),
            found,
        })?;
        Ok(f(node))
    }

    /// Change the channel layout of `handle` and everything it pulls from.
    ///
    /// Resizes each node's output and lets the node resize its own
    /// workspace. Every reachable node is visited once, including the
    /// inputs of nodes already in the requested mode; only nodes in the
    /// other mode are switched (and lose their memoized block).
    pub fn set_is_stereo(&self, handle: NodeHandle, stereo: bool) -> Result<(), GraphError> {
        let block = self.config.block_frames();
        self.check_live(&[handle])?;

        let mut visited = vec![false; self.capacity()];
        let mut pending = vec![handle];
        while let Some(next) = pending.pop() {
            let Some(seen) = visited.get_mut(next.index as usize) else {
                continue;
            };
            if *seen {
                continue;
            }
            *seen = true;
            let Ok(mut slot) = self.lock_live(next) else {
                debug!("set_is_stereo: skipping stale input {}", next);
                continue;
            };
            if slot.stereo != stereo {
                trace!("slot {} -> {}", next.index, if stereo { "stereo" } else { "mono" });
                slot.set_stereo(stereo, block);
            }
            if let Some(node) = slot.node.as_ref() {
                node.visit_inputs(&mut |input| pending.push(input));
            }
        }
        Ok(())
    }

    /// Channel layout `handle` currently renders with.
    pub fn is_stereo(&self, handle: NodeHandle) -> Result<bool, GraphError> {
        Ok(self.lock_live(handle)?.stereo)
    }

    /// Clear a node's memoized block and internal state.
    pub fn reset(&self, handle: NodeHandle) -> Result<(), GraphError> {
        let mut slot = self.lock_live(handle)?;
        slot.last_tick = None;
        slot.output.clear();
        if let Some(node) = slot.node.as_mut() {
            node.reset();
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Rendering (render role)
    // ═══════════════════════════════════════════════════════════════════

    /// Pull one block from `handle`.
    ///
    /// Computes at most once per context id; later pulls under the same
    /// context return the cached block unchanged.
    pub fn tick(&self, handle: NodeHandle, ctx: &SynthesisContext) -> Result<BlockGuard<'_>, GraphError> {
        let cell = self.cell(handle)?;
        if cell.computing.load(Ordering::Acquire) {
            return Err(GraphError::Cycle(handle));
        }

        let mut slot = self.lock_live(handle)?;

        if slot.stereo != ctx.stereo {
            slot.set_stereo(ctx.stereo, self.config.block_frames());
        }

        if slot.last_tick != Some(ctx.id) {
            cell.computing.store(true, Ordering::Release);
            let _flag = ComputingFlag(&cell.computing);

            let block = BlockContext::new(self, ctx);
            let Slot { node, output, .. } = &mut *slot;
            if let Some(node) = node.as_mut() {
                node.compute_block(&block, output)?;
            }
            slot.last_tick = Some(ctx.id);
        }

        Ok(BlockGuard { slot })
    }

    /// Pull one block from `handle` and copy it into `out`.
    ///
    /// Copies sample for sample when the shapes match, otherwise reads the
    /// source's first channel into every channel of `out`.
    pub fn tick_into(
        &self,
        handle: NodeHandle,
        ctx: &SynthesisContext,
        out: &mut AudioBuffer,
    ) -> Result<(), GraphError> {
        let block = self.tick(handle, ctx)?;
        if block.channels() == out.channels() && block.frames() == out.frames() {
            out.copy_from(&block);
        } else {
            out.copy_channel_from(&block, 0);
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════════════

    #[inline]
    fn cell(&self, handle: NodeHandle) -> Result<&SlotCell, GraphError> {
        self.slots
            .get(handle.index as usize)
            .ok_or(GraphError::StaleHandle(handle))
    }

    #[inline]
    fn lock_slot(&self, index: usize) -> MutexGuard<'_, Slot> {
        lock_ignoring_poison(&self.slots[index].slot)
    }

    fn lock_live(&self, handle: NodeHandle) -> Result<MutexGuard<'_, Slot>, GraphError> {
        let cell = self.cell(handle)?;
        let slot = lock_ignoring_poison(&cell.slot);
        if slot.generation != handle.generation || slot.node.is_none() {
            return Err(GraphError::StaleHandle(handle));
        }
        Ok(slot)
    }

    fn check_live(&self, handles: &[NodeHandle]) -> Result<(), GraphError> {
        for &handle in handles {
            drop(self.lock_live(handle)?);
        }
        Ok(())
    }

    /// True if `node` pulls (directly or transitively) from `upstream`.
    fn depends_on(&self, node: NodeHandle, upstream: NodeHandle) -> bool {
        let mut visited = vec![false; self.capacity()];
        let mut pending = vec![node];
        while let Some(next) = pending.pop() {
            if next == upstream {
                return true;
            }
            let Some(seen) = visited.get_mut(next.index as usize) else {
                continue;
            };
            if *seen {
                continue;
            }
            *seen = true;
            if let Ok(slot) = self.lock_live(next) {
                if let Some(n) = slot.node.as_ref() {
                    n.visit_inputs(&mut |input| pending.push(input));
                }
            }
        }
        false
    }
}

#[inline]
fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
