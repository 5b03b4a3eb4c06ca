// src/node.rs

use std::any::Any;

use crate::audio_buffer::AudioBuffer;
use crate::config::EngineConfig;
use crate::graph::{BlockGuard, Graph, GraphError, NodeHandle};

/// Token for one render call of the whole graph.
///
/// Created by the host (or [`Synth`](crate::synth::Synth)) once per block
/// and passed by reference through the entire recursive evaluation. The
/// `id` is what nodes memoize against: every node evaluated under the
/// same context computes at most once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthesisContext {
    /// Monotonic render-call identifier
    pub id: u64,

    /// Frames rendered before this block
    pub elapsed_frames: u64,

    /// Sample rate for this pass
    pub sample_rate: f32,

    /// Stereo (2 channels) or mono (1 channel) output
    pub stereo: bool,
}

impl SynthesisContext {
    /// Context for the first render call.
    pub fn new(sample_rate: f32, stereo: bool) -> Self {
        Self {
            id: 0,
            elapsed_frames: 0,
            sample_rate,
            stereo,
        }
    }

    /// Context for the render call following this one.
    #[inline]
    pub fn next(&self, block_frames: usize) -> Self {
        Self {
            id: self.id.wrapping_add(1),
            elapsed_frames: self.elapsed_frames + block_frames as u64,
            ..*self
        }
    }

    pub fn with_stereo(mut self, stereo: bool) -> Self {
        self.stereo = stereo;
        self
    }

    #[inline]
    pub fn channels(&self) -> usize {
        if self.stereo { 2 } else { 1 }
    }
}

/// What a generator sees while computing one block.
#[derive(Clone, Copy)]
pub struct BlockContext<'g> {
    graph: &'g Graph,
    synthesis: &'g SynthesisContext,
}

impl<'g> BlockContext<'g> {
    pub(crate) fn new(graph: &'g Graph, synthesis: &'g SynthesisContext) -> Self {
        Self { graph, synthesis }
    }

    #[inline]
    pub fn synthesis(&self) -> &SynthesisContext {
        self.synthesis
    }

    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.synthesis.sample_rate
    }

    #[inline]
    pub fn is_stereo(&self) -> bool {
        self.synthesis.stereo
    }

    #[inline]
    pub fn block_frames(&self) -> usize {
        self.graph.config().block_frames()
    }

    /// Pull an input's output for this block (memoized).
    #[inline]
    pub fn tick(&self, handle: NodeHandle) -> Result<BlockGuard<'g>, GraphError> {
        self.graph.tick(handle, self.synthesis)
    }

    /// Pull an input and copy its block into `out`.
    #[inline]
    pub fn tick_into(&self, handle: NodeHandle, out: &mut AudioBuffer) -> Result<(), GraphError> {
        self.graph.tick_into(handle, self.synthesis, out)
    }
}

/// Core generator trait.
///
/// Generators:
/// - do NOT memoize (the graph does that, keyed by context id)
/// - do NOT allocate in `compute_block`
/// - own any workspace they need, sized in `prepare` / `set_is_stereo`
pub trait Generator: Any + Send {
    /// Called once when the node is inserted into a graph.
    fn prepare(&mut self, _config: &EngineConfig) {}

    /// Fill `output` for this block.
    ///
    /// `output` is already shaped to the block length and the current
    /// channel count. Inputs are pulled through `ctx`.
    fn compute_block(&mut self, ctx: &BlockContext<'_>, output: &mut AudioBuffer) -> Result<(), GraphError>;

    /// Resize any auxiliary workspace for a channel-count change.
    ///
    /// The graph resizes the output buffer and recurses into inputs.
    fn set_is_stereo(&mut self, _stereo: bool) {}

    /// Report every directly referenced sub-generator.
    fn visit_inputs(&self, _visit: &mut dyn FnMut(NodeHandle)) {}

    /// Attach `source` as an input.
    fn connect(&mut self, _source: NodeHandle) -> Result<(), GraphError> {
        Err(GraphError::NoInputPort { node: self.name() })
    }

    /// Reset internal state (phase, filter memory).
    fn reset(&mut self) {}

    /// Short type name for diagnostics.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_context_is_monotonic() {
        let first = SynthesisContext::new(48_000.0, false);
        let second = first.next(64);
        let third = second.next(64);
        assert!(second.id > first.id);
        assert!(third.id > second.id);
        assert_eq!(third.elapsed_frames, 128);
        assert_eq!(third.sample_rate, 48_000.0);
    }

    #[test]
    fn test_channels_follow_stereo_flag() {
        let ctx = SynthesisContext::new(44_100.0, false);
        assert_eq!(ctx.channels(), 1);
        assert_eq!(ctx.with_stereo(true).channels(), 2);
    }
}
