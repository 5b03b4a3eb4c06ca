// src/synth.rs
//
// Top-level synthesis unit: a graph, its output node, its parameters,
// and the render clock.

use std::sync::Arc;

use log::{debug, error};
use thiserror::Error;

use crate::audio_buffer::AudioBuffer;
use crate::config::{ConfigError, EngineConfig};
use crate::graph::{Graph, GraphError, NodeHandle};
use crate::node::SynthesisContext;
use crate::nodes::{TableError, TableRegistry};
use crate::parameter::{ControlValue, ParameterError, ParameterInfo, ParameterKind, ParameterRegistry};

#[derive(Debug, Error)]
pub enum SynthError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0} output channels requested; only mono and stereo are supported")]
    UnsupportedChannels(usize),

    #[error("buffer of {len} samples does not hold whole {channels}-channel frames")]
    MisalignedBuffer { len: usize, channels: usize },
}

/// A patch ready to render.
///
/// The graph and the parameter registry are shared (`Arc`) so the control
/// role can rewire nodes and write parameters while the render role calls
/// [`render_block`](Self::render_block) or [`fill_buffer`](Self::fill_buffer).
pub struct Synth {
    graph: Arc<Graph>,
    parameters: Arc<ParameterRegistry>,
    tables: TableRegistry,
    output: Option<NodeHandle>,
    context: SynthesisContext,

    /// Last rendered block, interleaved
    block: AudioBuffer,

    /// Frames of `block` already handed to the host
    read_pos: usize,
}

impl Synth {
    pub fn new(config: EngineConfig) -> Result<Self, SynthError> {
        let graph = Graph::new(config)?;
        let frames = config.block_frames();

        let mut block = AudioBuffer::new(frames, 2);
        block.resize(frames, 1);
        block.set_data_rate(config.sample_rate);

        debug!(
            "synth: {} Hz, {} frames per block, {} node slots",
            config.sample_rate, frames, config.max_nodes
        );

        Ok(Self {
            graph: Arc::new(graph),
            parameters: Arc::new(ParameterRegistry::new()),
            tables: TableRegistry::new(),
            output: None,
            context: SynthesisContext::new(config.sample_rate, false),
            block,
            read_pos: frames,
        })
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    pub fn parameters(&self) -> &Arc<ParameterRegistry> {
        &self.parameters
    }

    /// Tables shared by this synth's oscillators.
    pub fn tables(&mut self) -> &mut TableRegistry {
        &mut self.tables
    }

    pub fn config(&self) -> &EngineConfig {
        self.graph.config()
    }

    /// Context the next block will be rendered with.
    pub fn context(&self) -> &SynthesisContext {
        &self.context
    }

    // ═══════════════════════════════════════════════════════════════════
    // Parameters (control role)
    // ═══════════════════════════════════════════════════════════════════

    /// Register a continuous parameter. See [`ParameterRegistry::add_parameter`].
    pub fn add_parameter(&self, name: &str, value: f32, min: f32, max: f32) -> Result<ControlValue, SynthError> {
        Ok(self.parameters.add_continuous(name, value, min, max)?)
    }

    pub fn add_parameter_of_kind(
        &self,
        name: &str,
        kind: ParameterKind,
        value: f32,
        min: f32,
        max: f32,
    ) -> Result<ControlValue, SynthError> {
        Ok(self.parameters.add_parameter(name, kind, value, min, max)?)
    }

    pub fn set_parameter(&self, name: &str, value: f32) -> Result<(), SynthError> {
        Ok(self.parameters.set_parameter(name, value)?)
    }

    pub fn get_parameters(&self) -> Vec<ParameterInfo> {
        self.parameters.get_parameters()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Output
    // ═══════════════════════════════════════════════════════════════════

    /// Make `handle` the node this synth renders.
    pub fn set_output(&mut self, handle: NodeHandle) -> Result<(), SynthError> {
        if !self.graph.contains(handle) {
            return Err(GraphError::StaleHandle(handle).into());
        }
        self.graph.set_is_stereo(handle, self.context.stereo)?;
        debug!("synth output -> {}", handle);
        self.output = Some(handle);
        Ok(())
    }

    pub fn output(&self) -> Option<NodeHandle> {
        self.output
    }

    pub fn is_stereo(&self) -> bool {
        self.context.stereo
    }

    /// Switch between mono and stereo output.
    ///
    /// Frames of the current block not yet handed out are discarded.
    pub fn set_stereo(&mut self, stereo: bool) -> Result<(), SynthError> {
        if stereo == self.context.stereo {
            return Ok(());
        }
        self.context = self.context.with_stereo(stereo);
        let frames = self.block.frames();
        self.block.resize(frames, self.context.channels());
        self.block.clear();
        self.read_pos = frames;
        if let Some(output) = self.output {
            self.graph.set_is_stereo(output, stereo)?;
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Rendering (render role)
    // ═══════════════════════════════════════════════════════════════════

    /// Render one block and return it.
    ///
    /// Silence when no output is set. A failed render is logged and
    /// rendered as silence; the clock still advances.
    pub fn render_block(&mut self) -> &AudioBuffer {
        let ctx = self.context;
        self.context = ctx.next(self.block.frames());

        match self.output {
            Some(output) => {
                if let Err(err) = self.graph.tick_into(output, &ctx, &mut self.block) {
                    error!("render of block {} failed: {}", ctx.id, err);
                    self.block.clear();
                }
            }
            None => self.block.clear(),
        }

        self.read_pos = 0;
        &self.block
    }

    /// Fill `out` with interleaved samples for `channels` output channels.
    ///
    /// Any whole number of frames is accepted: blocks are rendered as
    /// needed and a partially consumed block carries over to the next call.
    pub fn fill_buffer(&mut self, out: &mut [f32], channels: usize) -> Result<(), SynthError> {
        if channels != 1 && channels != 2 {
            return Err(SynthError::UnsupportedChannels(channels));
        }
        if out.len() % channels != 0 {
            return Err(SynthError::MisalignedBuffer {
                len: out.len(),
                channels,
            });
        }
        self.set_stereo(channels == 2)?;

        let frames = self.block.frames();
        let mut written = 0;
        while written < out.len() {
            if self.read_pos >= frames {
                self.render_block();
            }
            let available = (frames - self.read_pos) * channels;
            let n = available.min(out.len() - written);
            let start = self.read_pos * channels;
            out[written..written + n].copy_from_slice(&self.block.samples()[start..start + n]);
            written += n;
            self.read_pos += n / channels;
        }
        Ok(())
    }
}
