// src/nodes/filters.rs
//
// Filter scaffold and the State Variable Filter (SVF) kernel.
//
// Every filter pulls its input into a workspace buffer owned by the
// node, reads cutoff, Q and bypass once per block, and hands the
// workspace to a kernel that writes the node's output.

use log::trace;

use crate::audio_buffer::AudioBuffer;
use crate::config::{DEFAULT_BLOCK_SIZE, EngineConfig};
use crate::graph::{GraphError, NodeHandle};
use crate::node::{BlockContext, Generator};
use crate::parameter::ControlValue;

/// Cutoff of a freshly built filter, above the audible band.
pub const DEFAULT_CUTOFF: f32 = 20_000.0;

/// Butterworth Q.
pub const DEFAULT_Q: f32 = 0.7071;

/// Control values for one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterParams {
    pub cutoff: f32,
    pub q: f32,
    pub sample_rate: f32,
}

/// The per-sample math of a filter.
///
/// `input` and `output` always have the same shape.
pub trait FilterKernel: Send + 'static {
    fn process(&mut self, params: &FilterParams, input: &AudioBuffer, output: &mut AudioBuffer);

    /// The channel count changed; resize per-channel state.
    fn set_channels(&mut self, _channels: usize) {}

    fn reset(&mut self) {}

    fn name(&self) -> &'static str;
}

// ═══════════════════════════════════════════════════════════════════
// Filter Core
// ═══════════════════════════════════════════════════════════════════

/// State shared by every filter: input, controls and workspace.
pub struct FilterCore {
    input: Option<NodeHandle>,
    cutoff: ControlValue,
    q: ControlValue,
    bypass: ControlValue,
    workspace: AudioBuffer,
    block_frames: usize,
}

impl FilterCore {
    pub fn new() -> Self {
        let mut core = Self {
            input: None,
            cutoff: ControlValue::constant(DEFAULT_CUTOFF),
            q: ControlValue::constant(DEFAULT_Q),
            bypass: ControlValue::constant(0.0),
            workspace: AudioBuffer::default(),
            block_frames: DEFAULT_BLOCK_SIZE,
        };
        core.prepare(DEFAULT_BLOCK_SIZE);
        core
    }

    pub fn input(&self) -> Option<NodeHandle> {
        self.input
    }

    pub fn cutoff(&self) -> &ControlValue {
        &self.cutoff
    }

    pub fn q(&self) -> &ControlValue {
        &self.q
    }

    pub fn bypass(&self) -> &ControlValue {
        &self.bypass
    }

    pub fn workspace(&self) -> &AudioBuffer {
        &self.workspace
    }

    /// Size the workspace for `block_frames`, reserving room for stereo so
    /// a later mono/stereo switch never allocates.
    fn prepare(&mut self, block_frames: usize) {
        let channels = self.workspace.channels().max(1);
        self.block_frames = block_frames;
        self.workspace.resize(block_frames, 2);
        self.workspace.resize(block_frames, channels);
    }

    fn set_is_stereo(&mut self, stereo: bool) {
        self.workspace.resize(self.block_frames, if stereo { 2 } else { 1 });
    }

    /// Pull this block's input into the workspace (silence if unwired).
    fn pull(&mut self, ctx: &BlockContext<'_>) -> Result<(), GraphError> {
        match self.input {
            Some(input) => ctx.tick_into(input, &mut self.workspace),
            None => {
                self.workspace.clear();
                Ok(())
            }
        }
    }

    fn visit_inputs(&self, visit: &mut dyn FnMut(NodeHandle)) {
        if let Some(input) = self.input {
            visit(input);
        }
        for control in [&self.cutoff, &self.q, &self.bypass] {
            if let Some(node) = control.node() {
                visit(node);
            }
        }
    }
}

impl Default for FilterCore {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════
// Filter Node
// ═══════════════════════════════════════════════════════════════════

/// A filter node running kernel `K`.
pub struct Filter<K: FilterKernel> {
    core: FilterCore,
    kernel: K,
}

impl<K: FilterKernel> Filter<K> {
    pub fn new(kernel: K) -> Self {
        Self {
            core: FilterCore::new(),
            kernel,
        }
    }

    pub fn with_input(mut self, input: NodeHandle) -> Self {
        self.core.input = Some(input);
        self
    }

    pub fn with_cutoff(mut self, cutoff: impl Into<ControlValue>) -> Self {
        self.core.cutoff = cutoff.into();
        self
    }

    pub fn with_q(mut self, q: impl Into<ControlValue>) -> Self {
        self.core.q = q.into();
        self
    }

    pub fn set_cutoff(&mut self, cutoff: impl Into<ControlValue>) {
        self.core.cutoff = cutoff.into();
    }

    pub fn set_q(&mut self, q: impl Into<ControlValue>) {
        self.core.q = q.into();
    }

    /// Nonzero passes the input through untouched.
    pub fn set_bypass(&mut self, bypass: impl Into<ControlValue>) {
        self.core.bypass = bypass.into();
    }

    pub fn core(&self) -> &FilterCore {
        &self.core
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }
}

impl<K: FilterKernel> Generator for Filter<K> {
    fn prepare(&mut self, config: &EngineConfig) {
        self.core.prepare(config.block_frames());
        self.kernel.set_channels(self.core.workspace.channels());
    }

    fn compute_block(&mut self, ctx: &BlockContext<'_>, output: &mut AudioBuffer) -> Result<(), GraphError> {
        self.core.pull(ctx)?;

        if self.core.bypass.value(ctx)? != 0.0 {
            output.copy_from(&self.core.workspace);
            return Ok(());
        }

        let params = FilterParams {
            cutoff: self.core.cutoff.value(ctx)?,
            q: self.core.q.value(ctx)?,
            sample_rate: ctx.sample_rate(),
        };
        self.kernel.process(&params, &self.core.workspace, output);
        Ok(())
    }

    fn set_is_stereo(&mut self, stereo: bool) {
        trace!("{}: workspace -> {}", self.kernel.name(), if stereo { "stereo" } else { "mono" });
        self.core.set_is_stereo(stereo);
        self.kernel.set_channels(self.core.workspace.channels());
    }

    fn visit_inputs(&self, visit: &mut dyn FnMut(NodeHandle)) {
        self.core.visit_inputs(visit);
    }

    /// Connecting sets the audio input.
    fn connect(&mut self, source: NodeHandle) -> Result<(), GraphError> {
        self.core.input = Some(source);
        Ok(())
    }

    fn reset(&mut self) {
        self.core.workspace.clear();
        self.kernel.reset();
    }

    fn name(&self) -> &'static str {
        self.kernel.name()
    }
}

// ═══════════════════════════════════════════════════════════════════
// State Variable Filter
// ═══════════════════════════════════════════════════════════════════

/// Response of the SVF kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    Lowpass,
    Highpass,
    Bandpass,
    Notch,
}

/// Trapezoidal-integrated SVF, one state pair per channel.
pub struct SvfKernel {
    filter_type: FilterType,
    state: Vec<[f32; 2]>,
    params: Option<FilterParams>,

    // Cached coefficients
    k: f32,
    a1: f32,
    a2: f32,
    a3: f32,
}

impl SvfKernel {
    pub fn new(filter_type: FilterType) -> Self {
        Self {
            filter_type,
            state: vec![[0.0; 2]; 2],
            params: None,
            k: 0.0,
            a1: 0.0,
            a2: 0.0,
            a3: 0.0,
        }
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    fn update_coefficients(&mut self, params: &FilterParams) {
        if self.params.as_ref() == Some(params) {
            return;
        }
        self.params = Some(*params);

        let cutoff = params.cutoff.clamp(20.0, (params.sample_rate * 0.49).max(20.0));
        let q = params.q.max(0.05);

        let g = (std::f32::consts::PI * cutoff / params.sample_rate).tan();
        self.k = 1.0 / q;
        self.a1 = 1.0 / (1.0 + g * (g + self.k));
        self.a2 = g * self.a1;
        self.a3 = g * self.a2;
    }

    #[inline]
    fn process_sample(&self, state: &mut [f32; 2], input: f32) -> f32 {
        let [ic1eq, ic2eq] = *state;
        let v3 = input - ic2eq;
        let v1 = self.a1 * ic1eq + self.a2 * v3;
        let v2 = ic2eq + self.a2 * ic1eq + self.a3 * v3;
        *state = [2.0 * v1 - ic1eq, 2.0 * v2 - ic2eq];

        match self.filter_type {
            FilterType::Lowpass => v2,
            FilterType::Highpass => input - self.k * v1 - v2,
            FilterType::Bandpass => v1,
            FilterType::Notch => input - self.k * v1,
        }
    }
}

impl FilterKernel for SvfKernel {
    fn process(&mut self, params: &FilterParams, input: &AudioBuffer, output: &mut AudioBuffer) {
        self.update_coefficients(params);

        let channels = input.channels().max(1).min(self.state.len());
        let mut state = std::mem::take(&mut self.state);
        for (src, dst) in input
            .samples()
            .chunks_exact(channels)
            .zip(output.samples_mut().chunks_exact_mut(channels))
        {
            for ((s, d), st) in src.iter().zip(dst.iter_mut()).zip(state.iter_mut()) {
                *d = self.process_sample(st, *s);
            }
        }
        self.state = state;
    }

    fn set_channels(&mut self, channels: usize) {
        // Capacity for two channels is reserved up front.
        self.state.resize(channels.max(1), [0.0; 2]);
    }

    fn reset(&mut self) {
        self.state.fill([0.0; 2]);
    }

    fn name(&self) -> &'static str {
        match self.filter_type {
            FilterType::Lowpass => "Lowpass",
            FilterType::Highpass => "Highpass",
            FilterType::Bandpass => "Bandpass",
            FilterType::Notch => "Notch",
        }
    }
}

pub type SvfFilter = Filter<SvfKernel>;

impl SvfFilter {
    pub fn lowpass() -> Self {
        Filter::new(SvfKernel::new(FilterType::Lowpass))
    }

    pub fn highpass() -> Self {
        Filter::new(SvfKernel::new(FilterType::Highpass))
    }

    pub fn bandpass() -> Self {
        Filter::new(SvfKernel::new(FilterType::Bandpass))
    }

    pub fn notch() -> Self {
        Filter::new(SvfKernel::new(FilterType::Notch))
    }
}
