// src/nodes/sine.rs
//
// Sine oscillators over the shared 2048-sample sine table.

use std::sync::Arc;

use crate::audio_buffer::AudioBuffer;
use crate::graph::{GraphError, NodeHandle};
use crate::node::{BlockContext, Generator};
use crate::parameter::ControlValue;

use super::oscillators::TableLookupOsc;
use super::phase::PhaseAccumulator;
use super::tables::{SampleTable, TableRegistry};

/// Frequency-modulated sine: a [`TableLookupOsc`] over the sine table.
///
/// Build one with [`TableLookupOsc::sine`].
pub type ModSineOsc = TableLookupOsc;

// ═══════════════════════════════════════════════════════════════════
// Sine Oscillator
// ═══════════════════════════════════════════════════════════════════

/// Sine at a control-rate frequency.
///
/// The frequency is read once per block, so the phase increment is
/// constant within a block. Use [`ModSineOsc`] for audio-rate modulation.
pub struct SineOsc {
    table: Arc<SampleTable>,
    frequency: ControlValue,
    phase: PhaseAccumulator,
    phase_offset: f64,
}

impl SineOsc {
    pub fn new(tables: &mut TableRegistry) -> Self {
        let table = tables.sine();
        Self {
            phase: PhaseAccumulator::for_table(&table),
            table,
            frequency: ControlValue::constant(440.0),
            phase_offset: 0.0,
        }
    }

    pub fn with_frequency(mut self, frequency: impl Into<ControlValue>) -> Self {
        self.frequency = frequency.into();
        self
    }

    pub fn set_frequency(&mut self, frequency: impl Into<ControlValue>) {
        self.frequency = frequency.into();
    }

    pub fn frequency(&self) -> &ControlValue {
        &self.frequency
    }

    /// Read the table at `rate` samples per output frame (negative runs
    /// backwards). Replaces the frequency with the equivalent constant.
    pub fn set_rate(&mut self, rate: f32, sample_rate: f32) {
        let hz = rate * sample_rate / self.table.len() as f32;
        self.frequency = ControlValue::constant(hz);
    }

    /// Move the read position by `samples` table samples.
    pub fn add_time(&mut self, samples: f64) {
        self.phase.add_phase(samples);
    }

    /// Move the read position by `cycles` (1.0 is a full period).
    pub fn add_phase(&mut self, cycles: f64) {
        self.phase.add_phase(cycles * self.table.len() as f64);
    }

    /// Set a phase offset in cycles, relative to the previous offset.
    pub fn add_phase_offset(&mut self, offset: f64) {
        self.add_phase(offset - self.phase_offset);
        self.phase_offset = offset;
    }

    /// Current phase in cycles, in `[0, 1)`.
    pub fn phase(&self) -> f64 {
        self.phase.phase() / self.table.len() as f64
    }
}

impl Generator for SineOsc {
    fn compute_block(&mut self, ctx: &BlockContext<'_>, output: &mut AudioBuffer) -> Result<(), GraphError> {
        let hz = self.frequency.value(ctx)?;
        let increment = hz as f64 * self.table.len() as f64 / ctx.sample_rate() as f64;
        self.phase.render_constant(self.table.data(), increment, output);
        Ok(())
    }

    fn visit_inputs(&self, visit: &mut dyn FnMut(NodeHandle)) {
        if let Some(source) = self.frequency.node() {
            visit(source);
        }
    }

    fn connect(&mut self, source: NodeHandle) -> Result<(), GraphError> {
        self.frequency = ControlValue::Generated(source);
        Ok(())
    }

    /// Rewinds the read position. The phase offset is kept.
    fn reset(&mut self) {
        self.phase.set_phase(0.0);
    }

    fn name(&self) -> &'static str {
        "SineOsc"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::graph::Graph;
    use crate::node::SynthesisContext;
    use float_cmp::approx_eq;

    const RATE: f32 = 48_000.0;

    #[test]
    fn test_sine_matches_reference() {
        let graph = Graph::new(EngineConfig::new(RATE, 64).with_max_nodes(4)).unwrap();
        let mut tables = TableRegistry::new();
        let osc = graph.insert(SineOsc::new(&mut tables).with_frequency(440.0)).unwrap();

        let mut ctx = SynthesisContext::new(RATE, false);
        for block in 0..4 {
            let out = graph.tick(osc, &ctx).unwrap();
            for frame in 0..out.frames() {
                let t = (block * 64 + frame) as f64 / RATE as f64;
                let expected = (std::f64::consts::TAU * 440.0 * t).sin() as f32;
                assert!(approx_eq!(f32, out[frame], expected, epsilon = 1e-4), "frame {frame}");
            }
            drop(out);
            ctx = ctx.next(64);
        }
    }

    #[test]
    fn test_frequency_far_above_nyquist() {
        let graph = Graph::new(EngineConfig::new(RATE, 64).with_max_nodes(4)).unwrap();
        let mut tables = TableRegistry::new();
        let osc = graph.insert(SineOsc::new(&mut tables).with_frequency(400_000.0)).unwrap();

        let mut ctx = SynthesisContext::new(RATE, false);
        for block in 0..4 {
            let out = graph.tick(osc, &ctx).unwrap();
            for frame in 0..out.frames() {
                let cycles = (block * 64 + frame) as f64 * 400_000.0 / RATE as f64;
                let expected = (std::f64::consts::TAU * cycles.fract()).sin() as f32;
                assert!(approx_eq!(f32, out[frame], expected, epsilon = 1e-3), "block {block} frame {frame}");
            }
            drop(out);
            ctx = ctx.next(64);
        }
    }

    #[test]
    fn test_frequency_read_once_per_block() {
        let graph = Graph::new(EngineConfig::new(RATE, 16).with_max_nodes(4)).unwrap();
        let mut tables = TableRegistry::new();
        let freq = graph.constant(RATE / 2048.0).unwrap();
        let osc = graph.insert(SineOsc::new(&mut tables)).unwrap();
        graph.connect(freq, osc).unwrap();

        drop(graph.tick(osc, &SynthesisContext::new(RATE, false)).unwrap());
        let phase = graph.with_node_mut::<SineOsc, _>(osc, |o| o.phase()).unwrap();
        assert!(approx_eq!(f64, phase, 16.0 / 2048.0, epsilon = 1e-9));
    }

    #[test]
    fn test_phase_adjustments() {
        let mut tables = TableRegistry::new();
        let mut osc = SineOsc::new(&mut tables);

        osc.add_phase(0.25);
        assert!(approx_eq!(f64, osc.phase(), 0.25));
        osc.add_time(-1024.0);
        assert!(approx_eq!(f64, osc.phase(), 0.75));

        osc.add_phase_offset(0.5);
        assert!(approx_eq!(f64, osc.phase(), 0.25));
        // Offsets are absolute: the same offset twice is a no-op.
        osc.add_phase_offset(0.5);
        assert!(approx_eq!(f64, osc.phase(), 0.25));

        osc.reset();
        assert_eq!(osc.phase(), 0.0);
    }

    #[test]
    fn test_set_rate_is_table_samples_per_frame() {
        let mut tables = TableRegistry::new();
        let mut osc = SineOsc::new(&mut tables);
        osc.set_rate(2.0, RATE);
        assert_eq!(osc.frequency().current(), Some(2.0 * RATE / 2048.0));
    }

    #[test]
    fn test_shared_table_across_oscillators() {
        let mut tables = TableRegistry::new();
        let plain = SineOsc::new(&mut tables);
        let modulated = ModSineOsc::sine(&mut tables);
        assert!(Arc::ptr_eq(&plain.table, modulated.sample_table()));
        assert_eq!(tables.len(), 1);
    }
}
