// src/nodes/oscillators.rs
//
// Table-lookup oscillator with a per-sample frequency input.

use std::sync::Arc;

use log::debug;

use crate::audio_buffer::AudioBuffer;
use crate::config::{DEFAULT_BLOCK_SIZE, EngineConfig};
use crate::graph::{GraphError, NodeHandle};
use crate::modulation::ModulationInput;
use crate::node::{BlockContext, Generator};
use crate::parameter::ControlValue;

use super::phase::PhaseAccumulator;
use super::tables::{SampleTable, TableRegistry};

const DEFAULT_FREQUENCY: f32 = 440.0;

// ═══════════════════════════════════════════════════════════════════
// Table Lookup Oscillator
// ═══════════════════════════════════════════════════════════════════

/// Reads a sample table at a rate set by its frequency input.
///
/// The frequency is a [`ModulationInput`], so another generator can drive
/// it sample by sample and the control role can swap that generator
/// between blocks. Output is mono and broadcast to every channel.
pub struct TableLookupOsc {
    table: Arc<SampleTable>,
    frequency: ModulationInput,
    phase: PhaseAccumulator,
    /// One frequency (then increment) per frame; always mono.
    mod_frames: AudioBuffer,
}

impl TableLookupOsc {
    pub fn new(table: Arc<SampleTable>) -> Self {
        Self {
            phase: PhaseAccumulator::for_table(&table),
            table,
            frequency: ModulationInput::new(ControlValue::constant(DEFAULT_FREQUENCY)),
            mod_frames: AudioBuffer::new(DEFAULT_BLOCK_SIZE, 1),
        }
    }

    /// Oscillator over the registry's shared sine table.
    pub fn sine(tables: &mut TableRegistry) -> Self {
        Self::new(tables.sine())
    }

    pub fn with_frequency(self, frequency: impl Into<ControlValue>) -> Self {
        self.frequency.set(frequency.into());
        self
    }

    /// Rewire the frequency source.
    pub fn set_frequency(&self, frequency: impl Into<ControlValue>) {
        self.frequency.set(frequency.into());
    }

    pub fn set_frequency_value(&self, hz: f32) {
        self.frequency.set_value(hz);
    }

    /// The frequency port. Clone it to rewire the oscillator from the
    /// control role without going through the graph.
    pub fn frequency_input(&self) -> &ModulationInput {
        &self.frequency
    }

    /// Swap the waveform, keeping the relative phase.
    pub fn set_sample_table(&mut self, table: Arc<SampleTable>) {
        let position = self.phase.phase() / self.phase.table_len() as f64;
        let mut phase = PhaseAccumulator::for_table(&table);
        phase.set_phase(position * table.len() as f64);
        debug!("table oscillator: {} -> {} samples", self.table.len(), table.len());
        self.phase = phase;
        self.table = table;
    }

    pub fn sample_table(&self) -> &Arc<SampleTable> {
        &self.table
    }

    /// Current phase in cycles, in `[0, 1)`.
    pub fn phase(&self) -> f64 {
        self.phase.phase() / self.phase.table_len() as f64
    }
}

impl Generator for TableLookupOsc {
    fn prepare(&mut self, config: &EngineConfig) {
        self.mod_frames.resize(config.block_frames(), 1);
    }

    fn compute_block(&mut self, ctx: &BlockContext<'_>, output: &mut AudioBuffer) -> Result<(), GraphError> {
        self.frequency.tick_into(ctx, &mut self.mod_frames)?;

        let scale = self.table.len() as f32 / ctx.sample_rate();
        for increment in self.mod_frames.samples_mut() {
            *increment *= scale;
        }

        self.phase.render_modulated(self.table.data(), &self.mod_frames, output);
        Ok(())
    }

    fn visit_inputs(&self, visit: &mut dyn FnMut(NodeHandle)) {
        if let Some(source) = self.frequency.node() {
            visit(source);
        }
    }

    /// Connecting drives the frequency.
    fn connect(&mut self, source: NodeHandle) -> Result<(), GraphError> {
        self.frequency.set_node(source);
        Ok(())
    }

    fn reset(&mut self) {
        self.phase.set_phase(0.0);
    }

    fn name(&self) -> &'static str {
        "TableLookupOsc"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::node::SynthesisContext;
    use float_cmp::approx_eq;

    const RATE: f32 = 8.0;

    fn graph() -> Graph {
        Graph::new(EngineConfig::new(RATE, 6).with_max_nodes(8)).unwrap()
    }

    fn square_wave() -> Arc<SampleTable> {
        Arc::new(SampleTable::from_samples(&[0.0, 1.0, 0.0, -1.0]).unwrap())
    }

    #[test]
    fn test_quarter_rate_walks_the_table() {
        let graph = graph();
        // 4 samples at 8 Hz, 2 Hz: exactly one table sample per frame
        let osc = graph.insert(TableLookupOsc::new(square_wave()).with_frequency(2.0)).unwrap();

        let ctx = SynthesisContext::new(RATE, false);
        assert_eq!(graph.tick(osc, &ctx).unwrap().samples(), &[0.0, 1.0, 0.0, -1.0, 0.0, 1.0]);
        let next = ctx.next(6);
        assert_eq!(graph.tick(osc, &next).unwrap().samples(), &[0.0, -1.0, 0.0, 1.0, 0.0, -1.0]);
    }

    #[test]
    fn test_mono_output_is_broadcast() {
        let graph = graph();
        let osc = graph.insert(TableLookupOsc::new(square_wave()).with_frequency(2.0)).unwrap();
        let ctx = SynthesisContext::new(RATE, true);
        let out = graph.tick(osc, &ctx).unwrap();
        assert_eq!(out.channels(), 2);
        for frame in 0..out.frames() {
            assert_eq!(out[(frame, 0)], out[(frame, 1)]);
        }
    }

    #[test]
    fn test_frequency_follows_generator() {
        let graph = graph();
        let freq = graph.constant(1.0).unwrap();
        let osc = graph.insert(TableLookupOsc::new(square_wave())).unwrap();
        graph.connect(freq, osc).unwrap();

        // 1 Hz: half a table sample per frame
        let ctx = SynthesisContext::new(RATE, false);
        let out = graph.tick(osc, &ctx).unwrap();
        assert!(approx_eq!(f32, out[1], 0.5));
        assert!(approx_eq!(f32, out[2], 1.0));
        assert!(approx_eq!(f32, out[3], 0.5));
    }

    #[test]
    fn test_frequency_port_swaps_between_blocks() {
        let graph = graph();
        let osc = TableLookupOsc::new(square_wave()).with_frequency(2.0);
        let port = osc.frequency_input().clone();
        let osc = graph.insert(osc).unwrap();

        let ctx = SynthesisContext::new(RATE, false);
        drop(graph.tick(osc, &ctx).unwrap());

        port.set_value(0.0);
        let held = graph.tick(osc, &ctx.next(6)).unwrap().samples().to_vec();
        assert!(held.iter().all(|&s| s == held[0]));
    }

    #[test]
    fn test_set_sample_table_keeps_relative_phase() {
        let mut osc = TableLookupOsc::new(square_wave());
        osc.phase.set_phase(1.0);
        osc.set_sample_table(Arc::new(SampleTable::sine(16).unwrap()));
        assert!(approx_eq!(f64, osc.phase(), 0.25));
        assert_eq!(osc.sample_table().len(), 16);
    }

    #[test]
    fn test_reset_rewinds_phase() {
        let graph = graph();
        let osc = graph.insert(TableLookupOsc::new(square_wave()).with_frequency(2.0)).unwrap();
        let ctx = SynthesisContext::new(RATE, false);
        drop(graph.tick(osc, &ctx).unwrap());

        graph.reset(osc).unwrap();
        let phase = graph.with_node_mut::<TableLookupOsc, _>(osc, |o| o.phase()).unwrap();
        assert_eq!(phase, 0.0);
    }
}
