// src/main.rs
//
// Renders a short vibrato patch and logs block peaks.
// RUST_LOG=debug shows graph construction.

use hyasynth_graph::nodes::{SineOsc, SvfFilter, TableLookupOsc};
use hyasynth_graph::{EngineConfig, Synth, SynthError};
use log::info;

fn main() -> Result<(), SynthError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = EngineConfig::default();
    let mut synth = Synth::new(config)?;
    let graph = synth.graph().clone();

    // --------------------------------
    // Parameters
    // --------------------------------

    let volume = synth.add_parameter("volume", 0.5, 0.0, 1.0)?;
    let cutoff = synth.add_parameter("cutoff", 1_200.0, 20.0, 20_000.0)?;

    // --------------------------------
    // Patch: 440 Hz +/- 20 Hz at 5 Hz, lowpassed
    // --------------------------------

    let lfo = graph.insert(SineOsc::new(synth.tables()).with_frequency(5.0))?;
    let depth = graph.constant(20.0)?;
    let center = graph.constant(440.0)?;
    let wobble = graph.product(&[lfo, depth])?;
    let frequency = graph.sum(&[center, wobble])?;

    let carrier = graph.insert(TableLookupOsc::sine(synth.tables()))?;
    graph.connect(frequency, carrier)?;

    let filter = graph.insert(SvfFilter::lowpass().with_input(carrier).with_cutoff(cutoff))?;
    let gain = graph.control(volume)?;
    let output = graph.product(&[filter, gain])?;

    synth.set_output(output)?;
    synth.set_stereo(true)?;

    // --------------------------------
    // Render
    // --------------------------------

    info!("rendering {} Hz, {} frames per block", config.sample_rate, config.block_frames());

    for block in 0..16 {
        if block == 8 {
            synth.set_parameter("volume", 0.1)?;
            synth.set_parameter("cutoff", 300.0)?;
        }
        let out = synth.render_block();
        let peak = out.samples().iter().fold(0.0_f32, |m, &s| m.max(s.abs()));
        info!("block {:2}: peak {:.4}", block, peak);
    }

    if let Err(err) = synth.set_parameter("resonance", 0.5) {
        info!("expected: {}", err);
    }

    for p in synth.get_parameters() {
        info!("{} = {} in [{}, {}]", p.name, p.value, p.min, p.max);
    }

    Ok(())
}
