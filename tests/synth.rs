// tests/synth.rs
//
// End-to-end rendering through the public API.

use std::sync::Arc;
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use float_cmp::approx_eq;
use hyasynth_graph::nodes::{SampleTable, SineOsc, SvfFilter, TableLookupOsc};
use hyasynth_graph::{
    AudioBuffer, BlockContext, EngineConfig, Generator, Graph, GraphError, NodeHandle, ParameterError, Synth,
    SynthError,
};

const RATE: f32 = 48_000.0;

fn synth(block: usize) -> Synth {
    let _ = env_logger::builder().is_test(true).try_init();
    Synth::new(EngineConfig::new(RATE, block).with_max_nodes(32)).unwrap()
}

/// Counts its computations; outputs the frame's absolute position.
struct Clock {
    computed: Arc<AtomicUsize>,
}

impl Generator for Clock {
    fn compute_block(&mut self, ctx: &BlockContext<'_>, output: &mut AudioBuffer) -> Result<(), GraphError> {
        self.computed.fetch_add(1, Ordering::SeqCst);
        let start = ctx.synthesis().elapsed_frames;
        for frame in 0..output.frames() {
            output[(frame, 0)] = (start + frame as u64) as f32;
        }
        output.fill_channels();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Clock"
    }
}

#[test]
fn test_gain_parameter_scenario() {
    let mut synth = synth(8);
    let gain = synth.add_parameter("gain", 0.5, 0.0, 1.0).unwrap();
    let graph = synth.graph().clone();
    let one = graph.constant(1.0).unwrap();
    let level = graph.control(gain.clone()).unwrap();
    let out = graph.product(&[one, level]).unwrap();
    synth.set_output(out).unwrap();

    assert!(synth.render_block().samples().iter().all(|&s| s == 0.5));

    synth.set_parameter("gain", 2.0).unwrap();
    assert_eq!(gain.current(), Some(1.0));

    let err = synth.set_parameter("volume", 0.3).unwrap_err();
    assert!(matches!(err, SynthError::Parameter(ParameterError::Unregistered(ref n)) if n == "volume"));
    assert_eq!(gain.current(), Some(1.0));

    assert!(synth.render_block().samples().iter().all(|&s| s == 1.0));
}

#[test]
fn test_shared_lfo_computes_once_per_block() {
    let mut synth = synth(16);
    let graph = synth.graph().clone();
    let computed = Arc::new(AtomicUsize::new(0));
    let lfo = graph.insert(Clock { computed: computed.clone() }).unwrap();

    // One source feeding an oscillator's frequency and a gain stage.
    let osc = graph
        .insert(TableLookupOsc::new(Arc::new(SampleTable::sine(64).unwrap())))
        .unwrap();
    graph.connect(lfo, osc).unwrap();
    let out = graph.product(&[osc, lfo]).unwrap();
    synth.set_output(out).unwrap();

    for blocks in 1..=5 {
        synth.render_block();
        assert_eq!(computed.load(Ordering::SeqCst), blocks);
    }
}

#[test]
fn test_fill_buffer_spans_block_boundaries() {
    let mut synth = synth(4);
    let graph = synth.graph().clone();
    let clock = graph.insert(Clock { computed: Arc::default() }).unwrap();
    synth.set_output(clock).unwrap();

    let mut first = [0.0; 3];
    let mut second = [0.0; 7];
    synth.fill_buffer(&mut first, 1).unwrap();
    synth.fill_buffer(&mut second, 1).unwrap();

    assert_eq!(first, [0.0, 1.0, 2.0]);
    assert_eq!(second, [3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
}

#[test]
fn test_fill_buffer_stereo_interleaves() {
    let mut synth = synth(4);
    let graph = synth.graph().clone();
    let clock = graph.insert(Clock { computed: Arc::default() }).unwrap();
    synth.set_output(clock).unwrap();

    let mut out = [0.0; 10];
    synth.fill_buffer(&mut out, 2).unwrap();
    assert!(synth.is_stereo());
    assert_eq!(out, [0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0, 4.0, 4.0]);
}

#[test]
fn test_table_oscillator_walks_integer_phases() {
    let mut synth = Synth::new(EngineConfig::new(8.0, 6).with_max_nodes(4)).unwrap();
    let table = Arc::new(SampleTable::from_samples(&[0.0, 1.0, 0.0, -1.0]).unwrap());
    // 4-sample table at 8 Hz: 2 Hz is one table sample per frame.
    let osc = synth
        .graph()
        .insert(TableLookupOsc::new(table).with_frequency(2.0))
        .unwrap();
    synth.set_output(osc).unwrap();

    let mut out = [0.0; 12];
    synth.fill_buffer(&mut out, 1).unwrap();
    assert_eq!(out, [0.0, 1.0, 0.0, -1.0, 0.0, 1.0, 0.0, -1.0, 0.0, 1.0, 0.0, -1.0]);
}

#[test]
fn test_stereo_switch_broadcasts_mono_sources() {
    let mut synth = synth(32);
    let graph = synth.graph().clone();
    let osc = graph.insert(SineOsc::new(synth.tables()).with_frequency(1_000.0)).unwrap();
    let filter = graph.insert(SvfFilter::lowpass().with_input(osc)).unwrap();
    synth.set_output(filter).unwrap();

    assert_eq!(synth.render_block().channels(), 1);
    synth.set_stereo(true).unwrap();
    let block = synth.render_block();
    assert_eq!(block.channels(), 2);
    for frame in block.samples().chunks_exact(2) {
        assert_eq!(frame[0], frame[1]);
    }
}

#[test]
fn test_vibrato_stays_in_range() {
    let mut synth = synth(64);
    let graph = synth.graph().clone();

    let lfo = graph.insert(SineOsc::new(synth.tables()).with_frequency(5.0)).unwrap();
    let depth = graph.constant(20.0).unwrap();
    let center = graph.constant(440.0).unwrap();
    let wobble = graph.product(&[lfo, depth]).unwrap();
    let frequency = graph.sum(&[center, wobble]).unwrap();
    let carrier = graph.insert(TableLookupOsc::sine(synth.tables())).unwrap();
    graph.connect(frequency, carrier).unwrap();
    synth.set_output(carrier).unwrap();

    let mut peak = 0.0_f32;
    for _ in 0..32 {
        for &s in synth.render_block().samples() {
            assert!(s.abs() <= 1.0 + 1e-6);
            peak = peak.max(s.abs());
        }
    }
    assert!(approx_eq!(f32, peak, 1.0, epsilon = 1e-3));
}

#[test]
fn test_frequency_swap_from_control_thread() {
    const BLOCK: usize = 64;
    let mut synth = synth(BLOCK);
    let graph = synth.graph().clone();
    let osc = TableLookupOsc::sine(synth.tables());
    let port = osc.frequency_input().clone();
    let osc = graph.insert(osc).unwrap();
    synth.set_output(osc).unwrap();

    let low: NodeHandle = graph.constant(220.0).unwrap();
    let done = Arc::new(AtomicBool::new(false));
    let control = {
        let done = done.clone();
        thread::spawn(move || {
            let mut i = 0_u64;
            while !done.load(Ordering::Relaxed) {
                if i % 2 == 0 {
                    port.set_node(low);
                } else {
                    port.set_value(880.0);
                }
                i += 1;
                thread::yield_now();
            }
        })
    };

    let phase = |graph: &Graph| {
        graph
            .with_node_mut::<TableLookupOsc, _>(osc, |o| o.phase())
            .unwrap()
    };

    // Every block is one clean continuation of the previous phase at the
    // initial 440 Hz, the 220 Hz node or the 880 Hz value.
    for block in 0..100 {
        let start = phase(&graph);
        let samples = synth.render_block().samples().to_vec();
        let end = phase(&graph);

        let continuation = [440.0, 220.0, 880.0].into_iter().find(|&hz: &f64| {
            let step = hz / RATE as f64;
            let matches = samples.iter().enumerate().all(|(k, &s)| {
                let expected = (TAU * (start + k as f64 * step)).sin() as f32;
                approx_eq!(f32, s, expected, epsilon = 1e-3)
            });
            let wrapped = (start + BLOCK as f64 * step).rem_euclid(1.0);
            let drift = (end - wrapped).abs();
            matches && (drift < 1e-6 || drift > 1.0 - 1e-6)
        });
        assert!(continuation.is_some(), "block {block} mixes frequencies or loses phase");
    }

    done.store(true, Ordering::Relaxed);
    control.join().unwrap();
}
