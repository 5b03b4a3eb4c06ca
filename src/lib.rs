// src/lib.rs
//
// Pull-based block synthesis: a graph of generators evaluated once per
// render call, with parameters the control thread can write while the
// audio thread renders.

pub mod contract;

mod audio_buffer;
mod config;
mod graph;
mod modulation;
mod node;
mod parameter;
mod synth;

pub mod nodes;

pub use audio_buffer::AudioBuffer;
pub use config::{ConfigError, DEFAULT_BLOCK_SIZE, DEFAULT_MAX_NODES, DEFAULT_SAMPLE_RATE, EngineConfig};
pub use graph::{BlockGuard, Graph, GraphError, NodeHandle};
pub use modulation::ModulationInput;
pub use node::{BlockContext, Generator, SynthesisContext};
pub use parameter::{ControlValue, ParameterError, ParameterInfo, ParameterKind, ParameterRegistry, SharedValue};
pub use synth::{Synth, SynthError};
