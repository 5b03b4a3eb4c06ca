// src/nodes/mod.rs
//
// Standard generators.

mod filters;
mod oscillators;
mod phase;
mod sine;
mod tables;
mod utility;

pub use filters::*;
pub use oscillators::*;
pub use phase::{PhaseAccumulator, PhaseCursor};
pub use sine::*;
pub use tables::*;
pub use utility::*;
