// src/nodes/utility.rs
//
// Constant and mixing nodes.

use crate::audio_buffer::AudioBuffer;
use crate::graph::{GraphError, NodeHandle};
use crate::node::{BlockContext, Generator};
use crate::parameter::ControlValue;

// ═══════════════════════════════════════════════════════════════════
// Fixed Value
// ═══════════════════════════════════════════════════════════════════

/// Outputs a control value on every sample.
///
/// Built from a registered parameter, this is how a knob enters the
/// signal graph.
pub struct FixedValue {
    value: ControlValue,
}

impl FixedValue {
    pub fn new(value: ControlValue) -> Self {
        Self { value }
    }

    pub fn value(&self) -> &ControlValue {
        &self.value
    }

    pub fn set_value(&mut self, value: impl Into<ControlValue>) {
        self.value = value.into();
    }
}

impl Generator for FixedValue {
    fn compute_block(&mut self, ctx: &BlockContext<'_>, output: &mut AudioBuffer) -> Result<(), GraphError> {
        output.fill(self.value.value(ctx)?);
        Ok(())
    }

    fn visit_inputs(&self, visit: &mut dyn FnMut(NodeHandle)) {
        if let Some(node) = self.value.node() {
            visit(node);
        }
    }

    fn name(&self) -> &'static str {
        "FixedValue"
    }
}

// ═══════════════════════════════════════════════════════════════════
// Sum / Product
// ═══════════════════════════════════════════════════════════════════

/// Adds its inputs sample by sample. No inputs is silence.
pub struct Sum {
    inputs: Vec<NodeHandle>,
}

impl Sum {
    pub fn with_inputs(inputs: Vec<NodeHandle>) -> Self {
        Self { inputs }
    }

    pub fn inputs(&self) -> &[NodeHandle] {
        &self.inputs
    }
}

impl Generator for Sum {
    fn compute_block(&mut self, ctx: &BlockContext<'_>, output: &mut AudioBuffer) -> Result<(), GraphError> {
        output.clear();
        for &input in &self.inputs {
            *output += &*ctx.tick(input)?;
        }
        Ok(())
    }

    fn visit_inputs(&self, visit: &mut dyn FnMut(NodeHandle)) {
        self.inputs.iter().copied().for_each(visit);
    }

    fn connect(&mut self, source: NodeHandle) -> Result<(), GraphError> {
        self.inputs.push(source);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Sum"
    }
}

/// Multiplies its inputs sample by sample. No inputs is unity.
pub struct Product {
    inputs: Vec<NodeHandle>,
}

impl Product {
    pub fn with_inputs(inputs: Vec<NodeHandle>) -> Self {
        Self { inputs }
    }

    pub fn inputs(&self) -> &[NodeHandle] {
        &self.inputs
    }
}

impl Generator for Product {
    fn compute_block(&mut self, ctx: &BlockContext<'_>, output: &mut AudioBuffer) -> Result<(), GraphError> {
        output.fill(1.0);
        for &input in &self.inputs {
            *output *= &*ctx.tick(input)?;
        }
        Ok(())
    }

    fn visit_inputs(&self, visit: &mut dyn FnMut(NodeHandle)) {
        self.inputs.iter().copied().for_each(visit);
    }

    fn connect(&mut self, source: NodeHandle) -> Result<(), GraphError> {
        self.inputs.push(source);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Product"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::graph::Graph;
    use crate::node::SynthesisContext;

    fn graph() -> Graph {
        Graph::new(EngineConfig::new(48_000.0, 8).with_max_nodes(8)).unwrap()
    }

    #[test]
    fn test_sum_and_product() {
        let graph = graph();
        let a = graph.constant(0.5).unwrap();
        let b = graph.constant(0.25).unwrap();
        let sum = graph.sum(&[a, b]).unwrap();
        let product = graph.product(&[a, b, sum]).unwrap();

        let ctx = SynthesisContext::new(48_000.0, false);
        assert!(graph.tick(sum, &ctx).unwrap().samples().iter().all(|&s| s == 0.75));
        assert!(graph.tick(product, &ctx).unwrap().samples().iter().all(|&s| s == 0.5 * 0.25 * 0.75));
    }

    #[test]
    fn test_empty_mixers() {
        let graph = graph();
        let sum = graph.sum(&[]).unwrap();
        let product = graph.product(&[]).unwrap();
        let ctx = SynthesisContext::new(48_000.0, false);
        assert!(graph.tick(sum, &ctx).unwrap().samples().iter().all(|&s| s == 0.0));
        assert!(graph.tick(product, &ctx).unwrap().samples().iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_connect_appends_inputs() {
        let graph = graph();
        let sum = graph.sum(&[]).unwrap();
        for value in [1.0, 2.0, 3.0] {
            let input = graph.constant(value).unwrap();
            graph.connect(input, sum).unwrap();
        }
        let ctx = SynthesisContext::new(48_000.0, true);
        let out = graph.tick(sum, &ctx).unwrap();
        assert_eq!(out.channels(), 2);
        assert!(out.samples().iter().all(|&s| s == 6.0));
    }

    #[test]
    fn test_fixed_value_tracks_parameter() {
        let graph = graph();
        let knob = ControlValue::constant(0.1);
        let node = graph.control(knob.clone()).unwrap();

        let ctx = SynthesisContext::new(48_000.0, false);
        assert_eq!(graph.tick(node, &ctx).unwrap()[0], 0.1);
        knob.set(0.9);
        // Memoized for the same context
        assert_eq!(graph.tick(node, &ctx).unwrap()[0], 0.1);
        assert_eq!(graph.tick(node, &ctx.next(8)).unwrap()[0], 0.9);
    }
}
