// src/config.rs
//
// Engine configuration. Constructed once by the host and handed to the
// graph before any node is inserted.

use thiserror::Error;

pub const DEFAULT_SAMPLE_RATE: f32 = 44_100.0;
pub const DEFAULT_BLOCK_SIZE: usize = 64;
pub const DEFAULT_MAX_NODES: usize = 256;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("sample rate must be finite and positive, got {0}")]
    InvalidSampleRate(f32),

    #[error("block size must be at least one frame")]
    EmptyBlock,

    #[error("graph needs at least one node slot")]
    NoNodeSlots,
}

/// Rate and sizing constants shared by every node in a graph.
///
/// Nodes precompute rate-dependent state from this in
/// [`Generator::prepare`](crate::node::Generator::prepare), so it must be
/// fixed before the graph is populated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// Sample rate in Hz
    pub sample_rate: f32,

    /// Frames rendered per tick
    pub block_size: usize,

    /// Number of node slots in the graph arena
    pub max_nodes: usize,
}

impl EngineConfig {
    pub fn new(sample_rate: f32, block_size: usize) -> Self {
        Self {
            sample_rate,
            block_size,
            max_nodes: DEFAULT_MAX_NODES,
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: f32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    #[inline]
    pub fn block_frames(&self) -> usize {
        self.block_size
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(ConfigError::InvalidSampleRate(self.sample_rate));
        }
        if self.block_size == 0 {
            return Err(ConfigError::EmptyBlock);
        }
        if self.max_nodes == 0 {
            return Err(ConfigError::NoNodeSlots);
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, DEFAULT_BLOCK_SIZE)
    }
}
