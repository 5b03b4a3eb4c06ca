use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};
use thiserror::Error;

use crate::graph::{GraphError, NodeHandle};
use crate::node::BlockContext;

/// A scalar shared between the control thread and the render thread.
///
/// Stored as `f32` bits in an atomic. Loads and stores are relaxed: a
/// render block sees either the old or the new value, never a torn one,
/// with no ordering against other writes.
#[derive(Debug, Clone, Default)]
pub struct SharedValue(Arc<AtomicU32>);

impl SharedValue {
    pub fn new(value: f32) -> Self {
        Self(Arc::new(AtomicU32::new(value.to_bits())))
    }

    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    /// True if both refer to the same cell.
    #[inline]
    pub fn ptr_eq(&self, other: &SharedValue) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A control-rate input: a fixed value or the output of a generator.
///
/// Cloning shares the underlying cell or node; it never copies state.
#[derive(Debug, Clone)]
pub enum ControlValue {
    /// Fixed value (knob, registered parameter, constant offset)
    Fixed(SharedValue),

    /// First sample of a generator's block
    Generated(NodeHandle),
}

impl ControlValue {
    pub fn constant(value: f32) -> Self {
        ControlValue::Fixed(SharedValue::new(value))
    }

    /// Store a new fixed value. Generated values ignore the write.
    #[inline]
    pub fn set(&self, value: f32) -> bool {
        match self {
            ControlValue::Fixed(cell) => {
                cell.set(value);
                true
            }
            ControlValue::Generated(_) => false,
        }
    }

    /// The fixed value, if this is one.
    #[inline]
    pub fn current(&self) -> Option<f32> {
        match self {
            ControlValue::Fixed(cell) => Some(cell.get()),
            ControlValue::Generated(_) => None,
        }
    }

    #[inline]
    pub fn node(&self) -> Option<NodeHandle> {
        match self {
            ControlValue::Fixed(_) => None,
            ControlValue::Generated(handle) => Some(*handle),
        }
    }

    /// Evaluate at control rate (once per block).
    #[inline]
    pub fn value(&self, ctx: &BlockContext<'_>) -> Result<f32, GraphError> {
        match self {
            ControlValue::Fixed(cell) => Ok(cell.get()),
            ControlValue::Generated(handle) => {
                let block = ctx.tick(*handle)?;
                Ok(if block.is_empty() { 0.0 } else { block[0] })
            }
        }
    }
}

impl From<f32> for ControlValue {
    fn from(value: f32) -> Self {
        ControlValue::constant(value)
    }
}

impl From<NodeHandle> for ControlValue {
    fn from(handle: NodeHandle) -> Self {
        ControlValue::Generated(handle)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Parameter registry
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParameterError {
    #[error("parameter '{0}' was not registered; register it with add_parameter first")]
    Unregistered(String),

    #[error("parameter '{name}' has an invalid range [{min}, {max}]")]
    InvalidRange { name: String, min: f32, max: f32 },

    #[error("parameter '{0}' cannot be set to NaN")]
    NotANumber(String),
}

/// How a parameter is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParameterKind {
    /// Numeric value clamped into its range
    #[default]
    Continuous,

    /// Discrete event; numeric writes are ignored
    Trigger,
}

/// Snapshot of one registered parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterInfo {
    pub name: String,
    pub kind: ParameterKind,
    pub value: f32,
    pub min: f32,
    pub max: f32,
}

struct ParameterEntry {
    kind: ParameterKind,
    value: SharedValue,
    min: f32,
    max: f32,
}

/// Named parameters of a synth.
///
/// Used by the control role only. The render role reads parameter values
/// through the [`ControlValue`]s handed out at registration, never through
/// the registry.
#[derive(Default)]
pub struct ParameterRegistry {
    entries: Mutex<BTreeMap<String, ParameterEntry>>,
}

impl ParameterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parameter and return its control value.
    ///
    /// The first registration of a name wins: later calls with the same
    /// name ignore their arguments and return the existing binding.
    pub fn add_parameter(
        &self,
        name: &str,
        kind: ParameterKind,
        value: f32,
        min: f32,
        max: f32,
    ) -> Result<ControlValue, ParameterError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(entry) = entries.get(name) {
            return Ok(ControlValue::Fixed(entry.value.clone()));
        }

        if min.is_nan() || max.is_nan() || min > max {
            return Err(ParameterError::InvalidRange {
                name: name.to_string(),
                min,
                max,
            });
        }
        if value.is_nan() {
            return Err(ParameterError::NotANumber(name.to_string()));
        }

        let cell = SharedValue::new(value.clamp(min, max));
        debug!("register parameter '{}' ({:?}) = {} in [{}, {}]", name, kind, cell.get(), min, max);
        entries.insert(
            name.to_string(),
            ParameterEntry {
                kind,
                value: cell.clone(),
                min,
                max,
            },
        );
        Ok(ControlValue::Fixed(cell))
    }

    /// Register a continuous parameter.
    pub fn add_continuous(&self, name: &str, value: f32, min: f32, max: f32) -> Result<ControlValue, ParameterError> {
        self.add_parameter(name, ParameterKind::Continuous, value, min, max)
    }

    /// Write a parameter value from the control role.
    ///
    /// Continuous values are clamped into range. Unregistered names are
    /// reported (logged and returned) and the write is dropped.
    pub fn set_parameter(&self, name: &str, value: f32) -> Result<(), ParameterError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(entry) = entries.get(name) else {
            warn!("parameter '{}' was not registered; write of {} dropped", name, value);
            return Err(ParameterError::Unregistered(name.to_string()));
        };

        match entry.kind {
            ParameterKind::Continuous => {
                if value.is_nan() {
                    warn!("parameter '{}': NaN write dropped", name);
                    return Err(ParameterError::NotANumber(name.to_string()));
                }
                entry.value.set(value.clamp(entry.min, entry.max));
            }
            ParameterKind::Trigger => {
                warn!("parameter '{}' is a trigger; numeric write ignored", name);
            }
        }
        Ok(())
    }

    /// Control value for a registered parameter.
    pub fn get(&self, name: &str) -> Option<ControlValue> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(name).map(|e| ControlValue::Fixed(e.value.clone()))
    }

    /// Snapshot of every registered parameter, sorted by name.
    pub fn get_parameters(&self) -> Vec<ParameterInfo> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .map(|(name, e)| ParameterInfo {
                name: name.clone(),
                kind: e.kind,
                value: e.value.get(),
                min: e.min,
                max: e.max,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
