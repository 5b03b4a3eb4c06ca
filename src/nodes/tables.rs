// src/nodes/tables.rs
//
// Waveform tables and the registry that shares them between oscillators.

use std::collections::HashMap;
use std::f64::consts::TAU;
use std::sync::Arc;

use log::debug;
use thiserror::Error;

/// Largest table the phase accumulator can index (see `phase.rs`).
pub const MAX_TABLE_LEN: usize = 1 << 18;

/// Length of the shared sine table.
pub const SINE_TABLE_LEN: usize = 2048;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("sample table is empty")]
    Empty,

    #[error("sample table length {0} is not a power of two")]
    NotPowerOfTwo(usize),

    #[error("sample table length {len} exceeds the maximum of {max}")]
    TooLarge { len: usize, max: usize },
}

/// One cycle of a waveform, power-of-two length.
///
/// Stores one extra guard sample (a copy of the first) so interpolation
/// can always read `index + 1` without wrapping.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleTable {
    data: Vec<f32>,
}

impl SampleTable {
    pub fn from_samples(samples: &[f32]) -> Result<Self, TableError> {
        let len = samples.len();
        Self::check_len(len)?;
        let mut data = Vec::with_capacity(len + 1);
        data.extend_from_slice(samples);
        data.push(samples[0]);
        Ok(Self { data })
    }

    /// Build a table from `f(phase)` with phase in `[0, 1)`.
    pub fn from_fn(len: usize, f: impl Fn(f64) -> f64) -> Result<Self, TableError> {
        Self::check_len(len)?;
        Ok(Self::generate(len, f))
    }

    pub fn sine(len: usize) -> Result<Self, TableError> {
        Self::from_fn(len, Waveform::Sine.shape())
    }

    /// Naive (non-bandlimited) rising saw in `[-1, 1)`.
    pub fn saw(len: usize) -> Result<Self, TableError> {
        Self::from_fn(len, Waveform::Saw.shape())
    }

    pub fn square(len: usize) -> Result<Self, TableError> {
        Self::from_fn(len, Waveform::Square.shape())
    }

    pub fn triangle(len: usize) -> Result<Self, TableError> {
        Self::from_fn(len, Waveform::Triangle.shape())
    }

    /// `len` must already be validated.
    fn generate(len: usize, f: impl Fn(f64) -> f64) -> Self {
        let mut data: Vec<f32> = (0..len).map(|i| f(i as f64 / len as f64) as f32).collect();
        data.push(data[0]);
        Self { data }
    }

    /// Number of samples in one cycle (excluding the guard sample).
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() - 1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One cycle followed by the guard sample.
    #[inline]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    fn check_len(len: usize) -> Result<(), TableError> {
        if len == 0 {
            return Err(TableError::Empty);
        }
        if !len.is_power_of_two() {
            return Err(TableError::NotPowerOfTwo(len));
        }
        if len > MAX_TABLE_LEN {
            return Err(TableError::TooLarge {
                len,
                max: MAX_TABLE_LEN,
            });
        }
        Ok(())
    }
}

/// Standard waveforms the registry knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Waveform {
    Sine,
    Saw,
    Square,
    Triangle,
}

impl Waveform {
    pub fn name(&self) -> &'static str {
        match self {
            Waveform::Sine => "sine",
            Waveform::Saw => "saw",
            Waveform::Square => "square",
            Waveform::Triangle => "triangle",
        }
    }

    /// One cycle as a function of phase in `[0, 1)`.
    pub fn shape(&self) -> fn(f64) -> f64 {
        match self {
            Waveform::Sine => |p| (TAU * p).sin(),
            Waveform::Saw => |p| 2.0 * p - 1.0,
            Waveform::Square => |p| if p < 0.5 { 1.0 } else { -1.0 },
            Waveform::Triangle => |p| {
                if p < 0.25 {
                    4.0 * p
                } else if p < 0.75 {
                    2.0 - 4.0 * p
                } else {
                    4.0 * p - 4.0
                }
            },
        }
    }
}

/// Tables shared by name across oscillators.
///
/// Build it once during setup and hand it to oscillator constructors;
/// each table is computed on first request and reused after that.
#[derive(Debug, Default)]
pub struct TableRegistry {
    tables: HashMap<String, Arc<SampleTable>>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<SampleTable>> {
        self.tables.get(name).cloned()
    }

    /// Register `table` under `name`, replacing any previous entry.
    pub fn insert(&mut self, name: &str, table: SampleTable) -> Arc<SampleTable> {
        let table = Arc::new(table);
        self.tables.insert(name.to_string(), table.clone());
        table
    }

    /// Shared table for `name`, building it with `build` on first use.
    pub fn get_or_insert_with(
        &mut self,
        name: &str,
        build: impl FnOnce() -> Result<SampleTable, TableError>,
    ) -> Result<Arc<SampleTable>, TableError> {
        if let Some(table) = self.tables.get(name) {
            return Ok(table.clone());
        }
        let table = Arc::new(build()?);
        debug!("built table '{}' ({} samples)", name, table.len());
        self.tables.insert(name.to_string(), table.clone());
        Ok(table)
    }

    /// Shared standard waveform of [`SINE_TABLE_LEN`] samples.
    pub fn standard(&mut self, waveform: Waveform) -> Arc<SampleTable> {
        let name = waveform.name();
        if let Some(table) = self.tables.get(name) {
            return table.clone();
        }
        let table = Arc::new(SampleTable::generate(SINE_TABLE_LEN, waveform.shape()));
        debug!("built table '{}' ({} samples)", name, SINE_TABLE_LEN);
        self.tables.insert(name.to_string(), table.clone());
        table
    }

    pub fn sine(&mut self) -> Arc<SampleTable> {
        self.standard(Waveform::Sine)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn test_table_length_is_validated() {
        assert_eq!(SampleTable::from_samples(&[]), Err(TableError::Empty));
        assert_eq!(
            SampleTable::from_samples(&[0.0, 1.0, 2.0]),
            Err(TableError::NotPowerOfTwo(3))
        );
        assert_eq!(
            SampleTable::sine(MAX_TABLE_LEN * 2),
            Err(TableError::TooLarge {
                len: MAX_TABLE_LEN * 2,
                max: MAX_TABLE_LEN
            })
        );
    }

    #[test]
    fn test_guard_sample_copies_first() {
        let table = SampleTable::from_samples(&[0.0, 1.0, 0.0, -1.0]).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.data(), &[0.0, 1.0, 0.0, -1.0, 0.0]);
    }

    #[test]
    fn test_standard_waveforms() {
        let sine = SampleTable::sine(8).unwrap();
        assert!(approx_eq!(f32, sine.data()[2], 1.0, epsilon = 1e-6));
        let tri = SampleTable::triangle(8).unwrap();
        assert_eq!(&tri.data()[..5], &[0.0, 0.5, 1.0, 0.5, 0.0]);
        let square = SampleTable::square(4).unwrap();
        assert_eq!(square.data(), &[1.0, 1.0, -1.0, -1.0, 1.0]);
    }

    #[test]
    fn test_registry_shares_tables() {
        let mut registry = TableRegistry::new();
        let a = registry.sine();
        let b = registry.standard(Waveform::Sine);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.len(), SINE_TABLE_LEN);

        let mut builds = 0;
        for _ in 0..3 {
            registry
                .get_or_insert_with("ramp", || {
                    builds += 1;
                    SampleTable::saw(16)
                })
                .unwrap();
        }
        assert_eq!(builds, 1);
        assert_eq!(registry.len(), 2);
    }
}
