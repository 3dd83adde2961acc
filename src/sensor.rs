//! Load-cell acquisition.
//!
//! A [`LoadCell`] yields raw 24-bit conversions, returning
//! [`nb::Error::WouldBlock`] while the converter is still busy. [`Scale`]
//! turns those into averaged, tare-corrected weights.

use crate::error::SensorError;
use serde::{Deserialize, Serialize};

/// Raw counts per gram for the reference load cell.
pub const RAW_TO_GRAMS: f32 = 107.73;
pub const DEFAULT_TARE_SAMPLES: u8 = 20;

/// Offset-binary value of a zero reading.
pub const ZERO_COUNTS: u32 = 0x0080_0000;

const RAW_MIN: i64 = -0x0080_0000;
const RAW_MAX: i64 = 0x007F_FFFF;

/// Flip the sign bit of a 24-bit two's-complement sample so that readings
/// order monotonically as unsigned values.
pub const fn offset_binary(raw: u32) -> u32 {
    (raw & 0x00FF_FFFF) ^ ZERO_COUNTS
}

pub trait LoadCell: Send {
    /// Read one conversion if one is ready.
    fn try_read(&mut self) -> nb::Result<u32, SensorError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScaleState {
    pub offset: u32,
    pub last_average: u32,
    pub total_samples: u64,
}

#[derive(Debug)]
pub struct Scale<L> {
    cell: L,
    state: ScaleState,
}

impl<L: LoadCell> Scale<L> {
    /// Wrap `cell` without taring it.
    pub fn new(cell: L) -> Self {
        Self {
            cell,
            state: ScaleState::default(),
        }
    }

    /// Wrap `cell` and take the current load as zero.
    pub fn with_tare(cell: L, samples: u8) -> Result<Self, SensorError> {
        let mut scale = Self::new(cell);
        scale.tare(samples)?;
        Ok(scale)
    }

    /// Integer mean of `samples` conversions. Blocks until all are read.
    pub fn read_average(&mut self, samples: u8) -> Result<u32, SensorError> {
        if samples == 0 {
            return Err(SensorError::NoSamples);
        }

        let mut sum: u64 = 0;
        for _ in 0..samples {
            sum += u64::from(nb::block!(self.cell.try_read())?);
        }
        self.state.total_samples += u64::from(samples);

        let average = u32::try_from(sum / u64::from(samples)).unwrap_or(u32::MAX);
        self.state.last_average = average;
        Ok(average)
    }

    pub fn tare(&mut self, samples: u8) -> Result<u32, SensorError> {
        let offset = self.read_average(samples)?;
        self.state.offset = offset;
        tracing::debug!(offset, "tared");
        Ok(offset)
    }

    /// Mean above the tare offset, never negative.
    pub fn read_value(&mut self, samples: u8) -> Result<u32, SensorError> {
        let average = self.read_average(samples)?;
        Ok(average.saturating_sub(self.state.offset))
    }

    /// Weight in grams.
    #[allow(clippy::cast_precision_loss)]
    pub fn read_units(&mut self, samples: u8) -> Result<f32, SensorError> {
        Ok(self.read_value(samples)? as f32 / RAW_TO_GRAMS)
    }

    pub fn state(&self) -> ScaleState {
        self.state
    }

    pub fn cell_mut(&mut self) -> &mut L {
        &mut self.cell
    }
}

/// Deterministic load cell for the simulator and tests.
///
/// The converter word is the signed 24-bit sample
/// `base + load_grams * RAW_TO_GRAMS`, clamped to the converter range.
/// Reads report "not ready" `busy_polls` times before each conversion.
#[derive(Debug, Clone)]
pub struct SimulatedLoadCell {
    base: i32,
    load_grams: f32,
    busy_polls: u8,
    pending_polls: u8,
    connected: bool,
}

impl SimulatedLoadCell {
    /// `base` is the signed sample at zero load.
    pub fn new(base: i32) -> Self {
        Self {
            base,
            load_grams: 0.0,
            busy_polls: 0,
            pending_polls: 0,
            connected: true,
        }
    }

    pub fn with_busy_polls(mut self, polls: u8) -> Self {
        self.busy_polls = polls;
        self.pending_polls = polls;
        self
    }

    pub fn set_load(&mut self, grams: f32) {
        self.load_grams = grams.max(0.0);
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Two's-complement word as the converter shifts it out.
    pub fn raw_word(&self) -> u32 {
        let counts = (f64::from(self.load_grams) * f64::from(RAW_TO_GRAMS)).round() as i64;
        let sample = (i64::from(self.base) + counts).clamp(RAW_MIN, RAW_MAX);
        (sample as u32) & 0x00FF_FFFF
    }
}

impl LoadCell for SimulatedLoadCell {
    fn try_read(&mut self) -> nb::Result<u32, SensorError> {
        if !self.connected {
            return Err(nb::Error::Other(SensorError::Disconnected));
        }
        if self.pending_polls > 0 {
            self.pending_polls -= 1;
            return Err(nb::Error::WouldBlock);
        }
        self.pending_polls = self.busy_polls;

        Ok(offset_binary(self.raw_word()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_binary() {
        assert_eq!(offset_binary(0x00_0000), 0x80_0000);
        assert_eq!(offset_binary(0xFF_FFFF), 0x7F_FFFF);
        assert_eq!(offset_binary(0x7F_FFFF), 0xFF_FFFF);
    }

    #[test]
    fn test_average_blocks_through_busy_polls() {
        let cell = SimulatedLoadCell::new(1000).with_busy_polls(3);
        let mut scale = Scale::new(cell);
        assert_eq!(scale.read_average(4).unwrap(), ZERO_COUNTS + 1000);
        assert_eq!(scale.state().total_samples, 4);
    }

    #[test]
    fn test_negative_sample_reads_below_zero_counts() {
        let mut cell = SimulatedLoadCell::new(-500);
        assert_eq!(cell.raw_word(), 0x00FF_FE0C);
        assert_eq!(nb::block!(cell.try_read()), Ok(ZERO_COUNTS - 500));

        let mut scale = Scale::new(SimulatedLoadCell::new(-500));
        assert!(scale.read_average(3).unwrap() < ZERO_COUNTS);
    }

    #[test]
    fn test_raw_word_clamps_to_converter_range() {
        let mut cell = SimulatedLoadCell::new(0x007F_FF00);
        cell.set_load(1000.0);
        assert_eq!(cell.raw_word(), 0x007F_FFFF);
        assert_eq!(SimulatedLoadCell::new(i32::MIN).raw_word(), 0x0080_0000);
    }

    #[test]
    fn test_zero_samples_rejected() {
        let mut scale = Scale::new(SimulatedLoadCell::new(1000));
        assert_eq!(scale.read_average(0), Err(SensorError::NoSamples));
    }

    #[test]
    fn test_tare_and_units() {
        let mut scale = Scale::with_tare(SimulatedLoadCell::new(50_000), DEFAULT_TARE_SAMPLES).unwrap();
        assert_eq!(scale.state().offset, ZERO_COUNTS + 50_000);
        assert_eq!(scale.read_value(10).unwrap(), 0);

        scale.cell_mut().set_load(250.0);
        let grams = scale.read_units(10).unwrap();
        assert!((grams - 250.0).abs() < 0.01, "got {grams}");
    }

    #[test]
    fn test_value_saturates_below_offset() {
        let mut scale = Scale::with_tare(SimulatedLoadCell::new(50_000), 5).unwrap();
        *scale.cell_mut() = SimulatedLoadCell::new(40_000);
        assert_eq!(scale.read_value(5).unwrap(), 0);
    }

    #[test]
    fn test_disconnected_cell() {
        let mut cell = SimulatedLoadCell::new(0);
        cell.set_connected(false);
        let mut scale = Scale::new(cell);
        assert_eq!(scale.read_average(1), Err(SensorError::Disconnected));
    }
}
