//! Shared 10-band equalizer parameter store.
//!
//! [`EqualizerHandle`] is the only state written from outside the audio
//! path.  Each band is an `AtomicU64` holding the bits of an `f64` gain, so a
//! reader never sees a half-written band and the control path never waits on
//! the streaming thread.
//!
//! The equalizer element snapshots [`EqualizerHandle::gains`] at the start of
//! every block, which bounds staleness to one block (`block_timeout_ms` worth
//! of audio at most).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::error::ParameterError;

/// Number of gain bands.
pub const BAND_COUNT: usize = 10;

/// Lowest accepted gain in dB.
pub const MIN_GAIN_DB: f64 = -24.0;

/// Highest accepted gain in dB.
pub const MAX_GAIN_DB: f64 = 12.0;

/// Descending low→high shelf applied at startup.
pub const DEFAULT_GAINS: [f64; BAND_COUNT] = [12.0, 10.0, 8.0, 6.0, 4.0, 2.0, 1.0, 0.0, 0.0, 0.0];

/// Centre frequency of each band in Hz.
pub const BAND_FREQUENCIES: [f32; BAND_COUNT] = [
    29.0, 59.0, 119.0, 237.0, 474.0, 947.0, 1889.0, 3770.0, 7523.0, 15011.0,
];

/// Parameter name of band `index` (`band0` … `band9`).
pub fn band_name(index: usize) -> String {
    format!("band{index}")
}

/// Cheap-to-clone handle to the equalizer bands.
///
/// The graph owns one; the control server receives a clone and can only
/// change gains through the validated setters below.
#[derive(Debug, Clone)]
pub struct EqualizerHandle {
    bands: Arc<[AtomicU64; BAND_COUNT]>,
}

impl EqualizerHandle {
    /// Create a handle initialised with [`DEFAULT_GAINS`].
    pub fn new() -> Self {
        Self {
            bands: Arc::new(std::array::from_fn(|i| {
                AtomicU64::new(DEFAULT_GAINS[i].to_bits())
            })),
        }
    }

    /// Set band `index` to `value` dB.
    ///
    /// # Errors
    ///
    /// [`ParameterError::OutOfRange`] when `index` is outside `0..BAND_COUNT`
    /// or `value` is not a finite number within
    /// [`MIN_GAIN_DB`]`..=`[`MAX_GAIN_DB`].  No band changes in that case.
    pub fn set_band(&self, index: i64, value: f64) -> Result<(), ParameterError> {
        let slot = usize::try_from(index)
            .ok()
            .filter(|&i| i < BAND_COUNT)
            .ok_or_else(|| ParameterError::OutOfRange {
                param: format!("band{index}"),
                reason: format!("band index must be in 0..{BAND_COUNT}"),
            })?;

        if !value.is_finite() || value < MIN_GAIN_DB || value > MAX_GAIN_DB {
            return Err(ParameterError::OutOfRange {
                param: band_name(slot),
                reason: format!("gain {value} dB outside {MIN_GAIN_DB}..={MAX_GAIN_DB}"),
            });
        }

        self.bands[slot].store(value.to_bits(), Ordering::Release);
        Ok(())
    }

    /// Set a band by parameter name (`band0` … `band9`).
    ///
    /// Only the exact names produced by [`band_name`] are accepted; anything
    /// else, `band10` and `band03` included, is
    /// [`ParameterError::UnknownParameter`].
    pub fn set_param(&self, name: &str, value: f64) -> Result<(), ParameterError> {
        let index = band_index(name)
            .ok_or_else(|| ParameterError::UnknownParameter(name.to_string()))?;
        self.set_band(index as i64, value)
    }

    /// Current gain of band `index`, or `None` past the last band.
    pub fn gain(&self, index: usize) -> Option<f64> {
        self.bands
            .get(index)
            .map(|band| f64::from_bits(band.load(Ordering::Acquire)))
    }

    /// Snapshot of all bands.  Each entry is read atomically; the snapshot
    /// as a whole is not a transaction across bands.
    pub fn gains(&self) -> [f64; BAND_COUNT] {
        std::array::from_fn(|i| f64::from_bits(self.bands[i].load(Ordering::Acquire)))
    }

    /// Restore [`DEFAULT_GAINS`].
    pub fn reset(&self) {
        for (band, gain) in self.bands.iter().zip(DEFAULT_GAINS) {
            band.store(gain.to_bits(), Ordering::Release);
        }
    }
}

impl Default for EqualizerHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Index of the band called `name`, if `name` is one of the canonical
/// [`band_name`]s.
pub(crate) fn band_index(name: &str) -> Option<usize> {
    (0..BAND_COUNT).find(|&i| band_name(i) == name)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
