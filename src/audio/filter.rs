//! Peaking biquads and the equalizer element that drives them.

use std::f32::consts::PI;

use crate::pipeline::equalizer::{EqualizerHandle, BAND_COUNT, BAND_FREQUENCIES};
use crate::pipeline::{AudioBlock, AudioFormat, Element, Flow, StageFault};

/// Bandwidth of every band.
const BAND_Q: f32 = 1.0;

/// Bands above this fraction of the sample rate are bypassed.
const MAX_RELATIVE_FREQ: f32 = 0.45;

// ---------------------------------------------------------------------------
// Biquad
// ---------------------------------------------------------------------------

/// Direct-form-I peaking filter.  Coefficients can be replaced without
/// resetting the delay line, so gain changes do not click.
#[derive(Debug, Clone)]
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl Biquad {
    /// A filter that passes input through unchanged.
    pub fn identity() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    pub fn peak(sample_rate: u32, freq: f32, q: f32, gain_db: f32) -> Self {
        let mut f = Self::identity();
        f.set_peak(sample_rate, freq, q, gain_db);
        f
    }

    /// Recompute coefficients for a peaking band, keeping filter state.
    pub fn set_peak(&mut self, sample_rate: u32, freq: f32, q: f32, gain_db: f32) {
        if gain_db == 0.0 || freq >= sample_rate as f32 * MAX_RELATIVE_FREQ {
            self.b0 = 1.0;
            self.b1 = 0.0;
            self.b2 = 0.0;
            self.a1 = 0.0;
            self.a2 = 0.0;
            return;
        }

        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * PI * freq / sample_rate as f32;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let a0 = 1.0 + alpha / a;
        self.b0 = (1.0 + alpha * a) / a0;
        self.b1 = (-2.0 * cos_w0) / a0;
        self.b2 = (1.0 - alpha * a) / a0;
        self.a1 = (-2.0 * cos_w0) / a0;
        self.a2 = (1.0 - alpha / a) / a0;
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        // flush denormals so silence does not slow the filter down
        self.y1 = if y.abs() < 1e-20 { 0.0 } else { y };
        self.y1
    }
}

// ---------------------------------------------------------------------------
// EqualizerElement
// ---------------------------------------------------------------------------

/// Ten peaking bands per channel, retuned whenever the shared gains change.
///
/// Gains are snapshotted once per block, so a write through the
/// [`EqualizerHandle`] is heard from the next block on.
pub struct EqualizerElement {
    handle: EqualizerHandle,
    format: AudioFormat,
    /// Gains the filters are currently tuned to, as last read from the handle.
    applied: [f64; BAND_COUNT],
    /// `filters[channel][band]`
    filters: Vec<[Biquad; BAND_COUNT]>,
}

impl EqualizerElement {
    pub fn new(handle: EqualizerHandle, format: AudioFormat) -> Self {
        let applied = handle.gains();
        let bank: [Biquad; BAND_COUNT] = std::array::from_fn(|i| {
            Biquad::peak(format.sample_rate, BAND_FREQUENCIES[i], BAND_Q, applied[i] as f32)
        });
        Self {
            handle,
            format,
            applied,
            filters: vec![bank; format.channels as usize],
        }
    }

    fn retune(&mut self, gains: [f64; BAND_COUNT]) {
        for (band, (&new, old)) in gains.iter().zip(self.applied.iter_mut()).enumerate() {
            if new == *old {
                continue;
            }
            for channel in self.filters.iter_mut() {
                channel[band].set_peak(self.format.sample_rate, BAND_FREQUENCIES[band], BAND_Q, new as f32);
            }
            *old = new;
        }
    }
}

impl Element for EqualizerElement {
    fn process(&mut self, block: &mut AudioBlock) -> Result<Flow, StageFault> {
        let gains = self.handle.gains();
        if gains != self.applied {
            log::debug!("eq: retuning to {gains:?}");
            self.retune(gains);
        }

        let channels = self.filters.len().max(1);
        for frame in block.samples.chunks_mut(channels) {
            for (sample, bank) in frame.iter_mut().zip(self.filters.iter_mut()) {
                *sample = bank.iter_mut().fold(*sample, |s, f| f.process(s));
            }
        }
        Ok(Flow::Continue)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| 0.1 * (2.0 * PI * freq * n as f32 / rate as f32).sin())
            .collect()
    }

    fn rms(x: &[f32]) -> f32 {
        (x.iter().map(|s| s * s).sum::<f32>() / x.len() as f32).sqrt()
    }

    fn mono() -> AudioFormat {
        AudioFormat { sample_rate: 48_000, channels: 1 }
    }

    fn flat() -> EqualizerHandle {
        let eq = EqualizerHandle::new();
        for i in 0..BAND_COUNT {
            eq.set_band(i as i64, 0.0).unwrap();
        }
        eq
    }

    #[test]
    fn zero_gain_is_transparent() {
        let mut f = Biquad::peak(48_000, 1_000.0, 1.0, 0.0);
        for x in [0.3_f32, -0.2, 0.9] {
            assert_eq!(f.process(x), x);
        }
    }

    #[test]
    fn boost_raises_level_at_centre() {
        let input = sine(947.0, 48_000, 9_600);
        let mut f = Biquad::peak(48_000, 947.0, 1.0, 12.0);
        let out: Vec<f32> = input.iter().map(|&x| f.process(x)).collect();
        // skip the settling transient
        let gain = rms(&out[4_800..]) / rms(&input[4_800..]);
        assert!((gain - 3.98).abs() < 0.2, "gain {gain}");
    }

    #[test]
    fn flat_equalizer_passes_audio_unchanged() {
        let mut el = EqualizerElement::new(flat(), mono());
        let input = sine(440.0, 48_000, 480);
        let mut block = AudioBlock {
            samples: input.clone(),
            sample_rate: 48_000,
            channels: 1,
            ..AudioBlock::default()
        };
        el.process(&mut block).unwrap();
        assert_eq!(block.samples, input);
    }

    #[test]
    fn gain_change_is_applied_on_next_block() {
        let eq = flat();
        let mut el = EqualizerElement::new(eq.clone(), mono());
        let input = sine(119.0, 48_000, 48_000);

        let mut block = AudioBlock {
            samples: input.clone(),
            sample_rate: 48_000,
            channels: 1,
            ..AudioBlock::default()
        };
        el.process(&mut block).unwrap();
        let before = rms(&block.samples[24_000..]);

        eq.set_band(2, -24.0).unwrap();
        block.samples = input.clone();
        el.process(&mut block).unwrap();
        let after = rms(&block.samples[24_000..]);

        assert_eq!(el.applied[2], -24.0);
        assert!(after < before * 0.2, "before {before} after {after}");
    }

    #[test]
    fn bands_above_nyquist_margin_are_bypassed() {
        let mut f = Biquad::peak(16_000, 15_011.0, 1.0, 12.0);
        assert_eq!(f.process(0.5), 0.5);
    }
}
