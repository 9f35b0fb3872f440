//! Channel and sample-rate conversion elements.
//!
//! 1. [`remix_channels`] / [`ChannelConverter`]: change the interleaved
//!    channel count.
//! 2. [`RateConverter`]: FFT resampling with `rubato`, accumulating input
//!    until a full chunk is available.

use rubato::{FftFixedIn, Resampler};

use crate::pipeline::{AudioBlock, AudioFormat, Element, Flow, StageFault};

/// Input frames per rubato call.
const RESAMPLER_CHUNK: usize = 1024;

// ---------------------------------------------------------------------------
// remix_channels
// ---------------------------------------------------------------------------

/// Convert interleaved audio from `from` channels to `to` channels.
///
/// * Equal counts return the input unchanged.
/// * Down to mono averages every channel of a frame.
/// * Up from mono duplicates the sample into every output channel.
/// * Otherwise output channel `c` takes input channel `c % from`.
///
/// ```rust
/// use live_eq::audio::remix_channels;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, 0.4];
/// assert_eq!(remix_channels(&stereo, 2, 1), vec![0.0, 0.3]);
/// assert_eq!(remix_channels(&[0.1, 0.2], 1, 2), vec![0.1, 0.1, 0.2, 0.2]);
/// ```
pub fn remix_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    let (from, to) = (from as usize, to as usize);
    if from == 0 || to == 0 {
        return Vec::new();
    }
    if from == to {
        return samples.to_vec();
    }

    let frames = samples.chunks_exact(from);
    let mut out = Vec::with_capacity(frames.len() * to);
    for frame in frames {
        if to == 1 {
            out.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            out.extend((0..to).map(|c| frame[c % from]));
        }
    }
    out
}

/// Converter element: remixes to the negotiated channel count.
#[derive(Debug)]
pub struct ChannelConverter {
    input: AudioFormat,
    output: AudioFormat,
}

impl ChannelConverter {
    pub fn new(input: AudioFormat, output: AudioFormat) -> Self {
        Self { input, output }
    }
}

impl Element for ChannelConverter {
    fn process(&mut self, block: &mut AudioBlock) -> Result<Flow, StageFault> {
        if block.channels != self.input.channels {
            return Err(StageFault::Format(format!(
                "expected {} channels, got {}",
                self.input.channels, block.channels
            )));
        }
        if self.input.channels != self.output.channels {
            block.samples = remix_channels(&block.samples, self.input.channels, self.output.channels);
            block.channels = self.output.channels;
        }
        Ok(Flow::Continue)
    }
}

// ---------------------------------------------------------------------------
// RateConverter
// ---------------------------------------------------------------------------

/// Resampler element.  A pass-through when input and output rates match.
///
/// Incoming blocks are de-interleaved into per-channel queues; whenever a
/// queue holds a full rubato chunk, it is resampled and appended to the
/// block.  Blocks that do not complete a chunk are skipped, which adds at
/// most one chunk of latency.
pub struct RateConverter {
    input: AudioFormat,
    output: AudioFormat,
    resampler: Option<FftFixedIn<f32>>,
    pending: Vec<Vec<f32>>,
}

impl RateConverter {
    pub fn new(input: AudioFormat, output: AudioFormat) -> Result<Self, StageFault> {
        let channels = input.channels as usize;
        let resampler = if input.sample_rate == output.sample_rate {
            None
        } else {
            let r = FftFixedIn::<f32>::new(
                input.sample_rate as usize,
                output.sample_rate as usize,
                RESAMPLER_CHUNK,
                2,
                channels,
            )
            .map_err(|e| StageFault::Device(format!("resampler setup failed: {e}")))?;
            log::debug!(
                "resample: {} Hz -> {} Hz, {} ch",
                input.sample_rate,
                output.sample_rate,
                channels
            );
            Some(r)
        };

        Ok(Self {
            input,
            output,
            resampler,
            pending: vec![Vec::new(); channels],
        })
    }
}

impl Element for RateConverter {
    fn process(&mut self, block: &mut AudioBlock) -> Result<Flow, StageFault> {
        let Some(resampler) = self.resampler.as_mut() else {
            block.sample_rate = self.output.sample_rate;
            return Ok(Flow::Continue);
        };

        let channels = self.input.channels as usize;
        if block.channels as usize != channels {
            return Err(StageFault::Format(format!(
                "expected {channels} channels, got {}",
                block.channels
            )));
        }

        for frame in block.samples.chunks_exact(channels) {
            for (queue, &s) in self.pending.iter_mut().zip(frame) {
                queue.push(s);
            }
        }

        let mut out = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending[0].len() < needed {
                break;
            }
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|q| q.drain(..needed).collect())
                .collect();
            let resampled = resampler
                .process(&chunk, None)
                .map_err(|e| StageFault::Stream(format!("resampling failed: {e}")))?;

            let frames = resampled.first().map_or(0, Vec::len);
            out.reserve(frames * channels);
            for i in 0..frames {
                out.extend(resampled.iter().map(|ch| ch[i]));
            }
        }

        block.samples = out;
        block.sample_rate = self.output.sample_rate;
        Ok(if block.samples.is_empty() {
            Flow::Skip
        } else {
            Flow::Continue
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
