//! Raw PCM parsing: device bytes → interleaved `f32` samples.

use crate::pipeline::{AudioBlock, AudioFormat, Element, Flow, Stage, StageFault};

/// Sample layouts accepted on the raw side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmFormat {
    /// Signed 16-bit little-endian.
    S16Le,
    /// 32-bit IEEE float little-endian.
    F32Le,
}

impl PcmFormat {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "s16le" => Some(PcmFormat::S16Le),
            "f32le" => Some(PcmFormat::F32Le),
            _ => None,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self {
            PcmFormat::S16Le => 2,
            PcmFormat::F32Le => 4,
        }
    }
}

/// Decode little-endian PCM bytes into `f32` samples in `[-1.0, 1.0]`.
///
/// # Errors
///
/// [`StageFault::Format`] when `bytes` is not a whole number of samples.
///
/// ```rust
/// use live_eq::audio::{decode_pcm, PcmFormat};
///
/// let bytes = [0x00, 0x40, 0x00, 0xC0]; // 16384, -16384
/// assert_eq!(decode_pcm(&bytes, PcmFormat::S16Le).unwrap(), vec![0.5, -0.5]);
/// ```
pub fn decode_pcm(bytes: &[u8], format: PcmFormat) -> Result<Vec<f32>, StageFault> {
    let width = format.bytes_per_sample();
    if bytes.len() % width != 0 {
        return Err(StageFault::Format(format!(
            "{} bytes is not a multiple of the {width}-byte sample size",
            bytes.len()
        )));
    }

    let samples = match format {
        PcmFormat::S16Le => bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32_768.0)
            .collect(),
        PcmFormat::F32Le => bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]).clamp(-1.0, 1.0))
            .collect(),
    };
    Ok(samples)
}

/// Parser element: fills `block.samples` from `block.raw`.
#[derive(Debug)]
pub struct PcmParser {
    format: PcmFormat,
    output: AudioFormat,
}

impl PcmParser {
    pub fn new(format: PcmFormat, output: AudioFormat) -> Self {
        Self { format, output }
    }

    /// Build from a parser stage's `pcm-format` parameter.
    pub fn from_stage(stage: &Stage, output: AudioFormat) -> Result<Self, StageFault> {
        let name = stage.text("pcm-format").unwrap_or_default();
        let format = PcmFormat::parse(name)
            .ok_or_else(|| StageFault::Format(format!("unsupported pcm-format {name:?}")))?;
        Ok(Self::new(format, output))
    }
}

impl Element for PcmParser {
    fn process(&mut self, block: &mut AudioBlock) -> Result<Flow, StageFault> {
        let frame_bytes = self.format.bytes_per_sample() * self.output.channels as usize;
        if block.raw.len() % frame_bytes != 0 {
            return Err(StageFault::Format(format!(
                "{} bytes is not a whole number of {}-byte frames",
                block.raw.len(),
                frame_bytes
            )));
        }

        block.samples = decode_pcm(&block.raw, self.format)?;
        block.sample_rate = self.output.sample_rate;
        block.channels = self.output.channels;
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
