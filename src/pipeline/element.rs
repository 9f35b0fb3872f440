//! Runtime side of a stage: the [`Element`] trait, the block that flows
//! through the chain, and the [`StageFactory`] that turns a [`Stage`] into an
//! element when the graph starts.

use std::time::Duration;

use super::error::StageFault;
use super::stage::{Caps, Stage, StageKind};
use crate::audio::{
    CaptureElement, ChannelConverter, EqualizerElement, PcmParser, PlaybackElement, RateConverter,
};

// ---------------------------------------------------------------------------
// AudioBlock
// ---------------------------------------------------------------------------

/// One block of audio as it moves down the chain.
///
/// The source fills `raw` with PCM bytes; the parser turns them into
/// interleaved `f32` `samples` in `[-1.0, 1.0]`; every later stage works on
/// `samples` in place.
#[derive(Debug, Clone, Default)]
pub struct AudioBlock {
    /// Raw PCM bytes as delivered by the device.
    pub raw: Vec<u8>,
    /// Interleaved samples.
    pub samples: Vec<f32>,
    /// Sample rate of the current contents in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u16,
}

impl AudioBlock {
    pub fn clear(&mut self) {
        self.raw.clear();
        self.samples.clear();
    }

    /// Number of frames in `samples`.
    pub fn frames(&self) -> usize {
        match self.channels {
            0 => 0,
            n => self.samples.len() / n as usize,
        }
    }
}

// ---------------------------------------------------------------------------
// Element
// ---------------------------------------------------------------------------

/// What the runner should do after an element handled a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Hand the block to the next stage.
    Continue,
    /// Nothing to pass on this round (no data yet, or data buffered
    /// internally).  The runner starts a new block.
    Skip,
    /// The source will never produce more data.
    EndOfStream,
}

/// The per-block worker behind a stage.
///
/// `start`/`stop` are called from the thread driving the graph lifecycle;
/// `process` runs on the streaming thread.  A source must bound the time it
/// blocks in `process` so the runner can observe a stop request.
pub trait Element: Send {
    fn start(&mut self) -> Result<(), StageFault> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), StageFault> {
        Ok(())
    }

    fn process(&mut self, block: &mut AudioBlock) -> Result<Flow, StageFault>;
}

// ---------------------------------------------------------------------------
// StageFactory
// ---------------------------------------------------------------------------

/// Builds the [`Element`] for a stage from its parameters and negotiated
/// caps.  Called once per stage every time the graph starts.
pub trait StageFactory: Send + Sync {
    fn build(&self, stage: &Stage, caps: Caps) -> Result<Box<dyn Element>, StageFault>;
}

/// Build one of the built-in processing elements (parser, filter,
/// converter, resampler).  Returns `None` for sources and sinks.
pub fn build_processor(
    stage: &Stage,
    caps: Caps,
) -> Option<Result<Box<dyn Element>, StageFault>> {
    let input = caps.input?;
    let built: Result<Box<dyn Element>, StageFault> = match stage.kind() {
        StageKind::Source | StageKind::Sink => return None,
        StageKind::Parser => PcmParser::from_stage(stage, caps.output)
            .map(|e| Box::new(e) as Box<dyn Element>),
        StageKind::Filter => match stage.equalizer() {
            Some(eq) => Ok(Box::new(EqualizerElement::new(eq.clone(), input))),
            None => Err(StageFault::Device("filter stage without equalizer".into())),
        },
        StageKind::Converter => Ok(Box::new(ChannelConverter::new(input, caps.output))),
        StageKind::Resampler => RateConverter::new(input, caps.output)
            .map(|e| Box::new(e) as Box<dyn Element>),
    };
    Some(built)
}

/// Production factory: cpal capture/playback for the endpoints and the
/// built-in processors in between.
#[derive(Debug, Clone)]
pub struct DeviceFactory {
    /// Longest time the capture element waits for a block before yielding.
    pub block_timeout: Duration,
}

impl DeviceFactory {
    pub fn new(block_timeout: Duration) -> Self {
        Self { block_timeout }
    }
}

impl StageFactory for DeviceFactory {
    fn build(&self, stage: &Stage, caps: Caps) -> Result<Box<dyn Element>, StageFault> {
        let device = stage.text("device").unwrap_or("default").to_string();
        match stage.kind() {
            StageKind::Source => Ok(Box::new(CaptureElement::new(
                device,
                caps.output,
                self.block_timeout,
            ))),
            StageKind::Sink => Ok(Box::new(PlaybackElement::new(device, caps.output))),
            _ => build_processor(stage, caps)
                .unwrap_or_else(|| Err(StageFault::Device("missing upstream caps".into()))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stage::{AudioFormat, StageSpec};

    fn mono() -> AudioFormat {
        AudioFormat { sample_rate: 48_000, channels: 1 }
    }

    #[test]
    fn block_frames_counts_interleaved_samples() {
        let block = AudioBlock {
            samples: vec![0.0; 12],
            channels: 2,
            sample_rate: 48_000,
            ..AudioBlock::default()
        };
        assert_eq!(block.frames(), 6);
        assert_eq!(AudioBlock::default().frames(), 0);
    }

    #[test]
    fn processors_are_built_for_middle_stages() {
        for kind in ["parser", "filter", "converter", "resampler"] {
            let stage = Stage::from_spec(&StageSpec::new(kind, kind)).unwrap();
            let caps = stage.negotiate(Some(mono())).unwrap();
            assert!(
                matches!(build_processor(&stage, caps), Some(Ok(_))),
                "{kind} should build"
            );
        }
    }

    #[test]
    fn endpoints_are_not_processors() {
        let src = Stage::from_spec(&StageSpec::new("in", "source")).unwrap();
        let caps = src.negotiate(None).unwrap();
        assert!(build_processor(&src, caps).is_none());

        let sink = Stage::from_spec(&StageSpec::new("out", "sink")).unwrap();
        let caps = sink.negotiate(Some(mono())).unwrap();
        assert!(build_processor(&sink, caps).is_none());
    }
}
