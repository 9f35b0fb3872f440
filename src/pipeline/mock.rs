//! Test doubles: a [`StageFactory`] with synthetic endpoints so graphs can
//! run without audio hardware.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::element::{build_processor, AudioBlock, Element, Flow, StageFactory};
use super::error::StageFault;
use super::stage::{AudioFormat, Caps, Stage, StageKind};

/// Counters shared between a test and the elements it spawned.
#[derive(Debug, Clone, Default)]
pub struct MockProbe(Arc<Counters>);

#[derive(Debug, Default)]
struct Counters {
    started: AtomicUsize,
    stopped: AtomicUsize,
    sink_samples: AtomicUsize,
}

impl MockProbe {
    pub fn started(&self) -> usize {
        self.0.started.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.0.stopped.load(Ordering::SeqCst)
    }

    pub fn sink_samples(&self) -> usize {
        self.0.sink_samples.load(Ordering::SeqCst)
    }
}

/// Builds real processors, a silent s16le source and a counting sink.
#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    pub probe: MockProbe,
    /// Stage whose `start` fails.
    pub fail_start: Option<String>,
    /// Stage whose `stop` fails.
    pub fail_stop: Option<String>,
    /// Source disconnects after this many blocks.
    pub source_blocks: Option<usize>,
    /// Stage whose `stop` takes this long, like a sink draining its queue.
    pub slow_stop: Option<(String, Duration)>,
}

impl MockFactory {
    pub fn with_probe(probe: MockProbe) -> Self {
        Self {
            probe,
            ..Self::default()
        }
    }
}

impl StageFactory for MockFactory {
    fn build(&self, stage: &Stage, caps: Caps) -> Result<Box<dyn Element>, StageFault> {
        let inner: Box<dyn Element> = match stage.kind() {
            StageKind::Source => Box::new(SilentSource {
                format: caps.output,
                remaining: self.source_blocks,
            }),
            StageKind::Sink => Box::new(CountingSink(self.probe.clone())),
            _ => build_processor(stage, caps)
                .unwrap_or_else(|| Err(StageFault::Device("no upstream".into())))?,
        };
        Ok(Box::new(Probed {
            inner,
            probe: self.probe.clone(),
            fail_start: self.fail_start.as_deref() == Some(stage.name()),
            fail_stop: self.fail_stop.as_deref() == Some(stage.name()),
            stop_delay: self
                .slow_stop
                .as_ref()
                .filter(|(name, _)| name == stage.name())
                .map(|(_, delay)| *delay),
        }))
    }
}

struct Probed {
    inner: Box<dyn Element>,
    probe: MockProbe,
    fail_start: bool,
    fail_stop: bool,
    stop_delay: Option<Duration>,
}

impl Element for Probed {
    fn start(&mut self) -> Result<(), StageFault> {
        if self.fail_start {
            return Err(StageFault::Device("refused to start".into()));
        }
        self.inner.start()?;
        self.probe.0.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), StageFault> {
        if self.fail_stop {
            return Err(StageFault::Device("refused to stop".into()));
        }
        if let Some(delay) = self.stop_delay {
            std::thread::sleep(delay);
        }
        self.inner.stop()?;
        self.probe.0.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn process(&mut self, block: &mut AudioBlock) -> Result<Flow, StageFault> {
        self.inner.process(block)
    }
}

/// 10 ms of s16le silence every 2 ms of wall time.
struct SilentSource {
    format: AudioFormat,
    remaining: Option<usize>,
}

impl Element for SilentSource {
    fn process(&mut self, block: &mut AudioBlock) -> Result<Flow, StageFault> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Err(StageFault::Disconnected("mock device unplugged".into()));
            }
            *remaining -= 1;
        }
        std::thread::sleep(Duration::from_millis(2));

        let frames = self.format.sample_rate as usize / 100;
        block.raw = vec![0u8; frames * self.format.channels as usize * 2];
        block.sample_rate = self.format.sample_rate;
        block.channels = self.format.channels;
        Ok(Flow::Continue)
    }
}

struct CountingSink(MockProbe);

impl Element for CountingSink {
    fn process(&mut self, block: &mut AudioBlock) -> Result<Flow, StageFault> {
        self.0 .0.sink_samples.fetch_add(block.samples.len(), Ordering::SeqCst);
        Ok(Flow::Continue)
    }
}
