//! Playback sink via `cpal`.
//!
//! The streaming thread and the cpal output callback share a lock-free
//! single-producer/single-consumer [`rtrb`] queue.  The element owns the
//! producer; the callback owns the consumer, pops what is queued and pads
//! any shortfall with silence.  Neither side ever waits on the other.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait};
use rtrb::{Consumer, Producer, RingBuffer};

use super::stream::StreamThread;
use crate::pipeline::{AudioBlock, AudioFormat, Element, Flow, StageFault};

/// How long `stop` waits for queued audio to play out.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Sink element backed by a cpal output stream.
pub struct PlaybackElement {
    device: String,
    format: AudioFormat,
    capacity: usize,
    queue: Option<Producer<f32>>,
    fault: Arc<Mutex<Option<StageFault>>>,
    stream: Option<StreamThread>,
}

impl PlaybackElement {
    /// One second of audio is queued at most.
    pub fn new(device: String, format: AudioFormat) -> Self {
        Self {
            device,
            format,
            capacity: (format.sample_rate as usize * format.channels as usize).max(1),
            queue: None,
            fault: Arc::new(Mutex::new(None)),
            stream: None,
        }
    }

    fn take_fault(&self) -> Option<StageFault> {
        self.fault.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Samples pushed but not yet played.
    fn queued(&self) -> usize {
        self.queue
            .as_ref()
            .map(|producer| self.capacity - producer.slots())
            .unwrap_or(0)
    }
}

/// Push `samples` in order until the queue is full.  Returns how many were
/// dropped for lack of room.
fn enqueue(producer: &mut Producer<f32>, samples: &[f32]) -> usize {
    let room = producer.slots().min(samples.len());
    for &sample in &samples[..room] {
        if producer.push(sample).is_err() {
            return samples.len() - room;
        }
    }
    samples.len() - room
}

/// Fill `out` from the queue, silence after the last queued sample.
/// Returns how many samples came from the queue.
fn fill_from(consumer: &mut Consumer<f32>, out: &mut [f32]) -> usize {
    let mut written = 0;
    while written < out.len() {
        match consumer.pop() {
            Ok(sample) => {
                out[written] = sample;
                written += 1;
            }
            Err(_) => break,
        }
    }
    out[written..].fill(0.0);
    written
}

impl Element for PlaybackElement {
    fn start(&mut self) -> Result<(), StageFault> {
        if let Ok(mut slot) = self.fault.lock() {
            *slot = None;
        }

        let (producer, mut consumer) = RingBuffer::<f32>::new(self.capacity);
        let device_name = self.device.clone();
        let format = self.format;
        let fault = Arc::clone(&self.fault);

        let stream = StreamThread::spawn("audio-playback", move || {
            let device = find_output_device(&device_name)?;
            let config = cpal::StreamConfig {
                channels: format.channels,
                sample_rate: cpal::SampleRate(format.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            device
                .build_output_stream(
                    &config,
                    move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        fill_from(&mut consumer, out);
                    },
                    move |err: cpal::StreamError| {
                        log::error!("playback: cpal stream error: {err}");
                        if let Ok(mut slot) = fault.lock() {
                            *slot = Some(StageFault::Disconnected(err.to_string()));
                        }
                    },
                    None,
                )
                .map_err(|e| StageFault::Device(format!("failed to build output stream: {e}")))
        })?;

        log::info!("playback: '{}' open at {}", self.device, self.format);
        self.queue = Some(producer);
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), StageFault> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };

        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while self.queued() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        let left = self.queued();
        if left > 0 {
            log::debug!("playback: discarding {left} queued samples");
        }
        self.queue = None;
        stream.stop()
    }

    fn process(&mut self, block: &mut AudioBlock) -> Result<Flow, StageFault> {
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        let Some(producer) = self.queue.as_mut() else {
            return Err(StageFault::Stream("playback not started".into()));
        };
        if block.channels != self.format.channels {
            return Err(StageFault::Format(format!(
                "sink expects {} channels, got {}",
                self.format.channels, block.channels
            )));
        }

        for s in block.samples.iter_mut() {
            *s = s.clamp(-1.0, 1.0);
        }
        let dropped = enqueue(producer, &block.samples);
        if dropped > 0 {
            log::warn!("playback: device falling behind, {dropped} samples dropped");
        }
        Ok(Flow::Continue)
    }
}

fn find_output_device(name: &str) -> Result<cpal::Device, StageFault> {
    let host = cpal::default_host();
    if name == "default" {
        return host
            .default_output_device()
            .ok_or_else(|| StageFault::Device("no default output device".into()));
    }
    host.output_devices()
        .map_err(|e| StageFault::Device(format!("cannot enumerate output devices: {e}")))?
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| StageFault::Device(format!("output device '{name}' not found")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo() -> AudioFormat {
        AudioFormat { sample_rate: 48_000, channels: 2 }
    }

    #[test]
    fn queue_holds_one_second() {
        let el = PlaybackElement::new("default".into(), stereo());
        assert_eq!(el.capacity, 96_000);
        assert_eq!(el.queued(), 0);
    }

    #[test]
    fn callback_plays_queued_samples_then_silence() {
        let (mut producer, mut consumer) = RingBuffer::<f32>::new(8);
        assert_eq!(enqueue(&mut producer, &[0.1, 0.2, 0.3, 0.4]), 0);

        let mut out = [9.0_f32; 6];
        assert_eq!(fill_from(&mut consumer, &mut out), 4);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.4, 0.0, 0.0]);

        let mut out = [9.0_f32; 2];
        assert_eq!(fill_from(&mut consumer, &mut out), 0);
        assert_eq!(out, [0.0, 0.0]);
    }

    #[test]
    fn full_queue_drops_the_newest_samples() {
        let (mut producer, mut consumer) = RingBuffer::<f32>::new(4);
        assert_eq!(enqueue(&mut producer, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]), 2);
        assert_eq!(producer.slots(), 0);

        let mut out = [0.0_f32; 4];
        fill_from(&mut consumer, &mut out);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(enqueue(&mut producer, &[7.0]), 0);
    }

    #[test]
    fn producer_and_consumer_run_on_separate_threads() {
        let (mut producer, mut consumer) = RingBuffer::<f32>::new(64);
        let samples: Vec<f32> = (0..1_000).map(|i| i as f32).collect();
        let expected = samples.clone();

        let writer = std::thread::spawn(move || {
            let mut rest = &samples[..];
            while !rest.is_empty() {
                let room = producer.slots().min(rest.len());
                enqueue(&mut producer, &rest[..room]);
                rest = &rest[room..];
                std::thread::yield_now();
            }
        });

        let mut played = Vec::new();
        let mut out = [0.0_f32; 16];
        while played.len() < expected.len() {
            let n = fill_from(&mut consumer, &mut out);
            played.extend_from_slice(&out[..n]);
        }
        writer.join().unwrap();
        assert_eq!(played, expected);
    }

    #[test]
    fn process_before_start_is_an_error() {
        let mut el = PlaybackElement::new("default".into(), stereo());
        let mut block = AudioBlock {
            samples: vec![0.0; 4],
            channels: 2,
            sample_rate: 48_000,
            ..AudioBlock::default()
        };
        assert!(matches!(el.process(&mut block), Err(StageFault::Stream(_))));
    }

    #[test]
    fn reported_fault_surfaces_once() {
        let mut el = PlaybackElement::new("default".into(), stereo());
        *el.fault.lock().unwrap() = Some(StageFault::Disconnected("unplugged".into()));
        let mut block = AudioBlock::default();
        assert_eq!(
            el.process(&mut block),
            Err(StageFault::Disconnected("unplugged".into()))
        );
        assert!(el.take_fault().is_none());
    }

    #[test]
    fn stop_without_start_is_ok() {
        let mut el = PlaybackElement::new("default".into(), stereo());
        assert!(el.stop().is_ok());
    }
}
