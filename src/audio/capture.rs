//! Capture source via `cpal`.
//!
//! [`CaptureElement`] opens the input device at the negotiated format as
//! signed 16-bit samples and forwards each hardware buffer as little-endian
//! bytes, the same layout a raw `/dev/sound`-style device would deliver.
//! The parser stage downstream decodes them.

use std::sync::mpsc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait};

use super::stream::StreamThread;
use crate::pipeline::{AudioBlock, AudioFormat, Element, Flow, StageFault};

type CaptureMessage = Result<Vec<u8>, StageFault>;

/// Source element backed by a cpal input stream.
pub struct CaptureElement {
    device: String,
    format: AudioFormat,
    block_timeout: Duration,
    rx: Option<mpsc::Receiver<CaptureMessage>>,
    stream: Option<StreamThread>,
}

impl CaptureElement {
    /// `device` is a cpal device name, or `"default"` for the host default.
    pub fn new(device: String, format: AudioFormat, block_timeout: Duration) -> Self {
        Self {
            device,
            format,
            block_timeout,
            rx: None,
            stream: None,
        }
    }
}

impl Element for CaptureElement {
    fn start(&mut self) -> Result<(), StageFault> {
        let (tx, rx) = mpsc::channel::<CaptureMessage>();
        let device_name = self.device.clone();
        let format = self.format;

        let stream = StreamThread::spawn("audio-capture", move || {
            let device = find_input_device(&device_name)?;
            let config = cpal::StreamConfig {
                channels: format.channels,
                sample_rate: cpal::SampleRate(format.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let err_tx = tx.clone();
            device
                .build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let mut bytes = Vec::with_capacity(data.len() * 2);
                        for sample in data {
                            bytes.extend_from_slice(&sample.to_le_bytes());
                        }
                        // The receiver is gone once the element stops.
                        let _ = tx.send(Ok(bytes));
                    },
                    move |err: cpal::StreamError| {
                        log::error!("capture: cpal stream error: {err}");
                        let _ = err_tx.send(Err(StageFault::Disconnected(err.to_string())));
                    },
                    None,
                )
                .map_err(|e| StageFault::Device(format!("failed to build input stream: {e}")))
        })?;

        log::info!("capture: '{}' open at {}", self.device, self.format);
        self.rx = Some(rx);
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), StageFault> {
        self.rx = None;
        match self.stream.take() {
            Some(mut stream) => stream.stop(),
            None => Ok(()),
        }
    }

    fn process(&mut self, block: &mut AudioBlock) -> Result<Flow, StageFault> {
        let rx = self
            .rx
            .as_ref()
            .ok_or_else(|| StageFault::Stream("capture not started".into()))?;

        match rx.recv_timeout(self.block_timeout) {
            Ok(Ok(bytes)) => {
                block.raw = bytes;
                block.sample_rate = self.format.sample_rate;
                block.channels = self.format.channels;
                Ok(Flow::Continue)
            }
            Ok(Err(fault)) => Err(fault),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(Flow::Skip),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(StageFault::Disconnected(
                "capture stream closed".into(),
            )),
        }
    }
}

fn find_input_device(name: &str) -> Result<cpal::Device, StageFault> {
    let host = cpal::default_host();
    if name == "default" {
        return host
            .default_input_device()
            .ok_or_else(|| StageFault::Device("no default input device".into()));
    }
    host.input_devices()
        .map_err(|e| StageFault::Device(format!("cannot enumerate input devices: {e}")))?
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| StageFault::Device(format!("input device '{name}' not found")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_before_start_is_an_error() {
        let mut el = CaptureElement::new(
            "default".into(),
            AudioFormat { sample_rate: 48_000, channels: 1 },
            Duration::from_millis(10),
        );
        let mut block = AudioBlock::default();
        assert!(matches!(el.process(&mut block), Err(StageFault::Stream(_))));
    }

    #[test]
    fn stop_without_start_is_ok() {
        let mut el = CaptureElement::new(
            "default".into(),
            AudioFormat { sample_rate: 48_000, channels: 1 },
            Duration::from_millis(10),
        );
        assert!(el.stop().is_ok());
    }

    #[test]
    fn capture_element_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CaptureElement>();
    }
}
