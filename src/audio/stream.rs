//! Dedicated OS thread that owns a `cpal::Stream`.
//!
//! `cpal::Stream` is not `Send` on every platform, so it cannot live inside
//! an [`Element`](crate::pipeline::Element) that moves to the streaming
//! thread.  [`StreamThread`] builds the stream on its own thread, reports
//! whether it started, and keeps it alive until [`StreamThread::stop`] (or
//! drop).

use std::sync::mpsc;
use std::thread::JoinHandle;

use cpal::traits::StreamTrait;

use crate::pipeline::StageFault;

pub struct StreamThread {
    name: String,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Spawn a thread named `name`, build the stream with `build` there and
    /// start it.  Returns once the stream is playing or has failed.
    pub fn spawn<F>(name: &str, build: F) -> Result<Self, StageFault>
    where
        F: FnOnce() -> Result<cpal::Stream, StageFault> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), StageFault>>(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = build().and_then(|stream| {
                    stream
                        .play()
                        .map_err(|e| StageFault::Device(format!("failed to start stream: {e}")))?;
                    Ok(stream)
                });
                let stream = match stream {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(fault) => {
                        let _ = ready_tx.send(Err(fault));
                        return;
                    }
                };

                // Block until stop() sends or drops the sender.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| StageFault::Device(format!("failed to spawn {name} thread: {e}")))?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(StageFault::Device(format!("{name} thread exited early"))));

        match ready {
            Ok(()) => Ok(Self {
                name: name.to_string(),
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            }),
            Err(fault) => {
                let _ = thread.join();
                Err(fault)
            }
        }
    }

    /// Drop the stream and join the thread.  Idempotent.
    pub fn stop(&mut self) -> Result<(), StageFault> {
        self.stop_tx.take();
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| StageFault::Device(format!("{} thread panicked", self.name))),
            None => Ok(()),
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
