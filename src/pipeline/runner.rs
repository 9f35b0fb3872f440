//! Streaming thread: moves blocks from the source to the sink.
//!
//! One [`Runner`] exists per Playing period.  The thread owns the started
//! elements while it runs and hands them back on join so the graph can stop
//! them.
//!
//! # Fault handling
//!
//! ```text
//! source/sink Err       → GraphEvent::Fatal,       thread exits
//! source EndOfStream    → GraphEvent::EndOfStream, thread exits
//! processing-stage Err  → GraphEvent::Error,       block dropped
//! ```

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::{Builder, JoinHandle};

use tokio::sync::mpsc;

use super::element::{AudioBlock, Element, Flow};
use super::stage::StageKind;
use super::state::GraphEvent;

/// A started element together with the stage it belongs to.
pub struct RunningStage {
    pub name: String,
    pub kind: StageKind,
    pub element: Box<dyn Element>,
}

/// The streaming thread could not be created.  The chain comes back
/// untouched so the caller can still stop every element.
pub struct SpawnError {
    pub source: io::Error,
    pub chain: Vec<RunningStage>,
}

impl fmt::Debug for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnError")
            .field("source", &self.source)
            .field("stages", &self.chain.len())
            .finish()
    }
}

/// Handle to the streaming thread.
pub struct Runner {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<Vec<RunningStage>>,
}

impl Runner {
    /// Name of the streaming thread, also used as the stage name in its
    /// start and stop failures.
    pub const THREAD_NAME: &'static str = "pipeline-streaming";

    /// Spawn the streaming thread over `chain`.
    pub fn spawn(
        chain: Vec<RunningStage>,
        events: mpsc::UnboundedSender<GraphEvent>,
    ) -> Result<Self, SpawnError> {
        Self::spawn_with(Self::builder(), chain, events)
    }

    /// Builder for a named streaming thread.
    pub fn builder() -> Builder {
        Builder::new().name(Self::THREAD_NAME.into())
    }

    /// Like [`spawn`](Self::spawn) on a caller-supplied thread builder.
    ///
    /// The thread is created before it owns anything; the chain is handed
    /// over once it exists.
    pub(crate) fn spawn_with(
        builder: Builder,
        chain: Vec<RunningStage>,
        events: mpsc::UnboundedSender<GraphEvent>,
    ) -> Result<Self, SpawnError> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let (handoff, inbox) = std_mpsc::sync_channel::<Vec<RunningStage>>(1);

        let spawned = builder.spawn(move || match inbox.recv() {
            Ok(chain) => stream(chain, &stop_flag, &events),
            Err(_) => Vec::new(),
        });
        let thread = match spawned {
            Ok(thread) => thread,
            Err(source) => return Err(SpawnError { source, chain }),
        };

        if let Err(std_mpsc::SendError(chain)) = handoff.send(chain) {
            let _ = thread.join();
            return Err(SpawnError {
                source: io::Error::other("streaming thread exited before taking the chain"),
                chain,
            });
        }
        Ok(Self { stop, thread })
    }

    /// Ask the thread to stop and wait for it.  Returns the elements, or
    /// `None` if the thread panicked.
    pub fn join(self) -> Option<Vec<RunningStage>> {
        self.stop.store(true, Ordering::Release);
        self.thread.join().ok()
    }
}

fn stream(
    mut chain: Vec<RunningStage>,
    stop: &AtomicBool,
    events: &mpsc::UnboundedSender<GraphEvent>,
) -> Vec<RunningStage> {
    log::debug!("pipeline: streaming thread started ({} stages)", chain.len());
    let mut block = AudioBlock::default();
    let mut blocks: u64 = 0;

    'blocks: while !stop.load(Ordering::Acquire) {
        block.clear();

        for stage in chain.iter_mut() {
            match stage.element.process(&mut block) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Skip) => continue 'blocks,
                Ok(Flow::EndOfStream) => {
                    log::warn!("pipeline: end of stream from '{}'", stage.name);
                    let _ = events.send(GraphEvent::EndOfStream {
                        stage: stage.name.clone(),
                    });
                    break 'blocks;
                }
                Err(fault) if stage.kind.is_endpoint() => {
                    log::error!("pipeline: '{}' failed: {fault}", stage.name);
                    let _ = events.send(GraphEvent::Fatal {
                        stage: stage.name.clone(),
                        message: fault.to_string(),
                    });
                    break 'blocks;
                }
                Err(fault) => {
                    log::warn!("pipeline: '{}' dropped a block: {fault}", stage.name);
                    let _ = events.send(GraphEvent::Error {
                        stage: stage.name.clone(),
                        message: fault.to_string(),
                    });
                    continue 'blocks;
                }
            }
        }
        blocks += 1;
    }

    log::debug!("pipeline: streaming thread exiting after {blocks} blocks");
    chain
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
