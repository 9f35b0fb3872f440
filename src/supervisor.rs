//! Startup, event loop and shutdown ordering.
//!
//! ```text
//! assemble → start → bind → spawn control worker
//!        → loop { graph event | interrupt }
//!        → stop graph → set done → join worker (abort after grace)
//! ```
//!
//! Shutdown is best-effort: every step runs even if an earlier one failed.
//!
//! Starting and stopping the graph joins threads and waits on devices, so
//! both run under `tokio::task::spawn_blocking`; the control worker keeps
//! answering while the graph stops.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinHandle};

use crate::config::AppConfig;
use crate::control::{ControlServer, Dispatcher};
use crate::pipeline::{
    ConfigurationError, DeviceFactory, Graph, GraphEvent, PipelineError, StageFactory,
};
use crate::system::Mixer;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why a supervised run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    Interrupted,
    PipelineFault { stage: String, message: String },
}

impl ShutdownReason {
    pub fn exit_code(&self) -> u8 {
        match self {
            ShutdownReason::Interrupted => 0,
            ShutdownReason::PipelineFault { .. } => 3,
        }
    }
}

/// Failures before the event loop was reached.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("invalid pipeline configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("pipeline failed to start: {0}")]
    Start(#[from] PipelineError),

    #[error("cannot bind control listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("pipeline startup task failed: {0}")]
    Task(#[from] JoinError),
}

impl SupervisorError {
    pub fn exit_code(&self) -> u8 {
        match self {
            SupervisorError::Start(_) | SupervisorError::Task(_) => 1,
            SupervisorError::Configuration(_) => 2,
            SupervisorError::Bind { .. } => 4,
        }
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

pub struct Supervisor {
    config: AppConfig,
    factory: Arc<dyn StageFactory>,
    mixer: Arc<dyn Mixer>,
}

impl Supervisor {
    /// Supervisor over the real audio devices.
    pub fn new(config: AppConfig, mixer: Arc<dyn Mixer>) -> Self {
        let factory = Arc::new(DeviceFactory::new(config.pipeline.block_timeout()));
        Self::with_factory(config, factory, mixer)
    }

    pub fn with_factory(
        config: AppConfig,
        factory: Arc<dyn StageFactory>,
        mixer: Arc<dyn Mixer>,
    ) -> Self {
        Self {
            config,
            factory,
            mixer,
        }
    }

    /// Run until `interrupt` completes or the pipeline fails, binding the
    /// control listener on `control.bind_addr`.
    pub async fn run<F>(&self, interrupt: F) -> Result<ShutdownReason, SupervisorError>
    where
        F: Future<Output = ()>,
    {
        let graph = self.launch().await?;

        let addr = self.config.control.bind_addr.clone();
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(source) => {
                stop_graph(graph).await;
                return Err(SupervisorError::Bind { addr, source });
            }
        };
        Ok(self.supervise(graph, listener, interrupt).await)
    }

    /// Like [`run`](Self::run) with an already bound listener.
    pub async fn run_with_listener<F>(
        &self,
        listener: TcpListener,
        interrupt: F,
    ) -> Result<ShutdownReason, SupervisorError>
    where
        F: Future<Output = ()>,
    {
        let graph = self.launch().await?;
        Ok(self.supervise(graph, listener, interrupt).await)
    }

    async fn launch(&self) -> Result<Graph, SupervisorError> {
        let specs = self.config.pipeline.stages.clone();
        let factory = Arc::clone(&self.factory);
        tokio::task::spawn_blocking(move || -> Result<Graph, SupervisorError> {
            let mut graph = Graph::assemble_with(&specs, factory)?;
            graph.start()?;
            log::info!("supervisor: playing {}", graph.describe());
            Ok(graph)
        })
        .await?
    }

    async fn supervise<F>(&self, mut graph: Graph, listener: TcpListener, interrupt: F) -> ShutdownReason
    where
        F: Future<Output = ()>,
    {
        let done = Arc::new(AtomicBool::new(false));
        let server = ControlServer::new(
            Dispatcher::new(graph.equalizer(), Arc::clone(&self.mixer)),
            &self.config.control,
        );
        let flag = Arc::clone(&done);
        let worker = tokio::spawn(async move { server.serve_forever(listener, flag).await });

        tokio::pin!(interrupt);
        let reason = loop {
            tokio::select! {
                _ = &mut interrupt => {
                    log::info!("supervisor: interrupt received");
                    break ShutdownReason::Interrupted;
                }
                event = graph.next_event() => match event {
                    GraphEvent::Fatal { stage, message } => {
                        log::error!("supervisor: fatal fault in '{stage}': {message}");
                        break ShutdownReason::PipelineFault { stage, message };
                    }
                    GraphEvent::EndOfStream { stage } => {
                        log::error!("supervisor: '{stage}' ended its stream");
                        break ShutdownReason::PipelineFault {
                            stage,
                            message: "end of stream".into(),
                        };
                    }
                    GraphEvent::Error { stage, message } => {
                        log::warn!("supervisor: '{stage}': {message}");
                    }
                    other => log::debug!("supervisor: {other}"),
                },
            }
        };

        self.shutdown(graph, &done, worker).await;
        reason
    }

    async fn shutdown(&self, graph: Graph, done: &AtomicBool, mut worker: JoinHandle<()>) {
        stop_graph(graph).await;

        done.store(true, Ordering::Release);
        let grace = self.config.supervisor.shutdown_grace();
        match tokio::time::timeout(grace, &mut worker).await {
            Ok(Ok(())) => log::debug!("supervisor: control worker finished"),
            Ok(Err(e)) => log::warn!("supervisor: control worker failed: {e}"),
            Err(_) => {
                log::warn!("supervisor: control worker still busy after {grace:?}, aborting");
                worker.abort();
            }
        }
        log::info!("supervisor: shutdown complete");
    }
}

/// Stop `graph` on the blocking pool and log anything that did not stop.
async fn stop_graph(mut graph: Graph) {
    match tokio::task::spawn_blocking(move || graph.stop()).await {
        Ok(report) if !report.is_clean() => log::warn!(
            "supervisor: {} stage(s) failed to stop cleanly",
            report.failures.len()
        ),
        Ok(_) => log::debug!("supervisor: graph stopped"),
        Err(e) => log::error!("supervisor: graph stop task failed: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::{Duration, Instant};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    use super::*;
    use crate::pipeline::mock::{MockFactory, MockProbe};
    use crate::system::mixer::RecordingMixer;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.control.bind_addr = "127.0.0.1:0".into();
        config.control.accept_poll_ms = 20;
        config.supervisor.shutdown_grace_ms = 1_000;
        config
    }

    fn supervisor(config: AppConfig, factory: MockFactory) -> Supervisor {
        Supervisor::with_factory(config, Arc::new(factory), Arc::new(RecordingMixer::default()))
    }

    async fn send(addr: SocketAddr, line: &str) -> String {
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(line.as_bytes()).await.unwrap();
        let mut reply = String::new();
        client.read_to_string(&mut reply).await.unwrap();
        reply
    }

    #[tokio::test]
    async fn interrupt_stops_graph_and_control_worker() {
        let probe = MockProbe::default();
        let sup = supervisor(test_config(), MockFactory::with_probe(probe.clone()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        let client = async move {
            let reply = send(addr, "{\"method\":\"set\",\"param\":\"band0\",\"value\":5}\n").await;
            tx.send(()).unwrap();
            reply
        };
        let run = sup.run_with_listener(listener, async {
            let _ = rx.await;
        });

        let (reply, result) = tokio::join!(client, run);
        assert_eq!(reply, "OK\n");

        let reason = result.unwrap();
        assert_eq!(reason, ShutdownReason::Interrupted);
        assert_eq!(reason.exit_code(), 0);
        assert_eq!(probe.started(), 6);
        assert_eq!(probe.stopped(), 6);

        // listener is gone with the worker
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn control_answers_while_the_graph_stops() {
        let probe = MockProbe::default();
        let factory = MockFactory {
            slow_stop: Some(("sink".into(), Duration::from_millis(600))),
            ..MockFactory::with_probe(probe.clone())
        };
        let sup = supervisor(test_config(), factory);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        let client = async move {
            tx.send(()).unwrap();
            // let shutdown reach the slow sink
            tokio::time::sleep(Duration::from_millis(100)).await;
            let asked = Instant::now();
            let reply = send(addr, "{\"method\":\"set\",\"param\":\"band0\",\"value\":5}\n").await;
            (reply, asked.elapsed(), probe.stopped())
        };
        let run = sup.run_with_listener(listener, async {
            let _ = rx.await;
        });

        let ((reply, waited, stopped_so_far), result) = tokio::join!(client, run);
        assert_eq!(result.unwrap(), ShutdownReason::Interrupted);
        assert_eq!(reply, "OK\n");
        assert!(waited < Duration::from_millis(300), "reply took {waited:?}");
        assert!(stopped_so_far < 6, "graph finished stopping before the reply");
    }

    #[tokio::test]
    async fn device_loss_is_a_pipeline_fault() {
        let factory = MockFactory {
            source_blocks: Some(3),
            ..MockFactory::default()
        };
        let sup = supervisor(test_config(), factory);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let reason = tokio::time::timeout(
            Duration::from_secs(5),
            sup.run_with_listener(listener, std::future::pending()),
        )
        .await
        .expect("fault ends the run")
        .unwrap();

        assert!(matches!(
            &reason,
            ShutdownReason::PipelineFault { stage, .. } if stage == "input_device"
        ));
        assert_eq!(reason.exit_code(), 3);
    }

    #[tokio::test]
    async fn bad_stage_list_is_configuration_error() {
        let mut config = test_config();
        config.pipeline.stages.clear();
        let sup = supervisor(config, MockFactory::default());

        let err = sup.run(std::future::ready(())).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Configuration(ConfigurationError::Empty)));
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn start_failure_exits_with_one() {
        let probe = MockProbe::default();
        let factory = MockFactory {
            fail_start: Some("audioconvert".into()),
            ..MockFactory::with_probe(probe.clone())
        };
        let sup = supervisor(test_config(), factory);

        let err = sup.run(std::future::ready(())).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Start(PipelineError::StartFailed { ref stage, .. }) if stage == "audioconvert"));
        assert_eq!(err.exit_code(), 1);
        // everything started before the failing stage was rolled back
        assert_eq!(probe.started(), probe.stopped());
    }

    #[tokio::test]
    async fn bind_failure_stops_the_graph() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = test_config();
        config.control.bind_addr = taken.local_addr().unwrap().to_string();

        let probe = MockProbe::default();
        let sup = supervisor(config, MockFactory::with_probe(probe.clone()));

        let err = sup.run(std::future::ready(())).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Bind { .. }));
        assert_eq!(err.exit_code(), 4);
        assert_eq!(probe.stopped(), 6);
    }
}
