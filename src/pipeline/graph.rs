//! The pipeline graph: an ordered, linear chain of stages with a lifecycle.
//!
//! ```text
//! source ──▶ parser ──▶ filter (EQ) ──▶ converter ──▶ resampler ──▶ sink
//! ```
//!
//! [`Graph`] owns its stages and the streaming [`Runner`].  Only the
//! equalizer bands are reachable from outside, through
//! [`Graph::equalizer`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::element::{DeviceFactory, StageFactory};
use super::equalizer::EqualizerHandle;
use super::error::{ConfigurationError, ParameterError, PipelineError, StageFault};
use super::runner::{Runner, RunningStage, SpawnError};
use super::stage::{Caps, ParamValue, Stage, StageKind, StageSpec};
use super::state::{GraphEvent, GraphState};

/// Bounded wait of the capture element when no factory is supplied.
pub const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// StopReport
// ---------------------------------------------------------------------------

/// A stage that failed to stop cleanly.
#[derive(Debug, Clone, PartialEq)]
pub struct StopFailure {
    pub stage: String,
    pub fault: StageFault,
}

/// Outcome of [`Graph::stop`].  Failures are collected, never raised.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StopReport {
    pub failures: Vec<StopFailure>,
}

impl StopReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

pub struct Graph {
    stages: Vec<Stage>,
    equalizer: EqualizerHandle,
    factory: Arc<dyn StageFactory>,
    state: GraphState,
    runner: Option<Runner>,
    events_tx: mpsc::UnboundedSender<GraphEvent>,
    events_rx: mpsc::UnboundedReceiver<GraphEvent>,
}

impl Graph {
    /// Assemble a graph backed by the audio devices.
    pub fn assemble(specs: &[StageSpec]) -> Result<Self, ConfigurationError> {
        Self::assemble_with(specs, Arc::new(DeviceFactory::new(DEFAULT_BLOCK_TIMEOUT)))
    }

    /// Assemble a graph whose elements come from `factory`.
    ///
    /// # Errors
    ///
    /// [`ConfigurationError`] when the chain is empty, a kind is unknown, a
    /// name repeats, there is not exactly one source (first) and one sink
    /// (last), there is more than one filter, a parameter is unknown or
    /// ill-typed, or the formats do not negotiate.
    pub fn assemble_with(
        specs: &[StageSpec],
        factory: Arc<dyn StageFactory>,
    ) -> Result<Self, ConfigurationError> {
        if specs.is_empty() {
            return Err(ConfigurationError::Empty);
        }

        let stages = specs
            .iter()
            .map(Stage::from_spec)
            .collect::<Result<Vec<_>, _>>()?;

        let mut seen = HashSet::new();
        if let Some(dup) = stages.iter().find(|s| !seen.insert(s.name())) {
            return Err(ConfigurationError::DuplicateName(dup.name().to_string()));
        }

        check_endpoint(&stages, StageKind::Source, Position::First)?;
        check_endpoint(&stages, StageKind::Sink, Position::Last)?;

        let filters: Vec<&Stage> = stages
            .iter()
            .filter(|s| s.kind() == StageKind::Filter)
            .collect();
        let equalizer = match filters.as_slice() {
            [] => {
                log::warn!("pipeline: no filter stage, band changes will not be heard");
                EqualizerHandle::new()
            }
            [only] => only.equalizer().cloned().unwrap_or_default(),
            more => return Err(ConfigurationError::EqualizerCount(more.len())),
        };

        negotiate(&stages)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        log::info!(
            "pipeline: assembled {} stages: {}",
            stages.len(),
            stages.iter().map(|s| s.name()).collect::<Vec<_>>().join(" ! ")
        );

        Ok(Self {
            stages,
            equalizer,
            factory,
            state: GraphState::Stopped,
            runner: None,
            events_tx,
            events_rx,
        })
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Build and start every element, then start streaming.
    ///
    /// No-op when already Playing.  If any stage fails to build or start,
    /// the stages started before it are stopped in reverse order and the
    /// graph stays Stopped.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.state.is_playing() {
            return Ok(());
        }
        if self.state == GraphState::Error {
            self.stop();
        }

        let started = self.start_elements()?;
        let runner = spawn_streaming(Runner::builder(), started, self.events_tx.clone())?;
        self.runner = Some(runner);
        self.set_state(GraphState::Playing);
        Ok(())
    }

    /// Build and start every element in chain order, rolling back on the
    /// first failure.
    fn start_elements(&self) -> Result<Vec<RunningStage>, PipelineError> {
        let caps = negotiate(&self.stages)?;
        let mut started: Vec<RunningStage> = Vec::with_capacity(self.stages.len());

        for (stage, caps) in self.stages.iter().zip(caps) {
            let result = self.factory.build(stage, caps).and_then(|mut element| {
                element.start()?;
                Ok(element)
            });
            match result {
                Ok(element) => {
                    log::debug!("pipeline: started '{}' ({})", stage.name(), caps.output);
                    started.push(RunningStage {
                        name: stage.name().to_string(),
                        kind: stage.kind(),
                        element,
                    });
                }
                Err(fault) => {
                    log::error!("pipeline: '{}' failed to start: {fault}", stage.name());
                    rollback(started);
                    return Err(PipelineError::StartFailed {
                        stage: stage.name().to_string(),
                        reason: fault.to_string(),
                    });
                }
            }
        }
        Ok(started)
    }

    /// Stop streaming and every element.  Always leaves the graph Stopped.
    ///
    /// Every stage gets a stop attempt even when an earlier one fails; the
    /// failures are returned in the report and logged.
    pub fn stop(&mut self) -> StopReport {
        let mut report = StopReport::default();

        if let Some(runner) = self.runner.take() {
            match runner.join() {
                Some(chain) => {
                    for mut stage in chain {
                        if let Err(fault) = stage.element.stop() {
                            report.failures.push(StopFailure {
                                stage: stage.name,
                                fault,
                            });
                        }
                    }
                }
                None => report.failures.push(StopFailure {
                    stage: Runner::THREAD_NAME.into(),
                    fault: StageFault::Stream("streaming thread panicked".into()),
                }),
            }
        }

        for failure in &report.failures {
            log::warn!("pipeline: '{}' did not stop cleanly: {}", failure.stage, failure.fault);
        }

        if self.state != GraphState::Stopped {
            self.set_state(GraphState::Stopped);
        }
        report
    }

    pub fn state(&self) -> GraphState {
        self.state
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Drain the events queued so far.  The iterator ends when the queue is
    /// empty; call again later for new events.  A fatal event moves the
    /// graph to Error as it is yielded.
    pub fn poll_events(&mut self) -> impl Iterator<Item = GraphEvent> + '_ {
        std::iter::from_fn(move || {
            let event = self.events_rx.try_recv().ok()?;
            self.observe(&event);
            Some(event)
        })
    }

    /// Wait for the next event.  Cancel-safe.
    pub async fn next_event(&mut self) -> GraphEvent {
        let event = match self.events_rx.recv().await {
            Some(event) => event,
            // The graph holds a sender, so the channel never closes.
            None => std::future::pending().await,
        };
        self.observe(&event);
        event
    }

    fn observe(&mut self, event: &GraphEvent) {
        if event.is_fatal() && self.state.is_playing() {
            self.set_state(GraphState::Error);
        }
    }

    fn set_state(&mut self, to: GraphState) {
        let from = self.state;
        self.state = to;
        log::info!("pipeline: {from} -> {to}");
        let _ = self.events_tx.send(GraphEvent::StateChanged { from, to });
    }

    // -----------------------------------------------------------------------
    // Stages and parameters
    // -----------------------------------------------------------------------

    /// Handle to the equalizer bands, the only live-mutable stage.
    pub fn equalizer(&self) -> EqualizerHandle {
        self.equalizer.clone()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name() == name)
    }

    /// Write a stage parameter.  Non-equalizer parameters apply on the next
    /// [`start`](Self::start).
    pub fn set_param(
        &mut self,
        stage: &str,
        param: &str,
        value: ParamValue,
    ) -> Result<(), ParameterError> {
        self.stages
            .iter_mut()
            .find(|s| s.name() == stage)
            .ok_or_else(|| ParameterError::UnknownStage(stage.to_string()))?
            .set_param(param, value)
    }

    /// One line describing the negotiated format at every stage.
    pub fn describe(&self) -> String {
        match negotiate(&self.stages) {
            Ok(caps) => self
                .stages
                .iter()
                .zip(caps)
                .map(|(s, c)| format!("{}({}) [{}]", s.name(), s.kind(), c.output))
                .collect::<Vec<_>>()
                .join(" ! "),
            Err(e) => format!("<not negotiated: {e}>"),
        }
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        if self.runner.is_some() {
            self.stop();
        }
    }
}

/// Where an endpoint stage must sit in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    First,
    Last,
}

impl Position {
    fn as_str(self) -> &'static str {
        match self {
            Position::First => "first",
            Position::Last => "last",
        }
    }

    fn pick(self, stages: &[Stage]) -> Option<&Stage> {
        match self {
            Position::First => stages.first(),
            Position::Last => stages.last(),
        }
    }
}

fn check_endpoint(
    stages: &[Stage],
    kind: StageKind,
    position: Position,
) -> Result<(), ConfigurationError> {
    let matching: Vec<&Stage> = stages.iter().filter(|s| s.kind() == kind).collect();
    if matching.len() != 1 {
        return Err(ConfigurationError::EndpointCount {
            kind: kind.as_str(),
            count: matching.len(),
        });
    }

    match position.pick(stages) {
        Some(s) if s.kind() == kind => Ok(()),
        _ => Err(ConfigurationError::EndpointPosition {
            stage: matching[0].name().to_string(),
            position: position.as_str(),
        }),
    }
}

/// Hand the started chain to a new streaming thread.  If the thread cannot
/// be created the chain is stopped again before the error is returned.
fn spawn_streaming(
    builder: std::thread::Builder,
    started: Vec<RunningStage>,
    events: mpsc::UnboundedSender<GraphEvent>,
) -> Result<Runner, PipelineError> {
    Runner::spawn_with(builder, started, events).map_err(|SpawnError { source, chain }| {
        log::error!("pipeline: cannot start streaming thread: {source}");
        rollback(chain);
        PipelineError::StartFailed {
            stage: Runner::THREAD_NAME.into(),
            reason: source.to_string(),
        }
    })
}

fn negotiate(stages: &[Stage]) -> Result<Vec<Caps>, ConfigurationError> {
    let mut upstream = None;
    stages
        .iter()
        .map(|stage| {
            let caps = stage.negotiate(upstream)?;
            upstream = Some(caps.output);
            Ok(caps)
        })
        .collect()
}

fn rollback(started: Vec<RunningStage>) {
    for mut stage in started.into_iter().rev() {
        if let Err(fault) = stage.element.stop() {
            log::warn!("pipeline: rollback of '{}' failed: {fault}", stage.name);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::mock::{MockFactory, MockProbe};
    use crate::pipeline::stage::default_stage_specs;

    fn graph_with(factory: MockFactory) -> Graph {
        Graph::assemble_with(&default_stage_specs(), Arc::new(factory)).unwrap()
    }

    fn assemble_err(specs: &[StageSpec]) -> ConfigurationError {
        match Graph::assemble_with(specs, Arc::new(MockFactory::default())) {
            Ok(_) => panic!("assembly should fail"),
            Err(e) => e,
        }
    }

    #[test]
    fn assemble_keeps_input_order() {
        let specs = default_stage_specs();
        let graph = graph_with(MockFactory::default());
        let names: Vec<&str> = graph.stages().iter().map(|s| s.name()).collect();
        let expected: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, expected);
        assert_eq!(graph.state(), GraphState::Stopped);
    }

    #[test]
    fn assemble_minimal_chain() {
        let specs = vec![
            StageSpec::new("in", "source"),
            StageSpec::new("eq", "filter"),
            StageSpec::new("out", "sink"),
        ];
        let graph = Graph::assemble_with(&specs, Arc::new(MockFactory::default())).unwrap();
        assert_eq!(graph.stages().len(), 3);
    }

    #[test]
    fn assemble_rejects_bad_topologies() {
        assert_eq!(assemble_err(&[]), ConfigurationError::Empty);

        let two_sources = vec![
            StageSpec::new("a", "source"),
            StageSpec::new("b", "source"),
            StageSpec::new("eq", "filter"),
            StageSpec::new("out", "sink"),
        ];
        assert_eq!(
            assemble_err(&two_sources),
            ConfigurationError::EndpointCount { kind: "source", count: 2 }
        );

        let two_sinks = vec![
            StageSpec::new("in", "source"),
            StageSpec::new("eq", "filter"),
            StageSpec::new("a", "sink"),
            StageSpec::new("b", "sink"),
        ];
        assert_eq!(
            assemble_err(&two_sinks),
            ConfigurationError::EndpointCount { kind: "sink", count: 2 }
        );

        let unknown = vec![
            StageSpec::new("in", "source"),
            StageSpec::new("fx", "chorus"),
            StageSpec::new("out", "sink"),
        ];
        assert!(matches!(
            assemble_err(&unknown),
            ConfigurationError::UnknownKind { .. }
        ));
    }

    #[test]
    fn assemble_rejects_misplaced_endpoints_and_duplicates() {
        let sink_first = vec![
            StageSpec::new("out", "sink"),
            StageSpec::new("eq", "filter"),
            StageSpec::new("in", "source"),
        ];
        assert_eq!(
            assemble_err(&sink_first),
            ConfigurationError::EndpointPosition {
                stage: "in".into(),
                position: "first"
            }
        );

        let sink_early = vec![
            StageSpec::new("in", "source"),
            StageSpec::new("out", "sink"),
            StageSpec::new("eq", "filter"),
        ];
        assert_eq!(
            assemble_err(&sink_early),
            ConfigurationError::EndpointPosition {
                stage: "out".into(),
                position: "last"
            }
        );

        let dup = vec![
            StageSpec::new("x", "source"),
            StageSpec::new("x", "filter"),
            StageSpec::new("out", "sink"),
        ];
        assert_eq!(assemble_err(&dup), ConfigurationError::DuplicateName("x".into()));

        let two_eqs = vec![
            StageSpec::new("in", "source"),
            StageSpec::new("eq1", "filter"),
            StageSpec::new("eq2", "filter"),
            StageSpec::new("out", "sink"),
        ];
        assert_eq!(assemble_err(&two_eqs), ConfigurationError::EqualizerCount(2));
    }

    #[test]
    fn chain_without_filter_gets_detached_equalizer() {
        let specs = vec![StageSpec::new("in", "source"), StageSpec::new("out", "sink")];
        let mut graph = Graph::assemble_with(&specs, Arc::new(MockFactory::default())).unwrap();
        graph.equalizer().set_band(0, -3.0).unwrap();
        assert_eq!(graph.equalizer().gain(0), Some(-3.0));

        graph.start().unwrap();
        assert_eq!(graph.state(), GraphState::Playing);
        assert!(graph.stop().is_clean());
    }

    #[test]
    fn start_and_stop_cycle() {
        let probe = MockProbe::default();
        let mut graph = graph_with(MockFactory::with_probe(probe.clone()));

        graph.start().unwrap();
        assert_eq!(graph.state(), GraphState::Playing);
        // idempotent
        graph.start().unwrap();
        assert_eq!(probe.started(), default_stage_specs().len());

        std::thread::sleep(Duration::from_millis(30));
        let report = graph.stop();
        assert!(report.is_clean());
        assert_eq!(graph.state(), GraphState::Stopped);
        assert!(probe.sink_samples() > 0);
        assert_eq!(probe.stopped(), default_stage_specs().len());

        // restartable
        graph.start().unwrap();
        assert_eq!(graph.state(), GraphState::Playing);
        graph.stop();
    }

    #[test]
    fn failed_start_rolls_back_started_stages() {
        let probe = MockProbe::default();
        let factory = MockFactory {
            fail_start: Some("sink".into()),
            ..MockFactory::with_probe(probe.clone())
        };
        let mut graph = graph_with(factory);

        let err = graph.start().unwrap_err();
        assert_eq!(err.stage(), Some("sink"));
        assert_eq!(graph.state(), GraphState::Stopped);
        // every stage before the sink was started and then stopped again
        assert_eq!(probe.started(), default_stage_specs().len() - 1);
        assert_eq!(probe.stopped(), probe.started());
    }

    #[test]
    fn failed_streaming_spawn_rolls_back_started_stages() {
        let probe = MockProbe::default();
        let graph = graph_with(MockFactory::with_probe(probe.clone()));
        let started = graph.start_elements().unwrap();
        assert_eq!(probe.started(), default_stage_specs().len());

        let impossible = std::thread::Builder::new().stack_size(1 << 60);
        let err = match spawn_streaming(impossible, started, graph.events_tx.clone()) {
            Ok(_) => panic!("spawn should fail"),
            Err(e) => e,
        };

        assert_eq!(err.stage(), Some(Runner::THREAD_NAME));
        assert_eq!(probe.stopped(), probe.started());
    }

    #[test]
    fn stop_is_best_effort() {
        let probe = MockProbe::default();
        let factory = MockFactory {
            fail_stop: Some("input_device".into()),
            ..MockFactory::with_probe(probe.clone())
        };
        let mut graph = graph_with(factory);
        graph.start().unwrap();

        let report = graph.stop();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, "input_device");
        assert_eq!(graph.state(), GraphState::Stopped);
        // the failing source did not prevent the others from stopping
        assert_eq!(probe.stopped(), default_stage_specs().len() - 1);
    }

    #[test]
    fn stop_from_any_state_ends_stopped() {
        let mut graph = graph_with(MockFactory::default());
        assert!(graph.stop().is_clean());
        assert_eq!(graph.state(), GraphState::Stopped);

        graph.start().unwrap();
        graph.stop();
        assert_eq!(graph.state(), GraphState::Stopped);
    }

    #[test]
    fn fatal_event_moves_graph_to_error() {
        let factory = MockFactory {
            source_blocks: Some(3),
            ..MockFactory::default()
        };
        let mut graph = graph_with(factory);
        graph.start().unwrap();

        let mut fatal = None;
        for _ in 0..200 {
            if let Some(ev) = graph.poll_events().find(|e| e.is_fatal()) {
                fatal = Some(ev);
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        assert!(matches!(fatal, Some(GraphEvent::Fatal { ref stage, .. }) if stage == "input_device"));
        assert_eq!(graph.state(), GraphState::Error);

        graph.stop();
        assert_eq!(graph.state(), GraphState::Stopped);
    }

    #[test]
    fn poll_events_is_finite_and_restartable() {
        let mut graph = graph_with(MockFactory::default());
        graph.start().unwrap();

        let first: Vec<_> = graph.poll_events().collect();
        assert!(first.contains(&GraphEvent::StateChanged {
            from: GraphState::Stopped,
            to: GraphState::Playing
        }));
        assert_eq!(graph.poll_events().count(), 0);

        graph.stop();
        let second: Vec<_> = graph.poll_events().collect();
        assert!(second.contains(&GraphEvent::StateChanged {
            from: GraphState::Playing,
            to: GraphState::Stopped
        }));
    }

    #[test]
    fn equalizer_writes_reach_the_filter_stage() {
        let mut graph = graph_with(MockFactory::default());
        let handle = graph.equalizer();
        graph.start().unwrap();

        handle.set_band(0, 5.0).unwrap();
        assert_eq!(
            graph.stage("eq").unwrap().param("band0"),
            Some(ParamValue::Float(5.0))
        );
        graph.stop();
    }

    #[test]
    fn set_param_routes_by_stage_name() {
        let mut graph = graph_with(MockFactory::default());
        graph
            .set_param("audioresample", "sample-rate", ParamValue::Int(44_100))
            .unwrap();
        assert_eq!(
            graph.set_param("nope", "sample-rate", ParamValue::Int(1)),
            Err(ParameterError::UnknownStage("nope".into()))
        );
        assert!(graph.describe().contains("audioresample(resampler) [44100 Hz, 2 ch]"));
    }

    #[test]
    fn parameters_that_no_longer_negotiate_fail_start() {
        let mut graph = graph_with(MockFactory::default());
        graph
            .set_param("raw_audio_parse", "sample-rate", ParamValue::Int(8_000))
            .unwrap();
        assert!(matches!(graph.start(), Err(PipelineError::Negotiation(_))));
        assert_eq!(graph.state(), GraphState::Stopped);
    }
}
