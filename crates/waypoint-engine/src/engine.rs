use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use waypoint_core::config::EngineConfig;
use waypoint_core::error::{Result, WaypointError};
use waypoint_core::event::EventBus;
use waypoint_core::types::{
    Namespace, RunEvent, RunId, RunOutcome, RunStatus, SharedState,
};
use waypoint_dsl::CompiledGraph;

use crate::registry::StepRegistry;
use crate::steps::StepFactory;

/// Step budget used when neither the caller nor the process sets one.
pub const DEFAULT_MAX_STEPS: usize = 1000;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Budget for processes that do not declare `max_steps`.
    pub default_max_steps: usize,
    /// Budget that wins over the process declaration.
    pub max_steps: Option<usize>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            default_max_steps: DEFAULT_MAX_STEPS,
            max_steps: None,
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            default_max_steps: config.max_steps,
            max_steps: None,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }
}

/// Walks a compiled graph, one step at a time.
///
/// The graph and registry are shared read-only, so one engine can serve any
/// number of concurrent runs. Each run owns its state chain: every step sees
/// an immutable snapshot and the engine merges the returned delta into a new
/// one before routing.
pub struct Engine {
    graph: Arc<CompiledGraph>,
    registry: Arc<StepRegistry>,
    max_steps: usize,
    event_bus: Option<Arc<EventBus>>,
}

impl Engine {
    /// Create an engine. Every step the graph declares must be registered.
    pub fn new(
        graph: Arc<CompiledGraph>,
        registry: StepRegistry,
        options: EngineOptions,
    ) -> Result<Self> {
        if let Some(missing) = graph.step_names().find(|name| !registry.contains(name)) {
            return Err(WaypointError::StepNotRegistered(missing.to_string()));
        }

        let max_steps = options
            .max_steps
            .or(graph.max_steps())
            .unwrap_or(options.default_max_steps)
            .max(1);

        Ok(Self {
            graph,
            registry: Arc::new(registry),
            max_steps,
            event_bus: None,
        })
    }

    /// Build the registry with `factory`, then create the engine.
    pub fn build(
        graph: Arc<CompiledGraph>,
        factory: &StepFactory,
        options: EngineOptions,
    ) -> Result<Self> {
        let registry = factory.build(&graph)?;
        Self::new(graph, registry, options)
    }

    /// Publish run events on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Run the process to completion with the given initial context.
    pub async fn run(&self, context: Namespace) -> Result<RunOutcome> {
        self.run_with_cancel(context, CancellationToken::new()).await
    }

    /// Run the process, stopping early if `cancel` fires.
    ///
    /// Cancellation drops the in-flight step and returns the state
    /// accumulated so far as [`RunStatus::Cancelled`].
    pub async fn run_with_cancel(
        &self,
        context: Namespace,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        self.run_with_id(RunId::new(), context, cancel).await
    }

    /// Like [`Engine::run_with_cancel`], with a caller-chosen run id.
    pub async fn run_with_id(
        &self,
        run_id: RunId,
        context: Namespace,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        let started = Instant::now();
        let mut state = SharedState::new(context);
        let mut current = self.graph.start().to_string();
        let mut path: Vec<String> = Vec::new();

        info!(
            run_id = %run_id,
            start = %current,
            max_steps = self.max_steps,
            "Run started"
        );
        self.publish(RunEvent::RunStarted {
            run_id: run_id.clone(),
            start: current.clone(),
        });

        let status = loop {
            if cancel.is_cancelled() {
                break RunStatus::Cancelled;
            }
            if path.len() >= self.max_steps {
                warn!(
                    run_id = %run_id,
                    step = %current,
                    limit = self.max_steps,
                    "Step budget exhausted, aborting run"
                );
                break RunStatus::Aborted {
                    limit: self.max_steps,
                };
            }

            let step = self
                .registry
                .get(&current)
                .ok_or_else(|| WaypointError::StepNotRegistered(current.clone()))?;

            let iteration = path.len() + 1;
            debug!(run_id = %run_id, step = %current, iteration, "Executing step");
            self.publish(RunEvent::StepStarted {
                run_id: run_id.clone(),
                step: current.clone(),
                iteration,
            });

            let step_started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = step.execute(&state) => Some(result),
            };

            let delta = match result {
                Some(Ok(delta)) => delta,
                Some(Err(e)) => {
                    // The failure is always attributed to the step that was running.
                    let message = match e {
                        WaypointError::StepExecution { message, .. } => message,
                        other => other.to_string(),
                    };
                    let err = WaypointError::StepExecution {
                        step: current.clone(),
                        message,
                    };
                    error!(run_id = %run_id, step = %current, error = %err, "Step failed");
                    self.publish(RunEvent::StepFailed {
                        run_id: run_id.clone(),
                        step: current.clone(),
                        error: err.to_string(),
                    });
                    self.publish(RunEvent::RunFailed {
                        run_id: run_id.clone(),
                        error: err.to_string(),
                    });
                    return Err(err);
                }
                None => {
                    info!(run_id = %run_id, step = %current, "Run cancelled during step");
                    break RunStatus::Cancelled;
                }
            };

            let elapsed_ms = step_started.elapsed().as_millis() as u64;
            state = state.apply(&delta);
            path.push(current.clone());

            debug!(
                run_id = %run_id,
                step = %current,
                elapsed_ms,
                log_records = delta.log.len(),
                "Step complete"
            );
            self.publish(RunEvent::StepCompleted {
                run_id: run_id.clone(),
                step: current.clone(),
                elapsed_ms,
                log_records: delta.log.len(),
            });

            let decision = self.graph.next(&current, &state);
            debug!(
                run_id = %run_id,
                from = %current,
                to = %decision.target,
                reason = ?decision.reason,
                "Routing"
            );
            self.publish(RunEvent::Transition {
                run_id: run_id.clone(),
                from: current.clone(),
                to: decision.target.name().to_string(),
                reason: decision.reason.clone(),
            });

            match decision.termination() {
                Some(reason) => break RunStatus::Completed { reason },
                None => current = decision.target.name().to_string(),
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            run_id = %run_id,
            status = ?status,
            steps = path.len(),
            elapsed_ms,
            "Run finished"
        );
        self.publish(RunEvent::RunFinished {
            run_id: run_id.clone(),
            status: status.clone(),
            steps_executed: path.len(),
        });

        Ok(RunOutcome {
            run_id,
            status,
            state,
            steps_executed: path.len(),
            path,
            elapsed_ms,
        })
    }

    fn publish(&self, event: RunEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use waypoint_core::types::{RouteReason, Termination};
    use waypoint_dsl::{compile, CompileOptions, EdgeSpec, ProcessDescription, StepSpec};
    use waypoint_test_utils::{context, fixtures, FailingStep, FnStep, PendingStep};

    fn graph(desc: &ProcessDescription) -> Arc<CompiledGraph> {
        Arc::new(compile(desc, CompileOptions::default()).unwrap())
    }

    fn routing_registry() -> StepRegistry {
        let mut registry = StepRegistry::new();
        registry.register("a", FnStep::new(|state| {
            let ok = state.context.get("ok").cloned().unwrap_or(json!(false));
            Ok(waypoint_core::Delta::new().with_quality("ok", ok))
        }));
        registry.register("b", FnStep::artifact("visited", json!("b")));
        registry.register("c", FnStep::artifact("visited", json!("c")));
        registry
    }

    #[tokio::test]
    async fn test_end_to_end_two_steps() {
        let desc = fixtures::two_step();
        let mut registry = StepRegistry::new();
        registry.register("s1", FnStep::artifact("x", json!("first")));
        registry.register("s2", FnStep::quality("status", json!("done")));

        let engine = Engine::new(graph(&desc), registry, EngineOptions::default()).unwrap();
        let outcome = engine.run(context(json!({}))).await.unwrap();

        assert!(outcome.is_completed());
        assert_eq!(
            outcome.status,
            RunStatus::Completed {
                reason: Termination::DoneCondition
            }
        );
        assert_eq!(outcome.artifacts().get("x"), Some(&json!("first")));
        assert_eq!(outcome.artifacts().len(), 1);
        assert_eq!(outcome.steps_executed, 2);
        assert_eq!(outcome.path, ["s1", "s2"]);
    }

    #[tokio::test]
    async fn test_guard_and_fallback_routing() {
        let desc = fixtures::routing();
        let engine =
            Engine::new(graph(&desc), routing_registry(), EngineOptions::default()).unwrap();

        let outcome = engine.run(context(json!({"ok": true}))).await.unwrap();
        assert_eq!(outcome.path, ["a", "b"]);
        assert_eq!(outcome.artifacts()["visited"], json!("b"));

        let outcome = engine.run(context(json!({"ok": false}))).await.unwrap();
        assert_eq!(outcome.path, ["a", "c"]);
        assert_eq!(
            outcome.status,
            RunStatus::Completed {
                reason: Termination::TerminalEdge
            }
        );
    }

    #[tokio::test]
    async fn test_no_successor_terminates() {
        let desc = ProcessDescription::new("a")
            .with_step("a", StepSpec::new("assign"))
            .with_step("b", StepSpec::new("assign"))
            .with_edge(EdgeSpec::conditional("a", "b", "quality.ok == True"));
        let engine =
            Engine::new(graph(&desc), routing_registry(), EngineOptions::default()).unwrap();

        let outcome = engine.run(context(json!({"ok": false}))).await.unwrap();
        assert_eq!(outcome.path, ["a"]);
        assert_eq!(
            outcome.status,
            RunStatus::Completed {
                reason: Termination::NoSuccessor
            }
        );
    }

    #[tokio::test]
    async fn test_cycle_aborts_at_limit() {
        let desc = fixtures::cycle();
        let mut registry = StepRegistry::new();
        registry.register("ping", FnStep::log("ping"));
        registry.register("pong", FnStep::log("pong"));

        let engine = Engine::new(graph(&desc), registry, EngineOptions::default()).unwrap();
        let outcome = engine.run(context(json!({}))).await.unwrap();

        assert!(outcome.is_aborted());
        assert_eq!(outcome.status, RunStatus::Aborted { limit: 1000 });
        assert_eq!(outcome.steps_executed, 1000);
        assert_eq!(outcome.log().len(), 1000);
        assert_eq!(outcome.path[998], "ping");
    }

    #[tokio::test]
    async fn test_max_steps_precedence() {
        let desc = fixtures::cycle().with_max_steps(7);
        let registry = || {
            let mut r = StepRegistry::new();
            r.register("ping", FnStep::log("ping"));
            r.register("pong", FnStep::log("pong"));
            r
        };

        let engine = Engine::new(graph(&desc), registry(), EngineOptions::default()).unwrap();
        assert_eq!(engine.max_steps(), 7);
        let outcome = engine.run(context(json!({}))).await.unwrap();
        assert_eq!(outcome.steps_executed, 7);

        let options = EngineOptions::default().with_max_steps(3);
        let engine = Engine::new(graph(&desc), registry(), options).unwrap();
        let outcome = engine.run(context(json!({}))).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Aborted { limit: 3 });
    }

    #[tokio::test]
    async fn test_step_failure_is_an_error() {
        let desc = fixtures::two_step();
        let mut registry = StepRegistry::new();
        registry.register("s1", FnStep::artifact("x", json!("first")));
        registry.register("s2", FailingStep::new("disk full"));

        let engine = Engine::new(graph(&desc), registry, EngineOptions::default()).unwrap();
        let err = engine.run(context(json!({}))).await.unwrap_err();

        assert!(err.is_execution_failure());
        match err {
            WaypointError::StepExecution { step, message } => {
                assert_eq!(step, "s2");
                assert!(message.contains("disk full"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_step_failure_names_the_running_step() {
        let desc = fixtures::two_step();
        let mut registry = StepRegistry::new();
        registry.register("s1", FnStep::artifact("x", json!("first")));
        registry.register(
            "s2",
            FnStep::new(|_| {
                Err(WaypointError::StepExecution {
                    step: "s1".into(),
                    message: "quota exceeded".into(),
                })
            }),
        );

        let engine = Engine::new(graph(&desc), registry, EngineOptions::default()).unwrap();
        match engine.run(context(json!({}))).await.unwrap_err() {
            WaypointError::StepExecution { step, message } => {
                assert_eq!(step, "s2");
                assert_eq!(message, "quota exceeded");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_recorded_error_is_not_a_failure() {
        let desc = fixtures::two_step();
        let mut registry = StepRegistry::new();
        registry.register(
            "s1",
            FnStep::new(|_| Ok(waypoint_core::Delta::new().with_error("upstream timeout"))),
        );
        registry.register("s2", FnStep::quality("status", json!("done")));

        let engine = Engine::new(graph(&desc), registry, EngineOptions::default()).unwrap();
        let outcome = engine.run(context(json!({}))).await.unwrap();
        assert!(outcome.is_completed());
        assert_eq!(outcome.recorded_error(), Some(&json!("upstream timeout")));
    }

    #[tokio::test]
    async fn test_missing_registration_rejected_up_front() {
        let desc = fixtures::two_step();
        let mut registry = StepRegistry::new();
        registry.register("s1", FnStep::log("s1"));

        let err = Engine::new(graph(&desc), registry, EngineOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, WaypointError::StepNotRegistered(ref name) if name == "s2"));
    }

    #[tokio::test]
    async fn test_cancellation_returns_partial_state() {
        let desc = fixtures::two_step();
        let mut registry = StepRegistry::new();
        registry.register("s1", FnStep::artifact("x", json!("first")));
        registry.register("s2", PendingStep);

        let engine = Engine::new(graph(&desc), registry, EngineOptions::default()).unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = engine.run_with_cancel(context(json!({})), cancel).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert_eq!(outcome.path, ["s1"]);
        assert_eq!(outcome.artifacts()["x"], json!("first"));
    }

    #[tokio::test]
    async fn test_events_published_in_order() {
        let desc = fixtures::routing();
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let engine = Engine::new(graph(&desc), routing_registry(), EngineOptions::default())
            .unwrap()
            .with_event_bus(bus.clone());

        let outcome = engine.run(context(json!({"ok": true}))).await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(events.iter().all(|e| e.run_id() == &outcome.run_id));
        assert!(matches!(events.first(), Some(RunEvent::RunStarted { .. })));
        assert!(events.last().is_some_and(|e| e.is_final()));

        let reasons: Vec<&RouteReason> = events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Transition { reason, .. } => Some(reason),
                _ => None,
            })
            .collect();
        assert!(matches!(reasons[0], RouteReason::Guard { index: 0, .. }));
        assert_eq!(reasons[1], &RouteReason::Fallback);
    }

    #[tokio::test]
    async fn test_concurrent_runs_share_engine() {
        let desc = fixtures::routing();
        let engine = Arc::new(
            Engine::new(graph(&desc), routing_registry(), EngineOptions::default()).unwrap(),
        );

        let handles: Vec<_> = [true, false, true, false]
            .into_iter()
            .map(|ok| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.run(context(json!({ "ok": ok }))).await })
            })
            .collect();

        for (handle, ok) in handles.into_iter().zip([true, false, true, false]) {
            let outcome = handle.await.unwrap().unwrap();
            let expected = if ok { "b" } else { "c" };
            assert_eq!(outcome.artifacts()["visited"], json!(expected));
        }
    }

    #[tokio::test]
    async fn test_build_from_factory() {
        let desc = fixtures::review_loop();
        let engine = Engine::build(
            graph(&desc),
            &StepFactory::new().with_completion(Arc::new(crate::SimulatedCompletion)),
            EngineOptions::default(),
        )
        .unwrap();

        let outcome = engine
            .run(context(json!({"topic": "ownership and borrowing"})))
            .await
            .unwrap();
        assert!(outcome.is_completed());
        assert_eq!(outcome.quality()["review_status"], json!("approved"));
        assert_eq!(outcome.path, ["writer", "reviewer"]);
    }
}
