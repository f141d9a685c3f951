//! Exploration control loop.
//!
//! One iteration per step, up to `max_steps`: capture the screen, decide,
//! execute, settle, re-capture and verify (retrying with the oracle's
//! alternatives on failure), then record one ledger step and update the graph.
//! The loop is single-threaded; cancellation is only observed between steps.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::core::graph::{NavigationGraph, ScreenNode, TransitionAction};
use crate::core::types::{ActionKind, Decision, VerificationResult};
use crate::core::verifier::{ScreenObservation, verify};
use crate::decision::{DecisionContext, DecisionProtocol, DecisionSettings, resolve_alternative};
use crate::error::ExplorationError;
use crate::io::action::ActionExecutor;
use crate::io::capture::{Capture, ScreenCapture};
use crate::io::config::ExplorerConfig;
use crate::io::graph_store::{load_graph, write_graph};
use crate::io::ledger_store::LedgerStore;
use crate::io::oracle::{Oracle, OracleMode};
use crate::ledger::{ExplorationPath, ExplorationStep, PathMetadata};

/// Cooperative stop signal, checked at the top of every iteration.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress notifications published by the loop.
#[derive(Debug)]
pub enum ExplorationEvent<'e> {
    ScreenDiscovered { node: &'e ScreenNode },
    DecisionMade { step: u32, decision: &'e Decision },
    StepRecorded { step: &'e ExplorationStep },
    /// A non-fatal condition, or the terminal error right before `run` returns it.
    Error { error: &'e ExplorationError },
}

/// Why `run` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A `done` decision (from the oracle or a guard).
    Done,
    StepBudgetExhausted,
    Cancelled,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::Done => "done",
            StopReason::StepBudgetExhausted => "step_budget_exhausted",
            StopReason::Cancelled => "cancelled",
        }
    }
}

/// Summary of one `run` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplorationOutcome {
    pub session_id: String,
    /// Ledger steps appended by this run.
    pub steps_executed: u32,
    pub stop: StopReason,
}

enum StepFlow {
    Continue,
    Done,
}

/// How the last execution attempt of a step ended.
enum AttemptOutcome {
    ExecutionFailed(String),
    /// Executed, but the screen could not be re-captured.
    Unverified(String),
    /// `from` is the screen the attempt ran on; it differs from the step's
    /// starting screen when an earlier attempt already moved the app.
    Verified {
        from: Capture,
        after: Capture,
        verification: VerificationResult,
        elapsed: Duration,
    },
}

/// Owns the graph and ledger of one session and drives the collaborators.
pub struct Explorer<C, O, A> {
    capture: C,
    oracle: O,
    executor: A,
    config: ExplorerConfig,
    mode: OracleMode,
    graph: NavigationGraph,
    path: ExplorationPath,
    protocol: DecisionProtocol,
    store: Option<LedgerStore>,
    cancel: CancellationToken,
}

impl<C: ScreenCapture, O: Oracle, A: ActionExecutor> Explorer<C, O, A> {
    /// Start a fresh session for `goal`.
    pub fn new(
        goal: impl Into<String>,
        capture: C,
        oracle: O,
        executor: A,
        config: ExplorerConfig,
    ) -> Self {
        let protocol = DecisionProtocol::new(DecisionSettings::from(&config));
        Self {
            capture,
            oracle,
            executor,
            config,
            mode: OracleMode::Choice,
            graph: NavigationGraph::new(),
            path: ExplorationPath::new(goal),
            protocol,
            store: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Continue a persisted session, reloading its ledger and graph snapshot.
    pub fn resume(
        store: LedgerStore,
        session_id: &str,
        capture: C,
        oracle: O,
        executor: A,
        config: ExplorerConfig,
    ) -> Result<Self, ExplorationError> {
        let path = store
            .load(session_id)
            .map_err(ExplorationError::PersistenceFailure)?;
        let graph_path = store.graph_path_for(session_id);
        let graph = if graph_path.exists() {
            load_graph(&graph_path).map_err(ExplorationError::PersistenceFailure)?
        } else {
            NavigationGraph::new()
        };
        info!(session = %session_id, steps = path.steps.len(), screens = graph.nodes().count(), "resuming session");

        let protocol = DecisionProtocol::new(DecisionSettings::from(&config));
        Ok(Self {
            capture,
            oracle,
            executor,
            config,
            mode: OracleMode::Choice,
            graph,
            path,
            protocol,
            store: Some(store),
            cancel: CancellationToken::new(),
        })
    }

    /// Persist the ledger and graph snapshot to `store`.
    pub fn with_store(mut self, store: LedgerStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_mode(mut self, mode: OracleMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn graph(&self) -> &NavigationGraph {
        &self.graph
    }

    pub fn path(&self) -> &ExplorationPath {
        &self.path
    }

    pub fn into_parts(self) -> (NavigationGraph, ExplorationPath) {
        (self.graph, self.path)
    }

    /// Run until `done`, the step budget, or cancellation.
    ///
    /// Returns an error only for oracle unavailability or exhausted oracle
    /// retries; the ledger is persisted first either way.
    #[instrument(skip_all, fields(session = %self.path.session_id, max_steps = self.config.max_steps))]
    pub fn run<F: FnMut(&ExplorationEvent<'_>)>(
        &mut self,
        mut on_event: F,
    ) -> Result<ExplorationOutcome, ExplorationError> {
        let steps_before = self.path.steps.len();
        let mut stop = StopReason::StepBudgetExhausted;

        for iteration in 0..self.config.max_steps {
            if self.cancel.is_cancelled() {
                info!(iteration, "exploration cancelled");
                stop = StopReason::Cancelled;
                break;
            }
            match self.step(&mut on_event) {
                Ok(StepFlow::Continue) => {}
                Ok(StepFlow::Done) => {
                    stop = StopReason::Done;
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "exploration aborted");
                    on_event(&ExplorationEvent::Error { error: &err });
                    self.finish("aborted", &mut on_event);
                    return Err(err);
                }
            }
        }

        self.finish(stop.as_str(), &mut on_event);
        let steps_executed = u32::try_from(self.path.steps.len() - steps_before).unwrap_or(u32::MAX);
        info!(stop = stop.as_str(), steps_executed, "exploration finished");
        Ok(ExplorationOutcome {
            session_id: self.path.session_id.clone(),
            steps_executed,
            stop,
        })
    }

    fn step<F: FnMut(&ExplorationEvent<'_>)>(
        &mut self,
        on_event: &mut F,
    ) -> Result<StepFlow, ExplorationError> {
        let before = match self.capture_screen() {
            Ok(capture) => capture,
            Err(err) => {
                warn!(error = %err, "skipping step after capture failure");
                on_event(&ExplorationEvent::Error { error: &err });
                return Ok(StepFlow::Continue);
            }
        };
        let is_revisit = self.register_screen(&before, on_event);

        let ctx = DecisionContext {
            goal: &self.path.goal,
            screen: &before,
            is_revisit,
            path: &self.path,
        };
        let decided = match self.mode {
            OracleMode::Choice => self.protocol.decide(&self.oracle, &ctx),
            OracleMode::FreeForm => self.protocol.decide_free_form(&self.oracle, &ctx),
        };
        if let Some(degradation) = self.protocol.take_degradation() {
            on_event(&ExplorationEvent::Error { error: &degradation });
        }
        let decision = match decided {
            Ok(decision) => decision,
            Err(err) if err.is_terminal() => return Err(err),
            Err(err) => {
                warn!(error = %err, "decision failed; finishing");
                on_event(&ExplorationEvent::Error { error: &err });
                return Ok(StepFlow::Done);
            }
        };
        on_event(&ExplorationEvent::DecisionMade {
            step: self.path.next_step_id(),
            decision: &decision,
        });
        if decision.is_done() {
            info!(reasoning = %decision.reasoning, "oracle chose done");
            return Ok(StepFlow::Done);
        }

        let (final_decision, retries, outcome) = self.execute_with_retries(decision, &before, on_event);

        let id = self.path.next_step_id();
        let mut step = ExplorationStep::new(id, &final_decision, &before);
        let after = match outcome {
            AttemptOutcome::ExecutionFailed(message) => {
                step = step.failed(message);
                None
            }
            AttemptOutcome::Unverified(message) => {
                step = step.failed(message);
                None
            }
            AttemptOutcome::Verified {
                from,
                after,
                verification,
                elapsed,
            } => {
                step = step.verified(verification, retries > 0);
                Some((from, after, elapsed))
            }
        };
        step.was_retry = retries > 0;
        self.path.add_step(step);
        if let Some(recorded) = self.path.last_step() {
            debug!(step = recorded.id, success = recorded.was_successful, "recorded step");
            on_event(&ExplorationEvent::StepRecorded { step: recorded });
        }
        if self.config.persist_after_each_step {
            self.persist_ledger(on_event);
        }

        if let Some((from, after, elapsed)) = after {
            self.record_transition(&from, after, &final_decision, elapsed, on_event);
        }
        Ok(StepFlow::Continue)
    }

    /// Execute `decision`, falling back to its alternatives while verification fails.
    ///
    /// Attempts that moved the app before a retry are recorded in the graph
    /// here; the last attempt's transition is left to the caller.
    ///
    /// Returns the last decision attempted, the number of retries, and how it ended.
    fn execute_with_retries<F: FnMut(&ExplorationEvent<'_>)>(
        &mut self,
        decision: Decision,
        before: &Capture,
        on_event: &mut F,
    ) -> (Decision, u32, AttemptOutcome) {
        let mut alternatives: VecDeque<_> = decision
            .alternative_actions
            .iter()
            .filter(|alt| alt.kind() != ActionKind::Done)
            .cloned()
            .collect();
        let mut attempt = decision;
        let mut screen = before.clone();
        let mut retries = 0u32;

        loop {
            debug!(action = %attempt.summary(), retries, "executing");
            let started = Instant::now();
            let failure = match self.executor.execute(&attempt) {
                Ok(true) => None,
                Ok(false) => Some(ExplorationError::ActionExecutionFailure(format!(
                    "executor reported failure for {}",
                    attempt.summary()
                ))),
                Err(err) => Some(ExplorationError::ActionExecutionFailure(err.to_string())),
            };
            if let Some(err) = failure {
                warn!(error = %err, "action failed");
                on_event(&ExplorationEvent::Error { error: &err });
                return (attempt, retries, AttemptOutcome::ExecutionFailed(err.to_string()));
            }

            let settle = self.config.settle_delay();
            if !settle.is_zero() {
                thread::sleep(settle);
            }
            let after = match self.capture_screen() {
                Ok(after) => after,
                Err(err) => {
                    on_event(&ExplorationEvent::Error { error: &err });
                    return (attempt, retries, AttemptOutcome::Unverified(err.to_string()));
                }
            };

            let verification = verify(
                &attempt,
                ScreenObservation {
                    fingerprint: &screen.fingerprint,
                    elements: &screen.elements,
                },
                ScreenObservation {
                    fingerprint: &after.fingerprint,
                    elements: &after.elements,
                },
            );
            let elapsed = started.elapsed();
            let exhausted = retries >= self.config.max_verification_retries;
            let alternative = if verification.passed || exhausted {
                None
            } else {
                alternatives.pop_front()
            };
            let Some(alternative) = alternative else {
                if !verification.passed && !exhausted {
                    debug!(reason = %verification.reason, "verification failed; no alternatives left");
                }
                let outcome = AttemptOutcome::Verified {
                    from: screen,
                    after,
                    verification,
                    elapsed,
                };
                return (attempt, retries, outcome);
            };

            info!(reason = %verification.reason, ?alternative, "verification failed; trying alternative");
            let next = resolve_alternative(&alternative, &attempt);
            if let Some(target) = next.target.as_deref() {
                self.protocol.record_attempt(target);
            }
            if after.fingerprint != screen.fingerprint {
                self.record_transition(&screen, after.clone(), &attempt, elapsed, on_event);
            }
            retries += 1;
            attempt = next;
            screen = after;
        }
    }

    fn capture_screen(&self) -> Result<Capture, ExplorationError> {
        let capture = self
            .capture
            .capture()
            .map_err(|err| ExplorationError::InvalidHierarchy(format!("{err:#}")))?;
        capture.validate()?;
        Ok(capture)
    }

    /// Make sure the captured screen is in the graph and current.
    ///
    /// Returns whether the screen had been visited before.
    fn register_screen<F: FnMut(&ExplorationEvent<'_>)>(
        &mut self,
        capture: &Capture,
        on_event: &mut F,
    ) -> bool {
        let fingerprint = capture.fingerprint.as_str();
        if self.graph.contains(fingerprint) {
            if self.graph.current_node() != Some(fingerprint) {
                self.graph.add_node(ScreenNode::new(
                    fingerprint,
                    capture.screen_type,
                    Vec::new(),
                    0,
                    None,
                ));
                self.graph.set_current_node(fingerprint);
            }
            return self.graph.node(fingerprint).is_some_and(|node| node.visit_count > 1);
        }

        let parent = self.graph.current_node().and_then(|fp| self.graph.node(fp));
        let depth = parent.map_or(0, |node| node.depth + 1);
        let parent_fingerprint = parent.map(|node| node.fingerprint.clone());
        self.graph.add_node(ScreenNode::new(
            fingerprint,
            capture.screen_type,
            capture.elements.clone(),
            depth,
            parent_fingerprint,
        ));
        self.graph.set_current_node(fingerprint);
        if let Some(node) = self.graph.node(fingerprint) {
            info!(fingerprint, depth, "discovered screen");
            on_event(&ExplorationEvent::ScreenDiscovered { node });
        }
        false
    }

    fn record_transition<F: FnMut(&ExplorationEvent<'_>)>(
        &mut self,
        before: &Capture,
        after: Capture,
        decision: &Decision,
        elapsed: Duration,
        on_event: &mut F,
    ) {
        let depth = self
            .graph
            .node(&before.fingerprint)
            .map_or(0, |node| node.depth + 1);
        let discovered = self.graph.add_node(ScreenNode::new(
            after.fingerprint.clone(),
            after.screen_type,
            after.elements,
            depth,
            Some(before.fingerprint.clone()),
        ));
        self.graph.add_transition(
            &before.fingerprint,
            &after.fingerprint,
            TransitionAction::from(decision),
            elapsed,
        );
        if discovered && let Some(node) = self.graph.node(&after.fingerprint) {
            info!(fingerprint = %after.fingerprint, depth, "discovered screen");
            on_event(&ExplorationEvent::ScreenDiscovered { node });
        }
    }

    fn persist_ledger<F: FnMut(&ExplorationEvent<'_>)>(&self, on_event: &mut F) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(err) = store.save(&self.path) {
            let err = ExplorationError::PersistenceFailure(err);
            warn!(error = %err, "continuing in memory");
            on_event(&ExplorationEvent::Error { error: &err });
        }
    }

    /// Attach session metadata and persist ledger and graph.
    fn finish<F: FnMut(&ExplorationEvent<'_>)>(&mut self, stop_reason: &str, on_event: &mut F) {
        self.path.attach_metadata(PathMetadata {
            finished_at: Some(Utc::now()),
            stop_reason: Some(stop_reason.to_string()),
            screens_discovered: self.graph.nodes().count(),
            transitions_recorded: self.graph.edges().len(),
        });
        let Some(store) = &self.store else {
            return;
        };
        self.persist_ledger(on_event);
        let graph_path = store.graph_path_for(&self.path.session_id);
        if let Err(err) = write_graph(&graph_path, &self.graph) {
            let err = ExplorationError::PersistenceFailure(err);
            warn!(error = %err, "graph snapshot not saved");
            on_event(&ExplorationEvent::Error { error: &err });
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::types::ScreenType;
    use crate::io::action::ExecutionError;
    use crate::test_support::{ScriptedCapture, ScriptedExecutor, ScriptedOracle, button};

    fn config() -> ExplorerConfig {
        ExplorerConfig {
            settle_delay_ms: 0,
            oracle_base_delay_ms: 0,
            ..ExplorerConfig::default()
        }
    }

    fn menu_screen(fp: &str) -> Capture {
        Capture::new(
            fp,
            vec![button("a", "A"), button("b", "B"), button("c", "C"), button("d", "D")],
        )
    }

    /// Verifies a failed execution records a failed step without verification.
    #[test]
    fn execution_failure_records_failed_step() {
        let capture = ScriptedCapture::new(vec![menu_screen("A")]);
        let oracle = ScriptedOracle::new(vec![Ok(
            json!({"choice": 1, "reasoning": "try a", "confidence": 50}),
        )]);
        let executor = ScriptedExecutor::new(vec![Err(ExecutionError::ElementNotFound(
            "a".to_string(),
        ))]);
        let cfg = ExplorerConfig {
            max_steps: 1,
            ..config()
        };
        let mut explorer = Explorer::new("goal", &capture, &oracle, &executor, cfg);

        let mut errors = 0;
        let outcome = explorer
            .run(|event| {
                if matches!(event, ExplorationEvent::Error { .. }) {
                    errors += 1;
                }
            })
            .expect("run");

        assert_eq!(outcome.stop, StopReason::StepBudgetExhausted);
        assert_eq!(outcome.steps_executed, 1);
        assert_eq!(errors, 1);
        let step = &explorer.path().steps[0];
        assert!(!step.was_successful);
        assert!(step.verification.is_none());
        assert!(step.error_message.as_deref().is_some_and(|m| m.contains("not found")));
        assert!(explorer.graph().edges().is_empty());
    }

    /// Verifies an executor that declines the action is surfaced like one that errors.
    #[test]
    fn declined_execution_emits_action_failure() {
        let capture = ScriptedCapture::new(vec![menu_screen("A")]);
        let oracle = ScriptedOracle::new(vec![Ok(
            json!({"choice": 2, "reasoning": "try b", "confidence": 50}),
        )]);
        let executor = ScriptedExecutor::new(vec![Ok(false)]);
        let cfg = ExplorerConfig {
            max_steps: 1,
            ..config()
        };
        let mut explorer = Explorer::new("goal", &capture, &oracle, &executor, cfg);

        let mut failures = Vec::new();
        explorer
            .run(|event| {
                if let ExplorationEvent::Error {
                    error: ExplorationError::ActionExecutionFailure(message),
                } = event
                {
                    failures.push(message.clone());
                }
            })
            .expect("run");

        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("executor reported failure"));
        let step = &explorer.path().steps[0];
        assert!(!step.was_successful);
        assert_eq!(step.target_element.as_deref(), Some("b"));
        assert!(
            step.error_message
                .as_deref()
                .is_some_and(|m| m.contains("executor reported failure"))
        );
        assert!(explorer.graph().edges().is_empty());
    }

    /// Verifies a capture failure skips the step and the loop carries on.
    #[test]
    fn capture_failure_skips_iteration() {
        let capture = ScriptedCapture::from_results(vec![
            Err("accessibility service unavailable".to_string()),
            Ok(Capture::new("empty", Vec::new())),
        ]);
        let oracle = ScriptedOracle::new(Vec::new());
        let executor = ScriptedExecutor::succeeding();
        let mut explorer = Explorer::new("goal", &capture, &oracle, &executor, config());

        let mut hierarchy_errors = 0;
        let outcome = explorer
            .run(|event| {
                if let ExplorationEvent::Error {
                    error: ExplorationError::InvalidHierarchy(_),
                } = event
                {
                    hierarchy_errors += 1;
                }
            })
            .expect("run");

        assert_eq!(outcome.stop, StopReason::Done);
        assert_eq!(hierarchy_errors, 1);
        assert_eq!(capture.calls(), 2);
        assert!(explorer.path().steps.is_empty());
    }

    #[test]
    fn cancelled_token_stops_before_first_step() {
        let capture = ScriptedCapture::new(vec![menu_screen("A")]);
        let oracle = ScriptedOracle::new(Vec::new());
        let executor = ScriptedExecutor::succeeding();
        let mut explorer = Explorer::new("goal", &capture, &oracle, &executor, config());
        explorer.cancellation_token().cancel();

        let outcome = explorer.run(|_| {}).expect("run");
        assert_eq!(outcome.stop, StopReason::Cancelled);
        assert_eq!(capture.calls(), 0);
        assert_eq!(
            explorer.path().metadata.as_ref().and_then(|m| m.stop_reason.as_deref()),
            Some("cancelled")
        );
    }

    /// Verifies an unavailable oracle aborts the run with a terminal error.
    #[test]
    fn unavailable_oracle_aborts_run() {
        let capture = ScriptedCapture::new(vec![menu_screen("A")]);
        let oracle = ScriptedOracle::new(Vec::new());
        let executor = ScriptedExecutor::succeeding();
        let mut explorer = Explorer::new("goal", &capture, &oracle, &executor, config());

        let err = explorer.run(|_| {}).expect_err("terminal");
        assert!(matches!(err, ExplorationError::OracleUnavailable(_)));
        assert!(executor.executed().is_empty());
        assert_eq!(
            explorer.path().metadata.as_ref().and_then(|m| m.stop_reason.as_deref()),
            Some("aborted")
        );
    }

    #[test]
    fn revisits_bump_visit_count_once_per_arrival() {
        let capture = ScriptedCapture::new(vec![
            menu_screen("A"),
            Capture::new("B", vec![button("back", "Back")]).with_screen_type(ScreenType::Detail),
            Capture::new("B", vec![button("back", "Back")]).with_screen_type(ScreenType::Detail),
            menu_screen("A"),
            menu_screen("A"),
        ]);
        let oracle = ScriptedOracle::new(vec![
            Ok(json!({"choice": 1, "reasoning": "open a", "confidence": 80})),
            Ok(json!({"choice": 1, "reasoning": "go back", "confidence": 80})),
        ]);
        let executor = ScriptedExecutor::succeeding();
        let cfg = ExplorerConfig {
            max_steps: 2,
            ..config()
        };
        let mut explorer = Explorer::new("goal", &capture, &oracle, &executor, cfg);

        let mut discovered = Vec::new();
        explorer
            .run(|event| {
                if let ExplorationEvent::ScreenDiscovered { node } = event {
                    discovered.push(node.fingerprint.clone());
                }
            })
            .expect("run");

        let graph = explorer.graph();
        assert_eq!(discovered, vec!["A", "B"]);
        assert_eq!(graph.node("A").map(|n| n.visit_count), Some(2));
        assert_eq!(graph.node("B").map(|n| n.visit_count), Some(1));
        assert_eq!(graph.node("B").map(|n| n.depth), Some(1));
        assert_eq!(graph.edges().len(), 2);
        assert!(graph.would_create_cycle("A", "B"));
        assert_eq!(graph.current_node(), Some("A"));
        // The element snapshot is the one taken on first discovery.
        assert_eq!(graph.node("A").map(|n| n.elements.len()), Some(4));
        assert!(explorer.path().steps.iter().all(|s| s.was_successful));
    }
}
