//! Loop-level tests for full exploration sessions.
//!
//! These drive `Explorer::run` against scripted capture, oracle and executor
//! collaborators and check the resulting ledger, graph and persisted files.

use explorer::core::types::ActionKind;
use explorer::explore::{ExplorationEvent, Explorer, StopReason};
use explorer::io::capture::Capture;
use explorer::io::config::ExplorerConfig;
use explorer::io::graph_store::load_graph;
use explorer::io::oracle::OracleMode;
use explorer::test_support::{
    ScriptedCapture, ScriptedExecutor, ScriptedOracle, button, label, submit_button, temp_store,
    text_field,
};
use serde_json::json;

fn config() -> ExplorerConfig {
    ExplorerConfig {
        settle_delay_ms: 0,
        oracle_base_delay_ms: 0,
        ..ExplorerConfig::default()
    }
}

fn login_screen() -> Capture {
    Capture::new("F1", vec![button("loginButton", "Log In")])
}

fn dashboard_screen() -> Capture {
    Capture::new("F2", vec![label("Dashboard")])
}

fn menu_screen(fp: &str) -> Capture {
    Capture::new(
        fp,
        vec![
            button("a", "A"),
            button("b", "B"),
            button("c", "C"),
            button("d", "D"),
        ],
    )
}

/// Full session: one verified tap leads to a screen with nothing left to do.
///
/// Sequence:
/// 1. Iter 1: capture F1 → oracle picks "Tap Log In" → F2 shows "Dashboard" → verified.
/// 2. Iter 2: capture F2 → only `done` is offered → loop stops without asking the oracle.
#[test]
fn verified_tap_records_transition_and_finishes() {
    let capture = ScriptedCapture::new(vec![login_screen(), dashboard_screen()]);
    let oracle = ScriptedOracle::new(vec![Ok(json!({
        "choice": 1,
        "reasoning": "log in to reach the main area",
        "confidence": 85,
        "expected_outcome": "the dashboard appears"
    }))]);
    let executor = ScriptedExecutor::succeeding();
    let mut explorer = Explorer::new("reach the dashboard", &capture, &oracle, &executor, config());

    let mut recorded = 0;
    let outcome = explorer
        .run(|event| {
            if matches!(event, ExplorationEvent::StepRecorded { .. }) {
                recorded += 1;
            }
        })
        .expect("run");

    assert_eq!(outcome.stop, StopReason::Done);
    assert_eq!(outcome.steps_executed, 1);
    assert_eq!(recorded, 1);
    assert_eq!(oracle.calls(), 1);

    let graph = explorer.graph();
    assert_eq!(graph.edges().len(), 1);
    let edge = &graph.edges()[0];
    assert_eq!((edge.from.as_str(), edge.to.as_str()), ("F1", "F2"));
    assert_eq!(edge.action.kind, ActionKind::Tap);
    assert_eq!(edge.action.target.as_deref(), Some("loginButton"));
    assert_eq!(graph.node("F2").map(|n| n.visit_count), Some(1));
    assert_eq!(graph.node("F2").map(|n| n.depth), Some(1));
    assert_eq!(graph.start_node(), Some("F1"));

    let step = &explorer.path().steps[0];
    assert_eq!(step.id, 1);
    assert!(step.was_successful);
    assert!(!step.was_retry);
    assert_eq!(step.screen_fingerprint, "F1");
    let verification = step.verification.as_ref().expect("verification");
    assert!(verification.passed);
    assert!(verification.screen_changed);
}

/// Verification failures retry with the oracle's alternatives, bounded by
/// `max_verification_retries`, and land as a single failed ledger step.
#[test]
fn failed_verification_retries_alternatives_up_to_bound() {
    let capture = ScriptedCapture::new(vec![menu_screen("A")]);
    let oracle = ScriptedOracle::new(vec![Ok(json!({
        "choice": 1,
        "reasoning": "try a",
        "confidence": 60,
        "alternatives": [2, 3, 4]
    }))]);
    let executor = ScriptedExecutor::succeeding();
    let cfg = ExplorerConfig {
        max_steps: 1,
        max_verification_retries: 2,
        ..config()
    };
    let mut explorer = Explorer::new("goal", &capture, &oracle, &executor, cfg);

    let outcome = explorer.run(|_| {}).expect("run");

    assert_eq!(outcome.stop, StopReason::StepBudgetExhausted);
    let targets: Vec<_> = executor
        .executed()
        .into_iter()
        .map(|d| d.target.unwrap_or_default())
        .collect();
    assert_eq!(targets, vec!["a", "b", "c"]);

    let steps = &explorer.path().steps;
    assert_eq!(steps.len(), 1);
    assert!(!steps[0].was_successful);
    assert!(steps[0].was_retry);
    assert_eq!(steps[0].target_element.as_deref(), Some("c"));
    assert!(steps[0].verification.as_ref().is_some_and(|v| !v.passed));
}

/// An attempt that moves the app before failing verification keeps its own
/// edge; the alternative is recorded from the screen it actually ran on.
///
/// Sequence:
/// 1. Capture F1 → oracle picks "Tap A" expecting the profile screen, alternative "Tap B".
/// 2. Tap A lands on F2 (no profile screen) → verification fails.
/// 3. Tap B runs on F2 and lands on F3 with the profile screen → verified.
#[test]
fn retried_attempts_record_each_hop() {
    let capture = ScriptedCapture::new(vec![
        Capture::new("F1", vec![button("a", "A"), button("b", "B")]),
        Capture::new("F2", vec![button("settings", "Settings")]),
        Capture::new("F3", vec![button("profileScreen", "Profile")]),
    ]);
    let oracle = ScriptedOracle::new(vec![Ok(json!({
        "choice": 1,
        "reasoning": "a should open the profile",
        "confidence": 55,
        "expected_outcome": "the profileScreen appears",
        "alternatives": [2]
    }))]);
    let executor = ScriptedExecutor::succeeding();
    let cfg = ExplorerConfig {
        max_steps: 1,
        ..config()
    };
    let mut explorer = Explorer::new("open the profile", &capture, &oracle, &executor, cfg);

    let mut discovered = Vec::new();
    explorer
        .run(|event| {
            if let ExplorationEvent::ScreenDiscovered { node } = event {
                discovered.push(node.fingerprint.clone());
            }
        })
        .expect("run");

    assert_eq!(discovered, vec!["F1", "F2", "F3"]);
    let graph = explorer.graph();
    let hops: Vec<_> = graph
        .edges()
        .iter()
        .map(|e| (e.from.as_str(), e.to.as_str(), e.action.target.as_deref()))
        .collect();
    assert_eq!(
        hops,
        vec![("F1", "F2", Some("a")), ("F2", "F3", Some("b"))]
    );
    assert_eq!(graph.node("F2").map(|n| n.depth), Some(1));
    assert_eq!(graph.node("F3").map(|n| n.depth), Some(2));
    assert_eq!(
        graph.node("F3").and_then(|n| n.parent_fingerprint.as_deref()),
        Some("F2")
    );

    let route = graph.shortest_route("F1", "F3").expect("route");
    let targets: Vec<_> = route
        .transitions
        .iter()
        .filter_map(|t| t.action.target.as_deref())
        .collect();
    assert_eq!(targets, vec!["a", "b"]);

    let steps = &explorer.path().steps;
    assert_eq!(steps.len(), 1);
    assert!(steps[0].was_successful);
    assert!(steps[0].was_retry);
    assert_eq!(steps[0].target_element.as_deref(), Some("b"));
}

/// A screen that never changes is abandoned once `stuck_threshold` actions
/// have been tried on it, without another oracle call.
#[test]
fn unchanged_screen_trips_stuck_guard() {
    let capture = ScriptedCapture::new(vec![menu_screen("A")]);
    let oracle = ScriptedOracle::new(
        (0..3)
            .map(|_| Ok(json!({"choice": 1, "reasoning": "keep trying", "confidence": 40})))
            .collect(),
    );
    let executor = ScriptedExecutor::succeeding();
    let cfg = ExplorerConfig {
        stuck_threshold: 3,
        max_verification_retries: 0,
        ..config()
    };
    let mut explorer = Explorer::new("goal", &capture, &oracle, &executor, cfg);

    let outcome = explorer.run(|_| {}).expect("run");

    assert_eq!(outcome.stop, StopReason::Done);
    assert_eq!(oracle.calls(), 3);
    assert_eq!(outcome.steps_executed, 3);
    let targets: Vec<_> = explorer
        .path()
        .steps
        .iter()
        .filter_map(|s| s.target_element.clone())
        .collect();
    assert_eq!(targets, vec!["a", "b", "c"]);
    assert!(explorer.path().steps.iter().all(|s| !s.was_successful));
}

/// Sessions persist their ledger and graph, and resuming appends to the same session.
#[test]
fn persisted_session_resumes_and_appends() {
    let (_guard, store) = temp_store();

    let capture = ScriptedCapture::new(vec![login_screen(), dashboard_screen()]);
    let oracle = ScriptedOracle::new(vec![Ok(json!({
        "choice": 1,
        "reasoning": "log in",
        "confidence": 90,
        "expected_outcome": "the dashboard appears"
    }))]);
    let executor = ScriptedExecutor::succeeding();
    let mut explorer = Explorer::new("explore", &capture, &oracle, &executor, config())
        .with_store(store.clone());
    explorer.run(|_| {}).expect("first run");

    let session_id = explorer.path().session_id.clone();
    let saved = store.load(&session_id).expect("load ledger");
    assert_eq!(&saved, explorer.path());
    assert_eq!(
        saved.metadata.as_ref().and_then(|m| m.stop_reason.as_deref()),
        Some("done")
    );
    let graph_path = store.graph_path_for(&session_id);
    assert!(graph_path.exists());
    assert_eq!(&load_graph(&graph_path).expect("load graph"), explorer.graph());

    let capture = ScriptedCapture::new(vec![
        Capture::new("F3", vec![button("profileTab", "Profile")]),
        Capture::new("F4", vec![label("Profile")]),
    ]);
    let oracle = ScriptedOracle::new(vec![Ok(json!({
        "choice": 1,
        "reasoning": "open the profile",
        "confidence": 70
    }))]);
    let mut resumed = Explorer::resume(
        store.clone(),
        &session_id,
        &capture,
        &oracle,
        &executor,
        config(),
    )
    .expect("resume");
    let outcome = resumed.run(|_| {}).expect("second run");

    assert_eq!(outcome.session_id, session_id);
    assert_eq!(outcome.steps_executed, 1);
    let ids: Vec<u32> = resumed.path().steps.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(resumed.graph().nodes().count(), 4);
    assert_eq!(resumed.graph().edges().len(), 2);

    let reloaded = store.load(&session_id).expect("reload");
    assert_eq!(reloaded.steps.len(), 2);
    assert_eq!(store.list_sessions().expect("list"), vec![session_id]);
}

/// Free-form mode sends the element payload and verifies typed text.
#[test]
fn free_form_session_types_then_finishes() {
    let form = |email: Option<&str>| {
        Capture::new(
            "login-form",
            vec![text_field("email", email), submit_button("submit", "Sign In")],
        )
    };
    let capture = ScriptedCapture::new(vec![form(None), form(Some("user@example.com"))]);
    let oracle = ScriptedOracle::new(vec![
        Ok(json!({
            "action": "type",
            "target_element": "email",
            "reasoning": "fill the email field",
            "text_to_type": "user@example.com",
            "success_probability": {"value": 0.8, "reasoning": "field is empty"}
        })),
        Ok(json!({
            "action": "done",
            "reasoning": "form explored",
            "success_probability": {"value": 1.0, "reasoning": "nothing left"}
        })),
    ]);
    let executor = ScriptedExecutor::succeeding();
    let mut explorer = Explorer::new("sign in", &capture, &oracle, &executor, config())
        .with_mode(OracleMode::FreeForm);

    let outcome = explorer.run(|_| {}).expect("run");

    assert_eq!(outcome.stop, StopReason::Done);
    assert_eq!(outcome.steps_executed, 1);
    let requests = oracle.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.mode == OracleMode::FreeForm));
    assert!(requests[0].prompt.contains("\"email\""));

    let step = &explorer.path().steps[0];
    assert_eq!(step.action, ActionKind::Type);
    assert_eq!(step.text_typed.as_deref(), Some("user@example.com"));
    assert!(step.was_successful);
    assert!(
        step.verification
            .as_ref()
            .is_some_and(|v| !v.screen_changed && v.passed)
    );
}
