//! Test-only helpers: element builders and scripted collaborators.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use anyhow::{Result, anyhow};
use serde_json::Value;

use crate::core::types::{Decision, Element, ElementIntent, ElementKind};
use crate::io::action::{ActionExecutor, ExecutionError};
use crate::io::capture::{Capture, ScreenCapture};
use crate::io::ledger_store::LedgerStore;
use crate::io::oracle::{Oracle, OracleError, OracleRequest};

/// Create an element with no label, value or priority.
pub fn element(kind: ElementKind, id: Option<&str>, interactive: bool) -> Element {
    Element {
        id: id.map(str::to_string),
        label: None,
        kind,
        interactive,
        value: None,
        intent: None,
        priority: None,
        frame: None,
        children: Vec::new(),
    }
}

/// Interactive button with an identifier and label.
pub fn button(id: &str, label: &str) -> Element {
    Element {
        label: Some(label.to_string()),
        ..element(ElementKind::Button, Some(id), true)
    }
}

/// Button classified as the form's submit action.
pub fn submit_button(id: &str, label: &str) -> Element {
    Element {
        intent: Some(ElementIntent::Submit),
        ..button(id, label)
    }
}

/// Interactive text field, optionally pre-filled.
pub fn text_field(id: &str, value: Option<&str>) -> Element {
    Element {
        value: value.map(str::to_string),
        intent: Some(ElementIntent::Input),
        ..element(ElementKind::TextField, Some(id), true)
    }
}

/// Non-interactive static text identified only by its label.
pub fn label(text: &str) -> Element {
    Element {
        label: Some(text.to_string()),
        ..element(ElementKind::StaticText, None, false)
    }
}

/// Ledger store rooted in a fresh temporary directory.
///
/// Keep the returned guard alive for as long as the store is used.
pub fn temp_store() -> (tempfile::TempDir, LedgerStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = LedgerStore::new(dir.path().join("sessions"));
    (dir, store)
}

/// Capture collaborator that replays a script, repeating the last entry.
pub struct ScriptedCapture {
    script: RefCell<VecDeque<Result<Capture, String>>>,
    last: RefCell<Option<Capture>>,
    calls: Cell<usize>,
}

impl ScriptedCapture {
    pub fn new(captures: Vec<Capture>) -> Self {
        Self::from_results(captures.into_iter().map(Ok).collect())
    }

    /// Script that may include failures (`Err(message)`).
    pub fn from_results(script: Vec<Result<Capture, String>>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            last: RefCell::new(None),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl ScreenCapture for ScriptedCapture {
    fn capture(&self) -> Result<Capture> {
        self.calls.set(self.calls.get() + 1);
        match self.script.borrow_mut().pop_front() {
            Some(Ok(capture)) => {
                *self.last.borrow_mut() = Some(capture.clone());
                Ok(capture)
            }
            Some(Err(message)) => Err(anyhow!(message)),
            None => self
                .last
                .borrow()
                .clone()
                .ok_or_else(|| anyhow!("capture script is empty")),
        }
    }
}

/// Oracle that replays scripted raw responses and records every request.
///
/// Once the script runs out it reports itself unavailable.
pub struct ScriptedOracle {
    script: RefCell<VecDeque<Result<Value, OracleError>>>,
    requests: RefCell<Vec<OracleRequest>>,
}

impl ScriptedOracle {
    pub fn new(script: Vec<Result<Value, OracleError>>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn requests(&self) -> Vec<OracleRequest> {
        self.requests.borrow().clone()
    }
}

impl Oracle for ScriptedOracle {
    fn complete(&self, request: &OracleRequest) -> Result<Value, OracleError> {
        self.requests.borrow_mut().push(request.clone());
        self.script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(OracleError::Unavailable("oracle script exhausted".to_string())))
    }
}

/// Executor that records decisions and replays scripted outcomes.
///
/// Unscripted calls succeed.
pub struct ScriptedExecutor {
    script: RefCell<VecDeque<Result<bool, ExecutionError>>>,
    executed: RefCell<Vec<Decision>>,
}

impl ScriptedExecutor {
    pub fn new(script: Vec<Result<bool, ExecutionError>>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            executed: RefCell::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(Vec::new())
    }

    pub fn executed(&self) -> Vec<Decision> {
        self.executed.borrow().clone()
    }
}

impl ActionExecutor for ScriptedExecutor {
    fn execute(&self, decision: &Decision) -> Result<bool, ExecutionError> {
        self.executed.borrow_mut().push(decision.clone());
        self.script.borrow_mut().pop_front().unwrap_or(Ok(true))
    }
}
