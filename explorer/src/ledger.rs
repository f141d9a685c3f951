//! Step ledger: the ordered record of one exploration session.
//!
//! The ledger is the product artifact used to generate regression tests and
//! failure reports, so it is append-only apart from a single explicit
//! correction ([`ExplorationPath::mark_last_step_failed`]).

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::{ActionKind, Decision, VerificationResult};
use crate::io::capture::Capture;

/// One executed action and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorationStep {
    /// 1-based position in the session.
    pub id: u32,
    pub timestamp: DateTime<Utc>,
    pub action: ActionKind,
    pub target_element: Option<String>,
    pub text_typed: Option<String>,
    pub screen_description: String,
    pub interactive_element_count: usize,
    pub reasoning: String,
    pub confidence: u8,
    pub was_successful: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
    pub was_retry: bool,
    /// Screen the action was taken on.
    pub screen_fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ExplorationStep {
    /// Step for `decision` taken on `screen`, assumed successful until told otherwise.
    pub fn new(id: u32, decision: &Decision, screen: &Capture) -> Self {
        Self {
            id,
            timestamp: Utc::now(),
            action: decision.action,
            target_element: decision.target.clone(),
            text_typed: decision.text_to_type.clone(),
            screen_description: screen.describe(),
            interactive_element_count: screen.interactive_count(),
            reasoning: decision.reasoning.clone(),
            confidence: decision.confidence(),
            was_successful: true,
            verification: None,
            was_retry: false,
            screen_fingerprint: screen.fingerprint.clone(),
            error_message: None,
        }
    }

    /// Attach a verification outcome; the step succeeds iff it passed.
    pub fn verified(mut self, verification: VerificationResult, was_retry: bool) -> Self {
        self.was_successful = verification.passed;
        self.verification = Some(verification);
        self.was_retry = was_retry;
        self
    }

    /// Record an execution failure; no verification is attached.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.was_successful = false;
        self.error_message = Some(error.into());
        self
    }

    fn outcome_label(&self) -> &'static str {
        if self.was_successful { "ok" } else { "failed" }
    }

    fn one_line(&self) -> String {
        let mut line = format!("{}. {}", self.id, self.action);
        if let Some(target) = &self.target_element {
            let _ = write!(line, " {target}");
        }
        if let Some(text) = &self.text_typed {
            let _ = write!(line, " '{text}'");
        }
        let _ = write!(line, " -> {}", self.outcome_label());
        if let Some(reason) = self
            .error_message
            .as_deref()
            .or_else(|| self.verification.as_ref().filter(|v| !v.passed).map(|v| v.reason.as_str()))
        {
            let _ = write!(line, " ({reason})");
        }
        if self.was_retry {
            line.push_str(" [retry]");
        }
        line
    }
}

/// Session-level facts attached when exploration stops.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    pub screens_discovered: usize,
    pub transitions_recorded: usize,
}

/// The ordered ledger of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorationPath {
    pub session_id: String,
    pub goal: String,
    pub start_time: DateTime<Utc>,
    pub steps: Vec<ExplorationStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PathMetadata>,
}

impl ExplorationPath {
    /// Start a new session with a fresh `YYYYMMDDTHHMMSSZ-xxxxxx` id.
    pub fn new(goal: impl Into<String>) -> Self {
        let start_time = Utc::now();
        let suffix = rand::random::<u32>() & 0x00ff_ffff;
        Self {
            session_id: format!("{}-{suffix:06x}", start_time.format("%Y%m%dT%H%M%SZ")),
            goal: goal.into(),
            start_time,
            steps: Vec::new(),
            metadata: None,
        }
    }

    /// Id the next appended step should carry.
    pub fn next_step_id(&self) -> u32 {
        u32::try_from(self.steps.len()).map_or(u32::MAX, |n| n.saturating_add(1))
    }

    pub fn add_step(&mut self, step: ExplorationStep) {
        self.steps.push(step);
    }

    pub fn last_step(&self) -> Option<&ExplorationStep> {
        self.steps.last()
    }

    /// Flip the last step to failed. Returns false if there is no step or it
    /// is already failed.
    pub fn mark_last_step_failed(&mut self, reason: impl Into<String>) -> bool {
        match self.steps.last_mut() {
            Some(step) if step.was_successful => {
                step.was_successful = false;
                step.error_message.get_or_insert_with(|| reason.into());
                true
            }
            _ => false,
        }
    }

    /// Every element targeted so far in this session.
    pub fn visited_targets(&self) -> HashSet<String> {
        self.steps
            .iter()
            .filter_map(|step| step.target_element.clone())
            .collect()
    }

    /// Up to `limit` distinct targets, most recently used last.
    pub fn recent_targets(&self, limit: usize) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut recent: Vec<String> = self
            .steps
            .iter()
            .rev()
            .filter_map(|step| step.target_element.as_deref())
            .filter(|target| seen.insert(*target))
            .take(limit)
            .map(str::to_string)
            .collect();
        recent.reverse();
        recent
    }

    /// Fraction of steps that succeeded (0.0 for an empty ledger).
    pub fn success_rate(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        let ok = self.steps.iter().filter(|s| s.was_successful).count();
        ok as f64 / self.steps.len() as f64
    }

    /// Compact rendering of the last `limit` steps for prompts.
    pub fn recent_steps_summary(&self, limit: usize) -> Option<String> {
        if limit == 0 || self.steps.is_empty() {
            return None;
        }
        let start = self.steps.len().saturating_sub(limit);
        Some(
            self.steps[start..]
                .iter()
                .map(ExplorationStep::one_line)
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    /// Navigation map rebuilt from the ledger alone, grouped by screen.
    ///
    /// Screens appear in first-seen order; each lists the actions taken on it.
    pub fn compact_map(&self) -> String {
        let mut order: Vec<&str> = Vec::new();
        let mut by_screen: BTreeMap<&str, Vec<&ExplorationStep>> = BTreeMap::new();
        for step in &self.steps {
            let entry = by_screen.entry(step.screen_fingerprint.as_str()).or_default();
            if entry.is_empty() {
                order.push(step.screen_fingerprint.as_str());
            }
            entry.push(step);
        }

        let mut buf = String::new();
        for fingerprint in order {
            let steps = &by_screen[fingerprint];
            let _ = writeln!(buf, "{fingerprint} ({})", steps[0].screen_description);
            for step in steps {
                let _ = writeln!(buf, "  {}", step.one_line());
            }
        }
        buf
    }

    pub fn attach_metadata(&mut self, metadata: PathMetadata) {
        self.metadata = Some(metadata);
    }
}
