//! Decision protocol: turn the current screen into one [`Decision`].
//!
//! Guards that need no oracle run first (stuck-loop guard, empty screen,
//! terminal-only menu). Otherwise the oracle is consulted with bounded,
//! exponentially backed-off retries. Only oracle unavailability and retry
//! exhaustion surface as errors; refusals and capacity overflows degrade to
//! `done`.

use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::core::backoff::backoff_delay;
use crate::core::choices::{ActionChoice, ChoiceInputs, ChoiceLimits, ChoiceMenu, build_choices};
use crate::core::fill::synthesize_text;
use crate::core::payload::{sanitize_prompt, shrink_elements};
use crate::core::types::{ActionKind, AlternativeAction, Decision, Element};
use crate::error::ExplorationError;
use crate::io::capture::Capture;
use crate::io::config::ExplorerConfig;
use crate::io::oracle::{ChoiceResponse, Oracle, OracleError, OracleRequest};
use crate::io::prompt::{PromptBuilder, PromptInputs};
use crate::ledger::ExplorationPath;

/// Recently visited targets listed in the prompt.
const RECENT_TARGETS_IN_PROMPT: usize = 10;

/// Tunables for the protocol, usually derived from [`ExplorerConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionSettings {
    pub max_oracle_retries: u32,
    pub oracle_base_delay: Duration,
    pub stuck_threshold: usize,
    pub limits: ChoiceLimits,
    pub recent_steps_in_prompt: usize,
    pub prompt_budget_bytes: usize,
    pub free_form_char_budget: usize,
}

impl From<&ExplorerConfig> for DecisionSettings {
    fn from(cfg: &ExplorerConfig) -> Self {
        Self {
            max_oracle_retries: cfg.max_oracle_retries,
            oracle_base_delay: cfg.oracle_base_delay(),
            stuck_threshold: cfg.stuck_threshold,
            limits: ChoiceLimits {
                max_choices: cfg.max_choices,
                screen_fit_threshold: cfg.screen_fit_threshold,
            },
            recent_steps_in_prompt: cfg.recent_steps_in_prompt,
            prompt_budget_bytes: cfg.prompt_budget_bytes,
            free_form_char_budget: cfg.free_form_char_budget,
        }
    }
}

impl Default for DecisionSettings {
    fn default() -> Self {
        Self::from(&ExplorerConfig::default())
    }
}

/// What the protocol needs to know about the current step.
#[derive(Debug, Clone, Copy)]
pub struct DecisionContext<'a> {
    pub goal: &'a str,
    pub screen: &'a Capture,
    /// The screen was visited before this step.
    pub is_revisit: bool,
    pub path: &'a ExplorationPath,
}

/// Result of consulting the oracle, before conversion into a `done` fallback.
enum Consulted {
    Decided(Decision),
    Degraded(String),
}

/// Which oracle failures earn a one-time retry with a sanitized prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SanitizeOn {
    ContentPolicy,
    AnyFailure,
}

impl SanitizeOn {
    fn applies(self, err: &OracleError) -> bool {
        match self {
            SanitizeOn::ContentPolicy => matches!(err, OracleError::ContentPolicy(_)),
            SanitizeOn::AnyFailure => true,
        }
    }
}

/// Per-session decision state.
#[derive(Debug)]
pub struct DecisionProtocol {
    settings: DecisionSettings,
    prompts: PromptBuilder,
    current_fingerprint: Option<String>,
    actions_on_current_screen: HashSet<String>,
    degradation: Option<ExplorationError>,
}

impl DecisionProtocol {
    pub fn new(settings: DecisionSettings) -> Self {
        let prompts = PromptBuilder::new(settings.prompt_budget_bytes);
        Self {
            settings,
            prompts,
            current_fingerprint: None,
            actions_on_current_screen: HashSet::new(),
            degradation: None,
        }
    }

    pub fn settings(&self) -> &DecisionSettings {
        &self.settings
    }

    /// Track the screen being decided on; a new fingerprint clears attempts.
    pub fn enter_screen(&mut self, fingerprint: &str) {
        if self.current_fingerprint.as_deref() != Some(fingerprint) {
            self.current_fingerprint = Some(fingerprint.to_string());
            self.actions_on_current_screen.clear();
        }
    }

    /// Remember that `target` was tried on the current screen.
    pub fn record_attempt(&mut self, target: &str) {
        self.actions_on_current_screen.insert(target.to_string());
    }

    pub fn attempted_on_screen(&self) -> &HashSet<String> {
        &self.actions_on_current_screen
    }

    /// Error behind the most recent degraded `done`, if any.
    pub fn take_degradation(&mut self) -> Option<ExplorationError> {
        self.degradation.take()
    }

    /// Choose the next action from a numbered menu.
    #[instrument(skip_all, fields(fingerprint = %ctx.screen.fingerprint, revisit = ctx.is_revisit))]
    pub fn decide<O: Oracle + ?Sized>(
        &mut self,
        oracle: &O,
        ctx: &DecisionContext<'_>,
    ) -> Result<Decision, ExplorationError> {
        if let Some(done) = self.pre_oracle_guard(ctx) {
            return Ok(done);
        }

        let visited = ctx.path.visited_targets();
        let menu = build_choices(
            &ChoiceInputs {
                elements: &ctx.screen.elements,
                visited_targets: &visited,
                screen_type: ctx.screen.screen_type,
                attempted_on_screen: &self.actions_on_current_screen,
            },
            self.settings.limits,
        );
        if menu.is_terminal_only() {
            info!("no actionable choices left; finishing");
            return Ok(Decision::done("no actionable elements remain on this screen"));
        }
        debug!(choices = menu.len(), "built choice menu");

        let recent_targets = ctx.path.recent_targets(RECENT_TARGETS_IN_PROMPT);
        let recent_steps = ctx.path.recent_steps_summary(self.settings.recent_steps_in_prompt);
        let screen = ctx.screen.describe();
        let prompt = self
            .prompts
            .build_choice(
                &PromptInputs {
                    goal: ctx.goal,
                    screen: &screen,
                    visited_targets: &recent_targets,
                    recent_steps: recent_steps.as_deref(),
                },
                &menu,
            )
            .map_err(|err| ExplorationError::InvalidDecision(format!("{err:#}")))?;

        let consulted = self.consult(
            OracleRequest::choice(prompt),
            SanitizeOn::ContentPolicy,
            |prompt| Ok(sanitize_prompt(prompt)),
            |request| oracle.choose(request),
            |response| decision_from_choice(&menu, response),
        )?;
        let decision = match consulted {
            Consulted::Decided(decision) => decision,
            Consulted::Degraded(reason) => menu_done(&menu, reason),
        };
        self.note_decision(&decision);
        Ok(decision)
    }

    /// Ask the oracle for an action directly, embedding the element payload.
    #[instrument(skip_all, fields(fingerprint = %ctx.screen.fingerprint, revisit = ctx.is_revisit))]
    pub fn decide_free_form<O: Oracle + ?Sized>(
        &mut self,
        oracle: &O,
        ctx: &DecisionContext<'_>,
    ) -> Result<Decision, ExplorationError> {
        if let Some(done) = self.pre_oracle_guard(ctx) {
            return Ok(done);
        }

        let payload = shrink_elements(&ctx.screen.elements, self.settings.free_form_char_budget);
        if payload.truncated() {
            debug!(kept = payload.kept, total = payload.total, "shrunk element payload");
        }
        let recent_targets = ctx.path.recent_targets(RECENT_TARGETS_IN_PROMPT);
        let recent_steps = ctx.path.recent_steps_summary(self.settings.recent_steps_in_prompt);
        let screen = ctx.screen.describe();
        let inputs = PromptInputs {
            goal: ctx.goal,
            screen: &screen,
            visited_targets: &recent_targets,
            recent_steps: recent_steps.as_deref(),
        };
        let prompt = self
            .prompts
            .build_free_form(&inputs, &payload)
            .map_err(|err| ExplorationError::InvalidDecision(format!("{err:#}")))?;

        let elements = &ctx.screen.elements;
        let prompts = self.prompts.clone();
        let consulted = self.consult(
            OracleRequest::free_form(prompt),
            SanitizeOn::AnyFailure,
            |_| prompts.build_free_form_sanitized(&inputs, &payload),
            |request| oracle.decide(request),
            |response| validate_free_form(response.into_decision(), elements),
        )?;
        let decision = match consulted {
            Consulted::Decided(decision) => decision,
            Consulted::Degraded(reason) => Decision::done(reason),
        };
        self.note_decision(&decision);
        Ok(decision)
    }

    /// Decisions that need no oracle: stuck-loop guard and empty screens.
    fn pre_oracle_guard(&mut self, ctx: &DecisionContext<'_>) -> Option<Decision> {
        self.enter_screen(&ctx.screen.fingerprint);

        let attempted = self.actions_on_current_screen.len();
        if ctx.is_revisit && attempted >= self.settings.stuck_threshold {
            warn!(attempted, "stuck on revisited screen; finishing");
            self.actions_on_current_screen.clear();
            return Some(Decision::done(format!(
                "stuck: {attempted} actions already attempted on this revisited screen"
            )));
        }
        if ctx.screen.elements.is_empty() {
            info!("screen has no elements; finishing");
            return Some(Decision::done("screen has no elements"));
        }
        None
    }

    fn note_decision(&mut self, decision: &Decision) {
        if let Some(target) = decision.target.as_deref() {
            self.record_attempt(target);
        }
        info!(decision = %decision.summary(), confidence = decision.confidence(), "decided");
    }

    /// Call the oracle until `accept` yields a decision or the retry bound is hit.
    ///
    /// The first failure matching `sanitize_on` is retried once, uncounted,
    /// with the prompt produced by `sanitize` from the current one.
    fn consult<T>(
        &mut self,
        mut request: OracleRequest,
        sanitize_on: SanitizeOn,
        mut sanitize: impl FnMut(&str) -> anyhow::Result<String>,
        mut call: impl FnMut(&OracleRequest) -> Result<T, OracleError>,
        mut accept: impl FnMut(T) -> Result<Decision, String>,
    ) -> Result<Consulted, ExplorationError> {
        let max_attempts = self.settings.max_oracle_retries.saturating_add(1);
        let mut sanitized = false;
        let mut attempt = 0;
        let mut last_error: Option<ExplorationError> = None;

        while attempt < max_attempts {
            match call(&request) {
                Ok(response) => match accept(response) {
                    Ok(decision) => return Ok(Consulted::Decided(decision)),
                    Err(reason) => {
                        warn!(attempt, %reason, "oracle returned an invalid decision");
                        last_error = Some(ExplorationError::InvalidDecision(reason));
                    }
                },
                Err(OracleError::CapacityExceeded(message)) => {
                    warn!(%message, "oracle capacity exceeded; finishing");
                    return Ok(Consulted::Degraded(format!(
                        "oracle capacity exceeded: {message}"
                    )));
                }
                Err(err) if !sanitized && sanitize_on.applies(&err) => {
                    warn!(error = %err, "retrying once with a sanitized prompt");
                    sanitized = true;
                    request.prompt = sanitize(&request.prompt).map_err(|render| {
                        ExplorationError::InvalidDecision(format!("{render:#}"))
                    })?;
                    continue;
                }
                Err(OracleError::ContentPolicy(message)) => {
                    warn!(%message, "oracle refused the prompt; finishing");
                    self.degradation = Some(ExplorationError::ContentPolicyBlocked(message.clone()));
                    return Ok(Consulted::Degraded(format!("oracle refused the prompt: {message}")));
                }
                Err(OracleError::Malformed(message)) => {
                    warn!(attempt, %message, "malformed oracle response");
                    last_error = Some(ExplorationError::InvalidDecision(message));
                }
                Err(OracleError::Unavailable(message)) => {
                    warn!(attempt, %message, "oracle unavailable");
                    last_error = Some(ExplorationError::OracleUnavailable(message));
                }
            }

            attempt += 1;
            if attempt < max_attempts {
                let delay = backoff_delay(self.settings.oracle_base_delay, attempt - 1);
                if !delay.is_zero() {
                    debug!(delay_ms = delay.as_millis() as u64, "backing off before retry");
                    thread::sleep(delay);
                }
            }
        }

        Err(match last_error {
            Some(ExplorationError::OracleUnavailable(message)) => {
                ExplorationError::OracleUnavailable(format!("{message} (after {max_attempts} attempts)"))
            }
            Some(other) => ExplorationError::BudgetExhausted {
                attempts: max_attempts,
                last_error: other.to_string(),
            },
            None => ExplorationError::BudgetExhausted {
                attempts: max_attempts,
                last_error: "no usable oracle response".to_string(),
            },
        })
    }
}

/// The menu's own `done` entry, carrying `reason`.
fn menu_done(menu: &ChoiceMenu, reason: String) -> Decision {
    match menu.done_choice() {
        Some(choice) => Decision {
            reasoning: format!("{} ({reason})", choice.description),
            ..Decision::done(reason)
        },
        None => Decision::done(reason),
    }
}

fn decision_from_choice(menu: &ChoiceMenu, response: ChoiceResponse) -> Result<Decision, String> {
    let chosen = usize::try_from(response.choice)
        .ok()
        .and_then(|number| menu.get(number))
        .ok_or_else(|| {
            format!(
                "choice {} out of range 1..={}",
                response.choice,
                menu.len()
            )
        })?;

    let alternative_actions = response
        .alternatives
        .iter()
        .filter(|&&number| number != response.choice)
        .filter_map(|&number| usize::try_from(number).ok().and_then(|n| menu.get(n)))
        .map(alternative_from_choice)
        .collect();

    Ok(Decision {
        action: chosen.action,
        target: chosen.target.clone(),
        success_probability: response.success_probability(),
        reasoning: response.reasoning,
        text_to_type: chosen.text_to_type.clone(),
        expected_outcome: response.expected_outcome,
        alternative_actions,
    })
}

fn alternative_from_choice(choice: &ActionChoice) -> AlternativeAction {
    let target = choice.target.clone();
    match choice.action {
        ActionKind::Tap => AlternativeAction::Tap { target },
        ActionKind::Type => AlternativeAction::Type { target },
        ActionKind::Swipe => AlternativeAction::Swipe,
        ActionKind::Done => AlternativeAction::Done,
    }
}

/// Reject free-form decisions that target nothing on screen.
fn validate_free_form(mut decision: Decision, elements: &[Element]) -> Result<Decision, String> {
    match decision.action {
        ActionKind::Tap | ActionKind::Type => {
            let Some(target) = decision.target.as_deref() else {
                return Err(format!("{} decision has no target element", decision.action));
            };
            if !contains_target(elements, target) {
                return Err(format!("target '{target}' is not on the current screen"));
            }
            if decision.action == ActionKind::Type && decision.text_to_type.is_none() {
                decision.text_to_type = Some(synthesize_text(Some(target)));
            }
        }
        ActionKind::Swipe | ActionKind::Done => {}
    }
    Ok(decision)
}

fn contains_target(elements: &[Element], target: &str) -> bool {
    elements
        .iter()
        .any(|element| element.matches_target(target) || contains_target(&element.children, target))
}

/// Turn the next alternative into a concrete decision, synthesizing typed text.
pub fn resolve_alternative(alternative: &AlternativeAction, primary: &Decision) -> Decision {
    let target = alternative.target().map(str::to_string);
    let text_to_type = match alternative.kind() {
        ActionKind::Type => Some(synthesize_text(target.as_deref())),
        _ => None,
    };
    Decision {
        action: alternative.kind(),
        reasoning: format!("alternative after failed verification of: {}", primary.summary()),
        success_probability: primary.success_probability.clone(),
        target,
        text_to_type,
        expected_outcome: None,
        alternative_actions: Vec::new(),
    }
}
