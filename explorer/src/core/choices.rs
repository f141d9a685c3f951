//! Ranked, numbered action menu offered to the oracle for one step.
//!
//! Numbering is the only channel the oracle uses to pick an action, so the
//! menu is built deterministically from its inputs and the terminal `done`
//! entry is always last.

use std::collections::HashSet;
use std::fmt::Write as _;

use serde::Serialize;

use crate::core::fill::synthesize_text;
use crate::core::types::{ActionKind, Element, ElementIntent, ScreenType};

/// Upper bound on element-derived (tap/type) choices.
pub const DEFAULT_MAX_CHOICES: usize = 12;
/// Element count above which the screen is assumed to overflow its viewport.
pub const DEFAULT_SCREEN_FIT_THRESHOLD: usize = 15;

const EMPTY_INPUT_PCT: i32 = 125;
const FILLED_INPUT_PCT: i32 = 25;
const FORM_COMPLETE_SUBMIT_PCT: i32 = 130;
const FORM_INCOMPLETE_SUBMIT_PCT: i32 = 25;
const VISITED_PCT: i32 = 50;

const SWIPE_PRIORITY_BOOSTED: i32 = 70;
const SWIPE_PRIORITY_LOWERED: i32 = 5;
/// Fewer unvisited choices than this makes scrolling worthwhile.
const FEW_UNVISITED_CHOICES: usize = 3;

/// One candidate action in the menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionChoice {
    /// 1-based position in the menu.
    pub number: usize,
    pub action: ActionKind,
    pub target: Option<String>,
    pub text_to_type: Option<String>,
    pub description: String,
    pub priority: i32,
    pub intent: Option<ElementIntent>,
}

/// Everything the builder needs from the current screen and history.
#[derive(Debug, Clone, Copy)]
pub struct ChoiceInputs<'a> {
    pub elements: &'a [Element],
    pub visited_targets: &'a HashSet<String>,
    pub screen_type: Option<ScreenType>,
    /// Targets already attempted since this screen was last entered.
    pub attempted_on_screen: &'a HashSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChoiceLimits {
    pub max_choices: usize,
    pub screen_fit_threshold: usize,
}

impl Default for ChoiceLimits {
    fn default() -> Self {
        Self {
            max_choices: DEFAULT_MAX_CHOICES,
            screen_fit_threshold: DEFAULT_SCREEN_FIT_THRESHOLD,
        }
    }
}

/// Numbered menu; entries are stable for the lifetime of one oracle request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChoiceMenu {
    choices: Vec<ActionChoice>,
}

impl ChoiceMenu {
    pub fn choices(&self) -> &[ActionChoice] {
        &self.choices
    }

    pub fn len(&self) -> usize {
        self.choices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    /// Look up a choice by its 1-based number.
    pub fn get(&self, number: usize) -> Option<&ActionChoice> {
        number
            .checked_sub(1)
            .and_then(|index| self.choices.get(index))
    }

    /// Number of the terminal `done` entry (always the last one).
    pub fn done_number(&self) -> usize {
        self.choices.len()
    }

    pub fn done_choice(&self) -> Option<&ActionChoice> {
        self.choices.last().filter(|c| c.action == ActionKind::Done)
    }

    /// True when nothing but `done` is on offer.
    pub fn is_terminal_only(&self) -> bool {
        self.choices.iter().all(|c| c.action == ActionKind::Done)
    }

    /// Plain-text rendering: one `N. description` line per choice.
    pub fn render(&self) -> String {
        let mut buf = String::new();
        for choice in &self.choices {
            let _ = writeln!(buf, "{}. {}", choice.number, choice.description);
        }
        buf
    }
}

/// Build the ranked menu for the current screen.
///
/// Elements are visited in descending priority. Visited non-inputs and
/// anything already attempted on this screen are skipped. Inputs are offered
/// as `type` (empty fields first), the rest as `tap`, with submit buttons
/// held back until the form is filled. A `swipe` is added when the screen
/// likely scrolls, and `done` always closes the menu.
pub fn build_choices(inputs: &ChoiceInputs<'_>, limits: ChoiceLimits) -> ChoiceMenu {
    let mut ordered: Vec<&Element> = inputs.elements.iter().collect();
    ordered.sort_by(|a, b| b.effective_priority().cmp(&a.effective_priority()));

    let form_complete = inputs
        .elements
        .iter()
        .filter(|e| e.interactive && e.is_input())
        .all(Element::has_value);
    let form_like = inputs.screen_type.is_some_and(ScreenType::is_form_like);

    let mut choices: Vec<ActionChoice> = Vec::new();
    let mut offered: HashSet<&str> = HashSet::new();

    for element in ordered {
        if choices.len() >= limits.max_choices {
            break;
        }
        if !element.interactive {
            continue;
        }
        let Some(target) = element.target_key() else {
            continue;
        };
        let visited = inputs.visited_targets.contains(target);
        if (visited && !element.is_input())
            || inputs.attempted_on_screen.contains(target)
            || !offered.insert(target)
        {
            continue;
        }

        let base = element.effective_priority();
        let choice = if element.is_input() {
            let (priority, state) = if element.has_value() {
                (scale(base, FILLED_INPUT_PCT), "already filled")
            } else {
                (scale(base, EMPTY_INPUT_PCT), "empty")
            };
            let text = synthesize_text(Some(target));
            ActionChoice {
                number: 0,
                action: ActionKind::Type,
                target: Some(target.to_string()),
                description: format!(
                    "Type \"{}\" into {} ({})",
                    text,
                    element.display_name(),
                    state
                ),
                text_to_type: Some(text),
                priority,
                intent: element.intent,
            }
        } else {
            let mut priority = base;
            let mut note = String::new();
            if form_like && element.intent == Some(ElementIntent::Submit) {
                if form_complete {
                    priority = scale(priority, FORM_COMPLETE_SUBMIT_PCT);
                    note.push_str(" (form complete)");
                } else {
                    priority = scale(priority, FORM_INCOMPLETE_SUBMIT_PCT);
                    note.push_str(" (fill the form first)");
                }
            }
            ActionChoice {
                number: 0,
                action: ActionKind::Tap,
                target: Some(target.to_string()),
                text_to_type: None,
                description: format!("Tap {}{}", element.display_name(), note),
                priority,
                intent: element.intent,
            }
        };

        let choice = if visited {
            ActionChoice {
                priority: scale(choice.priority, VISITED_PCT),
                description: format!("{} [visited]", choice.description),
                ..choice
            }
        } else {
            choice
        };
        choices.push(choice);
    }

    if should_offer_swipe(inputs, limits) {
        let unvisited = choices
            .iter()
            .filter(|c| {
                c.target
                    .as_deref()
                    .is_some_and(|t| !inputs.visited_targets.contains(t))
            })
            .count();
        let priority = if unvisited < FEW_UNVISITED_CHOICES {
            SWIPE_PRIORITY_BOOSTED
        } else {
            SWIPE_PRIORITY_LOWERED
        };
        choices.push(ActionChoice {
            number: 0,
            action: ActionKind::Swipe,
            target: None,
            text_to_type: None,
            description: "Swipe up to reveal more content".to_string(),
            priority,
            intent: None,
        });
    }

    choices.sort_by(|a, b| b.priority.cmp(&a.priority));

    let lowest = choices.iter().map(|c| c.priority).min().unwrap_or(1);
    choices.push(ActionChoice {
        number: 0,
        action: ActionKind::Done,
        target: None,
        text_to_type: None,
        description: "Done: stop exploring (goal reached or nothing left to try)".to_string(),
        priority: lowest.min(1) - 1,
        intent: None,
    });

    for (index, choice) in choices.iter_mut().enumerate() {
        choice.number = index + 1;
    }
    ChoiceMenu { choices }
}

fn should_offer_swipe(inputs: &ChoiceInputs<'_>, limits: ChoiceLimits) -> bool {
    inputs.screen_type == Some(ScreenType::List)
        || inputs.elements.iter().any(|e| e.kind.is_scrollable())
        || inputs.elements.len() > limits.screen_fit_threshold
}

fn scale(priority: i32, pct: i32) -> i32 {
    priority.saturating_mul(pct) / 100
}
