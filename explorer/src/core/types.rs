//! Shared deterministic types for explorer core logic.
//!
//! These types define stable contracts between the capture collaborator, the
//! decision protocol, the verifier and the persisted ledger/graph. They carry
//! no I/O and serialize to stable JSON.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Priority assumed for elements the capture collaborator did not rank.
pub const DEFAULT_ELEMENT_PRIORITY: i32 = 50;

/// Kind of action the explorer can perform against the live UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Tap,
    Type,
    Swipe,
    Done,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Tap => "tap",
            ActionKind::Type => "type",
            ActionKind::Swipe => "swipe",
            ActionKind::Done => "done",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "tap" => Some(ActionKind::Tap),
            "type" => Some(ActionKind::Type),
            "swipe" => Some(ActionKind::Swipe),
            "done" => Some(ActionKind::Done),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accessibility role reported by the capture collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Button,
    TextField,
    SecureTextField,
    SearchField,
    TextView,
    Switch,
    Slider,
    Cell,
    Link,
    Tab,
    StaticText,
    Image,
    ScrollView,
    Table,
    CollectionView,
    #[serde(other)]
    Other,
}

impl ElementKind {
    /// Elements that accept typed text.
    pub fn is_input(self) -> bool {
        matches!(
            self,
            ElementKind::TextField
                | ElementKind::SecureTextField
                | ElementKind::SearchField
                | ElementKind::TextView
        )
    }

    pub fn is_scrollable(self) -> bool {
        matches!(
            self,
            ElementKind::ScrollView | ElementKind::Table | ElementKind::CollectionView
        )
    }
}

/// Coarse screen classification supplied by the capture collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenType {
    Login,
    Form,
    List,
    Detail,
    Settings,
    Dashboard,
    Navigation,
    Alert,
    #[serde(other)]
    Other,
}

impl ScreenType {
    pub fn is_form_like(self) -> bool {
        matches!(self, ScreenType::Login | ScreenType::Form)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScreenType::Login => "login",
            ScreenType::Form => "form",
            ScreenType::List => "list",
            ScreenType::Detail => "detail",
            ScreenType::Settings => "settings",
            ScreenType::Dashboard => "dashboard",
            ScreenType::Navigation => "navigation",
            ScreenType::Alert => "alert",
            ScreenType::Other => "other",
        }
    }
}

/// Semantic intent of an element, pre-classified upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementIntent {
    Submit,
    Cancel,
    Navigate,
    Destructive,
    Toggle,
    Input,
    #[serde(other)]
    Unknown,
}

/// On-screen bounding box in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One captured element of the accessibility tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub kind: ElementKind,
    #[serde(default)]
    pub interactive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<ElementIntent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<Frame>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Element>,
}

impl Element {
    /// Stable handle used to target the element: identifier first, label second.
    pub fn target_key(&self) -> Option<&str> {
        self.id
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.label.as_deref().filter(|s| !s.trim().is_empty()))
    }

    /// True if `target` names this element by identifier or label.
    pub fn matches_target(&self, target: &str) -> bool {
        self.id.as_deref() == Some(target) || self.label.as_deref() == Some(target)
    }

    pub fn is_input(&self) -> bool {
        self.kind.is_input()
    }

    pub fn has_value(&self) -> bool {
        self.value.as_deref().is_some_and(|v| !v.trim().is_empty())
    }

    pub fn effective_priority(&self) -> i32 {
        self.priority.unwrap_or(DEFAULT_ELEMENT_PRIORITY).max(1)
    }

    /// Short human-readable name for prompts and logs.
    pub fn display_name(&self) -> String {
        match (self.label.as_deref(), self.id.as_deref()) {
            (Some(label), Some(id)) if label != id => format!("'{label}' ({id})"),
            (Some(label), _) => format!("'{label}'"),
            (None, Some(id)) => id.to_string(),
            (None, None) => format!("unnamed {:?}", self.kind),
        }
    }
}

/// Oracle-estimated chance that a decision achieves its intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessProbability {
    pub value: f64,
    pub reasoning: String,
}

impl SuccessProbability {
    /// Build a probability, clamping `value` into `[0, 1]` (NaN becomes 0).
    pub fn new(value: f64, reasoning: impl Into<String>) -> Self {
        let value = if value.is_nan() {
            0.0
        } else {
            value.clamp(0.0, 1.0)
        };
        Self {
            value,
            reasoning: reasoning.into(),
        }
    }
}

/// Fallback action suggested by the oracle in case the primary one fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum AlternativeAction {
    Tap { target: Option<String> },
    Type { target: Option<String> },
    Swipe,
    Done,
}

impl AlternativeAction {
    /// Parse the `<action>` / `<action>_<target>` wire encoding.
    ///
    /// Only the first underscore separates action from target; targets may
    /// themselves contain underscores.
    pub fn parse_descriptor(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (action, target) = match raw.split_once('_') {
            Some((action, target)) => (action, Some(target.trim()).filter(|t| !t.is_empty())),
            None => (raw, None),
        };
        let target = target.map(str::to_string);
        match ActionKind::parse(action)? {
            ActionKind::Tap => Some(AlternativeAction::Tap { target }),
            ActionKind::Type => Some(AlternativeAction::Type { target }),
            ActionKind::Swipe => Some(AlternativeAction::Swipe),
            ActionKind::Done => Some(AlternativeAction::Done),
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            AlternativeAction::Tap { .. } => ActionKind::Tap,
            AlternativeAction::Type { .. } => ActionKind::Type,
            AlternativeAction::Swipe => ActionKind::Swipe,
            AlternativeAction::Done => ActionKind::Done,
        }
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            AlternativeAction::Tap { target } | AlternativeAction::Type { target } => {
                target.as_deref()
            }
            AlternativeAction::Swipe | AlternativeAction::Done => None,
        }
    }
}

/// The resolved intent for one exploration step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: ActionKind,
    pub target: Option<String>,
    pub reasoning: String,
    pub success_probability: SuccessProbability,
    pub text_to_type: Option<String>,
    pub expected_outcome: Option<String>,
    pub alternative_actions: Vec<AlternativeAction>,
}

impl Decision {
    /// Terminal decision that ends exploration.
    pub fn done(reasoning: impl Into<String>) -> Self {
        let reasoning = reasoning.into();
        Self {
            action: ActionKind::Done,
            target: None,
            success_probability: SuccessProbability::new(1.0, reasoning.clone()),
            reasoning,
            text_to_type: None,
            expected_outcome: None,
            alternative_actions: Vec::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.action == ActionKind::Done
    }

    /// `round(success_probability × 100)`.
    pub fn confidence(&self) -> u8 {
        (self.success_probability.value * 100.0).round() as u8
    }

    /// One-line rendering used in logs and step summaries.
    pub fn summary(&self) -> String {
        match (&self.target, &self.text_to_type) {
            (Some(target), Some(text)) => format!("{} {} '{}'", self.action, target, text),
            (Some(target), None) => format!("{} {}", self.action, target),
            (None, _) => self.action.to_string(),
        }
    }
}

/// Outcome of checking an executed action against its declared intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub passed: bool,
    pub reason: String,
    pub screen_changed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_element_found: Option<bool>,
}

impl VerificationResult {
    pub fn pass(reason: impl Into<String>, screen_changed: bool) -> Self {
        Self {
            passed: true,
            reason: reason.into(),
            screen_changed,
            expected_element_found: None,
        }
    }

    pub fn fail(reason: impl Into<String>, screen_changed: bool) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
            screen_changed,
            expected_element_found: None,
        }
    }

    pub fn with_expected_element(mut self, found: bool) -> Self {
        self.expected_element_found = Some(found);
        self
    }
}
