//! Decision oracle seam and response parsing.
//!
//! The oracle is a remote model that is slow and unreliable: it may answer
//! with malformed JSON, out-of-range choices, or refuse on content-policy
//! grounds. Implementations only return raw JSON; [`Oracle::choose`] and
//! [`Oracle::decide`] validate it against the bundled schemas so every backend
//! gets the same checks.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::core::types::{ActionKind, AlternativeAction, Decision, SuccessProbability};
use crate::io::schema::{CHOICE_RESPONSE_SCHEMA, DECISION_RESPONSE_SCHEMA, validate_schema};

/// Response protocol requested from the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleMode {
    /// Pick one entry of a numbered menu.
    Choice,
    /// Describe the action directly, with alternatives.
    FreeForm,
}

/// One oracle call: prompt text plus the JSON Schema the answer must satisfy.
#[derive(Debug, Clone)]
pub struct OracleRequest {
    pub prompt: String,
    pub schema: &'static str,
    pub mode: OracleMode,
}

impl OracleRequest {
    pub fn choice(prompt: String) -> Self {
        Self {
            prompt,
            schema: CHOICE_RESPONSE_SCHEMA,
            mode: OracleMode::Choice,
        }
    }

    pub fn free_form(prompt: String) -> Self {
        Self {
            prompt,
            schema: DECISION_RESPONSE_SCHEMA,
            mode: OracleMode::FreeForm,
        }
    }
}

/// Oracle failures, classified by how the decision protocol reacts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// The prompt exceeded what the oracle can process; retrying cannot help.
    #[error("oracle capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("oracle refused on content policy: {0}")]
    ContentPolicy(String),

    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    /// The oracle answered with something that is not a valid response.
    #[error("malformed oracle response: {0}")]
    Malformed(String),
}

impl OracleError {
    /// Returns true if an identical request may succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(self, OracleError::Unavailable(_) | OracleError::Malformed(_))
    }
}

/// Multiple-choice answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceResponse {
    /// 1-based menu number; range-checked by the caller.
    pub choice: i64,
    pub reasoning: String,
    /// 0-100.
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_outcome: Option<String>,
    /// Fallback menu numbers, most preferred first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<i64>,
}

impl ChoiceResponse {
    pub fn success_probability(&self) -> SuccessProbability {
        SuccessProbability::new(self.confidence / 100.0, self.reasoning.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeFormProbability {
    pub value: f64,
    pub reasoning: String,
}

/// Free-form answer, as sent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeFormResponse {
    pub action: ActionKind,
    #[serde(default)]
    pub target_element: Option<String>,
    pub reasoning: String,
    #[serde(default)]
    pub text_to_type: Option<String>,
    #[serde(default)]
    pub expected_outcome: Option<String>,
    pub success_probability: FreeFormProbability,
    /// `"<action>"` or `"<action>_<target>"` descriptors.
    #[serde(default)]
    pub alternative_actions: Vec<String>,
}

impl FreeFormResponse {
    /// Convert into a [`Decision`], parsing alternative descriptors once.
    ///
    /// Descriptors that do not parse are dropped with a warning.
    pub fn into_decision(self) -> Decision {
        let alternative_actions = self
            .alternative_actions
            .iter()
            .filter_map(|raw| {
                let parsed = AlternativeAction::parse_descriptor(raw);
                if parsed.is_none() {
                    warn!(descriptor = %raw, "dropping unparseable alternative action");
                }
                parsed
            })
            .collect();
        Decision {
            action: self.action,
            target: self.target_element.filter(|t| !t.trim().is_empty()),
            reasoning: self.reasoning,
            success_probability: SuccessProbability::new(
                self.success_probability.value,
                self.success_probability.reasoning,
            ),
            text_to_type: self.text_to_type,
            expected_outcome: self.expected_outcome,
            alternative_actions,
        }
    }
}

/// Validate and deserialize a choice-mode response.
pub fn parse_choice_response(value: &Value) -> Result<ChoiceResponse> {
    validate_schema(CHOICE_RESPONSE_SCHEMA, value, "choice response")?;
    serde_json::from_value(value.clone()).context("deserialize choice response")
}

/// Validate and deserialize a free-form response.
pub fn parse_free_form_response(value: &Value) -> Result<FreeFormResponse> {
    validate_schema(DECISION_RESPONSE_SCHEMA, value, "decision response")?;
    serde_json::from_value(value.clone()).context("deserialize decision response")
}

/// The external decision oracle.
pub trait Oracle {
    /// Submit `request` and return the raw JSON answer.
    fn complete(&self, request: &OracleRequest) -> Result<Value, OracleError>;

    fn choose(&self, request: &OracleRequest) -> Result<ChoiceResponse, OracleError> {
        let value = self.complete(request)?;
        parse_choice_response(&value).map_err(|err| OracleError::Malformed(format!("{err:#}")))
    }

    fn decide(&self, request: &OracleRequest) -> Result<FreeFormResponse, OracleError> {
        let value = self.complete(request)?;
        parse_free_form_response(&value).map_err(|err| OracleError::Malformed(format!("{err:#}")))
    }
}

impl<T: Oracle + ?Sized> Oracle for &T {
    fn complete(&self, request: &OracleRequest) -> Result<Value, OracleError> {
        (**self).complete(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn choice_response_requires_reasoning() {
        let ok = parse_choice_response(&json!({
            "choice": 2,
            "reasoning": "fill the form first",
            "confidence": 85,
            "alternatives": [3, 1]
        }))
        .expect("valid");
        assert_eq!(ok.choice, 2);
        assert_eq!(ok.alternatives, vec![3, 1]);
        assert!((ok.success_probability().value - 0.85).abs() < f64::EPSILON);

        let err = parse_choice_response(&json!({"choice": 2, "confidence": 85}))
            .expect_err("missing reasoning");
        assert!(err.to_string().contains("schema validation failed"));
    }

    #[test]
    fn free_form_response_parses_alternatives_once() {
        let response = parse_free_form_response(&json!({
            "action": "tap",
            "target_element": "loginButton",
            "reasoning": "submit credentials",
            "expected_outcome": "dashboardScreen appears",
            "success_probability": {"value": 1.4, "reasoning": "obvious"},
            "alternative_actions": ["tap_forgot_password", "swipe", "jump_somewhere"]
        }))
        .expect("valid");

        let decision = response.into_decision();
        assert_eq!(decision.action, ActionKind::Tap);
        assert_eq!(decision.confidence(), 100);
        assert_eq!(
            decision.alternative_actions,
            vec![
                AlternativeAction::Tap {
                    target: Some("forgot_password".to_string())
                },
                AlternativeAction::Swipe,
            ]
        );
    }

    #[test]
    fn free_form_rejects_unknown_action() {
        let err = parse_free_form_response(&json!({
            "action": "pinch",
            "reasoning": "zoom",
            "success_probability": {"value": 0.5, "reasoning": "maybe"}
        }))
        .expect_err("invalid");
        assert!(format!("{err:#}").contains("decision response"));
    }

    #[test]
    fn only_unavailable_and_malformed_are_transient() {
        assert!(OracleError::Unavailable("503".to_string()).is_transient());
        assert!(OracleError::Malformed("not json".to_string()).is_transient());
        assert!(!OracleError::CapacityExceeded("too long".to_string()).is_transient());
        assert!(!OracleError::ContentPolicy("refused".to_string()).is_transient());
    }
}
