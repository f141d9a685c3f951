//! Post-execution check that an action produced its intended effect.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{ActionKind, Decision, Element, VerificationResult};

/// UI vocabulary that marks a word in an expected outcome as an element reference.
const UI_VOCABULARY: &[&str] = &[
    "button",
    "screen",
    "dashboard",
    "field",
    "view",
    "page",
    "tab",
    "menu",
    "list",
    "dialog",
    "alert",
    "modal",
    "link",
    "icon",
    "label",
    "toggle",
    "switch",
    "form",
];

/// Words too generic to identify an element on their own.
const GENERIC_WORDS: &[&str] = &[
    "text", "message", "button", "screen", "view", "field", "page", "element", "label", "list",
    "form", "menu", "tab", "link", "icon",
];

/// Tokens at least this long also match as substrings of element ids/labels.
const SUBSTRING_MATCH_MIN_LEN: usize = 8;

static CAMEL_CASE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[a-z][a-z0-9]*(?:[A-Z][a-z0-9]*)+\b").expect("camelCase pattern is valid")
});
static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z][A-Za-z0-9_]*").expect("word pattern is valid"));

/// Fingerprint and elements of one captured screen.
#[derive(Debug, Clone, Copy)]
pub struct ScreenObservation<'a> {
    pub fingerprint: &'a str,
    pub elements: &'a [Element],
}

/// Verify `decision` given the screens observed before and after executing it.
pub fn verify(
    decision: &Decision,
    before: ScreenObservation<'_>,
    after: ScreenObservation<'_>,
) -> VerificationResult {
    let changed = before.fingerprint != after.fingerprint;
    match decision.action {
        ActionKind::Done => VerificationResult::pass("done requires no verification", changed),
        ActionKind::Swipe => {
            if changed {
                VerificationResult::pass("swipe revealed new content", changed)
            } else {
                VerificationResult::fail(
                    "swipe produced no visible change (likely at scroll edge)",
                    changed,
                )
            }
        }
        ActionKind::Type => verify_typed_text(decision, after, changed),
        ActionKind::Tap => match decision.expected_outcome.as_deref() {
            Some(expected) if !expected.trim().is_empty() => {
                verify_expected_outcome(expected, after, changed)
            }
            _ => fingerprint_fallback(changed),
        },
    }
}

fn verify_typed_text(
    decision: &Decision,
    after: ScreenObservation<'_>,
    changed: bool,
) -> VerificationResult {
    let typed = decision.text_to_type.as_deref().unwrap_or_default();
    let Some(target) = decision.target.as_deref() else {
        return VerificationResult::fail("type action has no target element", changed);
    };
    let Some(element) = find_element(after.elements, target) else {
        return VerificationResult::fail(
            format!("target '{target}' not found after typing"),
            changed,
        )
        .with_expected_element(false);
    };
    let value = element.value.as_deref().unwrap_or_default();
    if value.contains(typed) {
        VerificationResult::pass(format!("'{target}' now contains the typed text"), changed)
            .with_expected_element(true)
    } else {
        VerificationResult::fail(
            format!("'{target}' value {value:?} does not contain {typed:?}"),
            changed,
        )
        .with_expected_element(true)
    }
}

fn verify_expected_outcome(
    expected: &str,
    after: ScreenObservation<'_>,
    changed: bool,
) -> VerificationResult {
    let tokens = extract_expected_tokens(expected);
    if tokens.is_empty() {
        return fingerprint_fallback(changed);
    }
    if let Some(token) = tokens
        .iter()
        .find(|token| contains_token(after.elements, token))
    {
        return VerificationResult::pass(
            format!("expected element '{token}' present after tap"),
            changed,
        )
        .with_expected_element(true);
    }
    let reason = if changed {
        format!(
            "screen changed but none of [{}] appeared (unexpected effect)",
            tokens.iter().cloned().collect::<Vec<_>>().join(", ")
        )
    } else {
        "screen unchanged and expected elements absent".to_string()
    };
    VerificationResult::fail(reason, changed).with_expected_element(false)
}

fn fingerprint_fallback(changed: bool) -> VerificationResult {
    if changed {
        VerificationResult::pass("screen changed", changed)
    } else {
        VerificationResult::fail("screen unchanged after action", changed)
    }
}

/// Identifier-like tokens mentioned in free-text expected outcome, lowercased.
///
/// camelCase words always qualify; other words qualify when they contain UI
/// vocabulary and are not a generic stand-alone word.
pub fn extract_expected_tokens(expected: &str) -> BTreeSet<String> {
    let mut tokens = BTreeSet::new();
    for m in CAMEL_CASE_RE.find_iter(expected) {
        tokens.insert(m.as_str().to_lowercase());
    }
    for m in WORD_RE.find_iter(expected) {
        let word = m.as_str().to_lowercase();
        if GENERIC_WORDS.contains(&word.as_str()) {
            continue;
        }
        if UI_VOCABULARY.iter().any(|vocab| word.contains(vocab)) {
            tokens.insert(word);
        }
    }
    tokens
}

fn element_matches_token(element: &Element, token: &str) -> bool {
    [element.id.as_deref(), element.label.as_deref()]
        .into_iter()
        .flatten()
        .map(str::to_lowercase)
        .any(|candidate| {
            candidate == token
                || (token.len() >= SUBSTRING_MATCH_MIN_LEN && candidate.contains(token))
        })
}

fn contains_token(elements: &[Element], token: &str) -> bool {
    elements
        .iter()
        .any(|e| element_matches_token(e, token) || contains_token(&e.children, token))
}

fn find_element<'a>(elements: &'a [Element], target: &str) -> Option<&'a Element> {
    elements.iter().find_map(|element| {
        if element.matches_target(target) {
            return Some(element);
        }
        find_element(&element.children, target)
    })
}
