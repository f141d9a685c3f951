//! Shrinking and sanitizing the free-form prompt payload.
//!
//! The free-form oracle protocol embeds the serialized element list verbatim,
//! so oversized screens are cut down to a character budget before rendering.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::core::types::{Element, ElementKind};

/// Element fields needed to identify and act on an element.
#[derive(Debug, Clone, Serialize)]
struct EssentialElement<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<&'a str>,
    #[serde(rename = "type")]
    kind: ElementKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a str>,
}

impl<'a> From<&'a Element> for EssentialElement<'a> {
    fn from(element: &'a Element) -> Self {
        Self {
            id: element.id.as_deref(),
            label: element.label.as_deref(),
            kind: element.kind,
            value: element.value.as_deref(),
        }
    }
}

/// Serialized element list plus how much of the screen it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementPayload {
    pub json: String,
    pub kept: usize,
    pub total: usize,
    pub stripped: bool,
}

impl ElementPayload {
    pub fn truncated(&self) -> bool {
        self.kept < self.total
    }
}

/// Serialize `elements` within `char_budget` characters.
///
/// Interactive elements are kept first, then by descending priority. If the
/// full list overflows, the element count that fits is estimated from the
/// average serialized size, non-essential fields are stripped, and the count
/// keeps shrinking until the payload fits.
pub fn shrink_elements(elements: &[Element], char_budget: usize) -> ElementPayload {
    let mut ordered: Vec<&Element> = elements.iter().collect();
    ordered.sort_by(|a, b| {
        b.interactive
            .cmp(&a.interactive)
            .then_with(|| b.effective_priority().cmp(&a.effective_priority()))
    });
    let total = ordered.len();

    let full = serialize(&ordered);
    if full.len() <= char_budget {
        return ElementPayload {
            json: full,
            kept: total,
            total,
            stripped: false,
        };
    }

    let average = (full.len() / total.max(1)).max(1);
    let mut count = (char_budget / average).min(total);
    loop {
        let essentials: Vec<EssentialElement<'_>> = ordered[..count]
            .iter()
            .map(|element| EssentialElement::from(*element))
            .collect();
        let json = serialize(&essentials);
        if json.len() <= char_budget || count == 0 {
            return ElementPayload {
                json,
                kept: count,
                total,
                stripped: true,
            };
        }
        count = count * 3 / 4;
    }
}

fn serialize<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "[]".to_string())
}

/// Sensitive-sounding terms and the neutral wording used instead.
const NEUTRAL_SYNONYMS: &[(&str, &str)] = &[
    ("passwords", "access codes"),
    ("password", "access code"),
    ("passcode", "access code"),
    ("credentials", "account details"),
    ("credential", "account detail"),
    ("authentication", "verification"),
    ("authenticate", "verify"),
    ("authorization", "permission"),
    ("log in", "sign in"),
    ("login", "sign-in"),
    ("token", "key"),
    ("secret", "private value"),
    ("hack", "test"),
    ("exploit", "explore"),
    ("attack", "check"),
    ("bypass", "skip"),
];

static SENSITIVE_TERMS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    NEUTRAL_SYNONYMS
        .iter()
        .filter_map(|(term, replacement)| {
            RegexBuilder::new(&format!(r"\b{}\b", regex::escape(term)))
                .case_insensitive(true)
                .build()
                .ok()
                .map(|re| (re, *replacement))
        })
        .collect()
});

/// Replace sensitive-sounding terms with neutral synonyms.
pub fn sanitize_prompt(prompt: &str) -> String {
    SENSITIVE_TERMS
        .iter()
        .fold(prompt.to_string(), |text, (re, replacement)| {
            re.replace_all(&text, *replacement).into_owned()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{button, text_field};

    fn many_elements(n: usize) -> Vec<Element> {
        (0..n)
            .map(|i| {
                let mut element = button(&format!("button{i:03}"), &format!("Button number {i}"));
                element.priority = Some(i as i32);
                element.children = vec![button(&format!("child{i}"), "Child")];
                element
            })
            .collect()
    }

    #[test]
    fn small_payload_is_left_intact() {
        let elements = vec![text_field("email", None)];
        let payload = shrink_elements(&elements, 10_000);
        assert_eq!(payload.kept, 1);
        assert!(!payload.truncated());
        assert!(!payload.stripped);
        assert!(payload.json.contains("\"interactive\":true"));
    }

    #[test]
    fn oversized_payload_fits_budget_and_keeps_highest_priority() {
        let elements = many_elements(200);
        let payload = shrink_elements(&elements, 2_000);

        assert!(payload.json.len() <= 2_000);
        assert!(payload.truncated());
        assert!(payload.stripped);
        assert!(payload.kept > 0);
        assert!(payload.json.contains("button199"));
        assert!(!payload.json.contains("button000"));
        assert!(!payload.json.contains("children"));
    }

    #[test]
    fn tiny_budget_degrades_to_empty_list() {
        let payload = shrink_elements(&many_elements(10), 1);
        assert_eq!(payload.kept, 0);
        assert_eq!(payload.json, "[]");
    }

    #[test]
    fn sanitize_replaces_whole_words_case_insensitively() {
        let sanitized = sanitize_prompt("Enter the Password on the Login screen; keep passwordless mode");
        assert_eq!(
            sanitized,
            "Enter the access code on the sign-in screen; keep passwordless mode"
        );
    }
}
