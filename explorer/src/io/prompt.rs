//! Oracle prompt rendering within a byte budget.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::core::choices::ChoiceMenu;
use crate::core::payload::{ElementPayload, sanitize_prompt};

const CHOICE_TEMPLATE: &str = include_str!("prompts/choice.md");
const FREE_FORM_TEMPLATE: &str = include_str!("prompts/free_form.md");

/// Droppable sections, least valuable first.
const DROP_ORDER: [&str; 2] = ["history", "visited"];

/// Sections sent verbatim by sanitized prompts; element ids must stay addressable.
const VERBATIM_SECTIONS: [&str; 1] = ["elements"];

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker pattern is valid")
});

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("choice", CHOICE_TEMPLATE)
            .context("load choice template")?;
        env.add_template("free_form", FREE_FORM_TEMPLATE)
            .context("load free-form template")?;
        Ok(Self { env })
    }

    fn render_choice(&self, input: &PromptInputs<'_>, menu: &ChoiceMenu) -> Result<String> {
        let template = self.env.get_template("choice")?;
        let rendered = template.render(context! {
            goal => input.goal.trim(),
            screen => input.screen.trim(),
            choices => menu.choices(),
            visited => input.visited_targets,
            history => input.recent_steps.map(str::trim).filter(|s| !s.is_empty()),
        })?;
        Ok(rendered)
    }

    fn render_free_form(&self, input: &PromptInputs<'_>, payload: &ElementPayload) -> Result<String> {
        let template = self.env.get_template("free_form")?;
        let rendered = template.render(context! {
            goal => input.goal.trim(),
            screen => input.screen.trim(),
            elements => payload.json.as_str(),
            truncated => payload.truncated(),
            kept => payload.kept,
            total => payload.total,
            visited => input.visited_targets,
            history => input.recent_steps.map(str::trim).filter(|s| !s.is_empty()),
        })?;
        Ok(rendered)
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    /// Section text without its marker.
    content: String,
}

/// Split rendered output on `<!-- section:KEY required|droppable -->` markers.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

/// Drop droppable sections in [`DROP_ORDER`] until the total fits `budget`.
///
/// Required sections are never dropped; if they alone overflow, the prompt is
/// sent over budget and the oracle decides whether it can cope.
fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len = |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Per-step context shared by both prompt protocols.
#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    pub goal: &'a str,
    /// One-line description of the current screen.
    pub screen: &'a str,
    /// Recently visited targets, most recent last.
    pub visited_targets: &'a [String],
    /// Compact rendering of the last few ledger steps.
    pub recent_steps: Option<&'a str>,
}

/// Builds oracle prompts within a byte budget, dropping context sections first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    /// Multiple-choice prompt over `menu`.
    pub fn build_choice(&self, input: &PromptInputs<'_>, menu: &ChoiceMenu) -> Result<String> {
        let rendered = PromptEngine::new()?
            .render_choice(input, menu)
            .context("render choice prompt")?;
        Ok(self.fit(parse_sections(&rendered)))
    }

    /// Free-form prompt embedding the (already shrunk) element payload.
    pub fn build_free_form(
        &self,
        input: &PromptInputs<'_>,
        payload: &ElementPayload,
    ) -> Result<String> {
        let rendered = PromptEngine::new()?
            .render_free_form(input, payload)
            .context("render free-form prompt")?;
        Ok(self.fit(parse_sections(&rendered)))
    }

    /// [`Self::build_free_form`] with sensitive terms neutralized everywhere
    /// except the element payload.
    pub fn build_free_form_sanitized(
        &self,
        input: &PromptInputs<'_>,
        payload: &ElementPayload,
    ) -> Result<String> {
        let rendered = PromptEngine::new()?
            .render_free_form(input, payload)
            .context("render sanitized free-form prompt")?;
        let mut sections = parse_sections(&rendered);
        for section in sections
            .iter_mut()
            .filter(|s| !VERBATIM_SECTIONS.contains(&s.key.as_str()))
        {
            section.content = sanitize_prompt(&section.content);
        }
        Ok(self.fit(sections))
    }

    fn fit(&self, mut sections: Vec<ParsedSection>) -> String {
        apply_budget(&mut sections, self.budget_bytes);
        render_sections(&sections)
    }
}
