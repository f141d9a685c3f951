//! Explorer configuration stored under `.explorer/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Explorer configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// values that work against a typical mobile app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExplorerConfig {
    /// Upper bound on loop iterations per session.
    pub max_steps: u32,

    /// Alternatives tried after a failed verification, per step.
    pub max_verification_retries: u32,

    /// Oracle retries per decision after the first attempt.
    pub max_oracle_retries: u32,

    /// First oracle backoff delay; doubles on every retry.
    pub oracle_base_delay_ms: u64,

    /// Pause between executing an action and re-capturing the screen.
    pub settle_delay_ms: u64,

    /// Attempts on a revisited screen before the explorer gives up on it.
    pub stuck_threshold: usize,

    /// Cap on numbered choices offered to the oracle (excluding `done`).
    pub max_choices: usize,

    /// More elements than this and a swipe choice is offered.
    pub screen_fit_threshold: usize,

    /// Recent ledger steps rendered into the prompt (0 disables the section).
    pub recent_steps_in_prompt: usize,

    /// Byte budget for rendered prompts; droppable sections go first.
    pub prompt_budget_bytes: usize,

    /// Character budget for the serialized element payload in free-form mode.
    pub free_form_char_budget: usize,

    /// Persist the ledger after every mutation.
    pub persist_after_each_step: bool,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            max_steps: 50,
            max_verification_retries: 2,
            max_oracle_retries: 2,
            oracle_base_delay_ms: 1_000,
            settle_delay_ms: 500,
            stuck_threshold: 3,
            max_choices: 12,
            screen_fit_threshold: 15,
            recent_steps_in_prompt: 5,
            prompt_budget_bytes: 24_000,
            free_form_char_budget: 12_000,
            persist_after_each_step: true,
        }
    }
}

impl ExplorerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(anyhow!("max_steps must be > 0"));
        }
        if self.stuck_threshold == 0 {
            return Err(anyhow!("stuck_threshold must be > 0"));
        }
        if self.max_choices == 0 {
            return Err(anyhow!("max_choices must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.free_form_char_budget == 0 {
            return Err(anyhow!("free_form_char_budget must be > 0"));
        }
        Ok(())
    }

    pub fn oracle_base_delay(&self) -> Duration {
        Duration::from_millis(self.oracle_base_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ExplorerConfig::default()`.
pub fn load_config(path: &Path) -> Result<ExplorerConfig> {
    if !path.exists() {
        let cfg = ExplorerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ExplorerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ExplorerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
