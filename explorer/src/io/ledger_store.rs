//! Ledger persistence: one JSON document per session under `.explorer/sessions/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::ledger::ExplorationPath;

/// Directory of persisted sessions, one `<session_id>.json` each.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    dir: PathBuf,
}

impl LedgerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    /// Graph snapshot written next to the session's ledger.
    pub fn graph_path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.graph.json"))
    }

    /// Atomically write the ledger (temp file + rename).
    pub fn save(&self, path: &ExplorationPath) -> Result<()> {
        validate_session_id(&path.session_id)?;
        let target = self.path_for(&path.session_id);
        debug!(path = %target.display(), steps = path.steps.len(), "writing ledger");
        let mut buf = serde_json::to_string_pretty(path).context("serialize ledger")?;
        buf.push('\n');
        super::write_atomic(&target, &buf)
    }

    pub fn load(&self, session_id: &str) -> Result<ExplorationPath> {
        validate_session_id(session_id)?;
        let source = self.path_for(session_id);
        debug!(path = %source.display(), "loading ledger");
        let contents = fs::read_to_string(&source)
            .with_context(|| format!("read ledger {}", source.display()))?;
        let path: ExplorationPath = serde_json::from_str(&contents)
            .with_context(|| format!("parse ledger {}", source.display()))?;
        if path.session_id != session_id {
            return Err(anyhow!(
                "ledger {} holds session {} instead of {session_id}",
                source.display(),
                path.session_id
            ));
        }
        Ok(path)
    }

    /// Session ids with a persisted ledger, sorted (oldest first given timestamped ids).
    pub fn list_sessions(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut sessions = Vec::new();
        for entry in
            fs::read_dir(&self.dir).with_context(|| format!("read dir {}", self.dir.display()))?
        {
            let entry = entry.with_context(|| format!("read entry in {}", self.dir.display()))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(id) = name.strip_suffix(".json")
                && !id.ends_with(".graph")
            {
                sessions.push(id.to_string());
            }
        }
        sessions.sort();
        Ok(sessions)
    }
}

fn validate_session_id(session_id: &str) -> Result<()> {
    let valid = !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(anyhow!("invalid session id {session_id:?}"))
    }
}
