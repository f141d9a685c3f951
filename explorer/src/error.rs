//! Error taxonomy surfaced at the exploration boundary.
//!
//! Internal plumbing uses `anyhow`; these typed variants are what callers
//! match on (directly, or via `anyhow::Error::downcast_ref`).

use thiserror::Error;

/// Errors raised while running an exploration session.
#[derive(Error, Debug)]
pub enum ExplorationError {
    /// The oracle could not be reached, or kept failing until retries ran out.
    #[error("decision oracle unavailable: {0}")]
    OracleUnavailable(String),

    /// The capture collaborator returned a hierarchy the loop cannot use.
    #[error("invalid screen hierarchy: {0}")]
    InvalidHierarchy(String),

    /// The oracle refused the prompt on content-policy grounds.
    #[error("oracle refused the prompt: {0}")]
    ContentPolicyBlocked(String),

    /// The oracle answered, but the answer was unusable.
    #[error("invalid decision: {0}")]
    InvalidDecision(String),

    #[error("action execution failed: {0}")]
    ActionExecutionFailure(String),

    #[error("persistence failed: {0}")]
    PersistenceFailure(#[source] anyhow::Error),

    /// Every oracle attempt produced an invalid decision.
    #[error("oracle retry budget exhausted after {attempts} attempts: {last_error}")]
    BudgetExhausted { attempts: u32, last_error: String },
}

impl ExplorationError {
    /// Returns true if the session cannot continue after this error.
    ///
    /// Everything else degrades to a `done` decision or a recorded failed step.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExplorationError::OracleUnavailable(_) | ExplorationError::BudgetExhausted { .. }
        )
    }
}
