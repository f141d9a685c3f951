//! Action execution seam.

use thiserror::Error;

use crate::core::types::Decision;

/// Why an action could not be performed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("element '{0}' not found on screen")]
    ElementNotFound(String),

    #[error("unsupported action: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Failed(String),
}

/// Performs tap/type/swipe against the live UI.
pub trait ActionExecutor {
    /// Execute `decision`. `Ok(false)` means the driver ran but reported no effect.
    fn execute(&self, decision: &Decision) -> Result<bool, ExecutionError>;
}

impl<T: ActionExecutor + ?Sized> ActionExecutor for &T {
    fn execute(&self, decision: &Decision) -> Result<bool, ExecutionError> {
        (**self).execute(decision)
    }
}
