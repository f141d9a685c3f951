//! Screen capture seam.
//!
//! The accessibility-tree capture runs outside this crate; the explorer only
//! sees the [`ScreenCapture`] trait and validates what it returns.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::core::types::{Element, ScreenType};
use crate::error::ExplorationError;

/// One captured screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    /// Stable hash of the screen's structure.
    pub fingerprint: String,
    pub elements: Vec<Element>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_type: Option<ScreenType>,
    /// Encoded screenshot; opaque to the explorer.
    #[serde(default, skip)]
    pub screenshot: Vec<u8>,
}

impl Capture {
    pub fn new(fingerprint: impl Into<String>, elements: Vec<Element>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            elements,
            screen_type: None,
            screenshot: Vec::new(),
        }
    }

    pub fn with_screen_type(mut self, screen_type: ScreenType) -> Self {
        self.screen_type = Some(screen_type);
        self
    }

    /// Reject captures the loop cannot reason about.
    pub fn validate(&self) -> Result<(), ExplorationError> {
        if self.fingerprint.trim().is_empty() {
            return Err(ExplorationError::InvalidHierarchy(
                "capture returned an empty fingerprint".to_string(),
            ));
        }
        Ok(())
    }

    pub fn interactive_count(&self) -> usize {
        self.elements.iter().filter(|e| e.interactive).count()
    }

    /// Short description recorded with each ledger step.
    pub fn describe(&self) -> String {
        let kind = self.screen_type.map_or("unknown", |t| t.as_str());
        format!(
            "{kind} screen with {} elements ({} interactive)",
            self.elements.len(),
            self.interactive_count()
        )
    }
}

/// Produces the current screen on demand.
pub trait ScreenCapture {
    fn capture(&self) -> Result<Capture>;
}

impl<T: ScreenCapture + ?Sized> ScreenCapture for &T {
    fn capture(&self) -> Result<Capture> {
        (**self).capture()
    }
}
