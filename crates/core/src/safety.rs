//! Safety classification result.

use serde::{Deserialize, Serialize};

/// Outcome of the content classifier for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyDecision {
    #[serde(default)]
    pub sexual: bool,
    #[serde(default)]
    pub nudity: bool,
    #[serde(default)]
    pub gore: bool,
    #[serde(default)]
    pub violence: bool,
    #[serde(default)]
    pub should_block: bool,
    #[serde(default)]
    pub should_sanitize: bool,
    #[serde(default)]
    pub reason: String,
}

impl SafetyDecision {
    /// Used when the classifier cannot be reached: nothing is flagged but
    /// sanitization stays on, so the deterministic tables still run for
    /// any flagged category a later stage sets.
    pub fn fallback() -> Self {
        Self {
            should_sanitize: true,
            reason: "Fallback: classifier unavailable.".into(),
            ..Self::default()
        }
    }

    pub fn is_sexual(&self) -> bool {
        self.sexual || self.nudity
    }

    pub fn is_violent(&self) -> bool {
        self.gore || self.violence
    }

    pub fn flagged(&self) -> bool {
        self.is_sexual() || self.is_violent()
    }
}
