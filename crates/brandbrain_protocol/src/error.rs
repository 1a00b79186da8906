//! Error vocabulary shared with the HTTP boundary.

use serde::{Deserialize, Serialize};

/// Stable machine codes for gating failures.
pub mod gating_codes {
    pub const ONBOARDING_MISSING: &str = "ONBOARDING_MISSING";
    pub const ONBOARDING_INCOMPLETE: &str = "ONBOARDING_INCOMPLETE";
    pub const NO_ENABLED_SOURCES: &str = "NO_ENABLED_SOURCES";
}

/// One structured gating failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatingError {
    pub code: String,
    pub message: String,
}

impl GatingError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gating_error_serialization() {
        let err = GatingError::new(gating_codes::NO_ENABLED_SOURCES, "no enabled sources");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "NO_ENABLED_SOURCES");
    }
}
