//! Identifier wrappers for BrandBrain entities.
//!
//! All core entities are keyed by opaque UUID strings. Wrapping them keeps
//! a brand id from ever being passed where a compile-run id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Error returned when parsing a UUID-backed identifier fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParseError {
    message: String,
}

impl IdParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for IdParseError {}

macro_rules! define_uuid_id {
    ($name:ident, $label:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn parse(value: &str) -> Result<Self, IdParseError> {
                Uuid::parse_str(value)
                    .map_err(|e| IdParseError::new(format!("Invalid {}: {}", $label, e)))?;
                Ok(Self(value.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

define_uuid_id!(BrandId, "brand ID");
define_uuid_id!(SourceConnectionId, "source connection ID");
define_uuid_id!(ActorRunId, "actor run ID");
define_uuid_id!(EvidenceItemId, "evidence item ID");
define_uuid_id!(BundleId, "evidence bundle ID");
define_uuid_id!(CompileRunId, "compile run ID");
define_uuid_id!(SnapshotId, "snapshot ID");
define_uuid_id!(JobId, "job ID");

pub use self::EvidenceItemId as NeiId;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(BrandId::parse("not-a-uuid").is_err());
        assert!(BrandId::parse("").is_err());
    }

    #[test]
    fn test_parse_roundtrip() {
        let id = CompileRunId::new();
        let parsed = CompileRunId::parse(id.as_str()).unwrap();
        assert_eq!(id, parsed);
    }
}
