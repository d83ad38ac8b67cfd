//! Strongly-typed identifiers.
//!
//! Workflow IDs are opaque 32-character lowercase hexadecimal tokens (a
//! 128-bit value without separators). New tokens are minted from a ULID so
//! they stay unique across processes without coordination.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Length of a hex token in characters.
const HEX_TOKEN_LEN: usize = 32;

/// Error returned when parsing an ID from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse.
    pub id_type: &'static str,
    /// The reason for the parse failure.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Generates a fresh 32-character lowercase hex token.
#[must_use]
pub fn hex_token() -> String {
    format!("{:032x}", Ulid::new().0)
}

fn is_hex_token(s: &str) -> bool {
    s.len() == HEX_TOKEN_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Unique identifier for a workflow document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkflowId(String);

impl WorkflowId {
    /// Creates a new random workflow ID.
    #[must_use]
    pub fn new() -> Self {
        Self(hex_token())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WorkflowId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if is_hex_token(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(ParseIdError {
                id_type: "WorkflowId",
                reason: format!("expected {HEX_TOKEN_LEN} lowercase hex characters, got {s:?}"),
            })
        }
    }
}

impl TryFrom<String> for WorkflowId {
    type Error = ParseIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WorkflowId> for String {
    fn from(id: WorkflowId) -> Self {
        id.0
    }
}
