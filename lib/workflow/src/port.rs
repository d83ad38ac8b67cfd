//! Port system for workflow nodes.
//!
//! Ports are typed, ordered slots on a node. An input port receives the data
//! key of exactly one upstream output; an output port names the blob its node
//! writes when it executes. Ports are addressed by `(direction, order)`; the
//! textual `input.N` / `output.N` handle form only exists at the
//! serialization boundary.

use blockflow_core::hex_token;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub(crate) fn is_false(value: &bool) -> bool {
    !*value
}

/// Whether a port is an input or an output slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    /// Data flows into the node through this port.
    Input,
    /// Data flows out of the node through this port.
    Output,
}

impl PortDirection {
    /// Returns the handle prefix used in persisted documents.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

/// A typed port address within a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortAddress {
    /// The port direction.
    pub direction: PortDirection,
    /// The 0-based port order within its direction.
    pub order: u32,
}

impl PortAddress {
    /// Addresses an input port.
    #[must_use]
    pub const fn input(order: u32) -> Self {
        Self {
            direction: PortDirection::Input,
            order,
        }
    }

    /// Addresses an output port.
    #[must_use]
    pub const fn output(order: u32) -> Self {
        Self {
            direction: PortDirection::Output,
            order,
        }
    }
}

impl fmt::Display for PortAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.direction.as_str(), self.order)
    }
}

/// Error returned when a port handle cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseHandleError {
    /// The handle that failed to parse.
    pub handle: String,
}

impl fmt::Display for ParseHandleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid port handle '{}': expected 'input.N' or 'output.N'",
            self.handle
        )
    }
}

impl std::error::Error for ParseHandleError {}

impl FromStr for PortAddress {
    type Err = ParseHandleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseHandleError {
            handle: s.to_string(),
        };
        let (prefix, order) = s.split_once('.').ok_or_else(err)?;
        let direction = match prefix {
            "input" => PortDirection::Input,
            "output" => PortDirection::Output,
            _ => return Err(err()),
        };
        let order = order.parse::<u32>().map_err(|_| err())?;
        Ok(Self { direction, order })
    }
}

/// The data kind carried by a port.
///
/// Edges may only connect ports of identical type. Unknown type names are
/// preserved verbatim so documents round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PortType {
    /// Plain text.
    Text,
    /// Plain text, legacy spelling.
    Txt,
    /// A number rendered as text.
    Number,
    /// A PDF document.
    Pdf,
    /// A JSON document.
    Json,
    /// A CSV table.
    Csv,
    /// Any other declared type.
    Other(String),
}

impl PortType {
    /// Returns the type name as written in documents.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Txt => "txt",
            Self::Number => "number",
            Self::Pdf => "pdf",
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Other(name) => name,
        }
    }

    /// Returns the file extension used for blobs of this type.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Text | Self::Txt | Self::Number | Self::Other(_) => "txt",
            Self::Pdf => "pdf",
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

impl From<String> for PortType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "text" => Self::Text,
            "txt" => Self::Txt,
            "number" => Self::Number,
            "pdf" => Self::Pdf,
            "json" => Self::Json,
            "csv" => Self::Csv,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for PortType {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<PortType> for String {
    fn from(value: PortType) -> Self {
        match value {
            PortType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of a stored data blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataKey(String);

impl DataKey {
    /// Wraps an existing key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Generates a fresh key with an extension matching the port type.
    #[must_use]
    pub fn generate(port_type: &PortType) -> Self {
        Self(format!("{}.{}", hex_token(), port_type.extension()))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Data readiness of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortStatus {
    /// No fresh data.
    #[default]
    Idle,
    /// Data is available under the port's key.
    Ready,
}

/// An input or output slot on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    /// 0-based position within the node's inputs or outputs.
    pub order: u32,
    /// The declared data kind.
    #[serde(rename = "type")]
    pub port_type: PortType,
    /// Key of the underlying data blob, once assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<DataKey>,
    /// Data readiness.
    #[serde(default)]
    pub status: PortStatus,
    /// Display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Display description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Locked ports keep their status across a reset.
    #[serde(default, skip_serializing_if = "is_false")]
    pub locked: bool,
}

impl Port {
    /// Creates an idle, unkeyed port.
    #[must_use]
    pub fn new(order: u32, port_type: impl Into<PortType>) -> Self {
        Self {
            order,
            port_type: port_type.into(),
            key: None,
            status: PortStatus::Idle,
            title: None,
            description: None,
            locked: false,
        }
    }

    /// Sets the data key.
    #[must_use]
    pub fn with_key(mut self, key: DataKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: PortStatus) -> Self {
        self.status = status;
        self
    }

    /// Returns true if the port holds fresh data.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status == PortStatus::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_display_and_parse() {
        assert_eq!(PortAddress::input(0).to_string(), "input.0");
        assert_eq!(PortAddress::output(3).to_string(), "output.3");

        let parsed: PortAddress = "output.2".parse().expect("parse");
        assert_eq!(parsed, PortAddress::output(2));
    }

    #[test]
    fn handle_parse_rejects_garbage() {
        assert!("input".parse::<PortAddress>().is_err());
        assert!("side.0".parse::<PortAddress>().is_err());
        assert!("input.-1".parse::<PortAddress>().is_err());
        assert!("output.x".parse::<PortAddress>().is_err());
    }

    #[test]
    fn unknown_port_type_is_preserved() {
        let port_type = PortType::from("image");
        assert_eq!(port_type, PortType::Other("image".to_string()));
        assert_eq!(String::from(port_type), "image");
    }

    #[test]
    fn text_and_txt_are_distinct_types() {
        assert_ne!(PortType::Text, PortType::Txt);
        assert_eq!(PortType::Text.extension(), PortType::Txt.extension());
    }

    #[test]
    fn generated_key_uses_type_extension() {
        let key = DataKey::generate(&PortType::Pdf);
        let (token, ext) = key.as_str().split_once('.').expect("has extension");
        assert_eq!(token.len(), 32);
        assert_eq!(ext, "pdf");

        let number = DataKey::generate(&PortType::Number);
        assert!(number.as_str().ends_with(".txt"));
    }

    #[test]
    fn port_defaults_on_deserialize() {
        let port: Port = serde_yaml::from_str("order: 1\ntype: csv\n").expect("deserialize");
        assert_eq!(port.order, 1);
        assert_eq!(port.port_type, PortType::Csv);
        assert_eq!(port.status, PortStatus::Idle);
        assert!(port.key.is_none());
        assert!(!port.locked);
    }

    #[test]
    fn port_skips_empty_fields_on_serialize() {
        let yaml = serde_yaml::to_string(&Port::new(0, "text")).expect("serialize");
        assert!(!yaml.contains("key"));
        assert!(!yaml.contains("locked"));
        assert!(yaml.contains("status: idle"));
    }
}
