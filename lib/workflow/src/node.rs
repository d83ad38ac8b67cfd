//! Workflow nodes.
//!
//! A node is one block instance. It names the executor service that runs
//! it, carries an opaque parameter blob passed through to that executor,
//! and owns ordered input and output ports.
//!
//! Parameters are held as YAML so that any valid document round-trips,
//! including non-string keys and tagged values. They become JSON only when
//! a request is built.

use crate::port::{DataKey, Port, PortAddress, PortDirection, is_false};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;
use std::fmt;

/// Identifier of a node, unique within its document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Wraps an existing node ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Names the external executor that handles a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceKey(String);

impl ServiceKey {
    /// Wraps a service key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cached execution summary of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Not yet eligible, or not yet run since it was last consumed.
    #[default]
    Idle,
    /// Dispatched, response not yet recorded.
    Pending,
    /// Completed; results are usable downstream.
    Ready,
    /// The executor reported an error.
    Failed,
}

/// One block instance in a workflow document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node ID.
    pub id: NodeId,
    /// The executor service handling this node.
    #[serde(rename = "key", alias = "service")]
    pub service: ServiceKey,
    /// Display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Display description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Catalog category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Opaque executor configuration, passed through untouched.
    #[serde(
        rename = "parameter",
        alias = "parameters",
        default,
        skip_serializing_if = "YamlValue::is_null"
    )]
    pub parameters: YamlValue,
    /// Execution summary.
    #[serde(default)]
    pub status: NodeStatus,
    /// Locked nodes keep their status across a reset.
    #[serde(default, skip_serializing_if = "is_false")]
    pub locked: bool,
    /// When the node was last dispatched.
    #[serde(
        rename = "dispatchedAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub dispatched_at: Option<DateTime<Utc>>,
    /// Input slots, in order.
    #[serde(rename = "input", alias = "inputs", default)]
    pub inputs: Vec<Port>,
    /// Output slots, in order.
    #[serde(rename = "output", alias = "outputs", default)]
    pub outputs: Vec<Port>,
}

impl Node {
    /// Creates an idle node without ports.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, service: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            service: ServiceKey::new(service),
            title: None,
            description: None,
            category: None,
            parameters: YamlValue::Null,
            status: NodeStatus::Idle,
            locked: false,
            dispatched_at: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Adds an input port.
    #[must_use]
    pub fn with_input(mut self, port: Port) -> Self {
        self.inputs.push(port);
        self
    }

    /// Adds an output port.
    #[must_use]
    pub fn with_output(mut self, port: Port) -> Self {
        self.outputs.push(port);
        self
    }

    /// Sets the executor parameters from a JSON value.
    #[must_use]
    pub fn with_parameters(mut self, parameters: JsonValue) -> Self {
        self.parameters = yaml_from_json(parameters);
        self
    }

    /// Returns the parameters in their JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if a mapping key is not a scalar.
    pub fn parameters_json(&self) -> Result<JsonValue, serde_json::Error> {
        serde_json::to_value(&self.parameters)
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.status = status;
        self
    }

    /// Returns the port at the given address.
    #[must_use]
    pub fn port(&self, address: PortAddress) -> Option<&Port> {
        self.ports(address.direction)
            .iter()
            .find(|p| p.order == address.order)
    }

    /// Returns the port at the given address, mutably.
    pub fn port_mut(&mut self, address: PortAddress) -> Option<&mut Port> {
        let ports = match address.direction {
            PortDirection::Input => &mut self.inputs,
            PortDirection::Output => &mut self.outputs,
        };
        ports.iter_mut().find(|p| p.order == address.order)
    }

    /// Returns all ports in one direction.
    #[must_use]
    pub fn ports(&self, direction: PortDirection) -> &[Port] {
        match direction {
            PortDirection::Input => &self.inputs,
            PortDirection::Output => &self.outputs,
        }
    }

    /// Returns true if every input holds fresh data (vacuously true without inputs).
    #[must_use]
    pub fn inputs_ready(&self) -> bool {
        self.inputs.iter().all(Port::is_ready)
    }

    /// Returns true if the node has outputs and all of them await propagation.
    #[must_use]
    pub fn outputs_ready(&self) -> bool {
        !self.outputs.is_empty() && self.outputs.iter().all(Port::is_ready)
    }

    /// Returns true if the node may be dispatched.
    ///
    /// The node must be idle with every input ready, and none of its outputs
    /// may still be waiting to be fanned out.
    #[must_use]
    pub fn is_runnable(&self) -> bool {
        self.status == NodeStatus::Idle
            && self.inputs_ready()
            && !self.outputs.iter().any(Port::is_ready)
    }

    /// Returns input data keys ordered by port order.
    #[must_use]
    pub fn input_keys(&self) -> Vec<Option<DataKey>> {
        ordered_keys(&self.inputs)
    }

    /// Returns output data keys ordered by port order.
    #[must_use]
    pub fn output_keys(&self) -> Vec<Option<DataKey>> {
        ordered_keys(&self.outputs)
    }
}

fn ordered_keys(ports: &[Port]) -> Vec<Option<DataKey>> {
    let mut ordered: Vec<&Port> = ports.iter().collect();
    ordered.sort_by_key(|p| p.order);
    ordered.into_iter().map(|p| p.key.clone()).collect()
}

fn yaml_from_json(value: JsonValue) -> YamlValue {
    match value {
        JsonValue::Null => YamlValue::Null,
        JsonValue::Bool(b) => YamlValue::Bool(b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                YamlValue::Number(i.into())
            } else if let Some(u) = n.as_u64() {
                YamlValue::Number(u.into())
            } else {
                YamlValue::Number(n.as_f64().unwrap_or(f64::NAN).into())
            }
        }
        JsonValue::String(s) => YamlValue::String(s),
        JsonValue::Array(items) => YamlValue::Sequence(items.into_iter().map(yaml_from_json).collect()),
        JsonValue::Object(map) => YamlValue::Mapping(
            map.into_iter()
                .map(|(k, v)| (YamlValue::String(k), yaml_from_json(v)))
                .collect(),
        ),
    }
}
