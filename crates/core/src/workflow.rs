//! ComfyUI workflow graph editing.
//!
//! A workflow in API format is a JSON object keyed by node ID:
//!
//! ```json
//! {
//!   "3": {
//!     "class_type": "KSampler",
//!     "inputs": { "seed": 42, "cfg": 7.5 },
//!     "_meta": { "title": "KSampler" }
//!   }
//! }
//! ```
//!
//! [`Workflow`] wraps that object and offers the shallow find/update
//! operations a caller needs before submitting it.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Key of the per-node metadata object written by the ComfyUI editor.
const META_KEY: &str = "_meta";

/// Key of the node's input mapping.
const INPUTS_KEY: &str = "inputs";

/// A ComfyUI workflow graph: node ID -> node specification.
///
/// Iteration follows document order, so title lookups return the first
/// matching node as it appears in the source file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Workflow {
    nodes: Map<String, Value>,
}

/// A scalar value assignable to a node input.
///
/// Keeps the caller's type so that integers stay integral and floats stay
/// floats in the serialized request.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl Workflow {
    /// Parse a workflow from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self, CoreError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Wrap an already-parsed JSON document. The document must be an object.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Object(nodes) => Ok(Self { nodes }),
            _ => Err(CoreError::Validation(
                "Workflow JSON must be an object".to_string(),
            )),
        }
    }

    /// Read and parse a workflow file (UTF-8 JSON, API format).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Raw specification of a node.
    pub fn node(&self, node_id: &str) -> Option<&Value> {
        self.nodes.get(node_id)
    }

    /// Current value of one input on a node.
    pub fn node_input(&self, node_id: &str, input_name: &str) -> Option<&Value> {
        self.nodes.get(node_id)?.get(INPUTS_KEY)?.get(input_name)
    }

    /// Find the first node whose `_meta.title` equals `title` exactly.
    ///
    /// Titles are not unique; the first node in document order wins.
    /// Nodes without metadata are skipped, and so are nodes whose title is
    /// not a JSON string (a numeric title never matches `"5"`).
    pub fn find_node_id_by_title(&self, title: &str) -> Option<&str> {
        self.nodes.iter().find_map(|(node_id, node)| {
            let node_title = node.get(META_KEY)?.get("title")?.as_str()?;
            (node_title == title).then_some(node_id.as_str())
        })
    }

    /// Set `inputs.<input_name>` on a node, creating `inputs` if missing.
    ///
    /// Returns `false` (leaving the graph untouched) when `node_id` is not
    /// present or its entry is not a JSON object. Any previous value of the
    /// input is overwritten.
    pub fn update_node_input(
        &mut self,
        node_id: &str,
        input_name: &str,
        value: impl Into<InputValue>,
    ) -> bool {
        let Some(Value::Object(node)) = self.nodes.get_mut(node_id) else {
            return false;
        };

        let inputs = node
            .entry(INPUTS_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        if !inputs.is_object() {
            *inputs = Value::Object(Map::new());
        }
        if let Value::Object(inputs) = inputs {
            inputs.insert(input_name.to_string(), value.into().into());
        }
        true
    }
}

impl From<InputValue> for Value {
    fn from(value: InputValue) -> Self {
        match value {
            InputValue::String(s) => Value::String(s),
            InputValue::Integer(n) => Value::from(n),
            // Non-finite floats have no JSON form and become `null`.
            InputValue::Float(f) => Value::from(f),
            InputValue::Boolean(b) => Value::Bool(b),
        }
    }
}

impl From<&str> for InputValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for InputValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for InputValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for InputValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for InputValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for InputValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for InputValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}
