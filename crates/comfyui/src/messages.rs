//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. This module decodes them into a
//! [`ComfyUIMessage`] enum.
//!
//! Decoding is lenient about payload fields: a missing or mistyped
//! `prompt_id` or `node` decodes as `None` rather than failing the whole
//! message, so the dispatcher can simply skip it. Only text that is not
//! JSON at all is an error.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// All ComfyUI WebSocket message types this client understands.
#[derive(Debug, Clone, PartialEq)]
pub enum ComfyUIMessage {
    /// Server status broadcast (session id, queue depth).
    Status(StatusData),

    /// A prompt has started executing.
    ExecutionStart(ExecutionStartData),

    /// Some nodes were skipped because their outputs are cached.
    ExecutionCached(ExecutionCachedData),

    /// A specific node is currently executing (`node` is `None` when the
    /// prompt has no node running any more).
    Executing(ExecutingData),

    /// Progress update from a long-running node (e.g. KSampler).
    Progress(ProgressData),

    /// A node has finished and produced output.
    Executed(ExecutedData),

    /// The whole prompt finished successfully.
    ExecutionSuccess(ExecutionSuccessData),

    /// Execution failed with an error.
    ExecutionError(ErrorData),

    /// Any other `type`, including a missing one (empty string).
    Unknown(String),
}

/// Payload for `status` messages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusData {
    /// Session id assigned by the server, sent on the first status message.
    pub sid: Option<String>,
    /// Number of prompts still queued, wherever it appears in `data`.
    pub queue_remaining: Option<i64>,
}

/// Payload for `execution_start` messages.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExecutionStartData {
    #[serde(default, deserialize_with = "lenient_string")]
    pub prompt_id: Option<String>,
}

/// Payload for `execution_cached` messages.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExecutionCachedData {
    #[serde(default, deserialize_with = "lenient_string")]
    pub prompt_id: Option<String>,
    /// Node IDs whose outputs were served from cache.
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub nodes: Vec<String>,
}

/// Payload for `executing` messages.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExecutingData {
    #[serde(default, deserialize_with = "lenient_node_id")]
    pub node: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub prompt_id: Option<String>,
}

/// Payload for `progress` messages (step-level progress within a node).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProgressData {
    #[serde(default, deserialize_with = "lenient_string")]
    pub prompt_id: Option<String>,
    /// Current step number.
    #[serde(default, deserialize_with = "lenient_i64")]
    pub value: i64,
    /// Total number of steps.
    #[serde(default, deserialize_with = "lenient_i64")]
    pub max: i64,
}

/// Payload for `executed` messages (node output).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExecutedData {
    #[serde(default, deserialize_with = "lenient_string")]
    pub prompt_id: Option<String>,
    /// The node that produced this output.
    #[serde(default, deserialize_with = "lenient_node_id")]
    pub node: Option<String>,
    /// Raw output value (images, text, etc.).
    #[serde(default)]
    pub output: Value,
}

/// One entry of `output.images` in an `executed` message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ImageRef {
    #[serde(default, deserialize_with = "lenient_text")]
    pub filename: String,
    /// Storage kind, e.g. `output` or `temp`.
    #[serde(rename = "type", default, deserialize_with = "lenient_text")]
    pub kind: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub subfolder: String,
}

/// Payload for `execution_success` messages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionSuccessData {
    pub prompt_id: Option<String>,
}

/// Payload for `execution_error` messages.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ErrorData {
    #[serde(default, deserialize_with = "lenient_string")]
    pub prompt_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_node_id")]
    pub node_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub exception_message: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub exception_type: String,
}

impl ExecutedData {
    /// Image entries listed under `output.images`, in order.
    ///
    /// Entries that are not JSON objects are skipped.
    pub fn images(&self) -> Vec<ImageRef> {
        let Some(entries) = self.output.get("images").and_then(Value::as_array) else {
            return Vec::new();
        };
        entries
            .iter()
            .filter(|entry| entry.is_object())
            .filter_map(|entry| ImageRef::deserialize(entry).ok())
            .collect()
    }
}

/// Parse a ComfyUI WebSocket text message.
///
/// Returns `Err` only when the text is not valid JSON. Unknown or missing
/// `type` values decode as [`ComfyUIMessage::Unknown`].
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    let doc: Value = serde_json::from_str(text)?;

    let kind = doc.get("type").and_then(Value::as_str).unwrap_or_default();
    let data = match doc.get("data") {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        _ => Value::Object(Map::new()),
    };

    let msg = match kind {
        "status" => ComfyUIMessage::Status(StatusData {
            sid: data.get("sid").and_then(Value::as_str).map(str::to_string),
            queue_remaining: find_key(&data, "queue_remaining").and_then(Value::as_i64),
        }),
        "execution_start" => ComfyUIMessage::ExecutionStart(decode(data)?),
        "execution_cached" => ComfyUIMessage::ExecutionCached(decode(data)?),
        "executing" => ComfyUIMessage::Executing(decode(data)?),
        "progress" => ComfyUIMessage::Progress(decode(data)?),
        "executed" => ComfyUIMessage::Executed(decode(data)?),
        "execution_success" => {
            let prompt_id = data
                .get("prompt_id")
                .or_else(|| find_key(&doc, "prompt_id"))
                .and_then(Value::as_str)
                .map(str::to_string);
            ComfyUIMessage::ExecutionSuccess(ExecutionSuccessData { prompt_id })
        }
        "execution_error" => ComfyUIMessage::ExecutionError(decode(data)?),
        other => ComfyUIMessage::Unknown(other.to_string()),
    };

    Ok(msg)
}

/// Depth-first search for the first value stored under `key`.
pub fn find_key<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map
            .get(key)
            .or_else(|| map.values().find_map(|v| find_key(v, key))),
        Value::Array(items) => items.iter().find_map(|v| find_key(v, key)),
        _ => None,
    }
}

fn decode<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(data)
}

// ---- lenient field decoders ----

fn lenient_string<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(de)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

/// Node ids are strings, but numbers are accepted; `null` and the literal
/// string `"null"` both mean "no node".
fn lenient_node_id<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(de)? {
        Value::String(s) if s != "null" => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_text<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(de)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn lenient_i64<'de, D: Deserializer<'de>>(de: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(de)?;
    // Integral floats such as `1.0` truncate to `1`.
    Ok(value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .unwrap_or_default())
}

fn lenient_string_list<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(de)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}
