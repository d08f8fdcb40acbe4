//! Wire protocol for widget comms.
//!
//! Three comm frames carry everything:
//! - `comm_open`: kernel announces a model; data is `{state, buffer_paths}`
//! - `comm_msg`: data is a method envelope (`update`, `request_state`, `display`, `custom`)
//! - `comm_close`: data is `{}`
//!
//! Buffers ride next to the JSON payload. In the line-delimited frame form
//! used by [`CommMessage::to_json`] they serialize as JSON byte arrays.

use crate::buffers::BufferPath;
use crate::comm::CommId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Comm target every widget model is registered under.
pub const TARGET_NAME: &str = "jupyter.widget";

/// Widget message protocol version sent in comm metadata.
pub const PROTOCOL_VERSION: &str = "2.0.0";
pub const PROTOCOL_VERSION_MAJOR: u32 = 2;
pub const PROTOCOL_VERSION_MINOR: u32 = 0;

/// MIME type of the display payload that asks a front end to render a view.
pub const VIEW_MIME_TYPE: &str = "application/vnd.jupyter.widget-view+json";

pub const BASE_MODULE: &str = "@jupyter-widgets/base";
pub const BASE_MODULE_VERSION: &str = "^1.0.0";
pub const BASE_MODEL_NAME: &str = "WidgetModel";
pub const BASE_VIEW_NAME: &str = "WidgetView";

pub const MODEL_MODULE: &str = "_model_module";
pub const MODEL_MODULE_VERSION: &str = "_model_module_version";
pub const MODEL_NAME: &str = "_model_name";
pub const VIEW_MODULE: &str = "_view_module";
pub const VIEW_MODULE_VERSION: &str = "_view_module_version";
pub const VIEW_NAME: &str = "_view_name";

/// State keys every full state document carries.
pub const MANDATORY_KEYS: [&str; 6] = [
    MODEL_MODULE,
    MODEL_MODULE_VERSION,
    MODEL_NAME,
    VIEW_MODULE,
    VIEW_MODULE_VERSION,
    VIEW_NAME,
];

/// Metadata attached to every widget comm frame.
pub fn comm_metadata() -> Value {
    json!({ "version": PROTOCOL_VERSION })
}

/// Check a peer's protocol version against ours.
///
/// Only the major version has to match. A missing version is accepted.
pub fn is_compatible_version(version: Option<&str>) -> bool {
    let Some(version) = version else {
        return true;
    };
    version
        .split('.')
        .next()
        .and_then(|major| major.parse::<u32>().ok())
        .is_some_and(|major| major == PROTOCOL_VERSION_MAJOR)
}

/// Display payload asking the front end to render a view of `model_id`.
pub fn view_mime_bundle(model_id: &CommId) -> Value {
    json!({
        VIEW_MIME_TYPE: {
            "version_major": PROTOCOL_VERSION_MAJOR,
            "version_minor": PROTOCOL_VERSION_MINOR,
            "model_id": model_id,
        }
    })
}

/// Data of a `comm_open` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenData {
    pub state: Map<String, Value>,
    #[serde(default)]
    pub buffer_paths: Vec<BufferPath>,
}

/// Data of a `comm_msg` frame, tagged by `method`.
///
/// Wire format: `{"method":"update","state":{...},"buffer_paths":[...]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum WidgetMethod {
    /// Partial or full state patch (either direction)
    Update {
        state: Map<String, Value>,
        #[serde(default)]
        buffer_paths: Vec<BufferPath>,
    },
    /// Front end asks for the full state
    RequestState,
    /// Kernel asks the front end to render a view
    Display,
    /// Widget-specific payload
    Custom { content: Value },
}

impl WidgetMethod {
    /// Method tag as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Update { .. } => "update",
            Self::RequestState => "request_state",
            Self::Display => "display",
            Self::Custom { .. } => "custom",
        }
    }
}

/// One comm frame.
///
/// Wire format: `{"msg_type":"comm_msg","comm_id":"...","data":{...},"metadata":{...},"buffers":[[1,2]]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg_type", rename_all = "snake_case")]
pub enum CommMessage {
    CommOpen {
        comm_id: CommId,
        target_name: String,
        data: Value,
        #[serde(default)]
        metadata: Value,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        buffers: Vec<Vec<u8>>,
    },
    CommMsg {
        comm_id: CommId,
        data: Value,
        #[serde(default)]
        metadata: Value,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        buffers: Vec<Vec<u8>>,
    },
    CommClose {
        comm_id: CommId,
        #[serde(default)]
        data: Value,
    },
}

impl CommMessage {
    pub fn comm_id(&self) -> &CommId {
        match self {
            Self::CommOpen { comm_id, .. }
            | Self::CommMsg { comm_id, .. }
            | Self::CommClose { comm_id, .. } => comm_id,
        }
    }

    /// Frame type as it appears on the wire.
    pub fn msg_type(&self) -> &'static str {
        match self {
            Self::CommOpen { .. } => "comm_open",
            Self::CommMsg { .. } => "comm_msg",
            Self::CommClose { .. } => "comm_close",
        }
    }

    /// The `method` tag of a `comm_msg`, if it has one.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::CommMsg { data, .. } => data.get("method").and_then(Value::as_str),
            _ => None,
        }
    }

    /// Serialize to a single JSON line.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Try to parse from JSON bytes.
    ///
    /// Returns `None` for non-JSON input or unknown frame types.
    pub fn from_json(data: &[u8]) -> Option<Self> {
        serde_json::from_slice(data).ok()
    }
}
