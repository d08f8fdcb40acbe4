//! State documents and patch errors.
//!
//! A [`StatePatch`] maps property names to JSON values, plus any binary
//! buffers split out of the document. The same type carries full state
//! (`get_state`) and partial updates (one key per outbound change).
//!
//! `null` under a key means "absent", never "remove the key". Keys missing
//! from a patch leave the property untouched.

use crate::buffers::{display_path, Buffer, BufferAttachment, BufferPath, PathSegment};
use serde_json::{Map, Value};
use std::fmt;
use std::ops::Index;
use thiserror::Error;

static NULL: Value = Value::Null;

/// A JSON state document with attached binary buffers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    state: Map<String, Value>,
    buffers: Vec<BufferAttachment>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a patch from a state map and its buffers.
    pub fn from_parts(state: Map<String, Value>, buffers: Vec<BufferAttachment>) -> Self {
        Self { state, buffers }
    }

    /// Build a patch from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self, PatchError> {
        match value {
            Value::Object(state) => Ok(Self {
                state,
                buffers: Vec::new(),
            }),
            other => Err(PatchError::NotAnObject {
                found: json_type_name(&other),
            }),
        }
    }

    /// Set the JSON value for a property, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.state.insert(key.into(), value)
    }

    /// Attach a buffer at `path`.
    pub fn attach(&mut self, path: BufferPath, data: impl Into<Buffer>) {
        self.buffers.push(BufferAttachment::new(path, data));
    }

    /// JSON value under `key`, if the key is present in the state map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Whether `key` is carried by this patch, either as JSON or as a buffer root.
    pub fn contains_key(&self, key: &str) -> bool {
        self.state.contains_key(key) || self.buffers.iter().any(|b| b.root_key() == Some(key))
    }

    /// Property names carried by this patch.
    ///
    /// JSON keys come first, then buffer roots that have no JSON entry.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.state.keys().map(String::as_str).collect();
        for root in self.buffers.iter().filter_map(BufferAttachment::root_key) {
            if !keys.contains(&root) {
                keys.push(root);
            }
        }
        keys
    }

    /// Number of property names carried by this patch.
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty() && self.buffers.is_empty()
    }

    /// The JSON part of the document.
    pub fn state(&self) -> &Map<String, Value> {
        &self.state
    }

    pub fn buffers(&self) -> &[BufferAttachment] {
        &self.buffers
    }

    /// Buffer attached at exactly `path`.
    pub fn buffer_at(&self, path: &[PathSegment]) -> Option<&Buffer> {
        self.buffers
            .iter()
            .find(|b| b.path.as_slice() == path)
            .map(|b| &b.data)
    }

    /// All buffers whose path starts at property `key`.
    pub fn buffers_under<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a BufferAttachment> {
        self.buffers
            .iter()
            .filter(move |b| b.root_key() == Some(key))
    }

    /// Buffers whose path cannot name a property (empty or starting at an index).
    pub fn unrooted_buffers(&self) -> impl Iterator<Item = &BufferAttachment> {
        self.buffers.iter().filter(|b| b.root_key().is_none())
    }

    /// Merge another patch into this one. Keys in `other` win.
    pub fn merge(&mut self, other: StatePatch) {
        for (key, value) in other.state {
            self.state.insert(key, value);
        }
        self.buffers.extend(other.buffers);
    }

    pub fn into_parts(self) -> (Map<String, Value>, Vec<BufferAttachment>) {
        (self.state, self.buffers)
    }

    /// The JSON part of the document as a `Value`.
    pub fn to_json(&self) -> Value {
        Value::Object(self.state.clone())
    }
}

impl Index<&str> for StatePatch {
    type Output = Value;

    /// Returns `Value::Null` for missing keys, like indexing a `serde_json::Value`.
    fn index(&self, key: &str) -> &Value {
        self.state.get(key).unwrap_or(&NULL)
    }
}

/// Errors raised while applying a patch to a widget.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("unknown property `{name}`")]
    UnknownProperty { name: String },

    #[error("cannot decode property `{name}`: {source}")]
    TypeDecode {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("property `{name}` expects a binary buffer")]
    MissingBuffer { name: String },

    #[error("unexpected buffer at `{}`", display_path(.path))]
    UnexpectedBuffer { path: BufferPath },

    #[error("buffer path `{}` does not start at a property name", display_path(.path))]
    InvalidBufferPath { path: BufferPath },

    #[error("patch must be a JSON object, found {found}")]
    NotAnObject { found: &'static str },

    #[error("{paths} buffer path(s) for {buffers} buffer(s)")]
    BufferCountMismatch { paths: usize, buffers: usize },
}

impl PatchError {
    /// The property this error is about, when there is one.
    pub fn property(&self) -> Option<&str> {
        match self {
            Self::UnknownProperty { name }
            | Self::TypeDecode { name, .. }
            | Self::MissingBuffer { name } => Some(name.as_str()),
            Self::UnexpectedBuffer { path } => match path.first() {
                Some(PathSegment::Key(key)) => Some(key.as_str()),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Every error collected while applying one patch.
///
/// Patches are applied best-effort: keys that decode are assigned, the rest
/// are reported here together.
#[derive(Debug)]
pub struct PatchErrors {
    errors: Vec<PatchError>,
}

impl PatchErrors {
    pub(crate) fn new(errors: Vec<PatchError>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &[PatchError] {
        &self.errors
    }

    pub fn into_inner(self) -> Vec<PatchError> {
        self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Names reported as unknown properties.
    pub fn unknown_properties(&self) -> Vec<&str> {
        self.errors
            .iter()
            .filter_map(|e| match e {
                PatchError::UnknownProperty { name } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl From<PatchError> for PatchErrors {
    fn from(error: PatchError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl fmt::Display for PatchErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "patch rejected {} key(s)", self.errors.len())?;
        for (i, error) in self.errors.iter().enumerate() {
            f.write_str(if i == 0 { ": " } else { "; " })?;
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for PatchErrors {}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
