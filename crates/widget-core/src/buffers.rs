//! Binary buffer attachments.
//!
//! JSON cannot carry raw bytes, so binary values travel next to the state
//! document as separate buffers. Each buffer is paired with a path into the
//! state (`["data"]`, `["points", 0]`) telling the receiver where it belongs.
//! On the wire the paths are listed in `buffer_paths` and the bytes ride in
//! the comm message's buffer list, in the same order.

use crate::state::PatchError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write;

/// One step of a path into the state document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// Array index
    Index(usize),
    /// Object key
    Key(String),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// Path from the state root to a buffer's logical position.
pub type BufferPath = Vec<PathSegment>;

/// Render a buffer path for logs and error messages (`points/0`).
pub fn display_path(path: &[PathSegment]) -> String {
    let mut out = String::new();
    for (i, segment) in path.iter().enumerate() {
        if i > 0 {
            out.push('/');
        }
        match segment {
            PathSegment::Index(index) => {
                let _ = write!(out, "{index}");
            }
            PathSegment::Key(key) => out.push_str(key),
        }
    }
    out
}

/// Raw bytes carried by a binary property.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Buffer(Vec<u8>);

impl Buffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Buffer {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

/// A buffer together with its position in the state document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferAttachment {
    pub path: BufferPath,
    pub data: Buffer,
}

impl BufferAttachment {
    pub fn new(path: BufferPath, data: impl Into<Buffer>) -> Self {
        Self {
            path,
            data: data.into(),
        }
    }

    /// Top-level property this buffer belongs to, if the path starts with a key.
    pub fn root_key(&self) -> Option<&str> {
        match self.path.first() {
            Some(PathSegment::Key(key)) => Some(key.as_str()),
            _ => None,
        }
    }
}

/// Split attachments into the wire form: `buffer_paths` plus raw buffers.
pub fn split_buffers(attachments: Vec<BufferAttachment>) -> (Vec<BufferPath>, Vec<Vec<u8>>) {
    attachments
        .into_iter()
        .map(|attachment| (attachment.path, attachment.data.into_vec()))
        .unzip()
}

/// Pair wire `buffer_paths` with the message's raw buffers.
///
/// The two lists must have the same length.
pub fn join_buffers(
    paths: Vec<BufferPath>,
    buffers: Vec<Vec<u8>>,
) -> Result<Vec<BufferAttachment>, PatchError> {
    if paths.len() != buffers.len() {
        return Err(PatchError::BufferCountMismatch {
            paths: paths.len(),
            buffers: buffers.len(),
        });
    }
    Ok(paths
        .into_iter()
        .zip(buffers)
        .map(|(path, bytes)| BufferAttachment::new(path, bytes))
        .collect())
}

/// A property value type that travels as a buffer instead of JSON.
///
/// Implemented for [`Buffer`] (always present) and `Option<Buffer>` (absent
/// encodes as JSON `null` with no buffer).
pub trait BinaryValue: Sized {
    /// The buffer to attach, or `None` to encode JSON `null`.
    fn buffer(&self) -> Option<&Buffer>;

    /// Rebuild the value from an inbound patch.
    ///
    /// `value` is the JSON value under the property's key (if any) and
    /// `buffer` the attachment at `[name]` (if any).
    fn from_wire(name: &str, value: Option<&Value>, buffer: Option<&Buffer>)
    -> Result<Self, PatchError>;
}

impl BinaryValue for Buffer {
    fn buffer(&self) -> Option<&Buffer> {
        Some(self)
    }

    fn from_wire(
        name: &str,
        _value: Option<&Value>,
        buffer: Option<&Buffer>,
    ) -> Result<Self, PatchError> {
        buffer.cloned().ok_or_else(|| PatchError::MissingBuffer {
            name: name.to_string(),
        })
    }
}

impl BinaryValue for Option<Buffer> {
    fn buffer(&self) -> Option<&Buffer> {
        self.as_ref()
    }

    fn from_wire(
        name: &str,
        value: Option<&Value>,
        buffer: Option<&Buffer>,
    ) -> Result<Self, PatchError> {
        match (buffer, value) {
            (Some(buffer), _) => Ok(Some(buffer.clone())),
            (None, None | Some(Value::Null)) => Ok(None),
            (None, Some(_)) => Err(PatchError::MissingBuffer {
                name: name.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_wire_format() {
        let path: BufferPath = vec!["points".into(), PathSegment::Index(0)];
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, r#"["points",0]"#);

        let parsed: BufferPath = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, path);
    }

    #[test]
    fn test_display_path() {
        assert_eq!(display_path(&[PathSegment::from("points"), PathSegment::Index(3)]), "points/3");
        assert_eq!(display_path(&[]), "");
    }

    #[test]
    fn test_split_and_join_keep_order() {
        let attachments = vec![
            BufferAttachment::new(vec!["a".into()], vec![1u8, 2]),
            BufferAttachment::new(vec!["b".into()], vec![3u8]),
        ];

        let (paths, buffers) = split_buffers(attachments.clone());
        assert_eq!(buffers, vec![vec![1, 2], vec![3]]);

        let joined = join_buffers(paths, buffers).unwrap();
        assert_eq!(joined, attachments);
    }

    #[test]
    fn test_join_rejects_count_mismatch() {
        let err = join_buffers(vec![vec!["a".into()]], vec![]).unwrap_err();
        assert!(matches!(
            err,
            PatchError::BufferCountMismatch {
                paths: 1,
                buffers: 0
            }
        ));
    }

    #[test]
    fn test_root_key() {
        let keyed = BufferAttachment::new(vec!["data".into(), PathSegment::Index(1)], vec![0u8]);
        assert_eq!(keyed.root_key(), Some("data"));

        let indexed = BufferAttachment::new(vec![PathSegment::Index(0)], vec![0u8]);
        assert_eq!(indexed.root_key(), None);
    }

    #[test]
    fn test_optional_buffer_from_wire() {
        let buf = Buffer::new(vec![9]);
        assert_eq!(
            Option::<Buffer>::from_wire("data", None, Some(&buf)).unwrap(),
            Some(buf)
        );
        assert_eq!(
            Option::<Buffer>::from_wire("data", Some(&Value::Null), None).unwrap(),
            None
        );
        assert!(Option::<Buffer>::from_wire("data", Some(&Value::Bool(true)), None).is_err());
    }

    #[test]
    fn test_required_buffer_from_wire() {
        assert!(matches!(
            Buffer::from_wire("data", Some(&Value::Null), None),
            Err(PatchError::MissingBuffer { .. })
        ));
    }
}
