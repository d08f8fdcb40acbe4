//! Comm channel abstraction.
//!
//! A comm is an identified, bidirectional message channel between the kernel
//! and a front end. Delivery belongs to the host runtime; this crate only
//! hands frames over and never waits for a reply.
//!
//! Implementations:
//! - [`ChannelComm`]: pushes [`CommMessage`] frames into an unbounded tokio channel
//! - anything else implementing [`Comm`] (a kernel's own comm manager, a test double)

use crate::protocol::CommMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display, Formatter};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum CommError {
    #[error("comm {0} is closed")]
    Closed(CommId),

    #[error("send failed on comm {comm_id}: {reason}")]
    SendFailed { comm_id: CommId, reason: String },
}

pub type Result<T> = std::result::Result<T, CommError>;

/// Unique identifier of a comm channel (and of the widget model behind it).
///
/// Generated ids are UUID v4 in 32-char simple hex form, as kernels use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommId(String);

impl CommId {
    /// Generate a new random comm id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CommId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CommId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for CommId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// An open comm channel.
///
/// Every call is fire-and-forget: it returns once the frame is handed to the
/// runtime. Frames sent through one comm are delivered in call order.
pub trait Comm {
    fn id(&self) -> &CommId;

    fn target_name(&self) -> &str;

    /// Announce the comm to the front end.
    fn open(&self, data: Value, metadata: Value, buffers: Vec<Vec<u8>>) -> Result<()>;

    /// Send a message over the comm.
    fn send(&self, data: Value, metadata: Value, buffers: Vec<Vec<u8>>) -> Result<()>;

    /// Tell the front end the comm is gone.
    fn close(&self, data: Value) -> Result<()>;
}

/// Creates fresh comms for widgets that open their own channel.
pub trait CommFactory {
    fn create_comm(&self, target_name: &str) -> Box<dyn Comm>;
}

/// In-process comm runtime: all comms write frames into one unbounded channel.
///
/// The receiving half belongs to whoever delivers frames to the front end.
#[derive(Debug, Clone)]
pub struct CommManager {
    tx: mpsc::UnboundedSender<CommMessage>,
}

impl CommManager {
    /// Create a manager and the receiver its comms write to.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CommMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// A comm with a known id, e.g. one the front end opened.
    pub fn comm(&self, id: CommId, target_name: &str) -> ChannelComm {
        ChannelComm {
            id,
            target_name: target_name.to_string(),
            tx: self.tx.clone(),
        }
    }
}

impl CommFactory for CommManager {
    fn create_comm(&self, target_name: &str) -> Box<dyn Comm> {
        Box::new(self.comm(CommId::generate(), target_name))
    }
}

/// A comm whose frames go to a [`CommManager`]'s channel.
#[derive(Debug, Clone)]
pub struct ChannelComm {
    id: CommId,
    target_name: String,
    tx: mpsc::UnboundedSender<CommMessage>,
}

impl ChannelComm {
    fn deliver(&self, frame: CommMessage) -> Result<()> {
        self.tx.send(frame).map_err(|_| CommError::SendFailed {
            comm_id: self.id.clone(),
            reason: "comm runtime receiver dropped".to_string(),
        })
    }
}

impl Comm for ChannelComm {
    fn id(&self) -> &CommId {
        &self.id
    }

    fn target_name(&self) -> &str {
        &self.target_name
    }

    fn open(&self, data: Value, metadata: Value, buffers: Vec<Vec<u8>>) -> Result<()> {
        self.deliver(CommMessage::CommOpen {
            comm_id: self.id.clone(),
            target_name: self.target_name.clone(),
            data,
            metadata,
            buffers,
        })
    }

    fn send(&self, data: Value, metadata: Value, buffers: Vec<Vec<u8>>) -> Result<()> {
        self.deliver(CommMessage::CommMsg {
            comm_id: self.id.clone(),
            data,
            metadata,
            buffers,
        })
    }

    fn close(&self, data: Value) -> Result<()> {
        self.deliver(CommMessage::CommClose {
            comm_id: self.id.clone(),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generated_ids_are_hex_and_unique() {
        let a = CommId::generate();
        let b = CommId::generate();

        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_comm_id_serializes_as_string() {
        let id = CommId::from("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        assert_eq!(id.to_string(), "abc");
    }

    #[test]
    fn test_frames_arrive_in_order() {
        let (manager, mut rx) = CommManager::new();
        let comm = manager.create_comm("jupyter.widget");

        comm.open(json!({"state": {}}), Value::Null, vec![]).unwrap();
        comm.send(json!({"n": 1}), Value::Null, vec![vec![7]]).unwrap();
        comm.close(json!({})).unwrap();

        let open = rx.try_recv().unwrap();
        assert!(matches!(open, CommMessage::CommOpen { ref target_name, .. } if target_name == "jupyter.widget"));
        assert_eq!(open.comm_id(), comm.id());

        match rx.try_recv().unwrap() {
            CommMessage::CommMsg { data, buffers, .. } => {
                assert_eq!(data, json!({"n": 1}));
                assert_eq!(buffers, vec![vec![7]]);
            }
            other => panic!("expected comm_msg, got {other:?}"),
        }

        assert!(matches!(rx.try_recv().unwrap(), CommMessage::CommClose { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (manager, rx) = CommManager::new();
        let comm = manager.comm(CommId::from("dead"), "jupyter.widget");
        drop(rx);

        let err = comm.send(json!({}), Value::Null, vec![]).unwrap_err();
        assert!(matches!(err, CommError::SendFailed { .. }));
    }
}
