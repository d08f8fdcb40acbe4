//! Transport adapter: the comm lifecycle of one widget.
//!
//! ```text
//! Unattached --open()--> Opening --(open frame sent)--> Open --close()--> Closed
//!      |                                                 ^  \
//!      +----------------attach(comm)---------------------+   +--remote close--> Closed
//! ```
//!
//! `Opening` only lasts while the open frame is handed to the runtime; no
//! acknowledgement is awaited. `Closed` is terminal.
//!
//! The adapter never inspects widget state. It sends what
//! [`WidgetObject`](crate::WidgetObject) encodes and enforces which sends are
//! legal in which state.

use crate::buffers::split_buffers;
use crate::comm::{Comm, CommFactory, CommId};
use crate::error::{Result, WidgetError};
use crate::protocol::{comm_metadata, OpenData, WidgetMethod, TARGET_NAME};
use crate::state::StatePatch;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, warn};

/// Lifecycle state of a widget's comm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TransportState {
    /// No comm yet; changes stay local
    Unattached,
    /// Open frame being handed to the runtime
    Opening,
    /// Comm live; patches flow both ways
    Open,
    /// Comm released (terminal)
    Closed,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unattached => "unattached",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Owns (or borrows from the runtime) the comm of one widget.
pub struct Transport {
    state: TransportState,
    comm: Option<Box<dyn Comm>>,
    /// Whether this adapter closes the comm when dropped.
    owning: bool,
}

impl Transport {
    /// A transport with no comm. Sends are refused until [`open`](Self::open).
    pub fn unattached() -> Self {
        Self {
            state: TransportState::Unattached,
            comm: None,
            owning: false,
        }
    }

    /// Wrap a comm that is already open on the front end. No open frame is sent.
    pub fn attached(comm: Box<dyn Comm>, owning: bool) -> Self {
        debug!("Attached to comm {} (owning: {})", comm.id(), owning);
        Self {
            state: TransportState::Open,
            comm: Some(comm),
            owning,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == TransportState::Open
    }

    pub fn is_owning(&self) -> bool {
        self.owning
    }

    /// Id of the comm, while one is held.
    pub fn comm_id(&self) -> Option<&CommId> {
        self.comm.as_ref().map(|comm| comm.id())
    }

    /// Create an owned comm and announce it with the widget's full state.
    ///
    /// Only legal from `Unattached`. If the runtime refuses the open frame the
    /// transport falls back to `Unattached`.
    pub fn open(&mut self, factory: &dyn CommFactory, state: StatePatch) -> Result<&CommId> {
        if self.state != TransportState::Unattached {
            return Err(WidgetError::InvalidTransition {
                action: "open",
                state: self.state,
            });
        }

        let (state, attachments) = state.into_parts();
        let (buffer_paths, buffers) = split_buffers(attachments);
        let data = serde_json::to_value(OpenData {
            state,
            buffer_paths,
        })?;

        let comm = factory.create_comm(TARGET_NAME);
        self.state = TransportState::Opening;
        if let Err(e) = comm.open(data, comm_metadata(), buffers) {
            self.state = TransportState::Unattached;
            return Err(e.into());
        }

        debug!("Opened comm {}", comm.id());
        self.owning = true;
        self.state = TransportState::Open;
        Ok(self.comm.insert(comm).id())
    }

    /// Send a patch as an `update` message.
    pub fn send_update(&self, patch: StatePatch) -> Result<()> {
        let (state, attachments) = patch.into_parts();
        let (buffer_paths, buffers) = split_buffers(attachments);
        self.send_method(
            &WidgetMethod::Update {
                state,
                buffer_paths,
            },
            buffers,
        )
    }

    /// Send any widget method over the comm.
    pub fn send_method(&self, method: &WidgetMethod, buffers: Vec<Vec<u8>>) -> Result<()> {
        let comm = self.live_comm()?;
        let data = serde_json::to_value(method)?;
        comm.send(data, comm_metadata(), buffers)?;
        Ok(())
    }

    /// Close the comm and release it.
    ///
    /// Returns whether a close frame was sent. Closing a closed transport is a
    /// no-op; closing an unattached one just marks it closed.
    pub fn close(&mut self) -> Result<bool> {
        match self.state {
            TransportState::Closed => {
                debug!("Close on already closed transport ignored");
                Ok(false)
            }
            TransportState::Unattached => {
                self.state = TransportState::Closed;
                Ok(false)
            }
            TransportState::Opening | TransportState::Open => {
                self.state = TransportState::Closed;
                match self.comm.take() {
                    Some(comm) => {
                        comm.close(json!({}))?;
                        debug!("Closed comm {}", comm.id());
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
        }
    }

    /// The front end closed the comm; release it without sending anything.
    pub fn on_remote_close(&mut self) {
        if let Some(comm) = self.comm.take() {
            debug!("Comm {} closed by front end", comm.id());
        }
        self.state = TransportState::Closed;
    }

    fn live_comm(&self) -> Result<&dyn Comm> {
        match (&self.comm, self.state) {
            (Some(comm), TransportState::Open) => Ok(&**comm),
            (_, state) => Err(WidgetError::ChannelUnavailable { state }),
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if self.owning && self.is_open() {
            if let Err(e) = self.close() {
                warn!("Failed to close comm on drop: {}", e);
            }
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("state", &self.state)
            .field("comm_id", &self.comm_id())
            .field("owning", &self.owning)
            .finish()
    }
}

/// Decode the JSON payload of a `comm_msg` into a widget method.
///
/// Unknown method tags map to [`WidgetError::UnknownMethod`], anything else
/// that fails to parse to [`WidgetError::MalformedMessage`].
pub fn parse_method(data: &Value) -> Result<WidgetMethod> {
    serde_json::from_value(data.clone()).map_err(|e| {
        match data.get("method").and_then(Value::as_str) {
            Some(method) if !is_known_method(method) => {
                WidgetError::UnknownMethod(method.to_string())
            }
            _ => WidgetError::MalformedMessage(e.to_string()),
        }
    })
}

fn is_known_method(method: &str) -> bool {
    matches!(method, "update" | "request_state" | "display" | "custom")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::CommManager;
    use crate::protocol::CommMessage;

    // ==================== Lifecycle ====================

    #[test]
    fn test_unattached_refuses_sends() {
        let transport = Transport::unattached();
        assert_eq!(transport.state(), TransportState::Unattached);
        assert!(transport.comm_id().is_none());

        let err = transport
            .send_method(&WidgetMethod::Display, vec![])
            .unwrap_err();
        assert!(matches!(
            err,
            WidgetError::ChannelUnavailable {
                state: TransportState::Unattached
            }
        ));
    }

    #[test]
    fn test_open_sends_state_and_metadata() {
        let (manager, mut rx) = CommManager::new();
        let mut transport = Transport::unattached();

        let state = StatePatch::from_value(json!({"_view_name": "WidgetView"})).unwrap();
        let id = transport.open(&manager, state).unwrap().clone();

        assert!(transport.is_open());
        assert!(transport.is_owning());
        match rx.try_recv().unwrap() {
            CommMessage::CommOpen {
                comm_id,
                target_name,
                data,
                metadata,
                ..
            } => {
                assert_eq!(comm_id, id);
                assert_eq!(target_name, TARGET_NAME);
                assert_eq!(data["state"]["_view_name"], "WidgetView");
                assert_eq!(data["buffer_paths"], json!([]));
                assert_eq!(metadata["version"], "2.0.0");
            }
            other => panic!("expected comm_open, got {other:?}"),
        }
    }

    #[test]
    fn test_open_twice_is_invalid() {
        let (manager, _rx) = CommManager::new();
        let mut transport = Transport::unattached();
        transport.open(&manager, StatePatch::new()).unwrap();

        let err = transport.open(&manager, StatePatch::new()).unwrap_err();
        assert!(matches!(
            err,
            WidgetError::InvalidTransition {
                action: "open",
                state: TransportState::Open
            }
        ));
    }

    #[test]
    fn test_failed_open_falls_back_to_unattached() {
        let (manager, rx) = CommManager::new();
        drop(rx);
        let mut transport = Transport::unattached();

        assert!(transport.open(&manager, StatePatch::new()).is_err());
        assert_eq!(transport.state(), TransportState::Unattached);
        assert!(transport.comm_id().is_none());
    }

    #[test]
    fn test_attached_is_open_without_open_frame() {
        let (manager, mut rx) = CommManager::new();
        let comm = manager.comm(CommId::from("external"), TARGET_NAME);
        let transport = Transport::attached(Box::new(comm), false);

        assert!(transport.is_open());
        assert!(!transport.is_owning());
        assert_eq!(transport.comm_id().map(CommId::as_str), Some("external"));
        assert!(rx.try_recv().is_err());
    }

    // ==================== Close ====================

    #[test]
    fn test_close_sends_once() {
        let (manager, mut rx) = CommManager::new();
        let mut transport = Transport::unattached();
        transport.open(&manager, StatePatch::new()).unwrap();
        let _open = rx.try_recv().unwrap();

        assert!(transport.close().unwrap());
        assert_eq!(transport.state(), TransportState::Closed);
        assert!(matches!(
            rx.try_recv().unwrap(),
            CommMessage::CommClose { .. }
        ));

        assert!(!transport.close().unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_close_unattached_sends_nothing() {
        let mut transport = Transport::unattached();
        assert!(!transport.close().unwrap());
        assert_eq!(transport.state(), TransportState::Closed);
    }

    #[test]
    fn test_drop_closes_owned_comm() {
        let (manager, mut rx) = CommManager::new();
        {
            let mut transport = Transport::unattached();
            transport.open(&manager, StatePatch::new()).unwrap();
        }
        assert!(matches!(rx.try_recv().unwrap(), CommMessage::CommOpen { .. }));
        assert!(matches!(rx.try_recv().unwrap(), CommMessage::CommClose { .. }));
    }

    #[test]
    fn test_drop_leaves_borrowed_comm_open() {
        let (manager, mut rx) = CommManager::new();
        {
            let comm = manager.comm(CommId::from("external"), TARGET_NAME);
            let _transport = Transport::attached(Box::new(comm), false);
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_remote_close_sends_nothing() {
        let (manager, mut rx) = CommManager::new();
        let comm = manager.comm(CommId::from("external"), TARGET_NAME);
        let mut transport = Transport::attached(Box::new(comm), true);

        transport.on_remote_close();
        assert_eq!(transport.state(), TransportState::Closed);
        drop(transport);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_after_close_is_unavailable() {
        let (manager, _rx) = CommManager::new();
        let mut transport = Transport::unattached();
        transport.open(&manager, StatePatch::new()).unwrap();
        transport.close().unwrap();

        let err = transport.send_update(StatePatch::new()).unwrap_err();
        assert!(matches!(
            err,
            WidgetError::ChannelUnavailable {
                state: TransportState::Closed
            }
        ));
    }

    // ==================== Updates ====================

    #[test]
    fn test_update_splits_buffers() {
        let (manager, mut rx) = CommManager::new();
        let comm = manager.comm(CommId::from("c"), TARGET_NAME);
        let transport = Transport::attached(Box::new(comm), false);

        let mut patch = StatePatch::from_value(json!({"value": 3})).unwrap();
        patch.attach(vec!["data".into()], vec![1u8, 2]);
        transport.send_update(patch).unwrap();

        match rx.try_recv().unwrap() {
            CommMessage::CommMsg { data, buffers, .. } => {
                assert_eq!(data["method"], "update");
                assert_eq!(data["state"], json!({"value": 3}));
                assert_eq!(data["buffer_paths"], json!([["data"]]));
                assert_eq!(buffers, vec![vec![1, 2]]);
            }
            other => panic!("expected comm_msg, got {other:?}"),
        }
    }

    // ==================== parse_method ====================

    #[test]
    fn test_parse_method_errors() {
        assert!(matches!(
            parse_method(&json!({"method": "backbone"})),
            Err(WidgetError::UnknownMethod(m)) if m == "backbone"
        ));
        assert!(matches!(
            parse_method(&json!({"method": "update", "state": 5})),
            Err(WidgetError::MalformedMessage(_))
        ));
        assert!(matches!(
            parse_method(&json!({"no_method": true})),
            Err(WidgetError::MalformedMessage(_))
        ));
        assert_eq!(
            parse_method(&json!({"method": "request_state"})).unwrap(),
            WidgetMethod::RequestState
        );
    }
}
