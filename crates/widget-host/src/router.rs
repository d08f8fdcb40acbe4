//! Comm routing: one handler per comm id.
//!
//! The router owns every live widget, delivers inbound frames to the widget
//! behind their comm id and adopts widgets the front end opens (when allowed).

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};
use widget_core::buffers::join_buffers;
use widget_core::protocol::{is_compatible_version, OpenData, TARGET_NAME};
use widget_core::{
    BaseWidget, CommHandler, CommId, CommManager, CommMessage, PatchErrors, StatePatch, Widget,
    WidgetError, WidgetObject,
};

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("comm {0} is already registered")]
    DuplicateComm(CommId),

    #[error("widget has no comm to route")]
    Unattached,

    #[error("no widget for comm {0}")]
    UnknownComm(CommId),

    #[error("unsupported comm target `{0}`")]
    UnsupportedTarget(String),

    #[error("front-end opened comm {0} refused: remote opens are disabled")]
    RemoteOpenDisabled(CommId),

    #[error(transparent)]
    Widget(#[from] WidgetError),
}

/// Routes comm frames to the widgets that own them.
pub struct CommRouter {
    handlers: HashMap<CommId, Box<dyn CommHandler>>,
    manager: CommManager,
    accept_remote: bool,
}

impl CommRouter {
    pub fn new(manager: CommManager, accept_remote: bool) -> Self {
        Self {
            handlers: HashMap::new(),
            manager,
            accept_remote,
        }
    }

    pub fn manager(&self) -> &CommManager {
        &self.manager
    }

    /// Take ownership of a widget with a comm.
    ///
    /// A rejected handler is dropped.
    pub fn register(&mut self, handler: Box<dyn CommHandler>) -> Result<CommId, RouterError> {
        let comm_id = handler.comm_id().cloned().ok_or(RouterError::Unattached)?;
        if self.handlers.contains_key(&comm_id) {
            return Err(RouterError::DuplicateComm(comm_id));
        }

        debug!("Registered comm {} ({} live)", comm_id, self.handlers.len() + 1);
        self.handlers.insert(comm_id.clone(), handler);
        Ok(comm_id)
    }

    /// Open a widget on a fresh comm and register it.
    pub fn open_widget<W: Widget>(&mut self, widget: W, display: bool) -> Result<CommId, RouterError> {
        let object = WidgetObject::open(widget, &self.manager)?;
        if display {
            object.display()?;
        }
        self.register(Box::new(object))
    }

    /// Deliver one inbound frame.
    ///
    /// Errors never close the widget; the caller logs and moves on.
    pub fn dispatch(&mut self, frame: CommMessage) -> Result<(), RouterError> {
        match frame {
            CommMessage::CommOpen {
                comm_id,
                target_name,
                data,
                metadata,
                buffers,
            } => self.on_remote_open(comm_id, target_name, data, &metadata, buffers),

            CommMessage::CommMsg {
                comm_id,
                data,
                buffers,
                ..
            } => {
                let handler = self
                    .handlers
                    .get_mut(&comm_id)
                    .ok_or_else(|| RouterError::UnknownComm(comm_id.clone()))?;
                handler.handle_message(&data, buffers)?;
                Ok(())
            }

            CommMessage::CommClose { comm_id, .. } => {
                let mut handler = self
                    .handlers
                    .remove(&comm_id)
                    .ok_or_else(|| RouterError::UnknownComm(comm_id.clone()))?;
                handler.handle_close();
                info!("Comm {} closed by front end", comm_id);
                Ok(())
            }
        }
    }

    fn on_remote_open(
        &mut self,
        comm_id: CommId,
        target_name: String,
        data: Value,
        metadata: &Value,
        buffers: Vec<Vec<u8>>,
    ) -> Result<(), RouterError> {
        if target_name != TARGET_NAME {
            return Err(RouterError::UnsupportedTarget(target_name));
        }
        if !self.accept_remote {
            return Err(RouterError::RemoteOpenDisabled(comm_id));
        }
        if self.handlers.contains_key(&comm_id) {
            return Err(RouterError::DuplicateComm(comm_id));
        }

        let version = metadata.get("version").and_then(Value::as_str);
        if !is_compatible_version(version) {
            warn!(
                "Comm {} opened with protocol version {:?}, continuing anyway",
                comm_id, version
            );
        }

        let open: OpenData = serde_json::from_value(data)
            .map_err(|e| WidgetError::MalformedMessage(e.to_string()))?;
        let attachments = join_buffers(open.buffer_paths, buffers)
            .map_err(|e| WidgetError::Patch(PatchErrors::from(e)))?;

        let comm = self.manager.comm(comm_id.clone(), &target_name);
        let mut object = WidgetObject::attached(BaseWidget, Box::new(comm), false)?;
        if let Err(e) = object.receive_patch(&StatePatch::from_parts(open.state, attachments)) {
            warn!("Comm {} opened with partly rejected state: {}", comm_id, e);
        }

        self.register(Box::new(object))?;
        info!("Adopted widget on comm {} opened by front end", comm_id);
        Ok(())
    }

    /// Close every widget. Returns how many were closed.
    pub fn close_all(&mut self) -> usize {
        let mut closed = 0;
        for (comm_id, mut handler) in self.handlers.drain() {
            match handler.close() {
                Ok(()) => closed += 1,
                Err(e) => warn!("Failed to close comm {}: {}", comm_id, e),
            }
        }
        closed
    }

    pub fn handler(&self, comm_id: &CommId) -> Option<&dyn CommHandler> {
        self.handlers.get(comm_id).map(|handler| &**handler)
    }

    pub fn contains(&self, comm_id: &CommId) -> bool {
        self.handlers.contains_key(comm_id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
