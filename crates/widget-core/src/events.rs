//! Event infrastructure for widget objects.
//!
//! Provides `WidgetEvent` for observers and monitoring, and `EventBus` for
//! subscriptions. Widgets live on a single logical thread, so the bus is
//! `Rc` + `RefCell` based and not `Send`.

use crate::comm::CommId;
use crate::property::Origin;
use serde::Serialize;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identity of a widget object.
///
/// Stamped into every event the object emits, so subscribers on a shared bus
/// can tell widgets apart even before they have a comm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ObjectId(u64);

impl ObjectId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Events emitted by a widget object.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WidgetEvent {
    /// A property was assigned (fired even when the value did not change).
    PropertyChanged {
        #[serde(rename = "objectId")]
        object: ObjectId,
        /// Comm of the widget, if attached.
        #[serde(rename = "commId")]
        comm_id: Option<CommId>,
        /// Protocol name of the property.
        name: String,
        /// New value, JSON encoded (`null` for absent and for binary values).
        value: Value,
        /// Whether the change was made locally or applied from the front end.
        origin: Origin,
    },
    /// A comm message was handed to the runtime.
    MessageSent {
        #[serde(rename = "objectId")]
        object: ObjectId,
        #[serde(rename = "commId")]
        comm_id: CommId,
        /// Widget method (`update`, `display`, ...) or frame type for open/close.
        method: String,
    },
    /// A comm message from the front end was processed.
    MessageReceived {
        #[serde(rename = "objectId")]
        object: ObjectId,
        #[serde(rename = "commId")]
        comm_id: CommId,
        method: String,
    },
    /// Some keys of an inbound patch could not be applied.
    PatchRejected {
        #[serde(rename = "objectId")]
        object: ObjectId,
        #[serde(rename = "commId")]
        comm_id: Option<CommId>,
        /// Rendered error per rejected key.
        errors: Vec<String>,
    },
    /// The widget's comm was closed.
    Closed {
        #[serde(rename = "objectId")]
        object: ObjectId,
        #[serde(rename = "commId")]
        comm_id: CommId,
        /// True if the front end closed the comm.
        remote: bool,
    },
}

impl WidgetEvent {
    /// The widget object that emitted this event.
    pub fn object(&self) -> ObjectId {
        match self {
            Self::PropertyChanged { object, .. }
            | Self::MessageSent { object, .. }
            | Self::MessageReceived { object, .. }
            | Self::PatchRejected { object, .. }
            | Self::Closed { object, .. } => *object,
        }
    }
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Rc<dyn Fn(&WidgetEvent)>;

/// Event bus for publishing widget events to subscribers.
///
/// Wrap in `Rc` to enable subscriptions.
#[derive(Default)]
pub struct EventBus {
    callbacks: RefCell<Vec<(usize, Callback)>>,
    next_id: Cell<usize>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(self: &Rc<Self>, callback: impl Fn(&WidgetEvent) + 'static) -> Subscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.callbacks.borrow_mut().push((id, Rc::new(callback)));
        Subscription {
            bus: Rc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_borrow_mut: a subscription dropped from inside a callback must not panic
        if let Ok(mut callbacks) = self.callbacks.try_borrow_mut() {
            callbacks.retain(|(i, _)| *i != id);
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.callbacks.borrow().len()
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: WidgetEvent) {
        // Clone the callback list so a callback may subscribe without a borrow panic.
        let callbacks: Vec<_> = self
            .callbacks
            .borrow()
            .iter()
            .map(|(_, cb)| Rc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(&event);
        }
    }
}
