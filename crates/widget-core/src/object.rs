//! Widget objects: typed model state bound to a comm.
//!
//! A [`WidgetObject`] owns the model (`ModelState`: the six mandatory protocol
//! properties plus the concrete widget's own), the property registry built
//! from [`Widget::declare`], the [`Transport`] and an [`EventBus`].
//!
//! Every local assignment goes through [`WidgetObject::set`]: the change is
//! published as a [`WidgetEvent::PropertyChanged`] and, when the comm is open,
//! sent as a one-key `update`. Values applied from the front end are published
//! with [`Origin::Remote`] and never echoed back.

use crate::buffers::{join_buffers, Buffer};
use crate::comm::{Comm, CommFactory, CommId};
use crate::error::{Result, WidgetError};
use crate::events::{EventBus, ObjectId, Subscription, WidgetEvent};
use crate::property::{Origin, Property};
use crate::protocol::{
    view_mime_bundle, WidgetMethod, BASE_MODEL_NAME, BASE_MODULE, BASE_MODULE_VERSION,
    BASE_VIEW_NAME, MODEL_MODULE, MODEL_MODULE_VERSION, MODEL_NAME, VIEW_MODULE,
    VIEW_MODULE_VERSION, VIEW_NAME,
};
use crate::registry::{Declare, PropertyRegistry};
use crate::state::{PatchError, PatchErrors, StatePatch};
use crate::transport::{parse_method, Transport, TransportState};
use serde_json::Value;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, info, warn};

/// The six properties every widget carries.
///
/// All are optional strings; `None` goes over the wire as `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseProperties {
    pub model_module: Property<Option<String>>,
    pub model_module_version: Property<Option<String>>,
    pub model_name: Property<Option<String>>,
    pub view_module: Property<Option<String>>,
    pub view_module_version: Property<Option<String>>,
    pub view_name: Property<Option<String>>,
}

impl Default for BaseProperties {
    fn default() -> Self {
        let some = |s: &str| Some(s.to_string());
        Self {
            model_module: Property::new(MODEL_MODULE, some(BASE_MODULE)),
            model_module_version: Property::new(MODEL_MODULE_VERSION, some(BASE_MODULE_VERSION)),
            model_name: Property::new(MODEL_NAME, some(BASE_MODEL_NAME)),
            view_module: Property::new(VIEW_MODULE, some(BASE_MODULE)),
            view_module_version: Property::new(VIEW_MODULE_VERSION, some(BASE_MODULE_VERSION)),
            view_name: Property::new(VIEW_NAME, some(BASE_VIEW_NAME)),
        }
    }
}

/// A concrete widget type.
///
/// Implementors hold their own [`Property`] fields and list them in
/// [`declare`](Self::declare). Everything else has a default.
pub trait Widget: Sized + 'static {
    /// Register the widget's own properties. Declaration order is buffer order.
    fn declare(_props: &mut Declare<'_, Self>) {}

    /// Override defaults of the mandatory properties, typically the model and
    /// view names of a front-end implementation.
    fn base_defaults(_base: &mut BaseProperties) {}

    /// Handle a `custom` message from the front end.
    fn handle_custom(&mut self, content: &Value, buffers: &[Buffer]) {
        debug!(
            "Ignoring custom message ({} buffer(s)): {}",
            buffers.len(),
            content
        );
    }
}

/// A widget with only the mandatory properties.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaseWidget;

impl Widget for BaseWidget {}

/// The full model of a widget: mandatory properties plus the widget's own.
#[derive(Debug, Clone, Default)]
pub struct ModelState<W> {
    pub base: BaseProperties,
    pub widget: W,
}

/// A widget model synchronised over a comm.
pub struct WidgetObject<W: Widget> {
    model: ModelState<W>,
    registry: PropertyRegistry<W>,
    transport: Transport,
    events: Rc<EventBus>,
    id: ObjectId,
}

impl<W: Widget> WidgetObject<W> {
    /// Create an unattached widget. Changes stay local until a comm is opened.
    pub fn new(widget: W) -> Result<Self> {
        let (model, registry) = Self::build(widget)?;
        Ok(Self {
            model,
            registry,
            transport: Transport::unattached(),
            events: Rc::new(EventBus::new()),
            id: ObjectId::next(),
        })
    }

    /// Wrap a comm the front end already opened.
    ///
    /// With `owning` set the widget closes the comm when dropped.
    pub fn attached(widget: W, comm: Box<dyn Comm>, owning: bool) -> Result<Self> {
        let (model, registry) = Self::build(widget)?;
        Ok(Self {
            model,
            registry,
            transport: Transport::attached(comm, owning),
            events: Rc::new(EventBus::new()),
            id: ObjectId::next(),
        })
    }

    /// Create a widget and open its own comm right away.
    pub fn open(widget: W, factory: &dyn CommFactory) -> Result<Self> {
        let mut object = Self::new(widget)?;
        object.open_comm(factory)?;
        Ok(object)
    }

    fn build(widget: W) -> Result<(ModelState<W>, PropertyRegistry<W>)> {
        let mut base = BaseProperties::default();
        W::base_defaults(&mut base);

        let mut registry = PropertyRegistry::with_base();
        W::declare(&mut Declare::new(&widget, &mut registry));
        if let Some(name) = registry.duplicate() {
            return Err(WidgetError::DuplicateProperty { name });
        }

        Ok((ModelState { base, widget }, registry))
    }

    /// Share an event bus with other widgets (e.g. one host-wide bus).
    ///
    /// `subscribe` and `observe` still only see this widget's events; subscribe
    /// on the bus itself to see every widget's.
    pub fn with_event_bus(mut self, events: Rc<EventBus>) -> Self {
        self.events = events;
        self
    }

    // ==================== Lifecycle ====================

    /// Open a comm announcing the full current state.
    pub fn open_comm(&mut self, factory: &dyn CommFactory) -> Result<CommId> {
        let state = self.get_state()?;
        let comm_id = self.transport.open(factory, state)?.clone();
        info!(
            "Opened widget {} ({})",
            comm_id,
            self.model.base.model_name.get().as_deref().unwrap_or("unnamed")
        );
        self.emit_sent(&comm_id, "comm_open");
        Ok(comm_id)
    }

    /// Close the comm. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        let comm_id = self.transport.comm_id().cloned();
        let sent = self.transport.close()?;
        if let (true, Some(comm_id)) = (sent, comm_id) {
            info!("Closed widget {}", comm_id);
            self.events.emit(WidgetEvent::Closed {
                object: self.id,
                comm_id,
                remote: false,
            });
        }
        Ok(())
    }

    /// Process-unique identity stamped into this widget's events.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn comm_id(&self) -> Option<&CommId> {
        self.transport.comm_id()
    }

    pub fn transport_state(&self) -> TransportState {
        self.transport.state()
    }

    // ==================== Model access ====================

    pub fn model(&self) -> &ModelState<W> {
        &self.model
    }

    pub fn base(&self) -> &BaseProperties {
        &self.model.base
    }

    pub fn widget(&self) -> &W {
        &self.model.widget
    }

    pub fn registry(&self) -> &PropertyRegistry<W> {
        &self.registry
    }

    pub fn events(&self) -> &Rc<EventBus> {
        &self.events
    }

    /// Current value of a property.
    ///
    /// ```ignore
    /// let value = slider.get(|m| &m.widget.value);
    /// ```
    pub fn get<T, F>(&self, field: F) -> &T
    where
        F: FnOnce(&ModelState<W>) -> &Property<T>,
    {
        field(&self.model).get()
    }

    // ==================== State ====================

    /// Encode every registered property. JSON keys come out sorted by name.
    pub fn get_state(&self) -> Result<StatePatch> {
        Ok(self.registry.encode_all(&self.model)?)
    }

    /// Encode the named properties only. Unknown names are an error.
    pub fn get_state_keys(&self, names: &[&str]) -> Result<StatePatch> {
        self.registry.encode_keys(&self.model, names)
    }

    /// Apply a patch as a local change: observers fire and each applied key is
    /// sent to the front end.
    pub fn apply_patch(&mut self, patch: &StatePatch) -> std::result::Result<(), PatchErrors> {
        self.apply_patch_from(patch, Origin::Local)
    }

    /// Apply a patch that came from the front end. Nothing is echoed back.
    pub fn receive_patch(&mut self, patch: &StatePatch) -> std::result::Result<(), PatchErrors> {
        self.apply_patch_from(patch, Origin::Remote)
    }

    /// Best-effort application: every key that decodes is assigned, the rest
    /// are collected into the returned error.
    fn apply_patch_from(
        &mut self,
        patch: &StatePatch,
        origin: Origin,
    ) -> std::result::Result<(), PatchErrors> {
        let mut errors: Vec<PatchError> = patch
            .unrooted_buffers()
            .map(|b| PatchError::InvalidBufferPath {
                path: b.path.clone(),
            })
            .collect();

        for key in patch.keys() {
            let applied = match self.registry.get(key) {
                Some(descriptor) => descriptor
                    .decode(&mut self.model, patch)
                    .map(|()| descriptor.name()),
                None => Err(PatchError::UnknownProperty {
                    name: key.to_string(),
                }),
            };

            match applied {
                Ok(name) => self.notify(name, origin),
                Err(e) => {
                    warn!("Rejected {} patch key {}: {}", origin, key, e);
                    errors.push(e);
                }
            }
        }

        if errors.is_empty() {
            return Ok(());
        }

        let errors = PatchErrors::new(errors);
        self.emit_rejected(&errors);
        Err(errors)
    }

    // ==================== Mutation ====================

    /// Assign a property and sync the change.
    ///
    /// ```ignore
    /// slider.set(|m| &mut m.widget.value, 5);
    /// slider.set(|m| &mut m.base.view_name, None);
    /// ```
    pub fn set<T, F>(&mut self, field: F, value: T)
    where
        F: FnOnce(&mut ModelState<W>) -> &mut Property<T>,
    {
        let property = field(&mut self.model);
        property.assign(value);
        let name = property.name();
        self.notify(name, Origin::Local);
    }

    /// Restore a property's declared default and sync the change.
    pub fn reset<T, F>(&mut self, field: F)
    where
        T: Clone,
        F: FnOnce(&mut ModelState<W>) -> &mut Property<T>,
    {
        let property = field(&mut self.model);
        property.restore_default();
        let name = property.name();
        self.notify(name, Origin::Local);
    }

    /// Re-announce a property without changing it.
    pub fn touch(&mut self, name: &str) -> Result<()> {
        let descriptor = self.registry.get(name).ok_or_else(|| {
            WidgetError::Patch(PatchErrors::from(PatchError::UnknownProperty {
                name: name.to_string(),
            }))
        })?;
        let name = descriptor.name();
        self.notify(name, Origin::Local);
        Ok(())
    }

    fn notify(&mut self, name: &'static str, origin: Origin) {
        let patch = match self.registry.encode_keys(&self.model, &[name]) {
            Ok(patch) => patch,
            Err(e) => {
                warn!("Cannot encode property {}: {}", name, e);
                return;
            }
        };

        self.events.emit(WidgetEvent::PropertyChanged {
            object: self.id,
            comm_id: self.transport.comm_id().cloned(),
            name: name.to_string(),
            value: patch[name].clone(),
            origin,
        });

        if origin == Origin::Remote {
            return;
        }

        match (self.transport.state(), self.transport.comm_id().cloned()) {
            (TransportState::Open, Some(comm_id)) => match self.transport.send_update(patch) {
                Ok(()) => self.emit_sent(&comm_id, "update"),
                Err(e) => warn!("Failed to sync property {} on {}: {}", name, comm_id, e),
            },
            (state, _) => debug!("Property {} changed while {}, kept local", name, state),
        }
    }

    // ==================== Outbound messages ====================

    /// Send the full state as one `update`.
    pub fn send_state(&self) -> Result<()> {
        let state = self.get_state()?;
        self.transport.send_update(state)?;
        self.emit_sent_current("update");
        Ok(())
    }

    /// Ask the front end to render a view.
    pub fn display(&self) -> Result<()> {
        self.transport.send_method(&WidgetMethod::Display, Vec::new())?;
        self.emit_sent_current("display");
        Ok(())
    }

    /// Open a comm if there is none yet, then display.
    pub fn show(&mut self, factory: &dyn CommFactory) -> Result<()> {
        if self.transport.state() == TransportState::Unattached {
            self.open_comm(factory)?;
        }
        self.display()
    }

    /// Send a `custom` message with optional buffers.
    pub fn send_custom(&self, content: Value, buffers: Vec<Buffer>) -> Result<()> {
        let buffers = buffers.into_iter().map(Buffer::into_vec).collect();
        self.transport
            .send_method(&WidgetMethod::Custom { content }, buffers)?;
        self.emit_sent_current("custom");
        Ok(())
    }

    /// MIME bundle a front end renders as a view of this widget.
    pub fn mime_bundle(&self) -> Result<Value> {
        self.transport
            .comm_id()
            .map(view_mime_bundle)
            .ok_or(WidgetError::ChannelUnavailable {
                state: self.transport.state(),
            })
    }

    fn emit_sent(&self, comm_id: &CommId, method: &str) {
        self.events.emit(WidgetEvent::MessageSent {
            object: self.id,
            comm_id: comm_id.clone(),
            method: method.to_string(),
        });
    }

    fn emit_rejected(&self, errors: &PatchErrors) {
        self.events.emit(WidgetEvent::PatchRejected {
            object: self.id,
            comm_id: self.transport.comm_id().cloned(),
            errors: errors.errors().iter().map(ToString::to_string).collect(),
        });
    }

    fn emit_sent_current(&self, method: &str) {
        if let Some(comm_id) = self.transport.comm_id() {
            self.emit_sent(comm_id, method);
        }
    }

    // ==================== Observation ====================

    /// Subscribe to all events of this widget.
    pub fn subscribe(&self, callback: impl Fn(&WidgetEvent) + 'static) -> Subscription {
        let id = self.id;
        self.events.subscribe(move |event| {
            if event.object() == id {
                callback(event);
            }
        })
    }

    /// Call `callback` with the new JSON value whenever property `name` is assigned.
    pub fn observe(
        &self,
        name: impl Into<String>,
        callback: impl Fn(&Value, Origin) + 'static,
    ) -> Subscription {
        let name = name.into();
        let id = self.id;
        self.events.subscribe(move |event| {
            if let WidgetEvent::PropertyChanged {
                object,
                name: changed,
                value,
                origin,
                ..
            } = event
            {
                if *object == id && *changed == name {
                    callback(value, *origin);
                }
            }
        })
    }

    // ==================== Inbound messages ====================

    /// Handle the data of a `comm_msg` addressed to this widget.
    pub fn handle_comm_msg(&mut self, data: &Value, buffers: Vec<Vec<u8>>) -> Result<()> {
        let comm_id = match (self.transport.state(), self.transport.comm_id()) {
            (TransportState::Open, Some(comm_id)) => comm_id.clone(),
            (state, _) => return Err(WidgetError::ChannelUnavailable { state }),
        };

        let method = parse_method(data)?;
        debug!("Comm {} received {}", comm_id, method.name());
        self.events.emit(WidgetEvent::MessageReceived {
            object: self.id,
            comm_id: comm_id.clone(),
            method: method.name().to_string(),
        });

        match method {
            WidgetMethod::Update {
                state,
                buffer_paths,
            } => {
                let attachments = match join_buffers(buffer_paths, buffers) {
                    Ok(attachments) => attachments,
                    Err(e) => {
                        warn!("Rejected update on comm {}: {}", comm_id, e);
                        let errors = PatchErrors::from(e);
                        self.emit_rejected(&errors);
                        return Err(errors.into());
                    }
                };
                self.receive_patch(&StatePatch::from_parts(state, attachments))?;
            }
            WidgetMethod::RequestState => self.send_state()?,
            WidgetMethod::Custom { content } => {
                let buffers: Vec<Buffer> = buffers.into_iter().map(Buffer::from).collect();
                self.model.widget.handle_custom(&content, &buffers);
            }
            WidgetMethod::Display => {
                return Err(WidgetError::UnknownMethod("display".to_string()));
            }
        }
        Ok(())
    }

    /// The front end closed the comm.
    pub fn handle_comm_close(&mut self) {
        let comm_id = self.transport.comm_id().cloned();
        self.transport.on_remote_close();
        if let Some(comm_id) = comm_id {
            info!("Widget {} closed by front end", comm_id);
            self.events.emit(WidgetEvent::Closed {
                object: self.id,
                comm_id,
                remote: true,
            });
        }
    }
}

impl<W: Widget> fmt::Debug for WidgetObject<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WidgetObject")
            .field("model_name", self.model.base.model_name.get())
            .field("transport", &self.transport)
            .field("properties", &self.registry.names().collect::<Vec<_>>())
            .finish()
    }
}

/// Type-erased view of a widget for code that routes comm traffic.
pub trait CommHandler {
    fn comm_id(&self) -> Option<&CommId>;

    fn transport_state(&self) -> TransportState;

    fn handle_message(&mut self, data: &Value, buffers: Vec<Vec<u8>>) -> Result<()>;

    fn handle_close(&mut self);

    /// Apply state received from the front end (e.g. a `comm_open` payload).
    fn receive_state(&mut self, patch: &StatePatch) -> std::result::Result<(), PatchErrors>;

    fn state(&self) -> Result<StatePatch>;

    fn display(&self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

impl<W: Widget> CommHandler for WidgetObject<W> {
    fn comm_id(&self) -> Option<&CommId> {
        WidgetObject::comm_id(self)
    }

    fn transport_state(&self) -> TransportState {
        WidgetObject::transport_state(self)
    }

    fn handle_message(&mut self, data: &Value, buffers: Vec<Vec<u8>>) -> Result<()> {
        self.handle_comm_msg(data, buffers)
    }

    fn handle_close(&mut self) {
        self.handle_comm_close()
    }

    fn receive_state(&mut self, patch: &StatePatch) -> std::result::Result<(), PatchErrors> {
        self.receive_patch(patch)
    }

    fn state(&self) -> Result<StatePatch> {
        self.get_state()
    }

    fn display(&self) -> Result<()> {
        WidgetObject::display(self)
    }

    fn close(&mut self) -> Result<()> {
        WidgetObject::close(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::CommManager;
    use crate::protocol::{CommMessage, MANDATORY_KEYS};
    use serde_json::json;
    use std::cell::RefCell;

    struct Slider {
        value: Property<i64>,
        label: Property<Option<String>>,
    }

    impl Slider {
        fn new() -> Self {
            Self {
                value: Property::new("value", 0),
                label: Property::new("label", None),
            }
        }
    }

    impl Widget for Slider {
        fn declare(props: &mut Declare<'_, Self>) {
            props
                .property(|w| &w.value, |w| &mut w.value)
                .property(|w| &w.label, |w| &mut w.label);
        }

        fn base_defaults(base: &mut BaseProperties) {
            base.model_name.set_default(Some("SliderModel".into()));
            base.view_name.set_default(Some("SliderView".into()));
        }
    }

    struct Twice {
        value: Property<i64>,
    }

    impl Widget for Twice {
        fn declare(props: &mut Declare<'_, Self>) {
            props
                .property(|w| &w.value, |w| &mut w.value)
                .property(|w| &w.value, |w| &mut w.value);
        }
    }

    #[test]
    fn test_base_widget_state_has_mandatory_keys() {
        let widget = WidgetObject::new(BaseWidget).unwrap();
        let state = widget.get_state().unwrap();

        assert_eq!(state.keys(), MANDATORY_KEYS.to_vec());
        assert_eq!(state["_model_module"], "@jupyter-widgets/base");
        assert_eq!(state["_model_name"], "WidgetModel");
        assert_eq!(state["_view_name"], "WidgetView");
    }

    #[test]
    fn test_base_defaults_override() {
        let slider = WidgetObject::new(Slider::new()).unwrap();
        let state = slider.get_state().unwrap();

        assert_eq!(state["_model_name"], "SliderModel");
        assert_eq!(state["_view_name"], "SliderView");
        assert_eq!(state["value"], 0);
        assert_eq!(state["label"], Value::Null);
    }

    #[test]
    fn test_duplicate_declaration_rejected() {
        let err = WidgetObject::new(Twice {
            value: Property::new("value", 0),
        })
        .unwrap_err();
        assert!(matches!(err, WidgetError::DuplicateProperty { name: "value" }));
    }

    #[test]
    fn test_set_while_unattached_stays_local() {
        let mut slider = WidgetObject::new(Slider::new()).unwrap();
        slider.set(|m| &mut m.widget.value, 7);

        assert_eq!(*slider.get(|m| &m.widget.value), 7);
        assert_eq!(slider.transport_state(), TransportState::Unattached);
    }

    #[test]
    fn test_open_then_set_sends_single_key_update() {
        let (manager, mut rx) = CommManager::new();
        let mut slider = WidgetObject::open(Slider::new(), &manager).unwrap();
        assert!(matches!(rx.try_recv().unwrap(), CommMessage::CommOpen { .. }));

        slider.set(|m| &mut m.widget.value, 3);

        match rx.try_recv().unwrap() {
            CommMessage::CommMsg { data, .. } => {
                assert_eq!(data, json!({"method": "update", "state": {"value": 3}, "buffer_paths": []}));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn test_observer_sees_local_and_remote() {
        let (manager, mut rx) = CommManager::new();
        let mut slider = WidgetObject::open(Slider::new(), &manager).unwrap();
        rx.try_recv().unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        let _sub = slider.observe("value", move |value, origin| {
            seen_clone.borrow_mut().push((value.clone(), origin));
        });

        slider.set(|m| &mut m.widget.value, 1);
        slider
            .handle_comm_msg(&json!({"method": "update", "state": {"value": 2}}), vec![])
            .unwrap();

        assert_eq!(
            *seen.borrow(),
            vec![(json!(1), Origin::Local), (json!(2), Origin::Remote)]
        );
        // one update for the local change, none for the remote one
        assert!(matches!(rx.try_recv().unwrap(), CommMessage::CommMsg { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_reset_restores_default() {
        let mut slider = WidgetObject::new(Slider::new()).unwrap();
        slider.set(|m| &mut m.widget.label, Some("x".into()));
        slider.reset(|m| &mut m.widget.label);

        assert!(slider.widget().label.is_absent());
    }

    #[test]
    fn test_touch_unknown_property() {
        let mut slider = WidgetObject::new(Slider::new()).unwrap();
        assert!(slider.touch("value").is_ok());
        assert!(matches!(slider.touch("missing"), Err(WidgetError::Patch(_))));
    }

    #[test]
    fn test_mime_bundle_requires_comm() {
        let (manager, _rx) = CommManager::new();
        let mut widget = WidgetObject::new(BaseWidget).unwrap();
        assert!(widget.mime_bundle().is_err());

        let comm_id = widget.open_comm(&manager).unwrap();
        let bundle = widget.mime_bundle().unwrap();
        assert_eq!(
            bundle["application/vnd.jupyter.widget-view+json"]["model_id"],
            comm_id.as_str()
        );
    }

    #[test]
    fn test_debug_lists_properties() {
        let slider = WidgetObject::new(Slider::new()).unwrap();
        let rendered = format!("{slider:?}");
        assert!(rendered.contains("SliderModel"));
        assert!(rendered.contains("\"value\""));
    }
}
