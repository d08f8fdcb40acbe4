//! Property registry: the encode/decode table behind `get_state` and `apply_patch`.
//!
//! Every property contributes one [`PropertyDescriptor`] holding its name plus
//! an encoder and a decoder built from field accessors. The six mandatory
//! protocol properties are registered first, then the concrete widget adds its
//! own through [`Widget::declare`](crate::Widget::declare).
//!
//! ```
//! use widget_core::{Declare, Property, Widget, WidgetObject};
//!
//! struct Counter {
//!     value: Property<i64>,
//! }
//!
//! impl Widget for Counter {
//!     fn declare(props: &mut Declare<'_, Self>) {
//!         props.property(|w| &w.value, |w| &mut w.value);
//!     }
//! }
//!
//! let counter = WidgetObject::new(Counter { value: Property::new("value", 0) }).unwrap();
//! assert_eq!(counter.get_state().unwrap()["value"], 0);
//! ```

use crate::buffers::{BinaryValue, PathSegment};
use crate::error::{Result, WidgetError};
use crate::object::ModelState;
use crate::property::Property;
use crate::protocol::{
    MODEL_MODULE, MODEL_MODULE_VERSION, MODEL_NAME, VIEW_MODULE, VIEW_MODULE_VERSION, VIEW_NAME,
};
use crate::state::{PatchError, PatchErrors, StatePatch};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

type EncodeFn<W> = Box<dyn Fn(&ModelState<W>, &mut StatePatch) -> serde_json::Result<()>>;
type DecodeFn<W> = Box<dyn Fn(&mut ModelState<W>, &StatePatch) -> std::result::Result<(), PatchError>>;

/// Encoder and decoder for one named property.
pub struct PropertyDescriptor<W> {
    name: &'static str,
    binary: bool,
    encode: EncodeFn<W>,
    decode: DecodeFn<W>,
}

impl<W> PropertyDescriptor<W> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the value travels as a buffer rather than JSON.
    pub fn is_binary(&self) -> bool {
        self.binary
    }

    /// Write this property's current value into `patch`.
    pub fn encode(&self, model: &ModelState<W>, patch: &mut StatePatch) -> serde_json::Result<()> {
        (self.encode)(model, patch)
    }

    /// Read this property's entry from `patch` and assign it.
    ///
    /// The value is fully decoded before assignment; on error the property is
    /// left untouched.
    pub fn decode(
        &self,
        model: &mut ModelState<W>,
        patch: &StatePatch,
    ) -> std::result::Result<(), PatchError> {
        (self.decode)(model, patch)
    }
}

/// Ordered table of property descriptors for widget type `W`.
pub struct PropertyRegistry<W> {
    descriptors: Vec<PropertyDescriptor<W>>,
    duplicate: Option<&'static str>,
}

impl<W: 'static> PropertyRegistry<W> {
    /// A registry holding the six mandatory protocol properties.
    pub(crate) fn with_base() -> Self {
        let mut registry = Self {
            descriptors: Vec::new(),
            duplicate: None,
        };
        registry.push_json(
            MODEL_MODULE,
            |m| &m.base.model_module,
            |m| &mut m.base.model_module,
        );
        registry.push_json(
            MODEL_MODULE_VERSION,
            |m| &m.base.model_module_version,
            |m| &mut m.base.model_module_version,
        );
        registry.push_json(MODEL_NAME, |m| &m.base.model_name, |m| &mut m.base.model_name);
        registry.push_json(VIEW_MODULE, |m| &m.base.view_module, |m| &mut m.base.view_module);
        registry.push_json(
            VIEW_MODULE_VERSION,
            |m| &m.base.view_module_version,
            |m| &mut m.base.view_module_version,
        );
        registry.push_json(VIEW_NAME, |m| &m.base.view_name, |m| &mut m.base.view_name);
        registry
    }

    fn push(&mut self, descriptor: PropertyDescriptor<W>) {
        if self.contains(descriptor.name) {
            warn!("Property {} declared more than once", descriptor.name);
            self.duplicate.get_or_insert(descriptor.name);
            return;
        }
        self.descriptors.push(descriptor);
    }

    fn push_json<T, G, M>(&mut self, name: &'static str, get: G, get_mut: M)
    where
        T: Serialize + DeserializeOwned + 'static,
        G: for<'a> Fn(&'a ModelState<W>) -> &'a Property<T> + 'static,
        M: for<'a> Fn(&'a mut ModelState<W>) -> &'a mut Property<T> + 'static,
    {
        let encode: EncodeFn<W> =
            Box::new(move |model: &ModelState<W>, patch: &mut StatePatch| {
                let value = serde_json::to_value(get(model).get())?;
                patch.insert(name, value);
                Ok(())
            });

        let decode: DecodeFn<W> = Box::new(move |model: &mut ModelState<W>, patch: &StatePatch| {
            if let Some(attachment) = patch.buffers_under(name).next() {
                return Err(PatchError::UnexpectedBuffer {
                    path: attachment.path.clone(),
                });
            }
            let raw = patch.get(name).cloned().unwrap_or(Value::Null);
            let value: T = serde_json::from_value(raw).map_err(|source| PatchError::TypeDecode {
                name: name.to_string(),
                source,
            })?;
            get_mut(model).assign(value);
            Ok(())
        });

        self.push(PropertyDescriptor {
            name,
            binary: false,
            encode,
            decode,
        });
    }

    fn push_binary<T, G, M>(&mut self, name: &'static str, get: G, get_mut: M)
    where
        T: BinaryValue + 'static,
        G: for<'a> Fn(&'a ModelState<W>) -> &'a Property<T> + 'static,
        M: for<'a> Fn(&'a mut ModelState<W>) -> &'a mut Property<T> + 'static,
    {
        let encode: EncodeFn<W> =
            Box::new(move |model: &ModelState<W>, patch: &mut StatePatch| {
                match get(model).get().buffer() {
                    Some(buffer) => patch.attach(vec![PathSegment::from(name)], buffer.clone()),
                    None => {
                        patch.insert(name, Value::Null);
                    }
                }
                Ok(())
            });

        let decode: DecodeFn<W> = Box::new(move |model: &mut ModelState<W>, patch: &StatePatch| {
            if let Some(nested) = patch.buffers_under(name).find(|b| b.path.len() != 1) {
                return Err(PatchError::UnexpectedBuffer {
                    path: nested.path.clone(),
                });
            }
            let buffer = patch.buffer_at(&[PathSegment::from(name)]);
            let value = T::from_wire(name, patch.get(name), buffer)?;
            get_mut(model).assign(value);
            Ok(())
        });

        self.push(PropertyDescriptor {
            name,
            binary: true,
            encode,
            decode,
        });
    }

    pub(crate) fn duplicate(&self) -> Option<&'static str> {
        self.duplicate
    }

    pub fn get(&self, name: &str) -> Option<&PropertyDescriptor<W>> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Property names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.descriptors.iter().map(|d| d.name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PropertyDescriptor<W>> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Encode every registered property.
    ///
    /// Buffers follow declaration order. The JSON map keeps its keys sorted by
    /// name regardless.
    pub fn encode_all(&self, model: &ModelState<W>) -> serde_json::Result<StatePatch> {
        let mut patch = StatePatch::new();
        for descriptor in &self.descriptors {
            descriptor.encode(model, &mut patch)?;
        }
        Ok(patch)
    }

    /// Encode the named properties only.
    pub fn encode_keys(&self, model: &ModelState<W>, names: &[&str]) -> Result<StatePatch> {
        let mut patch = StatePatch::new();
        for name in names {
            let descriptor = self.get(name).ok_or_else(|| {
                WidgetError::Patch(PatchErrors::from(PatchError::UnknownProperty {
                    name: name.to_string(),
                }))
            })?;
            descriptor.encode(model, &mut patch)?;
        }
        Ok(patch)
    }
}

/// Declaration context handed to [`Widget::declare`](crate::Widget::declare).
///
/// Names are read from the widget's `Property` values, so a property is
/// declared by its accessors alone.
pub struct Declare<'a, W> {
    widget: &'a W,
    registry: &'a mut PropertyRegistry<W>,
}

impl<'a, W: 'static> Declare<'a, W> {
    pub(crate) fn new(widget: &'a W, registry: &'a mut PropertyRegistry<W>) -> Self {
        Self { widget, registry }
    }

    /// Declare a JSON-encoded property.
    pub fn property<T>(
        &mut self,
        get: fn(&W) -> &Property<T>,
        get_mut: fn(&mut W) -> &mut Property<T>,
    ) -> &mut Self
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        let name = get(self.widget).name();
        self.registry
            .push_json(name, move |m| get(&m.widget), move |m| get_mut(&mut m.widget));
        self
    }

    /// Declare a property whose value travels as a binary buffer.
    pub fn binary<T>(
        &mut self,
        get: fn(&W) -> &Property<T>,
        get_mut: fn(&mut W) -> &mut Property<T>,
    ) -> &mut Self
    where
        T: BinaryValue + 'static,
    {
        let name = get(self.widget).name();
        self.registry
            .push_binary(name, move |m| get(&m.widget), move |m| get_mut(&mut m.widget));
        self
    }
}
