//! Typed widget properties.
//!
//! A [`Property`] pairs a protocol name with a declared default and a current
//! value. Optional properties are `Property<Option<T>>`, where `None` is the
//! absent state and travels as JSON `null`.
//!
//! Assignment is crate-private: every change goes through
//! [`WidgetObject`](crate::WidgetObject) so that change notification and
//! outbound sync cannot be bypassed.

use serde::Serialize;
use std::fmt;

/// Where a property change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Origin {
    /// Kernel-side code assigned the value. Local changes are sent to the front end.
    Local,
    /// The value was applied from an inbound patch. Remote changes are never echoed.
    Remote,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

/// A named, typed widget attribute with a declared default.
#[derive(Debug, Clone, PartialEq)]
pub struct Property<T> {
    name: &'static str,
    default: T,
    value: T,
}

impl<T: Clone> Property<T> {
    /// Create a property whose current value starts at `default`.
    pub fn new(name: &'static str, default: T) -> Self {
        Self {
            name,
            value: default.clone(),
            default,
        }
    }

    /// Replace the declared default and reset the current value to it.
    ///
    /// Intended for construction time (see [`Widget::base_defaults`](crate::Widget::base_defaults)).
    /// Does not notify.
    pub fn set_default(&mut self, default: T) {
        self.value = default.clone();
        self.default = default;
    }

    pub(crate) fn restore_default(&mut self) {
        self.value = self.default.clone();
    }
}

impl<T> Property<T> {
    /// Protocol name of this property (the key used in state patches).
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current value.
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Declared default value.
    pub fn default_value(&self) -> &T {
        &self.default
    }

    pub(crate) fn assign(&mut self, value: T) {
        self.value = value;
    }
}

impl<T: PartialEq> Property<T> {
    /// Whether the current value equals the declared default.
    pub fn is_default(&self) -> bool {
        self.value == self.default
    }
}

impl<T> Property<Option<T>> {
    /// Whether the property is in the absent state.
    pub fn is_absent(&self) -> bool {
        self.value.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_starts_at_default() {
        let prop = Property::new("value", 42);
        assert_eq!(prop.name(), "value");
        assert_eq!(*prop.get(), 42);
        assert_eq!(*prop.default_value(), 42);
        assert!(prop.is_default());
    }

    #[test]
    fn test_assign_and_restore() {
        let mut prop = Property::new("value", 1);
        prop.assign(5);
        assert_eq!(*prop.get(), 5);
        assert!(!prop.is_default());

        prop.restore_default();
        assert_eq!(*prop.get(), 1);
    }

    #[test]
    fn test_set_default_resets_value() {
        let mut prop = Property::new("_model_name", Some("WidgetModel".to_string()));
        prop.assign(Some("Other".to_string()));
        prop.set_default(Some("IntSliderModel".to_string()));

        assert_eq!(prop.get().as_deref(), Some("IntSliderModel"));
        assert!(prop.is_default());
    }

    #[test]
    fn test_optional_absent() {
        let mut prop: Property<Option<String>> = Property::new("tooltip", None);
        assert!(prop.is_absent());

        prop.assign(Some("hint".into()));
        assert!(!prop.is_absent());
    }

    #[test]
    fn test_origin_display() {
        assert_eq!(Origin::Local.to_string(), "local");
        assert_eq!(Origin::Remote.to_string(), "remote");
    }
}
