// Per-request table of parameter values being filled by the binder chain

use crate::param::{ParameterDescription, Value};
use std::any::Any;
use std::sync::Arc;
use tracing::trace;

/// Ordered mapping from handler parameters to their bound values.
///
/// `None` means "not yet bound". Binders write through [`bind_if_absent`],
/// so the first binder to supply a parameter wins and later binders never
/// overwrite it.
///
/// [`bind_if_absent`]: BindingMap::bind_if_absent
#[derive(Debug, Clone, Default)]
pub struct BindingMap {
    entries: Vec<(ParameterDescription, Option<Value>)>,
}

impl BindingMap {
    /// One unbound slot per parameter, in declaration order.
    pub fn new(parameters: impl IntoIterator<Item = ParameterDescription>) -> Self {
        Self {
            entries: parameters.into_iter().map(|p| (p, None)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn parameters(&self) -> impl Iterator<Item = &ParameterDescription> {
        self.entries.iter().map(|(p, _)| p)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParameterDescription, Option<&Value>)> {
        self.entries.iter().map(|(p, v)| (p, v.as_ref()))
    }

    pub fn get(&self, parameter: &ParameterDescription) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(p, _)| p == parameter)
            .and_then(|(_, v)| v.as_ref())
    }

    pub fn is_bound(&self, parameter: &ParameterDescription) -> bool {
        self.get(parameter).is_some()
    }

    /// Typed view of the value bound to the parameter called `name`.
    pub fn value_of<T: Any>(&self, name: &str) -> Option<&T> {
        self.entries
            .iter()
            .find(|(p, _)| p.name() == name)
            .and_then(|(_, v)| v.as_ref())
            .and_then(|v| v.downcast_ref::<T>())
    }

    /// Shared handle to the value bound to the parameter called `name`.
    pub fn shared<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.entries
            .iter()
            .find(|(p, _)| p.name() == name)
            .and_then(|(_, v)| v.clone())
            .and_then(|v| v.downcast::<T>().ok())
    }

    /// Bind a value before the binder chain runs, e.g. from a method-level
    /// default. Returns `false` if the parameter is not part of this map.
    pub fn prebind(&mut self, parameter: &ParameterDescription, value: Value) -> bool {
        match self.entries.iter_mut().find(|(p, _)| p == parameter) {
            Some((_, slot)) => {
                *slot = Some(value);
                true
            }
            None => false,
        }
    }

    /// Write `value` only if the parameter is still unbound.
    ///
    /// Returns `true` if the value was stored.
    pub fn bind_if_absent(&mut self, parameter: &ParameterDescription, value: Value) -> bool {
        match self.entries.iter_mut().find(|(p, _)| p == parameter) {
            Some((p, slot)) if slot.is_none() => {
                trace!(parameter = p.name(), ty = p.ty().name(), "Parameter bound");
                *slot = Some(value);
                true
            }
            _ => false,
        }
    }

    /// Parameters that no binder has supplied yet.
    pub fn unbound(&self) -> Vec<ParameterDescription> {
        self.entries
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub fn has_unbound(&self) -> bool {
        self.entries.iter().any(|(_, v)| v.is_none())
    }

    /// Values in declaration order.
    pub fn into_values(self) -> Vec<Option<Value>> {
        self.entries.into_iter().map(|(_, v)| v).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::{TypeDescriptor, value};

    fn params() -> (ParameterDescription, ParameterDescription) {
        (
            ParameterDescription::new("a", TypeDescriptor::scalar::<i32>()),
            ParameterDescription::new("b", TypeDescriptor::scalar::<String>()),
        )
    }

    #[test]
    fn test_first_bind_wins() {
        let (a, b) = params();
        let mut map = BindingMap::new([a.clone(), b.clone()]);
        assert!(map.has_unbound());

        assert!(map.bind_if_absent(&a, value(1i32)));
        assert!(!map.bind_if_absent(&a, value(2i32)));
        assert_eq!(map.value_of::<i32>("a"), Some(&1));
        assert_eq!(map.unbound(), vec![b]);
    }

    #[test]
    fn test_prebind_and_unknown_parameter() {
        let (a, b) = params();
        let mut map = BindingMap::new([a.clone()]);
        assert!(map.prebind(&a, value(9i32)));
        assert!(!map.prebind(&b, value("x".to_string())));
        assert!(!map.bind_if_absent(&b, value("x".to_string())));
        assert!(!map.has_unbound());
        assert_eq!(map.shared::<i32>("a").as_deref(), Some(&9));
    }

    #[test]
    fn test_values_keep_declaration_order() {
        let (a, b) = params();
        let mut map = BindingMap::new([a.clone(), b.clone()]);
        map.bind_if_absent(&b, value("x".to_string()));
        let values = map.into_values();
        assert!(values[0].is_none());
        assert_eq!(values[1].as_ref().and_then(|v| v.downcast_ref::<String>()).map(String::as_str), Some("x"));
    }
}
