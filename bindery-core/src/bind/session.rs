use super::Binder;
use crate::binding_map::BindingMap;
use crate::convert::ConversionRegistry;
use crate::error::BindError;
use crate::http::{HttpRequest, HttpResponse};
use crate::param::{TypeKind, Value};
use crate::route::PathVariables;
use std::sync::Arc;

/// Binds the session itself and session attributes by name.
///
/// Attributes already of the parameter's type are passed through; string
/// attributes are coerced through the registry.
#[derive(Debug, Clone)]
pub struct SessionBinder {
    registry: Arc<ConversionRegistry>,
}

impl SessionBinder {
    pub fn new(registry: Arc<ConversionRegistry>) -> Self {
        Self { registry }
    }
}

impl Binder for SessionBinder {
    fn name(&self) -> &'static str {
        "session"
    }

    fn bind_all(
        &self,
        map: &mut BindingMap,
        request: &Arc<HttpRequest>,
        _response: &Arc<HttpResponse>,
        _path_vars: &PathVariables,
    ) -> Result<(), BindError> {
        let Some(session) = request.session() else {
            return Ok(());
        };

        for parameter in map.unbound() {
            if matches!(parameter.ty().kind(), TypeKind::Session) {
                map.bind_if_absent(&parameter, session.clone() as Value);
                continue;
            }
            let Some(attribute) = session.attribute(parameter.name()) else {
                continue;
            };
            let converted = self
                .registry
                .convert_value(&attribute, parameter.ty())
                .map_err(|e| BindError::conversion(parameter.name(), parameter.ty().name(), &e))?;
            if let Some(v) = converted {
                map.bind_if_absent(&parameter, v);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Session;
    use crate::param::{ParameterDescription, TypeDescriptor};

    #[derive(Debug, Clone, PartialEq, serde::Deserialize)]
    struct User {
        name: String,
    }

    fn run(map: &mut BindingMap, request: HttpRequest) -> Result<(), BindError> {
        SessionBinder::new(Arc::new(ConversionRegistry::new())).bind_all(
            map,
            &Arc::new(request),
            &Arc::new(HttpResponse::new()),
            &PathVariables::new(),
        )
    }

    #[test]
    fn test_session_and_attributes() {
        let session = Arc::new(Session::with_id("s-1"));
        session.set_attribute("user", User { name: "ada".into() });
        session.set_attribute("visits", "12".to_string());

        let mut map = BindingMap::new([
            ParameterDescription::new("session", TypeDescriptor::session()),
            ParameterDescription::new("user", TypeDescriptor::bean::<User>()),
            ParameterDescription::new("visits", TypeDescriptor::scalar::<i32>()),
            ParameterDescription::new("absent", TypeDescriptor::scalar::<i32>()),
        ]);
        run(&mut map, HttpRequest::new("GET", "/").with_session(session.clone())).unwrap();

        assert!(Arc::ptr_eq(&map.shared::<Session>("session").unwrap(), &session));
        assert_eq!(map.value_of::<User>("user"), Some(&User { name: "ada".into() }));
        assert_eq!(map.value_of::<i32>("visits"), Some(&12));
        assert_eq!(map.unbound().len(), 1);
    }

    #[test]
    fn test_no_session_binds_nothing() {
        let mut map = BindingMap::new([ParameterDescription::new("session", TypeDescriptor::session())]);
        run(&mut map, HttpRequest::new("GET", "/")).unwrap();
        assert!(map.has_unbound());
    }

    #[test]
    fn test_mismatched_attribute_type_is_skipped() {
        let session = Arc::new(Session::new());
        session.set_attribute("count", 5u64);
        let mut map = BindingMap::new([ParameterDescription::new("count", TypeDescriptor::scalar::<i32>())]);
        run(&mut map, HttpRequest::new("GET", "/").with_session(session)).unwrap();
        assert!(map.has_unbound());
    }
}
