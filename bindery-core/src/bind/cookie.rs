use super::{Binder, bind_text_values};
use crate::binding_map::BindingMap;
use crate::convert::ConversionRegistry;
use crate::error::BindError;
use crate::http::{HttpRequest, HttpResponse};
use crate::param::{TypeKind, value};
use crate::route::PathVariables;
use std::sync::Arc;

/// Binds request cookies by name.
///
/// `Cookie` parameters receive the cookie itself; other parameters are
/// coerced from the cookie value.
#[derive(Debug, Clone)]
pub struct CookieBinder {
    registry: Arc<ConversionRegistry>,
}

impl CookieBinder {
    pub fn new(registry: Arc<ConversionRegistry>) -> Self {
        Self { registry }
    }
}

impl Binder for CookieBinder {
    fn name(&self) -> &'static str {
        "cookie"
    }

    fn bind_all(
        &self,
        map: &mut BindingMap,
        request: &Arc<HttpRequest>,
        _response: &Arc<HttpResponse>,
        _path_vars: &PathVariables,
    ) -> Result<(), BindError> {
        let cookies = request.cookies();
        if cookies.is_empty() {
            return Ok(());
        }

        for parameter in map.unbound() {
            let matching: Vec<_> = cookies.iter().filter(|c| c.name == parameter.name()).collect();
            let Some(first) = matching.first() else {
                continue;
            };
            if matches!(parameter.ty().kind(), TypeKind::Cookie) {
                map.bind_if_absent(&parameter, value((*first).clone()));
            } else {
                let values: Vec<&str> = matching.iter().map(|c| c.value.as_str()).collect();
                bind_text_values(map, &self.registry, &parameter, &values)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Cookie;
    use crate::param::{ParameterDescription, TypeDescriptor};

    #[test]
    fn test_binds_cookie_objects_and_values() {
        let request = Arc::new(HttpRequest::new("GET", "/").with_header("Cookie", "sid=abc123; theme=dark; limit=25"));
        let mut map = BindingMap::new([
            ParameterDescription::new("sid", TypeDescriptor::cookie()),
            ParameterDescription::new("theme", TypeDescriptor::scalar::<String>()),
            ParameterDescription::new("limit", TypeDescriptor::scalar::<usize>()),
            ParameterDescription::new("lang", TypeDescriptor::scalar::<String>()),
        ]);
        CookieBinder::new(Arc::new(ConversionRegistry::new()))
            .bind_all(&mut map, &request, &Arc::new(HttpResponse::new()), &PathVariables::new())
            .unwrap();

        assert_eq!(map.value_of::<Cookie>("sid"), Some(&Cookie::new("sid", "abc123")));
        assert_eq!(map.value_of::<String>("theme").map(String::as_str), Some("dark"));
        assert_eq!(map.value_of::<usize>("limit"), Some(&25));
        assert!(map.value_of::<String>("lang").is_none());
    }
}
