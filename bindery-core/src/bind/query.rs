use super::{Binder, bind_text_values, has_body_consumer};
use crate::binding_map::BindingMap;
use crate::convert::ConversionRegistry;
use crate::error::BindError;
use crate::http::{HttpRequest, HttpResponse};
use crate::route::PathVariables;
use std::sync::Arc;
use tracing::debug;

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Binds query string parameters and url-encoded form fields by name.
///
/// Query values come before form values. Collection parameters receive
/// every value sent under their name; the rest take the first.
#[derive(Debug, Clone)]
pub struct QueryFormBinder {
    registry: Arc<ConversionRegistry>,
}

impl QueryFormBinder {
    pub fn new(registry: Arc<ConversionRegistry>) -> Self {
        Self { registry }
    }

    fn form_fields(&self, map: &BindingMap, request: &HttpRequest) -> Result<Vec<(String, String)>, BindError> {
        if request.media_type().as_deref() != Some(FORM_URLENCODED) || has_body_consumer(map) {
            return Ok(Vec::new());
        }
        let Some(body) = request.take_body() else {
            return Ok(Vec::new());
        };
        let unavailable = |cause: String| {
            let first = map.unbound().into_iter().next();
            BindError::BodyUnavailable {
                parameter: first.as_ref().map(|p| p.name().to_string()).unwrap_or_default(),
                target: first.as_ref().map(|p| p.ty().name().to_string()).unwrap_or_default(),
                cause,
            }
        };
        let bytes = body.read_all().map_err(|e| unavailable(e.to_string()))?;
        let fields = serde_urlencoded::from_bytes::<Vec<(String, String)>>(&bytes)
            .map_err(|e| unavailable(e.to_string()))?;
        debug!(fields = fields.len(), "Read url-encoded form body");
        Ok(fields)
    }
}

impl Binder for QueryFormBinder {
    fn name(&self) -> &'static str {
        "query-form"
    }

    fn bind_all(
        &self,
        map: &mut BindingMap,
        request: &Arc<HttpRequest>,
        _response: &Arc<HttpResponse>,
        _path_vars: &PathVariables,
    ) -> Result<(), BindError> {
        if !map.has_unbound() {
            return Ok(());
        }
        let form = self.form_fields(map, request)?;

        for parameter in map.unbound() {
            let values: Vec<&str> = request
                .query_params
                .iter()
                .chain(form.iter())
                .filter(|(k, _)| k == parameter.name())
                .map(|(_, v)| v.as_str())
                .collect();
            if !values.is_empty() {
                bind_text_values(map, &self.registry, &parameter, &values)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::{ParameterDescription, TypeDescriptor};

    fn binder() -> QueryFormBinder {
        QueryFormBinder::new(Arc::new(ConversionRegistry::new()))
    }

    fn run(map: &mut BindingMap, request: HttpRequest) -> Result<Arc<HttpRequest>, BindError> {
        let request = Arc::new(request);
        binder().bind_all(map, &request, &Arc::new(HttpResponse::new()), &PathVariables::new())?;
        Ok(request)
    }

    #[test]
    fn test_query_scalars_and_lists() {
        let mut map = BindingMap::new([
            ParameterDescription::new("page", TypeDescriptor::scalar::<u32>()),
            ParameterDescription::new("tag", TypeDescriptor::list::<String>(TypeDescriptor::scalar::<String>())),
            ParameterDescription::new("first", TypeDescriptor::scalar::<String>()),
        ]);
        run(&mut map, HttpRequest::new("GET", "/?page=3&tag=a&tag=b&first=x&first=y")).unwrap();

        assert_eq!(map.value_of::<u32>("page"), Some(&3));
        assert_eq!(
            map.value_of::<Vec<String>>("tag"),
            Some(&vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(map.value_of::<String>("first").map(String::as_str), Some("x"));
    }

    #[test]
    fn test_form_body() {
        let mut map = BindingMap::new([
            ParameterDescription::new("name", TypeDescriptor::scalar::<String>()),
            ParameterDescription::new("age", TypeDescriptor::scalar::<i32>()),
        ]);
        let request = run(
            &mut map,
            HttpRequest::new("POST", "/?name=query")
                .with_header("Content-Type", "application/x-www-form-urlencoded; charset=UTF-8")
                .with_body("name=form&age=41"),
        )
        .unwrap();

        assert_eq!(map.value_of::<String>("name").map(String::as_str), Some("query"));
        assert_eq!(map.value_of::<i32>("age"), Some(&41));
        assert!(!request.has_body());
    }

    #[test]
    fn test_form_body_left_for_request_consumer() {
        let mut map = BindingMap::new([
            ParameterDescription::new("req", TypeDescriptor::request()),
            ParameterDescription::new("age", TypeDescriptor::scalar::<i32>()),
        ]);
        let request = run(
            &mut map,
            HttpRequest::new("POST", "/")
                .with_header("Content-Type", "application/x-www-form-urlencoded")
                .with_body("age=41"),
        )
        .unwrap();

        assert!(map.value_of::<i32>("age").is_none());
        assert!(request.has_body());
    }

    #[test]
    fn test_conversion_failure() {
        let mut map = BindingMap::new([ParameterDescription::new("page", TypeDescriptor::scalar::<u32>())]);
        let err = run(&mut map, HttpRequest::new("GET", "/?page=many")).unwrap_err();
        assert_eq!(err.parameter(), "page");
    }
}
