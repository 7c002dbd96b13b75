use super::{Binder, bind_text_values};
use crate::binding_map::BindingMap;
use crate::convert::ConversionRegistry;
use crate::error::BindError;
use crate::http::{HttpRequest, HttpResponse};
use crate::route::PathVariables;
use std::sync::Arc;

/// Convert a header name to the parameter name it binds to.
///
/// Each dash-separated segment gets an upper-case first letter, the dashes
/// are dropped and the first letter of the result is lower-cased. The rest
/// of each segment keeps its case.
///
/// ```
/// use bindery_core::bind::normalize_header_name;
///
/// assert_eq!(normalize_header_name("X-Custom-Header"), "xCustomHeader");
/// assert_eq!(normalize_header_name("content-type"), "contentType");
/// assert_eq!(normalize_header_name("X-Request-ID"), "xRequestID");
/// ```
pub fn normalize_header_name(header: &str) -> String {
    let camel: String = header
        .split('-')
        .filter(|s| !s.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();

    let mut chars = camel.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => camel,
    }
}

/// Binds request headers by normalized name or exact lower-case name.
#[derive(Debug, Clone)]
pub struct HeaderBinder {
    registry: Arc<ConversionRegistry>,
}

impl HeaderBinder {
    pub fn new(registry: Arc<ConversionRegistry>) -> Self {
        Self { registry }
    }
}

impl Binder for HeaderBinder {
    fn name(&self) -> &'static str {
        "header"
    }

    fn bind_all(
        &self,
        map: &mut BindingMap,
        request: &Arc<HttpRequest>,
        _response: &Arc<HttpResponse>,
        _path_vars: &PathVariables,
    ) -> Result<(), BindError> {
        if request.headers.is_empty() {
            return Ok(());
        }
        let normalized: Vec<(String, String, &str)> = request
            .headers
            .iter()
            .map(|(k, v)| (normalize_header_name(k), k.to_ascii_lowercase(), v.as_str()))
            .collect();

        for parameter in map.unbound() {
            let values: Vec<&str> = normalized
                .iter()
                .filter(|(camel, lower, _)| camel == parameter.name() || lower == parameter.name())
                .map(|(_, _, v)| *v)
                .collect();
            if !values.is_empty() {
                bind_text_values(map, &self.registry, &parameter, &values)?;
            }
        }
        Ok(())
    }
}
