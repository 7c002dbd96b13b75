use super::{Binder, has_body_consumer};
use crate::binding_map::BindingMap;
use crate::convert::ConversionRegistry;
use crate::error::{BindError, ConversionError};
use crate::http::{HttpRequest, HttpResponse};
use crate::param::{ParameterDescription, Value};
use crate::route::PathVariables;
use serde_json::Value as Json;
use std::sync::Arc;
use tracing::debug;

/// Whether a lower-cased media type carries JSON.
pub fn is_json_media_type(media_type: &str) -> bool {
    media_type == "application/json" || media_type.ends_with("+json")
}

/// Binds parameters from a JSON request body.
///
/// When exactly one unbound parameter is a compound type (bean, list or
/// map) the whole document is deserialized into it. Otherwise the body must
/// be an object and each unbound parameter is taken from the field of the
/// same name.
///
/// Skipped entirely when nothing is left to bind, the content type is not
/// JSON, or a parameter takes the request and so owns the body stream.
#[derive(Debug, Clone)]
pub struct JsonBodyBinder {
    registry: Arc<ConversionRegistry>,
}

impl JsonBodyBinder {
    pub fn new(registry: Arc<ConversionRegistry>) -> Self {
        Self { registry }
    }

    fn bind_field(&self, parameter: &ParameterDescription, field: &Json) -> Result<Option<Value>, BindError> {
        let target = parameter.ty();
        let text = match field {
            Json::String(s) => Some(s.clone()),
            Json::Number(n) => Some(n.to_string()),
            Json::Bool(b) => Some(b.to_string()),
            _ => None,
        };

        if let Some(text) = text.filter(|_| self.registry.supports(target)) {
            return match self.registry.convert(target, &text) {
                Ok(Some(v)) => Ok(Some(v)),
                Ok(None) => Err(BindError::conversion(
                    parameter.name(),
                    target.name(),
                    &ConversionError::new(target.name(), text, "no matching constant"),
                )),
                Err(e) => Err(BindError::conversion(parameter.name(), target.name(), &e)),
            };
        }

        match target.decode_json(field.clone()) {
            Some(Ok(v)) => Ok(Some(v)),
            Some(Err(e)) => Err(BindError::Conversion {
                parameter: parameter.name().to_string(),
                target: target.name().to_string(),
                cause: e.to_string(),
            }),
            None => Ok(None),
        }
    }
}

impl Binder for JsonBodyBinder {
    fn name(&self) -> &'static str {
        "json-body"
    }

    fn bind_all(
        &self,
        map: &mut BindingMap,
        request: &Arc<HttpRequest>,
        _response: &Arc<HttpResponse>,
        _path_vars: &PathVariables,
    ) -> Result<(), BindError> {
        let unbound = map.unbound();
        let Some(first) = unbound.first() else {
            return Ok(());
        };
        let is_json = request.media_type().is_some_and(|m| is_json_media_type(&m));
        if !is_json || has_body_consumer(map) {
            return Ok(());
        }
        let Some(body) = request.take_body() else {
            debug!("JSON request without a body stream");
            return Ok(());
        };

        let compound: Vec<&ParameterDescription> =
            unbound.iter().filter(|p| p.ty().is_bindable_compound()).collect();
        let single = match compound.as_slice() {
            [only] => Some(*only),
            _ => None,
        };
        let blame = single.unwrap_or(first);

        let bytes = body.read_all().map_err(|e| BindError::BodyUnavailable {
            parameter: blame.name().to_string(),
            target: blame.ty().name().to_string(),
            cause: e.to_string(),
        })?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            debug!("Empty JSON body");
            return Ok(());
        }
        let document: Json = serde_json::from_slice(&bytes).map_err(|e| BindError::MalformedBody {
            parameter: blame.name().to_string(),
            target: blame.ty().name().to_string(),
            cause: e.to_string(),
        })?;

        if let Some(parameter) = single {
            debug!(parameter = parameter.name(), "Binding whole JSON body");
            return match parameter.ty().decode_json(document) {
                Some(Ok(v)) => {
                    map.bind_if_absent(parameter, v);
                    Ok(())
                }
                Some(Err(e)) => Err(BindError::MalformedBody {
                    parameter: parameter.name().to_string(),
                    target: parameter.ty().name().to_string(),
                    cause: e.to_string(),
                }),
                None => Ok(()),
            };
        }

        let Json::Object(fields) = document else {
            debug!("JSON body is not an object, nothing to explode");
            return Ok(());
        };
        for parameter in &unbound {
            let Some(field) = fields.get(parameter.name()).filter(|f| !f.is_null()) else {
                continue;
            };
            if let Some(v) = self.bind_field(parameter, field)? {
                map.bind_if_absent(parameter, v);
            }
        }
        Ok(())
    }
}
