use super::{Binder, bind_text_values, has_body_consumer};
use crate::binding_map::BindingMap;
use crate::convert::ConversionRegistry;
use crate::error::BindError;
use crate::http::{HttpRequest, HttpResponse};
use crate::multipart::{MultipartLimits, MultipartParser};
use crate::param::{ParameterDescription, TypeKind, value};
use crate::route::PathVariables;
use std::sync::Arc;
use tracing::{debug, warn};

const MULTIPART_FORM_DATA: &str = "multipart/form-data";

/// Binds text fields and uploaded files from `multipart/form-data` bodies.
///
/// A corrupt stream is logged and whatever was parsed before the damage is
/// still bound. A missing boundary, an exceeded limit or an unreadable body
/// fails the request. Skipped when a parameter takes the request and so
/// owns the body stream.
#[derive(Debug, Clone)]
pub struct MultipartBinder {
    registry: Arc<ConversionRegistry>,
    limits: MultipartLimits,
}

impl MultipartBinder {
    pub fn new(registry: Arc<ConversionRegistry>, limits: MultipartLimits) -> Self {
        Self { registry, limits }
    }

    pub fn limits(&self) -> MultipartLimits {
        self.limits
    }
}

fn failure(parameter: &ParameterDescription, cause: impl ToString) -> BindError {
    BindError::Multipart {
        parameter: parameter.name().to_string(),
        target: parameter.ty().name().to_string(),
        cause: cause.to_string(),
    }
}

impl Binder for MultipartBinder {
    fn name(&self) -> &'static str {
        "multipart"
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
        if request.media_type().as_deref() != Some(MULTIPART_FORM_DATA) || has_body_consumer(map) {
            return Ok(());
        }
        let content_type = request.content_type().unwrap_or_default();
        let parser = MultipartParser::from_content_type(content_type, self.limits).map_err(|e| failure(first, e))?;

        let Some(body) = request.take_body() else {
            debug!("Multipart request without a body stream");
            return Ok(());
        };
        let bytes = body.read_all().map_err(|e| BindError::BodyUnavailable {
            parameter: first.name().to_string(),
            target: first.ty().name().to_string(),
            cause: e.to_string(),
        })?;

        let (form, error) = parser.parse_partial(&bytes);
        match error {
            Some(e) if e.is_malformed() => {
                warn!(
                    error = %e,
                    fields = form.field_count(),
                    files = form.file_count(),
                    "Malformed multipart body; binding what was read"
                );
            }
            Some(e) => return Err(failure(first, e)),
            None => {
                debug!(fields = form.field_count(), files = form.file_count(), "Parsed multipart body");
            }
        }

        for parameter in &unbound {
            match parameter.ty().kind() {
                TypeKind::File => {
                    if let Some(file) = form.file(parameter.name()) {
                        map.bind_if_absent(parameter, value(file.clone()));
                    }
                }
                TypeKind::Files => {
                    let files = form.files(parameter.name());
                    if !files.is_empty() {
                        map.bind_if_absent(parameter, value(files));
                    }
                }
                _ => {
                    let values = form.field_values(parameter.name());
                    if !values.is_empty() {
                        bind_text_values(map, &self.registry, parameter, &values)?;
                    }
                }
            }
        }
        Ok(())
    }
}
