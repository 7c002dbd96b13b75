use super::Binder;
use crate::binding_map::BindingMap;
use crate::error::BindError;
use crate::http::{HttpRequest, HttpResponse};
use crate::param::{TypeKind, Value};
use crate::route::PathVariables;
use std::sync::Arc;

/// Injects the live request and response into parameters declared as such.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestResponseBinder;

impl Binder for RequestResponseBinder {
    fn name(&self) -> &'static str {
        "request-response"
    }

    fn bind_all(
        &self,
        map: &mut BindingMap,
        request: &Arc<HttpRequest>,
        response: &Arc<HttpResponse>,
        _path_vars: &PathVariables,
    ) -> Result<(), BindError> {
        for parameter in map.unbound() {
            let injected: Option<Value> = match parameter.ty().kind() {
                TypeKind::Request => Some(request.clone() as Value),
                TypeKind::Response => Some(response.clone() as Value),
                _ => None,
            };
            if let Some(v) = injected {
                map.bind_if_absent(&parameter, v);
            }
        }
        Ok(())
    }
}
