use super::{Binder, bind_text_values};
use crate::binding_map::BindingMap;
use crate::convert::ConversionRegistry;
use crate::error::BindError;
use crate::http::{HttpRequest, HttpResponse};
use crate::route::PathVariables;
use std::sync::Arc;

/// Binds parameters whose name matches a route path variable.
#[derive(Debug, Clone)]
pub struct PathVariableBinder {
    registry: Arc<ConversionRegistry>,
}

impl PathVariableBinder {
    pub fn new(registry: Arc<ConversionRegistry>) -> Self {
        Self { registry }
    }
}

impl Binder for PathVariableBinder {
    fn name(&self) -> &'static str {
        "path"
    }

    fn bind_all(
        &self,
        map: &mut BindingMap,
        _request: &Arc<HttpRequest>,
        _response: &Arc<HttpResponse>,
        path_vars: &PathVariables,
    ) -> Result<(), BindError> {
        if path_vars.is_empty() {
            return Ok(());
        }
        for parameter in map.unbound() {
            if let Some(raw) = path_vars.get(parameter.name()) {
                bind_text_values(map, &self.registry, &parameter, std::slice::from_ref(raw))?;
            }
        }
        Ok(())
    }
}
