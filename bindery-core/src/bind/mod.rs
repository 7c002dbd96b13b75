//! # Binder Chain
//!
//! Fills handler parameters from the request, one data source per binder.
//!
//! ## Order
//!
//! 1. [`PathVariableBinder`]: route path variables
//! 2. [`RequestResponseBinder`]: the live request and response objects
//! 3. [`QueryFormBinder`]: query string and url-encoded form fields
//! 4. [`HeaderBinder`]: request headers
//! 5. [`SessionBinder`]: session and session attributes
//! 6. [`CookieBinder`]: request cookies
//! 7. [`JsonBodyBinder`]: JSON request bodies
//! 8. [`MultipartBinder`]: `multipart/form-data` bodies
//!
//! The body binders come last because reading the body stream is
//! destructive. Every binder only writes parameters that are still unbound,
//! so earlier binders (and method-level pre-binding) always win.
//!
//! ## Quick Start
//!
//! ```
//! use bindery_core::bind::BinderChain;
//! use bindery_core::binding_map::BindingMap;
//! use bindery_core::http::{HttpRequest, HttpResponse};
//! use bindery_core::param::{ParameterDescription, TypeDescriptor};
//! use bindery_core::route::PathPattern;
//! use std::sync::Arc;
//!
//! let chain = BinderChain::standard();
//! let request = Arc::new(HttpRequest::new("GET", "/users/7?verbose=true"));
//! let response = Arc::new(HttpResponse::new());
//! let vars = PathPattern::new("/users/{id}").extract(&request.path).unwrap();
//!
//! let mut map = BindingMap::new([
//!     ParameterDescription::new("id", TypeDescriptor::scalar::<u64>()),
//!     ParameterDescription::new("verbose", TypeDescriptor::scalar::<bool>()),
//! ]);
//! chain.bind_all(&mut map, &request, &response, &vars).unwrap();
//!
//! assert_eq!(map.value_of::<u64>("id"), Some(&7));
//! assert_eq!(map.value_of::<bool>("verbose"), Some(&true));
//! ```

mod cookie;
mod header;
mod injection;
mod json;
mod multipart;
mod path;
mod query;
mod session;

pub use cookie::*;
pub use header::*;
pub use injection::*;
pub use json::*;
pub use multipart::*;
pub use path::*;
pub use query::*;
pub use session::*;

use crate::binding_map::BindingMap;
use crate::convert::ConversionRegistry;
use crate::error::BindError;
use crate::http::{HttpRequest, HttpResponse};
use crate::multipart::MultipartLimits;
use crate::param::{ParameterDescription, TypeKind};
use crate::route::PathVariables;
use std::sync::Arc;
use tracing::debug;

/// One data source in the binder chain.
///
/// Binders are stateless apart from read-only configuration. They receive
/// the request-scoped [`BindingMap`] and write only unbound slots.
pub trait Binder: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn bind_all(
        &self,
        map: &mut BindingMap,
        request: &Arc<HttpRequest>,
        response: &Arc<HttpResponse>,
        path_vars: &PathVariables,
    ) -> Result<(), BindError>;
}

/// Ordered sequence of binders.
#[derive(Clone, Default)]
pub struct BinderChain {
    binders: Vec<Arc<dyn Binder>>,
}

impl BinderChain {
    /// A chain with no binders.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard eight binders with default conversions and limits.
    pub fn standard() -> Self {
        Self::with_config(Arc::new(ConversionRegistry::new()), MultipartLimits::default())
    }

    /// The standard eight binders sharing `registry`.
    pub fn with_config(registry: Arc<ConversionRegistry>, limits: MultipartLimits) -> Self {
        Self::new()
            .with(PathVariableBinder::new(registry.clone()))
            .with(RequestResponseBinder)
            .with(QueryFormBinder::new(registry.clone()))
            .with(HeaderBinder::new(registry.clone()))
            .with(SessionBinder::new(registry.clone()))
            .with(CookieBinder::new(registry.clone()))
            .with(JsonBodyBinder::new(registry.clone()))
            .with(MultipartBinder::new(registry, limits))
    }

    /// Append a binder.
    pub fn with(mut self, binder: impl Binder + 'static) -> Self {
        self.binders.push(Arc::new(binder));
        self
    }

    pub fn push(&mut self, binder: Arc<dyn Binder>) {
        self.binders.push(binder);
    }

    pub fn len(&self) -> usize {
        self.binders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.binders.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.binders.iter().map(|b| b.name()).collect()
    }

    /// Run every binder in registration order. Stops at the first error.
    pub fn bind_all(
        &self,
        map: &mut BindingMap,
        request: &Arc<HttpRequest>,
        response: &Arc<HttpResponse>,
        path_vars: &PathVariables,
    ) -> Result<(), BindError> {
        for binder in &self.binders {
            let before = map.unbound().len();
            binder.bind_all(map, request, response, path_vars)?;
            let after = map.unbound().len();
            debug!(
                binder = binder.name(),
                bound = before - after,
                remaining = after,
                "Binder finished"
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for BinderChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinderChain").field("binders", &self.names()).finish()
    }
}

/// Bind `parameter` from textual `values` through the conversion registry.
///
/// Collections take every value; scalars and enums take the first. Returns
/// whether a value was stored. Kinds the registry cannot produce are left
/// unbound.
pub(crate) fn bind_text_values<S: AsRef<str>>(
    map: &mut BindingMap,
    registry: &ConversionRegistry,
    parameter: &ParameterDescription,
    values: &[S],
) -> Result<bool, BindError> {
    let target = parameter.ty();
    match target.kind() {
        TypeKind::Scalar | TypeKind::Enum(_) => {
            let Some(raw) = values.first() else {
                return Ok(false);
            };
            match registry
                .convert(target, raw.as_ref())
                .map_err(|e| BindError::conversion(parameter.name(), target.name(), &e))?
            {
                Some(v) => Ok(map.bind_if_absent(parameter, v)),
                None => Ok(false),
            }
        }
        TypeKind::Collection { element, build } => {
            if values.is_empty() || !registry.supports(element) {
                return Ok(false);
            }
            let mut items = Vec::with_capacity(values.len());
            for raw in values {
                match registry
                    .convert(element, raw.as_ref())
                    .map_err(|e| BindError::conversion(parameter.name(), target.name(), &e))?
                {
                    Some(v) => items.push(v),
                    None => return Ok(false),
                }
            }
            Ok(build(items).is_some_and(|v| map.bind_if_absent(parameter, v)))
        }
        _ => Ok(false),
    }
}

/// Whether any parameter in the map reads the body stream itself.
pub(crate) fn has_body_consumer(map: &BindingMap) -> bool {
    map.parameters().any(|p| p.ty().is_body_consuming())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::{TypeDescriptor, value};
    use std::collections::HashMap;

    struct Fixed(&'static str, i32);

    impl Binder for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }

        fn bind_all(
            &self,
            map: &mut BindingMap,
            _request: &Arc<HttpRequest>,
            _response: &Arc<HttpResponse>,
            _path_vars: &PathVariables,
        ) -> Result<(), BindError> {
            for p in map.unbound() {
                map.bind_if_absent(&p, value(self.1));
            }
            Ok(())
        }
    }

    struct Failing;

    impl Binder for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn bind_all(
            &self,
            _map: &mut BindingMap,
            _request: &Arc<HttpRequest>,
            _response: &Arc<HttpResponse>,
            _path_vars: &PathVariables,
        ) -> Result<(), BindError> {
            Err(BindError::Conversion {
                parameter: "x".into(),
                target: "i32".into(),
                cause: "boom".into(),
            })
        }
    }

    fn run(chain: &BinderChain, map: &mut BindingMap) -> Result<(), BindError> {
        chain.bind_all(
            map,
            &Arc::new(HttpRequest::new("GET", "/")),
            &Arc::new(HttpResponse::new()),
            &HashMap::new(),
        )
    }

    #[test]
    fn test_standard_order() {
        assert_eq!(
            BinderChain::standard().names(),
            vec!["path", "request-response", "query-form", "header", "session", "cookie", "json-body", "multipart"]
        );
    }

    #[test]
    fn test_earlier_binder_wins() {
        let chain = BinderChain::new().with(Fixed("first", 1)).with(Fixed("second", 2));
        let x = ParameterDescription::new("x", TypeDescriptor::scalar::<i32>());
        let mut map = BindingMap::new([x]);
        run(&chain, &mut map).unwrap();
        assert_eq!(map.value_of::<i32>("x"), Some(&1));
    }

    #[test]
    fn test_error_stops_chain() {
        let chain = BinderChain::new().with(Failing).with(Fixed("late", 3));
        let x = ParameterDescription::new("x", TypeDescriptor::scalar::<i32>());
        let mut map = BindingMap::new([x]);
        assert!(run(&chain, &mut map).is_err());
        assert!(map.has_unbound());
    }

    #[test]
    fn test_bind_text_values_collection() {
        let registry = ConversionRegistry::new();
        let p = ParameterDescription::new("ids", TypeDescriptor::list::<i64>(TypeDescriptor::scalar::<i64>()));
        let mut map = BindingMap::new([p.clone()]);
        assert!(bind_text_values(&mut map, &registry, &p, &["1", "2", "3"]).unwrap());
        assert_eq!(map.value_of::<Vec<i64>>("ids"), Some(&vec![1, 2, 3]));

        let mut map = BindingMap::new([p.clone()]);
        let err = bind_text_values(&mut map, &registry, &p, &["1", "x"]).unwrap_err();
        assert_eq!(err.parameter(), "ids");
    }
}
