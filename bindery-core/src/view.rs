//! View results and the resolvers that render them.
//!
//! A handler (or a [`Negotiator`](crate::content_negotiation::Negotiator))
//! produces a [`ViewResult`]: either a concrete view value or an error. The
//! [`ViewResolverRegistry`] picks the most specific resolver for it.
//!
//! Views are matched by their exact Rust type. Errors are matched against
//! resolvers registered for their own type first, then for each error
//! further down the `source()` chain, and finally the catch-all resolver.
//!
//! ```
//! use bindery_core::http::{HttpRequest, HttpResponse};
//! use bindery_core::view::{JsonView, ViewResolverRegistry, ViewResult};
//!
//! let registry = ViewResolverRegistry::standard();
//! let result = ViewResult::view(JsonView::new(serde_json::json!({"ok": true})));
//! let resolver = registry.find_view_resolver(&result).unwrap();
//!
//! let response = HttpResponse::new();
//! resolver.resolve(&result, &HttpRequest::new("GET", "/"), &response).unwrap();
//! assert_eq!(response.body_string(), r#"{"ok":true}"#);
//! ```

use crate::error::{BindError, BoxError, Error};
use crate::http::{HttpRequest, HttpResponse};
use crate::param::{Value, value};
use http::StatusCode;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// What a handler or negotiator hands to view resolution.
pub enum ViewResult {
    /// A renderable view value.
    View {
        value: Value,
        type_name: &'static str,
    },
    /// A failure to be rendered by an error resolver.
    Error(BoxError),
}

impl ViewResult {
    pub fn view<V: Any + Send + Sync>(view: V) -> Self {
        ViewResult::View {
            value: value(view),
            type_name: std::any::type_name::<V>(),
        }
    }

    pub fn error(error: impl Into<BoxError>) -> Self {
        ViewResult::Error(error.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ViewResult::Error(_))
    }

    /// The view value, if it is a `V`.
    pub fn downcast_view<V: Any>(&self) -> Option<&V> {
        match self {
            ViewResult::View { value, .. } => value.downcast_ref::<V>(),
            ViewResult::Error(_) => None,
        }
    }

    /// Type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            ViewResult::View { type_name, .. } => *type_name,
            ViewResult::Error(_) => "error",
        }
    }
}

impl fmt::Debug for ViewResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewResult::View { type_name, .. } => f.debug_tuple("View").field(type_name).finish(),
            ViewResult::Error(e) => f.debug_tuple("Error").field(&e.to_string()).finish(),
        }
    }
}

/// Renders a [`ViewResult`] onto the response.
pub trait ViewResolver: Send + Sync {
    fn resolve(&self, result: &ViewResult, request: &HttpRequest, response: &HttpResponse) -> Result<(), Error>;
}

/// Adapts a closure over a concrete view type into a [`ViewResolver`].
pub struct FnViewResolver<V, F> {
    render: F,
    _view: PhantomData<fn(&V)>,
}

impl<V, F> FnViewResolver<V, F>
where
    V: Any,
    F: Fn(&V, &HttpRequest, &HttpResponse) -> Result<(), Error> + Send + Sync,
{
    pub fn new(render: F) -> Self {
        Self {
            render,
            _view: PhantomData,
        }
    }
}

impl<V, F> ViewResolver for FnViewResolver<V, F>
where
    V: Any,
    F: Fn(&V, &HttpRequest, &HttpResponse) -> Result<(), Error> + Send + Sync,
{
    fn resolve(&self, result: &ViewResult, request: &HttpRequest, response: &HttpResponse) -> Result<(), Error> {
        let view = result.downcast_view::<V>().ok_or_else(|| {
            Error::Render(format!(
                "expected a {} view, got {}",
                std::any::type_name::<V>(),
                result.type_name()
            ))
        })?;
        (self.render)(view, request, response)
    }
}

type ErrorProbe = fn(&(dyn StdError + 'static)) -> bool;

fn probe<E: StdError + 'static>(error: &(dyn StdError + 'static)) -> bool {
    error.is::<E>()
}

struct ErrorEntry {
    type_name: &'static str,
    probe: ErrorProbe,
    resolver: Arc<dyn ViewResolver>,
}

/// Resolver lookup by view type and error type.
#[derive(Default)]
pub struct ViewResolverRegistry {
    views: HashMap<TypeId, Arc<dyn ViewResolver>>,
    errors: Vec<ErrorEntry>,
    catch_all: Option<Arc<dyn ViewResolver>>,
}

impl ViewResolverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolvers for the built-in views plus the catch-all error resolver.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register_view::<JsonView>(JsonViewResolver);
        registry.register_view::<JsonpView>(JsonpViewResolver);
        registry.register_view::<StatusView>(StatusViewResolver);
        registry.register_view::<RedirectView>(RedirectViewResolver);
        registry.register_catch_all(ErrorViewResolver);
        registry
    }

    /// Register the resolver for views of type `V`, replacing any previous one.
    pub fn register_view<V: Any>(&mut self, resolver: impl ViewResolver + 'static) {
        self.views.insert(TypeId::of::<V>(), Arc::new(resolver));
    }

    /// Register a closure rendering views of type `V`.
    pub fn register_view_fn<V, F>(&mut self, render: F)
    where
        V: Any,
        F: Fn(&V, &HttpRequest, &HttpResponse) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.register_view::<V>(FnViewResolver::<V, F>::new(render));
    }

    /// Register the resolver for errors of type `E` (or caused by one).
    pub fn register_error<E: StdError + 'static>(&mut self, resolver: impl ViewResolver + 'static) {
        self.errors.retain(|e| e.type_name != std::any::type_name::<E>());
        self.errors.push(ErrorEntry {
            type_name: std::any::type_name::<E>(),
            probe: probe::<E>,
            resolver: Arc::new(resolver),
        });
    }

    /// Register the resolver used for errors nothing more specific handles.
    pub fn register_catch_all(&mut self, resolver: impl ViewResolver + 'static) {
        self.catch_all = Some(Arc::new(resolver));
    }

    /// The most specific resolver for `result`, if any.
    pub fn find_view_resolver(&self, result: &ViewResult) -> Option<Arc<dyn ViewResolver>> {
        match result {
            ViewResult::View { value, type_name } => {
                let found = self.views.get(&Any::type_id(&**value)).cloned();
                debug!(view = type_name, found = found.is_some(), "View resolver lookup");
                found
            }
            ViewResult::Error(error) => {
                let root: &(dyn StdError + 'static) = &**error;
                let mut current = Some(root);
                let mut depth = 0usize;
                while let Some(e) = current {
                    if let Some(entry) = self.errors.iter().find(|entry| (entry.probe)(e)) {
                        debug!(error_type = entry.type_name, depth, "Error resolver matched");
                        return Some(entry.resolver.clone());
                    }
                    current = e.source();
                    depth += 1;
                }
                self.catch_all.clone()
            }
        }
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len() + usize::from(self.catch_all.is_some())
    }
}

impl fmt::Debug for ViewResolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewResolverRegistry")
            .field("views", &self.views.len())
            .field("errors", &self.errors.iter().map(|e| e.type_name).collect::<Vec<_>>())
            .field("catch_all", &self.catch_all.is_some())
            .finish()
    }
}

// ============================================================================
// Built-in views
// ============================================================================

/// A JSON document rendered as `application/json`.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonView {
    pub payload: serde_json::Value,
    pub status: StatusCode,
}

impl JsonView {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            status: StatusCode::OK,
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

/// A JSON document wrapped in a JavaScript callback invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonpView {
    pub callback: String,
    pub payload: serde_json::Value,
}

impl JsonpView {
    pub fn new(callback: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            callback: callback.into(),
            payload,
        }
    }
}

/// A bare status code with an optional plain-text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusView {
    pub status: StatusCode,
    pub message: Option<String>,
}

impl StatusView {
    pub fn new(status: StatusCode) -> Self {
        Self { status, message: None }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// A redirect to another location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectView {
    pub location: String,
    pub status: StatusCode,
}

impl RedirectView {
    /// A `302 Found` redirect.
    pub fn to(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            status: StatusCode::FOUND,
        }
    }

    /// A `301 Moved Permanently` redirect.
    pub fn permanent(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            status: StatusCode::MOVED_PERMANENTLY,
        }
    }
}

fn expect_view<'a, V: Any>(result: &'a ViewResult) -> Result<&'a V, Error> {
    result.downcast_view::<V>().ok_or_else(|| {
        Error::Render(format!(
            "{} cannot render {}",
            std::any::type_name::<V>(),
            result.type_name()
        ))
    })
}

/// Whether `callback` is a safe JavaScript identifier path such as `cb` or `app.handlers.done`.
pub fn is_valid_callback(callback: &str) -> bool {
    !callback.is_empty()
        && callback.split('.').all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        })
}

pub struct JsonViewResolver;

impl ViewResolver for JsonViewResolver {
    fn resolve(&self, result: &ViewResult, _request: &HttpRequest, response: &HttpResponse) -> Result<(), Error> {
        let view = expect_view::<JsonView>(result)?;
        let body = serde_json::to_vec(&view.payload)?;
        response.set_status(view.status);
        response.set_content_type("application/json");
        response.write(&body);
        Ok(())
    }
}

pub struct JsonpViewResolver;

impl ViewResolver for JsonpViewResolver {
    fn resolve(&self, result: &ViewResult, _request: &HttpRequest, response: &HttpResponse) -> Result<(), Error> {
        let view = expect_view::<JsonpView>(result)?;
        if !is_valid_callback(&view.callback) {
            return Err(Error::Render(format!("invalid JSONP callback '{}'", view.callback)));
        }
        let json = serde_json::to_string(&view.payload)?;
        response.set_content_type("application/javascript");
        response.write(format!("{}({});", view.callback, json).as_bytes());
        Ok(())
    }
}

pub struct StatusViewResolver;

impl ViewResolver for StatusViewResolver {
    fn resolve(&self, result: &ViewResult, _request: &HttpRequest, response: &HttpResponse) -> Result<(), Error> {
        let view = expect_view::<StatusView>(result)?;
        response.set_status(view.status);
        if let Some(message) = &view.message {
            response.set_content_type("text/plain; charset=utf-8");
            response.write(message.as_bytes());
        }
        Ok(())
    }
}

pub struct RedirectViewResolver;

impl ViewResolver for RedirectViewResolver {
    fn resolve(&self, result: &ViewResult, _request: &HttpRequest, response: &HttpResponse) -> Result<(), Error> {
        let view = expect_view::<RedirectView>(result)?;
        response.set_status(view.status);
        response.set_header(http::header::LOCATION.as_str(), view.location.clone());
        Ok(())
    }
}

/// Renders any error as a JSON body `{"error": "...", "status": 500}`.
///
/// The status comes from the pipeline error when there is one; bind errors
/// map to `400`, everything else to `500`.
pub struct ErrorViewResolver;

impl ErrorViewResolver {
    fn status_for(error: &(dyn StdError + 'static)) -> StatusCode {
        if let Some(e) = error.downcast_ref::<Error>() {
            e.status()
        } else if error.is::<BindError>() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl ViewResolver for ErrorViewResolver {
    fn resolve(&self, result: &ViewResult, _request: &HttpRequest, response: &HttpResponse) -> Result<(), Error> {
        let ViewResult::Error(error) = result else {
            return Err(Error::Render(format!("{} is not an error", result.type_name())));
        };
        let error: &(dyn StdError + 'static) = &**error;
        let status = Self::status_for(error);
        let body = serde_json::json!({
            "error": error.to_string(),
            "status": status.as_u16(),
        });
        response.set_status(status);
        response.set_content_type("application/json");
        response.write(&serde_json::to_vec(&body)?);
        Ok(())
    }
}
