//! Request dispatch: binding, invocation, negotiation and rendering.
//!
//! ```
//! use bindery_core::dispatch::{Dispatcher, Handler, Outcome};
//! use bindery_core::http::{HttpRequest, HttpResponse};
//! use bindery_core::param::{ParameterDescription, TypeDescriptor};
//! use http::StatusCode;
//! use std::sync::Arc;
//!
//! let greet = Handler::new(
//!     "greet",
//!     [ParameterDescription::new("name", TypeDescriptor::scalar::<String>())],
//!     |args| {
//!         let name = args.value_of::<String>("name").cloned().unwrap_or_default();
//!         Ok(Outcome::negotiate(&serde_json::json!({ "hello": name }))?)
//!     },
//! );
//! let dispatcher = Dispatcher::builder().route("GET", "/greet/{name}", greet).build();
//!
//! let response = Arc::new(HttpResponse::new());
//! let status = dispatcher.handle(Arc::new(HttpRequest::new("GET", "/greet/ada")), &response);
//! assert_eq!(status, StatusCode::OK);
//! assert_eq!(response.body_string(), r#"{"hello":"ada"}"#);
//! ```

use crate::bind::{Binder, BinderChain};
use crate::binding_map::BindingMap;
use crate::content_negotiation::{
    JsonpNegotiator, NegotiatingView, NegotiationChain, Negotiator, NegotiatorRegistry,
};
use crate::context::RequestContext;
use crate::convert::ConversionRegistry;
use crate::error::{BoxError, Error};
use crate::http::{HttpRequest, HttpResponse};
use crate::multipart::MultipartLimits;
use crate::param::{ParameterDescription, Value};
use crate::route::{PathPattern, PathVariables};
use crate::view::{ViewResolver, ViewResolverRegistry, ViewResult};
use http::StatusCode;
use serde::Serialize;
use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// What a handler produced.
#[derive(Debug)]
pub enum Outcome {
    /// A payload whose representation is left to content negotiation.
    Negotiate(NegotiatingView),
    /// A concrete view or error to resolve directly.
    View(ViewResult),
    /// The handler wrote the response itself.
    Handled,
}

impl Outcome {
    /// Serialize `data` into a negotiating view.
    pub fn negotiate<T: Serialize>(data: &T) -> Result<Self, Error> {
        Ok(Outcome::Negotiate(NegotiatingView::from_serialize(data)?))
    }

    pub fn view<V: Any + Send + Sync>(view: V) -> Self {
        Outcome::View(ViewResult::view(view))
    }
}

/// Handler body: receives the bound parameters.
pub type Invoke = dyn Fn(&BindingMap) -> Result<Outcome, BoxError> + Send + Sync;

/// A named handler with its declared parameters.
#[derive(Clone)]
pub struct Handler {
    name: String,
    parameters: Vec<ParameterDescription>,
    defaults: Vec<(ParameterDescription, Value)>,
    invoke: Arc<Invoke>,
}

impl Handler {
    pub fn new<F>(name: impl Into<String>, parameters: impl IntoIterator<Item = ParameterDescription>, invoke: F) -> Self
    where
        F: Fn(&BindingMap) -> Result<Outcome, BoxError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            parameters: parameters.into_iter().collect(),
            defaults: Vec::new(),
            invoke: Arc::new(invoke),
        }
    }

    /// Pre-bind the parameter called `name` before the binder chain runs.
    ///
    /// Binders never overwrite it. Unknown names are ignored.
    pub fn with_default(mut self, name: &str, value: Value) -> Self {
        if let Some(parameter) = self.parameters.iter().find(|p| p.name() == name) {
            self.defaults.push((parameter.clone(), value));
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[ParameterDescription] {
        &self.parameters
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("defaults", &self.defaults.len())
            .finish()
    }
}

/// A handler bound to a method and path pattern.
#[derive(Debug, Clone)]
pub struct Route {
    pub method: String,
    pub pattern: PathPattern,
    pub handler: Handler,
}

/// Runs requests through binding, the handler, negotiation and rendering.
#[derive(Debug)]
pub struct Dispatcher {
    binders: BinderChain,
    negotiation: NegotiationChain,
    negotiators: NegotiatorRegistry,
    resolvers: ViewResolverRegistry,
    routes: Vec<Route>,
}

impl Dispatcher {
    /// A dispatcher with the standard binders, negotiators and resolvers.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn add_route(&mut self, method: impl Into<String>, pattern: impl Into<String>, handler: Handler) {
        self.routes.push(Route {
            method: method.into().to_ascii_uppercase(),
            pattern: PathPattern::new(pattern),
            handler,
        });
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn binders(&self) -> &BinderChain {
        &self.binders
    }

    pub fn negotiators(&self) -> &NegotiatorRegistry {
        &self.negotiators
    }

    pub fn resolvers(&self) -> &ViewResolverRegistry {
        &self.resolvers
    }

    /// Find the route for `request` and its path variables.
    pub fn find_route(&self, request: &HttpRequest) -> Option<(&Route, PathVariables)> {
        self.routes
            .iter()
            .filter(|route| route.method.eq_ignore_ascii_case(&request.method))
            .find_map(|route| route.pattern.extract(&request.path).map(|vars| (route, vars)))
    }

    /// Bind `handler`'s parameters for one request.
    pub fn bind(
        &self,
        handler: &Handler,
        request: &Arc<HttpRequest>,
        response: &Arc<HttpResponse>,
        path_vars: &PathVariables,
    ) -> Result<BindingMap, Error> {
        let mut map = BindingMap::new(handler.parameters.iter().cloned());
        for (parameter, value) in &handler.defaults {
            map.prebind(parameter, value.clone());
        }
        self.binders.bind_all(&mut map, request, response, path_vars)?;

        if map.has_unbound() {
            let unbound: Vec<String> = map.unbound().iter().map(|p| p.name().to_string()).collect();
            debug!(handler = %handler.name, ?unbound, "Parameters left unbound");
        }
        Ok(map)
    }

    /// Dispatch one request to `handler`.
    ///
    /// The request context is published for the whole call and cleared on
    /// every exit path.
    pub fn dispatch(
        &self,
        handler: &Handler,
        request: &Arc<HttpRequest>,
        response: &Arc<HttpResponse>,
        path_vars: &PathVariables,
    ) -> Result<(), Error> {
        let _scope = RequestContext::enter(request.clone(), response.clone());
        let map = self.bind(handler, request, response, path_vars)?;

        let outcome = match (handler.invoke)(&map) {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(handler = %handler.name, error = %e, "Handler returned an error");
                return self.render(handler, ViewResult::Error(e), request, response);
            }
        };

        match outcome {
            Outcome::Handled => Ok(()),
            Outcome::View(result) => self.render(handler, result, request, response),
            Outcome::Negotiate(view) => {
                let result = self.negotiation.negotiate(request, view, &self.negotiators)?;
                self.render(handler, result, request, response)
            }
        }
    }

    /// Resolve and render a view result.
    ///
    /// An error nothing can render is returned as-is rather than masked.
    pub fn render(
        &self,
        handler: &Handler,
        result: ViewResult,
        request: &HttpRequest,
        response: &HttpResponse,
    ) -> Result<(), Error> {
        match self.resolvers.find_view_resolver(&result) {
            Some(resolver) => resolver.resolve(&result, request, response),
            None => match result {
                ViewResult::Error(source) => Err(Error::Handler {
                    handler: handler.name.clone(),
                    source,
                }),
                ViewResult::View { type_name, .. } => Err(Error::ViewResolverNotFound {
                    result_type: type_name.to_string(),
                    cause: format!("no resolver registered for {}", type_name),
                }),
            },
        }
    }

    /// Route `request`, dispatch it and report failures on the response.
    ///
    /// Negotiation failures produce `406` with no body. Other failures
    /// produce their mapped status and a small JSON error body, unless the
    /// response was already written.
    pub fn handle(&self, request: Arc<HttpRequest>, response: &Arc<HttpResponse>) -> StatusCode {
        let result = match self.find_route(&request) {
            Some((route, vars)) => self.dispatch(&route.handler, &request, response, &vars),
            None => Err(Error::RouteNotFound(format!("{} {}", request.method, request.path))),
        };

        if let Err(e) = result {
            self.write_error(&e, response);
        }
        response.status()
    }

    fn write_error(&self, e: &Error, response: &HttpResponse) {
        let status = e.status();
        if status.is_server_error() {
            error!(error = %e, chain = %source_chain(e), "Request failed");
        } else {
            debug!(error = %e, status = status.as_u16(), "Request rejected");
        }

        if response.is_committed() {
            warn!(status = status.as_u16(), "Response already committed, cannot report error");
            return;
        }
        response.set_status(status);
        if matches!(e, Error::NotAcceptable(_)) {
            return;
        }
        let body = serde_json::json!({
            "error": e.to_string(),
            "status": status.as_u16(),
        });
        response.set_content_type("application/json");
        response.write(body.to_string().as_bytes());
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn source_chain(e: &(dyn StdError + 'static)) -> String {
    let mut out = e.to_string();
    let mut current = e.source();
    while let Some(cause) = current {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        current = cause.source();
    }
    out
}

/// Builder for a [`Dispatcher`].
///
/// Starts from the standard binders, negotiators and view resolvers.
pub struct DispatcherBuilder {
    conversions: ConversionRegistry,
    limits: MultipartLimits,
    extra_binders: Vec<Arc<dyn Binder>>,
    negotiators: NegotiatorRegistry,
    negotiation: NegotiationChain,
    resolvers: ViewResolverRegistry,
    routes: Vec<(String, String, Handler)>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self {
            conversions: ConversionRegistry::new(),
            limits: MultipartLimits::default(),
            extra_binders: Vec::new(),
            negotiators: NegotiatorRegistry::standard(),
            negotiation: NegotiationChain::standard(),
            resolvers: ViewResolverRegistry::standard(),
            routes: Vec::new(),
        }
    }

    /// Register a text converter for `T`.
    pub fn converter<T, F>(mut self, convert: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&str) -> Result<T, String> + Send + Sync + 'static,
    {
        self.conversions.register::<T, F>(convert);
        self
    }

    /// Replace the conversion registry.
    pub fn conversions(mut self, conversions: ConversionRegistry) -> Self {
        self.conversions = conversions;
        self
    }

    pub fn multipart_limits(mut self, limits: MultipartLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Append a binder after the standard ones.
    pub fn binder(mut self, binder: impl Binder + 'static) -> Self {
        self.extra_binders.push(Arc::new(binder));
        self
    }

    pub fn negotiator(mut self, negotiator: impl Negotiator + 'static) -> Self {
        self.negotiators.register(negotiator);
        self
    }

    pub fn negotiator_for(mut self, media_type: &str, negotiator: Arc<dyn Negotiator>) -> Self {
        self.negotiators.register_as(media_type, negotiator);
        self
    }

    pub fn extension(mut self, extension: impl Into<String>, media_type: &str) -> Self {
        self.negotiators.map_extension(extension, media_type);
        self
    }

    pub fn default_content_type(mut self, media_type: &str) -> Self {
        self.negotiators.set_default_content_type(media_type);
        self
    }

    /// Query parameter the JSONP negotiator reads the callback name from.
    pub fn jsonp_callback_param(mut self, param: impl Into<String>) -> Self {
        self.negotiators.register(JsonpNegotiator::new(param));
        self
    }

    /// Replace the negotiation strategy chain.
    pub fn negotiation_chain(mut self, chain: NegotiationChain) -> Self {
        self.negotiation = chain;
        self
    }

    pub fn view_resolver<V: Any>(mut self, resolver: impl ViewResolver + 'static) -> Self {
        self.resolvers.register_view::<V>(resolver);
        self
    }

    pub fn error_resolver<E: StdError + 'static>(mut self, resolver: impl ViewResolver + 'static) -> Self {
        self.resolvers.register_error::<E>(resolver);
        self
    }

    /// Replace every view resolver.
    pub fn resolvers(mut self, resolvers: ViewResolverRegistry) -> Self {
        self.resolvers = resolvers;
        self
    }

    pub fn route(mut self, method: &str, pattern: &str, handler: Handler) -> Self {
        self.routes.push((method.to_string(), pattern.to_string(), handler));
        self
    }

    pub fn build(self) -> Dispatcher {
        let mut binders = BinderChain::with_config(Arc::new(self.conversions), self.limits);
        for binder in self.extra_binders {
            binders.push(binder);
        }

        let mut dispatcher = Dispatcher {
            binders,
            negotiation: self.negotiation,
            negotiators: self.negotiators,
            resolvers: self.resolvers,
            routes: Vec::new(),
        };
        for (method, pattern, handler) in self.routes {
            dispatcher.add_route(method, pattern, handler);
        }
        debug!(
            binders = ?dispatcher.binders.names(),
            media_types = ?dispatcher.negotiators.media_types(),
            routes = dispatcher.routes.len(),
            "Dispatcher built"
        );
        dispatcher
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::{TypeDescriptor, value};
    use crate::view::StatusView;

    fn echo_id() -> Handler {
        Handler::new(
            "echo",
            [ParameterDescription::new("id", TypeDescriptor::scalar::<i64>())],
            |args| Ok(Outcome::negotiate(&serde_json::json!({ "id": args.value_of::<i64>("id") }))?),
        )
    }

    #[test]
    fn test_route_not_found() {
        let dispatcher = Dispatcher::builder().route("GET", "/items/{id}", echo_id()).build();
        let response = Arc::new(HttpResponse::new());
        let status = dispatcher.handle(Arc::new(HttpRequest::new("POST", "/items/1")), &response);
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_bind_error_is_bad_request() {
        let dispatcher = Dispatcher::builder().route("GET", "/items/{id}", echo_id()).build();
        let response = Arc::new(HttpResponse::new());
        let status = dispatcher.handle(Arc::new(HttpRequest::new("GET", "/items/abc")), &response);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(response.body_string().contains("'id'"));
    }

    #[test]
    fn test_not_acceptable_has_no_body() {
        let mut negotiators = NegotiatorRegistry::new();
        negotiators.register(crate::content_negotiation::JsonNegotiator);
        let mut dispatcher = Dispatcher::builder().build();
        dispatcher.negotiators = negotiators;
        dispatcher.add_route("get", "/items/{id}", echo_id());

        let response = Arc::new(HttpResponse::new());
        let request = HttpRequest::new("GET", "/items/1").with_header("Accept", "text/csv");
        let status = dispatcher.handle(Arc::new(request), &response);
        assert_eq!(status, StatusCode::NOT_ACCEPTABLE);
        assert!(response.body().is_empty());
    }

    #[test]
    fn test_defaults_are_not_overwritten() {
        let handler = echo_id().with_default("id", value(99i64)).with_default("missing", value(1i32));
        let dispatcher = Dispatcher::new();
        let response = Arc::new(HttpResponse::new());
        let mut vars = PathVariables::new();
        vars.insert("id".into(), "5".into());
        dispatcher
            .dispatch(&handler, &Arc::new(HttpRequest::new("GET", "/")), &response, &vars)
            .unwrap();
        assert_eq!(response.body_string(), r#"{"id":99}"#);
    }

    #[test]
    fn test_unrenderable_error_propagates() {
        let failing = Handler::new("failing", [], |_| Err("database offline".into()));
        let dispatcher = Dispatcher::builder().resolvers(ViewResolverRegistry::new()).build();
        let err = dispatcher
            .dispatch(
                &failing,
                &Arc::new(HttpRequest::new("GET", "/")),
                &Arc::new(HttpResponse::new()),
                &PathVariables::new(),
            )
            .unwrap_err();
        assert!(matches!(&err, Error::Handler { handler, .. } if handler == "failing"));
        assert!(err.to_string().contains("database offline"));
    }

    #[test]
    fn test_unresolvable_view() {
        struct Unknown;
        let handler = Handler::new("unknown", [], |_| Ok(Outcome::view(Unknown)));
        let err = Dispatcher::new()
            .dispatch(
                &handler,
                &Arc::new(HttpRequest::new("GET", "/")),
                &Arc::new(HttpResponse::new()),
                &PathVariables::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::ViewResolverNotFound { .. }));
    }

    #[test]
    fn test_context_visible_during_dispatch_only() {
        let handler = Handler::new("ctx", [], |_| {
            let ctx = RequestContext::current().ok_or("no request context")?;
            Ok(Outcome::view(StatusView::new(StatusCode::ACCEPTED).with_message(ctx.request().path.clone())))
        });
        let dispatcher = Dispatcher::builder().route("PUT", "/jobs", handler).build();
        let response = Arc::new(HttpResponse::new());
        let status = dispatcher.handle(Arc::new(HttpRequest::new("PUT", "/jobs")), &response);
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(response.body_string(), "/jobs");
        assert!(RequestContext::current().is_none());
    }
}
