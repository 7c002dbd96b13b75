// Core library for the Bindery request pipeline
// Parameter binding, type coercion, content negotiation and view resolution

pub mod bind;
pub mod binding_map;
pub mod content_negotiation;
pub mod context;
pub mod convert;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod logging;
pub mod multipart;
pub mod param;
pub mod route;
pub mod view;

// Re-export commonly used types
pub use bind::*;
pub use binding_map::*;
pub use content_negotiation::*;
pub use context::*;
pub use convert::*;
pub use dispatch::*;
pub use error::*;
pub use http::{Cookie, HttpRequest, HttpResponse, RequestBody, Session, UploadedFile};
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput, LoggingError, Rotation};
pub use multipart::*;
pub use param::*;
pub use route::*;
pub use view::*;

/// Everything a handler author usually needs.
pub mod prelude {
    pub use crate::bind::{Binder, BinderChain};
    pub use crate::binding_map::BindingMap;
    pub use crate::content_negotiation::{NegotiatingView, Negotiator, NegotiatorRegistry};
    pub use crate::context::RequestContext;
    pub use crate::convert::ConversionRegistry;
    pub use crate::dispatch::{Dispatcher, Handler, Outcome};
    pub use crate::error::{BindError, BoxError, Error};
    pub use crate::http::{Cookie, HttpRequest, HttpResponse, Session, UploadedFile};
    pub use crate::param::{BindableEnum, ParameterDescription, TypeDescriptor, Value, value};
    pub use crate::view::{JsonView, JsonpView, RedirectView, StatusView, ViewResult};
}
