//! Content negotiation for handler results.
//!
//! A handler that returns a [`NegotiatingView`] leaves the representation
//! open. The [`NegotiationChain`] picks a [`Negotiator`] for it by trying,
//! most specific first:
//!
//! 1. the content type set explicitly on the view,
//! 2. the trailing extension of the request path (`/items.json`),
//! 3. the `Accept` header, ordered by quality then specificity,
//! 4. the registry's default content type.
//!
//! The chosen negotiator turns the generic payload into a concrete view.
//!
//! # Examples
//!
//! ```
//! use bindery_core::content_negotiation::{NegotiatingView, NegotiationChain, NegotiatorRegistry};
//! use bindery_core::http::HttpRequest;
//!
//! let registry = NegotiatorRegistry::standard();
//! let request = HttpRequest::new("GET", "/items")
//!     .with_header("Accept", "application/json;q=0.7,application/javascript;q=0.8");
//! let view = NegotiatingView::new(serde_json::json!({"id": 1}));
//!
//! let negotiator = NegotiationChain::standard()
//!     .find_negotiator(&request, &view, &registry)
//!     .unwrap();
//! assert_eq!(negotiator.content_type(), "application/javascript");
//! ```

use crate::error::Error;
use crate::http::HttpRequest;
use crate::view::{JsonView, JsonpView, ViewResult};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Query parameter carrying the JSONP callback name unless configured otherwise.
pub const DEFAULT_JSONP_CALLBACK_PARAM: &str = "callback";

// ============================================================================
// Media Types
// ============================================================================

/// A media type (MIME type) with optional parameters, lower-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    /// The type (e.g., "application", "text")
    pub type_: String,
    /// The subtype (e.g., "json", "javascript")
    pub subtype: String,
    /// Parameters other than `q`, in header order.
    pub params: Vec<(String, String)>,
}

impl MediaType {
    pub fn new(type_: impl Into<String>, subtype: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            subtype: subtype.into(),
            params: Vec::new(),
        }
    }

    /// `application/json`
    pub fn json() -> Self {
        Self::new("application", "json")
    }

    /// `application/javascript`
    pub fn javascript() -> Self {
        Self::new("application", "javascript")
    }

    /// Parse a media type, dropping any quality parameter.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.trim().split(';');
        let (type_, subtype) = parts.next()?.trim().split_once('/')?;
        let (type_, subtype) = (type_.trim(), subtype.trim());
        if type_.is_empty() || subtype.is_empty() {
            return None;
        }

        let params = parts
            .filter_map(|param| {
                let (key, value) = param.trim().split_once('=')?;
                let key = key.trim().to_ascii_lowercase();
                (key != "q").then(|| (key, value.trim().trim_matches('"').to_string()))
            })
            .collect();

        Some(Self {
            type_: type_.to_ascii_lowercase(),
            subtype: subtype.to_ascii_lowercase(),
            params,
        })
    }

    /// `type/subtype` without parameters.
    pub fn mime_type(&self) -> String {
        format!("{}/{}", self.type_, self.subtype)
    }

    /// Whether either part is `*`.
    pub fn is_wildcard(&self) -> bool {
        self.type_ == "*" || self.subtype == "*"
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_, self.subtype)?;
        for (key, value) in &self.params {
            write!(f, ";{}={}", key, value)?;
        }
        Ok(())
    }
}

/// Lower-cased `type/subtype` of a content type string, without parameters.
pub fn base_media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

// ============================================================================
// Accept Header
// ============================================================================

/// One parsed segment of an `Accept` header.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptsComponent {
    pub media_type: MediaType,
    /// Quality in `[0, 1]`; 1.0 when absent or unparsable.
    pub quality: f32,
    /// Number of media type parameters, not counting `q`.
    pub specificity: usize,
}

impl AcceptsComponent {
    /// Parse one comma-separated segment of an `Accept` header.
    ///
    /// ```
    /// use bindery_core::content_negotiation::AcceptsComponent;
    ///
    /// let c = AcceptsComponent::parse("text/html;level=1;q=0.5").unwrap();
    /// assert_eq!(c.media_type.mime_type(), "text/html");
    /// assert_eq!(c.quality, 0.5);
    /// assert_eq!(c.specificity, 1);
    /// ```
    pub fn parse(segment: &str) -> Option<Self> {
        let media_type = MediaType::parse(segment)?;
        let quality = segment
            .split(';')
            .skip(1)
            .find_map(|param| {
                let (key, value) = param.trim().split_once('=')?;
                key.trim().eq_ignore_ascii_case("q").then(|| value.trim())
            })
            .map(parse_quality)
            .unwrap_or(1.0);

        Some(Self {
            specificity: media_type.params.len(),
            media_type,
            quality,
        })
    }

    /// Components with quality zero are explicitly refused.
    pub fn is_acceptable(&self) -> bool {
        self.quality > 0.0
    }

    /// Preference order: higher quality first, then more parameters.
    pub fn preference(&self, other: &Self) -> Ordering {
        other
            .quality
            .partial_cmp(&self.quality)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.specificity.cmp(&self.specificity))
    }
}

impl fmt::Display for AcceptsComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.media_type)?;
        if self.quality < 1.0 {
            write!(f, ";q={}", self.quality)?;
        }
        Ok(())
    }
}

fn parse_quality(raw: &str) -> f32 {
    raw.parse::<f32>()
        .ok()
        .filter(|q| q.is_finite())
        .map(|q| q.clamp(0.0, 1.0))
        .unwrap_or(1.0)
}

/// Parse an `Accept` header into components in preference order.
///
/// The sort is stable, so equally preferred components keep header order.
pub fn parse_accept(header: &str) -> Vec<AcceptsComponent> {
    let mut components: Vec<AcceptsComponent> = header
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(AcceptsComponent::parse)
        .collect();
    components.sort_by(AcceptsComponent::preference);
    components
}

// ============================================================================
// Negotiators
// ============================================================================

/// A handler result whose representation is chosen by negotiation.
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiatingView {
    pub payload: serde_json::Value,
    /// Forces a content type, bypassing the request's preferences.
    pub content_type: Option<String>,
}

impl NegotiatingView {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            content_type: None,
        }
    }

    /// Serialize `data` as the payload.
    pub fn from_serialize<T: Serialize>(data: &T) -> Result<Self, Error> {
        Ok(Self::new(serde_json::to_value(data)?))
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Turns a negotiating view into a concrete view for one content type.
pub trait Negotiator: Send + Sync {
    /// The content type this negotiator produces.
    fn content_type(&self) -> &str;

    fn negotiate(&self, view: NegotiatingView, request: &HttpRequest) -> ViewResult;
}

/// Produces a [`JsonView`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonNegotiator;

impl Negotiator for JsonNegotiator {
    fn content_type(&self) -> &str {
        "application/json"
    }

    fn negotiate(&self, view: NegotiatingView, _request: &HttpRequest) -> ViewResult {
        ViewResult::view(JsonView::new(view.payload))
    }
}

/// Produces a [`JsonpView`] whose callback is read from a query parameter.
#[derive(Debug, Clone)]
pub struct JsonpNegotiator {
    callback_param: String,
}

impl JsonpNegotiator {
    pub fn new(callback_param: impl Into<String>) -> Self {
        Self {
            callback_param: callback_param.into(),
        }
    }

    pub fn callback_param(&self) -> &str {
        &self.callback_param
    }
}

impl Default for JsonpNegotiator {
    fn default() -> Self {
        Self::new(DEFAULT_JSONP_CALLBACK_PARAM)
    }
}

impl Negotiator for JsonpNegotiator {
    fn content_type(&self) -> &str {
        "application/javascript"
    }

    fn negotiate(&self, view: NegotiatingView, request: &HttpRequest) -> ViewResult {
        let callback = request
            .query(&self.callback_param)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_JSONP_CALLBACK_PARAM);
        ViewResult::view(JsonpView::new(callback, view.payload))
    }
}

/// Negotiators by media type, plus extension mappings and a default.
#[derive(Clone, Default)]
pub struct NegotiatorRegistry {
    negotiators: BTreeMap<String, Arc<dyn Negotiator>>,
    extensions: HashMap<String, String>,
    default_content_type: Option<String>,
}

impl NegotiatorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// JSON and JSONP negotiators, `.json`/`.js` extensions, JSON by default.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(JsonNegotiator);
        registry.register(JsonpNegotiator::default());
        registry.map_extension("json", "application/json");
        registry.map_extension("js", "application/javascript");
        registry.set_default_content_type("application/json");
        registry
    }

    /// Register `negotiator` under its own content type.
    pub fn register(&mut self, negotiator: impl Negotiator + 'static) {
        let media_type = base_media_type(negotiator.content_type());
        self.register_as(media_type, Arc::new(negotiator));
    }

    /// Register `negotiator` under an explicit media type.
    pub fn register_as(&mut self, media_type: impl AsRef<str>, negotiator: Arc<dyn Negotiator>) {
        self.negotiators.insert(base_media_type(media_type.as_ref()), negotiator);
    }

    pub fn map_extension(&mut self, extension: impl Into<String>, media_type: impl AsRef<str>) {
        self.extensions.insert(
            extension.into().trim_start_matches('.').to_ascii_lowercase(),
            base_media_type(media_type.as_ref()),
        );
    }

    pub fn set_default_content_type(&mut self, media_type: impl AsRef<str>) {
        self.default_content_type = Some(base_media_type(media_type.as_ref()));
    }

    pub fn default_content_type(&self) -> Option<&str> {
        self.default_content_type.as_deref()
    }

    /// The negotiator for a content type. Parameters and case are ignored.
    pub fn get(&self, content_type: &str) -> Option<Arc<dyn Negotiator>> {
        self.negotiators.get(&base_media_type(content_type)).cloned()
    }

    pub fn media_type_for_extension(&self, extension: &str) -> Option<&str> {
        self.extensions
            .get(&extension.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn default_negotiator(&self) -> Option<Arc<dyn Negotiator>> {
        self.default_content_type.as_deref().and_then(|ct| self.get(ct))
    }

    /// Registered media types, sorted.
    pub fn media_types(&self) -> Vec<&str> {
        self.negotiators.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for NegotiatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiatorRegistry")
            .field("media_types", &self.media_types())
            .field("extensions", &self.extensions)
            .field("default_content_type", &self.default_content_type)
            .finish()
    }
}

// ============================================================================
// Strategies
// ============================================================================

/// One way of choosing a negotiator for a request.
pub trait NegotiationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn find_negotiator(
        &self,
        request: &HttpRequest,
        view: &NegotiatingView,
        registry: &NegotiatorRegistry,
    ) -> Option<Arc<dyn Negotiator>>;
}

/// Uses the content type set on the view.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentTypeStrategy;

impl NegotiationStrategy for ContentTypeStrategy {
    fn name(&self) -> &'static str {
        "content-type"
    }

    fn find_negotiator(
        &self,
        _request: &HttpRequest,
        view: &NegotiatingView,
        registry: &NegotiatorRegistry,
    ) -> Option<Arc<dyn Negotiator>> {
        registry.get(view.content_type.as_deref()?)
    }
}

/// Uses the extension of the last request path segment.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileExtensionStrategy;

impl NegotiationStrategy for FileExtensionStrategy {
    fn name(&self) -> &'static str {
        "file-extension"
    }

    fn find_negotiator(
        &self,
        request: &HttpRequest,
        _view: &NegotiatingView,
        registry: &NegotiatorRegistry,
    ) -> Option<Arc<dyn Negotiator>> {
        let media_type = registry.media_type_for_extension(request.path_extension()?)?;
        registry.get(media_type)
    }
}

/// Uses the most preferred registered media type in the `Accept` header.
///
/// Wildcard ranges such as `*/*` never match a negotiator directly; they
/// leave the choice to the default strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptHeaderStrategy;

impl NegotiationStrategy for AcceptHeaderStrategy {
    fn name(&self) -> &'static str {
        "accept-header"
    }

    fn find_negotiator(
        &self,
        request: &HttpRequest,
        _view: &NegotiatingView,
        registry: &NegotiatorRegistry,
    ) -> Option<Arc<dyn Negotiator>> {
        let header = request.header(http::header::ACCEPT.as_str())?;
        parse_accept(header)
            .iter()
            .filter(|c| c.is_acceptable())
            .find_map(|c| registry.get(&c.media_type.mime_type()))
    }
}

/// Falls back to the registry's default content type.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNegotiatorStrategy;

impl NegotiationStrategy for DefaultNegotiatorStrategy {
    fn name(&self) -> &'static str {
        "default"
    }

    fn find_negotiator(
        &self,
        _request: &HttpRequest,
        _view: &NegotiatingView,
        registry: &NegotiatorRegistry,
    ) -> Option<Arc<dyn Negotiator>> {
        registry.default_negotiator()
    }
}

/// Ordered negotiation strategies; the first to find a negotiator wins.
#[derive(Clone, Default)]
pub struct NegotiationChain {
    strategies: Vec<Arc<dyn NegotiationStrategy>>,
}

impl NegotiationChain {
    /// A chain with no strategies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Content type, file extension, `Accept` header, default.
    pub fn standard() -> Self {
        Self::new()
            .with(ContentTypeStrategy)
            .with(FileExtensionStrategy)
            .with(AcceptHeaderStrategy)
            .with(DefaultNegotiatorStrategy)
    }

    pub fn with(mut self, strategy: impl NegotiationStrategy + 'static) -> Self {
        self.strategies.push(Arc::new(strategy));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn find_negotiator(
        &self,
        request: &HttpRequest,
        view: &NegotiatingView,
        registry: &NegotiatorRegistry,
    ) -> Option<Arc<dyn Negotiator>> {
        self.strategies.iter().find_map(|strategy| {
            let found = strategy.find_negotiator(request, view, registry)?;
            debug!(
                strategy = strategy.name(),
                content_type = found.content_type(),
                "Negotiator selected"
            );
            Some(found)
        })
    }

    /// Negotiate `view` into a concrete view result.
    ///
    /// Fails with [`Error::NotAcceptable`] when no strategy finds a negotiator.
    pub fn negotiate(
        &self,
        request: &HttpRequest,
        view: NegotiatingView,
        registry: &NegotiatorRegistry,
    ) -> Result<ViewResult, Error> {
        match self.find_negotiator(request, &view, registry) {
            Some(negotiator) => Ok(negotiator.negotiate(view, request)),
            None => {
                let accept = request.header(http::header::ACCEPT.as_str()).unwrap_or("");
                debug!(accept, "No negotiator found");
                Err(Error::NotAcceptable(accept.to_string()))
            }
        }
    }
}

impl fmt::Debug for NegotiationChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiationChain")
            .field("strategies", &self.names())
            .finish()
    }
}
