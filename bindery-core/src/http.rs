// HTTP request and response abstractions consumed by the binding pipeline

use crate::param::{Value, value};
use bytes::Bytes;
use http::StatusCode;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};

/// The request body stream.
///
/// A body is handed out at most once; see [`HttpRequest::take_body`].
pub enum RequestBody {
    /// A fully buffered body.
    Bytes(Bytes),
    /// A streaming body read on demand.
    Reader(Box<dyn Read + Send>),
}

impl RequestBody {
    /// Drain the stream into memory.
    pub fn read_all(self) -> io::Result<Bytes> {
        match self {
            RequestBody::Bytes(bytes) => Ok(bytes),
            RequestBody::Reader(mut reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf)?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            RequestBody::Reader(_) => f.write_str("Reader"),
        }
    }
}

/// HTTP request wrapper
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    /// Header pairs in arrival order. Lookups ignore name case.
    pub headers: Vec<(String, String)>,
    /// Query string pairs in arrival order.
    pub query_params: Vec<(String, String)>,
    session: Option<Arc<Session>>,
    body: Mutex<Option<RequestBody>>,
}

impl HttpRequest {
    /// Create a request. A query string in `target` is split into `query_params`.
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        let target = target.into();
        let (path, query_params) = match target.split_once('?') {
            Some((path, query)) => (
                path.to_string(),
                serde_urlencoded::from_str::<Vec<(String, String)>>(query).unwrap_or_default(),
            ),
            None => (target, Vec::new()),
        };

        Self {
            method: method.into(),
            path,
            headers: Vec::new(),
            query_params,
            session: None,
            body: Mutex::new(None),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push((name.into(), value.into()));
        self
    }

    pub fn with_body(self, body: impl Into<Bytes>) -> Self {
        *self.body.lock() = Some(RequestBody::Bytes(body.into()));
        self
    }

    pub fn with_reader(self, reader: impl Read + Send + 'static) -> Self {
        *self.body.lock() = Some(RequestBody::Reader(Box::new(reader)));
        self
    }

    pub fn with_session(mut self, session: Arc<Session>) -> Self {
        self.session = Some(session);
        self
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of a header, matched case-insensitively.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// First value of a query parameter.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query_params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// The raw `Content-Type` header.
    pub fn content_type(&self) -> Option<&str> {
        self.header(http::header::CONTENT_TYPE.as_str())
    }

    /// The `Content-Type` without parameters, lower-cased.
    pub fn media_type(&self) -> Option<String> {
        self.content_type().map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }

    /// Cookies sent in `Cookie` headers.
    pub fn cookies(&self) -> Vec<Cookie> {
        self.header_values(http::header::COOKIE.as_str())
            .into_iter()
            .flat_map(Cookie::parse_header)
            .collect()
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    /// Trailing extension of the last path segment, e.g. `json` for `/items.json`.
    pub fn path_extension(&self) -> Option<&str> {
        let last = self.path.rsplit('/').next()?;
        let (stem, ext) = last.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext)
    }

    /// Whether the body stream is still available.
    pub fn has_body(&self) -> bool {
        self.body.lock().is_some()
    }

    /// Take the body stream. Later calls return `None`.
    pub fn take_body(&self) -> Option<RequestBody> {
        self.body.lock().take()
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("headers", &self.headers)
            .field("query_params", &self.query_params)
            .field("has_session", &self.session.is_some())
            .field("has_body", &self.has_body())
            .finish()
    }
}

/// HTTP response wrapper.
///
/// Shared as `Arc<HttpResponse>` between the dispatcher, handlers that take
/// the response as a parameter, and view resolvers, so all state is behind
/// interior mutability.
#[derive(Debug)]
pub struct HttpResponse {
    status: AtomicU16,
    headers: Mutex<Vec<(String, String)>>,
    cookies: Mutex<Vec<Cookie>>,
    body: Mutex<Vec<u8>>,
    committed: AtomicBool,
}

impl HttpResponse {
    pub fn new() -> Self {
        Self {
            status: AtomicU16::new(StatusCode::OK.as_u16()),
            headers: Mutex::new(Vec::new()),
            cookies: Mutex::new(Vec::new()),
            body: Mutex::new(Vec::new()),
            committed: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status.load(Ordering::Acquire))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn set_status(&self, status: StatusCode) {
        self.status.store(status.as_u16(), Ordering::Release);
    }

    /// Replace every value of a header.
    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let mut headers = self.headers.lock();
        headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        headers.push((name, value.into()));
    }

    pub fn add_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.lock().push((name.into(), value.into()));
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .lock()
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    pub fn headers(&self) -> Vec<(String, String)> {
        self.headers.lock().clone()
    }

    pub fn set_content_type(&self, content_type: impl Into<String>) {
        self.set_header(http::header::CONTENT_TYPE.as_str(), content_type);
    }

    pub fn add_cookie(&self, cookie: Cookie) {
        self.cookies.lock().push(cookie);
    }

    pub fn cookies(&self) -> Vec<Cookie> {
        self.cookies.lock().clone()
    }

    /// Append bytes to the body. The response counts as committed afterwards.
    pub fn write(&self, bytes: &[u8]) {
        self.body.lock().extend_from_slice(bytes);
        self.committed.store(true, Ordering::Release);
    }

    pub fn body(&self) -> Vec<u8> {
        self.body.lock().clone()
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body.lock()).into_owned()
    }

    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::Acquire)
    }
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new()
    }
}

/// A request or response cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub max_age: Option<i64>,
    pub http_only: bool,
    pub secure: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            max_age: None,
            http_only: false,
            secure: false,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    /// Parse a `Cookie` request header (`a=1; b=2`). Values are percent-decoded.
    pub fn parse_header(header: &str) -> Vec<Cookie> {
        header
            .split(';')
            .filter_map(|pair| {
                let (name, raw) = pair.trim().split_once('=')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                let raw = raw.trim().trim_matches('"');
                let value = urlencoding::decode(raw)
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| raw.to_string());
                Some(Cookie::new(name, value))
            })
            .collect()
    }

    /// Render as a `Set-Cookie` header value.
    pub fn to_header_value(&self) -> String {
        let mut out = format!("{}={}", self.name, urlencoding::encode(&self.value));
        if let Some(path) = &self.path {
            out.push_str(&format!("; Path={}", path));
        }
        if let Some(domain) = &self.domain {
            out.push_str(&format!("; Domain={}", domain));
        }
        if let Some(max_age) = self.max_age {
            out.push_str(&format!("; Max-Age={}", max_age));
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if self.secure {
            out.push_str("; Secure");
        }
        out
    }
}

/// Server-side session state keyed by attribute name.
pub struct Session {
    id: String,
    attributes: RwLock<HashMap<String, Value>>,
}

impl Session {
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: RwLock::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_attribute<T: std::any::Any + Send + Sync>(&self, name: impl Into<String>, v: T) {
        self.attributes.write().insert(name.into(), value(v));
    }

    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.attributes.read().get(name).cloned()
    }

    pub fn attribute_as<T: std::any::Any + Clone>(&self, name: &str) -> Option<T> {
        self.attributes
            .read()
            .get(name)
            .and_then(|v| v.downcast_ref::<T>().cloned())
    }

    pub fn remove_attribute(&self, name: &str) -> Option<Value> {
        self.attributes.write().remove(name)
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.attributes.read().keys().cloned().collect()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("attributes", &self.attribute_names())
            .finish()
    }
}

/// A file uploaded in a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Form field the file was sent under.
    pub field_name: String,
    /// Original filename as sent by the client.
    pub filename: String,
    /// Content type (MIME type)
    pub content_type: String,
    pub data: Bytes,
}

impl UploadedFile {
    pub fn new(
        field_name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            filename: filename.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Get file extension
    pub fn extension(&self) -> Option<&str> {
        self.filename.rsplit_once('.').map(|(_, ext)| ext)
    }
}
