//! Parameter descriptions and the type descriptors binders work against.
//!
//! There is no runtime reflection here: each handler parameter is described
//! up front by a [`ParameterDescription`], whose [`TypeDescriptor`] records
//! the concrete Rust type (by `TypeId`), a display name and the
//! [`TypeKind`] that tells binders how the type may be sourced.
//!
//! ```
//! use bindery_core::param::{ParameterDescription, TypeDescriptor};
//!
//! let id = ParameterDescription::new("id", TypeDescriptor::scalar::<i64>());
//! assert_eq!(id.name(), "id");
//! assert!(id.ty().is_scalar());
//! ```

use crate::http::{Cookie, HttpRequest, HttpResponse, Session, UploadedFile};
use serde::de::DeserializeOwned;
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A bound parameter value.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Decodes a JSON document into a bound value of a specific type.
pub type JsonDecoder = fn(serde_json::Value) -> Result<Value, serde_json::Error>;

/// Matches raw text against the constants of an enum type.
pub type EnumMatcher = fn(&str) -> Option<Value>;

/// Assembles element values into a collection value.
pub type CollectionBuilder = fn(Vec<Value>) -> Option<Value>;

/// Wrap a plain value as a bound [`Value`].
pub fn value<T: Any + Send + Sync>(v: T) -> Value {
    Arc::new(v)
}

/// Enum types that can be bound from text by constant name.
///
/// Matching trims surrounding whitespace and ignores ASCII case.
///
/// ```
/// use bindery_core::param::BindableEnum;
///
/// #[derive(Debug, Clone, Copy, PartialEq)]
/// enum Shade { Light, Dark }
///
/// impl BindableEnum for Shade {
///     const VARIANTS: &'static [(&'static str, Self)] = &[("LIGHT", Shade::Light), ("DARK", Shade::Dark)];
/// }
///
/// assert_eq!(Shade::from_name("  dark "), Some(Shade::Dark));
/// assert_eq!(Shade::from_name("dusk"), None);
/// ```
pub trait BindableEnum: Copy + Any + Send + Sync + 'static {
    /// Constant names and their values, in declaration order.
    const VARIANTS: &'static [(&'static str, Self)];

    fn from_name(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::VARIANTS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(raw))
            .map(|(_, v)| *v)
    }
}

fn match_enum<E: BindableEnum>(raw: &str) -> Option<Value> {
    E::from_name(raw).map(|v| value(v))
}

fn decode_enum<E: BindableEnum>(json: serde_json::Value) -> Result<Value, serde_json::Error> {
    use serde::de::Error as _;
    match &json {
        serde_json::Value::String(s) => E::from_name(s).map(|v| value(v)).ok_or_else(|| {
            serde_json::Error::custom(format!(
                "unknown variant `{}` for {}",
                s,
                std::any::type_name::<E>()
            ))
        }),
        other => Err(serde_json::Error::custom(format!(
            "expected a string for {}, found {}",
            std::any::type_name::<E>(),
            other
        ))),
    }
}

fn decode<T: DeserializeOwned + Any + Send + Sync>(
    json: serde_json::Value,
) -> Result<Value, serde_json::Error> {
    serde_json::from_value::<T>(json).map(|v| value(v))
}

fn build_vec<T: Any + Send + Sync + Clone>(items: Vec<Value>) -> Option<Value> {
    items
        .iter()
        .map(|item| item.downcast_ref::<T>().cloned())
        .collect::<Option<Vec<T>>>()
        .map(|v| value(v))
}

/// How a type may be sourced from a request.
#[derive(Clone)]
pub enum TypeKind {
    /// Converted from text through the conversion registry.
    Scalar,
    /// Matched by constant name.
    Enum(EnumMatcher),
    /// A compound object deserialized as a whole.
    Bean,
    /// A homogeneous list; each element is bound as `element`.
    Collection {
        element: Box<TypeDescriptor>,
        build: CollectionBuilder,
    },
    /// A string-keyed map deserialized as a whole.
    Map,
    /// The live request. Handlers taking it own the body stream.
    Request,
    /// The live response.
    Response,
    /// The HTTP session.
    Session,
    /// A request cookie.
    Cookie,
    /// One uploaded multipart file.
    File,
    /// All uploaded multipart files under a field name.
    Files,
    /// Nothing in the pipeline can produce this type.
    Opaque,
}

impl fmt::Debug for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeKind::Scalar => f.write_str("Scalar"),
            TypeKind::Enum(_) => f.write_str("Enum"),
            TypeKind::Bean => f.write_str("Bean"),
            TypeKind::Collection { element, .. } => {
                f.debug_struct("Collection").field("element", element).finish()
            }
            TypeKind::Map => f.write_str("Map"),
            TypeKind::Request => f.write_str("Request"),
            TypeKind::Response => f.write_str("Response"),
            TypeKind::Session => f.write_str("Session"),
            TypeKind::Cookie => f.write_str("Cookie"),
            TypeKind::File => f.write_str("File"),
            TypeKind::Files => f.write_str("Files"),
            TypeKind::Opaque => f.write_str("Opaque"),
        }
    }
}

/// Describes the declared type of a handler parameter.
#[derive(Clone)]
pub struct TypeDescriptor {
    id: TypeId,
    name: &'static str,
    kind: TypeKind,
    json: Option<JsonDecoder>,
}

impl TypeDescriptor {
    fn new<T: Any>(kind: TypeKind, json: Option<JsonDecoder>) -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            kind,
            json,
        }
    }

    /// A text-convertible type such as `i32`, `Uuid` or `NaiveDate`.
    pub fn scalar<T: DeserializeOwned + Any + Send + Sync>() -> Self {
        Self::new::<T>(TypeKind::Scalar, Some(decode::<T>))
    }

    /// An enum bound by constant name.
    pub fn enumeration<E: BindableEnum>() -> Self {
        Self::new::<E>(TypeKind::Enum(match_enum::<E>), Some(decode_enum::<E>))
    }

    /// A compound object bound from a whole JSON document.
    pub fn bean<T: DeserializeOwned + Any + Send + Sync>() -> Self {
        Self::new::<T>(TypeKind::Bean, Some(decode::<T>))
    }

    /// A `Vec<T>` whose elements are described by `element`.
    pub fn list<T: DeserializeOwned + Any + Send + Sync + Clone>(element: TypeDescriptor) -> Self {
        debug_assert_eq!(element.id, TypeId::of::<T>(), "element descriptor must describe T");
        Self::new::<Vec<T>>(
            TypeKind::Collection {
                element: Box::new(element),
                build: build_vec::<T>,
            },
            Some(decode::<Vec<T>>),
        )
    }

    /// A string-keyed map, e.g. `HashMap<String, serde_json::Value>`.
    pub fn map<T: DeserializeOwned + Any + Send + Sync>() -> Self {
        Self::new::<T>(TypeKind::Map, Some(decode::<T>))
    }

    pub fn request() -> Self {
        Self::new::<HttpRequest>(TypeKind::Request, None)
    }

    pub fn response() -> Self {
        Self::new::<HttpResponse>(TypeKind::Response, None)
    }

    pub fn session() -> Self {
        Self::new::<Session>(TypeKind::Session, None)
    }

    pub fn cookie() -> Self {
        Self::new::<Cookie>(TypeKind::Cookie, None)
    }

    pub fn file() -> Self {
        Self::new::<UploadedFile>(TypeKind::File, None)
    }

    pub fn files() -> Self {
        Self::new::<Vec<UploadedFile>>(TypeKind::Files, None)
    }

    /// A type no binder knows how to produce.
    pub fn opaque<T: Any>() -> Self {
        Self::new::<T>(TypeKind::Opaque, None)
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    pub fn is<T: Any>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, TypeKind::Scalar)
    }

    pub fn is_enum(&self) -> bool {
        matches!(self.kind, TypeKind::Enum(_))
    }

    /// Compound types a JSON document can be deserialized into as a whole.
    pub fn is_bindable_compound(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Bean | TypeKind::Collection { .. } | TypeKind::Map
        )
    }

    /// Types whose presence means the handler reads the body stream itself.
    pub fn is_body_consuming(&self) -> bool {
        matches!(self.kind, TypeKind::Request)
    }

    /// Decode a JSON value into this type, if the type supports JSON.
    pub fn decode_json(&self, json: serde_json::Value) -> Option<Result<Value, serde_json::Error>> {
        self.json.map(|decode| decode(json))
    }
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.name == other.name
    }
}

impl Eq for TypeDescriptor {}

impl Hash for TypeDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// One target parameter of a handler: its name and declared type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParameterDescription {
    name: Arc<str>,
    ty: TypeDescriptor,
}

impl ParameterDescription {
    pub fn new(name: impl Into<Arc<str>>, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &TypeDescriptor {
        &self.ty
    }
}

impl fmt::Display for ParameterDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.ty.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Level {
        Low,
        High,
    }

    impl BindableEnum for Level {
        const VARIANTS: &'static [(&'static str, Self)] = &[("LOW", Level::Low), ("HIGH", Level::High)];
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Pojo {
        name: String,
    }

    #[test]
    fn test_equality_uses_name_and_type() {
        let a = ParameterDescription::new("id", TypeDescriptor::scalar::<i32>());
        let b = ParameterDescription::new("id", TypeDescriptor::scalar::<i32>());
        let c = ParameterDescription::new("id", TypeDescriptor::scalar::<i64>());
        let d = ParameterDescription::new("other", TypeDescriptor::scalar::<i32>());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_enum_matching_is_trimmed_and_case_insensitive() {
        assert_eq!(Level::from_name(" high\t"), Some(Level::High));
        assert_eq!(Level::from_name("Low"), Some(Level::Low));
        assert_eq!(Level::from_name("medium"), None);

        let ty = TypeDescriptor::enumeration::<Level>();
        let TypeKind::Enum(matcher) = ty.kind() else {
            panic!("expected enum kind");
        };
        let bound = matcher("HIGH").unwrap();
        assert_eq!(bound.downcast_ref::<Level>(), Some(&Level::High));
    }

    #[test]
    fn test_kind_predicates() {
        assert!(TypeDescriptor::bean::<Pojo>().is_bindable_compound());
        assert!(TypeDescriptor::list::<i32>(TypeDescriptor::scalar::<i32>()).is_bindable_compound());
        assert!(!TypeDescriptor::request().is_bindable_compound());
        assert!(!TypeDescriptor::cookie().is_bindable_compound());
        assert!(TypeDescriptor::request().is_body_consuming());
        assert!(!TypeDescriptor::response().is_body_consuming());
    }

    #[test]
    fn test_decode_json_bean() {
        let ty = TypeDescriptor::bean::<Pojo>();
        let bound = ty
            .decode_json(serde_json::json!({"name": "x"}))
            .unwrap()
            .unwrap();
        assert_eq!(bound.downcast_ref::<Pojo>(), Some(&Pojo { name: "x".into() }));
        assert!(TypeDescriptor::opaque::<Pojo>().decode_json(serde_json::json!({})).is_none());
    }

    #[test]
    fn test_build_vec() {
        let TypeKind::Collection { build, .. } =
            TypeDescriptor::list::<i32>(TypeDescriptor::scalar::<i32>()).kind().clone()
        else {
            panic!("expected collection kind");
        };
        let list = build(vec![value(1i32), value(2i32)]).unwrap();
        assert_eq!(list.downcast_ref::<Vec<i32>>(), Some(&vec![1, 2]));
        assert!(build(vec![value("nope".to_string())]).is_none());
    }
}
