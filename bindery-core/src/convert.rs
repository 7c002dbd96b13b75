//! Type coercion registry.
//!
//! Converts request text (path segments, query values, headers, cookies,
//! form fields) into the declared types of handler parameters. Converters
//! are registered per `(source, target)` type pair; the default source is
//! `String`.
//!
//! Three outcomes are possible for any conversion:
//!
//! - `Ok(Some(value))`: converted.
//! - `Ok(None)`: the registry cannot produce the target type (unsupported
//!   type, or text that names no enum constant). Not an error: another
//!   binder may still supply the parameter.
//! - `Err(ConversionError)`: the target type is supported but the text is
//!   not a valid value of it.
//!
//! ```
//! use bindery_core::convert::ConversionRegistry;
//! use bindery_core::param::TypeDescriptor;
//!
//! let registry = ConversionRegistry::default();
//! let v = registry.convert(&TypeDescriptor::scalar::<i32>(), "2.9").unwrap().unwrap();
//! assert_eq!(v.downcast_ref::<i32>(), Some(&2));
//! ```

use crate::error::ConversionError;
use crate::param::{TypeDescriptor, TypeKind, Value, value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

type TextConverter = Arc<dyn Fn(&str) -> Result<Value, String> + Send + Sync>;
type ValueConverter = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Result<Value, String> + Send + Sync>;

/// Parse an integral type. Decimal text is truncated toward zero.
fn parse_integral<T>(raw: &str) -> Result<T, String>
where
    T: FromStr + TryFrom<i128>,
    T::Err: fmt::Display,
{
    let raw = raw.trim();
    match raw.parse::<T>() {
        Ok(v) => Ok(v),
        Err(e) => match raw.parse::<f64>() {
            Ok(f) if f.is_finite() => T::try_from(f.trunc() as i128)
                .map_err(|_| format!("{} is out of range for {}", raw, std::any::type_name::<T>())),
            _ => Err(e.to_string()),
        },
    }
}

fn parse_trimmed<T>(raw: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| e.to_string())
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(format!("'{}' is not a boolean", other)),
    }
}

fn parse_char(raw: &str) -> Result<char, String> {
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(format!("expected exactly one character, got {}", raw.chars().count())),
    }
}

fn parse_date_time(raw: &str) -> Result<NaiveDateTime, String> {
    let raw = raw.trim();
    raw.parse::<NaiveDateTime>()
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|e| e.to_string())
}

fn parse_utc(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(e) => raw
            .parse::<i64>()
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| e.to_string()),
    }
}

/// Registry of converters keyed by `(source, target)` type pairs.
#[derive(Clone)]
pub struct ConversionRegistry {
    text: HashMap<TypeId, TextConverter>,
    typed: HashMap<(TypeId, TypeId), ValueConverter>,
}

impl ConversionRegistry {
    /// An empty registry. Enum targets still convert; nothing else does.
    pub fn empty() -> Self {
        Self {
            text: HashMap::new(),
            typed: HashMap::new(),
        }
    }

    /// A registry with every built-in converter.
    pub fn new() -> Self {
        let mut registry = Self::empty();

        registry.register::<i8, _>(parse_integral::<i8>);
        registry.register::<i16, _>(parse_integral::<i16>);
        registry.register::<i32, _>(parse_integral::<i32>);
        registry.register::<i64, _>(parse_integral::<i64>);
        registry.register::<i128, _>(parse_integral::<i128>);
        registry.register::<u8, _>(parse_integral::<u8>);
        registry.register::<u16, _>(parse_integral::<u16>);
        registry.register::<u32, _>(parse_integral::<u32>);
        registry.register::<u64, _>(parse_integral::<u64>);
        registry.register::<usize, _>(parse_integral::<usize>);
        registry.register::<f32, _>(parse_trimmed::<f32>);
        registry.register::<f64, _>(parse_trimmed::<f64>);
        registry.register::<bool, _>(parse_bool);
        registry.register::<char, _>(parse_char);
        registry.register::<String, _>(|raw| Ok(raw.to_string()));
        registry.register::<Decimal, _>(parse_trimmed::<Decimal>);
        registry.register::<Uuid, _>(|raw| Uuid::parse_str(raw.trim()).map_err(|e| e.to_string()));
        registry.register::<NaiveDate, _>(parse_trimmed::<NaiveDate>);
        registry.register::<NaiveTime, _>(parse_trimmed::<NaiveTime>);
        registry.register::<NaiveDateTime, _>(parse_date_time);
        registry.register::<DateTime<Utc>, _>(parse_utc);

        registry
    }

    /// Register a converter from text to `T`, replacing any existing one.
    pub fn register<T, F>(&mut self, convert: F)
    where
        T: Any + Send + Sync,
        F: Fn(&str) -> Result<T, String> + Send + Sync + 'static,
    {
        self.text
            .insert(TypeId::of::<T>(), Arc::new(move |raw: &str| convert(raw).map(|v| value(v))));
    }

    /// Register a converter from values of type `S` to `T`.
    pub fn register_from<S, T, F>(&mut self, convert: F)
    where
        S: Any + Send + Sync,
        T: Any + Send + Sync,
        F: Fn(&S) -> Result<T, String> + Send + Sync + 'static,
    {
        self.typed.insert(
            (TypeId::of::<S>(), TypeId::of::<T>()),
            Arc::new(move |raw: &(dyn Any + Send + Sync)| match raw.downcast_ref::<S>() {
                Some(source) => convert(source).map(|v| value(v)),
                None => Err(format!("expected a {}", std::any::type_name::<S>())),
            }),
        );
    }

    /// Whether text can ever be converted to `target`.
    pub fn supports(&self, target: &TypeDescriptor) -> bool {
        match target.kind() {
            TypeKind::Enum(_) => true,
            TypeKind::Scalar => self.text.contains_key(&target.type_id()),
            _ => false,
        }
    }

    /// Convert text to `target`.
    pub fn convert(&self, target: &TypeDescriptor, raw: &str) -> Result<Option<Value>, ConversionError> {
        match target.kind() {
            TypeKind::Enum(matcher) => Ok(matcher(raw)),
            TypeKind::Scalar => match self.text.get(&target.type_id()) {
                Some(convert) => convert(raw)
                    .map(Some)
                    .map_err(|message| ConversionError::new(target.name(), raw, message)),
                None => Ok(None),
            },
            _ => Ok(None),
        }
    }

    /// Convert an already-typed value to `target`.
    ///
    /// Values of the target type pass through; `String` values go through the
    /// text converters; other sources need a [`register_from`] converter.
    ///
    /// [`register_from`]: ConversionRegistry::register_from
    pub fn convert_value(&self, source: &Value, target: &TypeDescriptor) -> Result<Option<Value>, ConversionError> {
        let source_type = Any::type_id(&**source);
        if source_type == target.type_id() {
            return Ok(Some(source.clone()));
        }
        if let Some(text) = source.downcast_ref::<String>() {
            return self.convert(target, text);
        }
        match self.typed.get(&(source_type, target.type_id())) {
            Some(convert) => convert(&**source)
                .map(Some)
                .map_err(|message| ConversionError::new(target.name(), "<value>", message)),
            None => Ok(None),
        }
    }

    pub fn len(&self) -> usize {
        self.text.len() + self.typed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConversionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConversionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionRegistry")
            .field("text_converters", &self.text.len())
            .field("typed_converters", &self.typed.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::BindableEnum;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Suit {
        Hearts,
        Spades,
    }

    impl BindableEnum for Suit {
        const VARIANTS: &'static [(&'static str, Self)] = &[("HEARTS", Suit::Hearts), ("SPADES", Suit::Spades)];
    }

    struct Color;

    fn convert<T: serde::de::DeserializeOwned + Any + Send + Sync + Clone>(raw: &str) -> Option<T> {
        ConversionRegistry::new()
            .convert(&TypeDescriptor::scalar::<T>(), raw)
            .unwrap()
            .and_then(|v| v.downcast_ref::<T>().cloned())
    }

    #[test]
    fn test_numeric_conversions() {
        assert_eq!(convert::<i32>("42"), Some(42));
        assert_eq!(convert::<i64>(" -7 "), Some(-7));
        assert_eq!(convert::<i16>("12"), Some(12));
        assert_eq!(convert::<f32>("0.5"), Some(0.5));
        assert_eq!(convert::<f64>("1e3"), Some(1000.0));
        assert_eq!(convert::<i128>("170141183460469231731687303715884105727"), Some(i128::MAX));
    }

    #[test]
    fn test_decimal_text_truncates_toward_zero() {
        assert_eq!(convert::<i32>("2.9"), Some(2));
        assert_eq!(convert::<i32>("-2.9"), Some(-2));
        assert_eq!(convert::<i64>("7.0"), Some(7));
    }

    #[test]
    fn test_invalid_numeric_is_an_error() {
        let registry = ConversionRegistry::new();
        let err = registry
            .convert(&TypeDescriptor::scalar::<i32>(), "twelve")
            .unwrap_err();
        assert_eq!(err.target, "i32");
        assert_eq!(err.raw, "twelve");
        assert!(err.message.contains("invalid digit"));

        assert!(registry.convert(&TypeDescriptor::scalar::<u8>(), "300").is_err());
        assert!(registry.convert(&TypeDescriptor::scalar::<i32>(), "NaN").is_err());
    }

    #[test]
    fn test_other_builtin_types() {
        assert_eq!(convert::<bool>("TRUE"), Some(true));
        assert_eq!(convert::<char>("x"), Some('x'));
        assert_eq!(convert::<String>(" keep "), Some(" keep ".to_string()));
        assert_eq!(convert::<Decimal>("12.345"), Some(Decimal::new(12345, 3)));
        assert_eq!(
            convert::<Uuid>("67e55044-10b1-426f-9247-bb680e5fe0c8"),
            Some(Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap())
        );
        assert_eq!(convert::<NaiveDate>("2024-02-29"), NaiveDate::from_ymd_opt(2024, 2, 29));
        assert_eq!(convert::<NaiveTime>("13:45:00"), NaiveTime::from_hms_opt(13, 45, 0));
        assert_eq!(
            convert::<NaiveDateTime>("2024-02-29 13:45:00"),
            NaiveDate::from_ymd_opt(2024, 2, 29).and_then(|d| d.and_hms_opt(13, 45, 0))
        );
        assert_eq!(
            convert::<DateTime<Utc>>("1970-01-01T00:00:01Z"),
            DateTime::<Utc>::from_timestamp_millis(1000)
        );
        assert_eq!(convert::<DateTime<Utc>>("1000"), DateTime::<Utc>::from_timestamp_millis(1000));
    }

    #[test]
    fn test_enum_conversion() {
        let registry = ConversionRegistry::new();
        let ty = TypeDescriptor::enumeration::<Suit>();
        let v = registry.convert(&ty, "  spades ").unwrap().unwrap();
        assert_eq!(v.downcast_ref::<Suit>(), Some(&Suit::Spades));
        assert!(registry.convert(&ty, "clubs").unwrap().is_none());
        assert!(ConversionRegistry::empty().supports(&ty));
    }

    #[test]
    fn test_unsupported_target_is_not_an_error() {
        let registry = ConversionRegistry::new();
        let ty = TypeDescriptor::opaque::<Color>();
        assert!(!registry.supports(&ty));
        assert!(registry.convert(&ty, "red").unwrap().is_none());
    }

    #[test]
    fn test_custom_and_typed_converters() {
        #[derive(Debug, Clone, PartialEq, serde::Deserialize)]
        struct Cents(i64);

        let mut registry = ConversionRegistry::empty();
        registry.register::<Cents, _>(|raw| parse_integral::<i64>(raw).map(Cents));
        registry.register_from::<i64, Cents, _>(|v| Ok(Cents(*v * 100)));

        let ty = TypeDescriptor::scalar::<Cents>();
        let from_text = registry.convert(&ty, "5").unwrap().unwrap();
        assert_eq!(from_text.downcast_ref::<Cents>(), Some(&Cents(5)));

        let from_value = registry.convert_value(&value(3i64), &ty).unwrap().unwrap();
        assert_eq!(from_value.downcast_ref::<Cents>(), Some(&Cents(300)));

        let passthrough = registry.convert_value(&value(Cents(9)), &ty).unwrap().unwrap();
        assert_eq!(passthrough.downcast_ref::<Cents>(), Some(&Cents(9)));

        let from_string = registry.convert_value(&value("7".to_string()), &ty).unwrap().unwrap();
        assert_eq!(from_string.downcast_ref::<Cents>(), Some(&Cents(7)));

        assert!(registry.convert_value(&value(1.5f64), &ty).unwrap().is_none());
    }
}
