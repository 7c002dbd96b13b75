//! Route patterns and path-variable extraction.
//!
//! Supports `{name}` and `:name` parameter segments plus a trailing `*`
//! (or `{*name}`) wildcard that captures the remainder of the path.
//!
//! ```
//! use bindery_core::route::PathPattern;
//!
//! let pattern = PathPattern::new("/users/{id}/posts/:post");
//! let vars = pattern.extract("/users/42/posts/7").unwrap();
//! assert_eq!(vars.get("id").map(String::as_str), Some("42"));
//! assert_eq!(vars.get("post").map(String::as_str), Some("7"));
//! assert!(pattern.extract("/users/42").is_none());
//! ```

use std::collections::HashMap;

/// Path variables extracted for one request, keyed by name.
pub type PathVariables = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
    Wildcard(Option<String>),
}

impl Segment {
    fn parse(segment: &str) -> Self {
        if segment == "*" {
            Segment::Wildcard(None)
        } else if let Some(name) = segment.strip_prefix("{*").and_then(|s| s.strip_suffix('}')) {
            Segment::Wildcard(Some(name.to_string()))
        } else if let Some(name) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Segment::Param(name.to_string())
        } else if let Some(name) = segment.strip_prefix(':') {
            Segment::Param(name.to_string())
        } else {
            Segment::Static(segment.to_string())
        }
    }
}

/// A compiled route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    pattern: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let segments = split(&pattern).map(Segment::parse).collect();
        Self { pattern, segments }
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Names of the variables this pattern captures, in order.
    pub fn variable_names(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Param(name) | Segment::Wildcard(Some(name)) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn matches(&self, path: &str) -> bool {
        self.extract(path).is_some()
    }

    /// Match `path` and return its variables. Values are percent-decoded.
    pub fn extract(&self, path: &str) -> Option<PathVariables> {
        let path = path.split('?').next().unwrap_or_default();
        let parts: Vec<&str> = split(path).collect();
        let mut vars = PathVariables::new();

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Wildcard(name) => {
                    if let Some(name) = name {
                        let rest = parts.get(i..).unwrap_or_default().join("/");
                        vars.insert(name.clone(), decode(&rest));
                    }
                    return Some(vars);
                }
                Segment::Static(expected) => {
                    if parts.get(i) != Some(&expected.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.get(i)?;
                    vars.insert(name.clone(), decode(value));
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(vars)
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}
