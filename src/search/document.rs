//! Projection of domain objects into backend-neutral index records

use crate::error::{SearchError, SearchResult};
use crate::models::{GeoPoint, ObjectKey, Searchable};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::time::Duration;

/// Separates field name and value in keyword and token terms
pub const KEYWORD_SEPARATOR: char = '\u{1f}';

/// Keyword values are cut to this many characters
pub const MAX_KEYWORD_CHARS: usize = 256;

/// Everything a backend needs to store and match one object
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    /// `(type, id)`
    pub key: ObjectKey,

    /// Indexable fields plus `id` and `type`; hits are hydrated from this
    pub source: Map<String, Value>,

    /// Normalized `(field path, value)` pairs for exact, prefix and wildcard matching
    pub keywords: Vec<(String, String)>,

    /// `(field path, token)` pairs used for similarity ranking
    pub tokens: Vec<(String, String)>,

    /// All string values joined, for full-text matching
    pub full_text: String,

    /// Lower-cased, de-duplicated tags
    pub tags: Vec<String>,

    /// Location, if any
    pub location: Option<GeoPoint>,

    /// Time to live; `None` never expires
    pub ttl: Option<Duration>,
}

impl IndexRecord {
    /// Project `object`; a zero `ttl` means no expiry
    pub fn from_object<O: Searchable + ?Sized>(
        object: &O,
        ttl: Option<Duration>,
    ) -> SearchResult<Self> {
        validate_key(object.object_type(), object.id())?;
        let key = object.key();

        let fields = object.indexable_fields();
        let mut keywords = Vec::new();
        let mut tokens = Vec::new();
        let mut text = Vec::new();
        for (name, value) in &fields {
            flatten(name, value, &mut keywords, &mut tokens, &mut text);
        }
        keywords.push(("id".to_string(), normalize_text(&key.id)));
        keywords.push(("type".to_string(), normalize_text(&key.object_type)));
        keywords.sort();
        keywords.dedup();
        tokens.sort();
        tokens.dedup();

        let tags: BTreeSet<String> = object
            .tags()
            .iter()
            .map(|tag| tag.trim().to_lowercase())
            .filter(|tag| !tag.is_empty())
            .collect();

        let location = match object.location() {
            Some(point) if !point.is_valid() => {
                return Err(SearchError::Validation(format!(
                    "Invalid location ({}, {}) on {}",
                    point.lat, point.lng, key
                )))
            }
            other => other,
        };

        let mut source = fields;
        source.insert("id".to_string(), Value::String(key.id.clone()));
        source.insert("type".to_string(), Value::String(key.object_type.clone()));

        Ok(Self {
            key,
            source,
            keywords,
            tokens,
            full_text: text.join(" "),
            tags: tags.into_iter().collect(),
            location,
            ttl: ttl.filter(|ttl| !ttl.is_zero()),
        })
    }

    /// Absolute expiry in epoch milliseconds given the current time
    pub fn expires_at(&self, now_millis: u64) -> Option<u64> {
        self.ttl.map(|ttl| {
            let ttl_millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
            now_millis.saturating_add(ttl_millis.max(1))
        })
    }
}

/// Reject blank ids and unusable types
pub fn validate_key(object_type: &str, id: &str) -> SearchResult<()> {
    if id.trim().is_empty() {
        return Err(SearchError::Validation("Object id must not be blank".to_string()));
    }
    if object_type.trim().is_empty() {
        return Err(SearchError::Validation(format!(
            "Object type must not be blank (id '{}')",
            id
        )));
    }
    if object_type
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || c == ':')
    {
        return Err(SearchError::Validation(format!(
            "Object type '{}' must not contain whitespace or ':'",
            object_type
        )));
    }
    Ok(())
}

/// `field<US>value` term as stored by backends
pub fn keyword_term(field: &str, value: &str) -> String {
    format!("{}{}{}", field, KEYWORD_SEPARATOR, value)
}

/// Lower-case, collapse whitespace and cap the length of a keyword value
pub fn normalize_text(value: &str) -> String {
    let collapsed = value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    match collapsed.char_indices().nth(MAX_KEYWORD_CHARS) {
        Some((cut, _)) => collapsed[..cut].to_string(),
        None => collapsed,
    }
}

/// Keyword form of a scalar JSON value; `None` for null, arrays and objects
pub fn normalize_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(normalize_text(s)),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        }),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Lower-cased alphanumeric runs of `text`
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Value at a dotted path such as `address.city`
pub fn lookup_path<'a>(source: &'a Value, path: &str) -> Option<&'a Value> {
    if let Some(value) = source.get(path) {
        return Some(value);
    }
    path.split('.')
        .try_fold(source, |current, segment| current.get(segment))
}

/// Deserialize a stored source into the caller's type
pub fn hydrate<P: DeserializeOwned>(source: Value) -> Result<P, serde_json::Error> {
    serde_json::from_value(source)
}

fn flatten(
    path: &str,
    value: &Value,
    keywords: &mut Vec<(String, String)>,
    tokens: &mut Vec<(String, String)>,
    text: &mut Vec<String>,
) {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten(path, item, keywords, tokens, text);
            }
        }
        Value::Object(map) => {
            for (name, nested) in map {
                flatten(&format!("{}.{}", path, name), nested, keywords, tokens, text);
            }
        }
        Value::String(s) => {
            if let Some(keyword) = normalize_value(value) {
                keywords.push((path.to_string(), keyword));
            }
            tokens.extend(tokenize(s).into_iter().map(|t| (path.to_string(), t)));
            text.push(s.clone());
        }
        other => {
            if let Some(keyword) = normalize_value(other) {
                keywords.push((path.to_string(), keyword));
            }
        }
    }
}
