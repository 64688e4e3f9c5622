//! Query shapes and their translation into a backend-neutral plan

use crate::error::{SearchError, SearchResult};
use crate::models::{GeoPoint, ObjectKey, TAG_FIELD, TAG_TYPE};
use crate::search::document::{normalize_value, tokenize, MAX_KEYWORD_CHARS};
use crate::search::geo::BoundingBox;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Field name to expected value mapping used by term queries
pub type Terms = BTreeMap<String, Value>;

/// Most reference tokens a similarity query considers
pub const MAX_SIMILARITY_TOKENS: usize = 25;

/// The supported query shapes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum QueryShape {
    /// Exact key lookup
    Id { id: String },

    /// Ranked full-text match; empty or `*` matches everything
    Text { query: String },

    /// Field value starts with `prefix`
    Prefix { field: String, prefix: String },

    /// Glob (`*`, `?`) over the whole field value
    Wildcard { field: String, pattern: String },

    /// Exact field values combined with AND (`match_all`) or OR
    Terms { terms: Terms, match_all: bool },

    /// Field value equals one of `values`
    TermInList { field: String, values: Vec<Value> },

    /// Tag set contains every listed tag
    Tagged { tags: Vec<String> },

    /// Ranked by resemblance to `like_text` over `fields`
    Similar {
        fields: Vec<String>,
        like_text: String,
        exclude_id: Option<String>,
    },

    /// Objects within `radius_km` of a point, nearest first
    Nearby {
        lat: f64,
        lng: f64,
        radius_km: f64,
        query: Option<String>,
    },

    /// Prefix search over tag records
    Tags { keyword: String },
}

impl QueryShape {
    pub fn name(&self) -> &'static str {
        match self {
            QueryShape::Id { .. } => "id",
            QueryShape::Text { .. } => "text",
            QueryShape::Prefix { .. } => "prefix",
            QueryShape::Wildcard { .. } => "wildcard",
            QueryShape::Terms { .. } => "terms",
            QueryShape::TermInList { .. } => "term_in_list",
            QueryShape::Tagged { .. } => "tagged",
            QueryShape::Similar { .. } => "similar",
            QueryShape::Nearby { .. } => "nearby",
            QueryShape::Tags { .. } => "tags",
        }
    }
}

/// A query shape plus an optional type filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Restrict to one object type; `None` or empty searches all types
    #[serde(rename = "type", default)]
    pub object_type: Option<String>,

    #[serde(flatten)]
    pub shape: QueryShape,
}

impl SearchQuery {
    pub fn new(shape: QueryShape) -> Self {
        Self {
            object_type: None,
            shape,
        }
    }

    pub fn of_type(mut self, object_type: impl Into<String>) -> Self {
        self.object_type = Some(object_type.into());
        self
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self::new(QueryShape::Id { id: id.into() })
    }

    pub fn text(query: impl Into<String>) -> Self {
        Self::new(QueryShape::Text {
            query: query.into(),
        })
    }

    pub fn prefix(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::new(QueryShape::Prefix {
            field: field.into(),
            prefix: prefix.into(),
        })
    }

    pub fn wildcard(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(QueryShape::Wildcard {
            field: field.into(),
            pattern: pattern.into(),
        })
    }

    pub fn terms(terms: Terms, match_all: bool) -> Self {
        Self::new(QueryShape::Terms { terms, match_all })
    }

    pub fn term_in_list(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(QueryShape::TermInList {
            field: field.into(),
            values,
        })
    }

    pub fn tagged<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(QueryShape::Tagged {
            tags: tags.into_iter().map(Into::into).collect(),
        })
    }

    pub fn similar(fields: Vec<String>, like_text: impl Into<String>, exclude_id: Option<String>) -> Self {
        Self::new(QueryShape::Similar {
            fields,
            like_text: like_text.into(),
            exclude_id,
        })
    }

    pub fn nearby(lat: f64, lng: f64, radius_km: f64, query: Option<String>) -> Self {
        Self::new(QueryShape::Nearby {
            lat,
            lng,
            radius_km,
            query,
        })
    }

    pub fn tags(keyword: impl Into<String>) -> Self {
        Self::new(QueryShape::Tags {
            keyword: keyword.into(),
        })
    }
}

/// Backend-neutral match tree.
///
/// Keyword values, prefixes and patterns are already normalized; field names
/// are dotted paths into the indexed object.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    MatchAll,
    MatchNone,
    /// Exact object type
    Type(String),
    /// Exact object id
    Id(String),
    /// Free text in the backend's query syntax
    FullText(String),
    Keyword { field: String, value: String },
    KeywordIn { field: String, values: Vec<String> },
    Prefix { field: String, prefix: String },
    /// Lower-cased glob over the whole keyword value
    Wildcard { field: String, pattern: String },
    Tag(String),
    /// At least one `(field, token)` pair present; more pairs score higher
    Similar { fields: Vec<String>, tokens: Vec<String> },
    GeoBox(BoundingBox),
    /// Keys strictly after this one in key order
    After(ObjectKey),
    All(Vec<Clause>),
    Any(Vec<Clause>),
    Not(Box<Clause>),
}

impl Clause {
    /// Conjunction with trivial children folded away
    pub fn all(clauses: Vec<Clause>) -> Clause {
        let mut kept = Vec::with_capacity(clauses.len());
        for clause in clauses {
            match clause {
                Clause::MatchAll => {}
                Clause::MatchNone => return Clause::MatchNone,
                other => kept.push(other),
            }
        }
        match kept.len() {
            0 => Clause::MatchAll,
            1 => kept.remove(0),
            _ => Clause::All(kept),
        }
    }

    /// Disjunction with trivial children folded away
    pub fn any(clauses: Vec<Clause>) -> Clause {
        let mut kept = Vec::with_capacity(clauses.len());
        for clause in clauses {
            match clause {
                Clause::MatchNone => {}
                Clause::MatchAll => return Clause::MatchAll,
                other => kept.push(other),
            }
        }
        match kept.len() {
            0 => Clause::MatchNone,
            1 => kept.remove(0),
            _ => Clause::Any(kept),
        }
    }
}

/// Natural order of a plan's results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ranking {
    /// Descending score
    Relevance,
    /// Ascending distance from the geo filter's center
    Distance,
    /// Ascending key
    Unranked,
}

/// Exact radius check applied after the backend's bounding-box prefilter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoFilter {
    pub center: GeoPoint,
    pub radius_km: f64,
}

/// Output of translation
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub shape: &'static str,
    pub clause: Clause,
    pub ranking: Ranking,
    pub geo: Option<GeoFilter>,
}

/// Anchored-free regex body matching `literal` verbatim
pub fn escape_regex(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(
            c,
            '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Regex body for a glob where `*` is any run and `?` one character
pub fn glob_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 8);
    for c in pattern.chars() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            other => regex.push_str(&escape_regex(other.encode_utf8(&mut [0; 4]))),
        }
    }
    regex
}

/// Turns query shapes into plans
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryTranslator;

impl QueryTranslator {
    pub fn new() -> Self {
        Self
    }

    pub fn translate(&self, query: &SearchQuery) -> SearchResult<QueryPlan> {
        let mut geo = None;
        let mut ranking = Ranking::Unranked;

        let clause = match &query.shape {
            QueryShape::Id { id } => {
                if id.trim().is_empty() {
                    return Err(SearchError::Validation("Id must not be blank".to_string()));
                }
                Clause::Id(id.clone())
            }
            QueryShape::Text { query } => {
                let clause = text_clause(query);
                if clause != Clause::MatchAll {
                    ranking = Ranking::Relevance;
                }
                clause
            }
            QueryShape::Prefix { field, prefix } => Clause::Prefix {
                field: require_field(field)?,
                prefix: normalize_prefix(prefix),
            },
            QueryShape::Wildcard { field, pattern } => {
                let field = require_field(field)?;
                let pattern = normalize_pattern(pattern);
                if pattern.chars().filter(|c| *c != '*').count() > MAX_KEYWORD_CHARS {
                    return Err(SearchError::Validation(format!(
                        "Wildcard pattern for field '{}' needs more than {} characters",
                        field, MAX_KEYWORD_CHARS
                    )));
                }
                Clause::Wildcard { field, pattern }
            }
            QueryShape::Terms { terms, match_all } => {
                let clauses = terms
                    .iter()
                    .map(|(field, value)| term_clause(field, value))
                    .collect::<SearchResult<Vec<_>>>()?;
                match (clauses.is_empty(), *match_all) {
                    (true, true) => Clause::MatchAll,
                    (true, false) => Clause::MatchNone,
                    (false, true) => Clause::all(clauses),
                    (false, false) => Clause::any(clauses),
                }
            }
            QueryShape::TermInList { field, values } => {
                let field = require_field(field)?;
                let values = values
                    .iter()
                    .map(|value| {
                        normalize_value(value).ok_or_else(|| {
                            SearchError::Validation(format!(
                                "Unsupported value {} for field '{}'",
                                value, field
                            ))
                        })
                    })
                    .collect::<SearchResult<Vec<_>>>()?;
                if values.is_empty() {
                    Clause::MatchNone
                } else {
                    Clause::KeywordIn { field, values }
                }
            }
            QueryShape::Tagged { tags } => Clause::all(
                tags.iter()
                    .map(|tag| tag.trim().to_lowercase())
                    .filter(|tag| !tag.is_empty())
                    .map(Clause::Tag)
                    .collect(),
            ),
            QueryShape::Similar {
                fields,
                like_text,
                exclude_id,
            } => {
                if fields.is_empty() {
                    return Err(SearchError::Validation(
                        "Similarity search needs at least one field".to_string(),
                    ));
                }
                let fields = fields
                    .iter()
                    .map(|field| require_field(field))
                    .collect::<SearchResult<Vec<_>>>()?;

                let mut tokens: Vec<String> = Vec::new();
                for token in tokenize(like_text) {
                    if tokens.len() == MAX_SIMILARITY_TOKENS {
                        break;
                    }
                    if !tokens.contains(&token) {
                        tokens.push(token);
                    }
                }

                ranking = Ranking::Relevance;
                if tokens.is_empty() {
                    Clause::MatchNone
                } else {
                    let similar = Clause::Similar { fields, tokens };
                    match exclude_id.as_deref().filter(|id| !id.is_empty()) {
                        Some(id) => Clause::all(vec![
                            similar,
                            Clause::Not(Box::new(Clause::Id(id.to_string()))),
                        ]),
                        None => similar,
                    }
                }
            }
            QueryShape::Nearby {
                lat,
                lng,
                radius_km,
                query,
            } => {
                let center = GeoPoint::new(*lat, *lng);
                if !center.is_valid() {
                    return Err(SearchError::Validation(format!(
                        "Invalid coordinates ({}, {})",
                        lat, lng
                    )));
                }
                if !radius_km.is_finite() || *radius_km <= 0.0 {
                    return Err(SearchError::Validation(format!(
                        "Radius must be positive, got {}",
                        radius_km
                    )));
                }

                ranking = Ranking::Distance;
                geo = Some(GeoFilter {
                    center,
                    radius_km: *radius_km,
                });
                Clause::all(vec![
                    Clause::GeoBox(BoundingBox::around(center, *radius_km)),
                    query.as_deref().map(text_clause).unwrap_or(Clause::MatchAll),
                ])
            }
            QueryShape::Tags { keyword } => Clause::Prefix {
                field: TAG_FIELD.to_string(),
                prefix: normalize_prefix(keyword),
            },
        };

        let object_type = match &query.shape {
            QueryShape::Tags { .. } => Some(TAG_TYPE),
            _ => query
                .object_type
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty()),
        };
        let clause = match object_type {
            Some(object_type) => Clause::all(vec![Clause::Type(object_type.to_string()), clause]),
            None => clause,
        };

        Ok(QueryPlan {
            shape: query.shape.name(),
            clause,
            ranking,
            geo,
        })
    }

    /// Plan matching any of `ids`, regardless of type
    pub fn translate_ids(&self, ids: &[String]) -> QueryPlan {
        QueryPlan {
            shape: "ids",
            clause: Clause::any(ids.iter().cloned().map(Clause::Id).collect()),
            ranking: Ranking::Unranked,
            geo: None,
        }
    }
}

fn require_field(field: &str) -> SearchResult<String> {
    let field = field.trim();
    if field.is_empty() {
        Err(SearchError::Validation("Field name must not be blank".to_string()))
    } else {
        Ok(field.to_string())
    }
}

fn text_clause(query: &str) -> Clause {
    let query = query.trim();
    if query.is_empty() || query == "*" {
        Clause::MatchAll
    } else {
        Clause::FullText(query.to_string())
    }
}

fn term_clause(field: &str, value: &Value) -> SearchResult<Clause> {
    let field = require_field(field)?;
    match value {
        Value::Array(items) => {
            let values = items.iter().filter_map(normalize_value).collect::<Vec<_>>();
            Ok(if values.is_empty() {
                Clause::MatchNone
            } else {
                Clause::KeywordIn { field, values }
            })
        }
        other => normalize_value(other)
            .map(|value| Clause::Keyword {
                field: field.clone(),
                value,
            })
            .ok_or_else(|| {
                SearchError::Validation(format!("Unsupported value {} for field '{}'", other, field))
            }),
    }
}

/// Prefixes are cut like stored keyword values so long prefixes still match
fn normalize_prefix(prefix: &str) -> String {
    let normalized = normalize_pattern(prefix);
    match normalized.char_indices().nth(MAX_KEYWORD_CHARS) {
        Some((cut, _)) => normalized[..cut].to_string(),
        None => normalized,
    }
}

/// Lower-case and collapse whitespace runs without trimming
fn normalize_pattern(pattern: &str) -> String {
    let mut normalized = String::with_capacity(pattern.len());
    let mut in_space = false;
    for c in pattern.chars() {
        if c.is_whitespace() {
            if !in_space {
                normalized.push(' ');
            }
            in_space = true;
        } else {
            normalized.extend(c.to_lowercase());
            in_space = false;
        }
    }
    if normalized.trim().is_empty() {
        return String::new();
    }
    normalized
}
