//! Result ordering and cursor pagination
//!
//! Candidates are ordered by a total order ending in `(id, type)`, so a
//! cursor holding the sort key of the last returned record identifies
//! exactly where the next page starts, however the record set changed in
//! between. Backends hand over an exact prefix of that order; a page is only
//! cut once the prefix reaches past it or holds every match.

use crate::backend::RawHit;
use crate::error::{SearchError, SearchResult};
use crate::models::{ObjectKey, Pager};
use crate::search::document::lookup_path;
use crate::search::query::Ranking;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Order applied to a query's candidates
#[derive(Debug, Clone, PartialEq)]
pub enum HitOrder {
    /// Descending score
    Relevance,
    /// Ascending distance
    Distance,
    /// By a source field; records without it last
    Field { name: String, ascending: bool },
    /// Ascending id
    Key,
}

impl HitOrder {
    /// An explicit sort field wins over the plan's natural order
    pub fn resolve(ranking: Ranking, pager: &Pager) -> Self {
        if let Some(name) = pager.sort_field() {
            return HitOrder::Field {
                name: name.to_string(),
                ascending: pager.sort_ascending,
            };
        }
        match ranking {
            Ranking::Relevance => HitOrder::Relevance,
            Ranking::Distance => HitOrder::Distance,
            Ranking::Unranked => HitOrder::Key,
        }
    }
}

/// A candidate with its distance from the query point, if any
#[derive(Debug, Clone)]
pub struct ScoredHit {
    pub hit: RawHit,
    pub distance: Option<f64>,
}

impl From<RawHit> for ScoredHit {
    fn from(hit: RawHit) -> Self {
        Self {
            hit,
            distance: None,
        }
    }
}

/// One page of ordered hits
#[derive(Debug, Clone)]
pub struct PageWindow {
    pub hits: Vec<ScoredHit>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum SortValue {
    Score(f32),
    Distance(f64),
    Field(Option<Value>),
    Key,
}

/// Position of a record in a query's order, as carried by cursors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    #[serde(rename = "v")]
    value: SortValue,
    #[serde(rename = "t")]
    object_type: String,
    #[serde(rename = "i")]
    id: String,
}

impl SortKey {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.object_type.clone(), self.id.clone())
    }
}

/// Order `hits` and cut out the page the pager points at.
///
/// `hits` must be a prefix of the query's matches in `order`; `exhausted`
/// says it holds all of them. Returns `None` when the prefix ends before the
/// page is known to be complete.
pub fn paginate(
    hits: Vec<ScoredHit>,
    order: &HitOrder,
    pager: &Pager,
    exhausted: bool,
) -> SearchResult<Option<PageWindow>> {
    let mut keyed: Vec<(SortKey, ScoredHit)> = hits
        .into_iter()
        .map(|hit| (sort_key(order, &hit), hit))
        .collect();
    keyed.sort_by(|a, b| compare(order, &a.0, &b.0));

    let start = match pager.cursor.as_deref() {
        Some(token) => {
            let after = decode_cursor(token, order)?;
            keyed.partition_point(|(key, _)| compare(order, key, &after) != Ordering::Greater)
        }
        None => pager.offset().min(keyed.len()),
    };
    let end = start.saturating_add(pager.page_size.max(1)).min(keyed.len());
    if end >= keyed.len() && !exhausted {
        return Ok(None);
    }

    let next_cursor = if end > start && end < keyed.len() {
        Some(encode_cursor(&keyed[end - 1].0)?)
    } else {
        None
    };

    Ok(Some(PageWindow {
        hits: keyed.drain(start..end).map(|(_, hit)| hit).collect(),
        next_cursor,
    }))
}

fn sort_key(order: &HitOrder, hit: &ScoredHit) -> SortKey {
    let value = match order {
        HitOrder::Relevance => SortValue::Score(hit.hit.score),
        HitOrder::Distance => SortValue::Distance(hit.distance.unwrap_or(f64::INFINITY)),
        HitOrder::Field { name, .. } => SortValue::Field(
            lookup_path(&hit.hit.source, name)
                .filter(|value| !value.is_null())
                .cloned(),
        ),
        HitOrder::Key => SortValue::Key,
    };

    SortKey {
        value,
        object_type: hit.hit.key.object_type.clone(),
        id: hit.hit.key.id.clone(),
    }
}

fn compare(order: &HitOrder, a: &SortKey, b: &SortKey) -> Ordering {
    let primary = match (&a.value, &b.value) {
        (SortValue::Score(a), SortValue::Score(b)) => b.total_cmp(a),
        (SortValue::Distance(a), SortValue::Distance(b)) => a.total_cmp(b),
        (SortValue::Field(a), SortValue::Field(b)) => {
            let ascending = !matches!(order, HitOrder::Field { ascending: false, .. });
            match (a, b) {
                (Some(a), Some(b)) if ascending => compare_values(a, b),
                (Some(a), Some(b)) => compare_values(b, a),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        }
        _ => Ordering::Equal,
    };

    primary
        .then_with(|| a.id.cmp(&b.id))
        .then_with(|| a.object_type.cmp(&b.object_type))
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or(0.0)
            .total_cmp(&y.as_f64().unwrap_or(0.0)),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => rank(a)
            .cmp(&rank(b))
            .then_with(|| a.to_string().cmp(&b.to_string())),
    }
}

fn encode_cursor(key: &SortKey) -> SearchResult<String> {
    Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(key)?))
}

/// Sort key of a cursor token; rejects tokens issued under another order
pub fn decode_cursor(token: &str, order: &HitOrder) -> SearchResult<SortKey> {
    let invalid = || SearchError::Validation(format!("Invalid cursor '{}'", token));

    let bytes = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
    let key: SortKey = serde_json::from_slice(&bytes).map_err(|_| invalid())?;

    let matches_order = matches!(
        (order, &key.value),
        (HitOrder::Relevance, SortValue::Score(_))
            | (HitOrder::Distance, SortValue::Distance(_))
            | (HitOrder::Field { .. }, SortValue::Field(_))
            | (HitOrder::Key, SortValue::Key)
    );
    if !matches_order {
        return Err(SearchError::Validation(
            "Cursor was issued for a differently ordered query".to_string(),
        ));
    }

    Ok(key)
}
