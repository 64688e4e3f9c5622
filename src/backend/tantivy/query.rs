//! Mapping of query clauses onto tantivy queries

use crate::backend::tantivy::schema::{SchemaFields, EXPIRES, ID, LAT, LNG, TYPE};
use crate::error::SearchResult;
use crate::search::document::{keyword_term, KEYWORD_SEPARATOR};
use crate::search::query::{escape_regex, glob_to_regex, Clause};
use std::ops::Bound;
use tantivy::query::{
    AllQuery, BooleanQuery, EmptyQuery, Occur, Query, QueryParser, RangeQuery, RegexQuery,
    TermQuery, TermSetQuery,
};
use tantivy::schema::IndexRecordOption;
use tantivy::{Index, Term};

/// Query builder for constructing tantivy queries from clauses
pub struct QueryBuilder<'a> {
    index: &'a Index,
    fields: SchemaFields,
}

impl<'a> QueryBuilder<'a> {
    /// Create a new query builder
    pub fn new(index: &'a Index, fields: SchemaFields) -> Self {
        Self { index, fields }
    }

    /// Build `clause`, restricted to records still alive at `now_millis`
    pub fn build_live(&self, clause: &Clause, now_millis: u64) -> SearchResult<Box<dyn Query>> {
        let query = self.build(clause)?;
        let live: Box<dyn Query> = Box::new(RangeQuery::new_u64_bounds(
            EXPIRES.to_string(),
            Bound::Excluded(now_millis),
            Bound::Unbounded,
        ));
        Ok(Box::new(BooleanQuery::new(vec![
            (Occur::Must, query),
            (Occur::Must, live),
        ])))
    }

    /// Records whose deadline is at or before `now_millis`
    pub fn expired(now_millis: u64) -> Box<dyn Query> {
        Box::new(RangeQuery::new_u64_bounds(
            EXPIRES.to_string(),
            Bound::Unbounded,
            Bound::Included(now_millis),
        ))
    }

    pub fn build(&self, clause: &Clause) -> SearchResult<Box<dyn Query>> {
        let query: Box<dyn Query> = match clause {
            Clause::MatchAll => Box::new(AllQuery),
            Clause::MatchNone => Box::new(EmptyQuery),
            Clause::Type(object_type) => self.term(self.fields.object_type, object_type),
            Clause::Id(id) => self.term(self.fields.id, id),
            Clause::FullText(text) => {
                let parser = QueryParser::for_index(self.index, vec![self.fields.all_text]);
                parser.parse_query(text)?
            }
            Clause::Keyword { field, value } => {
                self.term(self.fields.keywords, &keyword_term(field, value))
            }
            Clause::KeywordIn { field, values } => {
                if values.is_empty() {
                    Box::new(EmptyQuery)
                } else {
                    let terms = values
                        .iter()
                        .map(|value| {
                            Term::from_field_text(self.fields.keywords, &keyword_term(field, value))
                        })
                        .collect::<Vec<_>>();
                    Box::new(TermSetQuery::new(terms))
                }
            }
            Clause::Prefix { field, prefix } => {
                self.keyword_regex(field, &format!("{}.*", escape_regex(prefix)))?
            }
            Clause::Wildcard { field, pattern } => {
                self.keyword_regex(field, &glob_to_regex(pattern))?
            }
            Clause::Tag(tag) => self.term(self.fields.tags, tag),
            Clause::Similar { fields, tokens } => {
                let mut should: Vec<(Occur, Box<dyn Query>)> = Vec::new();
                for field in fields {
                    for token in tokens {
                        should.push((
                            Occur::Should,
                            self.term(self.fields.tokens, &keyword_term(field, token)),
                        ));
                    }
                }
                if should.is_empty() {
                    Box::new(EmptyQuery)
                } else {
                    Box::new(BooleanQuery::new(should))
                }
            }
            Clause::GeoBox(bbox) => {
                let lat: Box<dyn Query> = Box::new(RangeQuery::new_f64_bounds(
                    LAT.to_string(),
                    Bound::Included(bbox.min_lat),
                    Bound::Included(bbox.max_lat),
                ));
                let mut bounds = vec![(Occur::Must, lat)];
                if let Some((min_lng, max_lng)) = bbox.lng {
                    let lng: Box<dyn Query> = Box::new(RangeQuery::new_f64_bounds(
                        LNG.to_string(),
                        Bound::Included(min_lng),
                        Bound::Included(max_lng),
                    ));
                    bounds.push((Occur::Must, lng));
                }
                Box::new(BooleanQuery::new(bounds))
            }
            Clause::After(key) => {
                let later_id: Box<dyn Query> = Box::new(RangeQuery::new_str_bounds(
                    ID.to_string(),
                    Bound::Excluded(key.id.as_str()),
                    Bound::Unbounded,
                ));
                let later_type: Box<dyn Query> = Box::new(RangeQuery::new_str_bounds(
                    TYPE.to_string(),
                    Bound::Excluded(key.object_type.as_str()),
                    Bound::Unbounded,
                ));
                let same_id: Box<dyn Query> = Box::new(BooleanQuery::new(vec![
                    (Occur::Must, self.term(self.fields.id, &key.id)),
                    (Occur::Must, later_type),
                ]));
                Box::new(BooleanQuery::new(vec![
                    (Occur::Should, later_id),
                    (Occur::Should, same_id),
                ]))
            }
            Clause::All(clauses) => {
                if clauses.is_empty() {
                    Box::new(AllQuery)
                } else {
                    let subqueries = clauses
                        .iter()
                        .map(|c| Ok((Occur::Must, self.build(c)?)))
                        .collect::<SearchResult<Vec<_>>>()?;
                    Box::new(BooleanQuery::new(subqueries))
                }
            }
            Clause::Any(clauses) => {
                if clauses.is_empty() {
                    Box::new(EmptyQuery)
                } else {
                    let subqueries = clauses
                        .iter()
                        .map(|c| Ok((Occur::Should, self.build(c)?)))
                        .collect::<SearchResult<Vec<_>>>()?;
                    Box::new(BooleanQuery::new(subqueries))
                }
            }
            Clause::Not(inner) => Box::new(BooleanQuery::new(vec![
                (Occur::Must, Box::new(AllQuery) as Box<dyn Query>),
                (Occur::MustNot, self.build(inner)?),
            ])),
        };

        Ok(query)
    }

    fn term(&self, field: tantivy::schema::Field, text: &str) -> Box<dyn Query> {
        Box::new(TermQuery::new(
            Term::from_field_text(field, text),
            IndexRecordOption::Basic,
        ))
    }

    /// Regex over the keyword values of one field; tantivy anchors it
    fn keyword_regex(&self, field: &str, value_pattern: &str) -> SearchResult<Box<dyn Query>> {
        let pattern = format!(
            "{}{}{}",
            escape_regex(field),
            KEYWORD_SEPARATOR,
            value_pattern
        );
        Ok(Box::new(RegexQuery::from_pattern(&pattern, self.fields.keywords)?))
    }
}
