//! Fixed tantivy schema shared by every namespace index

use crate::backend::RawHit;
use crate::error::{SearchError, SearchResult};
use crate::models::{GeoPoint, ObjectKey};
use crate::search::document::{keyword_term, IndexRecord};
use serde_json::Value;
use tantivy::schema::{Field, Schema, Value as _, FAST, INDEXED, STORED, STRING, TEXT};
use tantivy::TantivyDocument;

pub const KEY: &str = "_key";
pub const ID: &str = "_id";
pub const TYPE: &str = "_type";
pub const SOURCE: &str = "_source";
pub const KEYWORDS: &str = "_kw";
pub const TOKENS: &str = "_tok";
pub const ALL_TEXT: &str = "_all";
pub const TAGS: &str = "_tag";
pub const LAT: &str = "_lat";
pub const LNG: &str = "_lng";
pub const EXPIRES: &str = "_expires";

/// Expiry stored for records without a TTL
pub const NEVER_EXPIRES: u64 = u64::MAX;

/// Build the search schema
pub fn build_schema() -> Schema {
    let mut schema_builder = Schema::builder();

    // Identity - raw strings, stored; id and type are fast for key ordering
    schema_builder.add_text_field(KEY, STRING | STORED);
    schema_builder.add_text_field(ID, STRING | STORED | FAST);
    schema_builder.add_text_field(TYPE, STRING | STORED | FAST);

    // Source object as JSON text, stored only
    schema_builder.add_text_field(SOURCE, STORED);

    // Normalized field/value pairs for exact, prefix and wildcard matching
    schema_builder.add_text_field(KEYWORDS, STRING);

    // Field/token pairs for similarity
    schema_builder.add_text_field(TOKENS, STRING);

    // Full text, tokenized
    schema_builder.add_text_field(ALL_TEXT, TEXT);

    schema_builder.add_text_field(TAGS, STRING);

    // Location
    schema_builder.add_f64_field(LAT, INDEXED | STORED | FAST);
    schema_builder.add_f64_field(LNG, INDEXED | STORED | FAST);

    // Expiry deadline in epoch millis
    schema_builder.add_u64_field(EXPIRES, INDEXED | FAST);

    schema_builder.build()
}

/// Handles to the schema's fields
#[derive(Debug, Clone, Copy)]
pub struct SchemaFields {
    pub key: Field,
    pub id: Field,
    pub object_type: Field,
    pub source: Field,
    pub keywords: Field,
    pub tokens: Field,
    pub all_text: Field,
    pub tags: Field,
    pub lat: Field,
    pub lng: Field,
    pub expires: Field,
}

impl SchemaFields {
    pub fn from_schema(schema: &Schema) -> SearchResult<Self> {
        let field = |name: &str| {
            schema.get_field(name).map_err(|e| {
                SearchError::Backend(format!("Index schema is missing field '{}': {}", name, e))
            })
        };

        Ok(Self {
            key: field(KEY)?,
            id: field(ID)?,
            object_type: field(TYPE)?,
            source: field(SOURCE)?,
            keywords: field(KEYWORDS)?,
            tokens: field(TOKENS)?,
            all_text: field(ALL_TEXT)?,
            tags: field(TAGS)?,
            lat: field(LAT)?,
            lng: field(LNG)?,
            expires: field(EXPIRES)?,
        })
    }

    /// Unique term identifying a record
    pub fn key_term(&self, key: &ObjectKey) -> tantivy::Term {
        tantivy::Term::from_field_text(self.key, &keyword_term(&key.object_type, &key.id))
    }

    /// Convert a record to a tantivy document
    pub fn to_tantivy_doc(&self, record: &IndexRecord, expires_at: Option<u64>) -> SearchResult<TantivyDocument> {
        let mut doc = TantivyDocument::new();

        doc.add_text(self.key, keyword_term(&record.key.object_type, &record.key.id));
        doc.add_text(self.id, &record.key.id);
        doc.add_text(self.object_type, &record.key.object_type);
        doc.add_text(self.source, serde_json::to_string(&record.source)?);

        for (field, value) in &record.keywords {
            doc.add_text(self.keywords, keyword_term(field, value));
        }
        for (field, token) in &record.tokens {
            doc.add_text(self.tokens, keyword_term(field, token));
        }
        if !record.full_text.is_empty() {
            doc.add_text(self.all_text, &record.full_text);
        }
        for tag in &record.tags {
            doc.add_text(self.tags, tag);
        }

        if let Some(location) = record.location {
            doc.add_f64(self.lat, location.lat);
            doc.add_f64(self.lng, location.lng);
        }

        doc.add_u64(self.expires, expires_at.unwrap_or(NEVER_EXPIRES));

        Ok(doc)
    }

    /// Convert a stored document back into a hit
    pub fn to_hit(&self, doc: &TantivyDocument, score: f32) -> SearchResult<RawHit> {
        let text = |field: Field| doc.get_first(field).and_then(|v| v.as_str()).map(str::to_string);

        let id = text(self.id)
            .ok_or_else(|| SearchError::Backend("Stored document has no id".to_string()))?;
        let object_type = text(self.object_type)
            .ok_or_else(|| SearchError::Backend(format!("Stored document '{}' has no type", id)))?;

        // Unreadable sources surface as hydration failures
        let source = text(self.source)
            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
            .unwrap_or(Value::Null);

        let lat = doc.get_first(self.lat).and_then(|v| v.as_f64());
        let lng = doc.get_first(self.lng).and_then(|v| v.as_f64());

        Ok(RawHit {
            key: ObjectKey::new(object_type, id),
            score,
            source,
            location: lat.zip(lng).map(|(lat, lng)| GeoPoint::new(lat, lng)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;
    use serde_json::json;

    #[test]
    fn test_schema_fields_resolve() {
        let schema = build_schema();
        assert!(SchemaFields::from_schema(&schema).is_ok());
        assert!(SchemaFields::from_schema(&Schema::builder().build()).is_err());
    }

    #[test]
    fn test_document_round_trip() {
        let fields = SchemaFields::from_schema(&build_schema()).unwrap();
        let doc = Document::new("place", "p1")
            .with_field("name", "Cafe")
            .with_location(42.5, 23.25);
        let record = IndexRecord::from_object(&doc, None).unwrap();

        let tantivy_doc = fields.to_tantivy_doc(&record, None).unwrap();
        let hit = fields.to_hit(&tantivy_doc, 1.5).unwrap();

        assert_eq!(hit.key, ObjectKey::new("place", "p1"));
        assert_eq!(hit.score, 1.5);
        assert_eq!(hit.source["name"], json!("Cafe"));
        assert_eq!(hit.location, Some(GeoPoint::new(42.5, 23.25)));
    }
}
