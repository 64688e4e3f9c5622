use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

/// Object type of the records listed by tag search
pub const TAG_TYPE: &str = "tag";

/// Field holding the tag name on tag records
pub const TAG_FIELD: &str = "tag";

/// Identity of an indexed record within one tenant.
///
/// Keys order by id, then type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Type discriminator
    #[serde(rename = "type")]
    pub object_type: String,

    /// Identifier, unique within the tenant
    pub id: String,
}

impl ObjectKey {
    pub fn new(object_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            id: id.into(),
        }
    }
}

impl Ord for ObjectKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id
            .cmp(&other.id)
            .then_with(|| self.object_type.cmp(&other.object_type))
    }
}

impl PartialOrd for ObjectKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.id)
    }
}

/// A latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Whether both coordinates are finite and within range
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// A domain object that can be mirrored into a tenant's search index.
///
/// Only the fields returned by [`Searchable::indexable_fields`] are written;
/// `id` and `type` are always stored alongside them so that hits can be
/// hydrated back into the caller's type.
pub trait Searchable {
    /// Identifier, unique within the tenant
    fn id(&self) -> &str;

    /// Type discriminator scoping queries to one kind of object
    fn object_type(&self) -> &str;

    /// Field name to value mapping written to the index
    fn indexable_fields(&self) -> Map<String, Value>;

    /// Tags attached to the object
    fn tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Geographic location, if the object has one
    fn location(&self) -> Option<GeoPoint> {
        None
    }

    fn key(&self) -> ObjectKey {
        ObjectKey::new(self.object_type(), self.id())
    }
}

/// Schemaless domain object
///
/// Serializes to a flat JSON object (`{"id": .., "type": .., ...fields}`),
/// which is also the shape hits are hydrated from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Identifier
    pub id: String,

    /// Type discriminator
    #[serde(rename = "type")]
    pub object_type: String,

    /// Tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,

    /// Remaining indexable fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(object_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object_type: object_type.into(),
            tags: Vec::new(),
            location: None,
            fields: Map::new(),
        }
    }

    /// Tag record listed by tag search; its id is `tag:<name>`
    pub fn tag(name: &str) -> Self {
        let name = name.trim().to_lowercase();
        Self::new(TAG_TYPE, format!("tag:{}", name)).with_field(TAG_FIELD, name)
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_location(mut self, lat: f64, lng: f64) -> Self {
        self.location = Some(GeoPoint::new(lat, lng));
        self
    }

    /// Field value by name
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

impl Searchable for Document {
    fn id(&self) -> &str {
        &self.id
    }

    fn object_type(&self) -> &str {
        &self.object_type
    }

    fn indexable_fields(&self) -> Map<String, Value> {
        let mut fields = self.fields.clone();
        if !self.tags.is_empty() {
            fields.insert(
                "tags".to_string(),
                Value::Array(self.tags.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(location) = self.location {
            let mut point = Map::new();
            point.insert("lat".to_string(), location.lat.into());
            point.insert("lng".to_string(), location.lng.into());
            fields.insert("location".to_string(), Value::Object(point));
        }
        fields
    }

    fn tags(&self) -> Vec<String> {
        self.tags.clone()
    }

    fn location(&self) -> Option<GeoPoint> {
        self.location
    }
}
