//! Attribute value codec.
//!
//! Record attributes are a tagged sum over the value kinds the wire
//! format can carry. Structured kinds (dates, assets, references, geo
//! points, nested records) are discriminated on the wire by a reserved
//! `$type` key; plain JSON objects without a recognized `$type` decode
//! as maps. [`Value::from_json`] is the exact inverse of
//! [`Value::to_json`].

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value as Json, json};

use crate::error::{Error, InvalidInputError};
use crate::types::RecordId;

use super::Record;

/// A typed attribute value.
///
/// # Example
///
/// ```
/// use cirrus::Value;
///
/// let v = Value::from("hello");
/// let json = v.to_json();
/// assert_eq!(Value::from_json(&json).unwrap(), v);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    DateTime(DateTime<Utc>),
    Asset(Asset),
    Reference(Reference),
    Geo(GeoLocation),
    Record(Box<Record>),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Serialize to the wire representation.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Boolean(b) => json!(b),
            Value::Integer(n) => json!(n),
            Value::Float(n) => json!(n),
            Value::String(s) => json!(s),
            Value::DateTime(ts) => json!({
                "$type": "date",
                "$date": ts.to_rfc3339_opts(SecondsFormat::Millis, true),
            }),
            Value::Asset(asset) => asset.to_json(),
            Value::Reference(reference) => reference.to_json(),
            Value::Geo(location) => location.to_json(),
            Value::Record(record) => record.to_json(),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Deserialize from the wire representation.
    ///
    /// # Errors
    ///
    /// Returns an error on an unrecognized `$type` discriminator or a
    /// malformed tagged value.
    pub fn from_json(json: &Json) -> Result<Self, Error> {
        match json {
            Json::Null => Ok(Value::Null),
            Json::Bool(b) => Ok(Value::Boolean(*b)),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Float(f))
                } else {
                    Err(InvalidInputError::Value {
                        reason: format!("number out of range: {}", n),
                    }
                    .into())
                }
            }
            Json::String(s) => Ok(Value::String(s.clone())),
            Json::Array(items) => Ok(Value::Array(
                items.iter().map(Value::from_json).collect::<Result<_, _>>()?,
            )),
            Json::Object(obj) => match obj.get("$type").and_then(Json::as_str) {
                Some("date") => {
                    let raw = obj.get("$date").and_then(Json::as_str).ok_or_else(|| {
                        InvalidInputError::Value {
                            reason: "date value missing $date".to_string(),
                        }
                    })?;
                    let parsed = DateTime::parse_from_rfc3339(raw).map_err(|e| {
                        InvalidInputError::Value {
                            reason: format!("bad $date '{}': {}", raw, e),
                        }
                    })?;
                    Ok(Value::DateTime(parsed.with_timezone(&Utc)))
                }
                Some("asset") => Ok(Value::Asset(Asset::from_json(json)?)),
                Some("ref") => Ok(Value::Reference(Reference::from_json(json)?)),
                Some("geo") => Ok(Value::Geo(GeoLocation::from_json(json)?)),
                Some("record") => Ok(Value::Record(Box::new(Record::from_json(json)?))),
                Some(other) => Err(InvalidInputError::Value {
                    reason: format!("unknown $type discriminator '{}'", other),
                }
                .into()),
                None => {
                    let mut map = BTreeMap::new();
                    for (k, v) in obj {
                        map.insert(k.clone(), Value::from_json(v)?);
                    }
                    Ok(Value::Map(map))
                }
            },
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::DateTime(ts)
    }
}

impl From<GeoLocation> for Value {
    fn from(location: GeoLocation) -> Self {
        Value::Geo(location)
    }
}

impl From<Reference> for Value {
    fn from(reference: Reference) -> Self {
        Value::Reference(reference)
    }
}

impl From<Asset> for Value {
    fn from(asset: Asset) -> Self {
        Value::Asset(asset)
    }
}

/// A named binary asset stored by the server.
///
/// Client code constructs an asset with a name and content type, uploads
/// the bytes through the container, and stores the returned asset (now
/// carrying a server URL) as a record attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    /// Asset name, unique per upload on the server side.
    pub name: String,
    /// Download URL, assigned by the server after upload.
    pub url: Option<String>,
    /// MIME content type.
    pub content_type: Option<String>,
}

impl Asset {
    /// Create an asset that has not been uploaded yet.
    pub fn new(name: impl Into<String>, content_type: Option<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
            content_type,
        }
    }

    /// Serialize to the `{"$type": "asset", ...}` wire shape.
    pub fn to_json(&self) -> Json {
        let mut obj = serde_json::Map::new();
        obj.insert("$type".to_string(), json!("asset"));
        obj.insert("$name".to_string(), json!(self.name));
        if let Some(ref url) = self.url {
            obj.insert("$url".to_string(), json!(url));
        }
        if let Some(ref content_type) = self.content_type {
            obj.insert("$content_type".to_string(), json!(content_type));
        }
        Json::Object(obj)
    }

    /// Deserialize from the wire shape.
    pub fn from_json(json: &Json) -> Result<Self, Error> {
        let obj = expect_tagged_object(json, "asset")?;
        let name = obj.get("$name").and_then(Json::as_str).ok_or_else(|| {
            InvalidInputError::Value {
                reason: "asset missing $name".to_string(),
            }
        })?;
        Ok(Self {
            name: name.to_string(),
            url: obj.get("$url").and_then(Json::as_str).map(String::from),
            content_type: obj
                .get("$content_type")
                .and_then(Json::as_str)
                .map(String::from),
        })
    }
}

/// A pointer to another record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference(RecordId);

impl Reference {
    /// Create a reference to the given record id.
    pub fn new(id: RecordId) -> Self {
        Self(id)
    }

    /// Create a reference to an existing record.
    pub fn to_record(record: &Record) -> Self {
        Self(record.record_id().clone())
    }

    /// Returns the referenced record id.
    pub fn id(&self) -> &RecordId {
        &self.0
    }

    /// Serialize to the `{"$type": "ref", "$id": ...}` wire shape.
    pub fn to_json(&self) -> Json {
        json!({
            "$type": "ref",
            "$id": self.0.to_string(),
        })
    }

    /// Deserialize from the wire shape.
    pub fn from_json(json: &Json) -> Result<Self, Error> {
        let obj = expect_tagged_object(json, "ref")?;
        let id = obj.get("$id").and_then(Json::as_str).ok_or_else(|| {
            InvalidInputError::Value {
                reason: "reference missing $id".to_string(),
            }
        })?;
        Ok(Self(RecordId::parse(id)?))
    }
}

/// A geographic point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoLocation {
    latitude: f64,
    longitude: f64,
}

impl GeoLocation {
    /// Create a geo point, validating the coordinate ranges.
    ///
    /// # Errors
    ///
    /// Returns an error if latitude is outside [-90, 90] or longitude is
    /// outside [-180, 180].
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, Error> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(InvalidInputError::Value {
                reason: format!("latitude {} out of range", latitude),
            }
            .into());
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(InvalidInputError::Value {
                reason: format!("longitude {} out of range", longitude),
            }
            .into());
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Returns the latitude in degrees.
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    /// Returns the longitude in degrees.
    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Serialize to the `{"$type": "geo", "$lat": ..., "$lng": ...}` wire shape.
    pub fn to_json(&self) -> Json {
        json!({
            "$type": "geo",
            "$lat": self.latitude,
            "$lng": self.longitude,
        })
    }

    /// Deserialize from the wire shape.
    pub fn from_json(json: &Json) -> Result<Self, Error> {
        let obj = expect_tagged_object(json, "geo")?;
        let latitude = obj.get("$lat").and_then(Json::as_f64).ok_or_else(|| {
            InvalidInputError::Value {
                reason: "geo value missing $lat".to_string(),
            }
        })?;
        let longitude = obj.get("$lng").and_then(Json::as_f64).ok_or_else(|| {
            InvalidInputError::Value {
                reason: "geo value missing $lng".to_string(),
            }
        })?;
        Self::new(latitude, longitude)
    }
}

fn expect_tagged_object<'a>(
    json: &'a Json,
    tag: &str,
) -> Result<&'a serde_json::Map<String, Json>, Error> {
    let obj = json.as_object().ok_or_else(|| InvalidInputError::Value {
        reason: format!("{} value must be a JSON object", tag),
    })?;
    match obj.get("$type").and_then(Json::as_str) {
        Some(t) if t == tag => Ok(obj),
        other => Err(InvalidInputError::Value {
            reason: format!("expected $type '{}', got {:?}", tag, other),
        }
        .into()),
    }
}
