//! Records: typed, identified, access-controlled units of remote data.

mod acl;
mod value;

pub use acl::{AccessLevel, Acl, AclEntry, Principal};
pub use value::{Asset, GeoLocation, Reference, Value};

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value as Json, json};

use crate::error::{Error, InvalidInputError};
use crate::types::{RecordId, RecordType, Role};

/// A typed, mutable key-value entity with identity, ownership metadata,
/// and an access-control list.
///
/// The record type is immutable after construction. Attributes are an
/// open string-keyed mapping of [`Value`]s; keys starting with `$` or
/// `_` are reserved for the wire format and rejected. Metadata fields
/// (`created_at`, `owner_id`, ...) are server-assigned and never touched
/// by attribute mutation.
///
/// # Example
///
/// ```
/// use cirrus::{Record, Value};
///
/// let mut note = Record::new("note").unwrap();
/// note.set("title", Value::from("groceries")).unwrap();
/// note.update([("done".to_string(), Value::from(false))]).unwrap();
/// assert_eq!(note.get("title"), Some(&Value::from("groceries")));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: RecordId,
    attributes: BTreeMap<String, Value>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    owner_id: Option<String>,
    created_by: Option<String>,
    updated_by: Option<String>,
    access: Acl,
    transient: BTreeMap<String, Value>,
}

impl Record {
    /// Create a record of the given type with a freshly generated id.
    pub fn new(record_type: impl AsRef<str>) -> Result<Self, Error> {
        let record_type = RecordType::new(record_type.as_ref())?;
        Ok(Self::empty(RecordId::generate(record_type)))
    }

    /// Create a record with a caller-assigned id.
    pub fn with_id(id: RecordId) -> Self {
        Self::empty(id)
    }

    fn empty(id: RecordId) -> Self {
        Self {
            id,
            attributes: BTreeMap::new(),
            created_at: None,
            updated_at: None,
            owner_id: None,
            created_by: None,
            updated_by: None,
            access: Acl::new(),
            transient: BTreeMap::new(),
        }
    }

    /// Returns the full record id.
    pub fn record_id(&self) -> &RecordId {
        &self.id
    }

    /// Returns the record type.
    pub fn record_type(&self) -> &RecordType {
        self.id.record_type()
    }

    /// Returns the id part of the record id.
    pub fn id(&self) -> &str {
        self.id.id()
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    /// Get an attribute value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Set a single attribute, replacing any existing value.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty or uses a reserved prefix.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Result<(), Error> {
        let key = key.into();
        Self::validate_key(&key)?;
        self.attributes.insert(key, value);
        Ok(())
    }

    /// Remove an attribute, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }

    /// Shallow-merge the given attributes, replacing on key collision.
    ///
    /// Metadata fields are never touched. Fails on the first reserved
    /// key without applying any of the updates.
    pub fn update<I>(&mut self, attrs: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let attrs: Vec<(String, Value)> = attrs.into_iter().collect();
        for (key, _) in &attrs {
            Self::validate_key(key)?;
        }
        self.attributes.extend(attrs);
        Ok(())
    }

    /// Returns the attribute keys in sorted order.
    pub fn attribute_keys(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// Returns the full attribute mapping.
    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    fn validate_key(key: &str) -> Result<(), Error> {
        if key.is_empty() {
            return Err(InvalidInputError::AttributeKey {
                key: key.to_string(),
                reason: "must be non-empty".to_string(),
            }
            .into());
        }
        if key.starts_with('$') || key.starts_with('_') {
            return Err(InvalidInputError::AttributeKey {
                key: key.to_string(),
                reason: "'$' and '_' prefixes are reserved".to_string(),
            }
            .into());
        }
        Ok(())
    }

    // ========================================================================
    // Server-assigned metadata
    // ========================================================================

    /// Server-assigned creation timestamp, if the record has been saved.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Server-assigned last-update timestamp.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// The owning user's id.
    pub fn owner_id(&self) -> Option<&str> {
        self.owner_id.as_deref()
    }

    /// The creating user's id.
    pub fn created_by(&self) -> Option<&str> {
        self.created_by.as_deref()
    }

    /// The last updating user's id.
    pub fn updated_by(&self) -> Option<&str> {
        self.updated_by.as_deref()
    }

    /// Server-computed transient projections attached by a query
    /// (included related records, computed distances). Not persisted.
    pub fn transient(&self) -> &BTreeMap<String, Value> {
        &self.transient
    }

    // ========================================================================
    // Access control
    // ========================================================================

    /// Returns the record's ACL.
    pub fn access(&self) -> &Acl {
        &self.access
    }

    /// Returns the record's ACL for mutation.
    pub fn access_mut(&mut self) -> &mut Acl {
        &mut self.access
    }

    pub fn set_public_no_access(&mut self) {
        self.access.set_access(Principal::Public, AccessLevel::NoAccess);
    }

    pub fn set_public_read_only(&mut self) {
        self.access.set_access(Principal::Public, AccessLevel::Read);
    }

    pub fn set_public_read_write_access(&mut self) {
        self.access
            .set_access(Principal::Public, AccessLevel::ReadWrite);
    }

    pub fn set_no_access_for_role(&mut self, role: &Role) {
        self.access
            .set_access(Principal::Role(role.clone()), AccessLevel::NoAccess);
    }

    pub fn set_read_only_for_role(&mut self, role: &Role) {
        self.access
            .set_access(Principal::Role(role.clone()), AccessLevel::Read);
    }

    pub fn set_read_write_access_for_role(&mut self, role: &Role) {
        self.access
            .set_access(Principal::Role(role.clone()), AccessLevel::ReadWrite);
    }

    pub fn set_no_access_for_user(&mut self, user: &Record) {
        self.access
            .set_access(Principal::User(user.id().to_string()), AccessLevel::NoAccess);
    }

    pub fn set_read_only_for_user(&mut self, user: &Record) {
        self.access
            .set_access(Principal::User(user.id().to_string()), AccessLevel::Read);
    }

    pub fn set_read_write_access_for_user(&mut self, user: &Record) {
        self.access.set_access(
            Principal::User(user.id().to_string()),
            AccessLevel::ReadWrite,
        );
    }

    pub fn has_public_read_access(&self) -> bool {
        self.access.has_public_read_access()
    }

    pub fn has_public_write_access(&self) -> bool {
        self.access.has_public_write_access()
    }

    pub fn has_read_access_for_role(&self, role: &Role) -> bool {
        self.access.has_read_access_for_role(role)
    }

    pub fn has_write_access_for_role(&self, role: &Role) -> bool {
        self.access.has_write_access_for_role(role)
    }

    pub fn has_read_access_for_user(&self, user: &Record) -> bool {
        self.access.has_read_access_for_user(user.id())
    }

    pub fn has_write_access_for_user(&self, user: &Record) -> bool {
        self.access.has_write_access_for_user(user.id())
    }

    // ========================================================================
    // Wire format
    // ========================================================================

    /// Serialize to the wire representation.
    ///
    /// Metadata lives under reserved `$`-prefixed keys (`$type`, `$id`,
    /// `$access`, `$created_at`, ...); every other key is an attribute.
    pub fn to_json(&self) -> Json {
        let mut obj = serde_json::Map::new();
        obj.insert("$type".to_string(), json!("record"));
        obj.insert("$id".to_string(), json!(self.id.to_string()));
        obj.insert("$access".to_string(), self.access.to_json());

        if let Some(ts) = self.created_at {
            obj.insert(
                "$created_at".to_string(),
                json!(ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
        if let Some(ts) = self.updated_at {
            obj.insert(
                "$updated_at".to_string(),
                json!(ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
        if let Some(ref owner_id) = self.owner_id {
            obj.insert("$owner_id".to_string(), json!(owner_id));
        }
        if let Some(ref created_by) = self.created_by {
            obj.insert("$created_by".to_string(), json!(created_by));
        }
        if let Some(ref updated_by) = self.updated_by {
            obj.insert("$updated_by".to_string(), json!(updated_by));
        }
        if !self.transient.is_empty() {
            obj.insert(
                "$transient".to_string(),
                Json::Object(
                    self.transient
                        .iter()
                        .map(|(k, v)| (k.clone(), v.to_json()))
                        .collect(),
                ),
            );
        }

        for (key, value) in &self.attributes {
            obj.insert(key.clone(), value.to_json());
        }
        Json::Object(obj)
    }

    /// Deserialize from the wire representation.
    ///
    /// Unknown reserved (`$`-prefixed) keys are ignored, not errored.
    pub fn from_json(json: &Json) -> Result<Self, Error> {
        let obj = json.as_object().ok_or_else(|| InvalidInputError::Value {
            reason: "record must be a JSON object".to_string(),
        })?;

        match obj.get("$type").and_then(Json::as_str) {
            Some("record") => {}
            other => {
                return Err(InvalidInputError::Value {
                    reason: format!("expected $type 'record', got {:?}", other),
                }
                .into());
            }
        }

        let id = obj
            .get("$id")
            .and_then(Json::as_str)
            .ok_or_else(|| InvalidInputError::Value {
                reason: "record missing $id".to_string(),
            })
            .map_err(Error::from)
            .and_then(RecordId::parse)?;

        let mut record = Record::empty(id);

        if let Some(access) = obj.get("$access") {
            record.access = Acl::from_json(access)?;
        }
        record.created_at = parse_meta_timestamp(obj, "$created_at")?;
        record.updated_at = parse_meta_timestamp(obj, "$updated_at")?;
        record.owner_id = obj.get("$owner_id").and_then(Json::as_str).map(String::from);
        record.created_by = obj
            .get("$created_by")
            .and_then(Json::as_str)
            .map(String::from);
        record.updated_by = obj
            .get("$updated_by")
            .and_then(Json::as_str)
            .map(String::from);

        if let Some(transient) = obj.get("$transient").and_then(Json::as_object) {
            for (key, value) in transient {
                record
                    .transient
                    .insert(key.clone(), Value::from_json(value)?);
            }
        }

        for (key, value) in obj {
            if key.starts_with('$') {
                // Known reserved keys were consumed above; unknown ones
                // are ignored for forward compatibility.
                continue;
            }
            record.attributes.insert(key.clone(), Value::from_json(value)?);
        }

        Ok(record)
    }
}

fn parse_meta_timestamp(
    obj: &serde_json::Map<String, Json>,
    key: &str,
) -> Result<Option<DateTime<Utc>>, Error> {
    match obj.get(key).and_then(Json::as_str) {
        Some(raw) => {
            let parsed =
                DateTime::parse_from_rfc3339(raw).map_err(|e| InvalidInputError::Value {
                    reason: format!("bad {} '{}': {}", key, raw, e),
                })?;
            Ok(Some(parsed.with_timezone(&Utc)))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(id: &str) -> Record {
        Record::with_id(RecordId::parse(format!("user/{}", id)).unwrap())
    }

    #[test]
    fn new_record_has_generated_id() {
        let note = Record::new("note").unwrap();
        assert_eq!(note.record_type().as_str(), "note");
        assert!(!note.id().is_empty());
        assert!(note.created_at().is_none());
    }

    #[test]
    fn update_merges_shallowly() {
        let mut note = Record::new("note").unwrap();
        note.set("title", Value::from("a")).unwrap();
        note.update([
            ("title".to_string(), Value::from("b")),
            ("done".to_string(), Value::from(true)),
        ])
        .unwrap();
        assert_eq!(note.get("title"), Some(&Value::from("b")));
        assert_eq!(note.get("done"), Some(&Value::from(true)));
    }

    #[test]
    fn update_rejects_reserved_keys() {
        let mut note = Record::new("note").unwrap();
        assert!(note.set("$id", Value::from("x")).is_err());
        assert!(note.set("_id", Value::from("x")).is_err());
        assert!(note
            .update([("$created_at".to_string(), Value::from("x"))])
            .is_err());
    }

    #[test]
    fn acl_setters_are_idempotent_through_record() {
        let alice = user("alice");
        let mut note = Record::new("note").unwrap();
        note.set_read_only_for_user(&alice);
        note.set_read_only_for_user(&alice);
        assert!(note.has_read_access_for_user(&alice));
        assert!(!note.has_write_access_for_user(&alice));
        assert_eq!(note.access().entries().len(), 1);
    }

    #[test]
    fn write_access_implies_read_access() {
        let bob = user("bob");
        let mut note = Record::new("note").unwrap();
        note.set_read_write_access_for_user(&bob);
        assert!(note.has_read_access_for_user(&bob));
        assert!(note.has_write_access_for_user(&bob));
    }

    #[test]
    fn wire_round_trip_preserves_everything() {
        let mut note = Record::with_id(RecordId::parse("note/n1").unwrap());
        note.set("title", Value::from("hello")).unwrap();
        note.set("count", Value::from(3i64)).unwrap();
        note.set_public_read_only();

        let json = note.to_json();
        assert_eq!(json["$type"], "record");
        assert_eq!(json["$id"], "note/n1");

        let parsed = Record::from_json(&json).unwrap();
        assert_eq!(parsed, note);
    }

    #[test]
    fn from_json_reads_server_metadata() {
        let json = json!({
            "$type": "record",
            "$id": "note/n2",
            "$access": [],
            "$created_at": "2021-01-02T03:04:05.000Z",
            "$updated_at": "2021-01-03T03:04:05.000Z",
            "$owner_id": "u1",
            "$created_by": "u1",
            "$updated_by": "u2",
            "$transient": {"author": {"$type": "record", "$id": "user/u1"}},
            "title": "hi"
        });
        let record = Record::from_json(&json).unwrap();
        assert!(record.created_at().is_some());
        assert_eq!(record.owner_id(), Some("u1"));
        assert_eq!(record.updated_by(), Some("u2"));
        assert!(record.transient().contains_key("author"));
        assert_eq!(record.get("title"), Some(&Value::from("hi")));
    }

    #[test]
    fn from_json_ignores_unknown_reserved_keys() {
        let json = json!({
            "$type": "record",
            "$id": "note/n3",
            "$future_extension": {"weird": true},
            "body": "text"
        });
        let record = Record::from_json(&json).unwrap();
        assert_eq!(record.get("body"), Some(&Value::from("text")));
        assert!(record.get("$future_extension").is_none());
    }

    #[test]
    fn nested_record_value_round_trips() {
        let mut inner = Record::with_id(RecordId::parse("tag/t1").unwrap());
        inner.set("label", Value::from("urgent")).unwrap();

        let mut note = Record::with_id(RecordId::parse("note/n4").unwrap());
        note.set("tag", Value::Record(Box::new(inner))).unwrap();

        let parsed = Record::from_json(&note.to_json()).unwrap();
        assert_eq!(parsed, note);
    }
}
