//! Declarative queries over one record type.
//!
//! [`Query`] is a move-style builder: every predicate, sort, and paging
//! method consumes and returns the query, accumulating clauses in
//! conjunction. The finalized value is an immutable snapshot whose
//! [`Query::to_json`] output is canonical — equal queries built in
//! different call order serialize and hash identically.

mod predicate;

pub use predicate::{CompareOp, Predicate};

use std::collections::BTreeMap;
use std::hash::{Hash as _, Hasher};

use serde_json::{Value as Json, json};

use crate::error::{Error, InvalidInputError};
use crate::record::{GeoLocation, Record, Value};
use crate::types::RecordType;

use predicate::{distance_func, keypath, parse_distance_func, parse_keypath};

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    fn wire_name(self) -> &'static str {
        match self {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        }
    }
}

/// What a sort descriptor orders by.
#[derive(Debug, Clone, PartialEq)]
enum SortKey {
    Attribute(String),
    Distance { key: String, location: GeoLocation },
}

/// One entry of the ordered sort specification.
#[derive(Debug, Clone, PartialEq)]
pub struct SortDescriptor {
    key: SortKey,
    order: SortOrder,
}

/// A transient-include directive: eager-load a reference or project a
/// computed distance into `$transient` under the map key.
#[derive(Debug, Clone, PartialEq)]
enum TransientExpr {
    Include(String),
    Distance { key: String, location: GeoLocation },
}

/// A serializable description of one read operation: a record type, a
/// predicate tree, sort specification, pagination, and transient-include
/// directives.
///
/// # Example
///
/// ```
/// use cirrus::{Query, Value};
///
/// let q = Query::new("note").unwrap()
///     .equal_to("category", Value::from("work"))
///     .greater_than("priority", Value::from(2i64))
///     .add_descending("priority")
///     .limit(20);
///
/// let round_tripped = Query::from_json(&q.to_json()).unwrap();
/// assert_eq!(round_tripped.hash(), q.hash());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    record_type: RecordType,
    predicate: Option<Predicate>,
    sort: Vec<SortDescriptor>,
    limit: Option<u64>,
    offset: Option<u64>,
    page: Option<u64>,
    overall_count: bool,
    transient: BTreeMap<String, TransientExpr>,
}

impl Query {
    /// Create a query over the given record type with no constraints.
    pub fn new(record_type: impl AsRef<str>) -> Result<Self, Error> {
        Ok(Self::for_type(RecordType::new(record_type.as_ref())?))
    }

    pub(crate) fn for_type(record_type: RecordType) -> Self {
        Self {
            record_type,
            predicate: None,
            sort: Vec::new(),
            limit: None,
            offset: None,
            page: None,
            overall_count: false,
            transient: BTreeMap::new(),
        }
    }

    /// Returns the queried record type.
    pub fn record_type(&self) -> &RecordType {
        &self.record_type
    }

    /// Returns the accumulated predicate, if any clause has been added.
    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    // ========================================================================
    // Predicate clauses (accumulate in conjunction)
    // ========================================================================

    fn with_predicate(mut self, clause: Predicate) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(clause),
            None => clause,
        });
        self
    }

    fn compare(self, op: CompareOp, key: &str, value: Value) -> Self {
        self.with_predicate(Predicate::Compare {
            op,
            key: key.to_string(),
            value,
        })
    }

    pub fn equal_to(self, key: &str, value: Value) -> Self {
        self.compare(CompareOp::Eq, key, value)
    }

    pub fn not_equal_to(self, key: &str, value: Value) -> Self {
        self.compare(CompareOp::Neq, key, value)
    }

    pub fn greater_than(self, key: &str, value: Value) -> Self {
        self.compare(CompareOp::Gt, key, value)
    }

    pub fn greater_than_or_equal_to(self, key: &str, value: Value) -> Self {
        self.compare(CompareOp::Gte, key, value)
    }

    pub fn less_than(self, key: &str, value: Value) -> Self {
        self.compare(CompareOp::Lt, key, value)
    }

    pub fn less_than_or_equal_to(self, key: &str, value: Value) -> Self {
        self.compare(CompareOp::Lte, key, value)
    }

    /// Case-sensitive pattern match (`%` wildcards).
    pub fn like(self, key: &str, pattern: &str) -> Self {
        self.compare(CompareOp::Like, key, Value::from(pattern))
    }

    pub fn not_like(self, key: &str, pattern: &str) -> Self {
        self.with_predicate(Predicate::Not(Box::new(Predicate::Compare {
            op: CompareOp::Like,
            key: key.to_string(),
            value: Value::from(pattern),
        })))
    }

    /// Case-insensitive pattern match.
    pub fn case_insensitive_like(self, key: &str, pattern: &str) -> Self {
        self.compare(CompareOp::ILike, key, Value::from(pattern))
    }

    pub fn case_insensitive_not_like(self, key: &str, pattern: &str) -> Self {
        self.with_predicate(Predicate::Not(Box::new(Predicate::Compare {
            op: CompareOp::ILike,
            key: key.to_string(),
            value: Value::from(pattern),
        })))
    }

    /// The value at `key` is one of `values`.
    pub fn contains(self, key: &str, values: Vec<Value>) -> Self {
        self.with_predicate(Predicate::In {
            key: key.to_string(),
            values,
        })
    }

    pub fn not_contains(self, key: &str, values: Vec<Value>) -> Self {
        self.with_predicate(Predicate::Not(Box::new(Predicate::In {
            key: key.to_string(),
            values,
        })))
    }

    /// The array value at `key` contains `needle`.
    pub fn contains_value(self, key: &str, needle: Value) -> Self {
        self.with_predicate(Predicate::ContainsValue {
            key: key.to_string(),
            needle,
        })
    }

    pub fn not_contains_value(self, key: &str, needle: Value) -> Self {
        self.with_predicate(Predicate::Not(Box::new(Predicate::ContainsValue {
            key: key.to_string(),
            needle,
        })))
    }

    /// The geo value at `key` is farther than `distance` meters from
    /// `location`.
    pub fn distance_greater_than(self, key: &str, location: GeoLocation, distance: f64) -> Self {
        self.with_predicate(Predicate::Distance {
            op: CompareOp::Gt,
            key: key.to_string(),
            location,
            distance,
        })
    }

    /// The geo value at `key` is nearer than `distance` meters to
    /// `location`.
    pub fn distance_less_than(self, key: &str, location: GeoLocation, distance: f64) -> Self {
        self.with_predicate(Predicate::Distance {
            op: CompareOp::Lt,
            key: key.to_string(),
            location,
            distance,
        })
    }

    // ========================================================================
    // Sort specification (later calls add secondary sort keys)
    // ========================================================================

    pub fn add_ascending(mut self, key: &str) -> Self {
        self.sort.push(SortDescriptor {
            key: SortKey::Attribute(key.to_string()),
            order: SortOrder::Ascending,
        });
        self
    }

    pub fn add_descending(mut self, key: &str) -> Self {
        self.sort.push(SortDescriptor {
            key: SortKey::Attribute(key.to_string()),
            order: SortOrder::Descending,
        });
        self
    }

    pub fn add_ascending_by_distance(mut self, key: &str, location: GeoLocation) -> Self {
        self.sort.push(SortDescriptor {
            key: SortKey::Distance {
                key: key.to_string(),
                location,
            },
            order: SortOrder::Ascending,
        });
        self
    }

    pub fn add_descending_by_distance(mut self, key: &str, location: GeoLocation) -> Self {
        self.sort.push(SortDescriptor {
            key: SortKey::Distance {
                key: key.to_string(),
                location,
            },
            order: SortOrder::Descending,
        });
        self
    }

    // ========================================================================
    // Pagination and counting
    // ========================================================================

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    /// Request the total match count ignoring pagination on the result.
    pub fn overall_count(mut self) -> Self {
        self.overall_count = true;
        self
    }

    // ========================================================================
    // Transient includes
    // ========================================================================

    /// Eager-load the reference at `key` into `$transient[map_to ?? key]`.
    pub fn transient_include(mut self, key: &str, map_to: Option<&str>) -> Self {
        self.transient.insert(
            map_to.unwrap_or(key).to_string(),
            TransientExpr::Include(key.to_string()),
        );
        self
    }

    /// Project the distance from the geo value at `key` to `location`
    /// into `$transient[map_to ?? key]`.
    pub fn transient_include_distance(
        mut self,
        key: &str,
        map_to: Option<&str>,
        location: GeoLocation,
    ) -> Self {
        self.transient.insert(
            map_to.unwrap_or(key).to_string(),
            TransientExpr::Distance {
                key: key.to_string(),
                location,
            },
        );
        self
    }

    // ========================================================================
    // Combinators
    // ========================================================================

    /// Combine the predicates of several queries into a disjunction.
    ///
    /// All queries must target the same record type and carry at least
    /// one predicate clause. Sort, pagination, and transient includes are
    /// not combined; the result starts with defaults. Inputs are not
    /// mutated.
    pub fn or<I>(queries: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = Query>,
    {
        let queries: Vec<Query> = queries.into_iter().collect();
        let first_type = queries
            .first()
            .map(|q| q.record_type.clone())
            .ok_or_else(|| InvalidInputError::Query {
                reason: "'or' requires at least one query".to_string(),
            })?;

        let mut branches = Vec::with_capacity(queries.len());
        for q in queries {
            if q.record_type != first_type {
                return Err(InvalidInputError::Query {
                    reason: format!(
                        "'or' requires a single record type, got '{}' and '{}'",
                        first_type, q.record_type
                    ),
                }
                .into());
            }
            branches.push(q.predicate.ok_or_else(|| InvalidInputError::Query {
                reason: "'or' requires every query to have a predicate".to_string(),
            })?);
        }

        let mut combined = Query::for_type(first_type);
        combined.predicate = Some(Predicate::Or(branches));
        Ok(combined)
    }

    /// Negate a query's predicate into a new query. The input is not
    /// mutated; sort, pagination, and transient includes are not carried
    /// over.
    pub fn not(query: Query) -> Result<Self, Error> {
        let predicate = query.predicate.ok_or_else(|| InvalidInputError::Query {
            reason: "'not' requires the query to have a predicate".to_string(),
        })?;
        let mut negated = Query::for_type(query.record_type);
        negated.predicate = Some(Predicate::Not(Box::new(predicate)));
        Ok(negated)
    }

    // ========================================================================
    // Wire format and hashing
    // ========================================================================

    /// Serialize to the canonical wire representation.
    ///
    /// `and`/`or` children are sorted by serialized form, so two queries
    /// with the same clauses added in different order emit identical
    /// JSON. Sort descriptors keep their order (it is significant).
    pub fn to_json(&self) -> Json {
        let mut obj = serde_json::Map::new();
        obj.insert(
            "record_type".to_string(),
            json!(self.record_type.as_str()),
        );

        if let Some(ref predicate) = self.predicate {
            obj.insert(
                "predicate".to_string(),
                predicate.clone().canonicalize().to_json(),
            );
        }

        if !self.sort.is_empty() {
            let sort: Vec<Json> = self
                .sort
                .iter()
                .map(|descriptor| {
                    let key = match &descriptor.key {
                        SortKey::Attribute(key) => keypath(key),
                        SortKey::Distance { key, location } => distance_func(key, location),
                    };
                    json!([key, descriptor.order.wire_name()])
                })
                .collect();
            obj.insert("sort".to_string(), Json::Array(sort));
        }

        if let Some(limit) = self.limit {
            obj.insert("limit".to_string(), json!(limit));
        }
        if let Some(offset) = self.offset {
            obj.insert("offset".to_string(), json!(offset));
        }
        if let Some(page) = self.page {
            obj.insert("page".to_string(), json!(page));
        }
        if self.overall_count {
            obj.insert("count".to_string(), json!(true));
        }

        if !self.transient.is_empty() {
            let include: serde_json::Map<String, Json> = self
                .transient
                .iter()
                .map(|(map_key, expr)| {
                    let value = match expr {
                        TransientExpr::Include(key) => keypath(key),
                        TransientExpr::Distance { key, location } => distance_func(key, location),
                    };
                    (map_key.clone(), value)
                })
                .collect();
            obj.insert("include".to_string(), Json::Object(include));
        }

        Json::Object(obj)
    }

    /// Deserialize from the wire representation. Inverse of
    /// [`Query::to_json`] up to canonical form: the round-trip preserves
    /// [`Query::hash`].
    pub fn from_json(json: &Json) -> Result<Self, Error> {
        let obj = json.as_object().ok_or_else(|| InvalidInputError::Query {
            reason: "query must be a JSON object".to_string(),
        })?;

        let record_type = obj
            .get("record_type")
            .and_then(Json::as_str)
            .ok_or_else(|| InvalidInputError::Query {
                reason: "query missing record_type".to_string(),
            })?;
        let record_type = if record_type.starts_with('_') {
            // Reserved types can be queried even though clients cannot
            // create them.
            RecordType::new(&record_type[1..]).map(|_| RecordType::reserved(record_type))?
        } else {
            RecordType::new(record_type)?
        };

        let mut query = Query::for_type(record_type);

        if let Some(predicate) = obj.get("predicate") {
            query.predicate = Some(Predicate::from_json(predicate)?);
        }

        if let Some(sort) = obj.get("sort") {
            let items = sort.as_array().ok_or_else(|| InvalidInputError::Query {
                reason: "sort must be an array".to_string(),
            })?;
            for item in items {
                query.sort.push(parse_sort_descriptor(item)?);
            }
        }

        query.limit = obj.get("limit").and_then(Json::as_u64);
        query.offset = obj.get("offset").and_then(Json::as_u64);
        query.page = obj.get("page").and_then(Json::as_u64);
        query.overall_count = obj.get("count").and_then(Json::as_bool).unwrap_or(false);

        if let Some(include) = obj.get("include").and_then(Json::as_object) {
            for (map_key, expr) in include {
                let parsed = if let Some(key) = parse_keypath(expr) {
                    TransientExpr::Include(key)
                } else if let Some((key, location)) = parse_distance_func(expr) {
                    TransientExpr::Distance { key, location }
                } else {
                    return Err(InvalidInputError::Query {
                        reason: format!("bad include expression for '{}'", map_key),
                    }
                    .into());
                };
                query.transient.insert(map_key.clone(), parsed);
            }
        }

        Ok(query)
    }

    /// A deterministic hash of the query's semantic content.
    ///
    /// Pure function of predicate, sort, pagination, and transient
    /// includes; insensitive to the order predicate clauses were added
    /// (conjunction and disjunction are commutative for hashing). Suitable
    /// as an in-process result-cache key.
    pub fn hash(&self) -> u64 {
        let canonical = self.to_json().to_string();
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        canonical.hash(&mut hasher);
        hasher.finish()
    }
}

fn parse_sort_descriptor(json: &Json) -> Result<SortDescriptor, Error> {
    let pair = json.as_array().ok_or_else(|| InvalidInputError::Query {
        reason: "sort descriptor must be a [key, order] pair".to_string(),
    })?;

    let key_expr = pair.first().ok_or_else(|| InvalidInputError::Query {
        reason: "sort descriptor missing key".to_string(),
    })?;
    let key = if let Some(key) = parse_keypath(key_expr) {
        SortKey::Attribute(key)
    } else if let Some((key, location)) = parse_distance_func(key_expr) {
        SortKey::Distance { key, location }
    } else {
        return Err(InvalidInputError::Query {
            reason: "bad sort key expression".to_string(),
        }
        .into());
    };

    let order = match pair.get(1).and_then(Json::as_str) {
        Some("asc") => SortOrder::Ascending,
        Some("desc") => SortOrder::Descending,
        other => {
            return Err(InvalidInputError::Query {
                reason: format!("bad sort order {:?}", other),
            }
            .into());
        }
    };

    Ok(SortDescriptor { key, order })
}

/// An ordered sequence of records returned by a query, with the total
/// match count when it was requested.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    records: Vec<Record>,
    overall_count: Option<u64>,
}

impl QueryResult {
    pub(crate) fn new(records: Vec<Record>, overall_count: Option<u64>) -> Self {
        Self {
            records,
            overall_count,
        }
    }

    /// Number of records in this page of results.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The record at `index`, in server-returned order.
    pub fn get(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }

    /// Iterate the records in server-returned order.
    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    /// Total matches ignoring pagination; present only when the query
    /// requested it via [`Query::overall_count`].
    pub fn overall_count(&self) -> Option<u64> {
        self.overall_count
    }

    /// Consume the result, returning the records.
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

impl IntoIterator for QueryResult {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a QueryResult {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geo() -> GeoLocation {
        GeoLocation::new(22.3, 114.2).unwrap()
    }

    #[test]
    fn hash_ignores_insertion_order() {
        let a = Query::new("note")
            .unwrap()
            .equal_to("category", Value::from("work"))
            .greater_than("priority", Value::from(2i64))
            .limit(10);
        let b = Query::new("note")
            .unwrap()
            .greater_than("priority", Value::from(2i64))
            .equal_to("category", Value::from("work"))
            .limit(10);

        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.to_json(), b.to_json());
    }

    #[test]
    fn hash_differs_on_semantic_change() {
        let a = Query::new("note")
            .unwrap()
            .equal_to("category", Value::from("work"));
        let b = Query::new("note")
            .unwrap()
            .equal_to("category", Value::from("home"));
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn round_trip_preserves_hash() {
        let q = Query::new("note")
            .unwrap()
            .like("title", "%report%")
            .contains("status", vec![Value::from("new"), Value::from("open")])
            .distance_less_than("location", geo(), 500.0)
            .add_descending("priority")
            .add_ascending_by_distance("location", geo())
            .transient_include("author", Some("author_record"))
            .transient_include_distance("location", None, geo())
            .limit(25)
            .offset(50)
            .overall_count();

        let parsed = Query::from_json(&q.to_json()).unwrap();
        assert_eq!(parsed.hash(), q.hash());
        assert_eq!(parsed.to_json(), q.to_json());
    }

    #[test]
    fn clone_is_independent() {
        let original = Query::new("note")
            .unwrap()
            .equal_to("category", Value::from("work"));
        let before = original.to_json();

        let mutated = original.clone().equal_to("done", Value::from(true));

        assert_eq!(original.to_json(), before);
        assert_ne!(mutated.to_json(), before);
    }

    #[test]
    fn or_requires_matching_record_type() {
        let notes = Query::new("note")
            .unwrap()
            .equal_to("a", Value::from(1i64));
        let tasks = Query::new("task")
            .unwrap()
            .equal_to("a", Value::from(1i64));
        assert!(Query::or([notes, tasks]).is_err());
    }

    #[test]
    fn or_does_not_mutate_inputs() {
        let a = Query::new("note").unwrap().equal_to("x", Value::from(1i64));
        let b = Query::new("note").unwrap().equal_to("y", Value::from(2i64));
        let a_json = a.to_json();

        let combined = Query::or([a.clone(), b]).unwrap();
        assert_eq!(a.to_json(), a_json);
        assert!(matches!(combined.predicate(), Some(Predicate::Or(_))));
    }

    #[test]
    fn or_is_order_insensitive_for_hashing() {
        let a = Query::new("note").unwrap().equal_to("x", Value::from(1i64));
        let b = Query::new("note").unwrap().equal_to("y", Value::from(2i64));
        let ab = Query::or([a.clone(), b.clone()]).unwrap();
        let ba = Query::or([b, a]).unwrap();
        assert_eq!(ab.hash(), ba.hash());
    }

    #[test]
    fn not_wraps_predicate() {
        let q = Query::new("note").unwrap().like("title", "%draft%");
        let negated = Query::not(q).unwrap();
        assert!(matches!(negated.predicate(), Some(Predicate::Not(_))));
    }

    #[test]
    fn not_requires_a_predicate() {
        assert!(Query::not(Query::new("note").unwrap()).is_err());
    }

    #[test]
    fn sort_keys_accumulate_in_order() {
        let q = Query::new("note")
            .unwrap()
            .add_descending("priority")
            .add_ascending("title");
        let json = q.to_json();
        let sort = json["sort"].as_array().unwrap();
        assert_eq!(sort.len(), 2);
        assert_eq!(sort[0][1], "desc");
        assert_eq!(sort[1][1], "asc");
        assert_eq!(sort[0][0]["$val"], "priority");
    }

    #[test]
    fn transient_include_defaults_map_key() {
        let q = Query::new("note").unwrap().transient_include("author", None);
        let json = q.to_json();
        assert_eq!(json["include"]["author"]["$val"], "author");
    }

    #[test]
    fn overall_count_omitted_unless_requested() {
        let q = Query::new("note").unwrap();
        assert!(q.to_json().get("count").is_none());
        let counted = q.overall_count();
        assert_eq!(counted.to_json()["count"], true);
    }
}
