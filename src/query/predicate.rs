//! Query predicate expression trees.
//!
//! Predicates serialize to the wire as expression arrays:
//! `["eq", {"$type":"keypath","$val":"title"}, "hello"]`, combined with
//! `["and", ...]`, `["or", ...]`, and `["not", ...]`. Geo-distance
//! clauses compare a distance function expression:
//! `["gt", ["func", "distance", keypath, geo], 400.0]`.

use serde_json::{Value as Json, json};

use crate::error::{Error, InvalidInputError};
use crate::record::{GeoLocation, Value};

/// Comparison operators usable against a key path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    ILike,
}

impl CompareOp {
    fn wire_name(self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::Neq => "neq",
            CompareOp::Gt => "gt",
            CompareOp::Gte => "gte",
            CompareOp::Lt => "lt",
            CompareOp::Lte => "lte",
            CompareOp::Like => "like",
            CompareOp::ILike => "ilike",
        }
    }

    fn from_wire(s: &str) -> Option<Self> {
        match s {
            "eq" => Some(CompareOp::Eq),
            "neq" => Some(CompareOp::Neq),
            "gt" => Some(CompareOp::Gt),
            "gte" => Some(CompareOp::Gte),
            "lt" => Some(CompareOp::Lt),
            "lte" => Some(CompareOp::Lte),
            "like" => Some(CompareOp::Like),
            "ilike" => Some(CompareOp::ILike),
            _ => None,
        }
    }
}

/// A predicate expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Conjunction of sub-predicates.
    And(Vec<Predicate>),
    /// Disjunction of sub-predicates.
    Or(Vec<Predicate>),
    /// Negation.
    Not(Box<Predicate>),
    /// `<key> <op> <value>`.
    Compare {
        op: CompareOp,
        key: String,
        value: Value,
    },
    /// The value at `key` is one of `values`.
    In { key: String, values: Vec<Value> },
    /// The array value at `key` contains `needle`.
    ContainsValue { key: String, needle: Value },
    /// The distance from the value at `key` to `location` compares
    /// against `distance` (meters). Only `Gt` and `Lt` are meaningful.
    Distance {
        op: CompareOp,
        key: String,
        location: GeoLocation,
        distance: f64,
    },
}

impl Predicate {
    /// Combine two predicates in conjunction, flattening nested `And`s.
    pub fn and(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::And(mut left), Predicate::And(right)) => {
                left.extend(right);
                Predicate::And(left)
            }
            (Predicate::And(mut left), right) => {
                left.push(right);
                Predicate::And(left)
            }
            (left, Predicate::And(mut right)) => {
                right.insert(0, left);
                Predicate::And(right)
            }
            (left, right) => Predicate::And(vec![left, right]),
        }
    }

    /// Rewrite into canonical form: children of `And`/`Or` sorted by
    /// their serialized representation. Conjunction and disjunction are
    /// treated as commutative, so structurally equal predicates built in
    /// different clause order canonicalize identically.
    pub fn canonicalize(self) -> Predicate {
        match self {
            Predicate::And(children) => Predicate::And(Self::canonical_children(children)),
            Predicate::Or(children) => Predicate::Or(Self::canonical_children(children)),
            Predicate::Not(inner) => Predicate::Not(Box::new(inner.canonicalize())),
            leaf => leaf,
        }
    }

    fn canonical_children(children: Vec<Predicate>) -> Vec<Predicate> {
        let mut children: Vec<Predicate> =
            children.into_iter().map(Predicate::canonicalize).collect();
        children.sort_by_cached_key(|child| child.to_json().to_string());
        children
    }

    /// Serialize to the expression-array wire form.
    pub fn to_json(&self) -> Json {
        match self {
            Predicate::And(children) => {
                let mut items = vec![json!("and")];
                items.extend(children.iter().map(Predicate::to_json));
                Json::Array(items)
            }
            Predicate::Or(children) => {
                let mut items = vec![json!("or")];
                items.extend(children.iter().map(Predicate::to_json));
                Json::Array(items)
            }
            Predicate::Not(inner) => json!(["not", inner.to_json()]),
            Predicate::Compare { op, key, value } => {
                json!([op.wire_name(), keypath(key), value.to_json()])
            }
            Predicate::In { key, values } => {
                let values: Vec<Json> = values.iter().map(Value::to_json).collect();
                json!(["in", keypath(key), values])
            }
            Predicate::ContainsValue { key, needle } => {
                json!(["in", needle.to_json(), keypath(key)])
            }
            Predicate::Distance {
                op,
                key,
                location,
                distance,
            } => {
                json!([
                    op.wire_name(),
                    ["func", "distance", keypath(key), location.to_json()],
                    distance
                ])
            }
        }
    }

    /// Deserialize from the expression-array wire form.
    pub fn from_json(json: &Json) -> Result<Self, Error> {
        let items = json.as_array().ok_or_else(|| query_error("predicate must be an array"))?;
        let op = items
            .first()
            .and_then(Json::as_str)
            .ok_or_else(|| query_error("predicate must start with an operator string"))?;

        match op {
            "and" | "or" => {
                let children = items[1..]
                    .iter()
                    .map(Predicate::from_json)
                    .collect::<Result<Vec<_>, _>>()?;
                if children.is_empty() {
                    return Err(query_error("empty conjunction"));
                }
                Ok(if op == "and" {
                    Predicate::And(children)
                } else {
                    Predicate::Or(children)
                })
            }
            "not" => {
                let inner = items
                    .get(1)
                    .ok_or_else(|| query_error("'not' requires one operand"))?;
                Ok(Predicate::Not(Box::new(Predicate::from_json(inner)?)))
            }
            "in" => {
                let left = items.get(1).ok_or_else(|| query_error("'in' requires two operands"))?;
                let right = items.get(2).ok_or_else(|| query_error("'in' requires two operands"))?;
                if let Some(key) = parse_keypath(left) {
                    let values = right
                        .as_array()
                        .ok_or_else(|| query_error("'in' lookup list must be an array"))?
                        .iter()
                        .map(Value::from_json)
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(Predicate::In { key, values })
                } else if let Some(key) = parse_keypath(right) {
                    Ok(Predicate::ContainsValue {
                        key,
                        needle: Value::from_json(left)?,
                    })
                } else {
                    Err(query_error("'in' requires a keypath operand"))
                }
            }
            other => {
                let op = CompareOp::from_wire(other)
                    .ok_or_else(|| query_error(&format!("unknown operator '{}'", other)))?;
                let left = items
                    .get(1)
                    .ok_or_else(|| query_error("comparison requires two operands"))?;
                let right = items
                    .get(2)
                    .ok_or_else(|| query_error("comparison requires two operands"))?;

                if let Some((key, location)) = parse_distance_func(left) {
                    let distance = right
                        .as_f64()
                        .ok_or_else(|| query_error("distance comparison requires a number"))?;
                    return Ok(Predicate::Distance {
                        op,
                        key,
                        location,
                        distance,
                    });
                }

                let key = parse_keypath(left)
                    .ok_or_else(|| query_error("comparison requires a keypath operand"))?;
                Ok(Predicate::Compare {
                    op,
                    key,
                    value: Value::from_json(right)?,
                })
            }
        }
    }
}

/// Build the `{"$type":"keypath","$val":key}` wire shape.
pub(crate) fn keypath(key: &str) -> Json {
    json!({"$type": "keypath", "$val": key})
}

/// Parse a keypath wire shape back into its key.
pub(crate) fn parse_keypath(json: &Json) -> Option<String> {
    let obj = json.as_object()?;
    if obj.get("$type").and_then(Json::as_str) != Some("keypath") {
        return None;
    }
    obj.get("$val").and_then(Json::as_str).map(String::from)
}

/// Build the `["func","distance",keypath,geo]` wire shape.
pub(crate) fn distance_func(key: &str, location: &GeoLocation) -> Json {
    json!(["func", "distance", keypath(key), location.to_json()])
}

/// Parse a distance function expression back into its parts.
pub(crate) fn parse_distance_func(json: &Json) -> Option<(String, GeoLocation)> {
    let items = json.as_array()?;
    if items.first().and_then(Json::as_str) != Some("func")
        || items.get(1).and_then(Json::as_str) != Some("distance")
    {
        return None;
    }
    let key = parse_keypath(items.get(2)?)?;
    let location = GeoLocation::from_json(items.get(3)?).ok()?;
    Some((key, location))
}

fn query_error(reason: &str) -> Error {
    InvalidInputError::Query {
        reason: reason.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eq(key: &str, value: &str) -> Predicate {
        Predicate::Compare {
            op: CompareOp::Eq,
            key: key.to_string(),
            value: Value::from(value),
        }
    }

    #[test]
    fn and_flattens() {
        let p = eq("a", "1").and(eq("b", "2")).and(eq("c", "3"));
        match p {
            Predicate::And(children) => assert_eq!(children.len(), 3),
            other => panic!("expected And, got {:?}", other),
        }
    }

    #[test]
    fn canonicalize_sorts_conjunction_children() {
        let forward = eq("a", "1").and(eq("b", "2")).canonicalize();
        let backward = eq("b", "2").and(eq("a", "1")).canonicalize();
        assert_eq!(forward, backward);
        assert_eq!(forward.to_json(), backward.to_json());
    }

    #[test]
    fn canonicalize_recurses_into_nested_trees() {
        let left = Predicate::Or(vec![eq("x", "1"), eq("y", "2")]);
        let right = Predicate::Or(vec![eq("y", "2"), eq("x", "1")]);
        assert_eq!(
            left.and(eq("z", "3")).canonicalize(),
            eq("z", "3").and(right).canonicalize()
        );
    }

    #[test]
    fn comparison_round_trips() {
        let p = eq("title", "hello");
        let json = p.to_json();
        assert_eq!(json[0], "eq");
        assert_eq!(Predicate::from_json(&json).unwrap(), p);
    }

    #[test]
    fn in_and_contains_value_disambiguate() {
        let contains = Predicate::In {
            key: "status".to_string(),
            values: vec![Value::from("new"), Value::from("open")],
        };
        assert_eq!(Predicate::from_json(&contains.to_json()).unwrap(), contains);

        let contains_value = Predicate::ContainsValue {
            key: "tags".to_string(),
            needle: Value::from("urgent"),
        };
        assert_eq!(
            Predicate::from_json(&contains_value.to_json()).unwrap(),
            contains_value
        );
    }

    #[test]
    fn distance_round_trips() {
        let p = Predicate::Distance {
            op: CompareOp::Gt,
            key: "location".to_string(),
            location: GeoLocation::new(22.3, 114.2).unwrap(),
            distance: 400.0,
        };
        assert_eq!(Predicate::from_json(&p.to_json()).unwrap(), p);
    }

    #[test]
    fn not_round_trips() {
        let p = Predicate::Not(Box::new(eq("title", "x")));
        assert_eq!(Predicate::from_json(&p.to_json()).unwrap(), p);
    }

    #[test]
    fn rejects_unknown_operator() {
        assert!(Predicate::from_json(&json!(["between", {"$type":"keypath","$val":"a"}, 1, 2])).is_err());
    }
}
