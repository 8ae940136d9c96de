//! Metadata `where` filters.
//!
//! Filters use the JSON shape common to embedded vector databases:
//!
//! ```json
//! {"kind": "session"}
//! {"importance": {"$gte": 3}}
//! {"$or": [{"kind": "session"}, {"tag": {"$in": ["a", "b"]}}]}
//! ```
//!
//! Several keys in one object are an implicit `$and`. A clause on a key the
//! metadata does not contain never matches.

use serde_json::Value;

use crate::error::MemoryError;
use crate::record::Metadata;

/// Equality/range predicate over record metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataFilter {
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, f64),
    Gte(String, f64),
    Lt(String, f64),
    Lte(String, f64),
    In(String, Vec<Value>),
    Nin(String, Vec<Value>),
    And(Vec<MetadataFilter>),
    Or(Vec<MetadataFilter>),
}

impl MetadataFilter {
    /// Shorthand for an equality clause.
    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(key.into(), value.into())
    }

    /// Parse a filter from its JSON text.
    pub fn parse(text: &str) -> Result<Self, MemoryError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_json(&value)
    }

    /// Build a filter from a JSON value.
    pub fn from_json(value: &Value) -> Result<Self, MemoryError> {
        let object = value
            .as_object()
            .ok_or_else(|| MemoryError::InvalidFilter("filter must be a JSON object".into()))?;

        if object.is_empty() {
            return Err(MemoryError::InvalidFilter("filter is empty".into()));
        }

        let mut clauses = Vec::with_capacity(object.len());
        for (key, operand) in object {
            let clause = match key.as_str() {
                "$and" => Self::And(parse_list(key, operand)?),
                "$or" => Self::Or(parse_list(key, operand)?),
                _ if key.starts_with('$') => {
                    return Err(MemoryError::InvalidFilter(format!(
                        "unknown logical operator {key}"
                    )))
                }
                _ => parse_field(key, operand)?,
            };
            clauses.push(clause);
        }

        if clauses.len() == 1 {
            Ok(clauses.remove(0))
        } else {
            Ok(Self::And(clauses))
        }
    }

    /// Evaluate the filter against a record's metadata.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Self::Eq(key, expected) => metadata.get(key).is_some_and(|v| values_equal(v, expected)),
            Self::Ne(key, expected) => metadata.get(key).is_some_and(|v| !values_equal(v, expected)),
            Self::Gt(key, bound) => number(metadata, key).is_some_and(|n| n > *bound),
            Self::Gte(key, bound) => number(metadata, key).is_some_and(|n| n >= *bound),
            Self::Lt(key, bound) => number(metadata, key).is_some_and(|n| n < *bound),
            Self::Lte(key, bound) => number(metadata, key).is_some_and(|n| n <= *bound),
            Self::In(key, options) => metadata
                .get(key)
                .is_some_and(|v| options.iter().any(|o| values_equal(v, o))),
            Self::Nin(key, options) => metadata
                .get(key)
                .is_some_and(|v| !options.iter().any(|o| values_equal(v, o))),
            Self::And(filters) => filters.iter().all(|f| f.matches(metadata)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(metadata)),
        }
    }
}

fn parse_list(op: &str, operand: &Value) -> Result<Vec<MetadataFilter>, MemoryError> {
    let items = operand
        .as_array()
        .ok_or_else(|| MemoryError::InvalidFilter(format!("{op} expects an array")))?;
    if items.is_empty() {
        return Err(MemoryError::InvalidFilter(format!("{op} expects at least one clause")));
    }
    items.iter().map(MetadataFilter::from_json).collect()
}

fn parse_field(key: &str, operand: &Value) -> Result<MetadataFilter, MemoryError> {
    let Some(ops) = operand.as_object() else {
        return Ok(MetadataFilter::Eq(key.to_string(), operand.clone()));
    };

    let mut entries = ops.iter();
    let (Some((op, arg)), None) = (entries.next(), entries.next()) else {
        return Err(MemoryError::InvalidFilter(format!(
            "field {key} expects exactly one operator"
        )));
    };
    let key = key.to_string();
    let filter = match op.as_str() {
        "$eq" => MetadataFilter::Eq(key, arg.clone()),
        "$ne" => MetadataFilter::Ne(key, arg.clone()),
        "$gt" => MetadataFilter::Gt(key, bound(op, arg)?),
        "$gte" => MetadataFilter::Gte(key, bound(op, arg)?),
        "$lt" => MetadataFilter::Lt(key, bound(op, arg)?),
        "$lte" => MetadataFilter::Lte(key, bound(op, arg)?),
        "$in" => MetadataFilter::In(key, options(op, arg)?),
        "$nin" => MetadataFilter::Nin(key, options(op, arg)?),
        other => {
            return Err(MemoryError::InvalidFilter(format!(
                "unknown operator {other} on field {key}"
            )))
        }
    };
    Ok(filter)
}

fn bound(op: &str, arg: &Value) -> Result<f64, MemoryError> {
    arg.as_f64()
        .ok_or_else(|| MemoryError::InvalidFilter(format!("{op} expects a number")))
}

fn options(op: &str, arg: &Value) -> Result<Vec<Value>, MemoryError> {
    arg.as_array()
        .cloned()
        .ok_or_else(|| MemoryError::InvalidFilter(format!("{op} expects an array")))
}

fn number(metadata: &Metadata, key: &str) -> Option<f64> {
    metadata.get(key).and_then(Value::as_f64)
}

// 3 and 3.0 compare equal
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(value: Value) -> Metadata {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_parse_equality_shorthand() {
        let filter = MetadataFilter::parse(r#"{"kind": "session"}"#).unwrap();
        assert_eq!(filter, MetadataFilter::eq("kind", "session"));
    }

    #[test]
    fn test_parse_implicit_and() {
        let filter = MetadataFilter::from_json(&json!({"a": 1, "b": {"$lt": 5}})).unwrap();
        match filter {
            MetadataFilter::And(clauses) => assert_eq!(clauses.len(), 2),
            other => panic!("Expected And, got {:?}", other),
        }
    }

    #[test]
    fn test_equality_and_inequality() {
        let m = meta(json!({"kind": "session", "n": 3}));
        assert!(MetadataFilter::eq("kind", "session").matches(&m));
        assert!(!MetadataFilter::eq("kind", "protocol").matches(&m));
        assert!(MetadataFilter::eq("n", 3.0).matches(&m));
        assert!(MetadataFilter::parse(r#"{"kind": {"$ne": "protocol"}}"#)
            .unwrap()
            .matches(&m));
    }

    #[test]
    fn test_range_operators() {
        let m = meta(json!({"importance": 4}));
        let check = |text: &str| MetadataFilter::parse(text).unwrap().matches(&m);
        assert!(check(r#"{"importance": {"$gt": 3}}"#));
        assert!(check(r#"{"importance": {"$gte": 4}}"#));
        assert!(!check(r#"{"importance": {"$lt": 4}}"#));
        assert!(check(r#"{"importance": {"$lte": 4.5}}"#));
    }

    #[test]
    fn test_membership() {
        let m = meta(json!({"tag": "b"}));
        assert!(MetadataFilter::parse(r#"{"tag": {"$in": ["a", "b"]}}"#)
            .unwrap()
            .matches(&m));
        assert!(!MetadataFilter::parse(r#"{"tag": {"$nin": ["a", "b"]}}"#)
            .unwrap()
            .matches(&m));
    }

    #[test]
    fn test_logical_operators() {
        let m = meta(json!({"kind": "session", "n": 1}));
        let or = MetadataFilter::parse(r#"{"$or": [{"kind": "x"}, {"n": 1}]}"#).unwrap();
        assert!(or.matches(&m));
        let and = MetadataFilter::parse(r#"{"$and": [{"kind": "x"}, {"n": 1}]}"#).unwrap();
        assert!(!and.matches(&m));
    }

    #[test]
    fn test_missing_key_never_matches() {
        let m = Metadata::new();
        assert!(!MetadataFilter::eq("kind", "session").matches(&m));
        assert!(!MetadataFilter::parse(r#"{"kind": {"$ne": "x"}}"#)
            .unwrap()
            .matches(&m));
        assert!(!MetadataFilter::parse(r#"{"n": {"$gt": 0}}"#)
            .unwrap()
            .matches(&m));
    }

    #[test]
    fn test_invalid_filters() {
        for text in [
            "[]",
            "{}",
            r#"{"$xor": []}"#,
            r#"{"$and": []}"#,
            r#"{"n": {"$gt": "three"}}"#,
            r#"{"n": {"$in": 3}}"#,
            r#"{"n": {"$gt": 1, "$lt": 5}}"#,
            r#"{"n": {"$regex": "x"}}"#,
        ] {
            assert!(
                matches!(MetadataFilter::parse(text), Err(MemoryError::InvalidFilter(_))),
                "expected InvalidFilter for {text}"
            );
        }
    }
}
