//! Dotted state paths and the leaf operations effects perform on them.
//!
//! `character.inventory.0.name` walks object keys and, where a segment is numeric
//! and the current value is a list, list indices.

use std::fmt;
use std::str::FromStr;

use serde_json::{Number, Value};

use crate::error::PathError;
use crate::ruleset::EffectOperation;

/// A parsed effect target: a root name plus at least one segment below it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatePath {
    raw: String,
    segments: Vec<String>,
}

impl StatePath {
    pub fn parse(target: &str) -> Result<Self, PathError> {
        if target.is_empty() {
            return Err(PathError::Empty);
        }
        let segments: Vec<String> = target.split('.').map(str::to_string).collect();
        if segments.iter().any(|s| s.trim().is_empty()) {
            return Err(PathError::EmptySegment(target.to_string()));
        }
        if segments.len() < 2 {
            return Err(PathError::RootTarget(target.to_string()));
        }
        Ok(Self {
            raw: target.to_string(),
            segments,
        })
    }

    pub fn root(&self) -> &str {
        &self.segments[0]
    }

    /// Segments below the root.
    pub fn rest(&self) -> &[String] {
        &self.segments[1..]
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for StatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for StatePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Outcome of one leaf operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Leaf value before the operation, `null` if it did not exist.
    pub previous: Value,
    /// Leaf value after the operation, `null` if it was removed.
    pub current: Value,
}

/// JSON type name used in error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Read the value at `segments` below `root`.
pub fn get<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments.iter().try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Apply `operation` with `value` at `segments` below `root`.
///
/// Intermediate segments must already exist. On error `root` is unchanged.
pub fn apply(
    root: &mut Value,
    segments: &[String],
    operation: EffectOperation,
    value: &Value,
) -> Result<Change, PathError> {
    let (leaf, parents) = segments.split_last().ok_or(PathError::Empty)?;

    let mut container = root;
    for segment in parents {
        container = step_mut(container, segment)?;
    }

    match container {
        Value::Object(map) => match operation {
            EffectOperation::Set => {
                let previous = map.insert(leaf.clone(), value.clone()).unwrap_or(Value::Null);
                Ok(Change {
                    previous,
                    current: value.clone(),
                })
            }
            EffectOperation::Add => {
                let slot = map
                    .get_mut(leaf)
                    .ok_or_else(|| PathError::MissingKey(leaf.clone()))?;
                add_in_place(slot, value)
            }
            EffectOperation::Remove => {
                if !value.is_null() {
                    if let Some(Value::Array(items)) = map.get_mut(leaf) {
                        return remove_element(items, value);
                    }
                }
                map.remove(leaf)
                    .map(|previous| Change {
                        previous,
                        current: Value::Null,
                    })
                    .ok_or_else(|| PathError::MissingKey(leaf.clone()))
            }
            EffectOperation::Append => match map.get_mut(leaf) {
                Some(slot) => append_in_place(slot, value),
                None => {
                    let created = Value::Array(vec![value.clone()]);
                    map.insert(leaf.clone(), created.clone());
                    Ok(Change {
                        previous: Value::Null,
                        current: created,
                    })
                }
            },
        },
        Value::Array(items) => {
            let index = list_index(leaf, items.len())?;
            match operation {
                EffectOperation::Set => {
                    let previous = std::mem::replace(&mut items[index], value.clone());
                    Ok(Change {
                        previous,
                        current: value.clone(),
                    })
                }
                EffectOperation::Add => add_in_place(&mut items[index], value),
                EffectOperation::Remove => {
                    if !value.is_null() {
                        if let Value::Array(inner) = &mut items[index] {
                            return remove_element(inner, value);
                        }
                    }
                    Ok(Change {
                        previous: items.remove(index),
                        current: Value::Null,
                    })
                }
                EffectOperation::Append => append_in_place(&mut items[index], value),
            }
        }
        other => Err(PathError::NotAContainer(format!(
            "{} ({})",
            parents.last().map(String::as_str).unwrap_or("root"),
            type_name(other)
        ))),
    }
}

fn step_mut<'a>(value: &'a mut Value, segment: &str) -> Result<&'a mut Value, PathError> {
    match value {
        Value::Object(map) => map
            .get_mut(segment)
            .ok_or_else(|| PathError::MissingSegment(segment.to_string())),
        Value::Array(items) => {
            let index = list_index(segment, items.len())?;
            Ok(&mut items[index])
        }
        _ => Err(PathError::NotAContainer(segment.to_string())),
    }
}

fn list_index(segment: &str, len: usize) -> Result<usize, PathError> {
    let index = segment
        .parse::<usize>()
        .map_err(|_| PathError::MissingSegment(segment.to_string()))?;
    if index >= len {
        return Err(PathError::IndexOutOfBounds { index, len });
    }
    Ok(index)
}

fn add_in_place(slot: &mut Value, delta: &Value) -> Result<Change, PathError> {
    let sum = add_numbers(slot, delta)?;
    let previous = std::mem::replace(slot, sum.clone());
    Ok(Change {
        previous,
        current: sum,
    })
}

fn add_numbers(current: &Value, delta: &Value) -> Result<Value, PathError> {
    let (a, b) = match (current, delta) {
        (Value::Number(a), Value::Number(b)) => (a, b),
        (Value::Number(_), other) | (other, _) => {
            return Err(PathError::TypeMismatch {
                expected: "number",
                found: type_name(other),
            })
        }
    };

    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x
            .checked_add(y)
            .map(Value::from)
            .ok_or(PathError::Overflow);
    }

    let (x, y) = (
        a.as_f64().ok_or(PathError::Overflow)?,
        b.as_f64().ok_or(PathError::Overflow)?,
    );
    Number::from_f64(x + y)
        .filter(|n| n.as_f64().is_some_and(f64::is_finite))
        .map(Value::Number)
        .ok_or(PathError::Overflow)
}

fn append_in_place(slot: &mut Value, value: &Value) -> Result<Change, PathError> {
    match slot {
        Value::Array(items) => {
            let previous = Value::Array(items.clone());
            items.push(value.clone());
            Ok(Change {
                previous,
                current: Value::Array(items.clone()),
            })
        }
        other => Err(PathError::TypeMismatch {
            expected: "array",
            found: type_name(other),
        }),
    }
}

fn remove_element(items: &mut Vec<Value>, value: &Value) -> Result<Change, PathError> {
    let position = items
        .iter()
        .position(|item| loosely_equal(item, value))
        .ok_or(PathError::ValueNotFound)?;
    let previous = Value::Array(items.clone());
    items.remove(position);
    Ok(Change {
        previous,
        current: Value::Array(items.clone()),
    })
}

/// Equality that treats `1` and `1.0` as the same number.
pub fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn segs(path: &str) -> Vec<String> {
        StatePath::parse(path).unwrap().rest().to_vec()
    }

    #[test]
    fn test_parse() {
        let path = StatePath::parse("character.stats.str").unwrap();
        assert_eq!(path.root(), "character");
        assert_eq!(path.rest(), ["stats".to_string(), "str".to_string()]);
        assert_eq!(path.to_string(), "character.stats.str");
    }

    #[test]
    fn test_parse_rejects() {
        assert_eq!(StatePath::parse(""), Err(PathError::Empty));
        assert!(matches!(StatePath::parse("character..hp"), Err(PathError::EmptySegment(_))));
        assert!(matches!(StatePath::parse("character"), Err(PathError::RootTarget(_))));
    }

    #[test]
    fn test_get_with_index() {
        let root = json!({ "inventory": [{ "name": "rope" }, { "name": "torch" }] });
        assert_eq!(get(&root, &segs("c.inventory.1.name")), Some(&json!("torch")));
        assert_eq!(get(&root, &segs("c.inventory.5.name")), None);
        assert_eq!(get(&root, &segs("c.missing")), None);
    }

    #[test]
    fn test_set_creates_leaf_only() {
        let mut root = json!({ "stats": {} });
        let change = apply(&mut root, &segs("c.stats.str"), EffectOperation::Set, &json!(14)).unwrap();
        assert_eq!(change.previous, Value::Null);
        assert_eq!(root, json!({ "stats": { "str": 14 } }));

        let err = apply(&mut root, &segs("c.skills.stealth"), EffectOperation::Set, &json!(2))
            .unwrap_err();
        assert_eq!(err, PathError::MissingSegment("skills".into()));
    }

    #[test]
    fn test_add_integers_and_floats() {
        let mut root = json!({ "gold": 10, "weight": 1.5 });
        apply(&mut root, &segs("c.gold"), EffectOperation::Add, &json!(-3)).unwrap();
        apply(&mut root, &segs("c.weight"), EffectOperation::Add, &json!(2)).unwrap();
        assert_eq!(root, json!({ "gold": 7, "weight": 3.5 }));
    }

    #[test]
    fn test_add_rejects_non_numbers() {
        let mut root = json!({ "name": "Bors", "gold": 1 });
        let err = apply(&mut root, &segs("c.name"), EffectOperation::Add, &json!(1)).unwrap_err();
        assert_eq!(
            err,
            PathError::TypeMismatch {
                expected: "number",
                found: "string"
            }
        );
        let err = apply(&mut root, &segs("c.gold"), EffectOperation::Add, &json!("1")).unwrap_err();
        assert!(matches!(err, PathError::TypeMismatch { found: "string", .. }));
        let err = apply(&mut root, &segs("c.xp"), EffectOperation::Add, &json!(1)).unwrap_err();
        assert_eq!(err, PathError::MissingKey("xp".into()));
    }

    #[test]
    fn test_add_overflow() {
        let mut root = json!({ "gold": i64::MAX });
        let err = apply(&mut root, &segs("c.gold"), EffectOperation::Add, &json!(1)).unwrap_err();
        assert_eq!(err, PathError::Overflow);
        assert_eq!(root["gold"], json!(i64::MAX));
    }

    #[test]
    fn test_append_and_create() {
        let mut root = json!({ "items": ["rope"] });
        apply(&mut root, &segs("c.items"), EffectOperation::Append, &json!("torch")).unwrap();
        apply(&mut root, &segs("c.tags"), EffectOperation::Append, &json!("brave")).unwrap();
        assert_eq!(root, json!({ "items": ["rope", "torch"], "tags": ["brave"] }));
    }

    #[test]
    fn test_remove_from_list_and_key() {
        let mut root = json!({ "items": ["rope", "torch", "rope"], "title": "Sir" });
        apply(&mut root, &segs("c.items"), EffectOperation::Remove, &json!("rope")).unwrap();
        assert_eq!(root["items"], json!(["torch", "rope"]));

        let err = apply(&mut root, &segs("c.items"), EffectOperation::Remove, &json!("axe"))
            .unwrap_err();
        assert_eq!(err, PathError::ValueNotFound);

        let change = apply(&mut root, &segs("c.title"), EffectOperation::Remove, &Value::Null).unwrap();
        assert_eq!(change.previous, json!("Sir"));
        assert!(root.get("title").is_none());
    }

    #[test]
    fn test_list_index_targets() {
        let mut root = json!({ "party": [{ "hp": 3 }, { "hp": 8 }] });
        apply(&mut root, &segs("g.party.1.hp"), EffectOperation::Add, &json!(2)).unwrap();
        assert_eq!(root["party"][1]["hp"], json!(10));

        let err = apply(&mut root, &segs("g.party.4.hp"), EffectOperation::Set, &json!(1))
            .unwrap_err();
        assert_eq!(err, PathError::IndexOutOfBounds { index: 4, len: 2 });
    }

    #[test]
    fn test_not_a_container() {
        let mut root = json!({ "hp": 5 });
        let err = apply(&mut root, &segs("c.hp.max"), EffectOperation::Set, &json!(1)).unwrap_err();
        assert!(matches!(err, PathError::NotAContainer(_)));
    }
}
