use serde_json::{json, Map, Value};
use std::fmt;

use crate::Error;

/// Dotted path into a document, e.g. `reactions.💗`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.0.is_empty() || self.0.iter().any(|segment| segment.is_empty()) {
            Err(Error::InvalidPath(self.to_string()))
        } else {
            Ok(())
        }
    }

    pub fn lookup<'a>(&self, fields: &'a Map<String, Value>) -> Option<&'a Value> {
        let (first, rest) = self.0.split_first()?;
        rest.iter()
            .try_fold(fields.get(first)?, |value, segment| value.get(segment))
    }
}

impl From<&str> for FieldPath {
    fn from(path: &str) -> Self {
        FieldPath(path.split('.').map(str::to_string).collect())
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FieldOp {
    Set(Value),
    Increment(i64),
    ArrayUnion(Vec<Value>),
    ArrayRemove(Vec<Value>),
}

/// A partial write against one document. Operations apply in the order they were added.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Update {
    ops: Vec<(FieldPath, FieldOp)>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(self, path: &str, value: Value) -> Self {
        self.op(path, FieldOp::Set(value))
    }

    pub fn increment(self, path: &str, by: i64) -> Self {
        self.op(path, FieldOp::Increment(by))
    }

    pub fn array_union(self, path: &str, value: Value) -> Self {
        self.op(path, FieldOp::ArrayUnion(vec![value]))
    }

    pub fn array_remove(self, path: &str, value: Value) -> Self {
        self.op(path, FieldOp::ArrayRemove(vec![value]))
    }

    pub fn op(mut self, path: &str, op: FieldOp) -> Self {
        self.ops.push((FieldPath::from(path), op));
        self
    }

    pub fn ops(&self) -> &[(FieldPath, FieldOp)] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn apply(&self, fields: &mut Map<String, Value>) -> Result<(), Error> {
        for (path, _) in &self.ops {
            path.validate()?;
        }
        for (path, op) in &self.ops {
            apply_op(fields, path, op);
        }
        Ok(())
    }
}

// Intermediate segments that are missing or not objects are replaced by empty objects,
// and a mismatched target type is overwritten rather than rejected.
fn apply_op(fields: &mut Map<String, Value>, path: &FieldPath, op: &FieldOp) {
    let (last, parents) = match path.segments().split_last() {
        Some(split) => split,
        None => return,
    };

    let mut target = fields;
    for segment in parents {
        let entry = target
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        target = match entry.as_object_mut() {
            Some(map) => map,
            None => return,
        };
    }

    match op {
        FieldOp::Set(value) => {
            target.insert(last.clone(), value.clone());
        }
        FieldOp::Increment(by) => {
            let next = match target.get(last) {
                Some(Value::Number(number)) => {
                    if let Some(current) = number.as_i64() {
                        json!(current.saturating_add(*by))
                    } else if let Some(current) = number.as_f64() {
                        json!(current + *by as f64)
                    } else {
                        json!(*by)
                    }
                }
                _ => json!(*by),
            };
            target.insert(last.clone(), next);
        }
        FieldOp::ArrayUnion(values) => {
            let entry = target
                .entry(last.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !entry.is_array() {
                *entry = Value::Array(Vec::new());
            }
            if let Value::Array(items) = entry {
                for value in values {
                    if !items.contains(value) {
                        items.push(value.clone());
                    }
                }
            }
        }
        FieldOp::ArrayRemove(values) => {
            let entry = target
                .entry(last.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            match entry {
                Value::Array(items) => items.retain(|item| !values.contains(item)),
                other => *other = Value::Array(Vec::new()),
            }
        }
    }
}
