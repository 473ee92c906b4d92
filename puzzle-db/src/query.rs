use serde_json::Value;
use std::cmp::Ordering;

use crate::{ops::FieldPath, Document};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// A collection query: equality filters plus an optional ordering.
///
/// When ordered, documents lacking the order-by field are left out of the result,
/// the same way the hosted store behaves.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    collection: String,
    filters: Vec<(FieldPath, Value)>,
    order_by: Option<(FieldPath, Direction)>,
}

impl Query {
    pub fn collection(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            filters: Vec::new(),
            order_by: None,
        }
    }

    pub fn where_eq(mut self, path: &str, value: Value) -> Self {
        self.filters.push((FieldPath::from(path), value));
        self
    }

    pub fn order_by(mut self, path: &str, direction: Direction) -> Self {
        self.order_by = Some((FieldPath::from(path), direction));
        self
    }

    pub fn collection_name(&self) -> &str {
        self.collection.as_str()
    }

    pub fn matches(&self, document: &Document) -> bool {
        let filtered = self
            .filters
            .iter()
            .all(|(path, value)| path.lookup(&document.fields) == Some(value));
        let ordered = match &self.order_by {
            Some((path, _)) => path.lookup(&document.fields).is_some(),
            None => true,
        };
        filtered && ordered
    }

    pub fn run(&self, documents: Vec<Document>) -> Vec<Document> {
        let mut result: Vec<Document> = documents
            .into_iter()
            .filter(|document| self.matches(document))
            .collect();

        match &self.order_by {
            Some((path, direction)) => result.sort_by(|a, b| {
                let ordering = compare_values(path.lookup(&a.fields), path.lookup(&b.fields));
                let ordering = match direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                };
                ordering.then_with(|| a.id.cmp(&b.id))
            }),
            None => result.sort_by(|a, b| a.id.cmp(&b.id)),
        }

        result
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => {
            match (a.as_i64(), b.as_i64()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => a
                    .as_f64()
                    .partial_cmp(&b.as_f64())
                    .unwrap_or(Ordering::Equal),
            }
        }
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, value: Value) -> Document {
        Document {
            id: id.to_string(),
            fields: value.as_object().unwrap().clone(),
        }
    }

    #[test]
    fn orders_descending_and_skips_missing_field() {
        let query = Query::collection("posts").order_by("createdAt", Direction::Descending);
        let result = query.run(vec![
            doc("a", json!({ "createdAt": 1 })),
            doc("b", json!({ "createdAt": 3 })),
            doc("c", json!({})),
            doc("d", json!({ "createdAt": 2 })),
        ]);
        let ids: Vec<&str> = result.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d", "a"]);
    }

    #[test]
    fn filters_by_equality() {
        let query = Query::collection("posts")
            .where_eq("authorId", json!("u1"))
            .order_by("createdAt", Direction::Ascending);
        let result = query.run(vec![
            doc("a", json!({ "authorId": "u1", "createdAt": 2 })),
            doc("b", json!({ "authorId": "u2", "createdAt": 1 })),
            doc("c", json!({ "authorId": "u1", "createdAt": 1 })),
        ]);
        let ids: Vec<&str> = result.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[test]
    fn empty_result_is_not_an_error() {
        let query = Query::collection("posts").order_by("createdAt", Direction::Descending);
        assert!(query.run(Vec::new()).is_empty());
    }
}
