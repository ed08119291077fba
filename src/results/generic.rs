//! Generic tagged result wrapping an arbitrary JSON payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::merge::sort_items;

/// Free-form result, usually `{"data": {...}}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenericResult {
    pub payload: Map<String, Value>,
    /// Preferred values when two nodes disagree on a string field, first wins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub str_priority: Option<Vec<String>>,
}

impl GenericResult {
    pub fn new(payload: Map<String, Value>) -> Self {
        Self {
            payload,
            str_priority: None,
        }
    }

    pub fn with_priority(mut self, str_priority: Vec<String>) -> Self {
        self.str_priority = Some(str_priority);
        self
    }

    /// Wrap any JSON value; non-object payloads land under `data`
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(payload) => Self::new(payload),
            other => {
                let mut payload = Map::new();
                payload.insert("data".to_string(), other);
                Self::new(payload)
            }
        }
    }

    /// Merge two conflicting strings
    ///
    /// Equal strings are kept. Otherwise the first priority entry matching either side
    /// wins, and without a match both are joined with `|`.
    pub fn merge_str(&self, a: &str, b: &str) -> String {
        if a == b {
            return a.to_string();
        }
        if let Some(priority) = &self.str_priority {
            if let Some(winner) = priority.iter().find(|p| p.as_str() == a || p.as_str() == b) {
                return winner.clone();
            }
        }
        format!("{a}|{b}")
    }

    /// Field-level union of two payloads
    ///
    /// Missing keys are added, objects merge recursively, lists append unseen elements,
    /// numbers are summed and strings go through [`Self::merge_str`].
    pub fn union(mut self, other: GenericResult) -> GenericResult {
        let mut payload = std::mem::take(&mut self.payload);
        self.merge_maps(&mut payload, other.payload);
        self.payload = payload;
        self
    }

    fn merge_maps(&self, target: &mut Map<String, Value>, source: Map<String, Value>) {
        for (key, incoming) in source {
            match target.get_mut(&key) {
                None => {
                    target.insert(key, incoming);
                }
                Some(existing) => self.merge_values(existing, incoming),
            }
        }
    }

    fn merge_values(&self, existing: &mut Value, incoming: Value) {
        match (existing, incoming) {
            (Value::Object(left), Value::Object(right)) => self.merge_maps(left, right),
            (Value::Array(left), Value::Array(right)) => {
                for element in right {
                    if !left.contains(&element) {
                        left.push(element);
                    }
                }
            }
            (Value::Number(left), Value::Number(right)) => {
                let summed = match (left.as_i64(), right.as_i64()) {
                    (Some(a), Some(b)) => Value::from(a.saturating_add(b)),
                    _ => Value::from(left.as_f64().unwrap_or(0.0) + right.as_f64().unwrap_or(0.0)),
                };
                if let Value::Number(n) = summed {
                    *left = n;
                }
            }
            (Value::String(left), Value::String(right)) => {
                *left = self.merge_str(left, &right);
            }
            // Mismatched shapes keep the left value
            _ => {}
        }
    }

    /// Re-sort `data.affected_items` by the given fields
    pub fn sort_affected_items(&mut self, fields: &[String], ascending: bool) {
        let Some(items) = self.affected_items_mut() else {
            return;
        };
        let flags = vec![ascending; fields.len().max(1)];
        *items = sort_items(std::mem::take(items), Some(fields), Some(flags.as_slice()), None);
    }

    /// Keep `limit` items of `data.affected_items` starting at `offset`
    pub fn paginate(&mut self, offset: usize, limit: usize) {
        if let Some(items) = self.affected_items_mut() {
            let page: Vec<Value> = items.iter().skip(offset).take(limit).cloned().collect();
            *items = page;
        }
    }

    fn affected_items_mut(&mut self) -> Option<&mut Vec<Value>> {
        self.payload
            .get_mut("data")
            .and_then(|data| data.get_mut("affected_items"))
            .and_then(Value::as_array_mut)
    }

    /// Caller-facing JSON
    pub fn render(&self) -> Value {
        Value::Object(self.payload.clone())
    }
}
