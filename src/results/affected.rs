//! Per-item outcome result of a bulk operation.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::merge::{merge, SortCast};
use crate::constants::codes;
use crate::error::{ApiError, DapiError, ErrorKey, Result};

/// Fields a raw payload may set directly
const PAYLOAD_FIELDS: &[&str] = &[
    "affected_items",
    "total_affected_items",
    "failed_items",
    "sort_fields",
    "sort_casting",
    "sort_ascending",
    "all_msg",
    "some_msg",
    "none_msg",
    "extra",
];

/// Rendered fields recomputed from the items
const DERIVED_FIELDS: &[&str] = &["total_failed_items", "message"];

/// Items that failed with the same error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedItemGroup {
    pub error: ApiError,
    #[serde(alias = "id")]
    pub ids: BTreeSet<String>,
}

/// Affected/failed items partition of a bulk operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AffectedItemsResult {
    pub affected_items: Vec<Value>,
    pub total_affected_items: usize,
    #[serde(with = "failed_groups")]
    failed_items: BTreeMap<ErrorKey, FailedItemGroup>,
    pub sort_fields: Option<Vec<String>>,
    pub sort_casting: Option<Vec<SortCast>>,
    pub sort_ascending: Option<Vec<bool>>,
    pub all_msg: String,
    pub some_msg: String,
    pub none_msg: String,
    /// Additional scalar fields reported alongside the items (e.g. `older_than`)
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Default for AffectedItemsResult {
    fn default() -> Self {
        Self::new(
            "All selected items were returned",
            "Some items were not returned",
            "No item was returned",
        )
    }
}

impl AffectedItemsResult {
    pub fn new(
        all_msg: impl Into<String>,
        some_msg: impl Into<String>,
        none_msg: impl Into<String>,
    ) -> Self {
        Self {
            affected_items: Vec::new(),
            total_affected_items: 0,
            failed_items: BTreeMap::new(),
            sort_fields: None,
            sort_casting: None,
            sort_ascending: None,
            all_msg: all_msg.into(),
            some_msg: some_msg.into(),
            none_msg: none_msg.into(),
            extra: Map::new(),
        }
    }

    /// Build a result holding `items` as affected items
    pub fn with_items<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let mut result = Self::default();
        for item in items {
            result.add_affected_item(item);
        }
        result
    }

    /// Sorting used when merging with results from other nodes
    pub fn with_sort(
        mut self,
        fields: Option<Vec<String>>,
        casting: Option<Vec<SortCast>>,
        ascending: Option<Vec<bool>>,
    ) -> Self {
        self.sort_fields = fields;
        self.sort_casting = casting;
        self.sort_ascending = ascending;
        self
    }

    pub fn add_affected_item(&mut self, item: impl Into<Value>) {
        self.affected_items.push(item.into());
        self.total_affected_items = self.affected_items.len();
    }

    /// Record `id` as failed with `error`, grouping by `(code, message)`
    pub fn add_failed_item(&mut self, id: impl Into<String>, error: &ApiError) {
        self.failed_group(error).ids.insert(id.into());
    }

    fn failed_group(&mut self, error: &ApiError) -> &mut FailedItemGroup {
        self.failed_items
            .entry(error.key())
            .or_insert_with(|| FailedItemGroup {
                error: ApiError {
                    ids: BTreeSet::new(),
                    ..error.clone()
                },
                ids: BTreeSet::new(),
            })
    }

    /// Copy every failed item of `other` into this result
    pub fn add_failed_items_from(&mut self, other: &AffectedItemsResult) {
        for group in other.failed_items.values() {
            self.failed_group(&group.error)
                .ids
                .extend(group.ids.iter().cloned());
        }
    }

    /// Drop failed groups whose error code is in `codes`
    pub fn remove_failed_items(&mut self, codes: &[i32]) {
        self.failed_items.retain(|key, _| !codes.contains(&key.code));
    }

    /// Record an error as failed items: its ids, or `fallback_id` when it has none
    pub fn add_error(&mut self, error: &ApiError, fallback_id: &str) {
        if error.ids.is_empty() {
            self.add_failed_item(fallback_id, error);
        } else {
            for id in &error.ids {
                self.add_failed_item(id.clone(), error);
            }
        }
    }

    pub fn failed_items(&self) -> impl Iterator<Item = &FailedItemGroup> {
        self.failed_items.values()
    }

    pub fn failed_ids(&self, key: &ErrorKey) -> Option<&BTreeSet<String>> {
        self.failed_items.get(key).map(|group| &group.ids)
    }

    pub fn has_failed_items(&self) -> bool {
        !self.failed_items.is_empty()
    }

    pub fn total_failed_items(&self) -> usize {
        self.failed_items.values().map(|group| group.ids.len()).sum()
    }

    /// Human readable outcome
    pub fn message(&self) -> &str {
        if self.affected_items.is_empty() {
            &self.none_msg
        } else if self.failed_items.is_empty() {
            &self.all_msg
        } else {
            &self.some_msg
        }
    }

    /// Merge conflicting strings of extra fields; `older_than` keeps the left value
    pub fn merge_str(a: &str, b: &str, key: Option<&str>) -> String {
        if key == Some("older_than") || a == b {
            a.to_string()
        } else {
            format!("{a}|{b}")
        }
    }

    /// Union with another partial result
    ///
    /// Affected items are merged with the sort settings of `self` and deduplicated;
    /// failed groups with equal errors merge their ids. Totals are recomputed. Extra
    /// fields sum when numeric and go through [`Self::merge_str`] when strings.
    pub fn union(mut self, other: AffectedItemsResult) -> AffectedItemsResult {
        let merged = merge(
            vec![std::mem::take(&mut self.affected_items), other.affected_items],
            self.sort_fields.as_deref(),
            self.sort_ascending.as_deref(),
            self.sort_casting.as_deref(),
        );
        let mut seen = HashSet::new();
        self.affected_items = merged
            .into_iter()
            .filter(|item| seen.insert(item.to_string()))
            .collect();
        self.total_affected_items = self.affected_items.len();

        for (key, group) in other.failed_items {
            self.failed_items
                .entry(key)
                .and_modify(|existing| existing.ids.extend(group.ids.iter().cloned()))
                .or_insert(group);
        }

        for (key, incoming) in other.extra {
            match (self.extra.get(&key), &incoming) {
                (None, _) => {
                    self.extra.insert(key, incoming);
                }
                (Some(Value::String(left)), Value::String(right)) => {
                    let merged = Self::merge_str(left, right, Some(key.as_str()));
                    self.extra.insert(key, Value::String(merged));
                }
                (Some(Value::Number(left)), Value::Number(right)) => {
                    let summed = match (left.as_i64(), right.as_i64()) {
                        (Some(a), Some(b)) => Value::from(a.saturating_add(b)),
                        _ => Value::from(left.as_f64().unwrap_or(0.0) + right.as_f64().unwrap_or(0.0)),
                    };
                    self.extra.insert(key, summed);
                }
                // Other shape conflicts keep the left value
                _ => {}
            }
        }

        self
    }

    /// Caller-facing JSON
    pub fn render(&self) -> Value {
        let failed: Vec<Value> = self
            .failed_items
            .values()
            .map(|group| {
                json!({
                    "error": {"code": group.error.code, "message": group.error.message},
                    "id": group.ids,
                })
            })
            .collect();

        let mut data = Map::new();
        data.insert("affected_items".into(), Value::Array(self.affected_items.clone()));
        data.insert("total_affected_items".into(), json!(self.total_affected_items));
        data.insert("total_failed_items".into(), json!(self.total_failed_items()));
        data.insert("failed_items".into(), Value::Array(failed));
        for (key, value) in &self.extra {
            data.entry(key.clone()).or_insert_with(|| value.clone());
        }

        json!({"data": data, "message": self.message()})
    }

    /// Build a result from a function's raw JSON payload
    ///
    /// Accepts the encoded form as well as a bare `{"affected_items": [...]}` object,
    /// optionally nested under `data`. Missing fields keep their defaults and a missing
    /// `total_affected_items` is the number of items.
    pub fn from_payload(payload: Value) -> Result<Self> {
        let payload = match payload {
            Value::Object(mut fields) if !fields.contains_key("affected_items") => {
                match fields.remove("data") {
                    Some(Value::Object(data)) => data,
                    Some(other) => {
                        fields.insert("data".to_string(), other);
                        fields
                    }
                    None => fields,
                }
            }
            Value::Object(fields) => fields,
            other => {
                return Err(DapiError::internal(codes::INTERNAL_ERROR).with_extra(format!(
                    "expected an object with affected items, got {other}"
                )))
            }
        };
        let has_total = payload.contains_key("total_affected_items");

        let (known, unknown): (Map<String, Value>, Map<String, Value>) = payload
            .into_iter()
            .partition(|(key, _)| PAYLOAD_FIELDS.contains(&key.as_str()));
        let mut result: Self = serde_json::from_value(Value::Object(known))?;
        for (key, value) in unknown {
            if !DERIVED_FIELDS.contains(&key.as_str()) {
                result.extra.entry(key).or_insert(value);
            }
        }
        if !has_total {
            result.total_affected_items = result.affected_items.len();
        }
        Ok(result)
    }

    /// Encode for the wire
    pub fn encode_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from the wire
    pub fn decode_json(encoded: &str) -> Result<Self> {
        Ok(serde_json::from_str(encoded)?)
    }
}

/// Failed groups travel as a list since JSON object keys must be strings
mod failed_groups {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serializer};

    use super::FailedItemGroup;
    use crate::error::ErrorKey;

    pub fn serialize<S>(
        groups: &BTreeMap<ErrorKey, FailedItemGroup>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(groups.values())
    }

    pub fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<BTreeMap<ErrorKey, FailedItemGroup>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let groups = Vec::<FailedItemGroup>::deserialize(deserializer)?;
        let mut map: BTreeMap<ErrorKey, FailedItemGroup> = BTreeMap::new();
        for group in groups {
            map.entry(group.error.key())
                .and_modify(|existing| existing.ids.extend(group.ids.iter().cloned()))
                .or_insert(group);
        }
        Ok(map)
    }
}
