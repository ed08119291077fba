//! K-way merge of per-node sorted sequences.
//!
//! Each node returns its items already sorted by its own query. The cluster view is
//! produced by repeatedly taking the smallest head among all sequences, so the combined
//! list stays sorted without re-sorting it.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::codes;
use crate::error::DapiError;

/// Type a sort field is cast to before comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortCast {
    Int,
    Float,
    Str,
    Bool,
}

impl FromStr for SortCast {
    type Err = DapiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int" => Ok(Self::Int),
            "float" => Ok(Self::Float),
            "str" => Ok(Self::Str),
            "bool" => Ok(Self::Bool),
            other => Err(DapiError::internal(codes::INTERNAL_ERROR)
                .with_extra(format!("unknown sort type '{other}'"))),
        }
    }
}

impl fmt::Display for SortCast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// Comparable value extracted from an item
#[derive(Debug, Clone)]
enum SortKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl SortKey {
    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) => 2,
            Self::Str(_) => 3,
        }
    }

    fn cast(value: &Value, caster: Option<SortCast>) -> Self {
        match (value, caster) {
            (Value::Null, _) => Self::Null,
            (_, None) => Self::natural(value),
            (Value::Number(n), Some(SortCast::Int)) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(|f| Self::Int(f.trunc() as i64)))
                .unwrap_or_else(|| Self::natural(value)),
            (Value::String(s), Some(SortCast::Int)) => s
                .trim()
                .parse::<i64>()
                .map(Self::Int)
                .unwrap_or_else(|_| Self::Str(s.clone())),
            (Value::Bool(b), Some(SortCast::Int)) => Self::Int(i64::from(*b)),
            (Value::Number(n), Some(SortCast::Float)) => {
                n.as_f64().map(Self::Float).unwrap_or_else(|| Self::natural(value))
            }
            (Value::String(s), Some(SortCast::Float)) => s
                .trim()
                .parse::<f64>()
                .map(Self::Float)
                .unwrap_or_else(|_| Self::Str(s.clone())),
            (Value::String(s), Some(SortCast::Str)) => Self::Str(s.clone()),
            (other, Some(SortCast::Str)) => Self::Str(other.to_string()),
            (Value::Bool(b), Some(SortCast::Bool)) => Self::Bool(*b),
            (Value::String(s), Some(SortCast::Bool)) => match s.as_str() {
                "true" | "True" => Self::Bool(true),
                "false" | "False" | "" => Self::Bool(false),
                _ => Self::Str(s.clone()),
            },
            (Value::Number(n), Some(SortCast::Bool)) => {
                Self::Bool(n.as_f64().is_some_and(|f| f != 0.0))
            }
            (other, Some(_)) => Self::natural(other),
        }
    }

    fn natural(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::Str(s.clone()),
            other => Self::Str(other.to_string()),
        }
    }

    fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Int(a), Self::Float(b)) => (*a as f64).total_cmp(b),
            (Self::Float(a), Self::Int(b)) => a.total_cmp(&(*b as f64)),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

/// Split a dotted field path; `\.` is a literal dot
fn split_path(expression: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = expression.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'.') => {
                current.push('.');
                chars.next();
            }
            '.' => parts.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    parts.push(current);
    parts
}

/// Extract the values addressed by `expressions` from `item`
///
/// Missing fields yield `Null`. When `item` is not an object the item itself is the
/// only key.
pub fn nested_itemgetter<S: AsRef<str>>(item: &Value, expressions: &[S]) -> Vec<Value> {
    if !item.is_object() {
        return vec![item.clone()];
    }

    expressions
        .iter()
        .map(|expression| {
            let mut current = item;
            for field in split_path(expression.as_ref()) {
                match current.get(&field) {
                    Some(next) => current = next,
                    None => return Value::Null,
                }
            }
            current.clone()
        })
        .collect()
}

/// Whether key `a` sorts strictly before key `b`
///
/// Fields are compared in order; the first strict difference decides, honouring that
/// field's ascending flag (ascending when absent). `Null` is smaller than any value.
/// Full ties are never "before".
pub fn goes_before_than(
    a: &[Value],
    b: &[Value],
    ascending: Option<&[bool]>,
    casters: Option<&[SortCast]>,
) -> bool {
    for (i, (left, right)) in a.iter().zip(b.iter()).enumerate() {
        let caster = casters.and_then(|c| c.get(i).copied());
        let ordering = SortKey::cast(left, caster).compare(&SortKey::cast(right, caster));
        if ordering == Ordering::Equal {
            continue;
        }
        let ascending = ascending.and_then(|a| a.get(i).copied()).unwrap_or(true);
        return (ordering == Ordering::Less) == ascending;
    }
    false
}

/// Total ordering derived from [`goes_before_than`]; full ties are `Equal`
pub fn compare_keys(
    a: &[Value],
    b: &[Value],
    ascending: Option<&[bool]>,
    casters: Option<&[SortCast]>,
) -> Ordering {
    if goes_before_than(a, b, ascending, casters) {
        Ordering::Less
    } else if goes_before_than(b, a, ascending, casters) {
        Ordering::Greater
    } else {
        Ordering::Equal
    }
}

/// Stable sort of unsorted items by `criteria`
///
/// Keys are extracted once per item. Without `criteria` each item is its own key.
pub fn sort_items(
    items: Vec<Value>,
    criteria: Option<&[String]>,
    ascending: Option<&[bool]>,
    types: Option<&[SortCast]>,
) -> Vec<Value> {
    let mut keyed: Vec<(Vec<Value>, Value)> = items
        .into_iter()
        .map(|item| {
            let key = match criteria {
                Some(fields) if !fields.is_empty() => nested_itemgetter(&item, fields),
                _ => vec![item.clone()],
            };
            (key, item)
        })
        .collect();
    keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b, ascending, types));
    keyed.into_iter().map(|(_, item)| item).collect()
}

/// Merge already sorted sequences into one sorted sequence
///
/// Without `criteria` each item is its own key. On ties the earliest sequence wins.
pub fn merge(
    sequences: Vec<Vec<Value>>,
    criteria: Option<&[String]>,
    ascending: Option<&[bool]>,
    types: Option<&[SortCast]>,
) -> Vec<Value> {
    let key_of = |item: &Value| -> Vec<Value> {
        match criteria {
            Some(fields) if !fields.is_empty() => nested_itemgetter(item, fields),
            _ => vec![item.clone()],
        }
    };

    let total = sequences.iter().map(Vec::len).sum();
    let mut cursors: Vec<std::vec::IntoIter<Value>> =
        sequences.into_iter().map(Vec::into_iter).collect();
    // Head of each sequence with its key, extracted once per item
    let mut heads: Vec<Option<(Vec<Value>, Value)>> = cursors
        .iter_mut()
        .map(|cursor| cursor.next().map(|item| (key_of(&item), item)))
        .collect();
    let mut merged = Vec::with_capacity(total);

    loop {
        let mut best: Option<usize> = None;
        for (index, head) in heads.iter().enumerate() {
            let Some((key, _)) = head else {
                continue;
            };
            let replace = match best.and_then(|b| heads[b].as_ref()) {
                None => true,
                Some((best_key, _)) => goes_before_than(key, best_key, ascending, types),
            };
            if replace {
                best = Some(index);
            }
        }

        let Some(index) = best else {
            break;
        };
        let next = cursors[index].next().map(|item| (key_of(&item), item));
        if let Some((_, item)) = std::mem::replace(&mut heads[index], next) {
            merged.push(item);
        }
    }

    merged
}
