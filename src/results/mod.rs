//! # Result Model
//!
//! Results returned by routed functions. A request produces either a free-form
//! [`GenericResult`] or an [`AffectedItemsResult`]; partial results coming from several
//! nodes are combined with [`DapiResult::union`].
//!
//! Results cross node boundaries inside a [`WireResponse`], which also carries failures
//! with their error class so the receiving node can re-raise them faithfully.

pub mod affected;
pub mod generic;
pub mod merge;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::codes;
use crate::error::{ApiError, DapiError, ErrorClass, Result};

pub use affected::{AffectedItemsResult, FailedItemGroup};
pub use generic::GenericResult;
pub use merge::{compare_keys, goes_before_than, merge, nested_itemgetter, sort_items, SortCast};

/// Result type a routed function declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Generic,
    AffectedItems,
}

/// Tagged union of every result a routed function can produce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "result", rename_all = "snake_case")]
pub enum DapiResult {
    Generic(GenericResult),
    AffectedItems(AffectedItemsResult),
}

impl DapiResult {
    /// Wrap a raw payload according to the declared kind
    pub fn from_payload(kind: ResultKind, payload: Value) -> Result<Self> {
        match kind {
            ResultKind::Generic => Ok(Self::Generic(GenericResult::from_value(payload))),
            ResultKind::AffectedItems => AffectedItemsResult::from_payload(payload)
                .map(Self::AffectedItems)
                .map_err(|e| {
                    DapiError::internal(codes::INTERNAL_ERROR)
                        .with_extra(format!("payload is not an affected items result: {e}"))
                }),
        }
    }

    pub fn kind(&self) -> ResultKind {
        match self {
            Self::Generic(_) => ResultKind::Generic,
            Self::AffectedItems(_) => ResultKind::AffectedItems,
        }
    }

    /// Union of two partial results of the same variant
    pub fn union(self, other: DapiResult) -> Result<DapiResult> {
        match (self, other) {
            (Self::Generic(a), Self::Generic(b)) => Ok(Self::Generic(a.union(b))),
            (Self::AffectedItems(a), Self::AffectedItems(b)) => Ok(Self::AffectedItems(a.union(b))),
            (a, b) => Err(DapiError::generic().with_extra(format!(
                "cannot merge {:?} result with {:?} result",
                a.kind(),
                b.kind()
            ))),
        }
    }

    /// Record a partial failure; only affected-items results can hold one
    pub fn union_error(self, error: ApiError, fallback_id: &str) -> Result<DapiResult> {
        match self {
            Self::AffectedItems(mut result) => {
                result.add_error(&error, fallback_id);
                Ok(Self::AffectedItems(result))
            }
            Self::Generic(_) => Err(DapiError::generic()
                .with_extra("a generic result cannot record failed items")),
        }
    }

    /// Caller-facing JSON
    pub fn render(&self) -> Value {
        match self {
            Self::Generic(result) => result.render(),
            Self::AffectedItems(result) => result.render(),
        }
    }
}

impl From<GenericResult> for DapiResult {
    fn from(result: GenericResult) -> Self {
        Self::Generic(result)
    }
}

impl From<AffectedItemsResult> for DapiResult {
    fn from(result: AffectedItemsResult) -> Self {
        Self::AffectedItems(result)
    }
}

/// Outcome of a request as sent between nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum WireResponse {
    Result(DapiResult),
    Error { class: ErrorClass, error: ApiError },
}

impl WireResponse {
    /// Convert a routed outcome; unclassified errors become a generic internal error
    pub fn from_outcome(outcome: Result<DapiResult>) -> Self {
        match outcome {
            Ok(result) => Self::Result(result),
            Err(error) => {
                let message = error.to_string();
                let (class, error) = error.into_parts().unwrap_or_else(|| {
                    (
                        ErrorClass::Internal,
                        ApiError::new(codes::INTERNAL_ERROR).with_extra(message),
                    )
                });
                Self::Error { class, error }
            }
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a peer's response; malformed JSON is a bad response
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            DapiError::cluster(codes::BAD_RESPONSE).with_extra(e.to_string())
        })
    }

    pub fn into_result(self) -> Result<DapiResult> {
        match self {
            Self::Result(result) => Ok(result),
            Self::Error { class, error } => Err(DapiError::from_parts(class, error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_union_rejects_mismatched_variants() {
        let generic = DapiResult::Generic(GenericResult::default());
        let affected = DapiResult::AffectedItems(AffectedItemsResult::default());
        let error = generic.union(affected).unwrap_err();
        assert_eq!(error.code(), Some(codes::INTERNAL_ERROR));
    }

    #[test]
    fn test_union_error_on_affected_items() {
        let result = DapiResult::from(AffectedItemsResult::with_items(["001"]))
            .union_error(ApiError::new(codes::UNKNOWN_NODE), "worker3")
            .unwrap();
        let DapiResult::AffectedItems(result) = result else {
            panic!("expected affected items");
        };
        assert_eq!(result.total_failed_items(), 1);
    }

    #[test]
    fn test_from_payload() {
        let generic = DapiResult::from_payload(ResultKind::Generic, json!({"data": 1})).unwrap();
        assert_eq!(generic.render(), json!({"data": 1}));

        let encoded = serde_json::to_value(AffectedItemsResult::with_items(["001"])).unwrap();
        let affected = DapiResult::from_payload(ResultKind::AffectedItems, encoded).unwrap();
        assert_eq!(affected.kind(), ResultKind::AffectedItems);

        let error = DapiResult::from_payload(ResultKind::AffectedItems, json!("x")).unwrap_err();
        assert_eq!(error.code(), Some(codes::INTERNAL_ERROR));
    }

    #[test]
    fn test_from_payload_wraps_bare_affected_items() {
        let payload = json!({"affected_items": ["001", "002"], "total_affected_items": 2});
        let DapiResult::AffectedItems(result) =
            DapiResult::from_payload(ResultKind::AffectedItems, payload).unwrap()
        else {
            panic!("expected affected items");
        };
        assert_eq!(result.affected_items, vec![json!("001"), json!("002")]);
        assert_eq!(result.total_affected_items, 2);
        assert!(!result.has_failed_items());

        let error = DapiResult::from_payload(
            ResultKind::AffectedItems,
            json!({"affected_items": "001"}),
        )
        .unwrap_err();
        assert_eq!(error.code(), Some(codes::INTERNAL_ERROR));
    }

    #[test]
    fn test_wire_response_preserves_error_class() {
        let outcome = Err(DapiError::cluster(codes::UNKNOWN_NODE));
        let encoded = WireResponse::from_outcome(outcome).encode().unwrap();
        let error = WireResponse::decode(encoded.as_bytes())
            .unwrap()
            .into_result()
            .unwrap_err();
        assert!(matches!(error, DapiError::Cluster(ref e) if e.code == codes::UNKNOWN_NODE));
    }

    #[test]
    fn test_wire_response_wraps_unclassified_errors() {
        let outcome = Err(DapiError::persistence("locked"));
        let WireResponse::Error { class, error } = WireResponse::from_outcome(outcome) else {
            panic!("expected an error");
        };
        assert_eq!(class, ErrorClass::Internal);
        assert_eq!(error.code, codes::INTERNAL_ERROR);
    }

    #[test]
    fn test_malformed_wire_response_is_bad_response() {
        let error = WireResponse::decode(b"{not json").unwrap_err();
        assert_eq!(error.code(), Some(codes::BAD_RESPONSE));
    }
}
