//! Record schema validation hook

use crate::value::Value;

/// Outcome of validating a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    /// The record matched a known schema
    Valid,
    /// No schema was consulted, or none is known for the collection
    Unknown,
}

/// Schema validation collaborator
///
/// Called for every written record unless the request opts out.
pub trait RecordValidator: Send + Sync {
    /// Check `record` against the schema for `collection`
    fn validate(&self, collection: &str, record: &Value) -> ValidationStatus;
}

/// Validator that knows no schemas
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSchemas;

impl RecordValidator for NoSchemas {
    fn validate(&self, _collection: &str, _record: &Value) -> ValidationStatus {
        ValidationStatus::Unknown
    }
}

impl<F> RecordValidator for F
where
    F: Fn(&str, &Value) -> ValidationStatus + Send + Sync,
{
    fn validate(&self, collection: &str, record: &Value) -> ValidationStatus {
        self(collection, record)
    }
}
