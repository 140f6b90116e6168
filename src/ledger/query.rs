//! Field-equality predicates over JSON snapshots.

use serde_json::Value;

/// Conjunction of `field == value` clauses on top-level JSON fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldPredicate {
    clauses: Vec<(String, Value)>,
}

impl FieldPredicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.clauses.push((field.to_string(), value.into()));
        self
    }

    pub fn clauses(&self) -> &[(String, Value)] {
        &self.clauses
    }

    pub fn matches(&self, document: &Value) -> bool {
        let Some(object) = document.as_object() else {
            return false;
        };
        self.clauses
            .iter()
            .all(|(field, expected)| object.get(field) == Some(expected))
    }

    /// Payloads that are not JSON objects never match.
    pub fn matches_payload(&self, payload: &[u8]) -> bool {
        serde_json::from_slice::<Value>(payload)
            .map(|doc| self.matches(&doc))
            .unwrap_or(false)
    }
}
