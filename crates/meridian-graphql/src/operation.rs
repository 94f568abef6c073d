//! GraphQL operation types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// How a query interacts with the response cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchPolicy {
    /// Serve a cached, unexpired entry when one exists; fetch otherwise.
    #[default]
    CacheFirst,
    /// Never reuse an idle cache entry and never give the result an expiry.
    NoCache,
    /// Serve cached data if present while always refetching in the background.
    CacheAndNetwork,
}

/// A GraphQL operation.
///
/// Carries either an inline document (`query`) or a persisted document id
/// (`document_id`), plus optional variables, operation name, and extensions.
/// Operations are immutable once submitted; their stable JSON serialization
/// addresses cache entries.
///
/// # Example
///
/// ```ignore
/// let operation = Operation::query(r#"
///     query GetUser($id: ID!) {
///         user(id: $id) { id name }
///     }
/// "#)
/// .variable("id", "123");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// The GraphQL document text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// Persisted document id, sent instead of (or alongside) the document.
    #[serde(rename = "documentId", skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,

    /// Optional variables for the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,

    /// Optional operation name (for documents with multiple operations).
    #[serde(rename = "operationName", skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,

    /// Extensions (implementation-specific metadata).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl Operation {
    /// Create an operation from an inline document.
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::default()
        }
    }

    /// Create an operation from a persisted document id.
    pub fn document_id(id: impl Into<String>) -> Self {
        Self {
            document_id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Set a single variable value.
    pub fn variable(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        let variables = self
            .variables
            .get_or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(map) = variables
            && let Ok(value) = serde_json::to_value(value)
        {
            map.insert(name.into(), value);
        }
        self
    }

    /// Set all variables from a serializable value.
    pub fn variables(mut self, variables: impl Serialize) -> Self {
        self.variables = serde_json::to_value(variables).ok();
        self
    }

    /// Set variables from a map.
    pub fn variables_map(mut self, variables: HashMap<String, Value>) -> Self {
        self.variables = Some(Value::Object(variables.into_iter().collect()));
        self
    }

    /// Set the operation name.
    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Set extensions (implementation-specific metadata).
    pub fn extensions(mut self, extensions: impl Serialize) -> Self {
        self.extensions = serde_json::to_value(extensions).ok();
        self
    }

    /// The stable serialization of this operation, used as its cache key.
    ///
    /// Two operations with identical fields share a key; any field
    /// difference produces a distinct key. Struct fields serialize in
    /// declaration order, so the output is deterministic.
    pub fn cache_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
