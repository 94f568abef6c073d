//! Operation result types and normalization.
//!
//! Every execution attempt, whether it went over HTTP or the subscription
//! socket, produces exactly one [`OperationResult`]. Faults are never thrown
//! past this boundary; they become results with `network_error` set.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A GraphQL error returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    /// The error message.
    pub message: String,

    /// Locations in the document where the error occurred.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<GraphQLLocation>,

    /// Path to the field that caused the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,

    /// Additional error metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLError {
    /// Create an error carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: None,
            extensions: None,
        }
    }
}

impl fmt::Display for GraphQLError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for GraphQLError {}

/// A location in a GraphQL document.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraphQLLocation {
    /// Line number (1-indexed).
    pub line: u32,
    /// Column number (1-indexed).
    pub column: u32,
}

/// A segment in an error path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// A field name.
    Field(String),
    /// An array index.
    Index(usize),
}

/// The uniform result record produced by every execution attempt.
///
/// `data` is cleared whenever `errors` is non-empty. `size` is the
/// approximate byte size of the raw response, used for cache accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    /// The data returned by the operation.
    pub data: Option<Value>,

    /// Errors reported for the operation, in server order.
    pub errors: Option<Vec<GraphQLError>>,

    /// Whether this result represents a transport-level failure rather than
    /// a well-formed GraphQL response.
    pub network_error: bool,

    /// Approximate byte size of the raw response.
    pub size: usize,

    /// Additional response metadata.
    pub extensions: Option<Value>,
}

/// The wire shape of a GraphQL response body.
#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<GraphQLError>>,
    #[serde(default)]
    extensions: Option<Value>,
}

impl OperationResult {
    /// Normalize a raw HTTP response body.
    ///
    /// `size` comes from the `Content-Length` header when present, otherwise
    /// from the body's byte length. Malformed JSON becomes a network-error
    /// result rather than a fault.
    pub fn from_json_body(body: &[u8], content_length: Option<u64>) -> Self {
        let size = content_length.map(|n| n as usize).unwrap_or(body.len());
        match serde_json::from_slice::<RawResponse>(body) {
            Ok(raw) => Self::from_raw(raw, size),
            Err(e) => Self::network_error(format!("malformed JSON response: {e}"), None),
        }
    }

    /// Normalize a subscription frame payload.
    ///
    /// `size` is the byte length of the raw socket message.
    pub fn from_payload(payload: &Value, size: usize) -> Result<Self, serde_json::Error> {
        let raw: RawResponse = serde_json::from_value(payload.clone())?;
        Ok(Self::from_raw(raw, size))
    }

    fn from_raw(raw: RawResponse, size: usize) -> Self {
        let errors = raw.errors.filter(|errors| !errors.is_empty());
        // errors force data to be cleared
        let data = if errors.is_some() { None } else { raw.data };
        Self {
            data,
            errors,
            network_error: false,
            size,
            extensions: raw.extensions,
        }
    }

    /// Build a network-error result carrying a human-readable message and,
    /// optionally, the underlying cause under `extensions.cause`.
    pub fn network_error(message: impl Into<String>, cause: Option<Value>) -> Self {
        Self {
            data: None,
            errors: Some(vec![GraphQLError::new(message)]),
            network_error: true,
            size: 0,
            extensions: cause.map(|cause| serde_json::json!({ "cause": cause })),
        }
    }

    /// Build a result carrying only errors (subscription `error` frames).
    pub fn errors_only(errors: Vec<GraphQLError>, size: usize) -> Self {
        Self {
            data: None,
            errors: Some(errors),
            network_error: false,
            size,
            extensions: None,
        }
    }

    /// Check whether the result carries GraphQL or network errors.
    pub fn has_errors(&self) -> bool {
        self.errors.as_ref().is_some_and(|errors| !errors.is_empty())
    }

    /// Check whether the result is a clean success.
    pub fn is_success(&self) -> bool {
        !self.network_error && !self.has_errors()
    }

    /// All error messages joined into one string, if any.
    pub fn error_message(&self) -> Option<String> {
        let errors = self.errors.as_ref()?;
        if errors.is_empty() {
            return None;
        }
        Some(
            errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}
