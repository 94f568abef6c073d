//! Client configuration and pluggable hooks.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::operation::{FetchPolicy, Operation};
use crate::subscription::TimeoutPolicyFactory;
use crate::transport::HttpPayload;

/// Default cache lifetime: one day.
pub const DEFAULT_CACHE_EXPIRY: Duration = Duration::from_millis(86_400_000);

/// Default cache budget: 20 MiB.
pub const DEFAULT_MAX_CACHE_SIZE: usize = 20_971_520;

/// Boxed error type accepted from user-supplied hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Asynchronous hook applied to every outgoing HTTP request before dispatch.
///
/// A failing transform never faults the caller; it surfaces as a
/// network-error result.
pub type RequestTransform =
    Arc<dyn Fn(reqwest::Request) -> BoxFuture<'static, Result<reqwest::Request, BoxError>> + Send + Sync>;

/// Asynchronous generator for the subscription `connection_init` payload.
///
/// A failure routes the session to an `Error` closure with a diagnostic
/// result delivered to the data sink first.
pub type PayloadGenerator =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Option<Value>, BoxError>> + Send + Sync>;

/// Hook invoked when an HTTP response fails validation.
pub type HttpErrorLogger = Arc<dyn Fn(&Operation, &HttpPayload) + Send + Sync>;

/// Hook invoked on subscription protocol violations, with the operation,
/// the `connection_init` payload that opened the session, and the offending
/// frame text or close description.
pub type SocketErrorLogger = Arc<dyn Fn(&Operation, Option<&Value>, &str) + Send + Sync>;

/// Resolved client configuration.
///
/// Built by [`GraphQLClientBuilder`](crate::GraphQLClientBuilder); plain data
/// only, hooks live in [`ClientHooks`].
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// The GraphQL HTTP endpoint.
    pub url: String,
    /// The subscription socket endpoint. Defaults to `url` with the scheme
    /// converted to WebSocket.
    pub subscriptions_url: String,
    /// Default fetch policy for queries.
    pub fetch_policy: FetchPolicy,
    /// Lifetime of a cached result.
    pub cache_expiry: Duration,
    /// Aggregate cache budget in bytes.
    pub max_cache_size: usize,
    /// Require GraphQL-over-HTTP content types on responses.
    pub strict_validation: bool,
    /// Send operations as multipart form fields instead of a JSON body.
    pub form_body: bool,
    /// Send the persisted document id as a URL query parameter instead of a
    /// body field.
    pub document_id_as_query: bool,
}

impl ClientConfig {
    pub(crate) fn new(url: String, subscriptions_url: String) -> Self {
        Self {
            url,
            subscriptions_url,
            fetch_policy: FetchPolicy::default(),
            cache_expiry: DEFAULT_CACHE_EXPIRY,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            strict_validation: false,
            form_body: false,
            document_id_as_query: false,
        }
    }
}

/// The optional hooks a client carries.
#[derive(Clone, Default)]
pub(crate) struct ClientHooks {
    pub request_transform: Option<RequestTransform>,
    pub subscription_payload: Option<PayloadGenerator>,
    pub log_http_error: Option<HttpErrorLogger>,
    pub log_socket_error: Option<SocketErrorLogger>,
    pub timeout_policy: Option<TimeoutPolicyFactory>,
}

impl std::fmt::Debug for ClientHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHooks")
            .field("request_transform", &self.request_transform.is_some())
            .field("subscription_payload", &self.subscription_payload.is_some())
            .field("log_http_error", &self.log_http_error.is_some())
            .field("log_socket_error", &self.log_socket_error.is_some())
            .field("timeout_policy", &self.timeout_policy.is_some())
            .finish()
    }
}
