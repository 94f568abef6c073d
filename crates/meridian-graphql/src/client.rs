//! GraphQL client implementation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::cache::{
    CacheEntry, CacheStore, CacheSubscription, Fetcher, ResultSubscriber, SharedResult,
};
use crate::config::{
    BoxError, ClientConfig, ClientHooks, HttpErrorLogger, PayloadGenerator, RequestTransform,
    SocketErrorLogger,
};
use crate::error::{Result, TransportError};
use crate::executor::{Execution, QueryExecutor};
use crate::operation::{FetchPolicy, Operation};
use crate::result::OperationResult;
use crate::subscription::{
    self, LaunchContext, SubscriptionHandle, SubscriptionOptions, TimeoutPolicy,
    TimeoutPolicyFactory,
};
use crate::transport::{HttpPayload, HttpTransport, SocketConnector, WsConnector};

/// Builder for creating a GraphQL client.
pub struct GraphQLClientBuilder {
    url: String,
    subscriptions_url: Option<String>,
    fetch_policy: FetchPolicy,
    cache_expiry: Duration,
    max_cache_size: usize,
    strict_validation: bool,
    form_body: bool,
    document_id_as_query: bool,
    default_headers: http::HeaderMap,
    auth_token: Option<String>,
    request_transform: Option<RequestTransform>,
    subscription_payload: Option<PayloadGenerator>,
    log_http_error: Option<HttpErrorLogger>,
    log_socket_error: Option<SocketErrorLogger>,
    timeout_policy: Option<TimeoutPolicyFactory>,
    connector: Option<Arc<dyn SocketConnector>>,
}

impl GraphQLClientBuilder {
    /// Create a new builder with the specified GraphQL endpoint URL.
    pub fn new(url: impl Into<String>) -> Self {
        let config = ClientConfig::new(String::new(), String::new());
        Self {
            url: url.into(),
            subscriptions_url: None,
            fetch_policy: config.fetch_policy,
            cache_expiry: config.cache_expiry,
            max_cache_size: config.max_cache_size,
            strict_validation: config.strict_validation,
            form_body: config.form_body,
            document_id_as_query: config.document_id_as_query,
            default_headers: http::HeaderMap::new(),
            auth_token: None,
            request_transform: None,
            subscription_payload: None,
            log_http_error: None,
            log_socket_error: None,
            timeout_policy: None,
            connector: None,
        }
    }

    /// Set a separate socket URL for subscriptions.
    ///
    /// If not set, the HTTP URL is converted to WebSocket protocol
    /// (http:// -> ws://, https:// -> wss://).
    pub fn subscriptions_url(mut self, url: impl Into<String>) -> Self {
        self.subscriptions_url = Some(url.into());
        self
    }

    /// Set the default fetch policy for queries.
    pub fn fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = policy;
        self
    }

    /// Set the lifetime of cached results.
    pub fn cache_expiry(mut self, expiry: Duration) -> Self {
        self.cache_expiry = expiry;
        self
    }

    /// Set the aggregate cache budget in bytes.
    pub fn max_cache_size(mut self, bytes: usize) -> Self {
        self.max_cache_size = bytes;
        self
    }

    /// Require GraphQL-over-HTTP content types on responses.
    pub fn strict_validation(mut self) -> Self {
        self.strict_validation = true;
        self
    }

    /// Send operations as multipart form fields instead of a JSON body.
    pub fn form_body(mut self) -> Self {
        self.form_body = true;
        self
    }

    /// Send persisted document ids as a URL query parameter instead of a
    /// body field.
    pub fn document_id_as_query(mut self) -> Self {
        self.document_id_as_query = true;
        self
    }

    /// Add a default header sent with every HTTP request.
    pub fn header(
        mut self,
        name: impl TryInto<http::HeaderName>,
        value: impl TryInto<http::HeaderValue>,
    ) -> Result<Self> {
        let name = name
            .try_into()
            .map_err(|_| TransportError::InvalidHeader("invalid header name".into()))?;
        let value = value
            .try_into()
            .map_err(|_| TransportError::InvalidHeader("invalid header value".into()))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Set bearer token authentication.
    ///
    /// Adds the Authorization header to HTTP requests and, unless a payload
    /// generator is installed, includes the token in the subscription
    /// `connection_init` payload.
    pub fn bearer_auth(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        if let Ok(value) = format!("Bearer {token}").parse() {
            self.default_headers.insert(http::header::AUTHORIZATION, value);
        }
        self.auth_token = Some(token);
        self
    }

    /// Install an asynchronous transform applied to every outgoing HTTP
    /// request before dispatch. A failing transform surfaces as a
    /// network-error result, never a fault.
    pub fn request_transform(
        mut self,
        transform: impl Fn(reqwest::Request) -> BoxFuture<'static, std::result::Result<reqwest::Request, BoxError>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.request_transform = Some(Arc::new(transform));
        self
    }

    /// Install an asynchronous generator for the subscription
    /// `connection_init` payload.
    pub fn subscription_payload(
        mut self,
        generator: impl Fn() -> BoxFuture<'static, std::result::Result<Option<Value>, BoxError>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.subscription_payload = Some(Arc::new(generator));
        self
    }

    /// Install a hook invoked when an HTTP response fails validation.
    pub fn log_http_error(
        mut self,
        logger: impl Fn(&Operation, &HttpPayload) + Send + Sync + 'static,
    ) -> Self {
        self.log_http_error = Some(Arc::new(logger));
        self
    }

    /// Install a hook invoked on subscription protocol violations.
    pub fn log_socket_error(
        mut self,
        logger: impl Fn(&Operation, Option<&Value>, &str) + Send + Sync + 'static,
    ) -> Self {
        self.log_socket_error = Some(Arc::new(logger));
        self
    }

    /// Install the default timeout policy, created fresh for each
    /// subscription session.
    pub fn timeout_policy(
        mut self,
        factory: impl Fn() -> Arc<dyn TimeoutPolicy> + Send + Sync + 'static,
    ) -> Self {
        self.timeout_policy = Some(Arc::new(factory));
        self
    }

    /// Replace the socket connector. Mainly useful for tests and custom
    /// transports.
    pub fn socket_connector(mut self, connector: Arc<dyn SocketConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Build the GraphQL client.
    pub fn build(self) -> Result<GraphQLClient> {
        let http_client = reqwest::Client::builder()
            .default_headers(self.default_headers)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let subscriptions_url = self
            .subscriptions_url
            .unwrap_or_else(|| Self::http_to_ws_url(&self.url));

        let mut config = ClientConfig::new(self.url, subscriptions_url);
        config.fetch_policy = self.fetch_policy;
        config.cache_expiry = self.cache_expiry;
        config.max_cache_size = self.max_cache_size;
        config.strict_validation = self.strict_validation;
        config.form_body = self.form_body;
        config.document_id_as_query = self.document_id_as_query;
        let config = Arc::new(config);

        // Default: include the auth token in the connection init payload.
        let subscription_payload = match (self.subscription_payload, self.auth_token) {
            (Some(generator), _) => Some(generator),
            (None, Some(token)) => {
                let generator: PayloadGenerator = Arc::new(move || {
                    let payload = serde_json::json!({
                        "Authorization": format!("Bearer {token}")
                    });
                    Box::pin(futures_util::future::ready(Ok(Some(payload))))
                });
                Some(generator)
            }
            (None, None) => None,
        };

        let hooks = Arc::new(ClientHooks {
            request_transform: self.request_transform,
            subscription_payload,
            log_http_error: self.log_http_error,
            log_socket_error: self.log_socket_error,
            timeout_policy: self.timeout_policy,
        });

        let transport = HttpTransport::new(http_client);
        let executor = QueryExecutor::new(transport, config.clone(), hooks.clone());
        let cache = CacheStore::new(config.max_cache_size);

        Ok(GraphQLClient {
            inner: Arc::new(ClientInner {
                config,
                hooks,
                executor,
                cache,
                connector: self.connector.unwrap_or_else(|| Arc::new(WsConnector)),
                active_subscriptions: Arc::new(AtomicUsize::new(0)),
            }),
        })
    }

    fn http_to_ws_url(url: &str) -> String {
        if let Some(rest) = url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            url.to_string()
        }
    }
}

struct ClientInner {
    config: Arc<ClientConfig>,
    hooks: Arc<ClientHooks>,
    executor: QueryExecutor,
    cache: CacheStore,
    connector: Arc<dyn SocketConnector>,
    active_subscriptions: Arc<AtomicUsize>,
}

/// A GraphQL client engine: request/response operations over HTTP with an
/// in-memory response cache, and subscriptions over a
/// graphql-transport-ws socket.
///
/// The client is cheaply cloneable; clones share the cache, the connection
/// pool, and the counters.
///
/// # Example
///
/// ```ignore
/// use meridian_graphql::{GraphQLClient, Operation};
///
/// let client = GraphQLClient::new("https://api.example.com/graphql")
///     .bearer_auth("my-token")
///     .build()?;
///
/// let handle = client.execute_query(Operation::query("{ users { id name } }"));
/// let result = handle.result().await;
/// ```
#[derive(Clone)]
pub struct GraphQLClient {
    inner: Arc<ClientInner>,
}

impl GraphQLClient {
    /// Create a new builder with the specified endpoint URL.
    pub fn new(url: impl Into<String>) -> GraphQLClientBuilder {
        GraphQLClientBuilder::new(url)
    }

    /// Create a new builder for configuring a GraphQL client.
    pub fn builder(url: impl Into<String>) -> GraphQLClientBuilder {
        GraphQLClientBuilder::new(url)
    }

    /// Get the HTTP endpoint URL.
    pub fn url(&self) -> &str {
        &self.inner.config.url
    }

    /// Get the socket URL used for subscriptions.
    pub fn subscriptions_url(&self) -> &str {
        &self.inner.config.subscriptions_url
    }

    /// Get the resolved configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Access the response cache.
    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    /// Number of HTTP requests currently in flight.
    pub fn pending_requests(&self) -> usize {
        self.inner.executor.pending_requests()
    }

    /// Number of subscription sessions that have not yet closed.
    pub fn active_subscriptions(&self) -> usize {
        self.inner.active_subscriptions.load(Ordering::SeqCst)
    }

    /// Execute a query through the cache under the client's default fetch
    /// policy.
    pub fn execute_query(&self, operation: Operation) -> QueryHandle {
        self.execute_query_with(operation, QueryOptions::default())
    }

    /// Execute a query through the cache.
    ///
    /// Identical operations map to the same cache entry; concurrent
    /// executions of a loading entry share one transport call.
    pub fn execute_query_with(&self, operation: Operation, options: QueryOptions) -> QueryHandle {
        let policy = options.fetch_policy.unwrap_or(self.inner.config.fetch_policy);
        let key = operation.cache_key();

        let executor = self.inner.executor.clone();
        let fetch_operation = operation;
        let fetcher: Fetcher = Arc::new(move || executor.execute(&fetch_operation));

        let cache_expiry = self.inner.config.cache_expiry;
        let entry_key = key.clone();
        let entry = self.inner.cache.get_or_create(
            &key,
            policy == FetchPolicy::NoCache,
            move |store| CacheEntry::new(entry_key, policy, cache_expiry, fetcher, store),
        );

        let result = match policy {
            FetchPolicy::CacheFirst => entry.ensure_fresh(),
            FetchPolicy::NoCache | FetchPolicy::CacheAndNetwork => entry.refresh(),
        };

        QueryHandle { entry, result }
    }

    /// Execute a mutation. Mutations bypass the cache entirely.
    pub fn execute_mutation(&self, operation: &Operation) -> Execution {
        self.inner.executor.execute(operation)
    }

    /// Open a subscription session for the operation.
    ///
    /// The session owns its socket; results stream to the options' data
    /// sink until the session closes with a single
    /// [`CloseReason`](crate::subscription::CloseReason).
    pub fn execute_subscription(
        &self,
        operation: Operation,
        mut options: SubscriptionOptions,
    ) -> SubscriptionHandle {
        if options.timeout_policy.is_none()
            && let Some(factory) = &self.inner.hooks.timeout_policy
        {
            options.timeout_policy = Some(factory());
        }

        subscription::launch(LaunchContext {
            connector: self.inner.connector.clone(),
            url: self.inner.config.subscriptions_url.clone(),
            operation,
            options,
            payload_generator: self.inner.hooks.subscription_payload.clone(),
            log_socket_error: self.inner.hooks.log_socket_error.clone(),
            active: self.inner.active_subscriptions.clone(),
        })
    }

    /// Expire and purge every evictable cache entry. Entries with
    /// subscribers keep serving cached data.
    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    /// Clear the cache, then refetch every surviving subscribed entry.
    pub fn refresh_queries(&self, force: bool) {
        self.inner.cache.refresh_all(force);
    }

    /// Clear the cache and publish an explicit cleared value to surviving
    /// subscribers before refetching.
    pub fn reset_cache(&self) {
        self.inner.cache.reset();
    }
}

impl std::fmt::Debug for GraphQLClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphQLClient")
            .field("url", &self.inner.config.url)
            .field("subscriptions_url", &self.inner.config.subscriptions_url)
            .finish()
    }
}

/// Per-call query options.
#[derive(Clone, Debug, Default)]
pub struct QueryOptions {
    /// Fetch policy override; the client default applies when unset.
    pub fetch_policy: Option<FetchPolicy>,
}

impl QueryOptions {
    /// Override the fetch policy for this call.
    pub fn fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = Some(policy);
        self
    }
}

/// A pending query execution tied to its cache entry.
pub struct QueryHandle {
    entry: Arc<CacheEntry>,
    result: SharedResult,
}

impl QueryHandle {
    /// Await the result of this execution. Multiple waiters receive clones
    /// of the same result.
    pub async fn result(&self) -> OperationResult {
        self.result.clone().await
    }

    /// The cache entry backing this query.
    pub fn entry(&self) -> &Arc<CacheEntry> {
        &self.entry
    }

    /// Subscribe to future results committed to this query's entry.
    pub fn subscribe(&self, callback: ResultSubscriber) -> CacheSubscription {
        self.entry.subscribe(callback)
    }

    /// Abort the in-flight fetch, if any. Advisory; a no-op after
    /// completion.
    pub fn abort(&self) -> bool {
        self.entry.abort_in_flight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_to_ws_url() {
        assert_eq!(
            GraphQLClientBuilder::http_to_ws_url("https://example.com/graphql"),
            "wss://example.com/graphql"
        );
        assert_eq!(
            GraphQLClientBuilder::http_to_ws_url("http://example.com/graphql"),
            "ws://example.com/graphql"
        );
    }

    #[test]
    fn test_builder_defaults() {
        let client = GraphQLClient::new("https://api.example.com/graphql")
            .build()
            .unwrap();

        assert_eq!(client.url(), "https://api.example.com/graphql");
        assert_eq!(client.subscriptions_url(), "wss://api.example.com/graphql");
        assert_eq!(client.config().fetch_policy, FetchPolicy::CacheFirst);
        assert_eq!(client.config().max_cache_size, 20_971_520);
        assert_eq!(
            client.config().cache_expiry,
            Duration::from_millis(86_400_000)
        );
        assert!(!client.config().strict_validation);
        assert_eq!(client.pending_requests(), 0);
        assert_eq!(client.active_subscriptions(), 0);
    }

    #[test]
    fn test_builder_custom_subscriptions_url() {
        let client = GraphQLClient::new("https://api.example.com/graphql")
            .subscriptions_url("wss://ws.example.com/graphql")
            .build()
            .unwrap();

        assert_eq!(client.subscriptions_url(), "wss://ws.example.com/graphql");
    }

    #[test]
    fn test_bearer_auth_installs_init_payload() {
        let client = GraphQLClient::new("https://api.example.com/graphql")
            .bearer_auth("my-token")
            .build()
            .unwrap();

        assert!(client.inner.hooks.subscription_payload.is_some());
    }
}
