//! GraphQL client engine for Meridian.
//!
//! This crate provides the client-side machinery for running GraphQL
//! operations:
//!
//! - **Queries and mutations** over HTTP, with response validation and
//!   uniform result normalization
//! - **Response cache** that deduplicates identical concurrent operations
//!   (single-flight) and evicts idle entries under a byte budget
//! - **Subscriptions** over the graphql-transport-ws protocol, with
//!   pluggable timeout and reconnection policies
//!
//! # Queries
//!
//! ```ignore
//! use meridian_graphql::{GraphQLClient, Operation};
//!
//! let client = GraphQLClient::new("https://api.example.com/graphql").build()?;
//!
//! let handle = client.execute_query(
//!     Operation::query("query GetUser($id: ID!) { user(id: $id) { name } }")
//!         .variable("id", "123"),
//! );
//! let result = handle.result().await;
//! if let Some(data) = result.data {
//!     println!("user: {}", data["user"]["name"]);
//! }
//! ```
//!
//! Identical operations share one cache entry; executing the same query
//! twice while the first fetch is still in flight performs a single
//! transport call. Fetch behavior is controlled per client or per call with
//! [`FetchPolicy`].
//!
//! # Subscriptions
//!
//! ```ignore
//! use meridian_graphql::{Operation, SubscriptionOptions};
//!
//! let handle = client.execute_subscription(
//!     Operation::query("subscription { messageReceived { id content } }"),
//!     SubscriptionOptions::new(|result| {
//!         println!("received: {:?}", result.data);
//!     })
//!     .on_close(|reason| println!("closed: {reason:?}")),
//! );
//!
//! // Later: handle.abort();
//! ```
//!
//! # Error handling
//!
//! Faults never escape the engine as panics or bare errors. Every execution
//! attempt yields exactly one [`OperationResult`]; transport failures, bad
//! statuses, malformed bodies, and hook failures all surface as results
//! with `network_error` set, and every subscription closure carries one
//! typed [`CloseReason`](subscription::CloseReason).

mod client;
mod config;
mod error;
mod executor;
mod operation;
mod result;

pub mod cache;
pub mod subscription;
pub mod transport;

pub use client::{GraphQLClient, GraphQLClientBuilder, QueryHandle, QueryOptions};
pub use config::{
    BoxError, ClientConfig, HttpErrorLogger, PayloadGenerator, RequestTransform,
    SocketErrorLogger, DEFAULT_CACHE_EXPIRY, DEFAULT_MAX_CACHE_SIZE,
};
pub use error::TransportError;
pub use executor::Execution;
pub use operation::{FetchPolicy, Operation};
pub use result::{GraphQLError, GraphQLLocation, OperationResult, PathSegment};

// Re-export commonly used types at the crate root
pub use cache::{CacheEntry, CacheStore, CacheSubscription, ResultSubscriber};
pub use subscription::{
    CloseReason, Frame, NoopTimeoutPolicy, ReconnectionPolicy, SubscriptionHandle,
    SubscriptionOptions, TimeoutPolicy, TimeoutPolicyFactory, SUBSCRIPTION_ID,
};
pub use transport::{
    AbortHandle, HttpPayload, HttpTransport, MessageSocket, SocketConnector, SocketEvent,
    WsConnector,
};
