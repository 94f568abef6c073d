//! GraphQL subscriptions over a graphql-transport-ws socket.
//!
//! Each [`execute_subscription`](crate::GraphQLClient::execute_subscription)
//! call opens its own socket and runs one session through the
//! `Opening -> Connected -> Closed` handshake state machine. Results stream
//! to a caller-supplied sink; every closure carries exactly one
//! [`CloseReason`].

mod engine;
mod message;
mod policy;

pub use engine::{SubscriptionHandle, SubscriptionOptions, SUBSCRIPTION_ID};
pub use message::{CloseReason, Frame};
pub use policy::{NoopTimeoutPolicy, ReconnectionPolicy, TimeoutPolicy, TimeoutPolicyFactory};

pub(crate) use engine::{launch, LaunchContext};
