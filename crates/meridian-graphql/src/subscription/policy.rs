//! Pluggable subscription policies.
//!
//! The engine only defines the hook contracts and calls them at fixed
//! points; concrete keep-alive and reconnection strategies live outside the
//! engine. The absence of a policy is equivalent to every hook being a
//! no-op.

use std::sync::Arc;
use std::time::Duration;

use super::message::{CloseReason, Frame};

/// Liveness policy consulted by a subscription session.
///
/// Hooks take `&self`; implementations manage their own interior
/// mutability. A policy that decides the session is dead drives
/// [`SubscriptionHandle::timeout`](super::SubscriptionHandle::timeout).
pub trait TimeoutPolicy: Send + Sync {
    /// The socket has opened, before the handshake is sent.
    fn on_open(&self) {}

    /// A frame is about to be written to the socket.
    fn on_outbound(&self, _frame: &Frame) {}

    /// A frame arrived. Returning `false` means the policy fully consumed
    /// the message and default dispatch must be skipped.
    fn on_inbound(&self, _frame: &Frame) -> bool {
        true
    }

    /// The server acknowledged the connection.
    fn on_ack(&self) {}

    /// The session closed with the given reason. Called exactly once.
    fn on_close(&self, _reason: CloseReason) {}
}

/// The absent-policy case: every hook is a no-op.
#[derive(Debug, Default)]
pub struct NoopTimeoutPolicy;

impl TimeoutPolicy for NoopTimeoutPolicy {}

/// Produces a fresh timeout policy per session.
pub type TimeoutPolicyFactory = Arc<dyn Fn() -> Arc<dyn TimeoutPolicy> + Send + Sync>;

/// Reconnection strategy contract.
///
/// Consumed by the auto-reconnect collaborator built on top of this engine,
/// never by the engine itself. The closure reason is part of the contract:
/// a policy decides per reason whether a closure should start a new
/// session, so e.g. a graceful `Server` completion is not retried while a
/// transport `Error` may be.
pub trait ReconnectionPolicy: Send + Sync {
    /// Whether a session closed for `reason` should be reopened.
    fn should_reconnect(&self, reason: &CloseReason) -> bool;

    /// Delay before reconnection attempt `attempt` (0-indexed), or `None`
    /// to give up.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}
