//! The subscription session: handshake state machine and dispatch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::message::{CloseReason, Frame};
use super::policy::{NoopTimeoutPolicy, TimeoutPolicy};
use crate::config::{PayloadGenerator, SocketErrorLogger};
use crate::error::Result;
use crate::operation::Operation;
use crate::result::OperationResult;
use crate::transport::{MessageSocket, SocketConnector, SocketEvent};

/// The fixed subscription id: each session owns its socket, so only one
/// logical subscription rides on it.
pub const SUBSCRIPTION_ID: &str = "1";

/// Callbacks and policy for one subscription session.
pub struct SubscriptionOptions {
    pub(crate) on_data: Arc<dyn Fn(OperationResult) + Send + Sync>,
    pub(crate) on_open: Option<Arc<dyn Fn() + Send + Sync>>,
    pub(crate) on_close: Option<Arc<dyn Fn(CloseReason) + Send + Sync>>,
    pub(crate) timeout_policy: Option<Arc<dyn TimeoutPolicy>>,
}

impl SubscriptionOptions {
    /// Create options with the mandatory data sink.
    pub fn new(on_data: impl Fn(OperationResult) + Send + Sync + 'static) -> Self {
        Self {
            on_data: Arc::new(on_data),
            on_open: None,
            on_close: None,
            timeout_policy: None,
        }
    }

    /// Called once, when the server acknowledges the connection.
    pub fn on_open(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(callback));
        self
    }

    /// Called exactly once with the session's close reason.
    pub fn on_close(mut self, callback: impl Fn(CloseReason) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(callback));
        self
    }

    /// Install a timeout policy for this session, overriding the client
    /// default.
    pub fn timeout_policy(mut self, policy: Arc<dyn TimeoutPolicy>) -> Self {
        self.timeout_policy = Some(policy);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Opening,
    Connected,
    Closed,
}

struct SessionState {
    phase: Phase,
    aborted: bool,
    socket_closed: bool,
}

/// Everything a session shares between its handle and its socket task.
struct Session {
    operation: Operation,
    state: Mutex<SessionState>,
    close_tx: mpsc::UnboundedSender<u16>,
    on_data: Arc<dyn Fn(OperationResult) + Send + Sync>,
    on_open: Option<Arc<dyn Fn() + Send + Sync>>,
    on_close: Option<Arc<dyn Fn(CloseReason) + Send + Sync>>,
    policy: Arc<dyn TimeoutPolicy>,
    log_socket_error: Option<SocketErrorLogger>,
    init_payload: Mutex<Option<Value>>,
    active: Arc<AtomicUsize>,
}

impl Session {
    fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }

    fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    fn mark_socket_closed(&self) {
        self.state.lock().socket_closed = true;
    }

    fn deliver(&self, result: OperationResult) {
        (self.on_data)(result);
    }

    /// Idempotent close: the first call wins and sets the session's one
    /// close reason; later calls are no-ops.
    fn close(&self, reason: CloseReason) {
        let send_close = {
            let mut state = self.state.lock();
            if state.aborted {
                return;
            }
            state.aborted = true;
            state.phase = Phase::Closed;
            !state.socket_closed
        };
        tracing::debug!(target: "meridian_graphql::subscription", ?reason, "session closed");
        self.policy.on_close(reason);
        if let Some(on_close) = &self.on_close {
            on_close(reason);
        }
        if send_close {
            let _ = self.close_tx.send(reason.close_code());
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// Protocol violation: log it, surface a synthetic result to the data
    /// sink, then close with `Error`.
    fn violation(&self, received: &str) {
        tracing::warn!(target: "meridian_graphql::subscription", received, "protocol violation");
        if let Some(log) = &self.log_socket_error {
            let init_payload = self.init_payload.lock();
            log(&self.operation, init_payload.as_ref(), received);
        }
        self.deliver(OperationResult::network_error(
            format!("subscription protocol violation: {received}"),
            None,
        ));
        self.close(CloseReason::Error);
    }

    async fn handle_text(&self, socket: &dyn MessageSocket, text: &str) {
        if self.is_aborted() {
            return;
        }

        let frame: Frame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(_) => {
                self.violation(text);
                return;
            }
        };

        if !self.policy.on_inbound(&frame) {
            return;
        }

        // Pings are answered in any state, without a transition.
        if let Frame::Ping { payload } = &frame {
            let pong = Frame::Pong {
                payload: payload.clone(),
            };
            self.policy.on_outbound(&pong);
            let _ = send_frame(socket, &pong).await;
            return;
        }

        match self.phase() {
            Phase::Opening => match frame {
                Frame::ConnectionAck { .. } => {
                    self.state.lock().phase = Phase::Connected;
                    self.policy.on_ack();
                    if let Some(on_open) = &self.on_open {
                        on_open();
                    }
                    let subscribe = Frame::Subscribe {
                        id: SUBSCRIPTION_ID.to_string(),
                        payload: self.operation.clone(),
                    };
                    self.policy.on_outbound(&subscribe);
                    if let Err(e) = send_frame(socket, &subscribe).await {
                        self.deliver(OperationResult::network_error(
                            format!("failed to send subscribe: {e}"),
                            None,
                        ));
                        self.close(CloseReason::Error);
                    }
                }
                _ => self.violation(text),
            },
            Phase::Connected => match frame {
                Frame::Next { id, payload } if id == SUBSCRIPTION_ID => {
                    let well_formed =
                        payload.get("data").is_some() || payload.get("errors").is_some();
                    if !well_formed {
                        self.violation(text);
                        return;
                    }
                    match OperationResult::from_payload(&payload, text.len()) {
                        Ok(result) => self.deliver(result),
                        Err(_) => self.violation(text),
                    }
                }
                Frame::Error { id, payload } if id == SUBSCRIPTION_ID => {
                    self.deliver(OperationResult::errors_only(payload, text.len()));
                    self.close(CloseReason::ServerError);
                }
                Frame::Complete { id } if id == SUBSCRIPTION_ID => {
                    self.close(CloseReason::Server);
                }
                // A repeated ack is harmless; everything else violates the
                // protocol, including frames for an unknown id.
                Frame::ConnectionAck { .. } => {}
                _ => self.violation(text),
            },
            Phase::Closed => {}
        }
    }
}

/// A handle to a live subscription session.
pub struct SubscriptionHandle {
    session: Arc<Session>,
}

impl SubscriptionHandle {
    /// Abort the session from the caller's side. Idempotent; closes the
    /// socket with code 1000 when it is still open.
    pub fn abort(&self) {
        self.session.close(CloseReason::Client);
    }

    /// Close the session because a timeout policy declared it dead.
    /// Idempotent; closes the socket with code 4408.
    pub fn timeout(&self) {
        self.session.close(CloseReason::Timeout);
    }

    /// Whether the session has reached its terminal state.
    pub fn is_closed(&self) -> bool {
        self.session.is_aborted()
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub(crate) struct LaunchContext {
    pub connector: Arc<dyn SocketConnector>,
    pub url: String,
    pub operation: Operation,
    pub options: SubscriptionOptions,
    pub payload_generator: Option<PayloadGenerator>,
    pub log_socket_error: Option<SocketErrorLogger>,
    pub active: Arc<AtomicUsize>,
}

/// Start a session: counts it active, spawns the socket task, returns the
/// handle. The counter is decremented exactly once, on the first close.
pub(crate) fn launch(ctx: LaunchContext) -> SubscriptionHandle {
    ctx.active.fetch_add(1, Ordering::SeqCst);

    let (close_tx, close_rx) = mpsc::unbounded_channel();
    let policy = ctx
        .options
        .timeout_policy
        .clone()
        .unwrap_or_else(|| Arc::new(NoopTimeoutPolicy));

    let session = Arc::new(Session {
        operation: ctx.operation,
        state: Mutex::new(SessionState {
            phase: Phase::Opening,
            aborted: false,
            socket_closed: false,
        }),
        close_tx,
        on_data: ctx.options.on_data,
        on_open: ctx.options.on_open,
        on_close: ctx.options.on_close,
        policy,
        log_socket_error: ctx.log_socket_error,
        init_payload: Mutex::new(None),
        active: ctx.active,
    });

    tokio::spawn(run(
        session.clone(),
        ctx.connector,
        ctx.url,
        ctx.payload_generator,
        close_rx,
    ));

    SubscriptionHandle { session }
}

async fn run(
    session: Arc<Session>,
    connector: Arc<dyn SocketConnector>,
    url: String,
    payload_generator: Option<PayloadGenerator>,
    mut close_rx: mpsc::UnboundedReceiver<u16>,
) {
    let socket = match connector.connect(&url).await {
        Ok(socket) => socket,
        Err(e) => {
            session.mark_socket_closed();
            session.deliver(OperationResult::network_error(
                format!("subscription connect failed: {e}"),
                None,
            ));
            session.close(CloseReason::Error);
            return;
        }
    };
    session.policy.on_open();

    let payload = match &payload_generator {
        Some(generator) => match generator().await {
            Ok(payload) => payload,
            Err(e) => {
                session.deliver(OperationResult::network_error(
                    format!("connection payload generation failed: {e}"),
                    None,
                ));
                session.close(CloseReason::Error);
                finish(&*socket, &mut close_rx, &session).await;
                return;
            }
        },
        None => None,
    };
    *session.init_payload.lock() = payload.clone();

    let init = Frame::ConnectionInit { payload };
    session.policy.on_outbound(&init);
    if let Err(e) = send_frame(&*socket, &init).await {
        session.mark_socket_closed();
        session.deliver(OperationResult::network_error(
            format!("failed to send connection_init: {e}"),
            None,
        ));
        session.close(CloseReason::Error);
        return;
    }

    loop {
        tokio::select! {
            code = close_rx.recv() => {
                socket.close(code.unwrap_or(1000), "").await;
                session.mark_socket_closed();
                break;
            }
            event = socket.recv() => match event {
                SocketEvent::Text(text) => {
                    session.handle_text(&*socket, &text).await;
                }
                SocketEvent::Closed(code) => {
                    session.mark_socket_closed();
                    if !session.is_aborted() {
                        // Unexpected remote closure.
                        if let Some(log) = &session.log_socket_error {
                            let init_payload = session.init_payload.lock();
                            log(
                                &session.operation,
                                init_payload.as_ref(),
                                &format!("socket closed: code {code:?}"),
                            );
                        }
                        session.close(CloseReason::Error);
                    }
                    break;
                }
                SocketEvent::Failed(e) => {
                    session.mark_socket_closed();
                    if !session.is_aborted() {
                        session.deliver(OperationResult::network_error(
                            format!("subscription transport failed: {e}"),
                            None,
                        ));
                        session.close(CloseReason::Error);
                    }
                    break;
                }
            }
        }
    }
}

/// Drain the queued close code and shut the socket down.
async fn finish(
    socket: &dyn MessageSocket,
    close_rx: &mut mpsc::UnboundedReceiver<u16>,
    session: &Session,
) {
    if let Some(code) = close_rx.recv().await {
        socket.close(code, "").await;
    }
    session.mark_socket_closed();
}

async fn send_frame(socket: &dyn MessageSocket, frame: &Frame) -> Result<()> {
    let text = serde_json::to_string(frame)?;
    socket.send(text).await
}
