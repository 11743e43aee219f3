use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bus::{MessageBus, SubscriberGuard};
use crate::message::{Message, current_timestamp};
use crate::registry::ToolRegistry;
use crate::types::{ChannelId, MessageId, SessionId};

/// Identifier for one transport connection, minted by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The connection backing a sink has gone away.
#[derive(Debug, Error)]
#[error("outbound connection closed")]
pub struct SinkClosed;

/// Transport-facing sink for messages delivered to one connection.
///
/// Implementations typically wrap an mpsc sender drained by the socket's
/// writer half. An error means the connection is gone and stops the pump.
#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), SinkClosed>;
}

struct SessionAttachment {
    guard: SubscriberGuard,
    pump: JoinHandle<()>,
}

/// Routes inbound wire messages to the bus, the registry, and tool runs.
///
/// Tracks one subscription per (connection, session) pair: reconnecting
/// releases the previous subscription before attaching the new one, and a
/// disconnect releases everything the connection held, exactly once.
pub struct SessionRouter {
    bus: Arc<MessageBus>,
    registry: Arc<ToolRegistry>,
    connections: Mutex<HashMap<ConnectionId, HashMap<SessionId, SessionAttachment>>>,
}

impl SessionRouter {
    pub fn new(bus: Arc<MessageBus>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            bus,
            registry,
            connections: Mutex::new(HashMap::new()),
        }
    }

    fn lock(
        &self,
    ) -> MutexGuard<'_, HashMap<ConnectionId, HashMap<SessionId, SessionAttachment>>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Route one inbound message from `connection`.
    pub fn handle_message(
        &self,
        connection: ConnectionId,
        message: Message,
        sink: &Arc<dyn OutboundSink>,
    ) {
        match message {
            Message::StartTool {
                id, session, tool, ..
            } => self.start_tool(connection, id, session, tool, sink),
            Message::ReconnectToolSession { session, .. } => {
                tracing::info!(connection = %connection, session = %session, "reconnect");
                self.attach(connection, &session, sink);
            }
            message @ (Message::InputFormResponse { .. }
            | Message::InputFormCancellation { .. }) => match message.session().cloned() {
                Some(session) => self.bus.publish(&ChannelId::from(&session), message),
                None => {
                    tracing::debug!(
                        connection = %connection,
                        kind = message.kind(),
                        "dropping reply without a session"
                    );
                }
            },
            message @ (Message::StartToolSuccess { .. }
            | Message::StartToolFailure { .. }
            | Message::RenderInputForm { .. }
            | Message::ToolCompletion { .. }
            | Message::ToolError { .. }) => {
                tracing::debug!(
                    connection = %connection,
                    kind = message.kind(),
                    "ignoring inbound message kind"
                );
            }
        }
    }

    /// Release every subscription held by `connection`.
    pub fn handle_disconnect(&self, connection: ConnectionId) {
        let Some(sessions) = self.lock().remove(&connection) else {
            return;
        };
        for (session, attachment) in sessions {
            attachment.guard.release();
            attachment.pump.abort();
            tracing::debug!(
                connection = %connection,
                session = %session,
                "released session subscription"
            );
        }
    }

    fn start_tool(
        &self,
        connection: ConnectionId,
        parent: MessageId,
        session: SessionId,
        tool: Option<String>,
        sink: &Arc<dyn OutboundSink>,
    ) {
        // The starting connection is attached first so it observes the ack.
        self.attach(connection, &session, sink);

        let channel = ChannelId::from(&session);
        let resolved = tool.as_deref().and_then(|slug| self.registry.resolve(slug));
        match resolved {
            Some(tool) => {
                tracing::info!(
                    connection = %connection,
                    session = %session,
                    tool = tool.slug(),
                    "starting tool"
                );
                self.bus.publish(
                    &channel,
                    Message::StartToolSuccess {
                        id: MessageId::random(),
                        timestamp: current_timestamp(),
                        parent_message_id: parent,
                    },
                );

                let bus = Arc::clone(&self.bus);
                tokio::spawn(async move {
                    tool.run(&session, &bus).await;
                });
            }
            None => {
                tracing::warn!(
                    connection = %connection,
                    session = %session,
                    tool = tool.as_deref().unwrap_or("<unnamed>"),
                    "start requested for unknown tool"
                );
                self.bus.publish(
                    &channel,
                    Message::StartToolFailure {
                        id: MessageId::random(),
                        timestamp: current_timestamp(),
                        parent_message_id: parent,
                    },
                );
            }
        }
    }

    /// Subscribe `connection` to `session`, releasing any prior subscription
    /// for the same pair first.
    fn attach(&self, connection: ConnectionId, session: &SessionId, sink: &Arc<dyn OutboundSink>) {
        let mut connections = self.lock();
        let sessions = connections.entry(connection).or_default();
        if let Some(previous) = sessions.remove(session) {
            previous.guard.release();
            previous.pump.abort();
            tracing::debug!(
                connection = %connection,
                session = %session,
                "replacing existing session subscription"
            );
        }

        let (guard, rx) = self.bus.subscribe_split(&ChannelId::from(session));
        let pump = tokio::spawn(pump_messages(rx, Arc::clone(sink)));
        sessions.insert(session.clone(), SessionAttachment { guard, pump });
    }
}

/// Forward bus messages to one connection until either side goes away.
async fn pump_messages(
    mut rx: mpsc::UnboundedReceiver<Message>,
    sink: Arc<dyn OutboundSink>,
) {
    while let Some(message) = rx.recv().await {
        if sink.send(message).await.is_err() {
            break;
        }
    }
}
