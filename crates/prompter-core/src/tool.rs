use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::bus::MessageBus;
use crate::error::HandlerError;
use crate::input::InputSession;
use crate::message::{Message, current_timestamp};
use crate::types::{ChannelId, MessageId, SessionId, slugify};

type HandlerFn =
    dyn Fn(InputSession) -> BoxFuture<'static, Result<Value, HandlerError>> + Send + Sync;

/// A named handler that can be run against a session.
///
/// The handler receives an [`InputSession`] and may issue any number of
/// input requests before settling. Every run publishes exactly one terminal
/// message — TOOL_COMPLETION or TOOL_ERROR — on the session channel.
pub struct Tool {
    name: String,
    slug: String,
    description: Option<String>,
    handler: Arc<HandlerFn>,
}

impl Tool {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(InputSession) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        let name = name.into();
        Self {
            slug: slugify(&name),
            name,
            description: None,
            handler: Arc::new(move |io| Box::pin(handler(io))),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registry lookup key, derived from the name.
    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Run the handler against `session`, publishing exactly one terminal
    /// message on the session channel.
    ///
    /// A validation failure surfaces its own message; a cancelled input
    /// request surfaces a fixed cancellation message; any other failure is
    /// published as a generic message with the detail kept in the logs.
    pub async fn run(&self, session: &SessionId, bus: &Arc<MessageBus>) {
        let channel = ChannelId::from(session);
        let io = InputSession::new(Arc::clone(bus), channel.clone());

        tracing::info!(session = %session, tool = %self.slug, "tool run started");
        let terminal = match (self.handler)(io).await {
            Ok(output) => {
                tracing::info!(session = %session, tool = %self.slug, "tool run completed");
                Message::ToolCompletion {
                    id: MessageId::random(),
                    timestamp: current_timestamp(),
                    output,
                }
            }
            Err(error) => {
                tracing::warn!(session = %session, tool = %self.slug, %error, "tool run failed");
                Message::ToolError {
                    id: MessageId::random(),
                    timestamp: current_timestamp(),
                    error_message: error.wire_message(),
                }
            }
        };
        bus.publish(&channel, terminal);
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("slug", &self.slug)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}
