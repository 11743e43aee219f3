use std::sync::Arc;

use crate::bus::MessageBus;
use crate::message::{FieldSpec, FieldValue, Form, FormData, Message, current_timestamp};
use crate::types::{ChannelId, MessageId};

/// Field name the single-field [`InputSession::text_input`] form is keyed
/// under, mirroring the built-in renderer contract.
const VALUE_FIELD: &str = "value";

/// Resolution of a pending input request.
///
/// Cancellation is a resolution variant rather than an error so callers can
/// pattern-match both outcomes without exception-style control flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputOutcome<T> {
    /// The remote client submitted the form.
    Submitted(T),
    /// The remote client aborted the request.
    Cancelled,
}

impl<T> InputOutcome<T> {
    pub fn submitted(self) -> Option<T> {
        match self {
            InputOutcome::Submitted(value) => Some(value),
            InputOutcome::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, InputOutcome::Cancelled)
    }
}

/// Capability handed to a tool handler for requesting structured input from
/// the remote client over the session channel.
///
/// Each request publishes a RENDER_INPUT_FORM and suspends until the
/// correlated response or cancellation arrives; concurrent requests on the
/// same channel are independent and resolve in any order.
#[derive(Clone)]
pub struct InputSession {
    bus: Arc<MessageBus>,
    channel: ChannelId,
}

impl InputSession {
    pub fn new(bus: Arc<MessageBus>, channel: ChannelId) -> Self {
        Self { bus, channel }
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// Publish a render request for `form` and suspend until the client
    /// replies or cancels.
    ///
    /// The reply registration is created before the render message is
    /// published, so a reply can never race past its waiter.
    pub async fn request_input(&self, form: Form) -> InputOutcome<FormData> {
        let id = MessageId::random();
        let waiter = self.bus.watch_replies(&self.channel, &id);
        self.bus.publish(
            &self.channel,
            Message::RenderInputForm {
                id,
                timestamp: current_timestamp(),
                form,
            },
        );

        match waiter.recv().await {
            Some(Message::InputFormResponse { data, .. }) => InputOutcome::Submitted(data),
            Some(Message::InputFormCancellation { .. }) => InputOutcome::Cancelled,
            Some(other) => {
                tracing::error!(
                    channel = %self.channel,
                    kind = other.kind(),
                    "reply waiter resolved with a non-reply message"
                );
                InputOutcome::Cancelled
            }
            None => {
                tracing::error!(
                    channel = %self.channel,
                    "pending input request discarded by the bus"
                );
                InputOutcome::Cancelled
            }
        }
    }

    /// Request a single line of text.
    ///
    /// `required` travels to the remote renderer as a contract hint; the
    /// core does not enforce it. An absent value is surfaced as `None`,
    /// never coerced.
    pub async fn text_input(
        &self,
        label: impl Into<String>,
        required: bool,
    ) -> InputOutcome<Option<String>> {
        let mut form = Form::new();
        form.insert(
            VALUE_FIELD.to_string(),
            FieldSpec::TextInput {
                label: label.into(),
                required: required.then_some(true),
            },
        );

        match self.request_input(form).await {
            InputOutcome::Submitted(mut data) => {
                let value = data
                    .remove(VALUE_FIELD)
                    .map(|field| match field {
                        FieldValue::TextInput { value } => value,
                    });
                InputOutcome::Submitted(value)
            }
            InputOutcome::Cancelled => InputOutcome::Cancelled,
        }
    }
}
