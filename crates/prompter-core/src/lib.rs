// Core prompter functionality without transport dependencies

pub mod bus;
pub mod error;
pub mod input;
pub mod message;
pub mod registry;
pub mod router;
pub mod tool;
pub mod types;

pub use bus::{MessageBus, ReplyWaiter, SubscriberGuard, Subscription};
pub use error::{GENERIC_ERROR_MESSAGE, HandlerError};
pub use input::{InputOutcome, InputSession};
pub use message::{
    FieldSpec, FieldValue, Form, FormData, Message, current_timestamp, deserialize_message,
    serialize_message,
};
pub use registry::ToolRegistry;
pub use router::{ConnectionId, OutboundSink, SessionRouter, SinkClosed};
pub use tool::Tool;
pub use types::{ChannelId, MessageId, SessionId, slugify};
