use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{MessageId, SessionId};

/// Descriptor map sent to the remote renderer: field name to field spec.
pub type Form = BTreeMap<String, FieldSpec>;

/// Submitted values keyed by the same field names as the [`Form`].
pub type FormData = BTreeMap<String, FieldValue>;

/// One input field the remote client is asked to render.
///
/// The set is extensible; `TEXT_INPUT` is the single built-in. `required` is
/// a contract hint to the renderer only — the core never enforces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FieldSpec {
    #[serde(rename = "TEXT_INPUT")]
    TextInput {
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        required: Option<bool>,
    },
}

/// A submitted value, mirroring the [`FieldSpec`] variant it answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FieldValue {
    #[serde(rename = "TEXT_INPUT")]
    TextInput { value: String },
}

/// The unit exchanged on the bus: a closed set of variants tagged by kind.
///
/// Every variant carries `{id, timestamp}`; the remaining fields follow the
/// wire schema. Correlation flows through `parentMessageId`, which links a
/// response or cancellation back to the message that prompted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Request to begin a tool run. `tool` names the registry slug to start;
    /// a missing or unknown slug is acked with [`Message::StartToolFailure`].
    #[serde(rename = "START_TOOL")]
    StartTool {
        id: MessageId,
        timestamp: u64,
        session: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool: Option<String>,
    },

    #[serde(rename = "START_TOOL_SUCCESS")]
    StartToolSuccess {
        id: MessageId,
        timestamp: u64,
        #[serde(rename = "parentMessageId")]
        parent_message_id: MessageId,
    },

    #[serde(rename = "START_TOOL_FAILURE")]
    StartToolFailure {
        id: MessageId,
        timestamp: u64,
        #[serde(rename = "parentMessageId")]
        parent_message_id: MessageId,
    },

    /// Attach a new subscriber to an existing session's channel.
    #[serde(rename = "RECONNECT_TOOL_SESSION")]
    ReconnectToolSession {
        id: MessageId,
        timestamp: u64,
        session: SessionId,
    },

    /// Request for structured input; the message id doubles as the
    /// correlation id its reply must carry.
    #[serde(rename = "RENDER_INPUT_FORM")]
    RenderInputForm {
        id: MessageId,
        timestamp: u64,
        form: Form,
    },

    /// Answer to a RENDER_INPUT_FORM. `session` routes the reply inbound;
    /// the core ignores it once the message reaches the right channel.
    #[serde(rename = "INPUT_FORM_RESPONSE")]
    InputFormResponse {
        id: MessageId,
        timestamp: u64,
        #[serde(rename = "parentMessageId")]
        parent_message_id: MessageId,
        data: FormData,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<SessionId>,
    },

    /// Abort of a pending input request.
    #[serde(rename = "INPUT_FORM_CANCELLATION")]
    InputFormCancellation {
        id: MessageId,
        timestamp: u64,
        #[serde(rename = "parentMessageId")]
        parent_message_id: MessageId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<SessionId>,
    },

    #[serde(rename = "TOOL_COMPLETION")]
    ToolCompletion {
        id: MessageId,
        timestamp: u64,
        #[serde(default)]
        output: Value,
    },

    #[serde(rename = "TOOL_ERROR")]
    ToolError {
        id: MessageId,
        timestamp: u64,
        #[serde(rename = "errorMessage")]
        error_message: String,
    },
}

impl Message {
    pub fn id(&self) -> &MessageId {
        match self {
            Message::StartTool { id, .. }
            | Message::StartToolSuccess { id, .. }
            | Message::StartToolFailure { id, .. }
            | Message::ReconnectToolSession { id, .. }
            | Message::RenderInputForm { id, .. }
            | Message::InputFormResponse { id, .. }
            | Message::InputFormCancellation { id, .. }
            | Message::ToolCompletion { id, .. }
            | Message::ToolError { id, .. } => id,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            Message::StartTool { timestamp, .. }
            | Message::StartToolSuccess { timestamp, .. }
            | Message::StartToolFailure { timestamp, .. }
            | Message::ReconnectToolSession { timestamp, .. }
            | Message::RenderInputForm { timestamp, .. }
            | Message::InputFormResponse { timestamp, .. }
            | Message::InputFormCancellation { timestamp, .. }
            | Message::ToolCompletion { timestamp, .. }
            | Message::ToolError { timestamp, .. } => *timestamp,
        }
    }

    /// Wire tag of this message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::StartTool { .. } => "START_TOOL",
            Message::StartToolSuccess { .. } => "START_TOOL_SUCCESS",
            Message::StartToolFailure { .. } => "START_TOOL_FAILURE",
            Message::ReconnectToolSession { .. } => "RECONNECT_TOOL_SESSION",
            Message::RenderInputForm { .. } => "RENDER_INPUT_FORM",
            Message::InputFormResponse { .. } => "INPUT_FORM_RESPONSE",
            Message::InputFormCancellation { .. } => "INPUT_FORM_CANCELLATION",
            Message::ToolCompletion { .. } => "TOOL_COMPLETION",
            Message::ToolError { .. } => "TOOL_ERROR",
        }
    }

    /// Session this message names, for kinds that carry one.
    pub fn session(&self) -> Option<&SessionId> {
        match self {
            Message::StartTool { session, .. } | Message::ReconnectToolSession { session, .. } => {
                Some(session)
            }
            Message::InputFormResponse { session, .. }
            | Message::InputFormCancellation { session, .. } => session.as_ref(),
            Message::StartToolSuccess { .. }
            | Message::StartToolFailure { .. }
            | Message::RenderInputForm { .. }
            | Message::ToolCompletion { .. }
            | Message::ToolError { .. } => None,
        }
    }

    /// Correlation id linking this message back to the one it answers.
    pub fn parent_message_id(&self) -> Option<&MessageId> {
        match self {
            Message::StartToolSuccess {
                parent_message_id, ..
            }
            | Message::StartToolFailure {
                parent_message_id, ..
            }
            | Message::InputFormResponse {
                parent_message_id, ..
            }
            | Message::InputFormCancellation {
                parent_message_id, ..
            } => Some(parent_message_id),
            Message::StartTool { .. }
            | Message::ReconnectToolSession { .. }
            | Message::RenderInputForm { .. }
            | Message::ToolCompletion { .. }
            | Message::ToolError { .. } => None,
        }
    }
}

/// Wall-clock timestamp in unix milliseconds.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Canonical JSON encoding of `message`.
///
/// Encoding a well-formed message cannot fail; if it ever does the frame
/// degenerates to an empty string, which every peer drops on decode.
pub fn serialize_message(message: &Message) -> String {
    serde_json::to_string(message).unwrap_or_else(|error| {
        tracing::error!(kind = message.kind(), %error, "failed to serialize message");
        String::new()
    })
}

/// Parse one wire frame, validating every field against the schema.
///
/// Unknown tags and malformed payloads yield `None` — the frame is dropped,
/// never partially accepted. Unknown extra object keys are ignored.
pub fn deserialize_message(frame: &str) -> Option<Message> {
    serde_json::from_str(frame).ok()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn form() -> Form {
        let mut form = Form::new();
        form.insert(
            "name".to_string(),
            FieldSpec::TextInput {
                label: "Name".to_string(),
                required: Some(true),
            },
        );
        form
    }

    fn form_data() -> FormData {
        let mut data = FormData::new();
        data.insert(
            "name".to_string(),
            FieldValue::TextInput {
                value: "Ada".to_string(),
            },
        );
        data
    }

    #[rstest]
    #[case::start_tool(Message::StartTool {
        id: MessageId::from("m1"),
        timestamp: 1,
        session: SessionId::from("s1"),
        tool: Some("greet-user".to_string()),
    })]
    #[case::start_tool_success(Message::StartToolSuccess {
        id: MessageId::from("m2"),
        timestamp: 2,
        parent_message_id: MessageId::from("m1"),
    })]
    #[case::start_tool_failure(Message::StartToolFailure {
        id: MessageId::from("m3"),
        timestamp: 3,
        parent_message_id: MessageId::from("m1"),
    })]
    #[case::reconnect(Message::ReconnectToolSession {
        id: MessageId::from("m4"),
        timestamp: 4,
        session: SessionId::from("s1"),
    })]
    #[case::render_input_form(Message::RenderInputForm {
        id: MessageId::from("r1"),
        timestamp: 5,
        form: form(),
    })]
    #[case::input_form_response(Message::InputFormResponse {
        id: MessageId::from("m5"),
        timestamp: 6,
        parent_message_id: MessageId::from("r1"),
        data: form_data(),
        session: Some(SessionId::from("s1")),
    })]
    #[case::input_form_cancellation(Message::InputFormCancellation {
        id: MessageId::from("m6"),
        timestamp: 7,
        parent_message_id: MessageId::from("r1"),
        session: None,
    })]
    #[case::tool_completion(Message::ToolCompletion {
        id: MessageId::from("m7"),
        timestamp: 8,
        output: json!({"greeting": "Hello, Ada!"}),
    })]
    #[case::tool_error(Message::ToolError {
        id: MessageId::from("m8"),
        timestamp: 9,
        error_message: "Something went wrong. Please try again.".to_string(),
    })]
    fn round_trips_every_kind(#[case] message: Message) {
        let frame = serialize_message(&message);
        assert_eq!(deserialize_message(&frame), Some(message));
    }

    #[test]
    fn wire_shape_uses_camel_case_and_screaming_tags() {
        let message = Message::InputFormResponse {
            id: MessageId::from("m5"),
            timestamp: 6,
            parent_message_id: MessageId::from("r1"),
            data: form_data(),
            session: None,
        };
        let value: Value = serde_json::from_str(&serialize_message(&message)).unwrap();
        assert_eq!(value["type"], "INPUT_FORM_RESPONSE");
        assert_eq!(value["parentMessageId"], "r1");
        assert_eq!(value["data"]["name"]["type"], "TEXT_INPUT");
        assert_eq!(value["data"]["name"]["value"], "Ada");
        assert!(value.get("session").is_none());
    }

    #[test]
    fn optional_required_flag_is_omitted_when_absent() {
        let message = Message::RenderInputForm {
            id: MessageId::from("r1"),
            timestamp: 5,
            form: {
                let mut form = Form::new();
                form.insert(
                    "name".to_string(),
                    FieldSpec::TextInput {
                        label: "Name".to_string(),
                        required: None,
                    },
                );
                form
            },
        };
        let value: Value = serde_json::from_str(&serialize_message(&message)).unwrap();
        assert!(value["form"]["name"].get("required").is_none());
        assert_eq!(value["form"]["name"]["label"], "Name");
    }

    #[rstest]
    #[case::not_json("not json at all")]
    #[case::empty("")]
    #[case::unknown_tag(r#"{"type":"UNKNOWN_KIND","id":"m1","timestamp":1}"#)]
    #[case::missing_field(r#"{"type":"START_TOOL","id":"m1","timestamp":1}"#)]
    #[case::wrong_type(r#"{"type":"TOOL_ERROR","id":"m1","timestamp":"soon","errorMessage":"x"}"#)]
    #[case::bad_field_kind(
        r#"{"type":"RENDER_INPUT_FORM","id":"r1","timestamp":1,"form":{"name":{"type":"DATE_INPUT","label":"When"}}}"#
    )]
    fn rejects_malformed_frames(#[case] frame: &str) {
        assert_eq!(deserialize_message(frame), None);
    }

    #[test]
    fn ignores_unknown_extra_keys() {
        let frame = r#"{"type":"RECONNECT_TOOL_SESSION","id":"m4","timestamp":4,"session":"s1","extra":true}"#;
        let message = deserialize_message(frame).unwrap();
        assert_eq!(message.kind(), "RECONNECT_TOOL_SESSION");
        assert_eq!(message.session().map(SessionId::as_str), Some("s1"));
    }

    #[test]
    fn completion_output_defaults_to_null() {
        let frame = r#"{"type":"TOOL_COMPLETION","id":"m7","timestamp":8}"#;
        let message = deserialize_message(frame).unwrap();
        assert_eq!(
            message,
            Message::ToolCompletion {
                id: MessageId::from("m7"),
                timestamp: 8,
                output: Value::Null,
            }
        );
    }

    #[test]
    fn parent_accessor_covers_reply_kinds_only() {
        let reply = Message::InputFormCancellation {
            id: MessageId::from("m6"),
            timestamp: 7,
            parent_message_id: MessageId::from("r1"),
            session: None,
        };
        assert_eq!(reply.parent_message_id(), Some(&MessageId::from("r1")));

        let render = Message::RenderInputForm {
            id: MessageId::from("r1"),
            timestamp: 5,
            form: form(),
        };
        assert_eq!(render.parent_message_id(), None);
    }
}
