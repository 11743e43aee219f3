use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier carried by every wire message.
///
/// Tokens are opaque strings. [`MessageId::random`] mints a UUIDv4 token, but
/// any string is a valid id so deserialized messages and deterministic test
/// ids round-trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session identity chosen by the client and held stable across reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of one pathway on the message bus.
///
/// Plain session channels carry all traffic for a session; the
/// `slug:session` composite scopes a channel to one tool's traffic when a
/// deployment wants tool messages separated from session-level control
/// messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId(String);

impl ChannelId {
    /// Channel scoped to a single tool within a session.
    pub fn scoped(slug: &str, session: &SessionId) -> Self {
        Self(format!("{slug}:{}", session.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&SessionId> for ChannelId {
    fn from(session: &SessionId) -> Self {
        Self(session.as_str().to_string())
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive a url-safe lowercase token from a human-readable name.
///
/// Runs of non-alphanumeric characters collapse to a single hyphen; leading
/// and trailing hyphens are stripped.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}
