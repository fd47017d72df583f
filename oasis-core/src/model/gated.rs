//! Messages after the privacy gate has looked at them

use serde::{Deserialize, Serialize};

use super::message::Message;
use super::refs::{FeedId, MsgKey};

/// Shown instead of a private message the viewer may not read
pub const PRIVATE_PLACEHOLDER: &str = "[This message is private.]";

/// Shown instead of a public message whose author has not opted into web hosting
pub const UNHOSTED_PLACEHOLDER: &str =
    "[Public messages are redacted by default. Install SSB to see this message.]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionReason {
    /// Private message and the viewer is neither author nor recipient
    Private,
    /// Public message whose author has not consented to public web hosting
    NotHosted,
}

impl RedactionReason {
    pub fn placeholder(&self) -> &'static str {
        match self {
            RedactionReason::Private => PRIVATE_PLACEHOLDER,
            RedactionReason::NotHosted => UNHOSTED_PLACEHOLDER,
        }
    }
}

/// What remains of a message the viewer may not see
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactedMessage {
    pub key: MsgKey,
    pub author: FeedId,
    pub placeholder: String,
    pub reason: RedactionReason,
}

/// A message as it may be shown to a particular viewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GatedMessage {
    Visible(Message),
    Redacted(RedactedMessage),
}

impl GatedMessage {
    pub fn redact(message: &Message, reason: RedactionReason) -> Self {
        GatedMessage::Redacted(RedactedMessage {
            key: message.key.clone(),
            author: message.author().clone(),
            placeholder: reason.placeholder().to_string(),
            reason,
        })
    }

    pub fn key(&self) -> &MsgKey {
        match self {
            GatedMessage::Visible(message) => &message.key,
            GatedMessage::Redacted(redacted) => &redacted.key,
        }
    }

    pub fn author(&self) -> &FeedId {
        match self {
            GatedMessage::Visible(message) => message.author(),
            GatedMessage::Redacted(redacted) => &redacted.author,
        }
    }

    pub fn is_redacted(&self) -> bool {
        matches!(self, GatedMessage::Redacted(_))
    }

    pub fn as_visible(&self) -> Option<&Message> {
        match self {
            GatedMessage::Visible(message) => Some(message),
            GatedMessage::Redacted(_) => None,
        }
    }
}
