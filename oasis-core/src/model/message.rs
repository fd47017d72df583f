//! Messages as returned by the log store

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::refs::{FeedId, MsgKey};

/// A logged message together with its key and receive time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub key: MsgKey,
    pub value: MessageValue,
    /// When the local log store received the message (ms since epoch)
    #[serde(default)]
    pub timestamp: f64,
}

/// Signed portion of a message plus store-side metadata
///
/// Recipients are normalized once while decoding and kept next to the raw
/// content, so gating and publishing never re-interpret `recps`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawMessageValue", into = "RawMessageValue")]
pub struct MessageValue {
    pub author: FeedId,
    pub sequence: u64,
    /// Timestamp asserted by the author (ms since epoch)
    pub timestamp: f64,
    pub content: Value,
    pub meta: MessageMeta,
    pub signature: Option<String>,
    recipients: Vec<FeedId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMeta {
    /// Set by the log store when the content was decrypted for us
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub private: bool,
}

impl MessageMeta {
    fn is_empty(&self) -> bool {
        !self.private
    }
}

#[derive(Serialize, Deserialize)]
struct RawMessageValue {
    author: FeedId,
    #[serde(default)]
    sequence: u64,
    #[serde(default)]
    timestamp: f64,
    #[serde(default)]
    content: Value,
    #[serde(default, skip_serializing_if = "MessageMeta::is_empty")]
    meta: MessageMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
}

impl From<RawMessageValue> for MessageValue {
    fn from(raw: RawMessageValue) -> Self {
        let recipients = normalize_recipients(&raw.content);
        MessageValue {
            author: raw.author,
            sequence: raw.sequence,
            timestamp: raw.timestamp,
            content: raw.content,
            meta: raw.meta,
            signature: raw.signature,
            recipients,
        }
    }
}

impl From<MessageValue> for RawMessageValue {
    fn from(value: MessageValue) -> Self {
        RawMessageValue {
            author: value.author,
            sequence: value.sequence,
            timestamp: value.timestamp,
            content: value.content,
            meta: value.meta,
            signature: value.signature,
        }
    }
}

/// One entry of a `recps` array: a bare id or a `{ link }` object
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Recipient {
    Direct(String),
    Linked { link: String },
}

impl Recipient {
    pub fn into_feed(self) -> Option<FeedId> {
        let raw = match self {
            Recipient::Direct(id) => id,
            Recipient::Linked { link } => link,
        };
        FeedId::parse(&raw).ok()
    }
}

fn normalize_recipients(content: &Value) -> Vec<FeedId> {
    let Some(recps) = content.get("recps").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut recipients: Vec<FeedId> = Vec::with_capacity(recps.len());
    for entry in recps {
        let feed = serde_json::from_value::<Recipient>(entry.clone())
            .ok()
            .and_then(Recipient::into_feed);
        if let Some(feed) = feed {
            if !recipients.contains(&feed) {
                recipients.push(feed);
            }
        }
    }
    recipients
}

/// A vote cast on another message
#[derive(Debug, Clone, PartialEq)]
pub struct Vote {
    pub link: MsgKey,
    pub value: i64,
    pub expression: Option<String>,
}

impl MessageValue {
    pub fn new(author: FeedId, sequence: u64, timestamp: f64, content: Value) -> Self {
        RawMessageValue {
            author,
            sequence,
            timestamp,
            content,
            meta: MessageMeta::default(),
            signature: None,
        }
        .into()
    }

    /// Normalized identities from `recps`; malformed entries are dropped
    pub fn recipients(&self) -> &[FeedId] {
        &self.recipients
    }
}

impl Message {
    pub fn author(&self) -> &FeedId {
        &self.value.author
    }

    pub fn is_private(&self) -> bool {
        self.value.meta.private
    }

    pub fn recipients(&self) -> &[FeedId] {
        self.value.recipients()
    }

    /// Thread root this message belongs to; malformed references count as absent
    pub fn root(&self) -> Option<MsgKey> {
        self.content_ref("root")
    }

    /// Sub-thread this message forks from; malformed references count as absent
    pub fn fork(&self) -> Option<MsgKey> {
        self.content_ref("fork")
    }

    pub fn content_type(&self) -> Option<&str> {
        self.value.content.get("type").and_then(Value::as_str)
    }

    pub fn text(&self) -> Option<&str> {
        self.value.content.get("text").and_then(Value::as_str)
    }

    pub fn channel(&self) -> Option<&str> {
        self.value.content.get("channel").and_then(Value::as_str)
    }

    pub fn vote(&self) -> Option<Vote> {
        if self.content_type() != Some("vote") {
            return None;
        }
        let vote = self.value.content.get("vote")?;
        let link = MsgKey::parse(vote.get("link")?.as_str()?).ok()?;
        let value = vote.get("value").and_then(Value::as_i64).unwrap_or(0);
        let expression = vote
            .get("expression")
            .and_then(Value::as_str)
            .map(str::to_string);
        Some(Vote {
            link,
            value,
            expression,
        })
    }

    /// Whether `content.mentions` links to `feed`
    pub fn mentions_feed(&self, feed: &FeedId) -> bool {
        let Some(mentions) = self.value.content.get("mentions").and_then(Value::as_array) else {
            return false;
        };
        mentions.iter().any(|mention| {
            let link = match mention {
                Value::String(link) => Some(link.as_str()),
                other => other.get("link").and_then(Value::as_str),
            };
            link == Some(feed.as_str())
        })
    }

    fn content_ref(&self, field: &str) -> Option<MsgKey> {
        self.value
            .content
            .get(field)
            .and_then(Value::as_str)
            .and_then(|raw| MsgKey::parse(raw).ok())
    }
}
