//! Deterministic fixtures for log records

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::model::{BlobId, FeedId, Message, MessageMeta, MessageValue, MsgKey};

fn hashed(sigil: char, suffix: &str, seed: &str) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    format!("{}{}{}", sigil, STANDARD.encode(digest), suffix)
}

/// The n-th test identity
pub fn feed(n: u32) -> FeedId {
    FeedId::parse(&hashed('@', ".ed25519", &format!("feed:{}", n))).expect("fixture feed id")
}

/// The n-th test message key
pub fn msg_key(n: u32) -> MsgKey {
    MsgKey::parse(&hashed('%', ".sha256", &format!("msg:{}", n))).expect("fixture message key")
}

/// The n-th test blob id
pub fn blob(n: u32) -> BlobId {
    BlobId::parse(&hashed('&', ".sha256", &format!("blob:{}", n))).expect("fixture blob id")
}

/// Builder for [`Message`] records in the shape the log store returns
pub struct MessageBuilder {
    key: MsgKey,
    author: FeedId,
    sequence: u64,
    timestamp: f64,
    content: Map<String, Value>,
    private: bool,
}

impl MessageBuilder {
    /// A public `post` by `author`, keyed by `msg_key(n)` and timestamped `n` seconds in
    pub fn new(n: u32, author: FeedId) -> Self {
        let mut content = Map::new();
        content.insert("type".to_string(), json!("post"));
        Self {
            key: msg_key(n),
            author,
            sequence: n as u64,
            timestamp: n as f64 * 1000.0,
            content,
            private: false,
        }
    }

    pub fn key(mut self, key: MsgKey) -> Self {
        self.key = key;
        self
    }

    pub fn timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.content.insert("text".to_string(), json!(text));
        self
    }

    pub fn root(mut self, root: &MsgKey) -> Self {
        self.content.insert("root".to_string(), json!(root.as_str()));
        self
    }

    pub fn fork(mut self, fork: &MsgKey) -> Self {
        self.content.insert("fork".to_string(), json!(fork.as_str()));
        self
    }

    pub fn channel(mut self, channel: &str) -> Self {
        self.content.insert("channel".to_string(), json!(channel));
        self
    }

    pub fn mention(mut self, feed: &FeedId) -> Self {
        let mentions = self
            .content
            .entry("mentions")
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(list) = mentions {
            list.push(json!({"link": feed.as_str()}));
        }
        self
    }

    /// Turn this into a `vote` on `link`
    pub fn vote(mut self, link: &MsgKey, value: i64) -> Self {
        self.content.insert("type".to_string(), json!("vote"));
        self.content.insert(
            "vote".to_string(),
            json!({"link": link.as_str(), "value": value, "expression": "Like"}),
        );
        self
    }

    /// Mark as private, readable by the author and `recps`
    pub fn private_to(mut self, recps: &[FeedId]) -> Self {
        let mut all: Vec<Value> = vec![json!(self.author.as_str())];
        all.extend(recps.iter().map(|r| json!(r.as_str())));
        self.content.insert("recps".to_string(), Value::Array(all));
        self.private = true;
        self
    }

    /// Mark as private to exactly `recps`; the author is left out of the list
    pub fn private_to_only(mut self, recps: &[FeedId]) -> Self {
        let listed = recps.iter().map(|r| json!(r.as_str())).collect();
        self.content.insert("recps".to_string(), Value::Array(listed));
        self.private = true;
        self
    }

    pub fn content(&self) -> Value {
        Value::Object(self.content.clone())
    }

    pub fn build(self) -> Message {
        let mut value = MessageValue::new(
            self.author,
            self.sequence,
            self.timestamp,
            Value::Object(self.content),
        );
        value.meta = MessageMeta {
            private: self.private,
        };
        Message {
            key: self.key,
            value,
            timestamp: self.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_are_valid_and_distinct() {
        assert_ne!(feed(1), feed(2));
        assert_ne!(msg_key(1), msg_key(2));
        assert_eq!(feed(7), feed(7));
        assert!(BlobId::is_valid(blob(3).as_str()));
    }

    #[test]
    fn test_builder_private_includes_author() {
        let msg = MessageBuilder::new(1, feed(1)).private_to(&[feed(2)]).build();
        assert!(msg.is_private());
        assert_eq!(msg.recipients(), &[feed(1), feed(2)]);
    }
}
