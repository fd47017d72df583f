//! Composing and publishing new messages
//!
//! Content builders are pure so the linking rules can be checked without a
//! log store. Replies to private messages stay private: the parent's
//! normalized recipients are copied verbatim.

use serde_json::{json, Map, Value};
use tracing::info;

use super::mentions::extract_mentions;
use super::MessageStore;
use crate::error::AccessResult;
use crate::model::{Message, MsgKey};
use crate::rpc::methods;
use crate::thread::{resolve_root, RootResolution};

fn post(text: &str) -> Map<String, Value> {
    let mut content = Map::new();
    content.insert("type".to_string(), json!("post"));
    content.insert("text".to_string(), json!(text));

    let mentions = extract_mentions(text);
    if !mentions.is_empty() {
        content.insert("mentions".to_string(), Value::Array(mentions));
    }
    content
}

fn copy_recipients(parent: &Message, content: &mut Map<String, Value>) {
    if !parent.is_private() || parent.recipients().is_empty() {
        return;
    }
    let recps = parent
        .recipients()
        .iter()
        .map(|feed| json!(feed.as_str()))
        .collect();
    content.insert("recps".to_string(), Value::Array(recps));
}

/// A post starting a new thread
pub fn root_content(text: &str) -> Value {
    Value::Object(post(text))
}

/// A post continuing directly from `parent`
pub fn reply_content(parent: &Message, text: &str) -> Value {
    let mut content = post(text);
    content.insert("root".to_string(), json!(parent.key.as_str()));
    if let Some(fork) = parent.root() {
        content.insert("fork".to_string(), json!(fork.as_str()));
    }
    content.insert("branch".to_string(), json!(parent.key.as_str()));
    copy_recipients(parent, &mut content);
    Value::Object(content)
}

/// A post nested under the thread `parent` belongs to
pub fn comment_content(parent: &Message, text: &str) -> Value {
    let root = match resolve_root(parent) {
        RootResolution::Itself => parent.key.clone(),
        RootResolution::Ancestor(root) => root,
    };

    let mut content = post(text);
    content.insert("root".to_string(), json!(root.as_str()));
    content.insert("branch".to_string(), json!(parent.key.as_str()));
    copy_recipients(parent, &mut content);
    Value::Object(content)
}

/// A vote on `parent`; positive values are likes
pub fn vote_content(parent: &Message, value: i64) -> Value {
    let expression = if value > 0 { "Like" } else { "Unlike" };
    let mut content = Map::new();
    content.insert("type".to_string(), json!("vote"));
    content.insert(
        "vote".to_string(),
        json!({ "link": parent.key.as_str(), "value": value, "expression": expression }),
    );
    copy_recipients(parent, &mut content);
    Value::Object(content)
}

impl MessageStore {
    pub async fn publish_root(&self, text: &str) -> AccessResult<Message> {
        self.publish(root_content(text)).await
    }

    pub async fn publish_reply(&self, parent: &MsgKey, text: &str) -> AccessResult<Message> {
        let parent = self.raw_get(parent).await?;
        self.publish(reply_content(&parent, text)).await
    }

    pub async fn publish_comment(&self, parent: &MsgKey, text: &str) -> AccessResult<Message> {
        let parent = self.raw_get(parent).await?;
        self.publish(comment_content(&parent, text)).await
    }

    pub async fn publish_vote(&self, parent: &MsgKey, value: i64) -> AccessResult<Message> {
        let parent = self.raw_get(parent).await?;
        self.publish(vote_content(&parent, value)).await
    }

    async fn publish(&self, content: Value) -> AccessResult<Message> {
        let message: Message = self
            .facade
            .call(methods::PUBLISH, json!({ "content": content }))
            .await?;
        info!(key = %message.key, kind = message.content_type().unwrap_or("unknown"), "Published");
        Ok(message)
    }
}
