//! Identity, profile and peer queries

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::MessageStore;
use crate::error::{AccessError, AccessResult};
use crate::model::{BlobId, FeedId};
use crate::rpc::methods;

/// How the local identity relates to another feed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub following: bool,
    pub blocking: bool,
}

impl Relationship {
    pub const NONE: Relationship = Relationship {
        following: false,
        blocking: false,
    };

    pub fn is_none(&self) -> bool {
        *self == Relationship::NONE
    }
}

#[derive(Deserialize)]
struct WhoAmI {
    id: FeedId,
}

impl MessageStore {
    /// Identity of the local log store
    pub async fn whoami(&self) -> AccessResult<FeedId> {
        let me: WhoAmI = self.facade.call(methods::WHOAMI, Value::Null).await?;
        Ok(me.id)
    }

    /// Display name; falls back to the feed id when none is set
    pub async fn name(&self, feed: &FeedId) -> AccessResult<String> {
        let name: Option<String> = self
            .facade
            .call(methods::NAMES_GET_SIGNIFIER, json!({ "id": feed.as_str() }))
            .await?;
        Ok(name.unwrap_or_else(|| feed.to_string()))
    }

    /// Avatar blob; the null-image sentinel when unset or malformed
    pub async fn image(&self, feed: &FeedId) -> AccessResult<BlobId> {
        let raw = self
            .facade
            .call_value(methods::NAMES_GET_IMAGE_FOR, json!({ "id": feed.as_str() }))
            .await?;
        Ok(image_from(&raw))
    }

    /// Self-description from the feed's about messages
    pub async fn description(&self, feed: &FeedId) -> AccessResult<Option<String>> {
        let value = self.social_value(feed, "description").await?;
        Ok(value.as_str().map(str::to_string))
    }

    /// Follow/block state from the local identity towards `feed`; `None` for oneself
    pub async fn relationship(&self, feed: &FeedId) -> AccessResult<Option<Relationship>> {
        let me = self.whoami().await?;
        if &me == feed {
            return Ok(None);
        }

        let edge = json!({ "source": me.as_str(), "dest": feed.as_str() });
        let following: bool = self
            .facade
            .call(methods::FRIENDS_IS_FOLLOWING, edge.clone())
            .await?;
        let blocking: bool = self.facade.call(methods::FRIENDS_IS_BLOCKING, edge).await?;

        Ok(Some(Relationship {
            following,
            blocking,
        }))
    }

    /// Whether the author opted into having public messages shown on the web
    pub async fn public_web_hosting(&self, feed: &FeedId) -> AccessResult<bool> {
        let value = self.social_value(feed, "publicWebHosting").await?;
        Ok(value == Value::Bool(true))
    }

    /// Log store status, passed through as-is
    pub async fn status(&self) -> AccessResult<Value> {
        self.facade.call_value(methods::STATUS, Value::Null).await
    }

    /// Current peer list: the first snapshot of the never-ending `conn.peers` stream
    pub async fn peers(&self) -> AccessResult<Value> {
        let mut snapshots = self.facade.stream(methods::CONN_PEERS, Value::Null).await?;
        match snapshots.next().await {
            Some(snapshot) => snapshot,
            None => Ok(Value::Array(Vec::new())),
        }
    }

    /// Blob contents; a missing blob is requested from peers before reporting `NotFound`
    pub async fn blob(&self, id: &BlobId) -> AccessResult<Vec<u8>> {
        match self.read_blob(id).await {
            Err(e) if e.is_not_found() => {
                if let Err(want_err) = self.want(id).await {
                    debug!(%id, error = %want_err, "Failed to request missing blob");
                }
                Err(AccessError::NotFound(id.to_string()))
            }
            other => other,
        }
    }

    /// Ask the log store to fetch `id` from peers; true when already held
    pub async fn want(&self, id: &BlobId) -> AccessResult<bool> {
        self.facade
            .call(methods::BLOBS_WANT, json!({ "id": id.as_str() }))
            .await
    }

    async fn read_blob(&self, id: &BlobId) -> AccessResult<Vec<u8>> {
        let mut chunks = self
            .facade
            .stream(methods::BLOBS_GET, json!({ "id": id.as_str() }))
            .await?;

        let mut bytes = Vec::new();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            let encoded = chunk
                .as_str()
                .ok_or_else(|| AccessError::Decode(format!("blob chunk for {} is not a string", id)))?;
            let decoded = STANDARD
                .decode(encoded)
                .map_err(|e| AccessError::Decode(format!("blob chunk for {}: {}", id, e)))?;
            bytes.extend_from_slice(&decoded);
        }
        Ok(bytes)
    }

    async fn social_value(&self, feed: &FeedId, key: &str) -> AccessResult<Value> {
        self.facade
            .call_value(
                methods::ABOUT_SOCIAL_VALUE,
                json!({ "key": key, "dest": feed.as_str() }),
            )
            .await
    }
}

/// Interpret a `names.getImageFor` answer: a bare blob id or a `{ link }` object
fn image_from(raw: &Value) -> BlobId {
    let link = match raw {
        Value::String(link) => Some(link.as_str()),
        Value::Object(_) => raw.get("link").and_then(Value::as_str),
        _ => None,
    };
    link.and_then(|link| BlobId::parse(link).ok())
        .unwrap_or_else(BlobId::null_image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLogStore;
    use crate::privacy::GateMode;
    use crate::test_utils::{blob, feed, local_store};
    use std::sync::Arc;

    #[test]
    fn test_image_fallbacks() {
        assert_eq!(image_from(&Value::Null), BlobId::null_image());
        assert_eq!(image_from(&json!({"link": null})), BlobId::null_image());
        assert_eq!(image_from(&json!({"link": "&broken"})), BlobId::null_image());
        assert_eq!(image_from(&json!(42)), BlobId::null_image());
        assert_eq!(image_from(&json!({"link": blob(1).as_str()})), blob(1));
        assert_eq!(image_from(&json!(blob(2).as_str())), blob(2));
    }

    #[tokio::test]
    async fn test_profile_queries() {
        let memory = Arc::new(MemoryLogStore::new(feed(1)));
        memory.set_about(&feed(2), "name", json!("bob")).await;
        memory.set_about(&feed(2), "description", json!("likes boats")).await;
        memory.set_about(&feed(2), "image", json!({"link": blob(5).as_str()})).await;
        let store = local_store(memory, GateMode::Peer, 10);

        assert_eq!(store.whoami().await.unwrap(), feed(1));
        assert_eq!(store.name(&feed(2)).await.unwrap(), "bob");
        assert_eq!(store.name(&feed(3)).await.unwrap(), feed(3).to_string());
        assert_eq!(store.image(&feed(2)).await.unwrap(), blob(5));
        assert_eq!(store.image(&feed(3)).await.unwrap(), BlobId::null_image());
        assert_eq!(
            store.description(&feed(2)).await.unwrap().as_deref(),
            Some("likes boats")
        );
        assert_eq!(store.description(&feed(3)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_relationship() {
        let memory = Arc::new(MemoryLogStore::new(feed(1)));
        memory.follow(&feed(1), &feed(2)).await;
        memory.block(&feed(1), &feed(3)).await;
        let store = local_store(memory, GateMode::Peer, 10);

        assert_eq!(store.relationship(&feed(1)).await.unwrap(), None);
        assert_eq!(
            store.relationship(&feed(2)).await.unwrap(),
            Some(Relationship { following: true, blocking: false })
        );
        assert_eq!(
            store.relationship(&feed(3)).await.unwrap(),
            Some(Relationship { following: false, blocking: true })
        );
        assert!(store.relationship(&feed(4)).await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hosting_consent_requires_literal_true() {
        let memory = Arc::new(MemoryLogStore::new(feed(1)));
        memory.set_about(&feed(2), "publicWebHosting", json!(true)).await;
        memory.set_about(&feed(3), "publicWebHosting", json!("yes")).await;
        let store = local_store(memory, GateMode::PublicWeb, 10);

        assert!(store.public_web_hosting(&feed(2)).await.unwrap());
        assert!(!store.public_web_hosting(&feed(3)).await.unwrap());
        assert!(!store.public_web_hosting(&feed(4)).await.unwrap());
    }

    #[tokio::test]
    async fn test_peers_takes_first_snapshot() {
        let memory = Arc::new(MemoryLogStore::new(feed(1)));
        memory.set_peers(json!([["net:10.0.0.1:8008", {"state": "connected"}]])).await;
        let store = local_store(memory, GateMode::Peer, 10);

        let peers = store.peers().await.unwrap();
        assert_eq!(peers[0][0], "net:10.0.0.1:8008");
    }

    #[tokio::test]
    async fn test_blob_found_and_missing() {
        let memory = Arc::new(MemoryLogStore::new(feed(1)));
        let id = memory.add_blob(b"hello blob".to_vec()).await;
        let store = local_store(memory.clone(), GateMode::Peer, 10);

        assert_eq!(store.blob(&id).await.unwrap(), b"hello blob".to_vec());

        let missing = blob(9);
        assert!(store.blob(&missing).await.unwrap_err().is_not_found());
        assert_eq!(memory.wanted().await, vec![missing]);
    }
}
