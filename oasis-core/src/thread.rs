/*
    ThreadEngine - reassemble conversations from the flat log

    Workflow for thread(key):

    1. Fetch the target and resolve the effective root:
        - root and fork both set: the target heads a forked sub-thread and
          is its own root
        - root only: fetch that root
        - neither: the target is the root
    2. Fetch every message whose `root` is the effective root's key
    3. Drop duplicates (first occurrence wins, the root never repeats),
       sort replies ascending by (timestamp, key), append the root last
    4. Gate each entry for the viewer

    Reply records that fail to decode are skipped and counted; failures to
    resolve the root propagate.
*/

use std::collections::HashSet;
use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use tracing::debug;

use crate::error::{AccessError, AccessResult};
use crate::model::{GatedMessage, Message, MsgKey};
use crate::privacy::Viewer;
use crate::store::MessageStore;

/// Where a message's thread is anchored
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootResolution {
    /// The message is the root of what should be rendered
    Itself,
    /// The thread is rooted at an ancestor that must be fetched
    Ancestor(MsgKey),
}

pub fn resolve_root(target: &Message) -> RootResolution {
    match (target.root(), target.fork()) {
        (Some(_), Some(_)) => RootResolution::Itself,
        (Some(root), None) => RootResolution::Ancestor(root),
        (None, _) => RootResolution::Itself,
    }
}

/// Order a reply set for display: deduplicated, ascending, root last
pub fn assemble(root: Message, replies: Vec<Message>) -> Vec<Message> {
    let mut seen: HashSet<MsgKey> = HashSet::new();
    seen.insert(root.key.clone());

    let mut ordered: Vec<Message> = replies
        .into_iter()
        .filter(|reply| seen.insert(reply.key.clone()))
        .collect();
    ordered.sort_by(|a, b| {
        a.timestamp
            .total_cmp(&b.timestamp)
            .then_with(|| a.key.cmp(&b.key))
    });
    ordered.push(root);
    ordered
}

/// A reconstructed conversation; never cached
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Thread {
    pub root: MsgKey,
    /// Replies ascending, root last
    pub messages: Vec<GatedMessage>,
    /// Replies dropped because their records could not be decoded
    pub skipped: usize,
}

/// What a compose form for a comment shows alongside the text box
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentContext {
    pub parent: GatedMessage,
    pub root: MsgKey,
    /// The full thread under `root`, root last
    pub messages: Vec<GatedMessage>,
}

pub struct ThreadEngine {
    store: Arc<MessageStore>,
}

impl ThreadEngine {
    pub fn new(store: Arc<MessageStore>) -> Self {
        Self { store }
    }

    pub async fn thread(&self, key: &MsgKey, viewer: &Viewer) -> AccessResult<Thread> {
        let target = self.store.raw_get(key).await?;
        let root = self.effective_root(target).await?;
        let root_key = root.key.clone();
        let (messages, skipped) = self.collect(root, viewer).await?;

        Ok(Thread {
            root: root_key,
            messages,
            skipped,
        })
    }

    /// Parent plus the thread it belongs to, for composing a comment
    pub async fn comment_context(&self, parent: &MsgKey, viewer: &Viewer) -> AccessResult<CommentContext> {
        let parent = self.store.raw_get(parent).await?;
        let root = self.effective_root(parent.clone()).await?;
        let root_key = root.key.clone();
        let (messages, _) = self.collect(root, viewer).await?;

        let parent_key = parent.key.clone();
        let parent = self
            .store
            .gate_all(vec![parent], viewer)
            .await
            .pop()
            .ok_or(AccessError::NotFound(parent_key.to_string()))?;

        Ok(CommentContext {
            parent,
            root: root_key,
            messages,
        })
    }

    /// Context for a direct reply: just the parent
    pub async fn reply_context(&self, parent: &MsgKey, viewer: &Viewer) -> AccessResult<Vec<GatedMessage>> {
        Ok(vec![self.store.get(parent, viewer).await?])
    }

    async fn effective_root(&self, target: Message) -> AccessResult<Message> {
        match resolve_root(&target) {
            RootResolution::Itself => Ok(target),
            RootResolution::Ancestor(root) => {
                debug!(target = %target.key, %root, "Resolving thread root");
                self.store.raw_get(&root).await
            }
        }
    }

    async fn collect(&self, root: Message, viewer: &Viewer) -> AccessResult<(Vec<GatedMessage>, usize)> {
        let (replies, skipped) = self.store.fetch_replies(&root.key).await?;
        if skipped > 0 {
            counter!("oasis_thread_replies_skipped_total").increment(skipped as u64);
        }

        let root_key = root.key.clone();
        let ordered = assemble(root, replies);
        debug!(root = %root_key, messages = ordered.len(), skipped, "Reconstructed thread");
        Ok((self.store.gate_all(ordered, viewer).await, skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLogStore;
    use crate::model::PRIVATE_PLACEHOLDER;
    use crate::privacy::GateMode;
    use crate::test_utils::{feed, local_store, msg_key, MessageBuilder};
    use proptest::prelude::*;

    fn engine(memory: Arc<MemoryLogStore>) -> ThreadEngine {
        ThreadEngine::new(Arc::new(local_store(memory, GateMode::Peer, 50)))
    }

    fn keys(messages: &[GatedMessage]) -> Vec<MsgKey> {
        messages.iter().map(|m| m.key().clone()).collect()
    }

    #[test]
    fn test_resolve_root_precedence() {
        let top = MessageBuilder::new(1, feed(1)).build();
        assert_eq!(resolve_root(&top), RootResolution::Itself);

        let reply = MessageBuilder::new(2, feed(1)).root(&msg_key(1)).build();
        assert_eq!(resolve_root(&reply), RootResolution::Ancestor(msg_key(1)));

        let forked = MessageBuilder::new(3, feed(1))
            .root(&msg_key(2))
            .fork(&msg_key(1))
            .build();
        assert_eq!(resolve_root(&forked), RootResolution::Itself);
    }

    #[tokio::test]
    async fn test_reply_thread_is_reply_then_root() {
        let memory = Arc::new(MemoryLogStore::new(feed(1)));
        memory.insert(MessageBuilder::new(1, feed(1)).text("A").build()).await;
        memory
            .insert(MessageBuilder::new(2, feed(2)).root(&msg_key(1)).text("B").build())
            .await;

        let thread = engine(memory).thread(&msg_key(2), &Viewer::Anonymous).await.unwrap();
        assert_eq!(thread.root, msg_key(1));
        assert_eq!(keys(&thread.messages), vec![msg_key(2), msg_key(1)]);
        assert_eq!(thread.skipped, 0);
    }

    #[tokio::test]
    async fn test_root_without_replies() {
        let memory = Arc::new(MemoryLogStore::new(feed(1)));
        memory.insert(MessageBuilder::new(1, feed(1)).build()).await;

        let thread = engine(memory).thread(&msg_key(1), &Viewer::Anonymous).await.unwrap();
        assert_eq!(keys(&thread.messages), vec![msg_key(1)]);
    }

    #[tokio::test]
    async fn test_replies_sorted_by_timestamp() {
        let memory = Arc::new(MemoryLogStore::new(feed(1)));
        memory.insert(MessageBuilder::new(1, feed(1)).build()).await;
        // Received out of order.
        memory
            .insert(MessageBuilder::new(3, feed(2)).root(&msg_key(1)).build())
            .await;
        memory
            .insert(MessageBuilder::new(2, feed(3)).root(&msg_key(1)).build())
            .await;

        let thread = engine(memory).thread(&msg_key(1), &Viewer::Anonymous).await.unwrap();
        assert_eq!(keys(&thread.messages), vec![msg_key(2), msg_key(3), msg_key(1)]);
    }

    #[tokio::test]
    async fn test_forked_target_heads_its_own_thread() {
        let memory = Arc::new(MemoryLogStore::new(feed(1)));
        memory.insert(MessageBuilder::new(1, feed(1)).build()).await;
        memory
            .insert(MessageBuilder::new(2, feed(2)).root(&msg_key(1)).build())
            .await;
        memory
            .insert(
                MessageBuilder::new(3, feed(2))
                    .root(&msg_key(1))
                    .fork(&msg_key(2))
                    .build(),
            )
            .await;
        memory
            .insert(MessageBuilder::new(4, feed(3)).root(&msg_key(3)).build())
            .await;

        let thread = engine(memory).thread(&msg_key(3), &Viewer::Anonymous).await.unwrap();
        assert_eq!(thread.root, msg_key(3));
        assert_eq!(keys(&thread.messages), vec![msg_key(4), msg_key(3)]);
    }

    #[tokio::test]
    async fn test_fork_appears_once_in_parent_thread() {
        let memory = Arc::new(MemoryLogStore::new(feed(1)));
        memory.insert(MessageBuilder::new(1, feed(1)).text("M").build()).await;
        memory
            .insert(MessageBuilder::new(2, feed(2)).root(&msg_key(1)).text("N").build())
            .await;
        memory
            .insert(
                MessageBuilder::new(3, feed(3))
                    .root(&msg_key(1))
                    .fork(&msg_key(2))
                    .text("P")
                    .build(),
            )
            .await;

        let thread = engine(memory).thread(&msg_key(1), &Viewer::Anonymous).await.unwrap();
        assert_eq!(thread.root, msg_key(1));
        assert_eq!(keys(&thread.messages), vec![msg_key(2), msg_key(3), msg_key(1)]);
    }

    #[tokio::test]
    async fn test_private_reply_redacted_not_dropped() {
        let memory = Arc::new(MemoryLogStore::new(feed(1)));
        memory.insert(MessageBuilder::new(1, feed(1)).build()).await;
        memory
            .insert(
                MessageBuilder::new(2, feed(2))
                    .root(&msg_key(1))
                    .private_to(&[feed(4)])
                    .text("psst")
                    .build(),
            )
            .await;

        let thread = engine(memory).thread(&msg_key(1), &Viewer::Identity(feed(5))).await.unwrap();
        assert_eq!(keys(&thread.messages), vec![msg_key(2), msg_key(1)]);
        match &thread.messages[0] {
            GatedMessage::Redacted(redacted) => assert_eq!(redacted.placeholder, PRIVATE_PLACEHOLDER),
            other => panic!("expected redaction, got {:?}", other),
        }
        assert!(!thread.messages[1].is_redacted());
    }

    #[tokio::test]
    async fn test_redacted_root_still_builds() {
        let memory = Arc::new(MemoryLogStore::new(feed(1)));
        memory
            .insert(MessageBuilder::new(1, feed(1)).private_to(&[feed(2)]).build())
            .await;
        memory
            .insert(MessageBuilder::new(2, feed(3)).root(&msg_key(1)).build())
            .await;

        let thread = engine(memory).thread(&msg_key(2), &Viewer::Anonymous).await.unwrap();
        assert_eq!(thread.root, msg_key(1));
        assert!(thread.messages.last().unwrap().is_redacted());
    }

    #[tokio::test]
    async fn test_missing_root_propagates() {
        let memory = Arc::new(MemoryLogStore::new(feed(1)));
        memory
            .insert(MessageBuilder::new(2, feed(2)).root(&msg_key(1)).build())
            .await;

        let err = engine(memory).thread(&msg_key(2), &Viewer::Anonymous).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_comment_context() {
        let memory = Arc::new(MemoryLogStore::new(feed(1)));
        memory.insert(MessageBuilder::new(1, feed(1)).build()).await;
        memory
            .insert(MessageBuilder::new(2, feed(2)).root(&msg_key(1)).build())
            .await;
        memory
            .insert(MessageBuilder::new(3, feed(3)).root(&msg_key(1)).build())
            .await;

        let context = engine(memory)
            .comment_context(&msg_key(2), &Viewer::Anonymous)
            .await
            .unwrap();
        assert_eq!(context.parent.key(), &msg_key(2));
        assert_eq!(context.root, msg_key(1));
        assert_eq!(keys(&context.messages), vec![msg_key(2), msg_key(3), msg_key(1)]);
    }

    #[tokio::test]
    async fn test_reply_context_is_parent_only() {
        let memory = Arc::new(MemoryLogStore::new(feed(1)));
        memory.insert(MessageBuilder::new(1, feed(1)).build()).await;
        memory
            .insert(MessageBuilder::new(2, feed(2)).root(&msg_key(1)).build())
            .await;

        let context = engine(memory)
            .reply_context(&msg_key(2), &Viewer::Anonymous)
            .await
            .unwrap();
        assert_eq!(keys(&context), vec![msg_key(2)]);
    }

    fn reply_set() -> impl Strategy<Value = Vec<(u32, u32)>> {
        // (key index, timestamp); small key range forces duplicates
        prop::collection::vec((2u32..12, 0u32..5), 0..20)
    }

    proptest! {
        #[test]
        fn prop_assemble_dedups_orders_and_keeps_root_last(entries in reply_set(), root_in_replies in any::<bool>()) {
            let root = MessageBuilder::new(1, feed(1)).build();
            let mut replies: Vec<Message> = entries
                .iter()
                .map(|(n, ts)| {
                    MessageBuilder::new(*n, feed(2))
                        .root(&root.key)
                        .timestamp(*ts as f64)
                        .build()
                })
                .collect();
            if root_in_replies {
                replies.push(root.clone());
            }

            let expected: HashSet<MsgKey> = replies
                .iter()
                .map(|m| m.key.clone())
                .chain(std::iter::once(root.key.clone()))
                .collect();

            let thread = assemble(root.clone(), replies);

            let keys: Vec<MsgKey> = thread.iter().map(|m| m.key.clone()).collect();
            let unique: HashSet<MsgKey> = keys.iter().cloned().collect();
            prop_assert_eq!(unique.len(), keys.len());
            prop_assert_eq!(unique, expected);
            prop_assert_eq!(&thread.last().unwrap().key, &root.key);

            let body = &thread[..thread.len() - 1];
            for pair in body.windows(2) {
                prop_assert!(
                    (pair[0].timestamp, &pair[0].key) <= (pair[1].timestamp, &pair[1].key)
                );
            }
        }
    }
}
