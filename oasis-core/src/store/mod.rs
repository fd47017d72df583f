/*
    MessageStore - typed access to the log store

    Every read returns messages already passed through the privacy gate for
    the given viewer. Lists are bounded by the configured page size and
    pulled lazily from the remote stream, so the log store never has to
    produce more than one page.

    Records that fail to decode are skipped and counted rather than failing
    the whole list; errors reported by the log store itself propagate.
*/

pub mod mentions;
pub mod publish;
pub mod social;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::StreamExt;
use metrics::counter;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{AccessError, AccessResult};
use crate::facade::RequestFacade;
use crate::model::{FeedId, GatedMessage, Message, MsgKey};
use crate::privacy::{PrivacyGate, Viewer};
use crate::rpc::{methods, Method};

pub use mentions::extract_mentions;
pub use social::Relationship;

/// Which half of the log `latest` reads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatestFilter {
    pub private: bool,
}

/// Window for ranking popular messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Day,
    Week,
    Month,
    Year,
}

impl Period {
    pub fn duration(&self) -> Duration {
        const DAY: u64 = 24 * 60 * 60;
        match self {
            Period::Day => Duration::from_secs(DAY),
            Period::Week => Duration::from_secs(7 * DAY),
            Period::Month => Duration::from_secs(30 * DAY),
            Period::Year => Duration::from_secs(365 * DAY),
        }
    }
}

impl FromStr for Period {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(Period::Day),
            "week" => Ok(Period::Week),
            "month" => Ok(Period::Month),
            "year" => Ok(Period::Year),
            other => Err(AccessError::InvalidReference(format!("unknown period: {}", other))),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Year => "year",
        };
        f.write_str(name)
    }
}

pub(crate) fn now_millis() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as f64)
        .unwrap_or_default()
}

fn filter_query(filter: Value) -> Value {
    json!([{ "$filter": filter }])
}

pub struct MessageStore {
    facade: Arc<RequestFacade>,
    gate: PrivacyGate,
    page_size: usize,
}

impl MessageStore {
    pub fn new(facade: Arc<RequestFacade>, gate: PrivacyGate, page_size: usize) -> Self {
        Self {
            facade,
            gate,
            page_size: page_size.max(1),
        }
    }

    pub fn facade(&self) -> &Arc<RequestFacade> {
        &self.facade
    }

    pub fn gate(&self) -> &PrivacyGate {
        &self.gate
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// One message, gated for `viewer`
    pub async fn get(&self, key: &MsgKey, viewer: &Viewer) -> AccessResult<GatedMessage> {
        let message = self.raw_get(key).await?;
        let mut gated = self.gate_all(vec![message], viewer).await;
        gated
            .pop()
            .ok_or_else(|| AccessError::NotFound(key.to_string()))
    }

    /// Newest posts first, public or private per `filter`
    pub async fn latest(&self, filter: LatestFilter, viewer: &Viewer) -> AccessResult<Vec<GatedMessage>> {
        let args = json!({ "reverse": true, "private": filter.private });
        let messages = self
            .collect_messages(methods::CREATE_LOG_STREAM, args, Some(self.page_size), |m| {
                m.content_type() == Some("post") && m.is_private() == filter.private
            })
            .await?;
        Ok(self.gate_all(messages, viewer).await)
    }

    /// Newest first, messages authored by `feed`
    pub async fn from_author(&self, feed: &FeedId, viewer: &Viewer) -> AccessResult<Vec<GatedMessage>> {
        let args = json!({ "id": feed.as_str(), "reverse": true, "private": true });
        let messages = self
            .collect_messages(methods::CREATE_USER_STREAM, args, Some(self.page_size), |m| {
                m.content_type() == Some("post")
            })
            .await?;
        Ok(self.gate_all(messages, viewer).await)
    }

    /// Newest first, posts in `channel` (leading `#` optional)
    pub async fn from_hashtag(&self, channel: &str, viewer: &Viewer) -> AccessResult<Vec<GatedMessage>> {
        let channel = channel.trim_start_matches('#');
        let args = json!({
            "query": filter_query(json!({ "value": { "content": { "channel": channel } } })),
            "reverse": true,
        });
        let messages = self
            .collect_messages(methods::QUERY_READ, args, Some(self.page_size), |_| true)
            .await?;
        Ok(self.gate_all(messages, viewer).await)
    }

    /// Full-text search; the remote index is case-sensitive, so the query is folded first
    pub async fn search(&self, query: &str, viewer: &Viewer) -> AccessResult<Vec<GatedMessage>> {
        let folded = query.to_lowercase();
        let args = json!({ "query": folded });
        let messages = self
            .collect_messages(methods::SEARCH_QUERY, args, Some(self.page_size), |_| true)
            .await?;
        Ok(self.gate_all(messages, viewer).await)
    }

    /// Messages with the most positive votes cast within `period`
    pub async fn popular(&self, period: Period, viewer: &Viewer) -> AccessResult<Vec<GatedMessage>> {
        let cutoff = now_millis() - period.duration().as_millis() as f64;
        self.popular_since(cutoff, viewer).await
    }

    /// Ranking behind [`popular`](Self::popular) for an explicit cutoff (ms since epoch)
    pub async fn popular_since(&self, cutoff: f64, viewer: &Viewer) -> AccessResult<Vec<GatedMessage>> {
        let args = json!({
            "query": filter_query(json!({
                "value": {
                    "timestamp": { "$gte": cutoff },
                    "content": { "type": "vote" },
                }
            })),
        });
        let votes = self.collect_messages(methods::QUERY_READ, args, None, |_| true).await?;

        // Only a voter's latest vote on a message counts.
        let mut latest: HashMap<(FeedId, MsgKey), (i64, f64)> = HashMap::new();
        for message in &votes {
            let Some(vote) = message.vote() else { continue };
            let cast_at = message.value.timestamp;
            let slot = latest
                .entry((message.author().clone(), vote.link))
                .or_insert((vote.value, cast_at));
            if cast_at >= slot.1 {
                *slot = (vote.value, cast_at);
            }
        }

        let mut tally: HashMap<MsgKey, (usize, f64)> = HashMap::new();
        for ((_, link), (value, cast_at)) in latest {
            if value > 0 {
                let entry = tally.entry(link).or_insert((0, cast_at));
                entry.0 += 1;
                entry.1 = entry.1.max(cast_at);
            }
        }

        let mut ranked: Vec<(MsgKey, (usize, f64))> = tally.into_iter().collect();
        ranked.sort_by(|(a_key, (a_count, a_at)), (b_key, (b_count, b_at))| {
            b_count
                .cmp(a_count)
                .then(b_at.total_cmp(a_at))
                .then(a_key.cmp(b_key))
        });

        let keys: Vec<MsgKey> = ranked
            .into_iter()
            .map(|(key, _)| key)
            .take(self.page_size)
            .collect();
        let messages = self.fetch_existing(keys).await?;
        Ok(self.gate_all(messages, viewer).await)
    }

    /// Private messages readable by the local identity
    pub async fn inbox(&self, viewer: &Viewer) -> AccessResult<Vec<GatedMessage>> {
        let me = self.whoami().await?;
        let args = json!({
            "query": filter_query(json!({ "value": { "meta": { "private": true } } })),
            "private": true,
            "reverse": true,
        });
        let messages = self
            .collect_messages(methods::QUERY_READ, args, Some(self.page_size), |m| {
                m.is_private() && (m.author() == &me || m.recipients().contains(&me))
            })
            .await?;
        Ok(self.gate_all(messages, viewer).await)
    }

    /// Posts whose `mentions` link the local identity
    pub async fn mentions(&self, viewer: &Viewer) -> AccessResult<Vec<GatedMessage>> {
        let me = self.whoami().await?;
        let args = json!({
            "query": filter_query(json!({ "value": { "content": { "type": "post" } } })),
            "private": true,
            "reverse": true,
        });
        let messages = self
            .collect_messages(methods::QUERY_READ, args, Some(self.page_size), |m| {
                m.author() != &me && m.mentions_feed(&me)
            })
            .await?;
        Ok(self.gate_all(messages, viewer).await)
    }

    /// Messages `feed` currently likes, most recent vote first
    pub async fn likes(&self, feed: &FeedId, viewer: &Viewer) -> AccessResult<Vec<GatedMessage>> {
        let args = json!({ "id": feed.as_str(), "reverse": true });
        let votes = self
            .collect_messages(methods::CREATE_USER_STREAM, args, None, |m| m.vote().is_some())
            .await?;

        // Newest first, so the first vote seen for a link is the one in force.
        let mut seen: Vec<MsgKey> = Vec::new();
        let mut liked: Vec<MsgKey> = Vec::new();
        for vote in votes.iter().filter_map(Message::vote) {
            if seen.contains(&vote.link) {
                continue;
            }
            seen.push(vote.link.clone());
            if vote.value > 0 {
                liked.push(vote.link);
            }
            if liked.len() >= self.page_size {
                break;
            }
        }

        let messages = self.fetch_existing(liked).await?;
        Ok(self.gate_all(messages, viewer).await)
    }

    /// Every message whose `root` is `root`, in log order
    pub async fn thread_replies(&self, root: &MsgKey, viewer: &Viewer) -> AccessResult<Vec<GatedMessage>> {
        let (replies, _) = self.fetch_replies(root).await?;
        Ok(self.gate_all(replies, viewer).await)
    }

    /// Ungated fetch of a single message
    pub(crate) async fn raw_get(&self, key: &MsgKey) -> AccessResult<Message> {
        self.facade
            .call(
                methods::GET,
                json!({ "id": key.as_str(), "meta": true, "private": true }),
            )
            .await
    }

    /// Ungated reply set of `root`, plus how many records could not be decoded
    pub(crate) async fn fetch_replies(&self, root: &MsgKey) -> AccessResult<(Vec<Message>, usize)> {
        let args = json!({
            "query": filter_query(json!({ "value": { "content": { "root": root.as_str() } } })),
            "private": true,
        });
        let mut records = self.facade.stream(methods::QUERY_READ, args).await?;

        let mut replies = Vec::new();
        let mut skipped = 0;
        while let Some(record) = records.next().await {
            match serde_json::from_value::<Message>(record?) {
                Ok(message) => replies.push(message),
                Err(e) => {
                    skipped += 1;
                    warn!(%root, error = %e, "Skipping undecodable reply");
                }
            }
        }
        Ok((replies, skipped))
    }

    /// Gate each message; public-web consent is looked up once per author
    pub(crate) async fn gate_all(&self, messages: Vec<Message>, viewer: &Viewer) -> Vec<GatedMessage> {
        let mut consent: HashMap<FeedId, bool> = HashMap::new();
        let mut gated = Vec::with_capacity(messages.len());

        for message in messages {
            let hosting = if self.gate.needs_hosting_consent(&message) {
                match consent.get(message.author()) {
                    Some(known) => *known,
                    None => {
                        let author = message.author().clone();
                        let allowed = match self.public_web_hosting(&author).await {
                            Ok(allowed) => allowed,
                            Err(e) => {
                                warn!(%author, error = %e, "Could not read hosting consent, redacting");
                                false
                            }
                        };
                        consent.insert(author, allowed);
                        allowed
                    }
                }
            } else {
                false
            };
            gated.push(self.gate.gate(message, viewer, hosting));
        }
        gated
    }

    /// Fetch `keys` in order, dropping ones the log store does not have
    async fn fetch_existing(&self, keys: Vec<MsgKey>) -> AccessResult<Vec<Message>> {
        let mut messages = Vec::with_capacity(keys.len());
        for key in keys {
            match self.raw_get(&key).await {
                Ok(message) => messages.push(message),
                Err(e) if e.is_not_found() => debug!(%key, "Referenced message not available"),
                Err(e) => return Err(e),
            }
        }
        Ok(messages)
    }

    /// Pull decoded messages passing `keep` until `limit` are gathered or the stream ends
    async fn collect_messages<F>(
        &self,
        method: Method,
        args: Value,
        limit: Option<usize>,
        keep: F,
    ) -> AccessResult<Vec<Message>>
    where
        F: Fn(&Message) -> bool,
    {
        let mut records = self.facade.stream(method, args).await?;
        let mut messages = Vec::new();

        while let Some(record) = records.next().await {
            let message = match serde_json::from_value::<Message>(record?) {
                Ok(message) => message,
                Err(e) => {
                    counter!("oasis_records_skipped_total", "method" => method.as_str()).increment(1);
                    warn!(%method, error = %e, "Skipping undecodable record");
                    continue;
                }
            };
            if !keep(&message) {
                continue;
            }
            messages.push(message);
            if limit.is_some_and(|limit| messages.len() >= limit) {
                break;
            }
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLogStore;
    use crate::privacy::GateMode;
    use crate::test_utils::{feed, local_store as store_over, msg_key, MessageBuilder};

    fn keys(messages: &[GatedMessage]) -> Vec<MsgKey> {
        messages.iter().map(|m| m.key().clone()).collect()
    }

    #[tokio::test]
    async fn test_get_gates_private_message() {
        let memory = Arc::new(MemoryLogStore::new(feed(1)));
        memory
            .insert(MessageBuilder::new(1, feed(1)).private_to(&[feed(2)]).build())
            .await;
        let store = store_over(memory, GateMode::Peer, 10);

        let outsider = store.get(&msg_key(1), &Viewer::Identity(feed(3))).await.unwrap();
        assert!(outsider.is_redacted());

        let recipient = store.get(&msg_key(1), &Viewer::Identity(feed(2))).await.unwrap();
        assert!(!recipient.is_redacted());

        let missing = store.get(&msg_key(2), &Viewer::Anonymous).await.unwrap_err();
        assert!(missing.is_not_found());
    }

    #[tokio::test]
    async fn test_latest_is_newest_first_and_paged() {
        let memory = Arc::new(MemoryLogStore::new(feed(1)));
        for n in 1..=5 {
            memory.insert(MessageBuilder::new(n, feed(1)).build()).await;
        }
        memory
            .insert(MessageBuilder::new(6, feed(1)).private_to(&[feed(2)]).build())
            .await;
        let store = store_over(memory, GateMode::Peer, 3);

        let public = store.latest(LatestFilter { private: false }, &Viewer::Anonymous).await.unwrap();
        assert_eq!(keys(&public), vec![msg_key(5), msg_key(4), msg_key(3)]);

        let private = store
            .latest(LatestFilter { private: true }, &Viewer::Identity(feed(1)))
            .await
            .unwrap();
        assert_eq!(keys(&private), vec![msg_key(6)]);
    }

    #[tokio::test]
    async fn test_from_author_and_hashtag() {
        let memory = Arc::new(MemoryLogStore::new(feed(1)));
        memory.insert(MessageBuilder::new(1, feed(1)).channel("rust").build()).await;
        memory.insert(MessageBuilder::new(2, feed(2)).channel("go").build()).await;
        memory.insert(MessageBuilder::new(3, feed(1)).channel("rust").build()).await;
        let store = store_over(memory, GateMode::Peer, 10);

        let authored = store.from_author(&feed(1), &Viewer::Anonymous).await.unwrap();
        assert_eq!(keys(&authored), vec![msg_key(3), msg_key(1)]);

        let tagged = store.from_hashtag("#rust", &Viewer::Anonymous).await.unwrap();
        assert_eq!(keys(&tagged), vec![msg_key(3), msg_key(1)]);
    }

    #[tokio::test]
    async fn test_search_folds_case() {
        let memory = Arc::new(MemoryLogStore::new(feed(1)));
        memory.insert(MessageBuilder::new(1, feed(1)).text("all about rust").build()).await;
        let store = store_over(memory, GateMode::Peer, 10);

        let found = store.search("RUST", &Viewer::Anonymous).await.unwrap();
        assert_eq!(keys(&found), vec![msg_key(1)]);
    }

    #[tokio::test]
    async fn test_popular_ranks_by_positive_votes() {
        let memory = Arc::new(MemoryLogStore::new(feed(1)));
        let now = now_millis();
        memory.insert(MessageBuilder::new(1, feed(1)).timestamp(now).build()).await;
        memory.insert(MessageBuilder::new(2, feed(1)).timestamp(now).build()).await;

        // Two likes for 2, one for 1, and feed(4) takes its like of 1 back.
        let votes = [
            (10, feed(2), msg_key(2), 1),
            (11, feed(3), msg_key(2), 1),
            (12, feed(2), msg_key(1), 1),
            (13, feed(4), msg_key(1), 1),
            (14, feed(4), msg_key(1), 0),
        ];
        for (n, voter, link, value) in votes {
            memory
                .insert(
                    MessageBuilder::new(n, voter)
                        .timestamp(now + n as f64)
                        .vote(&link, value)
                        .build(),
                )
                .await;
        }
        // Outside the window.
        memory
            .insert(
                MessageBuilder::new(20, feed(5))
                    .timestamp(1000.0)
                    .vote(&msg_key(1), 1)
                    .build(),
            )
            .await;

        let store = store_over(memory, GateMode::Peer, 10);
        let ranked = store.popular(Period::Day, &Viewer::Anonymous).await.unwrap();
        assert_eq!(keys(&ranked), vec![msg_key(2), msg_key(1)]);
    }

    #[tokio::test]
    async fn test_popular_skips_missing_targets() {
        let memory = Arc::new(MemoryLogStore::new(feed(1)));
        memory
            .insert(MessageBuilder::new(1, feed(2)).vote(&msg_key(99), 1).build())
            .await;
        let store = store_over(memory, GateMode::Peer, 10);

        let ranked = store.popular_since(0.0, &Viewer::Anonymous).await.unwrap();
        assert!(ranked.is_empty());
    }

    #[tokio::test]
    async fn test_inbox_and_mentions() {
        let memory = Arc::new(MemoryLogStore::new(feed(1)));
        memory
            .insert(MessageBuilder::new(1, feed(2)).private_to(&[feed(1)]).build())
            .await;
        memory
            .insert(MessageBuilder::new(2, feed(2)).private_to(&[feed(3)]).build())
            .await;
        memory.insert(MessageBuilder::new(3, feed(2)).mention(&feed(1)).build()).await;
        memory.insert(MessageBuilder::new(4, feed(2)).mention(&feed(3)).build()).await;
        let store = store_over(memory, GateMode::Peer, 10);
        let me = Viewer::Identity(feed(1));

        assert_eq!(keys(&store.inbox(&me).await.unwrap()), vec![msg_key(1)]);
        assert_eq!(keys(&store.mentions(&me).await.unwrap()), vec![msg_key(3)]);
    }

    #[tokio::test]
    async fn test_likes_follow_latest_vote() {
        let memory = Arc::new(MemoryLogStore::new(feed(1)));
        memory.insert(MessageBuilder::new(1, feed(1)).build()).await;
        memory.insert(MessageBuilder::new(2, feed(1)).build()).await;
        memory.insert(MessageBuilder::new(10, feed(2)).vote(&msg_key(1), 1).build()).await;
        memory.insert(MessageBuilder::new(11, feed(2)).vote(&msg_key(2), 1).build()).await;
        memory.insert(MessageBuilder::new(12, feed(2)).vote(&msg_key(1), 0).build()).await;
        let store = store_over(memory, GateMode::Peer, 10);

        let liked = store.likes(&feed(2), &Viewer::Anonymous).await.unwrap();
        assert_eq!(keys(&liked), vec![msg_key(2)]);
    }

    #[tokio::test]
    async fn test_public_web_consent() {
        let memory = Arc::new(MemoryLogStore::new(feed(1)));
        memory.insert(MessageBuilder::new(1, feed(2)).build()).await;
        memory.insert(MessageBuilder::new(2, feed(3)).build()).await;
        memory.set_about(&feed(3), "publicWebHosting", json!(true)).await;
        let store = store_over(memory, GateMode::PublicWeb, 10);

        let latest = store.latest(LatestFilter::default(), &Viewer::Anonymous).await.unwrap();
        let redacted: Vec<bool> = latest.iter().map(GatedMessage::is_redacted).collect();
        assert_eq!(keys(&latest), vec![msg_key(2), msg_key(1)]);
        assert_eq!(redacted, vec![false, true]);
    }

    #[test]
    fn test_period_parsing() {
        assert_eq!("week".parse::<Period>().unwrap(), Period::Week);
        assert!("fortnight".parse::<Period>().is_err());
        assert_eq!(Period::Day.duration(), Duration::from_secs(86_400));
    }
}
