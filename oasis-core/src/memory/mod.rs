/*
    MemoryLogStore - in-process log store speaking the remote method set

    Keeps a single append-only log in receive order plus the social graph,
    about-values and blobs needed to answer every method the accessor uses.
    Used directly through LocalDialer, or served over a socket by the test
    harness.

    Features:
    - whoami / get / publish / status
    - createLogStream, createUserStream, query.read ($filter), search.query
    - about.socialValue, names.getSignifier, names.getImageFor
    - friends.isFollowing, friends.isBlocking
    - conn.peers (never-ending stream of snapshots)
    - blobs.get (base64 chunks), blobs.want

    Private messages are only included in streams when the request sets
    `private: true`, mirroring a store that only decrypts on request.
*/

pub mod filter;

use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::stream;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::model::{BlobId, FeedId, Message, MessageMeta, MessageValue, MsgKey};
use crate::rpc::methods;
use crate::rpc::{RecordStream, RpcError, RpcSession};

/// Size of the chunks `blobs.get` emits
const BLOB_CHUNK_SIZE: usize = 64 * 1024;

struct MemoryState {
    whoami: FeedId,
    log: Vec<Message>,
    about: HashMap<(FeedId, String), Value>,
    follows: HashSet<(FeedId, FeedId)>,
    blocks: HashSet<(FeedId, FeedId)>,
    blobs: HashMap<BlobId, Vec<u8>>,
    wanted: HashSet<BlobId>,
    peers: Value,
    last_timestamp: f64,
}

pub struct MemoryLogStore {
    state: RwLock<MemoryState>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GetArgs {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StreamArgs {
    id: Option<String>,
    gte: Option<f64>,
    reverse: bool,
    limit: Option<usize>,
    private: bool,
    query: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SocialArgs {
    key: String,
    dest: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EdgeArgs {
    source: String,
    dest: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PublishArgs {
    content: Value,
}

fn parse_args<T: DeserializeOwned + Default>(args: Value) -> Result<T, RpcError> {
    if args.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(args).map_err(|e| RpcError::invalid_params(&e.to_string()))
}

fn parse_feed(raw: &str) -> Result<FeedId, RpcError> {
    FeedId::parse(raw).map_err(|e| RpcError::invalid_params(&e.to_string()))
}

fn to_record(message: &Message) -> Result<Value, RpcError> {
    serde_json::to_value(message).map_err(|e| RpcError::internal_error(&e.to_string()))
}

fn now_millis() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as f64)
        .unwrap_or_default()
}

/// Content-addressed key of a signed value
fn key_for(value: &MessageValue) -> Result<MsgKey, RpcError> {
    let bytes = serde_json::to_vec(value).map_err(|e| RpcError::internal_error(&e.to_string()))?;
    let digest = Sha256::digest(&bytes);
    MsgKey::parse(&format!("%{}.sha256", STANDARD.encode(digest)))
        .map_err(|e| RpcError::internal_error(&e.to_string()))
}

impl MemoryLogStore {
    pub fn new(whoami: FeedId) -> Self {
        Self {
            state: RwLock::new(MemoryState {
                whoami,
                log: Vec::new(),
                about: HashMap::new(),
                follows: HashSet::new(),
                blocks: HashSet::new(),
                blobs: HashMap::new(),
                wanted: HashSet::new(),
                peers: json!([]),
                last_timestamp: 0.0,
            }),
        }
    }

    pub async fn whoami(&self) -> FeedId {
        self.state.read().await.whoami.clone()
    }

    /// Append an already-keyed message; returns false if the key is known
    pub async fn insert(&self, message: Message) -> bool {
        let mut state = self.state.write().await;
        if state.log.iter().any(|m| m.key == message.key) {
            return false;
        }
        state.last_timestamp = state.last_timestamp.max(message.timestamp);
        state.log.push(message);
        true
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.log.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.log.is_empty()
    }

    /// Record an about-value, e.g. `name`, `image`, `publicWebHosting`
    pub async fn set_about(&self, feed: &FeedId, key: &str, value: Value) {
        self.state
            .write()
            .await
            .about
            .insert((feed.clone(), key.to_string()), value);
    }

    pub async fn follow(&self, source: &FeedId, dest: &FeedId) {
        self.state
            .write()
            .await
            .follows
            .insert((source.clone(), dest.clone()));
    }

    pub async fn block(&self, source: &FeedId, dest: &FeedId) {
        self.state
            .write()
            .await
            .blocks
            .insert((source.clone(), dest.clone()));
    }

    pub async fn add_blob(&self, bytes: Vec<u8>) -> BlobId {
        let digest = Sha256::digest(&bytes);
        let id = BlobId::parse(&format!("&{}.sha256", STANDARD.encode(digest)))
            .unwrap_or_else(|_| BlobId::null_image());
        let mut state = self.state.write().await;
        state.wanted.remove(&id);
        state.blobs.insert(id.clone(), bytes);
        id
    }

    /// Blobs requested via `blobs.want` that are not held locally
    pub async fn wanted(&self) -> Vec<BlobId> {
        let mut wanted: Vec<BlobId> = self.state.read().await.wanted.iter().cloned().collect();
        wanted.sort();
        wanted
    }

    /// Snapshot emitted repeatedly by `conn.peers`
    pub async fn set_peers(&self, peers: Value) {
        self.state.write().await.peers = peers;
    }

    async fn get(&self, args: Value) -> Result<Value, RpcError> {
        let args: GetArgs = parse_args(args)?;
        let state = self.state.read().await;
        match state.log.iter().find(|m| m.key.as_str() == args.id) {
            Some(message) => to_record(message),
            None => Err(RpcError::not_found(&args.id)),
        }
    }

    async fn publish(&self, args: Value) -> Result<Value, RpcError> {
        let args: PublishArgs = parse_args(args)?;
        if !args.content.is_object() {
            return Err(RpcError::invalid_params("content must be an object"));
        }

        let mut state = self.state.write().await;
        let author = state.whoami.clone();
        let sequence = state.log.iter().filter(|m| m.author() == &author).count() as u64 + 1;
        let timestamp = now_millis().max(state.last_timestamp + 1.0);
        let private = args
            .content
            .get("recps")
            .and_then(Value::as_array)
            .is_some_and(|recps| !recps.is_empty());

        let mut value = MessageValue::new(author, sequence, timestamp, args.content);
        value.meta = MessageMeta { private };
        let message = Message {
            key: key_for(&value)?,
            value,
            timestamp,
        };

        debug!(key = %message.key, sequence, "Published message");
        state.last_timestamp = timestamp;
        let record = to_record(&message)?;
        state.log.push(message);
        Ok(record)
    }

    async fn social_value(&self, args: Value) -> Result<Value, RpcError> {
        let args: SocialArgs = parse_args(args)?;
        let dest = parse_feed(&args.dest)?;
        Ok(self.about_value(&dest, &args.key).await)
    }

    async fn about_value(&self, feed: &FeedId, key: &str) -> Value {
        self.state
            .read()
            .await
            .about
            .get(&(feed.clone(), key.to_string()))
            .cloned()
            .unwrap_or(Value::Null)
    }

    async fn edge(&self, args: Value, blocking: bool) -> Result<Value, RpcError> {
        let args: EdgeArgs = parse_args(args)?;
        let edge = (parse_feed(&args.source)?, parse_feed(&args.dest)?);
        let state = self.state.read().await;
        let set = if blocking { &state.blocks } else { &state.follows };
        Ok(Value::Bool(set.contains(&edge)))
    }

    async fn want(&self, args: Value) -> Result<Value, RpcError> {
        let args: GetArgs = parse_args(args)?;
        let id = BlobId::parse(&args.id).map_err(|e| RpcError::invalid_params(&e.to_string()))?;
        let mut state = self.state.write().await;
        if state.blobs.contains_key(&id) {
            return Ok(Value::Bool(true));
        }
        state.wanted.insert(id);
        Ok(Value::Bool(false))
    }

    /// Messages in receive order passing `keep`, shaped by the common stream options
    async fn select<F>(&self, args: &StreamArgs, keep: F) -> Result<Vec<Value>, RpcError>
    where
        F: Fn(&Message) -> bool,
    {
        let state = self.state.read().await;
        let mut selected: Vec<&Message> = state
            .log
            .iter()
            .filter(|m| args.private || !m.is_private())
            .filter(|m| args.gte.map_or(true, |gte| m.timestamp >= gte))
            .filter(|m| keep(m))
            .collect();

        if args.reverse {
            selected.reverse();
        }
        if let Some(limit) = args.limit {
            selected.truncate(limit);
        }
        selected.into_iter().map(to_record).collect()
    }

    async fn user_stream(&self, args: StreamArgs) -> Result<Vec<Value>, RpcError> {
        let author = parse_feed(args.id.as_deref().unwrap_or_default())?;
        let state = self.state.read().await;
        let mut selected: Vec<&Message> = state
            .log
            .iter()
            .filter(|m| m.author() == &author)
            .filter(|m| args.private || !m.is_private())
            .collect();
        selected.sort_by_key(|m| m.value.sequence);

        if args.reverse {
            selected.reverse();
        }
        if let Some(limit) = args.limit {
            selected.truncate(limit);
        }
        selected.into_iter().map(to_record).collect()
    }

    async fn query(&self, args: StreamArgs) -> Result<Vec<Value>, RpcError> {
        let filter = args
            .query
            .as_ref()
            .and_then(Value::as_array)
            .and_then(|stages| stages.iter().find_map(|stage| stage.get("$filter")))
            .cloned()
            .unwrap_or_else(|| json!({}));
        trace!(%filter, "query.read");

        let records = self.select(&args, |_| true).await?;
        Ok(records
            .into_iter()
            .filter(|record| filter::matches(&filter, record))
            .collect())
    }

    async fn search(&self, args: StreamArgs) -> Result<Vec<Value>, RpcError> {
        let needle = args
            .query
            .as_ref()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let args = StreamArgs {
            reverse: true,
            ..args
        };
        // Case-sensitive on purpose; callers fold case before asking.
        self.select(&args, |m| m.text().is_some_and(|text| text.contains(&needle)))
            .await
    }

    async fn blob_chunks(&self, args: Value) -> Result<Vec<Value>, RpcError> {
        let args: GetArgs = parse_args(args)?;
        let state = self.state.read().await;
        let bytes = state
            .blobs
            .iter()
            .find(|(id, _)| id.as_str() == args.id)
            .map(|(_, bytes)| bytes)
            .ok_or_else(|| RpcError::not_found(&args.id))?;

        Ok(bytes
            .chunks(BLOB_CHUNK_SIZE)
            .map(|chunk| Value::String(STANDARD.encode(chunk)))
            .collect())
    }
}

fn records_stream(records: Vec<Value>) -> RecordStream {
    stream::iter(records.into_iter().map(Ok)).boxed()
}

#[async_trait]
impl RpcSession for MemoryLogStore {
    async fn call(&self, method: &str, args: Value) -> Result<Value, RpcError> {
        match method {
            m if m == methods::WHOAMI.as_str() => {
                Ok(json!({ "id": self.state.read().await.whoami.as_str() }))
            }
            m if m == methods::GET.as_str() => self.get(args).await,
            m if m == methods::PUBLISH.as_str() => self.publish(args).await,
            m if m == methods::STATUS.as_str() => {
                let state = self.state.read().await;
                Ok(json!({
                    "whoami": state.whoami.as_str(),
                    "messages": state.log.len(),
                    "blobs": state.blobs.len(),
                }))
            }
            m if m == methods::ABOUT_SOCIAL_VALUE.as_str() => self.social_value(args).await,
            m if m == methods::NAMES_GET_SIGNIFIER.as_str() => {
                let args: GetArgs = parse_args(args)?;
                Ok(self.about_value(&parse_feed(&args.id)?, "name").await)
            }
            m if m == methods::NAMES_GET_IMAGE_FOR.as_str() => {
                let args: GetArgs = parse_args(args)?;
                Ok(self.about_value(&parse_feed(&args.id)?, "image").await)
            }
            m if m == methods::FRIENDS_IS_FOLLOWING.as_str() => self.edge(args, false).await,
            m if m == methods::FRIENDS_IS_BLOCKING.as_str() => self.edge(args, true).await,
            m if m == methods::BLOBS_WANT.as_str() => self.want(args).await,
            other => Err(RpcError::method_not_found(other)),
        }
    }

    async fn stream(&self, method: &str, args: Value) -> Result<RecordStream, RpcError> {
        match method {
            m if m == methods::CREATE_LOG_STREAM.as_str() => {
                let args: StreamArgs = parse_args(args)?;
                Ok(records_stream(self.select(&args, |_| true).await?))
            }
            m if m == methods::CREATE_USER_STREAM.as_str() => {
                Ok(records_stream(self.user_stream(parse_args(args)?).await?))
            }
            m if m == methods::QUERY_READ.as_str() => {
                Ok(records_stream(self.query(parse_args(args)?).await?))
            }
            m if m == methods::SEARCH_QUERY.as_str() => {
                Ok(records_stream(self.search(parse_args(args)?).await?))
            }
            m if m == methods::BLOBS_GET.as_str() => {
                Ok(records_stream(self.blob_chunks(args).await?))
            }
            m if m == methods::CONN_PEERS.as_str() => {
                let peers = self.state.read().await.peers.clone();
                Ok(stream::repeat(Ok(peers)).boxed())
            }
            other => Err(RpcError::method_not_found(other)),
        }
    }
}
