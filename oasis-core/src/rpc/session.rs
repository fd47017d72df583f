use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use super::protocol::RpcError;

/// Records produced by a streaming call, in the order the log store emits them
pub type RecordStream = BoxStream<'static, Result<Value, RpcError>>;

/// An established session with a log store
///
/// Implemented by the socket-backed [`RpcConnection`](super::RpcConnection)
/// and by in-process backends such as the memory log store. The server loop
/// dispatches incoming requests to an implementation of this trait too.
#[async_trait]
pub trait RpcSession: Send + Sync {
    /// Issue a single request and wait for its one response
    async fn call(&self, method: &str, args: Value) -> Result<Value, RpcError>;

    /// Open a streaming source; records are pulled lazily by the consumer
    async fn stream(&self, method: &str, args: Value) -> Result<RecordStream, RpcError>;

    /// Whether the underlying transport has gone away
    fn is_closed(&self) -> bool {
        false
    }
}
