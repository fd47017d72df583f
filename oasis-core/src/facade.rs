//! Uniform request surface over the supervised connection
//!
//! Every request obtains the handle from the supervisor at the point of
//! use, so a connection replaced after a drop is picked up transparently.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{AccessError, AccessResult};
use crate::metrics::{RequestKind, RequestTimer};
use crate::rpc::Method;
use crate::supervisor::ConnectionSupervisor;

/// Lazily pulled records of a streaming request
pub type AccessStream<T> = BoxStream<'static, AccessResult<T>>;

pub struct RequestFacade {
    supervisor: Arc<ConnectionSupervisor>,
}

impl RequestFacade {
    pub fn new(supervisor: Arc<ConnectionSupervisor>) -> Self {
        Self { supervisor }
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    /// Single request, single response, undecoded
    pub async fn call_value(&self, method: Method, args: Value) -> AccessResult<Value> {
        let handle = self.supervisor.connect().await?;

        let timer = RequestTimer::start(method.as_str(), RequestKind::Call);
        let result = handle.call(method.as_str(), args).await;
        timer.finish(result.is_ok());

        result.map_err(|e| {
            debug!(%method, error = %e, "Call failed");
            AccessError::from_remote(e)
        })
    }

    /// Single request, response decoded into `T`
    pub async fn call<T: DeserializeOwned>(&self, method: Method, args: Value) -> AccessResult<T> {
        let value = self.call_value(method, args).await?;
        decode(method, value)
    }

    /// Open a streaming request; nothing beyond the open is awaited here
    pub async fn stream(&self, method: Method, args: Value) -> AccessResult<AccessStream<Value>> {
        let handle = self.supervisor.connect().await?;

        let timer = RequestTimer::start(method.as_str(), RequestKind::Stream);
        let opened = handle.stream(method.as_str(), args).await;
        timer.finish(opened.is_ok());

        let records = opened.map_err(|e| {
            debug!(%method, error = %e, "Stream failed to open");
            AccessError::from_remote(e)
        })?;

        Ok(records.map_err(AccessError::from_remote).boxed())
    }

    /// Streaming request with each record decoded into `T`
    ///
    /// A record that fails to decode yields `AccessError::Decode` in its
    /// place; the stream continues after it.
    pub async fn stream_decoded<T>(&self, method: Method, args: Value) -> AccessResult<AccessStream<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let records = self.stream(method, args).await?;
        Ok(records
            .map(move |record| record.and_then(|value| decode(method, value)))
            .boxed())
    }

    /// Collect at most `limit` decoded records, failing on the first error
    pub async fn stream_collect<T>(
        &self,
        method: Method,
        args: Value,
        limit: Option<usize>,
    ) -> AccessResult<Vec<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let records = self.stream_decoded::<T>(method, args).await?;
        match limit {
            Some(limit) => records.take(limit).try_collect().await,
            None => records.try_collect().await,
        }
    }
}

fn decode<T: DeserializeOwned>(method: Method, value: Value) -> AccessResult<T> {
    serde_json::from_value(value).map_err(|e| AccessError::Decode(format!("{}: {}", method, e)))
}
