/*
    RpcConnection - client side of the framed RPC protocol

    Owns one byte stream to the log store and multiplexes any number of
    concurrent calls and streams over it, correlated by request id.

    Workflow:

    1. call(method, args):
        - allocate an id, park a oneshot sender in the pending map
        - write a `request` frame
        - await the oneshot (bounded by the call timeout)

    2. stream(method, args):
        - park an mpsc sender sized to the stream window in the pending map
        - write a `request` frame with `stream: true` and the window
        - hand the receiver to the caller as a `CreditedStream`, which
          returns credit as it is drained and cancels when dropped early

    3. Reader task:
        - routes `response` / `item` / `end` frames to the pending entry
        - never waits on a consumer: items are handed over with try_send,
          which the window guarantees has room
        - on EOF or a read error, marks the connection closed and fails
          everything still pending with `connection_closed`

    4. Control task:
        - writes `credit` and `cancel` frames queued by streams and the
          reader, so neither has to wait for the write half
*/

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace, warn};

use super::protocol::{read_frame, write_frame, Frame, RpcError, TransportError};
use super::session::{RecordStream, RpcSession};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type SharedWriter = Arc<Mutex<BoxedWriter>>;
type ControlSender = mpsc::UnboundedSender<Frame>;

/// Request awaiting frames from the log store
enum PendingRequest {
    Call(oneshot::Sender<Result<Value, RpcError>>),
    Stream(mpsc::Sender<Result<Value, RpcError>>),
}

type PendingMap = Arc<Mutex<HashMap<u64, PendingRequest>>>;

pub struct RpcConnection {
    writer: SharedWriter,
    pending: PendingMap,
    control: ControlSender,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    call_timeout: Duration,
    stream_window: u32,
    reader_task: JoinHandle<()>,
    control_task: JoinHandle<()>,
}

impl RpcConnection {
    /// Wrap an established byte stream and spawn its reader and control tasks
    ///
    /// `stream_buffer` is the per-stream window: how many items of one
    /// stream may sit unread on the client.
    pub fn new<S>(stream: S, call_timeout: Duration, stream_buffer: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let writer: SharedWriter = Arc::new(Mutex::new(Box::new(writer)));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let (control, control_rx) = mpsc::unbounded_channel();

        let reader_task = tokio::spawn(read_loop(
            reader,
            pending.clone(),
            control.clone(),
            closed.clone(),
        ));
        let control_task = tokio::spawn(control_loop(control_rx, writer.clone(), closed.clone()));

        RpcConnection {
            writer,
            pending,
            control,
            next_id: AtomicU64::new(1),
            closed,
            call_timeout,
            stream_window: u32::try_from(stream_buffer.max(1)).unwrap_or(u32::MAX),
            reader_task,
            control_task,
        }
    }

    /// Number of calls and streams still waiting on the log store
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn send_request(&self, id: u64, frame: Frame) -> Result<(), RpcError> {
        let written = {
            let mut writer = self.writer.lock().await;
            write_frame(&mut *writer, &frame).await
        };

        match written {
            Ok(()) => Ok(()),
            Err(e) => {
                self.pending.lock().await.remove(&id);
                match e {
                    TransportError::Io(io) => {
                        warn!(error = %io, "Write to log store failed, marking connection closed");
                        self.closed.store(true, Ordering::SeqCst);
                        Err(RpcError::connection_closed())
                    }
                    other => Err(RpcError::invalid_params(&other.to_string())),
                }
            }
        }
    }
}

#[async_trait]
impl RpcSession for RpcConnection {
    async fn call(&self, method: &str, args: Value) -> Result<Value, RpcError> {
        if self.is_closed() {
            return Err(RpcError::connection_closed());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (response_tx, response_rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert(id, PendingRequest::Call(response_tx));

        let request = Frame::Request {
            id,
            method: method.to_string(),
            args,
            stream: false,
            window: None,
        };
        self.send_request(id, request).await?;

        match timeout(self.call_timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RpcError::connection_closed()),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                warn!(id, method, "RPC call timed out");
                Err(RpcError::timeout())
            }
        }
    }

    async fn stream(&self, method: &str, args: Value) -> Result<RecordStream, RpcError> {
        if self.is_closed() {
            return Err(RpcError::connection_closed());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        // One extra slot for the terminal error, which is sent without credit.
        let (record_tx, record_rx) = mpsc::channel(self.stream_window as usize + 1);
        self.pending
            .lock()
            .await
            .insert(id, PendingRequest::Stream(record_tx));

        let request = Frame::Request {
            id,
            method: method.to_string(),
            args,
            stream: true,
            window: Some(self.stream_window),
        };
        self.send_request(id, request).await?;

        Ok(CreditedStream::new(id, record_rx, self.control.clone(), self.stream_window).boxed())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for RpcConnection {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.control_task.abort();
    }
}

/// Receiving end of one stream; hands credit back to the log store as it is drained
struct CreditedStream {
    id: u64,
    records: ReceiverStream<Result<Value, RpcError>>,
    control: ControlSender,
    /// Credit is returned in batches of this size
    batch: u32,
    drained: u32,
    finished: bool,
}

impl CreditedStream {
    fn new(
        id: u64,
        records: mpsc::Receiver<Result<Value, RpcError>>,
        control: ControlSender,
        window: u32,
    ) -> Self {
        CreditedStream {
            id,
            records: ReceiverStream::new(records),
            control,
            batch: (window / 2).max(1),
            drained: 0,
            finished: false,
        }
    }
}

impl Stream for CreditedStream {
    type Item = Result<Value, RpcError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.records).poll_next(cx);
        match &polled {
            Poll::Ready(Some(Ok(_))) => {
                this.drained += 1;
                if this.drained >= this.batch {
                    let amount = std::mem::take(&mut this.drained);
                    let _ = this.control.send(Frame::Credit { id: this.id, amount });
                }
            }
            Poll::Ready(Some(Err(_))) | Poll::Ready(None) => this.finished = true,
            Poll::Pending => {}
        }
        polled
    }
}

impl Drop for CreditedStream {
    fn drop(&mut self) {
        if !self.finished {
            trace!(id = self.id, "Stream dropped before its end, cancelling");
            let _ = self.control.send(Frame::Cancel { id: self.id });
        }
    }
}

async fn control_loop(
    mut frames: mpsc::UnboundedReceiver<Frame>,
    writer: SharedWriter,
    closed: Arc<AtomicBool>,
) {
    while let Some(frame) = frames.recv().await {
        if closed.load(Ordering::SeqCst) {
            continue;
        }
        let mut writer = writer.lock().await;
        if let Err(e) = write_frame(&mut *writer, &frame).await {
            debug!(?frame, error = %e, "Failed to send control frame");
        }
    }
}

async fn read_loop<R>(
    mut reader: R,
    pending: PendingMap,
    control: ControlSender,
    closed: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(frame)) => route_frame(frame, &pending, &control).await,
            Ok(None) => {
                debug!("Log store closed the connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read frame from log store");
                break;
            }
        }
    }

    closed.store(true, Ordering::SeqCst);

    let orphaned: Vec<PendingRequest> = pending.lock().await.drain().map(|(_, p)| p).collect();
    for request in orphaned {
        match request {
            PendingRequest::Call(tx) => {
                let _ = tx.send(Err(RpcError::connection_closed()));
            }
            PendingRequest::Stream(tx) => {
                let _ = tx.try_send(Err(RpcError::connection_closed()));
            }
        }
    }
}

async fn route_frame(frame: Frame, pending: &PendingMap, control: &ControlSender) {
    match frame {
        Frame::Response { id, result } => {
            let request = pending.lock().await.remove(&id);
            match request {
                Some(PendingRequest::Call(tx)) => {
                    let _ = tx.send(result);
                }
                Some(PendingRequest::Stream(tx)) => {
                    let _ = tx.try_send(result);
                }
                None => trace!(id, "Response for unknown or expired request"),
            }
        }
        Frame::Item { id, value } => {
            let mut pending = pending.lock().await;
            let handed_over = match pending.get(&id) {
                Some(PendingRequest::Stream(tx)) => tx.try_send(Ok(value)),
                _ => {
                    trace!(id, "Item for unknown stream");
                    return;
                }
            };

            match handed_over {
                Ok(()) => {}
                Err(TrySendError::Closed(_)) => {
                    pending.remove(&id);
                    debug!(id, "Stream consumer went away, cancelling");
                    let _ = control.send(Frame::Cancel { id });
                }
                Err(TrySendError::Full(_)) => {
                    pending.remove(&id);
                    warn!(id, "Log store overran the stream window, cancelling");
                    let _ = control.send(Frame::Cancel { id });
                }
            }
        }
        Frame::End { id, error } => {
            let request = pending.lock().await.remove(&id);
            if let (Some(PendingRequest::Stream(tx)), Some(error)) = (request, error) {
                let _ = tx.try_send(Err(error));
            }
        }
        Frame::Request { id, method, .. } => {
            debug!(id, %method, "Ignoring request from log store");
        }
        Frame::Credit { id, .. } | Frame::Cancel { id } => {
            trace!(id, "Ignoring flow-control frame from log store");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::server::serve_connection;
    use futures::{stream, FutureExt};
    use serde_json::json;

    /// Backend answering a handful of fixed methods
    struct EchoSession;

    #[async_trait]
    impl RpcSession for EchoSession {
        async fn call(&self, method: &str, args: Value) -> Result<Value, RpcError> {
            match method {
                "echo" => Ok(args),
                "missing" => Err(RpcError::not_found("thing")),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Value::Null)
                }
                other => Err(RpcError::method_not_found(other)),
            }
        }

        async fn stream(&self, method: &str, args: Value) -> Result<RecordStream, RpcError> {
            match method {
                "count" => {
                    let n = args["n"].as_u64().unwrap_or(0);
                    Ok(stream::iter((0..n).map(|i| Ok(json!(i)))).boxed())
                }
                "forever" => Ok(stream::repeat_with(|| Ok(json!("tick"))).boxed()),
                "broken" => Ok(stream::iter(vec![
                    Ok(json!(1)),
                    Err(RpcError::internal_error("disk on fire")),
                ])
                .boxed()),
                other => Err(RpcError::method_not_found(other)),
            }
        }
    }

    fn connected_pair(call_timeout: Duration) -> RpcConnection {
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve_connection(server, Arc::new(EchoSession)));
        RpcConnection::new(client, call_timeout, 8)
    }

    #[tokio::test]
    async fn test_call_roundtrip() {
        let conn = connected_pair(Duration::from_secs(5));
        let result = conn.call("echo", json!({"hello": "world"})).await.unwrap();
        assert_eq!(result, json!({"hello": "world"}));
        assert_eq!(conn.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_remote_error_is_returned_untouched() {
        let conn = connected_pair(Duration::from_secs(5));
        let err = conn.call("missing", Value::Null).await.unwrap_err();
        assert!(err.is_not_found());

        let err = conn.call("nope", Value::Null).await.unwrap_err();
        assert_eq!(err, RpcError::method_not_found("nope"));
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_multiplexed() {
        let conn = Arc::new(connected_pair(Duration::from_secs(5)));
        let calls = (0..20).map(|i| {
            let conn = conn.clone();
            async move { conn.call("echo", json!(i)).await }
        });
        let results = futures::future::join_all(calls).await;
        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap(), json!(i));
        }
    }

    #[tokio::test]
    async fn test_stream_preserves_order() {
        let conn = connected_pair(Duration::from_secs(5));
        let records: Vec<Value> = conn
            .stream("count", json!({"n": 5}))
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(records, vec![json!(0), json!(1), json!(2), json!(3), json!(4)]);
    }

    #[tokio::test]
    async fn test_stream_error_ends_stream() {
        let conn = connected_pair(Duration::from_secs(5));
        let records: Vec<Result<Value, RpcError>> =
            conn.stream("broken", Value::Null).await.unwrap().collect().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], Ok(json!(1)));
        assert!(records[1].is_err());
    }

    #[tokio::test]
    async fn test_unknown_stream_method_surfaces_error() {
        let conn = connected_pair(Duration::from_secs(5));
        let mut records = conn.stream("nope", Value::Null).await.unwrap();
        assert_eq!(
            records.next().await,
            Some(Err(RpcError::method_not_found("nope")))
        );
        assert_eq!(records.next().await, None);
    }

    #[tokio::test]
    async fn test_infinite_stream_take_first_then_cancel() {
        let conn = connected_pair(Duration::from_secs(5));
        let first = {
            let mut ticks = conn.stream("forever", Value::Null).await.unwrap();
            ticks.next().await
        };
        assert_eq!(first, Some(Ok(json!("tick"))));

        // Dropping the consumer cancels the stream; the connection stays usable.
        let echoed = conn.call("echo", json!("still here")).await.unwrap();
        assert_eq!(echoed, json!("still here"));
    }

    #[tokio::test]
    async fn test_unread_stream_does_not_block_calls() {
        let conn = connected_pair(Duration::from_secs(2));
        let _ticks = conn.stream("forever", Value::Null).await.unwrap();

        // Give the log store time to fill the window of the stream nobody reads.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(conn.call("echo", json!("hi")).await, Ok(json!("hi")));
        let records: Vec<Value> = conn
            .stream("count", json!({"n": 3}))
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn test_unread_items_are_bounded_by_window() {
        let conn = connected_pair(Duration::from_secs(2));
        let mut ticks = conn.stream("forever", Value::Null).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Only what is already buffered is ready without yielding to the reader.
        let mut ready = 0;
        while ready < 100 {
            match ticks.next().now_or_never() {
                Some(Some(Ok(_))) => ready += 1,
                _ => break,
            }
        }
        assert_eq!(ready, 8);
    }

    #[tokio::test]
    async fn test_slow_consumer_receives_every_item() {
        let conn = connected_pair(Duration::from_secs(2));
        let mut records = conn.stream("count", json!({"n": 40})).await.unwrap();

        let mut seen = Vec::new();
        while let Some(record) = records.next().await {
            seen.push(record.unwrap());
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(seen, (0..40).map(|i| json!(i)).collect::<Vec<_>>());
        assert_eq!(conn.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout() {
        let conn = connected_pair(Duration::from_secs(2));
        let err = conn.call("slow", Value::Null).await.unwrap_err();
        assert_eq!(err, RpcError::timeout());
        assert_eq!(conn.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_peer_hangup_fails_pending_and_marks_closed() {
        let (client, server) = tokio::io::duplex(1024);
        let conn = RpcConnection::new(client, Duration::from_secs(5), 8);

        let call = tokio::spawn({
            let conn = Arc::new(conn);
            let inner = conn.clone();
            async move { (inner.call("echo", json!(1)).await, conn) }
        });

        // Let the request reach the pipe, then hang up without answering.
        tokio::task::yield_now().await;
        drop(server);

        let (result, conn) = call.await.unwrap();
        assert_eq!(result, Err(RpcError::connection_closed()));
        assert!(conn.is_closed());
        assert_eq!(
            conn.call("echo", json!(2)).await,
            Err(RpcError::connection_closed())
        );
    }
}
