/*
    server.rs - serve a RpcSession backend over the framed protocol

    One reader loop per accepted connection. Each request runs in its own
    task so a slow stream does not hold up single-value calls on the same
    connection. Streams are pumped until exhausted, until the client sends
    `cancel`, or until the connection goes away.

    Writes of whole frames are serialized through a mutex around the write
    half; stream tasks are stopped between frames (never mid-frame) via a
    oneshot cancel signal.

    A stream requested with a `window` draws one permit from its own
    semaphore per item; `credit` frames from the client add permits back.
    A client that stops reading one stream therefore parks only that
    stream's task, never the connection.
*/

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex, Semaphore};
use tracing::{debug, info, trace, warn};

use super::protocol::{read_frame, write_frame, Frame, TransportError};
use super::session::RpcSession;

type SharedWriter<W> = Arc<Mutex<W>>;

/// Handles for a stream being pumped
struct StreamControl {
    cancel: oneshot::Sender<()>,
    /// `None` when the client did not ask for flow control
    credit: Option<Arc<Semaphore>>,
}

type ActiveStreams = Arc<Mutex<HashMap<u64, StreamControl>>>;

/// Accept connections forever, serving each against `backend`
pub async fn serve(
    listener: TcpListener,
    backend: Arc<dyn RpcSession>,
) -> Result<(), TransportError> {
    let local = listener.local_addr()?;
    info!(%local, "Serving log store");

    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                debug!(%peer, "Accepted log store client");
                let backend = backend.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(socket, backend).await {
                        warn!(%peer, error = %e, "Log store client connection failed");
                    }
                    debug!(%peer, "Log store client disconnected");
                });
            }
            Err(e) => {
                warn!(error = %e, "Failed to accept connection");
            }
        }
    }
}

/// Serve a single established connection until the client hangs up
pub async fn serve_connection<S>(
    stream: S,
    backend: Arc<dyn RpcSession>,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let writer = Arc::new(Mutex::new(writer));
    let streams: ActiveStreams = Arc::new(Mutex::new(HashMap::new()));

    let result = loop {
        match read_frame(&mut reader).await {
            Ok(Some(frame)) => dispatch(frame, &backend, &writer, &streams).await,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    // Dropping the senders stops every stream still being pumped.
    streams.lock().await.clear();
    result
}

async fn dispatch<W>(
    frame: Frame,
    backend: &Arc<dyn RpcSession>,
    writer: &SharedWriter<W>,
    streams: &ActiveStreams,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    match frame {
        Frame::Request {
            id,
            method,
            args,
            stream: false,
            ..
        } => {
            trace!(id, %method, "Call");
            let backend = backend.clone();
            let writer = writer.clone();
            tokio::spawn(async move {
                let result = backend.call(&method, args).await;
                if let Err(e) = send(&writer, &Frame::Response { id, result }).await {
                    debug!(id, error = %e, "Failed to send response");
                }
            });
        }
        Frame::Request {
            id,
            method,
            args,
            stream: true,
            window,
        } => {
            trace!(id, %method, ?window, "Stream");
            let (cancel_tx, cancel_rx) = oneshot::channel();
            let credit = window.map(|window| Arc::new(Semaphore::new(window as usize)));
            // Hold the map while spawning so the task's own removal happens after insertion.
            let mut active = streams.lock().await;
            tokio::spawn(pump_stream(
                id,
                method,
                args,
                backend.clone(),
                writer.clone(),
                streams.clone(),
                cancel_rx,
                credit.clone(),
            ));
            active.insert(
                id,
                StreamControl {
                    cancel: cancel_tx,
                    credit,
                },
            );
        }
        Frame::Credit { id, amount } => {
            let streams = streams.lock().await;
            match streams.get(&id).and_then(|control| control.credit.as_ref()) {
                Some(credit) => credit.add_permits(amount as usize),
                None => trace!(id, "Credit for unknown or unwindowed stream"),
            }
        }
        Frame::Cancel { id } => {
            let control = streams.lock().await.remove(&id);
            if let Some(control) = control {
                debug!(id, "Client cancelled stream");
                let _ = control.cancel.send(());
            }
        }
        other => {
            debug!(?other, "Ignoring unexpected frame from client");
        }
    }
}

async fn pump_stream<W>(
    id: u64,
    method: String,
    args: serde_json::Value,
    backend: Arc<dyn RpcSession>,
    writer: SharedWriter<W>,
    streams: ActiveStreams,
    mut cancel_rx: oneshot::Receiver<()>,
    credit: Option<Arc<Semaphore>>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let end_error = match backend.stream(&method, args).await {
        Err(e) => Some(e),
        Ok(mut records) => {
            let mut failure = None;
            loop {
                if let Some(credit) = &credit {
                    let permit = tokio::select! {
                        _ = &mut cancel_rx => return,
                        permit = credit.acquire() => permit,
                    };
                    match permit {
                        Ok(permit) => permit.forget(),
                        Err(_) => return,
                    }
                }

                let record = tokio::select! {
                    _ = &mut cancel_rx => return,
                    record = records.next() => record,
                };
                match record {
                    Some(Ok(value)) => {
                        if send(&writer, &Frame::Item { id, value }).await.is_err() {
                            streams.lock().await.remove(&id);
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        failure = Some(e);
                        break;
                    }
                    None => break,
                }
            }
            failure
        }
    };

    if let Err(e) = send(&writer, &Frame::End { id, error: end_error }).await {
        debug!(id, error = %e, "Failed to send stream end");
    }
    streams.lock().await.remove(&id);
}

async fn send<W>(writer: &SharedWriter<W>, frame: &Frame) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = writer.lock().await;
    write_frame(&mut *writer, frame).await
}
