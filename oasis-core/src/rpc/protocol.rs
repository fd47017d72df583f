/*
    protocol.rs - framed JSON RPC between the core and the log store

    Every frame is a JSON object tagged by `type`, written with a 4-byte
    big-endian length prefix:

    ```json
    {"type": "request",  "id": 7, "method": "get", "args": {"id": "%..."}, "stream": false}
    {"type": "response", "id": 7, "result": {"Ok": {...}}}
    {"type": "request",  "id": 8, "method": "createLogStream", "args": {}, "stream": true, "window": 64}
    {"type": "item",     "id": 8, "value": {...}}
    {"type": "credit",   "id": 8, "amount": 32}
    {"type": "end",      "id": 8}
    {"type": "cancel",   "id": 8}
    ```

    Single-value calls are answered by exactly one `response`. Streams are
    answered by zero or more `item` frames followed by one `end`; a failure
    to open the stream is reported as `end` carrying an error. The client
    sends `cancel` when it stops consuming a stream.

    Flow control: a stream request may carry a `window`, the number of
    items the server may send before waiting. The client returns `credit`
    as its consumer drains items, so at most `window` items of one stream
    are ever buffered on the client. `end` never consumes credit. Without
    a `window` the server sends freely.
*/

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Error codes for RPC errors
pub const ERR_INVALID_PARAMS: i32 = -32602;
pub const ERR_METHOD_NOT_FOUND: i32 = -32601;
pub const ERR_INTERNAL_ERROR: i32 = -32603;
pub const ERR_TIMEOUT: i32 = -32000;
pub const ERR_CONNECTION_CLOSED: i32 = -32001;
pub const ERR_NOT_FOUND: i32 = -32004;

/// One frame on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Request {
        id: u64,
        method: String,
        #[serde(default)]
        args: Value,
        #[serde(default)]
        stream: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        window: Option<u32>,
    },
    Response {
        id: u64,
        result: Result<Value, RpcError>,
    },
    Item {
        id: u64,
        value: Value,
    },
    End {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<RpcError>,
    },
    /// More room for items on stream `id`
    Credit {
        id: u64,
        amount: u32,
    },
    Cancel {
        id: u64,
    },
}

/// Error reported by the log store for a specific call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message} (code {code})")]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i32, message: String) -> Self {
        RpcError { code, message }
    }

    pub fn method_not_found(method: &str) -> Self {
        RpcError::new(ERR_METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    pub fn invalid_params(msg: &str) -> Self {
        RpcError::new(ERR_INVALID_PARAMS, format!("Invalid params: {}", msg))
    }

    pub fn internal_error(msg: &str) -> Self {
        RpcError::new(ERR_INTERNAL_ERROR, format!("Internal error: {}", msg))
    }

    pub fn not_found(what: &str) -> Self {
        RpcError::new(ERR_NOT_FOUND, format!("Not found: {}", what))
    }

    pub fn timeout() -> Self {
        RpcError::new(ERR_TIMEOUT, "Request timeout".to_string())
    }

    pub fn connection_closed() -> Self {
        RpcError::new(ERR_CONNECTION_CLOSED, "Connection to log store closed".to_string())
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ERR_NOT_FOUND
    }

    pub fn is_connection_closed(&self) -> bool {
        self.code == ERR_CONNECTION_CLOSED
    }
}

/// Errors below the RPC layer: sockets and framing
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Malformed frame: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("Unsupported address: {0}")]
    UnsupportedAddress(String),
}

/// Write one length-prefixed frame
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = serde_json::to_vec(frame)?;
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge(bytes.len()));
    }

    let len = bytes.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame; `Ok(None)` on a clean EOF
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge(len));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(serde_json::from_slice(&buf)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_wire_shape() {
        let frame = Frame::Request {
            id: 3,
            method: "names.getSignifier".to_string(),
            args: json!({"id": "@abc"}),
            stream: false,
            window: None,
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "request");
        assert_eq!(value["method"], "names.getSignifier");
        assert!(value.get("window").is_none());

        let credit = serde_json::to_value(Frame::Credit { id: 8, amount: 4 }).unwrap();
        assert_eq!(credit, json!({"type": "credit", "id": 8, "amount": 4}));

        let end = serde_json::to_value(Frame::End { id: 4, error: None }).unwrap();
        assert_eq!(end, json!({"type": "end", "id": 4}));
    }

    #[test]
    fn test_request_args_default_to_null() {
        let frame: Frame = serde_json::from_str(r#"{"type":"request","id":1,"method":"whoami"}"#)
            .unwrap();
        assert_eq!(
            frame,
            Frame::Request {
                id: 1,
                method: "whoami".to_string(),
                args: Value::Null,
                stream: false,
                window: None,
            }
        );
    }

    #[tokio::test]
    async fn test_frames_over_a_pipe() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let sent = Frame::Response {
            id: 9,
            result: Err(RpcError::not_found("%missing")),
        };
        write_frame(&mut client, &sent).await.unwrap();
        drop(client);

        let received = read_frame(&mut server).await.unwrap();
        assert_eq!(received, Some(sent));
        assert_eq!(read_frame(&mut server).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejection() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let len = (MAX_FRAME_SIZE as u32) + 1;
        client.write_all(&len.to_be_bytes()).await.unwrap();

        let result = read_frame(&mut server).await;
        assert!(matches!(result, Err(TransportError::FrameTooLarge(_))));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_an_error_not_a_panic() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let garbage = b"{not json";
        client
            .write_all(&(garbage.len() as u32).to_be_bytes())
            .await
            .unwrap();
        client.write_all(garbage).await.unwrap();

        assert!(matches!(
            read_frame(&mut server).await,
            Err(TransportError::Codec(_))
        ));
    }

    #[test]
    fn test_error_codes() {
        assert!(RpcError::not_found("x").is_not_found());
        assert!(RpcError::connection_closed().is_connection_closed());
        assert!(!RpcError::timeout().is_not_found());
        assert_eq!(
            RpcError::method_not_found("blobs.rm").to_string(),
            "Method not found: blobs.rm (code -32601)"
        );
    }
}
