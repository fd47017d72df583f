//! Establishing sessions with the log store
//!
//! A [`Dialer`] performs exactly one connection attempt. Retrying is the
//! supervisor's job.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::ConnectionHandle;
use crate::rpc::{RpcConnection, RpcSession, TransportError};

/// Where the log store listens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StoreAddress {
    /// `host:port`
    Tcp(String),
    /// Path of a Unix domain socket
    Unix(PathBuf),
}

impl FromStr for StoreAddress {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(TransportError::UnsupportedAddress(s.to_string()));
            }
            return Ok(StoreAddress::Unix(PathBuf::from(path)));
        }

        let host_port = s.strip_prefix("tcp:").unwrap_or(s);
        match host_port.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(StoreAddress::Tcp(host_port.to_string()))
            }
            _ => Err(TransportError::UnsupportedAddress(s.to_string())),
        }
    }
}

impl TryFrom<String> for StoreAddress {
    type Error = TransportError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StoreAddress> for String {
    fn from(address: StoreAddress) -> Self {
        address.to_string()
    }
}

impl fmt::Display for StoreAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreAddress::Tcp(addr) => write!(f, "tcp:{}", addr),
            StoreAddress::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Settings applied to every session a dialer creates
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub connect_timeout: Duration,
    pub call_timeout: Duration,
    pub stream_buffer: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(30),
            stream_buffer: 64,
        }
    }
}

/// One attempt at opening a session
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self) -> Result<ConnectionHandle, TransportError>;

    /// Human-readable target, for logs
    fn describe(&self) -> String;
}

/// Build the dialer matching a configured address
pub fn dialer_for(
    address: &StoreAddress,
    options: SessionOptions,
) -> Result<Arc<dyn Dialer>, TransportError> {
    match address {
        StoreAddress::Tcp(addr) => Ok(Arc::new(TcpDialer::new(addr.clone(), options))),
        #[cfg(unix)]
        StoreAddress::Unix(path) => Ok(Arc::new(UnixDialer::new(path.clone(), options))),
        #[cfg(not(unix))]
        StoreAddress::Unix(_) => Err(TransportError::UnsupportedAddress(address.to_string())),
    }
}

pub struct TcpDialer {
    address: String,
    options: SessionOptions,
}

impl TcpDialer {
    pub fn new(address: impl Into<String>, options: SessionOptions) -> Self {
        Self {
            address: address.into(),
            options,
        }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self) -> Result<ConnectionHandle, TransportError> {
        let stream = match timeout(self.options.connect_timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TransportError::Connect {
                    address: self.address.clone(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(TransportError::Connect {
                    address: self.address.clone(),
                    reason: "timed out".to_string(),
                })
            }
        };
        stream.set_nodelay(true)?;

        Ok(Arc::new(RpcConnection::new(
            stream,
            self.options.call_timeout,
            self.options.stream_buffer,
        )))
    }

    fn describe(&self) -> String {
        format!("tcp:{}", self.address)
    }
}

#[cfg(unix)]
pub struct UnixDialer {
    path: PathBuf,
    options: SessionOptions,
}

#[cfg(unix)]
impl UnixDialer {
    pub fn new(path: impl Into<PathBuf>, options: SessionOptions) -> Self {
        Self {
            path: path.into(),
            options,
        }
    }
}

#[cfg(unix)]
#[async_trait]
impl Dialer for UnixDialer {
    async fn dial(&self) -> Result<ConnectionHandle, TransportError> {
        let connect = tokio::net::UnixStream::connect(&self.path);
        let stream = match timeout(self.options.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TransportError::Connect {
                    address: self.path.display().to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(TransportError::Connect {
                    address: self.path.display().to_string(),
                    reason: "timed out".to_string(),
                })
            }
        };

        Ok(Arc::new(RpcConnection::new(
            stream,
            self.options.call_timeout,
            self.options.stream_buffer,
        )))
    }

    fn describe(&self) -> String {
        format!("unix:{}", self.path.display())
    }
}

/// Hands out an in-process session, e.g. a memory log store
pub struct LocalDialer {
    session: Arc<dyn RpcSession>,
}

impl LocalDialer {
    pub fn new(session: Arc<dyn RpcSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Dialer for LocalDialer {
    async fn dial(&self) -> Result<ConnectionHandle, TransportError> {
        Ok(self.session.clone())
    }

    fn describe(&self) -> String {
        "local".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_addresses() {
        assert_eq!(
            "tcp:localhost:8008".parse::<StoreAddress>().unwrap(),
            StoreAddress::Tcp("localhost:8008".to_string())
        );
        assert_eq!(
            "127.0.0.1:8008".parse::<StoreAddress>().unwrap(),
            StoreAddress::Tcp("127.0.0.1:8008".to_string())
        );
        assert_eq!(
            "unix:/run/ssb/socket".parse::<StoreAddress>().unwrap(),
            StoreAddress::Unix(PathBuf::from("/run/ssb/socket"))
        );
    }

    #[test]
    fn test_reject_bad_addresses() {
        assert!("localhost".parse::<StoreAddress>().is_err());
        assert!("tcp:localhost:notaport".parse::<StoreAddress>().is_err());
        assert!("unix:".parse::<StoreAddress>().is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        for raw in ["tcp:127.0.0.1:8008", "unix:/tmp/ssb.sock"] {
            let address: StoreAddress = raw.parse().unwrap();
            assert_eq!(address.to_string(), raw);
        }
    }

    #[tokio::test]
    async fn test_tcp_dial_refused() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dialer = TcpDialer::new(addr.to_string(), SessionOptions::default());
        let err = dialer.dial().await.err().unwrap();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
