//! Scripted dialers for supervisor tests

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use serde_json::Value;
use tokio::time::Instant;

use crate::rpc::{RecordStream, RpcError, RpcSession, TransportError};
use crate::supervisor::{ConnectionHandle, Dialer};

/// Session that answers every call with its own id
pub struct StubSession {
    id: u32,
    closed: AtomicBool,
}

impl StubSession {
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RpcSession for StubSession {
    async fn call(&self, _method: &str, _args: Value) -> Result<Value, RpcError> {
        if self.is_closed() {
            return Err(RpcError::connection_closed());
        }
        Ok(Value::from(self.id))
    }

    async fn stream(&self, _method: &str, _args: Value) -> Result<RecordStream, RpcError> {
        Ok(stream::empty().boxed())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Fails the first `failures` dials, then hands out fresh [`StubSession`]s
pub struct FlakyDialer {
    failures: u32,
    dials: AtomicU32,
    attempt_times: Mutex<Vec<Instant>>,
    sessions: Mutex<Vec<Arc<StubSession>>>,
}

impl FlakyDialer {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            dials: AtomicU32::new(0),
            attempt_times: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// When each dial attempt happened, in tokio time
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempt_times.lock().unwrap().clone()
    }

    /// Simulate the log store going away under every session handed out so far
    pub fn close_sessions(&self) {
        for session in self.sessions.lock().unwrap().iter() {
            session.close();
        }
    }
}

#[async_trait]
impl Dialer for FlakyDialer {
    async fn dial(&self) -> Result<ConnectionHandle, TransportError> {
        self.attempt_times.lock().unwrap().push(Instant::now());
        let attempt = self.dials.fetch_add(1, Ordering::SeqCst);

        if attempt < self.failures {
            return Err(TransportError::Connect {
                address: self.describe(),
                reason: format!("refused (attempt {})", attempt + 1),
            });
        }

        let session = Arc::new(StubSession {
            id: attempt + 1,
            closed: AtomicBool::new(false),
        });
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }

    fn describe(&self) -> String {
        "flaky".to_string()
    }
}
