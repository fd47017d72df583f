/*
    ConnectionSupervisor - owns the single logical session with the log store

    Workflow:

    1. connect():
        - Connected with a live handle: hand it out, no dialing
        - Connecting: await the in-flight dial sequence (shared future)
        - Idle, or Connected with a handle whose transport closed:
          spawn a fresh dial sequence and await it
        - Shutdown: fail with ConnectionError::Shutdown

    2. Dial sequence (background task):
        - attempt immediately, then every `retry_interval` until one succeeds
        - failures are logged and counted, never returned to callers
        - on success, publish the handle as Connected and resolve the waiters

    Callers that stop waiting do not stop the dial sequence; only shutdown()
    aborts it.
*/

pub mod dialer;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::counter;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::error::ConnectionError;
use crate::rpc::RpcSession;

pub use dialer::{dialer_for, Dialer, LocalDialer, SessionOptions, StoreAddress, TcpDialer};
#[cfg(unix)]
pub use dialer::UnixDialer;

/// Capability for issuing requests to the log store
pub type ConnectionHandle = Arc<dyn RpcSession>;

type DialFuture = Shared<BoxFuture<'static, Result<ConnectionHandle, ConnectionError>>>;

/// Observable lifecycle of the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Shutdown,
}

enum State {
    Idle,
    Connecting {
        generation: u64,
        dial: DialFuture,
        task: AbortHandle,
    },
    Connected(ConnectionHandle),
    Shutdown,
}

pub struct ConnectionSupervisor {
    dialer: Arc<dyn Dialer>,
    retry_interval: Duration,
    state: Arc<Mutex<State>>,
    attempts: Arc<AtomicU64>,
    generation: AtomicU64,
}

impl ConnectionSupervisor {
    pub fn new(dialer: Arc<dyn Dialer>, retry_interval: Duration) -> Self {
        Self {
            dialer,
            retry_interval,
            state: Arc::new(Mutex::new(State::Idle)),
            attempts: Arc::new(AtomicU64::new(0)),
            generation: AtomicU64::new(0),
        }
    }

    /// Obtain the current handle, waiting for the log store if necessary
    pub async fn connect(&self) -> Result<ConnectionHandle, ConnectionError> {
        let dial = {
            let mut state = self.state.lock().await;
            let in_flight = match &*state {
                State::Shutdown => return Err(ConnectionError::Shutdown),
                State::Connected(handle) if !handle.is_closed() => return Ok(handle.clone()),
                State::Connecting { dial, .. } => Some(dial.clone()),
                State::Connected(_) => {
                    info!(target_store = %self.dialer.describe(), "Log store connection lost, reconnecting");
                    None
                }
                State::Idle => None,
            };
            match in_flight {
                Some(dial) => dial,
                None => self.begin_dial(&mut state),
            }
        };

        dial.await
    }

    /// Begin dialing without waiting for the result
    pub async fn start(&self) {
        let mut state = self.state.lock().await;
        if matches!(*state, State::Idle) {
            self.begin_dial(&mut state);
        }
    }

    pub async fn state(&self) -> ConnectionState {
        match &*self.state.lock().await {
            State::Idle => ConnectionState::Idle,
            State::Connecting { .. } => ConnectionState::Connecting,
            State::Connected(handle) if handle.is_closed() => ConnectionState::Idle,
            State::Connected(_) => ConnectionState::Connected,
            State::Shutdown => ConnectionState::Shutdown,
        }
    }

    /// Total dial attempts made since creation
    pub fn dial_attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Stop dialing and release the handle; later connect() calls fail
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if let State::Connecting { task, .. } = &*state {
            task.abort();
        }
        if !matches!(*state, State::Shutdown) {
            info!("Connection supervisor shut down");
        }
        *state = State::Shutdown;
    }

    fn begin_dial(&self, state: &mut State) -> DialFuture {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let task = tokio::spawn(dial_loop(
            self.dialer.clone(),
            self.retry_interval,
            self.attempts.clone(),
            self.state.clone(),
            generation,
        ));
        let abort = task.abort_handle();

        let dial: DialFuture = async move {
            match task.await {
                Ok(handle) => Ok(handle),
                Err(e) if e.is_cancelled() => Err(ConnectionError::Shutdown),
                Err(e) => Err(ConnectionError::DialTask(e.to_string())),
            }
        }
        .boxed()
        .shared();

        *state = State::Connecting {
            generation,
            dial: dial.clone(),
            task: abort,
        };
        dial
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        if let Ok(state) = self.state.try_lock() {
            if let State::Connecting { task, .. } = &*state {
                task.abort();
            }
        }
    }
}

async fn dial_loop(
    dialer: Arc<dyn Dialer>,
    retry_interval: Duration,
    attempts: Arc<AtomicU64>,
    state: Arc<Mutex<State>>,
    generation: u64,
) -> ConnectionHandle {
    let target = dialer.describe();
    let mut failures: u64 = 0;

    loop {
        attempts.fetch_add(1, Ordering::SeqCst);

        match dialer.dial().await {
            Ok(handle) => {
                counter!("oasis_dial_attempts_total", "outcome" => "success").increment(1);
                info!(target_store = %target, failures, "Connected to log store");

                let mut current = state.lock().await;
                if let State::Connecting { generation: g, .. } = &*current {
                    if *g == generation {
                        *current = State::Connected(handle.clone());
                    }
                }
                return handle;
            }
            Err(e) => {
                counter!("oasis_dial_attempts_total", "outcome" => "failure").increment(1);
                failures += 1;
                if failures == 1 {
                    warn!(target_store = %target, error = %e, "Log store not reachable yet, retrying");
                } else {
                    debug!(target_store = %target, error = %e, failures, "Dial attempt failed");
                }
                tokio::time::sleep(retry_interval).await;
            }
        }
    }
}
