//! Wiring of the log-access layer from configuration

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::facade::RequestFacade;
use crate::privacy::PrivacyGate;
use crate::rpc::TransportError;
use crate::store::MessageStore;
use crate::supervisor::{dialer_for, ConnectionSupervisor, Dialer, SessionOptions};
use crate::thread::ThreadEngine;

/// Everything a front-end needs to read and write the log
pub struct Oasis {
    supervisor: Arc<ConnectionSupervisor>,
    store: Arc<MessageStore>,
    threads: ThreadEngine,
}

impl Oasis {
    /// Build against the log store named in `config`
    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        let options = SessionOptions {
            connect_timeout: config.store.connect_timeout,
            call_timeout: config.rpc.call_timeout,
            stream_buffer: config.rpc.stream_buffer,
        };
        let dialer = dialer_for(&config.store.address, options)?;
        info!(address = %config.store.address, mode = %config.privacy.mode, "Configured log store");
        Ok(Self::with_dialer(dialer, config))
    }

    /// Build with a caller-supplied dialer, e.g. a [`LocalDialer`](crate::supervisor::LocalDialer)
    pub fn with_dialer(dialer: Arc<dyn Dialer>, config: &Config) -> Self {
        let supervisor = Arc::new(ConnectionSupervisor::new(dialer, config.store.retry_interval));
        let facade = Arc::new(RequestFacade::new(supervisor.clone()));
        let store = Arc::new(MessageStore::new(
            facade,
            PrivacyGate::new(config.privacy.mode),
            config.rpc.page_size,
        ));
        let threads = ThreadEngine::new(store.clone());

        Self {
            supervisor,
            store,
            threads,
        }
    }

    /// Begin dialing in the background instead of on first use
    pub async fn start(&self) {
        self.supervisor.start().await;
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub fn threads(&self) -> &ThreadEngine {
        &self.threads
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}
