//! Accessors wired to an in-process memory log store

use std::sync::Arc;
use std::time::Duration;

use crate::facade::RequestFacade;
use crate::memory::MemoryLogStore;
use crate::privacy::{GateMode, PrivacyGate};
use crate::store::MessageStore;
use crate::supervisor::{ConnectionSupervisor, LocalDialer};

/// A [`MessageStore`] reading from `memory` without any socket in between
pub fn local_store(memory: Arc<MemoryLogStore>, mode: GateMode, page_size: usize) -> MessageStore {
    let supervisor = ConnectionSupervisor::new(
        Arc::new(LocalDialer::new(memory)),
        Duration::from_secs(1),
    );
    let facade = Arc::new(RequestFacade::new(Arc::new(supervisor)));
    MessageStore::new(facade, PrivacyGate::new(mode), page_size)
}
