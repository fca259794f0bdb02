//! Shared harness for engine integration tests.

use std::sync::Arc;

use polywallet_core::{MemoryChain, MemoryKeyring, MemoryStore, SyncEngine, SyncHandle};

/// The three in-memory collaborators an engine run needs.
pub struct Harness {
    pub keyring: Arc<MemoryKeyring>,
    pub chain: Arc<MemoryChain>,
    pub store: Arc<MemoryStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            keyring: Arc::new(MemoryKeyring::new()),
            chain: Arc::new(MemoryChain::new()),
            store: Arc::new(MemoryStore::new()),
        }
    }

    /// Starts the engine over the harness collaborators.
    pub fn start(&self) -> SyncHandle {
        SyncEngine::start(
            self.keyring.clone(),
            self.chain.clone(),
            self.store.clone(),
        )
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Yields until `predicate` holds, panicking after a bounded number of
/// scheduler turns.
///
/// Yielding keeps the test task ready the whole time, so a paused clock
/// never auto-advances past a timer under test; timers fire only through an
/// explicit `tokio::time::advance`.
pub async fn yield_until(description: &str, predicate: impl Fn() -> bool) {
    for _ in 0..10_000 {
        if predicate() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached: {description}");
}
