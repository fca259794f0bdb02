//! Per-connection reconciliation session.
//!
//! One session exists per successful network connection. The generation
//! state the reconcilers diff against lives here and dies with the session,
//! so nothing carries over across network switches.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::chain::ChainConnection;
use crate::network::Network;
use crate::registry::SubscriptionRegistry;
use crate::store::Store;
use crate::types::{Address, Did, IssuerId};

/// Shared context for one network connection's reconcilers.
pub struct SyncSession {
    network: Network,
    connection: Arc<dyn ChainConnection>,
    store: Arc<dyn Store>,
    registry: Arc<SubscriptionRegistry>,
    active_issuers: Vec<IssuerId>,
    prev_accounts: Mutex<Vec<Address>>,
    prev_dids: Mutex<Vec<Did>>,
}

impl SyncSession {
    /// Creates a session with empty previous generations, so the first pass
    /// of each reconciler treats everything as added.
    pub const fn new(
        network: Network,
        connection: Arc<dyn ChainConnection>,
        store: Arc<dyn Store>,
        registry: Arc<SubscriptionRegistry>,
        active_issuers: Vec<IssuerId>,
    ) -> Self {
        Self {
            network,
            connection,
            store,
            registry,
            active_issuers,
            prev_accounts: Mutex::new(Vec::new()),
            prev_dids: Mutex::new(Vec::new()),
        }
    }

    /// The network this session was opened for.
    pub const fn network(&self) -> Network {
        self.network
    }

    /// The session's chain connection.
    pub const fn connection(&self) -> &Arc<dyn ChainConnection> {
        &self.connection
    }

    /// The wallet store.
    pub const fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The engine-wide subscription registry.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Issuers recognized as CDD providers, fetched once at session start.
    pub fn active_issuers(&self) -> &[IssuerId] {
        &self.active_issuers
    }

    /// Staleness guard: whether this session's network is still selected.
    /// Checked before every dispatch made from an async callback.
    pub fn is_current(&self) -> bool {
        self.store.selected_network() == Some(self.network)
    }

    /// The account list as of the last fully reconciled pass.
    pub fn prev_accounts(&self) -> Vec<Address> {
        lock(&self.prev_accounts).clone()
    }

    /// Replaces the account generation at the end of a pass.
    pub fn store_accounts(&self, accounts: Vec<Address>) {
        *lock(&self.prev_accounts) = accounts;
    }

    /// The DID list as of the last fully reconciled pass.
    pub fn prev_dids(&self) -> Vec<Did> {
        lock(&self.prev_dids).clone()
    }

    /// Replaces the DID generation at the end of a pass.
    pub fn store_dids(&self, dids: Vec<Did>) {
        *lock(&self.prev_dids) = dids;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
