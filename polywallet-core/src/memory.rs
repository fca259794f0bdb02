//! In-memory implementations of the collaborator traits.
//!
//! These back the crate's tests and let a host develop against the engine
//! without a chain node: the keyring is a settable snapshot list, the store
//! is a reducer over the action vocabulary with introspection helpers, and
//! the chain replays scripted per-network data while recording every call
//! it receives.

#![allow(clippy::significant_drop_tightening)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::chain::{AccountFeed, AccountUpdate, ChainConnection, ChainConnector};
use crate::error::{SyncError, SyncResult};
use crate::keyring::KeyringSource;
use crate::network::Network;
use crate::registry::Unsubscribe;
use crate::store::{AccountAction, Action, IdentityAction, NetworkAction, StatusAction, Store};
use crate::types::{
    AccountRecord, AccountSnapshot, Address, CddClaim, CddRecord, Did, DidRecord, IdentityRecord,
    IssuerId,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ===== Keyring =====

/// In-memory keyring: a settable snapshot list behind a watch channel.
pub struct MemoryKeyring {
    accounts: watch::Sender<Vec<AccountSnapshot>>,
}

impl MemoryKeyring {
    /// Creates an empty keyring.
    #[must_use]
    pub fn new() -> Self {
        Self {
            accounts: watch::Sender::new(Vec::new()),
        }
    }

    /// Replaces the keyring contents, waking every observer.
    pub fn set_accounts(&self, accounts: Vec<AccountSnapshot>) {
        self.accounts.send_replace(accounts);
    }
}

impl Default for MemoryKeyring {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringSource for MemoryKeyring {
    fn observe(&self) -> watch::Receiver<Vec<AccountSnapshot>> {
        self.accounts.subscribe()
    }
}

// ===== Store =====

/// Connection lifecycle phase as a UI would present it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// No connection attempt yet.
    #[default]
    Idle,
    /// Connecting to the selected network.
    Initializing,
    /// Connected, queries flowing.
    Ready,
    /// Connection or session initialization failed.
    Failed(String),
}

#[derive(Default)]
struct StoreState {
    global_accounts: HashMap<Address, AccountSnapshot>,
    accounts: HashMap<(Network, Address), AccountRecord>,
    identities: HashMap<(Network, Did), IdentityRecord>,
    cdd: HashMap<(Network, Did), CddRecord>,
    address_format: Option<u16>,
    phase: ConnectionPhase,
    populated: Option<Network>,
}

/// In-memory store: a reducer over the action vocabulary plus an ordered
/// log of every dispatch.
///
/// Reducer semantics worth knowing when scripting tests:
///
/// * A per-network account upsert merges, so an absent balance keeps any
///   previously stored balance.
/// * Removing an account globally also prunes identities keyed by it, on
///   every network. That pruning is how DIDs leave the tracked list.
/// * The DID watch emits only when the tracked list actually changes.
pub struct MemoryStore {
    state: Mutex<StoreState>,
    log: Mutex<Vec<Action>>,
    selection: watch::Sender<Option<Network>>,
    dids: watch::Sender<Vec<Did>>,
}

impl MemoryStore {
    /// Creates an empty store with no network selected.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            log: Mutex::new(Vec::new()),
            selection: watch::Sender::new(None),
            dids: watch::Sender::new(Vec::new()),
        }
    }

    /// Writes the network selection, as the wallet UI would. Watchers wake
    /// on every write, including a re-selection of the same network.
    pub fn select_network(&self, network: Option<Network>) {
        self.selection.send_replace(network);
        self.refresh_dids();
    }

    /// Every action dispatched so far, oldest first.
    #[must_use]
    pub fn actions(&self) -> Vec<Action> {
        lock(&self.log).clone()
    }

    /// Drains the action log, returning what it held.
    #[must_use]
    pub fn take_actions(&self) -> Vec<Action> {
        std::mem::take(&mut *lock(&self.log))
    }

    /// Forgets every logged action, usually between test phases.
    pub fn clear_actions(&self) {
        lock(&self.log).clear();
    }

    /// The stored record for one account under one network.
    #[must_use]
    pub fn account(&self, network: Network, address: &Address) -> Option<AccountRecord> {
        lock(&self.state)
            .accounts
            .get(&(network, address.clone()))
            .cloned()
    }

    /// Addresses in the global account list, sorted.
    #[must_use]
    pub fn global_account_addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> =
            lock(&self.state).global_accounts.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// The stored identity record for one DID under one network.
    #[must_use]
    pub fn identity(&self, network: Network, did: &Did) -> Option<IdentityRecord> {
        lock(&self.state)
            .identities
            .get(&(network, did.clone()))
            .cloned()
    }

    /// The stored CDD attestation for one DID under one network.
    #[must_use]
    pub fn cdd(&self, network: Network, did: &Did) -> Option<CddRecord> {
        lock(&self.state).cdd.get(&(network, did.clone())).cloned()
    }

    /// The last address-format parameter dispatched.
    #[must_use]
    pub fn address_format(&self) -> Option<u16> {
        lock(&self.state).address_format
    }

    /// The current connection lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> ConnectionPhase {
        lock(&self.state).phase.clone()
    }

    /// The network named by the last populated signal, if one landed since
    /// the last connection attempt began.
    #[must_use]
    pub fn populated(&self) -> Option<Network> {
        lock(&self.state).populated
    }

    fn apply(&self, action: Action) -> bool {
        let mut state = lock(&self.state);
        match action {
            Action::Account(AccountAction::SetGlobal { data }) => {
                state.global_accounts.insert(data.address.clone(), data);
                false
            }
            Action::Account(AccountAction::RemoveGlobal { address }) => {
                state.global_accounts.remove(&address);
                state.accounts.retain(|(_, held), _| *held != address);
                let orphaned: Vec<(Network, Did)> = state
                    .identities
                    .iter()
                    .filter(|(_, record)| {
                        record.primary_key == address
                            || record.secondary_keys.contains(&address)
                    })
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in orphaned {
                    state.identities.remove(&key);
                    state.cdd.remove(&key);
                }
                true
            }
            Action::Account(AccountAction::Set { network, data }) => {
                let key = (network, data.address.clone());
                let balance = data
                    .balance
                    .or_else(|| state.accounts.get(&key).and_then(|held| held.balance));
                state.accounts.insert(
                    key,
                    AccountRecord {
                        balance,
                        ..data
                    },
                );
                false
            }
            Action::Identity(IdentityAction::Set { network, record }) => {
                state
                    .identities
                    .insert((network, record.did.clone()), record);
                true
            }
            Action::Identity(IdentityAction::Remove { network, did }) => {
                state.identities.remove(&(network, did.clone()));
                state.cdd.remove(&(network, did));
                true
            }
            Action::Identity(IdentityAction::SetCdd { network, did, cdd }) => {
                state.cdd.insert((network, did), cdd);
                false
            }
            Action::Network(NetworkAction::SetAddressFormat { format }) => {
                state.address_format = format;
                false
            }
            Action::Status(StatusAction::Init) => {
                state.phase = ConnectionPhase::Initializing;
                state.populated = None;
                false
            }
            Action::Status(StatusAction::Ready) => {
                state.phase = ConnectionPhase::Ready;
                false
            }
            Action::Status(StatusAction::Populated { network }) => {
                state.populated = Some(network);
                false
            }
            Action::Status(StatusAction::Error { message }) => {
                state.phase = ConnectionPhase::Failed(message);
                false
            }
        }
    }

    fn refresh_dids(&self) {
        let selected = *self.selection.borrow();
        let mut dids: Vec<Did> = selected.map_or_else(Vec::new, |network| {
            lock(&self.state)
                .identities
                .keys()
                .filter(|(held, _)| *held == network)
                .map(|(_, did)| did.clone())
                .collect()
        });
        dids.sort();
        self.dids.send_if_modified(|current| {
            if *current == dids {
                false
            } else {
                *current = dids;
                true
            }
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn dispatch(&self, action: Action) {
        lock(&self.log).push(action.clone());
        if self.apply(action) {
            self.refresh_dids();
        }
    }

    fn selected_network(&self) -> Option<Network> {
        *self.selection.borrow()
    }

    fn watch_selection(&self) -> watch::Receiver<Option<Network>> {
        self.selection.subscribe()
    }

    fn watch_dids(&self) -> watch::Receiver<Vec<Did>> {
        self.dids.subscribe()
    }

    fn account_addresses(&self) -> Vec<Address> {
        let state = lock(&self.state);
        let mut addresses: Vec<Address> = state.global_accounts.keys().cloned().collect();
        for (_, address) in state.accounts.keys() {
            if !addresses.contains(address) {
                addresses.push(address.clone());
            }
        }
        addresses.sort();
        addresses
    }
}

// ===== Chain =====

/// One call the memory chain received, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// A connection was opened.
    Connected(Network),
    /// The active-issuer set was fetched.
    IssuersFetched(Network),
    /// A per-account subscription was set up.
    Subscribed(Network, Address),
    /// A per-account subscription was cancelled.
    Unsubscribed(Network, Address),
    /// A DID record was queried.
    RecordQueried(Network, Did),
    /// A CDD claims range query ran.
    ClaimsQueried(Network, Did),
}

#[derive(Default)]
struct NetworkScript {
    address_format: Option<u16>,
    issuers: Vec<IssuerId>,
    connect_failure: Option<String>,
    issuers_failure: Option<String>,
    subscribe_failures: HashMap<Address, String>,
    accounts: HashMap<Address, AccountUpdate>,
    identities: HashMap<Did, DidRecord>,
    claims: HashMap<Did, Vec<CddClaim>>,
    claims_failures: HashMap<Did, String>,
}

struct Subscriber {
    network: Network,
    address: Address,
    sender: mpsc::UnboundedSender<AccountUpdate>,
}

struct ChainState {
    networks: Mutex<HashMap<Network, NetworkScript>>,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_subscriber: AtomicU64,
    events: Mutex<Vec<ChainEvent>>,
}

impl ChainState {
    fn record(&self, event: ChainEvent) {
        lock(&self.events).push(event);
    }

    fn drop_subscriber(&self, id: u64) {
        if let Some(subscriber) = lock(&self.subscribers).remove(&id) {
            self.record(ChainEvent::Unsubscribed(
                subscriber.network,
                subscriber.address,
            ));
        }
    }
}

/// Cancels a memory-chain account subscription.
struct ChainSubscription {
    state: Arc<ChainState>,
    id: u64,
}

impl Unsubscribe for ChainSubscription {
    fn unsubscribe(self: Box<Self>) -> SyncResult<()> {
        self.state.drop_subscriber(self.id);
        Ok(())
    }
}

/// In-memory chain: scripted per-network data behind the connector and
/// connection traits, with an event log of every call received.
pub struct MemoryChain {
    state: Arc<ChainState>,
}

impl MemoryChain {
    /// Creates a chain with nothing scripted.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(ChainState {
                networks: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(HashMap::new()),
                next_subscriber: AtomicU64::new(0),
                events: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Opens a connection directly, without going through [`ChainConnector`]
    /// and without recording an event.
    #[must_use]
    pub fn open(&self, network: Network) -> Arc<dyn ChainConnection> {
        Arc::new(MemoryConnection {
            state: Arc::clone(&self.state),
            network,
        })
    }

    /// Scripts the address-format parameter reported on `network`.
    pub fn set_address_format(&self, network: Network, format: Option<u16>) {
        self.script(network, |script| script.address_format = format);
    }

    /// Scripts the active CDD issuer set on `network`.
    pub fn set_active_issuers(&self, network: Network, issuers: Vec<IssuerId>) {
        self.script(network, |script| script.issuers = issuers);
    }

    /// Makes every connection attempt to `network` fail.
    pub fn fail_connect(&self, network: Network, reason: &str) {
        let reason = reason.to_owned();
        self.script(network, |script| script.connect_failure = Some(reason));
    }

    /// Makes the active-issuer fetch on `network` fail.
    pub fn fail_issuers(&self, network: Network, reason: &str) {
        let reason = reason.to_owned();
        self.script(network, |script| script.issuers_failure = Some(reason));
    }

    /// Makes subscription setup for one account on `network` fail.
    pub fn fail_subscribe(&self, network: Network, address: Address, reason: &str) {
        let reason = reason.to_owned();
        self.script(network, |script| {
            script.subscribe_failures.insert(address, reason);
        });
    }

    /// Seeds an account's current state on `network` and pushes the update
    /// to every live subscription for it.
    pub fn set_account(&self, network: Network, address: Address, update: AccountUpdate) {
        self.script(network, |script| {
            script.accounts.insert(address.clone(), update.clone());
        });
        let subscribers = lock(&self.state.subscribers);
        for subscriber in subscribers.values() {
            if subscriber.network == network && subscriber.address == address {
                let _ = subscriber.sender.send(update.clone());
            }
        }
    }

    /// Scripts a DID's on-chain record on `network`.
    pub fn set_identity_record(&self, network: Network, did: Did, record: DidRecord) {
        self.script(network, |script| {
            script.identities.insert(did, record);
        });
    }

    /// Scripts a DID's CDD claims on `network`.
    pub fn set_claims(&self, network: Network, did: Did, claims: Vec<CddClaim>) {
        self.script(network, |script| {
            script.claims.insert(did, claims);
        });
    }

    /// Makes the claims query for one DID on `network` fail.
    pub fn fail_claims(&self, network: Network, did: Did, reason: &str) {
        let reason = reason.to_owned();
        self.script(network, |script| {
            script.claims_failures.insert(did, reason);
        });
    }

    /// Every call received so far, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<ChainEvent> {
        lock(&self.state.events).clone()
    }

    /// Drains the event log, returning what it held.
    #[must_use]
    pub fn take_events(&self) -> Vec<ChainEvent> {
        std::mem::take(&mut *lock(&self.state.events))
    }

    /// Forgets every recorded call, usually between test phases.
    pub fn clear_events(&self) {
        lock(&self.state.events).clear();
    }

    /// Addresses with a live subscription on `network`, sorted, one entry
    /// per live subscription.
    #[must_use]
    pub fn subscribed_addresses(&self, network: Network) -> Vec<Address> {
        let mut addresses: Vec<Address> = lock(&self.state.subscribers)
            .values()
            .filter(|subscriber| subscriber.network == network)
            .map(|subscriber| subscriber.address.clone())
            .collect();
        addresses.sort();
        addresses
    }

    fn script(&self, network: Network, edit: impl FnOnce(&mut NetworkScript)) {
        let mut networks = lock(&self.state.networks);
        edit(networks.entry(network).or_default());
    }
}

impl Default for MemoryChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainConnector for MemoryChain {
    async fn connect(&self, network: Network) -> SyncResult<Arc<dyn ChainConnection>> {
        let failure = lock(&self.state.networks)
            .get(&network)
            .and_then(|script| script.connect_failure.clone());
        if let Some(reason) = failure {
            return Err(SyncError::connection(network, reason));
        }
        self.state.record(ChainEvent::Connected(network));
        Ok(self.open(network))
    }
}

struct MemoryConnection {
    state: Arc<ChainState>,
    network: Network,
}

impl MemoryConnection {
    fn script<T>(&self, read: impl FnOnce(&NetworkScript) -> T) -> T {
        let mut networks = lock(&self.state.networks);
        read(networks.entry(self.network).or_default())
    }
}

#[async_trait]
impl ChainConnection for MemoryConnection {
    fn address_format(&self) -> Option<u16> {
        self.script(|script| script.address_format)
    }

    async fn active_cdd_issuers(&self) -> SyncResult<Vec<IssuerId>> {
        self.state.record(ChainEvent::IssuersFetched(self.network));
        let (failure, issuers) =
            self.script(|script| (script.issuers_failure.clone(), script.issuers.clone()));
        if let Some(reason) = failure {
            return Err(SyncError::query("active cdd issuers", reason));
        }
        Ok(issuers)
    }

    async fn subscribe_account(&self, address: &Address) -> SyncResult<AccountFeed> {
        self.state
            .record(ChainEvent::Subscribed(self.network, address.clone()));

        let failure = self.script(|script| script.subscribe_failures.get(address).cloned());
        if let Some(reason) = failure {
            return Err(SyncError::query(format!("subscription for {address}"), reason));
        }

        let (sender, updates) = mpsc::unbounded_channel();
        if let Some(current) = self.script(|script| script.accounts.get(address).cloned()) {
            let _ = sender.send(current);
        }

        let id = self.state.next_subscriber.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.subscribers).insert(
            id,
            Subscriber {
                network: self.network,
                address: address.clone(),
                sender,
            },
        );

        Ok(AccountFeed {
            updates,
            cancel: Box::new(ChainSubscription {
                state: Arc::clone(&self.state),
                id,
            }),
        })
    }

    async fn identity_record(&self, did: &Did) -> SyncResult<DidRecord> {
        self.state
            .record(ChainEvent::RecordQueried(self.network, did.clone()));
        self.script(|script| script.identities.get(did).cloned())
            .ok_or_else(|| SyncError::query(format!("record of {did}"), "unknown did"))
    }

    async fn cdd_claims(&self, did: &Did) -> SyncResult<Vec<CddClaim>> {
        self.state
            .record(ChainEvent::ClaimsQueried(self.network, did.clone()));
        let (failure, claims) = self.script(|script| {
            (
                script.claims_failures.get(did).cloned(),
                script.claims.get(did).cloned(),
            )
        });
        if let Some(reason) = failure {
            return Err(SyncError::query(format!("claims of {did}"), reason));
        }
        Ok(claims.unwrap_or_default())
    }
}
