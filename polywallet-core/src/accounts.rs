//! Account reconciliation.
//!
//! Two variants share the same snapshot diff. The plain mirror keeps the
//! store's global account list in step with the keyring and needs no chain
//! connection. The session reconciler additionally drives per-account chain
//! subscriptions for the selected network: removed accounts are torn down
//! before anything new is subscribed, and a kept account's re-subscribe
//! replaces its registry entry, old cancellation first.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;

use crate::chain::AccountUpdate;
use crate::error::{report, ErrorSource, SyncResult};
use crate::keyring::KeyringSource;
use crate::registry::{SubscriptionKey, TaskGuard, Unsubscribe};
use crate::session::SyncSession;
use crate::store::{AccountAction, Action, IdentityAction, Store};
use crate::types::{AccountRecord, AccountSnapshot, Address, Balance, IdentityRecord};

/// Keyring-to-store mirror that runs without a chain connection.
///
/// Each keyring snapshot is diffed against the store's current global
/// account list: removed addresses dispatch a global removal, every
/// snapshot entry a global upsert carrying its display name.
pub struct AccountMirror {
    keyring: Arc<dyn KeyringSource>,
    store: Arc<dyn Store>,
}

impl AccountMirror {
    /// Creates a mirror over the given collaborators.
    #[must_use]
    pub const fn new(keyring: Arc<dyn KeyringSource>, store: Arc<dyn Store>) -> Self {
        Self { keyring, store }
    }

    /// Spawns the mirror onto the current runtime and returns its
    /// cancellation guard.
    #[must_use]
    pub fn spawn(self) -> TaskGuard {
        let task = tokio::spawn(self.run());
        TaskGuard::new(task.abort_handle())
    }

    async fn run(self) {
        let mut snapshots = self.keyring.observe();
        loop {
            let snapshot = snapshots.borrow_and_update().clone();
            self.mirror(&snapshot);
            if snapshots.changed().await.is_err() {
                break;
            }
        }
    }

    fn mirror(&self, snapshot: &[AccountSnapshot]) {
        let current: Vec<Address> = snapshot
            .iter()
            .map(|entry| entry.address.clone())
            .collect();

        let previous = self.store.account_addresses();
        for address in previous
            .into_iter()
            .filter(|address| !current.contains(address))
        {
            log::debug!("account {address} left the keyring");
            self.store
                .dispatch(Action::Account(AccountAction::RemoveGlobal { address }));
        }

        for entry in snapshot {
            self.store
                .dispatch(Action::Account(AccountAction::SetGlobal {
                    data: entry.clone(),
                }));
        }
    }
}

/// Streams keyring snapshots into diff passes for one network session.
pub struct AccountReconciler {
    session: Arc<SyncSession>,
}

impl AccountReconciler {
    /// Creates the reconciler for a session.
    pub const fn new(session: Arc<SyncSession>) -> Self {
        Self { session }
    }

    /// Pump loop: one reconciliation pass per keyring emission, starting
    /// with the current snapshot. Ends when the keyring side goes away.
    pub async fn run(self, mut snapshots: watch::Receiver<Vec<AccountSnapshot>>) {
        loop {
            let snapshot = snapshots.borrow_and_update().clone();
            self.reconcile(&snapshot).await;
            if snapshots.changed().await.is_err() {
                break;
            }
        }
    }

    /// One diff pass over a keyring snapshot. Removals complete before any
    /// upsert issues a new subscription.
    async fn reconcile(&self, snapshot: &[AccountSnapshot]) {
        if !self.session.is_current() {
            log::debug!(
                "accounts pass for {} dropped, selection moved",
                self.session.network()
            );
            return;
        }

        let current: Vec<Address> = snapshot
            .iter()
            .map(|entry| entry.address.clone())
            .collect();

        let previous = self.session.prev_accounts();
        for address in previous
            .into_iter()
            .filter(|address| !current.contains(address))
        {
            let key = SubscriptionKey::Account(address.clone());
            self.session
                .store()
                .dispatch(Action::Account(AccountAction::RemoveGlobal { address }));
            self.session.registry().cancel_and_clear(&key);
        }

        for entry in snapshot {
            self.upsert(entry).await;
        }

        self.session.store_accounts(current);
    }

    /// Dispatches the named upsert and (re)subscribes the account's chain
    /// feed. Every account after a pass's first runs as a continuation of
    /// the previous account's subscribe, so the live selection is re-checked
    /// here before anything is dispatched or registered. A subscription
    /// failure is reported and isolated to this account; the rest of the
    /// pass continues.
    async fn upsert(&self, entry: &AccountSnapshot) {
        let network = self.session.network();
        if !self.session.is_current() {
            log::debug!(
                "upsert for {} on {network} skipped, selection moved",
                entry.address
            );
            return;
        }

        self.session
            .store()
            .dispatch(Action::Account(AccountAction::Set {
                network,
                data: AccountRecord {
                    address: entry.address.clone(),
                    name: entry.name.clone(),
                    balance: None,
                },
            }));

        let key = SubscriptionKey::Account(entry.address.clone());
        match self
            .session
            .connection()
            .subscribe_account(&entry.address)
            .await
        {
            Ok(feed) => {
                let pump = tokio::spawn(account_update_pump(
                    Arc::clone(&self.session),
                    entry.address.clone(),
                    entry.name.clone(),
                    feed.updates,
                ));
                self.session.registry().set(
                    key,
                    Box::new(FeedGuard {
                        chain: feed.cancel,
                        pump: pump.abort_handle(),
                    }),
                );
            }
            Err(error) => {
                report(ErrorSource::AccountSubscribe, Some(&key), Some(network), &error);
            }
        }
    }
}

/// Drains one account's chain feed into store dispatches. Every dispatch is
/// preceded by a staleness check so a late callback from a superseded
/// network cannot touch the store.
async fn account_update_pump(
    session: Arc<SyncSession>,
    address: Address,
    name: Option<String>,
    mut updates: mpsc::UnboundedReceiver<AccountUpdate>,
) {
    let network = session.network();
    while let Some(update) = updates.recv().await {
        if !session.is_current() {
            log::debug!("balance update for {address} on {network} suppressed, selection moved");
            continue;
        }

        session
            .store()
            .dispatch(Action::Account(AccountAction::Set {
                network,
                data: AccountRecord {
                    address: address.clone(),
                    name: name.clone(),
                    balance: Some(Balance::derive(&update.data)),
                },
            }));

        let Some(did) = update.linked_did else {
            continue;
        };
        match session.connection().identity_record(&did).await {
            Ok(record) => {
                if !session.is_current() {
                    log::debug!("identity record for {did} suppressed, selection moved");
                    continue;
                }
                session
                    .store()
                    .dispatch(Action::Identity(IdentityAction::Set {
                        network,
                        record: IdentityRecord::from_chain(did, record),
                    }));
            }
            Err(error) => {
                report(
                    ErrorSource::IdentityRecord,
                    Some(&SubscriptionKey::Identity(did.clone())),
                    Some(network),
                    &error,
                );
            }
        }
    }
}

/// Cancels a per-account subscription: the chain side first, then the pump
/// task draining its feed.
struct FeedGuard {
    chain: Box<dyn Unsubscribe>,
    pump: AbortHandle,
}

impl Unsubscribe for FeedGuard {
    fn unsubscribe(self: Box<Self>) -> SyncResult<()> {
        let result = self.chain.unsubscribe();
        self.pump.abort();
        result
    }
}
