//! Network lifecycle orchestration.
//!
//! The coordinator is the engine's outer loop. It follows the store's
//! network selection; every emission, including a re-selection of the same
//! network, tears the previous subscription tree down, connects, seeds the
//! status lifecycle and hands a fresh session to the reconcilers. A failed
//! connection parks the engine until the next selection event.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::AbortHandle;

use crate::accounts::AccountReconciler;
use crate::chain::ChainConnector;
use crate::error::{report, ErrorSource, SyncResult};
use crate::identities::IdentityReconciler;
use crate::keyring::KeyringSource;
use crate::network::Network;
use crate::registry::{SubscriptionKey, SubscriptionRegistry, TaskGuard, Unsubscribe};
use crate::session::SyncSession;
use crate::store::{Action, NetworkAction, StatusAction, Store};

/// Delay between the ready status and the populated signal, giving the
/// first wave of subscription callbacks time to land.
pub const POPULATED_DELAY: Duration = Duration::from_secs(2);

/// Follows the selection watch and runs one switch cycle per emission.
struct NetworkSwitchCoordinator {
    keyring: Arc<dyn KeyringSource>,
    connector: Arc<dyn ChainConnector>,
    store: Arc<dyn Store>,
    registry: Arc<SubscriptionRegistry>,
}

impl NetworkSwitchCoordinator {
    async fn run(self) {
        let mut selection = self.store.watch_selection();
        loop {
            let selected = *selection.borrow_and_update();
            self.switch_to(selected).await;
            if selection.changed().await.is_err() {
                break;
            }
        }
    }

    /// One selection cycle. Always starts by dropping the previous
    /// network's whole subscription tree, whatever the new selection is.
    async fn switch_to(&self, selected: Option<Network>) {
        self.registry.cancel_and_clear(&SubscriptionKey::Network);

        let Some(network) = selected else {
            log::info!("no network selected, engine idle");
            return;
        };

        log::info!("selected {network}, connecting to {}", network.rpc_url());
        self.store.dispatch(Action::Status(StatusAction::Init));

        let connection = match self.connector.connect(network).await {
            Ok(connection) => connection,
            Err(error) => {
                report(ErrorSource::Connect, None, Some(network), &error);
                self.store.dispatch(Action::Status(StatusAction::Error {
                    message: error.to_string(),
                }));
                return;
            }
        };

        // A slow connect can lose the race against the next selection.
        if self.store.selected_network() != Some(network) {
            log::debug!("connection to {network} discarded, selection moved");
            return;
        }

        self.store.dispatch(Action::Status(StatusAction::Ready));
        self.store
            .dispatch(Action::Network(NetworkAction::SetAddressFormat {
                format: connection.address_format(),
            }));

        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            tokio::time::sleep(POPULATED_DELAY).await;
            if store.selected_network() == Some(network) {
                store.dispatch(Action::Status(StatusAction::Populated { network }));
            }
        });

        let active_issuers = match connection.active_cdd_issuers().await {
            Ok(issuers) => issuers,
            Err(error) => {
                report(ErrorSource::ActiveIssuers, None, Some(network), &error);
                self.store.dispatch(Action::Status(StatusAction::Error {
                    message: error.to_string(),
                }));
                return;
            }
        };
        log::info!(
            "{} active cdd issuers recognized on {network}",
            active_issuers.len()
        );

        let session = Arc::new(SyncSession::new(
            network,
            connection,
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            active_issuers,
        ));

        log::info!("subscribing to accounts");
        let accounts = tokio::spawn(
            AccountReconciler::new(Arc::clone(&session)).run(self.keyring.observe()),
        );
        self.registry.set(
            SubscriptionKey::Accounts,
            Box::new(TaskGuard::new(accounts.abort_handle())),
        );

        log::info!("subscribing to dids");
        let dids =
            tokio::spawn(IdentityReconciler::new(session).run(self.store.watch_dids()));
        self.registry.set(
            SubscriptionKey::Dids,
            Box::new(TaskGuard::new(dids.abort_handle())),
        );

        self.registry.set(
            SubscriptionKey::Network,
            Box::new(SessionGuard {
                registry: Arc::downgrade(&self.registry),
            }),
        );
    }
}

/// Master teardown for one network session. Invoked after its own entry has
/// been removed, so the sweep it runs cancels both reconcilers and every
/// per-account and per-DID entry they registered, and nothing recurses.
struct SessionGuard {
    registry: Weak<SubscriptionRegistry>,
}

impl Unsubscribe for SessionGuard {
    fn unsubscribe(self: Box<Self>) -> SyncResult<()> {
        if let Some(registry) = self.registry.upgrade() {
            registry.cancel_all();
        }
        Ok(())
    }
}

/// The reconciliation engine.
pub struct SyncEngine;

impl SyncEngine {
    /// Starts the engine over the given collaborators and returns its
    /// handle. Must be called within a tokio runtime; the coordinator task
    /// follows the store's network selection until the handle is stopped or
    /// the store drops the selection watch.
    #[must_use]
    pub fn start(
        keyring: Arc<dyn KeyringSource>,
        connector: Arc<dyn ChainConnector>,
        store: Arc<dyn Store>,
    ) -> SyncHandle {
        let registry = Arc::new(SubscriptionRegistry::new());
        let coordinator = NetworkSwitchCoordinator {
            keyring,
            connector,
            store,
            registry: Arc::clone(&registry),
        };
        let task = tokio::spawn(coordinator.run());
        SyncHandle {
            registry,
            coordinator: task.abort_handle(),
        }
    }
}

/// Handle to a running engine.
pub struct SyncHandle {
    registry: Arc<SubscriptionRegistry>,
    coordinator: AbortHandle,
}

impl SyncHandle {
    /// Stops the engine: aborts the coordinator and cancels every live
    /// subscription. Dropping the handle without calling this leaves the
    /// engine running detached.
    pub fn stop(self) {
        self.coordinator.abort();
        self.registry.cancel_all();
        log::info!("sync engine stopped");
    }

    /// Number of live registry entries, exposed for host diagnostics.
    #[must_use]
    pub fn live_subscriptions(&self) -> usize {
        self.registry.len()
    }
}
