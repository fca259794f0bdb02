//! The store collaborator seam and its action vocabulary.
//!
//! The engine writes through [`Store::dispatch`] and reads back only what
//! reconciliation needs: the live network selection, the DID list tracked
//! under it, and the global account list the plain mirror diffs against.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::network::Network;
use crate::types::{AccountRecord, AccountSnapshot, Address, CddRecord, Did, IdentityRecord};

/// Account-domain actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountAction {
    /// Upsert an account under every network.
    SetGlobal {
        /// Address and display name from the keyring.
        data: AccountSnapshot,
    },
    /// Remove an account from every network.
    RemoveGlobal {
        /// The address to remove.
        address: Address,
    },
    /// Upsert an account's record under one network.
    ///
    /// The store merges: an absent balance leaves any previously stored
    /// balance in place, so the named upsert at the start of a pass does
    /// not blank what an earlier chain callback delivered.
    Set {
        /// The network the record was computed under.
        network: Network,
        /// The record payload.
        data: AccountRecord,
    },
}

/// Identity-domain actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityAction {
    /// Upsert an identity record.
    Set {
        /// The network the record was resolved under.
        network: Network,
        /// The record payload.
        record: IdentityRecord,
    },
    /// Remove an identity.
    Remove {
        /// The network the identity was tracked under.
        network: Network,
        /// The DID to remove.
        did: Did,
    },
    /// Attach the canonical CDD attestation to an identity.
    SetCdd {
        /// The network the claims were fetched under.
        network: Network,
        /// The DID the attestation belongs to.
        did: Did,
        /// The chosen attestation.
        cdd: CddRecord,
    },
}

/// Network-domain actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkAction {
    /// Propagate the connected chain's address-format parameter.
    SetAddressFormat {
        /// ss58 prefix, when the chain reports one.
        format: Option<u16>,
    },
}

/// Status-domain actions reflecting the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusAction {
    /// A connection attempt for the selected network has started.
    Init,
    /// The connection is open and queries may be issued.
    Ready,
    /// The first wave of subscription callbacks has had time to land.
    Populated {
        /// The network the signal belongs to.
        network: Network,
    },
    /// Connection or session initialization failed.
    Error {
        /// Human-readable failure description.
        message: String,
    },
}

/// A dispatched update, namespaced by domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Account domain.
    Account(AccountAction),
    /// Identity domain.
    Identity(IdentityAction),
    /// Network domain.
    Network(NetworkAction),
    /// Status domain.
    Status(StatusAction),
}

/// External collaborator holding normalized wallet state.
pub trait Store: Send + Sync {
    /// Applies one action. Fire and forget; the store must not call back
    /// into the engine from inside a dispatch.
    fn dispatch(&self, action: Action);

    /// The live network selection.
    fn selected_network(&self) -> Option<Network>;

    /// Watches the network selection. Every write wakes watchers, including
    /// a re-selection of the already selected network.
    fn watch_selection(&self) -> watch::Receiver<Option<Network>>;

    /// Watches the DID list tracked for the selected network.
    fn watch_dids(&self) -> watch::Receiver<Vec<Did>>;

    /// Addresses currently known to the store across all networks. The
    /// plain account mirror diffs keyring snapshots against this list.
    fn account_addresses(&self) -> Vec<Address>;
}
