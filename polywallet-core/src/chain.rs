//! Chain collaborator seams.
//!
//! The RPC client itself lives outside this crate; these traits are the
//! surface the engine needs from it. Addresses and DIDs cross the boundary
//! already encoded for the connection's network.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SyncResult;
use crate::network::Network;
use crate::registry::Unsubscribe;
use crate::types::{Address, CddClaim, Did, DidRecord, IssuerId, RawAccountData};

/// One update delivered by a per-account subscription: the account's raw
/// balance data joined with its identity link, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountUpdate {
    /// Raw balance data for the account.
    pub data: RawAccountData,
    /// The DID the account key is linked to, when one exists.
    pub linked_did: Option<Did>,
}

/// A live per-account subscription: the update feed plus its cancellation.
pub struct AccountFeed {
    /// Receives one [`AccountUpdate`] per chain-side change, starting with
    /// the current state.
    pub updates: mpsc::UnboundedReceiver<AccountUpdate>,
    /// Cancels the chain-side subscription. Dropping the feed without
    /// invoking this leaves the subscription running.
    pub cancel: Box<dyn Unsubscribe>,
}

/// Per-network connection factory.
#[async_trait]
pub trait ChainConnector: Send + Sync {
    /// Opens a connection to `network`.
    ///
    /// # Errors
    ///
    /// Returns a connection error when the endpoint cannot be reached.
    async fn connect(&self, network: Network) -> SyncResult<Arc<dyn ChainConnection>>;
}

/// An open connection to one network.
///
/// A connection is only ever used by the session it was opened for; once
/// that session is torn down the engine drops every reference to it.
#[async_trait]
pub trait ChainConnection: Send + Sync {
    /// The chain's ss58 address-format parameter, when it reports one.
    fn address_format(&self) -> Option<u16>;

    /// Identities currently recognized as CDD service providers.
    ///
    /// # Errors
    ///
    /// Returns a query error when the membership query fails.
    async fn active_cdd_issuers(&self) -> SyncResult<Vec<IssuerId>>;

    /// Subscribes to balance and identity-link changes for one account.
    ///
    /// # Errors
    ///
    /// Returns a query error when the subscription cannot be set up.
    async fn subscribe_account(&self, address: &Address) -> SyncResult<AccountFeed>;

    /// Resolves a DID's on-chain record.
    ///
    /// # Errors
    ///
    /// Returns a query error when the record query fails.
    async fn identity_record(&self, did: &Did) -> SyncResult<DidRecord>;

    /// Fetches a DID's CDD-type claims.
    ///
    /// # Errors
    ///
    /// Returns a query error when the range query fails.
    async fn cdd_claims(&self, did: &Did) -> SyncResult<Vec<CddClaim>>;
}
