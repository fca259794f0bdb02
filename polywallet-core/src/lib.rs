//! Subscription-diff reconciliation engine for a Polymesh wallet.
//!
//! The engine keeps a wallet store's accounts, identities and CDD
//! attestations in step with live chain subscriptions. It follows the
//! store's network selection: each selected network gets a fresh session
//! whose reconcilers diff keyring snapshots and DID lists against the
//! previous pass, tear down what disappeared before subscribing what
//! appeared, and guard every dispatch made from an async callback against
//! a stale selection.
//!
//! Collaborators are trait objects supplied by the embedding host: a
//! [`KeyringSource`] for device accounts, a [`ChainConnector`] wrapping its
//! RPC client, and a [`Store`] holding normalized wallet state. In-memory
//! implementations of all three back the tests and host development.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use polywallet_core::{MemoryChain, MemoryKeyring, MemoryStore, Network, SyncEngine};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let keyring = Arc::new(MemoryKeyring::new());
//! let chain = Arc::new(MemoryChain::new());
//! let store = Arc::new(MemoryStore::new());
//!
//! let handle = SyncEngine::start(keyring, chain, store.clone());
//! store.select_network(Some(Network::Pmf));
//! // ... the engine now mirrors chain state into the store ...
//! handle.stop();
//! # }
//! ```

#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

mod chain;
pub use chain::*;

mod coordinator;
pub use coordinator::*;

mod error;
pub use error::*;

mod keyring;
pub use keyring::*;

mod logger;
pub use logger::*;

mod memory;
pub use memory::*;

mod network;
pub use network::*;

mod registry;
pub use registry::*;

mod store;
pub use store::*;

mod types;
pub use types::*;

mod accounts;
pub use accounts::AccountMirror;

// private modules
mod identities;
mod session;
