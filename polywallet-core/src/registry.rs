//! Keyed subscription bookkeeping.
//!
//! The registry owns every live cancellation in the engine under a single
//! rule: at most one live entry per key. Storing against an occupied key
//! cancels the old entry first, teardown of a missing key is a no-op, and a
//! full sweep keeps going past individual failures.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::task::AbortHandle;

use crate::error::{report, ErrorSource, SyncResult};
use crate::types::{Address, Did};

/// Logical key a subscription is registered under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionKey {
    /// The selected network's whole subscription tree.
    Network,
    /// The account reconciler's keyring stream.
    Accounts,
    /// The identity reconciler's DID-list stream.
    Dids,
    /// A per-account chain subscription.
    Account(Address),
    /// A per-DID identity subscription.
    Identity(Did),
    /// A per-DID CDD claims subscription.
    IdentityCdd(Did),
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Accounts => write!(f, "accounts"),
            Self::Dids => write!(f, "dids"),
            Self::Account(address) => write!(f, "{address}"),
            Self::Identity(did) => write!(f, "{did}"),
            Self::IdentityCdd(did) => write!(f, "{did}:cdd"),
        }
    }
}

/// A cancellable subscription, stored uniformly whatever its origin.
pub trait Unsubscribe: Send {
    /// Cancels the underlying subscription.
    ///
    /// Consumes the value; the registry invokes it at most once per entry.
    ///
    /// # Errors
    ///
    /// Implementations may surface a collaborator failure. Callers treat it
    /// as log-and-continue, never as fatal.
    fn unsubscribe(self: Box<Self>) -> SyncResult<()>;
}

/// Cancels by aborting a spawned pump task.
#[derive(Debug)]
pub struct TaskGuard {
    handle: AbortHandle,
}

impl TaskGuard {
    /// Wraps a task's abort handle.
    #[must_use]
    pub const fn new(handle: AbortHandle) -> Self {
        Self { handle }
    }
}

impl Unsubscribe for TaskGuard {
    fn unsubscribe(self: Box<Self>) -> SyncResult<()> {
        self.handle.abort();
        Ok(())
    }
}

/// Keyed map from logical keys to live cancellation actions.
///
/// Entries are always removed under the lock and invoked with the lock
/// released, so a cancellation action may itself call back into the
/// registry. The master teardown relies on this: its action sweeps every
/// remaining entry after its own has already been removed.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<SubscriptionKey, Box<dyn Unsubscribe>>>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `cancel` under `key`, first cancelling any entry already held
    /// for the same key.
    pub fn set(&self, key: SubscriptionKey, cancel: Box<dyn Unsubscribe>) {
        let prior = self.entries().remove(&key);
        if let Some(prior) = prior {
            Self::invoke(&key, prior);
        }
        self.entries().insert(key, cancel);
    }

    /// Cancels and removes the entry under `key`.
    ///
    /// A missing key is a no-op, so repeated teardown of the same key never
    /// invokes a cancellation twice.
    pub fn cancel_and_clear(&self, key: &SubscriptionKey) {
        let entry = self.entries().remove(key);
        if let Some(entry) = entry {
            Self::invoke(key, entry);
        }
    }

    /// Cancels and removes every entry, continuing past individual
    /// failures. The registry is empty afterwards.
    pub fn cancel_all(&self) {
        let drained: Vec<(SubscriptionKey, Box<dyn Unsubscribe>)> =
            self.entries().drain().collect();
        for (key, entry) in drained {
            Self::invoke(&key, entry);
        }
    }

    /// Whether a live entry exists for `key`.
    #[must_use]
    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.entries().contains_key(key)
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether the registry holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<SubscriptionKey, Box<dyn Unsubscribe>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn invoke(key: &SubscriptionKey, entry: Box<dyn Unsubscribe>) {
        log::debug!("cancelling subscription {key}");
        if let Err(error) = entry.unsubscribe() {
            report(ErrorSource::Cancellation, Some(key), None, &error);
        }
    }
}
