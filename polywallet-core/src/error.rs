//! Error types and the shared reporting boundary.
//!
//! The engine never propagates a failure to the embedding host. Every
//! isolated unit of async work terminates in [`report`], which tags the
//! failure with where it happened and lets the rest of the engine keep
//! running.

use strum::Display;
use thiserror::Error;

use crate::network::Network;
use crate::registry::SubscriptionKey;

/// Result alias used across the crate.
pub type SyncResult<T> = Result<T, SyncError>;

/// Failures surfaced by the engine or its chain collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Opening a chain connection failed.
    #[error("connection to {network} failed: {reason}")]
    Connection {
        /// The network the connection was for.
        network: Network,
        /// Failure detail reported by the connector.
        reason: String,
    },
    /// A chain query or subscription setup failed.
    #[error("{subject} query failed: {reason}")]
    Query {
        /// What was being fetched.
        subject: String,
        /// Failure detail reported by the connection.
        reason: String,
    },
    /// A stored cancellation action failed when invoked.
    #[error("cancellation failed: {reason}")]
    Cancellation {
        /// Failure detail reported by the subscription.
        reason: String,
    },
}

impl SyncError {
    /// Builds a connection error for `network`.
    #[must_use]
    pub fn connection(network: Network, reason: impl Into<String>) -> Self {
        Self::Connection {
            network,
            reason: reason.into(),
        }
    }

    /// Builds a query error for the given subject.
    #[must_use]
    pub fn query(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Query {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    /// Builds a cancellation error.
    #[must_use]
    pub fn cancellation(reason: impl Into<String>) -> Self {
        Self::Cancellation {
            reason: reason.into(),
        }
    }
}

/// The kind of work a reported failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorSource {
    /// Opening the chain connection.
    Connect,
    /// The once-per-connection active-issuer fetch.
    ActiveIssuers,
    /// Setting up a per-account chain subscription.
    AccountSubscribe,
    /// Resolving a DID's identity record.
    IdentityRecord,
    /// Fetching a DID's CDD claims.
    ClaimsFetch,
    /// Invoking a stored cancellation action.
    Cancellation,
}

/// Logs a failure with the context its unit of work had: the kind of work,
/// the registry key it ran under, and the network session it belonged to.
pub fn report(
    source: ErrorSource,
    key: Option<&SubscriptionKey>,
    network: Option<Network>,
    error: &SyncError,
) {
    match (key, network) {
        (Some(key), Some(network)) => {
            log::error!("sync {source} failed (key {key}, network {network}): {error}");
        }
        (Some(key), None) => log::error!("sync {source} failed (key {key}): {error}"),
        (None, Some(network)) => log::error!("sync {source} failed (network {network}): {error}"),
        (None, None) => log::error!("sync {source} failed: {error}"),
    }
}
