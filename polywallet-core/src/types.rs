//! Data model shared across the engine.
//!
//! Identifier newtypes arrive from collaborators already encoded for the
//! connection's network; the engine treats them as opaque strings and never
//! re-encodes them.

use std::fmt;

use serde::{Deserialize, Serialize};

// ===== Identifiers =====

/// An ss58-encoded account address.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Creates an address from its encoded string form.
    #[must_use]
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Returns the encoded string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Address {
    fn from(encoded: &str) -> Self {
        Self(encoded.to_owned())
    }
}

/// A decentralized identity identifier anchored on-chain.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Did(String);

impl Did {
    /// Creates a DID from its encoded string form.
    #[must_use]
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Returns the encoded string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Did({})", self.0)
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Did {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Did {
    fn from(encoded: &str) -> Self {
        Self(encoded.to_owned())
    }
}

/// Identity of a CDD service provider recognized by the chain.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssuerId(String);

impl IssuerId {
    /// Creates an issuer identity from its encoded string form.
    #[must_use]
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Returns the encoded string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for IssuerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IssuerId({})", self.0)
    }
}

impl fmt::Display for IssuerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for IssuerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for IssuerId {
    fn from(encoded: &str) -> Self {
        Self(encoded.to_owned())
    }
}

// ===== Accounts =====

/// One keyring entry as reported by the keyring source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// The account address.
    pub address: Address,
    /// Display name assigned in the keyring, if any.
    pub name: Option<String>,
}

impl AccountSnapshot {
    /// Creates a snapshot entry.
    #[must_use]
    pub fn new(address: Address, name: Option<String>) -> Self {
        Self { address, name }
    }
}

/// Raw balance data delivered by the chain for one account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAccountData {
    /// Free balance, in the chain's smallest unit.
    pub free: u128,
    /// Reserved (bonded) balance.
    pub reserved: u128,
    /// Balance locks currently applied to the account.
    pub locks: Vec<BalanceLock>,
}

/// A single balance lock reported by the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceLock {
    /// Lock identifier assigned by the pallet that created it.
    pub id: String,
    /// Locked amount. Locks overlap, they do not stack.
    pub amount: u128,
}

/// Derived balance triple stored per account and network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Free plus reserved.
    pub total: u128,
    /// What the account may spend: total minus the largest lock, saturating.
    pub transferrable: u128,
    /// The largest single lock amount, zero when no locks apply.
    pub locked: u128,
}

impl Balance {
    /// Derives the stored triple from raw chain data.
    #[must_use]
    pub fn derive(raw: &RawAccountData) -> Self {
        let total = raw.free.saturating_add(raw.reserved);
        let locked = raw.locks.iter().map(|lock| lock.amount).max().unwrap_or(0);
        Self {
            total,
            transferrable: total.saturating_sub(locked),
            locked,
        }
    }
}

/// Store-resident account state for one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// The account address.
    pub address: Address,
    /// Display name from the keyring snapshot that produced this record.
    pub name: Option<String>,
    /// Derived balances, absent until the first chain callback lands.
    pub balance: Option<Balance>,
}

// ===== Identities =====

/// A signatory listed on an on-chain DID record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signatory {
    /// An account key, encoded for the connection's network.
    Account(Address),
    /// Another on-chain identity.
    Identity(Did),
}

/// A DID record as delivered by the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DidRecord {
    /// The identity's primary key.
    pub primary_key: Address,
    /// Every signatory attached to the identity.
    pub secondary_keys: Vec<Signatory>,
}

/// Store-resident identity state for one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// The DID.
    pub did: Did,
    /// The identity's primary key.
    pub primary_key: Address,
    /// Secondary account keys. Identity-kind signatories are dropped.
    pub secondary_keys: Vec<Address>,
}

impl IdentityRecord {
    /// Builds the stored record from a chain DID record, keeping only
    /// account-kind signatories.
    #[must_use]
    pub fn from_chain(did: Did, record: DidRecord) -> Self {
        let secondary_keys = record
            .secondary_keys
            .into_iter()
            .filter_map(|signatory| match signatory {
                Signatory::Account(address) => Some(address),
                Signatory::Identity(_) => None,
            })
            .collect();
        Self {
            did,
            primary_key: record.primary_key,
            secondary_keys,
        }
    }
}

// ===== Claims =====

/// One CDD claim entry returned by the chain's claims range query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CddClaim {
    /// The identity that issued the claim.
    pub issuer: IssuerId,
    /// Expiry as a millisecond timestamp. `None` never expires.
    pub expiry: Option<u64>,
}

/// The canonical CDD attestation chosen for a DID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CddRecord {
    /// The issuer of the chosen claim.
    pub issuer: IssuerId,
    /// Expiry of the chosen claim, if it expires at all.
    pub expiry: Option<u64>,
}

impl From<CddClaim> for CddRecord {
    fn from(claim: CddClaim) -> Self {
        Self {
            issuer: claim.issuer,
            expiry: claim.expiry,
        }
    }
}
