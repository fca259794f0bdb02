//! Chain network definitions.
//!
//! The engine follows exactly one of these networks at a time; the host
//! switches by writing a new selection into the store.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A Polymesh network the wallet can follow.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Network {
    /// The Polymath-operated mainnet follower. Selected when the wallet has
    /// no stored preference.
    #[default]
    Pmf,
    /// The Alcyone test network.
    Alcyone,
}

impl Network {
    /// WebSocket RPC endpoint for this network.
    #[must_use]
    pub const fn rpc_url(self) -> &'static str {
        match self {
            Self::Pmf => "wss://pmf.polymath.network",
            Self::Alcyone => "wss://alcyone-rpc.polymesh.live",
        }
    }

    /// Human-readable label shown in the wallet's network selector.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pmf => "PMF",
            Self::Alcyone => "Alcyone Testnet",
        }
    }
}
