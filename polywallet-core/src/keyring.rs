//! The keyring collaborator seam.

use tokio::sync::watch;

use crate::types::AccountSnapshot;

/// External collaborator exposing the device keyring.
///
/// The receiver always holds the latest full snapshot and wakes watchers on
/// every keyring mutation. The stream is restartable: each call returns a
/// fresh receiver positioned at the current value, so a new observer starts
/// with an immediate pass over what the keyring holds right now.
pub trait KeyringSource: Send + Sync {
    /// Observes the keyring contents.
    fn observe(&self) -> watch::Receiver<Vec<AccountSnapshot>>;
}
