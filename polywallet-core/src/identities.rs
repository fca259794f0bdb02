//! Identity and CDD reconciliation.
//!
//! Each DID-list emission is diffed against the previous generation:
//! removed DIDs are dispatched away and their registry keys cleared, then
//! every DID still on the list gets its CDD claims refreshed. Claim choice
//! is last-to-expire-wins, with never-expiring claims ranked above all.

use std::cmp::Ordering;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{report, ErrorSource};
use crate::registry::SubscriptionKey;
use crate::session::SyncSession;
use crate::store::{Action, IdentityAction};
use crate::types::{CddClaim, CddRecord, Did, IssuerId};

/// Streams DID-list emissions into claim reconciliation passes.
pub struct IdentityReconciler {
    session: Arc<SyncSession>,
}

impl IdentityReconciler {
    /// Creates the reconciler for a session.
    pub const fn new(session: Arc<SyncSession>) -> Self {
        Self { session }
    }

    /// Pump loop: one pass per DID-list emission, starting with the current
    /// list. Ends when the store side goes away.
    pub async fn run(self, mut dids: watch::Receiver<Vec<Did>>) {
        loop {
            let current = dids.borrow_and_update().clone();
            self.reconcile(current).await;
            if dids.changed().await.is_err() {
                break;
            }
        }
    }

    /// One diff pass over the DID list. Removals complete before any claims
    /// are fetched; each remaining DID is refreshed on its own, so one
    /// failed fetch does not starve the others.
    async fn reconcile(&self, current: Vec<Did>) {
        if !self.session.is_current() {
            log::debug!(
                "dids pass for {} dropped, selection moved",
                self.session.network()
            );
            return;
        }

        let network = self.session.network();
        let previous = self.session.prev_dids();
        for did in previous.into_iter().filter(|did| !current.contains(did)) {
            self.session
                .store()
                .dispatch(Action::Identity(IdentityAction::Remove {
                    network,
                    did: did.clone(),
                }));
            self.session
                .registry()
                .cancel_and_clear(&SubscriptionKey::Identity(did.clone()));
            self.session
                .registry()
                .cancel_and_clear(&SubscriptionKey::IdentityCdd(did));
        }

        for did in &current {
            self.refresh_cdd(did).await;
        }

        self.session.store_dids(current);
    }

    /// Fetches, filters and ranks one DID's claims, then dispatches the
    /// canonical attestation. Dispatches nothing when the fetch fails, the
    /// chain returns no claims, or no claim comes from an active issuer;
    /// whatever CDD state the store holds stays as is.
    async fn refresh_cdd(&self, did: &Did) {
        let network = self.session.network();
        let claims = match self.session.connection().cdd_claims(did).await {
            Ok(claims) => claims,
            Err(error) => {
                report(
                    ErrorSource::ClaimsFetch,
                    Some(&SubscriptionKey::IdentityCdd(did.clone())),
                    Some(network),
                    &error,
                );
                return;
            }
        };

        let Some(cdd) = canonical_cdd(claims, self.session.active_issuers()) else {
            log::debug!("no qualifying cdd claim for {did}");
            return;
        };

        if !self.session.is_current() {
            log::debug!("cdd update for {did} suppressed, selection moved");
            return;
        }

        self.session
            .store()
            .dispatch(Action::Identity(IdentityAction::SetCdd {
                network,
                did: did.clone(),
                cdd,
            }));
    }
}

/// Picks the canonical CDD attestation: drop claims from issuers outside
/// `active_issuers`, order the rest so a never-expiring claim comes first
/// and later expiries beat earlier ones, then take the head.
pub fn canonical_cdd(claims: Vec<CddClaim>, active_issuers: &[IssuerId]) -> Option<CddRecord> {
    let mut qualifying: Vec<CddClaim> = claims
        .into_iter()
        .filter(|claim| active_issuers.contains(&claim.issuer))
        .collect();
    qualifying.sort_by(claim_order);
    qualifying.into_iter().next().map(CddRecord::from)
}

/// Last to expire wins: no expiry sorts before any expiry, and of two
/// expiring claims the later one sorts first.
fn claim_order(a: &CddClaim, b: &CddClaim) -> Ordering {
    match (a.expiry, b.expiry) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a_expiry), Some(b_expiry)) => b_expiry.cmp(&a_expiry),
    }
}
