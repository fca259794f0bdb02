//! End-to-end engine flows over the in-memory collaborators.
//!
//! Every test runs on a paused clock and drives the engine with scheduler
//! yields, so task interleaving and the populated timer are deterministic.

mod common;

use std::sync::Arc;

use common::{yield_until, Harness};
use polywallet_core::{
    AccountMirror, AccountSnapshot, AccountUpdate, Address, Balance, BalanceLock, CddClaim,
    CddRecord, ChainEvent, ConnectionPhase, Did, DidRecord, IssuerId, Network, RawAccountData,
    Signatory, POPULATED_DELAY,
};

fn snapshot(address: &str, name: &str) -> AccountSnapshot {
    AccountSnapshot::new(Address::from(address), Some(name.to_owned()))
}

fn update(free: u128, linked_did: Option<Did>) -> AccountUpdate {
    AccountUpdate {
        data: RawAccountData {
            free,
            reserved: 0,
            locks: Vec::new(),
        },
        linked_did,
    }
}

fn claim(issuer: &str, expiry: Option<u64>) -> CddClaim {
    CddClaim {
        issuer: IssuerId::from(issuer),
        expiry,
    }
}

#[tokio::test(start_paused = true)]
async fn test_connect_lifecycle_and_populated_signal() {
    let harness = Harness::new();
    harness.chain.set_address_format(Network::Pmf, Some(42));
    harness
        .chain
        .set_active_issuers(Network::Pmf, vec![IssuerId::from("0xcdd1")]);

    let _handle = harness.start();
    harness.store.select_network(Some(Network::Pmf));

    let store = Arc::clone(&harness.store);
    yield_until("connection ready", || store.phase() == ConnectionPhase::Ready).await;

    assert_eq!(harness.store.address_format(), Some(42));
    let events = harness.chain.events();
    assert!(events.contains(&ChainEvent::Connected(Network::Pmf)));
    assert!(events.contains(&ChainEvent::IssuersFetched(Network::Pmf)));

    // The populated signal waits out its delay.
    assert_eq!(harness.store.populated(), None);
    tokio::time::advance(POPULATED_DELAY).await;
    yield_until("populated signal", || {
        store.populated() == Some(Network::Pmf)
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_populated_timer_is_suppressed_once_selection_moves() {
    let harness = Harness::new();
    let _handle = harness.start();
    harness.store.select_network(Some(Network::Pmf));

    let store = Arc::clone(&harness.store);
    yield_until("connection ready", || store.phase() == ConnectionPhase::Ready).await;

    // Deselect while the timer is still pending, then let it expire. Its
    // dispatch re-checks the live selection and must find it gone.
    harness.store.select_network(None);
    tokio::time::advance(POPULATED_DELAY).await;
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }

    assert_eq!(harness.store.populated(), None);
}

#[tokio::test(start_paused = true)]
async fn test_initial_accounts_get_subscriptions_and_balances() {
    let harness = Harness::new();
    harness.chain.set_account(
        Network::Pmf,
        Address::from("5Alice"),
        AccountUpdate {
            data: RawAccountData {
                free: 100,
                reserved: 20,
                locks: vec![
                    BalanceLock {
                        id: "staking".to_owned(),
                        amount: 30,
                    },
                    BalanceLock {
                        id: "voting".to_owned(),
                        amount: 50,
                    },
                ],
            },
            linked_did: None,
        },
    );
    harness
        .chain
        .set_account(Network::Pmf, Address::from("5Bob"), update(7, None));
    harness
        .keyring
        .set_accounts(vec![snapshot("5Alice", "alice"), snapshot("5Bob", "bob")]);

    let _handle = harness.start();
    harness.store.select_network(Some(Network::Pmf));

    let store = Arc::clone(&harness.store);
    yield_until("balances landed", || {
        store
            .account(Network::Pmf, &Address::from("5Alice"))
            .and_then(|record| record.balance)
            .is_some()
            && store
                .account(Network::Pmf, &Address::from("5Bob"))
                .and_then(|record| record.balance)
                .is_some()
    })
    .await;

    let alice = harness
        .store
        .account(Network::Pmf, &Address::from("5Alice"))
        .unwrap();
    assert_eq!(alice.name.as_deref(), Some("alice"));
    assert_eq!(
        alice.balance,
        Some(Balance {
            total: 120,
            transferrable: 70,
            locked: 50,
        })
    );

    assert_eq!(
        harness.chain.subscribed_addresses(Network::Pmf),
        vec![Address::from("5Alice"), Address::from("5Bob")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_keyring_diff_tears_down_removed_before_subscribing() {
    let harness = Harness::new();
    for address in ["5Alice", "5Bob", "5Carol"] {
        harness
            .chain
            .set_account(Network::Pmf, Address::from(address), update(1, None));
    }
    harness
        .keyring
        .set_accounts(vec![snapshot("5Alice", "alice"), snapshot("5Bob", "bob")]);

    let _handle = harness.start();
    // The global account list is the mirror's to maintain; run it alongside
    // the engine so both sides of the diff land in the store.
    let _mirror = AccountMirror::new(harness.keyring.clone(), harness.store.clone()).spawn();
    harness.store.select_network(Some(Network::Pmf));

    let store = Arc::clone(&harness.store);
    yield_until("initial pass settled", || {
        store.account(Network::Pmf, &Address::from("5Bob")).is_some()
    })
    .await;
    harness.chain.clear_events();
    harness.store.clear_actions();

    harness
        .keyring
        .set_accounts(vec![snapshot("5Bob", "bob"), snapshot("5Carol", "carol")]);
    yield_until("second pass settled", || {
        store
            .account(Network::Pmf, &Address::from("5Carol"))
            .is_some()
            && store
                .global_account_addresses()
                .contains(&Address::from("5Carol"))
    })
    .await;

    // Alice's chain subscription went away before anything new was issued.
    let events = harness.chain.take_events();
    let alice_unsubscribed = events
        .iter()
        .position(|event| {
            *event == ChainEvent::Unsubscribed(Network::Pmf, Address::from("5Alice"))
        })
        .expect("alice teardown recorded");
    let first_subscribed = events
        .iter()
        .position(|event| matches!(event, ChainEvent::Subscribed(_, _)))
        .expect("pass resubscribed");
    assert!(alice_unsubscribed < first_subscribed);

    assert_eq!(
        harness.store.account(Network::Pmf, &Address::from("5Alice")),
        None
    );
    assert_eq!(
        harness.store.global_account_addresses(),
        vec![Address::from("5Bob"), Address::from("5Carol")]
    );
    // The kept account's re-subscribe replaced its old entry, one sub each.
    assert_eq!(
        harness.chain.subscribed_addresses(Network::Pmf),
        vec![Address::from("5Bob"), Address::from("5Carol")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_balance_updates_stream_into_store() {
    let harness = Harness::new();
    harness
        .chain
        .set_account(Network::Pmf, Address::from("5Alice"), update(7, None));
    harness.keyring.set_accounts(vec![snapshot("5Alice", "alice")]);

    let _handle = harness.start();
    harness.store.select_network(Some(Network::Pmf));

    let store = Arc::clone(&harness.store);
    yield_until("first balance", || {
        store
            .account(Network::Pmf, &Address::from("5Alice"))
            .and_then(|record| record.balance)
            .map(|balance| balance.total)
            == Some(7)
    })
    .await;

    harness
        .chain
        .set_account(Network::Pmf, Address::from("5Alice"), update(999, None));
    yield_until("updated balance", || {
        store
            .account(Network::Pmf, &Address::from("5Alice"))
            .and_then(|record| record.balance)
            .map(|balance| balance.total)
            == Some(999)
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_identity_link_resolves_record_and_canonical_cdd() {
    let harness = Harness::new();
    harness
        .chain
        .set_active_issuers(Network::Pmf, vec![IssuerId::from("0xcdd1")]);
    harness.chain.set_account(
        Network::Pmf,
        Address::from("5Alice"),
        update(10, Some(Did::from("0xd1"))),
    );
    harness.chain.set_identity_record(
        Network::Pmf,
        Did::from("0xd1"),
        DidRecord {
            primary_key: Address::from("5Alice"),
            secondary_keys: vec![
                Signatory::Account(Address::from("5Bob")),
                Signatory::Identity(Did::from("0xother")),
            ],
        },
    );
    harness.chain.set_claims(
        Network::Pmf,
        Did::from("0xd1"),
        vec![
            claim("0xcdd1", Some(100)),
            claim("0xcdd1", None),
            claim("0xrevoked", None),
        ],
    );
    harness.keyring.set_accounts(vec![snapshot("5Alice", "alice")]);

    let _handle = harness.start();
    harness.store.select_network(Some(Network::Pmf));

    let store = Arc::clone(&harness.store);
    yield_until("cdd attestation chosen", || {
        store.cdd(Network::Pmf, &Did::from("0xd1")).is_some()
    })
    .await;

    let identity = harness
        .store
        .identity(Network::Pmf, &Did::from("0xd1"))
        .unwrap();
    assert_eq!(identity.primary_key, Address::from("5Alice"));
    // The identity-kind signatory was dropped.
    assert_eq!(identity.secondary_keys, vec![Address::from("5Bob")]);

    // Never-expiring beats Some(100); the revoked issuer never qualifies.
    assert_eq!(
        harness.store.cdd(Network::Pmf, &Did::from("0xd1")),
        Some(CddRecord {
            issuer: IssuerId::from("0xcdd1"),
            expiry: None,
        })
    );

    let events = harness.chain.events();
    assert!(events.contains(&ChainEvent::RecordQueried(Network::Pmf, Did::from("0xd1"))));
    assert!(events.contains(&ChainEvent::ClaimsQueried(Network::Pmf, Did::from("0xd1"))));
}

#[tokio::test(start_paused = true)]
async fn test_account_removal_prunes_identity_and_clears_did_keys() {
    let harness = Harness::new();
    harness
        .chain
        .set_active_issuers(Network::Pmf, vec![IssuerId::from("0xcdd1")]);
    harness.chain.set_account(
        Network::Pmf,
        Address::from("5Alice"),
        update(10, Some(Did::from("0xd1"))),
    );
    harness.chain.set_identity_record(
        Network::Pmf,
        Did::from("0xd1"),
        DidRecord {
            primary_key: Address::from("5Alice"),
            secondary_keys: Vec::new(),
        },
    );
    harness
        .chain
        .set_claims(Network::Pmf, Did::from("0xd1"), vec![claim("0xcdd1", None)]);
    harness.keyring.set_accounts(vec![snapshot("5Alice", "alice")]);

    let _handle = harness.start();
    harness.store.select_network(Some(Network::Pmf));

    let store = Arc::clone(&harness.store);
    yield_until("identity tracked", || {
        store.cdd(Network::Pmf, &Did::from("0xd1")).is_some()
    })
    .await;

    harness.keyring.set_accounts(Vec::new());
    yield_until("identity pruned", || {
        store.identity(Network::Pmf, &Did::from("0xd1")).is_none()
            && harness.chain.subscribed_addresses(Network::Pmf).is_empty()
    })
    .await;

    assert_eq!(harness.store.cdd(Network::Pmf, &Did::from("0xd1")), None);
    assert_eq!(
        harness.store.account(Network::Pmf, &Address::from("5Alice")),
        None
    );
}

#[tokio::test(start_paused = true)]
async fn test_network_switch_tears_down_before_touching_new_network() {
    let harness = Harness::new();
    harness
        .chain
        .set_account(Network::Pmf, Address::from("5Alice"), update(7, None));
    harness
        .chain
        .set_account(Network::Alcyone, Address::from("5Alice"), update(3, None));
    harness.keyring.set_accounts(vec![snapshot("5Alice", "alice")]);

    let _handle = harness.start();
    harness.store.select_network(Some(Network::Pmf));

    let store = Arc::clone(&harness.store);
    yield_until("pmf settled", || {
        store
            .account(Network::Pmf, &Address::from("5Alice"))
            .and_then(|record| record.balance)
            .is_some()
    })
    .await;
    harness.chain.clear_events();

    harness.store.select_network(Some(Network::Alcyone));
    yield_until("alcyone settled", || {
        store
            .account(Network::Alcyone, &Address::from("5Alice"))
            .and_then(|record| record.balance)
            .is_some()
    })
    .await;

    // The old tree came down before the first call on the new network.
    let events = harness.chain.take_events();
    let teardown = events
        .iter()
        .position(|event| {
            *event == ChainEvent::Unsubscribed(Network::Pmf, Address::from("5Alice"))
        })
        .expect("pmf teardown recorded");
    let new_connect = events
        .iter()
        .position(|event| *event == ChainEvent::Connected(Network::Alcyone))
        .expect("alcyone connected");
    assert!(teardown < new_connect);

    assert!(harness.chain.subscribed_addresses(Network::Pmf).is_empty());
    assert_eq!(
        harness.chain.subscribed_addresses(Network::Alcyone),
        vec![Address::from("5Alice")]
    );
    // Old-network records stay; only its subscriptions are gone.
    assert_eq!(
        harness
            .store
            .account(Network::Pmf, &Address::from("5Alice"))
            .and_then(|record| record.balance)
            .map(|balance| balance.total),
        Some(7)
    );
}

#[tokio::test(start_paused = true)]
async fn test_reselecting_same_network_runs_a_full_cycle() {
    let harness = Harness::new();
    harness
        .chain
        .set_account(Network::Pmf, Address::from("5Alice"), update(7, None));
    harness.keyring.set_accounts(vec![snapshot("5Alice", "alice")]);

    let _handle = harness.start();
    harness.store.select_network(Some(Network::Pmf));

    let store = Arc::clone(&harness.store);
    yield_until("first cycle settled", || {
        store
            .account(Network::Pmf, &Address::from("5Alice"))
            .is_some()
    })
    .await;
    harness.chain.clear_events();

    harness.store.select_network(Some(Network::Pmf));
    yield_until("second cycle reconnected", || {
        harness
            .chain
            .events()
            .contains(&ChainEvent::Connected(Network::Pmf))
    })
    .await;

    let events = harness.chain.events();
    let teardown = events
        .iter()
        .position(|event| matches!(event, ChainEvent::Unsubscribed(_, _)))
        .expect("old tree torn down");
    let reconnect = events
        .iter()
        .position(|event| *event == ChainEvent::Connected(Network::Pmf))
        .expect("reconnected");
    assert!(teardown < reconnect);
}

#[tokio::test(start_paused = true)]
async fn test_stale_callbacks_cannot_touch_the_store() {
    let harness = Harness::new();
    harness
        .chain
        .set_account(Network::Pmf, Address::from("5Alice"), update(7, None));
    harness
        .chain
        .set_account(Network::Alcyone, Address::from("5Alice"), update(3, None));
    harness.keyring.set_accounts(vec![snapshot("5Alice", "alice")]);

    let _handle = harness.start();
    harness.store.select_network(Some(Network::Pmf));

    let store = Arc::clone(&harness.store);
    yield_until("pmf settled", || {
        store
            .account(Network::Pmf, &Address::from("5Alice"))
            .and_then(|record| record.balance)
            .map(|balance| balance.total)
            == Some(7)
    })
    .await;

    // Flip the selection and race a pmf update against the teardown.
    harness.store.select_network(Some(Network::Alcyone));
    harness
        .chain
        .set_account(Network::Pmf, Address::from("5Alice"), update(999, None));

    yield_until("alcyone settled", || {
        store
            .account(Network::Alcyone, &Address::from("5Alice"))
            .and_then(|record| record.balance)
            .is_some()
    })
    .await;

    // Whether the update beat the teardown or not, pmf state is untouched.
    assert_eq!(
        harness
            .store
            .account(Network::Pmf, &Address::from("5Alice"))
            .and_then(|record| record.balance)
            .map(|balance| balance.total),
        Some(7)
    );
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_reports_and_waits_for_next_selection() {
    let harness = Harness::new();
    harness.chain.fail_connect(Network::Pmf, "endpoint unreachable");
    harness.keyring.set_accounts(vec![snapshot("5Alice", "alice")]);
    harness
        .chain
        .set_account(Network::Alcyone, Address::from("5Alice"), update(3, None));

    let handle = harness.start();
    harness.store.select_network(Some(Network::Pmf));

    let store = Arc::clone(&harness.store);
    yield_until("failure surfaced", || {
        matches!(store.phase(), ConnectionPhase::Failed(_))
    })
    .await;

    match harness.store.phase() {
        ConnectionPhase::Failed(message) => assert!(message.contains("endpoint unreachable")),
        other => panic!("unexpected phase {other:?}"),
    }
    assert!(!harness
        .chain
        .events()
        .contains(&ChainEvent::Connected(Network::Pmf)));
    assert_eq!(handle.live_subscriptions(), 0);

    // The next selection recovers without any manual retry.
    harness.store.select_network(Some(Network::Alcyone));
    yield_until("recovered", || store.phase() == ConnectionPhase::Ready).await;
}

#[tokio::test(start_paused = true)]
async fn test_issuer_fetch_failure_halts_session_setup() {
    let harness = Harness::new();
    harness.chain.fail_issuers(Network::Pmf, "membership query failed");
    harness.keyring.set_accounts(vec![snapshot("5Alice", "alice")]);

    let _handle = harness.start();
    harness.store.select_network(Some(Network::Pmf));

    let store = Arc::clone(&harness.store);
    yield_until("failure surfaced", || {
        matches!(store.phase(), ConnectionPhase::Failed(_))
    })
    .await;

    // No reconciler started, so nothing was subscribed.
    assert!(!harness
        .chain
        .events()
        .iter()
        .any(|event| matches!(event, ChainEvent::Subscribed(_, _))));
}

#[tokio::test(start_paused = true)]
async fn test_stop_releases_every_subscription() {
    let harness = Harness::new();
    harness
        .chain
        .set_account(Network::Pmf, Address::from("5Alice"), update(7, None));
    harness.keyring.set_accounts(vec![snapshot("5Alice", "alice")]);

    let handle = harness.start();
    harness.store.select_network(Some(Network::Pmf));

    let store = Arc::clone(&harness.store);
    yield_until("settled", || {
        store
            .account(Network::Pmf, &Address::from("5Alice"))
            .is_some()
    })
    .await;
    assert!(handle.live_subscriptions() > 0);

    handle.stop();
    assert!(harness.chain.subscribed_addresses(Network::Pmf).is_empty());
    assert!(harness
        .chain
        .events()
        .contains(&ChainEvent::Unsubscribed(Network::Pmf, Address::from("5Alice"))));
}

#[tokio::test(start_paused = true)]
async fn test_no_selection_keeps_engine_idle() {
    let harness = Harness::new();
    harness.keyring.set_accounts(vec![snapshot("5Alice", "alice")]);

    let _handle = harness.start();
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }

    assert_eq!(harness.store.phase(), ConnectionPhase::Idle);
    assert!(harness.chain.events().is_empty());
    assert!(harness.store.take_actions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_degraded_claims_leave_prior_cdd_in_place() {
    let harness = Harness::new();
    harness
        .chain
        .set_active_issuers(Network::Pmf, vec![IssuerId::from("0xcdd1")]);
    harness.chain.set_account(
        Network::Pmf,
        Address::from("5Alice"),
        update(10, Some(Did::from("0xd1"))),
    );
    harness.chain.set_identity_record(
        Network::Pmf,
        Did::from("0xd1"),
        DidRecord {
            primary_key: Address::from("5Alice"),
            secondary_keys: Vec::new(),
        },
    );
    harness.chain.set_claims(
        Network::Pmf,
        Did::from("0xd1"),
        vec![claim("0xcdd1", Some(500))],
    );
    harness.keyring.set_accounts(vec![snapshot("5Alice", "alice")]);

    let _handle = harness.start();
    harness.store.select_network(Some(Network::Pmf));

    let store = Arc::clone(&harness.store);
    yield_until("first attestation", || {
        store.cdd(Network::Pmf, &Did::from("0xd1")).is_some()
    })
    .await;

    // The issuer set moves on; the next pass finds nothing qualifying for
    // d1 and must leave its stored attestation alone.
    harness.chain.set_claims(
        Network::Pmf,
        Did::from("0xd1"),
        vec![claim("0xrevoked", None)],
    );
    harness.chain.set_identity_record(
        Network::Pmf,
        Did::from("0xd2"),
        DidRecord {
            primary_key: Address::from("5Bob"),
            secondary_keys: Vec::new(),
        },
    );
    harness
        .chain
        .set_claims(Network::Pmf, Did::from("0xd2"), vec![claim("0xcdd1", Some(900))]);
    harness.chain.set_account(
        Network::Pmf,
        Address::from("5Bob"),
        update(5, Some(Did::from("0xd2"))),
    );
    harness.keyring.set_accounts(vec![
        snapshot("5Alice", "alice"),
        snapshot("5Bob", "bob"),
    ]);

    yield_until("second identity tracked", || {
        store.cdd(Network::Pmf, &Did::from("0xd2")).is_some()
    })
    .await;

    assert_eq!(
        harness.store.cdd(Network::Pmf, &Did::from("0xd1")),
        Some(CddRecord {
            issuer: IssuerId::from("0xcdd1"),
            expiry: Some(500),
        })
    );
    assert_eq!(
        harness.store.cdd(Network::Pmf, &Did::from("0xd2")),
        Some(CddRecord {
            issuer: IssuerId::from("0xcdd1"),
            expiry: Some(900),
        })
    );
}
