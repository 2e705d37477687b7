//! E2E Test: Conflicting Spends
//!
//! The sidechain creation and the plain spend consume the same input:
//! - A node accepts whichever it sees first and refuses the other
//! - Both may be pending on opposite sides of a partition, never confirmed
//!   together on one chain
//! - Absence checks are plain queries and can be repeated freely

use {
    assert_matches::assert_matches,
    scfork_e2e_tests::helpers::*,
    scfork_harness::{
        node::{NodeControl, RejectReason, TxKind},
        HarnessError, NodeId,
    },
};

// ─────────────────────────────────────────────────────────────────────────────
// Test: the second of two conflicting transactions is refused
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_second_spend_refused() {
    init_logging();
    let net = standard_cluster();
    let mut driver = net.driver(&dev_config());
    driver.setup_network().unwrap();
    driver.build_shared_history().unwrap();
    driver.fund_builder().unwrap();
    let (creation, spend) = driver.prepare_conflicting().unwrap();

    assert_eq!(creation.kind, TxKind::SidechainCreation);
    assert_eq!(spend.kind, TxKind::PlainSpend);
    assert_eq!(creation.inputs, spend.inputs);

    let builder = net.node(2);
    assert_eq!(builder.send_raw_transaction(&spend.signed).unwrap(), spend.txid);
    let err = builder.send_raw_transaction(&creation.signed).unwrap_err();
    assert_eq!(err.reason, RejectReason::InputsSpent);

    // Relayed while joined, refused everywhere else too.
    for i in 0..3 {
        assert_eq!(net.node(i).get_raw_mempool().unwrap(), vec![spend.txid]);
    }
    let err = net.node(0).send_raw_transaction(&creation.signed).unwrap_err();
    assert_eq!(err.reason, RejectReason::InputsSpent);

    // Once confirmed, the loser's input is spent on chain.
    net.node(0).generate(1).unwrap();
    let err = net.node(1).send_raw_transaction(&creation.signed).unwrap_err();
    assert_eq!(err.reason, RejectReason::InputsSpent);
    assert!(net.node(1).get_raw_mempool().unwrap().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: never confirmed together, even after each side mined its own
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_never_both_confirmed() {
    init_logging();
    let net = standard_cluster();
    let mut driver = net.driver(&dev_config());
    let report = driver.run().unwrap();

    for i in 0..3 {
        let node = net.node(i);
        let mut found = Vec::new();
        for height in 1..=node.get_block_count().unwrap() {
            let hash = node.get_block_hash(height).unwrap();
            if report.fork_a_blocks.contains(&hash) {
                found.push(hash);
            }
        }
        assert!(found.is_empty(), "node{i} still has fork A blocks active");
    }
    // The creation was only ever confirmed on fork A.
    assert!(net
        .node(0)
        .get_transaction(&report.sidechain_creation_tx)
        .is_err());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: absence queries are idempotent and distinguish other failures
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_absence_checks_repeatable() {
    init_logging();
    let net = standard_cluster();
    let driver = net.driver(&dev_config());
    let scid = scenario_scid();
    for _ in 0..5 {
        driver
            .checker()
            .assert_sidechain_absent_everywhere(&net.ids(), &scid)
            .unwrap();
    }
    assert_matches!(
        driver.checker().assert_sidechain_present(NodeId(1), &scid),
        Err(HarnessError::InvariantViolation(_))
    );
    assert_matches!(
        driver.checker().assert_sidechain_absent(NodeId(9), &scid),
        Err(HarnessError::UnknownNode(NodeId(9)))
    );
}
