//! E2E Test: Sidechain Fork Rollback
//!
//! The full partition scenario on a simulated three-node cluster:
//! - Shared history, then a funding payment to the builder
//! - Split {node0, node1} | {node2}
//! - Fork A registers a sidechain and forwards coins to it
//! - Fork B confirms a conflicting spend of the same input and outgrows fork A
//! - After the heal no node knows the sidechain and no pool holds anything

use {
    assert_matches::assert_matches,
    scfork_e2e_tests::helpers::*,
    scfork_harness::{
        node::{NodeControl, TipStatus, COIN},
        HarnessError, NodeId, ScenarioDriver, ScenarioPhase,
    },
    scfork_sim_cluster::SimConfig,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test: the default scenario runs to completion and rolls the sidechain back
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_default_scenario_rolls_back_sidechain() {
    init_logging();
    let net = standard_cluster();
    let mut driver = net.driver(&dev_config());

    let report = driver.run().unwrap();
    assert_eq!(driver.phase(), ScenarioPhase::Reconciled);

    // 1 + 1 + 220 bootstrap blocks, 2 confirming the funding payment.
    assert_eq!(report.shared_height, 224);
    assert_eq!(report.fork_a_blocks.len(), 2);
    assert_eq!(report.fork_b_blocks.len(), 4);
    assert_eq!(report.final_height, 228);
    assert_eq!(Some(&report.final_tip), report.fork_b_blocks.last());
    assert_eq!(net.heights(), vec![228, 228, 228]);

    // What fork A saw before the heal.
    let sidechain = &report.fork_a_sidechain;
    assert_eq!(sidechain.scid, scenario_scid());
    assert_eq!(sidechain.epoch_length, 123);
    assert_eq!(sidechain.created_at_height, 225);
    assert_eq!(sidechain.creating_tx, report.sidechain_creation_tx);
    assert_eq!(sidechain.created_in_block, report.fork_a_blocks[0]);
    assert_eq!(sidechain.immature_amounts.len(), 1);
    assert_eq!(sidechain.immature_amounts[0].amount, 10 * COIN);

    // Gone everywhere, nothing pending.
    for i in 0..3 {
        let node = net.node(i);
        let err = node.get_sidechain_info(&scenario_scid()).unwrap_err();
        assert!(err.is_scid_not_yet_created(), "node{i}: {err}");
        assert!(node.list_sidechains().unwrap().is_empty());
        assert!(node.get_raw_mempool().unwrap().is_empty());
        assert_eq!(node.get_best_block_hash().unwrap(), report.final_tip);
    }

    // The conflicting spend is what survived.
    let spend = net
        .node(0)
        .get_transaction(&report.conflicting_spend_tx)
        .unwrap();
    assert_eq!(spend.confirmations, 4);
    assert_eq!(spend.block_hash, Some(report.fork_b_blocks[0]));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: the reorg is visible in chain tips and in the losing side's logs
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_losing_side_reorganizes() {
    init_logging();
    let net = standard_cluster();
    let report = net.driver(&dev_config()).run().unwrap();

    let miner_tips = &report.chain_tips[&NodeId(0)];
    assert_eq!(miner_tips[0].status, TipStatus::Active);
    let stale = miner_tips
        .iter()
        .find(|tip| Some(&tip.hash) == report.fork_a_blocks.last())
        .expect("fork A tip listed");
    assert_eq!(stale.status, TipStatus::ValidFork);
    assert_eq!(stale.branch_len, 2);
    assert_eq!(stale.height, 226);

    assert!(net.logged(0, "Reorganize"));
    assert!(net.logged(1, "Reorganize"));
    assert!(!net.logged(2, "Reorganize"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: driving the steps one by one, observing the cluster in between
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_step_by_step() {
    init_logging();
    let net = standard_cluster();
    let scid = scenario_scid();
    let mut driver = net.driver(&dev_config());

    driver.setup_network().unwrap();
    assert_eq!(
        driver.topology().links(),
        vec![(NodeId(0), NodeId(1)), (NodeId(1), NodeId(2))]
    );
    driver.build_shared_history().unwrap();
    assert_eq!(net.heights(), vec![222, 222, 222]);

    let funding = driver.fund_builder().unwrap();
    let wallet_view = net.node(2).get_transaction(&funding).unwrap();
    assert_eq!(wallet_view.confirmations, 2);

    let (creation, spend) = driver.prepare_conflicting().unwrap();
    assert!(creation.conflicts_with(&spend));
    assert!(net.node(2).get_raw_mempool().unwrap().is_empty());

    driver.split().unwrap();
    assert_eq!(driver.phase(), ScenarioPhase::Split);
    assert_eq!(driver.topology().components().len(), 2);

    driver.grow_fork_a().unwrap();
    assert!(net.node(0).get_sidechain_info(&scid).is_ok());
    assert!(net.node(1).get_sidechain_info(&scid).is_ok());
    assert!(net.node(2).get_sidechain_info(&scid).is_err());
    assert_eq!(net.heights(), vec![226, 226, 224]);

    driver.grow_fork_b().unwrap();
    assert_eq!(driver.phase(), ScenarioPhase::Diverged);
    assert_eq!(net.heights(), vec![226, 226, 228]);

    driver.reconcile().unwrap();
    driver
        .checker()
        .assert_rolled_back(&net.ids(), &scid)
        .unwrap();
    // Checks are read-only; the verdict does not change on repetition.
    driver
        .checker()
        .assert_rolled_back(&net.ids(), &scid)
        .unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: scenario markers reach the nodes' own logs when enabled
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_markers_written_to_node_logs() {
    init_logging();
    let net = standard_cluster();
    let mut config = dev_config();
    config.scenario.mark_node_logs = true;
    net.driver(&config).run().unwrap();
    for i in 0..3 {
        assert!(net.logged(i, "split network"), "node{i}");
        assert!(net.logged(i, "network joined"), "node{i}");
    }

    let quiet = standard_cluster();
    quiet.driver(&dev_config()).run().unwrap();
    assert!(!quiet.logged(0, "split network"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: larger clusters and longer forks
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_five_nodes_longer_forks() {
    init_logging();
    let net = TestCluster::new(SimConfig::with_nodes(5));
    let mut config = dev_config();
    config.scenario.node_count = 5;
    config.scenario.partition = vec![
        vec![NodeId(0), NodeId(1)],
        vec![NodeId(2), NodeId(3), NodeId(4)],
    ];
    config.scenario.fork_a_transfer_blocks = 3;
    config.scenario.fork_b_blocks = 6;

    let report = net.driver(&config).run().unwrap();
    assert_eq!(report.fork_a_blocks.len(), 4);
    assert_eq!(report.final_height, 230);
    assert_eq!(net.heights(), vec![230; 5]);
    for i in 0..5 {
        assert!(net.node(i).get_raw_mempool().unwrap().is_empty());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: configurations that cannot produce a rollback are refused up front
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_rejects_unwinnable_fork_b() {
    let net = standard_cluster();
    let mut config = dev_config();
    config.scenario.fork_b_blocks = 2;
    assert_matches!(
        ScenarioDriver::new(net.registry.clone(), &config).err(),
        Some(HarnessError::Config(_))
    );
}

#[test]
fn test_rejects_registry_size_mismatch() {
    let net = TestCluster::new(SimConfig::with_nodes(4));
    assert!(ScenarioDriver::new(net.registry.clone(), &dev_config()).is_err());
}
