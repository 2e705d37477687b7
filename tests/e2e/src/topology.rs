//! E2E Test: Topology Control
//!
//! The partition state machine driven against simulated nodes:
//! - Links only count once both handshakes completed
//! - Split leaves one connected component per group, join heals it
//! - Out-of-order split / join calls fail without touching the network

use {
    assert_matches::assert_matches,
    scfork_e2e_tests::helpers::*,
    scfork_harness::{
        node::NodeControl, ChainDriver, HarnessError, NodeId, PartitionPlan, PartitionState,
        TopologyController,
    },
    scfork_sim_cluster::SimConfig,
    std::collections::BTreeSet,
};

fn groups(raw: &[&[usize]]) -> Vec<BTreeSet<NodeId>> {
    raw.iter()
        .map(|group| group.iter().copied().map(NodeId).collect())
        .collect()
}

fn controller(net: &TestCluster) -> TopologyController {
    let plan = PartitionPlan::new(groups(&[&[0, 1], &[2]])).unwrap();
    TopologyController::new(net.registry.clone(), plan, &dev_config()).unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: connect returns only after both ends completed their handshakes
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_connect_awaits_handshakes() {
    init_logging();
    let net = TestCluster::new(SimConfig {
        handshake_polls: 4,
        ..SimConfig::default()
    });
    let mut topology = controller(&net);

    topology.connect(NodeId(0), NodeId(1)).unwrap();
    for i in [0, 1] {
        let peers = net.node(i).get_peer_info().unwrap();
        assert_eq!(peers.len(), 2, "one outbound and one inbound connection");
        assert!(peers.iter().all(|p| p.handshake_complete()));
        assert_eq!(peers.iter().filter(|p| p.inbound).count(), 1);
    }
    assert_eq!(topology.links(), vec![(NodeId(0), NodeId(1))]);

    // Linking again opens nothing new.
    topology.connect(NodeId(1), NodeId(0)).unwrap();
    assert_eq!(net.cluster.connection_count().unwrap(), 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: split isolates the groups, join brings the lagging side up to date
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_split_and_join() {
    init_logging();
    let net = standard_cluster();
    let mut topology = controller(&net);
    let mut chain = ChainDriver::new(net.registry.clone(), &dev_config());
    let all = net.ids();

    topology.connect_chain(&all).unwrap();
    chain.generate(NodeId(0), 3).unwrap();
    chain.sync_all(&topology, &all).unwrap();

    topology.split().unwrap();
    assert_eq!(topology.state(), PartitionState::Split);
    assert_eq!(topology.components(), groups(&[&[0, 1], &[2]]));
    assert!(topology.same_partition(&[NodeId(0), NodeId(1)]));
    assert!(!topology.same_partition(&all));
    assert!(net.node(2).get_peer_info().unwrap().is_empty());

    chain.generate(NodeId(2), 2).unwrap();
    assert_eq!(net.heights(), vec![3, 3, 5]);
    assert_matches!(
        chain.sync_blocks(&topology, &all),
        Err(HarnessError::InvalidState {
            operation: "sync_blocks",
            state: PartitionState::Split,
        })
    );

    topology.join().unwrap();
    assert_eq!(topology.state(), PartitionState::Joined);
    assert_eq!(topology.components().len(), 1);
    assert_eq!(net.heights(), vec![5, 5, 5]);
    chain.sync_all(&topology, &all).unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: split twice / join while joined are rejected
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_out_of_order_transitions() {
    init_logging();
    let net = standard_cluster();
    let mut topology = controller(&net);
    topology.connect_chain(&net.ids()).unwrap();

    assert_matches!(
        topology.join(),
        Err(HarnessError::InvalidState { operation: "join", .. })
    );
    topology.split().unwrap();
    let links = topology.links();
    assert_matches!(
        topology.split(),
        Err(HarnessError::InvalidState { operation: "split", .. })
    );
    assert_eq!(topology.links(), links);
    topology.join().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: a link survives until both directions are dropped
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_one_sided_disconnect_keeps_link() {
    init_logging();
    let net = standard_cluster();
    let mut topology = controller(&net);
    topology.connect(NodeId(0), NodeId(1)).unwrap();

    topology.disconnect(NodeId(0), NodeId(1)).unwrap();
    assert_eq!(topology.links(), vec![(NodeId(0), NodeId(1))]);
    net.node(0).generate(1).unwrap();
    assert_eq!(net.heights(), vec![1, 1, 0]);

    topology.disconnect(NodeId(1), NodeId(0)).unwrap();
    assert!(topology.links().is_empty());
    net.node(0).generate(1).unwrap();
    assert_eq!(net.heights(), vec![2, 1, 0]);
}
