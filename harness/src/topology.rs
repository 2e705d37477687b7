//! Peer topology control: links, partitions and healing.
//!
//! The [`TopologyController`] is the single source of truth for "who is
//! linked to whom" from the harness' point of view. Every link change is
//! issued to the nodes themselves and then awaited until the nodes report it
//! complete, so a caller never races an in-flight handshake.

use {
    crate::{
        chain,
        config::HarnessConfig,
        error::{HarnessError, Result},
        node::NodeId,
        registry::NodeRegistry,
        wait::{wait_until, PollPolicy},
    },
    log::{debug, info, warn},
    serde::{Deserialize, Serialize},
    std::{
        collections::{BTreeMap, BTreeSet, VecDeque},
        fmt,
        sync::Arc,
        thread,
        time::Duration,
    },
};

/// Whether the bridging links between partition groups are up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionState {
    Joined,
    Split,
}

impl fmt::Display for PartitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Joined => f.write_str("joined"),
            Self::Split => f.write_str("split"),
        }
    }
}

// ── Adjacency ───────────────────────────────────────────────────────────────

/// Undirected graph of established peer links.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    adjacency: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl Topology {
    pub fn new<I: IntoIterator<Item = NodeId>>(nodes: I) -> Self {
        Self {
            adjacency: nodes.into_iter().map(|id| (id, BTreeSet::new())).collect(),
        }
    }

    /// Returns `true` if the link is new.
    pub fn add_link(&mut self, a: NodeId, b: NodeId) -> bool {
        let added = self.adjacency.entry(a).or_default().insert(b);
        self.adjacency.entry(b).or_default().insert(a);
        added
    }

    /// Returns `true` if the link existed.
    pub fn remove_link(&mut self, a: NodeId, b: NodeId) -> bool {
        let removed = self.adjacency.get_mut(&a).is_some_and(|n| n.remove(&b));
        if let Some(neighbours) = self.adjacency.get_mut(&b) {
            neighbours.remove(&a);
        }
        removed
    }

    pub fn has_link(&self, a: NodeId, b: NodeId) -> bool {
        self.adjacency.get(&a).is_some_and(|n| n.contains(&b))
    }

    pub fn neighbours(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.adjacency.get(&id).into_iter().flatten().copied()
    }

    /// Every link once, as `(lower, higher)`.
    pub fn links(&self) -> Vec<(NodeId, NodeId)> {
        self.adjacency
            .iter()
            .flat_map(|(a, ns)| ns.iter().filter(move |b| a < *b).map(move |b| (*a, *b)))
            .collect()
    }

    /// Connected components, each sorted, in order of their lowest member.
    pub fn components(&self) -> Vec<BTreeSet<NodeId>> {
        let mut seen = BTreeSet::new();
        let mut components = Vec::new();
        for start in self.adjacency.keys() {
            if seen.contains(start) {
                continue;
            }
            let mut component = BTreeSet::new();
            let mut queue = VecDeque::from([*start]);
            while let Some(id) = queue.pop_front() {
                if !seen.insert(id) {
                    continue;
                }
                component.insert(id);
                queue.extend(self.neighbours(id).filter(|n| !seen.contains(n)));
            }
            components.push(component);
        }
        components
    }

    /// Whether every node in `nodes` is reachable from the first one.
    pub fn connected(&self, nodes: &[NodeId]) -> bool {
        let Some(first) = nodes.first() else {
            return true;
        };
        self.components()
            .into_iter()
            .find(|c| c.contains(first))
            .is_some_and(|c| nodes.iter().all(|n| c.contains(n)))
    }
}

// ── Partition plan ──────────────────────────────────────────────────────────

/// The groups the network is cut into by [`TopologyController::split`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionPlan {
    groups: Vec<BTreeSet<NodeId>>,
}

impl PartitionPlan {
    /// Groups must be non-empty and pairwise disjoint, and there must be at
    /// least two of them.
    pub fn new(groups: Vec<BTreeSet<NodeId>>) -> Result<Self> {
        if groups.len() < 2 {
            return Err(HarnessError::Config(
                "a partition plan needs at least two groups".into(),
            ));
        }
        let mut seen = BTreeSet::new();
        for group in &groups {
            if group.is_empty() {
                return Err(HarnessError::Config("empty partition group".into()));
            }
            for id in group {
                if !seen.insert(*id) {
                    return Err(HarnessError::Config(format!(
                        "{id} appears in more than one partition group"
                    )));
                }
            }
        }
        Ok(Self { groups })
    }

    pub fn groups(&self) -> &[BTreeSet<NodeId>] {
        &self.groups
    }

    pub fn group_of(&self, id: NodeId) -> Option<usize> {
        self.groups.iter().position(|g| g.contains(&id))
    }

    /// Links of `topology` whose endpoints land in different groups.
    pub fn bridging_links(&self, topology: &Topology) -> Vec<(NodeId, NodeId)> {
        topology
            .links()
            .into_iter()
            .filter(|(a, b)| self.group_of(*a) != self.group_of(*b))
            .collect()
    }
}

// ── Controller ──────────────────────────────────────────────────────────────

/// Owns the peer links between registered nodes.
pub struct TopologyController {
    registry: Arc<NodeRegistry>,
    topology: Topology,
    /// Outbound connections the harness opened, as `(from, to)`.
    outbound: BTreeSet<(NodeId, NodeId)>,
    state: PartitionState,
    plan: PartitionPlan,
    /// Links cut by the last `split`, restored by `join`.
    severed: Vec<(NodeId, NodeId)>,
    handshake_poll: PollPolicy,
    sync_poll: PollPolicy,
    settle_delay: Duration,
    converge_after_join: bool,
}

impl TopologyController {
    pub fn new(
        registry: Arc<NodeRegistry>,
        plan: PartitionPlan,
        config: &HarnessConfig,
    ) -> Result<Self> {
        for id in plan.groups().iter().flatten() {
            if !registry.contains(*id) {
                return Err(HarnessError::UnknownNode(*id));
            }
        }
        if let Some(missing) = registry.ids().into_iter().find(|id| plan.group_of(*id).is_none()) {
            return Err(HarnessError::Config(format!(
                "{missing} is not assigned to any partition group"
            )));
        }
        Ok(Self {
            topology: Topology::new(registry.ids()),
            registry,
            outbound: BTreeSet::new(),
            state: PartitionState::Joined,
            plan,
            severed: Vec::new(),
            handshake_poll: config.handshake_poll,
            sync_poll: config.poll,
            settle_delay: Duration::from_millis(config.topology.settle_delay_ms),
            converge_after_join: config.topology.converge_after_join,
        })
    }

    pub fn state(&self) -> PartitionState {
        self.state
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn plan(&self) -> &PartitionPlan {
        &self.plan
    }

    pub fn links(&self) -> Vec<(NodeId, NodeId)> {
        self.topology.links()
    }

    pub fn components(&self) -> Vec<BTreeSet<NodeId>> {
        self.topology.components()
    }

    /// Whether `nodes` currently form (part of) one connected partition.
    pub fn same_partition(&self, nodes: &[NodeId]) -> bool {
        self.topology.connected(nodes)
    }

    /// Link each consecutive pair of `nodes`, e.g. `0-1-2`.
    pub fn connect_chain(&mut self, nodes: &[NodeId]) -> Result<()> {
        for pair in nodes.windows(2) {
            self.connect(pair[0], pair[1])?;
        }
        Ok(())
    }

    /// Establish a bidirectional link and wait for both handshakes.
    /// Linking an already linked pair is a no-op.
    pub fn connect(&mut self, a: NodeId, b: NodeId) -> Result<()> {
        if a == b {
            return Err(HarnessError::Config(format!("cannot link {a} to itself")));
        }
        if self.outbound.contains(&(a, b))
            && self.outbound.contains(&(b, a))
            && self.topology.has_link(a, b)
        {
            debug!("{a} and {b} already linked");
            return Ok(());
        }
        for (from, to) in [(a, b), (b, a)] {
            if self.outbound.contains(&(from, to)) {
                continue;
            }
            let addr = self.registry.p2p_addr(to)?;
            let node = self.registry.get(from)?;
            node.connect_peer(addr)
                .map_err(|e| HarnessError::command(from, "addnode", e))?;
            self.outbound.insert((from, to));
        }
        self.await_handshakes(a)?;
        self.await_handshakes(b)?;
        self.topology.add_link(a, b);
        info!("linked {a} <-> {b}");
        Ok(())
    }

    /// Drop `a`'s outbound connection to `b`, then block until `a` reports
    /// no handshake in progress with any peer.
    pub fn disconnect(&mut self, a: NodeId, b: NodeId) -> Result<()> {
        let addr = self.registry.p2p_addr(b)?;
        let node = self.registry.get(a)?;
        let peers = node
            .get_peer_info()
            .map_err(|e| HarnessError::command(a, "getpeerinfo", e))?;
        if peers.iter().any(|p| !p.inbound && p.addr == addr) {
            node.disconnect_peer(addr)
                .map_err(|e| HarnessError::command(a, "disconnectnode", e))?;
        } else {
            debug!("{a} has no outbound connection to {b}");
        }
        self.outbound.remove(&(a, b));
        self.await_handshakes(a)?;
        if !self.outbound.contains(&(b, a)) && self.topology.remove_link(a, b) {
            info!("unlinked {a} <-> {b}");
        }
        Ok(())
    }

    /// Cut every link bridging two partition groups.
    pub fn split(&mut self) -> Result<()> {
        if self.state == PartitionState::Split {
            return Err(HarnessError::InvalidState {
                operation: "split",
                state: self.state,
            });
        }
        let bridges = self.plan.bridging_links(&self.topology);
        if bridges.is_empty() {
            warn!("split: no link bridges the partition groups");
        }
        for (a, b) in bridges {
            // Recorded before cutting so a failed split still knows what to restore.
            if !self.severed.contains(&(a, b)) {
                self.severed.push((a, b));
            }
            self.disconnect(a, b)?;
            self.disconnect(b, a)?;
        }
        self.state = PartitionState::Split;
        info!(
            "network split into {} component(s): {:?}",
            self.components().len(),
            self.components()
        );
        Ok(())
    }

    /// Restore the links cut by [`split`](Self::split), then let the healed
    /// network settle.
    pub fn join(&mut self) -> Result<()> {
        if self.state == PartitionState::Joined {
            return Err(HarnessError::InvalidState {
                operation: "join",
                state: self.state,
            });
        }
        for (a, b) in self.severed.clone() {
            self.connect(a, b)?;
            self.connect(b, a)?;
        }
        self.severed.clear();
        // No node-side signal marks reorg completion; the delay is an
        // approximation, tightened below by the convergence wait.
        if !self.settle_delay.is_zero() {
            debug!("join: settling for {:?}", self.settle_delay);
            thread::sleep(self.settle_delay);
        }
        self.state = PartitionState::Joined;
        if self.converge_after_join {
            let nodes = self.registry.ids();
            wait_until("best-block convergence after join", &self.sync_poll, || {
                chain::blocks_converged(&self.registry, &nodes)
            })?;
        }
        info!("network joined: {:?}", self.links());
        Ok(())
    }

    fn await_handshakes(&self, id: NodeId) -> Result<()> {
        let node = self.registry.get(id)?;
        wait_until(
            &format!("{id} handshakes to complete"),
            &self.handshake_poll,
            || {
                let peers = node
                    .get_peer_info()
                    .map_err(|e| HarnessError::command(id, "getpeerinfo", e))?;
                Ok(peers.iter().all(|p| p.handshake_complete()))
            },
        )?;
        Ok(())
    }
}
