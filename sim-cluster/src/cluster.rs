//! The in-process cluster: simulated nodes, the p2p connections between
//! them and relay over completed connections.
//!
//! All nodes share one lock. A control command takes it, mutates the target
//! node, then relays blocks and pending transactions across every completed
//! connection until nothing new moves. A freshly opened connection only
//! starts relaying once its handshake completes, which happens after a
//! configured number of `get_peer_info` polls on either end.

use {
    crate::{
        config::SimConfig,
        error::{Result, SimError},
        node::NodeState,
        tx::SimOutput,
    },
    log::{debug, info},
    scfork_harness::node::{
        Amount, BlockHash, ChainTip, CommandResult, DecodedTransaction, ForwardTransfer,
        NodeControl, NodeId, OutPoint, Payment, PeerInfo, RejectReason, ScId, SidechainCreation,
        SidechainInfo, SignedTransaction, TxId, WalletTransaction,
    },
    std::{
        collections::BTreeSet,
        net::{Ipv4Addr, SocketAddr},
        sync::{Arc, Mutex, MutexGuard},
    },
};

/// Version every simulated peer announces once its handshake completes.
pub const PROTOCOL_VERSION: u32 = 170_002;

const EPHEMERAL_PORT_BASE: u16 = 40_000;

fn p2p_addr(config: &SimConfig, id: NodeId) -> SocketAddr {
    let offset = u16::try_from(id.0).unwrap_or(u16::MAX);
    SocketAddr::from((
        Ipv4Addr::LOCALHOST,
        config.base_p2p_port.saturating_add(offset),
    ))
}

/// One directed connection, opened by `from`.
#[derive(Debug, Clone)]
struct Connection {
    id: u64,
    from: NodeId,
    to: NodeId,
    polls_left: u32,
}

impl Connection {
    fn complete(&self) -> bool {
        self.polls_left == 0
    }

    /// Source address `to` sees for this connection.
    fn inbound_addr(&self) -> SocketAddr {
        let offset = u16::try_from(self.id).unwrap_or(u16::MAX);
        SocketAddr::from((
            Ipv4Addr::LOCALHOST,
            EPHEMERAL_PORT_BASE.saturating_add(offset),
        ))
    }

    fn touches(&self, id: NodeId) -> bool {
        self.from == id || self.to == id
    }
}

pub(crate) struct ClusterState {
    config: SimConfig,
    nodes: Vec<NodeState>,
    connections: Vec<Connection>,
    next_connection: u64,
    next_nonce: u64,
}

impl ClusterState {
    fn new(config: SimConfig) -> Self {
        let nodes = (0..config.node_count)
            .map(|i| NodeState::new(NodeId(i), &config))
            .collect();
        Self {
            config,
            nodes,
            connections: Vec::new(),
            next_connection: 0,
            next_nonce: 0,
        }
    }

    fn node(&self, id: NodeId) -> Result<&NodeState> {
        self.nodes.get(id.0).ok_or(SimError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeState> {
        self.nodes.get_mut(id.0).ok_or(SimError::UnknownNode(id))
    }

    fn node_at(&self, addr: SocketAddr) -> Option<NodeId> {
        (0..self.nodes.len())
            .map(NodeId)
            .find(|id| p2p_addr(&self.config, *id) == addr)
    }

    // ── Connections ─────────────────────────────────────────────────────────

    fn connect(&mut self, from: NodeId, addr: SocketAddr) -> Result<()> {
        let Some(to) = self.node_at(addr) else {
            return Err(SimError::rejected(
                RejectReason::NotFound,
                format!("no node listening on {addr}"),
            ));
        };
        if to == from {
            return Err(SimError::rejected(
                RejectReason::InvalidParameter,
                "cannot connect to self",
            ));
        }
        if self
            .connections
            .iter()
            .any(|c| c.from == from && c.to == to)
        {
            debug!("{from} already connected to {to}");
            return Ok(());
        }
        let connection = Connection {
            id: self.next_connection,
            from,
            to,
            polls_left: self.config.handshake_polls,
        };
        self.next_connection = self.next_connection.saturating_add(1);
        info!("{from} -> {to}: connection {} opened", connection.id);
        let complete = connection.complete();
        self.connections.push(connection);
        if complete {
            self.relay();
        }
        Ok(())
    }

    /// Drop the connection `from` knows under `addr`: its outbound connection
    /// to the node listening there, or an inbound one from that address.
    fn disconnect(&mut self, from: NodeId, addr: SocketAddr) -> Result<()> {
        let target = self.node_at(addr);
        let before = self.connections.len();
        self.connections.retain(|c| {
            let outbound = c.from == from && Some(c.to) == target;
            let inbound = c.to == from && c.inbound_addr() == addr;
            !(outbound || inbound)
        });
        if self.connections.len() == before {
            return Err(SimError::rejected(
                RejectReason::NotFound,
                "Node not found in connected nodes",
            ));
        }
        info!("{from}: disconnected {addr}");
        Ok(())
    }

    /// Report `id`'s peers as they stand, then advance every handshake in
    /// progress on `id`.
    fn peer_info(&mut self, id: NodeId) -> Result<Vec<PeerInfo>> {
        self.node(id)?;
        let peers = self
            .connections
            .iter()
            .filter(|c| c.touches(id))
            .map(|c| {
                let inbound = c.to == id;
                PeerInfo {
                    id: c.id,
                    addr: if inbound {
                        c.inbound_addr()
                    } else {
                        p2p_addr(&self.config, c.to)
                    },
                    inbound,
                    version: if c.complete() { PROTOCOL_VERSION } else { 0 },
                }
            })
            .collect();

        let mut completed = false;
        for connection in self.connections.iter_mut().filter(|c| c.touches(id)) {
            if connection.polls_left > 0 {
                connection.polls_left = connection.polls_left.saturating_sub(1);
                if connection.complete() {
                    debug!(
                        "connection {} ({} -> {}) handshake complete",
                        connection.id, connection.from, connection.to
                    );
                    completed = true;
                }
            }
        }
        if completed {
            self.relay();
        }
        Ok(peers)
    }

    /// Node pairs with at least one completed connection, both orders.
    fn links(&self) -> BTreeSet<(NodeId, NodeId)> {
        self.connections
            .iter()
            .filter(|c| c.complete())
            .flat_map(|c| [(c.from, c.to), (c.to, c.from)])
            .collect()
    }

    // ── Relay ───────────────────────────────────────────────────────────────

    /// Propagate blocks and pending transactions until every linked pair
    /// agrees on what it can.
    fn relay(&mut self) {
        loop {
            let mut moved = false;
            for (from, to) in self.links() {
                moved |= self.push_blocks(from, to);
                moved |= self.push_transactions(from, to);
            }
            if !moved {
                break;
            }
        }
    }

    fn push_blocks(&mut self, from: NodeId, to: NodeId) -> bool {
        let (Some(source), Some(target)) = (self.nodes.get(from.0), self.nodes.get(to.0)) else {
            return false;
        };
        let missing: Vec<_> = source
            .active_blocks()
            .into_iter()
            .filter(|block| !target.knows_block(&block.hash))
            .collect();
        let Some(target) = self.nodes.get_mut(to.0) else {
            return false;
        };
        let mut moved = false;
        for block in missing {
            let hash = block.hash;
            match target.accept_block(block) {
                Ok(new) => moved |= new,
                Err(e) => debug!("{to}: block {hash} from {from} refused: {e}"),
            }
        }
        moved
    }

    fn push_transactions(&mut self, from: NodeId, to: NodeId) -> bool {
        let (Some(source), Some(target)) = (self.nodes.get(from.0), self.nodes.get(to.0)) else {
            return false;
        };
        let offered: Vec<_> = source
            .mempool()
            .filter(|(txid, _)| !target.in_mempool(txid) && !target.is_confirmed(txid))
            .cloned()
            .collect();
        let Some(target) = self.nodes.get_mut(to.0) else {
            return false;
        };
        let mut moved = false;
        for (txid, tx) in offered {
            match target.accept_transaction(tx) {
                Ok(_) => moved = true,
                Err(e) => debug!("{to}: tx {txid} from {from} refused: {e}"),
            }
        }
        moved
    }

    // ── Blocks ──────────────────────────────────────────────────────────────

    fn generate(&mut self, id: NodeId, count: u32) -> Result<Vec<BlockHash>> {
        let mut hashes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let nonce = self.next_nonce;
            self.next_nonce = self.next_nonce.saturating_add(1);
            let block = self.node_mut(id)?.mine(nonce)?;
            debug!("{id}: mined {} at {}", block.hash, block.height);
            hashes.push(block.hash);
            self.relay();
        }
        Ok(hashes)
    }
}

/// An in-process cluster of simulated ledger nodes.
///
/// Node `i` listens on `127.0.0.1:(base_p2p_port + i)` and starts with no
/// connections.
pub struct SimCluster {
    config: SimConfig,
    shared: Arc<Mutex<ClusterState>>,
    nodes: Vec<Arc<SimNode>>,
}

impl SimCluster {
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(Mutex::new(ClusterState::new(config.clone())));
        let nodes = (0..config.node_count)
            .map(NodeId)
            .map(|id| {
                Arc::new(SimNode {
                    id,
                    addr: p2p_addr(&config, id),
                    shared: shared.clone(),
                })
            })
            .collect();
        info!("started simulated cluster of {} node(s)", config.node_count);
        Ok(Self {
            config,
            shared,
            nodes,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Result<Arc<SimNode>> {
        self.nodes
            .get(id.0)
            .cloned()
            .ok_or(SimError::UnknownNode(id))
    }

    /// Control handles in node order, ready for a harness registry.
    pub fn handles(&self) -> Vec<Arc<dyn NodeControl>> {
        self.nodes
            .iter()
            .map(|node| node.clone() as Arc<dyn NodeControl>)
            .collect()
    }

    /// Lines the node wrote to its own log, oldest first.
    pub fn log_lines(&self, id: NodeId) -> Result<Vec<String>> {
        let state = lock(&self.shared)?;
        Ok(state.node(id)?.log_lines().to_vec())
    }

    /// Open connections, complete or not.
    pub fn connection_count(&self) -> Result<usize> {
        Ok(lock(&self.shared)?.connections.len())
    }
}

fn lock(shared: &Mutex<ClusterState>) -> Result<MutexGuard<'_, ClusterState>> {
    shared.lock().map_err(|_| SimError::LockPoisoned)
}

/// Control handle of one simulated node.
pub struct SimNode {
    id: NodeId,
    addr: SocketAddr,
    shared: Arc<Mutex<ClusterState>>,
}

impl SimNode {
    fn with_cluster<T>(
        &self,
        f: impl FnOnce(&mut ClusterState) -> Result<T>,
    ) -> CommandResult<T> {
        let mut state = lock(&self.shared)?;
        Ok(f(&mut state)?)
    }

    /// Run a read-only query against this node.
    fn query<T>(&self, f: impl FnOnce(&NodeState) -> Result<T>) -> CommandResult<T> {
        self.with_cluster(|cluster| f(cluster.node(self.id)?))
    }

    /// Mutate this node, then relay whatever it now has to offer.
    fn update<T>(&self, f: impl FnOnce(&mut NodeState) -> Result<T>) -> CommandResult<T> {
        self.with_cluster(|cluster| {
            let out = f(cluster.node_mut(self.id)?)?;
            cluster.relay();
            Ok(out)
        })
    }
}

impl NodeControl for SimNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn p2p_addr(&self) -> SocketAddr {
        self.addr
    }

    fn generate(&self, count: u32) -> CommandResult<Vec<BlockHash>> {
        self.with_cluster(|cluster| cluster.generate(self.id, count))
    }

    fn get_block_hash(&self, height: u64) -> CommandResult<BlockHash> {
        self.query(|node| node.block_hash(height))
    }

    fn get_block_count(&self) -> CommandResult<u64> {
        self.query(|node| Ok(node.height()))
    }

    fn get_best_block_hash(&self) -> CommandResult<BlockHash> {
        self.query(|node| Ok(node.tip()))
    }

    fn get_new_address(&self) -> CommandResult<String> {
        self.with_cluster(|cluster| Ok(cluster.node_mut(self.id)?.new_address()))
    }

    fn send_to_address(&self, address: &str, amount: Amount) -> CommandResult<TxId> {
        self.update(|node| {
            node.fund_and_send(
                vec![SimOutput {
                    address: address.to_string(),
                    value: amount,
                }],
                vec![],
            )
        })
    }

    fn get_transaction(&self, txid: &TxId) -> CommandResult<WalletTransaction> {
        self.query(|node| node.wallet_transaction(txid))
    }

    fn decode_raw_transaction(&self, hex: &str) -> CommandResult<DecodedTransaction> {
        self.query(|node| node.decode(hex))
    }

    fn create_raw_transaction(
        &self,
        inputs: &[OutPoint],
        outputs: &[Payment],
        sc_creations: &[SidechainCreation],
        forward_transfers: &[ForwardTransfer],
    ) -> CommandResult<String> {
        self.query(|node| node.create_raw(inputs, outputs, sc_creations, forward_transfers))
    }

    fn sign_raw_transaction(&self, hex: &str) -> CommandResult<SignedTransaction> {
        self.query(|node| node.sign(hex))
    }

    fn send_raw_transaction(&self, hex: &str) -> CommandResult<TxId> {
        self.update(|node| node.submit_raw(hex))
    }

    fn send_to_sidechain(
        &self,
        address: &str,
        amount: Amount,
        scid: &ScId,
    ) -> CommandResult<TxId> {
        self.update(|node| node.send_to_sidechain(address, amount, scid))
    }

    fn get_sidechain_info(&self, scid: &ScId) -> CommandResult<SidechainInfo> {
        self.query(|node| node.sidechain_info(scid))
    }

    fn list_sidechains(&self) -> CommandResult<Vec<SidechainInfo>> {
        self.query(|node| Ok(node.sidechains()))
    }

    fn get_chain_tips(&self) -> CommandResult<Vec<ChainTip>> {
        self.query(|node| Ok(node.chain_tips()))
    }

    fn get_raw_mempool(&self) -> CommandResult<Vec<TxId>> {
        self.query(|node| Ok(node.mempool_txids()))
    }

    fn connect_peer(&self, addr: SocketAddr) -> CommandResult<()> {
        self.with_cluster(|cluster| cluster.connect(self.id, addr))
    }

    fn disconnect_peer(&self, addr: SocketAddr) -> CommandResult<()> {
        self.with_cluster(|cluster| cluster.disconnect(self.id, addr))
    }

    fn get_peer_info(&self) -> CommandResult<Vec<PeerInfo>> {
        self.with_cluster(|cluster| cluster.peer_info(self.id))
    }

    fn debug_log(&self, message: &str) -> CommandResult<()> {
        self.with_cluster(|cluster| {
            debug!("{}: {message}", self.id);
            cluster.node_mut(self.id)?.write_log(message);
            Ok(())
        })
    }
}
