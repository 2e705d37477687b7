//! Per-node block production and convergence waits.

use {
    crate::{
        config::HarnessConfig,
        error::{HarnessError, Result},
        node::{BlockHash, ChainTip, NodeId, TipStatus, TxId},
        registry::NodeRegistry,
        topology::TopologyController,
        wait::{wait_until, PollPolicy},
    },
    log::{debug, info},
    std::{
        collections::{BTreeMap, BTreeSet},
        sync::Arc,
    },
};

/// Whether every node in `nodes` reports the same best block.
pub fn blocks_converged(registry: &NodeRegistry, nodes: &[NodeId]) -> Result<bool> {
    let mut best = BTreeSet::new();
    for id in nodes {
        let hash = registry
            .get(*id)?
            .get_best_block_hash()
            .map_err(|e| HarnessError::command(*id, "getbestblockhash", e))?;
        best.insert(hash);
    }
    Ok(best.len() <= 1)
}

/// Whether every node in `nodes` holds the same set of pending transactions.
pub fn mempools_converged(registry: &NodeRegistry, nodes: &[NodeId]) -> Result<bool> {
    let mut pools: Vec<BTreeSet<TxId>> = Vec::with_capacity(nodes.len());
    for id in nodes {
        let pool = registry
            .get(*id)?
            .get_raw_mempool()
            .map_err(|e| HarnessError::command(*id, "getrawmempool", e))?;
        pools.push(pool.into_iter().collect());
    }
    Ok(pools.windows(2).all(|w| w[0] == w[1]))
}

/// Requests block production on individual nodes and tracks their tips.
pub struct ChainDriver {
    registry: Arc<NodeRegistry>,
    poll: PollPolicy,
    tips: BTreeMap<NodeId, BlockHash>,
}

impl ChainDriver {
    pub fn new(registry: Arc<NodeRegistry>, config: &HarnessConfig) -> Self {
        Self {
            registry,
            poll: config.poll,
            tips: BTreeMap::new(),
        }
    }

    /// Mine `count` blocks on `node`'s current view. Returns the new hashes
    /// in mining order.
    pub fn generate(&mut self, node: NodeId, count: u32) -> Result<Vec<BlockHash>> {
        let hashes = self
            .registry
            .get(node)?
            .generate(count)
            .map_err(|e| HarnessError::command(node, "generate", e))?;
        if let Some(last) = hashes.last() {
            self.tips.insert(node, *last);
            info!("{node} mined {} block(s), tip {last}", hashes.len());
        }
        Ok(hashes)
    }

    /// Block until every node in `nodes` reports the same best block.
    pub fn sync_blocks(&self, topology: &TopologyController, nodes: &[NodeId]) -> Result<()> {
        self.check_partition("sync_blocks", topology, nodes)?;
        let polls = wait_until(&format!("block sync of {nodes:?}"), &self.poll, || {
            blocks_converged(&self.registry, nodes)
        })?;
        debug!("blocks in sync across {nodes:?} after {polls} poll(s)");
        Ok(())
    }

    /// Block until every node in `nodes` holds the same pending transactions.
    pub fn sync_mempools(&self, topology: &TopologyController, nodes: &[NodeId]) -> Result<()> {
        self.check_partition("sync_mempools", topology, nodes)?;
        let polls = wait_until(&format!("mempool sync of {nodes:?}"), &self.poll, || {
            mempools_converged(&self.registry, nodes)
        })?;
        debug!("mempools in sync across {nodes:?} after {polls} poll(s)");
        Ok(())
    }

    pub fn sync_all(&self, topology: &TopologyController, nodes: &[NodeId]) -> Result<()> {
        self.sync_blocks(topology, nodes)?;
        self.sync_mempools(topology, nodes)
    }

    pub fn block_hash(&self, node: NodeId, height: u64) -> Result<BlockHash> {
        self.registry
            .get(node)?
            .get_block_hash(height)
            .map_err(|e| HarnessError::command(node, "getblockhash", e))
    }

    /// Last tip recorded for `node` by [`generate`](Self::generate) or
    /// [`refresh_tips`](Self::refresh_tips).
    pub fn tip(&self, node: NodeId) -> Option<BlockHash> {
        self.tips.get(&node).copied()
    }

    /// Re-read the best block of each node.
    pub fn refresh_tips(&mut self, nodes: &[NodeId]) -> Result<()> {
        for id in nodes {
            let hash = self
                .registry
                .get(*id)?
                .get_best_block_hash()
                .map_err(|e| HarnessError::command(*id, "getbestblockhash", e))?;
            self.tips.insert(*id, hash);
        }
        Ok(())
    }

    pub fn chain_tips(&self, node: NodeId) -> Result<Vec<ChainTip>> {
        self.registry
            .get(node)?
            .get_chain_tips()
            .map_err(|e| HarnessError::command(node, "getchaintips", e))
    }

    pub fn active_tip(&self, node: NodeId) -> Result<ChainTip> {
        self.chain_tips(node)?
            .into_iter()
            .find(|tip| tip.status == TipStatus::Active)
            .ok_or_else(|| {
                HarnessError::InvariantViolation(format!("{node} reports no active chain tip"))
            })
    }

    fn check_partition(
        &self,
        operation: &'static str,
        topology: &TopologyController,
        nodes: &[NodeId],
    ) -> Result<()> {
        if topology.same_partition(nodes) {
            Ok(())
        } else {
            Err(HarnessError::InvalidState {
                operation,
                state: topology.state(),
            })
        }
    }
}
