//! Post-condition checks over the cluster.
//!
//! Every check queries nodes and never mutates them, so repeating a check
//! yields the same verdict. A failed check is reported as
//! [`HarnessError::InvariantViolation`]; node-level failures unrelated to the
//! checked condition still surface as [`HarnessError::NodeCommand`].

use {
    crate::{
        error::{HarnessError, Result},
        node::{BlockHash, NodeId, ScId, SidechainInfo, TipStatus, SCID_NOT_YET_CREATED},
        registry::NodeRegistry,
    },
    log::{debug, info},
    std::sync::Arc,
};

pub struct InvariantChecker {
    registry: Arc<NodeRegistry>,
}

impl InvariantChecker {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self { registry }
    }

    /// The node must answer a sidechain query for `scid` with the
    /// "not yet created" rejection. A successful answer or any other error
    /// fails the check.
    pub fn assert_sidechain_absent(&self, node: NodeId, scid: &ScId) -> Result<()> {
        match self.registry.get(node)?.get_sidechain_info(scid) {
            Ok(info) => Err(HarnessError::InvariantViolation(format!(
                "{node} reports sidechain {scid} created at height {} in block {}",
                info.created_at_height, info.created_in_block
            ))),
            Err(e) if e.is_scid_not_yet_created() => {
                debug!("{node}: sidechain {scid} absent");
                Ok(())
            }
            Err(e) => Err(HarnessError::InvariantViolation(format!(
                "{node}: expected \"{SCID_NOT_YET_CREATED}\" for {scid}, got {:?}: {e}",
                e.reason
            ))),
        }
    }

    pub fn assert_sidechain_absent_everywhere(&self, nodes: &[NodeId], scid: &ScId) -> Result<()> {
        for node in nodes {
            self.assert_sidechain_absent(*node, scid)?;
        }
        info!("sidechain {scid} absent on {nodes:?}");
        Ok(())
    }

    /// The node must report `scid` as registered.
    pub fn assert_sidechain_present(&self, node: NodeId, scid: &ScId) -> Result<SidechainInfo> {
        match self.registry.get(node)?.get_sidechain_info(scid) {
            Ok(info) => Ok(info),
            Err(e) if e.is_scid_not_yet_created() => Err(HarnessError::InvariantViolation(
                format!("{node} does not know sidechain {scid}"),
            )),
            Err(e) => Err(HarnessError::command(node, "getscinfo", e)),
        }
    }

    /// Every node's pending pool must be empty. All offenders are reported
    /// together.
    pub fn assert_mempool_empty(&self, nodes: &[NodeId]) -> Result<()> {
        let mut offenders = Vec::new();
        for node in nodes {
            let pool = self
                .registry
                .get(*node)?
                .get_raw_mempool()
                .map_err(|e| HarnessError::command(*node, "getrawmempool", e))?;
            if !pool.is_empty() {
                let txids: Vec<String> = pool.iter().map(ToString::to_string).collect();
                offenders.push(format!("{node} holds [{}]", txids.join(", ")));
            }
        }
        if offenders.is_empty() {
            info!("mempools empty on {nodes:?}");
            Ok(())
        } else {
            Err(HarnessError::InvariantViolation(format!(
                "pending transactions left after reconciliation: {}",
                offenders.join("; ")
            )))
        }
    }

    /// Every node's best block must be `expected`.
    pub fn assert_same_active_tip(&self, nodes: &[NodeId], expected: &BlockHash) -> Result<()> {
        for node in nodes {
            let best = self
                .registry
                .get(*node)?
                .get_best_block_hash()
                .map_err(|e| HarnessError::command(*node, "getbestblockhash", e))?;
            if best != *expected {
                return Err(HarnessError::InvariantViolation(format!(
                    "{node} is on {best}, expected {expected}"
                )));
            }
        }
        Ok(())
    }

    /// `node` must list a tip at `hash` with the given status.
    pub fn assert_tip_status(
        &self,
        node: NodeId,
        hash: &BlockHash,
        status: TipStatus,
    ) -> Result<()> {
        let tips = self
            .registry
            .get(node)?
            .get_chain_tips()
            .map_err(|e| HarnessError::command(node, "getchaintips", e))?;
        match tips.iter().find(|tip| tip.hash == *hash) {
            Some(tip) if tip.status == status => Ok(()),
            Some(tip) => Err(HarnessError::InvariantViolation(format!(
                "{node}: tip {hash} is {}, expected {status}",
                tip.status
            ))),
            None => Err(HarnessError::InvariantViolation(format!(
                "{node} does not list {hash} among its chain tips"
            ))),
        }
    }

    /// Terminal check of a rollback: the sidechain is gone and nothing is
    /// left pending, on every node.
    pub fn assert_rolled_back(&self, nodes: &[NodeId], scid: &ScId) -> Result<()> {
        self.assert_sidechain_absent_everywhere(nodes, scid)?;
        self.assert_mempool_empty(nodes)
    }
}
