//! Configuration for the harness and the fork-rollback scenario.
//!
//! Every field has a default, so a TOML file only needs to name what it
//! overrides:
//!
//! ```toml
//! [poll]
//! interval_ms = 250
//! max_attempts = 240
//!
//! [topology]
//! settle_delay_ms = 0
//!
//! [scenario]
//! fork_b_blocks = 6
//! ```

use {
    crate::{
        error::{HarnessError, Result},
        node::{Amount, NodeId, ScId, COIN},
        wait::PollPolicy,
    },
    serde::{Deserialize, Serialize},
    std::{collections::BTreeSet, fs, path::Path},
};

/// Top-level harness configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Block / mempool sync waits.
    pub poll: PollPolicy,

    /// Handshake waits after connect / disconnect. Unbounded by default.
    pub handshake_poll: PollPolicy,

    pub topology: TopologyConfig,

    pub scenario: ScenarioConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            poll: PollPolicy::default(),
            handshake_poll: PollPolicy::unbounded(100),
            topology: TopologyConfig::default(),
            scenario: ScenarioConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// A config suitable for in-process clusters: no sleeping, tight
    /// bounded retry budgets everywhere.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default() -> Self {
        Self {
            poll: PollPolicy::bounded(0, 50),
            handshake_poll: PollPolicy::bounded(0, 50),
            topology: TopologyConfig {
                settle_delay_ms: 0,
                converge_after_join: true,
            },
            scenario: ScenarioConfig::default(),
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| HarnessError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| HarnessError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll.max_attempts == Some(0) || self.handshake_poll.max_attempts == Some(0) {
            return Err(HarnessError::Config("max_attempts must be at least 1".into()));
        }
        self.scenario.validate()
    }
}

/// How `join` lets the healed network settle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Fixed delay after re-linking, before anything else is checked.
    pub settle_delay_ms: u64,

    /// After the delay, also wait until every node reports the same best
    /// block.
    pub converge_after_join: bool,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 2_000,
            converge_after_join: true,
        }
    }
}

/// Blocks a node mines while the shared history is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapStep {
    pub node: NodeId,
    pub blocks: u32,
}

/// Parameters of the fork-rollback scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub node_count: usize,

    /// Mines the shared history and fork A.
    pub miner: NodeId,
    /// Funds the builder and sends the forward transfer on fork A.
    pub sender: NodeId,
    /// Builds both conflicting transactions and mines fork B.
    pub builder: NodeId,

    /// Partition groups used by `split`.
    pub partition: Vec<Vec<NodeId>>,

    /// Shared-history block production, in order.
    pub bootstrap: Vec<BootstrapStep>,

    /// Blocks the miner adds after the funding transfer.
    pub confirm_blocks: u32,

    /// Value of the UTXO both conflicting transactions spend.
    pub transfer_amount: Amount,

    pub scid: ScId,
    pub epoch_length: u32,
    /// Sidechain receiver of the creation's forward-transfer output.
    pub sidechain_address: String,

    /// Forward transfer sent on fork A once the sidechain exists.
    pub forward_transfer_address: String,
    pub forward_transfer_amount: Amount,

    /// Fork A: blocks confirming the creation, then blocks confirming the
    /// forward transfer.
    pub fork_a_creation_blocks: u32,
    pub fork_a_transfer_blocks: u32,

    /// Fork B length; must exceed fork A.
    pub fork_b_blocks: u32,

    /// Also write scenario markers into every node's own log.
    pub mark_node_logs: bool,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        let mut scid = [0u8; 32];
        scid[31] = 0x22;
        Self {
            node_count: 3,
            miner: NodeId(0),
            sender: NodeId(1),
            builder: NodeId(2),
            partition: vec![vec![NodeId(0), NodeId(1)], vec![NodeId(2)]],
            bootstrap: vec![
                BootstrapStep {
                    node: NodeId(1),
                    blocks: 1,
                },
                BootstrapStep {
                    node: NodeId(2),
                    blocks: 1,
                },
                BootstrapStep {
                    node: NodeId(0),
                    blocks: 220,
                },
            ],
            confirm_blocks: 2,
            transfer_amount: 10 * COIN,
            scid: ScId::new(scid),
            epoch_length: 123,
            sidechain_address: format!("{:0>64}", "abc"),
            forward_transfer_address: "abcd".to_string(),
            forward_transfer_amount: COIN,
            fork_a_creation_blocks: 1,
            fork_a_transfer_blocks: 1,
            fork_b_blocks: 4,
            mark_node_logs: false,
        }
    }
}

impl ScenarioConfig {
    pub fn fork_a_blocks(&self) -> u32 {
        self.fork_a_creation_blocks
            .saturating_add(self.fork_a_transfer_blocks)
    }

    pub fn partition_groups(&self) -> Vec<BTreeSet<NodeId>> {
        self.partition
            .iter()
            .map(|group| group.iter().copied().collect())
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        let roles = [self.miner, self.sender, self.builder];
        if roles.iter().collect::<BTreeSet<_>>().len() != roles.len() {
            return Err(HarnessError::Config(
                "miner, sender and builder must be distinct nodes".into(),
            ));
        }
        if let Some(id) = roles.iter().find(|id| id.0 >= self.node_count) {
            return Err(HarnessError::Config(format!(
                "{id} is outside a {}-node cluster",
                self.node_count
            )));
        }
        if let Some(id) = self
            .partition
            .iter()
            .flatten()
            .chain(self.bootstrap.iter().map(|step| &step.node))
            .find(|id| id.0 >= self.node_count)
        {
            return Err(HarnessError::Config(format!(
                "{id} is outside a {}-node cluster",
                self.node_count
            )));
        }
        let group_of = |id: NodeId| self.partition.iter().position(|g| g.contains(&id));
        if group_of(self.miner).is_none() || group_of(self.miner) != group_of(self.sender) {
            return Err(HarnessError::Config(
                "miner and sender must share a partition group".into(),
            ));
        }
        if group_of(self.builder).is_none() || group_of(self.builder) == group_of(self.miner) {
            return Err(HarnessError::Config(
                "builder must be on the other side of the partition".into(),
            ));
        }
        if self.transfer_amount == 0 || self.forward_transfer_amount == 0 {
            return Err(HarnessError::Config("amounts must be non-zero".into()));
        }
        if self.fork_a_creation_blocks == 0 {
            return Err(HarnessError::Config(
                "fork A must mine the sidechain creation".into(),
            ));
        }
        if self.fork_b_blocks <= self.fork_a_blocks() {
            return Err(HarnessError::Config(format!(
                "fork B ({} blocks) must be strictly longer than fork A ({} blocks)",
                self.fork_b_blocks,
                self.fork_a_blocks()
            )));
        }
        Ok(())
    }
}
