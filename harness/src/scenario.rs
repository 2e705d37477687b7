//! The fork-rollback scenario.
//!
//! ```text
//! Joined(shared history) -> Split -> Diverged -> Reconciled
//! ```
//!
//! Fork A (miner and sender) confirms a sidechain creation and a forward
//! transfer into it. Fork B (builder) confirms a plain spend of the same
//! input and grows strictly longer. After the heal every node must adopt
//! fork B, forget the sidechain and hold nothing pending.

use {
    crate::{
        chain::ChainDriver,
        config::{HarnessConfig, ScenarioConfig},
        error::{HarnessError, Result},
        invariants::InvariantChecker,
        node::{BlockHash, ChainTip, NodeId, SidechainInfo, TipStatus, TxId},
        registry::NodeRegistry,
        sidechain_tx::{PreparedTransaction, SidechainTxBuilder},
        topology::{PartitionPlan, PartitionState, TopologyController},
    },
    log::{info, warn},
    serde::{Deserialize, Serialize},
    std::{collections::BTreeMap, fmt, sync::Arc},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioPhase {
    Joined,
    Split,
    Diverged,
    Reconciled,
}

impl fmt::Display for ScenarioPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Joined => "joined",
            Self::Split => "split",
            Self::Diverged => "diverged",
            Self::Reconciled => "reconciled",
        };
        f.write_str(s)
    }
}

/// What a completed run observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub shared_height: u64,
    pub funding_tx: TxId,
    pub sidechain_creation_tx: TxId,
    pub conflicting_spend_tx: TxId,
    pub forward_transfer_tx: TxId,
    /// The sidechain as fork A saw it before the heal.
    pub fork_a_sidechain: SidechainInfo,
    pub fork_a_blocks: Vec<BlockHash>,
    pub fork_b_blocks: Vec<BlockHash>,
    pub final_tip: BlockHash,
    pub final_height: u64,
    pub chain_tips: BTreeMap<NodeId, Vec<ChainTip>>,
}

#[derive(Default)]
struct Progress {
    shared_height: Option<u64>,
    funding_tx: Option<TxId>,
    creation: Option<PreparedTransaction>,
    spend: Option<PreparedTransaction>,
    forward_transfer_tx: Option<TxId>,
    fork_a_sidechain: Option<SidechainInfo>,
    fork_a_blocks: Vec<BlockHash>,
    fork_b_blocks: Vec<BlockHash>,
}

/// Sequences topology, chain, builder and checker through the scenario.
pub struct ScenarioDriver {
    config: ScenarioConfig,
    registry: Arc<NodeRegistry>,
    topology: TopologyController,
    chain: ChainDriver,
    builder: SidechainTxBuilder,
    checker: InvariantChecker,
    phase: ScenarioPhase,
    progress: Progress,
}

impl ScenarioDriver {
    pub fn new(registry: Arc<NodeRegistry>, config: &HarnessConfig) -> Result<Self> {
        config.validate()?;
        let scenario = config.scenario.clone();
        if registry.len() != scenario.node_count {
            return Err(HarnessError::Config(format!(
                "scenario expects {} nodes, registry holds {}",
                scenario.node_count,
                registry.len()
            )));
        }
        let plan = PartitionPlan::new(scenario.partition_groups())?;
        Ok(Self {
            topology: TopologyController::new(registry.clone(), plan, config)?,
            chain: ChainDriver::new(registry.clone(), config),
            builder: SidechainTxBuilder::new(registry.clone()),
            checker: InvariantChecker::new(registry.clone()),
            registry,
            config: scenario,
            phase: ScenarioPhase::Joined,
            progress: Progress::default(),
        })
    }

    pub fn phase(&self) -> ScenarioPhase {
        self.phase
    }

    pub fn topology(&self) -> &TopologyController {
        &self.topology
    }

    pub fn chain(&self) -> &ChainDriver {
        &self.chain
    }

    pub fn checker(&self) -> &InvariantChecker {
        &self.checker
    }

    /// Scenario marker: always logged, and written into every node's own
    /// log when `mark_node_logs` is set.
    pub fn mark(&self, message: &str) {
        info!("== {message}");
        if !self.config.mark_node_logs {
            return;
        }
        for (id, node) in self.registry.iter() {
            if let Err(e) = node.debug_log(message) {
                warn!("{id}: debug log rejected: {e}");
            }
        }
    }

    /// Run every step in order.
    pub fn run(&mut self) -> Result<ScenarioReport> {
        self.setup_network()?;
        self.build_shared_history()?;
        self.fund_builder()?;
        self.prepare_conflicting()?;
        self.split()?;
        self.grow_fork_a()?;
        self.grow_fork_b()?;
        self.reconcile()
    }

    // ── Joined ──────────────────────────────────────────────────────────────

    /// Link the nodes in a line, `0-1-2`.
    pub fn setup_network(&mut self) -> Result<()> {
        self.expect_phase("setup_network", ScenarioPhase::Joined)?;
        let all = self.registry.ids();
        self.topology.connect_chain(&all)?;
        self.chain.sync_all(&self.topology, &all)?;
        self.mark(&format!("network topology: {:?}", self.topology.links()));
        Ok(())
    }

    pub fn build_shared_history(&mut self) -> Result<()> {
        self.expect_phase("build_shared_history", ScenarioPhase::Joined)?;
        let all = self.registry.ids();
        for step in self.config.bootstrap.clone() {
            self.mark(&format!("{} generates {} block(s)", step.node, step.blocks));
            self.chain.generate(step.node, step.blocks)?;
            self.chain.sync_all(&self.topology, &all)?;
        }
        let height = self.block_count(self.config.miner)?;
        self.progress.shared_height = Some(height);
        Ok(())
    }

    /// The sender pays the builder the exact amount both conflicting
    /// transactions will spend.
    pub fn fund_builder(&mut self) -> Result<TxId> {
        self.expect_phase("fund_builder", ScenarioPhase::Joined)?;
        let (sender, builder) = (self.config.sender, self.config.builder);
        self.mark(&format!("{sender} sends coins to {builder} to have a UTXO"));
        let address = self
            .registry
            .get(builder)?
            .get_new_address()
            .map_err(|e| HarnessError::command(builder, "getnewaddress", e))?;
        let txid = self
            .registry
            .get(sender)?
            .send_to_address(&address, self.config.transfer_amount)
            .map_err(|e| HarnessError::command(sender, "sendtoaddress", e))?;
        let all = self.registry.ids();
        self.chain.sync_all(&self.topology, &all)?;
        self.chain.generate(self.config.miner, self.config.confirm_blocks)?;
        self.chain.sync_all(&self.topology, &all)?;
        let height = self.block_count(self.config.miner)?;
        self.progress.shared_height = Some(height);
        self.progress.funding_tx = Some(txid);
        Ok(txid)
    }

    /// Build the sidechain creation and the conflicting plain spend over the
    /// funding output.
    pub fn prepare_conflicting(&mut self) -> Result<(PreparedTransaction, PreparedTransaction)> {
        self.expect_phase("prepare_conflicting", ScenarioPhase::Joined)?;
        let funding = self.require(self.progress.funding_tx, "prepare_conflicting")?;
        let (builder, miner) = (self.config.builder, self.config.miner);
        let amount = self.config.transfer_amount;

        self.mark(&format!("{builder} creates a sidechain creation from the funding UTXO"));
        let input = self.builder.select_utxo(builder, &funding, amount)?;
        let creation = self.builder.build_sidechain_creation(
            builder,
            input,
            self.config.scid,
            self.config.epoch_length,
            amount,
            &self.config.sidechain_address,
        )?;

        self.mark(&format!("{builder} creates a plain spend of the same UTXO"));
        let dest = self
            .registry
            .get(miner)?
            .get_new_address()
            .map_err(|e| HarnessError::command(miner, "getnewaddress", e))?;
        let spend = self
            .builder
            .build_conflicting_spend(builder, input, &dest, amount)?;
        if !creation.conflicts_with(&spend) {
            return Err(HarnessError::InvariantViolation(format!(
                "{} and {} do not share an input",
                creation.txid, spend.txid
            )));
        }

        self.checker
            .assert_sidechain_absent_everywhere(&self.registry.ids(), &self.config.scid)?;
        self.progress.creation = Some(creation.clone());
        self.progress.spend = Some(spend.clone());
        Ok((creation, spend))
    }

    // ── Split ───────────────────────────────────────────────────────────────

    pub fn split(&mut self) -> Result<()> {
        self.expect_phase("split", ScenarioPhase::Joined)?;
        self.require(self.progress.spend.as_ref(), "split")?;
        self.mark("split network");
        self.topology.split()?;
        self.mark(&format!(
            "the network is split: {:?}",
            self.topology.components()
        ));
        self.phase = ScenarioPhase::Split;
        Ok(())
    }

    /// Fork A confirms the sidechain creation, then a forward transfer into
    /// the new sidechain.
    pub fn grow_fork_a(&mut self) -> Result<Vec<BlockHash>> {
        self.expect_phase("grow_fork_a", ScenarioPhase::Split)?;
        let creation = self
            .require(self.progress.creation.as_ref(), "grow_fork_a")?
            .clone();
        let (miner, sender, builder) = (self.config.miner, self.config.sender, self.config.builder);
        let group = self.group_of(miner);
        let scid = self.config.scid;

        self.mark(&format!("{miner} sends the sidechain creation and mines it"));
        self.builder.broadcast(miner, &creation)?;
        self.chain.sync_mempools(&self.topology, &group)?;
        let mut blocks = self
            .chain
            .generate(miner, self.config.fork_a_creation_blocks)?;
        self.chain.sync_blocks(&self.topology, &group)?;

        let info = self.checker.assert_sidechain_present(sender, &scid)?;

        self.mark(&format!("{sender} sends a forward transfer to the sidechain"));
        let ft = self
            .registry
            .get(sender)?
            .send_to_sidechain(
                &self.config.forward_transfer_address,
                self.config.forward_transfer_amount,
                &scid,
            )
            .map_err(|e| HarnessError::command(sender, "sc_send", e))?;
        self.chain.sync_mempools(&self.topology, &group)?;
        blocks.extend(
            self.chain
                .generate(miner, self.config.fork_a_transfer_blocks)?,
        );
        self.chain.sync_all(&self.topology, &group)?;

        for id in &group {
            self.checker.assert_sidechain_present(*id, &scid)?;
        }
        self.checker.assert_sidechain_absent(builder, &scid)?;

        self.progress.forward_transfer_tx = Some(ft);
        self.progress.fork_a_sidechain = Some(info);
        self.progress.fork_a_blocks = blocks.clone();
        Ok(blocks)
    }

    /// Fork B confirms the conflicting spend and outgrows fork A.
    pub fn grow_fork_b(&mut self) -> Result<Vec<BlockHash>> {
        self.expect_phase("grow_fork_b", ScenarioPhase::Split)?;
        let spend = self
            .require(self.progress.spend.as_ref(), "grow_fork_b")?
            .clone();
        self.require(self.progress.forward_transfer_tx, "grow_fork_b")?;
        let builder = self.config.builder;
        let group = self.group_of(builder);

        self.mark(&format!(
            "{builder} mines {} block(s) including the conflicting spend",
            self.config.fork_b_blocks
        ));
        self.builder.broadcast(builder, &spend)?;
        self.chain.sync_mempools(&self.topology, &group)?;
        let blocks = self.chain.generate(builder, self.config.fork_b_blocks)?;
        self.chain.sync_all(&self.topology, &group)?;

        self.progress.fork_b_blocks = blocks.clone();
        self.phase = ScenarioPhase::Diverged;
        Ok(blocks)
    }

    // ── Reconciled ──────────────────────────────────────────────────────────

    /// Heal the network and check that fork B won everywhere and fork A left
    /// nothing behind.
    pub fn reconcile(&mut self) -> Result<ScenarioReport> {
        self.expect_phase("reconcile", ScenarioPhase::Diverged)?;
        self.mark("joining network");
        self.topology.join()?;
        self.mark("network joined");

        let all = self.registry.ids();
        self.chain.sync_blocks(&self.topology, &all)?;
        self.chain.refresh_tips(&all)?;

        let fork_b_tip = *self
            .progress
            .fork_b_blocks
            .last()
            .ok_or(HarnessError::OutOfOrder {
                step: "reconcile",
                phase: self.phase,
            })?;
        self.checker.assert_same_active_tip(&all, &fork_b_tip)?;
        if let Some(fork_a_tip) = self.progress.fork_a_blocks.last() {
            self.checker
                .assert_tip_status(self.config.miner, fork_a_tip, TipStatus::ValidFork)?;
        }

        self.mark("checking sidechain info, no node sees the sidechain");
        self.checker
            .assert_sidechain_absent_everywhere(&all, &self.config.scid)?;
        self.mark("the forward transfer must not be pending anywhere");
        self.checker.assert_mempool_empty(&all)?;

        let mut chain_tips = BTreeMap::new();
        for id in &all {
            chain_tips.insert(*id, self.chain.chain_tips(*id)?);
        }
        let final_height = self.block_count(self.config.builder)?;
        self.phase = ScenarioPhase::Reconciled;
        info!("scenario reconciled at height {final_height}, tip {fork_b_tip}");

        let progress = &self.progress;
        let step = "reconcile";
        Ok(ScenarioReport {
            shared_height: self.require(progress.shared_height, step)?,
            funding_tx: self.require(progress.funding_tx, step)?,
            sidechain_creation_tx: self.require(progress.creation.as_ref(), step)?.txid,
            conflicting_spend_tx: self.require(progress.spend.as_ref(), step)?.txid,
            forward_transfer_tx: self.require(progress.forward_transfer_tx, step)?,
            fork_a_sidechain: self
                .require(progress.fork_a_sidechain.as_ref(), step)?
                .clone(),
            fork_a_blocks: progress.fork_a_blocks.clone(),
            fork_b_blocks: progress.fork_b_blocks.clone(),
            final_tip: fork_b_tip,
            final_height,
            chain_tips,
        })
    }

    // ── Helpers ─────────────────────────────────────────────────────────────

    fn expect_phase(&self, step: &'static str, phase: ScenarioPhase) -> Result<()> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(HarnessError::OutOfOrder {
                step,
                phase: self.phase,
            })
        }
    }

    fn require<T>(&self, value: Option<T>, step: &'static str) -> Result<T> {
        value.ok_or(HarnessError::OutOfOrder {
            step,
            phase: self.phase,
        })
    }

    /// Members of `id`'s partition group, or every node while joined.
    fn group_of(&self, id: NodeId) -> Vec<NodeId> {
        if self.topology.state() == PartitionState::Joined {
            return self.registry.ids();
        }
        let plan = self.topology.plan();
        plan.group_of(id)
            .and_then(|i| plan.groups().get(i))
            .map(|group| group.iter().copied().collect())
            .unwrap_or_else(|| vec![id])
    }

    fn block_count(&self, id: NodeId) -> Result<u64> {
        self.registry
            .get(id)?
            .get_block_count()
            .map_err(|e| HarnessError::command(id, "getblockcount", e))
    }
}
