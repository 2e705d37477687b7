//! Ledger state derived from one chain: unspent outputs, registered
//! sidechains and the location of every confirmed transaction.
//!
//! The state is a pure function of the blocks connected to it. A node that
//! switches branches rebuilds it from the fork point's ancestry, which is
//! what guarantees that nothing confirmed only on an abandoned branch
//! survives the switch.

use {
    crate::{
        block::Block,
        config::SimConfig,
        error::{Result, SimError},
        tx::{witness_for, SimTransaction},
    },
    scfork_harness::node::{
        Amount, BlockHash, ImmatureAmount, OutPoint, RejectReason, ScId, SidechainInfo, TxId,
        SCID_NOT_YET_CREATED,
    },
    std::collections::{BTreeMap, BTreeSet, HashMap, HashSet},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub value: Amount,
    pub address: String,
    pub height: u64,
    pub coinbase: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxLocation {
    pub block: BlockHash,
    pub height: u64,
    pub index: usize,
}

#[derive(Debug, Clone)]
struct SidechainRecord {
    epoch_length: u32,
    creating_tx: TxId,
    created_in_block: BlockHash,
    created_at_height: u64,
    transfers: Vec<ImmatureAmount>,
}

/// Pending-pool facts a candidate transaction is checked against on top of
/// the confirmed state.
#[derive(Debug, Default)]
pub struct PoolView {
    pub spent: HashSet<OutPoint>,
    pub created_sidechains: HashSet<ScId>,
}

#[derive(Debug, Clone)]
pub struct ChainState {
    tip: BlockHash,
    height: u64,
    coinbase_maturity: u64,
    sc_coins_maturity: u64,
    utxos: HashMap<OutPoint, Utxo>,
    sidechains: BTreeMap<ScId, SidechainRecord>,
    locations: HashMap<TxId, TxLocation>,
}

impl ChainState {
    pub fn new(genesis: &Block, config: &SimConfig) -> Self {
        Self {
            tip: genesis.hash,
            height: genesis.height,
            coinbase_maturity: config.coinbase_maturity,
            sc_coins_maturity: config.sc_coins_maturity,
            utxos: HashMap::new(),
            sidechains: BTreeMap::new(),
            locations: HashMap::new(),
        }
    }

    pub fn tip(&self) -> BlockHash {
        self.tip
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn utxo(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        self.utxos.get(outpoint)
    }

    pub fn utxos(&self) -> impl Iterator<Item = (&OutPoint, &Utxo)> {
        self.utxos.iter()
    }

    pub fn location(&self, txid: &TxId) -> Option<TxLocation> {
        self.locations.get(txid).copied()
    }

    pub fn has_sidechain(&self, scid: &ScId) -> bool {
        self.sidechains.contains_key(scid)
    }

    pub fn sidechain_info(&self, scid: &ScId) -> Option<SidechainInfo> {
        self.sidechains.get(scid).map(|record| {
            let (mature, immature): (Vec<_>, Vec<_>) = record
                .transfers
                .iter()
                .cloned()
                .partition(|t| t.maturity_height <= self.height);
            SidechainInfo {
                scid: *scid,
                epoch_length: record.epoch_length,
                balance: mature
                    .iter()
                    .fold(0u64, |acc, t| acc.saturating_add(t.amount)),
                creating_tx: record.creating_tx,
                created_in_block: record.created_in_block,
                created_at_height: record.created_at_height,
                immature_amounts: immature,
            }
        })
    }

    pub fn sidechains(&self) -> Vec<SidechainInfo> {
        self.sidechains
            .keys()
            .filter_map(|scid| self.sidechain_info(scid))
            .collect()
    }

    /// Check a non-coinbase transaction for inclusion in the next block.
    /// Returns the fee it pays.
    pub fn check_transaction(&self, tx: &SimTransaction, pool: &PoolView) -> Result<Amount> {
        self.check_at(tx, pool, self.height.saturating_add(1))
    }

    fn check_at(&self, tx: &SimTransaction, pool: &PoolView, spend_height: u64) -> Result<Amount> {
        if tx.is_coinbase() {
            return Err(SimError::rejected(RejectReason::InvalidParameter, "coinbase"));
        }
        if tx.inputs.is_empty() {
            return Err(SimError::rejected(
                RejectReason::InvalidParameter,
                "bad-txns-vin-empty",
            ));
        }
        let unique: BTreeSet<_> = tx.inputs.iter().collect();
        if unique.len() != tx.inputs.len() {
            return Err(SimError::rejected(
                RejectReason::InvalidParameter,
                "bad-txns-inputs-duplicate",
            ));
        }

        let mut value_in: Amount = 0;
        for (i, input) in tx.inputs.iter().enumerate() {
            if pool.spent.contains(input) {
                return Err(SimError::rejected(
                    RejectReason::InputsSpent,
                    "txn-mempool-conflict",
                ));
            }
            let Some(utxo) = self.utxos.get(input) else {
                return Err(if self.locations.contains_key(&input.txid) {
                    SimError::rejected(RejectReason::InputsSpent, "bad-txns-inputs-spent")
                } else {
                    SimError::rejected(RejectReason::MissingInputs, "missing-inputs")
                });
            };
            if tx.witnesses.get(i) != Some(&witness_for(&utxo.address, input)) {
                return Err(SimError::rejected(
                    RejectReason::Other,
                    "mandatory-script-verify-flag-failed",
                ));
            }
            if utxo.coinbase && spend_height.saturating_sub(utxo.height) < self.coinbase_maturity {
                return Err(SimError::rejected(
                    RejectReason::Other,
                    "bad-txns-premature-spend-of-coinbase",
                ));
            }
            value_in = value_in.saturating_add(utxo.value);
        }

        let mut created = HashSet::new();
        for creation in &tx.sc_creations {
            if self.sidechains.contains_key(&creation.scid)
                || pool.created_sidechains.contains(&creation.scid)
                || !created.insert(creation.scid)
            {
                return Err(SimError::rejected(
                    RejectReason::ScidAlreadyExists,
                    format!("sidechain {} already exists", creation.scid),
                ));
            }
        }
        for transfer in &tx.forward_transfers {
            if !self.sidechains.contains_key(&transfer.scid) && !created.contains(&transfer.scid) {
                return Err(SimError::rejected(
                    RejectReason::ScidNotYetCreated,
                    SCID_NOT_YET_CREATED,
                ));
            }
        }

        let value_out = tx.output_total();
        if value_in < value_out {
            return Err(SimError::rejected(
                RejectReason::InsufficientFunds,
                "bad-txns-in-belowout",
            ));
        }
        Ok(value_in.saturating_sub(value_out))
    }

    /// Validate and apply `block`, which must extend the current tip. The
    /// state is left untouched when the block is rejected.
    pub fn connect_block(&mut self, block: &Block) -> Result<()> {
        if block.parent != self.tip {
            return Err(SimError::rejected(
                RejectReason::InvalidParameter,
                "prev-blk-not-tip",
            ));
        }
        let mut next = self.clone();
        next.height = block.height;
        next.tip = block.hash;
        for (index, tx) in block.txs.iter().enumerate() {
            if index == 0 {
                if tx.coinbase_height != Some(block.height) {
                    return Err(SimError::rejected(
                        RejectReason::InvalidParameter,
                        "bad-cb-height",
                    ));
                }
            } else {
                next.check_at(tx, &PoolView::default(), block.height)?;
            }
            next.apply(tx, block, index);
        }
        *self = next;
        Ok(())
    }

    fn apply(&mut self, tx: &SimTransaction, block: &Block, index: usize) {
        let txid = tx.txid();
        for input in &tx.inputs {
            self.utxos.remove(input);
        }
        for (vout, output) in tx.outputs.iter().enumerate() {
            self.utxos.insert(
                OutPoint {
                    txid,
                    vout: vout as u32,
                },
                Utxo {
                    value: output.value,
                    address: output.address.clone(),
                    height: block.height,
                    coinbase: tx.is_coinbase(),
                },
            );
        }
        for creation in &tx.sc_creations {
            self.sidechains.insert(
                creation.scid,
                SidechainRecord {
                    epoch_length: creation.epoch_length,
                    creating_tx: txid,
                    created_in_block: block.hash,
                    created_at_height: block.height,
                    transfers: Vec::new(),
                },
            );
        }
        for transfer in &tx.forward_transfers {
            if let Some(record) = self.sidechains.get_mut(&transfer.scid) {
                record.transfers.push(ImmatureAmount {
                    maturity_height: block.height.saturating_add(self.sc_coins_maturity),
                    amount: transfer.amount,
                });
            }
        }
        self.locations.insert(
            txid,
            TxLocation {
                block: block.hash,
                height: block.height,
                index,
            },
        );
    }
}
