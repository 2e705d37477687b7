//! One simulated ledger node: block tree, fork choice, pending pool and
//! wallet.
//!
//! Fork choice picks the highest valid block, ties going to the block this
//! node saw first. Switching branches replays the new branch from the fork
//! point; transactions from disconnected blocks are offered back to the pool
//! and kept only if they are still valid on the new chain.

use {
    crate::{
        block::Block,
        config::SimConfig,
        error::{Result, SimError},
        state::{ChainState, PoolView, Utxo},
        tx::{witness_for, SimOutput, SimTransaction},
    },
    log::{debug, info, warn},
    scfork_harness::node::{
        Amount, BlockHash, ChainTip, DecodedTransaction, ForwardTransfer, NodeId, OutPoint,
        Payment, RejectReason, ScId, SidechainCreation, SidechainInfo, SignedTransaction,
        TipStatus, TxId, WalletTransaction, SCID_NOT_YET_CREATED,
    },
    sha2::{Digest, Sha256},
    solana_hash::Hash,
    std::{
        cmp::Reverse,
        collections::{BTreeSet, HashMap, HashSet},
        sync::Arc,
    },
};

const ADDRESS_DOMAIN: &[u8] = b"scfork-address";

pub struct NodeState {
    id: NodeId,
    config: SimConfig,
    genesis: Arc<Block>,
    blocks: HashMap<BlockHash, Arc<Block>>,
    children: HashMap<BlockHash, Vec<BlockHash>>,
    /// Order in which this node first saw each block.
    arrival: HashMap<BlockHash, u64>,
    next_arrival: u64,
    invalid: HashSet<BlockHash>,
    /// Blocks that were connected at least once.
    validated: HashSet<BlockHash>,
    /// Active chain, indexed by height.
    active: Vec<BlockHash>,
    state: ChainState,
    mempool: Vec<(TxId, SimTransaction)>,
    addresses: BTreeSet<String>,
    next_address: u64,
    /// Wallet-originated transactions.
    sent: HashSet<TxId>,
    log: Vec<String>,
}

impl NodeState {
    pub fn new(id: NodeId, config: &SimConfig) -> Self {
        let genesis = Arc::new(Block::genesis());
        let state = ChainState::new(&genesis, config);
        Self {
            id,
            config: config.clone(),
            blocks: HashMap::from([(genesis.hash, genesis.clone())]),
            children: HashMap::new(),
            arrival: HashMap::from([(genesis.hash, 0)]),
            next_arrival: 1,
            invalid: HashSet::new(),
            validated: HashSet::from([genesis.hash]),
            active: vec![genesis.hash],
            state,
            mempool: Vec::new(),
            addresses: BTreeSet::new(),
            next_address: 0,
            sent: HashSet::new(),
            log: Vec::new(),
            genesis,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn tip(&self) -> BlockHash {
        self.state.tip()
    }

    pub fn height(&self) -> u64 {
        self.state.height()
    }

    pub fn log_lines(&self) -> &[String] {
        &self.log
    }

    pub fn write_log(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
    }

    pub fn knows_block(&self, hash: &BlockHash) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn block(&self, hash: &BlockHash) -> Result<&Arc<Block>> {
        self.blocks
            .get(hash)
            .ok_or_else(|| SimError::rejected(RejectReason::NotFound, "Block not found"))
    }

    /// Blocks of the active chain above genesis, lowest first.
    pub fn active_blocks(&self) -> Vec<Arc<Block>> {
        self.active
            .iter()
            .skip(1)
            .filter_map(|hash| self.blocks.get(hash).cloned())
            .collect()
    }

    pub fn block_hash(&self, height: u64) -> Result<BlockHash> {
        usize::try_from(height)
            .ok()
            .and_then(|h| self.active.get(h))
            .copied()
            .ok_or_else(|| {
                SimError::rejected(RejectReason::InvalidParameter, "Block height out of range")
            })
    }

    // ── Blocks ──────────────────────────────────────────────────────────────

    /// Store `block` and re-run fork choice. Returns false for a block the
    /// node already has.
    pub fn accept_block(&mut self, block: Arc<Block>) -> Result<bool> {
        if self.blocks.contains_key(&block.hash) {
            return Ok(false);
        }
        let parent = self.block(&block.parent).map_err(|_| {
            SimError::rejected(RejectReason::Other, "prev-blk-not-found")
        })?;
        if block.height != parent.height.saturating_add(1) {
            return Err(SimError::rejected(RejectReason::Other, "bad-height"));
        }
        let hash = block.hash;
        let parent_invalid = self.invalid.contains(&block.parent);
        self.children.entry(block.parent).or_default().push(hash);
        self.arrival.insert(hash, self.next_arrival);
        self.next_arrival = self.next_arrival.saturating_add(1);
        self.blocks.insert(hash, block);
        if parent_invalid {
            self.invalid.insert(hash);
        } else {
            self.activate_best_chain();
        }
        Ok(true)
    }

    /// Mine one block on the active tip holding every pending transaction.
    pub fn mine(&mut self, nonce: u64) -> Result<Arc<Block>> {
        let parent = self.block(&self.tip())?.clone();
        let height = parent.height.saturating_add(1);
        let mut fees: Amount = 0;
        let mut txs = Vec::with_capacity(self.mempool.len().saturating_add(1));
        for (txid, tx) in &self.mempool {
            match self.state.check_transaction(tx, &PoolView::default()) {
                Ok(fee) => {
                    fees = fees.saturating_add(fee);
                    txs.push(tx.clone());
                }
                Err(e) => debug!("{}: leaving {txid} out of block: {e}", self.id),
            }
        }
        let address = self.new_address();
        let reward = self.config.block_subsidy.saturating_add(fees);
        txs.insert(0, SimTransaction::coinbase(height, address, reward));
        let block = Arc::new(Block::new(&parent, self.id, nonce, txs));
        self.accept_block(block.clone())?;
        if self.tip() != block.hash {
            return Err(SimError::rejected(
                RejectReason::Other,
                format!("mined block {} was not activated", block.hash),
            ));
        }
        Ok(block)
    }

    fn activate_best_chain(&mut self) {
        loop {
            let Some(best) = self.best_candidate() else {
                return;
            };
            if best == self.tip() {
                return;
            }
            match self.switch_to(best) {
                Ok(()) => return,
                Err((bad, err)) => {
                    warn!("{}: block {bad} rejected: {err}", self.id);
                    self.write_log(format!("InvalidChainFound: {bad} ({err})"));
                    self.mark_invalid(bad);
                }
            }
        }
    }

    fn best_candidate(&self) -> Option<BlockHash> {
        self.blocks
            .values()
            .filter(|block| !self.invalid.contains(&block.hash))
            .max_by_key(|block| {
                let seen = self.arrival.get(&block.hash).copied().unwrap_or(u64::MAX);
                (block.height, Reverse(seen))
            })
            .map(|block| block.hash)
    }

    fn on_active(&self, block: &Block) -> bool {
        usize::try_from(block.height)
            .ok()
            .and_then(|h| self.active.get(h))
            == Some(&block.hash)
    }

    /// Make `target` the active tip. On failure, returns the block that
    /// could not be connected.
    fn switch_to(&mut self, target: BlockHash) -> std::result::Result<(), (BlockHash, SimError)> {
        let mut path = Vec::new();
        let mut cursor = self.block(&target).map_err(|e| (target, e))?.clone();
        while !self.on_active(&cursor) {
            path.push(cursor.clone());
            cursor = self.block(&cursor.parent).map_err(|e| (target, e))?.clone();
        }
        path.reverse();
        let fork = cursor;
        let fork_index = usize::try_from(fork.height).unwrap_or(usize::MAX);

        let mut next = if fork.hash == self.tip() {
            self.state.clone()
        } else {
            let mut replay = ChainState::new(&self.genesis, &self.config);
            for hash in self.active.iter().take(fork_index.saturating_add(1)).skip(1) {
                let block = self.block(hash).map_err(|e| (*hash, e))?;
                replay.connect_block(block).map_err(|e| (*hash, e))?;
            }
            replay
        };
        for block in &path {
            next.connect_block(block).map_err(|e| (block.hash, e))?;
            self.validated.insert(block.hash);
        }

        let disconnected: Vec<Arc<Block>> = self
            .active
            .split_off(fork_index.saturating_add(1))
            .iter()
            .filter_map(|hash| self.blocks.get(hash).cloned())
            .collect();
        self.active.extend(path.iter().map(|block| block.hash));
        self.state = next;

        if disconnected.is_empty() {
            debug!("{}: new tip {} at {}", self.id, self.tip(), self.height());
        } else {
            info!(
                "{}: reorganized to {} at {} from fork point {} ({} block(s) disconnected)",
                self.id,
                self.tip(),
                self.height(),
                fork.height,
                disconnected.len()
            );
            let line = format!(
                "Reorganize: disconnected {} block(s) above {}, new best={} height={}",
                disconnected.len(),
                fork.hash,
                self.tip(),
                self.height()
            );
            self.write_log(line);
        }
        let resurrected = disconnected
            .iter()
            .flat_map(|block| block.txs.iter().skip(1).cloned())
            .collect();
        self.refresh_mempool(resurrected);
        Ok(())
    }

    fn mark_invalid(&mut self, hash: BlockHash) {
        let mut stack = vec![hash];
        while let Some(next) = stack.pop() {
            if self.invalid.insert(next) {
                if let Some(children) = self.children.get(&next) {
                    stack.extend(children.iter().copied());
                }
            }
        }
    }

    /// Tips of every known branch, highest first.
    pub fn chain_tips(&self) -> Vec<ChainTip> {
        let tip = self.tip();
        let mut leaves: Vec<&Arc<Block>> = self
            .blocks
            .values()
            .filter(|block| {
                block.hash == tip
                    || self
                        .children
                        .get(&block.hash)
                        .map_or(true, Vec::is_empty)
            })
            .collect();
        leaves.sort_by_key(|block| (Reverse(block.height), block.hash));

        leaves
            .into_iter()
            .map(|leaf| {
                if leaf.hash == tip {
                    return ChainTip {
                        height: leaf.height,
                        hash: leaf.hash,
                        branch_len: 0,
                        status: TipStatus::Active,
                    };
                }
                let mut invalid = false;
                let mut validated = true;
                let mut cursor = Some(leaf.clone());
                let mut fork_height = 0;
                while let Some(block) = cursor {
                    if self.on_active(&block) {
                        fork_height = block.height;
                        break;
                    }
                    invalid |= self.invalid.contains(&block.hash);
                    validated &= self.validated.contains(&block.hash);
                    cursor = self.blocks.get(&block.parent).cloned();
                }
                let status = if invalid {
                    TipStatus::Invalid
                } else if validated {
                    TipStatus::ValidFork
                } else {
                    TipStatus::ValidHeaders
                };
                ChainTip {
                    height: leaf.height,
                    hash: leaf.hash,
                    branch_len: leaf.height.saturating_sub(fork_height),
                    status,
                }
            })
            .collect()
    }

    // ── Pending pool ────────────────────────────────────────────────────────

    pub fn mempool(&self) -> impl Iterator<Item = &(TxId, SimTransaction)> {
        self.mempool.iter()
    }

    pub fn mempool_txids(&self) -> Vec<TxId> {
        self.mempool.iter().map(|(txid, _)| *txid).collect()
    }

    pub fn in_mempool(&self, txid: &TxId) -> bool {
        self.mempool.iter().any(|(id, _)| id == txid)
    }

    pub fn is_confirmed(&self, txid: &TxId) -> bool {
        self.state.location(txid).is_some()
    }

    fn pool_view(&self) -> PoolView {
        let mut view = PoolView::default();
        for (_, tx) in &self.mempool {
            view.spent.extend(tx.inputs.iter().copied());
            view.created_sidechains
                .extend(tx.sc_creations.iter().map(|c| c.scid));
        }
        view
    }

    /// Admit `tx` to the pending pool. Re-submitting a pending transaction
    /// is a no-op.
    pub fn accept_transaction(&mut self, tx: SimTransaction) -> Result<TxId> {
        let txid = tx.txid();
        if self.in_mempool(&txid) {
            return Ok(txid);
        }
        if self.is_confirmed(&txid) {
            return Err(SimError::rejected(
                RejectReason::Other,
                "transaction already in block chain",
            ));
        }
        self.state.check_transaction(&tx, &self.pool_view())?;
        debug!("{}: accepted {txid} to pool", self.id);
        self.mempool.push((txid, tx));
        Ok(txid)
    }

    /// Rebuild the pool on the current tip from `resurrected` followed by
    /// what was pending before. Anything no longer valid is dropped.
    fn refresh_mempool(&mut self, resurrected: Vec<SimTransaction>) {
        let previous = std::mem::take(&mut self.mempool);
        for tx in resurrected
            .into_iter()
            .chain(previous.into_iter().map(|(_, tx)| tx))
        {
            let txid = tx.txid();
            if self.is_confirmed(&txid) {
                continue;
            }
            if let Err(e) = self.accept_transaction(tx) {
                debug!("{}: dropped {txid} from pool: {e}", self.id);
            }
        }
    }

    // ── Sidechains ──────────────────────────────────────────────────────────

    pub fn sidechain_info(&self, scid: &ScId) -> Result<SidechainInfo> {
        self.state.sidechain_info(scid).ok_or_else(|| {
            SimError::rejected(RejectReason::ScidNotYetCreated, SCID_NOT_YET_CREATED)
        })
    }

    pub fn sidechains(&self) -> Vec<SidechainInfo> {
        self.state.sidechains()
    }

    // ── Wallet ──────────────────────────────────────────────────────────────

    pub fn new_address(&mut self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(ADDRESS_DOMAIN);
        hasher.update((self.id.0 as u64).to_le_bytes());
        hasher.update(self.next_address.to_le_bytes());
        let digest = hasher.finalize();
        let address = hex::encode(&digest[..20]);
        self.next_address = self.next_address.saturating_add(1);
        self.addresses.insert(address.clone());
        address
    }

    pub fn owns(&self, address: &str) -> bool {
        self.addresses.contains(address)
    }

    /// Confirmed, mature, owned outputs not spent by a pending transaction,
    /// largest first.
    fn spendable(&self) -> Vec<(OutPoint, Utxo)> {
        let pending = self.pool_view().spent;
        let next_height = self.height().saturating_add(1);
        let mut coins: Vec<(OutPoint, Utxo)> = self
            .state
            .utxos()
            .filter(|(outpoint, utxo)| {
                self.owns(&utxo.address)
                    && !pending.contains(outpoint)
                    && (!utxo.coinbase
                        || next_height.saturating_sub(utxo.height) >= self.config.coinbase_maturity)
            })
            .map(|(outpoint, utxo)| (*outpoint, utxo.clone()))
            .collect();
        coins.sort_by(|(a_op, a), (b_op, b)| b.value.cmp(&a.value).then(a_op.cmp(b_op)));
        coins
    }

    pub fn balance(&self) -> Amount {
        self.spendable()
            .iter()
            .fold(0u64, |acc, (_, utxo)| acc.saturating_add(utxo.value))
    }

    fn involves(&self, txid: &TxId, tx: &SimTransaction) -> bool {
        self.sent.contains(txid) || tx.outputs.iter().any(|out| self.owns(&out.address))
    }

    pub fn wallet_transaction(&self, txid: &TxId) -> Result<WalletTransaction> {
        let not_found = || {
            SimError::rejected(
                RejectReason::NotFound,
                "Invalid or non-wallet transaction id",
            )
        };
        let (tx, confirmations, block_hash) =
            if let Some((_, tx)) = self.mempool.iter().find(|(id, _)| id == txid) {
                (tx, 0, None)
            } else {
                let location = self.state.location(txid).ok_or_else(not_found)?;
                let block = self.block(&location.block)?;
                let tx = block.txs.get(location.index).ok_or_else(not_found)?;
                let confirmations = self
                    .height()
                    .saturating_sub(location.height)
                    .saturating_add(1);
                (tx, confirmations, Some(location.block))
            };
        if !self.involves(txid, tx) {
            return Err(not_found());
        }
        Ok(WalletTransaction {
            txid: *txid,
            hex: tx.encode()?,
            confirmations,
            block_hash,
        })
    }

    pub fn decode(&self, hex: &str) -> Result<DecodedTransaction> {
        Ok(SimTransaction::decode(hex)?.to_decoded())
    }

    pub fn create_raw(
        &self,
        inputs: &[OutPoint],
        outputs: &[Payment],
        sc_creations: &[SidechainCreation],
        forward_transfers: &[ForwardTransfer],
    ) -> Result<String> {
        if inputs.is_empty() {
            return Err(SimError::rejected(
                RejectReason::InvalidParameter,
                "Invalid parameter, no inputs",
            ));
        }
        let tx = SimTransaction::unsigned(
            inputs.to_vec(),
            outputs
                .iter()
                .map(|p| SimOutput {
                    address: p.address.clone(),
                    value: p.amount,
                })
                .collect(),
            sc_creations.to_vec(),
            forward_transfers.to_vec(),
        );
        tx.encode()
    }

    /// Attach a witness to every input this wallet can sign for.
    pub fn sign(&self, hex: &str) -> Result<SignedTransaction> {
        let mut tx = SimTransaction::decode(hex)?;
        let mut complete = true;
        tx.witnesses = tx
            .inputs
            .iter()
            .map(|input| match self.state.utxo(input) {
                Some(utxo) if self.owns(&utxo.address) => witness_for(&utxo.address, input),
                _ => {
                    complete = false;
                    Hash::default()
                }
            })
            .collect();
        Ok(SignedTransaction {
            hex: tx.encode()?,
            complete,
        })
    }

    /// Admit a transaction received from the control interface.
    pub fn submit_raw(&mut self, hex: &str) -> Result<TxId> {
        let tx = SimTransaction::decode(hex)?;
        let ours = tx.inputs.iter().any(|input| {
            self.state
                .utxo(input)
                .is_some_and(|utxo| self.owns(&utxo.address))
        });
        let txid = self.accept_transaction(tx)?;
        if ours {
            self.sent.insert(txid);
        }
        Ok(txid)
    }

    /// Fund, sign and submit a transaction paying `outputs` and
    /// `forward_transfers` from this wallet, returning change to a fresh
    /// address.
    pub fn fund_and_send(
        &mut self,
        mut outputs: Vec<SimOutput>,
        forward_transfers: Vec<ForwardTransfer>,
    ) -> Result<TxId> {
        if outputs.iter().any(|out| out.value == 0)
            || forward_transfers.iter().any(|ft| ft.amount == 0)
        {
            return Err(SimError::rejected(
                RejectReason::InvalidParameter,
                "Invalid amount",
            ));
        }
        let payable =
            SimTransaction::unsigned(vec![], outputs.clone(), vec![], forward_transfers.clone());
        let target = payable.output_total().saturating_add(self.config.relay_fee);

        let mut inputs = Vec::new();
        let mut gathered: Amount = 0;
        for (outpoint, utxo) in self.spendable() {
            if gathered >= target {
                break;
            }
            gathered = gathered.saturating_add(utxo.value);
            inputs.push((outpoint, utxo.address));
        }
        if gathered < target {
            return Err(SimError::rejected(
                RejectReason::InsufficientFunds,
                "Insufficient funds",
            ));
        }
        let change = gathered.saturating_sub(target);
        if change > 0 {
            let address = self.new_address();
            outputs.push(SimOutput {
                address,
                value: change,
            });
        }

        let mut tx = SimTransaction::unsigned(
            inputs.iter().map(|(outpoint, _)| *outpoint).collect(),
            outputs,
            vec![],
            forward_transfers,
        );
        tx.witnesses = inputs
            .iter()
            .map(|(outpoint, address)| witness_for(address, outpoint))
            .collect();
        let txid = self.accept_transaction(tx)?;
        self.sent.insert(txid);
        Ok(txid)
    }

    pub fn send_to_sidechain(
        &mut self,
        address: &str,
        amount: Amount,
        scid: &ScId,
    ) -> Result<TxId> {
        if !self.state.has_sidechain(scid) {
            return Err(SimError::rejected(
                RejectReason::ScidNotYetCreated,
                SCID_NOT_YET_CREATED,
            ));
        }
        self.fund_and_send(
            vec![],
            vec![ForwardTransfer {
                scid: *scid,
                address: address.to_string(),
                amount,
            }],
        )
    }
}
