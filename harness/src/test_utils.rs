//! Scripted [`NodeControl`] double for unit tests.

use {
    crate::node::{
        Amount, BlockHash, ChainTip, CommandError, CommandResult, DecodedTransaction,
        ForwardTransfer, NodeControl, NodeId, OutPoint, Payment, PeerInfo, RejectReason, ScId,
        SidechainCreation, SidechainInfo, SignedTransaction, TipStatus, TxId, WalletTransaction,
    },
    solana_hash::Hash,
    std::{
        collections::HashMap,
        net::SocketAddr,
        sync::{Arc, Mutex, MutexGuard},
    },
};

pub fn mock_hash(n: u64) -> Hash {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&n.to_le_bytes());
    Hash::new_from_array(bytes)
}

/// What a [`MockNode`] answers.
#[derive(Debug)]
pub struct MockState {
    /// Every command received, in order.
    pub commands: Vec<String>,
    pub peers: Vec<PeerInfo>,
    /// `get_peer_info` polls a new peer stays at version 0.
    pub handshake_polls: u32,
    pending_handshakes: HashMap<u64, u32>,
    next_peer_id: u64,
    next_hash: u64,
    pub block_hashes: Vec<BlockHash>,
    pub mempool: Vec<TxId>,
    /// Scripted answer for `get_sidechain_info`; `None` means not created.
    pub sidechain: Option<SidechainInfo>,
    /// Scripted failure replacing the default "not created" answer.
    pub sidechain_error: Option<CommandError>,
    pub chain_tips: Vec<ChainTip>,
    /// Raw hex → decoded transaction.
    pub raw: HashMap<String, DecodedTransaction>,
    pub sign_complete: bool,
    pub reject_generate: Option<CommandError>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            commands: Vec::new(),
            peers: Vec::new(),
            handshake_polls: 0,
            pending_handshakes: HashMap::new(),
            next_peer_id: 1,
            next_hash: 1,
            block_hashes: vec![mock_hash(0)],
            mempool: Vec::new(),
            sidechain: None,
            sidechain_error: None,
            chain_tips: Vec::new(),
            raw: HashMap::new(),
            sign_complete: true,
            reject_generate: None,
        }
    }
}

impl MockState {
    fn fresh_hash(&mut self) -> Hash {
        // Offset keeps block and transaction hashes apart from the genesis.
        let hash = mock_hash(self.next_hash.saturating_add(1_000));
        self.next_hash = self.next_hash.saturating_add(1);
        hash
    }

    pub fn tip(&self) -> BlockHash {
        self.block_hashes.last().copied().unwrap_or_default()
    }
}

pub struct MockNode {
    id: NodeId,
    state: Mutex<MockState>,
}

impl MockNode {
    pub fn new(index: usize) -> Self {
        Self {
            id: NodeId(index),
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn handle(index: usize) -> Arc<dyn NodeControl> {
        Arc::new(Self::new(index))
    }

    pub fn addr_for(index: usize) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 11_000u16.saturating_add(index as u16)))
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    /// Make this node's best block the same as `other`'s.
    pub fn copy_chain_from(&self, other: &MockNode) {
        let hashes = other.state().block_hashes.clone();
        self.state().block_hashes = hashes;
    }

    fn record(&self, command: impl Into<String>) -> MutexGuard<'_, MockState> {
        let mut state = self.state();
        state.commands.push(command.into());
        state
    }
}

fn unscripted<T>(command: &str) -> CommandResult<T> {
    Err(CommandError::new(
        RejectReason::Unavailable,
        format!("{command} is not scripted"),
    ))
}

impl NodeControl for MockNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn p2p_addr(&self) -> SocketAddr {
        Self::addr_for(self.id.0)
    }

    fn generate(&self, count: u32) -> CommandResult<Vec<BlockHash>> {
        let mut state = self.record(format!("generate {count}"));
        if let Some(err) = state.reject_generate.clone() {
            return Err(err);
        }
        let mut hashes = Vec::new();
        for _ in 0..count {
            let hash = state.fresh_hash();
            state.block_hashes.push(hash);
            hashes.push(hash);
        }
        Ok(hashes)
    }

    fn get_block_hash(&self, height: u64) -> CommandResult<BlockHash> {
        let state = self.record(format!("getblockhash {height}"));
        state
            .block_hashes
            .get(height as usize)
            .copied()
            .ok_or_else(|| {
                CommandError::new(RejectReason::InvalidParameter, "Block height out of range")
            })
    }

    fn get_block_count(&self) -> CommandResult<u64> {
        let state = self.record("getblockcount");
        Ok(state.block_hashes.len().saturating_sub(1) as u64)
    }

    fn get_best_block_hash(&self) -> CommandResult<BlockHash> {
        Ok(self.record("getbestblockhash").tip())
    }

    fn get_new_address(&self) -> CommandResult<String> {
        let mut state = self.record("getnewaddress");
        let n = state.next_hash;
        state.next_hash = n.saturating_add(1);
        Ok(format!("addr-{}-{n}", self.id.0))
    }

    fn send_to_address(&self, address: &str, amount: Amount) -> CommandResult<TxId> {
        let mut state = self.record(format!("sendtoaddress {address} {amount}"));
        let txid = state.fresh_hash();
        state.mempool.push(txid);
        Ok(txid)
    }

    fn get_transaction(&self, txid: &TxId) -> CommandResult<WalletTransaction> {
        let state = self.record(format!("gettransaction {txid}"));
        let hex = format!("raw-{txid}");
        if !state.raw.contains_key(&hex) {
            return Err(CommandError::new(
                RejectReason::NotFound,
                "Invalid or non-wallet transaction id",
            ));
        }
        Ok(WalletTransaction {
            txid: *txid,
            hex,
            confirmations: 1,
            block_hash: Some(state.tip()),
        })
    }

    fn decode_raw_transaction(&self, hex: &str) -> CommandResult<DecodedTransaction> {
        let state = self.record("decoderawtransaction");
        state
            .raw
            .get(hex)
            .cloned()
            .ok_or_else(|| CommandError::new(RejectReason::InvalidParameter, "TX decode failed"))
    }

    fn create_raw_transaction(
        &self,
        inputs: &[OutPoint],
        outputs: &[Payment],
        sc_creations: &[SidechainCreation],
        forward_transfers: &[ForwardTransfer],
    ) -> CommandResult<String> {
        let mut state = self.record("createrawtransaction");
        let txid = state.fresh_hash();
        let hex = format!("unsigned-{txid}");
        let decoded = DecodedTransaction {
            txid,
            coinbase: false,
            inputs: inputs.to_vec(),
            outputs: outputs
                .iter()
                .enumerate()
                .map(|(n, p)| crate::node::TxOutput {
                    n: n as u32,
                    value: p.amount,
                    address: p.address.clone(),
                })
                .collect(),
            sc_creations: sc_creations.to_vec(),
            forward_transfers: forward_transfers.to_vec(),
        };
        state.raw.insert(hex.clone(), decoded);
        Ok(hex)
    }

    fn sign_raw_transaction(&self, hex: &str) -> CommandResult<SignedTransaction> {
        let mut state = self.record("signrawtransaction");
        let decoded = state
            .raw
            .get(hex)
            .cloned()
            .ok_or_else(|| CommandError::new(RejectReason::InvalidParameter, "TX decode failed"))?;
        let signed = format!("signed-{}", decoded.txid);
        state.raw.insert(signed.clone(), decoded);
        Ok(SignedTransaction {
            hex: signed,
            complete: state.sign_complete,
        })
    }

    fn send_raw_transaction(&self, hex: &str) -> CommandResult<TxId> {
        let mut state = self.record("sendrawtransaction");
        let txid = state
            .raw
            .get(hex)
            .map(|tx| tx.txid)
            .ok_or_else(|| CommandError::new(RejectReason::InvalidParameter, "TX decode failed"))?;
        state.mempool.push(txid);
        Ok(txid)
    }

    fn send_to_sidechain(
        &self,
        _address: &str,
        _amount: Amount,
        _scid: &ScId,
    ) -> CommandResult<TxId> {
        unscripted("sc_send")
    }

    fn get_sidechain_info(&self, scid: &ScId) -> CommandResult<SidechainInfo> {
        let state = self.record(format!("getscinfo {scid}"));
        if let Some(err) = state.sidechain_error.clone() {
            return Err(err);
        }
        match &state.sidechain {
            Some(info) if info.scid == *scid => Ok(info.clone()),
            _ => Err(CommandError::new(
                RejectReason::ScidNotYetCreated,
                "scid not yet created",
            )),
        }
    }

    fn list_sidechains(&self) -> CommandResult<Vec<SidechainInfo>> {
        let state = self.record("getscinfo");
        Ok(state.sidechain.iter().cloned().collect())
    }

    fn get_chain_tips(&self) -> CommandResult<Vec<ChainTip>> {
        let state = self.record("getchaintips");
        if state.chain_tips.is_empty() {
            return Ok(vec![ChainTip {
                height: state.block_hashes.len().saturating_sub(1) as u64,
                hash: state.tip(),
                branch_len: 0,
                status: TipStatus::Active,
            }]);
        }
        Ok(state.chain_tips.clone())
    }

    fn get_raw_mempool(&self) -> CommandResult<Vec<TxId>> {
        Ok(self.record("getrawmempool").mempool.clone())
    }

    fn connect_peer(&self, addr: SocketAddr) -> CommandResult<()> {
        let mut state = self.record(format!("addnode {addr}"));
        if state.peers.iter().any(|p| !p.inbound && p.addr == addr) {
            return Ok(());
        }
        let id = state.next_peer_id;
        state.next_peer_id = id.saturating_add(1);
        let polls = state.handshake_polls;
        let version = if polls == 0 { 170_002 } else { 0 };
        if polls > 0 {
            state.pending_handshakes.insert(id, polls);
        }
        state.peers.push(PeerInfo {
            id,
            addr,
            inbound: false,
            version,
        });
        Ok(())
    }

    fn disconnect_peer(&self, addr: SocketAddr) -> CommandResult<()> {
        let mut state = self.record(format!("disconnectnode {addr}"));
        let before = state.peers.len();
        state.peers.retain(|p| p.inbound || p.addr != addr);
        if state.peers.len() == before {
            return Err(CommandError::new(
                RejectReason::NotFound,
                "Node not found in connected nodes",
            ));
        }
        Ok(())
    }

    fn get_peer_info(&self) -> CommandResult<Vec<PeerInfo>> {
        let mut state = self.record("getpeerinfo");
        let snapshot = state.peers.clone();
        // Handshakes progress between polls.
        let mut completed = Vec::new();
        for (id, remaining) in state.pending_handshakes.iter_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                completed.push(*id);
            }
        }
        for id in completed {
            state.pending_handshakes.remove(&id);
            if let Some(peer) = state.peers.iter_mut().find(|p| p.id == id) {
                peer.version = 170_002;
            }
        }
        Ok(snapshot)
    }

    fn debug_log(&self, message: &str) -> CommandResult<()> {
        self.record(format!("dbg_log {message}"));
        Ok(())
    }
}
