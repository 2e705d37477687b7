use {
    crate::tx::{hash_bytes, SimTransaction},
    scfork_harness::node::{BlockHash, NodeId, TxId},
    sha2::{Digest, Sha256},
    solana_hash::Hash,
};

const GENESIS_SEED: &[u8] = b"scfork-genesis";

/// A block of the simulated chain. The coinbase is always `txs[0]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub hash: BlockHash,
    pub parent: BlockHash,
    pub height: u64,
    pub miner: NodeId,
    /// Cluster-wide counter so two miners never produce the same hash.
    pub nonce: u64,
    pub txs: Vec<SimTransaction>,
}

impl Block {
    /// The block every node starts from.
    pub fn genesis() -> Self {
        let hash = Hash::new_from_array(Sha256::digest(GENESIS_SEED).into());
        Self {
            hash,
            parent: Hash::default(),
            height: 0,
            miner: NodeId(0),
            nonce: 0,
            txs: Vec::new(),
        }
    }

    pub fn new(parent: &Block, miner: NodeId, nonce: u64, txs: Vec<SimTransaction>) -> Self {
        let height = parent.height.saturating_add(1);
        let mut hasher = Sha256::new();
        hasher.update(hash_bytes(&parent.hash));
        hasher.update(height.to_le_bytes());
        hasher.update((miner.0 as u64).to_le_bytes());
        hasher.update(nonce.to_le_bytes());
        for tx in &txs {
            hasher.update(hash_bytes(&tx.txid()));
        }
        Self {
            hash: Hash::new_from_array(hasher.finalize().into()),
            parent: parent.hash,
            height,
            miner,
            nonce,
            txs,
        }
    }

    pub fn txids(&self) -> Vec<TxId> {
        self.txs.iter().map(SimTransaction::txid).collect()
    }

    pub fn position(&self, txid: &TxId) -> Option<usize> {
        self.txs.iter().position(|tx| tx.txid() == *txid)
    }
}
