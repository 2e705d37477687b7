//! Transactions as the simulated nodes store, relay and encode them.
//!
//! The wire form is `hex(bincode(tx))`. A txid commits to every field,
//! witnesses included, so signing changes the id.

use {
    crate::error::Result,
    scfork_harness::node::{
        Amount, DecodedTransaction, ForwardTransfer, OutPoint, SidechainCreation, TxId, TxOutput,
    },
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
    solana_hash::Hash,
};

const WITNESS_DOMAIN: &[u8] = b"scfork-witness";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimOutput {
    pub address: String,
    pub value: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimTransaction {
    pub inputs: Vec<OutPoint>,
    pub outputs: Vec<SimOutput>,
    pub sc_creations: Vec<SidechainCreation>,
    pub forward_transfers: Vec<ForwardTransfer>,
    /// Set on coinbase transactions only: the height of their block.
    pub coinbase_height: Option<u64>,
    /// One per input once signed, empty before.
    pub witnesses: Vec<Hash>,
}

impl SimTransaction {
    pub fn unsigned(
        inputs: Vec<OutPoint>,
        outputs: Vec<SimOutput>,
        sc_creations: Vec<SidechainCreation>,
        forward_transfers: Vec<ForwardTransfer>,
    ) -> Self {
        Self {
            inputs,
            outputs,
            sc_creations,
            forward_transfers,
            coinbase_height: None,
            witnesses: Vec::new(),
        }
    }

    pub fn coinbase(height: u64, address: String, value: Amount) -> Self {
        Self {
            inputs: Vec::new(),
            outputs: vec![SimOutput { address, value }],
            sc_creations: Vec::new(),
            forward_transfers: Vec::new(),
            coinbase_height: Some(height),
            witnesses: Vec::new(),
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.coinbase_height.is_some()
    }

    pub fn txid(&self) -> TxId {
        let mut hasher = Sha256::new();
        hasher.update((self.inputs.len() as u64).to_le_bytes());
        for input in &self.inputs {
            hasher.update(hash_bytes(&input.txid));
            hasher.update(input.vout.to_le_bytes());
        }
        hasher.update((self.outputs.len() as u64).to_le_bytes());
        for output in &self.outputs {
            update_str(&mut hasher, &output.address);
            hasher.update(output.value.to_le_bytes());
        }
        hasher.update((self.sc_creations.len() as u64).to_le_bytes());
        for creation in &self.sc_creations {
            hasher.update(creation.scid.as_bytes());
            hasher.update(creation.epoch_length.to_le_bytes());
        }
        hasher.update((self.forward_transfers.len() as u64).to_le_bytes());
        for transfer in &self.forward_transfers {
            hasher.update(transfer.scid.as_bytes());
            update_str(&mut hasher, &transfer.address);
            hasher.update(transfer.amount.to_le_bytes());
        }
        match self.coinbase_height {
            Some(height) => {
                hasher.update([1u8]);
                hasher.update(height.to_le_bytes());
            }
            None => hasher.update([0u8]),
        }
        for witness in &self.witnesses {
            hasher.update(hash_bytes(witness));
        }
        Hash::new_from_array(hasher.finalize().into())
    }

    /// Value leaving through outputs and forward transfers.
    pub fn output_total(&self) -> Amount {
        let paid = self
            .outputs
            .iter()
            .fold(0u64, |acc, out| acc.saturating_add(out.value));
        self.forward_transfers
            .iter()
            .fold(paid, |acc, ft| acc.saturating_add(ft.amount))
    }

    pub fn encode(&self) -> Result<String> {
        Ok(hex::encode(bincode::serialize(self)?))
    }

    pub fn decode(payload: &str) -> Result<Self> {
        let bytes = hex::decode(payload)?;
        Ok(bincode::deserialize(&bytes)?)
    }

    pub fn to_decoded(&self) -> DecodedTransaction {
        DecodedTransaction {
            txid: self.txid(),
            coinbase: self.is_coinbase(),
            inputs: self.inputs.clone(),
            outputs: self
                .outputs
                .iter()
                .enumerate()
                .map(|(n, out)| TxOutput {
                    n: n as u32,
                    value: out.value,
                    address: out.address.clone(),
                })
                .collect(),
            sc_creations: self.sc_creations.clone(),
            forward_transfers: self.forward_transfers.clone(),
        }
    }
}

/// The witness that authorizes spending `outpoint`, locked to `address`.
pub fn witness_for(address: &str, outpoint: &OutPoint) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(WITNESS_DOMAIN);
    update_str(&mut hasher, address);
    hasher.update(hash_bytes(&outpoint.txid));
    hasher.update(outpoint.vout.to_le_bytes());
    Hash::new_from_array(hasher.finalize().into())
}

pub(crate) fn hash_bytes(hash: &Hash) -> &[u8] {
    hash.as_ref()
}

fn update_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}
