//! Construction of the two mutually exclusive transactions that force the
//! fork: a sidechain creation and a plain spend of the same input.
//!
//! The builder only assembles outputs; signing and every validity rule stay
//! with the node that owns the input.

use {
    crate::{
        error::{HarnessError, Result},
        node::{
            Amount, DecodedTransaction, ForwardTransfer, NodeId, OutPoint, Payment, ScId,
            SidechainCreation, TxId, TxKind,
        },
        registry::NodeRegistry,
    },
    log::{debug, info},
    serde::{Deserialize, Serialize},
    std::sync::Arc,
};

/// A signed transaction ready to broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedTransaction {
    pub txid: TxId,
    pub kind: TxKind,
    pub inputs: Vec<OutPoint>,
    /// Unsigned payload as built.
    pub raw: String,
    pub signed: String,
}

impl PreparedTransaction {
    /// Whether the two transactions spend at least one common input. Two
    /// such transactions can never both confirm on one chain.
    pub fn conflicts_with(&self, other: &PreparedTransaction) -> bool {
        self.inputs.iter().any(|input| other.inputs.contains(input))
    }
}

pub fn conflicts(a: &PreparedTransaction, b: &PreparedTransaction) -> bool {
    a.conflicts_with(b)
}

pub struct SidechainTxBuilder {
    registry: Arc<NodeRegistry>,
}

impl SidechainTxBuilder {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self { registry }
    }

    /// First output of wallet transaction `txid` whose value is exactly
    /// `exact_value`.
    pub fn select_utxo(&self, node: NodeId, txid: &TxId, exact_value: Amount) -> Result<OutPoint> {
        let decoded = self.decode_wallet_tx(node, txid)?;
        let output = decoded
            .outputs
            .iter()
            .find(|out| out.value == exact_value)
            .ok_or(HarnessError::NoMatchingUtxo {
                node,
                txid: *txid,
                value: exact_value,
            })?;
        debug!("{node}: selected {txid}:{} worth {exact_value}", output.n);
        Ok(OutPoint {
            txid: *txid,
            vout: output.n,
        })
    }

    /// One input, a sidechain registration and a forward transfer of
    /// `amount` to `forward_address` on the new sidechain.
    pub fn build_sidechain_creation(
        &self,
        node: NodeId,
        input: OutPoint,
        scid: ScId,
        epoch_length: u32,
        amount: Amount,
        forward_address: &str,
    ) -> Result<PreparedTransaction> {
        let creation = SidechainCreation { scid, epoch_length };
        let transfer = ForwardTransfer {
            scid,
            address: forward_address.to_string(),
            amount,
        };
        let raw = self
            .registry
            .get(node)?
            .create_raw_transaction(&[input], &[], &[creation], &[transfer])
            .map_err(|e| HarnessError::command(node, "createrawtransaction", e))?;
        let tx = self.sign(node, raw, "sidechain creation")?;
        info!("{node}: built sidechain creation {} for scid {scid}", tx.txid);
        Ok(tx)
    }

    /// Spend `input` to a plain address.
    pub fn build_conflicting_spend(
        &self,
        node: NodeId,
        input: OutPoint,
        dest_address: &str,
        amount: Amount,
    ) -> Result<PreparedTransaction> {
        let payment = Payment {
            address: dest_address.to_string(),
            amount,
        };
        let raw = self
            .registry
            .get(node)?
            .create_raw_transaction(&[input], &[payment], &[], &[])
            .map_err(|e| HarnessError::command(node, "createrawtransaction", e))?;
        let tx = self.sign(node, raw, "plain spend")?;
        info!("{node}: built plain spend {} to {dest_address}", tx.txid);
        Ok(tx)
    }

    pub fn broadcast(&self, node: NodeId, tx: &PreparedTransaction) -> Result<TxId> {
        let txid = self
            .registry
            .get(node)?
            .send_raw_transaction(&tx.signed)
            .map_err(|e| HarnessError::command(node, "sendrawtransaction", e))?;
        info!("{node}: broadcast {txid}");
        Ok(txid)
    }

    fn sign(&self, node: NodeId, raw: String, what: &'static str) -> Result<PreparedTransaction> {
        let handle = self.registry.get(node)?;
        let signed = handle
            .sign_raw_transaction(&raw)
            .map_err(|e| HarnessError::command(node, "signrawtransaction", e))?;
        if !signed.complete {
            return Err(HarnessError::IncompleteSignature { node, what });
        }
        let decoded = handle
            .decode_raw_transaction(&signed.hex)
            .map_err(|e| HarnessError::command(node, "decoderawtransaction", e))?;
        Ok(PreparedTransaction {
            txid: decoded.txid,
            kind: decoded.kind(),
            inputs: decoded.inputs,
            raw,
            signed: signed.hex,
        })
    }

    fn decode_wallet_tx(&self, node: NodeId, txid: &TxId) -> Result<DecodedTransaction> {
        let handle = self.registry.get(node)?;
        let wallet_tx = handle
            .get_transaction(txid)
            .map_err(|e| HarnessError::command(node, "gettransaction", e))?;
        handle
            .decode_raw_transaction(&wallet_tx.hex)
            .map_err(|e| HarnessError::command(node, "decoderawtransaction", e))
    }
}
