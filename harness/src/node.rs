//! The ledger node control seam.
//!
//! The harness never reaches into a node's internals: every observation and
//! every action goes through [`NodeControl`], one method per control command.
//! Implementations may talk to a real node process over RPC or, as the
//! `scfork-sim-cluster` crate does, to an in-process model.
//!
//! The value types in this module are the decoded shapes of the command
//! results the harness reasons about.

use {
    serde::{Deserialize, Serialize},
    solana_hash::Hash,
    std::{fmt, net::SocketAddr, str::FromStr},
    thiserror::Error,
};

/// Amounts are carried in base units (1 coin = [`COIN`] units).
pub type Amount = u64;

/// Base units per coin.
pub const COIN: Amount = 100_000_000;

/// Hash identifying a block.
pub type BlockHash = Hash;

/// Hash identifying a transaction.
pub type TxId = Hash;

/// Wording a node uses when asked about a sidechain that does not exist on
/// its active chain.
pub const SCID_NOT_YET_CREATED: &str = "scid not yet created";

/// Render an amount as a fixed-point coin value, e.g. `10.00000000`.
pub fn format_amount(amount: Amount) -> String {
    format!("{}.{:08}", amount / COIN, amount % COIN)
}

// ── Identities ──────────────────────────────────────────────────────────────

/// Stable identity of a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}

/// Errors parsing a sidechain id from its hex form.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScIdParseError {
    #[error("invalid scid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("scid must be 32 bytes, got {0}")]
    Length(usize),
}

/// Sidechain identifier: 32 bytes, written as 64 hex characters.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScId([u8; 32]);

impl ScId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for ScId {
    type Err = ScIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let array: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ScIdParseError::Length(bytes.len()))?;
        Ok(Self(array))
    }
}

impl TryFrom<String> for ScId {
    type Error = ScIdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ScId> for String {
    fn from(scid: ScId) -> Self {
        scid.to_string()
    }
}

impl fmt::Display for ScId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ScId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScId({self})")
    }
}

// ── Transactions ────────────────────────────────────────────────────────────

/// Reference to a transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: TxId,
    pub vout: u32,
}

/// A plain payment requested from `create_raw_transaction`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub address: String,
    pub amount: Amount,
}

/// A decoded transparent output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub n: u32,
    pub value: Amount,
    pub address: String,
}

/// Sidechain registration output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidechainCreation {
    pub scid: ScId,
    pub epoch_length: u32,
}

/// Forward transfer of funds from the main chain into a sidechain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardTransfer {
    pub scid: ScId,
    pub address: String,
    pub amount: Amount,
}

/// Semantic tag of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TxKind {
    Coinbase,
    PlainSpend,
    SidechainCreation,
    ForwardTransfer,
}

/// Structure of a transaction as reported by `decode_raw_transaction`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedTransaction {
    pub txid: TxId,
    pub coinbase: bool,
    pub inputs: Vec<OutPoint>,
    pub outputs: Vec<TxOutput>,
    pub sc_creations: Vec<SidechainCreation>,
    pub forward_transfers: Vec<ForwardTransfer>,
}

impl DecodedTransaction {
    pub fn kind(&self) -> TxKind {
        if self.coinbase {
            TxKind::Coinbase
        } else if !self.sc_creations.is_empty() {
            TxKind::SidechainCreation
        } else if !self.forward_transfers.is_empty() {
            TxKind::ForwardTransfer
        } else {
            TxKind::PlainSpend
        }
    }
}

/// A transaction the node's wallet knows about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub txid: TxId,
    pub hex: String,
    /// Zero while the transaction is only in the pending pool.
    pub confirmations: u64,
    pub block_hash: Option<BlockHash>,
}

/// Result of `sign_raw_transaction`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub hex: String,
    /// False when the node could not sign every input.
    pub complete: bool,
}

// ── Sidechains ──────────────────────────────────────────────────────────────

/// Funds sent to a sidechain that are not yet spendable there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImmatureAmount {
    pub maturity_height: u64,
    pub amount: Amount,
}

/// A node's authoritative view of one registered sidechain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidechainInfo {
    pub scid: ScId,
    pub epoch_length: u32,
    /// Matured balance.
    pub balance: Amount,
    pub creating_tx: TxId,
    pub created_in_block: BlockHash,
    pub created_at_height: u64,
    pub immature_amounts: Vec<ImmatureAmount>,
}

// ── Chain tips & peers ──────────────────────────────────────────────────────

/// Status of a chain tip as seen by one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TipStatus {
    /// The tip of the chain the node considers canonical.
    Active,
    /// A fully validated branch that lost fork choice.
    ValidFork,
    ValidHeaders,
    HeadersOnly,
    Invalid,
}

impl fmt::Display for TipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::ValidFork => "valid-fork",
            Self::ValidHeaders => "valid-headers",
            Self::HeadersOnly => "headers-only",
            Self::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// One entry of `get_chain_tips`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    pub height: u64,
    pub hash: BlockHash,
    /// Blocks between the tip and the active chain (0 for the active tip).
    pub branch_len: u64,
    pub status: TipStatus,
}

/// One entry of `get_peer_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: u64,
    pub addr: SocketAddr,
    pub inbound: bool,
    /// Protocol version announced by the peer; 0 until the handshake completes.
    pub version: u32,
}

impl PeerInfo {
    pub fn handshake_complete(&self) -> bool {
        self.version != 0
    }
}

// ── Command errors ──────────────────────────────────────────────────────────

/// Structured reason a node gives for rejecting a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    ScidNotYetCreated,
    ScidAlreadyExists,
    /// An input is already spent on the active chain or by a pending transaction.
    InputsSpent,
    MissingInputs,
    InsufficientFunds,
    InvalidParameter,
    NotFound,
    /// The node could not be reached or is shutting down.
    Unavailable,
    Other,
}

/// A node rejected or failed a control command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CommandError {
    pub reason: RejectReason,
    pub message: String,
}

impl CommandError {
    pub fn new(reason: RejectReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    /// True when the node reports the sidechain as absent. The structured
    /// reason is preferred; the message wording covers interfaces that only
    /// carry text.
    pub fn is_scid_not_yet_created(&self) -> bool {
        self.reason == RejectReason::ScidNotYetCreated
            || self.message.contains(SCID_NOT_YET_CREATED)
    }
}

/// Result of a single control command.
pub type CommandResult<T> = std::result::Result<T, CommandError>;

// ── Control interface ───────────────────────────────────────────────────────

/// Control interface of one ledger node.
///
/// Calls are synchronous request/response. The node itself acts on its own
/// schedule: relays, handshakes and reorgs may complete between two calls.
pub trait NodeControl: Send + Sync {
    fn id(&self) -> NodeId;

    /// Address other nodes use to open a p2p connection to this node.
    fn p2p_addr(&self) -> SocketAddr;

    /// Mine `count` blocks on the node's current view.
    fn generate(&self, count: u32) -> CommandResult<Vec<BlockHash>>;

    fn get_block_hash(&self, height: u64) -> CommandResult<BlockHash>;

    fn get_block_count(&self) -> CommandResult<u64>;

    fn get_best_block_hash(&self) -> CommandResult<BlockHash>;

    fn get_new_address(&self) -> CommandResult<String>;

    fn send_to_address(&self, address: &str, amount: Amount) -> CommandResult<TxId>;

    fn get_transaction(&self, txid: &TxId) -> CommandResult<WalletTransaction>;

    fn decode_raw_transaction(&self, hex: &str) -> CommandResult<DecodedTransaction>;

    fn create_raw_transaction(
        &self,
        inputs: &[OutPoint],
        outputs: &[Payment],
        sc_creations: &[SidechainCreation],
        forward_transfers: &[ForwardTransfer],
    ) -> CommandResult<String>;

    fn sign_raw_transaction(&self, hex: &str) -> CommandResult<SignedTransaction>;

    /// Broadcast a signed transaction. Fails when an input is already spent.
    fn send_raw_transaction(&self, hex: &str) -> CommandResult<TxId>;

    /// Wallet-funded forward transfer to an existing sidechain.
    fn send_to_sidechain(&self, address: &str, amount: Amount, scid: &ScId)
        -> CommandResult<TxId>;

    fn get_sidechain_info(&self, scid: &ScId) -> CommandResult<SidechainInfo>;

    fn list_sidechains(&self) -> CommandResult<Vec<SidechainInfo>>;

    fn get_chain_tips(&self) -> CommandResult<Vec<ChainTip>>;

    fn get_raw_mempool(&self) -> CommandResult<Vec<TxId>>;

    /// Open an outbound connection to `addr`.
    fn connect_peer(&self, addr: SocketAddr) -> CommandResult<()>;

    /// Drop the outbound connection to `addr`.
    fn disconnect_peer(&self, addr: SocketAddr) -> CommandResult<()>;

    fn get_peer_info(&self) -> CommandResult<Vec<PeerInfo>>;

    /// Write a marker line into the node's own log.
    fn debug_log(&self, _message: &str) -> CommandResult<()> {
        Ok(())
    }
}
