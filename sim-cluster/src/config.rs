//! Parameters of the simulated cluster.

use {
    crate::error::{Result, SimError},
    scfork_harness::node::{Amount, COIN},
};

/// Consensus, wallet and network parameters shared by every simulated node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    pub node_count: usize,

    /// Node `i` listens on `127.0.0.1:(base_p2p_port + i)`.
    pub base_p2p_port: u16,

    /// Coinbase value of every block.
    pub block_subsidy: Amount,

    /// Confirmations before a coinbase output is spendable.
    pub coinbase_maturity: u64,

    /// Blocks before a forward transfer counts toward a sidechain balance.
    pub sc_coins_maturity: u64,

    /// Fee the wallet attaches to transactions it funds.
    pub relay_fee: Amount,

    /// `get_peer_info` polls, on either end, before a new connection
    /// completes its handshake.
    pub handshake_polls: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            node_count: 3,
            base_p2p_port: 11_000,
            block_subsidy: 12 * COIN + COIN / 2,
            coinbase_maturity: 100,
            sc_coins_maturity: 2,
            relay_fee: COIN / 10_000,
            handshake_polls: 2,
        }
    }
}

impl SimConfig {
    pub fn with_nodes(node_count: usize) -> Self {
        Self {
            node_count,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_count == 0 {
            return Err(SimError::InvalidConfig("a cluster needs at least one node".into()));
        }
        let last = u64::from(self.base_p2p_port).saturating_add(self.node_count as u64);
        if last > u64::from(u16::MAX) {
            return Err(SimError::InvalidConfig(format!(
                "{} nodes do not fit above port {}",
                self.node_count, self.base_p2p_port
            )));
        }
        if self.block_subsidy == 0 {
            return Err(SimError::InvalidConfig("block subsidy must be non-zero".into()));
        }
        Ok(())
    }
}
