//! In-process cluster of simulated ledger nodes.
//!
//! Each [`SimNode`] implements [`scfork_harness::NodeControl`] over a small
//! UTXO ledger with sidechain registration and forward transfers, a block
//! tree with longest-chain fork choice, a pending pool and a wallet. Nodes
//! exchange blocks and pending transactions only over connections opened
//! through the control interface, so cutting connections partitions the
//! cluster and each side can grow its own branch.
//!
//! ```text
//!  SimCluster
//!    ├── SimNode (NodeControl) ─┐
//!    ├── SimNode (NodeControl) ─┼── Mutex<ClusterState>
//!    └── SimNode (NodeControl) ─┘     ├── NodeState × n  (block tree, ChainState, pool, wallet)
//!                                     └── connections    (handshake, relay)
//! ```

pub mod block;
pub mod cluster;
pub mod config;
pub mod error;
pub mod node;
pub mod state;
pub mod tx;

pub use {
    cluster::{SimCluster, SimNode, PROTOCOL_VERSION},
    config::SimConfig,
    error::{Result, SimError},
};
