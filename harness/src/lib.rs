//! Network-partition fork simulation harness.
//!
//! Drives a small cluster of independently operating ledger nodes through a
//! partition, lets each side grow its own chain, heals the network and
//! verifies that state which only existed on the losing fork is gone from
//! every node:
//!
//! - **Topology control**: links, partitions and healing with completion
//!   awaited on the nodes themselves ([`topology`]).
//! - **Chain driving**: per-node block production and convergence waits
//!   ([`chain`]).
//! - **Transaction building**: a sidechain creation and a conflicting plain
//!   spend of the same input ([`sidechain_tx`]).
//! - **Invariant checks**: sidechain absence and empty pending pools after
//!   the heal ([`invariants`]).
//! - **Scenario**: the end-to-end sequence ([`scenario`]).
//!
//! ## Architecture
//!
//! ```text
//!  ScenarioDriver
//!    ├── TopologyController ── split() / join()
//!    ├── ChainDriver ───────── generate / sync_*
//!    ├── SidechainTxBuilder ── T1 (creation) / T2 (plain spend)
//!    └── InvariantChecker ──── rollback post-conditions
//!              │
//!        NodeRegistry (NodeId -> dyn NodeControl)
//! ```
//!
//! The harness is a pure client: it issues commands through
//! [`node::NodeControl`] and observes results, never touching node-internal
//! state.

pub mod chain;
pub mod config;
pub mod error;
pub mod invariants;
pub mod node;
pub mod registry;
pub mod scenario;
pub mod sidechain_tx;
pub mod topology;
pub mod wait;

#[cfg(test)]
mod test_utils;

pub use {
    chain::ChainDriver,
    config::{HarnessConfig, ScenarioConfig, TopologyConfig},
    error::{HarnessError, Result},
    invariants::InvariantChecker,
    node::{NodeControl, NodeId},
    registry::NodeRegistry,
    scenario::{ScenarioDriver, ScenarioPhase, ScenarioReport},
    sidechain_tx::{PreparedTransaction, SidechainTxBuilder},
    topology::{PartitionPlan, PartitionState, TopologyController},
    wait::{wait_until, PollPolicy},
};
