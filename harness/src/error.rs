//! Error types for the fork-simulation harness.
//!
//! Every variant is fatal to the running scenario: there is no local
//! recovery, each one is either a setup bug or the protocol violation the
//! scenario exists to detect.

use {
    crate::{
        node::{Amount, CommandError, NodeId, TxId},
        scenario::ScenarioPhase,
        topology::PartitionState,
    },
    thiserror::Error,
};

/// Errors produced while driving a cluster.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// A node rejected or failed a control command.
    #[error("{node} rejected `{command}`: {source}")]
    NodeCommand {
        node: NodeId,
        command: &'static str,
        #[source]
        source: CommandError,
    },

    /// `split` / `join` (or a partition-scoped call) invoked out of sequence.
    #[error("invalid topology state for {operation}: network is {state}")]
    InvalidState {
        operation: &'static str,
        state: PartitionState,
    },

    /// A scenario step was invoked before the steps it depends on.
    #[error("scenario step {step} cannot run in phase {phase}")]
    OutOfOrder {
        step: &'static str,
        phase: ScenarioPhase,
    },

    /// A polled condition did not hold within the retry budget.
    #[error("timed out waiting for {what} after {attempts} attempts")]
    SyncTimeout { what: String, attempts: u32 },

    /// No output of the funding transaction carries exactly the wanted value.
    #[error("no output of {txid} on {node} with value exactly {value} units")]
    NoMatchingUtxo {
        node: NodeId,
        txid: TxId,
        value: Amount,
    },

    /// A post-condition of the scenario does not hold.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The registry has no node with this identity.
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    /// The node could not sign every input of a transaction it built.
    #[error("{node} produced an incomplete signature for a {what} transaction")]
    IncompleteSignature { node: NodeId, what: &'static str },

    /// The configuration is unusable.
    #[error("invalid harness configuration: {0}")]
    Config(String),
}

impl HarnessError {
    /// Wrap a node-level failure with the node and command it came from.
    pub fn command(node: NodeId, command: &'static str, source: CommandError) -> Self {
        Self::NodeCommand {
            node,
            command,
            source,
        }
    }

    /// Returns true for the scenario's pass/fail signal.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}

/// Convenience result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;
