//! Error types for the in-process cluster.

use {
    scfork_harness::node::{CommandError, NodeId, RejectReason},
    thiserror::Error,
};

#[derive(Error, Debug)]
pub enum SimError {
    #[error("invalid cluster configuration: {0}")]
    InvalidConfig(String),

    #[error("TX decode failed: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("TX decode failed: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("cluster state lock poisoned")]
    LockPoisoned,

    /// A consensus, mempool or wallet rule refused the request.
    #[error(transparent)]
    Rejected(#[from] CommandError),
}

impl SimError {
    pub fn rejected(reason: RejectReason, message: impl Into<String>) -> Self {
        Self::Rejected(CommandError::new(reason, message))
    }
}

impl From<SimError> for CommandError {
    fn from(err: SimError) -> Self {
        match err {
            SimError::Rejected(e) => e,
            SimError::Encoding(_) | SimError::Hex(_) | SimError::InvalidConfig(_) => {
                CommandError::new(RejectReason::InvalidParameter, err.to_string())
            }
            SimError::UnknownNode(_) => CommandError::new(RejectReason::NotFound, err.to_string()),
            SimError::LockPoisoned => CommandError::new(RejectReason::Unavailable, err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
