use std::fmt;

use crate::core::state::ChainStateError;
use crate::core::types::Hash256;

// Node RPC error codes, as reported alongside the message.
// See: https://github.com/bitcoin/bitcoin/blob/master/src/rpc/protocol.h
pub mod codes {
    /// Invalid, missing or duplicate parameter
    pub const RPC_INVALID_PARAMETER: i32 = -8;
    /// Database error
    pub const RPC_DATABASE_ERROR: i32 = -20;
}

/// Which end of the requested interval was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeBound {
    Start,
    End,
}

impl fmt::Display for RangeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeBound::Start => write!(f, "Start"),
            RangeBound::End => write!(f, "End"),
        }
    }
}

/// Consistency failures found while reconstructing fees. These point at the
/// chain state, not at the request.
#[derive(Debug, thiserror::Error)]
pub enum ConsistencyError {
    #[error(transparent)]
    ChainState(#[from] ChainStateError),
    #[error("transaction {} in block {height} spends less than it creates", hex::encode(.txid))]
    NegativeFee { height: u64, txid: Hash256 },
    #[error("value overflow in transaction {} in block {height}", hex::encode(.txid))]
    Overflow { height: u64, txid: Hash256 },
    #[error("fee totals overflow in block {0}")]
    TotalsOverflow(u64),
    #[error("block at height {0} has no coinbase")]
    MissingCoinbase(u64),
}

#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("{0} block height out of range")]
    Range(RangeBound),
    #[error("Invalid plot value {0}")]
    InvalidField(String),
    #[error("Invalid parameter: {0}")]
    InvalidRequest(String),
    #[error("chain state inconsistent: {0}")]
    Consistency(#[from] ConsistencyError),
}

impl StatsError {
    /// Stable machine code reported with the message
    pub fn code(&self) -> i32 {
        match self {
            StatsError::Range(_) | StatsError::InvalidField(_) | StatsError::InvalidRequest(_) => {
                codes::RPC_INVALID_PARAMETER
            }
            StatsError::Consistency(_) => codes::RPC_DATABASE_ERROR,
        }
    }

    /// True for errors caused by caller-supplied parameters
    pub fn is_user_error(&self) -> bool {
        !matches!(self, StatsError::Consistency(_))
    }
}

impl From<ChainStateError> for StatsError {
    fn from(e: ChainStateError) -> Self {
        StatsError::Consistency(ConsistencyError::ChainState(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_error_messages() {
        assert_eq!(StatsError::Range(RangeBound::Start).to_string(), "Start block height out of range");
        assert_eq!(StatsError::Range(RangeBound::End).to_string(), "End block height out of range");
        assert_eq!(StatsError::InvalidField("asdfghjkl".into()).to_string(), "Invalid plot value asdfghjkl");
    }

    #[test]
    fn test_codes() {
        assert_eq!(StatsError::Range(RangeBound::End).code(), -8);
        assert_eq!(StatsError::InvalidField("x".into()).code(), -8);
        let fatal: StatsError = ChainStateError::MissingBlock(3).into();
        assert_eq!(fatal.code(), -20);
        assert!(!fatal.is_user_error());
        assert!(fatal.to_string().starts_with("chain state inconsistent"));
    }
}
