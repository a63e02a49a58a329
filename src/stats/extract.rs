use crate::core::state::ChainState;
use crate::core::types::{Block, Transaction};

use super::error::ConsistencyError;

/// Fee figures for one non-coinbase transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerTxMetrics {
    pub fee: u64,
    /// `fee / vsize`, rounded down
    pub feerate: u64,
    pub vsize: u64,
}

impl PerTxMetrics {
    pub fn new(fee: u64, vsize: u64) -> Self {
        PerTxMetrics { fee, feerate: fee / vsize, vsize }
    }
}

/// Structural counts over every transaction of a block, coinbase included
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawCounts {
    pub txs: u64,
    pub ins: u64,
    pub outs: u64,
}

/// Everything the aggregator needs from one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockFees {
    /// One entry per non-coinbase transaction, in block order
    pub metrics: Vec<PerTxMetrics>,
    pub counts: RawCounts,
}

/// Reconstruct every transaction's fee in `block` from spent-output values.
///
/// The coinbase is counted in `txs`, `ins` and `outs` but yields no metrics
/// entry. A spent output that cannot be resolved fails the whole block.
pub fn extract<S: ChainState + ?Sized>(block: &Block, state: &S) -> Result<BlockFees, ConsistencyError> {
    let height = block.header.height;
    match block.transactions.first() {
        Some(tx) if tx.is_coinbase() => {}
        _ => return Err(ConsistencyError::MissingCoinbase(height)),
    }

    let mut counts = RawCounts::default();
    for tx in &block.transactions {
        counts.txs += 1;
        counts.ins += tx.inputs.len() as u64;
        counts.outs += tx.outputs.len() as u64;
    }

    let metrics = block.transactions[1..]
        .iter()
        .map(|tx| transaction_fee(tx, height, state).map(|fee| PerTxMetrics::new(fee, tx.vsize())))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(BlockFees { metrics, counts })
}

fn transaction_fee<S: ChainState + ?Sized>(
    tx: &Transaction,
    height: u64,
    state: &S,
) -> Result<u64, ConsistencyError> {
    let mut input_sum: u64 = 0;
    for input in &tx.inputs {
        let value = state.resolve_spent_output_value(&input.previous_output)?;
        input_sum = input_sum
            .checked_add(value)
            .ok_or_else(|| ConsistencyError::Overflow { height, txid: tx.hash() })?;
    }

    let output_sum = tx
        .total_output()
        .ok_or_else(|| ConsistencyError::Overflow { height, txid: tx.hash() })?;

    input_sum
        .checked_sub(output_sum)
        .ok_or_else(|| ConsistencyError::NegativeFee { height, txid: tx.hash() })
}
