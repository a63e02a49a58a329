//! Deterministic chain builder for local testing.
//!
//! Blocks go through [`Chain::add_block`] like any other block, so the result
//! is a fully validated chain with undo data and a spent-output index.

use std::collections::VecDeque;

use crate::core::chain::{BlockError, Chain};
use crate::core::params::block_reward;
use crate::core::types::*;

/// Seconds between consecutive scenario blocks
pub const BLOCK_SPACING: u64 = 600;

/// Height of the chain built by [`seed_standard_scenario`]
pub const STANDARD_SCENARIO_HEIGHT: u64 = 103;

const MINER_PUBKEY_HASH: Hash256 = [0x11; 32];
const FUND_PUBKEY_HASH: Hash256 = [0xCF; 32];
const RECIPIENT_PUBKEY_HASH: Hash256 = [0x22; 32];

/// Shape of one fee-paying transaction to generate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxSpec {
    /// Coinbase outputs to spend, oldest first
    pub inputs: usize,
    pub outputs: usize,
    pub fee: u64,
    /// Pad the witness so the transaction lands on exactly this vsize
    pub vsize: Option<u64>,
}

impl TxSpec {
    pub fn new(inputs: usize, outputs: usize, fee: u64) -> Self {
        TxSpec { inputs, outputs, fee, vsize: None }
    }

    pub fn with_vsize(self, vsize: u64) -> Self {
        TxSpec { vsize: Some(vsize), ..self }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegtestError {
    #[error("block rejected: {0}")]
    Block(#[from] BlockError),
    #[error("need {needed} spendable outputs, have {available}")]
    NotEnoughCoins { needed: usize, available: usize },
    #[error("fee {fee} exceeds input value {input}")]
    FeeTooHigh { fee: u64, input: u64 },
    #[error("vsize {target} is below the unpadded size {minimum}")]
    VsizeTooSmall { target: u64, minimum: u64 },
    #[error("transaction needs at least one input and one output")]
    EmptyTransaction,
    #[error("chain already has blocks above genesis (height {0})")]
    ChainNotEmpty(u64),
}

/// Appends blocks to a chain, spending coinbase outputs in the order they
/// were created.
pub struct ScenarioBuilder {
    chain: Chain,
    spendable: VecDeque<(OutPoint, u64)>,
}

impl ScenarioBuilder {
    /// Start from `chain`, treating every still-unspent coinbase output as
    /// spendable.
    pub fn new(chain: Chain) -> Self {
        let mut spendable = VecDeque::new();
        for height in 0..=chain.height() {
            if let Some(coinbase) = chain.block_at_height(height).and_then(Block::coinbase) {
                let txid = coinbase.hash();
                for (vout, output) in coinbase.outputs.iter().enumerate() {
                    let outpoint = OutPoint { txid, vout: vout as u32 };
                    if chain.utxo_set.contains(&outpoint) {
                        spendable.push_back((outpoint, output.amount));
                    }
                }
            }
        }
        ScenarioBuilder { chain, spendable }
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn into_chain(self) -> Chain {
        self.chain
    }

    pub fn spendable(&self) -> usize {
        self.spendable.len()
    }

    /// Append `count` blocks holding only a coinbase.
    pub fn mine_empty(&mut self, count: u64) -> Result<(), RegtestError> {
        for _ in 0..count {
            self.mine_with(&[])?;
        }
        Ok(())
    }

    /// Append one block carrying one transaction per `TxSpec`, in order.
    pub fn mine_with(&mut self, specs: &[TxSpec]) -> Result<Hash256, RegtestError> {
        let needed: usize = specs.iter().map(|s| s.inputs).sum();
        if needed > self.spendable.len() {
            return Err(RegtestError::NotEnoughCoins { needed, available: self.spendable.len() });
        }

        let mut txs = Vec::with_capacity(specs.len() + 1);
        let height = self.chain.height() + 1;
        txs.push(Transaction::new_coinbase(height, block_reward(height), MINER_PUBKEY_HASH, FUND_PUBKEY_HASH));

        let mut cursor = self.spendable.iter();
        for spec in specs {
            let coins: Vec<(OutPoint, u64)> = cursor.by_ref().take(spec.inputs).copied().collect();
            txs.push(build_transaction(spec, &coins)?);
        }

        let block = Block::new(
            self.chain.tip(),
            height,
            self.chain.tip_header().timestamp + BLOCK_SPACING,
            txs,
        );
        let coinbase = block.transactions[0].clone();
        let hash = self.chain.add_block(block)?;

        self.spendable.drain(..needed);
        let txid = coinbase.hash();
        for (vout, output) in coinbase.outputs.iter().enumerate() {
            self.spendable.push_back((OutPoint { txid, vout: vout as u32 }, output.amount));
        }

        tracing::debug!("🧪 Regtest block #{} with {} fee-paying txs", height, specs.len());
        Ok(hash)
    }
}

/// Spend `coins` into `spec.outputs` equal outputs, leaving `spec.fee` unclaimed.
fn build_transaction(spec: &TxSpec, coins: &[(OutPoint, u64)]) -> Result<Transaction, RegtestError> {
    if spec.inputs == 0 || spec.outputs == 0 {
        return Err(RegtestError::EmptyTransaction);
    }

    let input: u64 = coins.iter().map(|(_, v)| v).sum();
    let spent = input
        .checked_sub(spec.fee)
        .ok_or(RegtestError::FeeTooHigh { fee: spec.fee, input })?;
    let share = spent / spec.outputs as u64;
    let remainder = spent % spec.outputs as u64;

    let mut tx = Transaction {
        version: 2,
        inputs: coins
            .iter()
            .map(|(outpoint, _)| TxInput {
                previous_output: *outpoint,
                script_sig: vec![],
                witness: vec![],
                sequence: 0xFFFF_FFFE,
            })
            .collect(),
        outputs: (0..spec.outputs)
            .map(|i| TxOutput {
                amount: if i == 0 { share + remainder } else { share },
                pubkey_hash: RECIPIENT_PUBKEY_HASH,
            })
            .collect(),
        lock_time: 0,
    };

    if let Some(target) = spec.vsize {
        pad_witness(&mut tx, target)?;
    }
    Ok(tx)
}

/// Give the first input a single witness item sized so that `vsize` is
/// exactly `target`.
///
/// A witness adds the 2-byte marker, a 4-byte item count per input and a
/// 4-byte length per item to the full encoding, all at a quarter of the weight.
fn pad_witness(tx: &mut Transaction, target: u64) -> Result<(), RegtestError> {
    let base = tx.base_size() as u64;
    let overhead = 2 + 4 * tx.inputs.len() as u64 + 4;
    let minimum = base + overhead.div_ceil(4);
    if target < minimum {
        return Err(RegtestError::VsizeTooSmall { target, minimum });
    }

    let item_len = 4 * (target - base) - overhead;
    tx.inputs[0].witness = vec![vec![0xAB; item_len as usize]];
    debug_assert_eq!(tx.vsize(), target);
    Ok(())
}

/// Blocks 102 and 103 of the standard scenario
pub fn standard_fee_blocks() -> [Vec<TxSpec>; 2] {
    [
        vec![TxSpec::new(1, 3, 38_660).with_vsize(7_700)],
        vec![
            TxSpec::new(2, 3, 46_500).with_vsize(9_300),
            TxSpec::new(1, 3, 532_800).with_vsize(7_104),
            TxSpec::new(100, 3, 126_620).with_vsize(25_121),
        ],
    ]
}

/// Build the standard scenario on a fresh chain: 101 coinbase-only blocks,
/// then one block with a single fee-paying transaction and one with three.
pub fn seed_standard_scenario(chain: Chain) -> Result<Chain, RegtestError> {
    if chain.height() != 0 {
        return Err(RegtestError::ChainNotEmpty(chain.height()));
    }

    let mut builder = ScenarioBuilder::new(chain);
    builder.mine_empty(101)?;
    for specs in standard_fee_blocks() {
        builder.mine_with(&specs)?;
    }

    let chain = builder.into_chain();
    tracing::info!("🧪 Seeded regtest scenario: height={} tip={}",
        chain.height(), &hex::encode(chain.tip())[..16]);
    Ok(chain)
}
