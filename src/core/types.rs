use serde::{Deserialize, Serialize};
use std::fmt;

use super::params::{BLOCK_VERSION, COINBASE_VOUT, WITNESS_SCALE_FACTOR};
use crate::crypto::{self, txid};

/// A 32-byte hash used throughout the system
pub type Hash256 = [u8; 32];

/// Null hash (all zeros) used for genesis block's prev_hash and the coinbase input
pub const NULL_HASH: Hash256 = [0u8; 32];

// ─── Transaction Types ───────────────────────────────────────────────

/// Represents a reference to a previous transaction output
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    /// The placeholder outpoint spent by a coinbase input
    pub const fn null() -> Self {
        OutPoint { txid: NULL_HASH, vout: COINBASE_VOUT }
    }

    pub fn is_null(&self) -> bool {
        self.txid == NULL_HASH && self.vout == COINBASE_VOUT
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hex::encode(self.txid), self.vout)
    }
}

/// Transaction input - spends a previous output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxInput {
    pub previous_output: OutPoint,
    pub script_sig: Vec<u8>,
    /// Segregated witness stack; discounted when computing weight
    #[serde(default)]
    pub witness: Vec<Vec<u8>>,
    pub sequence: u32,
}

/// Transaction output - creates a new spendable output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxOutput {
    pub amount: u64,
    pub pubkey_hash: Hash256,
}

/// A complete transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u64,
}

impl Transaction {
    /// Create a coinbase transaction paying `reward` to the miner, minus the
    /// community fund share which gets its own output.
    pub fn new_coinbase(
        height: u64,
        reward: u64,
        miner_pubkey_hash: Hash256,
        community_fund_hash: Hash256,
    ) -> Self {
        let community_amount = super::params::community_fund_amount(reward);
        let miner_amount = reward - community_amount;

        let mut outputs = vec![TxOutput {
            amount: miner_amount,
            pubkey_hash: miner_pubkey_hash,
        }];

        if community_amount > 0 {
            outputs.push(TxOutput {
                amount: community_amount,
                pubkey_hash: community_fund_hash,
            });
        }

        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint::null(),
                // height in the unlocking data keeps coinbase txids unique
                script_sig: height.to_le_bytes().to_vec(),
                witness: vec![],
                sequence: 0xFFFFFFFF,
            }],
            outputs,
            lock_time: 0,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|i| !i.witness.is_empty())
    }

    /// Sum of output amounts, `None` on overflow
    pub fn total_output(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.amount))
    }

    /// Transaction id (witness excluded)
    pub fn hash(&self) -> Hash256 {
        txid::txid(self)
    }

    pub fn witness_hash(&self) -> Hash256 {
        txid::wtxid(self)
    }

    /// Serialized size without witness data
    pub fn base_size(&self) -> usize {
        txid::encode_base(self).len()
    }

    /// Serialized size including witness data
    pub fn total_size(&self) -> usize {
        txid::encode_full(self).len()
    }

    pub fn weight(&self) -> u64 {
        self.base_size() as u64 * (WITNESS_SCALE_FACTOR - 1) + self.total_size() as u64
    }

    /// Virtual size: weight scaled down by the witness factor, rounded up.
    /// Always positive since the encoding has fixed-size fields.
    pub fn vsize(&self) -> u64 {
        self.weight().div_ceil(WITNESS_SCALE_FACTOR)
    }
}

// ─── Block Types ─────────────────────────────────────────────────────

/// Block header
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_hash: Hash256,
    pub merkle_root: Hash256,
    /// Seconds since the unix epoch
    pub timestamp: u64,
    pub height: u64,
}

impl BlockHeader {
    /// Block id: double SHA-256 over the serialized header
    pub fn hash(&self) -> Hash256 {
        let serialized = bincode::serialize(self).unwrap_or_default();
        crypto::double_sha256(&serialized)
    }
}

/// A complete block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Assemble a block on top of `prev_hash`, filling in the merkle root.
    pub fn new(prev_hash: Hash256, height: u64, timestamp: u64, transactions: Vec<Transaction>) -> Self {
        let mut block = Block {
            header: BlockHeader {
                version: BLOCK_VERSION,
                prev_hash,
                merkle_root: NULL_HASH,
                timestamp,
                height,
            },
            transactions,
        };
        block.header.merkle_root = block.compute_merkle_root();
        block
    }

    /// Compute the merkle root from the block's transactions
    pub fn compute_merkle_root(&self) -> Hash256 {
        let txids: Vec<Hash256> = self.transactions.iter().map(|tx| tx.hash()).collect();
        crypto::merkle_root(&txids)
    }

    pub fn validate_merkle_root(&self) -> bool {
        self.header.merkle_root == self.compute_merkle_root()
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }
}

impl fmt::Display for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block #{} [{}] ts={}",
            self.height,
            hex::encode(self.hash()),
            self.timestamp,
        )
    }
}
