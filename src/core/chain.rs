use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::params::*;
use crate::core::state::{ChainState, ChainStateError};
use crate::core::types::*;
use crate::storage::{Storage, StorageError};

/// Represents an unspent transaction output in the UTXO set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UtxoEntry {
    pub output: TxOutput,
    pub height: u64,
    pub is_coinbase: bool,
}

/// The UTXO set - tracks all unspent outputs (in-memory)
#[derive(Debug, Clone, Default)]
pub struct UtxoSet {
    utxos: HashMap<OutPoint, UtxoEntry>,
}

impl UtxoSet {
    pub fn new() -> Self { Self::default() }
    pub fn add(&mut self, outpoint: OutPoint, entry: UtxoEntry) { self.utxos.insert(outpoint, entry); }
    pub fn spend(&mut self, outpoint: &OutPoint) -> Option<UtxoEntry> { self.utxos.remove(outpoint) }
    pub fn contains(&self, outpoint: &OutPoint) -> bool { self.utxos.contains_key(outpoint) }
    pub fn len(&self) -> usize { self.utxos.len() }
    pub fn iter(&self) -> impl Iterator<Item = (&OutPoint, &UtxoEntry)> { self.utxos.iter() }
}

/// Outputs spent by one block, in the order its inputs consumed them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockUndo {
    pub spent: Vec<(OutPoint, UtxoEntry)>,
}

// ─── Chain ──────────────────────────────────────────────────────────

/// Append-only store of the active chain.
///
/// Besides the blocks themselves the chain keeps the UTXO set, one undo
/// record per block, and an index of every spent output built from those
/// undo records. The spent index is what fee reconstruction reads.
pub struct Chain {
    /// Active chain, indexed by height
    blocks: Vec<Block>,
    /// Undo records, indexed by height (genesis has an empty one)
    undo: Vec<BlockUndo>,
    /// Spent outputs, keyed by the outpoint that referenced them
    spent_index: HashMap<OutPoint, UtxoEntry>,
    pub utxo_set: UtxoSet,
    storage: Option<Storage>,
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("height", &self.height())
            .field("tip", &hex::encode(self.tip()))
            .field("utxos", &self.utxo_set.len())
            .field("spent", &self.spent_index.len())
            .finish()
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl Chain {
    /// Create a new in-memory chain holding only the genesis block
    pub fn new() -> Self {
        let mut chain = Chain {
            blocks: Vec::new(),
            undo: Vec::new(),
            spent_index: HashMap::new(),
            utxo_set: UtxoSet::new(),
            storage: None,
        };
        let genesis = Self::create_genesis_block();
        chain.connect_genesis(genesis);
        chain
    }

    /// Open with persistent storage, loading any existing chain
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BlockError> {
        let storage = Storage::open(path)?;
        if storage.has_chain_data() {
            Self::load_from_storage(storage)
        } else {
            let chain = Self::new();
            let created = chain.utxo_set.iter().map(|(op, e)| (*op, e.clone())).collect::<Vec<_>>();
            storage.commit_block(&chain.blocks[0], &chain.undo[0], &created)?;
            storage.flush()?;
            Ok(Chain { storage: Some(storage), ..chain })
        }
    }

    fn load_from_storage(storage: Storage) -> Result<Self, BlockError> {
        let height = storage.get_height()?
            .ok_or_else(|| StorageError::Corrupt("no height".into()))?;

        let mut blocks = Vec::with_capacity(height as usize + 1);
        let mut undo = Vec::with_capacity(height as usize + 1);
        let mut spent_index = HashMap::new();

        for h in 0..=height {
            let block = storage.get_block(h)?
                .ok_or_else(|| StorageError::Corrupt(format!("no block at height {}", h)))?;
            let record = storage.get_undo(h)?
                .ok_or_else(|| StorageError::Corrupt(format!("no undo at height {}", h)))?;
            for (outpoint, entry) in &record.spent {
                spent_index.insert(*outpoint, entry.clone());
            }
            blocks.push(block);
            undo.push(record);
        }

        let mut utxo_set = UtxoSet::new();
        for (outpoint, entry) in storage.load_all_utxos()? {
            utxo_set.add(outpoint, entry);
        }

        let chain = Chain { blocks, undo, spent_index, utxo_set, storage: Some(storage) };
        if let Some(stored_tip) = chain.storage.as_ref().and_then(|s| s.get_tip().ok().flatten()) {
            if stored_tip != chain.tip() {
                return Err(StorageError::Corrupt("tip does not match last block".into()).into());
            }
        }

        tracing::info!("💾 Loaded chain: height={} tip={} utxos={} spent={}",
            height, &hex::encode(chain.tip())[..16], chain.utxo_set.len(), chain.spent_index.len());

        Ok(chain)
    }

    fn create_genesis_block() -> Block {
        let coinbase = Transaction::new_coinbase(0, block_reward(0), [0u8; 32], [0xCF; 32]);
        Block::new(NULL_HASH, 0, GENESIS_TIMESTAMP, vec![coinbase])
    }

    fn connect_genesis(&mut self, genesis: Block) {
        let coinbase = &genesis.transactions[0];
        let txid = coinbase.hash();
        for (vout, output) in coinbase.outputs.iter().enumerate() {
            self.utxo_set.add(
                OutPoint { txid, vout: vout as u32 },
                UtxoEntry { output: output.clone(), height: 0, is_coinbase: true },
            );
        }
        self.blocks.push(genesis);
        self.undo.push(BlockUndo::default());
    }

    // ─── Block Acceptance ───────────────────────────────────────────

    /// Append a block on top of the current tip.
    pub fn add_block(&mut self, block: Block) -> Result<Hash256, BlockError> {
        let expected_height = self.height() + 1;
        if block.header.height != expected_height {
            return Err(BlockError::InvalidHeight { expected: expected_height, got: block.header.height });
        }
        if block.header.prev_hash != self.tip() {
            return Err(BlockError::InvalidPrevHash);
        }
        if block.header.timestamp <= self.tip_header().timestamp {
            return Err(BlockError::InvalidTimestamp);
        }
        if !block.validate_merkle_root() {
            return Err(BlockError::InvalidMerkleRoot);
        }
        if block.transactions.is_empty() {
            return Err(BlockError::NoTransactions);
        }
        if !block.transactions[0].is_coinbase() {
            return Err(BlockError::NoCoinbase);
        }

        let mut undo = BlockUndo::default();
        let mut created = Vec::new();
        if let Err(e) = self.connect_transactions(&block, &mut undo, &mut created) {
            self.disconnect(&undo, &created);
            return Err(e);
        }

        if let Some(ref storage) = self.storage {
            if let Err(e) = storage.commit_block(&block, &undo, &created) {
                tracing::error!("❌ Failed to persist block #{}: {}", expected_height, e);
                self.disconnect(&undo, &created);
                return Err(e.into());
            }
        }

        for (outpoint, entry) in &undo.spent {
            self.spent_index.insert(*outpoint, entry.clone());
        }
        let hash = block.hash();
        tracing::debug!("📦 Connected block #{} ({} txs, {} spent)",
            expected_height, block.transactions.len(), undo.spent.len());
        self.blocks.push(block);
        self.undo.push(undo);
        Ok(hash)
    }

    /// Spend inputs and create outputs for every transaction in order, so a
    /// transaction may spend an output created earlier in the same block.
    fn connect_transactions(
        &mut self,
        block: &Block,
        undo: &mut BlockUndo,
        created: &mut Vec<(OutPoint, UtxoEntry)>,
    ) -> Result<(), BlockError> {
        let height = block.header.height;
        let mut total_fees: u64 = 0;

        for (idx, tx) in block.transactions.iter().enumerate() {
            let is_coinbase = idx == 0;
            if !is_coinbase {
                if tx.is_coinbase() {
                    return Err(BlockError::InvalidTransaction(format!("tx {} is a second coinbase", idx)));
                }
                if tx.inputs.is_empty() || tx.outputs.is_empty() {
                    return Err(BlockError::InvalidTransaction(format!("tx {} has empty inputs or outputs", idx)));
                }

                let mut input_sum: u64 = 0;
                for input in &tx.inputs {
                    let entry = self.utxo_set.spend(&input.previous_output)
                        .ok_or_else(|| BlockError::InvalidTransaction(
                            format!("tx {} spends unknown output {}", idx, input.previous_output)))?;
                    input_sum = input_sum.checked_add(entry.output.amount)
                        .ok_or_else(|| BlockError::InvalidTransaction(format!("tx {} input overflow", idx)))?;
                    undo.spent.push((input.previous_output, entry));
                }

                let output_sum = tx.total_output()
                    .ok_or_else(|| BlockError::InvalidTransaction(format!("tx {} output overflow", idx)))?;
                if output_sum > input_sum {
                    return Err(BlockError::InvalidTransaction(format!("tx {} outputs exceed inputs", idx)));
                }
                total_fees = total_fees.checked_add(input_sum - output_sum)
                    .ok_or_else(|| BlockError::InvalidTransaction("fee overflow".into()))?;
            }

            let txid = tx.hash();
            for (vout, output) in tx.outputs.iter().enumerate() {
                let outpoint = OutPoint { txid, vout: vout as u32 };
                if self.utxo_set.contains(&outpoint) {
                    return Err(BlockError::InvalidTransaction(format!("duplicate output {}", outpoint)));
                }
                let entry = UtxoEntry { output: output.clone(), height, is_coinbase };
                self.utxo_set.add(outpoint, entry.clone());
                created.push((outpoint, entry));
            }
        }

        let claimed = block.transactions[0].total_output().unwrap_or(u64::MAX);
        if claimed > block_reward(height).saturating_add(total_fees) {
            return Err(BlockError::InvalidCoinbaseAmount);
        }
        Ok(())
    }

    /// Undo partially or fully applied UTXO changes
    ///
    /// Spends are restored before created outputs are removed, so an output
    /// both created and spent inside the block ends up removed.
    fn disconnect(&mut self, undo: &BlockUndo, created: &[(OutPoint, UtxoEntry)]) {
        for (outpoint, entry) in undo.spent.iter().rev() {
            self.utxo_set.add(*outpoint, entry.clone());
        }
        for (outpoint, _) in created.iter().rev() {
            self.utxo_set.spend(outpoint);
        }
    }

    // ─── Public Accessors ───────────────────────────────────────────

    pub fn height(&self) -> u64 { (self.blocks.len() - 1) as u64 }

    pub fn tip(&self) -> Hash256 { self.tip_header().hash() }

    pub fn tip_header(&self) -> &BlockHeader { &self.blocks[self.blocks.len() - 1].header }

    pub fn block_at_height(&self, height: u64) -> Option<&Block> {
        usize::try_from(height).ok().and_then(|h| self.blocks.get(h))
    }

    pub fn undo_at_height(&self, height: u64) -> Option<&BlockUndo> {
        usize::try_from(height).ok().and_then(|h| self.undo.get(h))
    }

    pub fn genesis_hash(&self) -> Hash256 { self.blocks[0].hash() }

    pub fn is_persistent(&self) -> bool { self.storage.is_some() }

    /// Flush persisted blocks to disk; a no-op for in-memory chains
    pub fn flush(&self) -> Result<(), BlockError> {
        if let Some(ref storage) = self.storage {
            storage.flush()?;
        }
        Ok(())
    }

    pub fn spent_outputs(&self) -> usize { self.spent_index.len() }
}

impl ChainState for Chain {
    fn current_height(&self) -> u64 {
        self.height()
    }

    fn block_at(&self, height: u64) -> Result<Cow<'_, Block>, ChainStateError> {
        self.block_at_height(height)
            .map(Cow::Borrowed)
            .ok_or(ChainStateError::MissingBlock(height))
    }

    fn resolve_spent_output_value(&self, outpoint: &OutPoint) -> Result<u64, ChainStateError> {
        self.spent_index
            .get(outpoint)
            .map(|entry| entry.output.amount)
            .ok_or(ChainStateError::MissingSpentOutput(*outpoint))
    }
}

// ─── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error("invalid height (expected {expected}, got {got})")]
    InvalidHeight { expected: u64, got: u64 },
    #[error("prev_hash mismatch")]
    InvalidPrevHash,
    #[error("invalid timestamp")]
    InvalidTimestamp,
    #[error("invalid merkle root")]
    InvalidMerkleRoot,
    #[error("no transactions")]
    NoTransactions,
    #[error("no coinbase")]
    NoCoinbase,
    #[error("coinbase amount too large")]
    InvalidCoinbaseAmount,
    #[error("invalid tx: {0}")]
    InvalidTransaction(String),
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coinbase_only(chain: &Chain) -> Block {
        let height = chain.height() + 1;
        let cb = Transaction::new_coinbase(height, block_reward(height), [1u8; 32], [0xCF; 32]);
        Block::new(chain.tip(), height, chain.tip_header().timestamp + 1, vec![cb])
    }

    fn spend(prev: OutPoint, amount: u64) -> Transaction {
        Transaction {
            version: 2,
            inputs: vec![TxInput { previous_output: prev, script_sig: vec![], witness: vec![], sequence: 0xFFFFFFFF }],
            outputs: vec![TxOutput { amount, pubkey_hash: [9u8; 32] }],
            lock_time: 0,
        }
    }

    fn block_with(chain: &Chain, txs: Vec<Transaction>) -> Block {
        let height = chain.height() + 1;
        let cb = Transaction::new_coinbase(height, block_reward(height), [1u8; 32], [0xCF; 32]);
        let mut all = vec![cb];
        all.extend(txs);
        Block::new(chain.tip(), height, chain.tip_header().timestamp + 1, all)
    }

    #[test]
    fn test_chain_genesis() {
        let chain = Chain::new();
        assert_eq!(chain.height(), 0);
        assert_eq!(chain.utxo_set.len(), 2);
        assert_eq!(chain.current_height(), 0);
        assert!(chain.block_at(0).is_ok());
    }

    #[test]
    fn test_add_coinbase_only_block() {
        let mut chain = Chain::new();
        let block = coinbase_only(&chain);
        let hash = chain.add_block(block).unwrap();
        assert_eq!(chain.height(), 1);
        assert_eq!(chain.tip(), hash);
        assert_eq!(chain.utxo_set.len(), 4);
    }

    #[test]
    fn test_spend_records_undo_and_resolves_value() {
        let mut chain = Chain::new();
        let genesis_cb = chain.blocks[0].transactions[0].clone();
        let prev = OutPoint { txid: genesis_cb.hash(), vout: 0 };
        let value = genesis_cb.outputs[0].amount;

        let block = block_with(&chain, vec![spend(prev, value - 1_000)]);
        chain.add_block(block).unwrap();

        assert_eq!(chain.resolve_spent_output_value(&prev).unwrap(), value);
        assert_eq!(chain.undo_at_height(1).unwrap().spent.len(), 1);
        assert!(!chain.utxo_set.contains(&prev));
    }

    #[test]
    fn test_unspent_output_does_not_resolve() {
        let chain = Chain::new();
        let genesis_cb = &chain.blocks[0].transactions[0];
        let unspent = OutPoint { txid: genesis_cb.hash(), vout: 0 };
        assert!(matches!(
            chain.resolve_spent_output_value(&unspent),
            Err(ChainStateError::MissingSpentOutput(_))
        ));
    }

    #[test]
    fn test_reject_unknown_input_and_roll_back() {
        let mut chain = Chain::new();
        let utxos_before = chain.utxo_set.len();
        let bogus = OutPoint { txid: [0xEE; 32], vout: 3 };
        let block = block_with(&chain, vec![spend(bogus, 1)]);

        assert!(matches!(chain.add_block(block), Err(BlockError::InvalidTransaction(_))));
        assert_eq!(chain.height(), 0);
        assert_eq!(chain.utxo_set.len(), utxos_before);
    }

    #[test]
    fn test_reject_outputs_exceeding_inputs() {
        let mut chain = Chain::new();
        let genesis_cb = chain.blocks[0].transactions[0].clone();
        let prev = OutPoint { txid: genesis_cb.hash(), vout: 0 };
        let block = block_with(&chain, vec![spend(prev, genesis_cb.outputs[0].amount + 1)]);

        assert!(chain.add_block(block).is_err());
        // the failed spend must have been restored
        assert!(chain.utxo_set.contains(&prev));
    }

    #[test]
    fn test_rejected_block_leaves_no_intra_block_outputs() {
        let mut chain = Chain::new();
        let genesis_cb = chain.blocks[0].transactions[0].clone();
        let prev = OutPoint { txid: genesis_cb.hash(), vout: 0 };
        let value = genesis_cb.outputs[0].amount;

        let parent = spend(prev, value - 1_000);
        let child_of = OutPoint { txid: parent.hash(), vout: 0 };
        // spends its parent's output and then overspends it
        let child = spend(child_of, value);
        let block = block_with(&chain, vec![parent, child]);

        assert!(matches!(chain.add_block(block), Err(BlockError::InvalidTransaction(_))));
        assert_eq!(chain.height(), 0);
        assert_eq!(chain.utxo_set.len(), 2);
        assert!(chain.utxo_set.contains(&prev));
        assert!(!chain.utxo_set.contains(&child_of));
    }

    #[test]
    fn test_rejected_greedy_block_restores_utxos() {
        let mut chain = Chain::new();
        let genesis_cb = chain.blocks[0].transactions[0].clone();
        let prev = OutPoint { txid: genesis_cb.hash(), vout: 1 };
        let parent = spend(prev, genesis_cb.outputs[1].amount);
        let child_of = OutPoint { txid: parent.hash(), vout: 0 };
        let child = spend(child_of, genesis_cb.outputs[1].amount);

        let height = 1;
        let cb = Transaction::new_coinbase(height, block_reward(height) + 1, [1u8; 32], [0xCF; 32]);
        let block = Block::new(chain.tip(), height, chain.tip_header().timestamp + 1, vec![cb, parent, child]);

        assert!(matches!(chain.add_block(block), Err(BlockError::InvalidCoinbaseAmount)));
        assert_eq!(chain.utxo_set.len(), 2);
        assert!(chain.utxo_set.contains(&prev));
        assert!(!chain.utxo_set.contains(&child_of));
    }

    #[test]
    fn test_reject_bad_height_and_prev_hash() {
        let mut chain = Chain::new();
        let mut block = coinbase_only(&chain);
        block.header.height = 5;
        assert!(matches!(chain.add_block(block), Err(BlockError::InvalidHeight { expected: 1, got: 5 })));

        let mut block = coinbase_only(&chain);
        block.header.prev_hash = [1u8; 32];
        assert!(matches!(chain.add_block(block), Err(BlockError::InvalidPrevHash)));
    }

    #[test]
    fn test_reject_greedy_coinbase() {
        let mut chain = Chain::new();
        let height = 1;
        let cb = Transaction::new_coinbase(height, block_reward(height) + 1, [1u8; 32], [0xCF; 32]);
        let block = Block::new(chain.tip(), height, chain.tip_header().timestamp + 1, vec![cb]);
        assert!(matches!(chain.add_block(block), Err(BlockError::InvalidCoinbaseAmount)));
    }

    #[test]
    fn test_persistent_chain_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let prev;
        {
            let mut chain = Chain::open(dir.path()).unwrap();
            assert!(chain.is_persistent());
            let genesis_cb = chain.blocks[0].transactions[0].clone();
            prev = OutPoint { txid: genesis_cb.hash(), vout: 1 };
            let value = genesis_cb.outputs[1].amount;
            let block = block_with(&chain, vec![spend(prev, value / 2)]);
            chain.add_block(block).unwrap();
            let block = coinbase_only(&chain);
            chain.add_block(block).unwrap();
        }

        let chain = Chain::open(dir.path()).unwrap();
        assert_eq!(chain.height(), 2);
        assert!(chain.resolve_spent_output_value(&prev).is_ok());
        assert!(chain.block_at_height(2).is_some());
        assert!(chain.block_at_height(3).is_none());
    }
}
