use sled::{Batch, Db};
use std::path::Path;

use crate::core::chain::{BlockUndo, UtxoEntry};
use crate::core::types::*;

/// Key prefixes for different data types in sled
const PREFIX_BLOCK: &[u8] = b"blk:";
const PREFIX_UNDO: &[u8] = b"und:";
const PREFIX_UTXO: &[u8] = b"utx:";
const META_TIP: &[u8] = b"meta:tip";
const META_HEIGHT: &[u8] = b"meta:height";

/// Persistent storage backend using sled embedded database.
///
/// Blocks and undo records are keyed by big-endian height so a prefix scan
/// yields them in chain order.
pub struct Storage {
    db: Db,
}

impl Storage {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Storage { db })
    }

    /// Check if the database has existing chain data
    pub fn has_chain_data(&self) -> bool {
        self.db.contains_key(META_TIP).unwrap_or(false)
    }

    // ─── Block Connection ────────────────────────────────────────────

    /// Atomically persist a connected block: the block itself, its undo
    /// record, the UTXO changes it caused, and the new tip.
    pub fn commit_block(
        &self,
        block: &Block,
        undo: &BlockUndo,
        created: &[(OutPoint, UtxoEntry)],
    ) -> Result<(), StorageError> {
        let height = block.header.height;
        let mut batch = Batch::default();

        batch.insert(height_key(PREFIX_BLOCK, height), bincode::serialize(block)?);
        batch.insert(height_key(PREFIX_UNDO, height), bincode::serialize(undo)?);

        for (outpoint, _) in &undo.spent {
            batch.remove(utxo_key(outpoint));
        }
        for (outpoint, entry) in created {
            batch.insert(utxo_key(outpoint), bincode::serialize(entry)?);
        }

        batch.insert(META_TIP, block.hash().to_vec());
        batch.insert(META_HEIGHT, height.to_le_bytes().to_vec());

        self.db.apply_batch(batch)?;
        Ok(())
    }

    // ─── Reads ───────────────────────────────────────────────────────

    /// Retrieve the active-chain block at a height
    pub fn get_block(&self, height: u64) -> Result<Option<Block>, StorageError> {
        match self.db.get(height_key(PREFIX_BLOCK, height))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Retrieve the undo record written when the block at `height` was connected
    pub fn get_undo(&self, height: u64) -> Result<Option<BlockUndo>, StorageError> {
        match self.db.get(height_key(PREFIX_UNDO, height))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Load all UTXOs into memory (for startup)
    pub fn load_all_utxos(&self) -> Result<Vec<(OutPoint, UtxoEntry)>, StorageError> {
        let mut utxos = Vec::new();
        for item in self.db.scan_prefix(PREFIX_UTXO) {
            let (key, value) = item?;
            let outpoint = outpoint_from_utxo_key(&key)?;
            let entry: UtxoEntry = bincode::deserialize(&value)?;
            utxos.push((outpoint, entry));
        }
        Ok(utxos)
    }

    /// Get the chain tip hash
    pub fn get_tip(&self) -> Result<Option<Hash256>, StorageError> {
        match self.db.get(META_TIP)? {
            Some(bytes) => {
                let hash: Hash256 = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| StorageError::Corrupt("tip hash length".into()))?;
                Ok(Some(hash))
            }
            None => Ok(None),
        }
    }

    /// Get the chain height
    pub fn get_height(&self) -> Result<Option<u64>, StorageError> {
        match self.db.get(META_HEIGHT)? {
            Some(bytes) => {
                let buf: [u8; 8] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| StorageError::Corrupt("height length".into()))?;
                Ok(Some(u64::from_le_bytes(buf)))
            }
            None => Ok(None),
        }
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────

fn height_key(prefix: &[u8], height: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 8);
    key.extend_from_slice(prefix);
    key.extend_from_slice(&height.to_be_bytes());
    key
}

fn utxo_key(outpoint: &OutPoint) -> Vec<u8> {
    // utx:<txid(32)><vout(4)>
    let mut key = Vec::with_capacity(PREFIX_UTXO.len() + 36);
    key.extend_from_slice(PREFIX_UTXO);
    key.extend_from_slice(&outpoint.txid);
    key.extend_from_slice(&outpoint.vout.to_be_bytes());
    key
}

fn outpoint_from_utxo_key(key: &[u8]) -> Result<OutPoint, StorageError> {
    if key.len() != PREFIX_UTXO.len() + 36 {
        return Err(StorageError::Corrupt("invalid UTXO key length".into()));
    }
    let data = &key[PREFIX_UTXO.len()..];
    let mut txid = [0u8; 32];
    txid.copy_from_slice(&data[0..32]);
    let mut vout = [0u8; 4];
    vout.copy_from_slice(&data[32..36]);
    Ok(OutPoint { txid, vout: u32::from_be_bytes(vout) })
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] bincode::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}
