//! Chain snapshots for moving a chain between data directories.
//!
//! Layout of the gzip stream:
//! `[version:u32][height:u64][block_count:u64][genesis:32]` followed by
//! `block_count` entries of `[len:u32][bincode block]` for heights `1..=height`.
//! Integers are little-endian.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::core::chain::{BlockError, Chain};
use crate::core::types::{Block, Hash256};

pub const SNAPSHOT_VERSION: u32 = 1;

const HEADER_LEN: usize = 4 + 8 + 8 + 32;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("unknown snapshot version {0}")]
    UnsupportedVersion(u32),
    #[error("genesis mismatch (snapshot {snapshot}, ours {ours}); snapshot is from a different network")]
    GenesisMismatch { snapshot: String, ours: String },
    #[error("snapshot truncated at block {0}")]
    Truncated(u64),
    #[error("snapshot header claims {count} blocks for height {height}")]
    CountMismatch { height: u64, count: u64 },
    #[error("block {height} rejected: {source}")]
    Rejected { height: u64, source: BlockError },
    #[error("chain has blocks above genesis (height {0}); import needs an empty chain")]
    ChainNotEmpty(u64),
    #[error("chain is missing block {0}")]
    MissingBlock(u64),
    #[error("cannot open staging chain: {0}")]
    Open(BlockError),
}

/// What a snapshot holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub height: u64,
    pub blocks: u64,
    /// Uncompressed payload size
    pub raw_bytes: usize,
}

/// Write every block above genesis to `writer` as a gzip snapshot.
pub fn export<W: Write>(chain: &Chain, writer: W) -> Result<SnapshotSummary, SnapshotError> {
    let height = chain.height();

    let mut data: Vec<u8> = Vec::with_capacity(HEADER_LEN);
    data.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    data.extend_from_slice(&height.to_le_bytes());
    data.extend_from_slice(&height.to_le_bytes());
    data.extend_from_slice(&chain.genesis_hash());

    for h in 1..=height {
        let block = chain.block_at_height(h).ok_or(SnapshotError::MissingBlock(h))?;
        let encoded = bincode::serialize(block)?;
        data.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        data.extend_from_slice(&encoded);
    }

    let mut encoder = GzEncoder::new(writer, Compression::fast());
    encoder.write_all(&data)?;
    encoder.finish()?;

    tracing::info!("📸 Exported {} blocks (height {}), {} bytes raw", height, height, data.len());
    Ok(SnapshotSummary { height, blocks: height, raw_bytes: data.len() })
}

pub fn export_to_file<P: AsRef<Path>>(chain: &Chain, path: P) -> Result<SnapshotSummary, SnapshotError> {
    export(chain, File::create(path)?)
}

/// Replay a snapshot onto `chain`, which must hold only a matching genesis.
///
/// Every block goes through [`Chain::add_block`], so a tampered snapshot is
/// rejected block by block. On error the chain keeps the blocks imported so far.
pub fn import<R: Read>(reader: R, chain: &mut Chain) -> Result<SnapshotSummary, SnapshotError> {
    if chain.height() != 0 {
        return Err(SnapshotError::ChainNotEmpty(chain.height()));
    }

    let mut data = Vec::new();
    GzDecoder::new(reader).read_to_end(&mut data)?;
    let mut cursor = Cursor { data: &data, offset: 0 };

    let version = cursor.u32().ok_or(SnapshotError::Truncated(0))?;
    if version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }
    let height = cursor.u64().ok_or(SnapshotError::Truncated(0))?;
    let count = cursor.u64().ok_or(SnapshotError::Truncated(0))?;
    let genesis: Hash256 = cursor
        .take(32)
        .and_then(|b| b.try_into().ok())
        .ok_or(SnapshotError::Truncated(0))?;

    if genesis != chain.genesis_hash() {
        return Err(SnapshotError::GenesisMismatch {
            snapshot: hex::encode(genesis),
            ours: hex::encode(chain.genesis_hash()),
        });
    }
    if count != height {
        return Err(SnapshotError::CountMismatch { height, count });
    }

    for h in 1..=height {
        let len = cursor.u32().ok_or(SnapshotError::Truncated(h))? as usize;
        let bytes = cursor.take(len).ok_or(SnapshotError::Truncated(h))?;
        let block: Block = bincode::deserialize(bytes)?;
        chain
            .add_block(block)
            .map_err(|source| SnapshotError::Rejected { height: h, source })?;
        if h % 1_000 == 0 {
            tracing::info!("📥 Imported {}/{} blocks", h, height);
        }
    }

    tracing::info!("📸 Imported {} blocks, tip {}", height, &hex::encode(chain.tip())[..16]);
    Ok(SnapshotSummary { height, blocks: count, raw_bytes: data.len() })
}

pub fn import_from_file<P: AsRef<Path>>(path: P, chain: &mut Chain) -> Result<SnapshotSummary, SnapshotError> {
    import(File::open(path)?, chain)
}

/// Replace the chain in `data_dir` with the contents of a snapshot file.
///
/// Blocks are replayed into a staging directory beside `data_dir`. The
/// existing chain is only removed once every block has been accepted, so a
/// bad snapshot leaves it untouched.
pub fn import_into_dir<P: AsRef<Path>, Q: AsRef<Path>>(
    snapshot: P,
    data_dir: Q,
) -> Result<SnapshotSummary, SnapshotError> {
    let data_dir = data_dir.as_ref();
    let staging = staging_dir(data_dir);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }

    let replayed = Chain::open(&staging).map_err(SnapshotError::Open).and_then(|mut chain| {
        let summary = import_from_file(snapshot, &mut chain)?;
        chain.flush().map_err(SnapshotError::Open)?;
        Ok(summary)
    });
    let summary = match replayed {
        Ok(summary) => summary,
        Err(e) => {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                tracing::warn!("⚠️  Could not remove {}: {}", staging.display(), cleanup);
            }
            return Err(e);
        }
    };

    if data_dir.exists() {
        fs::remove_dir_all(data_dir)?;
    }
    fs::rename(&staging, data_dir)?;
    tracing::info!("📸 Replaced chain in {} (height {})", data_dir.display(), summary.height);
    Ok(summary)
}

fn staging_dir(data_dir: &Path) -> PathBuf {
    let mut name = data_dir.file_name().unwrap_or_default().to_os_string();
    name.push(".import");
    data_dir.with_file_name(name)
}

struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.offset.checked_add(n)?;
        let bytes = self.data.get(self.offset..end)?;
        self.offset = end;
        Some(bytes)
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4).and_then(|b| b.try_into().ok()).map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Option<u64> {
        self.take(8).and_then(|b| b.try_into().ok()).map(u64::from_le_bytes)
    }
}
