//! Read-only view of chain state consumed by the statistics engine.
//!
//! Implementors must present a consistent snapshot for as long as the
//! borrow is held: a query that starts against tip `H` must see the same
//! blocks and spent outputs until it finishes, even if the owner appends
//! blocks afterwards. Holding a read guard over the chain for the duration
//! of a query satisfies this.

use std::borrow::Cow;
use std::ops::Deref;
use std::sync::{Arc, RwLockReadGuard};

use super::types::{Block, OutPoint};
use crate::storage::StorageError;

pub trait ChainState {
    /// Height of the best (tip) block.
    fn current_height(&self) -> u64;

    /// Active-chain block at `height`. Heights at or below the tip must resolve.
    fn block_at(&self, height: u64) -> Result<Cow<'_, Block>, ChainStateError>;

    /// Value of a previously created output that a later input spends.
    fn resolve_spent_output_value(&self, outpoint: &OutPoint) -> Result<u64, ChainStateError>;
}

/// Failures of the chain-state collaborator. All of them mean the supplied
/// state is inconsistent or unreadable, never that the caller asked for
/// something invalid.
#[derive(Debug, thiserror::Error)]
pub enum ChainStateError {
    #[error("block at height {0} is missing")]
    MissingBlock(u64),
    #[error("spent output {0} has no recorded value")]
    MissingSpentOutput(OutPoint),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl<T: ChainState + ?Sized> ChainState for &T {
    fn current_height(&self) -> u64 {
        (**self).current_height()
    }

    fn block_at(&self, height: u64) -> Result<Cow<'_, Block>, ChainStateError> {
        (**self).block_at(height)
    }

    fn resolve_spent_output_value(&self, outpoint: &OutPoint) -> Result<u64, ChainStateError> {
        (**self).resolve_spent_output_value(outpoint)
    }
}

macro_rules! forward_chain_state {
    ($($ty:ty),* $(,)?) => {
        $(
            impl<T: ChainState + ?Sized> ChainState for $ty {
                fn current_height(&self) -> u64 {
                    self.deref().current_height()
                }

                fn block_at(&self, height: u64) -> Result<Cow<'_, Block>, ChainStateError> {
                    self.deref().block_at(height)
                }

                fn resolve_spent_output_value(&self, outpoint: &OutPoint) -> Result<u64, ChainStateError> {
                    self.deref().resolve_spent_output_value(outpoint)
                }
            }
        )*
    };
}

forward_chain_state!(Box<T>, Arc<T>, RwLockReadGuard<'_, T>);
