use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;

use crate::core::state::ChainState;

use super::aggregate::{aggregate, FeerateAverage, PerBlockStats};
use super::error::StatsError;
use super::extract::extract;
use super::fields::{Field, FieldSet};
use super::range::HeightRange;

/// Column-oriented query result: one sequence per field, highest height first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultSet {
    columns: BTreeMap<Field, Vec<u64>>,
}

impl ResultSet {
    pub fn get(&self, field: Field) -> Option<&[u64]> {
        self.columns.get(&field).map(Vec::as_slice)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.columns.contains_key(&field)
    }

    /// Fields present, in output order
    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.columns.keys().copied()
    }

    /// Number of blocks covered
    pub fn rows(&self) -> usize {
        self.columns.get(&Field::Height).map_or(0, Vec::len)
    }
}

/// Compute the statistics of the block at `height`.
pub fn block_stats<S: ChainState + ?Sized>(
    state: &S,
    height: u64,
    average: FeerateAverage,
) -> Result<PerBlockStats, StatsError> {
    let block = state.block_at(height)?;
    let fees = extract(&block, state)?;
    tracing::debug!("📊 Block #{}: {} txs, {} fee-paying", height, fees.counts.txs, fees.metrics.len());
    aggregate(&fees.metrics, fees.counts, height, block.header.timestamp, average).map_err(StatsError::from)
}

/// Walk `range` from `end` down to `start` and project the selected fields.
///
/// With more than one worker, blocks are computed concurrently and slotted
/// back into descending order; the first failure in that order is returned.
pub fn assemble<S: ChainState + Sync + ?Sized>(
    state: &S,
    range: HeightRange,
    fields: &FieldSet,
    workers: usize,
    average: FeerateAverage,
) -> Result<ResultSet, StatsError> {
    let stats = if workers <= 1 || range.block_count() == 1 {
        range
            .descending()
            .map(|height| block_stats(state, height, average))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        block_stats_parallel(state, range, workers, average)?
    };

    Ok(project(&stats, fields))
}

fn block_stats_parallel<S: ChainState + Sync + ?Sized>(
    state: &S,
    range: HeightRange,
    workers: usize,
    average: FeerateAverage,
) -> Result<Vec<PerBlockStats>, StatsError> {
    let heights: Vec<u64> = range.descending().collect();
    let next = AtomicUsize::new(0);
    let stop = AtomicBool::new(false);
    let (tx, rx) = mpsc::channel();

    std::thread::scope(|scope| {
        for _ in 0..workers.min(heights.len()) {
            let tx = tx.clone();
            let (heights, next, stop) = (&heights, &next, &stop);
            scope.spawn(move || {
                // Heights are claimed in order, so everything before a failing
                // slot has been claimed and finishes.
                while !stop.load(Ordering::Relaxed) {
                    let slot = next.fetch_add(1, Ordering::Relaxed);
                    let Some(&height) = heights.get(slot) else { break };
                    let result = block_stats(state, height, average);
                    if result.is_err() {
                        stop.store(true, Ordering::Relaxed);
                    }
                    if tx.send((slot, result)).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(tx);

    let mut slots: Vec<Option<PerBlockStats>> = vec![None; heights.len()];
    let mut first_error: Option<(usize, StatsError)> = None;
    for (slot, result) in rx {
        match result {
            Ok(stats) => slots[slot] = Some(stats),
            Err(e) => {
                if first_error.as_ref().map_or(true, |(s, _)| slot < *s) {
                    first_error = Some((slot, e));
                }
            }
        }
    }

    if let Some((slot, e)) = first_error {
        tracing::warn!("⚠️  Block #{} failed, abandoning query: {}", heights[slot], e);
        return Err(e);
    }
    Ok(slots.into_iter().flatten().collect())
}

fn project(stats: &[PerBlockStats], fields: &FieldSet) -> ResultSet {
    let columns = fields
        .columns()
        .map(|field| (field, stats.iter().map(|s| s.get(field)).collect()))
        .collect();
    ResultSet { columns }
}
