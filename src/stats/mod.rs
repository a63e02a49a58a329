//! Per-block fee and size statistics over a height range (`getperblockstats`).
//!
//! A query resolves its height range and field list, then walks the range
//! from newest to oldest block. Each block's transaction fees are rebuilt
//! from the values of the outputs they spend, reduced to min/max/total/average
//! figures, and projected into one column per selected field.

pub mod aggregate;
pub mod assemble;
pub mod error;
pub mod extract;
pub mod fields;
pub mod range;

use serde::{Deserialize, Serialize};

use crate::core::state::ChainState;

pub use aggregate::{FeerateAverage, PerBlockStats};
pub use assemble::ResultSet;
pub use error::{RangeBound, StatsError};
pub use fields::{Field, FieldSet};
pub use range::HeightRange;

/// Engine settings that do not change the shape of a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Worker threads for the per-block loop; 0 means one per CPU
    pub workers: usize,
    pub feerate_average: FeerateAverage,
}

impl Default for StatsConfig {
    fn default() -> Self {
        StatsConfig { workers: 1, feerate_average: FeerateAverage::default() }
    }
}

impl StatsConfig {
    pub fn effective_workers(&self) -> usize {
        match self.workers {
            0 => num_cpus::get().max(1),
            n => n,
        }
    }
}

/// Query parameters, as named in a JSON request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerBlockStatsRequest {
    pub start: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
    /// Comma-separated field names; absent selects every field
    #[serde(default, alias = "plotvalues", skip_serializing_if = "Option::is_none")]
    pub fields: Option<String>,
}

impl PerBlockStatsRequest {
    pub fn new(start: i64, end: Option<i64>, fields: Option<&str>) -> Self {
        PerBlockStatsRequest { start, end, fields: fields.map(str::to_string) }
    }

    /// Decode from JSON params: either named (`{"start": .., "end": ..}`)
    /// or positional (`[start, end, fields]`). `null` positions count as absent.
    pub fn from_json(params: &serde_json::Value) -> Result<Self, StatsError> {
        match params {
            serde_json::Value::Object(_) => serde_json::from_value(params.clone())
                .map_err(|e| StatsError::InvalidRequest(e.to_string())),
            serde_json::Value::Array(items) => {
                if items.len() > 3 {
                    return Err(StatsError::InvalidRequest(format!("expected at most 3 params, got {}", items.len())));
                }
                let start = items
                    .first()
                    .and_then(serde_json::Value::as_i64)
                    .ok_or_else(|| StatsError::InvalidRequest("start must be an integer".into()))?;
                let end = match items.get(1) {
                    None | Some(serde_json::Value::Null) => None,
                    Some(v) => Some(v.as_i64().ok_or_else(|| StatsError::InvalidRequest("end must be an integer".into()))?),
                };
                let fields = match items.get(2) {
                    None | Some(serde_json::Value::Null) => None,
                    Some(v) => Some(
                        v.as_str()
                            .ok_or_else(|| StatsError::InvalidRequest("fields must be a string".into()))?
                            .to_string(),
                    ),
                };
                Ok(PerBlockStatsRequest { start, end, fields })
            }
            other => Err(StatsError::InvalidRequest(format!("expected object or array, got {}", other))),
        }
    }
}

/// Run a `getperblockstats` query against `state`.
///
/// The range is checked before the field list, and both before any block is
/// read. The result is all-or-nothing: any block that fails to resolve fails
/// the whole query.
pub fn get_per_block_stats<S: ChainState + Sync + ?Sized>(
    state: &S,
    request: &PerBlockStatsRequest,
    config: &StatsConfig,
) -> Result<ResultSet, StatsError> {
    let chain_height = state.current_height();
    let range = range::resolve(request.start, request.end, chain_height)?;
    let fields = fields::resolve(request.fields.as_deref())?;
    let workers = config.effective_workers();

    tracing::info!("📊 getperblockstats {}..={} ({} fields, {} workers, avgfeerate {})",
        range.start, range.end, fields.len(), workers, config.feerate_average);

    match assemble::assemble(state, range, &fields, workers, config.feerate_average) {
        Ok(result) => Ok(result),
        Err(e) => {
            tracing::error!("❌ getperblockstats {}..={} failed at tip {}: {}", range.start, range.end, chain_height, e);
            Err(e)
        }
    }
}
