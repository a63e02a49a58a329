use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::ConsistencyError;
use super::extract::{PerTxMetrics, RawCounts};
use super::fields::Field;

/// How `avgfeerate` is derived from a block's per-transaction metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeerateAverage {
    /// `floor(Σ feerate / n)`: every transaction weighs the same
    #[default]
    #[serde(rename = "per-tx")]
    PerTransaction,
    /// `floor(totalfee / Σ vsize)`: transactions weigh by their size
    Weighted,
}

impl FromStr for FeerateAverage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per-tx" => Ok(FeerateAverage::PerTransaction),
            "weighted" => Ok(FeerateAverage::Weighted),
            other => Err(format!("unknown feerate average '{}' (expected per-tx or weighted)", other)),
        }
    }
}

impl fmt::Display for FeerateAverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeerateAverage::PerTransaction => f.write_str("per-tx"),
            FeerateAverage::Weighted => f.write_str("weighted"),
        }
    }
}

/// Aggregate statistics for one block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerBlockStats {
    pub height: u64,
    pub time: u64,
    pub minfee: u64,
    pub maxfee: u64,
    pub totalfee: u64,
    pub minfeerate: u64,
    pub maxfeerate: u64,
    pub avgfee: u64,
    pub avgfeerate: u64,
    pub txs: u64,
    pub ins: u64,
    pub outs: u64,
}

impl PerBlockStats {
    pub fn get(&self, field: Field) -> u64 {
        match field {
            Field::Height => self.height,
            Field::Time => self.time,
            Field::MinFee => self.minfee,
            Field::MaxFee => self.maxfee,
            Field::TotalFee => self.totalfee,
            Field::MinFeeRate => self.minfeerate,
            Field::MaxFeeRate => self.maxfeerate,
            Field::AvgFee => self.avgfee,
            Field::AvgFeeRate => self.avgfeerate,
            Field::Txs => self.txs,
            Field::Ins => self.ins,
            Field::Outs => self.outs,
        }
    }
}

/// Reduce a block's per-transaction metrics.
///
/// A block with no metrics (coinbase only) reports zero for every fee and
/// feerate column. Counts are passed through untouched. Sums that overflow
/// fail the block.
pub fn aggregate(
    metrics: &[PerTxMetrics],
    counts: RawCounts,
    height: u64,
    time: u64,
    average: FeerateAverage,
) -> Result<PerBlockStats, ConsistencyError> {
    let mut stats = PerBlockStats {
        height,
        time,
        txs: counts.txs,
        ins: counts.ins,
        outs: counts.outs,
        ..Default::default()
    };

    let Some(first) = metrics.first() else {
        return Ok(stats);
    };

    let n = metrics.len() as u64;
    let mut minfee = first.fee;
    let mut maxfee = first.fee;
    let mut minfeerate = first.feerate;
    let mut maxfeerate = first.feerate;
    let mut totalfee: u64 = 0;
    let mut total_feerate: u64 = 0;
    let mut total_vsize: u64 = 0;

    for m in metrics {
        minfee = minfee.min(m.fee);
        maxfee = maxfee.max(m.fee);
        minfeerate = minfeerate.min(m.feerate);
        maxfeerate = maxfeerate.max(m.feerate);
        let overflow = || ConsistencyError::TotalsOverflow(height);
        totalfee = totalfee.checked_add(m.fee).ok_or_else(overflow)?;
        total_feerate = total_feerate.checked_add(m.feerate).ok_or_else(overflow)?;
        total_vsize = total_vsize.checked_add(m.vsize).ok_or_else(overflow)?;
    }

    stats.minfee = minfee;
    stats.maxfee = maxfee;
    stats.totalfee = totalfee;
    stats.avgfee = totalfee / n;
    stats.minfeerate = minfeerate;
    stats.maxfeerate = maxfeerate;
    stats.avgfeerate = match average {
        FeerateAverage::PerTransaction => total_feerate / n,
        FeerateAverage::Weighted => totalfee / total_vsize.max(1),
    };
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(txs: u64, ins: u64, outs: u64) -> RawCounts {
        RawCounts { txs, ins, outs }
    }

    #[test]
    fn test_empty_block_defaults_to_zero() {
        for average in [FeerateAverage::PerTransaction, FeerateAverage::Weighted] {
            let stats = aggregate(&[], counts(1, 1, 2), 101, 1_000, average).unwrap();
            assert_eq!(stats.height, 101);
            assert_eq!(stats.time, 1_000);
            assert_eq!(
                [stats.minfee, stats.maxfee, stats.totalfee, stats.avgfee],
                [0, 0, 0, 0]
            );
            assert_eq!([stats.minfeerate, stats.maxfeerate, stats.avgfeerate], [0, 0, 0]);
            assert_eq!((stats.txs, stats.ins, stats.outs), (1, 1, 2));
        }
    }

    #[test]
    fn test_single_transaction() {
        let m = [PerTxMetrics::new(38_660, 7_700)];
        let stats = aggregate(&m, counts(2, 2, 5), 102, 1_001, FeerateAverage::PerTransaction).unwrap();
        assert_eq!(stats.minfee, 38_660);
        assert_eq!(stats.maxfee, 38_660);
        assert_eq!(stats.totalfee, 38_660);
        assert_eq!(stats.avgfee, 38_660);
        assert_eq!(stats.minfeerate, 5);
        assert_eq!(stats.maxfeerate, 5);
        assert_eq!(stats.avgfeerate, 5);
        assert_eq!((stats.txs, stats.ins, stats.outs), (2, 2, 5));

        // one transaction: both averages agree
        let weighted = aggregate(&m, counts(2, 2, 5), 102, 1_001, FeerateAverage::Weighted).unwrap();
        assert_eq!(weighted, stats);
    }

    #[test]
    fn test_three_transactions() {
        let m = [
            PerTxMetrics::new(46_500, 9_300),
            PerTxMetrics::new(532_800, 7_104),
            PerTxMetrics::new(126_620, 25_121),
        ];
        assert_eq!(m.iter().map(|x| x.feerate).collect::<Vec<_>>(), vec![5, 75, 5]);

        let stats = aggregate(&m, counts(4, 104, 11), 103, 1_002, FeerateAverage::PerTransaction).unwrap();
        assert_eq!(stats.minfee, 46_500);
        assert_eq!(stats.maxfee, 532_800);
        assert_eq!(stats.totalfee, 705_920);
        assert_eq!(stats.avgfee, 235_306);
        assert_eq!(stats.minfeerate, 5);
        assert_eq!(stats.maxfeerate, 75);
        assert_eq!(stats.avgfeerate, (5 + 75 + 5) / 3);
        assert_eq!((stats.txs, stats.ins, stats.outs), (4, 104, 11));

        let weighted = aggregate(&m, counts(4, 104, 11), 103, 1_002, FeerateAverage::Weighted).unwrap();
        assert_eq!(weighted.avgfeerate, 16);
        assert_eq!(PerBlockStats { avgfeerate: stats.avgfeerate, ..weighted }, stats);
    }

    #[test]
    fn test_avgfee_rounds_down() {
        let m = [PerTxMetrics::new(1, 1), PerTxMetrics::new(2, 1)];
        let stats = aggregate(&m, counts(3, 3, 3), 1, 0, FeerateAverage::PerTransaction).unwrap();
        assert_eq!(stats.totalfee, 3);
        assert_eq!(stats.avgfee, 1);
        assert_eq!(stats.avgfeerate, 1);
    }

    #[test]
    fn test_zero_fee_transaction_lowers_minimum() {
        let m = [PerTxMetrics::new(0, 200), PerTxMetrics::new(4_000, 200)];
        let stats = aggregate(&m, counts(3, 3, 6), 9, 0, FeerateAverage::PerTransaction).unwrap();
        assert_eq!(stats.minfee, 0);
        assert_eq!(stats.minfeerate, 0);
        assert_eq!(stats.maxfeerate, 20);
        assert_eq!(stats.avgfeerate, 10);
    }

    #[test]
    fn test_fee_total_overflow_fails_block() {
        let m = [PerTxMetrics::new(u64::MAX, 1), PerTxMetrics::new(1, 1)];
        let err = aggregate(&m, counts(3, 3, 3), 42, 0, FeerateAverage::Weighted).unwrap_err();
        assert!(matches!(err, ConsistencyError::TotalsOverflow(42)));
    }

    #[test]
    fn test_get_matches_fields() {
        let stats = PerBlockStats { height: 1, time: 2, minfee: 3, outs: 12, ..Default::default() };
        assert_eq!(stats.get(Field::Height), 1);
        assert_eq!(stats.get(Field::Time), 2);
        assert_eq!(stats.get(Field::MinFee), 3);
        assert_eq!(stats.get(Field::Outs), 12);
    }

    #[test]
    fn test_parse_average() {
        assert_eq!("per-tx".parse::<FeerateAverage>().unwrap(), FeerateAverage::PerTransaction);
        assert_eq!("weighted".parse::<FeerateAverage>().unwrap(), FeerateAverage::Weighted);
        assert!("mean".parse::<FeerateAverage>().is_err());
        assert_eq!(FeerateAverage::default().to_string(), "per-tx");
    }
}
