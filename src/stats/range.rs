use super::error::{RangeBound, StatsError};

/// A validated, inclusive height interval with `1 <= start <= end <= tip`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeightRange {
    pub start: u64,
    pub end: u64,
}

impl HeightRange {
    /// Number of blocks covered
    pub fn block_count(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    /// Heights from `end` down to `start`
    pub fn descending(&self) -> impl Iterator<Item = u64> {
        (self.start..=self.end).rev()
    }
}

/// Validate a requested interval against the chain height.
///
/// Heights arrive signed so that negative requests are rejected here rather
/// than during decoding. An absent `end` selects the single block `start`.
pub fn resolve(start: i64, end: Option<i64>, chain_height: u64) -> Result<HeightRange, StatsError> {
    let start = match u64::try_from(start) {
        Ok(s) if s >= 1 && s <= chain_height => s,
        _ => return Err(StatsError::Range(RangeBound::Start)),
    };

    let end = match end {
        None => start,
        Some(e) => match u64::try_from(e) {
            Ok(e) if e >= start && e <= chain_height => e,
            _ => return Err(StatsError::Range(RangeBound::End)),
        },
    };

    Ok(HeightRange { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound(r: Result<HeightRange, StatsError>) -> Option<RangeBound> {
        match r {
            Err(StatsError::Range(b)) => Some(b),
            _ => None,
        }
    }

    #[test]
    fn test_valid_range() {
        let r = resolve(101, Some(103), 103).unwrap();
        assert_eq!(r, HeightRange { start: 101, end: 103 });
        assert_eq!(r.block_count(), 3);
        assert_eq!(r.descending().collect::<Vec<_>>(), vec![103, 102, 101]);
    }

    #[test]
    fn test_end_defaults_to_start() {
        let r = resolve(7, None, 10).unwrap();
        assert_eq!(r, HeightRange { start: 7, end: 7 });
        assert_eq!(r.block_count(), 1);
    }

    #[test]
    fn test_start_out_of_range() {
        assert_eq!(bound(resolve(-1, None, 103)), Some(RangeBound::Start));
        assert_eq!(bound(resolve(0, None, 103)), Some(RangeBound::Start));
        assert_eq!(bound(resolve(104, None, 103)), Some(RangeBound::Start));
        assert_eq!(bound(resolve(i64::MIN, Some(1), 103)), Some(RangeBound::Start));
    }

    #[test]
    fn test_start_checked_before_end() {
        assert_eq!(bound(resolve(0, Some(1_000), 103)), Some(RangeBound::Start));
    }

    #[test]
    fn test_end_out_of_range() {
        assert_eq!(bound(resolve(1, Some(104), 103)), Some(RangeBound::End));
        assert_eq!(bound(resolve(50, Some(49), 103)), Some(RangeBound::End));
        assert_eq!(bound(resolve(50, Some(-3), 103)), Some(RangeBound::End));
    }

    #[test]
    fn test_empty_chain_rejects_everything() {
        assert_eq!(bound(resolve(1, None, 0)), Some(RangeBound::Start));
    }

    #[test]
    fn test_full_chain() {
        let r = resolve(1, Some(103), 103).unwrap();
        assert_eq!(r.block_count(), 103);
    }
}
