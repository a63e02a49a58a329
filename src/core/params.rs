//! Chain parameters used by the block store and the regtest builder.

/// Base unit denomination (satoshi-equivalent)
pub const COIN: u64 = 100_000_000;

/// Initial block reward: 50 coins
pub const INITIAL_BLOCK_REWARD: u64 = 50 * COIN;

/// Halving interval in blocks (regtest uses a short interval)
pub const HALVING_INTERVAL: u64 = 150;

/// Community fund percentage of block reward (5%)
pub const COMMUNITY_FUND_PERCENT: u64 = 5;

/// Genesis block timestamp (2025-01-01 00:00:00 UTC)
pub const GENESIS_TIMESTAMP: u64 = 1735689600;

/// Block header version written by this store
pub const BLOCK_VERSION: u32 = 1;

/// Witness bytes are discounted by this factor when computing weight.
///
///   weight = base_size * (WITNESS_SCALE_FACTOR - 1) + total_size
///   vsize  = ceil(weight / WITNESS_SCALE_FACTOR)
pub const WITNESS_SCALE_FACTOR: u64 = 4;

/// Previous-output index carried by the coinbase placeholder input
pub const COINBASE_VOUT: u32 = 0xFFFF_FFFF;

/// Calculate block reward at a given height
pub fn block_reward(height: u64) -> u64 {
    let halvings = height / HALVING_INTERVAL;
    if halvings >= 64 {
        return 0;
    }
    INITIAL_BLOCK_REWARD >> halvings
}

/// Calculate the community fund amount for a given block reward
pub fn community_fund_amount(reward: u64) -> u64 {
    reward * COMMUNITY_FUND_PERCENT / 100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_reward() {
        assert_eq!(block_reward(0), 50 * COIN);
    }

    #[test]
    fn test_first_halving() {
        assert_eq!(block_reward(HALVING_INTERVAL), 25 * COIN);
    }

    #[test]
    fn test_eventual_zero_reward() {
        assert_eq!(block_reward(HALVING_INTERVAL * 64), 0);
    }

    #[test]
    fn test_community_fund() {
        let reward = block_reward(0);
        assert_eq!(community_fund_amount(reward), 2 * COIN + COIN / 2);
    }
}
