/// Blocks between difficulty raises, counting genesis
pub const DEFAULT_ADJUSTMENT_INTERVAL: u64 = 10;

/// Difficulty to use after an append
///
/// Raises `current` by one whenever the chain length (genesis included)
/// lands on a multiple of `interval`. No time or hash-rate retargeting.
pub fn next_difficulty(current: u32, chain_length: u64, interval: u64) -> u32 {
    if interval != 0 && chain_length != 0 && chain_length % interval == 0 {
        current.saturating_add(1)
    } else {
        current
    }
}
