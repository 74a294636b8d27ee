//! Difficulty retargeting.
//!
//! The schedule is a pure function of the committed chain, so every node
//! derives the same expected difficulty for the next block. Difficulty is
//! measured in bits: the implied target is `MAX_TARGET >> bits` and block
//! validity requires the hash to be numerically below that target.

use crate::config::ConsensusConfig;
use crate::types::Chain;
use crate::{MAX_TARGET, U256};
use bigdecimal::BigDecimal;
use tracing::debug;

pub fn target_for_difficulty(bits: u32) -> U256 {
    MAX_TARGET >> bits.min(255)
}

/// Chain-selection weight of one block: `2^(256 - target_bits)`, i.e. the
/// expected number of hash attempts at this difficulty.
pub fn work_for_difficulty(bits: u32) -> U256 {
    U256::one() << bits.min(255)
}

/// Difficulty the retarget schedule requires for the block that would be
/// appended at the current tip.
///
/// Starting from the configured baseline, replay every completed retarget
/// window: after each `adjustment_interval` blocks, compare the window's
/// actual span against the ideal span and step the difficulty. Disabled
/// adjustment always yields the baseline.
pub fn expected_difficulty(chain: &Chain, cfg: &ConsensusConfig) -> u32 {
    if !cfg.adjustment_enabled {
        return cfg.difficulty;
    }
    let interval = cfg.adjustment_interval as usize;
    let mut current = cfg.difficulty;
    let mut boundary = interval;
    while boundary <= chain.len() {
        let window_start = chain
            .get((boundary - interval) as u64)
            .expect("BUG: boundary inside chain");
        let window_end = chain
            .get((boundary - 1) as u64)
            .expect("BUG: boundary inside chain");
        let span = (window_end.header.timestamp - window_start.header.timestamp).num_seconds();
        current = adjust_step(current, span, cfg);
        boundary += interval;
    }
    current
}

/// One retarget step: `ratio = actual_span / ideal_span`, clamped to
/// `[1/4, 4]`; fast windows raise difficulty, slow windows lower it.
pub(crate) fn adjust_step(current: u32, actual_span_secs: i64, cfg: &ConsensusConfig) -> u32 {
    let ideal_secs = (cfg.adjustment_interval * cfg.target_block_time) as i64;
    let ratio = BigDecimal::from(actual_span_secs.max(0)) / BigDecimal::from(ideal_secs);

    let quarter = BigDecimal::from(1) / BigDecimal::from(4);
    let four = BigDecimal::from(4);
    let ratio = ratio.clamp(quarter, four);

    let half = BigDecimal::from(1) / BigDecimal::from(2);
    let three_quarters = BigDecimal::from(3) / BigDecimal::from(4);
    let three_halves = BigDecimal::from(3) / BigDecimal::from(2);
    let two = BigDecimal::from(2);

    let next = if ratio < half {
        current.saturating_add(cfg.max_difficulty_change)
    } else if ratio < three_quarters {
        current.saturating_add(1)
    } else if ratio > two {
        current.saturating_sub(cfg.max_difficulty_change)
    } else if ratio > three_halves {
        current.saturating_sub(1)
    } else {
        current
    };

    let clamped = next.clamp(cfg.min_difficulty, cfg.max_difficulty);
    if clamped != current {
        debug!(
            from = current,
            to = clamped,
            span_secs = actual_span_secs,
            "difficulty retarget"
        );
    }
    clamped
}
