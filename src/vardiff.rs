//! Adaptive per-miner share difficulty.
//!
//! Retargets each miner toward a desired share interval using a blend of
//! the window-average and an EMA of inter-share intervals, with bounded
//! step sizes, min/max clamps, a chain-difficulty headroom cap, and decay
//! on inactivity. Changes below 5% are suppressed to avoid difficulty
//! churn on the wire.

use std::collections::VecDeque;
use std::time::Instant;

use dashmap::DashMap;
use tracing::debug;

use crate::config::VardiffConfig;

const MAX_WINDOW_SHARES: usize = 120;
const MATERIAL_CHANGE: f64 = 0.05;

#[derive(Debug)]
struct MinerState {
    difficulty: f64,
    shares: VecDeque<f64>,
    first_share_at: Option<f64>,
    last_share_at: Option<f64>,
    last_retarget: f64,
    ema_interval: Option<f64>,
}

#[derive(Debug)]
pub struct VarDiff {
    config: VardiffConfig,
    miners: DashMap<String, MinerState>,
    started: Instant,
}

impl VarDiff {
    pub fn new(config: VardiffConfig) -> Self {
        Self {
            config,
            miners: DashMap::new(),
            started: Instant::now(),
        }
    }

    fn now(&self) -> f64 {
        // Monotonic seconds; only relative gaps matter here.
        self.started.elapsed().as_secs_f64()
    }

    fn fresh_state(&self, now: f64) -> MinerState {
        MinerState {
            difficulty: self.config.start_difficulty.max(self.config.min_difficulty),
            shares: VecDeque::with_capacity(MAX_WINDOW_SHARES),
            first_share_at: None,
            last_share_at: None,
            last_retarget: now,
            ema_interval: None,
        }
    }

    /// Current difficulty for a miner, applying inactivity decay.
    pub fn difficulty(&self, miner: &str) -> f64 {
        let now = self.now();
        let mut state = self
            .miners
            .entry(miner.to_string())
            .or_insert_with(|| self.fresh_state(now));

        if let Some(last) = state.last_share_at {
            let idle_cutoff = self
                .config
                .inactivity_lower
                .max(self.config.inactivity_multiples * self.config.target_share_time);
            if now - last > idle_cutoff && state.difficulty > self.config.min_difficulty {
                state.difficulty = (state.difficulty * self.config.inactivity_drop_factor)
                    .max(self.config.min_difficulty);
                state.last_retarget = now;
                state.shares.clear();
                state.first_share_at = None;
                debug!("vardiff idle drop for {}: {:.2}", miner, state.difficulty);
            }
        }

        state.difficulty
    }

    /// Record an accepted share; returns the new difficulty when a
    /// material retarget happened.
    pub fn record_share(&self, miner: &str, chain_difficulty: f64) -> Option<f64> {
        let now = self.now();
        let mut state = self
            .miners
            .entry(miner.to_string())
            .or_insert_with(|| self.fresh_state(now));

        if let Some(last) = state.last_share_at {
            let delta = now - last;
            state.ema_interval = Some(match state.ema_interval {
                Some(ema) => self.config.ema_alpha * delta + (1.0 - self.config.ema_alpha) * ema,
                None => delta,
            });
        }
        if state.first_share_at.is_none() {
            state.first_share_at = Some(now);
        }
        state.last_share_at = Some(now);
        state.shares.push_back(now);
        while state.shares.len() > MAX_WINDOW_SHARES {
            state.shares.pop_front();
            state.first_share_at = state.shares.front().copied();
        }

        self.maybe_retarget(miner, &mut state, now, chain_difficulty)
    }

    fn maybe_retarget(
        &self,
        miner: &str,
        state: &mut MinerState,
        now: f64,
        chain_difficulty: f64,
    ) -> Option<f64> {
        let count = state.shares.len();
        let elapsed = now - state.last_retarget;
        if count < 2 {
            return None;
        }
        if count < self.config.retarget_shares && elapsed < self.config.retarget_time {
            return None;
        }

        let first = *state.shares.front().expect("count >= 2");
        let last = *state.shares.back().expect("count >= 2");
        let window = last - first;
        if window <= 0.0 {
            return None;
        }

        let avg_interval = window / (count - 1) as f64;
        let blended = match state.ema_interval {
            Some(ema) => 0.5 * avg_interval + 0.5 * ema,
            None => avg_interval,
        };

        let ratio = self.config.target_share_time / blended;
        let stepped = ratio
            .clamp(self.config.down_step, self.config.up_step)
            * state.difficulty;
        let mut new_difficulty = stepped
            .clamp(self.config.min_difficulty, self.config.max_difficulty);

        // Never assign more work per share than the chain itself requires.
        if chain_difficulty.is_finite() && chain_difficulty > 0.0 {
            let cap = chain_difficulty * self.config.chain_headroom;
            if new_difficulty > cap {
                new_difficulty = cap;
            }
        }

        if (new_difficulty - state.difficulty).abs() / state.difficulty.max(1e-12)
            >= MATERIAL_CHANGE
        {
            debug!(
                "vardiff retarget for {}: {:.2} -> {:.2} (interval {:.1}s)",
                miner, state.difficulty, new_difficulty, blended
            );
            state.difficulty = new_difficulty;
            state.last_retarget = now;
            state.shares.clear();
            state.first_share_at = None;
            state.ema_interval = None;
            Some(new_difficulty)
        } else {
            None
        }
    }

    /// Periodic decay sweep for miners that stopped submitting entirely.
    pub fn tick(&self) {
        let now = self.now();
        for mut entry in self.miners.iter_mut() {
            let state = entry.value_mut();
            if state.shares.is_empty()
                && now - state.last_retarget > self.config.inactivity_lower
                && state.difficulty > self.config.min_difficulty
            {
                state.difficulty = (state.difficulty * self.config.inactivity_drop_factor)
                    .max(self.config.min_difficulty);
                state.last_retarget = now;
            }
        }
    }

    pub fn forget(&self, miner: &str) {
        self.miners.remove(miner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> VardiffConfig {
        VardiffConfig {
            enabled: true,
            target_share_time: 15.0,
            min_difficulty: 10.0,
            max_difficulty: 1_000_000.0,
            start_difficulty: 100.0,
            retarget_shares: 4,
            retarget_time: 300.0,
            up_step: 2.0,
            down_step: 0.5,
            ema_alpha: 0.3,
            inactivity_lower: 90.0,
            inactivity_multiples: 6.0,
            inactivity_drop_factor: 0.5,
            chain_headroom: 0.9,
        }
    }

    #[test]
    fn starts_at_configured_difficulty() {
        let vardiff = VarDiff::new(config());
        assert_eq!(vardiff.difficulty("w"), 100.0);
    }

    #[test]
    fn rapid_shares_raise_difficulty_with_bounded_step() {
        let vardiff = VarDiff::new(config());
        let mut update = None;
        for _ in 0..8 {
            std::thread::sleep(std::time::Duration::from_millis(2));
            if let Some(d) = vardiff.record_share("w", f64::INFINITY) {
                update = Some(d);
                break;
            }
        }
        // Shares arriving far faster than the 15 s target step up by at
        // most the configured factor.
        let new = update.expect("retarget after enough shares");
        assert!((new - 200.0).abs() < 1e-9);
    }

    #[test]
    fn chain_headroom_caps_difficulty() {
        let vardiff = VarDiff::new(config());
        let mut update = None;
        for _ in 0..8 {
            std::thread::sleep(std::time::Duration::from_millis(2));
            if let Some(d) = vardiff.record_share("w", 150.0) {
                update = Some(d);
                break;
            }
        }
        assert!((update.unwrap() - 135.0).abs() < 1e-9);
    }

    #[test]
    fn forget_resets_to_start() {
        let vardiff = VarDiff::new(config());
        for _ in 0..8 {
            std::thread::sleep(std::time::Duration::from_millis(2));
            vardiff.record_share("w", f64::INFINITY);
        }
        vardiff.forget("w");
        assert_eq!(vardiff.difficulty("w"), 100.0);
    }
}
