//! Share-based hashrate estimation.
//!
//! Each accepted share represents `difficulty * 2^32` expected hashes. The
//! tracker keeps a sliding window per worker plus an exponentially
//! smoothed estimate for stable display values.

use std::time::{Duration, Instant};

use dashmap::DashMap;

const WINDOW: Duration = Duration::from_secs(300);
const EMA_HALF_LIFE: f64 = 120.0;
// Guards against absurd estimates from one or two early shares.
const MIN_SPAN_SECS: f64 = 10.0;

#[derive(Debug, Clone)]
struct WorkerWindow {
    shares: Vec<(Instant, f64, bool)>,
    ema: f64,
    ema_at: Instant,
}

#[derive(Debug, Default)]
pub struct HashrateTracker {
    workers: DashMap<String, WorkerWindow>,
}

impl HashrateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_share(&self, worker: &str, difficulty: f64, accepted: bool) {
        let now = Instant::now();
        let mut entry = self
            .workers
            .entry(worker.to_string())
            .or_insert_with(|| WorkerWindow {
                shares: Vec::new(),
                ema: 0.0,
                ema_at: now,
            });

        entry.shares.push((now, difficulty, accepted));
        entry
            .shares
            .retain(|(at, _, _)| now.duration_since(*at) <= WINDOW);

        let instant = Self::instant_rate(&entry.shares, now);
        let dt = now.duration_since(entry.ema_at).as_secs_f64();
        let alpha = 1.0 - (-dt / EMA_HALF_LIFE).exp();
        entry.ema = alpha * instant + (1.0 - alpha) * entry.ema;
        // Clamp a runaway smoothed value back toward observation.
        if instant > 0.0 && entry.ema > instant * 64.0 {
            entry.ema = instant;
        }
        entry.ema_at = now;
    }

    pub fn remove_worker(&self, worker: &str) {
        self.workers.remove(worker);
    }

    /// Smoothed hashrate in H/s.
    pub fn hashrate(&self, worker: &str) -> f64 {
        match self.workers.get(worker) {
            Some(entry) => {
                if entry.ema > 0.0 {
                    entry.ema
                } else {
                    Self::instant_rate(&entry.shares, Instant::now())
                }
            }
            None => 0.0,
        }
    }

    /// Human display, e.g. "12.34 MH/s".
    pub fn display(&self, worker: &str) -> String {
        let rate = self.hashrate(worker);
        if rate >= 1e9 {
            format!("{:.2} GH/s", rate / 1e9)
        } else if rate >= 1e6 {
            format!("{:.2} MH/s", rate / 1e6)
        } else if rate >= 1e3 {
            format!("{:.2} KH/s", rate / 1e3)
        } else {
            format!("{rate:.2} H/s")
        }
    }

    fn instant_rate(shares: &[(Instant, f64, bool)], now: Instant) -> f64 {
        let accepted: Vec<_> = shares.iter().filter(|(_, _, ok)| *ok).collect();
        let Some(oldest) = accepted.iter().map(|(at, _, _)| *at).min() else {
            return 0.0;
        };
        let span = now.duration_since(oldest).as_secs_f64().max(MIN_SPAN_SECS);
        let total_difficulty: f64 = accepted.iter().map(|(_, d, _)| d).sum();
        total_difficulty * 2f64.powi(32) / span
    }
}
