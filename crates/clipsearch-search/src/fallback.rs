//! Degradation controller for the embedding path
//!
//! Tracks recent embedding outcomes in a sliding time window and flips
//! between two states:
//!
//! - `Normal`: every query attempts the vector path.
//! - `Degraded`: queries skip embedding entirely and return lexical-only
//!   results; after a cooldown, one request in N is let through as a probe,
//!   and an unbroken run of successful probes heals the controller. A
//!   failed probe restarts both the run and the cooldown.
//!
//! State reads are lock-free so the orchestrator can check it on every query
//! without contention.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::metrics::SearchMetrics;

/// Health of the embedding path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Normal,
    Degraded,
}

const STATE_NORMAL: u8 = 0;
const STATE_DEGRADED: u8 = 1;

/// Thresholds for tripping and healing.
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// Sliding window over which outcomes are counted
    pub window: Duration,
    /// Minimum samples in the window before the failure rate is trusted
    pub min_samples: usize,
    /// Failure fraction at or above which the controller degrades
    pub failure_rate_threshold: f64,
    /// p95 latency at or above which the controller degrades
    pub p95_latency_threshold: Duration,
    /// Time to stay fully degraded before probing resumes
    pub cooldown: Duration,
    /// After cooldown, let one request in this many through as a probe
    pub probe_one_in: u64,
    /// Consecutive successful probes required before healing
    pub probe_successes: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            min_samples: 10,
            failure_rate_threshold: 0.5,
            p95_latency_threshold: Duration::from_secs(2),
            cooldown: Duration::from_secs(30),
            probe_one_in: 5,
            probe_successes: 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    latency: Duration,
    ok: bool,
}

/// Sliding-window failure tracker with probe-based healing.
pub struct FallbackController {
    config: FallbackConfig,
    state: AtomicU8,
    samples: Mutex<VecDeque<Sample>>,
    degraded_since: Mutex<Option<Instant>>,
    probe_counter: AtomicU64,
    probe_streak: AtomicU64,
    metrics: Arc<SearchMetrics>,
}

impl FallbackController {
    pub fn new(config: FallbackConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(STATE_NORMAL),
            samples: Mutex::new(VecDeque::new()),
            degraded_since: Mutex::new(None),
            probe_counter: AtomicU64::new(0),
            probe_streak: AtomicU64::new(0),
            metrics: Arc::new(SearchMetrics::new()),
        }
    }

    /// Report state transitions to a shared metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<SearchMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Current state. Lock-free.
    pub fn state(&self) -> HealthState {
        match self.state.load(Ordering::Acquire) {
            STATE_DEGRADED => HealthState::Degraded,
            _ => HealthState::Normal,
        }
    }

    /// Whether the next request should attempt the embedding path.
    ///
    /// Normal state always attempts. Degraded state refuses until the
    /// cooldown has elapsed, then admits every Nth caller as a probe.
    pub fn should_attempt(&self) -> bool {
        if self.state() == HealthState::Normal {
            return true;
        }

        let cooled_down = match *self.degraded_since.lock() {
            Some(since) => since.elapsed() >= self.config.cooldown,
            None => true,
        };
        if !cooled_down {
            return false;
        }

        let n = self.probe_counter.fetch_add(1, Ordering::AcqRel);
        n % self.config.probe_one_in.max(1) == 0
    }

    /// Record a successful embedding round trip.
    pub fn record_success(&self, latency: Duration) {
        self.push_sample(Sample {
            at: Instant::now(),
            latency,
            ok: true,
        });

        if self.state() == HealthState::Degraded {
            let streak = self.probe_streak.fetch_add(1, Ordering::AcqRel) + 1;
            if streak < self.config.probe_successes.max(1) {
                return;
            }
            // Enough probes made it through: heal and start fresh
            self.state.store(STATE_NORMAL, Ordering::Release);
            *self.degraded_since.lock() = None;
            self.samples.lock().clear();
            self.probe_streak.store(0, Ordering::Release);
            self.metrics.record_fallback_transition();
            info!(probes = streak, "embedding path healed, resuming hybrid search");
        } else {
            self.evaluate();
        }
    }

    /// Record a failed or timed-out embedding round trip.
    pub fn record_failure(&self, latency: Duration) {
        self.push_sample(Sample {
            at: Instant::now(),
            latency,
            ok: false,
        });

        if self.state() == HealthState::Degraded {
            // Failed probe: restart the cooldown and the success run
            *self.degraded_since.lock() = Some(Instant::now());
            self.probe_streak.store(0, Ordering::Release);
        } else {
            self.evaluate();
        }
    }

    /// Failure fraction over the current window, if enough samples exist.
    pub fn failure_rate(&self) -> Option<f64> {
        let samples = self.samples.lock();
        if samples.len() < self.config.min_samples {
            return None;
        }
        let failures = samples.iter().filter(|s| !s.ok).count();
        Some(failures as f64 / samples.len() as f64)
    }

    fn push_sample(&self, sample: Sample) {
        let mut samples = self.samples.lock();
        samples.push_back(sample);
        let horizon = self.config.window;
        while let Some(front) = samples.front() {
            if front.at.elapsed() > horizon {
                samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn evaluate(&self) {
        let (rate, p95, count) = {
            let samples = self.samples.lock();
            if samples.len() < self.config.min_samples {
                return;
            }
            let failures = samples.iter().filter(|s| !s.ok).count();
            let rate = failures as f64 / samples.len() as f64;

            let mut latencies: Vec<Duration> = samples.iter().map(|s| s.latency).collect();
            latencies.sort_unstable();
            let idx = ((latencies.len() as f64 * 0.95).ceil() as usize)
                .saturating_sub(1)
                .min(latencies.len() - 1);
            (rate, latencies[idx], samples.len())
        };

        let too_many_failures = rate >= self.config.failure_rate_threshold;
        let too_slow = p95 >= self.config.p95_latency_threshold;

        if too_many_failures || too_slow {
            self.state.store(STATE_DEGRADED, Ordering::Release);
            *self.degraded_since.lock() = Some(Instant::now());
            self.probe_counter.store(0, Ordering::Release);
            self.probe_streak.store(0, Ordering::Release);
            self.metrics.record_fallback_transition();
            warn!(
                failure_rate = rate,
                p95_ms = p95.as_millis() as u64,
                samples = count,
                "embedding path degraded, serving lexical-only results"
            );
        }
    }
}

impl Default for FallbackController {
    fn default() -> Self {
        Self::new(FallbackConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> Duration {
        Duration::from_millis(10)
    }

    fn test_config() -> FallbackConfig {
        FallbackConfig {
            window: Duration::from_secs(60),
            min_samples: 4,
            failure_rate_threshold: 0.5,
            p95_latency_threshold: Duration::from_secs(2),
            cooldown: Duration::from_millis(0),
            probe_one_in: 3,
            probe_successes: 2,
        }
    }

    #[test]
    fn starts_normal_and_attempts() {
        let controller = FallbackController::default();
        assert_eq!(controller.state(), HealthState::Normal);
        assert!(controller.should_attempt());
    }

    #[test]
    fn failure_rate_trips_degraded() {
        let controller = FallbackController::new(test_config());
        controller.record_success(fast());
        controller.record_failure(fast());
        controller.record_failure(fast());
        assert_eq!(controller.state(), HealthState::Normal); // below min samples

        controller.record_failure(fast());
        assert_eq!(controller.state(), HealthState::Degraded);
    }

    #[test]
    fn slow_p95_trips_degraded_without_failures() {
        let controller = FallbackController::new(test_config());
        for _ in 0..3 {
            controller.record_success(fast());
        }
        controller.record_success(Duration::from_secs(3));
        assert_eq!(controller.state(), HealthState::Degraded);
    }

    #[test]
    fn degraded_admits_one_probe_in_n() {
        let controller = FallbackController::new(test_config());
        for _ in 0..4 {
            controller.record_failure(fast());
        }
        assert_eq!(controller.state(), HealthState::Degraded);

        let admitted: Vec<bool> = (0..6).map(|_| controller.should_attempt()).collect();
        assert_eq!(admitted, vec![true, false, false, true, false, false]);
    }

    #[test]
    fn cooldown_blocks_probes() {
        let mut config = test_config();
        config.cooldown = Duration::from_secs(3600);
        let controller = FallbackController::new(config);
        for _ in 0..4 {
            controller.record_failure(fast());
        }

        assert_eq!(controller.state(), HealthState::Degraded);
        assert!(!controller.should_attempt());
    }

    #[test]
    fn one_good_probe_is_not_enough_to_heal() {
        let controller = FallbackController::new(test_config());
        for _ in 0..4 {
            controller.record_failure(fast());
        }
        assert_eq!(controller.state(), HealthState::Degraded);

        controller.record_success(fast());
        assert_eq!(controller.state(), HealthState::Degraded);
    }

    #[test]
    fn a_healthy_probe_run_heals() {
        let controller = FallbackController::new(test_config());
        for _ in 0..4 {
            controller.record_failure(fast());
        }
        assert_eq!(controller.state(), HealthState::Degraded);

        controller.record_success(fast());
        controller.record_success(fast());
        assert_eq!(controller.state(), HealthState::Normal);
        assert!(controller.should_attempt());
        // Window restarts: old failures must not re-trip
        assert!(controller.failure_rate().is_none());
    }

    #[test]
    fn failed_probe_resets_the_run() {
        let controller = FallbackController::new(test_config());
        for _ in 0..4 {
            controller.record_failure(fast());
        }

        controller.record_success(fast());
        controller.record_failure(fast());
        controller.record_success(fast());
        assert_eq!(controller.state(), HealthState::Degraded);

        controller.record_success(fast());
        assert_eq!(controller.state(), HealthState::Normal);
    }

    #[test]
    fn transitions_are_counted() {
        let metrics = Arc::new(SearchMetrics::new());
        let controller =
            FallbackController::new(test_config()).with_metrics(Arc::clone(&metrics));
        for _ in 0..4 {
            controller.record_failure(fast());
        }
        controller.record_success(fast());
        controller.record_success(fast());

        // One trip plus one heal
        assert_eq!(metrics.snapshot().fallback_transitions, 2);
    }

    #[test]
    fn failed_probe_stays_degraded() {
        let controller = FallbackController::new(test_config());
        for _ in 0..4 {
            controller.record_failure(fast());
        }

        controller.record_failure(fast());
        assert_eq!(controller.state(), HealthState::Degraded);
    }
}
