//! Failure-rate breaker for the cache read/write path.
//!
//! Counts backing-store outcomes in a fixed window. Once the failure rate
//! reaches the threshold the breaker opens and read/write calls skip the
//! backing store until the recovery timeout has passed. A bounded number of
//! trial calls then run half-open; the first success closes the breaker and
//! the first failure reopens it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use config::BreakerConfig;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::clock::Clock;
use crate::telemetry::CacheTelemetry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen
}

struct WindowCounts {
    successes: u64,
    failures: u64,
    window_start_ms: i64
}

impl WindowCounts {
    fn starting_at(now_ms: i64) -> Self {
        Self {
            successes: 0,
            failures: 0,
            window_start_ms: now_ms
        }
    }

    fn total(&self) -> u64 {
        self.successes + self.failures
    }

    fn failure_rate(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        (self.failures as f64 / self.total() as f64) * 100.0
    }

    fn restart(&mut self, now_ms: i64) {
        *self = Self::starting_at(now_ms);
    }
}

pub struct CacheCircuitBreaker {
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    state: RwLock<CircuitState>,
    window: RwLock<WindowCounts>,
    opened_at_ms: AtomicI64,
    half_open_requests: AtomicU64,
    is_open: AtomicBool,
    telemetry: Arc<CacheTelemetry>
}

impl CacheCircuitBreaker {
    pub fn new(config: BreakerConfig, clock: Arc<dyn Clock>, telemetry: Arc<CacheTelemetry>) -> Self {
        let now = clock.now_ms();
        Self {
            config,
            clock,
            state: RwLock::new(CircuitState::Closed),
            window: RwLock::new(WindowCounts::starting_at(now)),
            opened_at_ms: AtomicI64::new(0),
            half_open_requests: AtomicU64::new(0),
            is_open: AtomicBool::new(false),
            telemetry
        }
    }

    /// Whether a read/write call may reach the backing store.
    pub async fn is_allowed(&self) -> bool {
        let state = *self.state.read().await;
        match state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let recovery_ms = (self.config.recovery_timeout_secs as i64).saturating_mul(1000);
                let opened_at = self.opened_at_ms.load(Ordering::SeqCst);
                if self.clock.now_ms() >= opened_at.saturating_add(recovery_ms) {
                    self.transition_to_half_open().await;
                    self.take_half_open_slot()
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => self.take_half_open_slot()
        }
    }

    fn take_half_open_slot(&self) -> bool {
        let current = self.half_open_requests.fetch_add(1, Ordering::SeqCst);
        current < self.config.half_open_max_requests
    }

    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        match *state {
            CircuitState::Closed => {
                let mut window = self.current_window().await;
                window.successes += 1;
            }
            CircuitState::HalfOpen => {
                *state = CircuitState::Closed;
                self.is_open.store(false, Ordering::SeqCst);
                self.half_open_requests.store(0, Ordering::SeqCst);
                self.window.write().await.restart(self.clock.now_ms());
                self.telemetry.record_breaker_state(CircuitState::Closed);
                info!("Decision cache breaker closed after successful trial call");
            }
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self, operation: &str) {
        let mut state = self.state.write().await;
        match *state {
            CircuitState::Closed => {
                let mut window = self.current_window().await;
                window.failures += 1;

                if window.total() >= self.config.min_requests_in_window
                    && window.failure_rate() >= self.config.failure_threshold_percent
                {
                    let rate = window.failure_rate();
                    drop(window);
                    *state = CircuitState::Open;
                    self.open();
                    error!(
                        operation,
                        failure_rate = rate,
                        "Decision cache breaker OPENED, read/write path bypassed"
                    );
                }
            }
            CircuitState::HalfOpen => {
                *state = CircuitState::Open;
                self.half_open_requests.store(0, Ordering::SeqCst);
                self.open();
                error!(operation, "Decision cache breaker re-OPENED after failed trial call");
            }
            CircuitState::Open => {}
        }
    }

    fn open(&self) {
        self.opened_at_ms.store(self.clock.now_ms(), Ordering::SeqCst);
        self.is_open.store(true, Ordering::SeqCst);
        self.telemetry.record_breaker_state(CircuitState::Open);
    }

    async fn transition_to_half_open(&self) {
        let mut state = self.state.write().await;
        if *state == CircuitState::Open {
            *state = CircuitState::HalfOpen;
            self.half_open_requests.store(0, Ordering::SeqCst);
            self.telemetry.record_breaker_state(CircuitState::HalfOpen);
            info!("Decision cache breaker HALF-OPEN");
        }
    }

    /// Write guard on the counting window, restarted first if it has expired.
    async fn current_window(&self) -> tokio::sync::RwLockWriteGuard<'_, WindowCounts> {
        let now = self.clock.now_ms();
        let window_ms = (self.config.window_duration_secs as i64).saturating_mul(1000);
        let mut window = self.window.write().await;
        if now - window.window_start_ms >= window_ms {
            window.restart(now);
        }
        window
    }

    pub async fn state(&self) -> CircuitState {
        *self.state.read().await
    }

    pub fn is_open_fast(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    /// `(successes, failures, failure rate percent)` in the current window.
    pub async fn window_counts(&self) -> (u64, u64, f64) {
        let window = self.window.read().await;
        (window.successes, window.failures, window.failure_rate())
    }
}
