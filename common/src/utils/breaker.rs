//! Per-dependency circuit breaker. Process-wide scope is achieved by owning
//! one [`BreakerRegistry`] in the service core; nothing here is global.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use tracing::{info, warn};

use crate::error::AppError;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_millis(30_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed { consecutive_failures: u32 },
    Open { opened_at: Instant },
    HalfOpen,
}

pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            state: Mutex::new(BreakerState::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Admission check. An OPEN breaker fails fast; once the reset timeout
    /// has elapsed it lets a single probe through in HALF_OPEN.
    pub fn check(&self) -> Result<(), AppError> {
        let mut state = self.lock();
        match *state {
            BreakerState::Closed { .. } | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open { opened_at } => {
                let since_open = opened_at.elapsed();
                if since_open >= self.reset_timeout {
                    info!(dependency = %self.name, "circuit breaker half-open, probing");
                    *state = BreakerState::HalfOpen;
                    Ok(())
                } else {
                    Err(AppError::CircuitOpen {
                        dependency: self.name.clone(),
                        retry_after: self.reset_timeout.saturating_sub(since_open),
                    })
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        if matches!(*state, BreakerState::HalfOpen) {
            info!(dependency = %self.name, "circuit breaker closed after successful probe");
        }
        *state = BreakerState::Closed {
            consecutive_failures: 0,
        };
    }

    pub fn record_failure(&self) {
        let mut state = self.lock();
        match *state {
            BreakerState::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures.saturating_add(1);
                if failures >= self.failure_threshold {
                    warn!(
                        dependency = %self.name,
                        failures,
                        "circuit breaker opened"
                    );
                    *state = BreakerState::Open {
                        opened_at: Instant::now(),
                    };
                } else {
                    *state = BreakerState::Closed {
                        consecutive_failures: failures,
                    };
                }
            }
            BreakerState::HalfOpen => {
                warn!(dependency = %self.name, "circuit breaker re-opened after failed probe");
                *state = BreakerState::Open {
                    opened_at: Instant::now(),
                };
            }
            BreakerState::Open { .. } => {}
        }
    }

    /// Run `fut` under this breaker: fail fast when open, otherwise record
    /// the outcome. A `CircuitOpen` error never counts as a failure.
    pub async fn call<F, T>(&self, fut: F) -> Result<T, AppError>
    where
        F: std::future::Future<Output = Result<T, AppError>>,
    {
        self.check()?;
        match fut.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    pub fn state_label(&self) -> &'static str {
        match *self.lock() {
            BreakerState::Closed { .. } => "closed",
            BreakerState::Open { .. } => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Lazily built breakers keyed by dependency name, all sharing one
/// threshold/reset configuration.
pub struct BreakerRegistry {
    failure_threshold: u32,
    reset_timeout: Duration,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_RESET_TIMEOUT)
    }
}

impl BreakerRegistry {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self
            .breakers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(breakers.entry(name.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(
                name,
                self.failure_threshold,
                self.reset_timeout,
            ))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing() -> Result<(), AppError> {
        Err(AppError::Generator("ETIMEDOUT".into()))
    }

    #[tokio::test]
    async fn opens_after_threshold_and_fails_fast() {
        let breaker = CircuitBreaker::new("generator", 5, Duration::from_secs(30));

        for _ in 0..5 {
            let _ = breaker.call(async { failing() }).await;
        }
        assert_eq!(breaker.state_label(), "open");

        let result = breaker.call(async { Ok::<_, AppError>(()) }).await;
        match result {
            Err(AppError::CircuitOpen {
                dependency,
                retry_after,
            }) => {
                assert_eq!(dependency, "generator");
                assert!(retry_after <= Duration::from_secs(30));
            }
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn half_open_probe_closes_on_success() {
        let breaker = CircuitBreaker::new("embedder", 2, Duration::from_millis(10));
        for _ in 0..2 {
            let _ = breaker.call(async { failing() }).await;
        }
        assert_eq!(breaker.state_label(), "open");

        std::thread::sleep(Duration::from_millis(15));
        let result = breaker.call(async { Ok::<_, AppError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(breaker.state_label(), "closed");
    }

    #[tokio::test]
    async fn half_open_probe_reopens_on_failure() {
        let breaker = CircuitBreaker::new("embedder", 2, Duration::from_millis(10));
        for _ in 0..2 {
            let _ = breaker.call(async { failing() }).await;
        }
        std::thread::sleep(Duration::from_millis(15));

        let _ = breaker.call(async { failing() }).await;
        assert_eq!(breaker.state_label(), "open");

        // The reset timer restarted, so the next call still fails fast.
        assert!(matches!(
            breaker.check(),
            Err(AppError::CircuitOpen { .. })
        ));
    }

    #[tokio::test]
    async fn success_resets_consecutive_failures() {
        let breaker = CircuitBreaker::new("store", 3, Duration::from_secs(30));
        for _ in 0..2 {
            let _ = breaker.call(async { failing() }).await;
        }
        let _ = breaker.call(async { Ok::<_, AppError>(()) }).await;
        for _ in 0..2 {
            let _ = breaker.call(async { failing() }).await;
        }
        assert_eq!(breaker.state_label(), "closed");
    }

    #[test]
    fn registry_returns_same_breaker_per_name() {
        let registry = BreakerRegistry::default();
        let a = registry.get("generator");
        let b = registry.get("generator");
        assert!(Arc::ptr_eq(&a, &b));
        let c = registry.get("embedder");
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
