//! Per-request deadline token. One `Deadline` is created at ingress and
//! propagated into every stage and external call; stages call
//! [`Deadline::checkpoint`] at their loop heads, external calls go through
//! [`Deadline::race`] so a pending call is abandoned the moment the budget
//! runs out.

use std::{
    future::Future,
    time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;

use crate::error::AppError;

#[derive(Clone)]
pub struct Deadline {
    started_at: Instant,
    budget: Duration,
    token: CancellationToken,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        Self {
            started_at: Instant::now(),
            budget,
            token: CancellationToken::new(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started_at.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled() || self.started_at.elapsed() >= self.budget
    }

    /// Cancel the token explicitly, e.g. when the caller gives up early.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cheap check for pure stages; errors once the budget is spent.
    pub fn checkpoint(&self) -> Result<(), AppError> {
        if self.is_expired() {
            self.token.cancel();
            return Err(AppError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Run `fut` unless the deadline expires first. On expiry the future is
    /// dropped, which aborts any in-flight request it owns.
    pub async fn race<F, T>(&self, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        if self.is_expired() {
            self.token.cancel();
            return Err(AppError::DeadlineExceeded);
        }

        tokio::select! {
            () = self.token.cancelled() => Err(AppError::DeadlineExceeded),
            () = tokio::time::sleep(self.remaining()) => {
                self.token.cancel();
                Err(AppError::DeadlineExceeded)
            }
            result = fut => result,
        }
    }
}
