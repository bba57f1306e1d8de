//! Bounded retry for readiness probes
//!
//! Runs a caller-supplied probe until it succeeds, the attempt budget runs out, an optional
//! wall-clock budget runs out, or the cancellation token fires. Knows nothing about containers.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const MAX_RETRY_ATTEMPTS: u32 = 20;

/// Delay to sleep after failed attempt number `attempt` (1-based).
pub trait Backoff: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedBackoff(pub Duration);

impl Backoff for FixedBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// Doubles from `initial` up to `max`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(2),
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub max_elapsed: Option<Duration>,
    pub backoff: Arc<dyn Backoff>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRY_ATTEMPTS,
            max_elapsed: None,
            backoff: Arc::new(ExponentialBackoff::default()),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("max_elapsed", &self.max_elapsed)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = Some(max_elapsed);
        self
    }

    pub fn with_backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32, last: Option<E> },
}

impl<E> RetryError<E> {
    /// The most recent probe failure, if any probe ran.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::Cancelled { last, .. } => last.as_ref(),
        }
    }

    pub fn into_last_error(self) -> Option<E> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::Cancelled { last, .. } => last,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::Cancelled { attempts, .. } => *attempts,
        }
    }
}

/// Run `probe` until it returns `Ok`.
///
/// The token is checked before every attempt and raced against every sleep, so cancellation is
/// observed within one probe's duration. A `max_attempts` of zero is treated as one.
pub async fn retry<T, E, F, Fut>(
    cancel: &CancellationToken,
    policy: &RetryPolicy,
    mut probe: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let started = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut last: Option<E> = None;
    let mut attempts = 0;

    while attempts < max_attempts {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled { attempts, last });
        }

        attempts += 1;
        match probe().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                debug!(attempt = attempts, max_attempts, error = %e, "Probe failed");
                last = Some(e);
            }
        }

        if attempts == max_attempts {
            break;
        }

        let mut delay = policy.backoff.delay(attempts);
        if let Some(max_elapsed) = policy.max_elapsed {
            let remaining = max_elapsed.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break;
            }
            delay = delay.min(remaining);
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(RetryError::Cancelled { attempts, last });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }

    match last {
        Some(last) => Err(RetryError::Exhausted { attempts, last }),
        None => Err(RetryError::Cancelled { attempts, last: None }),
    }
}
