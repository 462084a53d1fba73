//! Exponential-backoff-with-jitter wrapper around a fallible factory.
//!
//! Generalized to any `Err` that can report whether it is worth retrying
//! via [`crate::error::Retryable`].

use std::time::Duration;

use rand::Rng;

use crate::error::Retryable;

#[derive(Debug, Clone, Copy)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: Option<u64>,
    pub jitter: bool,
}

impl RetryOptions {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms: None,
            jitter: true,
        }
    }

    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = Some(max_delay_ms);
        self
    }
}

/// Delay for zero-indexed attempt `n`: `min(base * 2^n, max)`, then
/// multiplied by a uniform jitter factor in `[0.75, 1.25)` when enabled,
/// floored at 1ms.
fn delay_for_attempt(opts: &RetryOptions, attempt: u32) -> Duration {
    let exp = opts.base_delay_ms.saturating_mul(1u64 << attempt.min(32));
    let capped = match opts.max_delay_ms {
        Some(max) => exp.min(max),
        None => exp,
    };

    let millis = if opts.jitter {
        let factor = rand::thread_rng().gen_range(0.75..1.25);
        ((capped as f64) * factor).max(1.0) as u64
    } else {
        capped.max(1)
    };

    Duration::from_millis(millis)
}

/// Re-invokes `factory` on retryable failures until it succeeds, a
/// non-retryable error is returned, or `max_retries` attempts are
/// exhausted. Cancellation is not handled here; wrap the factory if the
/// caller needs it to observe cancellation mid-retry.
pub fn retry_backoff<T, E, F>(opts: RetryOptions, mut factory: F) -> Result<T, E>
where
    F: FnMut(u32) -> Result<T, E>,
    E: Retryable,
{
    let mut attempt: u32 = 0;
    loop {
        match factory(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() || attempt >= opts.max_retries {
                    return Err(err);
                }
                std::thread::sleep(delay_for_attempt(&opts, attempt));
                attempt += 1;
            }
        }
    }
}
