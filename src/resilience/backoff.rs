//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::resilience::context::RetryContext;

/// Delay before the retry that follows failed attempt `attempt` (1-based), without jitter.
///
/// Exponential: `min(base * 2^(attempt-1), max)`. Fixed: `base`.
pub fn base_backoff(attempt: u32, ctx: &RetryContext) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let base_ms = duration_ms(ctx.base_delay);
    if !ctx.exponential {
        return Duration::from_millis(base_ms);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    Duration::from_millis(delay_ms.min(duration_ms(ctx.max_delay)))
}

/// Full retry delay: base backoff plus up to 10% jitter, extended to any pending
/// provider cooldown.
pub fn calculate_backoff(attempt: u32, ctx: &RetryContext) -> Duration {
    let raw = base_backoff(attempt, ctx);
    let delay = raw + jitter(raw);

    match ctx.rate_limit_reset_at {
        Some(reset_at) => {
            let now = Instant::now();
            if reset_at > now {
                delay.max(reset_at - now)
            } else {
                delay
            }
        }
        None => delay,
    }
}

fn jitter(raw: Duration) -> Duration {
    let range = duration_ms(raw) / 10;
    if range == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=range))
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
