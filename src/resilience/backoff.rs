//! Backoff delays with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::Backoff;

/// Delay before `attempt`, without jitter or cap.
///
/// `attempt` is the number of the attempt about to run (2 for the first retry).
pub fn base_delay_ms(strategy: Backoff, attempt: u32, base_ms: u64) -> u64 {
    match strategy {
        Backoff::Fixed => base_ms,
        Backoff::Linear => base_ms.saturating_mul(u64::from(attempt)),
        Backoff::Exponential => {
            let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
            base_ms.saturating_mul(factor)
        }
    }
}

/// Calculate the delay before `attempt`: strategy delay plus jitter in
/// `[0, max_jitter_ms]`, capped at `max_ms`.
pub fn calculate_backoff(strategy: Backoff, attempt: u32, base_ms: u64, max_ms: u64, max_jitter_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let delay_ms = base_delay_ms(strategy, attempt, base_ms);
    let jitter = if max_jitter_ms > 0 {
        rand::thread_rng().gen_range(0..=max_jitter_ms)
    } else {
        0
    };

    Duration::from_millis(delay_ms.saturating_add(jitter).min(max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategies() {
        assert_eq!(base_delay_ms(Backoff::Fixed, 4, 100), 100);
        assert_eq!(base_delay_ms(Backoff::Linear, 3, 100), 300);
        assert_eq!(base_delay_ms(Backoff::Exponential, 1, 100), 100);
        assert_eq!(base_delay_ms(Backoff::Exponential, 2, 100), 200);
        assert_eq!(base_delay_ms(Backoff::Exponential, 4, 100), 800);
    }

    #[test]
    fn test_exponential_before_second_attempt() {
        for _ in 0..50 {
            let delay = calculate_backoff(Backoff::Exponential, 2, 1000, 30_000, 100);
            assert!(delay >= Duration::from_millis(2000));
            assert!(delay <= Duration::from_millis(2100));
        }
    }

    #[test]
    fn test_cap_applies_after_jitter() {
        let max = calculate_backoff(Backoff::Exponential, 10, 100, 1000, 500);
        assert_eq!(max, Duration::from_millis(1000));
    }

    #[test]
    fn test_no_jitter() {
        assert_eq!(
            calculate_backoff(Backoff::Fixed, 3, 10, 1000, 0),
            Duration::from_millis(10)
        );
        assert_eq!(calculate_backoff(Backoff::Fixed, 0, 10, 1000, 0), Duration::ZERO);
    }

    #[test]
    fn test_huge_attempt_saturates() {
        let delay = calculate_backoff(Backoff::Exponential, 200, 1000, u64::MAX, 0);
        assert_eq!(delay, Duration::from_millis(u64::MAX));
    }
}
