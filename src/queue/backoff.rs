//! Delay before the next execution cycle.

use std::time::Duration;

/// `max(retries × unit, retry_after_seconds)`. Zero means do not wait.
pub fn backoff_delay(retries: u32, unit: Duration, retry_after_seconds: Option<u64>) -> Duration {
    let on_retries = unit.saturating_mul(retries);
    let from_server = Duration::from_secs(retry_after_seconds.unwrap_or(0));
    let delay = on_retries.max(from_server);
    if delay < Duration::from_millis(1) {
        Duration::ZERO
    } else {
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_retries_no_hint() {
        assert_eq!(backoff_delay(0, Duration::from_secs(15), None), Duration::ZERO);
    }

    #[test]
    fn test_retries_scale_unit() {
        assert_eq!(
            backoff_delay(3, Duration::from_millis(1000), None),
            Duration::from_millis(3000)
        );
    }

    #[test]
    fn test_server_hint_wins_when_larger() {
        assert_eq!(
            backoff_delay(1, Duration::from_millis(1000), Some(10)),
            Duration::from_secs(10)
        );
        assert_eq!(
            backoff_delay(0, Duration::from_millis(1000), Some(2)),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_sub_millisecond_is_skipped() {
        assert_eq!(
            backoff_delay(1, Duration::from_micros(500), None),
            Duration::ZERO
        );
    }
}
