//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Ceiling applied to any single retry delay.
pub const MAX_BACKOFF_MS: u64 = 30 * 60 * 1000;

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
/// jittered ±50%, capped at [`MAX_BACKOFF_MS`].
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let raw = base_ms.saturating_mul(1u64 << exp).min(MAX_BACKOFF_MS);
    let jitter_span = raw / 2;
    let jittered = if jitter_span == 0 {
        raw
    } else {
        let offset = rand::thread_rng().gen_range(0..=jitter_span * 2);
        raw - jitter_span + offset
    };
    Duration::from_millis(jittered.min(MAX_BACKOFF_MS))
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_exponentially() {
        // Jitter is ±50%, so attempt n's minimum exceeds attempt n-2's maximum.
        let a1 = backoff_delay(1000, 1).as_millis() as u64;
        let a3 = backoff_delay(1000, 3).as_millis() as u64;
        assert!((500..=1500).contains(&a1), "attempt 1 out of band: {}", a1);
        assert!((2000..=6000).contains(&a3), "attempt 3 out of band: {}", a3);
    }

    #[test]
    fn test_backoff_capped() {
        let d = backoff_delay(60_000, 20);
        assert!(d.as_millis() as u64 <= MAX_BACKOFF_MS);
    }

    #[test]
    fn test_zero_base() {
        assert_eq!(backoff_delay(0, 5), Duration::from_millis(0));
    }
}
