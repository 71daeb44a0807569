//! Poll interval matrix: catalog tier × sync priority.

use chrono::Duration;

use mangatrack_core::{CatalogTier, SyncPriority};

/// How long after a poll the source is checked again. Tier C is polled
/// like everything else, just slowly — there is no tier-C-only fast path.
pub fn poll_interval(tier: CatalogTier, priority: SyncPriority) -> Duration {
    match (tier, priority) {
        (CatalogTier::A, SyncPriority::Hot) => Duration::minutes(30),
        (CatalogTier::A, SyncPriority::Warm) => Duration::minutes(45),
        (CatalogTier::A, SyncPriority::Cold) => Duration::minutes(60),
        (CatalogTier::B, SyncPriority::Hot) => Duration::hours(6),
        (CatalogTier::B, SyncPriority::Warm) => Duration::hours(9),
        (CatalogTier::B, SyncPriority::Cold) => Duration::hours(12),
        (CatalogTier::C, SyncPriority::Hot) => Duration::hours(48),
        (CatalogTier::C, SyncPriority::Warm) => Duration::hours(72),
        (CatalogTier::C, SyncPriority::Cold) => Duration::days(7),
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_matrix() {
        assert_eq!(poll_interval(CatalogTier::A, SyncPriority::Hot), Duration::minutes(30));
        assert_eq!(poll_interval(CatalogTier::A, SyncPriority::Cold), Duration::minutes(60));
        assert_eq!(poll_interval(CatalogTier::B, SyncPriority::Warm), Duration::hours(9));
        assert_eq!(poll_interval(CatalogTier::C, SyncPriority::Cold), Duration::days(7));
    }

    #[test]
    fn test_intervals_grow_with_tier_and_coldness() {
        for priority in [SyncPriority::Hot, SyncPriority::Warm, SyncPriority::Cold] {
            assert!(poll_interval(CatalogTier::A, priority) < poll_interval(CatalogTier::B, priority));
            assert!(poll_interval(CatalogTier::B, priority) < poll_interval(CatalogTier::C, priority));
        }
        for tier in [CatalogTier::A, CatalogTier::B, CatalogTier::C] {
            assert!(poll_interval(tier, SyncPriority::Hot) < poll_interval(tier, SyncPriority::Cold));
        }
    }
}
