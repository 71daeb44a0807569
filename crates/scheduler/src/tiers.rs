//! Catalog tier evaluation and decay.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::debug;

use mangatrack_core::CatalogTier;
use mangatrack_store::series::{SeriesStore, TierInputRow};
use mangatrack_store::StoreResult;

const TIER_A_SCORE: f64 = 5000.0;
const TIER_A_FOLLOWS: i64 = 10;
const TIER_B_SCORE: f64 = 1000.0;
const TIER_B_FOLLOWS: i64 = 1;
const RECENT_CHAPTER_DAYS: i64 = 30;
const HARD_DEMOTION_DAYS: i64 = 90;
const WEEKLY_DECAY: f64 = 5.0;
const TIER_BATCH: i64 = 1000;

/// Pure tier evaluation.
pub fn evaluate_tier(
    current: CatalogTier,
    activity_score: f64,
    total_follows: i64,
    last_chapter_at: Option<DateTime<Utc>>,
    seeded: bool,
    now: DateTime<Utc>,
) -> (CatalogTier, &'static str) {
    let recent_chapter = last_chapter_at
        .map(|at| now - at < Duration::days(RECENT_CHAPTER_DAYS))
        .unwrap_or(false);

    let (mut tier, mut reason) = if recent_chapter {
        (CatalogTier::A, "recent_chapter")
    } else if activity_score >= TIER_A_SCORE {
        (CatalogTier::A, "activity_score")
    } else if total_follows >= TIER_A_FOLLOWS {
        (CatalogTier::A, "readers")
    } else if seeded {
        (CatalogTier::A, "seeded")
    } else if activity_score >= TIER_B_SCORE || total_follows >= TIER_B_FOLLOWS {
        (CatalogTier::B, "engaged")
    } else {
        (CatalogTier::C, "idle")
    };

    // Hard demotion: an unseeded tier-A series with no chapter in 90 days
    // drops to B regardless of score.
    if current == CatalogTier::A && tier == CatalogTier::A && !seeded {
        let inactive_90d = last_chapter_at
            .map(|at| now - at >= Duration::days(HARD_DEMOTION_DAYS))
            .unwrap_or(true);
        if inactive_90d {
            tier = CatalogTier::B;
            reason = "hard_demotion_90d";
        }
    }

    (tier, reason)
}

/// Scheduler sub-task: decay idle scores, then re-evaluate a batch.
pub async fn run_tier_maintenance(pool: &PgPool) -> StoreResult<u64> {
    SeriesStore::decay_idle_scores(pool, WEEKLY_DECAY).await?;

    let batch = SeriesStore::tier_refresh_batch(pool, TIER_BATCH).await?;
    let now = Utc::now();
    let mut changed = 0u64;
    for row in batch {
        let TierInputRow { id, catalog_tier, activity_score, total_follows, last_chapter_at, seeded } =
            row;
        let current: CatalogTier = catalog_tier.parse().unwrap_or(CatalogTier::C);
        let (next, reason) =
            evaluate_tier(current, activity_score, total_follows, last_chapter_at, seeded, now);
        if next != current {
            SeriesStore::set_tier(pool, id, next, reason).await?;
            debug!(series_id = %id, from = current.as_str(), to = next.as_str(), reason, "tier changed");
            changed += 1;
        }
    }
    Ok(changed)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn days_ago(n: i64) -> Option<DateTime<Utc>> {
        Some(Utc::now() - Duration::days(n))
    }

    #[test]
    fn test_recent_chapter_is_tier_a() {
        let (tier, reason) =
            evaluate_tier(CatalogTier::C, 0.0, 0, days_ago(3), false, Utc::now());
        assert_eq!(tier, CatalogTier::A);
        assert_eq!(reason, "recent_chapter");
    }

    #[test]
    fn test_score_thresholds() {
        let now = Utc::now();
        assert_eq!(
            evaluate_tier(CatalogTier::C, 5000.0, 0, None, false, now).0,
            CatalogTier::A
        );
        assert_eq!(
            evaluate_tier(CatalogTier::C, 1000.0, 0, None, false, now).0,
            CatalogTier::B
        );
        assert_eq!(
            evaluate_tier(CatalogTier::C, 999.0, 0, None, false, now).0,
            CatalogTier::C
        );
    }

    #[test]
    fn test_follower_thresholds() {
        let now = Utc::now();
        assert_eq!(
            evaluate_tier(CatalogTier::C, 0.0, 10, None, false, now).0,
            CatalogTier::A
        );
        assert_eq!(
            evaluate_tier(CatalogTier::C, 0.0, 1, None, false, now).0,
            CatalogTier::B
        );
        assert_eq!(
            evaluate_tier(CatalogTier::C, 0.0, 0, None, false, now).0,
            CatalogTier::C
        );
    }

    #[test]
    fn test_seed_list_keeps_tier_a() {
        let (tier, reason) =
            evaluate_tier(CatalogTier::A, 0.0, 0, days_ago(400), true, Utc::now());
        assert_eq!(tier, CatalogTier::A);
        assert_eq!(reason, "seeded");
    }

    #[test]
    fn test_hard_demotion_after_90_days() {
        // Still qualifies for A on followers, but 90 days idle and unseeded.
        let (tier, reason) =
            evaluate_tier(CatalogTier::A, 9000.0, 50, days_ago(120), false, Utc::now());
        assert_eq!(tier, CatalogTier::B);
        assert_eq!(reason, "hard_demotion_90d");
    }

    #[test]
    fn test_hard_demotion_only_applies_to_current_a() {
        // A tier-C series with high score climbs to A even when old.
        let (tier, _) =
            evaluate_tier(CatalogTier::C, 9000.0, 0, days_ago(120), false, Utc::now());
        assert_eq!(tier, CatalogTier::A);
    }
}
