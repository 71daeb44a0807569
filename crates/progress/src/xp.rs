//! Gamification math: XP, levels, streaks, seasons.

use chrono::{DateTime, Datelike, Utc};

/// Base XP per chapter advancement. No bulk multipliers.
pub const XP_PER_CHAPTER: i64 = 1;

/// One-time XP when an entry is first marked completed.
pub const XP_SERIES_COMPLETED: i64 = 50;

/// Streak bonus is additive and capped.
pub const STREAK_BONUS_CAP: i64 = 10;

pub fn streak_bonus(streak_days: i32) -> i64 {
    (streak_days.max(0) as i64).min(STREAK_BONUS_CAP)
}

/// Level curve: level n requires 100·(n−1)² XP.
pub fn level_for_xp(xp: i64) -> i32 {
    ((xp.max(0) as f64) / 100.0).sqrt() as i32 + 1
}

/// Streak advancement on a new read: same UTC day keeps the streak,
/// consecutive days extend it, anything longer resets to 1.
pub fn advance_streak(
    current_streak: i32,
    last_read_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> i32 {
    let Some(last) = last_read_at else {
        return 1;
    };
    let last_day = last.date_naive();
    let today = now.date_naive();
    if last_day == today {
        current_streak.max(1)
    } else if (today - last_day).num_days() == 1 {
        current_streak + 1
    } else {
        1
    }
}

/// Season key for seasonal XP, e.g. `2025-Q3`.
pub fn season_key(at: DateTime<Utc>) -> String {
    let quarter = (at.month() - 1) / 3 + 1;
    format!("{}-Q{}", at.year(), quarter)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_streak_bonus_cap() {
        assert_eq!(streak_bonus(0), 0);
        assert_eq!(streak_bonus(3), 3);
        assert_eq!(streak_bonus(10), 10);
        assert_eq!(streak_bonus(45), 10);
        assert_eq!(streak_bonus(-1), 0);
    }

    #[test]
    fn test_level_curve() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(99), 1);
        assert_eq!(level_for_xp(100), 2);
        assert_eq!(level_for_xp(400), 3);
        assert_eq!(level_for_xp(900), 4);
    }

    #[test]
    fn test_streak_same_day_holds() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 20, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2025, 6, 10, 8, 0, 0).unwrap();
        assert_eq!(advance_streak(4, Some(earlier), now), 4);
    }

    #[test]
    fn test_streak_next_day_extends() {
        let now = Utc.with_ymd_and_hms(2025, 6, 11, 1, 0, 0).unwrap();
        let yesterday = Utc.with_ymd_and_hms(2025, 6, 10, 23, 0, 0).unwrap();
        assert_eq!(advance_streak(4, Some(yesterday), now), 5);
    }

    #[test]
    fn test_streak_gap_resets() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        let old = Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap();
        assert_eq!(advance_streak(30, Some(old), now), 1);
    }

    #[test]
    fn test_first_read_starts_streak() {
        let now = Utc::now();
        assert_eq!(advance_streak(0, None, now), 1);
    }

    #[test]
    fn test_season_keys() {
        let q1 = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        let q3 = Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap();
        let q4 = Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 0).unwrap();
        assert_eq!(season_key(q1), "2025-Q1");
        assert_eq!(season_key(q3), "2025-Q3");
        assert_eq!(season_key(q4), "2025-Q4");
    }
}
