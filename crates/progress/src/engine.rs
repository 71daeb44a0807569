//! The progress engine.
//!
//! One entry point per mutation: [`ProgressEngine::update_progress`] for
//! read progress and [`ProgressEngine::update_status`] for status changes.
//! Invariants enforced here:
//!   - `last_read_chapter` only moves forward (conditional SQL),
//!   - marking chapter N read bulk-marks every chapter 1..=N in one
//!     atomic statement (LWW on `updated_at`),
//!   - base XP is awarded at most once per strictly-increasing
//!     advancement, soft-blocked (progress saved, no XP) past the XP
//!     rate budget,
//!   - completion XP is a one-way flag per entry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use mangatrack_core::config::LimitsConfig;
use mangatrack_core::{ActivityEventType, LibraryStatus};
use mangatrack_kvs::{Kvs, KvsError};
use mangatrack_store::activity::{ActivityStore, NewActivityEvent};
use mangatrack_store::chapters::ChapterStore;
use mangatrack_store::library::{LibraryEntryRow, LibraryPatch, LibraryStore};
use mangatrack_store::reads::ReadsStore;
use mangatrack_store::users::{UserRow, UserStore, XpAward};
use mangatrack_store::StoreError;

use crate::limits::RateWindows;
use crate::trust::{TrustGuard, ViolationKind};
use crate::xp::{
    advance_streak, level_for_xp, season_key, streak_bonus, XP_PER_CHAPTER, XP_SERIES_COMPLETED,
};

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ProgressRequest {
    #[serde(rename = "chapterNumber")]
    pub chapter_number: Option<f64>,
    #[serde(rename = "chapterSlug")]
    pub chapter_slug: Option<String>,
    #[serde(rename = "isRead", default)]
    pub is_read: bool,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "sourceId")]
    pub source_id: Option<Uuid>,
    #[serde(rename = "deviceId")]
    pub device_id: Option<String>,
    #[serde(rename = "readingTimeSeconds")]
    pub reading_time_seconds: Option<u32>,
}

#[derive(Debug, serde::Serialize)]
pub struct ProgressOutcome {
    pub entry_id: Uuid,
    pub previous_chapter: f64,
    pub last_read_chapter: f64,
    pub new_progress: bool,
    pub xp_awarded: i64,
    pub streak_days: i32,
    pub chapters_marked: u64,
    /// XP was withheld by the grant rate limit; progress still saved.
    pub xp_soft_blocked: bool,
}

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("library entry not found")]
    EntryNotFound,

    #[error("rate limited")]
    RateLimited,

    #[error("invalid progress request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("kvs error: {0}")]
    Kvs(#[from] KvsError),
}

impl ProgressError {
    pub fn status_code(&self) -> u16 {
        match self {
            ProgressError::EntryNotFound => 404,
            ProgressError::RateLimited => 429,
            ProgressError::Invalid(_) => 400,
            ProgressError::Store(e) => e.status_code(),
            ProgressError::Kvs(_) => 500,
        }
    }
}

pub struct ProgressEngine {
    pool: PgPool,
    kvs: Arc<dyn Kvs>,
    windows: RateWindows,
    trust: TrustGuard,
    limits: LimitsConfig,
}

impl ProgressEngine {
    pub fn new(pool: PgPool, kvs: Arc<dyn Kvs>, limits: LimitsConfig) -> Self {
        Self {
            windows: RateWindows::new(kvs.clone()),
            trust: TrustGuard::new(pool.clone(), kvs.clone()),
            pool,
            kvs,
            limits,
        }
    }

    pub async fn update_progress(
        &self,
        user_id: Uuid,
        entry_id: Uuid,
        req: ProgressRequest,
    ) -> Result<ProgressOutcome, ProgressError> {
        if !self.windows.allow_progress(user_id).await.unwrap_or(true) {
            self.trust
                .maybe_record_violation(user_id, ViolationKind::RapidReads, "progress window")
                .await
                .ok();
            return Err(ProgressError::RateLimited);
        }

        let entry = LibraryStore::get_for_user(&self.pool, user_id, entry_id)
            .await?
            .ok_or(ProgressError::EntryNotFound)?;
        let user = UserStore::get(&self.pool, user_id)
            .await?
            .ok_or(ProgressError::EntryNotFound)?;

        let now = req.timestamp.unwrap_or_else(Utc::now);
        let current = entry.last_read_chapter;
        let target = self.resolve_target(&entry, &req).await?;
        if !target.is_finite() || target < 0.0 {
            return Err(ProgressError::Invalid(format!("chapter {} out of range", target)));
        }

        let new_progress = target > current;
        let bot_detected = self.run_bot_heuristics(user_id, &entry, &req, current, target).await;

        // Already-read check must precede the bulk-mark.
        let already_read_target = self.target_already_read(&entry, user_id, target).await?;

        // Atomic unit: bulk-mark + monotonic entry advance.
        let mut chapters_marked = 0u64;
        if req.is_read && target >= 1.0 {
            let mut tx = self.pool.begin().await.map_err(StoreError::from)?;
            if let Some(series_id) = entry.series_id {
                chapters_marked = ReadsStore::bulk_mark_read(
                    &mut *tx,
                    user_id,
                    series_id,
                    target,
                    now,
                    req.device_id.as_deref(),
                    req.source_id,
                )
                .await?;
            }
            if new_progress {
                LibraryStore::advance_progress(&mut *tx, entry_id, target, now).await?;
            }
            tx.commit().await.map_err(StoreError::from)?;
        } else if req.is_read && new_progress {
            LibraryStore::advance_progress(&self.pool, entry_id, target, now).await?;
        }

        // XP: at most once per call, only on a real advancement.
        let mut xp_awarded = 0i64;
        let mut xp_soft_blocked = false;
        let mut streak_days = user.streak_days;
        let eligible = req.is_read && new_progress && !already_read_target && !bot_detected;
        if eligible {
            if self.windows.allow_xp_grant(user_id).await.unwrap_or(true) {
                let (award, streak) = build_award(&user, chapters_marked, now);
                xp_awarded = award.xp_delta;
                streak_days = streak;
                UserStore::apply_award(&self.pool, user_id, &award).await?;
                if let Some(series_id) = entry.series_id {
                    ActivityStore::record(
                        &self.pool,
                        NewActivityEvent {
                            series_id,
                            chapter_id: None,
                            user_id: Some(user_id),
                            source_name: None,
                            event_type: ActivityEventType::ChapterRead,
                        },
                    )
                    .await?;
                }
            } else {
                // Soft block: the advancement saved above stands.
                xp_soft_blocked = true;
                if chapters_marked > 0 {
                    UserStore::record_reads(&self.pool, user_id, chapters_marked as i64, now)
                        .await?;
                }
            }
        } else if chapters_marked > 0 {
            UserStore::record_reads(&self.pool, user_id, chapters_marked as i64, now).await?;
        }

        self.invalidate_feed(user_id).await;

        let outcome = ProgressOutcome {
            entry_id,
            previous_chapter: current,
            last_read_chapter: if new_progress && req.is_read { target } else { current },
            new_progress,
            xp_awarded,
            streak_days,
            chapters_marked,
            xp_soft_blocked,
        };
        debug!(
            user_id = %user_id,
            entry_id = %entry_id,
            from = current,
            to = outcome.last_read_chapter,
            xp = xp_awarded,
            marked = chapters_marked,
            "progress updated"
        );
        Ok(outcome)
    }

    /// Status change with toggle heuristics and one-time completion XP.
    pub async fn update_status(
        &self,
        user_id: Uuid,
        entry_id: Uuid,
        patch: LibraryPatch,
    ) -> Result<LibraryEntryRow, ProgressError> {
        if !self.windows.allow_status(user_id).await.unwrap_or(true) {
            return Err(ProgressError::RateLimited);
        }

        let becoming_completed = patch.status == Some(LibraryStatus::Completed);
        if patch.status.is_some() {
            self.check_status_toggle(user_id, entry_id).await;
        }

        let row = LibraryStore::patch(&self.pool, user_id, entry_id, patch).await?;

        if becoming_completed {
            let granted = LibraryStore::grant_completion_xp_once(&self.pool, entry_id).await?;
            if granted {
                UserStore::add_xp(&self.pool, user_id, XP_SERIES_COMPLETED).await?;
                info!(
                    user_id = %user_id,
                    entry_id = %entry_id,
                    xp = XP_SERIES_COMPLETED,
                    "series completion XP granted"
                );
            }
        }

        self.invalidate_feed(user_id).await;
        Ok(row)
    }

    async fn resolve_target(
        &self,
        entry: &LibraryEntryRow,
        req: &ProgressRequest,
    ) -> Result<f64, ProgressError> {
        if let Some(number) = req.chapter_number {
            return Ok(number);
        }
        if let (Some(slug), Some(series_id)) = (&req.chapter_slug, entry.series_id) {
            if let Some(chapter) = ChapterStore::find_by_slug(&self.pool, series_id, slug).await? {
                if let Some(value) = chapter.number_value {
                    return Ok(value);
                }
            }
        }
        Ok(entry.last_read_chapter)
    }

    async fn target_already_read(
        &self,
        entry: &LibraryEntryRow,
        user_id: Uuid,
        target: f64,
    ) -> Result<bool, ProgressError> {
        let Some(series_id) = entry.series_id else {
            return Ok(false);
        };
        let identity = format!("{}", target);
        let Some(chapter) = ChapterStore::find_by_identity(&self.pool, series_id, &identity).await?
        else {
            return Ok(false);
        };
        Ok(ReadsStore::is_read(&self.pool, user_id, chapter.id).await?)
    }

    /// Heuristics that mark the call as bot-suspect. Read-time checks
    /// affect trust only and never set the bot flag.
    async fn run_bot_heuristics(
        &self,
        user_id: Uuid,
        entry: &LibraryEntryRow,
        req: &ProgressRequest,
        current: f64,
        target: f64,
    ) -> bool {
        let mut bot = false;

        if req.is_read && req.chapter_number.is_some() && current > 0.0 && target == current {
            self.trust
                .maybe_record_violation(
                    user_id,
                    ViolationKind::RepeatedSameChapter,
                    &format!("entry {} chapter {}", entry.id, target),
                )
                .await
                .ok();
            bot = true;
        }

        // Read-time validation: single-step advancements only; bulk jumps
        // and first progress are trusted.
        let step = target - current;
        if current > 0.0 && (1.0..=2.0).contains(&step) {
            if let Some(secs) = req.reading_time_seconds {
                if secs < self.limits.min_read_seconds {
                    self.trust
                        .maybe_record_violation(
                            user_id,
                            ViolationKind::SuspiciousReadTime,
                            &format!("{}s for {} chapters", secs, step),
                        )
                        .await
                        .ok();
                }
            }
        }

        bot
    }

    /// Rapid status toggles on one entry (>3 in 5 minutes).
    async fn check_status_toggle(&self, user_id: Uuid, entry_id: Uuid) {
        let key = format!("toggle:{}:{}", user_id, entry_id);
        match self.kvs.incr_px(&key, 5 * 60 * 1000).await {
            Ok(count) if count > 3 => {
                self.trust
                    .maybe_record_violation(
                        user_id,
                        ViolationKind::StatusToggle,
                        &format!("{} toggles in window", count),
                    )
                    .await
                    .ok();
            }
            _ => {}
        }
    }

    async fn invalidate_feed(&self, user_id: Uuid) {
        let key = format!("feed:v:{}", user_id);
        if let Err(e) = self.kvs.incr(&key).await {
            tracing::warn!(user_id = %user_id, error = %e, "feed cache invalidation failed");
        }
    }
}

/// Assemble the user-row award for one advancement.
fn build_award(user: &UserRow, chapters_marked: u64, now: DateTime<Utc>) -> (XpAward, i32) {
    let streak = advance_streak(user.streak_days, user.last_read_at, now);
    let bonus = streak_bonus(streak);
    let delta = XP_PER_CHAPTER + bonus;

    let season = season_key(now);
    let season_xp = if user.current_season.as_deref() == Some(season.as_str()) {
        user.season_xp + delta
    } else {
        // Seasonal rollover: the new season starts from this award.
        delta
    };

    let award = XpAward {
        xp_delta: delta,
        level: level_for_xp(user.xp + delta),
        streak_days: streak,
        longest_streak: user.longest_streak.max(streak),
        season_xp,
        current_season: season,
        chapters_read_delta: chapters_marked.max(1) as i64,
        last_read_at: now,
    };
    (award, streak)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn user_fixture() -> UserRow {
        UserRow {
            id: Uuid::new_v4(),
            username: "reader".into(),
            email: None,
            xp: 250,
            level: 2,
            streak_days: 3,
            longest_streak: 8,
            last_read_at: Some(Utc.with_ymd_and_hms(2025, 6, 9, 22, 0, 0).unwrap()),
            chapters_read: 40,
            trust_score: 1.0,
            season_xp: 50,
            current_season: Some("2025-Q2".into()),
            last_violation_at: None,
            is_premium: false,
            feed_last_seen_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn test_award_includes_streak_bonus() {
        let user = user_fixture();
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 10, 0, 0).unwrap();
        let (award, streak) = build_award(&user, 1, now);
        // Next-day read: streak 3 → 4, bonus 4, base 1.
        assert_eq!(streak, 4);
        assert_eq!(award.xp_delta, 1 + 4);
        assert_eq!(award.longest_streak, 8);
        assert_eq!(award.chapters_read_delta, 1);
    }

    #[test]
    fn test_award_season_continues_within_quarter() {
        let user = user_fixture();
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 10, 0, 0).unwrap();
        let (award, _) = build_award(&user, 1, now);
        assert_eq!(award.current_season, "2025-Q2");
        assert_eq!(award.season_xp, 50 + award.xp_delta);
    }

    #[test]
    fn test_award_season_rollover_resets() {
        let user = user_fixture();
        let next_quarter = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
        let (award, _) = build_award(&user, 1, next_quarter);
        assert_eq!(award.current_season, "2025-Q3");
        // Carry-over: the season counter restarts from this award alone.
        assert_eq!(award.season_xp, award.xp_delta);
    }

    #[test]
    fn test_award_counts_bulk_marked_chapters() {
        let user = user_fixture();
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 10, 0, 0).unwrap();
        let (award, _) = build_award(&user, 495, now);
        // Bulk-mark counts all chapters read, but XP stays single-award.
        assert_eq!(award.chapters_read_delta, 495);
        assert_eq!(award.xp_delta, 1 + 4);
    }

    #[test]
    fn test_longest_streak_extends() {
        let mut user = user_fixture();
        user.streak_days = 8;
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 10, 0, 0).unwrap();
        let (award, streak) = build_award(&user, 1, now);
        assert_eq!(streak, 9);
        assert_eq!(award.longest_streak, 9);
    }

    #[test]
    fn test_progress_error_status_codes() {
        assert_eq!(ProgressError::EntryNotFound.status_code(), 404);
        assert_eq!(ProgressError::RateLimited.status_code(), 429);
        assert_eq!(ProgressError::Invalid("x".into()).status_code(), 400);
    }
}
