//! Trust score: violations lower it, good behavior slowly restores it.
//!
//! Effective leaderboard XP is `floor(xp × trust_score)` — trust never
//! gates XP awarding itself.

use std::sync::Arc;

use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use mangatrack_kvs::Kvs;
use mangatrack_store::users::UserStore;
use mangatrack_store::StoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    ApiSpam,
    RapidReads,
    RepeatedSameChapter,
    StatusToggle,
    BotPattern,
    SuspiciousReadTime,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::ApiSpam => "api_spam",
            ViolationKind::RapidReads => "rapid_reads",
            ViolationKind::RepeatedSameChapter => "repeated_same_chapter",
            ViolationKind::StatusToggle => "status_toggle",
            ViolationKind::BotPattern => "bot_pattern",
            ViolationKind::SuspiciousReadTime => "suspicious_read_time",
        }
    }

    /// Trust penalty per recorded violation.
    pub fn penalty(&self) -> f64 {
        match self {
            ViolationKind::ApiSpam => 0.05,
            ViolationKind::RapidReads => 0.05,
            ViolationKind::RepeatedSameChapter => 0.02,
            ViolationKind::StatusToggle => 0.03,
            ViolationKind::BotPattern => 0.10,
            ViolationKind::SuspiciousReadTime => 0.02,
        }
    }
}

/// Effective XP used by leaderboards.
pub fn effective_xp(xp: i64, trust_score: f64) -> i64 {
    ((xp as f64) * trust_score.clamp(0.0, 1.0)).floor() as i64
}

pub struct TrustGuard {
    pool: PgPool,
    kvs: Arc<dyn Kvs>,
}

/// Debounce window: at most one penalty per (user, kind) per minute, so a
/// burst of identical violations costs once.
const DEBOUNCE_MS: u64 = 60_000;

impl TrustGuard {
    pub fn new(pool: PgPool, kvs: Arc<dyn Kvs>) -> Self {
        Self { pool, kvs }
    }

    /// Record a violation unless an identical one landed within the
    /// debounce window. Returns the new trust score when applied.
    pub async fn maybe_record_violation(
        &self,
        user_id: Uuid,
        kind: ViolationKind,
        detail: &str,
    ) -> StoreResult<Option<f64>> {
        let debounce_key = format!("trust:v:{}:{}", user_id, kind.as_str());
        let fresh = self
            .kvs
            .set_nx_px(&debounce_key, "1", DEBOUNCE_MS)
            .await
            .unwrap_or(true);
        if !fresh {
            return Ok(None);
        }

        let score = UserStore::apply_trust_penalty(&self.pool, user_id, kind.penalty()).await?;
        info!(
            user_id = %user_id,
            violation = kind.as_str(),
            detail = detail,
            trust_score = score,
            "trust violation recorded"
        );
        Ok(Some(score))
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_penalties_ranked_by_severity() {
        assert!(ViolationKind::BotPattern.penalty() > ViolationKind::ApiSpam.penalty());
        assert!(ViolationKind::ApiSpam.penalty() > ViolationKind::RepeatedSameChapter.penalty());
    }

    #[test]
    fn test_effective_xp_floor() {
        assert_eq!(effective_xp(100, 1.0), 100);
        assert_eq!(effective_xp(100, 0.5), 50);
        assert_eq!(effective_xp(99, 0.995), 98);
        assert_eq!(effective_xp(100, 0.0), 0);
        // Out-of-range scores are clamped.
        assert_eq!(effective_xp(100, 1.7), 100);
        assert_eq!(effective_xp(100, -0.3), 0);
    }

    #[test]
    fn test_violation_labels() {
        assert_eq!(ViolationKind::RepeatedSameChapter.as_str(), "repeated_same_chapter");
        assert_eq!(ViolationKind::StatusToggle.as_str(), "status_toggle");
    }
}
