//! Single-signup position summary
//!
//! Combines the points breakdown, weekly and all-time creator ranks, and
//! referral counts for one signup. Absence is not an error: a signup outside
//! the creator population gets `None` ranks, and an unknown signup gets an
//! all-zero summary.

use super::conversions::{referral_counts, ReferralCounts};
use super::db::Store;
use super::epoch::{system_clock, Clock};
use super::error::GrowthResult;
use super::ledger::summarize_points;
use super::ranking::{population_size, rank_of, ranked};
use super::types::{Eligibility, Period, PointsBreakdown, SignupId};
use crate::config::PENDING_CAP;
use serde::{Deserialize, Serialize};

/// Rank of one signup within one period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankSnapshot {
    pub rank: Option<u32>,
    pub total_count: usize,
    pub ahead_of_me: Option<u32>,
    pub percentile: Option<u32>,
}

impl RankSnapshot {
    pub fn new(rank: Option<u32>, total_count: usize) -> Self {
        Self {
            rank,
            total_count,
            ahead_of_me: rank.map(|r| r.saturating_sub(1)),
            percentile: percentile(rank, total_count),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralSummary {
    pub qualified_count: i64,
    pub pending_count: i64,
    /// `min(pending_count, PENDING_CAP)`, for display only
    pub pending_count_capped: i64,
}

impl From<ReferralCounts> for ReferralSummary {
    fn from(counts: ReferralCounts) -> Self {
        Self {
            qualified_count: counts.qualified_count,
            pending_count: counts.pending_count,
            pending_count_capped: counts.pending_count.min(PENDING_CAP),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSummary {
    pub signup_id: SignupId,
    pub points: PointsBreakdown,
    pub weekly: RankSnapshot,
    pub all_time: RankSnapshot,
    pub referrals: ReferralSummary,
}

/// `round(rank / total * 100)` clamped to `[1, 100]`
///
/// `None` when the rank is unknown or the population is empty.
pub fn percentile(rank: Option<u32>, total_count: usize) -> Option<u32> {
    let rank = rank?;
    if total_count == 0 {
        return None;
    }
    let pct = (f64::from(rank) / total_count as f64 * 100.0).round();
    Some(pct.clamp(1.0, 100.0) as u32)
}

#[derive(Clone)]
pub struct PositionAggregator {
    store: Store,
    now_fn: Clock,
}

impl PositionAggregator {
    pub fn new(store: Store) -> Self {
        Self::with_clock(store, system_clock())
    }

    pub fn with_clock(store: Store, now_fn: Clock) -> Self {
        Self { store, now_fn }
    }

    /// Position of one signup in the creator leaderboards
    ///
    /// Every figure comes from one read transaction, so ranks and the
    /// population count describe the same snapshot (`rank <= total_count`).
    pub fn position(&self, signup_id: SignupId) -> GrowthResult<PositionSummary> {
        let now = (self.now_fn)();
        // Creator population for both periods
        let eligibility = Eligibility::Creators;

        self.store.with_conn(|conn| {
            let tx = conn.transaction()?;

            let points = summarize_points(&tx, signup_id)?;
            let counts = referral_counts(&tx, signup_id)?;
            let total_count = population_size(&tx, eligibility)?;
            let weekly = rank_of(&ranked(&tx, Period::Weekly, eligibility, now)?, signup_id);
            let all_time = rank_of(&ranked(&tx, Period::AllTime, eligibility, now)?, signup_id);

            tx.commit()?;

            Ok(PositionSummary {
                signup_id,
                points,
                weekly: RankSnapshot::new(weekly, total_count),
                all_time: RankSnapshot::new(all_time, total_count),
                referrals: counts.into(),
            })
        })
    }
}
