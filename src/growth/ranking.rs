//! Leaderboards and per-signup rank
//!
//! ## Scoring
//!
//! For each eligible signup:
//! - `conversions`: valid conversions it referred (weekly: created in the epoch)
//! - `unique_clicks`: distinct `COALESCE(session_id, ip_hash, ua_hash)` over its
//!   non-bot clicks (weekly: created in the epoch)
//!
//! ## Ordering
//!
//! `conversions DESC`, then `unique_clicks DESC`, then `signup_id ASC`. Ranks
//! are dense over that full key. The last key is the unique signup id, so two
//! signups never share a rank and the order is identical on every call and in
//! every process.
//!
//! Ranks are pulled on demand. Nothing is cached between requests.

use super::db::Store;
use super::epoch::{system_clock, Clock, WeekEpoch};
use super::error::GrowthResult;
use super::types::{Eligibility, Period, SignupId, CREATOR_PERSONA};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One eligible signup with its two scoring fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredSignup {
    pub signup_id: SignupId,
    pub referral_code: String,
    pub primary_wallet: Option<String>,
    pub conversions: i64,
    pub unique_clicks: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub signup_id: SignupId,
    pub referral_code: String,
    pub conversions: i64,
    pub unique_clicks: i64,
    pub primary_wallet: Option<String>,
}

/// Leaderboard comparator: conversions DESC, unique_clicks DESC, id ASC
pub fn compare_scores(a: &ScoredSignup, b: &ScoredSignup) -> Ordering {
    b.conversions
        .cmp(&a.conversions)
        .then_with(|| b.unique_clicks.cmp(&a.unique_clicks))
        .then_with(|| a.signup_id.cmp(&b.signup_id))
}

/// Sort and assign dense ranks in a single pass
pub fn dense_rank(mut rows: Vec<ScoredSignup>) -> Vec<LeaderboardEntry> {
    rows.sort_by(compare_scores);

    let mut ranked: Vec<LeaderboardEntry> = Vec::with_capacity(rows.len());
    let mut rank = 0u32;
    let mut previous: Option<ScoredSignup> = None;

    for row in rows {
        let tied = previous
            .as_ref()
            .map(|prev| compare_scores(prev, &row) == Ordering::Equal)
            .unwrap_or(false);
        if !tied {
            rank += 1;
        }

        ranked.push(LeaderboardEntry {
            rank,
            signup_id: row.signup_id,
            referral_code: row.referral_code.clone(),
            conversions: row.conversions,
            unique_clicks: row.unique_clicks,
            primary_wallet: row.primary_wallet.clone(),
        });
        previous = Some(row);
    }

    ranked
}

#[derive(Clone)]
pub struct RankingEngine {
    store: Store,
    now_fn: Clock,
}

impl RankingEngine {
    pub fn new(store: Store) -> Self {
        Self::with_clock(store, system_clock())
    }

    pub fn with_clock(store: Store, now_fn: Clock) -> Self {
        Self { store, now_fn }
    }

    /// Top `limit` entries of the ranked population
    pub fn leaderboard(
        &self,
        period: Period,
        eligibility: Eligibility,
        limit: usize,
    ) -> GrowthResult<Vec<LeaderboardEntry>> {
        let mut ranked = self.ranked(period, eligibility)?;
        ranked.truncate(limit);
        Ok(ranked)
    }

    /// Rank of one signup, or `None` if it is not in the eligible population
    ///
    /// Recomputes the full population; there is no incremental rank cache.
    pub fn rank_for(
        &self,
        signup_id: SignupId,
        period: Period,
        eligibility: Eligibility,
    ) -> GrowthResult<Option<u32>> {
        Ok(rank_of(&self.ranked(period, eligibility)?, signup_id))
    }

    /// Full ranked population
    pub fn ranked(
        &self,
        period: Period,
        eligibility: Eligibility,
    ) -> GrowthResult<Vec<LeaderboardEntry>> {
        let now = (self.now_fn)();
        self.store
            .with_conn(|conn| ranked(conn, period, eligibility, now))
    }

    /// Eligible signups with their scoring fields, unordered
    pub fn scored_population(
        &self,
        period: Period,
        eligibility: Eligibility,
    ) -> GrowthResult<Vec<ScoredSignup>> {
        let now = (self.now_fn)();
        self.store
            .with_conn(|conn| scored_population(conn, period, eligibility, now))
    }

    /// Size of the eligible population (denominator for percentiles)
    pub fn population_size(&self, eligibility: Eligibility) -> GrowthResult<usize> {
        self.store
            .with_conn(|conn| population_size(conn, eligibility))
    }
}

/// Rank of `signup_id` within an already ranked population
pub fn rank_of(ranked: &[LeaderboardEntry], signup_id: SignupId) -> Option<u32> {
    ranked
        .iter()
        .find(|entry| entry.signup_id == signup_id)
        .map(|entry| entry.rank)
}

pub(crate) fn ranked(
    conn: &Connection,
    period: Period,
    eligibility: Eligibility,
    now: i64,
) -> GrowthResult<Vec<LeaderboardEntry>> {
    Ok(dense_rank(scored_population(conn, period, eligibility, now)?))
}

pub(crate) fn scored_population(
    conn: &Connection,
    period: Period,
    eligibility: Eligibility,
    now: i64,
) -> GrowthResult<Vec<ScoredSignup>> {
    let (window_start, window_end) = match period {
        Period::AllTime => (None, None),
        Period::Weekly => {
            let epoch = WeekEpoch::containing(now)?;
            (Some(epoch.start), Some(epoch.end))
        }
    };

    let eligibility_filter = match eligibility {
        Eligibility::Creators => {
            "s.referral_code IS NOT NULL AND s.persona = ?3 AND s.has_creator_coin = 1"
        }
        Eligibility::AnyReferrer => "s.referral_code IS NOT NULL",
    };

    let sql = format!(
        r#"
        SELECT
            s.id,
            s.referral_code,
            s.primary_wallet,
            COALESCE(conv.conversions, 0),
            COALESCE(clk.unique_clicks, 0)
        FROM signups s
        LEFT JOIN (
            SELECT referrer_signup_id, COUNT(*) AS conversions
            FROM referral_conversions
            WHERE is_valid = 1
              AND (?1 IS NULL OR created_at >= ?1)
              AND (?2 IS NULL OR created_at < ?2)
            GROUP BY referrer_signup_id
        ) conv ON conv.referrer_signup_id = s.id
        LEFT JOIN (
            SELECT referrer_signup_id,
                   COUNT(DISTINCT COALESCE(session_id, ip_hash, ua_hash)) AS unique_clicks
            FROM referral_clicks
            WHERE is_bot_suspected = 0
              AND (?1 IS NULL OR created_at >= ?1)
              AND (?2 IS NULL OR created_at < ?2)
            GROUP BY referrer_signup_id
        ) clk ON clk.referrer_signup_id = s.id
        WHERE {}
        "#,
        eligibility_filter
    );

    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = match eligibility {
        Eligibility::Creators => stmt
            .query_map(params![window_start, window_end, CREATOR_PERSONA], map_scored)?
            .collect::<rusqlite::Result<Vec<_>>>()?,
        Eligibility::AnyReferrer => stmt
            .query_map(params![window_start, window_end], map_scored)?
            .collect::<rusqlite::Result<Vec<_>>>()?,
    };

    log::debug!(
        "Scored {} signups ({}, {:?})",
        rows.len(),
        period.as_str(),
        eligibility
    );

    Ok(rows)
}

pub(crate) fn population_size(conn: &Connection, eligibility: Eligibility) -> GrowthResult<usize> {
    let count: i64 = match eligibility {
        Eligibility::Creators => conn.query_row(
            "SELECT COUNT(*) FROM signups
             WHERE referral_code IS NOT NULL AND persona = ?1 AND has_creator_coin = 1",
            [CREATOR_PERSONA],
            |row| row.get(0),
        )?,
        Eligibility::AnyReferrer => conn.query_row(
            "SELECT COUNT(*) FROM signups WHERE referral_code IS NOT NULL",
            [],
            |row| row.get(0),
        )?,
    };
    Ok(usize::try_from(count).unwrap_or(0))
}

fn map_scored(row: &Row<'_>) -> rusqlite::Result<ScoredSignup> {
    Ok(ScoredSignup {
        signup_id: row.get(0)?,
        referral_code: row.get(1)?,
        primary_wallet: row.get(2)?,
        conversions: row.get(3)?,
        unique_clicks: row.get(4)?,
    })
}
