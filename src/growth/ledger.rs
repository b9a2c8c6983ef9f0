//! Points ledger: exactly-once grants and per-category totals
//!
//! ## Idempotence
//!
//! `(signup_id, source, source_id)` is UNIQUE in `points_ledger`. An award is a
//! single `INSERT ... ON CONFLICT DO NOTHING`; the number of changed rows tells
//! us whether this call granted. There is no read-before-write, so concurrent
//! awards for the same key race on the constraint and exactly one wins.
//!
//! Rows are append-only (UPDATE/DELETE triggers abort).

use super::db::Store;
use super::epoch::{system_clock, Clock};
use super::error::GrowthResult;
use super::types::{PointsBreakdown, PointsLedgerEntry, PointsSource, SignupId};
use crate::config::MAX_AWARD_AMOUNT;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwardOutcome {
    pub granted: bool,
}

#[derive(Clone)]
pub struct PointsLedger {
    store: Store,
    now_fn: Clock,
}

impl PointsLedger {
    pub fn new(store: Store) -> Self {
        Self::with_clock(store, system_clock())
    }

    pub fn with_clock(store: Store, now_fn: Clock) -> Self {
        Self { store, now_fn }
    }

    /// Grant `amount` points to `signup_id` for one causal event
    ///
    /// # Arguments
    /// * `source` - Grant category (`task`, `social_*`, `referral_qualified`, ...)
    /// * `source_id` - Stable id of the causal event; identical across retries
    /// * `amount` - Positive point value, at most `MAX_AWARD_AMOUNT`
    ///
    /// # Returns
    /// * `granted = true` - A new ledger row was written
    /// * `granted = false` - Key already recorded, or input rejected (no write)
    /// * `Err(...)` - Store unavailable (safe to retry)
    pub fn award(
        &self,
        signup_id: SignupId,
        source: &PointsSource,
        source_id: &str,
        amount: i64,
    ) -> GrowthResult<AwardOutcome> {
        let source_id = source_id.trim();
        if source_id.is_empty() || amount <= 0 || amount > MAX_AWARD_AMOUNT {
            log::warn!(
                "Rejected award: signup={} source={} source_id={:?} amount={}",
                signup_id,
                source,
                source_id,
                amount
            );
            return Ok(AwardOutcome { granted: false });
        }

        let now = (self.now_fn)();
        let granted = self
            .store
            .with_conn(|conn| insert_entry(conn, signup_id, source, source_id, amount, now))?;

        Ok(AwardOutcome { granted })
    }

    /// Sum a signup's points per display category
    ///
    /// A signup with no entries (or no row at all) gets an all-zero breakdown.
    pub fn summarize(&self, signup_id: SignupId) -> GrowthResult<PointsBreakdown> {
        self.store.with_conn(|conn| summarize_points(conn, signup_id))
    }

    /// All ledger entries for a signup, oldest first
    pub fn entries_for(&self, signup_id: SignupId) -> GrowthResult<Vec<PointsLedgerEntry>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, signup_id, source, source_id, amount, created_at
                 FROM points_ledger
                 WHERE signup_id = ?1
                 ORDER BY created_at ASC, id ASC",
            )?;

            let entries = stmt
                .query_map([signup_id], |row| {
                    Ok(PointsLedgerEntry {
                        id: row.get(0)?,
                        signup_id: row.get(1)?,
                        source: PointsSource::from(row.get::<_, String>(2)?),
                        source_id: row.get(3)?,
                        amount: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(entries)
        })
    }
}

/// Insert one ledger row unless its key already exists
///
/// Runs on whatever connection or transaction the caller holds, so the
/// conversion state machine can award inside its qualification transaction.
///
/// Returns `true` if a row was written. A grant for a signup id that does not
/// exist (foreign key violation) is logged and reported as not granted.
pub(crate) fn insert_entry(
    conn: &Connection,
    signup_id: SignupId,
    source: &PointsSource,
    source_id: &str,
    amount: i64,
    now: i64,
) -> GrowthResult<bool> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO points_ledger (signup_id, source, source_id, amount, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(signup_id, source, source_id) DO NOTHING",
    )?;

    let source_str = source.as_str();
    match stmt.execute(params![signup_id, &*source_str, source_id, amount, now]) {
        Ok(1) => {
            log::info!(
                "✅ Awarded {} pts to signup {} ({} / {})",
                amount,
                signup_id,
                source_str,
                source_id
            );
            Ok(true)
        }
        Ok(_) => {
            log::debug!(
                "Award already recorded for signup {} ({} / {}), skipping",
                signup_id,
                source_str,
                source_id
            );
            Ok(false)
        }
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
        {
            log::warn!("Award for unknown signup {} ignored", signup_id);
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Fold a signup's entries into a breakdown
///
/// Summed in Rust with saturating arithmetic rather than SQL `SUM`, which
/// fails with "integer overflow" and would make the read error out.
pub(crate) fn summarize_points(conn: &Connection, signup_id: SignupId) -> GrowthResult<PointsBreakdown> {
    let mut stmt = conn.prepare_cached(
        "SELECT source, amount FROM points_ledger WHERE signup_id = ?1",
    )?;

    let rows = stmt.query_map([signup_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut breakdown = PointsBreakdown::default();
    for row in rows {
        let (source, amount) = row?;
        breakdown.add(&PointsSource::from(source), amount);
    }

    Ok(breakdown)
}
