//! Signup lookup adapter
//!
//! Signup rows belong to the waitlist service. This adapter provides the
//! read paths the growth core depends on (resolve email / wallet / referral
//! code to a signup), the set-once profile-completion timestamp, and signup
//! insertion so the core can be exercised end to end.

use super::db::Store;
use super::epoch::{system_clock, Clock};
use super::error::GrowthResult;
use super::types::{Signup, SignupId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;

const SIGNUP_COLUMNS: &str = "id, email, referral_code, primary_wallet, embedded_wallet, \
     persona, has_creator_coin, profile_completed_at, created_at";

/// Trim and upper-case a referral code. Empty input yields `None`.
pub fn normalize_referral_code(raw: &str) -> Option<String> {
    let code = raw.trim();
    if code.is_empty() {
        None
    } else {
        Some(code.to_ascii_uppercase())
    }
}

/// Fields supplied by the signup service when a participant joins
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewSignup {
    pub email: Option<String>,
    pub referral_code: Option<String>,
    pub primary_wallet: Option<String>,
    pub embedded_wallet: Option<String>,
    pub persona: Option<String>,
    #[serde(default)]
    pub has_creator_coin: bool,
}

#[derive(Clone)]
pub struct SignupStore {
    store: Store,
    now_fn: Clock,
}

impl SignupStore {
    pub fn new(store: Store) -> Self {
        Self::with_clock(store, system_clock())
    }

    pub fn with_clock(store: Store, now_fn: Clock) -> Self {
        Self { store, now_fn }
    }

    pub fn insert_signup(&self, signup: &NewSignup) -> GrowthResult<SignupId> {
        let now = (self.now_fn)();
        let referral_code = signup
            .referral_code
            .as_deref()
            .and_then(normalize_referral_code);

        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO signups (
                    email, referral_code, primary_wallet, embedded_wallet,
                    persona, has_creator_coin, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    signup.email,
                    referral_code,
                    signup.primary_wallet,
                    signup.embedded_wallet,
                    signup.persona,
                    signup.has_creator_coin,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn find_by_id(&self, signup_id: SignupId) -> GrowthResult<Option<Signup>> {
        self.store.with_conn(|conn| find_signup(conn, signup_id))
    }

    /// Case-insensitive email lookup
    pub fn find_by_email(&self, email: &str) -> GrowthResult<Option<Signup>> {
        let sql = format!(
            "SELECT {} FROM signups WHERE lower(email) = lower(?1) ORDER BY id LIMIT 1",
            SIGNUP_COLUMNS
        );
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&sql)?;
            Ok(stmt.query_row([email.trim()], map_signup).optional()?)
        })
    }

    /// Wallet lookup across primary and embedded wallets
    ///
    /// Addresses compare case-insensitively (EVM checksum casing varies).
    pub fn find_by_wallet(&self, wallet: &str) -> GrowthResult<Option<Signup>> {
        let sql = format!(
            "SELECT {} FROM signups
             WHERE lower(primary_wallet) = lower(?1) OR lower(embedded_wallet) = lower(?1)
             ORDER BY id LIMIT 1",
            SIGNUP_COLUMNS
        );
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&sql)?;
            Ok(stmt.query_row([wallet.trim()], map_signup).optional()?)
        })
    }

    pub fn resolve_referral_code(&self, raw_code: &str) -> GrowthResult<Option<SignupId>> {
        let Some(code) = normalize_referral_code(raw_code) else {
            return Ok(None);
        };
        self.store.with_conn(|conn| resolve_referral_code(conn, &code))
    }

    /// Set `profile_completed_at` if it is still NULL
    ///
    /// Returns `true` only for the call that set it. The timestamp is never
    /// overwritten, so repeated completions keep the first value.
    pub fn complete_profile(&self, signup_id: SignupId) -> GrowthResult<bool> {
        let now = (self.now_fn)();
        self.store.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE signups SET profile_completed_at = ?1
                 WHERE id = ?2 AND profile_completed_at IS NULL",
                params![now, signup_id],
            )?;
            Ok(changed == 1)
        })
    }
}

pub(crate) fn find_signup(conn: &Connection, signup_id: SignupId) -> GrowthResult<Option<Signup>> {
    let sql = format!("SELECT {} FROM signups WHERE id = ?1", SIGNUP_COLUMNS);
    let mut stmt = conn.prepare_cached(&sql)?;
    Ok(stmt.query_row([signup_id], map_signup).optional()?)
}

/// Resolve an already-normalized code
pub(crate) fn resolve_referral_code(conn: &Connection, code: &str) -> GrowthResult<Option<SignupId>> {
    let mut stmt = conn.prepare_cached("SELECT id FROM signups WHERE referral_code = ?1")?;
    Ok(stmt.query_row([code], |row| row.get(0)).optional()?)
}

fn map_signup(row: &Row<'_>) -> rusqlite::Result<Signup> {
    Ok(Signup {
        id: row.get(0)?,
        email: row.get(1)?,
        referral_code: row.get(2)?,
        primary_wallet: row.get(3)?,
        embedded_wallet: row.get(4)?,
        persona: row.get(5)?,
        has_creator_coin: row.get(6)?,
        profile_completed_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}
