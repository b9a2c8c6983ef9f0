//! Referral click attribution
//!
//! Records inbound referral-link visits. A click is dropped (not an error) when:
//! - the referral code is empty after normalization
//! - the code does not resolve to a signup
//! - the same `(code, session)` already clicked within the dedupe window
//!
//! Bot-suspected clicks are still stored. The flag only keeps them out of the
//! ranking engine's unique-click tie-break.
//!
//! Raw IP and user-agent never reach the database; only keyed digests do.
//! The bot heuristic runs on the raw user-agent before hashing.

use super::db::Store;
use super::epoch::{system_clock, Clock};
use super::error::GrowthResult;
use super::signups::{normalize_referral_code, resolve_referral_code};
use super::types::{ReferralClick, SignupId};
use crate::config::CLICK_DEDUPE_WINDOW_SECS;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Case-insensitive user-agent fragments that mark non-human clients
pub const BOT_USER_AGENT_MARKERS: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "headless",
    "pingdom",
    "uptime",
    "monitor",
    "curl",
    "wget",
    "httpclient",
];

/// Missing/empty user-agent, or one containing a known non-human marker
pub fn is_bot_user_agent(user_agent: Option<&str>) -> bool {
    let Some(ua) = user_agent.map(str::trim).filter(|ua| !ua.is_empty()) else {
        return true;
    };
    let ua = ua.to_ascii_lowercase();
    BOT_USER_AGENT_MARKERS.iter().any(|marker| ua.contains(marker))
}

/// One-way keyed digest: hex(SHA-256(key || 0x00 || value))
pub fn keyed_digest(key: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update([0u8]);
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// Inbound click as received from the HTTP layer
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClickInput {
    pub referral_code: String,
    pub session_id: Option<String>,
    pub landing_url: Option<String>,
    pub raw_ip: Option<String>,
    pub raw_user_agent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickOutcome {
    pub recorded: bool,
}

impl ClickOutcome {
    fn dropped() -> Self {
        Self { recorded: false }
    }
}

#[derive(Clone)]
pub struct ClickAttributor {
    store: Store,
    hash_key: String,
    now_fn: Clock,
}

impl ClickAttributor {
    pub fn new(store: Store, hash_key: impl Into<String>) -> Self {
        Self::with_clock(store, hash_key, system_clock())
    }

    pub fn with_clock(store: Store, hash_key: impl Into<String>, now_fn: Clock) -> Self {
        Self {
            store,
            hash_key: hash_key.into(),
            now_fn,
        }
    }

    /// Record a referral-link visit
    ///
    /// Resolution, the dedupe lookup and the insert share one IMMEDIATE
    /// transaction, so two concurrent clicks from the same session cannot
    /// both pass the window check.
    pub fn record_click(&self, input: &ClickInput) -> GrowthResult<ClickOutcome> {
        let Some(code) = normalize_referral_code(&input.referral_code) else {
            log::debug!("Dropped click with empty referral code");
            return Ok(ClickOutcome::dropped());
        };

        let session_id = non_empty(input.session_id.as_deref());
        let landing_url = non_empty(input.landing_url.as_deref());
        let is_bot_suspected = is_bot_user_agent(input.raw_user_agent.as_deref());
        let ip_hash = non_empty(input.raw_ip.as_deref()).map(|ip| keyed_digest(&self.hash_key, ip));
        let ua_hash = non_empty(input.raw_user_agent.as_deref())
            .map(|ua| keyed_digest(&self.hash_key, ua));
        let now = (self.now_fn)();

        self.store.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let Some(referrer_signup_id) = resolve_referral_code(&tx, &code)? else {
                log::debug!("Dropped click for unknown referral code {}", code);
                return Ok(ClickOutcome::dropped());
            };

            if let Some(session) = session_id {
                let last_click_at: Option<i64> = tx
                    .prepare_cached(
                        "SELECT created_at FROM referral_clicks
                         WHERE referral_code = ?1 AND session_id = ?2
                         ORDER BY created_at DESC
                         LIMIT 1",
                    )?
                    .query_row(params![code, session], |row| row.get(0))
                    .optional()?;

                if let Some(last) = last_click_at {
                    if now - last < CLICK_DEDUPE_WINDOW_SECS {
                        log::debug!(
                            "Dropped click for {} / session {}: {}s since last",
                            code,
                            session,
                            now - last
                        );
                        return Ok(ClickOutcome::dropped());
                    }
                }
            }

            tx.execute(
                "INSERT INTO referral_clicks (
                    referral_code, referrer_signup_id, ip_hash, ua_hash,
                    session_id, landing_url, is_bot_suspected, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    code,
                    referrer_signup_id,
                    ip_hash,
                    ua_hash,
                    session_id,
                    landing_url,
                    is_bot_suspected,
                    now,
                ],
            )?;
            tx.commit()?;

            if is_bot_suspected {
                log::debug!("Recorded bot-suspected click for {}", code);
            }

            Ok(ClickOutcome { recorded: true })
        })
    }

    /// Stored clicks attributed to a referrer, oldest first
    pub fn clicks_for(&self, referrer_signup_id: SignupId) -> GrowthResult<Vec<ReferralClick>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, referral_code, referrer_signup_id, ip_hash, ua_hash,
                        session_id, landing_url, is_bot_suspected, created_at
                 FROM referral_clicks
                 WHERE referrer_signup_id = ?1
                 ORDER BY created_at ASC, id ASC",
            )?;

            let clicks = stmt
                .query_map([referrer_signup_id], |row| {
                    Ok(ReferralClick {
                        id: row.get(0)?,
                        referral_code: row.get(1)?,
                        referrer_signup_id: row.get(2)?,
                        ip_hash: row.get(3)?,
                        ua_hash: row.get(4)?,
                        session_id: row.get(5)?,
                        landing_url: row.get(6)?,
                        is_bot_suspected: row.get(7)?,
                        created_at: row.get(8)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(clicks)
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
