//! Growth service configuration from environment variables
//!
//! Only deployment concerns live here. Business constants (points per
//! qualified referral, pending cap, click dedupe window) are process
//! constants and are not runtime-tunable.

use std::env;

/// Points credited to a referrer when an invitee's conversion qualifies
pub const QUALIFIED_REFERRAL_POINTS: i64 = 100;

/// Largest single grant `award` accepts; bigger amounts are rejected like non-positive ones
pub const MAX_AWARD_AMOUNT: i64 = 1_000_000;

/// Upper bound on the displayed pending-invite count
pub const PENDING_CAP: i64 = 10;

/// Clicks for the same (code, session) closer together than this are dropped
pub const CLICK_DEDUPE_WINDOW_SECS: i64 = 10;

/// Configuration for the growth store and CLI
#[derive(Debug, Clone)]
pub struct GrowthConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// Directory of `.sql` migrations; embedded schema is used when unset
    pub schema_dir: Option<String>,

    /// Secret mixed into IP / user-agent digests
    pub hash_key: String,

    /// Default leaderboard size
    pub leaderboard_limit: usize,
}

impl GrowthConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `GROWTH_DB_PATH` (default: /var/lib/waitlist/growth.db)
    /// - `GROWTH_SCHEMA_DIR` (default: unset, embedded schema)
    /// - `GROWTH_HASH_KEY` (default: empty, logs a warning)
    /// - `GROWTH_LEADERBOARD_LIMIT` (default: 25)
    pub fn from_env() -> Self {
        let hash_key = env::var("GROWTH_HASH_KEY").unwrap_or_default();
        if hash_key.is_empty() {
            log::warn!("⚠️  GROWTH_HASH_KEY is not set; click digests are unkeyed");
        }

        Self {
            db_path: env::var("GROWTH_DB_PATH")
                .unwrap_or_else(|_| "/var/lib/waitlist/growth.db".to_string()),

            schema_dir: env::var("GROWTH_SCHEMA_DIR")
                .ok()
                .filter(|dir| !dir.trim().is_empty()),

            hash_key,

            leaderboard_limit: env::var("GROWTH_LEADERBOARD_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(25),
        }
    }
}
