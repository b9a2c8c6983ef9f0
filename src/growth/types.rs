//! Core data structures for the referral-and-points subsystem
//!
//! Row types mirror the tables in `/sql/`:
//! - `signups` → [`Signup`]
//! - `points_ledger` → [`PointsLedgerEntry`]
//! - `referral_conversions` → [`ReferralConversion`]
//! - `referral_clicks` → [`ReferralClick`]
//!
//! All timestamps are Unix seconds, UTC.

use super::error::GrowthError;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Signup primary key. Stable and totally ordered (final ranking tie-break).
pub type SignupId = i64;

pub type ConversionId = i64;

/// Persona value that makes a signup eligible for creator leaderboards
pub const CREATOR_PERSONA: &str = "creator";

/// Waitlist participant (owned by the signup service)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signup {
    pub id: SignupId,
    pub email: Option<String>,
    pub referral_code: Option<String>,
    pub primary_wallet: Option<String>,
    pub embedded_wallet: Option<String>,
    pub persona: Option<String>,
    pub has_creator_coin: bool,
    pub profile_completed_at: Option<i64>,
    pub created_at: i64,
}

/// Where a ledger grant came from
///
/// `Social` and `Bonus` carry the suffix after `social_` / `bonus_`.
/// Unrecognised strings survive as `Other` and only count toward totals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PointsSource {
    WaitlistSignup,
    Task,
    CswLink,
    ReferralQualified,
    ReferralSignup,
    ReferralCswLink,
    Social(String),
    Bonus(String),
    Other(String),
}

/// Display bucket in a [`PointsBreakdown`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointsCategory {
    Invite,
    Signup,
    Tasks,
    Csw,
    Social,
    Bonus,
}

impl PointsSource {
    pub fn as_str(&self) -> Cow<'_, str> {
        match self {
            PointsSource::WaitlistSignup => Cow::Borrowed("waitlist_signup"),
            PointsSource::Task => Cow::Borrowed("task"),
            PointsSource::CswLink => Cow::Borrowed("csw_link"),
            PointsSource::ReferralQualified => Cow::Borrowed("referral_qualified"),
            PointsSource::ReferralSignup => Cow::Borrowed("referral_signup"),
            PointsSource::ReferralCswLink => Cow::Borrowed("referral_csw_link"),
            PointsSource::Social(kind) => Cow::Owned(format!("social_{}", kind)),
            PointsSource::Bonus(kind) => Cow::Owned(format!("bonus_{}", kind)),
            PointsSource::Other(raw) => Cow::Borrowed(raw.as_str()),
        }
    }

    pub fn category(&self) -> Option<PointsCategory> {
        match self {
            PointsSource::ReferralQualified
            | PointsSource::ReferralSignup
            | PointsSource::ReferralCswLink => Some(PointsCategory::Invite),
            PointsSource::WaitlistSignup => Some(PointsCategory::Signup),
            PointsSource::Task => Some(PointsCategory::Tasks),
            PointsSource::CswLink => Some(PointsCategory::Csw),
            PointsSource::Social(_) => Some(PointsCategory::Social),
            PointsSource::Bonus(_) => Some(PointsCategory::Bonus),
            PointsSource::Other(_) => None,
        }
    }
}

impl From<&str> for PointsSource {
    fn from(raw: &str) -> Self {
        match raw {
            "waitlist_signup" => PointsSource::WaitlistSignup,
            "task" => PointsSource::Task,
            "csw_link" => PointsSource::CswLink,
            "referral_qualified" => PointsSource::ReferralQualified,
            "referral_signup" => PointsSource::ReferralSignup,
            "referral_csw_link" => PointsSource::ReferralCswLink,
            _ => {
                if let Some(kind) = raw.strip_prefix("social_") {
                    PointsSource::Social(kind.to_string())
                } else if let Some(kind) = raw.strip_prefix("bonus_") {
                    PointsSource::Bonus(kind.to_string())
                } else {
                    PointsSource::Other(raw.to_string())
                }
            }
        }
    }
}

impl From<String> for PointsSource {
    fn from(raw: String) -> Self {
        PointsSource::from(raw.as_str())
    }
}

impl From<PointsSource> for String {
    fn from(source: PointsSource) -> Self {
        source.as_str().into_owned()
    }
}

impl fmt::Display for PointsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

/// Immutable, uniquely keyed point grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsLedgerEntry {
    pub id: i64,
    pub signup_id: SignupId,
    pub source: PointsSource,
    pub source_id: String,
    pub amount: i64,
    pub created_at: i64,
}

/// Points summed per display category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsBreakdown {
    pub invite: i64,
    pub signup: i64,
    pub tasks: i64,
    pub csw: i64,
    pub social: i64,
    pub bonus: i64,
    pub total: i64,
}

impl PointsBreakdown {
    /// Add `amount` to its category and the total, saturating at the i64 bounds
    pub fn add(&mut self, source: &PointsSource, amount: i64) {
        let bucket = match source.category() {
            Some(PointsCategory::Invite) => Some(&mut self.invite),
            Some(PointsCategory::Signup) => Some(&mut self.signup),
            Some(PointsCategory::Tasks) => Some(&mut self.tasks),
            Some(PointsCategory::Csw) => Some(&mut self.csw),
            Some(PointsCategory::Social) => Some(&mut self.social),
            Some(PointsCategory::Bonus) => Some(&mut self.bonus),
            None => None,
        };
        if let Some(bucket) = bucket {
            *bucket = bucket.saturating_add(amount);
        }
        self.total = self.total.saturating_add(amount);
    }
}

/// Referral conversion lifecycle. Forward-only: `Pending → Qualified`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionStatus {
    Pending,
    Qualified,
}

impl ConversionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionStatus::Pending => "pending",
            ConversionStatus::Qualified => "qualified",
        }
    }

    /// Parse a stored status. Legacy `csw_linked` rows are qualified.
    pub fn from_db(raw: &str) -> Self {
        match raw {
            "qualified" | "csw_linked" => ConversionStatus::Qualified,
            _ => ConversionStatus::Pending,
        }
    }
}

/// Invitee → referrer relationship
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralConversion {
    pub id: ConversionId,
    pub referrer_signup_id: SignupId,
    pub invitee_signup_id: SignupId,
    pub is_valid: bool,
    pub status: ConversionStatus,
    pub qualified_at: Option<i64>,
    pub created_at: i64,
}

impl ReferralConversion {
    /// Canonical qualification check: status OR timestamp
    pub fn is_qualified(&self) -> bool {
        self.status == ConversionStatus::Qualified || self.qualified_at.is_some()
    }

    /// Ledger `source_id` for this conversion's referral award
    pub fn award_source_id(&self) -> String {
        conversion_source_id(self.id)
    }
}

pub fn conversion_source_id(id: ConversionId) -> String {
    format!("conversion:{}", id)
}

/// Stored referral-link visit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralClick {
    pub id: i64,
    pub referral_code: String,
    pub referrer_signup_id: SignupId,
    pub ip_hash: Option<String>,
    pub ua_hash: Option<String>,
    pub session_id: Option<String>,
    pub landing_url: Option<String>,
    pub is_bot_suspected: bool,
    pub created_at: i64,
}

/// Leaderboard scoring period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Weekly,
    AllTime,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Weekly => "weekly",
            Period::AllTime => "all_time",
        }
    }
}

impl FromStr for Period {
    type Err = GrowthError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "weekly" | "week" => Ok(Period::Weekly),
            "all_time" | "alltime" | "all-time" => Ok(Period::AllTime),
            other => Err(GrowthError::InvalidInput(format!("unknown period: {}", other))),
        }
    }
}

/// Which signups a ranking is computed over
///
/// Not interchangeable: every call site states which population it ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Eligibility {
    /// `persona = creator`, has a creator coin, and has a referral code
    Creators,
    /// Any signup with a referral code
    AnyReferrer,
}
