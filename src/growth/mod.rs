//! # Referral Growth Core
//!
//! Referral attribution, exactly-once point grants, and deterministic
//! leaderboards for the product waitlist.
//!
//! ## Flow
//!
//! 1. A visitor opens a referral link → `clicks` stores a hashed, deduped click
//! 2. The visitor signs up with the code → `conversions` creates a pending conversion
//! 3. The invitee completes their profile → the conversion qualifies and the
//!    referrer gets one `referral_qualified` ledger row
//! 4. Leaderboard / position reads rank on demand from the store
//!
//! ## Idempotence
//!
//! Every write path is keyed in storage, never by check-then-insert:
//! - `points_ledger` UNIQUE(signup_id, source, source_id)
//! - `referral_conversions` UNIQUE(invitee_signup_id), conditional qualification UPDATE
//! - click dedupe check and insert share one IMMEDIATE transaction
//!
//! No ranks, totals, or rate-limit state are cached in process.
//!
//! ## Module Organization
//!
//! - `db` - Store handle, schema loading
//! - `types` - Rows and enums shared across components
//! - `epoch` - Clock injection and UTC week boundaries
//! - `signups` - Signup lookup adapter (external collaborator)
//! - `ledger` - Points ledger
//! - `clicks` - Click attribution and bot heuristic
//! - `conversions` - Conversion state machine
//! - `ranking` - Leaderboards and ranks
//! - `position` - Per-signup position summary
//! - `service` - Facade over all of the above

pub mod clicks;
pub mod conversions;
pub mod db;
pub mod epoch;
pub mod error;
pub mod ledger;
pub mod position;
pub mod ranking;
pub mod service;
pub mod signups;
pub mod types;

pub use clicks::{ClickAttributor, ClickInput, ClickOutcome};
pub use conversions::{ConversionStateMachine, QualifyOutcome, ReferralCounts};
pub use db::Store;
pub use epoch::{fixed_clock, system_clock, Clock, WeekEpoch};
pub use error::{GrowthError, GrowthResult};
pub use ledger::{AwardOutcome, PointsLedger};
pub use position::{PositionAggregator, PositionSummary, RankSnapshot, ReferralSummary};
pub use ranking::{LeaderboardEntry, RankingEngine};
pub use service::{GrowthService, ProfileCompletion};
pub use signups::{NewSignup, SignupStore};
pub use types::{
    ConversionStatus, Eligibility, Period, PointsBreakdown, PointsLedgerEntry, PointsSource,
    ReferralClick, ReferralConversion, Signup, SignupId,
};
