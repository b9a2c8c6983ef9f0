//! Referral conversion state machine
//!
//! ```text
//! attribute_signup()                 qualify_on_profile_completion()
//!        │                                        │
//!        ▼                                        ▼
//!    PENDING ──────────────────────────────▶ QUALIFIED (terminal)
//!                                   + one referral_qualified ledger row
//! ```
//!
//! Qualification preconditions, checked in order:
//! 1. invitee's `profile_completed_at` is set
//! 2. a conversion exists for the invitee
//! 3. the conversion is valid
//! 4. the conversion is not already qualified (status or `qualified_at`)
//!
//! The status flip and the referrer's award commit in one IMMEDIATE
//! transaction. The UPDATE is conditional on `qualified_at IS NULL`, and the
//! ledger's unique key backs it up, so concurrent or retried calls produce one
//! transition and one ledger row.

use super::db::Store;
use super::epoch::{system_clock, Clock};
use super::error::GrowthResult;
use super::ledger::insert_entry;
use super::signups::{find_signup, normalize_referral_code, resolve_referral_code};
use super::types::{
    ConversionId, ConversionStatus, PointsSource, ReferralConversion, SignupId,
};
use crate::config::QUALIFIED_REFERRAL_POINTS;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};

const CONVERSION_COLUMNS: &str =
    "id, referrer_signup_id, invitee_signup_id, is_valid, status, qualified_at, created_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualifyOutcome {
    pub qualified: bool,
}

/// Qualified vs. pending invites for one referrer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralCounts {
    /// `status = qualified` or `qualified_at` set
    pub qualified_count: i64,
    /// Valid and not yet qualified (true count, uncapped)
    pub pending_count: i64,
}

#[derive(Clone)]
pub struct ConversionStateMachine {
    store: Store,
    now_fn: Clock,
    qualified_points: i64,
}

impl ConversionStateMachine {
    pub fn new(store: Store) -> Self {
        Self::with_clock(store, system_clock())
    }

    pub fn with_clock(store: Store, now_fn: Clock) -> Self {
        Self {
            store,
            now_fn,
            qualified_points: QUALIFIED_REFERRAL_POINTS,
        }
    }

    /// Create the pending conversion for an invitee who joined via a code
    ///
    /// Signup-side collaborator hook. First attribution wins: a second call for
    /// the same invitee leaves the existing row alone and returns `None`.
    /// Self-referrals are stored with `is_valid = false`.
    ///
    /// Unknown or empty codes return `None`.
    pub fn attribute_signup(
        &self,
        invitee_signup_id: SignupId,
        referral_code: &str,
    ) -> GrowthResult<Option<ConversionId>> {
        let Some(code) = normalize_referral_code(referral_code) else {
            return Ok(None);
        };
        let now = (self.now_fn)();

        self.store.with_conn(|conn| {
            let Some(referrer_signup_id) = resolve_referral_code(conn, &code)? else {
                log::debug!("No referrer for code {}, invitee {} unattributed", code, invitee_signup_id);
                return Ok(None);
            };

            let is_valid = referrer_signup_id != invitee_signup_id;
            if !is_valid {
                log::warn!("Self-referral by signup {} recorded as invalid", invitee_signup_id);
            }

            let inserted = conn.execute(
                "INSERT INTO referral_conversions (
                    referrer_signup_id, invitee_signup_id, is_valid, status, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(invitee_signup_id) DO NOTHING",
                params![
                    referrer_signup_id,
                    invitee_signup_id,
                    is_valid,
                    ConversionStatus::Pending.as_str(),
                    now,
                ],
            )?;

            if inserted == 0 {
                log::debug!("Invitee {} already attributed, keeping first referrer", invitee_signup_id);
                return Ok(None);
            }

            Ok(Some(conn.last_insert_rowid()))
        })
    }

    /// Qualify the invitee's conversion and award the referrer
    ///
    /// Invoked by the profile-completion collaborator. Safe to call any number
    /// of times, sequentially or concurrently: only one call ever returns
    /// `qualified = true`. An invitee who was never referred is a no-op.
    pub fn qualify_on_profile_completion(
        &self,
        invitee_signup_id: SignupId,
    ) -> GrowthResult<QualifyOutcome> {
        let now = (self.now_fn)();
        let points = self.qualified_points;

        self.store.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let profile_completed = find_signup(&tx, invitee_signup_id)?
                .and_then(|signup| signup.profile_completed_at)
                .is_some();
            if !profile_completed {
                log::debug!("Signup {} has no completed profile, not qualifying", invitee_signup_id);
                return Ok(QualifyOutcome { qualified: false });
            }

            let Some(conversion) = find_by_invitee(&tx, invitee_signup_id)? else {
                return Ok(QualifyOutcome { qualified: false });
            };

            if !conversion.is_valid {
                log::debug!("Conversion {} is invalid, no award", conversion.id);
                return Ok(QualifyOutcome { qualified: false });
            }

            if conversion.is_qualified() {
                log::debug!("Conversion {} already qualified", conversion.id);
                return Ok(QualifyOutcome { qualified: false });
            }

            let flipped = tx.execute(
                "UPDATE referral_conversions
                 SET status = ?1, qualified_at = ?2
                 WHERE id = ?3
                   AND is_valid = 1
                   AND qualified_at IS NULL
                   AND status NOT IN ('qualified', 'csw_linked')",
                params![ConversionStatus::Qualified.as_str(), now, conversion.id],
            )?;
            if flipped == 0 {
                return Ok(QualifyOutcome { qualified: false });
            }

            let granted = insert_entry(
                &tx,
                conversion.referrer_signup_id,
                &PointsSource::ReferralQualified,
                &conversion.award_source_id(),
                points,
                now,
            )?;
            if !granted {
                log::warn!(
                    "Conversion {} qualified but its award already existed",
                    conversion.id
                );
            }

            tx.commit()?;

            log::info!(
                "🎯 Conversion {} qualified (referrer {}, invitee {})",
                conversion.id,
                conversion.referrer_signup_id,
                invitee_signup_id
            );

            Ok(QualifyOutcome { qualified: true })
        })
    }

    pub fn find_by_invitee(
        &self,
        invitee_signup_id: SignupId,
    ) -> GrowthResult<Option<ReferralConversion>> {
        self.store.with_conn(|conn| find_by_invitee(conn, invitee_signup_id))
    }

    /// Every conversion credited to a referrer, oldest first
    pub fn conversions_for_referrer(
        &self,
        referrer_signup_id: SignupId,
    ) -> GrowthResult<Vec<ReferralConversion>> {
        let sql = format!(
            "SELECT {} FROM referral_conversions
             WHERE referrer_signup_id = ?1
             ORDER BY created_at ASC, id ASC",
            CONVERSION_COLUMNS
        );
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&sql)?;
            let conversions = stmt
                .query_map([referrer_signup_id], map_conversion)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(conversions)
        })
    }

    pub fn referral_counts(&self, referrer_signup_id: SignupId) -> GrowthResult<ReferralCounts> {
        self.store.with_conn(|conn| referral_counts(conn, referrer_signup_id))
    }
}

fn find_by_invitee(
    conn: &Connection,
    invitee_signup_id: SignupId,
) -> GrowthResult<Option<ReferralConversion>> {
    let sql = format!(
        "SELECT {} FROM referral_conversions WHERE invitee_signup_id = ?1",
        CONVERSION_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    Ok(stmt.query_row([invitee_signup_id], map_conversion).optional()?)
}

pub(crate) fn referral_counts(
    conn: &Connection,
    referrer_signup_id: SignupId,
) -> GrowthResult<ReferralCounts> {
    let mut stmt = conn.prepare_cached(
        "SELECT
            COALESCE(SUM(CASE
                WHEN status IN ('qualified', 'csw_linked') OR qualified_at IS NOT NULL THEN 1
                ELSE 0 END), 0),
            COALESCE(SUM(CASE
                WHEN is_valid = 1
                 AND status NOT IN ('qualified', 'csw_linked')
                 AND qualified_at IS NULL THEN 1
                ELSE 0 END), 0)
         FROM referral_conversions
         WHERE referrer_signup_id = ?1",
    )?;

    let counts = stmt.query_row([referrer_signup_id], |row| {
        Ok(ReferralCounts {
            qualified_count: row.get(0)?,
            pending_count: row.get(1)?,
        })
    })?;

    Ok(counts)
}

fn map_conversion(row: &Row<'_>) -> rusqlite::Result<ReferralConversion> {
    Ok(ReferralConversion {
        id: row.get(0)?,
        referrer_signup_id: row.get(1)?,
        invitee_signup_id: row.get(2)?,
        is_valid: row.get(3)?,
        status: ConversionStatus::from_db(&row.get::<_, String>(4)?),
        qualified_at: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::growth::epoch::fixed_clock;
    use crate::growth::ledger::PointsLedger;
    use crate::growth::signups::{NewSignup, SignupStore};

    struct Fixture {
        store: Store,
        signups: SignupStore,
        conversions: ConversionStateMachine,
        ledger: PointsLedger,
        referrer: SignupId,
        invitee: SignupId,
    }

    fn setup() -> Fixture {
        let store = Store::open_in_memory().unwrap();
        let clock = fixed_clock(1_700_000_000);
        let signups = SignupStore::with_clock(store.clone(), clock.clone());

        let referrer = signups
            .insert_signup(&NewSignup {
                referral_code: Some("ABC123".to_string()),
                ..Default::default()
            })
            .unwrap();
        let invitee = signups
            .insert_signup(&NewSignup {
                referral_code: Some("INV001".to_string()),
                ..Default::default()
            })
            .unwrap();

        Fixture {
            conversions: ConversionStateMachine::with_clock(store.clone(), clock.clone()),
            ledger: PointsLedger::with_clock(store.clone(), clock),
            store,
            signups,
            referrer,
            invitee,
        }
    }

    fn referral_rows(f: &Fixture) -> usize {
        f.ledger
            .entries_for(f.referrer)
            .unwrap()
            .iter()
            .filter(|e| e.source == PointsSource::ReferralQualified)
            .count()
    }

    #[test]
    fn test_attribute_then_qualify_awards_referrer_once() {
        let f = setup();
        let conversion_id = f.conversions.attribute_signup(f.invitee, "abc123").unwrap().unwrap();

        let pending = f.conversions.find_by_invitee(f.invitee).unwrap().unwrap();
        assert_eq!(pending.status, ConversionStatus::Pending);
        assert!(pending.is_valid);

        f.signups.complete_profile(f.invitee).unwrap();
        assert!(f.conversions.qualify_on_profile_completion(f.invitee).unwrap().qualified);
        assert!(!f.conversions.qualify_on_profile_completion(f.invitee).unwrap().qualified);

        let qualified = f.conversions.find_by_invitee(f.invitee).unwrap().unwrap();
        assert_eq!(qualified.status, ConversionStatus::Qualified);
        assert_eq!(qualified.qualified_at, Some(1_700_000_000));

        let entries = f.ledger.entries_for(f.referrer).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source_id, format!("conversion:{}", conversion_id));
        assert_eq!(entries[0].amount, QUALIFIED_REFERRAL_POINTS);
    }

    #[test]
    fn test_profile_not_completed_does_not_qualify() {
        let f = setup();
        f.conversions.attribute_signup(f.invitee, "ABC123").unwrap();

        assert!(!f.conversions.qualify_on_profile_completion(f.invitee).unwrap().qualified);
        assert_eq!(referral_rows(&f), 0);
    }

    #[test]
    fn test_unreferred_invitee_is_noop() {
        let f = setup();
        f.signups.complete_profile(f.invitee).unwrap();

        for _ in 0..3 {
            assert!(!f.conversions.qualify_on_profile_completion(f.invitee).unwrap().qualified);
        }
        assert_eq!(referral_rows(&f), 0);
    }

    #[test]
    fn test_invalid_conversion_never_awards() {
        let f = setup();
        f.conversions.attribute_signup(f.invitee, "ABC123").unwrap();
        f.store
            .with_conn(|conn| {
                conn.execute("UPDATE referral_conversions SET is_valid = 0", [])?;
                Ok(())
            })
            .unwrap();
        f.signups.complete_profile(f.invitee).unwrap();

        for _ in 0..3 {
            assert!(!f.conversions.qualify_on_profile_completion(f.invitee).unwrap().qualified);
        }
        assert_eq!(referral_rows(&f), 0);
        assert_eq!(
            f.conversions.find_by_invitee(f.invitee).unwrap().unwrap().status,
            ConversionStatus::Pending
        );
    }

    #[test]
    fn test_legacy_csw_linked_counts_as_qualified() {
        let f = setup();
        f.conversions.attribute_signup(f.invitee, "ABC123").unwrap();
        f.store
            .with_conn(|conn| {
                conn.execute("UPDATE referral_conversions SET status = 'csw_linked'", [])?;
                Ok(())
            })
            .unwrap();
        f.signups.complete_profile(f.invitee).unwrap();

        assert!(!f.conversions.qualify_on_profile_completion(f.invitee).unwrap().qualified);
        assert_eq!(referral_rows(&f), 0);

        let counts = f.conversions.referral_counts(f.referrer).unwrap();
        assert_eq!(counts.qualified_count, 1);
        assert_eq!(counts.pending_count, 0);
    }

    #[test]
    fn test_first_attribution_wins() {
        let f = setup();
        let other = f
            .signups
            .insert_signup(&NewSignup {
                referral_code: Some("OTHER1".to_string()),
                ..Default::default()
            })
            .unwrap();

        assert!(f.conversions.attribute_signup(f.invitee, "ABC123").unwrap().is_some());
        assert!(f.conversions.attribute_signup(f.invitee, "OTHER1").unwrap().is_none());

        let conversion = f.conversions.find_by_invitee(f.invitee).unwrap().unwrap();
        assert_eq!(conversion.referrer_signup_id, f.referrer);
        assert!(f.conversions.conversions_for_referrer(other).unwrap().is_empty());
    }

    #[test]
    fn test_self_referral_is_recorded_invalid() {
        let f = setup();
        f.conversions.attribute_signup(f.referrer, "ABC123").unwrap();

        let conversion = f.conversions.find_by_invitee(f.referrer).unwrap().unwrap();
        assert!(!conversion.is_valid);

        f.signups.complete_profile(f.referrer).unwrap();
        assert!(!f.conversions.qualify_on_profile_completion(f.referrer).unwrap().qualified);
    }

    #[test]
    fn test_unknown_code_is_not_attributed() {
        let f = setup();
        assert!(f.conversions.attribute_signup(f.invitee, "NOPE").unwrap().is_none());
        assert!(f.conversions.attribute_signup(f.invitee, "  ").unwrap().is_none());
        assert!(f.conversions.find_by_invitee(f.invitee).unwrap().is_none());
    }

    #[test]
    fn test_referral_counts_split_pending_and_qualified() {
        let f = setup();
        let mut invitees = Vec::new();
        for _ in 0..4 {
            let id = f.signups.insert_signup(&NewSignup::default()).unwrap();
            f.conversions.attribute_signup(id, "ABC123").unwrap();
            invitees.push(id);
        }

        f.signups.complete_profile(invitees[0]).unwrap();
        f.conversions.qualify_on_profile_completion(invitees[0]).unwrap();
        f.store
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE referral_conversions SET is_valid = 0 WHERE invitee_signup_id = ?1",
                    [invitees[1]],
                )?;
                Ok(())
            })
            .unwrap();

        let counts = f.conversions.referral_counts(f.referrer).unwrap();
        assert_eq!(counts.qualified_count, 1);
        assert_eq!(counts.pending_count, 2);
    }
}
