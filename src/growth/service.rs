//! Growth service facade
//!
//! Bundles every component over one store handle and exposes the outbound
//! operations. Each call is an independent request; nothing but the store is
//! shared between calls.

use super::clicks::{ClickAttributor, ClickInput, ClickOutcome};
use super::conversions::{ConversionStateMachine, QualifyOutcome};
use super::db::Store;
use super::epoch::{system_clock, Clock};
use super::error::GrowthResult;
use super::ledger::{AwardOutcome, PointsLedger};
use super::position::{PositionAggregator, PositionSummary};
use super::ranking::{LeaderboardEntry, RankingEngine};
use super::signups::SignupStore;
use super::types::{ConversionId, Eligibility, Period, PointsBreakdown, PointsSource, SignupId};
use crate::config::GrowthConfig;
use serde::{Deserialize, Serialize};

/// Result of the profile-completion trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileCompletion {
    /// This call set `profile_completed_at`
    pub newly_completed: bool,
    /// This call qualified the signup's referral conversion
    pub qualified: bool,
}

#[derive(Clone)]
pub struct GrowthService {
    store: Store,
    signups: SignupStore,
    ledger: PointsLedger,
    clicks: ClickAttributor,
    conversions: ConversionStateMachine,
    ranking: RankingEngine,
    positions: PositionAggregator,
}

impl GrowthService {
    pub fn new(store: Store, hash_key: impl Into<String>) -> Self {
        Self::with_clock(store, hash_key, system_clock())
    }

    pub fn with_clock(store: Store, hash_key: impl Into<String>, now_fn: Clock) -> Self {
        Self {
            signups: SignupStore::with_clock(store.clone(), now_fn.clone()),
            ledger: PointsLedger::with_clock(store.clone(), now_fn.clone()),
            clicks: ClickAttributor::with_clock(store.clone(), hash_key, now_fn.clone()),
            conversions: ConversionStateMachine::with_clock(store.clone(), now_fn.clone()),
            ranking: RankingEngine::with_clock(store.clone(), now_fn.clone()),
            positions: PositionAggregator::with_clock(store.clone(), now_fn),
            store,
        }
    }

    /// Open the configured database (running directory migrations if a schema
    /// dir is set) and build the service over it
    pub fn from_config(config: &GrowthConfig) -> GrowthResult<Self> {
        let store = match &config.schema_dir {
            Some(dir) => Store::open_with_migrations(&config.db_path, dir)?,
            None => Store::open(&config.db_path)?,
        };
        Ok(Self::new(store, config.hash_key.clone()))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn signups(&self) -> &SignupStore {
        &self.signups
    }

    pub fn record_click(&self, input: &ClickInput) -> GrowthResult<ClickOutcome> {
        self.clicks.record_click(input)
    }

    pub fn award(
        &self,
        signup_id: SignupId,
        source: &PointsSource,
        source_id: &str,
        amount: i64,
    ) -> GrowthResult<AwardOutcome> {
        self.ledger.award(signup_id, source, source_id, amount)
    }

    pub fn attribute_signup(
        &self,
        invitee_signup_id: SignupId,
        referral_code: &str,
    ) -> GrowthResult<Option<ConversionId>> {
        self.conversions.attribute_signup(invitee_signup_id, referral_code)
    }

    pub fn qualify_on_profile_completion(
        &self,
        invitee_signup_id: SignupId,
    ) -> GrowthResult<QualifyOutcome> {
        self.conversions.qualify_on_profile_completion(invitee_signup_id)
    }

    /// Mark the profile complete, then run the qualification trigger
    ///
    /// Qualification runs even when the profile was already complete, so a
    /// retry after a failed award still converges.
    pub fn complete_profile(&self, signup_id: SignupId) -> GrowthResult<ProfileCompletion> {
        let newly_completed = self.signups.complete_profile(signup_id)?;
        let qualified = self
            .conversions
            .qualify_on_profile_completion(signup_id)?
            .qualified;

        Ok(ProfileCompletion {
            newly_completed,
            qualified,
        })
    }

    pub fn leaderboard(
        &self,
        period: Period,
        eligibility: Eligibility,
        limit: usize,
    ) -> GrowthResult<Vec<LeaderboardEntry>> {
        self.ranking.leaderboard(period, eligibility, limit)
    }

    pub fn rank_for(
        &self,
        signup_id: SignupId,
        period: Period,
        eligibility: Eligibility,
    ) -> GrowthResult<Option<u32>> {
        self.ranking.rank_for(signup_id, period, eligibility)
    }

    pub fn summarize(&self, signup_id: SignupId) -> GrowthResult<PointsBreakdown> {
        self.ledger.summarize(signup_id)
    }

    /// Position among creators (see [`PositionAggregator::position`])
    pub fn position(&self, signup_id: SignupId) -> GrowthResult<PositionSummary> {
        self.positions.position(signup_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::growth::epoch::fixed_clock;
    use crate::growth::signups::NewSignup;

    #[test]
    fn test_complete_profile_triggers_qualification_once() {
        let service = GrowthService::with_clock(
            Store::open_in_memory().unwrap(),
            "secret",
            fixed_clock(1_704_153_600),
        );

        let referrer = service
            .signups()
            .insert_signup(&NewSignup {
                referral_code: Some("REF1".to_string()),
                ..Default::default()
            })
            .unwrap();
        let invitee = service.signups().insert_signup(&NewSignup::default()).unwrap();
        assert!(service.attribute_signup(invitee, "ref1").unwrap().is_some());

        let first = service.complete_profile(invitee).unwrap();
        assert_eq!(
            first,
            ProfileCompletion {
                newly_completed: true,
                qualified: true
            }
        );

        let second = service.complete_profile(invitee).unwrap();
        assert_eq!(
            second,
            ProfileCompletion {
                newly_completed: false,
                qualified: false
            }
        );

        assert_eq!(service.summarize(referrer).unwrap().invite, 100);
        assert_eq!(
            service
                .rank_for(referrer, Period::Weekly, Eligibility::AnyReferrer)
                .unwrap(),
            Some(1)
        );
    }

    #[test]
    fn test_unreferred_profile_completion() {
        let service = GrowthService::new(Store::open_in_memory().unwrap(), "secret");
        let signup = service.signups().insert_signup(&NewSignup::default()).unwrap();

        let outcome = service.complete_profile(signup).unwrap();
        assert!(outcome.newly_completed);
        assert!(!outcome.qualified);
    }

    #[test]
    fn test_from_config_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = GrowthConfig {
            db_path: dir.path().join("nested/growth.db").to_string_lossy().to_string(),
            schema_dir: None,
            hash_key: "k".to_string(),
            leaderboard_limit: 25,
        };

        let service = GrowthService::from_config(&config).unwrap();
        assert!(service
            .leaderboard(Period::AllTime, Eligibility::AnyReferrer, 10)
            .unwrap()
            .is_empty());
        assert!(dir.path().join("nested/growth.db").exists());
    }
}
