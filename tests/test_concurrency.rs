//! Idempotence under concurrent requests
//!
//! Each worker gets its own connection to the same database file, the way
//! independent request handlers (or processes) would. Handles are opened up
//! front so schema setup is not part of the race.

#[cfg(test)]
mod concurrency_tests {
    use std::path::Path;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::tempdir;
    use waitlist_growth::growth::{
        ConversionStateMachine, GrowthService, NewSignup, PointsLedger, PointsSource,
        PositionAggregator, SignupId, SignupStore, Store,
    };

    const WORKERS: usize = 8;

    fn open_handles(path: &Path, n: usize) -> Vec<Store> {
        (0..n).map(|_| Store::open(path).unwrap()).collect()
    }

    fn ledger_rows(store: &Store, signup_id: SignupId) -> i64 {
        store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM points_ledger WHERE signup_id = ?1",
                    [signup_id],
                    |row| row.get(0),
                )?)
            })
            .unwrap()
    }

    #[test]
    fn test_concurrent_awards_write_one_row() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("growth.db");
        let stores = open_handles(&path, WORKERS);

        let signup_id = SignupStore::new(stores[0].clone())
            .insert_signup(&NewSignup::default())
            .unwrap();

        let barrier = Arc::new(Barrier::new(WORKERS));
        let handles: Vec<_> = stores
            .iter()
            .cloned()
            .map(|store| {
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let ledger = PointsLedger::new(store);
                    barrier.wait();
                    ledger
                        .award(signup_id, &PointsSource::Task, "task:verify-email", 40)
                        .unwrap()
                        .granted
                })
            })
            .collect();

        let granted: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(granted.iter().filter(|g| **g).count(), 1);
        assert_eq!(ledger_rows(&stores[0], signup_id), 1);
        assert_eq!(PointsLedger::new(stores[0].clone()).summarize(signup_id).unwrap().total, 40);
    }

    #[test]
    fn test_concurrent_qualification_awards_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("growth.db");
        let stores = open_handles(&path, WORKERS);

        let signups = SignupStore::new(stores[0].clone());
        let referrer = signups
            .insert_signup(&NewSignup {
                referral_code: Some("RACE".to_string()),
                ..Default::default()
            })
            .unwrap();
        let invitee = signups.insert_signup(&NewSignup::default()).unwrap();
        ConversionStateMachine::new(stores[0].clone())
            .attribute_signup(invitee, "RACE")
            .unwrap();
        signups.complete_profile(invitee).unwrap();

        let barrier = Arc::new(Barrier::new(WORKERS));
        let handles: Vec<_> = stores
            .iter()
            .cloned()
            .map(|store| {
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let conversions = ConversionStateMachine::new(store);
                    barrier.wait();
                    conversions
                        .qualify_on_profile_completion(invitee)
                        .unwrap()
                        .qualified
                })
            })
            .collect();

        let qualified: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(qualified.iter().filter(|q| **q).count(), 1);
        assert_eq!(ledger_rows(&stores[0], referrer), 1);

        let conversion = ConversionStateMachine::new(stores[0].clone())
            .find_by_invitee(invitee)
            .unwrap()
            .unwrap();
        assert!(conversion.qualified_at.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_profile_completion_requests() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("growth.db");
        let stores = open_handles(&path, WORKERS);

        let seed = GrowthService::new(stores[0].clone(), "k");
        let referrer = seed
            .signups()
            .insert_signup(&NewSignup {
                referral_code: Some("ASYNC".to_string()),
                ..Default::default()
            })
            .unwrap();
        let invitee = seed.signups().insert_signup(&NewSignup::default()).unwrap();
        seed.attribute_signup(invitee, "ASYNC").unwrap();

        let mut tasks = Vec::new();
        for store in stores.iter().cloned() {
            tasks.push(tokio::task::spawn_blocking(move || {
                GrowthService::new(store, "k").complete_profile(invitee).unwrap()
            }));
        }

        let mut newly_completed = 0;
        let mut qualified = 0;
        for task in tasks {
            let outcome = task.await.unwrap();
            newly_completed += outcome.newly_completed as usize;
            qualified += outcome.qualified as usize;
        }

        assert_eq!(newly_completed, 1);
        assert_eq!(qualified, 1);
        assert_eq!(seed.summarize(referrer).unwrap().invite, 100);
        assert_eq!(ledger_rows(&stores[0], referrer), 1);
    }

    #[test]
    fn test_position_rank_never_exceeds_population_during_inserts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("growth.db");
        let stores = open_handles(&path, 2);

        fn creator(code: String) -> NewSignup {
            NewSignup {
                referral_code: Some(code),
                persona: Some("creator".to_string()),
                has_creator_coin: true,
                ..Default::default()
            }
        }

        let me = SignupStore::new(stores[0].clone())
            .insert_signup(&creator("ME".to_string()))
            .unwrap();

        // New creators each get a conversion, so they rank ahead of `me`
        let writer_store = stores[1].clone();
        let writer = thread::spawn(move || {
            let signups = SignupStore::new(writer_store.clone());
            let conversions = ConversionStateMachine::new(writer_store);
            for i in 0..40 {
                let code = format!("RIVAL{}", i);
                signups.insert_signup(&creator(code.clone())).unwrap();
                let invitee = signups.insert_signup(&NewSignup::default()).unwrap();
                conversions.attribute_signup(invitee, &code).unwrap();
            }
        });

        let positions = PositionAggregator::new(stores[0].clone());
        while !writer.is_finished() {
            let summary = positions.position(me).unwrap();
            for snapshot in [summary.weekly, summary.all_time] {
                let rank = snapshot.rank.unwrap() as usize;
                assert!(
                    rank <= snapshot.total_count,
                    "rank {} of {}",
                    rank,
                    snapshot.total_count
                );
            }
        }
        writer.join().unwrap();

        let summary = positions.position(me).unwrap();
        assert_eq!(summary.all_time.total_count, 41);
        assert_eq!(summary.all_time.rank, Some(41));
        assert_eq!(summary.all_time.percentile, Some(100));
    }
}
