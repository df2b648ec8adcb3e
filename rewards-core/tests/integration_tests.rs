//! End-to-end flows over the in-memory store

use async_trait::async_trait;
use doc_store::{DocKey, Document, DocumentStore, MemoryStore, Query, Store, WriteSet};
use rewards_core::*;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Memory backend that aborts every commit writing to one collection
/// while `failing` is set
#[derive(Debug)]
struct FlakyCollection {
    inner: MemoryStore,
    collection: &'static str,
    failing: AtomicBool,
}

#[async_trait]
impl DocumentStore for FlakyCollection {
    async fn get(&self, key: &DocKey) -> doc_store::Result<Option<Document>> {
        self.inner.get(key).await
    }

    async fn query(&self, query: &Query) -> doc_store::Result<Vec<Document>> {
        self.inner.query(query).await
    }

    async fn commit(&self, writes: WriteSet) -> doc_store::Result<()> {
        let touches = writes
            .ops
            .iter()
            .any(|op| op.key().collection == self.collection);
        if touches && self.failing.load(Ordering::SeqCst) {
            return Err(doc_store::Error::Aborted(format!("{} unavailable", self.collection)));
        }
        self.inner.commit(writes).await
    }
}

fn service_with_attempts(max_attempts: u32) -> RewardsService {
    let store = Store::new(Arc::new(MemoryStore::new())).with_max_attempts(max_attempts);
    RewardsService::with_store(store, &Config::default()).expect("service")
}

fn service() -> RewardsService {
    service_with_attempts(doc_store::DEFAULT_MAX_ATTEMPTS)
}

async fn register(service: &RewardsService, id: &str) -> UserId {
    service
        .users()
        .register(NewUser {
            id: UserId::new(id),
            email: format!("{}@example.com", id),
            name: id.to_string(),
            picture: None,
        })
        .await
        .expect("register");
    UserId::new(id)
}

async fn fund(service: &RewardsService) {
    service.ledger().update_total_tokens(dec!(10000)).await.unwrap();
    service.ledger().update_allocated_tokens(dec!(5000)).await.unwrap();
}

fn new_team(creator: &UserId, limit: u32, distance: f64) -> NewTeam {
    NewTeam {
        creator: creator.clone(),
        name: "Night Owls".to_string(),
        member_limit: limit,
        total_distance: distance,
        logo: None,
    }
}

#[tokio::test]
async fn test_individual_runs_share_competition_ranks() {
    let service = service();
    let runners = [("ann", 50.0), ("ben", 50.0), ("cat", 60.0), ("dan", 40.0)];
    for (id, _) in &runners {
        register(&service, id).await;
    }

    for (id, duration) in &runners[..3] {
        service
            .leaderboard()
            .submit_run(&UserId::new(*id), 5.0, *duration)
            .await
            .unwrap();
    }
    let board = service.leaderboard().get_leaderboard(5.0, 1, None).await.unwrap();
    let ranks: Vec<u32> = board.iter().map(|r| r.rank).collect();
    assert_eq!(ranks, vec![1, 1, 3]);

    let fastest = service
        .leaderboard()
        .submit_run(&UserId::new("dan"), 5.0, 40.0)
        .await
        .unwrap();
    assert_eq!(fastest.rank, 1);

    let board = service.leaderboard().get_leaderboard(5.0, 1, None).await.unwrap();
    let ranks: Vec<u32> = board.iter().map(|r| r.rank).collect();
    assert_eq!(ranks, vec![1, 2, 2, 4]);

    // Other buckets are untouched
    assert!(service
        .leaderboard()
        .get_leaderboard(10.0, 1, None)
        .await
        .unwrap()
        .is_empty());

    // Paging
    let second = service
        .leaderboard()
        .get_leaderboard(5.0, 2, Some(3))
        .await
        .unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].rank, 4);
}

#[tokio::test]
async fn test_join_recomputes_assignments() {
    let service = service();
    let a = register(&service, "a").await;
    let b = register(&service, "b").await;
    let c = register(&service, "c").await;

    let team = service.teams().create_team(new_team(&a, 3, 10.0)).await.unwrap();
    service.teams().join_team(&team.id, &b).await.unwrap();
    let team = service.teams().join_team(&team.id, &c).await.unwrap();

    assert_eq!(team.assignments[&a], 3.33);
    assert_eq!(team.assignments[&b], 3.33);
    assert_eq!(team.assignments[&c], 3.34);
    assert!((team.assigned_total() - 10.0).abs() < 0.01);

    let d = register(&service, "d").await;
    let full = service.teams().join_team(&team.id, &d).await;
    assert!(matches!(full, Err(Error::Conflict(_))));

    let profile: UserProfile = service.store().get_record(c.as_str()).await.unwrap().unwrap();
    assert_eq!(profile.goal, Some(3.34));
    assert_eq!(profile.team_id, Some(team.id.clone()));
}

#[tokio::test]
async fn test_removal_redistributes_share() {
    let service = service();
    let a = register(&service, "a").await;
    let b = register(&service, "b").await;
    let c = register(&service, "c").await;

    let team = service.teams().create_team(new_team(&a, 3, 9.0)).await.unwrap();
    service.teams().join_team(&team.id, &b).await.unwrap();
    service.teams().join_team(&team.id, &c).await.unwrap();

    let denied = service.teams().remove_member(&team.id, &c, &b).await;
    assert!(matches!(denied, Err(Error::Unauthorized(_))));

    let team = service.teams().remove_member(&team.id, &c, &a).await.unwrap();
    assert_eq!(team.members, vec![a.clone(), b.clone()]);
    assert!((team.assignments[&a] - 4.5).abs() < 1e-9);
    assert!((team.assignments[&b] - 4.5).abs() < 1e-9);

    let removed: UserProfile = service.store().get_record(c.as_str()).await.unwrap().unwrap();
    assert_eq!(removed.team_id, None);
    assert_eq!(service.history().history(&c).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_respect_member_limit() {
    let service = service();
    let creator = register(&service, "creator").await;
    let team = service.teams().create_team(new_team(&creator, 4, 12.0)).await.unwrap();

    let mut joiners = Vec::new();
    for i in 0..10 {
        joiners.push(register(&service, &format!("joiner-{}", i)).await);
    }

    let handles: Vec<_> = joiners
        .into_iter()
        .map(|user| {
            let service = service.clone();
            let team_id = team.id.clone();
            tokio::spawn(async move { service.teams().join_team(&team_id, &user).await })
        })
        .collect();

    let mut joined = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => joined += 1,
            Err(err) => assert_eq!(err.kind(), ErrorKind::Conflict, "unexpected error: {}", err),
        }
    }

    let team = service.teams().get_team(&team.id).await.unwrap();
    assert_eq!(joined, 3);
    assert_eq!(team.members.len(), 4);
    assert_eq!(team.assignments.len(), 4);
    assert!((team.assigned_total() - 12.0).abs() < 0.01);
}

#[tokio::test]
async fn test_team_completion_ranks_aggregate() {
    let service = service();
    let a = register(&service, "a").await;
    let b = register(&service, "b").await;
    let c = register(&service, "c").await;

    let team = service.teams().create_team(new_team(&a, 3, 15.0)).await.unwrap();
    service.teams().join_team(&team.id, &b).await.unwrap();
    service.teams().join_team(&team.id, &c).await.unwrap();

    let not_creator = service.teams().start_run(&team.id, &b).await;
    assert!(matches!(not_creator, Err(Error::Unauthorized(_))));
    service.teams().start_run(&team.id, &a).await.unwrap();

    for (member, duration) in [(&a, 3.0), (&b, 4.0), (&c, 5.0)] {
        service
            .users()
            .update_live_stats(
                member,
                RunStats {
                    distance: 5.0,
                    duration,
                    calories: 100.0,
                    steps: 1000,
                },
            )
            .await
            .unwrap();
    }

    let first = service.teams().complete_member_run(&team.id, &a).await.unwrap();
    assert!(!first.team_completed);
    service.teams().complete_member_run(&team.id, &b).await.unwrap();
    let last = service.teams().complete_member_run(&team.id, &c).await.unwrap();

    assert!(last.team_completed);
    assert_eq!(last.team.run_status, RunStatus::Completed);
    let progress = last.team.team_progress.unwrap();
    assert_eq!(progress.duration, 12.0);
    assert_eq!(progress.distance, 15.0);
    assert_eq!(progress.steps, 3000);

    let entry = last.leaderboard_entry.unwrap();
    assert_eq!(entry.rank, 1);
    assert_eq!(entry.distance, 15.0);
    assert_eq!(entry.subject_id, team.id.to_string());

    let board = service
        .leaderboard()
        .get_team_leaderboard(15.0, 1, None)
        .await
        .unwrap();
    assert_eq!(board.len(), 1);
    assert_eq!(board[0].duration, 12.0);
    assert_eq!(board[0].members, Some(3));

    // Members were archived with their stats and reset afterwards
    for member in [&a, &b, &c] {
        let profile: UserProfile = service.store().get_record(member.as_str()).await.unwrap().unwrap();
        assert_eq!(profile.current_stats, RunStats::default());
        assert_eq!(profile.team_id, None);
        let history = service.history().history(member).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].stats.distance, 5.0);
    }

    let again = service.teams().complete_member_run(&team.id, &a).await;
    assert!(matches!(again, Err(Error::Conflict(_))));
}

async fn set_stats(service: &RewardsService, member: &UserId, distance: f64, duration: f64) {
    service
        .users()
        .update_live_stats(
            member,
            RunStats {
                distance,
                duration,
                calories: 0.0,
                steps: 0,
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_team_ranked_under_configured_distance() {
    let service = service();
    let a = register(&service, "a").await;
    let b = register(&service, "b").await;
    let c = register(&service, "c").await;

    let team = service.teams().create_team(new_team(&a, 3, 10.0)).await.unwrap();
    service.teams().join_team(&team.id, &b).await.unwrap();
    service.teams().join_team(&team.id, &c).await.unwrap();
    service.teams().start_run(&team.id, &a).await.unwrap();

    for (member, distance) in [(&a, 3.0), (&b, 4.0), (&c, 5.0)] {
        set_stats(&service, member, distance, 600.0).await;
    }
    for member in [&a, &b, &c] {
        service.teams().complete_member_run(&team.id, member).await.unwrap();
    }

    let team = service.teams().get_team(&team.id).await.unwrap();
    assert_eq!(team.run_status, RunStatus::Completed);
    let progress = team.team_progress.unwrap();
    assert_eq!(progress.distance, 12.0);
    assert_eq!(progress.duration, 1800.0);

    let board = service
        .leaderboard()
        .get_team_leaderboard(10.0, 1, None)
        .await
        .unwrap();
    assert_eq!(board.len(), 1);
    assert_eq!(board[0].distance, 10.0);
    assert_eq!(board[0].subject_id, team.id.to_string());
    assert!(service
        .leaderboard()
        .get_team_leaderboard(12.0, 1, None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_failed_team_ranking_leaves_completion_retryable() {
    let backend = Arc::new(FlakyCollection {
        inner: MemoryStore::new(),
        collection: "teamLeaderboard",
        failing: AtomicBool::new(false),
    });
    let store = Store::new(backend.clone()).with_max_attempts(2);
    let service = RewardsService::with_store(store, &Config::default()).unwrap();

    let a = register(&service, "a").await;
    let b = register(&service, "b").await;
    let team = service.teams().create_team(new_team(&a, 2, 10.0)).await.unwrap();
    service.teams().join_team(&team.id, &b).await.unwrap();
    service.teams().start_run(&team.id, &a).await.unwrap();
    set_stats(&service, &a, 5.0, 900.0).await;
    set_stats(&service, &b, 5.0, 1000.0).await;
    service.teams().complete_member_run(&team.id, &a).await.unwrap();

    backend.failing.store(true, Ordering::SeqCst);
    let err = service.teams().complete_member_run(&team.id, &b).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);

    // Nothing from the failed attempt committed
    let stored = service.teams().get_team(&team.id).await.unwrap();
    assert_eq!(stored.run_status, RunStatus::Started);
    assert_eq!(stored.team_progress, None);
    assert_eq!(stored.completed, vec![a.clone()]);

    backend.failing.store(false, Ordering::SeqCst);
    let retry = service.teams().complete_member_run(&team.id, &b).await.unwrap();
    assert!(retry.team_completed);
    assert_eq!(retry.team.run_status, RunStatus::Completed);
    let entry = retry.leaderboard_entry.unwrap();
    assert_eq!(entry.rank, 1);
    assert_eq!(entry.duration, 1900.0);

    let board = service
        .leaderboard()
        .get_team_leaderboard(10.0, 1, None)
        .await
        .unwrap();
    assert_eq!(board.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_keep_bucket_ranked() {
    let service = service_with_attempts(64);
    let durations = [
        300.0, 250.0, 300.0, 410.0, 250.0, 199.0, 300.0, 520.0, 199.0, 275.0, 410.0, 600.0,
    ];
    let mut runners = Vec::new();
    for i in 0..durations.len() {
        runners.push(register(&service, &format!("runner-{}", i)).await);
    }

    let handles: Vec<_> = runners
        .into_iter()
        .zip(durations)
        .map(|(user, duration)| {
            let service = service.clone();
            tokio::spawn(async move { service.leaderboard().submit_run(&user, 5.0, duration).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let board = service
        .leaderboard()
        .get_leaderboard(5.0, 1, Some(100))
        .await
        .unwrap();
    assert_eq!(board.len(), durations.len());
    for entry in &board {
        let faster = durations.iter().filter(|d| **d < entry.duration).count() as u32;
        assert_eq!(entry.rank, faster + 1, "duration {}", entry.duration);
    }
}

#[tokio::test]
async fn test_end_run_early_is_not_ranked() {
    let service = service();
    let a = register(&service, "a").await;
    let b = register(&service, "b").await;

    let team = service.teams().create_team(new_team(&a, 2, 8.0)).await.unwrap();
    service.teams().join_team(&team.id, &b).await.unwrap();

    let waiting = service.teams().end_run_for_all(&team.id, &a).await;
    assert!(matches!(waiting, Err(Error::Conflict(_))));

    service.teams().start_run(&team.id, &a).await.unwrap();
    let ended = service.teams().end_run_for_all(&team.id, &a).await.unwrap();
    assert_eq!(ended.run_status, RunStatus::Incomplete);
    assert_eq!(ended.ended_by, Some(a.clone()));

    assert!(service
        .leaderboard()
        .get_team_leaderboard(8.0, 1, None)
        .await
        .unwrap()
        .is_empty());
    let restart = service.teams().start_run(&team.id, &a).await;
    assert!(matches!(restart, Err(Error::Conflict(_))));
}

#[tokio::test]
async fn test_over_debit_leaves_balance() {
    let service = service();
    fund(&service).await;
    service
        .ledger()
        .set_flat_reward(
            FlatCategory::Registration,
            RewardSetting {
                tokens: dec!(10),
                status: RewardStatus::Active,
            },
        )
        .await
        .unwrap();
    let user = register(&service, "saver").await;

    let err = service
        .ledger()
        .debit(&user, dec!(15), "too much")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    let wallet = service.ledger().get_wallet(&user).await.unwrap();
    assert_eq!(wallet.balance, dec!(10));
    assert_eq!(wallet.log_balance(), dec!(10));
    assert!(service.metrics().encode().unwrap().contains("rewards_debits_rejected_total 1"));
}

#[tokio::test]
async fn test_distance_threshold_credits_once() {
    let service = service();
    fund(&service).await;
    let user = register(&service, "walker").await;
    service
        .ledger()
        .merge_distance_rewards(
            &[(
                10.0,
                RewardSetting {
                    tokens: dec!(25),
                    status: RewardStatus::Active,
                },
            )],
            Some(RewardStatus::Active),
        )
        .await
        .unwrap();

    service
        .users()
        .update_live_stats(
            &user,
            RunStats {
                distance: 11.0,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let first = service.users().get_profile(&user).await.unwrap();
    assert_eq!(first.thresholds_rewarded, vec![10.0]);
    let second = service.users().get_profile(&user).await.unwrap();
    assert!(second.thresholds_rewarded.is_empty());

    assert_eq!(service.ledger().get_wallet(&user).await.unwrap().balance, dec!(25));
    let stats = service.ledger().token_stats().await.unwrap();
    assert_eq!(stats.spent_tokens, dec!(25));
    assert_eq!(stats.in_circulation, dec!(25));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_allocations_account_every_token() {
    let service = service_with_attempts(20);
    fund(&service).await;
    service
        .ledger()
        .set_flat_reward(
            FlatCategory::Login,
            RewardSetting {
                tokens: dec!(5),
                status: RewardStatus::Active,
            },
        )
        .await
        .unwrap();

    let mut users = Vec::new();
    for i in 0..8 {
        users.push(register(&service, &format!("login-{}", i)).await);
    }

    let handles: Vec<_> = users
        .iter()
        .cloned()
        .map(|user| {
            let service = service.clone();
            tokio::spawn(async move { service.users().record_login(&user).await })
        })
        .collect();
    for handle in handles {
        let allocation = handle.await.unwrap().unwrap();
        assert_eq!(allocation.map(|a| a.amount), Some(dec!(5)));
    }

    let stats = service.ledger().token_stats().await.unwrap();
    assert_eq!(stats.spent_tokens, dec!(40));
    assert_eq!(stats.in_circulation, dec!(40));
    assert_eq!(stats.wallet_count, 8);
}
