//! Property-based tests for ranking, assignment and wallet invariants
//!
//! These tests verify properties that must hold for all inputs, not just
//! specific test cases.

use chrono::Utc;
use proptest::prelude::*;
use rewards_core::leaderboard::{competition_ranks, plan_insertion};
use rewards_core::team::{even_assignments, redistribute_share};
use rewards_core::{RunRecord, UserId, Wallet};
use rust_decimal::Decimal;

fn record(id: usize, duration: f64, rank: u32) -> RunRecord {
    RunRecord {
        id: format!("run-{:04}", id),
        subject_id: format!("user-{}", id),
        name: String::new(),
        picture: None,
        distance: 5.0,
        duration,
        rank,
        timestamp: Utc::now(),
        created_by: None,
        members: None,
    }
}

fn members(n: usize) -> Vec<UserId> {
    (0..n).map(|i| UserId::new(format!("member-{}", i))).collect()
}

// ============================================================================
// Ranking Invariants
// ============================================================================

proptest! {
    /// Property: rank = 1 + number of strictly smaller durations
    #[test]
    fn ranks_count_strictly_smaller(mut durations in prop::collection::vec(1u32..50, 0..40)) {
        durations.sort_unstable();
        let durations: Vec<f64> = durations.into_iter().map(f64::from).collect();
        let ranks = competition_ranks(&durations);

        for (index, duration) in durations.iter().enumerate() {
            let smaller = durations.iter().filter(|d| *d < duration).count() as u32;
            prop_assert_eq!(ranks[index], smaller + 1);
        }
    }

    /// Property: inserting runs one by one keeps every stored rank correct
    #[test]
    fn sequential_inserts_keep_ranks(arrivals in prop::collection::vec(1u32..30, 1..30)) {
        let mut bucket: Vec<RunRecord> = Vec::new();

        for (id, duration) in arrivals.iter().enumerate() {
            let duration = f64::from(*duration);
            let plan = plan_insertion(&bucket, duration);
            for (entry_id, rank) in &plan.updates {
                if let Some(entry) = bucket.iter_mut().find(|r| &r.id == entry_id) {
                    entry.rank = *rank;
                }
            }
            bucket.insert(plan.position, record(id, duration, plan.rank));
        }

        for entry in &bucket {
            let smaller = bucket.iter().filter(|r| r.duration < entry.duration).count() as u32;
            prop_assert_eq!(entry.rank, smaller + 1);
        }
        prop_assert!(bucket.windows(2).all(|w| w[0].duration <= w[1].duration));
    }
}

// ============================================================================
// Assignment Invariants
// ============================================================================

proptest! {
    /// Property: shares sum to the rounded total and differ by at most one unit
    #[test]
    fn even_assignments_sum_to_total(
        n in 1usize..20,
        total_cents in 1u32..1_000_000,
    ) {
        let total = f64::from(total_cents) / 100.0;
        let assignments = even_assignments(&members(n), total, 2);

        prop_assert_eq!(assignments.len(), n);
        let sum: f64 = assignments.values().sum();
        prop_assert!((sum - total).abs() < 0.01);

        let min = assignments.values().cloned().fold(f64::INFINITY, f64::min);
        let max = assignments.values().cloned().fold(f64::NEG_INFINITY, f64::max);
        prop_assert!(max - min <= 0.01 + 1e-9);
    }

    /// Property: removing a member keeps the sum of shares
    #[test]
    fn removal_keeps_sum(
        n in 2usize..15,
        removed in 0usize..15,
        total_cents in 1u32..1_000_000,
    ) {
        let removed = removed % n;
        let team = members(n);
        let total = f64::from(total_cents) / 100.0;
        let mut assignments = even_assignments(&team, total, 2);
        let before: f64 = assignments.values().sum();

        let target = team[removed].clone();
        let remaining: Vec<UserId> = team.into_iter().filter(|m| m != &target).collect();
        redistribute_share(&mut assignments, &remaining, &target);

        prop_assert!(!assignments.contains_key(&target));
        prop_assert_eq!(assignments.len(), n - 1);
        let after: f64 = assignments.values().sum();
        prop_assert!((after - before).abs() < 1e-6);
    }
}

// ============================================================================
// Wallet Invariants
// ============================================================================

proptest! {
    /// Property: balance never goes negative and always equals the log sum
    #[test]
    fn wallet_balance_matches_log(ops in prop::collection::vec((any::<bool>(), 1i64..10_000), 0..60)) {
        let mut wallet = Wallet::new(UserId::new("prop"));

        for (is_credit, cents) in ops {
            let amount = Decimal::new(cents, 2);
            if is_credit {
                wallet.credit(amount, "credit");
            } else {
                let before = wallet.balance;
                let entries = wallet.transactions.len();
                if wallet.debit(amount, "debit").is_err() {
                    prop_assert_eq!(wallet.balance, before);
                    prop_assert_eq!(wallet.transactions.len(), entries);
                }
            }
            prop_assert!(wallet.balance >= Decimal::ZERO);
            prop_assert_eq!(wallet.balance, wallet.log_balance());
        }
    }
}
