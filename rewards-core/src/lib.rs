//! RunRewards Core
//!
//! Leaderboards, team runs and the token economy of a running-rewards
//! platform, on top of [`doc_store`].
//!
//! # Architecture
//!
//! - **Leaderboard Ranker**: competition ranks per exact distance bucket
//! - **Team Coordinator**: membership, distance shares and the team run
//!   lifecycle
//! - **Token Ledger**: wallets, the two-level reward configuration and
//!   allocation
//! - **Side effects**: history archiving and token rewards never fail the
//!   operation that triggered them
//!
//! # Invariants
//!
//! - rank = 1 + number of strictly smaller durations in the bucket
//! - Team members never exceed the member limit
//! - Team assignments sum to the team distance
//! - Wallet balances are never negative and match their entry log

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod history;
pub mod leaderboard;
pub mod ledger;
pub mod metrics;
pub mod payments;
pub mod service;
pub mod team;
pub mod types;
pub mod users;

// Re-exports
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use history::{HistoryRecorder, StoreHistoryRecorder};
pub use leaderboard::{competition_ranks, LeaderboardRanker};
pub use ledger::{Allocation, CatalogueCategory, FlatCategory, TokenLedger, TokenStats};
pub use metrics::Metrics;
pub use payments::{PackageAssigner, PackageAssignment, PaymentNotice};
pub use service::RewardsService;
pub use team::{Completion, NewTeam, TeamCoordinator, TeamView};
pub use types::{
    Board, RewardSetting, RewardStatus, RewardTrigger, RunRecord, RunStats, RunStatus, Team,
    TeamId, TokenConfig, UserId, UserProfile, Wallet,
};
pub use users::{AchievementKind, Award, NewUser, ProfileView, UserDirectory};
