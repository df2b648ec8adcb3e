//! Core records of the rewards backend
//!
//! Every record maps to one document. Optional fields are skipped when
//! `None`, so clearing a field is done with an explicit `Delete` merge.

use chrono::{DateTime, Utc};
use doc_store::Record;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from an existing id
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get as string
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }
    };
}

string_id!(
    /// User identifier (issued by the identity provider)
    UserId
);

string_id!(
    /// Team identifier
    TeamId
);

impl TeamId {
    /// Fresh time-ordered id
    pub fn generate() -> Self {
        Self(doc_store::new_id())
    }
}

/// Collection names
pub mod collections {
    /// User profiles
    pub const USERS: &str = "users";
    /// Teams
    pub const TEAMS: &str = "teams";
    /// Individual leaderboard
    pub const LEADERBOARD: &str = "leaderboard";
    /// Team leaderboard
    pub const TEAM_LEADERBOARD: &str = "teamLeaderboard";
    /// Wallets, keyed by owner
    pub const WALLETS: &str = "wallets";
    /// Token configuration singleton
    pub const TOKEN_CONFIG: &str = "blockchain_config";
    /// Allocation log
    pub const TOKEN_TRANSACTIONS: &str = "token_transactions";
    /// Archived history entries
    pub const USER_HISTORY: &str = "userHistory";
    /// Purchasable packages
    pub const PACKAGES: &str = "packages";
    /// Package milestone definitions
    pub const ACHIEVEMENTS: &str = "achievements";
    /// Reward catalogue
    pub const REWARDS: &str = "rewards";
    /// Badge catalogue
    pub const BADGES: &str = "badges";
    /// Spinner catalogue
    pub const SPINNERS: &str = "spinners";
}

/// Live run statistics; missing values read as zero
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunStats {
    /// Distance covered (km)
    pub distance: f64,
    /// Elapsed time (seconds)
    pub duration: f64,
    /// Calories burned
    pub calories: f64,
    /// Step count
    pub steps: u64,
}

impl RunStats {
    /// Add another snapshot into this one
    pub fn accumulate(&mut self, other: &RunStats) {
        self.distance += other.distance;
        self.duration += other.duration;
        self.calories += other.calories;
        self.steps += other.steps;
    }
}

impl<'a> std::iter::Sum<&'a RunStats> for RunStats {
    fn sum<I: Iterator<Item = &'a RunStats>>(iter: I) -> Self {
        iter.fold(RunStats::default(), |mut total, stats| {
            total.accumulate(stats);
            total
        })
    }
}

/// Account state of a user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    /// Registered, no active package or team
    #[default]
    Inactive,
    /// Holds an active package or team slot
    Active,
}

/// How a package was paid for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// External card payment confirmed by webhook
    Card,
    /// Debited from the token wallet
    Wallet,
}

/// Last payment recorded on a profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Payment method
    pub method: PaymentMethod,
    /// Amount paid
    pub amount: Decimal,
    /// Currency code, "TOKEN" for wallet payments
    pub currency: String,
    /// Gateway reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Payment time
    pub paid_at: DateTime<Utc>,
}

/// User profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// User id
    pub id: UserId,
    /// Email address
    #[serde(default)]
    pub email: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Avatar URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    /// Account status
    #[serde(default)]
    pub status: AccountStatus,
    /// Whether the current package or team slot is paid
    #[serde(default)]
    pub paid: bool,
    /// Team membership
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<TeamId>,
    /// Active distance goal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<f64>,
    /// Selected map
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_id: Option<String>,
    /// Active package
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
    /// Active event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Stats of the run in progress
    #[serde(default)]
    pub current_stats: RunStats,
    /// Milestones reached in the active package
    #[serde(default)]
    pub completed_milestones: u32,
    /// Milestones available in the active package
    #[serde(default)]
    pub total_milestones: u32,
    /// Earned badge ids
    #[serde(default)]
    pub badges: Vec<String>,
    /// Earned reward ids
    #[serde(default)]
    pub rewards: Vec<String>,
    /// Redeemed reward ids
    #[serde(default)]
    pub redeemed_rewards: Vec<String>,
    /// Earned spinner ids
    #[serde(default)]
    pub spinners: Vec<String>,
    /// Redeemed spinner ids
    #[serde(default)]
    pub redeemed_spinners: Vec<String>,
    /// Distance thresholds already rewarded (threshold key → true)
    #[serde(default)]
    pub distance_tokens_allocated: BTreeMap<String, bool>,
    /// Last payment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentRecord>,
    /// Registration time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// Fresh profile for a newly registered user
    pub fn new(id: UserId, email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            name: name.into(),
            picture: None,
            status: AccountStatus::Inactive,
            paid: false,
            team_id: None,
            goal: None,
            map_id: None,
            package_id: None,
            event_id: None,
            current_stats: RunStats::default(),
            completed_milestones: 0,
            total_milestones: 0,
            badges: Vec::new(),
            rewards: Vec::new(),
            redeemed_rewards: Vec::new(),
            spinners: Vec::new(),
            redeemed_spinners: Vec::new(),
            distance_tokens_allocated: BTreeMap::new(),
            payment: None,
            created_at: Some(Utc::now()),
        }
    }
}

impl Record for UserProfile {
    const COLLECTION: &'static str = collections::USERS;
}

/// Team run lifecycle
///
/// `waiting → started → completed`, `started → incomplete`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Gathering members
    #[default]
    Waiting,
    /// Run in progress
    Started,
    /// Every member finished
    Completed,
    /// Ended early by the creator
    Incomplete,
}

impl RunStatus {
    /// No transition leaves a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Incomplete)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Waiting => "waiting",
            RunStatus::Started => "started",
            RunStatus::Completed => "completed",
            RunStatus::Incomplete => "incomplete",
        };
        f.write_str(s)
    }
}

/// Team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    /// Team id
    pub id: TeamId,
    /// Display name
    pub name: String,
    /// Logo URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    /// Creator (the only member allowed to start or end the run)
    pub created_by: UserId,
    /// Maximum number of members
    pub member_limit: u32,
    /// Members in join order
    pub members: Vec<UserId>,
    /// Distance the team covers together; also its leaderboard bucket
    pub total_distance: f64,
    /// Distance share per member
    pub assignments: BTreeMap<UserId, f64>,
    /// Lifecycle state
    #[serde(default)]
    pub run_status: RunStatus,
    /// Members who finished their share
    #[serde(default)]
    pub completed: Vec<UserId>,
    /// Aggregate stats, set at completion or early end
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_progress: Option<RunStats>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Run start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Completion time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Who ended the run early
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_by: Option<UserId>,
    /// When the run was ended early
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Team {
    /// Whether `user` is a member
    pub fn is_member(&self, user: &UserId) -> bool {
        self.members.contains(user)
    }

    /// Whether the member limit is reached
    pub fn is_full(&self) -> bool {
        self.members.len() >= self.member_limit as usize
    }

    /// Whether every member finished
    pub fn all_completed(&self) -> bool {
        !self.members.is_empty() && self.members.iter().all(|m| self.completed.contains(m))
    }

    /// Sum of all assignments
    pub fn assigned_total(&self) -> f64 {
        self.assignments.values().sum()
    }
}

impl Record for Team {
    const COLLECTION: &'static str = collections::TEAMS;
}

/// Which leaderboard a run belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Board {
    /// Individual runs
    Individual,
    /// Aggregated team runs
    Team,
}

impl Board {
    /// Backing collection
    pub fn collection(self) -> &'static str {
        match self {
            Board::Individual => collections::LEADERBOARD,
            Board::Team => collections::TEAM_LEADERBOARD,
        }
    }
}

/// A ranked leaderboard entry
///
/// Never mutated after insertion except for `rank`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Entry id
    pub id: String,
    /// User or team that ran
    pub subject_id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Avatar or team logo
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    /// Distance bucket (exact match)
    pub distance: f64,
    /// Time taken; lower ranks better
    pub duration: f64,
    /// Competition rank within the bucket, 1-based
    pub rank: u32,
    /// Submission time
    pub timestamp: DateTime<Utc>,
    /// Team creator, team runs only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<UserId>,
    /// Member count, team runs only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<u32>,
}

/// Direction of a wallet entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Balance increase
    Credit,
    /// Balance decrease
    Debit,
}

/// Append-only wallet log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletEntry {
    /// Direction
    pub kind: EntryKind,
    /// Positive amount
    pub amount: Decimal,
    /// Free-form description
    pub description: String,
    /// Entry time
    pub timestamp: DateTime<Utc>,
}

/// Token wallet, one per user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    /// Owner
    pub owner_id: UserId,
    /// Current balance, never negative
    pub balance: Decimal,
    /// Entry log
    #[serde(default)]
    pub transactions: Vec<WalletEntry>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Empty wallet
    pub fn new(owner_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            owner_id,
            balance: Decimal::ZERO,
            transactions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add to the balance
    pub fn credit(&mut self, amount: Decimal, description: impl Into<String>) {
        self.push(EntryKind::Credit, amount, description.into());
        self.balance += amount;
    }

    /// Subtract from the balance; fails closed without changing anything
    pub fn debit(&mut self, amount: Decimal, description: impl Into<String>) -> crate::Result<()> {
        if amount > self.balance {
            return Err(crate::Error::InsufficientFunds {
                balance: self.balance,
                requested: amount,
            });
        }
        self.push(EntryKind::Debit, amount, description.into());
        self.balance -= amount;
        Ok(())
    }

    /// Σ credits − Σ debits over the log
    pub fn log_balance(&self) -> Decimal {
        self.transactions
            .iter()
            .map(|entry| match entry.kind {
                EntryKind::Credit => entry.amount,
                EntryKind::Debit => -entry.amount,
            })
            .sum()
    }

    fn push(&mut self, kind: EntryKind, amount: Decimal, description: String) {
        let now = Utc::now();
        self.transactions.push(WalletEntry {
            kind,
            amount,
            description,
            timestamp: now,
        });
        self.updated_at = now;
    }
}

impl Record for Wallet {
    const COLLECTION: &'static str = collections::WALLETS;
}

/// Whether a reward setting is live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardStatus {
    /// Rewards are paid
    Active,
    /// Rewards are skipped
    #[default]
    Inactive,
}

impl RewardStatus {
    /// Whether rewards are paid
    pub fn is_active(self) -> bool {
        self == RewardStatus::Active
    }
}

/// Amount and status of a flat or itemised reward
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardSetting {
    /// Tokens paid per occurrence
    pub tokens: Decimal,
    /// Whether it is paid
    pub status: RewardStatus,
}

/// Category whose amount lives on each catalogue item
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogueSetting {
    /// Amount last written to every catalogue item
    pub tokens: Decimal,
    /// Category status
    pub status: RewardStatus,
}

/// Category with a status plus per-item settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemisedSetting {
    /// Category status
    pub status: RewardStatus,
    /// Item key (package id, distance threshold) → setting
    pub items: BTreeMap<String, RewardSetting>,
}

impl ItemisedSetting {
    /// Effective amount of an item: category AND item must be active
    pub fn effective(&self, item: &str) -> Option<Decimal> {
        let setting = self.items.get(item)?;
        (self.status.is_active() && setting.status.is_active()).then_some(setting.tokens)
    }
}

/// Global token economy configuration (singleton)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Tokens minted
    pub total_tokens: Decimal,
    /// Tokens earmarked for rewards, ≤ total
    pub allocated_tokens: Decimal,
    /// Tokens handed out, ≤ allocated
    pub spent_tokens: Decimal,
    /// Daily login reward
    pub login: RewardSetting,
    /// Sign-up reward
    pub registration: RewardSetting,
    /// Site-wide promotional reward
    pub sitewide: RewardSetting,
    /// Reward catalogue
    pub rewards: CatalogueSetting,
    /// Badge catalogue
    pub badges: CatalogueSetting,
    /// Package purchase rewards
    pub packages: ItemisedSetting,
    /// Cumulative distance rewards, keyed by threshold
    pub distance: ItemisedSetting,
    /// Last change
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record for TokenConfig {
    const COLLECTION: &'static str = collections::TOKEN_CONFIG;
}

/// Id of the token configuration singleton
pub const TOKEN_SETTINGS_ID: &str = "token_settings";

/// Key of a distance threshold in configs and allocation flags
pub fn threshold_key(distance: f64) -> String {
    distance.to_string()
}

/// What earned an allocation; replaces ambient session state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum RewardTrigger {
    /// Daily login
    Login,
    /// Sign-up
    Registration,
    /// Site-wide promotion
    Sitewide,
    /// Catalogue reward earned
    Reward {
        /// Catalogue item id
        reward_id: String,
    },
    /// Badge earned
    Badge {
        /// Catalogue item id
        badge_id: String,
    },
    /// Package purchased
    Package {
        /// Package id
        package_id: String,
    },
    /// Cumulative distance threshold crossed
    RunDistance {
        /// Threshold in km
        threshold: f64,
    },
}

impl RewardTrigger {
    /// Category label stored in the allocation log
    pub fn category(&self) -> &'static str {
        match self {
            RewardTrigger::Login => "login",
            RewardTrigger::Registration => "registration",
            RewardTrigger::Sitewide => "sitewide",
            RewardTrigger::Reward { .. } => "rewards",
            RewardTrigger::Badge { .. } => "badges",
            RewardTrigger::Package { .. } => "packages",
            RewardTrigger::RunDistance { .. } => "run_distance",
        }
    }
}

/// Catalogue item (reward, badge, spinner)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogueItem {
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Tokens paid when earned
    #[serde(default)]
    pub tokens: Decimal,
}

/// Allocation log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenTransaction {
    /// Entry id
    pub id: String,
    /// Recipient
    pub user_id: UserId,
    /// Tokens allocated
    pub amount: Decimal,
    /// Always "allocated"
    pub kind: String,
    /// What earned it
    pub trigger: RewardTrigger,
    /// Human readable reason
    pub reason: String,
    /// Always "completed"
    pub status: String,
    /// Allocation time
    pub created_at: DateTime<Utc>,
}

impl Record for TokenTransaction {
    const COLLECTION: &'static str = collections::TOKEN_TRANSACTIONS;
}

/// Team context captured in a history entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSnapshot {
    /// Team id
    pub id: TeamId,
    /// Team name
    pub name: String,
    /// Member count at archive time
    pub members: u32,
}

/// Archived snapshot of a user's progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Entry id
    pub id: String,
    /// Owner
    pub user_id: UserId,
    /// Name at archive time
    #[serde(default)]
    pub name: String,
    /// Package
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<Package>,
    /// Map
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_id: Option<String>,
    /// Goal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<f64>,
    /// Team context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<TeamSnapshot>,
    /// Stats at archive time
    #[serde(default)]
    pub stats: RunStats,
    /// Milestones reached
    #[serde(default)]
    pub completed_milestones: u32,
    /// Milestones available
    #[serde(default)]
    pub total_milestones: u32,
    /// Badges held
    #[serde(default)]
    pub badges: Vec<String>,
    /// Rewards held
    #[serde(default)]
    pub rewards: Vec<String>,
    /// Spinners held
    #[serde(default)]
    pub spinners: Vec<String>,
    /// Payment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentRecord>,
    /// Archive time
    pub created_at: DateTime<Utc>,
    /// Archive time in nanoseconds, used for ordering
    pub timestamp_nanos: i64,
}

impl Record for HistoryEntry {
    const COLLECTION: &'static str = collections::USER_HISTORY;
}

/// Purchasable package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    /// Package id
    pub id: String,
    /// Display name
    pub name: String,
    /// Goal distance granted on purchase
    pub distance: f64,
    /// Price in wallet tokens
    pub price: Decimal,
    /// Whether it can be bought
    #[serde(default)]
    pub status: RewardStatus,
}

impl Record for Package {
    const COLLECTION: &'static str = collections::PACKAGES;
}

/// Milestone definition of a package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    /// Package the milestones belong to
    pub package_id: String,
    /// Milestones in the package
    pub milestone_count: u32,
}

impl Record for Achievement {
    const COLLECTION: &'static str = collections::ACHIEVEMENTS;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_wallet_debit_fails_closed() {
        let mut wallet = Wallet::new(UserId::new("u1"));
        wallet.credit(dec!(10), "reward");
        assert!(wallet.debit(dec!(15), "purchase").is_err());
        assert_eq!(wallet.balance, dec!(10));
        assert_eq!(wallet.transactions.len(), 1);

        wallet.debit(dec!(4), "purchase").unwrap();
        assert_eq!(wallet.balance, dec!(6));
        assert_eq!(wallet.log_balance(), wallet.balance);
    }

    #[test]
    fn test_itemised_effective_status() {
        let mut setting = ItemisedSetting::default();
        setting.items.insert(
            "10".into(),
            RewardSetting {
                tokens: dec!(5),
                status: RewardStatus::Active,
            },
        );
        assert_eq!(setting.effective("10"), None);
        setting.status = RewardStatus::Active;
        assert_eq!(setting.effective("10"), Some(dec!(5)));
        assert_eq!(setting.effective("20"), None);
    }

    #[test]
    fn test_threshold_key_format() {
        assert_eq!(threshold_key(10.0), "10");
        assert_eq!(threshold_key(2.5), "2.5");
    }

    #[test]
    fn test_team_status_serialization() {
        let value = serde_json::to_value(RunStatus::Incomplete).unwrap();
        assert_eq!(value, serde_json::json!("incomplete"));
        assert!(RunStatus::Completed.is_terminal());
        assert!(!RunStatus::Started.is_terminal());
    }
}
