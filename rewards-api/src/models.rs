//! Request bodies and query strings

use rewards_core::{AchievementKind, RewardSetting, RewardStatus, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Individual run submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRunRequest {
    pub user_id: UserId,
    pub distance: f64,
    pub duration: f64,
}

/// Leaderboard paging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardQuery {
    pub distance: f64,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default)]
    pub page_size: Option<u32>,
}

fn first_page() -> u32 {
    1
}

/// Acting user of a team operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamActionRequest {
    pub user_id: UserId,
}

/// Member removal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveMemberRequest {
    pub target: UserId,
    pub requestor: UserId,
}

/// Wallet debit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmountRequest {
    pub amount: Decimal,
    #[serde(default)]
    pub description: String,
}

/// New minted supply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TotalTokensRequest {
    pub total_tokens: Decimal,
}

/// New reward budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatedTokensRequest {
    pub allocated_tokens: Decimal,
}

/// Catalogue category amount and status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogueRewardRequest {
    pub tokens: Decimal,
    #[serde(default)]
    pub status: Option<RewardStatus>,
}

/// Package item reward
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRewardRequest {
    #[serde(flatten)]
    pub setting: RewardSetting,
    #[serde(default)]
    pub category_status: Option<RewardStatus>,
}

/// One distance threshold reward
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistanceThreshold {
    pub distance: f64,
    pub tokens: Decimal,
    pub status: RewardStatus,
}

/// Distance rewards merged into the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistanceRewardsRequest {
    #[serde(default)]
    pub thresholds: Vec<DistanceThreshold>,
    #[serde(default)]
    pub category_status: Option<RewardStatus>,
}

impl DistanceRewardsRequest {
    pub fn settings(&self) -> Vec<(f64, RewardSetting)> {
        self.thresholds
            .iter()
            .map(|t| {
                (
                    t.distance,
                    RewardSetting {
                        tokens: t.tokens,
                        status: t.status,
                    },
                )
            })
            .collect()
    }
}

/// Achievement award
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchievementRequest {
    pub kind: AchievementKind,
    pub item_id: String,
}

/// Package bought with wallet tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletPurchaseRequest {
    pub user_id: UserId,
    pub package_id: String,
}
