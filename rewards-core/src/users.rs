//! User directory
//!
//! Registration, login rewards, live stats and achievements. Token rewards
//! earned along the way are side effects: a failed allocation is logged and
//! the primary operation still succeeds.

use crate::{
    error::{Error, Result},
    history::StoreHistoryRecorder,
    ledger::{Allocation, TokenLedger},
    types::{collections, RewardTrigger, RunStats, UserId, UserProfile},
};
use doc_store::{DocKey, Patch, Record, Store};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    /// Id issued by the identity provider
    pub id: UserId,
    /// Email address
    pub email: String,
    /// Display name
    pub name: String,
    /// Avatar URL
    #[serde(default)]
    pub picture: Option<String>,
}

/// Profile plus history aggregates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileView {
    /// Live profile
    pub profile: UserProfile,
    /// Σ stats over archived history
    pub previous_stats: RunStats,
    /// Distance thresholds paid while loading the profile
    pub thresholds_rewarded: Vec<f64>,
}

/// Catalogue an achievement comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AchievementKind {
    /// Badge catalogue
    Badge,
    /// Reward catalogue
    Reward,
    /// Spinner catalogue
    Spinner,
}

impl AchievementKind {
    fn collection(self) -> &'static str {
        match self {
            AchievementKind::Badge => collections::BADGES,
            AchievementKind::Reward => collections::REWARDS,
            AchievementKind::Spinner => collections::SPINNERS,
        }
    }

    /// Profile array holding earned ids
    fn field(self) -> &'static str {
        match self {
            AchievementKind::Badge => "badges",
            AchievementKind::Reward => "rewards",
            AchievementKind::Spinner => "spinners",
        }
    }

    fn held(self, profile: &UserProfile) -> &[String] {
        match self {
            AchievementKind::Badge => &profile.badges,
            AchievementKind::Reward => &profile.rewards,
            AchievementKind::Spinner => &profile.spinners,
        }
    }

    /// Spinners carry no token reward
    fn trigger(self, item_id: &str) -> Option<RewardTrigger> {
        match self {
            AchievementKind::Badge => Some(RewardTrigger::Badge {
                badge_id: item_id.to_string(),
            }),
            AchievementKind::Reward => Some(RewardTrigger::Reward {
                reward_id: item_id.to_string(),
            }),
            AchievementKind::Spinner => None,
        }
    }
}

/// Result of awarding an achievement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Award {
    /// Profile after the award
    pub profile: UserProfile,
    /// Tokens paid for it, if any
    pub allocation: Option<Allocation>,
}

/// Profiles and the rewards attached to them
#[derive(Debug, Clone)]
pub struct UserDirectory {
    store: Store,
    ledger: TokenLedger,
    history: StoreHistoryRecorder,
}

impl UserDirectory {
    /// Create a directory
    pub fn new(store: Store, ledger: TokenLedger, history: StoreHistoryRecorder) -> Self {
        Self {
            store,
            ledger,
            history,
        }
    }

    /// Create the profile and wallet, then pay the registration reward
    pub async fn register(&self, request: NewUser) -> Result<UserProfile> {
        validate_user(&request.id)?;
        if request.email.trim().is_empty() {
            return Err(Error::Validation("email must not be empty".to_string()));
        }

        let mut profile = UserProfile::new(request.id.clone(), request.email, request.name);
        profile.picture = request.picture;
        let profile = self
            .store
            .run_transaction(|tx| {
                let profile = profile.clone();
                async move {
                    if tx.get(&UserProfile::key(profile.id.as_str())).await?.is_some() {
                        return Err(Error::Conflict(format!("user {} is already registered", profile.id)));
                    }
                    tx.create(UserProfile::key(profile.id.as_str()), &profile)?;
                    Ok::<_, Error>(profile)
                }
            })
            .await?;
        tracing::info!(user_id = %profile.id, "User registered");

        match self.ledger.create_wallet(&profile.id).await {
            Ok(_) => {}
            Err(Error::Conflict(_)) => {
                tracing::debug!(user_id = %profile.id, "Wallet already present");
            }
            Err(err) => {
                tracing::warn!(user_id = %profile.id, error = %err, "Failed to create wallet");
                return Ok(profile);
            }
        }

        if let Err(err) = self
            .ledger
            .allocate(&profile.id, &RewardTrigger::Registration, "Registration reward")
            .await
        {
            tracing::warn!(user_id = %profile.id, error = %err, "Failed to allocate registration reward");
        }
        Ok(profile)
    }

    /// Pay the login reward for an existing user
    pub async fn record_login(&self, user_id: &UserId) -> Result<Option<Allocation>> {
        self.profile(user_id).await?;
        match self
            .ledger
            .allocate(user_id, &RewardTrigger::Login, "Daily login reward")
            .await
        {
            Ok(allocation) => Ok(allocation),
            Err(err) => {
                tracing::warn!(user_id = %user_id, error = %err, "Failed to allocate login reward");
                Ok(None)
            }
        }
    }

    /// Replace the stats of the run in progress
    pub async fn update_live_stats(&self, user_id: &UserId, stats: RunStats) -> Result<UserProfile> {
        validate_user(user_id)?;
        validate_stats(&stats)?;
        let profile = self
            .store
            .run_transaction(|tx| {
                let user_id = user_id.clone();
                async move {
                    let mut profile: UserProfile = tx
                        .get_record(user_id.as_str())
                        .await?
                        .ok_or_else(|| Error::not_found("user", &user_id))?;
                    tx.update_record::<UserProfile>(
                        user_id.as_str(),
                        Patch::new().set_serialized("current_stats", &stats)?,
                    );
                    profile.current_stats = stats;
                    Ok::<_, Error>(profile)
                }
            })
            .await?;
        tracing::debug!(user_id = %user_id, distance = stats.distance, "Live stats updated");
        Ok(profile)
    }

    /// Profile with archived totals
    ///
    /// Pays any distance threshold the cumulative distance (archived plus
    /// live) has crossed; failures there are logged.
    pub async fn get_profile(&self, user_id: &UserId) -> Result<ProfileView> {
        let profile = self.profile(user_id).await?;
        let previous_stats = self.history.previous_stats(user_id).await?;
        let cumulative = previous_stats.distance + profile.current_stats.distance;

        let thresholds_rewarded = match self
            .ledger
            .allocate_distance_thresholds(user_id, cumulative)
            .await
        {
            Ok(paid) => paid.into_iter().map(|(threshold, _)| threshold).collect(),
            Err(err) => {
                tracing::warn!(user_id = %user_id, error = %err, "Failed to allocate distance rewards");
                Vec::new()
            }
        };

        // Reload so the threshold flags just written are visible
        let profile = if thresholds_rewarded.is_empty() {
            profile
        } else {
            self.profile(user_id).await?
        };

        Ok(ProfileView {
            profile,
            previous_stats,
            thresholds_rewarded,
        })
    }

    /// Grant a catalogue item and count it as a milestone
    pub async fn award_achievement(
        &self,
        user_id: &UserId,
        kind: AchievementKind,
        item_id: &str,
    ) -> Result<Award> {
        validate_user(user_id)?;
        if item_id.trim().is_empty() {
            return Err(Error::Validation("item id must not be empty".to_string()));
        }

        let profile = self
            .store
            .run_transaction(|tx| {
                let user_id = user_id.clone();
                async move {
                    let mut profile: UserProfile = tx
                        .get_record(user_id.as_str())
                        .await?
                        .ok_or_else(|| Error::not_found("user", &user_id))?;
                    if tx.get(&DocKey::new(kind.collection(), item_id)).await?.is_none() {
                        return Err(Error::not_found(kind.collection(), item_id));
                    }
                    if kind.held(&profile).iter().any(|held| held == item_id) {
                        return Err(Error::Conflict(format!(
                            "{} already holds {} {}",
                            user_id,
                            kind.field(),
                            item_id
                        )));
                    }

                    tx.update_record::<UserProfile>(
                        user_id.as_str(),
                        Patch::new()
                            .array_union(kind.field(), vec![Value::from(item_id)])
                            .increment("completed_milestones", 1.0),
                    );
                    match kind {
                        AchievementKind::Badge => profile.badges.push(item_id.to_string()),
                        AchievementKind::Reward => profile.rewards.push(item_id.to_string()),
                        AchievementKind::Spinner => profile.spinners.push(item_id.to_string()),
                    }
                    profile.completed_milestones += 1;
                    Ok::<_, Error>(profile)
                }
            })
            .await?;
        tracing::info!(user_id = %user_id, kind = kind.field(), item_id, "Achievement awarded");

        let allocation = match kind.trigger(item_id) {
            Some(trigger) => {
                let reason = format!("Earned {} {}", kind.field(), item_id);
                match self.ledger.allocate(user_id, &trigger, &reason).await {
                    Ok(allocation) => allocation,
                    Err(err) => {
                        tracing::warn!(user_id = %user_id, item_id, error = %err, "Failed to allocate achievement reward");
                        None
                    }
                }
            }
            None => None,
        };

        Ok(Award { profile, allocation })
    }

    async fn profile(&self, user_id: &UserId) -> Result<UserProfile> {
        validate_user(user_id)?;
        self.store
            .get_record(user_id.as_str())
            .await?
            .ok_or_else(|| Error::not_found("user", user_id))
    }
}

fn validate_user(user_id: &UserId) -> Result<()> {
    if user_id.as_str().trim().is_empty() {
        return Err(Error::Validation("user id must not be empty".to_string()));
    }
    Ok(())
}

fn validate_stats(stats: &RunStats) -> Result<()> {
    let values = [stats.distance, stats.duration, stats.calories];
    if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(Error::Validation(
            "stats must be non-negative numbers".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        history::HistoryRecorder,
        ledger::{CatalogueCategory, FlatCategory},
        metrics::Metrics,
        types::{CatalogueItem, RewardSetting, RewardStatus},
    };
    use doc_store::MemoryStore;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct Fixture {
        store: Store,
        ledger: TokenLedger,
        users: UserDirectory,
    }

    async fn fixture() -> Fixture {
        let store = Store::new(Arc::new(MemoryStore::new()));
        let ledger = TokenLedger::new(store.clone(), Metrics::new().unwrap());
        ledger.update_total_tokens(dec!(1000)).await.unwrap();
        ledger.update_allocated_tokens(dec!(1000)).await.unwrap();
        let users = UserDirectory::new(
            store.clone(),
            ledger.clone(),
            StoreHistoryRecorder::new(store.clone()),
        );
        Fixture { store, ledger, users }
    }

    fn new_user(id: &str) -> NewUser {
        NewUser {
            id: UserId::new(id),
            email: format!("{}@example.com", id),
            name: id.to_uppercase(),
            picture: None,
        }
    }

    #[tokio::test]
    async fn test_register_creates_wallet_and_pays_reward() {
        let f = fixture().await;
        f.ledger
            .set_flat_reward(
                FlatCategory::Registration,
                RewardSetting {
                    tokens: dec!(10),
                    status: RewardStatus::Active,
                },
            )
            .await
            .unwrap();

        let profile = f.users.register(new_user("alice")).await.unwrap();
        assert_eq!(profile.name, "ALICE");
        let wallet = f.ledger.get_wallet(&profile.id).await.unwrap();
        assert_eq!(wallet.balance, dec!(10));

        let again = f.users.register(new_user("alice")).await;
        assert!(matches!(again, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_login_without_reward_config() {
        let f = fixture().await;
        f.users.register(new_user("bob")).await.unwrap();
        let allocation = f.users.record_login(&UserId::new("bob")).await.unwrap();
        assert!(allocation.is_none());

        let missing = f.users.record_login(&UserId::new("nobody")).await;
        assert!(matches!(missing, Err(Error::NotFound { entity: "user", .. })));
    }

    #[tokio::test]
    async fn test_profile_includes_history_and_pays_thresholds() {
        let f = fixture().await;
        let id = UserId::new("carol");
        f.users.register(new_user("carol")).await.unwrap();
        f.ledger
            .merge_distance_rewards(
                &[(
                    5.0,
                    RewardSetting {
                        tokens: dec!(2),
                        status: RewardStatus::Active,
                    },
                )],
                Some(RewardStatus::Active),
            )
            .await
            .unwrap();

        let stats = RunStats {
            distance: 3.0,
            ..Default::default()
        };
        f.users.update_live_stats(&id, stats).await.unwrap();
        StoreHistoryRecorder::new(f.store.clone())
            .archive(&id)
            .await
            .unwrap();
        f.users.update_live_stats(&id, stats).await.unwrap();

        let view = f.users.get_profile(&id).await.unwrap();
        assert!((view.previous_stats.distance - 3.0).abs() < 1e-9);
        assert_eq!(view.thresholds_rewarded, vec![5.0]);
        assert_eq!(view.profile.distance_tokens_allocated.get("5"), Some(&true));

        let again = f.users.get_profile(&id).await.unwrap();
        assert!(again.thresholds_rewarded.is_empty());
        assert_eq!(f.ledger.get_wallet(&id).await.unwrap().balance, dec!(2));
    }

    #[tokio::test]
    async fn test_negative_stats_rejected() {
        let f = fixture().await;
        let stats = RunStats {
            distance: -1.0,
            ..Default::default()
        };
        let result = f.users.update_live_stats(&UserId::new("x"), stats).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_award_badge_once() {
        let f = fixture().await;
        let id = UserId::new("dave");
        f.users.register(new_user("dave")).await.unwrap();
        f.store
            .set(
                DocKey::new(collections::BADGES, "first-5k"),
                &CatalogueItem {
                    name: "First 5k".into(),
                    tokens: dec!(0),
                },
            )
            .await
            .unwrap();
        f.ledger
            .set_catalogue_reward(CatalogueCategory::Badges, dec!(4), Some(RewardStatus::Active))
            .await
            .unwrap();

        let award = f
            .users
            .award_achievement(&id, AchievementKind::Badge, "first-5k")
            .await
            .unwrap();
        assert_eq!(award.profile.badges, vec!["first-5k".to_string()]);
        assert_eq!(award.profile.completed_milestones, 1);
        assert_eq!(award.allocation.unwrap().amount, dec!(4));

        let stored: UserProfile = f.store.get_record(id.as_str()).await.unwrap().unwrap();
        assert_eq!(stored.completed_milestones, 1);

        let duplicate = f
            .users
            .award_achievement(&id, AchievementKind::Badge, "first-5k")
            .await;
        assert!(matches!(duplicate, Err(Error::Conflict(_))));

        let unknown = f
            .users
            .award_achievement(&id, AchievementKind::Spinner, "wheel")
            .await;
        assert!(matches!(unknown, Err(Error::NotFound { .. })));
    }
}
