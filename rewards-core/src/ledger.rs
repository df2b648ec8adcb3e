//! Token ledger
//!
//! Wallets, the global token configuration and reward allocation.
//!
//! # Invariants
//!
//! - Wallet balance equals Σ credits − Σ debits of its entry log
//! - A debit larger than the balance fails and changes nothing
//! - `total_tokens ≥ allocated_tokens ≥ spent_tokens`
//! - A distance threshold pays out at most once per user
//!
//! # Example
//!
//! ```no_run
//! use rewards_core::{RewardTrigger, TokenLedger, UserId};
//!
//! # async fn example(ledger: TokenLedger) -> rewards_core::Result<()> {
//! let user = UserId::new("user-1");
//! ledger.create_wallet(&user).await?;
//! if let Some(allocation) = ledger
//!     .allocate(&user, &RewardTrigger::Login, "Daily login reward")
//!     .await?
//! {
//!     println!("credited {}", allocation.amount);
//! }
//! # Ok(())
//! # }
//! ```

use crate::{
    error::{Error, Result},
    metrics::Metrics,
    types::{
        collections, threshold_key, CatalogueItem, RewardSetting, RewardStatus, RewardTrigger,
        TokenConfig, TokenTransaction, UserId, UserProfile, Wallet, TOKEN_SETTINGS_ID,
    },
};
use chrono::Utc;
use doc_store::{DocKey, Patch, Query, Record, Store, Transaction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A completed allocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    /// Tokens credited
    pub amount: Decimal,
    /// Wallet balance afterwards
    pub balance: Decimal,
    /// Id of the allocation log entry
    pub transaction_id: String,
}

/// Flat reward categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlatCategory {
    /// Daily login
    Login,
    /// Sign-up
    Registration,
    /// Site-wide promotion
    Sitewide,
}

/// Catalogue reward categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogueCategory {
    /// Reward catalogue
    Rewards,
    /// Badge catalogue
    Badges,
}

impl CatalogueCategory {
    /// Collection holding the items
    pub fn collection(self) -> &'static str {
        match self {
            CatalogueCategory::Rewards => collections::REWARDS,
            CatalogueCategory::Badges => collections::BADGES,
        }
    }
}

/// Economy overview
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenStats {
    /// Tokens minted
    pub total_tokens: Decimal,
    /// Tokens earmarked for rewards
    pub allocated_tokens: Decimal,
    /// Tokens handed out
    pub spent_tokens: Decimal,
    /// `allocated − spent`
    pub remaining_tokens: Decimal,
    /// Σ wallet balances
    pub in_circulation: Decimal,
    /// Number of wallets
    pub wallet_count: usize,
    /// `spent / allocated` in percent, two decimals
    pub utilization_percent: Decimal,
    /// Current configuration
    pub config: TokenConfig,
}

/// Wallets, token configuration and reward allocation
#[derive(Debug, Clone)]
pub struct TokenLedger {
    store: Store,
    metrics: Metrics,
}

impl TokenLedger {
    /// Create a ledger
    pub fn new(store: Store, metrics: Metrics) -> Self {
        Self { store, metrics }
    }

    /// Create an empty wallet; fails with Conflict if one exists
    pub async fn create_wallet(&self, owner: &UserId) -> Result<Wallet> {
        validate_owner(owner)?;
        let wallet = self
            .store
            .run_transaction(|tx| {
                let owner = owner.clone();
                async move {
                    if tx.get(&Wallet::key(owner.as_str())).await?.is_some() {
                        return Err(Error::Conflict(format!("wallet already exists for {}", owner)));
                    }
                    let wallet = Wallet::new(owner.clone());
                    tx.create(Wallet::key(owner.as_str()), &wallet)?;
                    Ok::<_, Error>(wallet)
                }
            })
            .await?;

        tracing::info!(user_id = %owner, "Wallet created");
        Ok(wallet)
    }

    /// Load a wallet
    pub async fn get_wallet(&self, owner: &UserId) -> Result<Wallet> {
        validate_owner(owner)?;
        self.store
            .get_record(owner.as_str())
            .await?
            .ok_or_else(|| Error::not_found("wallet", owner))
    }

    /// Add tokens to a wallet
    pub async fn credit(&self, owner: &UserId, amount: Decimal, description: &str) -> Result<Wallet> {
        validate_owner(owner)?;
        validate_amount(amount)?;
        let wallet = self
            .store
            .run_transaction(|tx| {
                let owner = owner.clone();
                async move {
                    let mut wallet = load_wallet(&tx, &owner).await?;
                    wallet.credit(amount, description);
                    tx.set_record(owner.as_str(), &wallet)?;
                    Ok::<_, Error>(wallet)
                }
            })
            .await?;

        tracing::info!(user_id = %owner, %amount, balance = %wallet.balance, "Wallet credited");
        Ok(wallet)
    }

    /// Take tokens from a wallet; fails closed on insufficient balance
    pub async fn debit(&self, owner: &UserId, amount: Decimal, description: &str) -> Result<Wallet> {
        validate_owner(owner)?;
        validate_amount(amount)?;
        let result = self
            .store
            .run_transaction(|tx| {
                let owner = owner.clone();
                async move {
                    let mut wallet = load_wallet(&tx, &owner).await?;
                    wallet.debit(amount, description)?;
                    tx.set_record(owner.as_str(), &wallet)?;
                    Ok::<_, Error>(wallet)
                }
            })
            .await;

        match result {
            Ok(wallet) => {
                tracing::info!(user_id = %owner, %amount, balance = %wallet.balance, "Wallet debited");
                Ok(wallet)
            }
            Err(err @ Error::InsufficientFunds { .. }) => {
                self.metrics.record_debit_rejected();
                tracing::warn!(user_id = %owner, %amount, "Debit rejected: insufficient balance");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Allocate the reward `trigger` earns, if any
    ///
    /// Returns `None` without touching anything when the category or item
    /// is inactive, the amount is not positive, the catalogue item is
    /// missing, or the allocated budget would be exceeded.
    pub async fn allocate(
        &self,
        owner: &UserId,
        trigger: &RewardTrigger,
        reason: &str,
    ) -> Result<Option<Allocation>> {
        validate_owner(owner)?;
        let allocation = self
            .store
            .run_transaction(|tx| {
                let owner = owner.clone();
                let trigger = trigger.clone();
                async move { allocate_in(&tx, &owner, &trigger, reason).await }
            })
            .await
            .map_err(|err| {
                self.metrics.observe_error(&err);
                err
            })?;

        if let Some(allocation) = &allocation {
            self.metrics.record_allocation(trigger.category(), allocation.amount);
            tracing::info!(
                user_id = %owner,
                category = trigger.category(),
                amount = %allocation.amount,
                "Tokens allocated"
            );
        } else {
            tracing::debug!(user_id = %owner, category = trigger.category(), "Allocation skipped");
        }
        Ok(allocation)
    }

    /// Pay every configured distance threshold ≤ `cumulative_distance` not
    /// yet paid to this user, smallest first
    pub async fn allocate_distance_thresholds(
        &self,
        owner: &UserId,
        cumulative_distance: f64,
    ) -> Result<Vec<(f64, Allocation)>> {
        validate_owner(owner)?;
        if !cumulative_distance.is_finite() || cumulative_distance < 0.0 {
            return Err(Error::Validation(format!(
                "cumulative distance must be a non-negative number, got {}",
                cumulative_distance
            )));
        }

        let config = self.token_config().await?;
        if !config.distance.status.is_active() {
            return Ok(Vec::new());
        }
        let mut thresholds: Vec<f64> = config
            .distance
            .items
            .iter()
            .filter(|(_, setting)| setting.status.is_active())
            .filter_map(|(key, _)| key.parse::<f64>().ok())
            .filter(|threshold| *threshold > 0.0 && *threshold <= cumulative_distance)
            .collect();
        thresholds.sort_by(|a, b| a.total_cmp(b));

        let mut paid = Vec::new();
        for threshold in thresholds {
            let key = threshold_key(threshold);
            let reason = format!("Reached {} km total distance", key);
            let allocation = self
                .store
                .run_transaction(|tx| {
                    let owner = owner.clone();
                    let key = key.clone();
                    let reason = reason.clone();
                    async move {
                        let user: UserProfile = tx
                            .get_record(owner.as_str())
                            .await?
                            .ok_or_else(|| Error::not_found("user", &owner))?;
                        if user.distance_tokens_allocated.get(&key).copied().unwrap_or(false) {
                            return Ok(None);
                        }

                        let trigger = RewardTrigger::RunDistance { threshold };
                        let allocation = allocate_in(&tx, &owner, &trigger, &reason).await?;
                        if allocation.is_some() {
                            let mut flags = user.distance_tokens_allocated.clone();
                            flags.insert(key, true);
                            tx.update_record::<UserProfile>(
                                owner.as_str(),
                                Patch::new().set_serialized("distance_tokens_allocated", &flags)?,
                            );
                        }
                        Ok::<_, Error>(allocation)
                    }
                })
                .await?;

            if let Some(allocation) = allocation {
                self.metrics.record_allocation("run_distance", allocation.amount);
                tracing::info!(user_id = %owner, threshold, amount = %allocation.amount, "Distance threshold rewarded");
                paid.push((threshold, allocation));
            }
        }
        Ok(paid)
    }

    /// Current configuration, initialising the defaults on first use
    pub async fn token_config(&self) -> Result<TokenConfig> {
        if let Some(config) = self.store.get_record::<TokenConfig>(TOKEN_SETTINGS_ID).await? {
            return Ok(config);
        }
        let config = self
            .store
            .run_transaction(|tx| async move {
                match tx.get_record::<TokenConfig>(TOKEN_SETTINGS_ID).await? {
                    Some(config) => Ok(config),
                    None => {
                        let config = TokenConfig {
                            updated_at: Some(Utc::now()),
                            ..TokenConfig::default()
                        };
                        tx.create(TokenConfig::key(TOKEN_SETTINGS_ID), &config)?;
                        Ok::<_, Error>(config)
                    }
                }
            })
            .await?;
        tracing::info!("Token configuration initialised");
        Ok(config)
    }

    /// Set the minted supply; must stay ≥ allocated
    pub async fn update_total_tokens(&self, total: Decimal) -> Result<TokenConfig> {
        validate_non_negative("total tokens", total)?;
        self.modify_config(move |config| {
            if total < config.allocated_tokens {
                return Err(Error::Validation(format!(
                    "total tokens ({}) cannot be less than allocated tokens ({})",
                    total, config.allocated_tokens
                )));
            }
            config.total_tokens = total;
            Ok(())
        })
        .await
    }

    /// Set the reward budget; must stay ≤ total and ≥ spent
    pub async fn update_allocated_tokens(&self, allocated: Decimal) -> Result<TokenConfig> {
        validate_non_negative("allocated tokens", allocated)?;
        self.modify_config(move |config| {
            if allocated > config.total_tokens {
                return Err(Error::Validation(format!(
                    "allocated tokens ({}) cannot exceed total tokens ({})",
                    allocated, config.total_tokens
                )));
            }
            if allocated < config.spent_tokens {
                return Err(Error::Validation(format!(
                    "allocated tokens ({}) cannot be less than spent tokens ({})",
                    allocated, config.spent_tokens
                )));
            }
            config.allocated_tokens = allocated;
            Ok(())
        })
        .await
    }

    /// Set a flat category reward
    pub async fn set_flat_reward(
        &self,
        category: FlatCategory,
        setting: RewardSetting,
    ) -> Result<TokenConfig> {
        validate_non_negative("tokens", setting.tokens)?;
        self.modify_config(move |config| {
            let slot = match category {
                FlatCategory::Login => &mut config.login,
                FlatCategory::Registration => &mut config.registration,
                FlatCategory::Sitewide => &mut config.sitewide,
            };
            *slot = setting;
            Ok(())
        })
        .await
    }

    /// Write `tokens` to every item of a catalogue and update the category,
    /// atomically; returns the configuration and the number of items
    pub async fn set_catalogue_reward(
        &self,
        category: CatalogueCategory,
        tokens: Decimal,
        status: Option<RewardStatus>,
    ) -> Result<(TokenConfig, usize)> {
        validate_non_negative("tokens", tokens)?;
        let result = self
            .store
            .run_transaction(|tx| async move {
                let items = tx.query(&Query::collection(category.collection())).await?;
                if items.is_empty() {
                    return Err(Error::Validation(format!(
                        "no {} found to update tokens",
                        category.collection()
                    )));
                }
                let now = Utc::now();
                for item in &items {
                    tx.update(
                        DocKey::new(category.collection(), item.id.as_str()),
                        Patch::new()
                            .set_serialized("tokens", &tokens)?
                            .set_serialized("updated_at", &now)?,
                    );
                }

                let mut config = tx
                    .get_record::<TokenConfig>(TOKEN_SETTINGS_ID)
                    .await?
                    .unwrap_or_default();
                let setting = match category {
                    CatalogueCategory::Rewards => &mut config.rewards,
                    CatalogueCategory::Badges => &mut config.badges,
                };
                setting.tokens = tokens;
                if let Some(status) = status {
                    setting.status = status;
                }
                config.updated_at = Some(now);
                tx.set_record(TOKEN_SETTINGS_ID, &config)?;
                Ok::<_, Error>((config, items.len()))
            })
            .await?;

        tracing::info!(category = category.collection(), %tokens, items = result.1, "Catalogue tokens updated");
        Ok(result)
    }

    /// Set the reward of one package, optionally the package category status
    pub async fn set_package_reward(
        &self,
        package_id: &str,
        setting: RewardSetting,
        category_status: Option<RewardStatus>,
    ) -> Result<TokenConfig> {
        if package_id.trim().is_empty() {
            return Err(Error::Validation("package id must not be empty".to_string()));
        }
        validate_non_negative("tokens", setting.tokens)?;
        let package_id = package_id.to_string();
        self.modify_config(move |config| {
            config.packages.items.insert(package_id.clone(), setting);
            if let Some(status) = category_status {
                config.packages.status = status;
            }
            Ok(())
        })
        .await
    }

    /// Merge distance threshold rewards into the configuration
    ///
    /// Thresholds not listed keep their current setting.
    pub async fn merge_distance_rewards(
        &self,
        thresholds: &[(f64, RewardSetting)],
        category_status: Option<RewardStatus>,
    ) -> Result<TokenConfig> {
        let mut items = BTreeMap::new();
        for (threshold, setting) in thresholds {
            if !threshold.is_finite() || *threshold <= 0.0 {
                return Err(Error::Validation(format!(
                    "distance threshold must be a positive number, got {}",
                    threshold
                )));
            }
            validate_non_negative("tokens", setting.tokens)?;
            items.insert(threshold_key(*threshold), *setting);
        }
        self.modify_config(move |config| {
            config
                .distance
                .items
                .extend(items.iter().map(|(k, v)| (k.clone(), *v)));
            if let Some(status) = category_status {
                config.distance.status = status;
            }
            Ok(())
        })
        .await
    }

    /// Economy overview
    pub async fn token_stats(&self) -> Result<TokenStats> {
        let config = self.token_config().await?;
        let wallets: Vec<Wallet> = self
            .store
            .query_records(&Query::collection(Wallet::COLLECTION))
            .await?;
        let in_circulation = wallets.iter().map(|w| w.balance).sum();
        let utilization_percent = if config.allocated_tokens > Decimal::ZERO {
            (config.spent_tokens / config.allocated_tokens * Decimal::ONE_HUNDRED).round_dp(2)
        } else {
            Decimal::ZERO
        };

        Ok(TokenStats {
            total_tokens: config.total_tokens,
            allocated_tokens: config.allocated_tokens,
            spent_tokens: config.spent_tokens,
            remaining_tokens: config.allocated_tokens - config.spent_tokens,
            in_circulation,
            wallet_count: wallets.len(),
            utilization_percent,
            config,
        })
    }

    async fn modify_config<F>(&self, change: F) -> Result<TokenConfig>
    where
        F: Fn(&mut TokenConfig) -> Result<()> + Send + Sync,
    {
        let config = self
            .store
            .run_transaction(|tx| {
                let change = &change;
                async move {
                    let mut config = tx
                        .get_record::<TokenConfig>(TOKEN_SETTINGS_ID)
                        .await?
                        .unwrap_or_default();
                    change(&mut config)?;
                    config.updated_at = Some(Utc::now());
                    tx.set_record(TOKEN_SETTINGS_ID, &config)?;
                    Ok::<_, Error>(config)
                }
            })
            .await?;
        tracing::info!(
            total = %config.total_tokens,
            allocated = %config.allocated_tokens,
            spent = %config.spent_tokens,
            "Token configuration updated"
        );
        Ok(config)
    }
}

async fn load_wallet(tx: &Transaction, owner: &UserId) -> Result<Wallet> {
    tx.get_record(owner.as_str())
        .await?
        .ok_or_else(|| Error::not_found("wallet", owner))
}

/// Amount `trigger` earns under `config`, or `None` when nothing is paid
async fn resolve_amount(
    tx: &Transaction,
    config: &TokenConfig,
    trigger: &RewardTrigger,
) -> Result<Option<Decimal>> {
    let flat = |setting: &RewardSetting| setting.status.is_active().then_some(setting.tokens);

    let amount = match trigger {
        RewardTrigger::Login => flat(&config.login),
        RewardTrigger::Registration => flat(&config.registration),
        RewardTrigger::Sitewide => flat(&config.sitewide),
        RewardTrigger::Reward { reward_id } => {
            catalogue_amount(tx, collections::REWARDS, reward_id, config.rewards.status).await?
        }
        RewardTrigger::Badge { badge_id } => {
            catalogue_amount(tx, collections::BADGES, badge_id, config.badges.status).await?
        }
        RewardTrigger::Package { package_id } => config.packages.effective(package_id),
        RewardTrigger::RunDistance { threshold } => {
            config.distance.effective(&threshold_key(*threshold))
        }
    };
    Ok(amount.filter(|amount| *amount > Decimal::ZERO))
}

async fn catalogue_amount(
    tx: &Transaction,
    collection: &str,
    item_id: &str,
    status: RewardStatus,
) -> Result<Option<Decimal>> {
    if !status.is_active() {
        return Ok(None);
    }
    match tx.get(&DocKey::new(collection, item_id)).await? {
        Some(doc) => Ok(Some(doc.decode::<CatalogueItem>()?.tokens)),
        None => Ok(None),
    }
}

/// Credit the wallet, bump `spent_tokens` and log the allocation, all
/// inside the caller's transaction
async fn allocate_in(
    tx: &Transaction,
    owner: &UserId,
    trigger: &RewardTrigger,
    reason: &str,
) -> Result<Option<Allocation>> {
    let config = match tx.get_record::<TokenConfig>(TOKEN_SETTINGS_ID).await? {
        Some(config) => config,
        None => return Ok(None),
    };
    let amount = match resolve_amount(tx, &config, trigger).await? {
        Some(amount) => amount,
        None => return Ok(None),
    };
    let spent = config.spent_tokens + amount;
    if spent > config.allocated_tokens {
        tracing::warn!(
            user_id = %owner,
            category = trigger.category(),
            %amount,
            remaining = %(config.allocated_tokens - config.spent_tokens),
            "Allocation skipped: reward budget exhausted"
        );
        return Ok(None);
    }

    let mut wallet = load_wallet(tx, owner).await?;
    wallet.credit(amount, reason);
    tx.set_record(owner.as_str(), &wallet)?;

    let now = Utc::now();
    tx.update_record::<TokenConfig>(
        TOKEN_SETTINGS_ID,
        Patch::new()
            .set_serialized("spent_tokens", &spent)?
            .set_serialized("updated_at", &now)?,
    );

    let entry = TokenTransaction {
        id: doc_store::new_id(),
        user_id: owner.clone(),
        amount,
        kind: "allocated".to_string(),
        trigger: trigger.clone(),
        reason: reason.to_string(),
        status: "completed".to_string(),
        created_at: now,
    };
    tx.create(TokenTransaction::key(&entry.id), &entry)?;

    Ok(Some(Allocation {
        amount,
        balance: wallet.balance,
        transaction_id: entry.id,
    }))
}

fn validate_owner(owner: &UserId) -> Result<()> {
    if owner.as_str().trim().is_empty() {
        return Err(Error::Validation("user id must not be empty".to_string()));
    }
    Ok(())
}

fn validate_amount(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(Error::Validation(format!("amount must be positive, got {}", amount)));
    }
    Ok(())
}

fn validate_non_negative(what: &str, value: Decimal) -> Result<()> {
    if value < Decimal::ZERO {
        return Err(Error::Validation(format!("{} must not be negative, got {}", what, value)));
    }
    Ok(())
}
