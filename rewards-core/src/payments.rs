//! Package assignment
//!
//! A package is assigned either when the payment gateway confirms a card
//! payment or when the user pays with wallet tokens. Assignment sets the
//! goal and milestones of the package on the profile; the package token
//! reward follows as a side effect.

use crate::{
    error::{Error, Result},
    ledger::{Allocation, TokenLedger},
    metrics::Metrics,
    types::{
        Achievement, AccountStatus, Package, PaymentMethod, PaymentRecord, RewardTrigger, UserId,
        UserProfile, Wallet,
    },
};
use chrono::Utc;
use doc_store::{Patch, Query, Record, Store, Transaction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Currency recorded for wallet payments
pub const TOKEN_CURRENCY: &str = "TOKEN";

/// Payment confirmation sent by the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentNotice {
    /// Paying user
    pub user_id: UserId,
    /// Package bought
    pub package_id: String,
    /// Amount charged
    pub amount_paid: Decimal,
    /// Gateway reference
    #[serde(default)]
    pub reference: Option<String>,
    /// Currency code
    pub currency: String,
}

/// Result of a package assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageAssignment {
    /// Profile after assignment
    pub profile: UserProfile,
    /// Package assigned
    pub package: Package,
    /// Package reward, if one was paid
    pub allocation: Option<Allocation>,
}

/// Assigns purchased packages to users
#[derive(Debug, Clone)]
pub struct PackageAssigner {
    store: Store,
    ledger: TokenLedger,
    metrics: Metrics,
}

impl PackageAssigner {
    /// Create an assigner
    pub fn new(store: Store, ledger: TokenLedger, metrics: Metrics) -> Self {
        Self {
            store,
            ledger,
            metrics,
        }
    }

    /// Assign the package of a confirmed card payment
    pub async fn handle_payment(&self, notice: PaymentNotice) -> Result<PackageAssignment> {
        validate_ids(&notice.user_id, &notice.package_id)?;
        if notice.amount_paid < Decimal::ZERO {
            return Err(Error::Validation(format!(
                "amount paid must not be negative, got {}",
                notice.amount_paid
            )));
        }
        if notice.currency.trim().is_empty() {
            return Err(Error::Validation("currency must not be empty".to_string()));
        }

        let (profile, package) = self
            .store
            .run_transaction(|tx| {
                let notice = notice.clone();
                async move {
                    let profile = load_user(&tx, &notice.user_id).await?;
                    let package = load_package(&tx, &notice.package_id).await?;
                    if !package.status.is_active() {
                        tracing::warn!(
                            user_id = %notice.user_id,
                            package_id = %package.id,
                            "Paid package is inactive, assigning anyway"
                        );
                    }
                    let payment = PaymentRecord {
                        method: PaymentMethod::Card,
                        amount: notice.amount_paid,
                        currency: notice.currency.clone(),
                        reference: notice.reference.clone(),
                        paid_at: Utc::now(),
                    };
                    let profile = assign(&tx, profile, &package, payment).await?;
                    Ok::<_, Error>((profile, package))
                }
            })
            .await?;

        tracing::info!(
            user_id = %notice.user_id,
            package_id = %package.id,
            amount = %notice.amount_paid,
            currency = %notice.currency,
            "Package assigned from payment"
        );
        let allocation = self.package_reward(&notice.user_id, &package).await;
        Ok(PackageAssignment {
            profile,
            package,
            allocation,
        })
    }

    /// Debit the package price from the wallet and assign it, atomically
    pub async fn pay_with_wallet(&self, user_id: &UserId, package_id: &str) -> Result<PackageAssignment> {
        validate_ids(user_id, package_id)?;

        let result = self
            .store
            .run_transaction(|tx| {
                let user_id = user_id.clone();
                async move {
                    let profile = load_user(&tx, &user_id).await?;
                    let package = load_package(&tx, package_id).await?;
                    if !package.status.is_active() {
                        return Err(Error::Conflict(format!("package {} is not available", package.id)));
                    }

                    let mut wallet: Wallet = tx
                        .get_record(user_id.as_str())
                        .await?
                        .ok_or_else(|| Error::not_found("wallet", &user_id))?;
                    wallet.debit(package.price, format!("Purchase of package {}", package.name))?;
                    tx.set_record(user_id.as_str(), &wallet)?;

                    let payment = PaymentRecord {
                        method: PaymentMethod::Wallet,
                        amount: package.price,
                        currency: TOKEN_CURRENCY.to_string(),
                        reference: None,
                        paid_at: Utc::now(),
                    };
                    let profile = assign(&tx, profile, &package, payment).await?;
                    Ok::<_, Error>((profile, package))
                }
            })
            .await;

        let (profile, package) = match result {
            Ok(assigned) => assigned,
            Err(err @ Error::InsufficientFunds { .. }) => {
                self.metrics.record_debit_rejected();
                tracing::warn!(user_id = %user_id, package_id, "Wallet purchase rejected: insufficient balance");
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        tracing::info!(
            user_id = %user_id,
            package_id = %package.id,
            price = %package.price,
            "Package bought with wallet"
        );
        let allocation = self.package_reward(user_id, &package).await;
        Ok(PackageAssignment {
            profile,
            package,
            allocation,
        })
    }

    async fn package_reward(&self, user_id: &UserId, package: &Package) -> Option<Allocation> {
        let trigger = RewardTrigger::Package {
            package_id: package.id.clone(),
        };
        let reason = format!("Purchased package {}", package.name);
        match self.ledger.allocate(user_id, &trigger, &reason).await {
            Ok(allocation) => allocation,
            Err(err) => {
                tracing::warn!(
                    user_id = %user_id,
                    package_id = %package.id,
                    error = %err,
                    "Failed to allocate package reward"
                );
                None
            }
        }
    }
}

/// Write the package onto the profile inside `tx`
async fn assign(
    tx: &Transaction,
    mut profile: UserProfile,
    package: &Package,
    payment: PaymentRecord,
) -> Result<UserProfile> {
    let milestones = tx
        .query(
            &Query::collection(Achievement::COLLECTION)
                .where_eq("package_id", package.id.as_str())
                .limit(1),
        )
        .await?
        .first()
        .map(|doc| doc.decode::<Achievement>())
        .transpose()?
        .map_or(0, |achievement| achievement.milestone_count);

    tx.update_record::<UserProfile>(
        profile.id.as_str(),
        Patch::new()
            .set("package_id", package.id.as_str())
            .set("goal", package.distance)
            .set("total_milestones", milestones)
            .set("completed_milestones", 0)
            .set("paid", true)
            .set_serialized("status", &AccountStatus::Active)?
            .set_serialized("payment", &payment)?,
    );

    profile.package_id = Some(package.id.clone());
    profile.goal = Some(package.distance);
    profile.total_milestones = milestones;
    profile.completed_milestones = 0;
    profile.paid = true;
    profile.status = AccountStatus::Active;
    profile.payment = Some(payment);
    Ok(profile)
}

async fn load_user(tx: &Transaction, user_id: &UserId) -> Result<UserProfile> {
    tx.get_record(user_id.as_str())
        .await?
        .ok_or_else(|| Error::not_found("user", user_id))
}

async fn load_package(tx: &Transaction, package_id: &str) -> Result<Package> {
    tx.get_record(package_id)
        .await?
        .ok_or_else(|| Error::not_found("package", package_id))
}

fn validate_ids(user_id: &UserId, package_id: &str) -> Result<()> {
    if user_id.as_str().trim().is_empty() {
        return Err(Error::Validation("user id must not be empty".to_string()));
    }
    if package_id.trim().is_empty() {
        return Err(Error::Validation("package id must not be empty".to_string()));
    }
    Ok(())
}
