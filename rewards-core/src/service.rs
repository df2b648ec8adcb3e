//! Service assembly
//!
//! Wires one store, one metrics registry and every component together.

use crate::{
    config::Config,
    error::{Error, Result},
    history::{HistoryRecorder, StoreHistoryRecorder},
    leaderboard::LeaderboardRanker,
    ledger::TokenLedger,
    metrics::Metrics,
    payments::PackageAssigner,
    team::TeamCoordinator,
    users::UserDirectory,
};
use doc_store::Store;
use std::sync::Arc;

/// The assembled rewards backend
#[derive(Debug, Clone)]
pub struct RewardsService {
    store: Store,
    metrics: Metrics,
    history: StoreHistoryRecorder,
    leaderboard: LeaderboardRanker,
    teams: TeamCoordinator,
    ledger: TokenLedger,
    users: UserDirectory,
    payments: PackageAssigner,
}

impl RewardsService {
    /// Validate `config`, open the configured store and build the service
    pub async fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        let store = config.store.open()?;
        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            backend = ?config.store.backend,
            "Rewards service opened"
        );
        Self::with_store(store, config)
    }

    /// Build the service over an existing store
    pub fn with_store(store: Store, config: &Config) -> Result<Self> {
        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("failed to register metrics: {}", e)))?;
        let history = StoreHistoryRecorder::new(store.clone());
        let recorder: Arc<dyn HistoryRecorder> = Arc::new(history.clone());

        let leaderboard = LeaderboardRanker::new(
            store.clone(),
            recorder.clone(),
            metrics.clone(),
            config.leaderboard.clone(),
        );
        let teams = TeamCoordinator::new(
            store.clone(),
            recorder,
            leaderboard.clone(),
            metrics.clone(),
            config.teams.assignment_precision,
        );
        let ledger = TokenLedger::new(store.clone(), metrics.clone());
        let users = UserDirectory::new(store.clone(), ledger.clone(), history.clone());
        let payments = PackageAssigner::new(store.clone(), ledger.clone(), metrics.clone());

        Ok(Self {
            store,
            metrics,
            history,
            leaderboard,
            teams,
            ledger,
            users,
            payments,
        })
    }

    /// Underlying store
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Metrics registry
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// History reads
    pub fn history(&self) -> &StoreHistoryRecorder {
        &self.history
    }

    /// Leaderboard ranker
    pub fn leaderboard(&self) -> &LeaderboardRanker {
        &self.leaderboard
    }

    /// Team coordinator
    pub fn teams(&self) -> &TeamCoordinator {
        &self.teams
    }

    /// Token ledger
    pub fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }

    /// User directory
    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    /// Package assignment
    pub fn payments(&self) -> &PackageAssigner {
        &self.payments
    }
}
