//! History recorder
//!
//! Archiving snapshots a user's progress into the append-only
//! `userHistory` collection and resets the live fields, in one
//! transaction so no stats update falls between snapshot and reset.

use crate::{
    error::{Error, Result},
    types::{HistoryEntry, Package, RunStats, Team, TeamSnapshot, UserId, UserProfile},
};
use async_trait::async_trait;
use chrono::Utc;
use doc_store::{Direction, Patch, Query, Record, Store};

/// Snapshot-and-reset of a user's live progress
#[async_trait]
pub trait HistoryRecorder: Send + Sync + std::fmt::Debug {
    /// Archive the user's current progress and reset live fields
    async fn archive(&self, user_id: &UserId) -> Result<HistoryEntry>;
}

/// Store-backed [`HistoryRecorder`]
#[derive(Debug, Clone)]
pub struct StoreHistoryRecorder {
    store: Store,
}

impl StoreHistoryRecorder {
    /// Create a recorder over `store`
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// A user's history, newest first
    pub async fn history(&self, user_id: &UserId) -> Result<Vec<HistoryEntry>> {
        let query = Query::collection(HistoryEntry::COLLECTION)
            .where_eq("user_id", user_id.as_str())
            .order_by("timestamp_nanos", Direction::Descending);
        Ok(self.store.query_records(&query).await?)
    }

    /// Sum of the stats of every archived entry
    pub async fn previous_stats(&self, user_id: &UserId) -> Result<RunStats> {
        let history = self.history(user_id).await?;
        Ok(history.iter().map(|entry| &entry.stats).sum())
    }
}

/// Fields cleared when progress is archived
fn reset_patch() -> Result<Patch> {
    Ok(Patch::new()
        .delete("map_id")
        .delete("package_id")
        .delete("payment")
        .delete("goal")
        .delete("team_id")
        .delete("event_id")
        .set("completed_milestones", 0)
        .set("total_milestones", 0)
        .set("paid", false)
        .set_serialized("current_stats", &RunStats::default())?)
}

#[async_trait]
impl HistoryRecorder for StoreHistoryRecorder {
    async fn archive(&self, user_id: &UserId) -> Result<HistoryEntry> {
        let entry = self
            .store
            .run_transaction(|tx| {
                let user_id = user_id.clone();
                async move {
                    let user: UserProfile = tx
                        .get_record(user_id.as_str())
                        .await?
                        .ok_or_else(|| Error::not_found("user", &user_id))?;

                    let package = match &user.package_id {
                        Some(id) => tx.get_record::<Package>(id).await?,
                        None => None,
                    };
                    let team = match &user.team_id {
                        Some(id) => tx
                            .get_record::<Team>(id.as_str())
                            .await?
                            .map(|team| TeamSnapshot {
                                id: team.id,
                                name: team.name,
                                members: team.members.len() as u32,
                            }),
                        None => None,
                    };

                    let now = Utc::now();
                    let entry = HistoryEntry {
                        id: doc_store::new_id(),
                        user_id: user.id.clone(),
                        name: user.name.clone(),
                        package,
                        map_id: user.map_id.clone(),
                        goal: user.goal,
                        team,
                        stats: user.current_stats,
                        completed_milestones: user.completed_milestones,
                        total_milestones: user.total_milestones,
                        badges: user.badges.clone(),
                        rewards: user.rewards.clone(),
                        spinners: user.spinners.clone(),
                        payment: user.payment.clone(),
                        created_at: now,
                        timestamp_nanos: now.timestamp_nanos_opt().unwrap_or_default(),
                    };

                    tx.set_record(&entry.id, &entry)?;
                    tx.update_record::<UserProfile>(user_id.as_str(), reset_patch()?);
                    Ok::<_, Error>(entry)
                }
            })
            .await?;

        tracing::info!(user_id = %user_id, entry_id = %entry.id, "History archived");
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountStatus, TeamId};
    use doc_store::MemoryStore;
    use std::sync::Arc;

    fn store() -> Store {
        Store::new(Arc::new(MemoryStore::new()))
    }

    async fn seed_user(store: &Store, stats: RunStats) -> UserId {
        let id = UserId::new("runner");
        let mut user = UserProfile::new(id.clone(), "r@example.com", "Runner");
        user.status = AccountStatus::Active;
        user.paid = true;
        user.goal = Some(5.0);
        user.team_id = Some(TeamId::new("ghost-team"));
        user.current_stats = stats;
        user.completed_milestones = 2;
        store.set(UserProfile::key(id.as_str()), &user).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_archive_snapshots_and_resets() {
        let store = store();
        let stats = RunStats {
            distance: 5.2,
            duration: 1800.0,
            calories: 320.0,
            steps: 6500,
        };
        let user_id = seed_user(&store, stats).await;
        let recorder = StoreHistoryRecorder::new(store.clone());

        let entry = recorder.archive(&user_id).await.unwrap();
        assert_eq!(entry.stats, stats);
        assert_eq!(entry.goal, Some(5.0));
        // Team document is gone; the snapshot simply omits it
        assert!(entry.team.is_none());

        let user: UserProfile = store.get_record(user_id.as_str()).await.unwrap().unwrap();
        assert_eq!(user.current_stats, RunStats::default());
        assert_eq!(user.goal, None);
        assert_eq!(user.team_id, None);
        assert_eq!(user.completed_milestones, 0);
        assert!(!user.paid);
        assert_eq!(user.status, AccountStatus::Active);
    }

    #[tokio::test]
    async fn test_history_newest_first_and_sums() {
        let store = store();
        let user_id = seed_user(
            &store,
            RunStats {
                distance: 3.0,
                ..Default::default()
            },
        )
        .await;
        let recorder = StoreHistoryRecorder::new(store.clone());
        let first = recorder.archive(&user_id).await.unwrap();

        store
            .update(
                UserProfile::key(user_id.as_str()),
                Patch::new()
                    .set_serialized(
                        "current_stats",
                        &RunStats {
                            distance: 4.5,
                            ..Default::default()
                        },
                    )
                    .unwrap(),
            )
            .await
            .unwrap();
        let second = recorder.archive(&user_id).await.unwrap();

        let history = recorder.history(&user_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, second.id);
        assert_eq!(history[1].id, first.id);

        let previous = recorder.previous_stats(&user_id).await.unwrap();
        assert!((previous.distance - 7.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_archive_unknown_user() {
        let recorder = StoreHistoryRecorder::new(store());
        let err = recorder.archive(&UserId::new("nobody")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { entity: "user", .. }));
    }
}
