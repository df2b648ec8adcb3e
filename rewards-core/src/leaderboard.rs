//! Leaderboard ranker
//!
//! Runs are bucketed by exact distance and ranked by ascending duration
//! with competition ranking: equal durations share a rank and the next
//! distinct duration skips ahead, so `[50, 50, 60]` ranks `[1, 1, 3]`.
//!
//! Inserting a run renumbers every existing entry whose rank shifts. The
//! renumbering and the insert commit together, guarded by a per-bucket
//! counter document so concurrent inserts into one bucket serialize.

use crate::{
    config::LeaderboardConfig,
    error::{Error, Result},
    history::HistoryRecorder,
    metrics::Metrics,
    types::{threshold_key, Board, RunRecord, Team, UserId, UserProfile},
};
use chrono::Utc;
use doc_store::{DocKey, Direction, Document, Patch, Query, Store, Transaction};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Collection of per-bucket guard documents
const BUCKETS: &str = "leaderboard_buckets";

/// Competition ranks of a duration list sorted ascending
pub fn competition_ranks(durations: &[f64]) -> Vec<u32> {
    let mut ranks = Vec::with_capacity(durations.len());
    let mut prev: Option<(f64, u32)> = None;
    for (index, &duration) in durations.iter().enumerate() {
        let rank = match prev {
            Some((prev_duration, prev_rank)) if prev_duration == duration => prev_rank,
            _ => index as u32 + 1,
        };
        prev = Some((duration, rank));
        ranks.push(rank);
    }
    ranks
}

/// Where a new run lands and which existing entries change rank
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankPlan {
    /// Rank of the new run
    pub rank: u32,
    /// Index of the new run in the merged ordering
    pub position: usize,
    /// `(entry id, new rank)` for every existing entry whose rank changed
    pub updates: Vec<(String, u32)>,
}

/// Plan the insertion of `duration` into a bucket sorted by duration
///
/// The new run goes after every existing entry with an equal or smaller
/// duration, so it joins an existing tie group at that group's rank.
pub fn plan_insertion(existing: &[RunRecord], duration: f64) -> RankPlan {
    let position = existing.partition_point(|record| record.duration <= duration);

    let mut merged: Vec<f64> = existing.iter().map(|record| record.duration).collect();
    merged.insert(position, duration);
    let ranks = competition_ranks(&merged);

    let updates = existing
        .iter()
        .enumerate()
        .filter_map(|(index, record)| {
            let merged_index = if index < position { index } else { index + 1 };
            let rank = ranks[merged_index];
            (record.rank != rank).then(|| (record.id.clone(), rank))
        })
        .collect();

    RankPlan {
        rank: ranks[position],
        position,
        updates,
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BucketGuard {
    entries: u64,
}

/// Assigns ranks and serves paged leaderboards
#[derive(Debug, Clone)]
pub struct LeaderboardRanker {
    store: Store,
    history: Arc<dyn HistoryRecorder>,
    metrics: Metrics,
    config: LeaderboardConfig,
}

impl LeaderboardRanker {
    /// Create a ranker
    pub fn new(
        store: Store,
        history: Arc<dyn HistoryRecorder>,
        metrics: Metrics,
        config: LeaderboardConfig,
    ) -> Self {
        Self {
            store,
            history,
            metrics,
            config,
        }
    }

    /// Rank an individual run, then archive the runner's history
    ///
    /// Archiving failures are logged; the ranked run is still returned.
    pub async fn submit_run(
        &self,
        subject_id: &UserId,
        distance: f64,
        duration: f64,
    ) -> Result<RunRecord> {
        validate_subject(subject_id.as_str())?;
        validate_run(distance, duration)?;

        let user: UserProfile = self
            .store
            .get_record(subject_id.as_str())
            .await?
            .ok_or_else(|| Error::not_found("user", subject_id))?;

        let record = RunRecord {
            id: doc_store::new_id(),
            subject_id: subject_id.to_string(),
            name: user.name,
            picture: user.picture,
            distance,
            duration,
            rank: 0,
            timestamp: Utc::now(),
            created_by: None,
            members: None,
        };
        let record = self.insert(Board::Individual, record).await?;

        if let Err(err) = self.history.archive(subject_id).await {
            tracing::warn!(user_id = %subject_id, error = %err, "Failed to archive history after run");
        }

        Ok(record)
    }

    /// Rank an aggregated team run
    pub async fn submit_team_run(&self, team: &Team, distance: f64, duration: f64) -> Result<RunRecord> {
        let record = team_run_record(team, distance, duration)?;
        self.insert(Board::Team, record).await
    }

    /// Page of the individual leaderboard for a bucket
    pub async fn get_leaderboard(
        &self,
        distance: f64,
        page: u32,
        page_size: Option<u32>,
    ) -> Result<Vec<RunRecord>> {
        self.page(Board::Individual, distance, page, page_size).await
    }

    /// Page of the team leaderboard for a bucket
    pub async fn get_team_leaderboard(
        &self,
        distance: f64,
        page: u32,
        page_size: Option<u32>,
    ) -> Result<Vec<RunRecord>> {
        self.page(Board::Team, distance, page, page_size).await
    }

    async fn page(
        &self,
        board: Board,
        distance: f64,
        page: u32,
        page_size: Option<u32>,
    ) -> Result<Vec<RunRecord>> {
        validate_distance(distance)?;
        let page_size = page_size.unwrap_or(self.config.default_page_size);
        if page == 0 {
            return Err(Error::Validation("page must be at least 1".to_string()));
        }
        if page_size == 0 || page_size > self.config.max_page_size {
            return Err(Error::Validation(format!(
                "page size must be between 1 and {}",
                self.config.max_page_size
            )));
        }

        let query = Query::collection(board.collection())
            .where_eq("distance", distance)
            .order_by("rank", Direction::Ascending)
            .offset((page as usize - 1) * page_size as usize)
            .limit(page_size as usize);
        decode_all(&self.store.query(&query).await?)
    }

    async fn insert(&self, board: Board, record: RunRecord) -> Result<RunRecord> {
        let started = Instant::now();
        let result = self
            .store
            .run_transaction(|tx| {
                let record = record.clone();
                async move { Self::insert_in(&tx, board, record).await }
            })
            .await;

        let (record, renumbered) = result.map_err(|err| {
            self.metrics.observe_error(&err);
            err
        })?;
        self.record_ranked(board, &record, renumbered, started);
        Ok(record)
    }

    /// Stage a ranked insert inside an open transaction
    ///
    /// Reads the bucket guard and the bucket, then stages the renumbering,
    /// the new entry and the guard bump. Returns the ranked record and the
    /// number of renumbered entries; nothing is visible until `tx` commits.
    pub async fn insert_in(
        tx: &Transaction,
        board: Board,
        mut record: RunRecord,
    ) -> Result<(RunRecord, usize)> {
        let collection = board.collection();
        let guard_key = DocKey::new(BUCKETS, format!("{}:{}", collection, threshold_key(record.distance)));
        let guard: BucketGuard = match tx.get(&guard_key).await? {
            Some(doc) => doc.decode()?,
            None => BucketGuard::default(),
        };

        let query = Query::collection(collection)
            .where_eq("distance", record.distance)
            .order_by("duration", Direction::Ascending);
        let existing = decode_all(&tx.query(&query).await?)?;

        let plan = plan_insertion(&existing, record.duration);
        record.rank = plan.rank;

        for (id, rank) in &plan.updates {
            tx.update(DocKey::new(collection, id.as_str()), Patch::new().set("rank", *rank));
        }
        tx.create(DocKey::new(collection, record.id.as_str()), &record)?;
        tx.set(
            guard_key,
            &BucketGuard {
                entries: guard.entries + 1,
            },
        )?;
        Ok((record, plan.updates.len()))
    }

    /// Record metrics and log a committed insert
    pub fn record_ranked(&self, board: Board, record: &RunRecord, renumbered: usize, started: Instant) {
        let label = match board {
            Board::Individual => "individual",
            Board::Team => "team",
        };
        self.metrics
            .record_run(label, renumbered, started.elapsed().as_secs_f64());
        tracing::info!(
            board = label,
            subject_id = %record.subject_id,
            distance = record.distance,
            duration = record.duration,
            rank = record.rank,
            renumbered,
            "Run ranked"
        );
    }
}

/// Leaderboard entry for a team's aggregated run, not yet ranked
pub fn team_run_record(team: &Team, distance: f64, duration: f64) -> Result<RunRecord> {
    validate_subject(team.id.as_str())?;
    validate_run(distance, duration)?;

    Ok(RunRecord {
        id: doc_store::new_id(),
        subject_id: team.id.to_string(),
        name: team.name.clone(),
        picture: team.logo.clone(),
        distance,
        duration,
        rank: 0,
        timestamp: Utc::now(),
        created_by: Some(team.created_by.clone()),
        members: Some(team.members.len() as u32),
    })
}

fn decode_all(docs: &[Document]) -> Result<Vec<RunRecord>> {
    Ok(docs
        .iter()
        .map(Document::decode)
        .collect::<doc_store::Result<Vec<_>>>()?)
}

fn validate_subject(subject_id: &str) -> Result<()> {
    if subject_id.trim().is_empty() {
        return Err(Error::Validation("subject id must not be empty".to_string()));
    }
    Ok(())
}

fn validate_distance(distance: f64) -> Result<()> {
    if !distance.is_finite() || distance <= 0.0 {
        return Err(Error::Validation(format!(
            "distance must be a positive number, got {}",
            distance
        )));
    }
    Ok(())
}

fn validate_run(distance: f64, duration: f64) -> Result<()> {
    validate_distance(distance)?;
    if !duration.is_finite() || duration <= 0.0 {
        return Err(Error::Validation(format!(
            "duration must be a positive number, got {}",
            duration
        )));
    }
    Ok(())
}
