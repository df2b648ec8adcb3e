//! Team coordinator
//!
//! Owns the team run lifecycle and the split of the team distance
//! between members.
//!
//! # Lifecycle
//!
//! `waiting → started → completed`, `started → incomplete`. No transition
//! leaves a terminal state.
//!
//! # Assignments
//!
//! A join recomputes every share from scratch (`total / n`, rounded to the
//! configured precision, residual on the last members). A removal only
//! spreads the removed share evenly over the remaining members, so earlier
//! shares are kept.

use crate::{
    error::{Error, Result},
    history::HistoryRecorder,
    leaderboard::{team_run_record, LeaderboardRanker},
    metrics::Metrics,
    types::{AccountStatus, Board, RunRecord, RunStats, RunStatus, Team, TeamId, UserId, UserProfile},
};
use chrono::Utc;
use doc_store::{Patch, Query, Record, Store, Transaction};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Split `total` evenly between `members` at `precision` decimal places
///
/// Works in integer units so the shares add up to the rounded total; the
/// leftover units go one each to the last members.
pub fn even_assignments(members: &[UserId], total: f64, precision: u32) -> BTreeMap<UserId, f64> {
    if members.is_empty() {
        return BTreeMap::new();
    }
    let scale = 10f64.powi(precision as i32);
    let total_units = (total * scale).round() as i64;
    let n = members.len() as i64;
    let base = total_units / n;
    let remainder = total_units % n;

    members
        .iter()
        .enumerate()
        .map(|(index, member)| {
            let extra = i64::from(index as i64 >= n - remainder);
            (member.clone(), (base + extra) as f64 / scale)
        })
        .collect()
}

/// Remove `removed` and add its share, split evenly, to every remaining member
pub fn redistribute_share(
    assignments: &mut BTreeMap<UserId, f64>,
    remaining: &[UserId],
    removed: &UserId,
) {
    let share = assignments.remove(removed).unwrap_or(0.0);
    if remaining.is_empty() {
        return;
    }
    let portion = share / remaining.len() as f64;
    for member in remaining {
        *assignments.entry(member.clone()).or_insert(0.0) += portion;
    }
}

/// Parameters of a new team
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTeam {
    /// Creator, becomes the first member
    pub creator: UserId,
    /// Display name
    pub name: String,
    /// Maximum members
    pub member_limit: u32,
    /// Distance the team covers together
    pub total_distance: f64,
    /// Logo URL
    #[serde(default)]
    pub logo: Option<String>,
}

/// Result of a member finishing their share
#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    /// Team after the update
    pub team: Team,
    /// Whether this call completed the whole team
    pub team_completed: bool,
    /// Team leaderboard entry, when the completion was ranked
    pub leaderboard_entry: Option<RunRecord>,
}

/// Team with the profiles of its members
#[derive(Debug, Clone, Serialize)]
pub struct TeamView {
    /// Team
    pub team: Team,
    /// Member profiles in join order
    pub members: Vec<UserProfile>,
}

/// Coordinates team membership and team runs
#[derive(Debug, Clone)]
pub struct TeamCoordinator {
    store: Store,
    history: Arc<dyn HistoryRecorder>,
    ranker: LeaderboardRanker,
    metrics: Metrics,
    precision: u32,
}

impl TeamCoordinator {
    /// Create a coordinator
    pub fn new(
        store: Store,
        history: Arc<dyn HistoryRecorder>,
        ranker: LeaderboardRanker,
        metrics: Metrics,
        precision: u32,
    ) -> Self {
        Self {
            store,
            history,
            ranker,
            metrics,
            precision,
        }
    }

    /// Create a team with the creator as its only member
    pub async fn create_team(&self, request: NewTeam) -> Result<Team> {
        validate_new_team(&request)?;
        let team_id = TeamId::generate();

        let team = self
            .store
            .run_transaction(|tx| {
                let request = request.clone();
                let team_id = team_id.clone();
                async move {
                    let creator = load_user(&tx, &request.creator).await?;
                    if creator.team_id.is_some() {
                        return Err(Error::Conflict("user is already part of a team".to_string()));
                    }

                    let mut assignments = BTreeMap::new();
                    assignments.insert(request.creator.clone(), request.total_distance);
                    let team = Team {
                        id: team_id,
                        name: request.name.trim().to_string(),
                        logo: request.logo,
                        created_by: request.creator.clone(),
                        member_limit: request.member_limit,
                        members: vec![request.creator.clone()],
                        total_distance: request.total_distance,
                        assignments,
                        run_status: RunStatus::Waiting,
                        completed: Vec::new(),
                        team_progress: None,
                        created_at: Utc::now(),
                        started_at: None,
                        completed_at: None,
                        ended_by: None,
                        ended_at: None,
                    };

                    tx.create(Team::key(team.id.as_str()), &team)?;
                    tx.update_record::<UserProfile>(
                        request.creator.as_str(),
                        Patch::new()
                            .set_serialized("team_id", &team.id)?
                            .set("goal", team.total_distance),
                    );
                    Ok::<_, Error>(team)
                }
            })
            .await
            .map_err(|err| self.observe(err))?;

        self.metrics.record_team_transition("waiting");
        tracing::info!(team_id = %team.id, user_id = %team.created_by, "Team created");
        Ok(team)
    }

    /// Add a user to a team and recompute every share
    pub async fn join_team(&self, team_id: &TeamId, user_id: &UserId) -> Result<Team> {
        validate_id("team id", team_id.as_str())?;
        validate_id("user id", user_id.as_str())?;
        let precision = self.precision;

        let team = self
            .store
            .run_transaction(|tx| {
                let team_id = team_id.clone();
                let user_id = user_id.clone();
                async move {
                    let mut team = load_team(&tx, &team_id).await?;
                    let user = load_user(&tx, &user_id).await?;

                    if user.team_id.is_some() {
                        return Err(Error::Conflict("user is already part of a team".to_string()));
                    }
                    if team.is_member(&user_id) {
                        return Err(Error::Conflict("user is already a member".to_string()));
                    }
                    if team.run_status.is_terminal() {
                        return Err(Error::Conflict(format!("team run is {}", team.run_status)));
                    }
                    if team.is_full() {
                        let reason = if team.run_status == RunStatus::Started {
                            "team run already started and the team is full"
                        } else {
                            "team is full"
                        };
                        return Err(Error::Conflict(reason.to_string()));
                    }

                    let creator: Option<UserProfile> =
                        tx.get_record(team.created_by.as_str()).await?;
                    let creator =
                        creator.ok_or_else(|| Error::not_found("team creator", &team.created_by))?;

                    team.members.push(user_id.clone());
                    team.assignments =
                        even_assignments(&team.members, team.total_distance, precision);
                    let goal = team.assignments.get(&user_id).copied().unwrap_or(0.0);

                    tx.update_record::<Team>(
                        team_id.as_str(),
                        Patch::new()
                            .set_serialized("members", &team.members)?
                            .set_serialized("assignments", &team.assignments)?,
                    );
                    tx.update_record::<UserProfile>(
                        user_id.as_str(),
                        Patch::new()
                            .set_serialized("team_id", &team.id)?
                            .set("goal", goal)
                            .set_serialized("status", &AccountStatus::Active)?
                            .set("paid", true)
                            .set_or_delete("map_id", creator.map_id.as_ref())?,
                    );
                    Ok::<_, Error>(team)
                }
            })
            .await
            .map_err(|err| self.observe(err))?;

        tracing::info!(
            team_id = %team_id,
            user_id = %user_id,
            members = team.members.len(),
            "Member joined team"
        );
        Ok(team)
    }

    /// Remove a member, archiving their history first
    ///
    /// The requestor must be the target or the team creator.
    pub async fn remove_member(
        &self,
        team_id: &TeamId,
        target: &UserId,
        requestor: &UserId,
    ) -> Result<Team> {
        let team = self.load(team_id).await?;
        authorize_removal(&team, target, requestor)?;

        self.history.archive(target).await?;

        let team = self
            .store
            .run_transaction(|tx| {
                let team_id = team_id.clone();
                let target = target.clone();
                let requestor = requestor.clone();
                async move {
                    let mut team = load_team(&tx, &team_id).await?;
                    authorize_removal(&team, &target, &requestor)?;

                    team.members.retain(|member| member != &target);
                    redistribute_share(&mut team.assignments, &team.members, &target);
                    team.completed.clear();

                    tx.update_record::<Team>(
                        team_id.as_str(),
                        Patch::new()
                            .set_serialized("members", &team.members)?
                            .set_serialized("assignments", &team.assignments)?
                            .set("completed", Value::Array(Vec::new())),
                    );
                    tx.update_record::<UserProfile>(
                        target.as_str(),
                        Patch::new().delete("team_id").delete("goal"),
                    );
                    for (member, share) in &team.assignments {
                        tx.update_record::<UserProfile>(
                            member.as_str(),
                            Patch::new().set("goal", *share),
                        );
                    }
                    Ok::<_, Error>(team)
                }
            })
            .await
            .map_err(|err| self.observe(err))?;

        tracing::info!(team_id = %team_id, user_id = %target, requestor = %requestor, "Member removed from team");
        Ok(team)
    }

    /// Start the team run and hand every member their share as goal
    pub async fn start_run(&self, team_id: &TeamId, requestor: &UserId) -> Result<Team> {
        let team = self
            .store
            .run_transaction(|tx| {
                let team_id = team_id.clone();
                let requestor = requestor.clone();
                async move {
                    let mut team = load_team(&tx, &team_id).await?;
                    if team.created_by != requestor {
                        return Err(Error::Unauthorized(
                            "only the team creator can start the run".to_string(),
                        ));
                    }
                    if team.run_status != RunStatus::Waiting {
                        return Err(Error::Conflict(format!("team run is {}", team.run_status)));
                    }

                    let now = Utc::now();
                    team.run_status = RunStatus::Started;
                    team.started_at = Some(now);
                    tx.update_record::<Team>(
                        team_id.as_str(),
                        Patch::new()
                            .set_serialized("run_status", &team.run_status)?
                            .set_serialized("started_at", &now)?,
                    );
                    for (member, share) in &team.assignments {
                        tx.update_record::<UserProfile>(
                            member.as_str(),
                            Patch::new().set("goal", *share),
                        );
                    }
                    Ok::<_, Error>(team)
                }
            })
            .await
            .map_err(|err| self.observe(err))?;

        self.metrics.record_team_transition("started");
        tracing::info!(team_id = %team_id, members = team.members.len(), "Team run started");
        Ok(team)
    }

    /// Mark a member's share as done; the last member completes the team
    ///
    /// Completion is decided inside the transaction, so exactly one caller
    /// sees `team_completed == true`. The aggregate is ranked on the team
    /// leaderboard under the team's configured distance in that same
    /// transaction, so a failed insert leaves the team started and the call
    /// can be retried. Members are archived after commit.
    pub async fn complete_member_run(&self, team_id: &TeamId, user_id: &UserId) -> Result<Completion> {
        let started = Instant::now();
        let (team, team_completed, ranked) = self
            .store
            .run_transaction(|tx| {
                let team_id = team_id.clone();
                let user_id = user_id.clone();
                async move {
                    let mut team = load_team(&tx, &team_id).await?;
                    if !team.is_member(&user_id) {
                        return Err(Error::Unauthorized("user is not part of the team".to_string()));
                    }
                    if team.run_status != RunStatus::Started {
                        return Err(Error::Conflict(format!("team run is {}", team.run_status)));
                    }

                    if !team.completed.contains(&user_id) {
                        team.completed.push(user_id.clone());
                    }
                    let mut patch = Patch::new()
                        .array_union("completed", vec![Value::String(user_id.to_string())]);

                    let finished = team.all_completed();
                    let mut ranked = None;
                    if finished {
                        let progress = aggregate_stats(&tx, &team.members).await?;
                        let now = Utc::now();
                        team.run_status = RunStatus::Completed;
                        team.team_progress = Some(progress);
                        team.completed_at = Some(now);
                        patch = patch
                            .set_serialized("run_status", &team.run_status)?
                            .set_serialized("team_progress", &progress)?
                            .set_serialized("completed_at", &now)?;

                        if progress.duration > 0.0 {
                            let record = team_run_record(&team, team.total_distance, progress.duration)?;
                            ranked = Some(LeaderboardRanker::insert_in(&tx, Board::Team, record).await?);
                        }
                    }

                    tx.update_record::<Team>(team_id.as_str(), patch);
                    Ok::<_, Error>((team, finished, ranked))
                }
            })
            .await
            .map_err(|err| self.observe(err))?;

        tracing::info!(team_id = %team_id, user_id = %user_id, "Member completed team run");
        if !team_completed {
            return Ok(Completion {
                team,
                team_completed,
                leaderboard_entry: None,
            });
        }

        self.metrics.record_team_transition("completed");
        let leaderboard_entry = match ranked {
            Some((record, renumbered)) => {
                self.ranker.record_ranked(Board::Team, &record, renumbered, started);
                Some(record)
            }
            None => {
                tracing::warn!(team_id = %team.id, "Team completed without recorded duration, not ranked");
                None
            }
        };
        self.archive_members(&team).await;

        let progress = team.team_progress.unwrap_or_default();
        tracing::info!(
            team_id = %team.id,
            distance = progress.distance,
            duration = progress.duration,
            "Team run completed"
        );
        Ok(Completion {
            team,
            team_completed,
            leaderboard_entry,
        })
    }

    /// End a started run early for every member; nothing is ranked
    pub async fn end_run_for_all(&self, team_id: &TeamId, requestor: &UserId) -> Result<Team> {
        let team = self
            .store
            .run_transaction(|tx| {
                let team_id = team_id.clone();
                let requestor = requestor.clone();
                async move {
                    let mut team = load_team(&tx, &team_id).await?;
                    if team.created_by != requestor {
                        return Err(Error::Unauthorized(
                            "only the team creator can end the run".to_string(),
                        ));
                    }
                    if team.run_status != RunStatus::Started {
                        return Err(Error::Conflict(format!("team run is {}", team.run_status)));
                    }

                    let progress = aggregate_stats(&tx, &team.members).await?;
                    let now = Utc::now();
                    team.run_status = RunStatus::Incomplete;
                    team.team_progress = Some(progress);
                    team.ended_by = Some(requestor.clone());
                    team.ended_at = Some(now);
                    tx.update_record::<Team>(
                        team_id.as_str(),
                        Patch::new()
                            .set_serialized("run_status", &team.run_status)?
                            .set_serialized("team_progress", &progress)?
                            .set_serialized("ended_by", &requestor)?
                            .set_serialized("ended_at", &now)?,
                    );
                    Ok::<_, Error>(team)
                }
            })
            .await
            .map_err(|err| self.observe(err))?;

        self.metrics.record_team_transition("incomplete");
        self.archive_members(&team).await;
        tracing::info!(team_id = %team_id, requestor = %requestor, "Team run ended early");
        Ok(team)
    }

    /// The user's team with member profiles
    pub async fn get_my_team(&self, user_id: &UserId) -> Result<TeamView> {
        let user: UserProfile = self
            .store
            .get_record(user_id.as_str())
            .await?
            .ok_or_else(|| Error::not_found("user", user_id))?;
        let team_id = user
            .team_id
            .ok_or_else(|| Error::not_found("team membership", user_id))?;
        let team = self.load(&team_id).await?;

        let mut members = Vec::with_capacity(team.members.len());
        for member in &team.members {
            if let Some(profile) = self.store.get_record::<UserProfile>(member.as_str()).await? {
                members.push(profile);
            }
        }
        Ok(TeamView { team, members })
    }

    /// Every team
    pub async fn list_teams(&self) -> Result<Vec<Team>> {
        Ok(self
            .store
            .query_records(&Query::collection(Team::COLLECTION))
            .await?)
    }

    /// Load one team
    pub async fn get_team(&self, team_id: &TeamId) -> Result<Team> {
        self.load(team_id).await
    }

    async fn load(&self, team_id: &TeamId) -> Result<Team> {
        validate_id("team id", team_id.as_str())?;
        self.store
            .get_record(team_id.as_str())
            .await?
            .ok_or_else(|| Error::not_found("team", team_id))
    }

    async fn archive_members(&self, team: &Team) {
        let results = join_all(team.members.iter().map(|member| self.history.archive(member))).await;
        for (member, result) in team.members.iter().zip(results) {
            if let Err(err) = result {
                tracing::warn!(team_id = %team.id, user_id = %member, error = %err, "Failed to archive member history");
            }
        }
    }

    fn observe(&self, err: Error) -> Error {
        self.metrics.observe_error(&err);
        err
    }
}

async fn load_team(tx: &Transaction, team_id: &TeamId) -> Result<Team> {
    tx.get_record(team_id.as_str())
        .await?
        .ok_or_else(|| Error::not_found("team", team_id))
}

async fn load_user(tx: &Transaction, user_id: &UserId) -> Result<UserProfile> {
    tx.get_record(user_id.as_str())
        .await?
        .ok_or_else(|| Error::not_found("user", user_id))
}

/// Sum of the live stats of every member; missing profiles count as zero
async fn aggregate_stats(tx: &Transaction, members: &[UserId]) -> Result<RunStats> {
    let mut total = RunStats::default();
    for member in members {
        if let Some(profile) = tx.get_record::<UserProfile>(member.as_str()).await? {
            total.accumulate(&profile.current_stats);
        }
    }
    Ok(total)
}

fn authorize_removal(team: &Team, target: &UserId, requestor: &UserId) -> Result<()> {
    if requestor != target && requestor != &team.created_by {
        return Err(Error::Unauthorized(
            "only the member or the team creator can remove a member".to_string(),
        ));
    }
    if !team.is_member(target) {
        return Err(Error::not_found("team member", target));
    }
    if team.run_status.is_terminal() {
        return Err(Error::Conflict(format!("team run is {}", team.run_status)));
    }
    if team.members.len() == 1 {
        return Err(Error::Conflict("cannot remove the last member of a team".to_string()));
    }
    Ok(())
}

fn validate_id(what: &str, id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(Error::Validation(format!("{} must not be empty", what)));
    }
    Ok(())
}

fn validate_new_team(request: &NewTeam) -> Result<()> {
    validate_id("creator id", request.creator.as_str())?;
    if request.name.trim().is_empty() {
        return Err(Error::Validation("team name must not be empty".to_string()));
    }
    if request.member_limit == 0 {
        return Err(Error::Validation("member limit must be at least 1".to_string()));
    }
    if !request.total_distance.is_finite() || request.total_distance <= 0.0 {
        return Err(Error::Validation(format!(
            "total distance must be a positive number, got {}",
            request.total_distance
        )));
    }
    Ok(())
}
