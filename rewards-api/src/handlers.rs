use crate::errors::{ApiError, Result};
use crate::models::{
    AchievementRequest, AllocatedTokensRequest, AmountRequest, CatalogueRewardRequest,
    DistanceRewardsRequest, LeaderboardQuery, PackageRewardRequest, RemoveMemberRequest,
    SubmitRunRequest, TeamActionRequest, TotalTokensRequest, WalletPurchaseRequest,
};
use actix_web::{web, HttpResponse};
use rewards_core::{
    CatalogueCategory, FlatCategory, NewTeam, NewUser, PaymentNotice, RewardSetting,
    RewardsService, RunStats, TeamId, UserId,
};
use serde_json::json;

type Service = web::Data<RewardsService>;

/// Health check endpoint
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "rewards-api",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Prometheus text exposition
pub async fn metrics(service: Service) -> Result<HttpResponse> {
    let body = service
        .metrics()
        .encode()
        .map_err(|e| ApiError::Metrics(e.to_string()))?;
    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(body))
}

// Leaderboards

/// Rank an individual run
pub async fn submit_run(service: Service, request: web::Json<SubmitRunRequest>) -> Result<HttpResponse> {
    let request = request.into_inner();
    let record = service
        .leaderboard()
        .submit_run(&request.user_id, request.distance, request.duration)
        .await?;
    Ok(HttpResponse::Created().json(record))
}

/// Individual leaderboard page
pub async fn get_leaderboard(service: Service, query: web::Query<LeaderboardQuery>) -> Result<HttpResponse> {
    let entries = service
        .leaderboard()
        .get_leaderboard(query.distance, query.page, query.page_size)
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "distance": query.distance,
        "page": query.page,
        "entries": entries
    })))
}

/// Team leaderboard page
pub async fn get_team_leaderboard(
    service: Service,
    query: web::Query<LeaderboardQuery>,
) -> Result<HttpResponse> {
    let entries = service
        .leaderboard()
        .get_team_leaderboard(query.distance, query.page, query.page_size)
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "distance": query.distance,
        "page": query.page,
        "entries": entries
    })))
}

// Teams

/// Create a team
pub async fn create_team(service: Service, request: web::Json<NewTeam>) -> Result<HttpResponse> {
    let team = service.teams().create_team(request.into_inner()).await?;
    Ok(HttpResponse::Created().json(team))
}

/// List every team
pub async fn list_teams(service: Service) -> Result<HttpResponse> {
    let teams = service.teams().list_teams().await?;
    Ok(HttpResponse::Ok().json(json!({
        "total": teams.len(),
        "teams": teams
    })))
}

/// Get one team
pub async fn get_team(service: Service, team_id: web::Path<String>) -> Result<HttpResponse> {
    let team = service.teams().get_team(&TeamId::new(team_id.into_inner())).await?;
    Ok(HttpResponse::Ok().json(team))
}

/// Join a team
pub async fn join_team(
    service: Service,
    team_id: web::Path<String>,
    request: web::Json<TeamActionRequest>,
) -> Result<HttpResponse> {
    let team = service
        .teams()
        .join_team(&TeamId::new(team_id.into_inner()), &request.user_id)
        .await?;
    Ok(HttpResponse::Ok().json(team))
}

/// Start the team run
pub async fn start_team_run(
    service: Service,
    team_id: web::Path<String>,
    request: web::Json<TeamActionRequest>,
) -> Result<HttpResponse> {
    let team = service
        .teams()
        .start_run(&TeamId::new(team_id.into_inner()), &request.user_id)
        .await?;
    Ok(HttpResponse::Ok().json(team))
}

/// Mark a member's share as done
pub async fn complete_member_run(
    service: Service,
    team_id: web::Path<String>,
    request: web::Json<TeamActionRequest>,
) -> Result<HttpResponse> {
    let completion = service
        .teams()
        .complete_member_run(&TeamId::new(team_id.into_inner()), &request.user_id)
        .await?;
    Ok(HttpResponse::Ok().json(completion))
}

/// End the team run early
pub async fn end_team_run(
    service: Service,
    team_id: web::Path<String>,
    request: web::Json<TeamActionRequest>,
) -> Result<HttpResponse> {
    let team = service
        .teams()
        .end_run_for_all(&TeamId::new(team_id.into_inner()), &request.user_id)
        .await?;
    Ok(HttpResponse::Ok().json(team))
}

/// Remove a member
pub async fn remove_member(
    service: Service,
    team_id: web::Path<String>,
    request: web::Json<RemoveMemberRequest>,
) -> Result<HttpResponse> {
    let team = service
        .teams()
        .remove_member(&TeamId::new(team_id.into_inner()), &request.target, &request.requestor)
        .await?;
    Ok(HttpResponse::Ok().json(team))
}

// Users

/// Register a user
pub async fn register_user(service: Service, request: web::Json<NewUser>) -> Result<HttpResponse> {
    let profile = service.users().register(request.into_inner()).await?;
    Ok(HttpResponse::Created().json(profile))
}

/// Profile with archived totals
pub async fn get_profile(service: Service, user_id: web::Path<String>) -> Result<HttpResponse> {
    let view = service.users().get_profile(&UserId::new(user_id.into_inner())).await?;
    Ok(HttpResponse::Ok().json(view))
}

/// Login reward
pub async fn record_login(service: Service, user_id: web::Path<String>) -> Result<HttpResponse> {
    let allocation = service.users().record_login(&UserId::new(user_id.into_inner())).await?;
    Ok(HttpResponse::Ok().json(json!({ "allocation": allocation })))
}

/// Replace live stats
pub async fn update_live_stats(
    service: Service,
    user_id: web::Path<String>,
    request: web::Json<RunStats>,
) -> Result<HttpResponse> {
    let profile = service
        .users()
        .update_live_stats(&UserId::new(user_id.into_inner()), request.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(profile))
}

/// Archived history, newest first
pub async fn get_history(service: Service, user_id: web::Path<String>) -> Result<HttpResponse> {
    let user_id = UserId::new(user_id.into_inner());
    let history = service.history().history(&user_id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "user_id": user_id,
        "total": history.len(),
        "history": history
    })))
}

/// The user's team with member profiles
pub async fn get_my_team(service: Service, user_id: web::Path<String>) -> Result<HttpResponse> {
    let view = service.teams().get_my_team(&UserId::new(user_id.into_inner())).await?;
    Ok(HttpResponse::Ok().json(view))
}

/// Award a badge, reward or spinner
pub async fn award_achievement(
    service: Service,
    user_id: web::Path<String>,
    request: web::Json<AchievementRequest>,
) -> Result<HttpResponse> {
    let award = service
        .users()
        .award_achievement(&UserId::new(user_id.into_inner()), request.kind, &request.item_id)
        .await?;
    Ok(HttpResponse::Ok().json(award))
}

// Wallets

/// Get a wallet
pub async fn get_wallet(service: Service, user_id: web::Path<String>) -> Result<HttpResponse> {
    let wallet = service.ledger().get_wallet(&UserId::new(user_id.into_inner())).await?;
    Ok(HttpResponse::Ok().json(wallet))
}

/// Debit a wallet
pub async fn debit_wallet(
    service: Service,
    user_id: web::Path<String>,
    request: web::Json<AmountRequest>,
) -> Result<HttpResponse> {
    let wallet = service
        .ledger()
        .debit(&UserId::new(user_id.into_inner()), request.amount, &request.description)
        .await?;
    Ok(HttpResponse::Ok().json(wallet))
}

// Token configuration

/// Current token configuration
pub async fn get_token_config(service: Service) -> Result<HttpResponse> {
    let config = service.ledger().token_config().await?;
    Ok(HttpResponse::Ok().json(config))
}

/// Economy overview
pub async fn get_token_stats(service: Service) -> Result<HttpResponse> {
    let stats = service.ledger().token_stats().await?;
    Ok(HttpResponse::Ok().json(stats))
}

/// Set the minted supply
pub async fn update_total_tokens(
    service: Service,
    request: web::Json<TotalTokensRequest>,
) -> Result<HttpResponse> {
    let config = service.ledger().update_total_tokens(request.total_tokens).await?;
    Ok(HttpResponse::Ok().json(config))
}

/// Set the reward budget
pub async fn update_allocated_tokens(
    service: Service,
    request: web::Json<AllocatedTokensRequest>,
) -> Result<HttpResponse> {
    let config = service
        .ledger()
        .update_allocated_tokens(request.allocated_tokens)
        .await?;
    Ok(HttpResponse::Ok().json(config))
}

/// Set a flat category reward
pub async fn set_flat_reward(
    service: Service,
    category: web::Path<String>,
    request: web::Json<RewardSetting>,
) -> Result<HttpResponse> {
    let category = match category.as_str() {
        "login" => FlatCategory::Login,
        "registration" => FlatCategory::Registration,
        "sitewide" => FlatCategory::Sitewide,
        other => return Err(ApiError::BadRequest(format!("unknown reward category: {}", other))),
    };
    let config = service
        .ledger()
        .set_flat_reward(category, request.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(config))
}

/// Set the amount and status of a catalogue category
pub async fn set_catalogue_reward(
    service: Service,
    category: web::Path<String>,
    request: web::Json<CatalogueRewardRequest>,
) -> Result<HttpResponse> {
    let category = match category.as_str() {
        "rewards" => CatalogueCategory::Rewards,
        "badges" => CatalogueCategory::Badges,
        other => return Err(ApiError::BadRequest(format!("unknown catalogue: {}", other))),
    };
    let (config, updated) = service
        .ledger()
        .set_catalogue_reward(category, request.tokens, request.status)
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "updated_items": updated,
        "config": config
    })))
}

/// Set the reward of one package
pub async fn set_package_reward(
    service: Service,
    package_id: web::Path<String>,
    request: web::Json<PackageRewardRequest>,
) -> Result<HttpResponse> {
    let config = service
        .ledger()
        .set_package_reward(&package_id, request.setting, request.category_status)
        .await?;
    Ok(HttpResponse::Ok().json(config))
}

/// Merge distance threshold rewards
pub async fn merge_distance_rewards(
    service: Service,
    request: web::Json<DistanceRewardsRequest>,
) -> Result<HttpResponse> {
    let config = service
        .ledger()
        .merge_distance_rewards(&request.settings(), request.category_status)
        .await?;
    Ok(HttpResponse::Ok().json(config))
}

// Payments

/// Payment gateway confirmation
pub async fn payment_webhook(service: Service, notice: web::Json<PaymentNotice>) -> Result<HttpResponse> {
    let assignment = service.payments().handle_payment(notice.into_inner()).await?;
    Ok(HttpResponse::Ok().json(assignment))
}

/// Buy a package with wallet tokens
pub async fn pay_with_wallet(
    service: Service,
    request: web::Json<WalletPurchaseRequest>,
) -> Result<HttpResponse> {
    let assignment = service
        .payments()
        .pay_with_wallet(&request.user_id, &request.package_id)
        .await?;
    Ok(HttpResponse::Ok().json(assignment))
}

/// Configure routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/metrics", web::get().to(metrics))
        .service(
            web::scope("/api/v1")
                .route("/health", web::get().to(health_check))
                .route("/runs", web::post().to(submit_run))
                .route("/leaderboard", web::get().to(get_leaderboard))
                .route("/leaderboard/teams", web::get().to(get_team_leaderboard))
                .route("/teams", web::post().to(create_team))
                .route("/teams", web::get().to(list_teams))
                .route("/teams/{id}", web::get().to(get_team))
                .route("/teams/{id}/join", web::post().to(join_team))
                .route("/teams/{id}/start", web::post().to(start_team_run))
                .route("/teams/{id}/complete", web::post().to(complete_member_run))
                .route("/teams/{id}/end", web::post().to(end_team_run))
                .route("/teams/{id}/remove", web::post().to(remove_member))
                .route("/users", web::post().to(register_user))
                .route("/users/{id}", web::get().to(get_profile))
                .route("/users/{id}/login", web::post().to(record_login))
                .route("/users/{id}/stats", web::put().to(update_live_stats))
                .route("/users/{id}/history", web::get().to(get_history))
                .route("/users/{id}/team", web::get().to(get_my_team))
                .route("/users/{id}/achievements", web::post().to(award_achievement))
                .route("/wallets/{id}", web::get().to(get_wallet))
                .route("/wallets/{id}/debit", web::post().to(debit_wallet))
                .route("/tokens/config", web::get().to(get_token_config))
                .route("/tokens/stats", web::get().to(get_token_stats))
                .route("/tokens/total", web::put().to(update_total_tokens))
                .route("/tokens/allocated", web::put().to(update_allocated_tokens))
                .route("/tokens/rewards/flat/{category}", web::put().to(set_flat_reward))
                .route("/tokens/rewards/catalogue/{category}", web::put().to(set_catalogue_reward))
                .route("/tokens/rewards/packages/{id}", web::put().to(set_package_reward))
                .route("/tokens/rewards/distance", web::put().to(merge_distance_rewards))
                .route("/payments/webhook", web::post().to(payment_webhook))
                .route("/payments/wallet", web::post().to(pay_with_wallet)),
        );
}
