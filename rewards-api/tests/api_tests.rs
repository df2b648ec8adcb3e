//! HTTP round trips against an in-memory service

use actix_web::{http::StatusCode, test, web, App};
use rewards_core::{Config, RewardsService};
use serde_json::{json, Value};

async fn service() -> web::Data<RewardsService> {
    let service = RewardsService::open(&Config::default()).await.unwrap();
    web::Data::new(service)
}

macro_rules! app {
    ($data:expr) => {
        test::init_service(
            App::new()
                .app_data($data.clone())
                .configure(rewards_api::configure_routes),
        )
        .await
    };
}

#[actix_web::test]
async fn test_health() {
    let data = service().await;
    let app = app!(data);
    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "healthy");
}

#[actix_web::test]
async fn test_register_and_rank_run() {
    let data = service().await;
    let app = app!(data);

    let req = test::TestRequest::post()
        .uri("/api/v1/users")
        .set_json(json!({"id": "ann", "email": "ann@example.com", "name": "Ann"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let req = test::TestRequest::post()
        .uri("/api/v1/users")
        .set_json(json!({"id": "ann", "email": "ann@example.com", "name": "Ann"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], 409);
    assert_eq!(body["error"]["type"], "conflict");

    let req = test::TestRequest::post()
        .uri("/api/v1/runs")
        .set_json(json!({"user_id": "ann", "distance": 5.0, "duration": 1500.0}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let record: Value = test::read_body_json(resp).await;
    assert_eq!(record["rank"], 1);

    let req = test::TestRequest::get()
        .uri("/api/v1/leaderboard?distance=5")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["entries"].as_array().unwrap().len(), 1);
}

#[actix_web::test]
async fn test_error_statuses() {
    let data = service().await;
    let app = app!(data);

    let req = test::TestRequest::post()
        .uri("/api/v1/runs")
        .set_json(json!({"user_id": "ghost", "distance": 5.0, "duration": 10.0}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::post()
        .uri("/api/v1/runs")
        .set_json(json!({"user_id": "ghost", "distance": -5.0, "duration": 10.0}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::put()
        .uri("/api/v1/tokens/rewards/flat/bogus")
        .set_json(json!({"tokens": "5", "status": "active"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_wallet_debit_conflict() {
    let data = service().await;
    let app = app!(data);

    for (uri, body) in [
        ("/api/v1/tokens/total", json!({"total_tokens": "1000"})),
        ("/api/v1/tokens/allocated", json!({"allocated_tokens": "500"})),
        (
            "/api/v1/tokens/rewards/flat/registration",
            json!({"tokens": "5", "status": "active"}),
        ),
    ] {
        let req = test::TestRequest::put().uri(uri).set_json(body).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK, "{}", uri);
    }

    let req = test::TestRequest::post()
        .uri("/api/v1/users")
        .set_json(json!({"id": "bo", "email": "bo@example.com", "name": "Bo"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

    let req = test::TestRequest::post()
        .uri("/api/v1/wallets/bo/debit")
        .set_json(json!({"amount": "8", "description": "too much"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["type"], "insufficient_funds");

    let req = test::TestRequest::get().uri("/api/v1/wallets/bo").to_request();
    let wallet: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(wallet["balance"], "5");

    let req = test::TestRequest::get().uri("/api/v1/tokens/stats").to_request();
    let stats: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(stats["spent_tokens"], "5");
}

#[actix_web::test]
async fn test_wallets_cannot_be_credited_directly() {
    let data = service().await;
    let app = app!(data);

    let req = test::TestRequest::post()
        .uri("/api/v1/users")
        .set_json(json!({"id": "cy", "email": "cy@example.com", "name": "Cy"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

    let req = test::TestRequest::post()
        .uri("/api/v1/wallets/cy/credit")
        .set_json(json!({"amount": "1000", "description": "free money"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::get().uri("/api/v1/wallets/cy").to_request();
    let wallet: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(wallet["balance"], "0");
}

#[actix_web::test]
async fn test_team_flow_and_permissions() {
    let data = service().await;
    let app = app!(data);

    for id in ["lead", "mate"] {
        let req = test::TestRequest::post()
            .uri("/api/v1/users")
            .set_json(json!({"id": id, "email": format!("{}@example.com", id), "name": id}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);
    }

    let req = test::TestRequest::post()
        .uri("/api/v1/teams")
        .set_json(json!({"creator": "lead", "name": "Pacers", "member_limit": 2, "total_distance": 10.0}))
        .to_request();
    let team: Value = test::call_and_read_body_json(&app, req).await;
    let team_id = team["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/teams/{}/join", team_id))
        .set_json(json!({"user_id": "mate"}))
        .to_request();
    let team: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(team["members"].as_array().unwrap().len(), 2);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/teams/{}/start", team_id))
        .set_json(json!({"user_id": "mate"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::get().uri("/api/v1/users/mate/team").to_request();
    let view: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(view["team"]["id"], team_id.as_str());
    assert_eq!(view["members"].as_array().unwrap().len(), 2);
}
