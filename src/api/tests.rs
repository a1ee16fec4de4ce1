use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::api::middleware::cors;
use crate::api::server::{AppState, router};
use crate::db::memory::MemoryPointStore;
use crate::db::models::member::{Member, UserId};
use crate::db::repositories::PointStore;
use crate::engine::{PointsEngine, RankingLimits};
use crate::util::env::{Env, from_iter};

const TOKEN: &str = "internal-secret";

async fn app() -> (Router, MemoryPointStore) {
    app_with_timeout(Duration::from_secs(5)).await
}

async fn app_with_timeout(request_timeout: Duration) -> (Router, MemoryPointStore) {
    let store = MemoryPointStore::new();
    store
        .add_member(Member::student(1, "Ana Silva", Some("Physics")))
        .await;
    store
        .add_member(Member::student(2, "Ben Costa", Some("Physics")))
        .await;
    store.add_member(Member::student(3, "Cai Lun", None)).await;

    let state = Arc::new(AppState {
        engine: PointsEngine::new(Arc::new(store.clone()), RankingLimits::default()),
        internal_token: TOKEN.to_string(),
        request_timeout,
    });

    (router(state, cors("*")), store)
}

fn award_request(token: Option<&str>, body: Value) -> Request<Body> {
    let mut req = Request::builder()
        .method("POST")
        .uri("/points/award")
        .header(CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        req = req.header(AUTHORIZATION, token);
    }

    req.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();

    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };

    (status, body)
}

#[tokio::test]
async fn test_health() {
    let (app, _) = app().await;
    let (status, body) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_award_requires_internal_token() {
    let (app, store) = app().await;
    let body = json!({ "user_id": 1, "action": "upload" });

    let (status, _) = send(&app, award_request(None, body.clone())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, award_request(Some("wrong-secret-xx"), body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert_eq!(store.event_count(UserId(1)).await, 0);
}

#[tokio::test]
async fn test_award_with_default_and_explicit_points() {
    let (app, _) = app().await;

    let (status, body) = send(
        &app,
        award_request(Some(TOKEN), json!({ "user_id": 1, "action": "upload" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["aggregate"]["points"], 10);
    assert_eq!(body["aggregate"]["level"], 1);

    let (status, body) = send(
        &app,
        award_request(
            Some(TOKEN),
            json!({ "user_id": 1, "action": "rating_received", "points": 95 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["aggregate"]["points"], 105);
    assert_eq!(body["aggregate"]["level"], 2);
    assert_eq!(body["leveled_up"], true);
}

#[tokio::test]
async fn test_award_rejections() {
    let (app, store) = app().await;

    let (status, body) = send(
        &app,
        award_request(
            Some(TOKEN),
            json!({ "user_id": 1, "action": "upload", "points": 0 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("positive"));

    let (status, _) = send(
        &app,
        award_request(Some(TOKEN), json!({ "user_id": 99, "action": "upload" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        award_request(Some(TOKEN), json!({ "user_id": 1, "action": "rating" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(store.event_count(UserId(1)).await, 0);
}

#[tokio::test]
async fn test_leaderboard_and_ranks() {
    let (app, _) = app().await;

    for (user, points) in [(1, 30), (2, 120), (3, 60)] {
        let (status, _) = send(
            &app,
            award_request(
                Some(TOKEN),
                json!({ "user_id": user, "action": "answer", "points": points }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(&app, get("/leaderboard?user_id=1&limit=2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], true);
    assert_eq!(body["scope"], "overall");
    assert_eq!(body["entries"].as_array().unwrap().len(), 2);
    assert_eq!(body["entries"][0]["user_id"], 2);
    assert_eq!(body["entries"][0]["rank"], 1);
    assert_eq!(
        body["requester_rank"],
        json!({ "status": "ranked", "rank": 3 })
    );

    let (status, body) = send(&app, get("/leaderboard?scope=department&user_id=1")).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<_> = body["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["user_id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![2, 1]);

    let (status, body) = send(&app, get("/users/3/rank?scope=group")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rank"], json!({ "status": "not_ranked" }));

    let (status, body) = send(&app, get("/users/3/rank")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["scope"], "overall");
    assert_eq!(body["rank"], json!({ "status": "ranked", "rank": 2 }));
}

#[tokio::test]
async fn test_leaderboard_bad_input() {
    let (app, _) = app().await;

    let (status, body) = send(&app, get("/leaderboard?scope=weekly")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("weekly"));

    let (status, _) = send(&app, get("/leaderboard?limit=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, get("/users/404/rank")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_points_summary_and_history() {
    let (app, _) = app().await;

    for action in ["upload", "comment", "answer"] {
        send(
            &app,
            award_request(Some(TOKEN), json!({ "user_id": 1, "action": action })),
        )
        .await;
    }

    let (status, body) = send(&app, get("/users/1/points")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["points"], 17);
    assert_eq!(body["level"], 1);
    assert_eq!(body["progress"]["next_level_at"], 100);
    assert_eq!(body["progress"]["points_to_next"], 83);
    assert_eq!(body["rank"], json!({ "status": "ranked", "rank": 1 }));

    let (status, body) = send(&app, get("/users/2/points")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["points"], 0);
    assert_eq!(body["rank"], json!({ "status": "not_ranked" }));

    let (status, body) = send(&app, get("/users/1/history?limit=2")).await;
    assert_eq!(status, StatusCode::OK);
    let events = body.as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e["user_id"] == 1));

    let (status, _) = send(&app, get("/users/404/history")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_slow_leaderboard_serves_empty_view() {
    let (app, store) = app_with_timeout(Duration::from_millis(50)).await;

    // an open transaction holds the store until it is dropped
    let _tx = store.begin().await.unwrap();

    let (status, body) = send(&app, get("/leaderboard?scope=overall")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], false);
    assert_eq!(body["scope"], "overall");
    assert_eq!(body["entries"], json!([]));
}

#[tokio::test]
async fn test_memory_backend_serves_seeded_members() {
    let seed = std::env::temp_dir().join(format!(
        "eduhub-points-seed-{}.json",
        std::process::id()
    ));
    let members = json!([
        { "id": 1, "display_name": "Ana Silva", "role": "student", "group": "Physics" },
        { "id": 2, "display_name": "Root", "role": "admin", "group": null },
    ]);
    tokio::fs::write(&seed, members.to_string()).await.unwrap();

    let env: Env = from_iter(
        [
            ("STORAGE_BACKEND", "memory"),
            ("MEMORY_SEED_FILE", seed.to_str().unwrap()),
            ("INTERNAL_POST_TOKEN", TOKEN),
        ]
        .map(|(k, v)| (k.to_string(), v.to_string())),
    )
    .unwrap();

    let state = AppState::from_env(&env).await.unwrap();
    let app = router(Arc::new(state), cors(&env.cors_allow_origins));
    tokio::fs::remove_file(&seed).await.unwrap();

    let (status, body) = send(
        &app,
        award_request(Some(TOKEN), json!({ "user_id": 1, "action": "upload" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["aggregate"]["points"], 10);

    let (status, _) = send(
        &app,
        award_request(Some(TOKEN), json!({ "user_id": 3, "action": "upload" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, get("/leaderboard")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entries"].as_array().unwrap().len(), 1);
}
