//! HTTP smoke tests for the frontend-facing API: envelope shape, the shared
//! API key gate, and the guard flow driven over the wire.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use chime::Config;
use http_body_util::BodyExt;
use tower::ServiceExt;

const CURATOR_ID: i64 = 1001;

async fn spawn_app(api_key: Option<&str>) -> Router {
    let db_path = std::env::temp_dir().join(format!("chime-api-test-{}.db", uuid::Uuid::new_v4()));

    let mut config = Config::default();
    config.general.database_path = format!("sqlite:{}", db_path.display());
    config.roster.curators = vec![CURATOR_ID];
    config.server.api_key = api_key.map(ToString::to_string);
    config.security.argon2_memory_cost_kib = 8;
    config.security.argon2_time_cost = 1;
    config.security.argon2_parallelism = 1;

    let state = chime::api::create_app_state_from_config(config, None)
        .await
        .expect("Failed to create app state");
    chime::api::router(state).await
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_api_key_gate() {
    let app = spawn_app(Some("smoke-test-key")).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/system/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/system/status")
                .header("X-Api-Key", "wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/system/status")
                .header("X-Api-Key", "smoke-test-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The same key is accepted as a bearer token.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/system/status")
                .header("Authorization", "Bearer smoke-test-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_system_status() {
    let app = spawn_app(None).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/system/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert!(json["success"].as_bool().unwrap_or(false));
    assert!(json["data"]["version"].is_string());
    assert_eq!(json["data"]["database_ok"], true);
    assert_eq!(json["data"]["users"]["total"], 1);
    assert_eq!(json["data"]["users"]["curators"], 1);
    assert_eq!(json["data"]["users"]["admins"], 0);
    assert!(json["data"]["watchdog"]["threshold"].is_number());
    assert_eq!(json["data"]["pending_disclosures"], 0);
}

#[tokio::test]
async fn test_guard_flow_over_http() {
    let app = spawn_app(None).await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/guard/authorize",
            serde_json::json!({ "user_id": CURATOR_ID, "action": "resend_notice" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["decision"], "prompt_password");

    // The role default is accepted but diverts into the forced change.
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/guard/password",
            serde_json::json!({ "user_id": CURATOR_ID, "password": "curator" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["decision"], "forced_password_change");
    assert_eq!(json["data"]["violations"], serde_json::json!([]));

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/guard/new-password",
            serde_json::json!({
                "user_id": CURATOR_ID,
                "password": "weak",
                "confirm": "weak"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["decision"], "forced_password_change");
    assert_eq!(json["data"]["violations"].as_array().unwrap().len(), 3);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/guard/new-password",
            serde_json::json!({
                "user_id": CURATOR_ID,
                "password": "Correct-Horse7",
                "confirm": "Correct-Horse7"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["decision"], "password_changed");

    // Rotation closed the session; the action must be requested afresh.
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/guard/authorize",
            serde_json::json!({ "user_id": CURATOR_ID, "action": "resend_notice" }),
        ))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["data"]["decision"], "prompt_password");

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/guard/password",
            serde_json::json!({ "user_id": CURATOR_ID, "password": "Correct-Horse7" }),
        ))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["data"]["decision"], "proceed");
    assert_eq!(json["data"]["action"], "resend_notice");
}

#[tokio::test]
async fn test_error_mappings() {
    let app = spawn_app(None).await;

    // Blank action.
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/guard/authorize",
            serde_json::json!({ "user_id": CURATOR_ID, "action": "  " }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert!(json["error"].is_string());

    // Unknown users are a 404 on the two-factor surface.
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/two-factor/enroll",
            serde_json::json!({ "user_id": 999 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Confirming without a pending enrollment is a state conflict.
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/two-factor/confirm",
            serde_json::json!({ "user_id": CURATOR_ID, "code": "123456" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // But a wrong credential is not an error: it is a decision.
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/guard/password",
            serde_json::json!({ "user_id": 999, "password": "whatever" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["decision"], "denied");
}

#[tokio::test]
async fn test_users_list_and_grant() {
    let app = spawn_app(None).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/users")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let users = json["data"].as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["id"], CURATOR_ID);
    assert_eq!(users[0]["role"], "curator");
    // Hashes and secrets never cross the wire.
    assert!(users[0].get("hashed_password").is_none());
    assert!(users[0].get("two_fa_secret").is_none());

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/users/grant",
            serde_json::json!({ "chat_id": 3003, "role": "admin" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["role"], "admin");
    assert_eq!(json["data"]["password_changed"], false);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/users?role=admin")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 1);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/users/grant",
            serde_json::json!({ "chat_id": 4004, "role": "overlord" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/users?role=overlord")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_disclosure_schedule_and_cancel() {
    let app = spawn_app(None).await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/disclosures",
            serde_json::json!({ "chat_id": 5005, "message_id": 77 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let token = json["data"]["token"].as_u64().unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/disclosures/{token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["cancelled"], true);

    // Cancelling twice is a no-op, not an error.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/disclosures/{token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["cancelled"], false);
}
