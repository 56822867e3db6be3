//! CRUD and uniqueness behavior for the audit policy endpoints.
//! Requires TEST_AUDIT_DB_URL (or DATABASE_URL) pointing to a Postgres database.
use std::sync::Arc;

use audit_service::app_state::AppState;
use audit_service::policy_handlers::{
    create_audit_policy, delete_audit_policy, get_audit_policy_by_id, list_audit_policies,
    update_audit_policy,
};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use common_auth::{JwtConfig, JwtVerifier};
use http_body_util::BodyExt; // for collect
use sqlx::PgPool;
use tower::util::ServiceExt; // for oneshot
use uuid::Uuid;

const TEST_SECRET: &str = "integration-test-secret";

fn require_database_url() -> Option<String> {
    std::env::var("TEST_AUDIT_DB_URL")
        .ok()
        .or_else(|| std::env::var("DATABASE_URL").ok())
}

fn mint_token() -> String {
    let exp = chrono::Utc::now().timestamp() + 3600;
    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &serde_json::json!({"sub": "integration-runner", "exp": exp}),
        &jsonwebtoken::EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .expect("encode token")
}

fn build_app(pool: PgPool) -> Router {
    let verifier = Arc::new(JwtVerifier::new(JwtConfig::new(TEST_SECRET)));
    let state = AppState::new(pool, verifier);
    Router::new()
        .route(
            "/api/v1/audit/policies",
            post(create_audit_policy).get(list_audit_policies),
        )
        .route(
            "/api/v1/audit/policies/:id",
            get(get_audit_policy_by_id)
                .put(update_audit_policy)
                .delete(delete_audit_policy),
        )
        .with_state(state)
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn authed(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", format!("Bearer {}", mint_token()));
    match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

#[tokio::test]
async fn audit_policy_crud_and_uniqueness() {
    let db_url = match require_database_url() {
        Some(v) => v,
        None => {
            eprintln!("skipping: TEST_AUDIT_DB_URL not set");
            return;
        }
    };
    let pool = PgPool::connect(&db_url).await.expect("connect db");
    sqlx::migrate!("./migrations").run(&pool).await.expect("migrations");

    let run = Uuid::new_v4();
    let name_a = format!("it-policy-a-{run}");
    let name_b = format!("it-policy-b-{run}");
    let resource_type = format!("it-resource-{run}");
    let app = build_app(pool.clone());

    // Policy writes require a token.
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/audit/policies")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({"name": name_a, "resourceType": resource_type, "actions": ["login"]})
                        .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // Create with defaults applied.
    let resp = app
        .clone()
        .oneshot(authed(
            "POST",
            "/api/v1/audit/policies",
            Some(serde_json::json!({
                "name": name_a,
                "resourceType": resource_type,
                "actions": ["login", "logout"],
            })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = body_json(resp).await;
    assert_eq!(created["data"]["isActive"], true);
    assert_eq!(created["data"]["retentionDays"], 365);
    let id_a = created["data"]["id"].as_str().unwrap().to_string();

    // Missing actions: 400.
    let resp = app
        .clone()
        .oneshot(authed(
            "POST",
            "/api/v1/audit/policies",
            Some(serde_json::json!({
                "name": format!("it-policy-empty-{run}"),
                "resourceType": resource_type,
                "actions": [],
            })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["code"], "invalid_actions");

    // Same name again: 409 regardless of the other fields.
    let resp = app
        .clone()
        .oneshot(authed(
            "POST",
            "/api/v1/audit/policies",
            Some(serde_json::json!({
                "name": name_a,
                "resourceType": "something-else",
                "actions": ["delete"],
            })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(resp).await["code"], "duplicate_policy_name");

    // Zero retention on create falls back to the default.
    let resp = app
        .clone()
        .oneshot(authed(
            "POST",
            "/api/v1/audit/policies",
            Some(serde_json::json!({
                "name": name_b,
                "resourceType": resource_type,
                "actions": ["export"],
                "isActive": false,
                "retentionDays": 0,
            })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created_b = body_json(resp).await;
    assert_eq!(created_b["data"]["isActive"], false);
    assert_eq!(created_b["data"]["retentionDays"], 365);
    let id_b = created_b["data"]["id"].as_str().unwrap().to_string();

    // Get by id, unknown id, malformed id.
    let resp = app
        .clone()
        .oneshot(authed("GET", &format!("/api/v1/audit/policies/{id_a}"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["data"]["name"], name_a.as_str());

    let resp = app
        .clone()
        .oneshot(authed(
            "GET",
            &format!("/api/v1/audit/policies/{}", Uuid::new_v4()),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app
        .clone()
        .oneshot(authed("GET", "/api/v1/audit/policies/not-a-uuid", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // List filters AND-combine and order by name.
    let resp = app
        .clone()
        .oneshot(authed(
            "GET",
            &format!("/api/v1/audit/policies?resourceType={resource_type}"),
            None,
        ))
        .await
        .unwrap();
    let listed = body_json(resp).await;
    let names: Vec<String> = listed["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec![name_a.clone(), name_b.clone()]);

    let resp = app
        .clone()
        .oneshot(authed(
            "GET",
            &format!("/api/v1/audit/policies?resourceType={resource_type}&isActive=true"),
            None,
        ))
        .await
        .unwrap();
    let listed = body_json(resp).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);
    assert_eq!(listed["data"][0]["name"], name_a.as_str());

    // Empty patch is an identity update.
    let resp = app
        .clone()
        .oneshot(authed(
            "PUT",
            &format!("/api/v1/audit/policies/{id_a}"),
            Some(serde_json::json!({})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let updated = body_json(resp).await;
    assert_eq!(updated["data"]["name"], name_a.as_str());
    assert_eq!(updated["data"]["actions"], serde_json::json!(["login", "logout"]));
    assert_eq!(updated["data"]["isActive"], true);
    assert_eq!(updated["data"]["retentionDays"], 365);

    // Explicit false survives; zero retention falls back again.
    let resp = app
        .clone()
        .oneshot(authed(
            "PUT",
            &format!("/api/v1/audit/policies/{id_a}"),
            Some(serde_json::json!({"isActive": false, "retentionDays": 30})),
        ))
        .await
        .unwrap();
    let updated = body_json(resp).await;
    assert_eq!(updated["data"]["isActive"], false);
    assert_eq!(updated["data"]["retentionDays"], 30);

    let resp = app
        .clone()
        .oneshot(authed(
            "PUT",
            &format!("/api/v1/audit/policies/{id_a}"),
            Some(serde_json::json!({"retentionDays": 0})),
        ))
        .await
        .unwrap();
    let updated = body_json(resp).await;
    assert_eq!(updated["data"]["retentionDays"], 365);
    assert_eq!(updated["data"]["isActive"], false, "unrelated fields keep their value");

    // Renaming onto an existing name conflicts.
    let resp = app
        .clone()
        .oneshot(authed(
            "PUT",
            &format!("/api/v1/audit/policies/{id_b}"),
            Some(serde_json::json!({"name": name_a})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    // Updating a missing policy is a 404.
    let resp = app
        .clone()
        .oneshot(authed(
            "PUT",
            &format!("/api/v1/audit/policies/{}", Uuid::new_v4()),
            Some(serde_json::json!({"name": format!("it-ghost-{run}")})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // Delete is permanent; the second call sees nothing.
    for (expected, _) in [(StatusCode::OK, "first"), (StatusCode::NOT_FOUND, "second")] {
        let resp = app
            .clone()
            .oneshot(authed(
                "DELETE",
                &format!("/api/v1/audit/policies/{id_b}"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), expected);
    }

    sqlx::query("DELETE FROM audit_policies WHERE resource_type = $1")
        .bind(&resource_type)
        .execute(&pool)
        .await
        .unwrap();
}
