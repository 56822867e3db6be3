use std::any::Any;
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use common_auth::{JwtConfig, JwtVerifier};
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, Opts, TextEncoder};
use serde_json::{json, Value};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use audit_service::api_error::ApiError;
use audit_service::app_state::AppState;
use audit_service::log_handlers::{create_audit_log, get_audit_log_by_id, list_audit_logs};
use audit_service::policy_handlers::{
    create_audit_policy, delete_audit_policy, get_audit_policy_by_id, list_audit_policies,
    update_audit_policy,
};
use audit_service::stats_handlers::get_audit_stats;
use audit_service::SERVICE_NAME;

static HTTP_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "http_errors_total",
            "Count of HTTP error responses emitted (status >= 400)",
        ),
        &["service", "code", "status"],
    )
    .expect("http_errors_total");
    let _ = prometheus::default_registry().register(Box::new(c.clone()));
    c
});

async fn track_http_errors(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<Response, Response> {
    let resp = next.run(req).await;
    let status = resp.status();
    if status.as_u16() >= 400 {
        let code = resp
            .headers()
            .get("X-Error-Code")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown");
        HTTP_ERRORS_TOTAL
            .with_label_values(&[SERVICE_NAME, code, status.as_str()])
            .inc();
    }
    Ok(resp)
}

async fn render_metrics() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

fn service_port() -> u16 {
    env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3006)
}

async fn health() -> Json<Value> {
    Json(json!({
        "ok": true,
        "ts": Utc::now().to_rfc3339(),
        "service": SERVICE_NAME,
        "port": service_port(),
    }))
}

async fn route_not_found() -> ApiError {
    ApiError::NotFound {
        code: "route_not_found",
    }
}

// Top-level boundary: unhandled faults become the generic 500 envelope
// instead of tearing down the connection.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };
    ApiError::Internal {
        message: format!("panic: {detail}"),
    }
    .into_response()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let db = PgPool::connect(&database_url).await?;
    // Ensure database schema is up to date before serving traffic
    sqlx::migrate!("./migrations").run(&db).await?;

    let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
    let mut jwt_config = JwtConfig::new(jwt_secret);
    if let Ok(value) = env::var("JWT_LEEWAY_SECONDS") {
        if let Ok(leeway) = value.parse::<u32>() {
            jwt_config = jwt_config.with_leeway(leeway);
        }
    }
    let state = AppState::new(db, Arc::new(JwtVerifier::new(jwt_config)));

    // Frontend and API gateway origins
    let allowed_origins = ["http://localhost:3000", "http://localhost:3001"];
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                .collect::<Vec<_>>(),
        ))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([ACCEPT, CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true);

    let app = Router::new()
        .route("/health", get(health))
        .route("/internal/metrics", get(render_metrics))
        .route(
            "/api/v1/audit/logs",
            post(create_audit_log).get(list_audit_logs),
        )
        .route("/api/v1/audit/logs/:id", get(get_audit_log_by_id))
        .route("/api/v1/audit/stats", get(get_audit_stats))
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
        .fallback(route_not_found)
        .with_state(state)
        .layer(axum::middleware::from_fn(track_http_errors))
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(cors);

    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = service_port();
    let ip: IpAddr = host.parse()?;
    let addr = SocketAddr::from((ip, port));

    println!("starting audit-service on {addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
