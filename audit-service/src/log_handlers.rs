use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::header::USER_AGENT;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{Postgres, QueryBuilder};
use std::net::SocketAddr;
use uuid::Uuid;

use crate::api_error::{ApiError, ApiResult};
use crate::app_state::AppState;
use crate::auth::Authenticated;
use crate::SERVICE_NAME;

const DEFAULT_PAGE: i64 = 1;
const DEFAULT_LIMIT: i64 = 10;
const MAX_LIMIT: i64 = 200;

/// Outcome of the audited action. Anything else is rejected at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    Success,
    Failure,
    Warning,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Failure => "failure",
            AuditStatus::Warning => "warning",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(AuditStatus::Success),
            "failure" => Some(AuditStatus::Failure),
            "warning" => Some(AuditStatus::Warning),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub description: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub status: String,
    pub metadata: Option<Value>,
    pub service: String,
    pub timestamp: DateTime<Utc>,
}

const AUDIT_LOG_COLUMNS: &str = "id, user_id, user_email, action, resource_type, resource_id, \
     description, ip_address, user_agent, status, metadata, service, timestamp";

/// Producer-supplied body; every field optional so validation failures get the
/// enveloped 400 instead of a deserializer rejection.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewAuditLog {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub service: Option<String>,
}

#[derive(Debug)]
struct ValidatedAuditLog {
    user_id: Option<String>,
    user_email: Option<String>,
    action: String,
    resource_type: String,
    resource_id: Option<String>,
    description: String,
    status: AuditStatus,
    metadata: Option<Value>,
    service: String,
}

pub(crate) fn require_field(value: Option<String>, name: &'static str) -> Result<String, ApiError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ApiError::BadRequest {
            code: "missing_required_field",
            message: format!("{name} is required"),
        }),
    }
}

fn validate_new_log(body: NewAuditLog) -> Result<ValidatedAuditLog, ApiError> {
    let action = require_field(body.action, "action")?;
    let resource_type = require_field(body.resource_type, "resourceType")?;
    let description = require_field(body.description, "description")?;
    let service = require_field(body.service, "service")?;
    let status_raw = require_field(body.status, "status")?;
    let status = AuditStatus::parse(&status_raw).ok_or(ApiError::BadRequest {
        code: "invalid_status",
        message: "status must be 'success', 'failure' or 'warning'".to_string(),
    })?;

    Ok(ValidatedAuditLog {
        user_id: body.user_id,
        user_email: body.user_email,
        action,
        resource_type,
        resource_id: body.resource_id,
        description,
        status,
        metadata: body.metadata,
        service,
    })
}

/// First x-forwarded-for hop wins; the raw peer address is the fallback.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded
            .split(',')
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return Some(first.to_string());
        }
    }
    peer.map(|addr| addr.ip().to_string())
}

/// Public ingestion endpoint: producing services need no token to record events.
pub async fn create_audit_log(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<NewAuditLog>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let valid = validate_new_log(body)?;

    let ip_address = client_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr));
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let log = sqlx::query_as::<_, AuditLog>(
        "INSERT INTO audit_logs (id, user_id, user_email, action, resource_type, resource_id, \
         description, ip_address, user_agent, status, metadata, service) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
         RETURNING id, user_id, user_email, action, resource_type, resource_id, description, \
         ip_address, user_agent, status, metadata, service, timestamp",
    )
    .bind(Uuid::new_v4())
    .bind(valid.user_id)
    .bind(valid.user_email)
    .bind(&valid.action)
    .bind(&valid.resource_type)
    .bind(valid.resource_id)
    .bind(&valid.description)
    .bind(ip_address)
    .bind(user_agent)
    .bind(valid.status.as_str())
    .bind(valid.metadata)
    .bind(&valid.service)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::internal)?;

    tracing::info!(
        id = %log.id,
        service = %log.service,
        action = %log.action,
        "audit log recorded"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "audit log recorded",
            "data": log,
            "service": SERVICE_NAME,
        })),
    ))
}

// Malformed ids behave like unknown ids rather than surfacing a parse error.
pub(crate) fn parse_entity_id(raw: &str, code: &'static str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound { code })
}

pub async fn get_audit_log_by_id(
    State(state): State<AppState>,
    Authenticated(_claims): Authenticated,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = parse_entity_id(&id, "audit_log_not_found")?;

    let log = sqlx::query_as::<_, AuditLog>(&format!(
        "SELECT {AUDIT_LOG_COLUMNS} FROM audit_logs WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::internal)?
    .ok_or(ApiError::NotFound {
        code: "audit_log_not_found",
    })?;

    Ok(Json(json!({ "data": log, "service": SERVICE_NAME })))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LogListQuery {
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub status: Option<String>,
    pub service: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    // Raw strings: junk values fall back to defaults instead of erroring.
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub(crate) fn parse_date_range(
    from: &Option<String>,
    to: &Option<String>,
) -> Result<DateRange, ApiError> {
    fn parse_one(raw: &str, name: &'static str) -> Result<DateTime<Utc>, ApiError> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| ApiError::BadRequest {
                code: "invalid_date",
                message: format!("{name} must be an RFC 3339 timestamp"),
            })
    }

    Ok(DateRange {
        from: from.as_deref().map(|raw| parse_one(raw, "fromDate")).transpose()?,
        to: to.as_deref().map(|raw| parse_one(raw, "toDate")).transpose()?,
    })
}

pub(crate) fn push_range_filter(builder: &mut QueryBuilder<'_, Postgres>, range: &DateRange) {
    if let Some(from) = range.from {
        builder.push(" AND timestamp >= ");
        builder.push_bind(from);
    }
    if let Some(to) = range.to {
        builder.push(" AND timestamp <= ");
        builder.push_bind(to);
    }
}

/// Conjunctive filter fragment shared by the COUNT and page queries so the
/// reported total always matches the filter.
fn push_log_filters(builder: &mut QueryBuilder<'_, Postgres>, q: &LogListQuery, range: &DateRange) {
    builder.push(" WHERE TRUE");
    if let Some(user_id) = &q.user_id {
        builder.push(" AND user_id = ");
        builder.push_bind(user_id.clone());
    }
    if let Some(user_email) = &q.user_email {
        builder.push(" AND user_email = ");
        builder.push_bind(user_email.clone());
    }
    if let Some(action) = &q.action {
        builder.push(" AND action = ");
        builder.push_bind(action.clone());
    }
    if let Some(resource_type) = &q.resource_type {
        builder.push(" AND resource_type = ");
        builder.push_bind(resource_type.clone());
    }
    if let Some(resource_id) = &q.resource_id {
        builder.push(" AND resource_id = ");
        builder.push_bind(resource_id.clone());
    }
    if let Some(status) = &q.status {
        builder.push(" AND status = ");
        builder.push_bind(status.clone());
    }
    if let Some(service) = &q.service {
        builder.push(" AND service = ");
        builder.push_bind(service.clone());
    }
    push_range_filter(builder, range);
}

pub(crate) fn page_params(page: &Option<String>, limit: &Option<String>) -> (i64, i64) {
    let page = page
        .as_deref()
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|p| *p >= 1)
        .unwrap_or(DEFAULT_PAGE);
    let limit = limit
        .as_deref()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(DEFAULT_LIMIT)
        .clamp(1, MAX_LIMIT);
    (page, limit)
}

pub(crate) fn total_pages(total: i64, limit: i64) -> i64 {
    if total == 0 {
        0
    } else {
        (total + limit - 1) / limit
    }
}

pub async fn list_audit_logs(
    State(state): State<AppState>,
    Authenticated(_claims): Authenticated,
    Query(q): Query<LogListQuery>,
) -> ApiResult<Json<Value>> {
    let range = parse_date_range(&q.from_date, &q.to_date)?;
    let (page, limit) = page_params(&q.page, &q.limit);
    let offset = (page - 1) * limit;

    let mut count_query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM audit_logs");
    push_log_filters(&mut count_query, &q, &range);
    let total: i64 = count_query
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(ApiError::internal)?;

    let mut page_query =
        QueryBuilder::<Postgres>::new(format!("SELECT {AUDIT_LOG_COLUMNS} FROM audit_logs"));
    push_log_filters(&mut page_query, &q, &range);
    page_query.push(" ORDER BY timestamp DESC LIMIT ");
    page_query.push_bind(limit);
    page_query.push(" OFFSET ");
    page_query.push_bind(offset);

    let logs: Vec<AuditLog> = page_query
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({
        "data": logs,
        "pagination": {
            "total": total,
            "pages": total_pages(total, limit),
            "page": page,
            "limit": limit,
        },
        "service": SERVICE_NAME,
    })))
}
