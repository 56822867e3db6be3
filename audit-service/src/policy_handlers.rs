use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::api_error::{ApiError, ApiResult};
use crate::app_state::AppState;
use crate::auth::Authenticated;
use crate::log_handlers::{parse_entity_id, require_field};
use crate::SERVICE_NAME;

pub const DEFAULT_RETENTION_DAYS: i32 = 365;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AuditPolicy {
    pub id: Uuid,
    pub name: String,
    pub resource_type: String,
    pub actions: Vec<String>,
    pub is_active: bool,
    pub retention_days: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const POLICY_COLUMNS: &str =
    "id, name, resource_type, actions, is_active, retention_days, created_at, updated_at";

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewAuditPolicy {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub actions: Option<Vec<String>>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub retention_days: Option<i32>,
}

/// Partial update: absent fields keep their stored value. `Option` is the
/// presence marker, so an explicit `"isActive": false` is honored.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAuditPolicy {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub actions: Option<Vec<String>>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub retention_days: Option<i32>,
}

#[derive(Debug)]
struct PolicyFields {
    name: String,
    resource_type: String,
    actions: Vec<String>,
    is_active: bool,
    retention_days: i32,
}

fn require_actions(value: Option<Vec<String>>) -> Result<Vec<String>, ApiError> {
    let actions: Vec<String> = value
        .unwrap_or_default()
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();
    if actions.is_empty() {
        return Err(ApiError::BadRequest {
            code: "invalid_actions",
            message: "actions must be a non-empty array of action names".to_string(),
        });
    }
    Ok(actions)
}

// Retention below one day is treated as unset and falls back to the default.
fn effective_retention(value: Option<i32>, fallback: i32) -> i32 {
    match value {
        Some(days) if days >= 1 => days,
        Some(_) => DEFAULT_RETENTION_DAYS,
        None => fallback,
    }
}

fn merge_policy_update(
    existing: &AuditPolicy,
    patch: UpdateAuditPolicy,
) -> Result<PolicyFields, ApiError> {
    let name = match patch.name {
        Some(name) => require_field(Some(name), "name")?,
        None => existing.name.clone(),
    };
    let resource_type = match patch.resource_type {
        Some(resource_type) => require_field(Some(resource_type), "resourceType")?,
        None => existing.resource_type.clone(),
    };
    let actions = match patch.actions {
        Some(actions) => require_actions(Some(actions))?,
        None => existing.actions.clone(),
    };

    Ok(PolicyFields {
        name,
        resource_type,
        actions,
        is_active: patch.is_active.unwrap_or(existing.is_active),
        retention_days: effective_retention(patch.retention_days, existing.retention_days),
    })
}

fn duplicate_name() -> ApiError {
    ApiError::Conflict {
        code: "duplicate_policy_name",
        message: "an audit policy with that name already exists".to_string(),
    }
}

// The unique index on name is the authoritative conflict check; the SELECT
// pre-checks only provide a friendlier fast-path answer.
fn map_policy_write_err(err: sqlx::Error) -> ApiError {
    match &err {
        sqlx::Error::Database(db)
            if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) =>
        {
            duplicate_name()
        }
        _ => ApiError::internal(err),
    }
}

async fn fetch_policy(state: &AppState, id: Uuid) -> ApiResult<Option<AuditPolicy>> {
    sqlx::query_as::<_, AuditPolicy>(&format!(
        "SELECT {POLICY_COLUMNS} FROM audit_policies WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::internal)
}

pub async fn create_audit_policy(
    State(state): State<AppState>,
    Authenticated(_claims): Authenticated,
    Json(body): Json<NewAuditPolicy>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let name = require_field(body.name, "name")?;
    let resource_type = require_field(body.resource_type, "resourceType")?;
    let actions = require_actions(body.actions)?;
    let is_active = body.is_active.unwrap_or(true);
    let retention_days = effective_retention(body.retention_days, DEFAULT_RETENTION_DAYS);

    let taken = sqlx::query_scalar::<_, Uuid>("SELECT id FROM audit_policies WHERE name = $1")
        .bind(&name)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::internal)?;
    if taken.is_some() {
        return Err(duplicate_name());
    }

    let policy = sqlx::query_as::<_, AuditPolicy>(&format!(
        "INSERT INTO audit_policies (id, name, resource_type, actions, is_active, retention_days) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING {POLICY_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(&name)
    .bind(&resource_type)
    .bind(&actions)
    .bind(is_active)
    .bind(retention_days)
    .fetch_one(&state.db)
    .await
    .map_err(map_policy_write_err)?;

    tracing::info!(id = %policy.id, name = %policy.name, "audit policy created");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "audit policy created",
            "data": policy,
            "service": SERVICE_NAME,
        })),
    ))
}

pub async fn get_audit_policy_by_id(
    State(state): State<AppState>,
    Authenticated(_claims): Authenticated,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = parse_entity_id(&id, "audit_policy_not_found")?;
    let policy = fetch_policy(&state, id).await?.ok_or(ApiError::NotFound {
        code: "audit_policy_not_found",
    })?;

    Ok(Json(json!({ "data": policy, "service": SERVICE_NAME })))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PolicyListQuery {
    pub resource_type: Option<String>,
    // Literal "true" compares true; any other supplied value compares false.
    pub is_active: Option<String>,
}

pub async fn list_audit_policies(
    State(state): State<AppState>,
    Authenticated(_claims): Authenticated,
    Query(q): Query<PolicyListQuery>,
) -> ApiResult<Json<Value>> {
    let mut query = QueryBuilder::<Postgres>::new(format!(
        "SELECT {POLICY_COLUMNS} FROM audit_policies WHERE TRUE"
    ));
    if let Some(resource_type) = &q.resource_type {
        query.push(" AND resource_type = ");
        query.push_bind(resource_type.clone());
    }
    if let Some(is_active) = &q.is_active {
        query.push(" AND is_active = ");
        query.push_bind(is_active == "true");
    }
    query.push(" ORDER BY name ASC");

    let policies: Vec<AuditPolicy> = query
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({ "data": policies, "service": SERVICE_NAME })))
}

pub async fn update_audit_policy(
    State(state): State<AppState>,
    Authenticated(_claims): Authenticated,
    Path(id): Path<String>,
    Json(patch): Json<UpdateAuditPolicy>,
) -> ApiResult<Json<Value>> {
    let id = parse_entity_id(&id, "audit_policy_not_found")?;
    let existing = fetch_policy(&state, id).await?.ok_or(ApiError::NotFound {
        code: "audit_policy_not_found",
    })?;

    let fields = merge_policy_update(&existing, patch)?;

    if fields.name != existing.name {
        let clash = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM audit_policies WHERE name = $1 AND id <> $2",
        )
        .bind(&fields.name)
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::internal)?;
        if clash.is_some() {
            return Err(duplicate_name());
        }
    }

    let policy = sqlx::query_as::<_, AuditPolicy>(&format!(
        "UPDATE audit_policies \
         SET name = $1, resource_type = $2, actions = $3, is_active = $4, \
             retention_days = $5, updated_at = now() \
         WHERE id = $6 \
         RETURNING {POLICY_COLUMNS}"
    ))
    .bind(&fields.name)
    .bind(&fields.resource_type)
    .bind(&fields.actions)
    .bind(fields.is_active)
    .bind(fields.retention_days)
    .bind(id)
    .fetch_one(&state.db)
    .await
    .map_err(map_policy_write_err)?;

    Ok(Json(json!({
        "message": "audit policy updated",
        "data": policy,
        "service": SERVICE_NAME,
    })))
}

pub async fn delete_audit_policy(
    State(state): State<AppState>,
    Authenticated(_claims): Authenticated,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = parse_entity_id(&id, "audit_policy_not_found")?;

    let result = sqlx::query("DELETE FROM audit_policies WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(ApiError::internal)?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound {
            code: "audit_policy_not_found",
        });
    }

    tracing::info!(%id, "audit policy deleted");

    Ok(Json(json!({
        "message": "audit policy deleted",
        "service": SERVICE_NAME,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_policy() -> AuditPolicy {
        AuditPolicy {
            id: Uuid::new_v4(),
            name: "session-events".into(),
            resource_type: "session".into(),
            actions: vec!["login".into(), "logout".into()],
            is_active: true,
            retention_days: 90,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn empty_patch_keeps_every_field() {
        let existing = sample_policy();
        let fields =
            merge_policy_update(&existing, UpdateAuditPolicy::default()).expect("merge");

        assert_eq!(fields.name, existing.name);
        assert_eq!(fields.resource_type, existing.resource_type);
        assert_eq!(fields.actions, existing.actions);
        assert_eq!(fields.is_active, existing.is_active);
        assert_eq!(fields.retention_days, 90);
    }

    #[test]
    fn explicit_false_is_active_is_respected() {
        let existing = sample_policy();
        let patch = UpdateAuditPolicy {
            is_active: Some(false),
            ..Default::default()
        };
        let fields = merge_policy_update(&existing, patch).expect("merge");
        assert!(!fields.is_active);
    }

    #[test]
    fn zero_retention_falls_back_to_default() {
        let existing = sample_policy();
        let patch = UpdateAuditPolicy {
            retention_days: Some(0),
            ..Default::default()
        };
        let fields = merge_policy_update(&existing, patch).expect("merge");
        assert_eq!(fields.retention_days, DEFAULT_RETENTION_DAYS);

        let patch = UpdateAuditPolicy {
            retention_days: Some(-30),
            ..Default::default()
        };
        let fields = merge_policy_update(&existing, patch).expect("merge");
        assert_eq!(fields.retention_days, DEFAULT_RETENTION_DAYS);
    }

    #[test]
    fn positive_retention_is_kept() {
        let existing = sample_policy();
        let patch = UpdateAuditPolicy {
            retention_days: Some(30),
            ..Default::default()
        };
        let fields = merge_policy_update(&existing, patch).expect("merge");
        assert_eq!(fields.retention_days, 30);
    }

    #[test]
    fn empty_actions_patch_is_rejected() {
        let existing = sample_policy();
        let patch = UpdateAuditPolicy {
            actions: Some(vec![]),
            ..Default::default()
        };
        let err = merge_policy_update(&existing, patch).expect_err("empty actions");
        assert!(matches!(err, ApiError::BadRequest { code: "invalid_actions", .. }));
    }

    #[test]
    fn blank_name_patch_is_rejected() {
        let existing = sample_policy();
        let patch = UpdateAuditPolicy {
            name: Some("   ".into()),
            ..Default::default()
        };
        let err = merge_policy_update(&existing, patch).expect_err("blank name");
        assert!(matches!(
            err,
            ApiError::BadRequest { code: "missing_required_field", .. }
        ));
    }

    #[test]
    fn create_defaults_apply_when_omitted() {
        assert_eq!(effective_retention(None, DEFAULT_RETENTION_DAYS), 365);
        assert_eq!(effective_retention(Some(0), DEFAULT_RETENTION_DAYS), 365);
        assert_eq!(effective_retention(Some(180), DEFAULT_RETENTION_DAYS), 180);
    }

    #[test]
    fn actions_are_trimmed_and_blank_entries_dropped() {
        let actions =
            require_actions(Some(vec![" login ".into(), "".into(), "delete".into()])).expect("ok");
        assert_eq!(actions, vec!["login".to_string(), "delete".to_string()]);

        assert!(require_actions(Some(vec!["  ".into()])).is_err());
        assert!(require_actions(None).is_err());
    }
}
