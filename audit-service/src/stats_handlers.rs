use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::{Postgres, QueryBuilder, Transaction};

use crate::api_error::{ApiError, ApiResult};
use crate::app_state::AppState;
use crate::auth::Authenticated;
use crate::log_handlers::{parse_date_range, push_range_filter, AuditStatus, DateRange};
use crate::SERVICE_NAME;

/// Whitelisted grouping dimensions; grouping is one generic query over any of
/// these, never a per-dimension hand-written statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GroupColumn {
    Status,
    Service,
    ResourceType,
    Action,
}

impl GroupColumn {
    fn sql_ident(&self) -> &'static str {
        match self {
            GroupColumn::Status => "status",
            GroupColumn::Service => "service",
            GroupColumn::ResourceType => "resource_type",
            GroupColumn::Action => "action",
        }
    }

    fn json_key(&self) -> &'static str {
        match self {
            GroupColumn::Status => "status",
            GroupColumn::Service => "service",
            GroupColumn::ResourceType => "resourceType",
            GroupColumn::Action => "action",
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct GroupCount {
    pub key: String,
    pub count: i64,
}

async fn grouped_counts(
    tx: &mut Transaction<'_, Postgres>,
    column: GroupColumn,
    range: &DateRange,
) -> Result<Vec<GroupCount>, sqlx::Error> {
    let ident = column.sql_ident();
    let mut query = QueryBuilder::<Postgres>::new(format!(
        "SELECT {ident} AS key, COUNT(*) AS count FROM audit_logs"
    ));
    query.push(" WHERE TRUE");
    push_range_filter(&mut query, range);
    query.push(format!(" GROUP BY {ident}"));
    query.build_query_as::<GroupCount>().fetch_all(&mut **tx).await
}

/// All three statuses reported, zero-filled; groups with no rows stay absent.
pub(crate) fn fold_status_counts(rows: &[GroupCount]) -> (i64, i64, i64) {
    let mut success = 0;
    let mut failure = 0;
    let mut warning = 0;
    for row in rows {
        match AuditStatus::parse(&row.key) {
            Some(AuditStatus::Success) => success = row.count,
            Some(AuditStatus::Failure) => failure = row.count,
            Some(AuditStatus::Warning) => warning = row.count,
            None => {}
        }
    }
    (success, failure, warning)
}

fn group_items(rows: Vec<GroupCount>, column: GroupColumn) -> Vec<Value> {
    rows.into_iter()
        .map(|row| json!({ column.json_key(): row.key, "count": row.count }))
        .collect()
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub from_date: Option<String>,
    pub to_date: Option<String>,
}

pub async fn get_audit_stats(
    State(state): State<AppState>,
    Authenticated(_claims): Authenticated,
    Query(q): Query<StatsQuery>,
) -> ApiResult<Json<Value>> {
    let range = parse_date_range(&q.from_date, &q.to_date)?;

    // One repeatable-read transaction so every breakdown comes from the same
    // snapshot; READ COMMITTED would re-snapshot per statement.
    let mut tx = state.db.begin().await.map_err(ApiError::internal)?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;
    let status_rows = grouped_counts(&mut tx, GroupColumn::Status, &range)
        .await
        .map_err(ApiError::internal)?;
    let service_rows = grouped_counts(&mut tx, GroupColumn::Service, &range)
        .await
        .map_err(ApiError::internal)?;
    let resource_type_rows = grouped_counts(&mut tx, GroupColumn::ResourceType, &range)
        .await
        .map_err(ApiError::internal)?;
    let action_rows = grouped_counts(&mut tx, GroupColumn::Action, &range)
        .await
        .map_err(ApiError::internal)?;
    tx.commit().await.map_err(ApiError::internal)?;

    let (success, failure, warning) = fold_status_counts(&status_rows);

    Ok(Json(json!({
        "data": {
            // The total is the sum of the breakdown, never a separate count.
            "totalRecords": success + failure + warning,
            "statusStats": {
                "success": success,
                "failure": failure,
                "warning": warning,
            },
            "serviceStats": group_items(service_rows, GroupColumn::Service),
            "resourceTypeStats": group_items(resource_type_rows, GroupColumn::ResourceType),
            "actionStats": group_items(action_rows, GroupColumn::Action),
        },
        "service": SERVICE_NAME,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_counts_zero_fill_missing_statuses() {
        let rows = vec![GroupCount { key: "success".into(), count: 7 }];
        assert_eq!(fold_status_counts(&rows), (7, 0, 0));
        assert_eq!(fold_status_counts(&[]), (0, 0, 0));
    }

    #[test]
    fn status_counts_ignore_unknown_keys() {
        let rows = vec![
            GroupCount { key: "failure".into(), count: 2 },
            GroupCount { key: "corrupted".into(), count: 99 },
        ];
        assert_eq!(fold_status_counts(&rows), (0, 2, 0));
    }

    #[test]
    fn group_items_use_wire_key_names() {
        let items = group_items(
            vec![GroupCount { key: "session".into(), count: 3 }],
            GroupColumn::ResourceType,
        );
        assert_eq!(items, vec![json!({"resourceType": "session", "count": 3})]);
    }
}
