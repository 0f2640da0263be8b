use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    repository::table_service::{create_row, get_row, list_rows, update_row},
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, CreatePtpInput,
        PtpPath, PtpsQuery, UpdatePtpStatusInput,
    },
    services::audit::write_audit_log,
    state::AppState,
    tenancy::{assert_tenant_member, assert_tenant_role},
};

const PTP_EDIT_ROLES: &[&str] = &["admin", "supervisor", "agent"];
const PTP_STATUSES: &[&str] = &["pending", "defaulted", "paid"];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/ptps", axum::routing::get(list_ptps).post(create_ptp))
        .route(
            "/ptps/{ptp_id}/status",
            axum::routing::post(update_ptp_status),
        )
}

async fn list_ptps(
    State(state): State<AppState>,
    Query(query): Query<PtpsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_tenant_member(&state, &user_id, &query.tenant_id).await?;
    let pool = db_pool(&state)?;
    let table = source_table(&query.source)?;

    let mut filters = Map::new();
    filters.insert(
        "tenant_id".to_string(),
        Value::String(query.tenant_id.clone()),
    );
    if let Some(debtor_id) = non_empty_opt(query.debtor_id.as_deref()) {
        filters.insert("debtor_id".to_string(), Value::String(debtor_id));
    }
    if let Some(status) = non_empty_opt(query.status.as_deref()) {
        filters.insert("status".to_string(), Value::String(status));
    }

    let rows = list_rows(
        pool,
        table,
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        0,
        "promise_date",
        true,
    )
    .await?;

    Ok(Json(json!({ "data": rows })))
}

async fn create_ptp(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePtpInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let user_id = require_user_id(&state, &headers).await?;
    assert_tenant_role(&state, &user_id, &payload.tenant_id, PTP_EDIT_ROLES).await?;
    let pool = db_pool(&state)?;
    let table = source_table(&payload.source)?;
    validate_status(&payload.status)?;

    let debtor = get_row(pool, "debtors", &payload.debtor_id, "id").await?;
    if value_str(&debtor, "tenant_id") != payload.tenant_id {
        return Err(AppError::BadRequest(
            "debtor_id does not belong to this tenant.".to_string(),
        ));
    }

    let mut record = remove_nulls(serialize_to_map(&payload));
    // `source` selects the table; it is not a column.
    record.remove("source");
    record.insert(
        "created_by_user_id".to_string(),
        Value::String(user_id.clone()),
    );

    let created = create_row(pool, table, &record).await?;
    let entity_id = value_str(&created, "id");

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&payload.tenant_id),
        Some(&user_id),
        "create",
        table,
        Some(&entity_id),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

/// Agent UI action: explicit status transition on a promise. Allocation is
/// the only other mutation path for promise status.
async fn update_ptp_status(
    State(state): State<AppState>,
    Path(path): Path<PtpPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdatePtpStatusInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let table = source_table(&payload.source)?;
    validate_status(&payload.status)?;

    let record = get_row(pool, table, &path.ptp_id, "id").await?;
    let tenant_id = value_str(&record, "tenant_id");
    assert_tenant_role(&state, &user_id, &tenant_id, PTP_EDIT_ROLES).await?;

    let mut patch = Map::new();
    patch.insert("status".to_string(), Value::String(payload.status.clone()));
    patch.insert(
        "updated_at".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    if let Some(notes) = payload.notes {
        patch.insert("notes".to_string(), Value::String(notes));
    }

    let updated = update_row(pool, table, &path.ptp_id, &patch, "id").await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&tenant_id),
        Some(&user_id),
        "status_transition",
        table,
        Some(&path.ptp_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

fn source_table(source: &str) -> AppResult<&'static str> {
    match source.trim() {
        "" | "dialer" => Ok("ptps"),
        "manual" => Ok("manual_ptps"),
        other => Err(AppError::BadRequest(format!(
            "Invalid source '{other}', expected 'dialer' or 'manual'."
        ))),
    }
}

fn validate_status(status: &str) -> AppResult<()> {
    if PTP_STATUSES.contains(&status) {
        return Ok(());
    }
    Err(AppError::BadRequest(format!(
        "Invalid status '{status}', expected one of pending, defaulted, paid."
    )))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency(
            "Supabase database is not configured. Set SUPABASE_DB_URL or DATABASE_URL.".to_string(),
        )
    })
}

fn value_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::{source_table, validate_status};

    #[test]
    fn source_selects_table() {
        assert_eq!(source_table("dialer").unwrap(), "ptps");
        assert_eq!(source_table("").unwrap(), "ptps");
        assert_eq!(source_table("manual").unwrap(), "manual_ptps");
        assert!(source_table("import").is_err());
    }

    #[test]
    fn status_enum_is_closed() {
        assert!(validate_status("pending").is_ok());
        assert!(validate_status("defaulted").is_ok());
        assert!(validate_status("paid").is_ok());
        assert!(validate_status("cancelled").is_err());
    }
}
