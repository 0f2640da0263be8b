use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    repository::table_service::{create_row, get_row, list_rows},
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, CreateDebtorInput,
        DebtorPath, DebtorsQuery,
    },
    services::audit::write_audit_log,
    state::AppState,
    tenancy::{assert_tenant_member, assert_tenant_role},
};

const DEBTOR_EDIT_ROLES: &[&str] = &["admin", "supervisor", "agent"];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/debtors",
            axum::routing::get(list_debtors).post(create_debtor),
        )
        .route("/debtors/{debtor_id}", axum::routing::get(get_debtor))
}

async fn list_debtors(
    State(state): State<AppState>,
    Query(query): Query<DebtorsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_tenant_member(&state, &user_id, &query.tenant_id).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    filters.insert(
        "tenant_id".to_string(),
        Value::String(query.tenant_id.clone()),
    );
    if let Some(account_number) = non_empty_opt(query.account_number.as_deref()) {
        filters.insert("account_number".to_string(), Value::String(account_number));
    }

    let rows = list_rows(
        pool,
        "debtors",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        0,
        "created_at",
        false,
    )
    .await?;

    Ok(Json(json!({ "data": rows })))
}

async fn create_debtor(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateDebtorInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let user_id = require_user_id(&state, &headers).await?;
    assert_tenant_role(&state, &user_id, &payload.tenant_id, DEBTOR_EDIT_ROLES).await?;
    let pool = db_pool(&state)?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert(
        "created_by_user_id".to_string(),
        Value::String(user_id.clone()),
    );

    let created = create_row(pool, "debtors", &record).await?;
    let entity_id = value_str(&created, "id");

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&payload.tenant_id),
        Some(&user_id),
        "create",
        "debtors",
        Some(&entity_id),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_debtor(
    State(state): State<AppState>,
    Path(path): Path<DebtorPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let debtor = get_row(pool, "debtors", &path.debtor_id, "id").await?;
    let tenant_id = value_str(&debtor, "tenant_id");
    assert_tenant_member(&state, &user_id, &tenant_id).await?;

    Ok(Json(debtor))
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
