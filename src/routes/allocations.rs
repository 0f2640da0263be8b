use axum::{extract::State, http::HeaderMap, Json};
use chrono::NaiveDate;
use serde_json::{json, Value};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    schemas::{validate_input, RunAllocationInput},
    services::allocation::{run_bulk_allocation, PaymentRef},
    state::AppState,
    tenancy::assert_tenant_role,
};

const ALLOCATION_RUN_ROLES: &[&str] = &["admin", "supervisor"];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route("/allocations/run", axum::routing::post(run_allocation))
}

/// Re-run promise reconciliation for a list of payment references. Every
/// settlement is scoped to the caller's tenant, so foreign debtor ids match
/// nothing. Records with a malformed date are collected as errors (prefixed
/// with the debtor id) and never block the remaining records.
async fn run_allocation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RunAllocationInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let user_id = require_user_id(&state, &headers).await?;
    assert_tenant_role(&state, &user_id, &payload.tenant_id, ALLOCATION_RUN_ROLES).await?;
    let pool = db_pool(&state)?;

    let mut refs = Vec::with_capacity(payload.records.len());
    let mut parse_errors = Vec::new();
    for record in &payload.records {
        match NaiveDate::parse_from_str(record.payment_date.trim(), "%Y-%m-%d") {
            Ok(payment_date) => refs.push(PaymentRef {
                tenant_id: payload.tenant_id.clone(),
                debtor_id: record.debtor_id.clone(),
                payment_amount: record.payment_amount,
                payment_date,
            }),
            Err(_) => parse_errors.push(format!(
                "debtor {}: invalid payment_date '{}'",
                record.debtor_id, record.payment_date
            )),
        }
    }

    let mut result = run_bulk_allocation(pool, &refs).await;
    result.errors.extend(parse_errors);

    Ok(Json(json!({ "result": result })))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency(
            "Supabase database is not configured. Set SUPABASE_DB_URL or DATABASE_URL.".to_string(),
        )
    })
}
