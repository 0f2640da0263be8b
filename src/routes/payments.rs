use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde_json::{json, Map, Value};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    repository::table_service::{create_row, create_row_tx, get_row, list_rows},
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, CreatePaymentInput,
        ImportPaymentsInput, PaymentsQuery,
    },
    services::{
        allocation::{run_bulk_allocation, settle_promises_for_payment, PaymentRef},
        audit::write_audit_log,
    },
    state::AppState,
    tenancy::{assert_tenant_member, assert_tenant_role},
};

const PAYMENT_ENTRY_ROLES: &[&str] = &["admin", "supervisor", "agent"];
const PAYMENT_IMPORT_ROLES: &[&str] = &["admin", "supervisor"];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/payments",
            axum::routing::get(list_payments).post(create_payment),
        )
        .route("/payments/import", axum::routing::post(import_payments))
}

async fn list_payments(
    State(state): State<AppState>,
    Query(query): Query<PaymentsQuery>,
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
    if let Some(debtor_id) = non_empty_opt(query.debtor_id.as_deref()) {
        filters.insert("debtor_id".to_string(), Value::String(debtor_id));
    }

    let rows = list_rows(
        pool,
        "payment_records",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        0,
        "created_at",
        false,
    )
    .await?;

    Ok(Json(json!({ "data": rows })))
}

/// Record a payment and immediately reconcile the debtor's promises against
/// it. The allocation outcome is returned inline so the agent sees which
/// promises the payment settled.
async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePaymentInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let user_id = require_user_id(&state, &headers).await?;
    assert_tenant_role(&state, &user_id, &payload.tenant_id, PAYMENT_ENTRY_ROLES).await?;
    let pool = db_pool(&state)?;

    let payment_date = parse_date(&payload.payment_date)?;

    let debtor = get_row(pool, "debtors", &payload.debtor_id, "id").await?;
    if value_str(&debtor, "tenant_id") != payload.tenant_id {
        return Err(AppError::BadRequest(
            "debtor_id does not belong to this tenant.".to_string(),
        ));
    }

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert(
        "created_by_user_id".to_string(),
        Value::String(user_id.clone()),
    );

    let created = create_row(pool, "payment_records", &record).await?;
    let entity_id = value_str(&created, "id");

    let allocation = settle_promises_for_payment(
        pool,
        &payload.tenant_id,
        &payload.debtor_id,
        payload.amount,
        payment_date,
    )
    .await;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&payload.tenant_id),
        Some(&user_id),
        "create",
        "payment_records",
        Some(&entity_id),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(json!({
            "payment": created,
            "allocation": allocation
        })),
    ))
}

/// Bulk import: insert the payment rows inside one transaction (with a batch
/// bookkeeping row), then run the allocation driver over the imported
/// records. Allocation is best effort per record and reported, not rolled
/// back.
async fn import_payments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ImportPaymentsInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let user_id = require_user_id(&state, &headers).await?;
    assert_tenant_role(&state, &user_id, &payload.tenant_id, PAYMENT_IMPORT_ROLES).await?;
    let pool = db_pool(&state)?;

    // Reject the whole file up front on a malformed date; imports are
    // all-or-nothing at the insert stage.
    let mut refs = Vec::with_capacity(payload.records.len());
    for record in &payload.records {
        let payment_date = parse_date(&record.payment_date).map_err(|_| {
            AppError::UnprocessableEntity(format!(
                "Invalid payment_date '{}' for debtor {}.",
                record.payment_date, record.debtor_id
            ))
        })?;
        refs.push(PaymentRef {
            tenant_id: payload.tenant_id.clone(),
            debtor_id: record.debtor_id.clone(),
            payment_amount: record.amount,
            payment_date,
        });
    }

    let mut tx = pool.begin().await.map_err(|error| {
        tracing::error!(error = %error, "Could not open import transaction");
        AppError::Dependency("Database operation failed.".to_string())
    })?;

    let mut batch = Map::new();
    batch.insert(
        "tenant_id".to_string(),
        Value::String(payload.tenant_id.clone()),
    );
    batch.insert(
        "record_count".to_string(),
        json!(payload.records.len() as i64),
    );
    batch.insert(
        "created_by_user_id".to_string(),
        Value::String(user_id.clone()),
    );
    let batch_row = create_row_tx(&mut tx, "payment_import_batches", &batch).await?;
    let batch_id = value_str(&batch_row, "id");

    for record in &payload.records {
        let mut row = remove_nulls(serialize_to_map(record));
        row.insert(
            "tenant_id".to_string(),
            Value::String(payload.tenant_id.clone()),
        );
        row.insert("batch_id".to_string(), Value::String(batch_id.clone()));
        row.insert("source".to_string(), Value::String("import".to_string()));
        row.insert(
            "created_by_user_id".to_string(),
            Value::String(user_id.clone()),
        );
        create_row_tx(&mut tx, "payment_records", &row).await?;
    }

    tx.commit().await.map_err(|error| {
        tracing::error!(error = %error, "Could not commit import transaction");
        AppError::Dependency("Database operation failed.".to_string())
    })?;

    let allocation = run_bulk_allocation(pool, &refs).await;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&payload.tenant_id),
        Some(&user_id),
        "import",
        "payment_import_batches",
        Some(&batch_id),
        None,
        Some(batch_row),
    )
    .await;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(json!({
            "batch_id": batch_id,
            "imported": payload.records.len(),
            "allocation": allocation
        })),
    ))
}

fn parse_date(raw: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest(format!("Invalid date '{raw}', expected YYYY-MM-DD.")))
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
    use super::parse_date;

    #[test]
    fn parses_iso_dates_only() {
        assert!(parse_date("2025-01-15").is_ok());
        assert!(parse_date(" 2025-01-15 ").is_ok());
        assert!(parse_date("15/01/2025").is_err());
        assert!(parse_date("2025-13-01").is_err());
        assert!(parse_date("").is_err());
    }
}
