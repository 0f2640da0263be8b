use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    schemas::PtpStatsQuery,
    services::ptp_stats::collect_ptp_stats,
    state::AppState,
    tenancy::{assert_tenant_member, list_user_tenant_ids},
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route("/reports/ptp-stats", axum::routing::get(ptp_stats))
}

/// Promise status counts for a tenant. When no tenant_id is given the
/// caller's single tenant is used; members of several tenants must say
/// which one they mean.
async fn ptp_stats(
    State(state): State<AppState>,
    Query(query): Query<PtpStatsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;

    let tenant_id = match query
        .tenant_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        Some(tenant_id) => tenant_id.to_string(),
        None => {
            let mut tenant_ids = list_user_tenant_ids(&state, &user_id).await?;
            match (tenant_ids.len(), tenant_ids.pop()) {
                (1, Some(only)) => only,
                _ => {
                    return Err(AppError::BadRequest(
                        "tenant_id is required when you belong to more than one tenant."
                            .to_string(),
                    ))
                }
            }
        }
    };

    assert_tenant_member(&state, &user_id, &tenant_id).await?;
    let pool = db_pool(&state)?;

    let stats = collect_ptp_stats(pool, Some(&tenant_id)).await?;

    Ok(Json(json!({
        "tenant_id": tenant_id,
        "stats": stats
    })))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency(
            "Supabase database is not configured. Set SUPABASE_DB_URL or DATABASE_URL.".to_string(),
        )
    })
}
