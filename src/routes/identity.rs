use axum::{extract::State, http::HeaderMap, Json};
use serde_json::{json, Value};

use crate::{
    auth::require_user,
    error::AppResult,
    state::AppState,
    tenancy::{ensure_app_user, list_user_tenant_ids},
};

/// Resolve the authenticated user, mirror it into app_users, and return the
/// tenants they belong to.
pub async fn me(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers).await?;
    let app_user = ensure_app_user(&state, &user).await?;
    let tenant_ids = list_user_tenant_ids(&state, &user.id).await?;

    Ok(Json(json!({
        "user": app_user,
        "tenant_ids": tenant_ids
    })))
}
