use serde_json::{json, Value};
use sqlx::{PgPool, Row};

use crate::{auth::SupabaseUser, error::AppError, state::AppState};

fn db_pool(state: &AppState) -> Result<&PgPool, AppError> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency(
            "Supabase database is not configured. Set SUPABASE_DB_URL or DATABASE_URL.".to_string(),
        )
    })
}

pub async fn get_tenant_membership(
    state: &AppState,
    user_id: &str,
    tenant_id: &str,
) -> Result<Option<Value>, AppError> {
    let cache_key = format!("{tenant_id}:{user_id}");
    if let Some(cached) = state.membership_cache.get(&cache_key).await {
        return Ok(cached);
    }

    let pool = db_pool(state)?;
    let row = sqlx::query(
        "SELECT row_to_json(t) AS row
         FROM tenant_members t
         WHERE tenant_id = $1::uuid AND user_id = $2::uuid
         LIMIT 1",
    )
    .bind(tenant_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(|error| AppError::Dependency(format!("Supabase request failed: {error}")))?;

    let membership = row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten());
    state
        .membership_cache
        .insert(cache_key, membership.clone())
        .await;
    Ok(membership)
}

pub async fn assert_tenant_member(
    state: &AppState,
    user_id: &str,
    tenant_id: &str,
) -> Result<Value, AppError> {
    get_tenant_membership(state, user_id, tenant_id)
        .await?
        .ok_or_else(|| AppError::Forbidden("Forbidden: not a member of this tenant.".to_string()))
}

pub async fn assert_tenant_role(
    state: &AppState,
    user_id: &str,
    tenant_id: &str,
    allowed_roles: &[&str],
) -> Result<Value, AppError> {
    let membership = assert_tenant_member(state, user_id, tenant_id).await?;
    let role = membership
        .get("role")
        .and_then(Value::as_str)
        .unwrap_or("unknown");

    if allowed_roles.contains(&role) {
        return Ok(membership);
    }

    Err(AppError::Forbidden(format!(
        "Forbidden: role '{role}' is not allowed for this action."
    )))
}

pub async fn ensure_app_user(state: &AppState, user: &SupabaseUser) -> Result<Value, AppError> {
    if user.id.trim().is_empty() {
        return Err(AppError::Unauthorized(
            "Unauthorized: missing user.".to_string(),
        ));
    }
    let Some(email) = user.email.as_ref() else {
        return Err(AppError::BadRequest(
            "Supabase user is missing an email address.".to_string(),
        ));
    };

    let full_name = resolve_full_name(user, email);
    let pool = db_pool(state)?;

    sqlx::query(
        "INSERT INTO app_users (id, email, full_name)
         VALUES ($1::uuid, $2, $3)
         ON CONFLICT (id)
         DO UPDATE SET email = EXCLUDED.email, full_name = EXCLUDED.full_name",
    )
    .bind(&user.id)
    .bind(email)
    .bind(&full_name)
    .execute(pool)
    .await
    .map_err(|error| AppError::Dependency(format!("Supabase request failed: {error}")))?;

    Ok(json!({
        "id": user.id,
        "email": email,
        "full_name": full_name
    }))
}

pub async fn list_user_tenant_ids(state: &AppState, user_id: &str) -> Result<Vec<String>, AppError> {
    let pool = db_pool(state)?;
    let rows = sqlx::query(
        "SELECT tenant_id::text AS tenant_id
         FROM tenant_members
         WHERE user_id = $1::uuid
         LIMIT 500",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(|error| AppError::Dependency(format!("Supabase request failed: {error}")))?;

    let mut tenant_ids = Vec::new();
    for row in rows {
        if let Ok(value) = row.try_get::<String, _>("tenant_id") {
            if !value.is_empty() {
                tenant_ids.push(value);
            }
        }
    }
    Ok(tenant_ids)
}

fn resolve_full_name(user: &SupabaseUser, email: &str) -> String {
    let metadata = user
        .user_metadata
        .as_ref()
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let from_metadata = ["full_name", "name", "fullName"]
        .iter()
        .find_map(|key| metadata.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned);

    if let Some(value) = from_metadata {
        return value;
    }

    email
        .split('@')
        .next()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| "User".to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::resolve_full_name;
    use crate::auth::SupabaseUser;

    #[test]
    fn full_name_prefers_metadata_then_email_local_part() {
        let user = SupabaseUser {
            id: "550e8400-e29b-41d4-a716-446655440000".to_string(),
            email: Some("agent@muni.gov.za".to_string()),
            user_metadata: Some(json!({"full_name": "Thandi Dlamini"})),
        };
        assert_eq!(resolve_full_name(&user, "agent@muni.gov.za"), "Thandi Dlamini");

        let bare = SupabaseUser {
            id: user.id.clone(),
            email: user.email.clone(),
            user_metadata: None,
        };
        assert_eq!(resolve_full_name(&bare, "agent@muni.gov.za"), "agent");
    }
}
