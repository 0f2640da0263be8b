use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Clone, Deserialize)]
pub struct SupabaseUser {
    pub id: String,
    pub email: Option<String>,
    pub user_metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SupabaseClaims {
    sub: String,
    email: Option<String>,
    user_metadata: Option<Value>,
}

/// Resolve the authenticated Supabase user id from request headers.
pub async fn require_user_id(state: &AppState, headers: &HeaderMap) -> Result<String, AppError> {
    require_user(state, headers).await.map(|user| user.id)
}

/// Resolve the authenticated Supabase user from request headers.
///
/// Order: dev override header (non-production only), local JWT verification
/// when SUPABASE_JWT_SECRET is configured, then HTTP fallback against the
/// Supabase auth endpoint using the service-role key.
pub async fn require_user(state: &AppState, headers: &HeaderMap) -> Result<SupabaseUser, AppError> {
    if state.config.auth_dev_overrides_enabled() {
        if let Some(user_id) = header_value(headers, "x-user-id") {
            return Ok(SupabaseUser {
                id: user_id,
                email: None,
                user_metadata: None,
            });
        }
    }

    let token = bearer_token(headers)?;

    if let Some(secret) = state.config.supabase_jwt_secret.as_deref() {
        return verify_local(&token, secret);
    }

    fetch_user_via_http(state, &token).await
}

fn verify_local(token: &str, secret: &str) -> Result<SupabaseUser, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&["authenticated"]);

    let data = decode::<SupabaseClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|error| {
        tracing::debug!(error = %error, "JWT verification failed");
        AppError::Unauthorized("Unauthorized: invalid or expired token.".to_string())
    })?;

    Ok(SupabaseUser {
        id: data.claims.sub,
        email: data.claims.email,
        user_metadata: data.claims.user_metadata,
    })
}

async fn fetch_user_via_http(state: &AppState, token: &str) -> Result<SupabaseUser, AppError> {
    let (Some(supabase_url), Some(service_key)) = (
        state.config.supabase_url.as_deref(),
        state.config.supabase_service_role_key.as_deref(),
    ) else {
        return Err(AppError::Dependency(
            "Supabase auth is not configured. Set SUPABASE_JWT_SECRET or SUPABASE_URL + SUPABASE_SERVICE_ROLE_KEY.".to_string(),
        ));
    };

    let endpoint = format!("{}/auth/v1/user", supabase_url.trim_end_matches('/'));
    let response = state
        .http_client
        .get(&endpoint)
        .header("apikey", service_key)
        .bearer_auth(token)
        .send()
        .await
        .map_err(|error| {
            tracing::error!(error = %error, "Supabase auth request failed");
            AppError::Dependency("Supabase auth request failed.".to_string())
        })?;

    if !response.status().is_success() {
        return Err(AppError::Unauthorized(
            "Unauthorized: invalid or expired token.".to_string(),
        ));
    }

    response.json::<SupabaseUser>().await.map_err(|error| {
        tracing::error!(error = %error, "Supabase auth response could not be parsed");
        AppError::Dependency("Supabase auth response could not be parsed.".to_string())
    })
}

fn bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    let raw = header_value(headers, "authorization")
        .ok_or_else(|| AppError::Unauthorized("Unauthorized: missing bearer token.".to_string()))?;

    raw.strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(ToOwned::to_owned)
        .ok_or_else(|| AppError::Unauthorized("Unauthorized: missing bearer token.".to_string()))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, HeaderValue};

    use super::bearer_token;

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def");
    }

    #[test]
    fn rejects_missing_or_blank_token() {
        assert!(bearer_token(&HeaderMap::new()).is_err());

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer "));
        assert!(bearer_token(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&headers).is_err());
    }
}
