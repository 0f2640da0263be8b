use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::repository::table_service::create_row;

/// Write an audit log entry. Best effort: failures are logged and swallowed
/// so an audit problem never fails the request that triggered it.
#[allow(clippy::too_many_arguments)]
pub async fn write_audit_log(
    pool: Option<&PgPool>,
    tenant_id: Option<&str>,
    user_id: Option<&str>,
    action: &str,
    entity_type: &str,
    entity_id: Option<&str>,
    before: Option<Value>,
    after: Option<Value>,
) {
    let Some(pool) = pool else {
        return;
    };

    let mut entry = Map::new();
    entry.insert("action".to_string(), Value::String(action.to_string()));
    entry.insert(
        "entity_type".to_string(),
        Value::String(entity_type.to_string()),
    );
    if let Some(tenant_id) = tenant_id {
        entry.insert("tenant_id".to_string(), Value::String(tenant_id.to_string()));
    }
    if let Some(user_id) = user_id {
        entry.insert("user_id".to_string(), Value::String(user_id.to_string()));
    }
    if let Some(entity_id) = entity_id {
        entry.insert("entity_id".to_string(), Value::String(entity_id.to_string()));
    }
    if let Some(before) = before {
        entry.insert("before".to_string(), before);
    }
    if let Some(after) = after {
        entry.insert("after".to_string(), after);
    }

    if let Err(error) = create_row(pool, "audit_logs", &entry).await {
        tracing::warn!(action, entity_type, error = %error, "Failed to write audit log");
    }
}
