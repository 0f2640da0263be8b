use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    pub http_client: reqwest::Client,
    /// Keyed by "{tenant_id}:{user_id}"; holds the membership row, if any.
    pub membership_cache: Cache<String, Option<Value>>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db_pool = match config.supabase_db_url.as_deref() {
            Some(url) => Some(
                PgPoolOptions::new()
                    .max_connections(config.db_pool_max_connections)
                    .min_connections(config.db_pool_min_connections)
                    .acquire_timeout(Duration::from_secs(config.db_pool_acquire_timeout_seconds))
                    .idle_timeout(Duration::from_secs(config.db_pool_idle_timeout_seconds))
                    .connect_lazy(url)?,
            ),
            None => {
                tracing::warn!(
                    "SUPABASE_DB_URL / DATABASE_URL is not set — database endpoints will fail"
                );
                None
            }
        };

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        let membership_cache = Cache::builder()
            .time_to_live(Duration::from_secs(
                config.tenant_membership_cache_ttl_seconds.max(1),
            ))
            .max_capacity(config.tenant_membership_cache_max_entries)
            .build();

        Ok(Self {
            config: Arc::new(config),
            db_pool,
            http_client,
            membership_cache,
        })
    }
}
