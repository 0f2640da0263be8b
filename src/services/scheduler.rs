use std::time::Duration;

use chrono::{Datelike, Timelike, Utc};
use tokio::time::sleep;

use crate::state::AppState;

/// Spawn the background scheduler that runs periodic jobs.
///
/// Each job runs in its own `tokio::spawn` so a failure in one job never
/// crashes the scheduler loop.
pub async fn run_background_scheduler(state: AppState) {
    tracing::info!("Background scheduler started");

    let pool = match state.db_pool.as_ref() {
        Some(p) => p.clone(),
        None => {
            tracing::warn!("Scheduler: no database pool configured, exiting");
            return;
        }
    };

    let scan_hour = state.config.ptp_scan_hour_utc.min(23);
    let grace_days = state.config.ptp_default_grace_days.max(0);
    let mut last_daily_run: Option<u32> = None;

    loop {
        sleep(Duration::from_secs(60)).await;

        let now_utc = Utc::now();
        let today_ordinal = now_utc.date_naive().ordinal();

        if last_daily_run == Some(today_ordinal) {
            continue;
        }
        if now_utc.hour() < scan_hour {
            continue;
        }

        last_daily_run = Some(today_ordinal);
        tracing::info!(day = %now_utc.date_naive(), "Scheduler: running daily jobs");

        let pool = pool.clone();
        tokio::spawn(async move {
            run_ptp_default_scan(&pool, grace_days).await;
        });
    }
}

/// Mark pending promises as defaulted once their promise date is past the
/// grace period. Allocation can still settle a defaulted promise later.
async fn run_ptp_default_scan(pool: &sqlx::PgPool, grace_days: i64) {
    let cutoff = Utc::now().date_naive() - chrono::Duration::days(grace_days);

    let mut defaulted = 0u64;
    for table in ["ptps", "manual_ptps"] {
        let sql = format!(
            "UPDATE {table}
             SET status = 'defaulted', updated_at = now()
             WHERE status = 'pending' AND promise_date < $1"
        );

        match sqlx::query(&sql).bind(cutoff).execute(pool).await {
            Ok(outcome) => defaulted += outcome.rows_affected(),
            Err(error) => {
                tracing::warn!(table, error = %error, "Scheduler: PTP default scan failed");
            }
        }
    }

    if defaulted > 0 {
        tracing::info!(defaulted, cutoff = %cutoff, "Scheduler: promises marked defaulted");
    }
}
