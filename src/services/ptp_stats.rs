use chrono::Utc;
use sqlx::PgPool;

use crate::error::AppError;

/// Counts of promises by status across `ptps` and `manual_ptps`, plus how
/// many were marked paid today (by date-prefix comparison on updated_at).
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct PtpStats {
    pub total: u64,
    pub paid: u64,
    pub pending: u64,
    pub defaulted: u64,
    pub paid_today: u64,
}

/// Fetch status/updated_at for every promise (optionally narrowed to one
/// tenant) and fold the counts. Pure read; O(n) in promise rows.
pub async fn collect_ptp_stats(
    pool: &PgPool,
    tenant_id: Option<&str>,
) -> Result<PtpStats, AppError> {
    let mut rows = fetch_status_rows(pool, "ptps", tenant_id).await?;
    rows.extend(fetch_status_rows(pool, "manual_ptps", tenant_id).await?);

    let today_prefix = Utc::now().date_naive().to_string();
    Ok(summarize(&rows, &today_prefix))
}

async fn fetch_status_rows(
    pool: &PgPool,
    table: &str,
    tenant_id: Option<&str>,
) -> Result<Vec<(String, Option<String>)>, AppError> {
    // `table` is one of two fixed names, never caller-supplied.
    let sql = format!(
        "SELECT status::text, updated_at::text
         FROM {table}
         WHERE $1::uuid IS NULL OR tenant_id = $1::uuid"
    );

    sqlx::query_as::<_, (String, Option<String>)>(&sql)
        .bind(tenant_id)
        .fetch_all(pool)
        .await
        .map_err(|error| {
            tracing::warn!(table, error = %error, "Failed to fetch promise statuses");
            AppError::Dependency(format!("Could not read {table} statuses."))
        })
}

fn summarize(rows: &[(String, Option<String>)], today_prefix: &str) -> PtpStats {
    let mut stats = PtpStats::default();

    for (status, updated_at) in rows {
        stats.total += 1;
        match status.as_str() {
            "paid" => {
                stats.paid += 1;
                let updated_today = updated_at
                    .as_deref()
                    .is_some_and(|stamp| stamp.starts_with(today_prefix));
                if updated_today {
                    stats.paid_today += 1;
                }
            }
            "pending" => stats.pending += 1,
            "defaulted" => stats.defaulted += 1,
            other => {
                tracing::warn!(status = other, "Unknown promise status in stats");
            }
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::{summarize, PtpStats};

    fn row(status: &str, updated_at: Option<&str>) -> (String, Option<String>) {
        (status.to_string(), updated_at.map(ToOwned::to_owned))
    }

    #[test]
    fn folds_counts_by_status() {
        let rows = vec![
            row("paid", Some("2025-01-15T09:30:00+00:00")),
            row("paid", Some("2025-01-14T23:59:59+00:00")),
            row("pending", Some("2025-01-10T08:00:00+00:00")),
            row("defaulted", None),
        ];

        let stats = summarize(&rows, "2025-01-15");
        assert_eq!(
            stats,
            PtpStats {
                total: 4,
                paid: 2,
                pending: 1,
                defaulted: 1,
                paid_today: 1,
            }
        );
    }

    #[test]
    fn same_day_count_uses_string_prefix() {
        // A paid row updated on the 15th does not count on the 14th, and a
        // missing updated_at never counts.
        let rows = vec![
            row("paid", Some("2025-01-15T00:00:01+00:00")),
            row("paid", None),
        ];
        assert_eq!(summarize(&rows, "2025-01-14").paid_today, 0);
        assert_eq!(summarize(&rows, "2025-01-15").paid_today, 1);
    }

    #[test]
    fn empty_input_yields_zeroes() {
        assert_eq!(summarize(&[], "2025-01-15"), PtpStats::default());
    }
}
