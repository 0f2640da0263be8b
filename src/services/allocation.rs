use chrono::NaiveDate;
use sqlx::PgPool;
use tracing::warn;

/// Result of settling promises for one payment: one count per PTP table,
/// plus error strings for failed table updates.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AllocationResult {
    pub ptp_updated: u32,
    pub manual_ptp_updated: u32,
    pub errors: Vec<String>,
}

impl AllocationResult {
    pub fn total_updated(&self) -> u32 {
        self.ptp_updated + self.manual_ptp_updated
    }
}

/// One payment reference for the bulk driver. The tenant id scopes the
/// settlement UPDATE itself; the pool is privileged, so authorization checks
/// at the route layer alone would not stop a foreign debtor id.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct PaymentRef {
    pub tenant_id: String,
    pub debtor_id: String,
    pub payment_amount: f64,
    pub payment_date: NaiveDate,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BulkAllocationResult {
    pub processed: u32,
    pub ptp_updated: u32,
    pub manual_ptp_updated: u32,
    pub errors: Vec<String>,
}

/// Settle every pending or defaulted promise for a tenant's debtor that the
/// given payment covers, in both `ptps` and `manual_ptps`.
///
/// The two table updates are independent: a failure on one is reported in
/// `errors` and never rolls back the other. A `paid` promise is excluded by
/// the status filter and therefore never reverted.
pub async fn settle_promises_for_payment(
    pool: &PgPool,
    tenant_id: &str,
    debtor_id: &str,
    payment_amount: f64,
    payment_date: NaiveDate,
) -> AllocationResult {
    let mut result = AllocationResult::default();

    match settle_table(
        pool,
        "ptps",
        tenant_id,
        debtor_id,
        payment_amount,
        payment_date,
    )
    .await
    {
        Ok(updated) => result.ptp_updated = updated,
        Err(error) => {
            warn!(debtor_id, error = %error, "Failed to update ptps for payment");
            result.errors.push(format!("ptps: {error}"));
        }
    }

    match settle_table(
        pool,
        "manual_ptps",
        tenant_id,
        debtor_id,
        payment_amount,
        payment_date,
    )
    .await
    {
        Ok(updated) => result.manual_ptp_updated = updated,
        Err(error) => {
            warn!(debtor_id, error = %error, "Failed to update manual_ptps for payment");
            result.errors.push(format!("manual_ptps: {error}"));
        }
    }

    // One payment settling several promises means the amount was counted
    // against each of them; flagged for operators to audit.
    if result.total_updated() > 1 {
        warn!(
            debtor_id,
            payment_amount,
            settled = result.total_updated(),
            "Single payment settled multiple promises without exhaustion accounting"
        );
    }

    result
}

// `table` is one of two fixed names, never caller-supplied. The tenant
// predicate is part of the statement itself: the pool bypasses RLS.
fn settle_sql(table: &str) -> String {
    format!(
        "UPDATE {table}
         SET status = 'paid', updated_at = now()
         WHERE tenant_id = $1::uuid
           AND debtor_id = $2::uuid
           AND status IN ('pending', 'defaulted')
           AND promise_date <= $3
           AND amount <= $4"
    )
}

async fn settle_table(
    pool: &PgPool,
    table: &str,
    tenant_id: &str,
    debtor_id: &str,
    payment_amount: f64,
    payment_date: NaiveDate,
) -> Result<u32, sqlx::Error> {
    let outcome = sqlx::query(&settle_sql(table))
        .bind(tenant_id)
        .bind(debtor_id)
        .bind(payment_date)
        .bind(payment_amount)
        .execute(pool)
        .await?;

    Ok(outcome.rows_affected() as u32)
}

/// Run the allocation operation for each payment reference sequentially.
/// A failure on one record is collected (prefixed with the debtor id) and
/// never blocks the records after it.
pub async fn run_bulk_allocation(pool: &PgPool, records: &[PaymentRef]) -> BulkAllocationResult {
    let mut bulk = BulkAllocationResult::default();

    for record in records {
        let result = settle_promises_for_payment(
            pool,
            &record.tenant_id,
            &record.debtor_id,
            record.payment_amount,
            record.payment_date,
        )
        .await;
        merge_allocation(&mut bulk, &record.debtor_id, result);
    }

    tracing::info!(
        processed = bulk.processed,
        ptp_updated = bulk.ptp_updated,
        manual_ptp_updated = bulk.manual_ptp_updated,
        errors = bulk.errors.len(),
        "Bulk allocation completed"
    );

    bulk
}

fn merge_allocation(bulk: &mut BulkAllocationResult, debtor_id: &str, result: AllocationResult) {
    bulk.processed += 1;
    bulk.ptp_updated += result.ptp_updated;
    bulk.manual_ptp_updated += result.manual_ptp_updated;
    for error in result.errors {
        bulk.errors.push(format!("debtor {debtor_id}: {error}"));
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{merge_allocation, settle_sql, AllocationResult, BulkAllocationResult};

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
    }

    // Oracle for the WHERE clause in `settle_sql`: a payment covers a promise
    // when the committed amount and date are both within the payment's.
    fn covers_promise(
        promise_amount: f64,
        promise_date: NaiveDate,
        payment_amount: f64,
        payment_date: NaiveDate,
    ) -> bool {
        promise_amount <= payment_amount && promise_date <= payment_date
    }

    #[test]
    fn settlement_update_is_tenant_scoped() {
        // The pool is privileged, so a debtor id from another tenant must be
        // stopped by the statement itself, not only by route-layer checks.
        for table in ["ptps", "manual_ptps"] {
            let sql = settle_sql(table);
            assert!(
                sql.contains("tenant_id = $1::uuid"),
                "Expected tenant predicate in {table} SQL but got: {sql}"
            );
            assert!(
                sql.contains("debtor_id = $2::uuid"),
                "Expected debtor predicate in {table} SQL but got: {sql}"
            );
        }
    }

    #[test]
    fn settlement_update_never_reverts_paid_promises() {
        let sql = settle_sql("ptps");
        assert!(
            sql.contains("status IN ('pending', 'defaulted')"),
            "Expected the update set restricted to settleable statuses but got: {sql}"
        );
        assert!(
            sql.contains("promise_date <= $3") && sql.contains("amount <= $4"),
            "Expected coverage predicates in SQL but got: {sql}"
        );
        assert!(
            sql.contains("SET status = 'paid', updated_at = now()"),
            "Expected paid transition with timestamp but got: {sql}"
        );
    }

    #[test]
    fn payment_covers_only_promises_within_amount_and_date() {
        // Debtor has promises of 500 @ 01-10 and 1000 @ 01-20; a payment of
        // 700 @ 01-15 covers the first and not the second.
        let payment_amount = 700.0;
        let payment_date = date("2025-01-15");

        assert!(covers_promise(
            500.0,
            date("2025-01-10"),
            payment_amount,
            payment_date
        ));
        assert!(!covers_promise(
            1000.0,
            date("2025-01-20"),
            payment_amount,
            payment_date
        ));
    }

    #[test]
    fn promise_dated_after_payment_is_not_covered() {
        assert!(!covers_promise(
            100.0,
            date("2025-02-01"),
            500.0,
            date("2025-01-15")
        ));
    }

    #[test]
    fn exact_amount_and_date_are_covered() {
        assert!(covers_promise(
            700.0,
            date("2025-01-15"),
            700.0,
            date("2025-01-15")
        ));
    }

    #[test]
    fn bulk_aggregation_sums_counts_and_prefixes_errors() {
        let mut bulk = BulkAllocationResult::default();

        merge_allocation(
            &mut bulk,
            "d-1",
            AllocationResult {
                ptp_updated: 2,
                manual_ptp_updated: 1,
                errors: Vec::new(),
            },
        );
        // Record 2 fails on one table; record 3 still processes afterwards.
        merge_allocation(
            &mut bulk,
            "d-2",
            AllocationResult {
                ptp_updated: 0,
                manual_ptp_updated: 0,
                errors: vec!["manual_ptps: connection reset".to_string()],
            },
        );
        merge_allocation(
            &mut bulk,
            "d-3",
            AllocationResult {
                ptp_updated: 1,
                manual_ptp_updated: 0,
                errors: Vec::new(),
            },
        );

        assert_eq!(bulk.processed, 3);
        assert_eq!(bulk.ptp_updated, 3);
        assert_eq!(bulk.manual_ptp_updated, 1);
        assert_eq!(
            bulk.errors,
            vec!["debtor d-2: manual_ptps: connection reset".to_string()]
        );
    }
}
