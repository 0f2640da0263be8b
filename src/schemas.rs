use serde::Deserialize;
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

fn default_limit_100() -> i64 {
    100
}
fn default_limit_500() -> i64 {
    500
}
fn default_source_manual() -> String {
    "manual".to_string()
}
fn default_source_dialer() -> String {
    "dialer".to_string()
}
fn default_status_pending() -> String {
    "pending".to_string()
}

pub fn serialize_to_map<T>(value: &T) -> serde_json::Map<String, serde_json::Value>
where
    T: serde::Serialize,
{
    let json = serde_json::to_value(value)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
    json.as_object().cloned().unwrap_or_default()
}

pub fn remove_nulls(
    mut map: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    map.retain(|_, value| !value.is_null());
    map
}

pub fn clamp_limit_in_range(limit: i64, minimum: i64, maximum: i64) -> i64 {
    limit.clamp(minimum, maximum)
}

// --- debtors ---

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateDebtorInput {
    pub tenant_id: String,
    #[validate(length(min = 1, max = 64))]
    pub account_number: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub balance: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct DebtorsQuery {
    pub tenant_id: String,
    pub account_number: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct DebtorPath {
    pub debtor_id: String,
}

// --- payment records ---

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreatePaymentInput {
    pub tenant_id: String,
    pub debtor_id: String,
    #[validate(range(min = 0.01))]
    pub amount: f64,
    /// ISO date (YYYY-MM-DD).
    pub payment_date: String,
    #[serde(default = "default_source_manual")]
    pub source: String,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct PaymentsQuery {
    pub tenant_id: String,
    pub debtor_id: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct ImportPaymentsInput {
    pub tenant_id: String,
    #[validate(length(min = 1, max = 5000))]
    pub records: Vec<ImportPaymentRecord>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct ImportPaymentRecord {
    pub debtor_id: String,
    pub amount: f64,
    /// ISO date (YYYY-MM-DD).
    pub payment_date: String,
    pub reference: Option<String>,
}

// --- promises to pay ---

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreatePtpInput {
    pub tenant_id: String,
    pub debtor_id: String,
    #[validate(range(min = 0.01))]
    pub amount: f64,
    /// ISO date (YYYY-MM-DD).
    pub promise_date: String,
    #[serde(default = "default_status_pending")]
    pub status: String,
    pub notes: Option<String>,
    #[serde(default = "default_source_dialer")]
    pub source: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct PtpsQuery {
    pub tenant_id: String,
    pub debtor_id: Option<String>,
    pub status: Option<String>,
    #[serde(default = "default_source_dialer")]
    pub source: String,
    #[serde(default = "default_limit_500")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct PtpPath {
    pub ptp_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdatePtpStatusInput {
    pub status: String,
    pub notes: Option<String>,
    #[serde(default = "default_source_dialer")]
    pub source: String,
}

// --- allocation / reports ---

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct RunAllocationInput {
    pub tenant_id: String,
    #[validate(length(min = 1, max = 5000))]
    pub records: Vec<AllocationRecordInput>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct AllocationRecordInput {
    pub debtor_id: String,
    pub payment_amount: f64,
    /// ISO date (YYYY-MM-DD).
    pub payment_date: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct PtpStatsQuery {
    pub tenant_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{clamp_limit_in_range, remove_nulls, serialize_to_map, CreatePaymentInput};

    #[test]
    fn serialize_then_strip_nulls() {
        let input = CreatePaymentInput {
            tenant_id: "550e8400-e29b-41d4-a716-446655440000".to_string(),
            debtor_id: "550e8400-e29b-41d4-a716-446655440001".to_string(),
            amount: 700.0,
            payment_date: "2025-01-15".to_string(),
            source: "manual".to_string(),
            reference: None,
        };

        let map = remove_nulls(serialize_to_map(&input));
        assert!(!map.contains_key("reference"));
        assert_eq!(map.get("amount"), Some(&json!(700.0)));
        assert_eq!(
            map.get("payment_date"),
            Some(&Value::String("2025-01-15".to_string()))
        );
    }

    #[test]
    fn limits_are_clamped() {
        assert_eq!(clamp_limit_in_range(0, 1, 1000), 1);
        assert_eq!(clamp_limit_in_range(250, 1, 1000), 250);
        assert_eq!(clamp_limit_in_range(9999, 1, 1000), 1000);
    }
}
