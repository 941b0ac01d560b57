//! Result Sanitizer
//!
//! Mandatory post-processing before rows reach a caller: surrogate ids and
//! foreign keys are dropped (business identifiers excepted), columns are
//! renamed to business labels, small counts are suppressed, and any PII
//! value that slips through is masked. Sanitization is idempotent.

use crate::models::{ExecutionResult, Row};

/// Suppression sentinel for counts in the re-identification range
const SUPPRESSION_SENTINEL: &str = "<5";
/// Inclusive range of counts that get suppressed
const SUPPRESSION_RANGE: std::ops::RangeInclusive<i64> = 1..=4;

/// Columns always hidden (surrogate ids and foreign keys)
const HIDDEN_COLUMNS: &[&str] = &[
    "id",
    "diagnosis_id",
    "service_summary_id",
    "claim_id",
    "user_id",
    "state_id",
    "diagnosis_code",
    "service_id",
    "services_id",
    "claims_id",
];

/// Externally meaningful identifiers that stay visible despite the
/// id-like suffix
const BUSINESS_IDENTIFIERS: &[&str] = &["provider_id"];

/// Business label mapping; unmapped names are title-cased
const COLUMN_RENAMES: &[(&str, &str)] = &[
    ("diagnosis", "Diagnosis"),
    ("disease_name", "Diagnosis"),
    ("total_claims", "Total Claims"),
    ("claim_count", "Claim Count"),
    ("patient_count", "Patient Count"),
    ("avg_claim_cost", "Average Claim Cost"),
    ("total_cost", "Total Cost"),
    ("usage_count", "Usage Count"),
    ("service", "Service"),
    ("service_description", "Service"),
    ("month", "Month"),
    ("year", "Year"),
    ("provider", "Provider"),
    ("provider_id", "Provider ID"),
    ("facility", "Facility"),
    ("hospital", "Hospital"),
];

/// Value-level PII markers for masking leaked columns
const PII_MARKERS: &[&str] = &[
    "email",
    "phone",
    "nimc",
    "salary",
    "ssn",
    "password",
    "pin",
    "credit_card",
    "bank_account",
];

/// Column-wise and row-wise sanitization of execution results
pub struct ResultSanitizer {
    suppression_markers: Vec<String>,
}

impl ResultSanitizer {
    /// `suppression_markers` configure which column names count as
    /// count-flavoured (substring match, lowercased)
    pub fn new(suppression_markers: Vec<String>) -> Self {
        Self {
            suppression_markers: suppression_markers
                .into_iter()
                .map(|m| m.to_lowercase())
                .collect(),
        }
    }

    /// Produce a sanitized copy; the input result is not modified
    pub fn sanitize(&self, result: &ExecutionResult) -> ExecutionResult {
        let columns: Vec<String> = result
            .columns
            .iter()
            .filter(|c| !should_hide_column(c))
            .map(|c| rename_column(c))
            .collect();

        let rows: Vec<Row> = result
            .rows
            .iter()
            .map(|row| {
                let mut sanitized = Row::new();
                for (col, value) in row {
                    if should_hide_column(col) {
                        continue;
                    }
                    let mut value = value.clone();
                    if is_pii_column(col) {
                        value = mask_value(&value);
                    }
                    if self.is_count_column(col) {
                        value = suppress_small_count(value);
                    }
                    sanitized.insert(rename_column(col), value);
                }
                sanitized
            })
            .collect();

        ExecutionResult {
            columns,
            row_count: rows.len(),
            rows,
            truncated: result.truncated,
            elapsed_ms: result.elapsed_ms,
        }
    }

    fn is_count_column(&self, column: &str) -> bool {
        let lower = column.to_lowercase();
        self.suppression_markers.iter().any(|m| lower.contains(m))
    }
}

fn should_hide_column(column: &str) -> bool {
    let lower = column.to_lowercase();

    if BUSINESS_IDENTIFIERS.contains(&lower.as_str()) {
        return false;
    }

    HIDDEN_COLUMNS.contains(&lower.as_str())
        || lower.ends_with("_id")
        || lower == "id"
        || lower.contains("diagnosis_code")
}

fn rename_column(column: &str) -> String {
    let lower = column.to_lowercase();
    COLUMN_RENAMES
        .iter()
        .find(|(from, _)| *from == lower)
        .map(|(_, to)| to.to_string())
        .unwrap_or_else(|| title_case(column))
}

/// "avg_claim_cost" -> "Avg Claim Cost". Only the first letter of each
/// word is uppercased; the rest is preserved so the transform is stable
/// under repeated application.
fn title_case(column: &str) -> String {
    column
        .split(['_', ' '])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_pii_column(column: &str) -> bool {
    let lower = column.to_lowercase();
    PII_MARKERS.iter().any(|m| lower.contains(m))
}

/// Email keeps its shape masked; long identifiers keep the trailing four
/// characters; anything else collapses to stars.
fn mask_value(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Null => serde_json::Value::Null,
        serde_json::Value::String(s) => {
            if s.contains('@') {
                serde_json::Value::String("***@***.***".to_string())
            } else if s.starts_with("***") {
                // Already masked
                value.clone()
            } else if s.chars().count() > 4 {
                let tail: String = s
                    .chars()
                    .rev()
                    .take(4)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect();
                serde_json::Value::String(format!("***{}", tail))
            } else {
                serde_json::Value::String("***".to_string())
            }
        },
        _ => serde_json::Value::String("***".to_string()),
    }
}

/// Replace integer counts in the suppression range with the sentinel
fn suppress_small_count(value: serde_json::Value) -> serde_json::Value {
    let as_integer = match &value {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else {
                n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)
            }
        },
        _ => None,
    };

    match as_integer {
        Some(i) if SUPPRESSION_RANGE.contains(&i) => {
            serde_json::Value::String(SUPPRESSION_SENTINEL.to_string())
        },
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitizer() -> ResultSanitizer {
        ResultSanitizer::new(vec!["count".to_string(), "total".to_string(), "num".to_string()])
    }

    fn result(columns: &[&str], rows: Vec<Vec<serde_json::Value>>) -> ExecutionResult {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let rows: Vec<Row> = rows
            .into_iter()
            .map(|values| {
                let mut row = Row::new();
                for (col, value) in columns.iter().zip(values) {
                    row.insert(col.clone(), value);
                }
                row
            })
            .collect();
        ExecutionResult { row_count: rows.len(), columns, rows, truncated: false, elapsed_ms: 3 }
    }

    #[test]
    fn test_hides_ids_and_foreign_keys() {
        let input = result(
            &["id", "diagnosis_id", "diagnosis", "claim_count"],
            vec![vec![
                serde_json::json!(7),
                serde_json::json!(12),
                serde_json::json!("Malaria"),
                serde_json::json!(8500),
            ]],
        );

        let output = sanitizer().sanitize(&input);
        assert_eq!(output.columns, vec!["Diagnosis", "Claim Count"]);
        let row = &output.rows[0];
        assert!(!row.contains_key("id"));
        assert!(!row.contains_key("diagnosis_id"));
        assert_eq!(row["Diagnosis"], serde_json::json!("Malaria"));
        assert_eq!(row["Claim Count"], serde_json::json!(8500));
    }

    #[test]
    fn test_provider_id_is_whitelisted() {
        let input = result(
            &["provider_id", "provider"],
            vec![vec![serde_json::json!("HSP-0042"), serde_json::json!("St. Mary")]],
        );

        let output = sanitizer().sanitize(&input);
        assert_eq!(output.columns, vec!["Provider ID", "Provider"]);
        assert_eq!(output.rows[0]["Provider ID"], serde_json::json!("HSP-0042"));
    }

    #[test]
    fn test_unmapped_columns_title_cased() {
        let input = result(&["avg_wait_days"], vec![vec![serde_json::json!(12)]]);
        let output = sanitizer().sanitize(&input);
        assert_eq!(output.columns, vec!["Avg Wait Days"]);
    }

    #[test]
    fn test_small_cell_suppression() {
        let input = result(
            &["diagnosis", "claim_count"],
            vec![
                vec![serde_json::json!("Malaria"), serde_json::json!(8500)],
                vec![serde_json::json!("Rabies"), serde_json::json!(3)],
                vec![serde_json::json!("Tetanus"), serde_json::json!(1)],
                vec![serde_json::json!("Measles"), serde_json::json!(5)],
            ],
        );

        let output = sanitizer().sanitize(&input);
        assert_eq!(output.rows[0]["Claim Count"], serde_json::json!(8500));
        assert_eq!(output.rows[1]["Claim Count"], serde_json::json!("<5"));
        assert_eq!(output.rows[2]["Claim Count"], serde_json::json!("<5"));
        assert_eq!(output.rows[3]["Claim Count"], serde_json::json!(5));
    }

    #[test]
    fn test_suppression_only_on_count_columns() {
        let input = result(&["severity"], vec![vec![serde_json::json!(3)]]);
        let output = sanitizer().sanitize(&input);
        assert_eq!(output.rows[0]["Severity"], serde_json::json!(3));
    }

    #[test]
    fn test_pii_masking() {
        let input = result(
            &["email", "phone_number"],
            vec![vec![
                serde_json::json!("ada@example.com"),
                serde_json::json!("08031234567"),
            ]],
        );

        let output = sanitizer().sanitize(&input);
        assert_eq!(output.rows[0]["Email"], serde_json::json!("***@***.***"));
        assert_eq!(output.rows[0]["Phone Number"], serde_json::json!("***4567"));
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let input = result(
            &["id", "diagnosis", "claim_count", "email", "provider_id"],
            vec![
                vec![
                    serde_json::json!(1),
                    serde_json::json!("Malaria"),
                    serde_json::json!(2),
                    serde_json::json!("ada@example.com"),
                    serde_json::json!("HSP-0042"),
                ],
                vec![
                    serde_json::json!(2),
                    serde_json::json!("Typhoid"),
                    serde_json::json!(3200),
                    serde_json::json!("obi@example.com"),
                    serde_json::json!("HSP-0007"),
                ],
            ],
        );

        let sanitizer = sanitizer();
        let once = sanitizer.sanitize(&input);
        let twice = sanitizer.sanitize(&once);
        assert_eq!(once.columns, twice.columns);
        assert_eq!(once.rows, twice.rows);
    }

    #[test]
    fn test_no_id_columns_survive() {
        let input = result(
            &["id", "user_id", "state_id", "claims_id", "diagnosis_code", "name"],
            vec![vec![
                serde_json::json!(1),
                serde_json::json!(2),
                serde_json::json!(3),
                serde_json::json!(4),
                serde_json::json!("A00"),
                serde_json::json!("Kogi"),
            ]],
        );

        let output = sanitizer().sanitize(&input);
        assert_eq!(output.columns, vec!["Name"]);
        for column in &output.columns {
            let lower = column.to_lowercase();
            assert!(lower != "id" && !lower.ends_with("_id"));
        }
    }
}
