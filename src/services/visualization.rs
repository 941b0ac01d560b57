//! Visualization Hints
//!
//! Data-shape heuristics that suggest how a sanitized result should be
//! rendered. No rendering happens server-side; the hint rides along in
//! the response envelope.

use crate::models::{ExecutionResult, VisualizationHint};

/// Row count above which a plain table should paginate
const PAGINATION_THRESHOLD: usize = 20;

/// Suggest a visualization for a sanitized result
pub fn hint_for(result: &ExecutionResult) -> VisualizationHint {
    let columns = result.columns.clone();

    if result.rows.is_empty() {
        return VisualizationHint { kind: "empty".to_string(), columns };
    }

    let numeric_columns = count_numeric_columns(result);
    let num_rows = result.rows.len();
    let num_cols = columns.len();

    let kind = if num_rows == 1 {
        "metrics"
    } else if num_cols == 2 && numeric_columns == 1 {
        "bar_chart"
    } else if num_cols >= 2 && numeric_columns >= 1 {
        "table_with_chart"
    } else if num_rows <= PAGINATION_THRESHOLD {
        "table"
    } else {
        "paginated_table"
    };

    VisualizationHint { kind: kind.to_string(), columns }
}

/// Columns whose first non-null sample is numeric
fn count_numeric_columns(result: &ExecutionResult) -> usize {
    result
        .columns
        .iter()
        .filter(|col| {
            result
                .rows
                .iter()
                .take(10)
                .filter_map(|row| row.get(*col))
                .find(|v| !v.is_null())
                .map(|v| v.is_number())
                .unwrap_or(false)
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Row;

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
        ExecutionResult { row_count: rows.len(), columns, rows, truncated: false, elapsed_ms: 0 }
    }

    #[test]
    fn test_empty() {
        let r = result(&["a"], vec![]);
        assert_eq!(hint_for(&r).kind, "empty");
    }

    #[test]
    fn test_single_row_is_metrics() {
        let r = result(&["Total Claims"], vec![vec![serde_json::json!(12402)]]);
        assert_eq!(hint_for(&r).kind, "metrics");
    }

    #[test]
    fn test_two_columns_one_numeric_is_bar_chart() {
        let r = result(
            &["Diagnosis", "Claim Count"],
            vec![
                vec![serde_json::json!("Malaria"), serde_json::json!(8500)],
                vec![serde_json::json!("Typhoid"), serde_json::json!(3200)],
            ],
        );
        let hint = hint_for(&r);
        assert_eq!(hint.kind, "bar_chart");
        assert_eq!(hint.columns, vec!["Diagnosis", "Claim Count"]);
    }

    #[test]
    fn test_wide_numeric_is_table_with_chart() {
        let r = result(
            &["Diagnosis", "Claim Count", "Total Cost"],
            vec![
                vec![
                    serde_json::json!("Malaria"),
                    serde_json::json!(8500),
                    serde_json::json!(120000.5),
                ],
                vec![
                    serde_json::json!("Typhoid"),
                    serde_json::json!(3200),
                    serde_json::json!(64000.0),
                ],
            ],
        );
        assert_eq!(hint_for(&r).kind, "table_with_chart");
    }

    #[test]
    fn test_text_only_is_table() {
        let r = result(
            &["Diagnosis"],
            vec![vec![serde_json::json!("Malaria")], vec![serde_json::json!("Typhoid")]],
        );
        assert_eq!(hint_for(&r).kind, "table");
    }

    #[test]
    fn test_large_text_result_paginates() {
        let rows: Vec<Vec<serde_json::Value>> = (0..25)
            .map(|i| vec![serde_json::json!(format!("D{}", i))])
            .collect();
        let r = result(&["Diagnosis"], rows);
        assert_eq!(hint_for(&r).kind, "paginated_table");
    }
}
