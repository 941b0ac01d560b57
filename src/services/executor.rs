//! Bounded Query Execution
//!
//! `WarehouseClient` wraps the read-only MySQL pool; `QueryExecutor` runs
//! validated SELECTs under a hard row cap and per-statement timeout.
//! Database error messages are sanitized of identifiers before they can
//! reach a response envelope.

use mysql_async::prelude::Queryable;
use mysql_async::{OptsBuilder, Pool, PoolConstraints, PoolOpts};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::WarehouseConfig;
use crate::models::{ExecutionResult, PipelineError, Row};
use crate::utils::ApiError;

/// Thin wrapper over the warehouse connection pool
#[derive(Clone)]
pub struct WarehouseClient {
    pool: Pool,
}

impl WarehouseClient {
    pub fn from_config(config: &WarehouseConfig) -> Self {
        let constraints =
            PoolConstraints::new(1, config.pool_max).unwrap_or_else(PoolConstraints::default);
        let pool_opts = PoolOpts::default().with_constraints(constraints);

        let opts = OptsBuilder::default()
            .ip_or_hostname(config.host.clone())
            .tcp_port(config.port)
            .db_name(Some(config.name.clone()))
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()))
            .pool_opts(pool_opts);

        Self { pool: Pool::new(opts) }
    }

    /// Execute a statement through the prepared-statement path and return
    /// (column_names, rows). Always binds zero named parameters; the
    /// binary protocol keeps values typed.
    pub async fn query_rows(&self, sql: &str) -> Result<(Vec<String>, Vec<Row>), ApiError> {
        let mut conn = self.pool.get_conn().await.map_err(|e| {
            tracing::error!("Failed to get warehouse connection from pool: {}", e);
            ApiError::warehouse_connection_failed(format!("Failed to get connection: {}", e))
        })?;

        let rows: Vec<mysql_async::Row> = conn.exec(sql, ()).await.map_err(|e| {
            tracing::error!("Warehouse query execution failed: {}", e);
            ApiError::internal_error(format!("SQL execution failed: {}", e))
        })?;

        tracing::debug!("Query returned {} rows", rows.len());

        // Explicitly drop connection to return it to the pool promptly
        drop(conn);

        Ok(rows_to_json(rows))
    }

    /// Close the pool on shutdown
    pub async fn disconnect(&self) {
        if let Err(e) = self.pool.clone().disconnect().await {
            tracing::warn!("Warehouse pool disconnect failed: {}", e);
        }
    }
}

/// Convert mysql rows into column list + JSON objects
fn rows_to_json(rows: Vec<mysql_async::Row>) -> (Vec<String>, Vec<Row>) {
    let columns: Vec<String> = rows
        .first()
        .map(|row| {
            row.columns_ref()
                .iter()
                .map(|c| c.name_str().to_string())
                .collect()
        })
        .unwrap_or_default();

    let json_rows = rows
        .into_iter()
        .map(|row| {
            let mut obj = Row::new();
            let column_names: Vec<String> = row
                .columns_ref()
                .iter()
                .map(|c| c.name_str().to_string())
                .collect();
            for (i, name) in column_names.iter().enumerate() {
                let value = row
                    .as_ref(i)
                    .map(value_to_json)
                    .unwrap_or(serde_json::Value::Null);
                obj.insert(name.clone(), value);
            }
            obj
        })
        .collect();

    (columns, json_rows)
}

/// Map a mysql value to JSON, preserving numeric types where possible.
/// DECIMAL and text-protocol values arrive as bytes; parse them back to
/// numbers so downstream suppression sees integers, not strings.
fn value_to_json(value: &mysql_async::Value) -> serde_json::Value {
    use mysql_async::Value;

    match value {
        Value::NULL => serde_json::Value::Null,
        Value::Int(i) => serde_json::json!(i),
        Value::UInt(u) => serde_json::json!(u),
        Value::Float(f) => serde_json::json!(f),
        Value::Double(d) => serde_json::json!(d),
        Value::Bytes(bytes) => {
            let s = String::from_utf8_lossy(bytes).to_string();
            if let Ok(i) = s.parse::<i64>() {
                serde_json::json!(i)
            } else if let Ok(f) = s.parse::<f64>() {
                serde_json::json!(f)
            } else {
                serde_json::Value::String(s)
            }
        },
        Value::Date(y, m, d, hh, mm, ss, _us) => {
            if *hh == 0 && *mm == 0 && *ss == 0 {
                serde_json::Value::String(format!("{:04}-{:02}-{:02}", y, m, d))
            } else {
                serde_json::Value::String(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    y, m, d, hh, mm, ss
                ))
            }
        },
        Value::Time(neg, days, hh, mm, ss, _us) => {
            let sign = if *neg { "-" } else { "" };
            serde_json::Value::String(format!(
                "{}{:02}:{:02}:{:02}",
                sign,
                u32::from(*hh) + days * 24,
                mm,
                ss
            ))
        },
    }
}

/// Strip quoted identifiers and literals from a database error message
/// before it can surface in a user-facing envelope.
fn sanitize_db_error(message: &str) -> String {
    let first_line = message.lines().next().unwrap_or(message);
    let mut out = String::with_capacity(first_line.len());
    let mut chars = first_line.chars();
    while let Some(c) = chars.next() {
        if c == '`' || c == '\'' {
            // Skip to the matching quote
            for inner in chars.by_ref() {
                if inner == c {
                    break;
                }
            }
            out.push('?');
        } else {
            out.push(c);
        }
    }
    out
}

/// Apply the hard row cap; rows beyond the cap are dropped
fn cap_rows(mut rows: Vec<Row>, cap: usize) -> (Vec<Row>, bool) {
    let truncated = rows.len() > cap;
    if truncated {
        rows.truncate(cap);
    }
    (rows, truncated)
}

// ============================================================================
// Query Executor
// ============================================================================

/// Runs a validated SELECT against the warehouse under resource limits
pub struct QueryExecutor {
    client: Arc<WarehouseClient>,
    row_cap: usize,
    statement_timeout: Duration,
}

impl QueryExecutor {
    pub fn new(client: Arc<WarehouseClient>, row_cap: usize, statement_timeout: Duration) -> Self {
        Self { client, row_cap, statement_timeout }
    }

    pub async fn execute(&self, sql: &str) -> Result<ExecutionResult, PipelineError> {
        let start = Instant::now();

        let outcome = tokio::time::timeout(self.statement_timeout, self.client.query_rows(sql))
            .await
            .map_err(|_| {
                tracing::warn!(
                    "Warehouse query exceeded statement timeout of {:?}",
                    self.statement_timeout
                );
                PipelineError::ExecutionError(format!(
                    "query timed out after {}s",
                    self.statement_timeout.as_secs()
                ))
            })?;

        let (columns, rows) = outcome.map_err(|e| match e {
            ApiError::WarehouseConnectionFailed { message } => {
                PipelineError::UpstreamUnavailable(sanitize_db_error(&message))
            },
            other => PipelineError::ExecutionError(sanitize_db_error(&other.to_string())),
        })?;

        let (rows, truncated) = cap_rows(rows, self.row_cap);
        let elapsed_ms = start.elapsed().as_millis() as u64;

        if truncated {
            tracing::info!("Result truncated to row cap of {}", self.row_cap);
        }

        Ok(ExecutionResult { columns, row_count: rows.len(), rows, truncated, elapsed_ms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
        let mut r = Row::new();
        for (k, v) in pairs {
            r.insert(k.to_string(), v.clone());
        }
        r
    }

    #[test]
    fn test_value_to_json_numeric_bytes() {
        let v = mysql_async::Value::Bytes(b"42".to_vec());
        assert_eq!(value_to_json(&v), serde_json::json!(42));

        let v = mysql_async::Value::Bytes(b"12.5".to_vec());
        assert_eq!(value_to_json(&v), serde_json::json!(12.5));

        let v = mysql_async::Value::Bytes(b"Malaria".to_vec());
        assert_eq!(value_to_json(&v), serde_json::json!("Malaria"));
    }

    #[test]
    fn test_value_to_json_date() {
        let v = mysql_async::Value::Date(2024, 3, 5, 0, 0, 0, 0);
        assert_eq!(value_to_json(&v), serde_json::json!("2024-03-05"));

        let v = mysql_async::Value::Date(2024, 3, 5, 13, 45, 9, 0);
        assert_eq!(value_to_json(&v), serde_json::json!("2024-03-05 13:45:09"));
    }

    #[test]
    fn test_cap_rows() {
        let rows: Vec<Row> = (0..5)
            .map(|i| row(&[("n", serde_json::json!(i))]))
            .collect();

        let (kept, truncated) = cap_rows(rows.clone(), 3);
        assert_eq!(kept.len(), 3);
        assert!(truncated);

        let (kept, truncated) = cap_rows(rows, 10);
        assert_eq!(kept.len(), 5);
        assert!(!truncated);
    }

    #[test]
    fn test_sanitize_db_error_strips_identifiers() {
        let msg = "Unknown column 'users.email' in `claims`\nsome detail";
        let cleaned = sanitize_db_error(msg);
        assert!(!cleaned.contains("users.email"));
        assert!(!cleaned.contains("claims"));
        assert!(!cleaned.contains('\n'));
        assert_eq!(cleaned, "Unknown column ? in ?");
    }
}
