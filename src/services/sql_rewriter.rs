//! SQL Rewriter
//!
//! Whitelisted, semantics-preserving corrections applied after validation:
//! duplicate DISTINCT collapse, stray placeholder state joins, GROUP BY on
//! surrogate ids, and missing DISTINCT in claim counts. Rewrites are
//! idempotent; a rewrite that would drop the SELECT is discarded and the
//! original returned.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static STATE_KEYWORDS: &[&str] = &[
    "zamfara", "kano", "kogi", "kaduna", "fct", "abuja", "adamawa", "sokoto", "rivers", "osun",
    "lagos", "state", "states",
];

static FREQUENCY_KEYWORDS: &[&str] = &["most common", "top", "highest", "count", "number of"];

static DOUBLE_DISTINCT_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)COUNT\s*\(\s*DISTINCT\s+DISTINCT\s+").unwrap());
static DOUBLE_DISTINCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)DISTINCT\s+DISTINCT").unwrap());
static PLACEHOLDER_STATE_FILTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)WHERE\s+s\.name\s+LIKE\s+'%STATENAME%'").unwrap());
static USERS_JOIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+JOIN\s+users\s+u\s+ON\s+c\.user_id\s*=\s*u\.id").unwrap());
static STATES_JOIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+JOIN\s+states\s+s\s+ON\s+u\.state\s*=\s*s\.id").unwrap());
static GROUP_BY_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)GROUP\s+BY\s+([^,\s]+)\.id\b").unwrap());
static COUNT_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)COUNT\s*\(\s*([^)]+\.id)\s*\)").unwrap());

/// Result of a rewrite pass
#[derive(Debug, Clone, PartialEq)]
pub struct RewriteOutcome {
    pub sql: String,
    pub rewritten: bool,
}

/// Applies the correction whitelist to validated SQL
pub struct SqlRewriter;

impl SqlRewriter {
    pub fn new() -> Self {
        Self
    }

    pub fn rewrite(&self, sql: &str, question: &str) -> RewriteOutcome {
        let original = sql.to_string();
        let mut sql = sql.to_string();
        let mut rewritten = false;
        let question_lower = question.to_lowercase();

        let is_state_query = STATE_KEYWORDS.iter().any(|kw| question_lower.contains(kw));

        // Collapse accidental COUNT(DISTINCT DISTINCT ...)
        let new_sql = DOUBLE_DISTINCT_COUNT
            .replace_all(&sql, "COUNT(DISTINCT ")
            .into_owned();
        if new_sql != sql {
            sql = new_sql;
            rewritten = true;
        }

        // Strip the generator's placeholder state filter and users/states
        // join chain when the question never mentions a state
        if !is_state_query {
            let new_sql = PLACEHOLDER_STATE_FILTER.replace_all(&sql, "").into_owned();
            if new_sql != sql {
                sql = new_sql;
                rewritten = true;
            }

            let new_sql = USERS_JOIN.replace_all(&sql, "").into_owned();
            let new_sql = STATES_JOIN.replace_all(&new_sql, "").into_owned();
            if new_sql != sql {
                sql = new_sql;
                rewritten = true;
            }
        }

        // GROUP BY diagnoses.id groups every claim alone; group by name
        if sql.to_uppercase().contains("GROUP BY") && sql.to_uppercase().contains("DIAGNOSES") {
            let source = sql.clone();
            let new_sql = GROUP_BY_ID
                .replace_all(&sql, |caps: &Captures| {
                    rewrite_group_by_alias(&source, caps, "diagnoses", "name")
                })
                .into_owned();
            if new_sql != sql {
                sql = new_sql;
                rewritten = true;
            }
        }

        // Analogous rule for the providers business identifier
        if sql.to_uppercase().contains("GROUP BY") && sql.to_uppercase().contains("PROVIDERS") {
            let source = sql.clone();
            let new_sql = GROUP_BY_ID
                .replace_all(&sql, |caps: &Captures| {
                    rewrite_group_by_alias(&source, caps, "providers", "provider_id")
                })
                .into_owned();
            if new_sql != sql {
                sql = new_sql;
                rewritten = true;
            }
        }

        // Frequency questions must count distinct claims
        if sql.to_uppercase().contains("COUNT") && sql.to_uppercase().contains("CLAIMS") {
            let is_frequency_query =
                FREQUENCY_KEYWORDS.iter().any(|kw| question_lower.contains(kw));
            if is_frequency_query {
                let new_sql = COUNT_ID
                    .replace_all(&sql, |caps: &Captures| {
                        let whole = caps[0].to_lowercase();
                        if whole.contains("c.id") || whole.contains("claims.id") {
                            format!("COUNT(DISTINCT {})", &caps[1])
                        } else {
                            caps[0].to_string()
                        }
                    })
                    .into_owned();
                if new_sql != sql {
                    sql = new_sql;
                    rewritten = true;
                }
            }
        }

        // A rewrite must still be a SELECT; otherwise discard it
        if rewritten && (sql.trim().is_empty() || !sql.to_uppercase().contains("SELECT")) {
            return RewriteOutcome { sql: original, rewritten: false };
        }

        // Final cleanup for any DISTINCT DISTINCT the count rule produced
        let final_sql = DOUBLE_DISTINCT.replace_all(&sql, "DISTINCT").into_owned();
        if final_sql != sql {
            sql = final_sql;
            rewritten = true;
        }

        RewriteOutcome { sql, rewritten }
    }
}

impl Default for SqlRewriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace `GROUP BY <alias>.id` with `GROUP BY <alias>.<column>` only
/// when the alias is actually joined to `table` in the statement.
fn rewrite_group_by_alias(sql: &str, caps: &Captures, table: &str, column: &str) -> String {
    let alias = &caps[1];
    let alias_pattern = format!(r"(?i)JOIN\s+{}\s+(?:AS\s+)?{}\b", table, regex::escape(alias));
    match Regex::new(&alias_pattern) {
        Ok(re) if re.is_match(sql) => format!("GROUP BY {}.{}", alias, column),
        _ => caps[0].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewriter() -> SqlRewriter {
        SqlRewriter::new()
    }

    #[test]
    fn test_collapse_duplicate_distinct() {
        let outcome = rewriter().rewrite(
            "SELECT COUNT(DISTINCT DISTINCT c.id) FROM claims c",
            "how many claims",
        );
        assert!(outcome.rewritten);
        assert_eq!(outcome.sql, "SELECT COUNT(DISTINCT c.id) FROM claims c");
    }

    #[test]
    fn test_strip_placeholder_state_joins() {
        let sql = "SELECT d.name, COUNT(c.id) FROM claims c \
                   JOIN users u ON c.user_id = u.id \
                   JOIN states s ON u.state = s.id \
                   JOIN diagnoses d ON c.diagnosis_id = d.id GROUP BY d.name";

        let outcome = rewriter().rewrite(sql, "top diagnoses overall");
        assert!(outcome.rewritten);
        assert!(!outcome.sql.contains("JOIN users"));
        assert!(!outcome.sql.contains("JOIN states"));
        assert!(outcome.sql.contains("JOIN diagnoses"));
    }

    #[test]
    fn test_state_query_keeps_joins() {
        let sql = "SELECT s.name, COUNT(c.id) FROM claims c \
                   JOIN users u ON c.user_id = u.id \
                   JOIN states s ON u.state = s.id GROUP BY s.name";

        let outcome = rewriter().rewrite(sql, "claims in Kogi state");
        assert!(outcome.sql.contains("JOIN users"));
        assert!(outcome.sql.contains("JOIN states"));
    }

    #[test]
    fn test_group_by_diagnoses_id_becomes_name() {
        let sql = "SELECT d.name, COUNT(c.id) FROM claims c \
                   JOIN diagnoses d ON c.diagnosis_id = d.id GROUP BY d.id";

        let outcome = rewriter().rewrite(sql, "diagnosis breakdown");
        assert!(outcome.rewritten);
        assert!(outcome.sql.contains("GROUP BY d.name"));
    }

    #[test]
    fn test_group_by_providers_id_becomes_provider_id() {
        let sql = "SELECT p.name, COUNT(c.id) FROM claims c \
                   JOIN providers p ON c.provider_id = p.id GROUP BY p.id";

        let outcome = rewriter().rewrite(sql, "claims by provider");
        assert!(outcome.sql.contains("GROUP BY p.provider_id"));
    }

    #[test]
    fn test_group_by_unrelated_alias_untouched() {
        let sql = "SELECT u.id, COUNT(*) FROM visits u GROUP BY u.id";
        let outcome = rewriter().rewrite(sql, "visit breakdown");
        assert!(outcome.sql.contains("GROUP BY u.id"));
    }

    #[test]
    fn test_frequency_count_gets_distinct() {
        let sql = "SELECT d.name, COUNT(c.id) AS claim_count FROM claims c \
                   JOIN diagnoses d ON c.diagnosis_id = d.id GROUP BY d.name";

        let outcome = rewriter().rewrite(sql, "most common diagnosis");
        assert!(outcome.rewritten);
        assert!(outcome.sql.contains("COUNT(DISTINCT c.id)"));
    }

    #[test]
    fn test_non_frequency_count_untouched() {
        let sql = "SELECT COUNT(c.id) FROM claims c";
        let outcome = rewriter().rewrite(sql, "claims this year trend");
        assert!(!outcome.sql.contains("DISTINCT"));
    }

    #[test]
    fn test_rewriter_is_idempotent() {
        let inputs = [
            (
                "SELECT d.name, COUNT(c.id) FROM claims c JOIN users u ON c.user_id = u.id \
                 JOIN states s ON u.state = s.id JOIN diagnoses d ON c.diagnosis_id = d.id \
                 GROUP BY d.id ORDER BY COUNT(c.id) DESC LIMIT 5",
                "top 5 diagnoses",
            ),
            ("SELECT COUNT(DISTINCT DISTINCT c.id) FROM claims c", "count claims"),
            ("SELECT name FROM diagnoses", "list diagnoses"),
        ];

        let rewriter = rewriter();
        for (sql, question) in inputs {
            let once = rewriter.rewrite(sql, question);
            let twice = rewriter.rewrite(&once.sql, question);
            assert_eq!(once.sql, twice.sql, "not idempotent for {:?}", sql);
        }
    }

    #[test]
    fn test_rewrite_never_drops_select() {
        // Degenerate input: the join-strip rules would leave nothing useful
        let outcome = rewriter().rewrite("SELECT 1", "count claims");
        assert!(outcome.sql.to_uppercase().contains("SELECT"));
    }
}
