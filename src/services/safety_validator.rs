//! Safety Validator
//!
//! Ordered, hard-blocking checks over candidate SQL. The first failure is
//! fatal for the request: forbidden write operations, trailing statements,
//! cartesian joins, role table access, and PII exposure. Each rejection
//! carries a distinct kind and a user-safe message.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{CandidateSql, PipelineError, QueryContext, Role, SafetyViolationKind};

/// Write verbs that must never survive validation
const FORBIDDEN_OPERATIONS: &[&str] = &[
    "DELETE", "UPDATE", "DROP", "TRUNCATE", "ALTER", "CREATE", "INSERT", "GRANT", "REVOKE",
    "EXEC", "EXECUTE",
];

/// PII and sensitive column names
const PII_COLUMNS: &[&str] = &[
    "email",
    "phone",
    "phone_number",
    "nimc",
    "nimc_number",
    "salary",
    "salary_number",
    "ssn",
    "password",
    "pin",
    "credit_card",
    "bank_account",
    "personal_information",
];

/// Query-text wording that signals a sensitive-data request
const SENSITIVE_KEYWORDS: &[&str] = &[
    "email",
    "phone",
    "nimc",
    "salary",
    "ssn",
    "password",
    "credit card",
    "bank account",
    "personal information",
];

/// Analyst-tier table allow-list; users/states additionally require the
/// state-filter capability on the request context
const ANALYST_TABLES: &[&str] = &[
    "claims",
    "service_summaries",
    "service_summary_diagnosis",
    "diagnoses",
    "claims_services",
    "services",
    "providers",
];

const ANALYST_CONDITIONAL_TABLES: &[&str] = &["users", "states"];

/// Public tier sees aggregated reference tables only
const PUBLIC_TABLES: &[&str] = &["diagnoses", "services"];

static FORBIDDEN_RES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    FORBIDDEN_OPERATIONS
        .iter()
        .map(|op| (*op, Regex::new(&format!(r"(?i)\b{}\b", op)).unwrap()))
        .collect()
});

static JOIN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bJOIN\b").unwrap());
static ON_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bON\b").unwrap());
static TABLE_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:FROM|JOIN)\s+`?([a-zA-Z_][a-zA-Z0-9_]*)`?").unwrap());

/// Extract tables referenced by FROM/JOIN clauses, lowercased, in order
pub fn referenced_tables(sql: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for caps in TABLE_REF_RE.captures_iter(sql) {
        let table = caps[1].to_lowercase();
        if !seen.contains(&table) {
            seen.push(table);
        }
    }
    seen
}

/// Stateless validator over candidate SQL
pub struct SafetyValidator;

impl SafetyValidator {
    pub fn new() -> Self {
        Self
    }

    /// Run every check in order; the first failure rejects the request
    pub fn validate(&self, ctx: &QueryContext, candidate: &CandidateSql) -> Result<(), PipelineError> {
        let sql = candidate.sql.trim();
        if sql.is_empty() {
            return Err(PipelineError::GenerationFailure("empty SQL".to_string()));
        }

        self.check_forbidden_operations(sql)?;
        self.check_single_statement(sql)?;
        self.check_cartesian_join(sql)?;
        self.check_role_permissions(ctx, sql)?;
        self.check_sensitive_access(ctx, sql)?;
        Ok(())
    }

    fn check_forbidden_operations(&self, sql: &str) -> Result<(), PipelineError> {
        for (op, re) in FORBIDDEN_RES.iter() {
            if re.is_match(sql) {
                return Err(PipelineError::SafetyViolation {
                    kind: SafetyViolationKind::ForbiddenOperation,
                    message: format!(
                        "Query contains forbidden operation: {}. Only SELECT queries are allowed.",
                        op
                    ),
                });
            }
        }
        Ok(())
    }

    fn check_single_statement(&self, sql: &str) -> Result<(), PipelineError> {
        // A trailing semicolon is tolerated; content after one is not
        let trimmed = sql.trim_end().trim_end_matches(';');
        if trimmed.contains(';') {
            return Err(PipelineError::SafetyViolation {
                kind: SafetyViolationKind::MultipleStatements,
                message: "Query must be a single SELECT statement.".to_string(),
            });
        }
        Ok(())
    }

    fn check_cartesian_join(&self, sql: &str) -> Result<(), PipelineError> {
        let join_count = JOIN_RE.find_iter(sql).count();
        if join_count == 0 {
            return Ok(());
        }
        let on_count = ON_RE.find_iter(sql).count();
        if join_count > on_count {
            return Err(PipelineError::SafetyViolation {
                kind: SafetyViolationKind::CartesianJoin,
                message: "Query contains Cartesian join (missing ON clause). All joins must \
                          have explicit join conditions."
                    .to_string(),
            });
        }
        Ok(())
    }

    fn check_role_permissions(&self, ctx: &QueryContext, sql: &str) -> Result<(), PipelineError> {
        let allowed: &[&str] = match ctx.role {
            Role::Admin => return Ok(()),
            Role::Analyst => ANALYST_TABLES,
            Role::Public => PUBLIC_TABLES,
        };

        for table in referenced_tables(sql) {
            if allowed.contains(&table.as_str()) {
                continue;
            }

            // Analysts may touch users/states, but only to filter by state
            // and never for user-detail questions
            if ctx.role == Role::Analyst && ANALYST_CONDITIONAL_TABLES.contains(&table.as_str()) {
                if ctx.state_filter_context && !ctx.user_detail_query {
                    continue;
                }
                return Err(PipelineError::SafetyViolation {
                    kind: SafetyViolationKind::RoleViolation,
                    message: format!(
                        "Role '{}' does not have permission to access table '{}' for user \
                         details. State filtering is allowed, but user detail queries are \
                         restricted.",
                        ctx.role.as_str(),
                        table
                    ),
                });
            }

            return Err(PipelineError::SafetyViolation {
                kind: SafetyViolationKind::RoleViolation,
                message: format!(
                    "Role '{}' does not have permission to access table '{}'. Allowed tables: {}",
                    ctx.role.as_str(),
                    table,
                    allowed.join(", ")
                ),
            });
        }
        Ok(())
    }

    fn check_sensitive_access(&self, ctx: &QueryContext, sql: &str) -> Result<(), PipelineError> {
        let question_lower = ctx.question.to_lowercase();
        if !SENSITIVE_KEYWORDS.iter().any(|kw| question_lower.contains(kw)) {
            return Ok(());
        }

        let pii = identify_pii_columns(sql);
        if !pii.is_empty() {
            return Err(PipelineError::SafetyViolation {
                kind: SafetyViolationKind::PiiExposure,
                message: format!(
                    "Query attempts to access sensitive data: {}. This data is restricted for \
                     privacy and security reasons.",
                    pii.join(", ")
                ),
            });
        }
        Ok(())
    }
}

impl Default for SafetyValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// PII-flagged columns appearing in the SQL as word-bounded tokens
pub fn identify_pii_columns(sql: &str) -> Vec<&'static str> {
    PII_COLUMNS
        .iter()
        .filter(|col| {
            Regex::new(&format!(r"(?i)\b{}\b", col))
                .map(|re| re.is_match(sql))
                .unwrap_or(false)
        })
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SqlSource;

    fn ctx(question: &str, role: Role) -> QueryContext {
        QueryContext::new(question.to_string(), "s1".to_string(), None, role, false)
    }

    fn candidate(sql: &str) -> CandidateSql {
        CandidateSql {
            sql: sql.to_string(),
            explanation: String::new(),
            confidence: 0.9,
            tables_referenced: referenced_tables(sql),
            source: SqlSource::LlmGenerated,
        }
    }

    fn expect_violation(result: Result<(), PipelineError>, kind: SafetyViolationKind) {
        match result {
            Err(PipelineError::SafetyViolation { kind: actual, .. }) => assert_eq!(actual, kind),
            other => panic!("expected {:?}, got {:?}", kind, other),
        }
    }

    #[test]
    fn test_forbidden_operations_blocked() {
        let validator = SafetyValidator::new();
        let c = ctx("delete all claims", Role::Admin);

        expect_violation(
            validator.validate(&c, &candidate("DELETE FROM claims")),
            SafetyViolationKind::ForbiddenOperation,
        );
        expect_violation(
            validator.validate(&c, &candidate("SELECT 1; DROP TABLE claims")),
            SafetyViolationKind::ForbiddenOperation,
        );
    }

    #[test]
    fn test_word_boundary_does_not_overmatch() {
        let validator = SafetyValidator::new();
        let c = ctx("claims with updated_at", Role::Admin);
        // "updated_at" contains UPDATE only as a prefix, not a word
        assert!(validator
            .validate(&c, &candidate("SELECT updated_at FROM claims"))
            .is_ok());
    }

    #[test]
    fn test_multiple_statements_blocked() {
        let validator = SafetyValidator::new();
        let c = ctx("claims", Role::Admin);
        expect_violation(
            validator.validate(&c, &candidate("SELECT 1; SELECT 2")),
            SafetyViolationKind::MultipleStatements,
        );
        // Trailing semicolon alone is fine
        assert!(validator
            .validate(&c, &candidate("SELECT id FROM claims;"))
            .is_ok());
    }

    #[test]
    fn test_cartesian_join_blocked() {
        let validator = SafetyValidator::new();
        let c = ctx("claims by diagnosis", Role::Admin);
        expect_violation(
            validator.validate(&c, &candidate("SELECT * FROM claims c JOIN diagnoses d")),
            SafetyViolationKind::CartesianJoin,
        );
        assert!(validator
            .validate(
                &c,
                &candidate("SELECT * FROM claims c JOIN diagnoses d ON c.diagnosis_id = d.id")
            )
            .is_ok());
    }

    #[test]
    fn test_role_gate_blocks_unknown_table() {
        let validator = SafetyValidator::new();
        let c = ctx("claims volume", Role::Analyst);
        expect_violation(
            validator.validate(&c, &candidate("SELECT * FROM payroll")),
            SafetyViolationKind::RoleViolation,
        );
    }

    #[test]
    fn test_analyst_state_filter_exception() {
        let validator = SafetyValidator::new();
        let sql = "SELECT s.name, COUNT(DISTINCT c.id) FROM claims c \
                   JOIN users u ON c.user_id = u.id \
                   JOIN states s ON u.state = s.id GROUP BY s.name";

        // State-filter context: allowed
        let c = ctx("claims by state in Kogi", Role::Analyst);
        assert!(validator.validate(&c, &candidate(sql)).is_ok());

        // No state context: users/states are off limits
        let c = ctx("claims volume breakdown", Role::Analyst);
        expect_violation(
            validator.validate(&c, &candidate(sql)),
            SafetyViolationKind::RoleViolation,
        );

        // State context but user-detail question: still blocked
        let c = ctx("which user filed claims in Kogi state", Role::Analyst);
        expect_violation(
            validator.validate(&c, &candidate(sql)),
            SafetyViolationKind::RoleViolation,
        );
    }

    #[test]
    fn test_public_role_restricted() {
        let validator = SafetyValidator::new();
        let c = ctx("diagnoses list", Role::Public);
        assert!(validator
            .validate(&c, &candidate("SELECT name FROM diagnoses"))
            .is_ok());
        expect_violation(
            validator.validate(&c, &candidate("SELECT * FROM claims")),
            SafetyViolationKind::RoleViolation,
        );
    }

    #[test]
    fn test_pii_gate() {
        let validator = SafetyValidator::new();
        let c = ctx("show me patient email addresses", Role::Admin);
        expect_violation(
            validator.validate(&c, &candidate("SELECT email FROM users")),
            SafetyViolationKind::PiiExposure,
        );

        // Sensitive wording without PII columns in the SQL passes
        assert!(validator
            .validate(&c, &candidate("SELECT COUNT(*) FROM claims"))
            .is_ok());
    }

    #[test]
    fn test_referenced_tables() {
        let tables = referenced_tables(
            "SELECT * FROM claims c JOIN users u ON c.user_id = u.id JOIN states s ON u.state = s.id",
        );
        assert_eq!(tables, vec!["claims", "users", "states"]);
    }
}
