//! Schema Catalogue
//!
//! Loads and caches warehouse table metadata, table-to-domain mappings and
//! a keyword index used for natural language hinting. Populated once at
//! startup by introspecting information_schema; refreshed only on explicit
//! admin action. Readers always see a consistent snapshot: updates replace
//! the whole structure atomically.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use utoipa::ToSchema;

use crate::models::Domain;
use crate::services::executor::WarehouseClient;
use crate::utils::ApiError;

// Domain 1: Clinical Claims & Diagnosis
const DOMAIN1_TABLES: &[&str] = &[
    "claims",
    "diagnoses",
    "health_records",
    "services",
    "claims_services",
    "diagnosis_codes",
    "icd_codes",
];

// Domain 2: Providers & Facilities Performance
const DOMAIN2_TABLES: &[&str] = &[
    "providers",
    "facilities",
    "provider_performance",
    "facility_metrics",
    "provider_activity",
];

// Cross-cutting tables usable from either domain
const SUPPORTING_TABLES: &[&str] = &["users", "states", "lgas", "zones", "branches"];

/// Static keyword hints per table, extended dynamically with table names
const TABLE_KEYWORDS: &[(&str, &[&str])] = &[
    ("claims", &["claim", "claims", "clinical claim", "medical claim"]),
    ("diagnoses", &["diagnosis", "diagnoses", "disease", "diseases", "illness", "condition"]),
    (
        "providers",
        &["provider", "providers", "facility", "facilities", "hospital", "hospitals", "clinic",
            "clinics"],
    ),
    ("users", &["user", "users", "patient", "patients", "beneficiary", "beneficiaries"]),
    ("states", &["state", "states", "geography", "geographic", "location"]),
    ("services", &["service", "services", "treatment", "treatments", "procedure", "procedures"]),
];

const STATE_KEYWORDS: &[&str] = &[
    "state", "states", "kogi", "zamfara", "kano", "kaduna", "fct", "abuja", "adamawa", "sokoto",
    "rivers", "osun", "lagos",
];

const PROVIDER_KEYWORDS: &[&str] =
    &["provider", "providers", "facility", "facilities", "hospital", "clinic"];

const CLAIMS_KEYWORDS: &[&str] =
    &["claim", "claims", "diagnosis", "diagnoses", "disease", "diseases"];

/// Where a table sits in the domain map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableDomain {
    ClinicalClaimsDiagnosis,
    ProvidersFacilities,
    Supporting,
    Unknown,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ForeignKey {
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub primary_key: Option<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub row_count_hint: Option<u64>,
}

/// One immutable view of the warehouse schema
#[derive(Debug, Default)]
pub struct SchemaSnapshot {
    tables: BTreeMap<String, TableSchema>,
    domains: HashMap<String, TableDomain>,
    keyword_index: Vec<(String, String)>,
}

impl SchemaSnapshot {
    /// Build a snapshot from introspected table schemas
    pub fn from_tables(tables: Vec<TableSchema>) -> Self {
        let mut snapshot = Self::default();
        for table in tables {
            snapshot.add_table(table);
        }
        snapshot
    }

    /// Static fallback snapshot when introspection is unavailable:
    /// domain routing still works, schema context does not.
    pub fn default_mappings() -> Self {
        let names = DOMAIN1_TABLES
            .iter()
            .chain(DOMAIN2_TABLES)
            .chain(SUPPORTING_TABLES);
        let mut snapshot = Self::default();
        for name in names {
            snapshot.index_table(name);
        }
        snapshot
    }

    fn add_table(&mut self, table: TableSchema) {
        self.index_table(&table.name);
        self.tables.insert(table.name.clone(), table);
    }

    fn index_table(&mut self, name: &str) {
        let lower = name.to_lowercase();
        self.domains.insert(lower.clone(), classify_table(&lower));

        // Static keyword hints, then the table name itself
        for (table, keywords) in TABLE_KEYWORDS {
            if lower.contains(table) {
                for kw in *keywords {
                    self.keyword_index.push((kw.to_string(), lower.clone()));
                }
            }
        }
        self.keyword_index.push((lower.clone(), lower));
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(&name.to_lowercase())
    }

    pub fn domain_of(&self, table: &str) -> TableDomain {
        self.domains
            .get(&table.to_lowercase())
            .copied()
            .unwrap_or(TableDomain::Unknown)
    }

    /// Tables hinted at by the question's keywords. State mentions pull in
    /// `states` and `users` since users link claims to states.
    pub fn tables_for(&self, question: &str) -> BTreeSet<String> {
        let lower = question.to_lowercase();
        let mut detected: BTreeSet<String> = self
            .keyword_index
            .iter()
            .filter(|(kw, _)| lower.contains(kw.as_str()))
            .map(|(_, table)| table.clone())
            .collect();

        if STATE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            detected.insert("states".to_string());
            detected.insert("users".to_string());
        }

        detected
    }

    /// Determine the domain for a question from its detected tables.
    /// Provider keywords win over claims keywords when both domains match.
    pub fn domain_for_question(&self, question: &str) -> (Option<Domain>, BTreeSet<String>) {
        let detected = self.tables_for(question);
        if detected.is_empty() {
            return (None, detected);
        }

        let mut domain1_count = 0usize;
        let mut domain2_count = 0usize;
        for table in &detected {
            match self.domain_of(table) {
                TableDomain::ClinicalClaimsDiagnosis => domain1_count += 1,
                TableDomain::ProvidersFacilities => domain2_count += 1,
                _ => {},
            }
        }

        let lower = question.to_lowercase();
        let has_provider_keywords = PROVIDER_KEYWORDS.iter().any(|kw| lower.contains(kw));
        let has_claims_keywords = CLAIMS_KEYWORDS.iter().any(|kw| lower.contains(kw));

        if has_provider_keywords && domain2_count > 0 {
            return (Some(Domain::ProvidersFacilities), detected);
        }
        if has_claims_keywords && domain1_count > 0 {
            return (Some(Domain::ClinicalClaimsDiagnosis), detected);
        }

        if domain2_count > domain1_count {
            return (Some(Domain::ProvidersFacilities), detected);
        }
        if domain1_count > 0 {
            return (Some(Domain::ClinicalClaimsDiagnosis), detected);
        }

        // Only supporting tables matched; fall back to the question wording
        if has_provider_keywords {
            return (Some(Domain::ProvidersFacilities), detected);
        }
        if has_claims_keywords {
            return (Some(Domain::ClinicalClaimsDiagnosis), detected);
        }

        (Some(Domain::ClinicalClaimsDiagnosis), detected)
    }

    /// Format the schema slice for one domain (plus supporting tables) as
    /// LLM prompt context.
    pub fn context_for_domain(&self, domain: Domain) -> String {
        let wanted = match domain {
            Domain::ClinicalClaimsDiagnosis => TableDomain::ClinicalClaimsDiagnosis,
            Domain::ProvidersFacilities => TableDomain::ProvidersFacilities,
        };

        let relevant: Vec<&TableSchema> = self
            .tables
            .values()
            .filter(|t| {
                let d = self.domain_of(&t.name);
                d == wanted || d == TableDomain::Supporting
            })
            .collect();

        if relevant.is_empty() {
            return "Database schema information is not available.".to_string();
        }

        let mut out = String::from("DATABASE SCHEMA:\n\n");
        for table in relevant {
            out.push_str(&format!("Table: {}\n", table.name));
            out.push_str("Columns:\n");
            for col in &table.columns {
                let nullable = if col.nullable { "NULL" } else { "NOT NULL" };
                out.push_str(&format!("  - {} ({}, {})\n", col.name, col.data_type, nullable));
            }
            for fk in &table.foreign_keys {
                out.push_str(&format!(
                    "  FK: {} -> {}.{}\n",
                    fk.column, fk.ref_table, fk.ref_column
                ));
            }
            out.push('\n');
        }
        out
    }
}

fn classify_table(name: &str) -> TableDomain {
    if DOMAIN1_TABLES.iter().any(|t| name.contains(t)) {
        return TableDomain::ClinicalClaimsDiagnosis;
    }
    if DOMAIN2_TABLES.iter().any(|t| name.contains(t)) {
        return TableDomain::ProvidersFacilities;
    }
    if SUPPORTING_TABLES.iter().any(|t| name.contains(t)) {
        return TableDomain::Supporting;
    }
    // Unrecognized warehouse tables default to the claims domain
    TableDomain::ClinicalClaimsDiagnosis
}

// ============================================================================
// Catalogue service
// ============================================================================

/// Read-mostly catalogue; refresh swaps the whole snapshot atomically
pub struct SchemaCatalog {
    snapshot: RwLock<Arc<SchemaSnapshot>>,
}

impl SchemaCatalog {
    pub fn new(snapshot: SchemaSnapshot) -> Self {
        Self { snapshot: RwLock::new(Arc::new(snapshot)) }
    }

    /// Introspect the warehouse and build a catalogue. Falls back to the
    /// static domain mappings when introspection fails, so routing keeps
    /// working without column context.
    pub async fn initialize(client: &WarehouseClient) -> Self {
        match introspect(client).await {
            Ok(snapshot) => {
                tracing::info!(
                    "Schema catalogue initialized with {} tables",
                    snapshot.tables.len()
                );
                Self::new(snapshot)
            },
            Err(e) => {
                tracing::warn!(
                    "Schema introspection failed ({}); using static domain mappings",
                    e
                );
                Self::new(SchemaSnapshot::default_mappings())
            },
        }
    }

    /// Current snapshot; cheap to clone, consistent for the request
    pub fn snapshot(&self) -> Arc<SchemaSnapshot> {
        self.snapshot
            .read()
            .expect("schema snapshot lock poisoned")
            .clone()
    }

    /// Re-introspect and swap the snapshot atomically
    pub async fn refresh(&self, client: &WarehouseClient) -> Result<usize, ApiError> {
        let snapshot = introspect(client).await?;
        let count = snapshot.tables.len();
        *self
            .snapshot
            .write()
            .expect("schema snapshot lock poisoned") = Arc::new(snapshot);
        tracing::info!("Schema catalogue refreshed: {} tables", count);
        Ok(count)
    }

    /// Describe one table or the whole catalogue
    pub fn describe(&self, table: Option<&str>) -> Vec<TableSchema> {
        let snapshot = self.snapshot();
        match table {
            Some(name) => snapshot.table(name).cloned().into_iter().collect(),
            None => snapshot.tables().cloned().collect(),
        }
    }
}

/// Read table, column, key and row-count metadata from information_schema
async fn introspect(client: &WarehouseClient) -> Result<SchemaSnapshot, ApiError> {
    let (_, column_rows) = client
        .query_rows(
            "SELECT TABLE_NAME, COLUMN_NAME, DATA_TYPE, IS_NULLABLE, COLUMN_KEY \
             FROM information_schema.columns \
             WHERE TABLE_SCHEMA = DATABASE() \
             ORDER BY TABLE_NAME, ORDINAL_POSITION",
        )
        .await?;

    let (_, fk_rows) = client
        .query_rows(
            "SELECT TABLE_NAME, COLUMN_NAME, REFERENCED_TABLE_NAME, REFERENCED_COLUMN_NAME \
             FROM information_schema.key_column_usage \
             WHERE TABLE_SCHEMA = DATABASE() AND REFERENCED_TABLE_NAME IS NOT NULL",
        )
        .await?;

    let (_, count_rows) = client
        .query_rows(
            "SELECT TABLE_NAME, TABLE_ROWS \
             FROM information_schema.tables \
             WHERE TABLE_SCHEMA = DATABASE()",
        )
        .await?;

    let str_of = |row: &crate::models::Row, key: &str| -> String {
        row.get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };

    let mut tables: BTreeMap<String, TableSchema> = BTreeMap::new();

    for row in &column_rows {
        let table_name = str_of(row, "TABLE_NAME").to_lowercase();
        if table_name.is_empty() {
            continue;
        }
        let entry = tables.entry(table_name.clone()).or_insert_with(|| TableSchema {
            name: table_name.clone(),
            columns: Vec::new(),
            primary_key: None,
            foreign_keys: Vec::new(),
            row_count_hint: None,
        });

        let column_name = str_of(row, "COLUMN_NAME");
        if str_of(row, "COLUMN_KEY") == "PRI" && entry.primary_key.is_none() {
            entry.primary_key = Some(column_name.clone());
        }
        entry.columns.push(ColumnInfo {
            name: column_name,
            data_type: str_of(row, "DATA_TYPE"),
            nullable: str_of(row, "IS_NULLABLE") == "YES",
        });
    }

    for row in &fk_rows {
        let table_name = str_of(row, "TABLE_NAME").to_lowercase();
        if let Some(entry) = tables.get_mut(&table_name) {
            entry.foreign_keys.push(ForeignKey {
                column: str_of(row, "COLUMN_NAME"),
                ref_table: str_of(row, "REFERENCED_TABLE_NAME").to_lowercase(),
                ref_column: str_of(row, "REFERENCED_COLUMN_NAME"),
            });
        }
    }

    for row in &count_rows {
        let table_name = str_of(row, "TABLE_NAME").to_lowercase();
        if let Some(entry) = tables.get_mut(&table_name) {
            entry.row_count_hint = row.get("TABLE_ROWS").and_then(|v| v.as_u64());
        }
    }

    Ok(SchemaSnapshot::from_tables(tables.into_values().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, columns: &[&str]) -> TableSchema {
        TableSchema {
            name: name.to_string(),
            columns: columns
                .iter()
                .map(|c| ColumnInfo {
                    name: c.to_string(),
                    data_type: "varchar".to_string(),
                    nullable: true,
                })
                .collect(),
            primary_key: Some("id".to_string()),
            foreign_keys: vec![],
            row_count_hint: None,
        }
    }

    fn snapshot() -> SchemaSnapshot {
        SchemaSnapshot::from_tables(vec![
            table("claims", &["id", "user_id", "created_at"]),
            table("diagnoses", &["id", "name"]),
            table("providers", &["id", "provider_id", "name"]),
            table("users", &["id", "state"]),
            table("states", &["id", "name"]),
            table("services", &["id", "description"]),
        ])
    }

    #[test]
    fn test_domain_classification() {
        let snap = snapshot();
        assert_eq!(snap.domain_of("claims"), TableDomain::ClinicalClaimsDiagnosis);
        assert_eq!(snap.domain_of("providers"), TableDomain::ProvidersFacilities);
        assert_eq!(snap.domain_of("states"), TableDomain::Supporting);
        assert_eq!(snap.domain_of("nonexistent"), TableDomain::Unknown);
    }

    #[test]
    fn test_tables_for_keywords() {
        let snap = snapshot();
        let detected = snap.tables_for("top diseases by claim count");
        assert!(detected.contains("claims"));
        assert!(detected.contains("diagnoses"));
    }

    #[test]
    fn test_state_mention_pulls_in_users_and_states() {
        let snap = snapshot();
        let detected = snap.tables_for("claims in Kogi");
        assert!(detected.contains("states"));
        assert!(detected.contains("users"));
    }

    #[test]
    fn test_domain_for_question_claims() {
        let snap = snapshot();
        let (domain, _) = snap.domain_for_question("most common diagnosis last year");
        assert_eq!(domain, Some(Domain::ClinicalClaimsDiagnosis));
    }

    #[test]
    fn test_provider_keywords_win_ties() {
        let snap = snapshot();
        let (domain, detected) = snap.domain_for_question("which hospital processed most claims");
        assert_eq!(domain, Some(Domain::ProvidersFacilities));
        assert!(detected.contains("providers"));
        assert!(detected.contains("claims"));
    }

    #[test]
    fn test_no_keywords_no_domain() {
        let snap = snapshot();
        let (domain, detected) = snap.domain_for_question("what is the weather like");
        assert_eq!(domain, None);
        assert!(detected.is_empty());
    }

    #[test]
    fn test_context_for_domain_lists_tables() {
        let snap = snapshot();
        let ctx = snap.context_for_domain(Domain::ClinicalClaimsDiagnosis);
        assert!(ctx.contains("Table: claims"));
        assert!(ctx.contains("Table: diagnoses"));
        assert!(ctx.contains("Table: states"));
        assert!(!ctx.contains("Table: providers"));
    }

    #[test]
    fn test_default_mappings_have_no_columns() {
        let snap = SchemaSnapshot::default_mappings();
        assert_eq!(
            snap.context_for_domain(Domain::ClinicalClaimsDiagnosis),
            "Database schema information is not available."
        );
        assert_eq!(snap.domain_of("claims"), TableDomain::ClinicalClaimsDiagnosis);
    }
}
